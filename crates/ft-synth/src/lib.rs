//! ft-synth: FM voice machines for Ferrotone
//!
//! A four-operator FM synthesizer in the Digitone mould: operators
//! A, B1, B2, C wired through one of eight fixed algorithms, per-operator
//! ADSR envelopes, and a 16-voice machine with voice stealing. The
//! [`VoiceMachine`] trait is the integration contract other machine
//! types (wavetable, drums) implement against the sequencer bridge and
//! the audio graph.

pub mod envelope;
pub mod operator;
pub mod voice;
pub mod machine;
pub mod params;

pub use envelope::{AdsrEnvelope, EnvelopeConfig, EnvelopeStage, RetriggerMode, SegmentCurve};
pub use operator::{FmOperator, OperatorParams};
pub use voice::{Algorithm, FmVoice, ALGORITHM_COUNT, OP_A, OP_B1, OP_B2, OP_C};
pub use machine::{FmToneMachine, VoiceMachine};

use ft_core::Sample;

/// MIDI note number → frequency in Hz (A4 = 69 = 440 Hz)
#[inline]
pub fn midi_note_to_freq(note: u8) -> Sample {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn note_frequencies() {
        assert_relative_eq!(midi_note_to_freq(69), 440.0);
        assert_relative_eq!(midi_note_to_freq(57), 220.0, epsilon = 1e-3);
        assert_relative_eq!(midi_note_to_freq(81), 880.0, epsilon = 1e-3);
        assert_relative_eq!(midi_note_to_freq(60), 261.6256, epsilon = 1e-3);
    }
}
