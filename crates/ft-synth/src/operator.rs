//! FM operator
//!
//! One sine operator with a phase accumulator, an ADSR envelope,
//! self-feedback, and key tracking. The phase step derives from the
//! note's base frequency, the operator's ratio, and fine detune in
//! cents; phase is kept modulo 2π.

use std::f32::consts::TAU;

use ft_core::Sample;

use crate::envelope::{AdsrEnvelope, EnvelopeConfig};

/// Static operator settings
#[derive(Debug, Clone, Copy)]
pub struct OperatorParams {
    /// Frequency ratio relative to the note frequency
    pub ratio: f32,
    /// Fine detune in cents
    pub fine_detune_cents: f32,
    /// Output level in [0, 1]
    pub output_level: f32,
    /// Scales this operator's contribution when it modulates another
    pub mod_index: f32,
    /// Self-feedback amount in [0, 1]
    pub feedback: f32,
    /// Level key tracking in [0, 1]: higher notes attenuate
    pub key_tracking: f32,
}

impl Default for OperatorParams {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            fine_detune_cents: 0.0,
            output_level: 1.0,
            mod_index: 0.0,
            feedback: 0.0,
            key_tracking: 0.0,
        }
    }
}

/// A single sine operator
#[derive(Debug, Clone)]
pub struct FmOperator {
    params: OperatorParams,
    envelope: AdsrEnvelope,
    /// Phase accumulator in radians, kept in [0, 2π)
    phase: f32,
    phase_step: f32,
    /// Last output sample, fed back into the phase
    prev_output: f32,
    /// Level factor from key tracking, set at note-on
    track_gain: f32,
    sample_rate: f32,
}

/// Key-tracking reference frequency (middle C)
const TRACK_REF_HZ: f32 = 261.6256;

impl FmOperator {
    pub fn new(sample_rate: f32, params: OperatorParams, envelope: EnvelopeConfig) -> Self {
        Self {
            params,
            envelope: AdsrEnvelope::new(sample_rate, envelope),
            phase: 0.0,
            phase_step: 0.0,
            prev_output: 0.0,
            track_gain: 1.0,
            sample_rate,
        }
    }

    pub fn params(&self) -> &OperatorParams {
        &self.params
    }

    pub fn set_params(&mut self, params: OperatorParams) {
        self.params = params;
    }

    pub fn envelope(&self) -> &AdsrEnvelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut AdsrEnvelope {
        &mut self.envelope
    }

    /// Recompute the phase step for a note frequency
    pub fn set_note_frequency(&mut self, base_freq: f32) {
        let detune_factor = 2.0_f32.powf(self.params.fine_detune_cents / 1200.0);
        let freq = base_freq * self.params.ratio * detune_factor;
        self.phase_step = TAU * freq / self.sample_rate;

        self.track_gain = if self.params.key_tracking > 0.0 && base_freq > 0.0 {
            (TRACK_REF_HZ / base_freq).powf(self.params.key_tracking)
        } else {
            1.0
        };
    }

    /// Trigger the envelope; `phase_reset` restarts the accumulator
    pub fn note_on(&mut self, phase_reset: bool) {
        if phase_reset {
            self.phase = 0.0;
            self.prev_output = 0.0;
        }
        self.envelope.trigger();
    }

    pub fn note_off(&mut self) {
        self.envelope.release();
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.prev_output = 0.0;
        self.envelope.reset();
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.envelope.is_idle()
    }

    /// Render one sample with external phase modulation input
    #[inline]
    pub fn tick(&mut self, mod_input: Sample) -> Sample {
        let env = self.envelope.next_sample();
        let out = self.params.output_level
            * self.track_gain
            * env
            * (self.phase + mod_input + self.params.feedback * self.prev_output).sin();
        self.prev_output = out;

        self.phase += self.phase_step;
        if self.phase >= TAU {
            // Step can exceed one turn at extreme ratio × note choices
            self.phase %= TAU;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RetriggerMode, SegmentCurve};
    use approx::assert_relative_eq;

    const SR: f32 = 48000.0;

    fn sustained_env() -> EnvelopeConfig {
        EnvelopeConfig {
            attack_secs: 0.0,
            decay_secs: 0.0,
            end_level: 1.0,
            release_secs: 0.05,
            curve: SegmentCurve::Amplitude,
            retrigger: RetriggerMode::Hard,
        }
    }

    #[test]
    fn unmodulated_operator_is_a_sine() {
        let mut op = FmOperator::new(SR, OperatorParams::default(), sustained_env());
        op.set_note_frequency(440.0);
        op.note_on(true);

        for n in 0..1024 {
            let expected = (TAU * 440.0 * n as f32 / SR).sin();
            let got = op.tick(0.0);
            assert_relative_eq!(got, expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn ratio_scales_frequency() {
        let mut op = FmOperator::new(
            SR,
            OperatorParams {
                ratio: 2.0,
                ..Default::default()
            },
            sustained_env(),
        );
        op.set_note_frequency(440.0);
        op.note_on(true);

        for n in 0..512 {
            let expected = (TAU * 880.0 * n as f32 / SR).sin();
            assert_relative_eq!(op.tick(0.0), expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn detune_shifts_frequency() {
        // +1200 cents doubles the frequency
        let mut op = FmOperator::new(
            SR,
            OperatorParams {
                fine_detune_cents: 1200.0,
                ..Default::default()
            },
            sustained_env(),
        );
        op.set_note_frequency(220.0);
        op.note_on(true);

        for n in 0..512 {
            let expected = (TAU * 440.0 * n as f32 / SR).sin();
            assert_relative_eq!(op.tick(0.0), expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn phase_stays_bounded() {
        let mut op = FmOperator::new(SR, OperatorParams::default(), sustained_env());
        op.set_note_frequency(19000.0);
        op.note_on(true);
        for _ in 0..100_000 {
            op.tick(0.0);
        }
        assert!(op.phase >= 0.0 && op.phase < TAU);
    }

    #[test]
    fn silent_when_idle() {
        let mut op = FmOperator::new(SR, OperatorParams::default(), sustained_env());
        op.set_note_frequency(440.0);
        assert_eq!(op.tick(0.0), 0.0);
    }

    #[test]
    fn key_tracking_attenuates_high_notes() {
        let params = OperatorParams {
            key_tracking: 1.0,
            ..Default::default()
        };
        let mut low = FmOperator::new(SR, params, sustained_env());
        let mut high = FmOperator::new(SR, params, sustained_env());
        low.set_note_frequency(TRACK_REF_HZ);
        high.set_note_frequency(TRACK_REF_HZ * 4.0);
        assert_relative_eq!(low.track_gain, 1.0);
        assert_relative_eq!(high.track_gain, 0.25, epsilon = 1e-4);
    }

    #[test]
    fn feedback_distorts_output() {
        let clean_params = OperatorParams::default();
        let fb_params = OperatorParams {
            feedback: 0.8,
            ..Default::default()
        };
        let mut clean = FmOperator::new(SR, clean_params, sustained_env());
        let mut dirty = FmOperator::new(SR, fb_params, sustained_env());
        clean.set_note_frequency(440.0);
        dirty.set_note_frequency(440.0);
        clean.note_on(true);
        dirty.note_on(true);

        let mut diverged = false;
        for _ in 0..512 {
            let a = clean.tick(0.0);
            let b = dirty.tick(0.0);
            assert!(b.is_finite());
            if (a - b).abs() > 1e-3 {
                diverged = true;
            }
        }
        assert!(diverged);
    }
}
