//! FM TONE voice machine
//!
//! Sixteen voices behind a stealing policy (idle first, then the
//! oldest releasing voice, then the oldest overall), a parameter map
//! keyed by [`crate::params`], and a stereo render loop with denormal
//! prevention at the voice sum.

use ft_core::{EngineError, EngineResult, ParamKey, Sample, flush_denormal};
use ft_dsp::LinearSmoother;

use crate::params;
use crate::voice::FmVoice;

pub const VOICE_COUNT: usize = 16;

/// Integration contract between the sequencer bridge and any machine
/// type (FM TONE here; wavetable and drum machines plug in the same
/// way). `process` accumulates into an interleaved stereo buffer so
/// machines can share a mix bus. Parameters arrive in native units.
pub trait VoiceMachine: Send {
    fn note_on(&mut self, note: u8, velocity: u8);

    fn note_off(&mut self, note: u8);

    fn set_param(&mut self, key: ParamKey, value: f32) -> EngineResult<()>;

    /// Scaling spec for a parameter key, if this machine knows it
    fn param_spec(&self, key: ParamKey) -> Option<&'static ft_core::ParamSpec> {
        let _ = key;
        None
    }

    /// Render `output.len() / 2` frames, adding into `output`
    fn process(&mut self, output: &mut [Sample]);

    fn active_voices(&self) -> usize;

    /// Quiesce everything immediately
    fn reset(&mut self);

    /// Move held voices to release (used when the transport stops)
    fn release_all(&mut self);
}

/// Summary of one polyphony slot, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceInfo {
    pub note: u8,
    pub held: bool,
    pub releasing: bool,
    pub idle: bool,
}

/// The 4-operator FM machine
pub struct FmToneMachine {
    voices: Vec<FmVoice>,
    /// Monotone stamp source for the stealing policy
    clock: u64,
    master_level: LinearSmoother,
    phase_reset: bool,
    sample_rate: f32,
}

impl FmToneMachine {
    pub fn new(sample_rate: f32) -> Self {
        let mut machine = Self {
            voices: (0..VOICE_COUNT).map(|_| FmVoice::new(sample_rate)).collect(),
            clock: 0,
            master_level: LinearSmoother::new(sample_rate, 0.8),
            phase_reset: true,
            sample_rate,
        };
        // Start from the table defaults so machine and presets agree
        for key in params::all_keys() {
            if let Some(spec) = params::spec(key) {
                let _ = machine.set_param(key, spec.default);
            }
        }
        machine
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn voice_info(&self, index: usize) -> Option<VoiceInfo> {
        self.voices.get(index).map(|v| VoiceInfo {
            note: v.note(),
            held: v.is_held(),
            releasing: v.is_releasing(),
            idle: v.is_idle(),
        })
    }

    /// Stealing policy: idle voice, else oldest releasing, else oldest
    fn allocate_voice(&mut self) -> usize {
        if let Some(idx) = self.voices.iter().position(|v| v.is_idle()) {
            return idx;
        }
        if let Some(idx) = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_releasing())
            .min_by_key(|(_, v)| v.allocated_at())
            .map(|(idx, _)| idx)
        {
            return idx;
        }
        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.allocated_at())
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn apply_op_param(&mut self, op: usize, field: u8, value: f32) {
        for voice in &mut self.voices {
            let operator = voice.operator_mut(op);
            let mut p = *operator.params();
            let mut env = *operator.envelope().config();
            match field {
                params::FIELD_RATIO => p.ratio = value,
                params::FIELD_DETUNE => p.fine_detune_cents = value,
                params::FIELD_LEVEL => p.output_level = value,
                params::FIELD_MOD_INDEX => p.mod_index = value,
                params::FIELD_FEEDBACK => p.feedback = value,
                params::FIELD_ENV_ATTACK => env.attack_secs = value,
                params::FIELD_ENV_DECAY => env.decay_secs = value,
                params::FIELD_ENV_END => env.end_level = value,
                params::FIELD_ENV_RELEASE => env.release_secs = value,
                _ => p.key_tracking = value,
            }
            operator.set_params(p);
            operator.envelope_mut().set_config(env);
        }
    }
}

impl VoiceMachine for FmToneMachine {
    fn note_on(&mut self, note: u8, velocity: u8) {
        self.clock += 1;
        let stamp = self.clock;
        let phase_reset = self.phase_reset;
        let idx = self.allocate_voice();
        self.voices[idx].note_on(note, velocity, stamp, phase_reset);
    }

    fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            if voice.is_held() && voice.note() == note {
                voice.note_off();
            }
        }
    }

    fn param_spec(&self, key: ParamKey) -> Option<&'static ft_core::ParamSpec> {
        params::spec(key)
    }

    fn set_param(&mut self, key: ParamKey, value: f32) -> EngineResult<()> {
        match key {
            params::ALGORITHM => {
                let id = value.round() as usize;
                for voice in &mut self.voices {
                    voice.set_algorithm(id);
                }
            }
            params::MASTER_LEVEL => {
                self.master_level.set_target(value.clamp(0.0, 1.0), 0.005);
            }
            params::PHASE_RESET => {
                self.phase_reset = value >= 0.5;
            }
            other => match params::split_key(other) {
                Some((op, field)) => self.apply_op_param(op, field, value),
                None => {
                    return Err(EngineError::InvalidConfig(format!(
                        "unknown FM parameter key {:#06x}",
                        other.0
                    )));
                }
            },
        }
        Ok(())
    }

    fn process(&mut self, output: &mut [Sample]) {
        let frames = output.len() / 2;
        for frame in 0..frames {
            let mut sum = 0.0;
            for voice in &mut self.voices {
                if !voice.is_idle() {
                    sum += voice.tick();
                }
            }
            // Kill denormals before they reach the mix bus
            let sample = flush_denormal(sum * self.master_level.next_sample());
            output[frame * 2] += sample;
            output[frame * 2 + 1] += sample;
        }
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_idle()).count()
    }

    fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.reset();
        }
    }

    fn release_all(&mut self) {
        for voice in &mut self.voices {
            if voice.is_held() {
                voice.note_off();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{OP_A, OP_B1, OP_B2, OP_C};
    use std::f32::consts::TAU;

    const SR: f32 = 48000.0;

    /// Machine tuned for analytic comparison: algorithm 1, sustained
    /// full-level envelopes, master at unity
    fn reference_machine() -> FmToneMachine {
        let mut machine = FmToneMachine::new(SR);
        machine.set_param(params::ALGORITHM, 1.0).unwrap();
        machine.set_param(params::MASTER_LEVEL, 1.0).unwrap();
        for op in [OP_A, OP_B1, OP_B2, OP_C] {
            machine
                .set_param(params::op_key(op, params::FIELD_RATIO), 1.0)
                .unwrap();
            machine
                .set_param(params::op_key(op, params::FIELD_MOD_INDEX), 0.0)
                .unwrap();
            machine
                .set_param(params::op_key(op, params::FIELD_ENV_ATTACK), 0.0)
                .unwrap();
            machine
                .set_param(params::op_key(op, params::FIELD_ENV_DECAY), 0.0)
                .unwrap();
            machine
                .set_param(params::op_key(op, params::FIELD_ENV_END), 1.0)
                .unwrap();
        }
        // Let the master smoother settle at unity
        let mut warmup = vec![0.0f32; 2048];
        machine.process(&mut warmup);
        machine.reset();
        machine
    }

    #[test]
    fn algorithm_one_renders_pure_tone() {
        let mut machine = reference_machine();
        machine.note_on(69, 127);

        let mut out = vec![0.0f32; 2048];
        machine.process(&mut out);

        let mut err_energy = 0.0f64;
        let mut ref_energy = 0.0f64;
        for n in 0..1024 {
            let expected = (TAU * 440.0 * n as f32 / SR).sin();
            let got = out[n * 2];
            assert_eq!(out[n * 2], out[n * 2 + 1], "stereo channels differ");
            err_energy += ((got - expected) as f64).powi(2);
            ref_energy += (expected as f64).powi(2);
        }
        assert!((err_energy / ref_energy).sqrt() < 1e-3);
    }

    #[test]
    fn process_accumulates_into_output() {
        let mut machine = reference_machine();
        machine.note_on(69, 127);

        let mut out = vec![1.0f32; 64];
        machine.process(&mut out);
        // Frame 0 is sin(0) = 0, so the pre-existing content survives
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], 1.0);
    }

    #[test]
    fn sixteen_voice_polyphony() {
        let mut machine = reference_machine();
        for note in 40..56 {
            machine.note_on(note, 100);
        }
        assert_eq!(machine.active_voices(), 16);
    }

    #[test]
    fn stealing_prefers_idle_then_releasing_then_oldest() {
        let mut machine = reference_machine();
        for note in 40..56 {
            machine.note_on(note, 100);
        }

        // Release one voice; the next note must reuse exactly that slot
        machine.note_off(43);
        let released_idx = (0..VOICE_COUNT)
            .find(|&i| machine.voice_info(i).unwrap().releasing)
            .expect("a releasing voice");

        machine.note_on(90, 100);
        let info = machine.voice_info(released_idx).unwrap();
        assert_eq!(info.note, 90, "note number changes immediately");
        assert!(info.held);
        assert!(!info.releasing);

        // All voices busy and held: the oldest (note 40) is stolen
        machine.note_on(91, 100);
        assert!(
            (0..VOICE_COUNT).all(|i| machine.voice_info(i).unwrap().note != 40),
            "oldest voice was not stolen"
        );
        assert_eq!(machine.active_voices(), 16);
    }

    #[test]
    fn stolen_voice_restarts_envelope() {
        let mut machine = reference_machine();
        // Slow attack so a restart is observable
        for op in [OP_A, OP_B1, OP_B2, OP_C] {
            machine
                .set_param(params::op_key(op, params::FIELD_ENV_ATTACK), 0.05)
                .unwrap();
        }
        for note in 40..56 {
            machine.note_on(note, 100);
        }
        let mut out = vec![0.0f32; 1024];
        machine.process(&mut out);

        machine.note_on(90, 100);
        // The stolen voice's carrier envelope is back in attack
        let stolen = (0..VOICE_COUNT)
            .find(|&i| machine.voice_info(i).unwrap().note == 90)
            .unwrap();
        assert!(machine.voice_info(stolen).unwrap().held);
    }

    #[test]
    fn note_off_releases_all_matching() {
        let mut machine = reference_machine();
        machine.note_on(60, 100);
        machine.note_on(60, 110);
        machine.note_off(60);
        assert!(
            (0..VOICE_COUNT)
                .filter_map(|i| machine.voice_info(i))
                .all(|v| !v.held)
        );
    }

    #[test]
    fn release_all_quiesces_held_voices() {
        let mut machine = reference_machine();
        machine.note_on(60, 100);
        machine.note_on(64, 100);
        machine.release_all();
        assert!(
            (0..VOICE_COUNT)
                .filter_map(|i| machine.voice_info(i))
                .all(|v| !v.held)
        );
        // Still audible during the release tail
        assert!(machine.active_voices() > 0);
    }

    #[test]
    fn rejects_unknown_param_key() {
        let mut machine = FmToneMachine::new(SR);
        assert!(machine.set_param(ParamKey(0x7fff), 1.0).is_err());
    }

    #[test]
    fn output_stays_finite_under_heavy_modulation() {
        let mut machine = FmToneMachine::new(SR);
        machine.set_param(params::ALGORITHM, 5.0).unwrap();
        for op in [OP_A, OP_B1, OP_B2, OP_C] {
            machine
                .set_param(params::op_key(op, params::FIELD_MOD_INDEX), 10.0)
                .unwrap();
            machine
                .set_param(params::op_key(op, params::FIELD_FEEDBACK), 1.0)
                .unwrap();
        }
        machine.note_on(100, 127);
        let mut out = vec![0.0f32; 4096];
        machine.process(&mut out);
        assert!(out.iter().all(|s| s.is_finite()));
    }
}
