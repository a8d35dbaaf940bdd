//! ADSR envelope generator
//!
//! State machine: idle → attack → decay → sustain → release → idle.
//! Segments ramp linearly in amplitude or in decibels per
//! configuration; "end level" is the post-decay plateau. Retrigger and
//! phase behavior is decided by the voice at note-on.

use ft_core::Sample;

/// Floor used for decibel-domain ramps
const DB_FLOOR: f32 = -80.0;

/// Envelope stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Whether segments ramp linearly in amplitude or in dB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentCurve {
    #[default]
    Amplitude,
    Decibel,
}

/// Behavior when a note retriggers a sounding envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetriggerMode {
    /// Restart the attack from zero
    #[default]
    Hard,
    /// Attack continues from the current level
    Legato,
}

/// Envelope timing and shape
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeConfig {
    pub attack_secs: f32,
    pub decay_secs: f32,
    /// Post-decay plateau (sustain level)
    pub end_level: f32,
    pub release_secs: f32,
    pub curve: SegmentCurve,
    pub retrigger: RetriggerMode,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack_secs: 0.001,
            decay_secs: 0.1,
            end_level: 0.8,
            release_secs: 0.15,
            curve: SegmentCurve::Amplitude,
            retrigger: RetriggerMode::Hard,
        }
    }
}

/// Per-operator ADSR
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    config: EnvelopeConfig,
    stage: EnvelopeStage,
    /// Current amplitude in [0, 1]
    level: Sample,
    sample_rate: f32,
    /// Per-sample increment for the active segment
    step: f32,
}

impl AdsrEnvelope {
    pub fn new(sample_rate: f32, config: EnvelopeConfig) -> Self {
        Self {
            config,
            stage: EnvelopeStage::Idle,
            level: 0.0,
            sample_rate,
            step: 0.0,
        }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EnvelopeConfig) {
        self.config = config;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    #[inline]
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.stage == EnvelopeStage::Release
    }

    #[inline]
    pub fn level(&self) -> Sample {
        self.level
    }

    /// Start the attack segment
    pub fn trigger(&mut self) {
        if self.config.retrigger == RetriggerMode::Hard {
            self.level = 0.0;
        }
        self.stage = EnvelopeStage::Attack;
        self.step = self.segment_step(1.0, self.config.attack_secs);
    }

    /// Move to the release segment from wherever we are
    pub fn release(&mut self) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        self.stage = EnvelopeStage::Release;
        self.step = self.segment_step(0.0, self.config.release_secs);
    }

    /// Hard reset to idle
    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
        self.step = 0.0;
    }

    /// Per-sample increment toward `target` over `secs`
    fn segment_step(&self, target: f32, secs: f32) -> f32 {
        let samples = secs * self.sample_rate;
        if samples < 1.0 {
            return target - self.level;
        }
        match self.config.curve {
            SegmentCurve::Amplitude => (target - self.level) / samples,
            SegmentCurve::Decibel => {
                let from_db = amp_to_db(self.level);
                let to_db = amp_to_db(target);
                (to_db - from_db) / samples
            }
        }
    }

    /// Advance one sample
    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        match self.stage {
            EnvelopeStage::Idle => 0.0,
            EnvelopeStage::Attack => {
                self.advance_toward(1.0);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                    self.step = self.segment_step(self.config.end_level, self.config.decay_secs);
                    // Zero-length decay lands on the plateau immediately
                    if self.config.decay_secs * self.sample_rate < 1.0 {
                        self.level = self.config.end_level;
                        self.stage = EnvelopeStage::Sustain;
                    }
                }
                self.level
            }
            EnvelopeStage::Decay => {
                self.advance_toward(self.config.end_level);
                if self.level <= self.config.end_level {
                    self.level = self.config.end_level;
                    self.stage = EnvelopeStage::Sustain;
                }
                self.level
            }
            EnvelopeStage::Sustain => self.level,
            EnvelopeStage::Release => {
                self.advance_toward(0.0);
                if self.level <= 1e-5 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
                self.level
            }
        }
    }

    #[inline]
    fn advance_toward(&mut self, target: f32) {
        match self.config.curve {
            SegmentCurve::Amplitude => {
                self.level += self.step;
            }
            SegmentCurve::Decibel => {
                let db = (amp_to_db(self.level) + self.step).clamp(DB_FLOOR, 0.0);
                self.level = db_to_amp(db);
                // dB ramps asymptote; snap once within a tenth of a dB
                if (amp_to_db(self.level) - amp_to_db(target)).abs() < 0.1 {
                    self.level = target;
                }
            }
        }
        self.level = self.level.clamp(0.0, 1.0);
    }
}

#[inline]
fn amp_to_db(amp: f32) -> f32 {
    if amp <= 1e-4 {
        DB_FLOOR
    } else {
        20.0 * amp.log10()
    }
}

#[inline]
fn db_to_amp(db: f32) -> f32 {
    if db <= DB_FLOOR {
        0.0
    } else {
        10.0_f32.powf(db / 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f32 = 48000.0;

    fn env(attack: f32, decay: f32, end: f32, release: f32) -> AdsrEnvelope {
        AdsrEnvelope::new(
            SR,
            EnvelopeConfig {
                attack_secs: attack,
                decay_secs: decay,
                end_level: end,
                release_secs: release,
                ..Default::default()
            },
        )
    }

    #[test]
    fn full_cycle() {
        let mut e = env(0.01, 0.01, 0.5, 0.01);
        assert!(e.is_idle());

        e.trigger();
        assert_eq!(e.stage(), EnvelopeStage::Attack);

        // Attack: 480 samples to peak
        for _ in 0..480 {
            e.next_sample();
        }
        assert!(matches!(
            e.stage(),
            EnvelopeStage::Decay | EnvelopeStage::Sustain
        ));

        // Decay: 480 samples to the plateau
        for _ in 0..500 {
            e.next_sample();
        }
        assert_eq!(e.stage(), EnvelopeStage::Sustain);
        assert_relative_eq!(e.level(), 0.5, epsilon = 1e-3);

        // Sustain holds
        for _ in 0..1000 {
            assert_relative_eq!(e.next_sample(), 0.5, epsilon = 1e-3);
        }

        e.release();
        for _ in 0..500 {
            e.next_sample();
        }
        assert!(e.is_idle());
        assert_eq!(e.next_sample(), 0.0);
    }

    #[test]
    fn returns_to_idle_after_release_time() {
        let release_secs = 0.05;
        let mut e = env(0.001, 0.01, 0.7, release_secs);
        e.trigger();
        for _ in 0..2000 {
            e.next_sample();
        }

        e.release();
        let release_samples = (release_secs * SR) as usize + 8;
        for _ in 0..release_samples {
            e.next_sample();
        }
        assert!(e.is_idle());
    }

    #[test]
    fn zero_attack_is_instant() {
        let mut e = env(0.0, 0.0, 1.0, 0.1);
        e.trigger();
        assert_eq!(e.next_sample(), 1.0);
        assert_eq!(e.stage(), EnvelopeStage::Sustain);
    }

    #[test]
    fn hard_retrigger_restarts_from_zero() {
        let mut e = env(0.01, 0.01, 0.8, 0.1);
        e.trigger();
        for _ in 0..2000 {
            e.next_sample();
        }
        assert!(e.level() > 0.5);

        e.trigger();
        assert_eq!(e.level(), 0.0);
        assert_eq!(e.stage(), EnvelopeStage::Attack);
    }

    #[test]
    fn legato_retrigger_keeps_level() {
        let mut e = AdsrEnvelope::new(
            SR,
            EnvelopeConfig {
                attack_secs: 0.01,
                retrigger: RetriggerMode::Legato,
                ..Default::default()
            },
        );
        e.trigger();
        for _ in 0..200 {
            e.next_sample();
        }
        let level = e.level();
        assert!(level > 0.0);

        e.trigger();
        assert_eq!(e.level(), level);
    }

    #[test]
    fn decibel_curve_reaches_targets() {
        let mut e = AdsrEnvelope::new(
            SR,
            EnvelopeConfig {
                attack_secs: 0.005,
                decay_secs: 0.02,
                end_level: 0.5,
                release_secs: 0.02,
                curve: SegmentCurve::Decibel,
                retrigger: RetriggerMode::Hard,
            },
        );
        e.trigger();
        for _ in 0..4000 {
            e.next_sample();
        }
        assert_eq!(e.stage(), EnvelopeStage::Sustain);
        assert_relative_eq!(e.level(), 0.5, epsilon = 0.02);

        e.release();
        for _ in 0..4000 {
            e.next_sample();
        }
        assert!(e.is_idle());
    }

    #[test]
    fn release_from_idle_is_a_no_op() {
        let mut e = env(0.01, 0.01, 0.8, 0.1);
        e.release();
        assert!(e.is_idle());
    }
}
