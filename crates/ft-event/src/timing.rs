//! Timing synchronizer
//!
//! Converts tempo into a sample-accurate step clock. The audio thread
//! calls `process_buffer` once per cycle; step boundaries that fall
//! inside the buffer fire a callback with their in-buffer offset so
//! voice machines can sample-align.
//!
//! Swing shifts every odd-indexed step by `swing · samples_per_step`,
//! at whatever step grid is configured.

use serde::{Deserialize, Serialize};

/// Operative BPM bounds; setters saturate into this range
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 200.0;

/// Swing bounds as a fraction of one step
pub const MAX_SWING: f64 = 0.5;

/// Time signature (numerator / denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Beat length relative to a quarter note (4/4 → 1.0, x/8 → 0.5)
    #[inline]
    pub fn beat_scale(&self) -> f64 {
        4.0 / self.denominator as f64
    }
}

/// Transport state machine: Stopped → Playing → Paused → Playing | Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Derived timing values, recomputed on every tempo-affecting change
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingState {
    pub sample_rate: f64,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub steps_per_beat: u32,
    pub samples_per_beat: f64,
    pub samples_per_step: f64,
    pub current_sample_time: u64,
    pub current_step: u64,
    /// Fraction of a step applied to odd-indexed steps, in [-0.5, 0.5]
    pub swing: f64,
}

/// A step boundary crossed inside a processed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEvent {
    /// Monotone step counter since transport start
    pub step: u64,
    /// Offset of the boundary inside the buffer, in [0, frames)
    pub sample_offset: u32,
}

/// The engine's step clock
pub struct TimingSynchronizer {
    state: TimingState,
    transport: TransportState,
}

impl TimingSynchronizer {
    pub fn new(sample_rate: f64, bpm: f64) -> Self {
        let mut state = TimingState {
            sample_rate,
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
            time_signature: TimeSignature::default(),
            steps_per_beat: 4,
            samples_per_beat: 0.0,
            samples_per_step: 0.0,
            current_sample_time: 0,
            current_step: 0,
            swing: 0.0,
        };
        Self::recompute(&mut state);
        Self {
            state,
            transport: TransportState::Stopped,
        }
    }

    fn recompute(state: &mut TimingState) {
        state.samples_per_beat =
            (60.0 / state.bpm) * state.sample_rate * state.time_signature.beat_scale();
        state.samples_per_step = state.samples_per_beat / state.steps_per_beat as f64;
    }

    // ── Control plane ───────────────────────────────────────────────

    /// Set tempo, saturating into [20, 200] BPM
    pub fn set_bpm(&mut self, bpm: f64) {
        self.state.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        Self::recompute(&mut self.state);
    }

    /// Set swing, clamped to ±50% of a step
    pub fn set_swing(&mut self, swing: f64) {
        self.state.swing = swing.clamp(-MAX_SWING, MAX_SWING);
    }

    pub fn set_steps_per_beat(&mut self, steps: u32) {
        self.state.steps_per_beat = steps.max(1);
        Self::recompute(&mut self.state);
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        self.state.time_signature = signature;
        Self::recompute(&mut self.state);
    }

    pub fn play(&mut self) {
        self.transport = TransportState::Playing;
    }

    /// Pause holds the position; `play` resumes from it
    pub fn pause(&mut self) {
        if self.transport == TransportState::Playing {
            self.transport = TransportState::Paused;
        }
    }

    /// Stop rewinds the clock
    pub fn stop(&mut self) {
        self.transport = TransportState::Stopped;
        self.state.current_sample_time = 0;
        self.state.current_step = 0;
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn state(&self) -> &TimingState {
        &self.state
    }

    // ── Audio thread ────────────────────────────────────────────────

    /// Advance the clock by one buffer, firing `on_step` for every step
    /// boundary inside it. Returns the samples advanced (zero unless
    /// playing).
    pub fn process_buffer<F>(&mut self, frames: usize, mut on_step: F) -> u64
    where
        F: FnMut(StepEvent),
    {
        if self.transport != TransportState::Playing {
            return 0;
        }

        let start = self.state.current_sample_time;
        let end = start + frames as u64;

        loop {
            let step = self.state.current_step;
            let time = self.step_time(step);
            if time >= end as f64 {
                break;
            }
            if time >= start as f64 {
                on_step(StepEvent {
                    step,
                    sample_offset: (time - start as f64) as u32,
                });
            }
            self.state.current_step += 1;
        }

        self.state.current_sample_time = end;
        frames as u64
    }

    /// Nominal sample time of a step, including the swing offset on
    /// odd-indexed steps
    #[inline]
    fn step_time(&self, step: u64) -> f64 {
        let nominal = step as f64 * self.state.samples_per_step;
        if step % 2 == 1 {
            nominal + self.state.swing * self.state.samples_per_step
        } else {
            nominal
        }
    }
}
