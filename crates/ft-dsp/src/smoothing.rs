//! Parameter smoothing for zipper-free automation
//!
//! One smoother per automatable parameter. The ramp is sample-linear:
//! `set_target` recomputes `step = (target − current) / (time · rate)`
//! and `next_sample` walks toward the target, clamping on arrival.
//! Discontinuities happen only through an explicit `reset`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ft_core::Sample;

/// Default smoothing time when callers pass zero
pub const DEFAULT_SMOOTH_TIME_SECS: f32 = 0.005;

// ═══════════════════════════════════════════════════════════════════════════════
// LINEAR SMOOTHER (single thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-sample linear ramp toward a target value
#[derive(Debug, Clone)]
pub struct LinearSmoother {
    current: Sample,
    target: Sample,
    step: Sample,
    sample_rate: f32,
}

impl LinearSmoother {
    pub fn new(sample_rate: f32, initial: Sample) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            sample_rate,
        }
    }

    /// Start a ramp to `target` over `smoothing_secs`
    pub fn set_target(&mut self, target: Sample, smoothing_secs: f32) {
        self.target = target;
        let secs = if smoothing_secs > 0.0 {
            smoothing_secs
        } else {
            DEFAULT_SMOOTH_TIME_SECS
        };
        let samples = secs * self.sample_rate;
        if samples < 1.0 {
            self.current = target;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / samples;
        }
    }

    /// Jump to `value` with no ramp
    pub fn reset(&mut self, value: Sample) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
    }

    /// Advance one sample, clamped at the target
    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        if self.current != self.target {
            self.current += self.step;
            // Clamp on overshoot in either ramp direction
            if (self.step > 0.0 && self.current >= self.target)
                || (self.step < 0.0 && self.current <= self.target)
            {
                self.current = self.target;
                self.step = 0.0;
            }
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> Sample {
        self.current
    }

    #[inline]
    pub fn target(&self) -> Sample {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.current != self.target
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED SMOOTHER (writer: any thread, reader: audio thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Target + smoothing time packed in one atomic so the pair publishes
/// consistently with a single store.
#[derive(Debug, Default)]
struct TargetCell {
    packed: AtomicU64,
}

impl TargetCell {
    fn store(&self, target: f32, secs: f32) {
        let bits = ((target.to_bits() as u64) << 32) | secs.to_bits() as u64;
        self.packed.store(bits, Ordering::Release);
    }

    fn load(&self) -> (f32, f32) {
        let bits = self.packed.load(Ordering::Acquire);
        (
            f32::from_bits((bits >> 32) as u32),
            f32::from_bits(bits as u32),
        )
    }
}

/// Writer half of a cross-thread smoother
#[derive(Debug, Clone)]
pub struct SmootherHandle {
    cell: Arc<TargetCell>,
}

impl SmootherHandle {
    /// Publish a new target; wait-free, callable from any thread
    pub fn set_target(&self, target: Sample, smoothing_secs: f32) {
        self.cell.store(target, smoothing_secs);
    }

    pub fn target(&self) -> Sample {
        self.cell.load().0
    }
}

/// Audio-thread half: a linear smoother that re-reads its shared target
/// once per cycle via `refresh`
#[derive(Debug)]
pub struct SharedSmoother {
    cell: Arc<TargetCell>,
    inner: LinearSmoother,
}

impl SharedSmoother {
    pub fn new(sample_rate: f32, initial: Sample) -> (Self, SmootherHandle) {
        let cell = Arc::new(TargetCell::default());
        cell.store(initial, 0.0);
        let handle = SmootherHandle { cell: cell.clone() };
        (
            Self {
                cell,
                inner: LinearSmoother::new(sample_rate, initial),
            },
            handle,
        )
    }

    /// Pick up the latest published target. Called once per audio cycle
    /// so mid-cycle writes take effect on the next cycle.
    #[inline]
    pub fn refresh(&mut self) {
        let (target, secs) = self.cell.load();
        if target != self.inner.target() {
            self.inner.set_target(target, secs);
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        self.inner.next_sample()
    }

    #[inline]
    pub fn current(&self) -> Sample {
        self.inner.current()
    }

    pub fn reset(&mut self, value: Sample) {
        self.cell.store(value, 0.0);
        self.inner.reset(value);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.inner.set_sample_rate(sample_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE_RATE: f32 = 48000.0;

    #[test]
    fn reaches_target_in_time() {
        let mut smoother = LinearSmoother::new(SAMPLE_RATE, 0.0);
        smoother.set_target(1.0, 0.001); // 48 samples

        for _ in 0..48 {
            smoother.next_sample();
        }
        assert_relative_eq!(smoother.current(), 1.0, epsilon = 1e-4);

        // Stays clamped afterwards
        for _ in 0..100 {
            assert!(smoother.next_sample() <= 1.0);
        }
        assert_eq!(smoother.current(), 1.0);
    }

    #[test]
    fn distance_monotone_non_increasing() {
        let mut smoother = LinearSmoother::new(SAMPLE_RATE, 0.3);
        smoother.set_target(-0.7, 0.002);

        let mut prev = (smoother.current() - smoother.target()).abs();
        for _ in 0..200 {
            smoother.next_sample();
            let dist = (smoother.current() - smoother.target()).abs();
            assert!(dist <= prev + 1e-9);
            prev = dist;
        }
    }

    #[test]
    fn reset_is_discontinuous() {
        let mut smoother = LinearSmoother::new(SAMPLE_RATE, 0.0);
        smoother.set_target(1.0, 0.1);
        smoother.next_sample();
        smoother.reset(0.5);
        assert_eq!(smoother.current(), 0.5);
        assert!(!smoother.is_ramping());
    }

    #[test]
    fn zero_time_jumps() {
        let mut smoother = LinearSmoother::new(SAMPLE_RATE, 0.0);
        smoother.set_target(1.0, 0.0);
        // Falls back to the default smoothing time, not an instant jump
        assert!(smoother.is_ramping());
    }

    #[test]
    fn shared_smoother_picks_up_target_on_refresh() {
        let (mut smoother, handle) = SharedSmoother::new(SAMPLE_RATE, 0.0);

        handle.set_target(1.0, 0.001);
        // Not visible until refresh
        assert_eq!(smoother.current(), 0.0);
        assert!(!smoother.inner.is_ramping());

        smoother.refresh();
        for _ in 0..60 {
            smoother.next_sample();
        }
        assert_relative_eq!(smoother.current(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn shared_smoother_cross_thread() {
        let (mut smoother, handle) = SharedSmoother::new(SAMPLE_RATE, 0.0);

        let writer = std::thread::spawn(move || {
            handle.set_target(0.8, 0.001);
        });
        writer.join().expect("writer thread");

        smoother.refresh();
        for _ in 0..100 {
            smoother.next_sample();
        }
        assert_relative_eq!(smoother.current(), 0.8, epsilon = 1e-4);
    }
}
