//! Parameter specifications and scaling
//!
//! UI surfaces talk in normalized values (0..1); voice machines and DSP
//! code talk in native units. `ParamSpec` owns the mapping between the
//! two, including the response curve.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Numeric parameter key used on the wire and in machine dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey(pub u16);

/// Response curve for normalized → native mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamCurve {
    Linear,
    /// Power curve, `u.powf(k)` before ranging
    Exponential(f32),
    /// Log interpolation between min and max (requires min > 0)
    Logarithmic,
    /// Quantized to `n` evenly spaced steps
    Discrete(u32),
}

/// Static description of one automatable parameter
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub curve: ParamCurve,
    pub unit: &'static str,
}

impl ParamSpec {
    pub const fn linear(min: f32, max: f32, default: f32, unit: &'static str) -> Self {
        Self {
            min,
            max,
            default,
            curve: ParamCurve::Linear,
            unit,
        }
    }

    pub const fn exponential(min: f32, max: f32, default: f32, k: f32, unit: &'static str) -> Self {
        Self {
            min,
            max,
            default,
            curve: ParamCurve::Exponential(k),
            unit,
        }
    }

    pub const fn logarithmic(min: f32, max: f32, default: f32, unit: &'static str) -> Self {
        Self {
            min,
            max,
            default,
            curve: ParamCurve::Logarithmic,
            unit,
        }
    }

    pub const fn discrete(min: f32, max: f32, default: f32, steps: u32, unit: &'static str) -> Self {
        Self {
            min,
            max,
            default,
            curve: ParamCurve::Discrete(steps),
            unit,
        }
    }

    /// Map a normalized value to the native range, clamped into [min, max]
    pub fn scale(&self, normalized: f32) -> f32 {
        let u = normalized.clamp(0.0, 1.0);
        let native = match self.curve {
            ParamCurve::Linear => self.min + u * (self.max - self.min),
            ParamCurve::Exponential(k) => self.min + u.powf(k) * (self.max - self.min),
            ParamCurve::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (log_min + u * (log_max - log_min)).exp()
            }
            ParamCurve::Discrete(steps) => {
                if steps < 2 {
                    self.min
                } else {
                    let step = (u * (steps - 1) as f32).round();
                    self.min + step * (self.max - self.min) / (steps - 1) as f32
                }
            }
        };
        native.clamp(self.min, self.max)
    }

    /// Map a native value back to normalized 0..1
    pub fn normalize(&self, native: f32) -> f32 {
        let n = native.clamp(self.min, self.max);
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        match self.curve {
            ParamCurve::Linear => (n - self.min) / span,
            ParamCurve::Exponential(k) => ((n - self.min) / span).powf(1.0 / k),
            ParamCurve::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (n.ln() - log_min) / (log_max - log_min)
            }
            ParamCurve::Discrete(steps) => {
                if steps < 2 {
                    0.0
                } else {
                    let step = ((n - self.min) / span * (steps - 1) as f32).round();
                    step / (steps - 1) as f32
                }
            }
        }
    }

    /// Default value in normalized form
    pub fn default_normalized(&self) -> f32 {
        self.normalize(self.default)
    }
}

/// f32 parameter cell readable/writable from any thread without locking
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl std::fmt::Debug for AtomicF32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AtomicF32({})", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_round_trip() {
        let spec = ParamSpec::linear(-24.0, 24.0, 0.0, "dB");
        for i in 0..=100 {
            let u = i as f32 / 100.0;
            assert_relative_eq!(spec.normalize(spec.scale(u)), u, epsilon = 1e-6);
        }
    }

    #[test]
    fn exponential_round_trip() {
        let spec = ParamSpec::exponential(0.0, 10.0, 1.0, 2.0, "");
        for i in 0..=100 {
            let u = i as f32 / 100.0;
            assert_relative_eq!(spec.normalize(spec.scale(u)), u, epsilon = 1e-5);
        }
    }

    #[test]
    fn logarithmic_round_trip() {
        let spec = ParamSpec::logarithmic(20.0, 20000.0, 440.0, "Hz");
        for i in 0..=100 {
            let u = i as f32 / 100.0;
            assert_relative_eq!(spec.normalize(spec.scale(u)), u, epsilon = 1e-5);
        }
    }

    #[test]
    fn discrete_quantizes() {
        let spec = ParamSpec::discrete(1.0, 8.0, 1.0, 8, "");
        assert_eq!(spec.scale(0.0), 1.0);
        assert_eq!(spec.scale(1.0), 8.0);
        // Round trip lands on the quantized grid point
        let u = 0.4;
        let q = spec.normalize(spec.scale(u));
        assert_relative_eq!(spec.scale(q), spec.scale(u), epsilon = 1e-6);
    }

    #[test]
    fn scale_clamps() {
        let spec = ParamSpec::linear(0.0, 1.0, 0.5, "");
        assert_eq!(spec.scale(-1.0), 0.0);
        assert_eq!(spec.scale(2.0), 1.0);
    }

    #[test]
    fn atomic_f32() {
        let cell = AtomicF32::new(0.25);
        assert_eq!(cell.get(), 0.25);
        cell.set(-1.5);
        assert_eq!(cell.get(), -1.5);
    }
}
