//! Error recovery manager
//!
//! Classifies engine errors by severity and picks a recovery strategy.
//! Sliding-window counters per error class escalate a misbehaving
//! subsystem to an emergency stop. Never touched from the audio thread;
//! the short mutex here is control-plane only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ft_core::{EngineError, ErrorClass, ErrorSeverity};

/// What to do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Ignore,
    Retry { attempts: u32, backoff: Duration },
    RestartSubsystem,
    EmergencyStop,
}

/// Recovery tuning
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Errors of one class within the window that trip the emergency
    pub emergency_threshold: u32,
    /// Sliding window length
    pub window: Duration,
    /// Recent errors kept for reporting
    pub history: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            emergency_threshold: 10,
            window: Duration::from_secs(5),
            history: 16,
        }
    }
}

/// Aggregate recovery statistics
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub total_errors: u64,
    pub recovered: u64,
    pub success_rate: f32,
    pub last_errors: Vec<String>,
}

#[derive(Default)]
struct RecoveryInner {
    windows: HashMap<ErrorClass, VecDeque<Instant>>,
    latched: HashSet<ErrorClass>,
    total: u64,
    recovered: u64,
    history: VecDeque<String>,
}

/// The recovery manager
pub struct ErrorRecovery {
    config: RecoveryConfig,
    inner: Mutex<RecoveryInner>,
}

impl ErrorRecovery {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(RecoveryInner::default()),
        }
    }

    /// Base strategy for a severity level
    pub fn strategy_for(severity: ErrorSeverity) -> RecoveryStrategy {
        match severity {
            ErrorSeverity::Warning => RecoveryStrategy::Ignore,
            ErrorSeverity::Minor => RecoveryStrategy::Retry {
                attempts: 3,
                backoff: Duration::from_millis(10),
            },
            ErrorSeverity::Major => RecoveryStrategy::RestartSubsystem,
            ErrorSeverity::Critical => RecoveryStrategy::EmergencyStop,
        }
    }

    /// Strategy for a concrete error, accounting for latched classes
    pub fn classify(&self, error: &EngineError) -> RecoveryStrategy {
        let inner = self.inner.lock();
        if inner.latched.contains(&error.class()) {
            return RecoveryStrategy::EmergencyStop;
        }
        Self::strategy_for(error.severity())
    }

    /// Handle an error; returns whether the engine recovered
    pub fn trigger(&self, error: &EngineError) -> bool {
        let class = error.class();
        let now = Instant::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.total += 1;

        if inner.history.len() == self.config.history {
            inner.history.pop_front();
        }
        inner.history.push_back(error.to_string());

        let window = self.config.window;
        let entries = inner.windows.entry(class).or_default();
        entries.push_back(now);
        while entries
            .front()
            .is_some_and(|&t| now.duration_since(t) > window)
        {
            entries.pop_front();
        }

        if entries.len() as u32 > self.config.emergency_threshold {
            inner.latched.insert(class);
        }

        let strategy = if inner.latched.contains(&class) {
            RecoveryStrategy::EmergencyStop
        } else {
            Self::strategy_for(error.severity())
        };

        let recovered = match strategy {
            RecoveryStrategy::Ignore => true,
            RecoveryStrategy::Retry { attempts, .. } => {
                log::debug!("recovering from {error} (retry ×{attempts})");
                true
            }
            RecoveryStrategy::RestartSubsystem => {
                log::warn!("restarting subsystem after {error}");
                true
            }
            RecoveryStrategy::EmergencyStop => {
                log::error!("emergency stop on {error}");
                false
            }
        };

        if recovered {
            inner.recovered += 1;
        }
        recovered
    }

    /// Clear latched classes and windows (engine reset)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.windows.clear();
        inner.latched.clear();
    }

    pub fn stats(&self) -> RecoveryStats {
        let inner = self.inner.lock();
        RecoveryStats {
            total_errors: inner.total,
            recovered: inner.recovered,
            success_rate: if inner.total > 0 {
                inner.recovered as f32 / inner.total as f32
            } else {
                1.0
            },
            last_errors: inner.history.iter().cloned().collect(),
        }
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_follow_severity() {
        assert_eq!(
            ErrorRecovery::strategy_for(ErrorSeverity::Warning),
            RecoveryStrategy::Ignore
        );
        assert!(matches!(
            ErrorRecovery::strategy_for(ErrorSeverity::Minor),
            RecoveryStrategy::Retry { .. }
        ));
        assert_eq!(
            ErrorRecovery::strategy_for(ErrorSeverity::Major),
            RecoveryStrategy::RestartSubsystem
        );
        assert_eq!(
            ErrorRecovery::strategy_for(ErrorSeverity::Critical),
            RecoveryStrategy::EmergencyStop
        );
    }

    #[test]
    fn warnings_recover() {
        let recovery = ErrorRecovery::default();
        assert!(recovery.trigger(&EngineError::BufferUnderrun));
        let stats = recovery.stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn critical_does_not_recover() {
        let recovery = ErrorRecovery::default();
        assert!(!recovery.trigger(&EngineError::DeviceLost("usb".into())));
        assert!(recovery.stats().success_rate < 1.0);
    }

    #[test]
    fn threshold_latches_class() {
        let recovery = ErrorRecovery::new(RecoveryConfig {
            emergency_threshold: 3,
            window: Duration::from_secs(60),
            history: 8,
        });

        // Under the threshold underruns are just warnings
        for _ in 0..3 {
            assert!(recovery.trigger(&EngineError::BufferUnderrun));
        }
        // Crossing it elevates the whole class
        assert!(!recovery.trigger(&EngineError::BufferUnderrun));
        assert_eq!(
            recovery.classify(&EngineError::BufferUnderrun),
            RecoveryStrategy::EmergencyStop
        );
        // Other classes are unaffected
        assert!(recovery.trigger(&EngineError::EventQueueOverflow));
    }

    #[test]
    fn reset_unlatches() {
        let recovery = ErrorRecovery::new(RecoveryConfig {
            emergency_threshold: 1,
            window: Duration::from_secs(60),
            history: 8,
        });
        recovery.trigger(&EngineError::BufferUnderrun);
        assert!(!recovery.trigger(&EngineError::BufferUnderrun));

        recovery.reset();
        assert!(recovery.trigger(&EngineError::BufferUnderrun));
    }

    #[test]
    fn history_is_bounded() {
        let recovery = ErrorRecovery::new(RecoveryConfig {
            history: 4,
            ..Default::default()
        });
        for _ in 0..10 {
            recovery.trigger(&EngineError::BufferUnderrun);
        }
        assert_eq!(recovery.stats().last_errors.len(), 4);
    }
}
