//! Engine performance metrics
//!
//! All counters are atomics so the audio thread publishes without
//! locking and the UI polls a consistent-enough snapshot. Cache-line
//! padding keeps the hot counters off each other's lines.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Smoothing factor for the rolling cycle-time average
const CYCLE_EMA_ALPHA: f32 = 0.05;

/// Lock-free metrics block shared between the audio thread and UI
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct EngineMetrics {
    /// CPU usage in [0, 1] as f32 bits
    cpu_usage: AtomicU32,
    /// Rolling average cycle time in µs as f32 bits
    avg_cycle_time_us: AtomicU32,
    deadline_misses: AtomicU64,
    underruns: AtomicU64,
    cycles: AtomicU64,
    pool_total: AtomicU64,
    pool_allocated: AtomicU64,
    ring_usage: AtomicU64,
    routing_active: AtomicU64,
    routing_total: AtomicU64,
    event_queue_depth: AtomicU64,
    event_overflows: AtomicU64,
}

/// Point-in-time copy for reporting
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub cpu_usage: f32,
    pub avg_cycle_time_us: f32,
    pub deadline_misses: u64,
    pub underruns: u64,
    pub cycles: u64,
    pub buffer_pool_total: u64,
    pub buffer_pool_allocated: u64,
    pub ring_usage: u64,
    pub routing_connections_active: u64,
    pub routing_connections_total: u64,
    pub event_queue_depth: u64,
    pub event_overflows: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed cycle. `budget_us` is the real-time window
    /// the buffer represents.
    pub fn record_cycle(&self, elapsed_us: f32, budget_us: f32) {
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let usage = if budget_us > 0.0 {
            (elapsed_us / budget_us).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.cpu_usage.store(usage.to_bits(), Ordering::Relaxed);

        let prev = f32::from_bits(self.avg_cycle_time_us.load(Ordering::Relaxed));
        let avg = if prev == 0.0 {
            elapsed_us
        } else {
            prev + CYCLE_EMA_ALPHA * (elapsed_us - prev)
        };
        self.avg_cycle_time_us.store(avg.to_bits(), Ordering::Relaxed);

        if elapsed_us > budget_us {
            self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pool(&self, total: u64, allocated: u64) {
        self.pool_total.store(total, Ordering::Relaxed);
        self.pool_allocated.store(allocated, Ordering::Relaxed);
    }

    pub fn set_ring_usage(&self, used: u64) {
        self.ring_usage.store(used, Ordering::Relaxed);
    }

    pub fn set_routing(&self, active: u64, total: u64) {
        self.routing_active.store(active, Ordering::Relaxed);
        self.routing_total.store(total, Ordering::Relaxed);
    }

    pub fn set_event_queue(&self, depth: u64, overflows: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
        self.event_overflows.store(overflows, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cpu_usage: f32::from_bits(self.cpu_usage.load(Ordering::Relaxed)),
            avg_cycle_time_us: f32::from_bits(self.avg_cycle_time_us.load(Ordering::Relaxed)),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            buffer_pool_total: self.pool_total.load(Ordering::Relaxed),
            buffer_pool_allocated: self.pool_allocated.load(Ordering::Relaxed),
            ring_usage: self.ring_usage.load(Ordering::Relaxed),
            routing_connections_active: self.routing_active.load(Ordering::Relaxed),
            routing_connections_total: self.routing_total.load(Ordering::Relaxed),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
            event_overflows: self.event_overflows.load(Ordering::Relaxed),
        }
    }
}
