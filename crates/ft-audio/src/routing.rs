//! Routing matrix with snapshot publication
//!
//! Maintains gain/activation/latency per connection independent of the
//! graph topology. The control plane mutates a working set and
//! publishes it into a fixed-capacity shared table guarded by a
//! sequence counter (odd while a publish is in flight). The audio
//! thread copies the table into its private snapshot once per cycle
//! with a bounded number of retries; a publish racing the copy leaves
//! the previous cycle's snapshot in place, so toggles never change
//! state mid-buffer and `clear_all` lands atomically. A bounded ring
//! records recent change events for diagnostics.
//!
//! The table capacity is `max_routing_connections`, so both sides work
//! in pre-allocated storage and the copy is a bounded memcpy of Copy
//! entries.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering, fence};

use serde::Serialize;

use ft_core::{EngineError, EngineResult};

use crate::node::NodeId;

/// Hard ceiling on any single connection gain
pub const MAX_CONNECTION_GAIN: f32 = 2.0;

/// Changes kept in the diagnostic ring
const CHANGE_RING_CAPACITY: usize = 64;

/// Copy attempts per `acquire` before keeping the previous snapshot
const ACQUIRE_RETRIES: usize = 4;

/// One matrix entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutingConnection {
    pub source: NodeId,
    pub source_port: u16,
    pub dest: NodeId,
    pub dest_port: u16,
    pub gain: f32,
    pub active: bool,
    pub latency_samples: u32,
}

impl RoutingConnection {
    /// Placeholder filling unpublished table slots
    fn vacant() -> Self {
        Self {
            source: NodeId(0),
            source_port: 0,
            dest: NodeId(0),
            dest_port: 0,
            gain: 0.0,
            active: false,
            latency_samples: 0,
        }
    }
}

/// Recorded mutation, newest last
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RoutingChange {
    Added { source: NodeId, dest: NodeId },
    Removed { source: NodeId, dest: NodeId },
    GainChanged { source: NodeId, dest: NodeId, gain: f32 },
    Toggled { source: NodeId, dest: NodeId, active: bool },
    Cleared,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED CONNECTION TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Sequence-guarded connection table shared between the matrix (sole
/// writer) and its readers. Even sequence = stable, odd = publish in
/// flight; a reader accepts a copy only when the sequence is even and
/// unchanged across the copy.
struct SharedTable {
    seq: AtomicU32,
    len: UnsafeCell<usize>,
    entries: Box<[UnsafeCell<RoutingConnection>]>,
}

// Data slots are only trusted after the sequence check; torn reads are
// discarded, never dereferenced as anything but Copy bytes.
unsafe impl Send for SharedTable {}
unsafe impl Sync for SharedTable {}

impl SharedTable {
    fn new(capacity: usize) -> Self {
        Self {
            seq: AtomicU32::new(0),
            len: UnsafeCell::new(0),
            entries: (0..capacity)
                .map(|_| UnsafeCell::new(RoutingConnection::vacant()))
                .collect(),
        }
    }
}

/// Immutable view the audio thread reads once per cycle
#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    connections: Vec<RoutingConnection>,
}

impl RoutingSnapshot {
    pub fn connections(&self) -> &[RoutingConnection] {
        &self.connections
    }

    pub fn by_source(&self, id: NodeId) -> impl Iterator<Item = &RoutingConnection> {
        self.connections.iter().filter(move |c| c.source == id)
    }

    pub fn by_destination(&self, id: NodeId) -> impl Iterator<Item = &RoutingConnection> {
        self.connections.iter().filter(move |c| c.dest == id)
    }

    pub fn active_count(&self) -> usize {
        self.connections.iter().filter(|c| c.active).count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Sum of active gains feeding a destination's input bus
    pub fn input_gain_sum(&self, dest: NodeId) -> f32 {
        self.connections
            .iter()
            .filter(|c| c.active && c.dest == dest)
            .map(|c| c.gain)
            .sum()
    }
}

/// Audio-side handle; `acquire` once per cycle
pub struct RoutingReader {
    shared: Arc<SharedTable>,
    snapshot: RoutingSnapshot,
    scratch: Vec<RoutingConnection>,
    last_seq: u32,
}

impl RoutingReader {
    fn new(shared: Arc<SharedTable>) -> Self {
        let capacity = shared.entries.len();
        Self {
            shared,
            snapshot: RoutingSnapshot {
                connections: Vec::with_capacity(capacity),
            },
            scratch: Vec::with_capacity(capacity),
            last_seq: 0,
        }
    }

    /// Refresh and return the snapshot for this cycle. Bounded work, no
    /// allocation; if every attempt races a publish, the previous
    /// cycle's snapshot stays in effect.
    pub fn acquire(&mut self) -> &RoutingSnapshot {
        for _ in 0..ACQUIRE_RETRIES {
            let begin = self.shared.seq.load(Ordering::Acquire);
            if begin & 1 == 1 {
                // Publish in flight
                std::hint::spin_loop();
                continue;
            }
            if begin == self.last_seq {
                break;
            }

            let capacity = self.shared.entries.len();
            // A torn length is clamped here and rejected by the
            // sequence check below
            let len = unsafe { std::ptr::read_volatile(self.shared.len.get()) }.min(capacity);
            self.scratch.clear();
            for slot in &self.shared.entries[..len] {
                self.scratch
                    .push(unsafe { std::ptr::read_volatile(slot.get()) });
            }

            fence(Ordering::Acquire);
            if self.shared.seq.load(Ordering::Relaxed) == begin {
                std::mem::swap(&mut self.snapshot.connections, &mut self.scratch);
                self.last_seq = begin;
                break;
            }
        }
        &self.snapshot
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTING MATRIX
// ═══════════════════════════════════════════════════════════════════════════════

/// Control-plane owner of the matrix
pub struct RoutingMatrix {
    working: Vec<RoutingConnection>,
    shared: Arc<SharedTable>,
    changes: VecDeque<RoutingChange>,
    max_connections: u32,
    max_inputs: u32,
    max_outputs: u32,
}

impl RoutingMatrix {
    pub fn new(max_connections: u32, max_inputs: u32, max_outputs: u32) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            working: Vec::with_capacity(max_connections as usize),
            shared: Arc::new(SharedTable::new(max_connections as usize)),
            changes: VecDeque::with_capacity(CHANGE_RING_CAPACITY),
            max_connections,
            max_inputs,
            max_outputs,
        }
    }

    /// Reader handle for the audio thread
    pub fn reader(&self) -> RoutingReader {
        RoutingReader::new(self.shared.clone())
    }

    pub fn add(&mut self, mut conn: RoutingConnection) -> EngineResult<()> {
        if self.working.len() as u32 >= self.max_connections {
            return Err(EngineError::RoutingFull(self.max_connections));
        }
        if self
            .working
            .iter()
            .any(|c| c.dest == conn.dest && c.dest_port == conn.dest_port)
        {
            return Err(EngineError::InputOccupied {
                node: conn.dest.0,
                port: conn.dest_port as u32,
            });
        }
        conn.gain = conn.gain.clamp(0.0, MAX_CONNECTION_GAIN);
        self.working.push(conn);
        self.record(RoutingChange::Added {
            source: conn.source,
            dest: conn.dest,
        });
        self.publish();
        Ok(())
    }

    pub fn remove(&mut self, source: NodeId, dest: NodeId) -> EngineResult<()> {
        let before = self.working.len();
        self.working
            .retain(|c| c.source != source || c.dest != dest);
        if self.working.len() == before {
            return Err(EngineError::DanglingNode(dest.0));
        }
        self.record(RoutingChange::Removed { source, dest });
        self.publish();
        Ok(())
    }

    /// Update gain, clamped to [0, 2]
    pub fn set_gain(&mut self, source: NodeId, dest: NodeId, gain: f32) -> EngineResult<()> {
        let clamped = gain.clamp(0.0, MAX_CONNECTION_GAIN);
        let conn = self
            .working
            .iter_mut()
            .find(|c| c.source == source && c.dest == dest)
            .ok_or(EngineError::DanglingNode(dest.0))?;
        conn.gain = clamped;
        self.record(RoutingChange::GainChanged {
            source,
            dest,
            gain: clamped,
        });
        self.publish();
        Ok(())
    }

    /// Toggle participation; takes effect at the next cycle boundary
    pub fn set_active(&mut self, source: NodeId, dest: NodeId, active: bool) -> EngineResult<()> {
        let conn = self
            .working
            .iter_mut()
            .find(|c| c.source == source && c.dest == dest)
            .ok_or(EngineError::DanglingNode(dest.0))?;
        conn.active = active;
        self.record(RoutingChange::Toggled {
            source,
            dest,
            active,
        });
        self.publish();
        Ok(())
    }

    /// Apply several gain updates in one published step
    pub fn set_gains(&mut self, updates: &[(NodeId, NodeId, f32)]) -> EngineResult<()> {
        for &(source, dest, gain) in updates {
            let clamped = gain.clamp(0.0, MAX_CONNECTION_GAIN);
            let conn = self
                .working
                .iter_mut()
                .find(|c| c.source == source && c.dest == dest)
                .ok_or(EngineError::DanglingNode(dest.0))?;
            conn.gain = clamped;
            self.record(RoutingChange::GainChanged {
                source,
                dest,
                gain: clamped,
            });
        }
        self.publish();
        Ok(())
    }

    /// Remove every connection in one published step
    pub fn clear_all(&mut self) {
        self.working.clear();
        self.record(RoutingChange::Cleared);
        self.publish();
    }

    /// Rescale active gains into `dest` so their sum stays at or below
    /// `max_total`
    pub fn limit_input_gain(&mut self, dest: NodeId, max_total: f32) {
        let sum: f32 = self
            .working
            .iter()
            .filter(|c| c.active && c.dest == dest)
            .map(|c| c.gain)
            .sum();
        if sum <= max_total || sum <= 0.0 {
            return;
        }
        let scale = max_total / sum;
        for conn in self
            .working
            .iter_mut()
            .filter(|c| c.active && c.dest == dest)
        {
            conn.gain *= scale;
            self.changes.push_back(RoutingChange::GainChanged {
                source: conn.source,
                dest,
                gain: conn.gain,
            });
        }
        while self.changes.len() > CHANGE_RING_CAPACITY {
            self.changes.pop_front();
        }
        self.publish();
    }

    /// Fraction of the `inputs × outputs` capacity in active use
    pub fn utilization(&self) -> f32 {
        let capacity = (self.max_inputs * self.max_outputs) as f32;
        if capacity <= 0.0 {
            return 0.0;
        }
        self.working.iter().filter(|c| c.active).count() as f32 / capacity
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.working.iter().filter(|c| c.active).count()
    }

    /// Recent mutations, oldest first
    pub fn recent_changes(&self) -> impl Iterator<Item = &RoutingChange> {
        self.changes.iter()
    }

    fn record(&mut self, change: RoutingChange) {
        if self.changes.len() == CHANGE_RING_CAPACITY {
            self.changes.pop_front();
        }
        self.changes.push_back(change);
    }

    /// Copy the working set into the shared table under an odd
    /// sequence. Sole writer: every mutator takes `&mut self`.
    fn publish(&mut self) {
        let seq = self.shared.seq.load(Ordering::Relaxed);
        self.shared.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let count = self.working.len().min(self.shared.entries.len());
        // Writes race no one: readers reject copies taken under an odd
        // or advanced sequence
        unsafe {
            for (slot, conn) in self.shared.entries.iter().zip(self.working.iter()) {
                *slot.get() = *conn;
            }
            *self.shared.len.get() = count;
        }

        self.shared.seq.store(seq.wrapping_add(2), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(src: u32, dst: u32, gain: f32) -> RoutingConnection {
        RoutingConnection {
            source: NodeId(src),
            source_port: 0,
            dest: NodeId(dst),
            dest_port: 0,
            gain,
            active: true,
            latency_samples: 0,
        }
    }

    #[test]
    fn add_publishes_snapshot() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        let mut reader = matrix.reader();

        matrix.add(conn(1, 2, 1.0)).unwrap();
        let snap = reader.acquire();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.by_source(NodeId(1)).count(), 1);
        assert_eq!(snap.by_destination(NodeId(2)).count(), 1);
    }

    #[test]
    fn gain_clamps_to_range() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        matrix.add(conn(1, 2, 5.0)).unwrap();
        let mut reader = matrix.reader();
        assert_eq!(reader.acquire().connections()[0].gain, 2.0);

        matrix.set_gain(NodeId(1), NodeId(2), -1.0).unwrap();
        assert_eq!(reader.acquire().connections()[0].gain, 0.0);
    }

    #[test]
    fn duplicate_input_rejected() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        matrix.add(conn(1, 3, 1.0)).unwrap();
        let err = matrix.add(conn(2, 3, 1.0)).unwrap_err();
        assert!(matches!(err, EngineError::InputOccupied { .. }));
    }

    #[test]
    fn capacity_enforced() {
        let mut matrix = RoutingMatrix::new(1, 16, 8);
        matrix.add(conn(1, 2, 1.0)).unwrap();
        let mut extra = conn(1, 4, 1.0);
        extra.dest_port = 1;
        assert!(matches!(
            matrix.add(extra),
            Err(EngineError::RoutingFull(1))
        ));
    }

    #[test]
    fn clear_all_is_atomic_to_reader() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        let mut reader = matrix.reader();
        for i in 0..4u32 {
            let mut c = conn(i, 10 + i, 1.0);
            c.dest_port = i as u16;
            matrix.add(c).unwrap();
        }
        assert_eq!(reader.acquire().len(), 4);

        matrix.clear_all();
        let snap = reader.acquire();
        assert!(snap.is_empty());
    }

    #[test]
    fn toggle_reflected_in_next_snapshot() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        let mut reader = matrix.reader();
        matrix.add(conn(1, 2, 1.0)).unwrap();

        matrix.set_active(NodeId(1), NodeId(2), false).unwrap();
        let snap = reader.acquire();
        assert!(!snap.connections()[0].active);
        assert_eq!(snap.active_count(), 0);
    }

    #[test]
    fn unchanged_matrix_keeps_snapshot_stable() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        matrix.add(conn(1, 2, 1.0)).unwrap();

        let mut reader = matrix.reader();
        let first: Vec<_> = reader.acquire().connections().to_vec();
        // No publishes in between: acquire skips the copy entirely
        let second: Vec<_> = reader.acquire().connections().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn input_gain_sum_limited() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        // Three 2.0-gain feeds into the same destination bus
        for i in 0..3u32 {
            let mut c = conn(i, 9, 2.0);
            c.dest_port = i as u16;
            matrix.add(c).unwrap();
        }
        let mut reader = matrix.reader();
        assert!(reader.acquire().input_gain_sum(NodeId(9)) > 2.0);

        matrix.limit_input_gain(NodeId(9), 2.0);
        let snap = reader.acquire();
        assert!(snap.input_gain_sum(NodeId(9)) <= 2.0 + 1e-6);
        // Relative balance preserved
        let gains: Vec<f32> = snap.connections().iter().map(|c| c.gain).collect();
        assert!((gains[0] - gains[1]).abs() < 1e-6);
        assert!((gains[1] - gains[2]).abs() < 1e-6);
    }

    #[test]
    fn change_ring_records_history() {
        let mut matrix = RoutingMatrix::new(128, 16, 8);
        matrix.add(conn(1, 2, 1.0)).unwrap();
        matrix.set_gain(NodeId(1), NodeId(2), 0.5).unwrap();
        matrix.clear_all();

        let changes: Vec<_> = matrix.recent_changes().collect();
        assert_eq!(changes.len(), 3);
        assert!(matches!(changes[0], RoutingChange::Added { .. }));
        assert!(matches!(changes[2], RoutingChange::Cleared));
    }

    #[test]
    fn utilization_metric() {
        let mut matrix = RoutingMatrix::new(128, 4, 4);
        matrix.add(conn(1, 2, 1.0)).unwrap();
        let mut c = conn(1, 3, 1.0);
        c.dest_port = 1;
        matrix.add(c).unwrap();
        assert!((matrix.utilization() - 2.0 / 16.0).abs() < 1e-6);
    }

    #[test]
    fn reader_never_observes_torn_tables() {
        use std::sync::atomic::AtomicBool;

        // The writer republishes generations where every entry carries
        // the generation number as its gain; a torn copy would mix
        // generations inside one snapshot.
        let mut matrix = RoutingMatrix::new(32, 16, 8);
        for i in 0..8u32 {
            let mut c = conn(i, 20 + i, 0.0);
            c.dest_port = i as u16;
            matrix.add(c).unwrap();
        }
        let mut reader = matrix.reader();
        let done = Arc::new(AtomicBool::new(false));
        let writer_done = done.clone();

        let writer = std::thread::spawn(move || {
            for generation in 1..400u32 {
                let gain = (generation % 3) as f32 * 0.5;
                let updates: Vec<_> = (0..8u32)
                    .map(|i| (NodeId(i), NodeId(20 + i), gain))
                    .collect();
                // One publish per generation: every published table has
                // uniform gains
                matrix.set_gains(&updates).unwrap();
            }
            writer_done.store(true, Ordering::Release);
        });

        while !done.load(Ordering::Acquire) {
            let snap = reader.acquire();
            let gains: Vec<f32> = snap.connections().iter().map(|c| c.gain).collect();
            if let Some(&first) = gains.first() {
                assert!(
                    gains.iter().all(|&g| g == first),
                    "torn snapshot: {gains:?}"
                );
            }
        }
        writer.join().expect("writer thread");
    }
}
