//! Bounded prioritized event queue (sequencer → audio)
//!
//! Producers push through a bounded channel and never block; `try_send`
//! failures count as overflow. The audio side drains the inbox into a
//! pre-allocated binary heap keyed by the schedule order and pops
//! everything due up to the cycle end. When the heap is at capacity the
//! lowest-priority oldest event is evicted ("drop oldest low-priority,
//! never block"). `dequeue_upto` performs no allocation: the heap was
//! sized at construction and results go into a caller-owned scratch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::event::{EventPayload, PrioritizedEvent};

/// Producer handle, cloneable across threads
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PrioritizedEvent>,
    seq: Arc<AtomicU64>,
    overflow: Arc<AtomicU64>,
}

impl EventSender {
    /// Enqueue with the payload's default priority
    pub fn send(&self, payload: EventPayload, timestamp: u64) -> bool {
        self.send_event(PrioritizedEvent::new(payload, timestamp))
    }

    /// Enqueue a fully specified event; never blocks
    pub fn send_event(&self, mut event: PrioritizedEvent) -> bool {
        event.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Events dropped so far (inbox full or heap eviction)
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

/// Audio-side queue: owns the scheduling heap
pub struct EventQueue {
    rx: Receiver<PrioritizedEvent>,
    heap: BinaryHeap<Reverse<PrioritizedEvent>>,
    capacity: usize,
    seq: Arc<AtomicU64>,
    overflow: Arc<AtomicU64>,
    tx: Sender<PrioritizedEvent>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Inbox sized above the heap so the drop decision happens where
        // ordering is known
        let (tx, rx) = bounded(capacity * 2);
        Self {
            rx,
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
            seq: Arc::new(AtomicU64::new(0)),
            overflow: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    /// Producer handle for other threads
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
            seq: self.seq.clone(),
            overflow: self.overflow.clone(),
        }
    }

    /// Enqueue from the owning thread
    pub fn enqueue(&self, payload: EventPayload, timestamp: u64) -> bool {
        self.sender().send(payload, timestamp)
    }

    /// Pull every event with `timestamp ≤ upto` into `out`, in
    /// (timestamp asc, priority desc, seq asc) order. Returns the count
    /// delivered. Audio-thread safe: no allocation, bounded work.
    pub fn dequeue_upto(&mut self, upto: u64, out: &mut Vec<PrioritizedEvent>) -> usize {
        self.ingest();

        let mut delivered = 0;
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.timestamp > upto {
                break;
            }
            if let Some(Reverse(event)) = self.heap.pop() {
                out.push(event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Move inbox arrivals onto the heap, evicting when full
    fn ingest(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if self.heap.len() >= self.capacity {
                self.evict_for(event);
            } else {
                self.heap.push(Reverse(event));
            }
        }
    }

    /// Make room for `incoming` by dropping the lowest-priority oldest
    /// event; the incoming event itself loses if nothing ranks below it
    fn evict_for(&mut self, incoming: PrioritizedEvent) {
        let worst = self
            .heap
            .iter()
            .map(|Reverse(e)| e)
            .min_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)))
            .copied();

        match worst {
            Some(worst)
                if worst.priority < incoming.priority
                    || (worst.priority == incoming.priority && worst.seq < incoming.seq) =>
            {
                self.heap.retain(|Reverse(e)| e.seq != worst.seq);
                self.heap.push(Reverse(incoming));
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                // Incoming ranks at the bottom: drop it
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events currently scheduled (excluding undrained inbox arrivals)
    pub fn depth(&self) -> usize {
        self.heap.len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Drop everything, both inbox and heap
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.heap.clear();
    }
}
