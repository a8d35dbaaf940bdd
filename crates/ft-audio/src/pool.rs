//! Fixed-shape audio buffer pool
//!
//! A lock-free Treiber stack of pre-zeroed buffers with identical
//! `frames × channels × sample_rate` shape. The stack head packs a
//! 32-bit generation tag next to the slot index so pop/push CAS
//! sequences cannot ABA. Retries are bounded: a contended release
//! parks the buffer in a per-thread free list that the next acquire
//! on that thread drains first; a contended (or empty) acquire falls
//! through to a fresh allocation and raises the high-water mark. A
//! mutex guards only that growth path, never the stack.

use std::cell::{RefCell, UnsafeCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use ft_core::{EngineError, EngineResult, SUPPORTED_CHANNEL_COUNTS, Sample};

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Interleaved float buffer tagged with its format
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<Sample>,
    frames: usize,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(frames: usize, channels: u16, sample_rate: u32) -> EngineResult<Self> {
        if !SUPPORTED_CHANNEL_COUNTS.contains(&channels) {
            return Err(EngineError::UnsupportedFormat(format!(
                "{channels} channels"
            )));
        }
        Ok(Self {
            data: vec![0.0; frames * channels as usize],
            frames,
            channels,
            sample_rate,
        })
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.data
    }

    /// Zero all samples
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL INTERNALS
// ═══════════════════════════════════════════════════════════════════════════════

const NIL: u32 = u32::MAX;
const MAX_CAS_RETRIES: usize = 16;
const LOCAL_FREE_LIMIT: usize = 4;

struct Slot {
    next: AtomicU32,
    buf: UnsafeCell<Option<AudioBuffer>>,
}

// Slot contents are only touched by the thread that owns the slot via
// the stack discipline (popped index or parked thread-local entry).
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

struct PoolInner {
    slots: Box<[Slot]>,
    /// Packed (tag << 32) | slot index; NIL index = empty stack
    head: AtomicU64,
    frames: usize,
    channels: u16,
    sample_rate: u32,
    in_use: AtomicUsize,
    /// Guards high-water growth only; the acquire/release fast path
    /// never takes it
    growth: Mutex<GrowthStats>,
}

#[derive(Debug, Default, Clone, Copy)]
struct GrowthStats {
    overflow_allocs: usize,
}

#[inline]
fn pack(tag: u32, idx: u32) -> u64 {
    ((tag as u64) << 32) | idx as u64
}

#[inline]
fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

thread_local! {
    /// Buffers parked here when the release CAS stayed contended;
    /// entries keep their slot binding: (pool id, slot, buffer)
    static LOCAL_FREE: RefCell<Vec<(usize, u32, AudioBuffer)>> = const { RefCell::new(Vec::new()) };
}

impl PoolInner {
    fn fresh_buffer(&self) -> AudioBuffer {
        AudioBuffer {
            data: vec![0.0; self.frames * self.channels as usize],
            frames: self.frames,
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Pop a slot from the free stack; None when empty or contended out
    fn pop(&self) -> Option<(u32, AudioBuffer)> {
        for _ in 0..MAX_CAS_RETRIES {
            let head = self.head.load(Ordering::Acquire);
            let (tag, idx) = unpack(head);
            if idx == NIL {
                return None;
            }
            let next = self.slots[idx as usize].next.load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange_weak(
                    head,
                    pack(tag.wrapping_add(1), next),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // SAFETY: the successful CAS transferred slot ownership
                let taken = unsafe { (*self.slots[idx as usize].buf.get()).take() };
                let buf = taken.unwrap_or_else(|| self.fresh_buffer());
                return Some((idx, buf));
            }
        }
        None
    }

    /// Push a buffer back into its slot; hands the buffer back on
    /// sustained contention
    fn push(&self, slot: u32, buf: AudioBuffer) -> Result<(), AudioBuffer> {
        // SAFETY: the caller owns `slot` until the CAS below succeeds
        unsafe {
            *self.slots[slot as usize].buf.get() = Some(buf);
        }
        for _ in 0..MAX_CAS_RETRIES {
            let head = self.head.load(Ordering::Acquire);
            let (tag, idx) = unpack(head);
            self.slots[slot as usize].next.store(idx, Ordering::Relaxed);
            if self
                .head
                .compare_exchange_weak(
                    head,
                    pack(tag.wrapping_add(1), slot),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
        // SAFETY: CAS never succeeded, the slot is still ours
        let buf = unsafe { (*self.slots[slot as usize].buf.get()).take() };
        Err(buf.unwrap_or_else(|| self.fresh_buffer()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Pre-allocated slot count
    pub capacity: usize,
    /// Buffers currently handed out
    pub in_use: usize,
    /// Peak live buffer count (capacity + overflow allocations)
    pub high_water: usize,
}

/// Shared handle to a buffer pool
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        frames: usize,
        channels: u16,
        sample_rate: u32,
    ) -> EngineResult<Self> {
        // Validates the shape once; slots reuse it
        let template = AudioBuffer::new(frames, channels, sample_rate)?;
        let capacity = capacity.max(1);

        let slots: Box<[Slot]> = (0..capacity)
            .map(|i| Slot {
                next: AtomicU32::new(if i + 1 < capacity { i as u32 + 1 } else { NIL }),
                buf: UnsafeCell::new(Some(template.clone())),
            })
            .collect();

        Ok(Self {
            inner: Arc::new(PoolInner {
                slots,
                head: AtomicU64::new(pack(0, 0)),
                frames,
                channels,
                sample_rate,
                in_use: AtomicUsize::new(0),
                growth: Mutex::new(GrowthStats::default()),
            }),
        })
    }

    /// Take a zeroed buffer. Never blocks: an empty (or contended-out)
    /// stack falls through to a fresh allocation.
    pub fn acquire(&self) -> PooledBuffer {
        let pool_id = Arc::as_ptr(&self.inner) as usize;

        // Thread-local buffers parked by contended releases go first
        let local = LOCAL_FREE.with(|list| {
            let mut list = list.borrow_mut();
            list.iter()
                .position(|(id, _, _)| *id == pool_id)
                .map(|at| list.swap_remove(at))
        });
        if let Some((_, slot, mut buf)) = local {
            buf.clear();
            self.inner.in_use.fetch_add(1, Ordering::Relaxed);
            return PooledBuffer {
                buf: Some(buf),
                slot,
                pool: self.inner.clone(),
            };
        }

        if let Some((slot, mut buf)) = self.inner.pop() {
            buf.clear();
            self.inner.in_use.fetch_add(1, Ordering::Relaxed);
            return PooledBuffer {
                buf: Some(buf),
                slot,
                pool: self.inner.clone(),
            };
        }

        // Pool exhausted: allocate and raise the high-water mark
        {
            let mut growth = self.inner.growth.lock();
            growth.overflow_allocs += 1;
        }
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf: Some(self.inner.fresh_buffer()),
            slot: NIL,
            pool: self.inner.clone(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let capacity = self.inner.slots.len();
        let overflow = self.inner.growth.lock().overflow_allocs;
        PoolStats {
            capacity,
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            high_water: capacity + overflow,
        }
    }

    pub fn frames(&self) -> usize {
        self.inner.frames
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }
}

/// RAII buffer handle; returns to the pool on drop
pub struct PooledBuffer {
    buf: Option<AudioBuffer>,
    slot: u32,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = AudioBuffer;

    fn deref(&self) -> &Self::Target {
        // Present from construction until drop
        self.buf.as_ref().expect("buffer taken")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer taken")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(buf) = self.buf.take() else {
            return;
        };
        self.pool.in_use.fetch_sub(1, Ordering::Relaxed);

        if self.slot == NIL {
            // Overflow allocation, not tracked by a slot
            return;
        }

        if let Err(buf) = self.pool.push(self.slot, buf) {
            // Contended out: park locally for the next acquire here
            let pool_id = Arc::as_ptr(&self.pool) as usize;
            let slot = self.slot;
            LOCAL_FREE.with(|list| {
                let mut list = list.borrow_mut();
                if list.len() < LOCAL_FREE_LIMIT {
                    list.push((pool_id, slot, buf));
                }
                // Past the limit the buffer is simply dropped; its slot
                // stays vacant and the high-water policy covers demand
            });
        }
    }
}
