//! Lock-free SPSC ring buffer for audio transport
//!
//! Single producer, single consumer, wait-free on both sides. Of the
//! `N` float slots one stays reserved so full and empty states are
//! distinguishable: usable capacity is `N − 1`. Each call performs at
//! most two contiguous copies (pre-wrap and post-wrap segments).
//!
//! Memory ordering: the writer publishes with a release store on the
//! write index; the reader consumes with an acquire load, and vice
//! versa for the space calculation.

use std::sync::atomic::{AtomicUsize, Ordering};

use ft_core::Sample;

/// Single-producer single-consumer sample ring
#[repr(align(64))]
pub struct SpscRingBuffer {
    /// Slot storage, `slots` floats of which `slots − 1` are usable
    buffer: Box<[Sample]>,
    slots: usize,
    /// Write index in `[0, slots)`, only advanced by the producer
    write_pos: AtomicUsize,
    /// Read index in `[0, slots)`, only advanced by the consumer
    read_pos: AtomicUsize,
}

// Interior mutation happens through raw pointers; index discipline keeps
// producer and consumer on disjoint slot ranges.
unsafe impl Send for SpscRingBuffer {}
unsafe impl Sync for SpscRingBuffer {}

impl SpscRingBuffer {
    /// Create a ring with `slots` float slots (`slots − 1` usable)
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(2);
        Self {
            buffer: vec![0.0; slots].into_boxed_slice(),
            slots,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Usable capacity in samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots - 1
    }

    /// Samples ready to read
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        (write + self.slots - read) % self.slots
    }

    /// Free space for writing
    #[inline]
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.slots - 1 - (write + self.slots - read) % self.slots
    }

    /// Write up to `src.len()` samples; returns the count written
    #[inline]
    pub fn write(&self, src: &[Sample]) -> usize {
        let to_write = src.len().min(self.available_write());
        if to_write == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let first = to_write.min(self.slots - write);
        let second = to_write - first;

        // SAFETY: sole producer; the slots in [write, write+to_write)
        // (mod slots) are free by the capacity check above
        unsafe {
            let ptr = self.buffer.as_ptr() as *mut Sample;
            std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.add(write), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(first), ptr, second);
            }
        }

        self.write_pos
            .store((write + to_write) % self.slots, Ordering::Release);
        to_write
    }

    /// Read up to `dst.len()` samples; returns the count read
    #[inline]
    pub fn read(&self, dst: &mut [Sample]) -> usize {
        let to_read = dst.len().min(self.available_read());
        if to_read == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let first = to_read.min(self.slots - read);
        let second = to_read - first;

        // SAFETY: sole consumer; the slots in [read, read+to_read)
        // (mod slots) were published by the producer
        unsafe {
            let ptr = self.buffer.as_ptr();
            std::ptr::copy_nonoverlapping(ptr.add(read), dst.as_mut_ptr(), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr().add(first), second);
            }
        }

        self.read_pos
            .store((read + to_read) % self.slots, Ordering::Release);
        to_read
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }

    /// Drop all buffered samples (consumer side)
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}
