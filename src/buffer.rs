//! Byte FIFO shared between interrupt and foreground context.
//!
//! The buffer keeps its content ordered with the oldest byte at index 0 and
//! dequeues by copying the remainder down one slot. The copy runs in the
//! interrupt tail, never in foreground calls; the `dirty` flag is how the
//! foreground asks for it. The `lock` flag is advisory: interrupt paths that
//! find it set fail fast and retry on a later tick instead of blocking.
use core::cell::RefCell;
use core::hint;
use core::sync::atomic::Ordering;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicUsize};

/// Error returned by [RingBuffer::append] when the buffer is at capacity.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("buffer is full")]
pub struct FullError;

/// Error returned by [RingBuffer::shift_down] when the advisory lock is held
/// by somebody else.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("buffer is locked")]
pub struct LockedError;

/// Fixed-capacity byte FIFO with an advisory lock and a consumed-head flag.
///
/// All methods take `&self` so the buffer can sit in a `static` reachable
/// from both interrupt handlers and foreground code. Multi-byte accesses run
/// inside critical sections; the scalar flags are atomics.
pub struct RingBuffer<const N: usize> {
    data: Mutex<RefCell<[u8; N]>>,
    top: AtomicUsize,
    lock: AtomicBool,
    dirty: AtomicBool,
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        const { assert!(N > 0, "buffer capacity must be non-zero") };
        Self {
            data: Mutex::new(RefCell::new([0; N])),
            top: AtomicUsize::new(0),
            lock: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Number of queued bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all content and clears both flags.
    pub fn reset(&self) {
        critical_section::with(|_| {
            self.top.store(0, Ordering::Relaxed);
            self.lock.store(false, Ordering::Relaxed);
            self.dirty.store(false, Ordering::Relaxed);
        });
    }

    /// Appends a byte at the tail.
    pub fn append(&self, byte: u8) -> Result<(), FullError> {
        critical_section::with(|cs| {
            let top = self.top.load(Ordering::Relaxed);
            if top == N {
                return Err(FullError);
            }
            self.data.borrow_ref_mut(cs)[top] = byte;
            self.top.store(top + 1, Ordering::Release);
            Ok(())
        })
    }

    /// Reads the head byte without removing it.
    ///
    /// Callers gate on [Self::len]; on an empty buffer this returns stale
    /// storage content.
    pub fn peek(&self) -> u8 {
        critical_section::with(|cs| self.data.borrow_ref(cs)[0])
    }

    /// Removes the head byte by copying the remainder down one slot.
    ///
    /// Fails without blocking when the advisory lock is held; interrupt
    /// callers retry on a later tick. The O(len) copy runs with interrupts
    /// masked.
    pub fn shift_down(&self) -> Result<(), LockedError> {
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(LockedError);
        }
        critical_section::with(|cs| {
            let top = self.top.load(Ordering::Relaxed);
            if top > 0 {
                let mut data = self.data.borrow_ref_mut(cs);
                for i in 1..top {
                    data[i - 1] = data[i];
                }
                self.top.store(top - 1, Ordering::Relaxed);
            }
        });
        self.lock.store(false, Ordering::Release);
        Ok(())
    }

    /// Spin-acquires the advisory lock.
    ///
    /// Foreground only. Interrupt paths use [Self::shift_down], which fails
    /// instead of spinning, so the lock is never held across a tick and this
    /// loop terminates promptly.
    pub fn acquire_lock(&self) {
        while self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
    }

    #[inline]
    pub fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    /// True while a consumed head byte waits to be retired.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the head byte consumed; the interrupt bottom half retires it.
    #[inline]
    pub fn mark_consumed(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
