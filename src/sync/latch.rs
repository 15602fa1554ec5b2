//! Share/exclusive latches on a 32-bit word, per the design's sync
//! primitives: a reader count in the low bits, an exclusive-requested flag
//! in the top bit. All words are accessed with acquire/release ordering so
//! that a queue-exclusive -> drain -> release sequence is a linearization
//! point observed by any later share-acquire on the same word.

use std::sync::atomic::{AtomicU32, Ordering};

use super::backoff::SpinBackoff;

const EXCLUSIVE_BIT: u32 = 1 << 31;
const READER_MASK: u32 = !EXCLUSIVE_BIT;
const READER_CAP: u32 = READER_MASK;

/// A share/exclusive latch word, safe to embed directly in shared memory.
#[repr(transparent)]
pub struct Latch {
    word: AtomicU32,
}

impl Latch {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    /// View an already-initialized word (e.g. one living in a mapped
    /// segment) as a latch, without re-zeroing it.
    ///
    /// # Safety
    /// `ptr` must be valid for `'static` reads/writes of a `u32` and must
    /// not alias any other typed access to the same bytes.
    pub unsafe fn from_raw<'a>(ptr: *mut u32) -> &'a Latch {
        &*(ptr as *const Latch)
    }

    pub fn reader_count(&self) -> u32 {
        self.word.load(Ordering::Acquire) & READER_MASK
    }

    pub fn is_exclusive_requested(&self) -> bool {
        self.word.load(Ordering::Acquire) & EXCLUSIVE_BIT != 0
    }

    /// Spin until the exclusive flag is clear, then add one reader.
    pub fn acquire_share(&self) {
        let mut backoff = SpinBackoff::new();
        loop {
            let cur = self.word.load(Ordering::Acquire);
            if cur & EXCLUSIVE_BIT != 0 {
                backoff.spin();
                continue;
            }
            debug_assert!(cur & READER_MASK < READER_CAP, "reader count overflow");
            if self
                .word
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// Try to acquire a share latch exactly once; fail on any contention.
    pub fn bounce_share(&self) -> bool {
        let cur = self.word.load(Ordering::Acquire);
        if cur & EXCLUSIVE_BIT != 0 {
            return false;
        }
        self.word
            .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_share(&self) {
        let prev = self.word.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & READER_MASK != 0, "release_share without a share held");
    }

    /// Set the exclusive-requested flag (blocking new shares immediately),
    /// then spin until outstanding shares drain. Fails without blocking if
    /// someone else already holds/requested exclusive.
    pub fn queue_exclusive(&self) -> bool {
        loop {
            let cur = self.word.load(Ordering::Acquire);
            if cur & EXCLUSIVE_BIT != 0 {
                return false;
            }
            if self
                .word
                .compare_exchange_weak(cur, cur | EXCLUSIVE_BIT, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let mut backoff = SpinBackoff::new();
        while self.word.load(Ordering::Acquire) & READER_MASK != 0 {
            backoff.spin();
        }
        true
    }

    /// Try to set the exclusive flag and confirm zero readers in one shot;
    /// fails immediately on any contention instead of draining.
    pub fn bounce_exclusive(&self) -> bool {
        self.word
            .compare_exchange(0, EXCLUSIVE_BIT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Abort a queue-exclusive attempt without waiting for readers (used
    /// when an upgrade fails and the caller wants to fall back).
    pub fn remove_queue_exclusive(&self) {
        self.word.fetch_and(!EXCLUSIVE_BIT, Ordering::AcqRel);
    }

    pub fn release_exclusive(&self) {
        let prev = self.word.fetch_and(!EXCLUSIVE_BIT, Ordering::Release);
        debug_assert!(prev & EXCLUSIVE_BIT != 0, "release_exclusive without exclusive held");
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// A plain exclusive-only spinlock, used for shard heads and block headers
/// where there is never a concurrent-reader fast path -- only mutual
/// exclusion between writers.
#[repr(transparent)]
pub struct SpinLock {
    locked: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicU32::new(0),
        }
    }

    /// # Safety
    /// Same contract as [`Latch::from_raw`].
    pub unsafe fn from_raw<'a>(ptr: *mut u32) -> &'a SpinLock {
        &*(ptr as *const SpinLock)
    }

    pub fn lock(&self) {
        let mut backoff = SpinBackoff::new();
        while !self.try_lock() {
            backoff.spin();
        }
    }

    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(0, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire) != 0
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn share_latches_stack() {
        let latch = Latch::new();
        latch.acquire_share();
        latch.acquire_share();
        assert_eq!(latch.reader_count(), 2);
        latch.release_share();
        assert_eq!(latch.reader_count(), 1);
        latch.release_share();
        assert_eq!(latch.reader_count(), 0);
    }

    #[test]
    fn queue_exclusive_blocks_new_shares_immediately() {
        let latch = Arc::new(Latch::new());
        latch.acquire_share();

        let l2 = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            assert!(l2.queue_exclusive());
            l2.release_exclusive();
        });

        // give the other thread a moment to set the exclusive-requested bit
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!latch.bounce_share(), "new shares must be blocked once exclusive is requested");

        latch.release_share();
        handle.join().unwrap();
        assert_eq!(latch.reader_count(), 0);
        assert!(!latch.is_exclusive_requested());
    }

    #[test]
    fn bounce_exclusive_fails_under_contention() {
        let latch = Latch::new();
        latch.acquire_share();
        assert!(!latch.bounce_exclusive());
        latch.release_share();
        assert!(latch.bounce_exclusive());
        latch.release_exclusive();
    }

    #[test]
    fn spinlock_mutual_exclusion() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    counter.fetch_add(1, Ordering::SeqCst);
                    lock.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8000);
    }
}
