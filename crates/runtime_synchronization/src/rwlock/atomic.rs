use crossbeam::utils::CachePadded;

use super::{lock_adaptive, LockMode, ReaderWriterLock};
use crate::config::RwLockQuotas;
use crate::error::{Result, WouldBlock};
use crate::sync::{fence, lock, wait, AtomicI32, Condvar, Mutex, Ordering};

// The algorithm is a writer-preference lock, but the waiting is done with a mutex and condition variables rather than
// by spinning, so that it behaves as a userspace lock should under contention:
//
// - `cnt_and_flag` holds the number of readers in units of `READER_INCR`, plus the `WRITER_ACTIVE` bit.  Readers claim
//   the lock with one fetch_add and release it with one fetch_sub.
// - Writers take a ticket from `write_requests` and wait until `write_completions` reaches it, so writers are served
//   in order.  While `write_requests != write_completions`, some writer is queued or active and new readers wait.
// - `try_lock(Write)` and `try_upgrade` jump the queue by taking `write_completions` back by one.  The matching unlock
//   puts it forward again, so the books balance.
// - `write_granted` counts consecutive writes.  Once it reaches the quota, a releasing writer lets waiting readers in
//   instead of waking the next writer, and the first reader through resets it.
// - The mutex only orders sleeping against waking.  It protects `readers_waiting` and nothing else.

const WRITER_ACTIVE: i32 = 0x1;
const READER_INCR: i32 = 0x2;

#[derive(Debug, Default)]
struct Waiters {
    readers: u32,
}

/// A reader-writer lock whose readers stay off the mutex unless a writer is around.
///
/// See the module documentation for the contract.  The read quota is not used: readers wait behind any queued writer.
#[derive(Debug)]
pub struct AtomicRwLock {
    cnt_and_flag: CachePadded<AtomicI32>,

    write_requests: AtomicI32,
    write_completions: AtomicI32,
    write_granted: AtomicI32,

    /// Running estimate of how long `lock` should spin.  Updated racily; it's only a hint.
    spins: AtomicI32,

    waiters: Mutex<Waiters>,
    readable: Condvar,
    writeable: Condvar,

    write_quota: i32,
}

impl AtomicRwLock {
    fn writers_queued(&self) -> bool {
        self.write_requests.load(Ordering::Acquire) != self.write_completions.load(Ordering::Acquire)
    }

    fn writer_active(&self) -> bool {
        self.cnt_and_flag.load(Ordering::Acquire) & WRITER_ACTIVE != 0
    }

    fn broadcast_writeable(&self) {
        let _waiters = lock(&self.waiters);
        self.writeable.notify_all();
    }

    fn lock_read_blocking(&self) {
        if self.writers_queued() {
            let mut waiters = lock(&self.waiters);
            if self.writers_queued() {
                log::trace!("Reader waiting behind queued writers");
                waiters.readers += 1;
                waiters = wait(&self.readable, waiters);
                waiters.readers -= 1;
            }
        }

        let prev = self.cnt_and_flag.fetch_add(READER_INCR, Ordering::AcqRel);
        debug_assert!(prev >= 0, "Reader count overflowed");

        // Our claim is visible to writers now, so no new writer can get in; wait out the current one, if any.
        let mut writer_was_active = prev & WRITER_ACTIVE != 0;
        while writer_was_active {
            let mut waiters = lock(&self.waiters);
            waiters.readers += 1;
            if self.writer_active() {
                log::trace!("Reader waiting for the active writer");
                waiters = wait(&self.readable, waiters);
            }
            waiters.readers -= 1;
            drop(waiters);

            writer_was_active = self.writer_active();
        }

        // Writers may have been favored because of the quota.  We got in, so reset it; races between readers are
        // harmless because they all store the same value.
        self.write_granted.store(0, Ordering::Relaxed);
    }

    fn lock_write_blocking(&self) {
        let ticket = self.write_requests.fetch_add(1, Ordering::AcqRel);
        // Pairs with the fences in the release paths: either we see their update, or they see our ticket and wake us.
        fence(Ordering::SeqCst);

        while self.write_completions.load(Ordering::Acquire) != ticket {
            let waiters = lock(&self.waiters);
            if self.write_completions.load(Ordering::Acquire) != ticket {
                log::trace!("Writer waiting for its turn");
                drop(wait(&self.writeable, waiters));
            }
        }

        // It's our turn, but readers which claimed before we queued may still be inside.
        while self
            .cnt_and_flag
            .compare_exchange(0, WRITER_ACTIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            let waiters = lock(&self.waiters);
            if self.cnt_and_flag.load(Ordering::Acquire) != 0 {
                log::trace!("Writer waiting for readers to drain");
                drop(wait(&self.writeable, waiters));
            }
        }

        self.write_granted.fetch_add(1, Ordering::Relaxed);
    }

    fn try_lock_read(&self) -> Result<()> {
        if self.writers_queued() {
            return Err(WouldBlock);
        }

        let prev = self.cnt_and_flag.fetch_add(READER_INCR, Ordering::AcqRel);
        if prev & WRITER_ACTIVE != 0 {
            // A writer jumped in between the check and the claim.  Back out; if the writer left meanwhile and we were
            // what was keeping a queued writer out, wake it.
            let prev = self.cnt_and_flag.fetch_sub(READER_INCR, Ordering::AcqRel);
            fence(Ordering::SeqCst);
            if prev == READER_INCR && self.writers_queued() {
                self.broadcast_writeable();
            }
            return Err(WouldBlock);
        }

        Ok(())
    }

    fn try_lock_write(&self) -> Result<()> {
        self.cnt_and_flag
            .compare_exchange(0, WRITER_ACTIVE, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| WouldBlock)?;

        // Take a ticket out of turn.  This may let us in ahead of queued writers, which is acceptable for a try.
        self.write_completions.fetch_sub(1, Ordering::AcqRel);
        self.write_granted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[track_caller]
    fn unlock_read(&self) {
        let prev = self.cnt_and_flag.fetch_sub(READER_INCR, Ordering::AcqRel);
        fence(Ordering::SeqCst);
        assert!(
            prev & !WRITER_ACTIVE != 0,
            "Attempt to release a read lock which is not held"
        );

        // The last reader out lets a queued writer in.
        if prev == READER_INCR && self.writers_queued() {
            self.broadcast_writeable();
        }
    }

    #[track_caller]
    fn unlock_write(&self) {
        let prev = self.cnt_and_flag.fetch_sub(WRITER_ACTIVE, Ordering::AcqRel);
        assert!(
            prev & WRITER_ACTIVE != 0,
            "Attempt to release a write lock which is not held"
        );
        self.write_completions.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::SeqCst);

        let mut wake_writers = true;

        let quota_spent = self.write_granted.load(Ordering::Relaxed) >= self.write_quota;
        let readers_claimed = self.cnt_and_flag.load(Ordering::Acquire) & !WRITER_ACTIVE != 0;
        if quota_spent || !self.writers_queued() || readers_claimed {
            let waiters = lock(&self.waiters);
            if waiters.readers > 0 {
                if quota_spent {
                    log::trace!("Write quota spent; letting waiting readers in");
                }
                // The last of these readers wakes the writers when it leaves.
                wake_writers = false;
                self.readable.notify_all();
            }
        }

        if wake_writers && self.writers_queued() {
            self.broadcast_writeable();
        }
    }

    /// Tear down the lock, which must have no holders and no waiters.
    #[track_caller]
    pub fn destroy(self) {
        let cnt_and_flag = self.cnt_and_flag.load(Ordering::Acquire);
        let requests = self.write_requests.load(Ordering::Acquire);
        let completions = self.write_completions.load(Ordering::Acquire);
        let readers_waiting = lock(&self.waiters).readers;
        assert!(
            cnt_and_flag == 0 && requests == completions && readers_waiting == 0,
            "Attempt to destroy a reader-writer lock which is in use (readers={}, writer_active={}, queued_writers={}, waiting_readers={})",
            cnt_and_flag / READER_INCR,
            cnt_and_flag & WRITER_ACTIVE != 0,
            requests.wrapping_sub(completions),
            readers_waiting
        );
    }

    #[cfg(test)]
    pub(crate) fn reader_count(&self) -> i32 {
        self.cnt_and_flag.load(Ordering::Acquire) / READER_INCR
    }

    #[cfg(test)]
    pub(crate) fn queued_writers(&self) -> i32 {
        self.write_requests
            .load(Ordering::Acquire)
            .wrapping_sub(self.write_completions.load(Ordering::Acquire))
    }
}

impl ReaderWriterLock for AtomicRwLock {
    fn with_quotas(quotas: RwLockQuotas) -> Self {
        if quotas.read_quota != 0 {
            log::debug!(
                "AtomicRwLock ignores the read quota ({}); readers always yield to queued writers",
                quotas.read_quota
            );
        }

        let write_quota = quotas.effective_write_quota().min(i32::MAX as u32) as i32;

        Self {
            cnt_and_flag: CachePadded::new(AtomicI32::new(0)),
            write_requests: AtomicI32::new(0),
            write_completions: AtomicI32::new(0),
            write_granted: AtomicI32::new(0),
            spins: AtomicI32::new(0),
            waiters: Mutex::new(Waiters::default()),
            readable: Condvar::new(),
            writeable: Condvar::new(),
            write_quota,
        }
    }

    fn lock(&self, mode: LockMode) {
        let spins = self.spins.load(Ordering::Relaxed);
        let next = lock_adaptive(
            spins,
            || self.try_lock(mode).is_ok(),
            || match mode {
                LockMode::Read => self.lock_read_blocking(),
                LockMode::Write => self.lock_write_blocking(),
            },
        );
        self.spins.store(next, Ordering::Relaxed);
    }

    fn try_lock(&self, mode: LockMode) -> Result<()> {
        match mode {
            LockMode::Read => self.try_lock_read(),
            LockMode::Write => self.try_lock_write(),
        }
    }

    #[track_caller]
    fn unlock(&self, mode: LockMode) {
        match mode {
            LockMode::Read => self.unlock_read(),
            LockMode::Write => self.unlock_write(),
        }
    }

    #[track_caller]
    fn try_upgrade(&self) -> Result<()> {
        match self.cnt_and_flag.compare_exchange(
            READER_INCR,
            WRITER_ACTIVE,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                // Now we're the writer; go to the head of the writer queue.
                self.write_completions.fetch_sub(1, Ordering::AcqRel);
                self.write_granted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(found) => {
                assert!(
                    found & WRITER_ACTIVE == 0 && found & !WRITER_ACTIVE != 0,
                    "Attempt to upgrade a read lock which is not held"
                );
                Err(WouldBlock)
            }
        }
    }

    #[track_caller]
    fn downgrade(&self) {
        // Claim the read slot while the writer bit is still set, so nobody else can get in between.
        let prev = self.cnt_and_flag.fetch_add(READER_INCR, Ordering::AcqRel);
        assert!(
            prev & WRITER_ACTIVE != 0,
            "Attempt to downgrade a write lock which is not held"
        );

        self.cnt_and_flag.fetch_sub(WRITER_ACTIVE, Ordering::AcqRel);
        self.write_completions.fetch_add(1, Ordering::AcqRel);

        let waiters = lock(&self.waiters);
        if waiters.readers > 0 {
            self.readable.notify_all();
        }
    }
}
