//! Asymmetric reader-writer locks for read-heavy workloads.
//!
//! There are two implementations of [ReaderWriterLock]:
//!
//! - [AtomicRwLock], in which readers only touch a single atomic word unless a writer is requested or active.  Writers
//!   take tickets and are served in order; readers are kept out while writers are queued, except that after
//!   `write_quota` consecutive writes the waiting readers are let in.
//! - [QuotaRwLock], which mediates everything through one mutex and two condition variables.  The lock alternates
//!   between modes, making at most a quota's worth of grants in one mode while the other mode is waiting.
//!
//! [RwLock] is whichever of the two the target supports, preferring the atomic one.  Both have the same contract:
//!
//! - A writer excludes every reader and every other writer.
//! - `downgrade` never lets the lock be observed unlocked.
//! - Unlocking a mode the caller doesn't hold, or destroying a lock which is in use, panics.
//!
//! These are raw locks: they protect no data and are locked and unlocked by mode, so that an owning object can decide
//! what they guard.  [ReadGuard] and [WriteGuard] are available for scoped use.
use crate::config::{self, RwLockQuotas};
use crate::error::Result;

#[cfg(target_has_atomic = "32")]
mod atomic;
mod quota;

#[cfg(target_has_atomic = "32")]
pub use atomic::AtomicRwLock;
pub use quota::QuotaRwLock;

/// The lock used by default on this target.
#[cfg(target_has_atomic = "32")]
pub type RwLock = AtomicRwLock;

/// The lock used by default on this target.
#[cfg(not(target_has_atomic = "32"))]
pub type RwLock = QuotaRwLock;

/// Which kind of access a lock operation is for.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum LockMode {
    Read,
    Write,
}

pub trait ReaderWriterLock: Send + Sync {
    /// Build a lock with the given fairness quotas.
    fn with_quotas(quotas: RwLockQuotas) -> Self
    where
        Self: Sized;

    /// Build a lock with the default quotas.
    fn new() -> Self
    where
        Self: Sized,
    {
        Self::with_quotas(RwLockQuotas::default())
    }

    /// Acquire the lock, blocking the thread until it is available.
    fn lock(&self, mode: LockMode);

    /// Acquire the lock if that is possible without waiting.
    fn try_lock(&self, mode: LockMode) -> Result<()>;

    /// Release a lock held in `mode`.
    fn unlock(&self, mode: LockMode);

    /// Convert a held read lock into a write lock, if the caller is the only reader.
    ///
    /// On failure the caller still holds its read lock and nothing else has changed.
    fn try_upgrade(&self) -> Result<()>;

    /// Convert a held write lock into a read lock without ever releasing it.
    fn downgrade(&self);

    fn read(&self) -> ReadGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock(LockMode::Read);
        ReadGuard { lock: self }
    }

    fn write(&self) -> WriteGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock(LockMode::Write);
        WriteGuard { lock: self }
    }

    fn try_read(&self) -> Result<ReadGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.try_lock(LockMode::Read)?;
        Ok(ReadGuard { lock: self })
    }

    fn try_write(&self) -> Result<WriteGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.try_lock(LockMode::Write)?;
        Ok(WriteGuard { lock: self })
    }
}

/// A held read lock, released on drop.
#[must_use = "dropping the guard releases the lock immediately"]
#[derive(Debug)]
pub struct ReadGuard<'a, L: ReaderWriterLock> {
    lock: &'a L,
}

/// A held write lock, released on drop.
#[must_use = "dropping the guard releases the lock immediately"]
#[derive(Debug)]
pub struct WriteGuard<'a, L: ReaderWriterLock> {
    lock: &'a L,
}

impl<'a, L: ReaderWriterLock> ReadGuard<'a, L> {
    /// Try to become the writer.  Gives the read guard back if other readers are present.
    pub fn try_upgrade(self) -> std::result::Result<WriteGuard<'a, L>, ReadGuard<'a, L>> {
        match self.lock.try_upgrade() {
            Ok(()) => {
                let lock = self.lock;
                std::mem::forget(self);
                Ok(WriteGuard { lock })
            }
            Err(_) => Err(self),
        }
    }
}

impl<'a, L: ReaderWriterLock> WriteGuard<'a, L> {
    pub fn downgrade(self) -> ReadGuard<'a, L> {
        self.lock.downgrade();
        let lock = self.lock;
        std::mem::forget(self);
        ReadGuard { lock }
    }
}

impl<L: ReaderWriterLock> Drop for ReadGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock(LockMode::Read);
    }
}

impl<L: ReaderWriterLock> Drop for WriteGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock(LockMode::Write);
    }
}

/// Drive the adaptive spin phase of `lock`.
///
/// Retries `try_lock` after each pause until the budget derived from `spins` is spent, then calls `block`, which must
/// acquire the lock.  Returns the new spin estimate.
pub(crate) fn lock_adaptive(
    spins: i32,
    mut try_lock: impl FnMut() -> bool,
    block: impl FnOnce(),
) -> i32 {
    let budget = config::spin_budget(spins);
    let mut spent = 0;

    loop {
        if spent >= budget {
            spent += 1;
            block();
            break;
        }

        spent += 1;
        crate::sync::spin_loop();
        if try_lock() {
            break;
        }
    }

    config::next_spin_estimate(spins, spent)
}

#[cfg(test)]
mod tests;
