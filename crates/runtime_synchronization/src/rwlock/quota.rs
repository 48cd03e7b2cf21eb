use super::{lock_adaptive, LockMode, ReaderWriterLock};
use crate::config::RwLockQuotas;
use crate::error::{Result, WouldBlock};
use crate::sync::{lock, wait, Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct QuotaState {
    /// The mode the lock was last granted in, or is about to be granted in if a writer was just signalled.
    mode: Option<LockMode>,

    /// How many threads hold the lock.
    active: u32,

    /// Grants made since the lock last switched modes.  Compared against the quotas to decide when to switch.
    granted: u32,

    readers_waiting: u32,
    writers_waiting: u32,

    /// The mode to return to when the holder of an upgraded (or downgraded) lock releases it.
    original: Option<LockMode>,

    spins: i32,
}

/// A reader-writer lock built only on a mutex and condition variables.
///
/// This is the lock for targets without 32-bit atomics, and the reference against which [crate::rwlock::AtomicRwLock]
/// is tested.  While the other mode is waiting, the lock grants at most `read_quota` reads (or `write_quota` writes) in
/// a row before switching.  Nothing stronger than that is promised: in particular a newly arriving thread can still
/// win a race against a just-woken waiter of the other mode.
#[derive(Debug)]
pub struct QuotaRwLock {
    state: Mutex<QuotaState>,
    readable: Condvar,
    writeable: Condvar,
    read_quota: u32,
    write_quota: u32,
}

impl QuotaRwLock {
    fn acquire(&self, mode: LockMode, nonblocking: bool) -> Result<()> {
        let mut state = lock(&self.state);

        match mode {
            LockMode::Read => {
                // Let readers which were already asleep go first.
                let mut skip = state.readers_waiting != 0;
                loop {
                    if !skip && self.read_admissible(&state) {
                        state.mode = Some(LockMode::Read);
                        state.active += 1;
                        state.granted += 1;
                        return Ok(());
                    }

                    if nonblocking {
                        return Err(WouldBlock);
                    }

                    skip = false;
                    state.readers_waiting += 1;
                    log::trace!("Reader waiting on the quota lock");
                    state = wait(&self.readable, state);
                    state.readers_waiting -= 1;
                }
            }
            LockMode::Write => {
                let mut skip = state.writers_waiting != 0;
                loop {
                    if !skip && state.active == 0 {
                        state.mode = Some(LockMode::Write);
                        state.active = 1;
                        state.granted += 1;
                        return Ok(());
                    }

                    if nonblocking {
                        return Err(WouldBlock);
                    }

                    skip = false;
                    state.writers_waiting += 1;
                    log::trace!("Writer waiting on the quota lock");
                    state = wait(&self.writeable, state);
                    state.writers_waiting -= 1;
                }
            }
        }
    }

    fn read_admissible(&self, state: &QuotaState) -> bool {
        state.active == 0
            || (state.mode == Some(LockMode::Read)
                && (state.writers_waiting == 0 || state.granted < self.read_quota))
    }

    /// Release the state mutex, then panic.  Keeps the mutex from being poisoned by the caller's mistake.
    #[cold]
    #[track_caller]
    fn fault(state: MutexGuard<'_, QuotaState>, message: &str) -> ! {
        let summary = format!(
            "mode={:?} active={} original={:?}",
            state.mode, state.active, state.original
        );
        drop(state);
        panic!("{}: {}", message, summary);
    }

    /// Tear down the lock, which must have no holders and no waiters.
    #[track_caller]
    pub fn destroy(self) {
        let state = lock(&self.state);
        if state.active != 0 || state.readers_waiting != 0 || state.writers_waiting != 0 {
            Self::fault(state, "Attempt to destroy a reader-writer lock which is in use");
        }
    }
}

impl ReaderWriterLock for QuotaRwLock {
    fn with_quotas(quotas: RwLockQuotas) -> Self {
        Self {
            state: Mutex::new(QuotaState::default()),
            readable: Condvar::new(),
            writeable: Condvar::new(),
            read_quota: quotas.effective_read_quota(),
            write_quota: quotas.effective_write_quota(),
        }
    }

    fn lock(&self, mode: LockMode) {
        let spins = lock(&self.state).spins;
        let next = lock_adaptive(
            spins,
            || self.acquire(mode, true).is_ok(),
            || {
                self.acquire(mode, false)
                    .expect("Blocking acquisition never reports WouldBlock")
            },
        );
        lock(&self.state).spins = next;
    }

    fn try_lock(&self, mode: LockMode) -> Result<()> {
        self.acquire(mode, true)
    }

    #[track_caller]
    fn unlock(&self, mode: LockMode) {
        let mut state = lock(&self.state);
        if state.active == 0 || state.mode != Some(mode) {
            Self::fault(state, &format!("Attempt to release a {:?} lock which is not held", mode));
        }

        state.active -= 1;
        if state.active != 0 {
            return;
        }

        if let Some(original) = state.original.take() {
            state.mode = Some(original);
        }

        match state.mode {
            Some(LockMode::Read) => {
                state.granted = 0;
                if state.writers_waiting > 0 {
                    state.mode = Some(LockMode::Write);
                    self.writeable.notify_one();
                } else if state.readers_waiting > 0 {
                    self.readable.notify_all();
                }
            }
            Some(LockMode::Write) => {
                if state.readers_waiting > 0 {
                    if state.writers_waiting > 0 && state.granted < self.write_quota {
                        self.writeable.notify_one();
                    } else {
                        log::trace!("Quota lock switching to readers after {} writes", state.granted);
                        state.granted = 0;
                        state.mode = Some(LockMode::Read);
                        self.readable.notify_all();
                    }
                } else {
                    state.granted = 0;
                    if state.writers_waiting > 0 {
                        self.writeable.notify_one();
                    }
                }
            }
            None => unreachable!("A held lock always has a mode"),
        }
    }

    #[track_caller]
    fn try_upgrade(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.mode != Some(LockMode::Read) || state.active == 0 {
            Self::fault(state, "Attempt to upgrade a read lock which is not held");
        }

        if state.active != 1 {
            return Err(WouldBlock);
        }

        state.mode = Some(LockMode::Write);
        // Upgrading a downgraded write puts us back where we started; otherwise the release must restore read mode.
        state.original = match state.original {
            None => Some(LockMode::Read),
            Some(_) => None,
        };
        Ok(())
    }

    #[track_caller]
    fn downgrade(&self) {
        let mut state = lock(&self.state);
        if state.mode != Some(LockMode::Write) || state.active != 1 {
            Self::fault(state, "Attempt to downgrade a write lock which is not held");
        }

        state.mode = Some(LockMode::Read);
        // Downgrading an upgrade puts us back where we started.  Downgrading a plain write lock means the release will
        // be a write release.
        state.original = match state.original {
            None => Some(LockMode::Write),
            Some(_) => None,
        };

        // Resume readers which blocked while we were upgraded.
        if state.original.is_none()
            && (state.writers_waiting == 0 || state.granted < self.read_quota)
            && state.readers_waiting > 0
        {
            self.readable.notify_all();
        }
    }
}
