#[cfg(not(loom))]
mod not_loom {
    pub use std::sync::atomic::*;
    pub use std::sync::*;
    #[cfg(test)]
    pub use std::thread::spawn;
    #[cfg(test)]
    pub use std::thread::yield_now;

    /// Pause inside a busy-wait loop.
    #[inline(always)]
    pub fn spin_loop() {
        std::hint::spin_loop()
    }

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    pub use loom::sync::atomic::*;
    pub use loom::sync::*;
    #[cfg(test)]
    pub use loom::thread::spawn;
    #[cfg(test)]
    pub use loom::thread::yield_now;

    /// Loom cannot see a hardware pause, so spinning must yield to the model's scheduler instead.
    #[inline(always)]
    pub fn spin_loop() {
        loom::thread::yield_now()
    }

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}

#[cfg(loom)]
pub(crate) use with_loom::*;

/// Lock a mutex, ignoring poison.
///
/// Every primitive here treats misuse as fatal on the thread which made the mistake.  A poisoned mutex therefore only
/// means that some other thread already faulted, and the state the mutex protects was left consistent because we never
/// panic while holding a guard over partially-updated state.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Wait on a condition variable, ignoring poison for the same reasons as [lock].
#[inline]
pub(crate) fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(std::sync::PoisonError::into_inner)
}
