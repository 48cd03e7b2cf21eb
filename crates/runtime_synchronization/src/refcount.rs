//! A reference counter for objects which manage their own lifetime.
//!
//! The counter never frees anything itself.  An owning object embeds one, hands out shares with
//! [RefCount::increment0] (the first share, allowed from zero) and [RefCount::increment] (every later share, which
//! requires an existing owner), and destroys itself when [RefCount::decrement] reports 0.
//!
//! Increments are relaxed: nothing is published through the counter by taking a share.  Decrements are acquire-release,
//! so the thread which takes the count to zero sees every write other threads made before giving up their shares.  That
//! is what makes destroying the object after the last decrement sound.
//!
//! On targets without 32-bit atomics the count lives behind a mutex instead, with the same observable behavior.

/// Panic for an increment of a dead counter.
#[cold]
#[track_caller]
fn increment_from_zero() -> ! {
    panic!("Attempt to take a share of a reference count which already reached zero");
}

#[cold]
#[track_caller]
fn decrement_from_zero() -> ! {
    panic!("Attempt to release a share of a reference count which is already zero");
}

#[cold]
#[track_caller]
fn overflow() -> ! {
    panic!("Reference count overflowed");
}

#[cfg(target_has_atomic = "32")]
mod imp {
    use crate::sync::{AtomicI32, Ordering};

    #[derive(Debug)]
    pub struct RefCount {
        refs: AtomicI32,
    }

    impl RefCount {
        pub(super) fn from_initial(n: i32) -> Self {
            Self {
                refs: AtomicI32::new(n),
            }
        }

        /// Add one, returning the previous value.
        #[inline]
        pub(super) fn add(&self) -> i32 {
            self.refs.fetch_add(1, Ordering::Relaxed)
        }

        /// Subtract one, returning the previous value.
        #[inline]
        pub(super) fn sub(&self) -> i32 {
            self.refs.fetch_sub(1, Ordering::AcqRel)
        }

        #[inline]
        pub(super) fn load(&self) -> i32 {
            self.refs.load(Ordering::Acquire)
        }
    }
}

#[cfg(not(target_has_atomic = "32"))]
mod imp {
    use crate::sync::{lock, Mutex};

    #[derive(Debug)]
    pub struct RefCount {
        refs: Mutex<i32>,
    }

    impl RefCount {
        pub(super) fn from_initial(n: i32) -> Self {
            Self {
                refs: Mutex::new(n),
            }
        }

        pub(super) fn add(&self) -> i32 {
            let mut refs = lock(&self.refs);
            let prev = *refs;
            *refs = prev.wrapping_add(1);
            prev
        }

        pub(super) fn sub(&self) -> i32 {
            let mut refs = lock(&self.refs);
            let prev = *refs;
            // Never store a negative count; the caller faults on `prev <= 0` anyway.
            if prev > 0 {
                *refs = prev - 1;
            }
            prev
        }

        pub(super) fn load(&self) -> i32 {
            *lock(&self.refs)
        }
    }
}

pub use imp::RefCount;

impl RefCount {
    /// Create a counter holding `n` references.
    ///
    /// Most owners start at 1 for the creator's own share.
    pub fn new(n: u32) -> Self {
        let Ok(n) = i32::try_from(n) else {
            overflow();
        };
        Self::from_initial(n)
    }

    /// Take an additional share, returning the new count.
    ///
    /// The count must already be above zero: incrementing a counter which reached zero means something is using an
    /// object which should already have been destroyed, and panics.
    #[track_caller]
    pub fn increment(&self) -> u32 {
        let prev = self.add();
        if prev <= 0 {
            increment_from_zero();
        }
        Self::after_increment(prev)
    }

    /// Take a share, permitting the count to start at zero.
    ///
    /// This is for the first time a shareable object is handed out.
    #[track_caller]
    pub fn increment0(&self) -> u32 {
        let prev = self.add();
        if prev < 0 {
            increment_from_zero();
        }
        Self::after_increment(prev)
    }

    /// Release a share, returning the new count.
    ///
    /// If this returns 0, the caller held the last share and is now responsible for destroying the owning object.
    #[track_caller]
    #[must_use = "a decrement to 0 means the owner must be destroyed"]
    pub fn decrement(&self) -> u32 {
        let prev = self.sub();
        if prev <= 0 {
            decrement_from_zero();
        }
        (prev - 1) as u32
    }

    /// Release a share, returning whether it was the last one.
    #[track_caller]
    #[must_use = "releasing the last share means the owner must be destroyed"]
    pub fn release(&self) -> bool {
        self.decrement() == 0
    }

    /// Read the current count.
    ///
    /// By the time the caller looks at the value, other threads may have changed it; this is mostly useful for
    /// assertions and for owners which know they are the only remaining user.
    pub fn current(&self) -> u32 {
        self.load().max(0) as u32
    }

    /// Tear down the counter, which must be at zero.
    #[track_caller]
    pub fn destroy(self) {
        let current = self.load();
        assert_eq!(
            current, 0,
            "Attempt to destroy a reference count which still has {} references",
            current
        );
    }

    #[track_caller]
    fn after_increment(prev: i32) -> u32 {
        if prev == i32::MAX {
            overflow();
        }
        (prev + 1) as u32
    }
}
