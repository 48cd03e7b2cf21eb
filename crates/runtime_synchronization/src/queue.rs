//! An intrusive FIFO with separate locks for each end.
//!
//! Elements embed a [QueueLink] and are handed to the queue as `Arc<T>`; while linked, the queue owns one strong
//! reference, which [ConcurrentQueue::pop] and the unlink functions give back.  Pushes go to the tail under the tail
//! lock and pops come from the head under the head lock, so with more than one element queued a push and a pop never
//! contend.
//!
//! # Lock ordering
//!
//! Whenever both locks are needed, the head lock is taken first.  All such paths go through
//! [ConcurrentQueue::lock_ends]:
//!
//! - A push into an empty queue must also set the head.  It drops the tail lock and takes both.
//! - A pop of the last element must clear the tail.  It already holds the head lock, and adds the tail lock.
//! - Unlinking may touch either end, and takes both.
//!
//! Locks are released in the reverse order.
//!
//! # Link state
//!
//! A link is either [LinkState::Unlinked] or [LinkState::Linked] to a particular queue.  The state only changes with
//! the locks held that exclude every other writer of the link: pushes claim it under the tail lock (plus the head lock
//! if the queue was empty), pops release it under the head lock, and unlinks run under both.  Anything holding both
//! locks therefore sees either a fully linked element or one which isn't in the queue at all.
//!
//! The `next` pointer of the tail element is the one place where the two ends meet: a push writes it under the tail
//! lock while a pop may read it under the head lock.  The links are atomics for that reason.
use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::ptr::{null_mut, NonNull};
use std::sync::Arc;

use crate::optional_atomic_u64::OptionalAtomicU64;
use crate::sync::{lock, AtomicPtr, AtomicU64, Mutex, MutexGuard, Ordering};

/// Identifies one queue, for the lifetime of the process.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct QueueId(NonZeroU64);

impl QueueId {
    fn next() -> QueueId {
        #[cfg(not(loom))]
        static NEXT: AtomicU64 = AtomicU64::new(1);

        #[cfg(loom)]
        loom::lazy_static! {
            static ref NEXT: AtomicU64 = AtomicU64::new(1);
        }

        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        QueueId(NonZeroU64::new(id).expect("Queue ids never wrap in practice"))
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether an element is in a queue, and which.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LinkState {
    Unlinked,
    Linked(QueueId),
}

/// The part of an element which a [ConcurrentQueue] threads through.
pub struct QueueLink<T> {
    owner: OptionalAtomicU64,
    prev: AtomicPtr<T>,
    next: AtomicPtr<T>,
}

impl<T> QueueLink<T> {
    pub fn new() -> Self {
        Self {
            owner: OptionalAtomicU64::new(None),
            prev: AtomicPtr::new(null_mut()),
            next: AtomicPtr::new(null_mut()),
        }
    }

    pub fn state(&self) -> LinkState {
        match self.owner.load(Ordering::Acquire) {
            None => LinkState::Unlinked,
            Some(id) => LinkState::Linked(QueueId(id)),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.state() != LinkState::Unlinked
    }

    fn is_linked_to(&self, id: QueueId) -> bool {
        self.owner.load(Ordering::Acquire) == Some(id.0)
    }

    /// Forget the neighbors, then publish that the element is free.
    fn reset(&self) {
        self.prev.store(null_mut(), Ordering::Relaxed);
        self.next.store(null_mut(), Ordering::Relaxed);
        self.owner.store(None, Ordering::Release);
    }
}

impl<T> Default for QueueLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for QueueLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLink")
            .field("state", &self.state())
            .finish()
    }
}

/// Something which can be put in a [ConcurrentQueue].
///
/// # Safety
///
/// `queue_link` must return a reference to a link stored inside `self`, and the same link on every call.  The queue
/// follows raw pointers between elements through these links.
pub unsafe trait Linked: Sized + Send + Sync {
    fn queue_link(&self) -> &QueueLink<Self>;
}

/// One end of the queue.
struct End<T>(Option<NonNull<T>>);

// The pointers are only followed with the end's lock held, and point at `Arc`s of `Send + Sync` elements owned by the
// queue.
unsafe impl<T: Send + Sync> Send for End<T> {}

impl<T> End<T> {
    fn as_ptr(&self) -> *mut T {
        self.0.map(NonNull::as_ptr).unwrap_or(null_mut())
    }
}

/// # Safety
///
/// `ptr` must be an element currently owned by a queue, or otherwise known to be alive for `'a`.
unsafe fn link_of<'a, T: Linked>(ptr: NonNull<T>) -> &'a QueueLink<T> {
    (*ptr.as_ptr()).queue_link()
}

pub struct ConcurrentQueue<T: Linked> {
    id: QueueId,
    head: Mutex<End<T>>,
    tail: Mutex<End<T>>,
    _owns: PhantomData<Arc<T>>,
}

type EndGuard<'a, T> = MutexGuard<'a, End<T>>;

impl<T: Linked> ConcurrentQueue<T> {
    pub fn new() -> Self {
        Self {
            id: QueueId::next(),
            head: Mutex::new(End(None)),
            tail: Mutex::new(End(None)),
            _owns: PhantomData,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Take both locks, head first.
    ///
    /// This is the only place both locks are acquired together.  Callers release the tail guard before the head guard.
    fn lock_ends(&self) -> (EndGuard<'_, T>, EndGuard<'_, T>) {
        let head = lock(&self.head);
        let tail = lock(&self.tail);
        (head, tail)
    }

    /// Is the queue empty?
    ///
    /// With concurrent pushes and pops this may be stale by the time it returns.
    pub fn is_empty(&self) -> bool {
        lock(&self.head).0.is_none()
    }

    /// Append an element.
    ///
    /// Panics if the element is already linked into this or any other queue.
    #[track_caller]
    pub fn push(&self, elt: Arc<T>) {
        let (mut head, mut tail) = {
            let tail = lock(&self.tail);
            if tail.0.is_some() {
                (None, tail)
            } else {
                // The push will have to set the head, and the head lock comes first.
                drop(tail);
                let (head, tail) = self.lock_ends();
                (Some(head), tail)
            }
        };

        let raw = Arc::into_raw(elt) as *mut T;
        // The queue keeps the reference we just released.
        let link = unsafe { (*raw).queue_link() };

        if let Err(owner) =
            link.owner
                .compare_exchange(None, Some(self.id.0), Ordering::AcqRel, Ordering::Acquire)
        {
            drop(tail);
            drop(head);
            drop(unsafe { Arc::from_raw(raw) });
            panic!(
                "Attempt to push an element which is already linked into queue {}",
                owner.map(|x| x.get()).unwrap_or(0)
            );
        }

        link.prev.store(tail.as_ptr(), Ordering::Relaxed);
        link.next.store(null_mut(), Ordering::Relaxed);

        if let Some(old_tail) = tail.0 {
            // Publishes the element to a popper which reaches it from the head side.
            unsafe { link_of(old_tail) }
                .next
                .store(raw, Ordering::Release);
        }
        tail.0 = NonNull::new(raw);

        if let Some(head) = head.as_mut() {
            if head.0.is_none() {
                head.0 = tail.0;
            }
        }

        drop(tail);
        drop(head);
    }

    /// Remove the element at the head, or return `None` if the queue is empty.
    ///
    /// Never blocks waiting for an element to arrive.
    pub fn pop(&self) -> Option<Arc<T>> {
        let mut head = lock(&self.head);
        let first = head.0?;
        let link = unsafe { link_of(first) };

        let mut next = link.next.load(Ordering::Acquire);
        if next.is_null() {
            // This looks like the last element, but a push may be appending to it under the tail lock right now.
            let mut tail = lock(&self.tail);
            next = link.next.load(Ordering::Acquire);
            if next.is_null() {
                head.0 = None;
                tail.0 = None;
            }
            drop(tail);
        }

        if let Some(next) = NonNull::new(next) {
            unsafe { link_of(next) }
                .prev
                .store(null_mut(), Ordering::Relaxed);
            head.0 = Some(next);
        }

        link.reset();
        drop(head);

        Some(unsafe { Arc::from_raw(first.as_ptr()) })
    }

    /// Remove an element from anywhere in the queue.
    ///
    /// Panics if the element is not linked into this queue.
    #[track_caller]
    pub fn unlink(&self, elt: &T) -> Arc<T> {
        match self.unlink_if_linked(elt) {
            Some(x) => x,
            None => panic!(
                "Attempt to unlink an element which is not linked into queue {} (state: {:?})",
                self.id,
                elt.queue_link().state()
            ),
        }
    }

    /// Remove an element if it is linked into this queue; otherwise do nothing.
    ///
    /// Useful for cleanup when the caller doesn't know whether the element was already popped.
    pub fn unlink_if_linked(&self, elt: &T) -> Option<Arc<T>> {
        let link = elt.queue_link();
        let (mut head, mut tail) = self.lock_ends();

        if !link.is_linked_to(self.id) {
            drop(tail);
            drop(head);
            return None;
        }

        let prev = link.prev.load(Ordering::Relaxed);
        let next = link.next.load(Ordering::Acquire);

        match NonNull::new(prev) {
            None => head.0 = NonNull::new(next),
            Some(p) => unsafe { link_of(p) }.next.store(next, Ordering::Release),
        }

        match NonNull::new(next) {
            None => tail.0 = NonNull::new(prev),
            Some(n) => unsafe { link_of(n) }.prev.store(prev, Ordering::Relaxed),
        }

        link.reset();
        drop(tail);
        drop(head);

        Some(unsafe { Arc::from_raw(elt as *const T) })
    }

    /// Tear down the queue, which must be empty.
    #[track_caller]
    pub fn destroy(self) {
        assert!(
            self.is_empty(),
            "Attempt to destroy queue {} while elements are still linked",
            self.id
        );
    }
}

impl<T: Linked> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> std::fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T: Linked> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        let mut released = 0usize;
        while self.pop().is_some() {
            released += 1;
        }

        if released != 0 {
            log::warn!(
                "Queue {} dropped with {} elements still linked; releasing them",
                self.id,
                released
            );
        }
    }
}
