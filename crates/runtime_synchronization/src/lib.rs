//! Low-level synchronization primitives for a highly concurrent runtime.
//!
//! This crate provides:
//!
//! - [rwlock]: a reader-writer lock tuned for read-heavy workloads, with an atomic fast path and a mutex-only fallback
//!   for targets without 32-bit atomics.  Both bound how many grants of one mode happen in a row while the other mode
//!   waits.
//! - [queue]: an intrusive FIFO with one lock per end, so that producers and consumers rarely contend.
//! - [refcount]: an atomic reference count which treats misuse (going below zero, reviving a dead object) as fatal.
//! - [on_destroy]: a way for third parties to be told when an object is destroyed.
//!
//! Misuse of any primitive panics with a message describing what went wrong.  Outcomes callers are expected to handle,
//! like a lock which is busy, come back as [WouldBlock] or `None`.
//!
//! Everything is aware of loom if `--cfg=loom` is passed to the compiler.
pub mod config;
pub mod error;
pub mod on_destroy;
#[cfg(target_has_atomic = "64")]
pub mod queue;
pub mod refcount;
pub mod rwlock;

#[cfg(target_has_atomic = "64")]
mod optional_atomic_u64;
mod sync;

pub use config::RwLockQuotas;
pub use error::WouldBlock;
pub use on_destroy::{DestroyEvent, OnDestroy, TaskDispatch};
#[cfg(target_has_atomic = "64")]
pub use queue::{ConcurrentQueue, LinkState, Linked, QueueId, QueueLink};
pub use refcount::RefCount;
pub use rwlock::{LockMode, ReadGuard, ReaderWriterLock, RwLock, WriteGuard};
