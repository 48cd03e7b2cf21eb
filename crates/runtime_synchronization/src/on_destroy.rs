//! Tell interested parties when an object goes away.
//!
//! An owning object embeds an [OnDestroy].  Anyone may [OnDestroy::register] a task along with a payload, giving the
//! payload to the notifier.  When the owner is destroyed it calls [OnDestroy::notify], which hands every payload back
//! to its task exactly once, wrapped in a [DestroyEvent] naming the owner.
//!
//! Delivery goes through [TaskDispatch], so the notifier knows nothing about what a task is.  A
//! `crossbeam::channel::Sender` is the simplest one.
use crate::sync::{lock, Mutex};

/// What a task receives when the object it registered with is destroyed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DestroyEvent<S, P> {
    pub sender: S,
    pub payload: P,
}

/// Somewhere to send an event.
pub trait TaskDispatch<E>: Send {
    /// Deliver the event, or give it back if the task can no longer receive events.
    fn dispatch(&self, event: E) -> Result<(), E>;
}

impl<E: Send> TaskDispatch<E> for crossbeam::channel::Sender<E> {
    fn dispatch(&self, event: E) -> Result<(), E> {
        self.send(event).map_err(|e| e.into_inner())
    }
}

struct Waiter<S, P> {
    task: Box<dyn TaskDispatch<DestroyEvent<S, P>>>,
    payload: P,
}

pub struct OnDestroy<S, P> {
    waiters: Mutex<Vec<Waiter<S, P>>>,
}

impl<S: Clone, P> OnDestroy<S, P> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(vec![]),
        }
    }

    pub fn register(&self, task: impl TaskDispatch<DestroyEvent<S, P>> + 'static, payload: P) {
        lock(&self.waiters).push(Waiter {
            task: Box::new(task),
            payload,
        });
    }

    /// Deliver every registered payload, then forget the registrations.
    ///
    /// Returns how many events were delivered.  Events whose task refused them are dropped.
    pub fn notify(&self, sender: S) -> usize {
        // Tasks run arbitrary code, so don't call them with the list locked.
        let waiters = std::mem::take(&mut *lock(&self.waiters));
        let total = waiters.len();

        let mut delivered = 0;
        for w in waiters {
            let event = DestroyEvent {
                sender: sender.clone(),
                payload: w.payload,
            };
            if w.task.dispatch(event).is_ok() {
                delivered += 1;
            }
        }

        log::debug!("Destroy notification delivered {} of {} events", delivered, total);
        if delivered != total {
            log::warn!(
                "{} destroy events could not be delivered and were dropped",
                total - delivered
            );
        }

        delivered
    }

    pub fn waiter_count(&self) -> usize {
        lock(&self.waiters).len()
    }
}

impl<S: Clone, P> Default for OnDestroy<S, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P> std::fmt::Debug for OnDestroy<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDestroy")
            .field("waiters", &lock(&self.waiters).len())
            .finish()
    }
}


#[cfg(all(test, not(loom)))]
mod not_loom_tests {
    use super::*;

    use crossbeam::channel::unbounded;
    use pretty_assertions::assert_eq;

    #[test]
    fn delivers_each_payload_once() {
        let od = OnDestroy::<&'static str, u32>::new();
        let (tx1, rx1) = unbounded();
        let (tx2, rx2) = unbounded();

        od.register(tx1.clone(), 1);
        od.register(tx1, 2);
        od.register(tx2, 3);
        assert_eq!(od.waiter_count(), 3);

        assert_eq!(od.notify("owner"), 3);
        assert_eq!(od.waiter_count(), 0);

        let got = rx1.try_iter().collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![
                DestroyEvent {
                    sender: "owner",
                    payload: 1
                },
                DestroyEvent {
                    sender: "owner",
                    payload: 2
                },
            ]
        );
        assert_eq!(rx2.try_iter().map(|e| e.payload).collect::<Vec<_>>(), vec![3]);

        // The list was cleared, so nothing is delivered twice.
        assert_eq!(od.notify("owner"), 0);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn undeliverable_events_are_dropped() {
        let payload = std::sync::Arc::new(());
        let od = OnDestroy::new();
        let (tx, rx) = unbounded();
        let (dead_tx, dead_rx) = unbounded();
        drop(dead_rx);

        od.register(tx, payload.clone());
        od.register(dead_tx, payload.clone());
        assert_eq!(std::sync::Arc::strong_count(&payload), 3);

        assert_eq!(od.notify(()), 1);
        assert_eq!(od.waiter_count(), 0);
        // The refused payload was released; the delivered one sits in the channel.
        assert_eq!(std::sync::Arc::strong_count(&payload), 2);
        drop(rx);
        assert_eq!(std::sync::Arc::strong_count(&payload), 1);
    }
}
