//! Tests run against every [ReaderWriterLock] implementation.
use super::*;

use crate::error::WouldBlock;
use crate::sync::{spawn, Arc, AtomicBool, AtomicUsize, Ordering};

fn writer_and_reader_loom<L: ReaderWriterLock + 'static>() {
    crate::sync::wrap_test(|| {
        let lock = Arc::new(L::new());
        let value = Arc::new(AtomicUsize::new(0));

        let writer = {
            let lock = lock.clone();
            let value = value.clone();
            spawn(move || {
                let _g = lock.write();
                // Two relaxed stores: a reader must never see the intermediate value.
                value.store(1, Ordering::Relaxed);
                value.store(2, Ordering::Relaxed);
            })
        };

        {
            let _g = lock.read();
            let seen = value.load(Ordering::Relaxed);
            assert!(seen == 0 || seen == 2, "Reader saw a write in progress: {}", seen);
        }

        writer.join().unwrap();
        assert_eq!(value.load(Ordering::Relaxed), 2);
    });
}

fn try_lock_conflicts<L: ReaderWriterLock + 'static>() {
    crate::sync::wrap_test(|| {
        let lock = L::new();

        let w = lock.write();
        assert_eq!(lock.try_lock(LockMode::Read), Err(WouldBlock));
        assert_eq!(lock.try_lock(LockMode::Write), Err(WouldBlock));
        drop(w);

        let r1 = lock.read();
        let r2 = lock.try_read().expect("Readers share the lock");
        assert!(lock.try_write().is_err());
        drop(r1);
        drop(r2);

        assert!(lock.try_write().is_ok());
    });
}

fn upgrade_fails_with_other_readers<L: ReaderWriterLock + 'static>() {
    crate::sync::wrap_test(|| {
        let lock = L::new();

        let r1 = lock.read();
        let r2 = lock.read();
        let r1 = match r1.try_upgrade() {
            Ok(_) => panic!("Upgraded while another reader was present"),
            Err(r) => r,
        };
        drop(r2);

        let w = match r1.try_upgrade() {
            Ok(w) => w,
            Err(_) => panic!("Sole reader must be able to upgrade"),
        };
        assert_eq!(lock.try_lock(LockMode::Read), Err(WouldBlock));

        // Round trip: back to being the sole reader.
        let r = w.downgrade();
        assert!(lock.try_write().is_err());
        drop(r);

        assert!(lock.try_write().is_ok());
    });
}

fn downgrade_keeps_writers_out<L: ReaderWriterLock + 'static>() {
    crate::sync::wrap_test(|| {
        let lock = L::new();

        let r = lock.write().downgrade();
        assert_eq!(lock.try_lock(LockMode::Write), Err(WouldBlock));
        drop(r);

        lock.lock(LockMode::Write);
        lock.unlock(LockMode::Write);
    });
}

#[cfg(not(loom))]
mod stress {
    use super::*;

    use std::sync::Barrier;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// With no writers, every reader gets in at once: all of them must hold the lock at the barrier, or the test
    /// deadlocks.
    pub(super) fn concurrent_readers<L: ReaderWriterLock>() {
        const READERS: usize = 8;

        init_logging();
        let lock = L::new();
        let barrier = Barrier::new(READERS);

        crossbeam::scope(|s| {
            for _ in 0..READERS {
                s.spawn(|_| {
                    let _g = lock.read();
                    barrier.wait();
                });
            }
        })
        .unwrap();

        assert!(lock.try_write().is_ok());
    }

    /// Writers and readers hammer the lock while recording who is inside.  No reader may ever see a writer, and no
    /// writer may ever see anyone.
    pub(super) fn mutual_exclusion<L: ReaderWriterLock>(quotas: RwLockQuotas) {
        const READERS: usize = 6;
        const WRITERS: usize = 3;
        const ROUNDS: usize = 2000;

        init_logging();
        let lock = L::with_quotas(quotas);
        let readers_inside = AtomicUsize::new(0);
        let writer_inside = AtomicBool::new(false);
        let writes = AtomicUsize::new(0);

        crossbeam::scope(|s| {
            for _ in 0..READERS {
                s.spawn(|_| {
                    for _ in 0..ROUNDS {
                        let _g = lock.read();
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        assert!(!writer_inside.load(Ordering::SeqCst));
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }

            for _ in 0..WRITERS {
                s.spawn(|_| {
                    for i in 0..ROUNDS {
                        let g = if i % 3 == 0 {
                            // Exercise the queue-jumping path too.
                            loop {
                                if let Ok(g) = lock.try_write() {
                                    break g;
                                }
                                crate::sync::yield_now();
                            }
                        } else {
                            lock.write()
                        };

                        assert!(!writer_inside.swap(true, Ordering::SeqCst));
                        assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                        writes.fetch_add(1, Ordering::Relaxed);

                        if i % 5 == 0 {
                            // Hand over to readers without letting another writer in.
                            writer_inside.store(false, Ordering::SeqCst);
                            let r = g.downgrade();
                            assert_eq!(lock.try_lock(LockMode::Write), Err(WouldBlock));
                            drop(r);
                        } else {
                            writer_inside.store(false, Ordering::SeqCst);
                            drop(g);
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(writes.load(Ordering::Relaxed), WRITERS * ROUNDS);
    }

    /// A writer queued behind a reader gets in even though readers never stop arriving.
    pub(super) fn writer_not_starved<L: ReaderWriterLock>() {
        const READERS: usize = 4;

        init_logging();
        let lock = L::with_quotas(RwLockQuotas::new(1, 1));
        let writer_done = AtomicBool::new(false);
        let readers_inside = AtomicUsize::new(0);

        let first = lock.read();

        crossbeam::scope(|s| {
            s.spawn(|_| {
                let _g = lock.write();
                assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                writer_done.store(true, Ordering::SeqCst);
            });

            for _ in 0..READERS {
                s.spawn(|_| {
                    while !writer_done.load(Ordering::SeqCst) {
                        let _g = lock.read();
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        std::thread::yield_now();
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }

            // Give the writer time to queue up behind us, then let go.
            std::thread::sleep(Duration::from_millis(50));
            drop(first);
        })
        .unwrap();

        assert!(writer_done.load(Ordering::SeqCst));
    }

    /// A reader gets in even though writers never stop arriving.
    pub(super) fn reader_not_starved<L: ReaderWriterLock>() {
        const WRITERS: usize = 3;

        init_logging();
        let lock = L::with_quotas(RwLockQuotas::new(1, 1));
        let reader_done = AtomicBool::new(false);
        let writes = AtomicUsize::new(0);
        let writer_inside = AtomicBool::new(false);

        crossbeam::scope(|s| {
            for _ in 0..WRITERS {
                s.spawn(|_| {
                    while !reader_done.load(Ordering::SeqCst) {
                        let _g = lock.write();
                        writer_inside.store(true, Ordering::SeqCst);
                        writes.fetch_add(1, Ordering::Relaxed);
                        std::thread::yield_now();
                        writer_inside.store(false, Ordering::SeqCst);
                    }
                });
            }

            // Make sure the writers are going before we queue up.
            while writes.load(Ordering::Relaxed) < 100 {
                std::thread::yield_now();
            }

            let g = lock.read();
            assert!(!writer_inside.load(Ordering::SeqCst));
            reader_done.store(true, Ordering::SeqCst);
            drop(g);
        })
        .unwrap();

        assert!(reader_done.load(Ordering::SeqCst));
    }

    pub(super) fn unlock_unheld_read_faults<L: ReaderWriterLock>() {
        let lock = L::new();
        lock.unlock(LockMode::Read);
    }

    pub(super) fn unlock_wrong_mode_faults<L: ReaderWriterLock>() {
        let lock = L::new();
        lock.lock(LockMode::Read);
        lock.unlock(LockMode::Write);
    }

    pub(super) fn downgrade_unheld_faults<L: ReaderWriterLock>() {
        let lock = L::new();
        lock.lock(LockMode::Read);
        lock.downgrade();
    }
}

macro_rules! lock_tests {
    ($($name: ident => $lock: ty),* $(,)?) => {
        $(
            mod $name {
                use super::*;

                #[test]
                fn writer_and_reader() {
                    writer_and_reader_loom::<$lock>();
                }

                #[test]
                fn try_lock_conflicts() {
                    super::try_lock_conflicts::<$lock>();
                }

                #[test]
                fn upgrade_fails_with_other_readers() {
                    super::upgrade_fails_with_other_readers::<$lock>();
                }

                #[test]
                fn downgrade_keeps_writers_out() {
                    super::downgrade_keeps_writers_out::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                fn concurrent_readers() {
                    stress::concurrent_readers::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                fn mutual_exclusion_default_quotas() {
                    stress::mutual_exclusion::<$lock>(RwLockQuotas::default());
                }

                #[cfg(not(loom))]
                #[test]
                fn mutual_exclusion_quota_of_one() {
                    stress::mutual_exclusion::<$lock>(RwLockQuotas::new(1, 1));
                }

                #[cfg(not(loom))]
                #[test]
                fn writer_not_starved() {
                    stress::writer_not_starved::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                fn reader_not_starved() {
                    stress::reader_not_starved::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                #[should_panic(expected = "not held")]
                fn unlock_unheld_read_faults() {
                    stress::unlock_unheld_read_faults::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                #[should_panic(expected = "not held")]
                fn unlock_wrong_mode_faults() {
                    stress::unlock_wrong_mode_faults::<$lock>();
                }

                #[cfg(not(loom))]
                #[test]
                #[should_panic(expected = "not held")]
                fn downgrade_unheld_faults() {
                    stress::downgrade_unheld_faults::<$lock>();
                }
            }
        )*
    };
}

#[cfg(target_has_atomic = "32")]
lock_tests!(atomic_lock => AtomicRwLock);
lock_tests!(quota_lock => QuotaRwLock);

#[cfg(all(not(loom), target_has_atomic = "32"))]
#[test]
#[should_panic(expected = "in use")]
fn destroy_held_atomic_lock_faults() {
    let lock = AtomicRwLock::new();
    lock.lock(LockMode::Read);
    lock.destroy();
}

#[cfg(not(loom))]
#[test]
#[should_panic(expected = "in use")]
fn destroy_held_quota_lock_faults() {
    let lock = QuotaRwLock::new();
    lock.lock(LockMode::Write);
    lock.destroy();
}
