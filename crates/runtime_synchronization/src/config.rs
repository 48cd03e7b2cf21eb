//! Tunables shared by the lock implementations.

/// Grants of read mode a [crate::rwlock::QuotaRwLock] makes while writers wait, before it switches to writing.
pub const DEFAULT_READ_QUOTA: u32 = 4;

/// Grants of write mode a lock makes while readers wait, before it lets the readers in.
pub const DEFAULT_WRITE_QUOTA: u32 = 4;

/// Upper bound on the pauses `lock` spends retrying `try_lock` before it blocks.
#[cfg(not(loom))]
pub const MAX_ADAPTIVE_SPINS: i32 = 100;

/// Pauses `lock` always allows, on top of twice the running spin estimate.
#[cfg(not(loom))]
pub const ADAPTIVE_SPIN_BASE: i32 = 10;

// Under loom every pause is a scheduling point, and spinning explodes the state space without exercising anything the
// blocking path doesn't.
#[cfg(loom)]
pub const MAX_ADAPTIVE_SPINS: i32 = 0;

#[cfg(loom)]
pub const ADAPTIVE_SPIN_BASE: i32 = 0;

/// Fairness quotas for a reader-writer lock.
///
/// A quota of 0 means "use the default".  [crate::rwlock::AtomicRwLock] only honors the write quota; readers there
/// are bounded by writer preference instead.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RwLockQuotas {
    pub read_quota: u32,
    pub write_quota: u32,
}

impl RwLockQuotas {
    pub const fn new(read_quota: u32, write_quota: u32) -> Self {
        Self {
            read_quota,
            write_quota,
        }
    }

    pub fn effective_read_quota(&self) -> u32 {
        if self.read_quota == 0 {
            DEFAULT_READ_QUOTA
        } else {
            self.read_quota
        }
    }

    pub fn effective_write_quota(&self) -> u32 {
        if self.write_quota == 0 {
            DEFAULT_WRITE_QUOTA
        } else {
            self.write_quota
        }
    }
}

/// Compute how many pauses `lock` may spend before blocking, given the lock's running estimate.
pub(crate) fn spin_budget(spins: i32) -> i32 {
    spins
        .saturating_mul(2)
        .saturating_add(ADAPTIVE_SPIN_BASE)
        .min(MAX_ADAPTIVE_SPINS)
}

/// Move the running estimate an eighth of the way toward the pauses actually spent.
pub(crate) fn next_spin_estimate(spins: i32, spent: i32) -> i32 {
    spins + (spent - spins) / 8
}
