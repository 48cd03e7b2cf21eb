use std::num::NonZeroU64;

use crate::sync::{AtomicU64, Ordering};

/// Like `AtomicU64`, but holding an `Option<NonZeroU64>`.
///
/// Concurrent data structures sometimes need an atomic which is either empty or holds an identifier.  Restricting the
/// identifier to be non-zero lets `None` be 0 with no translation, and keeps callers from ever confusing "nothing" with
/// a real value.
#[derive(Debug, Default)]
pub struct OptionalAtomicU64 {
    inner: AtomicU64,
}

fn transform_in(opt: Option<NonZeroU64>) -> u64 {
    opt.map(NonZeroU64::get).unwrap_or(0)
}

fn transform_out(input: u64) -> Option<NonZeroU64> {
    NonZeroU64::new(input)
}

impl OptionalAtomicU64 {
    pub fn new(value: Option<NonZeroU64>) -> Self {
        Self {
            inner: AtomicU64::new(transform_in(value)),
        }
    }

    pub fn load(&self, ordering: Ordering) -> Option<NonZeroU64> {
        transform_out(self.inner.load(ordering))
    }

    pub fn store(&self, value: Option<NonZeroU64>, ordering: Ordering) {
        self.inner.store(transform_in(value), ordering)
    }

    pub fn compare_exchange(
        &self,
        current: Option<NonZeroU64>,
        new: Option<NonZeroU64>,
        success_ordering: Ordering,
        fail_ordering: Ordering,
    ) -> Result<Option<NonZeroU64>, Option<NonZeroU64>> {
        let cur = transform_in(current);
        let n = transform_in(new);
        self.inner
            .compare_exchange(cur, n, success_ordering, fail_ordering)
            .map(transform_out)
            .map_err(transform_out)
    }
}
