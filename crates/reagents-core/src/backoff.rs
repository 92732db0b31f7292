//! A thin wrapper over [`crossbeam_utils::Backoff`], the exponential
//! spin/yield helper the specification treats as an external collaborator
//! consumed by the driver (spec §6) rather than part of the reagent
//! algebra itself.

use crossbeam_utils::Backoff as CrossbeamBackoff;

/// One back-off sequence, reused across the retries of a single `run`/`try_run` call.
pub(crate) struct Backoff {
    inner: CrossbeamBackoff,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { inner: CrossbeamBackoff::new() }
    }

    /// Unconditional one step: spin a little, then yield to the scheduler
    /// once `crossbeam_utils` decides spinning has stopped paying off.
    pub(crate) fn once(&self) {
        self.inner.snooze();
    }

    /// Conditional step: only spins while `cond` holds, checked once before
    /// the spin-wait. Used by the driver to avoid waiting on a waiter that
    /// a partner has already disposed of, or that `snoop` reports as
    /// hopeless to keep spinning on.
    pub(crate) fn once_if(&self, cond: impl FnOnce() -> bool) {
        if cond() {
            self.once();
        }
    }
}
