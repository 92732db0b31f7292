//! `Ref<T>`: a mutex-guarded cell that participates in a reagent's
//! multi-word commit via [`reagents_core::CasOp`].
//!
//! Internally a `Ref` holds an `Arc<T>` rather than a bare `T`, so that a
//! snapshot taken during the optimistic try phase can be compared by
//! pointer identity at commit time -- the same technique a persistent
//! atom-style cell uses to avoid requiring `T: PartialEq` just to detect
//! "did anything change since I read this". `cas`, which does want value
//! equality against a caller-supplied expected value, layers that
//! comparison on top during the try phase instead.

use std::sync::{Arc, Mutex};

use reagents_core::{Backtrack, CasOp, Reaction, R};

/// A single mutable cell, shared across threads, that reagents built from
/// [`Ref::read`]/[`Ref::upd`]/[`Ref::cas`] can read and conditionally
/// update as part of a larger composite reaction.
pub struct Ref<T> {
    value: Mutex<Arc<T>>,
}

impl<T> Ref<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(initial: T) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(Arc::new(initial)),
        })
    }

    /// Direct, non-reagent snapshot read. Useful for inspection outside of
    /// any reaction (logging, tests); reagents composed from a `Ref`
    /// should use [`Ref::read`] instead.
    pub fn get(&self) -> Arc<T> {
        self.snapshot()
    }

    fn snapshot(&self) -> Arc<T> {
        #[allow(clippy::expect_used)]
        self.value.lock().expect("Ref mutex poisoned").clone()
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// A reagent that reacts with the cell's current value. Never
    /// backtracks: an unconditional read can never lose a race in a way
    /// that matters to the caller.
    pub fn read(self: &Arc<Self>) -> R<(), Arc<T>> {
        let this = self.clone();
        reagents_core::lift(move |()| this.snapshot())
    }

    /// A reagent that replaces the cell's contents with `f(current)`,
    /// reacting with the new value. Backtracks with `Retry` if a
    /// concurrent writer committed a different value after this attempt's
    /// read.
    pub fn upd<F>(self: &Arc<Self>, f: F) -> R<(), Arc<T>>
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        self.upd_with(move |t| {
            let new = Arc::new(f(t));
            (new.clone(), new)
        })
    }

    /// General update: `f` sees the current value and returns both the
    /// next value to store and an arbitrary result to react with. The
    /// write is staged into the ambient reaction rather than committed on
    /// the spot, so it participates atomically in whatever larger
    /// composite reagent this one is part of.
    pub fn upd_with<F, B>(self: &Arc<Self>, f: F) -> R<(), B>
    where
        F: Fn(&T) -> (Arc<T>, B) + Send + Sync + 'static,
        B: Send + Sync + Clone + 'static,
    {
        let this = self.clone();
        // Never blocks -- an unconditional update always finds *some*
        // current value to react against, so `snoop` can unconditionally
        // report "ready" and let the driver skip a pointless back-off.
        reagents_core::from_fn_with_snoop(
            move |(), rx, _offer| {
                let old = this.snapshot();
                let (new_value, result) = f(&old);
                rx.with_cas(Arc::new(PtrCas {
                    cell: this.clone(),
                    expected: old,
                    new_value,
                }));
                Ok(result)
            },
            |()| true,
        )
    }

    /// A reagent that succeeds with `()` only if the cell currently holds
    /// a value equal to `expected`, atomically replacing it with
    /// `new_value`; otherwise backtracks with `Retry`.
    pub fn cas(self: &Arc<Self>, expected: T, new_value: T) -> R<(), ()>
    where
        T: PartialEq + Clone,
    {
        let this = self.clone();
        let probe = this.clone();
        let snoop_expected = expected.clone();
        reagents_core::from_fn_with_snoop(
            move |(), rx, _offer| {
                let old = this.snapshot();
                if *old != expected {
                    tracing::trace!(addr = this.addr(), "Ref::cas saw a stale expected value, retrying");
                    return Err(Backtrack::Retry);
                }
                rx.with_cas(Arc::new(PtrCas {
                    cell: this.clone(),
                    expected: old,
                    new_value: Arc::new(new_value.clone()),
                }));
                Ok(())
            },
            move |()| *probe.snapshot() == snoop_expected,
        )
    }
}

/// A tentative write staged against a [`Ref`], verified by pointer
/// identity against the snapshot the attempt read from.
struct PtrCas<T> {
    cell: Arc<Ref<T>>,
    expected: Arc<T>,
    new_value: Arc<T>,
}

impl<T> CasOp for PtrCas<T>
where
    T: Send + Sync + 'static,
{
    fn addr(&self) -> usize {
        self.cell.addr()
    }

    fn commit_with(&self, inner: &mut dyn FnMut() -> bool) -> bool {
        #[allow(clippy::expect_used)]
        let mut guard = self.cell.value.lock().expect("Ref mutex poisoned");
        if !Arc::ptr_eq(&guard, &self.expected) {
            tracing::trace!(addr = self.cell.addr(), "Ref commit lost the race, another writer got there first");
            return false;
        }
        if !inner() {
            return false;
        }
        *guard = self.new_value.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reagents_core::{Reagent, ReagentExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn read_reacts_with_current_value() {
        let cell = Ref::new(41);
        assert_eq!(*cell.read().run(()), 41);
    }

    #[test]
    fn upd_applies_the_function_and_reacts_with_the_new_value() {
        let cell = Ref::new(10);
        let result = cell.upd(|n| n + 1).run(());
        assert_eq!(*result, 11);
        assert_eq!(*cell.get(), 11);
    }

    #[test]
    fn cas_succeeds_only_against_the_expected_value() {
        let cell = Ref::new(1);
        assert_eq!(cell.cas(2, 3).try_run(()), None);
        assert_eq!(*cell.get(), 1);

        assert_eq!(cell.cas(1, 3).try_run(()), Some(()));
        assert_eq!(*cell.get(), 3);
    }

    #[test]
    fn concurrent_incrementers_never_lose_an_update() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 200;

        let cell = Ref::new(0usize);
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    let upd = cell.upd(|n| n + 1);
                    for _ in 0..PER_THREAD {
                        upd.run(());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("incrementer panicked");
        }

        assert_eq!(*cell.get(), THREADS * PER_THREAD);
    }

    #[test]
    fn upd_snoop_never_reports_not_ready() {
        let cell = Ref::new(AtomicUsize::new(0));
        let r = cell.upd_with(|n: &AtomicUsize| {
            let next = n.load(Ordering::SeqCst) + 1;
            (Arc::new(AtomicUsize::new(next)), next)
        });
        assert!(r.snoop(&()));
    }
}
