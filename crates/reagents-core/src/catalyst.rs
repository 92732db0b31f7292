//! Catalysts: installing a reagent as a standing, background rendezvous
//! partner instead of running it once from the calling thread.

use std::sync::Arc;
use std::thread;

use crate::backoff::Backoff;
use crate::offer::{Catalyst, Offer};
use crate::reaction::Reaction;
use crate::reagent::{Backtrack, Reagent, R};

/// Fatal, unrecoverable invariant violations raised by the catalyst
/// machinery (spec §7: "truly exceptional conditions ... are fatal: they
/// signal an unrecoverable invariant violation and should terminate the
/// reagent"). These are never returned to a caller as a `Result` -- a
/// malformed reagent is a programming error, not a runtime condition a
/// caller could sensibly recover from -- but giving the condition a proper
/// `Display` via `thiserror` keeps the panic message and any future
/// diagnostics consistent.
#[derive(Debug, thiserror::Error)]
pub enum DissolveFault {
    /// Spec §4.6: `dissolve` requires the reagent's very first attempt
    /// under its fresh catalyst to return `Block`. A reagent that commits
    /// immediately doesn't need a standing rendezvous partner at all.
    #[error(
        "dissolve: reagent committed on its first attempt instead of blocking; \
         dissolve is only for reagents that need a standing rendezvous partner"
    )]
    CommittedOnFirstAttempt,
}

/// A handle to a dissolved catalyst. Dropping it does not stop the
/// background thread; call [`CatalystHandle::retire`] explicitly.
pub struct CatalystHandle {
    catalyst: Arc<Catalyst>,
}

impl CatalystHandle {
    /// Retires the catalyst: the background thread notices on its next
    /// attempt and exits instead of re-offering.
    pub fn retire(&self) {
        self.catalyst.retire();
    }
}

/// Installs `r` as a background catalyst (spec §4.6): spawns a thread that
/// repeatedly offers `r` for other reactions to rendezvous with, forever,
/// until [`CatalystHandle::retire`] is called.
///
/// `r` must report `Block` the first time it is attempted under the fresh
/// catalyst's offer -- a reagent that can commit on its own needs no
/// catalyst and dissolving one that doesn't block is a programming error,
/// not a recoverable runtime condition, so this panics rather than
/// returning a `Result`.
pub fn dissolve<A, B>(r: R<A, B>, a: A) -> CatalystHandle
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    let catalyst = Catalyst::new();
    let handle = CatalystHandle { catalyst: catalyst.clone() };

    thread::spawn(move || {
        let offer = Offer::Catalyst(catalyst.clone());
        let backoff = Backoff::new();
        let mut first_attempt = true;
        tracing::debug!("catalyst thread started");

        while catalyst.is_alive() {
            let mut rx = Reaction::inert();
            match r.try_react(a.clone(), &mut rx, Some(&offer)) {
                Ok(_b) => {
                    if first_attempt {
                        panic!("{}", DissolveFault::CommittedOnFirstAttempt);
                    }
                    if !rx.try_commit() {
                        backoff.once();
                    }
                    // A committed catalyst round re-offers immediately;
                    // the loop condition re-checks `alive` on each pass.
                }
                Err(Backtrack::Retry) => backoff.once(),
                Err(Backtrack::Block) => {
                    // Expected, and in fact required, on the first
                    // attempt: a catalyst exists precisely to sit blocked
                    // and wait for a rendezvous partner.
                    backoff.once_if(|| catalyst.is_alive());
                }
            }
            first_attempt = false;
        }
        tracing::debug!("catalyst thread retired");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::ReagentExt;
    use crate::offer::{Waiter, WaiterComplete};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// A minimal hand-rolled rendezvous pool, just enough to dissolve a
    /// catalyst against: producers publish a waiter, the dissolved reagent
    /// answers it and post-commits a counter increment. Deliberately
    /// smaller than `reagents-cells`'s `SwapChan` -- this crate has no
    /// dependency on cell/channel implementations (spec §1), so its own
    /// tests build the tiniest external collaborator that exercises
    /// dissolve end-to-end (spec §8, scenario S6).
    struct TinyQueue {
        pending: Mutex<Vec<Arc<Waiter>>>,
    }

    impl TinyQueue {
        fn new() -> Arc<Self> {
            Arc::new(Self { pending: Mutex::new(Vec::new()) })
        }

        /// Reagent a standing catalyst consumes: answers the oldest live
        /// waiter in the pool, or blocks if none is waiting.
        fn consume(self: &Arc<Self>) -> R<(), ()> {
            let this = self.clone();
            crate::combinators::from_fn(move |(), rx, _offer| {
                let mut pending = this.pending.lock().unwrap();
                while let Some(waiter) = pending.first().cloned() {
                    pending.remove(0);
                    if waiter.is_waiting() {
                        rx.with_cas(Arc::new(WaiterComplete::new(waiter, ())));
                        return Ok(());
                    }
                }
                Err(Backtrack::Block)
            })
        }

        /// Reagent a producer runs: publishes itself and blocks until the
        /// catalyst answers.
        fn produce(self: &Arc<Self>) -> R<(), ()> {
            let this = self.clone();
            crate::combinators::from_fn(move |(), _rx, offer| match offer {
                Some(Offer::Waiter(w)) => {
                    this.pending.lock().unwrap().push(w.clone());
                    Err(Backtrack::Block)
                }
                _ => Err(Backtrack::Block),
            })
        }
    }

    #[test]
    fn retire_is_idempotent_and_observable() {
        let r: R<(), ()> = crate::combinators::never();
        let handle = dissolve(r, ());
        assert!(handle.catalyst.is_alive());
        handle.retire();
        handle.retire();
        assert!(!handle.catalyst.is_alive());
    }

    #[test]
    fn dissolved_reagent_answers_every_producer_and_post_commit_runs_once_each() {
        let queue = TinyQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();

        let consume_and_count = queue.consume().map(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let handle = dissolve(consume_and_count, ());

        const N: usize = 5;
        let producers: Vec<_> = (0..N)
            .map(|_| {
                let q = queue.clone();
                std::thread::spawn(move || q.produce().run(()))
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        // The catalyst thread commits asynchronously; give it a moment.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), N);
        assert!(handle.catalyst.is_alive());
    }
}
