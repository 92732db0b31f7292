//! The driver: turns a reagent plus a starting value into a result, by
//! repeatedly attempting `try_react`, committing on success, and either
//! backing off and retrying or publishing a waiter and parking on `Block`.

use crate::backoff::Backoff;
use crate::offer::{Offer, Waiter};
use crate::reaction::Reaction;
use crate::reagent::{Backtrack, Reagent, R};

/// Blocking run (spec §4.5, `!`). Loops until `r` commits, parking the
/// current thread whenever every available path returns `Block` and `r`
/// cannot always commit on its own.
pub fn run<A, B>(r: &R<A, B>, a: A) -> B
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    let backoff = Backoff::new();
    loop {
        let mut rx = Reaction::inert();
        match r.try_react(a.clone(), &mut rx, None) {
            Ok(b) => {
                if rx.try_commit() {
                    return b;
                }
                // Lost a race to a concurrent committer touching the same
                // cells; nothing we staged took effect, so just retry.
                backoff.once();
            }
            Err(Backtrack::Retry) => {
                backoff.once();
            }
            Err(Backtrack::Block) => {
                if r.always_commits() {
                    // A reagent that always commits reporting `Block` is a
                    // transient race (e.g. a `choice` whose always-ready
                    // branch lost to a concurrent mutation); keep retrying
                    // rather than parking, since parking would wait forever.
                    backoff.once();
                    continue;
                }
                if let Some(b) = block_on(r, a.clone(), &backoff) {
                    return b;
                }
                // Defensive fallback: block_on's waiter resolved without an
                // answer. Shouldn't happen given only this thread ever
                // aborts its own waiter, but retrying fresh is always safe.
                tracing::trace!("waiter resolved without an answer, retrying from scratch");
            }
        }
    }
}

/// Non-blocking run (spec §4.5, `!?`). Performs exactly one `try_react` with
/// no offer, never parks, and never loops: any backtrack -- `Retry` or
/// `Block` -- as well as a `try_commit` that loses a race, is reported as
/// `None` immediately (spec §4.5 "non-blocking variant", §9 Open Question
/// (a): `Retry` is deliberately treated as "no answer" here rather than
/// retried, since retrying would make `!?` indistinguishable from a bounded
/// `!`).
pub fn try_run<A, B>(r: &R<A, B>, a: A) -> Option<B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let mut rx = Reaction::inert();
    match r.try_react(a, &mut rx, None) {
        Ok(b) if rx.try_commit() => Some(b),
        _ => None,
    }
}

/// Publishes a waiter for `r`, parks the current thread, and returns the
/// value a partner's reaction answered it with. Returns `None` if this
/// thread instead found a direct (non-rendezvous) path to react and
/// retracted the now-useless waiter -- the caller should loop and retry
/// fresh rather than treat that as a failure.
fn block_on<A, B>(r: &R<A, B>, a: A, backoff: &Backoff) -> Option<B>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    let waiter = Waiter::new();
    let offer = Offer::Waiter(waiter.clone());
    tracing::trace!(addr = waiter.addr(), "publishing a waiter and entering the block loop");

    while waiter.is_waiting() {
        let mut rx = Reaction::inert();
        match r.try_react(a.clone(), &mut rx, Some(&offer)) {
            Ok(b) => {
                if rx.try_commit() {
                    // Committed directly rather than via the waiter (e.g.
                    // a concurrent partner became available between
                    // publishing the offer and this attempt); the offer is
                    // now stale and must be retracted so nobody answers it
                    // into the void.
                    let _ = waiter.try_abort();
                    return Some(b);
                }
                backoff.once();
            }
            Err(Backtrack::Retry) => {
                // Spec §4.5(d): only worth spinning if the waiter is still
                // live and nothing looks ready to answer it yet -- if
                // `snoop` already says a partner is around, skip straight
                // to the next attempt instead of wasting the step.
                backoff.once_if(|| waiter.is_waiting() && !r.snoop(&a));
            }
            Err(Backtrack::Block) => {
                backoff.once_if(|| waiter.is_waiting());
                tracing::trace!(addr = waiter.addr(), "parking until a partner completes this waiter");
                waiter.park();
                break;
            }
        }
    }

    waiter.take_answer::<B>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{choice, never, post_commit, ret, ReagentExt};
    use crate::offer::WaiterComplete;
    use crate::reaction::CasOp;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    /// A one-shot rendezvous pool good for exactly one producer and one
    /// consumer, just enough to drive `run`'s `block_on` path directly
    /// (spec §8, scenario S5) without depending on `reagents-cells`.
    struct OneShot<T> {
        pending: Mutex<Option<Arc<crate::offer::Waiter>>>,
        _marker: std::marker::PhantomData<T>,
    }

    impl<T: Send + 'static> OneShot<T> {
        fn new() -> Arc<Self> {
            Arc::new(Self { pending: Mutex::new(None), _marker: std::marker::PhantomData })
        }

        fn recv(self: &Arc<Self>) -> R<(), T> {
            let this = self.clone();
            crate::combinators::from_fn(move |(), _rx, offer| match offer {
                Some(Offer::Waiter(w)) => {
                    *this.pending.lock().unwrap() = Some(w.clone());
                    Err(Backtrack::Block)
                }
                _ => Err(Backtrack::Block),
            })
        }

        fn send(self: &Arc<Self>, value: T) -> bool {
            match self.pending.lock().unwrap().take() {
                Some(w) => WaiterComplete::new(w, value).commit_with(&mut || true),
                None => false,
            }
        }
    }

    #[test]
    fn run_commits_immediately_when_no_partner_is_needed() {
        let r: R<(), i32> = ret(7);
        assert_eq!(run(&r, ()), 7);
    }

    #[test]
    fn try_run_gives_up_without_parking_on_an_unmatched_block() {
        let r: R<(), i32> = never();
        assert_eq!(try_run(&r, ()), None);
    }

    #[test]
    fn choice_falls_through_to_a_ready_branch_without_blocking() {
        let r = choice(never(), ret(9));
        assert_eq!(try_run(&r, ()), Some(9));
    }

    #[test]
    fn run_parks_and_wakes_once_a_partner_answers_the_waiter() {
        let chan = OneShot::<&'static str>::new();

        let waiting_chan = chan.clone();
        let consumer = thread::spawn(move || run(&waiting_chan.recv(), ()));

        thread::sleep(Duration::from_millis(20));
        assert!(chan.send("payload"));

        assert_eq!(consumer.join().expect("consumer panicked"), "payload");
    }

    #[test]
    fn post_commit_runs_once_the_run_loop_actually_commits() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let action = post_commit(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        run(&action, ());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
