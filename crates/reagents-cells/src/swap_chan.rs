//! `SwapChan<T>`: a synchronous, unbuffered rendezvous channel. Two callers
//! both offering a `T` and both wanting the other's `T` back -- the
//! "compare-and-set channel" the specification names as an external
//! collaborator (spec §1, §6) rather than part of the reagent algebra
//! itself.
//!
//! Unlike `Ref`, a `SwapChan` never reacts alone: it can only complete once
//! a second party shows up, so every attempt either finds a waiting partner
//! immediately or publishes its own offer and reports `Block`. This is the
//! crate's one leaf that genuinely uses [`Offer`] and [`WaiterComplete`]
//! rather than a plain cell CAS.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use reagents_core::{Backtrack, Offer, Reaction, Waiter, WaiterComplete, R};

/// A pending offer: a waiter plus the value it brought to trade.
struct Pending<T> {
    waiter: Arc<Waiter>,
    value: T,
}

/// An unbuffered two-way rendezvous point. Every caller of [`SwapChan::swap`]
/// both offers a value and asks for one back; whichever two callers show up
/// at (approximately) the same time exchange values and both return.
pub struct SwapChan<T> {
    pending: Mutex<VecDeque<Pending<T>>>,
}

impl<T> SwapChan<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
        })
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Drops entries from the front of the queue whose waiter has already
    /// resolved (answered by someone else, or aborted by its own caller
    /// choosing a different `choice` branch) without ever exchanging a
    /// value here. This is the "pool observing `is_deleted` drops the
    /// entry" policy from spec §4.3/§9 -- bounded to the queue's current
    /// length, so even a queue that is entirely stale drains to empty in
    /// one pass rather than spinning.
    fn pop_live(queue: &mut VecDeque<Pending<T>>) -> Option<Pending<T>> {
        while let Some(front) = queue.pop_front() {
            if front.waiter.is_waiting() {
                return Some(front);
            }
        }
        None
    }

    /// A reagent that offers `a` and reacts with whatever value a
    /// concurrent partner offers back. Symmetric: both sides of a
    /// rendezvous call the same reagent.
    pub fn swap(self: &Arc<Self>) -> R<T, T> {
        let this = self.clone();
        reagents_core::from_fn_with_snoop(
            move |a: T, rx: &mut Reaction, offer: Option<&Offer>| this.try_swap(a, rx, offer),
            {
                let this = self.clone();
                move |_a: &T| this.has_live_partner()
            },
        )
    }

    /// Cheap readiness probe: is there currently a live, unanswered offer
    /// sitting at the front of the queue? Used as this leaf's `snoop`.
    /// Only peeks the front entry rather than scanning the whole queue --
    /// a false negative (a live partner further back) is allowed.
    fn has_live_partner(&self) -> bool {
        #[allow(clippy::expect_used)]
        let queue = self.pending.lock().expect("SwapChan mutex poisoned");
        matches!(queue.front(), Some(p) if p.waiter.is_waiting())
    }

    fn try_swap(self: &Arc<Self>, a: T, rx: &mut Reaction, offer: Option<&Offer>) -> Result<T, Backtrack> {
        let found = {
            #[allow(clippy::expect_used)]
            let mut queue = self.pending.lock().expect("SwapChan mutex poisoned");
            Self::pop_live(&mut queue)
        };

        if let Some(Pending { waiter, value }) = found {
            // A partner is already waiting: stage completing *their* waiter
            // with our value, and react immediately with theirs. If their
            // waiter has meanwhile resolved some other way, the decisive
            // `WaiterComplete` CAS fails at commit time and the whole
            // reaction fails with it -- the driver simply retries.
            rx.with_cas(Arc::new(WaiterComplete::new(waiter, a)));
            return Ok(value);
        }

        // No partner visible. We can only publish an offer of our own when
        // the driver has already allocated us a `Waiter` (a `Catalyst`
        // cannot be matched against by address the way a `Waiter` pool
        // entry is, and on the very first, offer-less attempt there is
        // nothing to publish yet) -- in either case, `Block` tells the
        // driver to allocate one and try again.
        match offer {
            Some(Offer::Waiter(waiter)) => {
                #[allow(clippy::expect_used)]
                let mut queue = self.pending.lock().expect("SwapChan mutex poisoned");
                queue.push_back(Pending { waiter: waiter.clone(), value: a });
                Err(Backtrack::Block)
            }
            Some(Offer::Catalyst(_)) | None => Err(Backtrack::Block),
        }
    }
}

impl<T> std::fmt::Debug for SwapChan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChan").field("addr", &self.addr()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reagents_core::ReagentExt;
    use std::thread;

    #[test]
    fn two_threads_exchange_values() {
        let chan = SwapChan::<&'static str>::new();
        let swap = chan.swap();

        let s1 = swap.clone();
        let t1 = thread::spawn(move || s1.run("from-t1"));
        let s2 = swap.clone();
        let t2 = thread::spawn(move || s2.run("from-t2"));

        let r1 = t1.join().expect("t1 panicked");
        let r2 = t2.join().expect("t2 panicked");

        assert_eq!(r1, "from-t2");
        assert_eq!(r2, "from-t1");
    }

    #[test]
    fn try_run_blocks_with_no_partner() {
        let chan = SwapChan::<i32>::new();
        let swap = chan.swap();
        assert_eq!(swap.try_run(1), None);
    }

    #[test]
    fn blocked_caller_is_unparked_by_partner() {
        let chan = SwapChan::<i32>::new();
        let swap = chan.swap();

        let blocked = swap.clone();
        let waiter = thread::spawn(move || blocked.run(1));

        // Give the first thread a chance to publish its offer and park
        // before the partner shows up.
        thread::sleep(std::time::Duration::from_millis(20));

        let partner_answer = swap.run(2);
        let waiter_answer = waiter.join().expect("waiter panicked");

        assert_eq!(partner_answer, 1);
        assert_eq!(waiter_answer, 2);
    }

    #[test]
    fn snoop_is_false_with_empty_queue() {
        let chan = SwapChan::<i32>::new();
        assert!(!chan.has_live_partner());
    }
}
