//! Rendezvous machinery: [`Waiter`] lets one thread publish a pending offer
//! that another thread's reaction can complete; [`Catalyst`] is the
//! always-blocking reagent installed by [`crate::catalyst::dissolve`] so a
//! background thread can answer offers indefinitely.

use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::cell::UnsafeCell;
use std::thread::{self, Thread};

use crate::reaction::CasOp;

const WAITING: u8 = 0;
const ANSWERED: u8 = 1;
const ABORTED: u8 = 2;

/// What a blocked attempt was carrying when another party's reaction
/// completed it.
type BoxedAnswer = Box<dyn Any + Send>;

/// A single-use rendezvous cell. A thread that cannot complete its reagent
/// without a partner publishes a `Waiter`, parks, and is woken once some
/// other reaction's commit calls [`Waiter::try_complete`].
///
/// State transitions are CAS-only and happen exactly once: `Waiting` moves
/// either to `Answered` (a partner completed it) or `Aborted` (the waiting
/// thread gave up, e.g. because its own `choice` branch found another way
/// to react). Both transitions out of `Waiting` are mutually exclusive, so
/// at most one of "a partner sees it answered" and "the waiter sees its own
/// abort succeed" is ever true.
pub struct Waiter {
    state: AtomicU8,
    answer: UnsafeCell<Option<BoxedAnswer>>,
    thread: Thread,
}

// SAFETY: `answer` is only written by whichever side wins the CAS out of
// `Waiting` (at most one of `try_complete`/`try_abort`), and is only read by
// that same winner afterward, so there is never a data race on the cell.
unsafe impl Sync for Waiter {}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(WAITING),
            answer: UnsafeCell::new(None),
            thread: thread::current(),
        })
    }

    /// Stable address for [`CasOp::addr`] ordering: the cell's own location
    /// is already unique and stable for its lifetime, so there is no need
    /// to mint a separate id.
    pub fn addr(&self) -> usize {
        self as *const Self as usize
    }

    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAITING
    }

    /// Parks the current thread until this waiter leaves the `Waiting`
    /// state. Spurious wakeups are tolerated by looping.
    pub fn park(&self) {
        while self.is_waiting() {
            thread::park();
        }
    }

    /// Attempts to move this waiter from `Waiting` to `Answered`, storing
    /// `answer` for the parked thread to retrieve. Called from inside the
    /// commit chain of the completing party's reaction — see
    /// [`WaiterComplete`] for the [`CasOp`] wrapper that makes this
    /// participate in an atomic multi-word commit.
    fn try_complete(&self, answer: BoxedAnswer) -> bool {
        if self
            .state
            .compare_exchange(WAITING, ANSWERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // SAFETY: we just won the only transition out of `Waiting`
            // that writes `answer`; `try_abort` cannot also have won.
            unsafe { *self.answer.get() = Some(answer) };
            self.thread.unpark();
            true
        } else {
            false
        }
    }

    /// Attempts to move this waiter from `Waiting` to `Aborted`. Idempotent:
    /// calling this again after it has already resolved (either way) simply
    /// reports that there is no answer to retrieve, rather than panicking.
    pub fn try_abort(&self) -> AbortResult {
        if self
            .state
            .compare_exchange(WAITING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            AbortResult::Aborted
        } else if self.state.load(Ordering::Acquire) == ANSWERED {
            AbortResult::AlreadyAnswered
        } else {
            AbortResult::AlreadyAborted
        }
    }

    /// Retrieves the stored answer after `park` returns having observed
    /// `Answered`. Returns `None` if the waiter resolved via abort instead.
    pub fn take_answer<T: 'static>(&self) -> Option<T> {
        if self.state.load(Ordering::Acquire) != ANSWERED {
            return None;
        }
        // SAFETY: the `Answered` transition happens-before this read
        // (Acquire above pairs with the Release in `try_complete`), and
        // only the winner of that transition ever wrote the cell.
        let boxed = unsafe { (*self.answer.get()).take() }?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }
}

pub enum AbortResult {
    Aborted,
    AlreadyAnswered,
    AlreadyAborted,
}

/// The [`CasOp`] entry a completing reaction stages when it wants to answer
/// someone else's [`Waiter`]. Decisive: a waiter's status cell cannot be
/// speculatively peeked and rolled back the way a lock-guarded cell can, so
/// this entry's compare-exchange is the true linearization point of any
/// reaction that contains it.
pub struct WaiterComplete<T> {
    waiter: Arc<Waiter>,
    answer: parking_lot_free::Slot<T>,
}

/// Tiny single-assignment cell: avoids requiring `T: Clone` while still
/// letting `commit_with` be called with a `&self` receiver (it is only ever
/// invoked once, from within `Reaction::try_commit`).
mod parking_lot_free {
    use std::cell::UnsafeCell;

    pub struct Slot<T>(UnsafeCell<Option<T>>);

    // SAFETY: a `Slot` is only ever read once, from the single thread
    // driving the commit that owns it; see `WaiterComplete::commit_with`.
    unsafe impl<T: Send> Sync for Slot<T> {}

    impl<T> Slot<T> {
        pub fn new(value: T) -> Self {
            Self(UnsafeCell::new(Some(value)))
        }

        /// # Safety
        /// Must only be called once.
        pub unsafe fn take(&self) -> T {
            #[allow(clippy::manual_unwrap_or)]
            match (*self.0.get()).take() {
                Some(v) => v,
                None => unreachable!("WaiterComplete::commit_with invoked more than once"),
            }
        }
    }
}

impl<T: Send + 'static> WaiterComplete<T> {
    pub fn new(waiter: Arc<Waiter>, answer: T) -> Self {
        Self {
            waiter,
            answer: parking_lot_free::Slot::new(answer),
        }
    }
}

impl<T: Send + 'static> CasOp for WaiterComplete<T> {
    fn addr(&self) -> usize {
        self.waiter.addr()
    }

    fn is_decisive(&self) -> bool {
        true
    }

    fn commit_with(&self, inner: &mut dyn FnMut() -> bool) -> bool {
        if !inner() {
            return false;
        }
        // SAFETY: `Reaction::try_commit` builds one chain per attempt and
        // calls each entry's `commit_with` at most once.
        let answer: T = unsafe { self.answer.take() };
        self.waiter.try_complete(Box::new(answer))
    }
}

/// A long-lived, repeatedly-offered reagent installed by
/// [`crate::catalyst::dissolve`]. Unlike a [`Waiter`], a catalyst is not
/// single-use: it stays `alive` across many completed rendezvous and is
/// only ever retired when its owning thread is asked to stop.
pub struct Catalyst {
    alive: std::sync::atomic::AtomicBool,
}

impl Catalyst {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: std::sync::atomic::AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// The enclosing rendezvous context passed down through `try_react`: either
/// a one-shot waiter belonging to the attempting thread, or the catalyst a
/// dissolved background reagent is running under.
pub enum Offer {
    Waiter(Arc<Waiter>),
    Catalyst(Arc<Catalyst>),
}

impl Offer {
    pub fn is_still_live(&self) -> bool {
        match self {
            Offer::Waiter(w) => w.is_waiting(),
            Offer::Catalyst(c) => c.is_alive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::Reaction;
    use std::thread;

    #[test]
    fn try_complete_then_take_answer_round_trips() {
        let waiter = Waiter::new();
        assert!(waiter.is_waiting());

        let rx = Reaction::inert();
        let op = WaiterComplete::new(waiter.clone(), 42i32);
        assert!(op.commit_with(&mut || true));
        let _ = rx; // the real reaction isn't needed to exercise the CasOp

        assert!(!waiter.is_waiting());
        assert_eq!(waiter.take_answer::<i32>(), Some(42));
    }

    #[test]
    fn at_most_one_of_abort_or_complete_succeeds() {
        let waiter = Waiter::new();
        let op = WaiterComplete::new(waiter.clone(), "hello");
        assert!(op.commit_with(&mut || true));

        // The waiter already answered; a subsequent abort must report that,
        // never silently "succeed" a second transition out of `Waiting`.
        match waiter.try_abort() {
            AbortResult::AlreadyAnswered => {}
            _ => panic!("expected AlreadyAnswered once a WaiterComplete has committed"),
        }
    }

    #[test]
    fn abort_is_idempotent_and_reports_no_answer_once() {
        let waiter = Waiter::new();
        match waiter.try_abort() {
            AbortResult::Aborted => {}
            _ => panic!("first abort of a fresh waiter should succeed"),
        }
        match waiter.try_abort() {
            AbortResult::AlreadyAborted => {}
            _ => panic!("second abort of an already-aborted waiter must not re-report success"),
        }
    }

    #[test]
    fn commit_with_refuses_to_answer_when_inner_fails() {
        let waiter = Waiter::new();
        let op = WaiterComplete::new(waiter.clone(), 1i32);
        assert!(!op.commit_with(&mut || false));
        assert!(waiter.is_waiting());
    }

    #[test]
    fn park_returns_once_a_partner_thread_completes_the_waiter() {
        let waiter = Waiter::new();
        let completer_waiter = waiter.clone();
        let completer = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            let op = WaiterComplete::new(completer_waiter, "done");
            assert!(op.commit_with(&mut || true));
        });

        waiter.park();
        completer.join().expect("completer panicked");
        assert_eq!(waiter.take_answer::<&'static str>(), Some("done"));
    }

    #[test]
    fn catalyst_retire_flips_alive_and_offer_reports_it() {
        let catalyst = Catalyst::new();
        let offer = Offer::Catalyst(catalyst.clone());
        assert!(offer.is_still_live());
        catalyst.retire();
        assert!(!offer.is_still_live());
    }

    #[test]
    fn offer_waiter_tracks_the_underlying_waiter_state() {
        let waiter = Waiter::new();
        let offer = Offer::Waiter(waiter.clone());
        assert!(offer.is_still_live());
        let _ = waiter.try_abort();
        assert!(!offer.is_still_live());
    }
}
