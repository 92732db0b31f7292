//! The reagent trait itself: the `try_react`/`react` two-phase protocol and
//! the static predicates a driver consults to decide how hard to try.

use std::sync::Arc;

use crate::offer::Offer;
use crate::reaction::Reaction;

/// Why a `try_react` attempt did not produce a value.
///
/// This is not an error in the `std::error::Error` sense — both variants
/// are routine, expected outcomes of a two-phase protocol running under
/// contention, and the driver (`run`/`try_run`) is the only place that
/// decides what to do about either one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backtrack {
    /// The reagent could react in principle but lost a race (e.g. a cell's
    /// value changed between read and CAS, or a rendezvous partner picked a
    /// different offer first). The driver should simply try again.
    Retry,
    /// The reagent cannot react until some other thread changes the world
    /// (an empty channel with no sender waiting, a condition that is
    /// currently false). The driver should either register an offer and
    /// park, or — for `try_run` — give up immediately.
    Block,
}

/// A composable, potentially-blocking concurrent action from `A` to `B`.
///
/// `try_react` is the sole required method. It is attempted, possibly many
/// times, inside the two-phase protocol: a successful attempt stages its
/// effects into `rx` rather than performing them eagerly, so that a
/// `choice` sibling or enclosing combinator can still discard the attempt
/// if the reaction does not ultimately commit. The one exception is reading
/// already-published, immutable state (e.g. `lift`'s pure function) — those
/// are safe to run for real during the try phase because they have no
/// externally visible side effect to undo.
///
/// Implementations are expected to be cheap to attempt repeatedly and must
/// not block inside `try_react` itself; blocking is the driver's job,
/// mediated by `offer`.
pub trait Reagent<A, B>: Send + Sync {
    /// Attempt one non-blocking step of this reagent.
    ///
    /// `offer` is `Some` exactly when this attempt is running underneath an
    /// enclosing rendezvous (a waiter this thread published, or a catalyst
    /// a background thread is running under); reagents that themselves
    /// publish offers (see blocking leaf constructors in `reagents-cells`)
    /// use it to avoid publishing a second, redundant one.
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<B, Backtrack>;

    /// Static: true if this reagent, run in isolation, always finds some
    /// way to react without ever returning `Block` (e.g. `ret`, `lift`, or
    /// a `choice` between two always-committing reagents). The driver uses
    /// this to decide whether blocking/parking is ever worth attempting.
    fn always_commits(&self) -> bool {
        false
    }

    /// Static: true if reacting might require synchronizing with another
    /// thread (publishing or answering an offer) rather than completing
    /// purely against already-visible state. A composite reagent reports
    /// this as the union of its parts, so a driver or an enclosing
    /// combinator can tell, without attempting anything, whether a given
    /// branch is ever worth offering at all.
    fn may_sync(&self) -> bool {
        false
    }

    /// A cheap, read-only probe: does a partner appear available to react
    /// with this reagent on `a` right now? Consulted by [`crate::driver`]
    /// to decide whether a blocked attempt's back-off step is worth taking
    /// (spinning is pointless if nothing is going to change) and by
    /// [`crate::combinators::choice`] to decide which blocked branch to
    /// keep spinning on.
    ///
    /// False negatives are fine -- a `false` just means the caller backs
    /// off and tries again shortly. False positives only waste a spin.
    /// The one real obligation (spec §8 property 6) is the converse: when
    /// this returns `false`, an immediate, isolated attempt of this exact
    /// reagent must itself come back `Block` or `Retry`, never a value --
    /// so the conservative default of `false` is always a safe override to
    /// inherit, and only combinators and leaves that can actually tell
    /// "ready" from "not ready" should report `true`.
    fn snoop(&self, _a: &A) -> bool {
        false
    }
}

/// A type-erased, cheaply-clonable reagent value — the currency combinators
/// and the public builder functions pass around. `Arc` rather than `Box`
/// because the same compiled reagent is routinely shared across the
/// threads that race to react with it.
pub type R<A, B> = Arc<dyn Reagent<A, B>>;

impl<A, B> Reagent<A, B> for R<A, B>
where
    A: Send,
    B: Send,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<B, Backtrack> {
        (**self).try_react(a, rx, offer)
    }

    fn always_commits(&self) -> bool {
        (**self).always_commits()
    }

    fn may_sync(&self) -> bool {
        (**self).may_sync()
    }

    fn snoop(&self, a: &A) -> bool {
        (**self).snoop(a)
    }
}
