//! The reagent algebra: constructors and composition combinators.
//!
//! Every combinator here is a small struct implementing [`Reagent`]; the
//! free functions (`ret`, `lift`, `choice`, ...) are the public surface
//! that builds and type-erases them into an [`R<A, B>`].

use std::marker::PhantomData;
use std::sync::Arc;

use crate::offer::Offer;
use crate::reaction::Reaction;
use crate::reagent::{Backtrack, Reagent, R};

/// `ret(b)`: ignores its input and always reacts with a fixed value,
/// without ever touching the reaction. Always commits and never
/// synchronizes.
struct Ret<B> {
    value: B,
}

impl<A, B> Reagent<A, B> for Ret<B>
where
    A: Send,
    B: Clone + Send + Sync,
{
    fn try_react(&self, _a: A, _rx: &mut Reaction, _offer: Option<&Offer>) -> Result<B, Backtrack> {
        Ok(self.value.clone())
    }

    fn always_commits(&self) -> bool {
        true
    }

    fn snoop(&self, _a: &A) -> bool {
        true
    }
}

pub fn ret<A, B>(value: B) -> R<A, B>
where
    A: Send + 'static,
    B: Clone + Send + Sync + 'static,
{
    Arc::new(Ret { value })
}

/// `lift(f)`: applies a pure, total function. Safe to run eagerly during
/// the try phase because it has no externally visible effect to undo.
struct Lift<A, B, F> {
    f: F,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B, F> Reagent<A, B> for Lift<A, B, F>
where
    A: Send,
    B: Send,
    F: Fn(A) -> B + Send + Sync,
{
    fn try_react(&self, a: A, _rx: &mut Reaction, _offer: Option<&Offer>) -> Result<B, Backtrack> {
        Ok((self.f)(a))
    }

    fn always_commits(&self) -> bool {
        true
    }

    fn snoop(&self, _a: &A) -> bool {
        true
    }
}

pub fn lift<A, B, F>(f: F) -> R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> B + Send + Sync + 'static,
{
    Arc::new(Lift { f, _marker: PhantomData })
}

/// `computed(c)`: a dynamic continuation. `c` picks which reagent to run
/// based on the input `a`, and that choice is re-made on every attempt --
/// unlike `choice`, which tries a fixed pair of alternatives, `computed` lets
/// the alternative itself depend on runtime data (e.g. "which channel" or
/// "which cell" rather than just "which branch").
///
/// The reagent `c(a)` produces is not a brand-new attempt: its `try_react` is
/// invoked with the *same* `rx`/`offer` this `computed` node was given, with
/// input `()`, so anything it stages (a `Ref::upd`, a rendezvous publish)
/// still joins this attempt's reaction and still sees the enclosing waiter
/// or catalyst. This is what makes `computed` suitable for things like
/// "look up which cell to update, then update it" as a single atomic
/// reagent rather than two separate ones.
///
/// Composing a fixed continuation directly onto a `computed` node is
/// deliberately not supported -- there is no single static type for "the
/// continuation of whatever `c(a)` turns out to be". Use
/// [`crate::combinators::ReagentExt::flat_map`] instead: it runs `computed`
/// to completion first and lets the closure decide what happens to the
/// result, which has the same effect without requiring `computed` itself to
/// carry a continuation slot.
struct Computed<A, B, C> {
    c: C,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B, C> Reagent<A, B> for Computed<A, B, C>
where
    A: Send,
    B: Send,
    C: Fn(A) -> R<(), B> + Send + Sync,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<B, Backtrack> {
        let chosen = (self.c)(a);
        chosen.try_react((), rx, offer)
    }

    fn may_sync(&self) -> bool {
        true
    }

    // Deliberately the trait default (`false`): the reagent `c(a)` builds is
    // opaque until it is actually computed, so there is nothing cheap to
    // probe ahead of time (spec §4.4).
}

pub fn computed<A, B, C>(c: C) -> R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Fn(A) -> R<(), B> + Send + Sync + 'static,
{
    Arc::new(Computed { c, _marker: PhantomData })
}

/// The raw escape hatch for external collaborators (cells, channels) that
/// need to stage entries into the *ambient* reaction rather than just
/// compute a value -- `computed`'s closure only sees its input, not the
/// `Reaction` a surrounding `compose`/`choice` is building up, so a leaf
/// that calls `Ref::upd` and expects its write to commit atomically
/// alongside a sibling in the same composite reagent must be built with
/// `from_fn` instead.
struct FromFn<A, B, F, S> {
    f: F,
    snoop: S,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B, F, S> Reagent<A, B> for FromFn<A, B, F, S>
where
    A: Send,
    B: Send,
    F: Fn(A, &mut Reaction, Option<&Offer>) -> Result<B, Backtrack> + Send + Sync,
    S: Fn(&A) -> bool + Send + Sync,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<B, Backtrack> {
        (self.f)(a, rx, offer)
    }

    fn snoop(&self, a: &A) -> bool {
        (self.snoop)(a)
    }
}

/// The always-`false` probe used by [`from_fn`] when the caller has no
/// cheaper way to tell "ready" from "not ready" than attempting for real.
fn never_snoop<A>(_a: &A) -> bool {
    false
}

pub fn from_fn<A, B, F>(f: F) -> R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A, &mut Reaction, Option<&Offer>) -> Result<B, Backtrack> + Send + Sync + 'static,
{
    Arc::new(FromFn { f, snoop: never_snoop::<A>, _marker: PhantomData })
}

/// Like [`from_fn`], but with an explicit [`crate::reagent::Reagent::snoop`]
/// probe. For leaves that can tell cheaply whether a partner looks
/// available (a channel with an outstanding offer) or that provably never
/// return `Block` at all (an unconditional cell update), supplying a real
/// probe here is what lets [`crate::combinators::choice`] and the driver's
/// back-off skip a pointless spin.
pub fn from_fn_with_snoop<A, B, F, S>(f: F, snoop: S) -> R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A, &mut Reaction, Option<&Offer>) -> Result<B, Backtrack> + Send + Sync + 'static,
    S: Fn(&A) -> bool + Send + Sync + 'static,
{
    Arc::new(FromFn { f, snoop, _marker: PhantomData })
}

/// `never()`: a reagent that can never react. Always reports `Block`, and
/// by construction never commits.
struct NeverReagent;

impl<A, B> Reagent<A, B> for NeverReagent
where
    A: Send,
    B: Send,
{
    fn try_react(&self, _a: A, _rx: &mut Reaction, _offer: Option<&Offer>) -> Result<B, Backtrack> {
        Err(Backtrack::Block)
    }

    // Inherits the trait's `false` default: `never` is the identity of
    // `choice`'s snoop union, so it must never contribute a `true`.
}

pub fn never<A, B>() -> R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Arc::new(NeverReagent)
}

/// `post_commit(f)`: reacts with `()` immediately (staging nothing) but
/// schedules `f` to run once — and only if — the enclosing reaction
/// actually commits. Used for side effects that must not happen on a
/// discarded or retried attempt (e.g. logging, waking up an unrelated
/// waiter as a convenience rather than as a correctness requirement).
struct PostCommit<F> {
    f: F,
}

impl<F> Reagent<(), ()> for PostCommit<F>
where
    F: Fn() + Send + Sync + Clone + 'static,
{
    fn try_react(&self, _a: (), rx: &mut Reaction, _offer: Option<&Offer>) -> Result<(), Backtrack> {
        rx.with_post_commit(self.f.clone());
        Ok(())
    }

    fn always_commits(&self) -> bool {
        true
    }

    fn snoop(&self, _a: &()) -> bool {
        true
    }
}

pub fn post_commit<F>(f: F) -> R<(), ()>
where
    F: Fn() + Send + Sync + Clone + 'static,
{
    Arc::new(PostCommit { f })
}

/// The terminal node every runnable reagent chain ends in. Carries no
/// behavior of its own: it reacts with its input unchanged and always
/// commits, which is what makes it the identity of `compose`/`>=>`
/// (spec §8 property 5).
struct Commit<A>(PhantomData<fn(A) -> A>);

impl<A> Reagent<A, A> for Commit<A>
where
    A: Send,
{
    fn try_react(&self, a: A, _rx: &mut Reaction, _offer: Option<&Offer>) -> Result<A, Backtrack> {
        Ok(a)
    }

    fn always_commits(&self) -> bool {
        true
    }

    fn snoop(&self, _a: &A) -> bool {
        true
    }
}

pub fn commit<A>() -> R<A, A>
where
    A: Send + 'static,
{
    Arc::new(Commit(PhantomData))
}

/// `compose(first, second)`: sequential composition. `first`'s output
/// feeds `second`'s input within the same attempt and the same reaction —
/// either both react and stage their effects, or neither does.
struct AutoCont<A, B, C> {
    first: R<A, B>,
    second: R<B, C>,
}

impl<A, B, C> Reagent<A, C> for AutoCont<A, B, C>
where
    A: Send,
    B: Send,
    C: Send,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<C, Backtrack> {
        let b = self.first.try_react(a, rx, offer)?;
        self.second.try_react(b, rx, offer)
    }

    fn always_commits(&self) -> bool {
        self.first.always_commits() && self.second.always_commits()
    }

    fn may_sync(&self) -> bool {
        self.first.may_sync() || self.second.may_sync()
    }

    fn snoop(&self, a: &A) -> bool {
        // `second`'s readiness depends on `first`'s output, which doesn't
        // exist yet; delegating to `first` alone is a sound under-approx
        // (a false positive here just wastes a spin on `second`, same as
        // any other snoop false positive).
        self.first.snoop(a)
    }
}

pub fn compose<A, B, C>(first: R<A, B>, second: R<B, C>) -> R<A, C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Arc::new(AutoCont { first, second })
}

/// `choice(left, right)`: tries `left` first; if it backtracks with
/// `Retry`, rolls the reaction back to before `left` ran and tries `right`
/// from the same starting value. A `Block` from `left` only short-circuits
/// to `right` once `right` has also been determined not to help (the
/// driver is the one that ultimately decides whether the combined
/// `Block` means "park" or "give up" — see `driver::run`/`try_run`).
///
/// Note: this implementation does not distribute an enclosing continuation
/// across both branches the way an optimizing reagent runtime might; each
/// branch is tried as a self-contained sub-reagent. See `DESIGN.md` for why
/// that optimization was left out.
struct Choice<A, B> {
    left: R<A, B>,
    right: R<A, B>,
}

impl<A, B> Reagent<A, B> for Choice<A, B>
where
    A: Clone + Send,
    B: Send,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<B, Backtrack> {
        let cp = rx.checkpoint();
        match self.left.try_react(a.clone(), rx, offer) {
            Ok(b) => Ok(b),
            Err(Backtrack::Retry) => {
                rx.rollback_to(cp);
                match self.right.try_react(a, rx, offer) {
                    // `left`'s `Retry` was transient; `right` having
                    // nothing to offer right now is not a reason to park --
                    // report `Retry` so the driver comes straight back and
                    // gives `left` another chance (spec §4.4, choice).
                    Err(Backtrack::Block) => Err(Backtrack::Retry),
                    other => other,
                }
            }
            Err(Backtrack::Block) => {
                rx.rollback_to(cp);
                match self.right.try_react(a, rx, offer) {
                    Err(Backtrack::Block) => Err(Backtrack::Block),
                    other => other,
                }
            }
        }
    }

    fn always_commits(&self) -> bool {
        self.left.always_commits() || self.right.always_commits()
    }

    fn may_sync(&self) -> bool {
        self.left.may_sync() || self.right.may_sync()
    }

    fn snoop(&self, a: &A) -> bool {
        self.right.snoop(a) || self.left.snoop(a)
    }
}

pub fn choice<A, B>(left: R<A, B>, right: R<A, B>) -> R<A, B>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    Arc::new(Choice { left, right })
}

/// `map_filter(r, f)`: post-processes `r`'s output with a function that
/// may itself decide to backtrack (returning `Err` retries, matching
/// `with_filter`'s semantics when `f` reports a value is unacceptable).
struct MapFilter<A, B, C, F> {
    inner: R<A, B>,
    f: F,
    _marker: PhantomData<fn(B) -> C>,
}

impl<A, B, C, F> Reagent<A, C> for MapFilter<A, B, C, F>
where
    A: Send,
    B: Send,
    C: Send,
    F: Fn(B) -> Result<C, Backtrack> + Send + Sync,
{
    fn try_react(&self, a: A, rx: &mut Reaction, offer: Option<&Offer>) -> Result<C, Backtrack> {
        let b = self.inner.try_react(a, rx, offer)?;
        (self.f)(b)
    }

    fn always_commits(&self) -> bool {
        false
    }

    fn may_sync(&self) -> bool {
        self.inner.may_sync()
    }

    fn snoop(&self, a: &A) -> bool {
        // `f` might itself reject the value `inner` produces, so `inner`
        // looking ready is only a necessary, not sufficient, condition --
        // an allowed false positive, same reasoning as `AutoCont`.
        self.inner.snoop(a)
    }
}

pub fn map_filter<A, B, C, F>(inner: R<A, B>, f: F) -> R<A, C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: Fn(B) -> Result<C, Backtrack> + Send + Sync + 'static,
{
    Arc::new(MapFilter { inner, f, _marker: PhantomData })
}

/// Extension methods giving the reagent algebra a fluent, named-method
/// surface. The specification's DSL uses bespoke operators (`!`, `!?`,
/// `>=>`, `<+>`, `>>`); those are foreign-trait-on-foreign-type
/// combinations once `R<A, B>` is `Arc<dyn Reagent<A, B>>`, which Rust's
/// orphan rules forbid implementing here. A local extension trait sidesteps
/// that restriction entirely and reads more plainly at call sites besides.
pub trait ReagentExt<A, B>: Sized {
    /// Blocking run: repeatedly attempts this reagent (via the driver's
    /// back-off/park loop) until it commits, and returns the result.
    fn run(&self, a: A) -> B
    where
        A: Clone + Send + 'static;

    /// Non-blocking run: makes exactly one attempt, never parks, and never
    /// retries -- any backtrack or lost commit race reports `None`.
    fn try_run(&self, a: A) -> Option<B>;

    /// Sequential composition: `self`'s output feeds `next`.
    fn then<C>(self, next: R<B, C>) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static;

    /// Left-biased choice between `self` and `other`.
    fn or(self, other: R<A, B>) -> R<A, B>
    where
        A: Clone + Send + 'static,
        B: Send + 'static;

    /// Post-processes a successful reaction with a pure function.
    fn map<C, F>(self, f: F) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static,
        F: Fn(B) -> C + Send + Sync + 'static;

    /// Post-processes a successful reaction with a function that may
    /// itself choose to backtrack.
    fn flat_map<C, F>(self, f: F) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static,
        F: Fn(B) -> Result<C, Backtrack> + Send + Sync + 'static;

    /// Restricts this reagent to only commit when `pred` holds, retrying
    /// otherwise.
    fn with_filter<F>(self, pred: F) -> R<A, B>
    where
        B: Clone + 'static,
        F: Fn(&B) -> bool + Send + Sync + 'static;
}

impl<A, B> ReagentExt<A, B> for R<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn run(&self, a: A) -> B
    where
        A: Clone + Send + 'static,
    {
        crate::driver::run(self, a)
    }

    fn try_run(&self, a: A) -> Option<B> {
        crate::driver::try_run(self, a)
    }

    fn then<C>(self, next: R<B, C>) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static,
    {
        compose(self, next)
    }

    fn or(self, other: R<A, B>) -> R<A, B>
    where
        A: Clone + Send + 'static,
        B: Send + 'static,
    {
        choice(self, other)
    }

    fn map<C, F>(self, f: F) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static,
        F: Fn(B) -> C + Send + Sync + 'static,
    {
        map_filter(self, move |b| Ok(f(b)))
    }

    fn flat_map<C, F>(self, f: F) -> R<A, C>
    where
        B: 'static,
        C: Send + 'static,
        F: Fn(B) -> Result<C, Backtrack> + Send + Sync + 'static,
    {
        map_filter(self, f)
    }

    fn with_filter<F>(self, pred: F) -> R<A, B>
    where
        B: Clone + 'static,
        F: Fn(&B) -> bool + Send + Sync + 'static,
    {
        map_filter(self, move |b| {
            if pred(&b) {
                Ok(b)
            } else {
                Err(Backtrack::Retry)
            }
        })
    }
}
