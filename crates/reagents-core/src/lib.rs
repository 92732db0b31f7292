//! A composable, non-blocking-friendly concurrency algebra.
//!
//! A [`Reagent<A, B>`] is a value describing a concurrent action from `A`
//! to `B`: reading a cell, swapping a channel, or any combination of those
//! built with [`combinators::ReagentExt`]. Reagents are attempted via a
//! two-phase try-react/commit protocol (see [`reagent::Reagent::try_react`]
//! and [`reaction::Reaction`]) so that composite actions spanning several
//! independent pieces of shared state commit atomically or not at all,
//! without ever taking a traditional lock across the whole action.
//!
//! This crate defines the algebra and the driver that runs it. It does not
//! define any leaf reagents over concrete shared state -- those live in
//! `reagents-cells`, which depends on this crate rather than the other way
//! around, matching the relationship between an effect system and the
//! handlers it is parameterized over.

mod backoff;
pub mod catalyst;
pub mod combinators;
pub mod driver;
pub mod offer;
pub mod reaction;
pub mod reagent;

pub use catalyst::{dissolve, CatalystHandle, DissolveFault};
pub use combinators::{
    choice, commit, compose, computed, from_fn, from_fn_with_snoop, lift, map_filter, never, post_commit, ret,
    ReagentExt,
};
pub use offer::{AbortResult, Catalyst, Offer, Waiter, WaiterComplete};
pub use reaction::{CasOp, Checkpoint, Reaction, ReactionFault};
pub use reagent::{Backtrack, Reagent, R};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ret_always_commits_and_ignores_input() {
        let r: R<i32, &str> = ret("hello");
        assert_eq!(r.run(1), "hello");
        assert_eq!(r.run(999), "hello");
    }

    #[test]
    fn lift_applies_pure_function() {
        let r: R<i32, i32> = lift(|x: i32| x * 2);
        assert_eq!(r.run(21), 42);
    }

    #[test]
    fn then_composes_sequentially() {
        let double: R<i32, i32> = lift(|x: i32| x * 2);
        let to_string: R<i32, String> = lift(|x: i32| x.to_string());
        let both = double.then(to_string);
        assert_eq!(both.run(10), "20");
    }

    #[test]
    fn map_post_processes_output() {
        let r: R<i32, i32> = lift(|x: i32| x + 1).map(|x| x * 10);
        assert_eq!(r.run(4), 50);
    }

    #[test]
    fn or_prefers_left_branch_when_it_commits() {
        let left: R<(), i32> = ret(1);
        let right: R<(), i32> = ret(2);
        let r = left.or(right);
        assert_eq!(r.run(()), 1);
    }

    #[test]
    fn or_falls_through_to_right_branch_when_left_blocks() {
        let left: R<(), i32> = never();
        let right: R<(), i32> = ret(2);
        let r = left.or(right);
        assert_eq!(r.try_run(()), Some(2));
    }

    #[test]
    fn never_blocks_try_run() {
        let r: R<(), i32> = never();
        assert_eq!(r.try_run(()), None);
    }

    #[test]
    fn with_filter_retries_until_predicate_holds() {
        use std::sync::atomic::{AtomicI32, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let r: R<(), i32> = lift(move |_: ()| c.fetch_add(1, Ordering::SeqCst) + 1)
            .with_filter(|n: &i32| *n >= 3);
        assert_eq!(r.run(()), 3);
    }

    #[test]
    fn post_commit_only_runs_after_a_real_commit() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let r = post_commit(move || flag.store(true, Ordering::SeqCst));
        r.run(());
        assert!(ran.load(Ordering::SeqCst));
    }
}
