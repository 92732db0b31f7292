//! The reaction: an accumulator of tentative CAS operations and post-commit
//! callbacks built up by a single attempt, committed atomically at the
//! terminal [`crate::combinators::commit`] node.

use std::sync::Arc;

/// A single tentative compare-and-set, contributed by an external collaborator
/// (a [`Ref`]-like cell, a channel pool, or a [`crate::offer::Waiter`] status
/// change) that wants to participate in a reaction's all-or-nothing commit.
///
/// This is the interface the core consumes from cell/channel implementations
/// (see spec §6, "Consumed from the environment"). `reagents-core` never
/// constructs [`Ref`]-flavored entries itself; it only defines the contract
/// and the one entry kind it owns, a waiter completion.
pub trait CasOp: Send + Sync {
    /// A stable address used to impose a total lock order across the
    /// entries of a single reaction, so that concurrently-committing
    /// reactions sharing cells never deadlock against each other.
    fn addr(&self) -> usize;

    /// True for entries whose underlying resource cannot be "peeked" and
    /// then written later (a [`crate::offer::Waiter`]'s status is a single
    /// atomic CAS, not a lock-guarded cell). Decisive entries are always
    /// ordered after non-decisive ones so that the reaction's real
    /// linearization point is the one CAS nothing else can roll back.
    fn is_decisive(&self) -> bool {
        false
    }

    /// Attempt this entry as part of a larger chain. `inner` represents
    /// whatever remains of the chain (possibly a no-op base case). Entries
    /// backed by a lock must call `inner` *while holding that lock*, and
    /// only write their own new value once `inner` has confirmed the rest
    /// of the chain also succeeded.
    fn commit_with(&self, inner: &mut dyn FnMut() -> bool) -> bool;
}

/// Fatal, unrecoverable invariant violation (spec §7: "a corrupt reaction
/// ... should terminate the reagent") raised when a reaction is asked to
/// stage a second decisive entry.
///
/// A decisive entry's `commit_with` performs an irreversible CAS (a
/// waiter's status cell cannot be peeked and rolled back the way a
/// lock-guarded cell can — see [`CasOp::is_decisive`]). With exactly one
/// decisive entry, ordering it last (`try_commit`'s `(is_decisive, addr)`
/// sort) makes it the reaction's true linearization point: every
/// non-decisive entry has already been verified under its lock by the time
/// it runs, so it cannot fail. With *two* decisive entries, the first's CAS
/// can succeed and the second's can still fail (no lock was ever held to
/// serialize against it), which would answer one waiter and then report
/// the whole reaction as not-committed -- a partial application that
/// violates the "never partially applied" invariant (spec §3). This crate
/// rejects that shape outright rather than accepting a reaction it cannot
/// commit atomically.
#[derive(Debug, thiserror::Error)]
pub enum ReactionFault {
    #[error(
        "reaction already has a decisive (rendezvous-completing) entry; \
         composing two independent waiter completions into one atomic reaction is not supported"
    )]
    MultipleDecisiveEntries,
}

type PostCommitFn = Arc<dyn Fn() + Send + Sync>;

/// An in-flight, not-yet-committed bundle of tentative CAS operations and
/// post-commit callbacks.
///
/// A `Reaction` only ever belongs to the thread currently attempting a
/// reagent, so it is implemented as a plain mutable builder rather than a
/// persistent/immutable value: `with_cas`/`with_post_commit` push onto the
/// accumulator in place. [`Reaction::checkpoint`]/[`Reaction::rollback_to`]
/// give [`crate::combinators::choice`] the "immutable record" behavior the
/// specification describes — a backtracking branch can always restore the
/// reaction to exactly the state it was in before it started.
#[derive(Default)]
pub struct Reaction {
    cas_ops: Vec<Arc<dyn CasOp>>,
    post_commits: Vec<PostCommitFn>,
}

/// Marks a point in a reaction's history to roll back to.
#[derive(Clone, Copy)]
pub struct Checkpoint {
    cas_len: usize,
    post_commit_len: usize,
}

impl Reaction {
    /// The canonical empty reaction.
    pub fn inert() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cas_len: self.cas_ops.len(),
            post_commit_len: self.post_commits.len(),
        }
    }

    /// Discards every entry recorded after `cp`. Used when a choice branch
    /// backtracks: whatever it tentatively staged must vanish before the
    /// other branch gets a turn.
    pub fn rollback_to(&mut self, cp: Checkpoint) {
        self.cas_ops.truncate(cp.cas_len);
        self.post_commits.truncate(cp.post_commit_len);
    }

    /// Stages a tentative CAS entry.
    ///
    /// # Panics
    /// Panics with [`ReactionFault::MultipleDecisiveEntries`] if `op` is
    /// decisive and this reaction already holds a decisive entry (e.g. a
    /// reagent composing two rendezvous completions, such as two
    /// `SwapChan::swap` legs, into a single reaction). This is a
    /// programming error in the composed reagent, not a recoverable runtime
    /// condition — see [`ReactionFault`].
    pub fn with_cas(&mut self, op: Arc<dyn CasOp>) {
        if op.is_decisive() && self.cas_ops.iter().any(|existing| existing.is_decisive()) {
            panic!("{}", ReactionFault::MultipleDecisiveEntries);
        }
        self.cas_ops.push(op);
    }

    pub fn with_post_commit(&mut self, pc: impl Fn() + Send + Sync + 'static) {
        self.post_commits.push(Arc::new(pc));
    }

    pub fn is_empty(&self) -> bool {
        self.cas_ops.is_empty()
    }

    /// Atomically apply every recorded CAS, then run the post-commit
    /// callbacks in registration order. On failure, nothing is mutated.
    ///
    /// Non-decisive entries (ordinary cells) are locked in address order
    /// and, while locked, verify their expected value before recursing into
    /// the rest of the chain. Decisive entries (a waiter's own status) sit
    /// last and perform the one CAS that cannot be pre-checked and rolled
    /// back; it is this entry's compare-exchange, or — when there is no
    /// decisive entry — the innermost cell's verify, that is the reaction's
    /// true linearization point.
    pub fn try_commit(&self) -> bool {
        let mut ops: Vec<&Arc<dyn CasOp>> = self.cas_ops.iter().collect();
        ops.sort_by_key(|op| (op.is_decisive(), op.addr()));
        let committed = Self::commit_chain(&ops);
        if committed {
            for pc in &self.post_commits {
                pc();
            }
        }
        committed
    }

    fn commit_chain(ops: &[&Arc<dyn CasOp>]) -> bool {
        match ops.split_first() {
            None => true,
            Some((head, rest)) => head.commit_with(&mut || Self::commit_chain(rest)),
        }
    }
}
