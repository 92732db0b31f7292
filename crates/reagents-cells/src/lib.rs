//! Concrete shared-state leaves for the `reagents-core` algebra.
//!
//! `reagents-core` defines the reagent algebra and the try-react/commit
//! engine; it never constructs a cell or a channel itself (spec §1, §6).
//! This crate is the "handler" side of that split: [`Ref`] is a
//! CAS-capable atomic reference cell, and [`SwapChan`] is the synchronous
//! rendezvous channel the spec calls a compare-and-set channel. Both are
//! built entirely on the public surface `reagents-core` exposes to
//! external collaborators -- [`reagents_core::CasOp`] for `Ref`, and
//! [`reagents_core::Offer`]/[`reagents_core::WaiterComplete`] for
//! `SwapChan`.

mod ref_cell;
mod swap_chan;

pub use ref_cell::Ref;
pub use swap_chan::SwapChan;
