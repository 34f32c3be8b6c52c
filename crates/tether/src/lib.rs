//! Manual reference counting with pluggable finalizer and destructor hooks.
//!
//! `tether` is a thin layer over raw allocation that tracks the number of
//! logical owners of a heap object and runs custom cleanup exactly once,
//! the instant the count reaches zero. The bookkeeping lives in a fixed-size
//! record placed immediately before the payload in the same allocation, so
//! a payload pointer is all any operation needs — the record is recovered by
//! a fixed offset, with no side table and no extra indirection. Code that
//! does not participate in counting can use the payload as if it were a
//! plain allocation.
//!
//! # Architecture
//!
//! ```text
//! Strong<T> (safe owning handle: clone = retain, drop = release)
//! └── typed (sized-for-T creation, drop-glue finalizer)
//!     └── raw (create / retain / release / set_finalizer / set_destructor)
//!         └── Record  [ count | size | finalizer | destructor | payload… ]
//! ```
//!
//! # Counting protocol
//!
//! An allocation starts with a count of 1 — the creator is the first owner.
//! [`raw::retain`] declares one additional owner; [`raw::release`] retires
//! one. Every retain must be matched by exactly one release, plus one final
//! release for the creation reference. The release that drives the count to
//! zero runs the finalizer (payload still intact, free to release owned
//! sub-objects) and then the destructor (handed the start of the whole
//! block), both exactly once. There is no partial teardown state and no
//! way back.
//!
//! # Safety model
//!
//! This crate contains the workspace's `unsafe` code. [`raw`] operations
//! take bare payload pointers and trust the caller to balance the protocol;
//! misuse (over-release, use after destruction, alien pointers) is
//! undefined behavior, though debug builds assert on the detectable cases.
//! [`Strong`] wraps the same mechanism in an owning handle whose clone and
//! drop keep the balance for you, and which cannot cross threads — the
//! count is an ordinary non-atomic integer by contract.
//!
//! # Cycles
//!
//! There is no cycle collector. Two objects that retain each other keep
//! each other alive until an owner breaks one of the edges. Cycles must be
//! broken manually.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod raw;
mod record;
pub mod strong;
pub mod typed;

// Public re-exports for the primary API surface.
pub use error::AllocError;
pub use record::{Destructor, Finalizer, PAYLOAD_ALIGN};
pub use strong::Strong;
