//! Test utilities and fixtures for tether development.
//!
//! Provides thread-local finalize/destroy tallies with matching hook
//! functions, a per-record [`HookLedger`] for double-free and leak
//! detection in ownership-graph tests, and linked-node fixtures in
//! [`fixtures`].
//!
//! Tallies and the ledger are thread-local, so tests on separate threads
//! (the default test harness) never observe each other. Call
//! [`reset_tallies`] at the start of every test that reads them.

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use indexmap::IndexMap;
use tether::raw;

thread_local! {
    static FINALIZED: Cell<usize> = const { Cell::new(0) };
    static DESTROYED: Cell<usize> = const { Cell::new(0) };
    static LEDGER: RefCell<IndexMap<usize, Tally>> = RefCell::new(IndexMap::new());
}

/// Clear the tallies and the ledger for the current thread.
pub fn reset_tallies() {
    FINALIZED.with(|c| c.set(0));
    DESTROYED.with(|c| c.set(0));
    LEDGER.with(|l| l.borrow_mut().clear());
}

/// Total finalizer invocations on this thread since the last reset.
pub fn finalized() -> usize {
    FINALIZED.with(Cell::get)
}

/// Total destructor invocations on this thread since the last reset.
pub fn destroyed() -> usize {
    DESTROYED.with(Cell::get)
}

/// Finalizer that bumps the finalize tally and nothing else.
///
/// # Safety
///
/// Standard finalizer contract: invoked by `release` with a live payload.
pub unsafe fn tally_finalizer(_payload: NonNull<u8>) {
    FINALIZED.with(|c| c.set(c.get() + 1));
}

/// Destructor that bumps the destroy tally, then frees the block.
///
/// # Safety
///
/// Standard destructor contract: invoked by `release` with the record
/// pointer of the block being destroyed.
pub unsafe fn tally_destructor(block: NonNull<u8>) {
    DESTROYED.with(|c| c.set(c.get() + 1));
    // SAFETY: forwarding the block we were handed, exactly once.
    unsafe { raw::dealloc_block(block) };
}

/// Per-record finalize/destroy counts, keyed by record address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub finalized: usize,
    pub destroyed: usize,
}

/// The per-record event map: record address → [`Tally`], in creation
/// order of the first event per record.
///
/// `IndexMap` rather than `HashMap` so failure reports list records in a
/// deterministic order.
pub struct HookLedger;

impl HookLedger {
    /// Snapshot of the ledger in insertion order.
    pub fn snapshot() -> Vec<(usize, Tally)> {
        LEDGER.with(|l| l.borrow().iter().map(|(&k, &v)| (k, v)).collect())
    }

    /// Assert that exactly `expected` records were torn down, each
    /// finalized exactly once and destroyed exactly once.
    ///
    /// Panics naming the first offending record — a count of 0 means a
    /// leak of that phase, above 1 a double-finalize or double-free.
    pub fn assert_each_torn_down_once(expected: usize) {
        let snapshot = Self::snapshot();
        assert_eq!(
            snapshot.len(),
            expected,
            "expected {expected} records in the ledger, saw {}",
            snapshot.len()
        );
        for (addr, tally) in snapshot {
            assert_eq!(
                tally,
                Tally {
                    finalized: 1,
                    destroyed: 1
                },
                "record {addr:#x} torn down unevenly: {tally:?}"
            );
        }
    }
}

/// Finalizer that records the event in the ledger and bumps the tally.
///
/// # Safety
///
/// Standard finalizer contract: invoked by `release` with a live payload.
pub unsafe fn ledger_finalizer(payload: NonNull<u8>) {
    // SAFETY: the payload is live for the duration of the finalizer.
    let key = unsafe { raw::record_start(payload) }.as_ptr() as usize;
    LEDGER.with(|l| {
        l.borrow_mut()
            .entry(key)
            .or_insert_with(Tally::default)
            .finalized += 1;
    });
    FINALIZED.with(|c| c.set(c.get() + 1));
}

/// Destructor that records the event in the ledger, bumps the tally, and
/// frees the block.
///
/// # Safety
///
/// Standard destructor contract: invoked by `release` with the record
/// pointer of the block being destroyed.
pub unsafe fn ledger_destructor(block: NonNull<u8>) {
    let key = block.as_ptr() as usize;
    LEDGER.with(|l| {
        l.borrow_mut()
            .entry(key)
            .or_insert_with(Tally::default)
            .destroyed += 1;
    });
    DESTROYED.with(|c| c.set(c.get() + 1));
    // SAFETY: forwarding the block we were handed, exactly once.
    unsafe { raw::dealloc_block(block) };
}
