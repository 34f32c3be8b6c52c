//! Linked-node fixtures for ownership-graph tests.
//!
//! [`RawNode`] exercises the raw protocol the way its canonical consumer
//! does: each node owns an optional `next` edge, and [`chain_finalizer`]
//! releases that edge during teardown, so releasing a chain's root
//! cascades node by node. [`Tree`] is the safe-layer counterpart built on
//! [`Strong`] handles.

use std::ptr::NonNull;

use smallvec::SmallVec;
use tether::{raw, typed, Destructor, Finalizer, Strong};

/// A raw linked node: a name and an optional owned `next` edge.
pub struct RawNode {
    pub name: &'static str,
    pub next: Option<NonNull<RawNode>>,
}

/// Allocate a detached [`RawNode`] with the given hooks.
///
/// Thin wrapper over [`typed::create_for`]; the returned payload follows
/// the standard counting protocol (count starts at 1).
pub fn create_node(
    name: &'static str,
    finalizer: Option<Finalizer>,
    destructor: Option<Destructor>,
) -> NonNull<RawNode> {
    typed::create_for(RawNode { name, next: None }, finalizer, destructor)
        .expect("fixture allocation")
}

/// Finalizer for linked teardown: record the event in the ledger, then
/// release the `next` edge if one is set.
///
/// # Safety
///
/// Standard finalizer contract, and the payload must be a [`RawNode`]
/// whose `next` (if set) is a live payload pointer owned by this node.
pub unsafe fn chain_finalizer(payload: NonNull<u8>) {
    // SAFETY: the payload is a live RawNode during finalization; the
    // next edge holds an owner reference which we retire here.
    unsafe {
        crate::ledger_finalizer(payload);
        let node = payload.cast::<RawNode>().as_ptr();
        if let Some(next) = (*node).next.take() {
            raw::release(next.cast());
        }
    }
}

/// Link `next` under `node`, transferring the creation reference to the
/// edge. After this, the edge is `next`'s only owner.
///
/// # Safety
///
/// Both pointers must be live [`RawNode`] payloads; `node.next` must be
/// empty.
pub unsafe fn append_owned(node: NonNull<RawNode>, next: NonNull<RawNode>) {
    // SAFETY: caller guarantees both nodes are live and the slot is free.
    unsafe {
        debug_assert!((*node.as_ptr()).next.is_none());
        (*node.as_ptr()).next = Some(next);
    }
}

/// Link `next` under `node` as a shared edge: the edge retains its own
/// reference, and the caller keeps the one it already holds.
///
/// # Safety
///
/// Same contract as [`append_owned`].
pub unsafe fn append_shared(node: NonNull<RawNode>, next: NonNull<RawNode>) {
    // SAFETY: `next` is live, so retaining for the new edge is sound.
    unsafe {
        raw::retain(next.cast());
        append_owned(node, next);
    }
}

/// Build an owned chain of `len` nodes wired with [`chain_finalizer`] and
/// the ledger destructor. Releasing the returned root tears down the
/// whole chain.
///
/// # Panics
///
/// Panics if `len` is zero.
pub fn chain(len: usize) -> NonNull<RawNode> {
    assert!(len > 0, "a chain has at least one node");
    let root = create_node("root", Some(chain_finalizer), Some(crate::ledger_destructor));
    let mut tail = root;
    for _ in 1..len {
        let next = create_node("link", Some(chain_finalizer), Some(crate::ledger_destructor));
        // SAFETY: both nodes are live and tail's slot is free; ownership
        // of `next`'s creation reference moves into the edge.
        unsafe {
            append_owned(tail, next);
        }
        tail = next;
    }
    root
}

/// A [`Strong`]-based tree node with inline child storage.
pub struct Tree {
    pub label: u32,
    pub children: SmallVec<[Strong<Tree>; 4]>,
}

/// Allocate a childless [`Tree`] node.
pub fn leaf(label: u32) -> Strong<Tree> {
    Strong::new(Tree {
        label,
        children: SmallVec::new(),
    })
    .expect("fixture allocation")
}
