//! Safe owning handles over the raw protocol.
//!
//! [`Strong`] is the memory-safe face of the counting mechanism: it bundles
//! the count and hooks with the payload behind an owning handle, exposing
//! the payload only through a dereference. Cloning a handle retains;
//! dropping one releases; the balance that raw callers maintain by hand is
//! kept by the type system.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::raw;
use crate::typed;

/// An owning handle to a reference-counted payload of type `T`.
///
/// Each `Strong` is one logical owner. The payload's record is the same
/// header-prefixed block the raw layer manages: a `Strong` costs one
/// pointer, and the count lives with the payload, not in the handle.
///
/// The value's `Drop` runs as the finalizer when the last handle goes
/// away, so payloads that own other `Strong`s release them then — an
/// ownership graph tears down edge by edge, each node exactly once.
///
/// `Strong` is neither `Send` nor `Sync`: the count is an ordinary
/// non-atomic integer, per the single-threaded contract.
///
/// # Cycles
///
/// Handles that reach themselves through their own payload keep the whole
/// cycle alive indefinitely. There is no collector and no weak handle;
/// break cycles manually (e.g. `node.next.take()`) before dropping the
/// last outside owner.
///
/// Inherent methods are associated functions, `Rc`-style, so they can
/// never shadow methods of `T` behind the `Deref`.
pub struct Strong<T> {
    payload: NonNull<T>,
    /// Raw-pointer marker: keeps the handle `!Send + !Sync`.
    _not_sync: PhantomData<*mut T>,
}

impl<T> Strong<T> {
    /// Allocate a new reference-counted payload holding `value`.
    ///
    /// The handle is the first owner. The value's `Drop` is installed as
    /// the finalizer and the storage uses the default destructor.
    pub fn new(value: T) -> Result<Self, AllocError> {
        let payload = typed::create_for(value, Some(typed::drop_finalizer::<T>()), None)?;
        Ok(Self {
            payload,
            _not_sync: PhantomData,
        })
    }

    /// Number of live owners of this payload.
    pub fn strong_count(this: &Self) -> usize {
        // SAFETY: `this` holds an owner, so the record is alive.
        unsafe { raw::count(this.payload.cast()) }
    }

    /// Whether two handles own the same payload.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.payload == other.payload
    }

    /// Exclusive access to the payload, available only to a sole owner.
    ///
    /// Returns `None` whenever any other handle to the same payload
    /// exists.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if Self::strong_count(this) == 1 {
            // SAFETY: count 1 and `&mut self` make this the only path to
            // the payload.
            Some(unsafe { this.payload.as_mut() })
        } else {
            None
        }
    }
}

impl<T> Clone for Strong<T> {
    /// Declare one additional owner of the same payload.
    fn clone(&self) -> Self {
        // SAFETY: `self` holds an owner, so the record is alive; the new
        // handle's drop balances this retain.
        unsafe { raw::retain(self.payload.cast()) };
        Self {
            payload: self.payload,
            _not_sync: PhantomData,
        }
    }
}

impl<T> Drop for Strong<T> {
    /// Retire this owner; the last one out finalizes and destroys.
    fn drop(&mut self) {
        // SAFETY: this handle's owner reference has not been released yet.
        unsafe { raw::release(self.payload.cast()) };
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `self` holds an owner, so the payload is alive; shared
        // access only.
        unsafe { self.payload.as_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
