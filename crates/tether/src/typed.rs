//! Typed convenience over the raw protocol.
//!
//! [`create_for`] allocates sized and placed for a known value type without
//! the caller computing sizes by hand, and [`drop_finalizer`] bridges the
//! raw hook machinery to owned Rust values by running the type's drop glue
//! as the finalizer. The counting contract is unchanged — these are
//! call-site ergonomics, not a second mechanism.

use std::ptr::NonNull;

use crate::error::AllocError;
use crate::raw;
use crate::record::{Destructor, Finalizer, PAYLOAD_ALIGN};

/// Allocate a reference-counted payload holding `value`.
///
/// Equivalent to [`raw::create`] with `size_of::<T>()` followed by moving
/// `value` into the payload. The returned pointer obeys the same protocol
/// as any payload pointer: it starts with one owner and every operation on
/// it goes through [`crate::raw`].
///
/// Types with alignment above [`PAYLOAD_ALIGN`] are rejected at compile
/// time.
///
/// Note that `value`'s `Drop` does **not** run by itself at destruction —
/// pass [`drop_finalizer`] (or wrap it in your own finalizer) if the type
/// owns anything.
pub fn create_for<T>(
    value: T,
    finalizer: Option<Finalizer>,
    destructor: Option<Destructor>,
) -> Result<NonNull<T>, AllocError> {
    const {
        assert!(
            std::mem::align_of::<T>() <= PAYLOAD_ALIGN,
            "payload type alignment exceeds the record's payload guarantee"
        )
    };
    let payload = raw::create(std::mem::size_of::<T>(), finalizer, destructor)?;
    let typed = payload.cast::<T>();
    // SAFETY: the payload is fresh, sized and aligned for T, and we are
    // the sole owner until the pointer is handed out.
    unsafe { typed.as_ptr().write(value) };
    Ok(typed)
}

/// A finalizer that runs `T`'s drop glue on the payload in place.
///
/// The standard companion to [`create_for`]: sub-objects owned by the
/// value (including other reference-counted handles) are released through
/// their own `Drop` impls while the payload memory is still intact, which
/// is exactly the finalizer's contract.
pub fn drop_finalizer<T>() -> Finalizer {
    unsafe fn drop_glue<T>(payload: NonNull<u8>) {
        // SAFETY: the finalizer receives the payload of a record created
        // for T, exactly once, before the storage is released.
        unsafe { payload.cast::<T>().drop_in_place() };
    }
    drop_glue::<T>
}
