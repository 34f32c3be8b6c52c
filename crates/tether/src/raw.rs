//! The raw retain/release protocol over header-prefixed allocations.
//!
//! This module is the mechanism: [`create`] hands out payload pointers
//! whose bookkeeping record sits immediately before them in the same
//! block, and every other operation recovers that record by fixed offset.
//! Counting is opt-in at the call sites that perform [`retain`] and
//! [`release`] — everyone else may treat the payload as plain memory.
//!
//! This module concentrates the crate's `unsafe` surface. Each operation
//! documents its contract under `# Safety`; the short version is that
//! payload pointers must come from [`create`], must still be alive, and
//! retains and releases must balance. Debug builds assert on the
//! detectable violations (underflow, overflow, use after destruction)
//! without changing the contract for correct callers.

use std::alloc::{alloc, dealloc};
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::record::{Destructor, Finalizer, Record, POISONED};

/// Allocate a reference-counted block with `size` payload bytes.
///
/// The block holds the bookkeeping record followed by the payload; the
/// returned pointer is the payload address, aligned to
/// [`PAYLOAD_ALIGN`](crate::PAYLOAD_ALIGN). The count starts at 1 — the
/// caller is the first owner and must eventually [`release`] exactly once.
///
/// `finalizer` runs on the payload just before destruction, if set.
/// `destructor` releases the storage; [`dealloc_block`] is substituted
/// when `None`.
///
/// Creation itself has no preconditions; *operating* on the returned
/// pointer is what carries obligations.
pub fn create(
    size: usize,
    finalizer: Option<Finalizer>,
    destructor: Option<Destructor>,
) -> Result<NonNull<u8>, AllocError> {
    let layout = Record::block_layout(size)?;
    // SAFETY: the layout is never zero-sized — it always covers the record.
    let block = unsafe { alloc(layout) };
    let Some(block) = NonNull::new(block) else {
        return Err(AllocError::Exhausted {
            requested: layout.size(),
        });
    };
    let record = block.cast::<Record>();
    // SAFETY: the block is freshly allocated, aligned for Record, and
    // exclusively owned here.
    unsafe {
        record.as_ptr().write(Record {
            count: 1,
            size,
            finalizer,
            destructor: destructor.unwrap_or(dealloc_block),
        });
        Ok(Record::payload(record))
    }
}

/// Declare one additional logical owner of `payload`.
///
/// Pure bookkeeping: the count goes up by one, nothing else happens.
/// Every retain must be matched by exactly one [`release`]. The counter
/// is not bounds-checked in release builds; balance is the caller's
/// responsibility.
///
/// # Safety
///
/// `payload` must have been returned by [`create`] and its record must
/// not have been destroyed. Not safe to call concurrently with any other
/// operation on the same record.
pub unsafe fn retain(payload: NonNull<u8>) {
    // SAFETY: the caller guarantees a live record precedes the payload.
    let record = unsafe { &mut *Record::from_payload(payload).as_ptr() };
    debug_assert_ne!(record.count, POISONED, "retain on a destroyed record");
    debug_assert!(record.count < POISONED - 1, "retain count overflow");
    record.count += 1;
}

/// Retire one logical owner of `payload`.
///
/// Decrements the count. If an owner remains, nothing else happens and the
/// object stays fully valid. If the count reaches zero the finalizer (when
/// set) runs with the payload pointer — memory still intact, free to
/// release owned sub-objects — and then the destructor runs with the
/// record pointer, releasing the whole block. After that the payload
/// pointer dangles; any further use is undefined.
///
/// # Safety
///
/// `payload` must have been returned by [`create`] and its record must
/// not have been destroyed; releases must not outnumber the creation
/// reference plus prior [`retain`]s. Not safe to call concurrently with
/// any other operation on the same record.
pub unsafe fn release(payload: NonNull<u8>) {
    let record = unsafe { Record::from_payload(payload) };
    // SAFETY: the caller guarantees the record is live.
    let remaining = unsafe {
        let record = record.as_ptr();
        debug_assert_ne!((*record).count, POISONED, "release on a destroyed record");
        debug_assert!((*record).count >= 1, "release underflow");
        (*record).count -= 1;
        (*record).count
    };
    if remaining < 1 {
        // SAFETY: the count just crossed zero; this is the sole teardown.
        unsafe { destroy(record, payload) };
    }
}

/// Finalize-then-destroy teardown, separated as the cold path.
#[cold]
unsafe fn destroy(record: NonNull<Record>, payload: NonNull<u8>) {
    // SAFETY: the record is still intact; the count has reached zero and
    // no owner remains, so this runs at most once per record.
    unsafe {
        if let Some(finalizer) = (*record.as_ptr()).finalizer {
            finalizer(payload);
        }
        let destructor = (*record.as_ptr()).destructor;
        #[cfg(debug_assertions)]
        {
            (*record.as_ptr()).count = POISONED;
        }
        destructor(record.cast());
    }
}

/// Replace the finalizer on an already-allocated record.
///
/// Takes effect at the next release that drops the count to zero. `None`
/// removes the hook entirely.
///
/// # Safety
///
/// Same contract as [`retain`]: live payload from [`create`], no
/// concurrent operations on the record.
pub unsafe fn set_finalizer(payload: NonNull<u8>, finalizer: Option<Finalizer>) {
    // SAFETY: the caller guarantees a live record precedes the payload.
    let record = unsafe { &mut *Record::from_payload(payload).as_ptr() };
    debug_assert_ne!(record.count, POISONED, "set_finalizer on a destroyed record");
    record.finalizer = finalizer;
}

/// Replace the destructor on an already-allocated record.
///
/// Takes effect at the next release that drops the count to zero. The new
/// destructor receives the record pointer ([`record_start`]) and owns the
/// block from that point.
///
/// # Safety
///
/// Same contract as [`retain`]: live payload from [`create`], no
/// concurrent operations on the record.
pub unsafe fn set_destructor(payload: NonNull<u8>, destructor: Destructor) {
    // SAFETY: the caller guarantees a live record precedes the payload.
    let record = unsafe { &mut *Record::from_payload(payload).as_ptr() };
    debug_assert_ne!(record.count, POISONED, "set_destructor on a destroyed record");
    record.destructor = destructor;
}

/// Read the current owner count. A debugging and testing aid, not a
/// synchronization primitive.
///
/// # Safety
///
/// Same contract as [`retain`].
pub unsafe fn count(payload: NonNull<u8>) -> usize {
    // SAFETY: the caller guarantees a live record precedes the payload.
    unsafe { (*Record::from_payload(payload).as_ptr()).count }
}

/// The block address a destructor will receive for `payload` — the start
/// of the record, not the payload.
///
/// Useful inside custom destructors' bookkeeping and anywhere the whole
/// block must be identified.
///
/// # Safety
///
/// Same contract as [`retain`].
pub unsafe fn record_start(payload: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: the caller guarantees a live record precedes the payload.
    unsafe { Record::from_payload(payload).cast() }
}

/// The default destructor: return the whole block to the allocator.
///
/// Public so custom destructors can do their own bookkeeping and then
/// delegate the actual deallocation here.
///
/// # Safety
///
/// `block` must be the record pointer of a block allocated by [`create`]
/// (as handed to a destructor, or obtained via [`record_start`]), and the
/// block must not be used afterwards.
pub unsafe fn dealloc_block(block: NonNull<u8>) {
    let record = block.cast::<Record>();
    // SAFETY: the caller hands the start of a block laid out by `create`;
    // the stored size reconstructs the exact creation layout.
    unsafe {
        let size = (*record.as_ptr()).size;
        let layout =
            Record::block_layout(size).expect("layout was validated when the block was created");
        dealloc(block.as_ptr(), layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PAYLOAD_ALIGN;
    use std::cell::Cell;

    thread_local! {
        static FINALIZED: Cell<usize> = const { Cell::new(0) };
        static DESTROYED: Cell<usize> = const { Cell::new(0) };
    }

    fn reset() {
        FINALIZED.with(|c| c.set(0));
        DESTROYED.with(|c| c.set(0));
    }

    fn finalized() -> usize {
        FINALIZED.with(Cell::get)
    }

    fn destroyed() -> usize {
        DESTROYED.with(Cell::get)
    }

    unsafe fn tally_finalizer(_payload: NonNull<u8>) {
        FINALIZED.with(|c| c.set(c.get() + 1));
    }

    unsafe fn tally_destructor(block: NonNull<u8>) {
        DESTROYED.with(|c| c.set(c.get() + 1));
        // SAFETY: forwarding the block we were handed, exactly once.
        unsafe { dealloc_block(block) };
    }

    #[test]
    fn create_starts_with_one_owner() {
        let payload = create(16, None, None).unwrap();
        // SAFETY: fresh live payload from create.
        unsafe {
            assert_eq!(count(payload), 1);
            release(payload);
        }
    }

    #[test]
    fn payload_is_sixteen_byte_aligned() {
        let payload = create(1, None, None).unwrap();
        assert_eq!(payload.as_ptr() as usize % PAYLOAD_ALIGN, 0);
        // SAFETY: live payload, sole owner.
        unsafe { release(payload) };
    }

    #[test]
    fn payload_usable_as_plain_memory() {
        let payload = create(64, None, None).unwrap();
        // SAFETY: the payload is a fresh 64-byte region we exclusively own.
        unsafe {
            std::ptr::write_bytes(payload.as_ptr(), 0xAB, 64);
            assert_eq!(*payload.as_ptr().add(63), 0xAB);
            release(payload);
        }
    }

    #[test]
    fn single_release_runs_both_hooks_once() {
        reset();
        let payload = create(32, Some(tally_finalizer), Some(tally_destructor)).unwrap();
        // SAFETY: live payload, sole owner.
        unsafe { release(payload) };
        assert_eq!(finalized(), 1);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn retain_defers_teardown_until_matched() {
        reset();
        let payload = create(32, Some(tally_finalizer), Some(tally_destructor)).unwrap();
        // SAFETY: live payload; retains and releases balance below.
        unsafe {
            retain(payload);
            retain(payload);
            retain(payload);
            assert_eq!(count(payload), 4);

            release(payload);
            release(payload);
            release(payload);
            assert_eq!(finalized(), 0);
            assert_eq!(destroyed(), 0);
            assert_eq!(count(payload), 1);

            release(payload);
        }
        assert_eq!(finalized(), 1);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn missing_finalizer_still_destroys_once() {
        reset();
        let payload = create(8, None, Some(tally_destructor)).unwrap();
        // SAFETY: live payload, sole owner.
        unsafe { release(payload) };
        assert_eq!(finalized(), 0);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn default_destructor_substituted_when_none_given() {
        reset();
        let payload = create(8, Some(tally_finalizer), None).unwrap();
        // SAFETY: live payload, sole owner. The default destructor frees
        // the block after the finalizer fires.
        unsafe { release(payload) };
        assert_eq!(finalized(), 1);
    }

    #[test]
    fn set_finalizer_takes_effect_at_zero_crossing() {
        reset();
        let payload = create(8, None, Some(tally_destructor)).unwrap();
        // SAFETY: live payload throughout; destroyed by the last release.
        unsafe {
            set_finalizer(payload, Some(tally_finalizer));
            release(payload);
        }
        assert_eq!(finalized(), 1);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn clearing_the_finalizer_silences_it() {
        reset();
        let payload = create(8, Some(tally_finalizer), Some(tally_destructor)).unwrap();
        // SAFETY: live payload throughout; destroyed by the last release.
        unsafe {
            set_finalizer(payload, None);
            release(payload);
        }
        assert_eq!(finalized(), 0);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn set_destructor_replaces_the_default() {
        reset();
        let payload = create(8, None, None).unwrap();
        // SAFETY: live payload throughout; destroyed by the last release.
        unsafe {
            set_destructor(payload, tally_destructor);
            release(payload);
        }
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn zero_sized_payload_lifecycle() {
        reset();
        let payload = create(0, Some(tally_finalizer), Some(tally_destructor)).unwrap();
        // SAFETY: live payload, sole owner.
        unsafe { release(payload) };
        assert_eq!(finalized(), 1);
        assert_eq!(destroyed(), 1);
    }

    #[test]
    fn impossible_allocation_is_an_error_not_ub() {
        let result = create(usize::MAX, None, None);
        assert!(matches!(
            result,
            Err(crate::AllocError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn record_start_precedes_payload_by_the_header() {
        let payload = create(8, None, None).unwrap();
        // SAFETY: live payload from create.
        unsafe {
            let start = record_start(payload);
            let gap = payload.as_ptr() as usize - start.as_ptr() as usize;
            assert!(gap > 0 && gap % PAYLOAD_ALIGN == 0);
            release(payload);
        }
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn hooks_fire_exactly_once_after_balanced_ops(n in 0usize..64) {
                reset();
                let payload =
                    create(24, Some(tally_finalizer), Some(tally_destructor)).unwrap();
                // SAFETY: n retains are matched by n releases, then the
                // creation reference is released exactly once.
                unsafe {
                    for _ in 0..n {
                        retain(payload);
                    }
                    for _ in 0..n {
                        release(payload);
                        prop_assert_eq!(finalized(), 0);
                        prop_assert_eq!(destroyed(), 0);
                    }
                    release(payload);
                }
                prop_assert_eq!(finalized(), 1);
                prop_assert_eq!(destroyed(), 1);
            }

            #[test]
            fn per_object_balance_is_independent(retains in proptest::collection::vec(0usize..8, 1..12)) {
                reset();
                let objects: Vec<_> = retains
                    .iter()
                    .map(|_| {
                        create(16, Some(tally_finalizer), Some(tally_destructor)).unwrap()
                    })
                    .collect();
                // SAFETY: each object gets its retains matched, plus the
                // final creation-reference release.
                unsafe {
                    for (&payload, &n) in objects.iter().zip(&retains) {
                        for _ in 0..n {
                            retain(payload);
                        }
                    }
                    for (&payload, &n) in objects.iter().zip(&retains) {
                        for _ in 0..=n {
                            release(payload);
                        }
                    }
                }
                prop_assert_eq!(finalized(), retains.len());
                prop_assert_eq!(destroyed(), retains.len());
            }
        }
    }
}
