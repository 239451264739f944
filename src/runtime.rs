//! Mutator runtime fields and the inline fast paths.
//!
//! The allocation pointer and allocation limit conceptually live in
//! registers. The mutator borrows them from the heaplet with
//! `heaplet_to_runtime`, threads them through the inline allocation and
//! write-barrier fast paths, and gives them back with `runtime_to_heaplet`
//! (which flushes the SSB so the heaplet's view is consistent) before any
//! slow-path operation runs.
//!
//! The SSB lives in the tail of the nursery's current block: pushing an
//! entry is one decrement of the limit and one store, so the write barrier
//! compiles to a handful of instructions with a branch-rare fallback.

use crate::api::{CollectAction, Word};
use crate::block::Generation;
use crate::globals::{round_up_allocation, WORD_SIZE};
use crate::heap::Heap;
use crate::heaplet::Heaplet;

#[derive(Clone, Copy, Debug)]
pub struct RuntimeFields {
    pub ap: *mut u8,
    pub limit: *mut u8,
}

impl RuntimeFields {
    pub const fn empty() -> Self {
        Self {
            ap: core::ptr::null_mut(),
            limit: core::ptr::null_mut(),
        }
    }
}

/// Move the runtime fields from the heaplet to the mutator.
pub fn heaplet_to_runtime(heaplet: &mut Heaplet) -> RuntimeFields {
    let (ap, limit) = heaplet.take_runtime();
    RuntimeFields { ap, limit }
}

/// Give the runtime fields back to the heaplet, flushing the SSB.
pub fn runtime_to_heaplet(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
}

#[cfg(debug_assertions)]
#[inline(always)]
fn debug_fill(heaplet: &Heaplet, raw: *mut u8, size: usize) {
    let fill = heaplet.shape_table().uninitialised_object().bits();
    unsafe {
        for i in 0..size / WORD_SIZE {
            *(raw.add(i * WORD_SIZE) as *mut usize) = fill;
        }
    }
}

#[cfg(not(debug_assertions))]
#[inline(always)]
fn debug_fill(_heaplet: &Heaplet, _raw: *mut u8, _size: usize) {}

/// Allocation fast path: one bump, one compare.
#[inline(always)]
pub fn allocate(heaplet: &mut Heaplet, rt: &mut RuntimeFields, size: usize) -> *mut u8 {
    let rounded = round_up_allocation(size);
    let raw = rt.ap;
    let new_ap = raw as usize + rounded;
    if new_ap > rt.limit as usize {
        return allocate_uncommon(heaplet, rt, rounded);
    }
    rt.ap = new_ap as *mut u8;
    debug_fill(heaplet, raw, rounded);
    raw
}

#[inline(never)]
#[cold]
fn allocate_uncommon(heaplet: &mut Heaplet, rt: &mut RuntimeFields, rounded: usize) -> *mut u8 {
    // An SSB flush moves the limit back up; retry before a real slow path.
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    let raw = rt.ap;
    let new_ap = raw as usize + rounded;
    if new_ap <= rt.limit as usize && !raw.is_null() {
        rt.ap = new_ap as *mut u8;
        debug_fill(heaplet, raw, rounded);
        return raw;
    }
    heaplet.give_runtime(rt.ap, rt.limit);
    let raw = unsafe { heaplet.allocate_slow_path(rounded, CollectAction::Default) };
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
    debug_fill(heaplet, raw, rounded);
    raw
}

/// Write barrier without sharing: remember that `updated` was mutated by
/// pushing it into the SSB.
#[inline(always)]
pub fn write_barrier(heaplet: &mut Heaplet, rt: &mut RuntimeFields, updated: Word) {
    debug_assert!(!heaplet.shape_table().is_unboxed(updated));
    let slot = (rt.limit as usize).wrapping_sub(WORD_SIZE);
    if rt.limit.is_null() || slot < rt.ap as usize {
        ssb_flush_overflow(heaplet, rt, updated);
        return;
    }
    unsafe {
        *(slot as *mut Word) = updated;
    }
    rt.limit = slot as *mut u8;
}

/// The overflow variant of the SSB flush: empty the buffer, then record the
/// entry that did not fit.
#[inline(never)]
#[cold]
fn ssb_flush_overflow(heaplet: &mut Heaplet, rt: &mut RuntimeFields, updated: Word) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.ssb_record(updated);
}

/// Write barrier with sharing: a store into a shared object must first lift
/// the new referent (and its transitive closure) into the shared
/// generation. The caller must use the possibly-updated `new_ref` for the
/// actual store, and must accept that `updated` may have been relocated by
/// the collection the share runs.
#[inline(always)]
pub fn write_barrier_with_share(
    heaplet: &mut Heaplet,
    rt: &mut RuntimeFields,
    updated: &mut Word,
    new_ref: &mut Word,
) {
    debug_assert!(!heaplet.shape_table().is_unboxed(*updated));
    unsafe {
        if (*updated.block()).generation == Generation::Shared {
            share_barrier(heaplet, rt, new_ref);
            return;
        }
    }
    write_barrier(heaplet, rt, *updated);
}

/// Promote `new_ref` into the shared generation unless it is already
/// unboxed or shared.
#[cold]
pub fn share_barrier(heaplet: &mut Heaplet, rt: &mut RuntimeFields, new_ref: &mut Word) {
    if heaplet.shape_table().is_unboxed(*new_ref) {
        return;
    }
    unsafe {
        if (*new_ref.block()).generation == Generation::Shared {
            return;
        }
    }
    *new_ref = share(heaplet, rt, *new_ref);
}

/// Explicit SSB flush.
pub fn ssb_flush(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
}

/// Make `object` and everything reachable from it live in the shared
/// generation; returns the relocated reference.
pub fn share(heaplet: &mut Heaplet, rt: &mut RuntimeFields, object: Word) -> Word {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
    let shared = unsafe { heaplet.share_owned(object) };
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
    shared
}

/// Run a collection of the requested kind.
pub fn collect(heaplet: &mut Heaplet, rt: &mut RuntimeFields, action: CollectAction) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
    unsafe {
        heaplet.collect_owned(action);
    }
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
}

/// Ask every heaplet to collect. Blocks until the global collection ran.
pub fn request_global_collection(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    heaplet.check_collection_enabled();
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
    unsafe {
        Heap::global_collect_owned(heaplet);
    }
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
}

/// Safe-point poll: one unsynchronised load in the common case. Returns
/// true if a global collection was waited out (every reference the mutator
/// holds outside the heap must be reloaded from its roots).
#[inline(always)]
pub fn safepoint(heaplet: &mut Heaplet, rt: &mut RuntimeFields) -> bool {
    if heaplet.heap().sync().request_pending() {
        safepoint_slow(heaplet, rt);
        return true;
    }
    false
}

/// Alias for VM code generators that emit safe points by this name.
#[inline(always)]
pub fn global_collection_safe_point(heaplet: &mut Heaplet, rt: &mut RuntimeFields) -> bool {
    safepoint(heaplet, rt)
}

#[inline(never)]
#[cold]
fn safepoint_slow(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
    heaplet.global_safe_point_owned();
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
}

/// Park the heaplet before potentially long blocking I/O. The runtime
/// fields stay with the heaplet until `after_blocking`.
pub fn before_blocking(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    rt.limit = heaplet.ssb_flush_internal(rt.limit);
    heaplet.give_runtime(rt.ap, rt.limit);
    *rt = RuntimeFields::empty();
    unsafe {
        Heap::before_blocking_owned(heaplet);
    }
}

/// Resume after blocking I/O; waits out any global collection in progress
/// and hands the (possibly relocated) runtime fields back.
pub fn after_blocking(heaplet: &mut Heaplet, rt: &mut RuntimeFields) {
    unsafe {
        Heap::after_blocking_owned(heaplet);
    }
    let (ap, limit) = heaplet.take_runtime();
    rt.ap = ap;
    rt.limit = limit;
}
