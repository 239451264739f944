//! Global-collection coordination.
//!
//! A heaplet that needs a heap-wide collection publishes a request word;
//! every other heaplet polls it, without synchronisation, from its fast
//! paths. On seeing the request a heaplet takes the heap lock, parks, and
//! waits on a condition variable until the collector has finished. Threads
//! about to block in the OS park themselves ahead of time so they never
//! hold up a collection.

use std::ptr::null_mut;

use atomic::Atomic;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};

use crate::heaplet::Heaplet;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcRequest {
    None,
    GlobalGc,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeapletState {
    /// Attached to a running mutator thread.
    InUse,
    /// Parked at a safe point; must be woken when the collection ends.
    ToBeWokenUp,
    /// Parked around blocking I/O; resumes on its own.
    NotToBeWokenUp,
    /// Executing a collection on behalf of the whole heap.
    Collecting,
}

/// Intrusive registry of heaplets, guarded by the heap lock. Heaplets sit
/// on the in-use list while their thread runs and on the idle list while it
/// is parked around blocking I/O.
pub(crate) struct HeapletLists {
    pub in_use_head: *mut Heaplet,
    pub idle_head: *mut Heaplet,
    pub attached: usize,
    /// Heaplets currently in `InUse` state; a global collection may start
    /// once this drops to zero (the requester excluded itself already).
    pub running: usize,
}

impl HeapletLists {
    pub(crate) const fn new() -> Self {
        Self {
            in_use_head: null_mut(),
            idle_head: null_mut(),
            attached: 0,
            running: 0,
        }
    }

    pub(crate) unsafe fn push_in_use(&mut self, heaplet: *mut Heaplet) {
        Self::push(&mut self.in_use_head, heaplet);
    }

    pub(crate) unsafe fn push_idle(&mut self, heaplet: *mut Heaplet) {
        Self::push(&mut self.idle_head, heaplet);
    }

    pub(crate) unsafe fn unlink_in_use(&mut self, heaplet: *mut Heaplet) {
        Self::unlink(&mut self.in_use_head, heaplet);
    }

    pub(crate) unsafe fn unlink_idle(&mut self, heaplet: *mut Heaplet) {
        Self::unlink(&mut self.idle_head, heaplet);
    }

    unsafe fn push(head: &mut *mut Heaplet, heaplet: *mut Heaplet) {
        (*heaplet).prev = null_mut();
        (*heaplet).next = *head;
        if !(*head).is_null() {
            (**head).prev = heaplet;
        }
        *head = heaplet;
    }

    unsafe fn unlink(head: &mut *mut Heaplet, heaplet: *mut Heaplet) {
        if (*heaplet).prev.is_null() {
            debug_assert_eq!(*head, heaplet);
            *head = (*heaplet).next;
        } else {
            (*(*heaplet).prev).next = (*heaplet).next;
        }
        if !(*heaplet).next.is_null() {
            (*(*heaplet).next).prev = (*heaplet).prev;
        }
        (*heaplet).prev = null_mut();
        (*heaplet).next = null_mut();
    }

    /// Every registered heaplet, in-use and idle.
    pub(crate) unsafe fn all(&self) -> Vec<*mut Heaplet> {
        let mut out = Vec::with_capacity(self.attached);
        let mut cur = self.in_use_head;
        while !cur.is_null() {
            out.push(cur);
            cur = (*cur).next;
        }
        cur = self.idle_head;
        while !cur.is_null() {
            out.push(cur);
            cur = (*cur).next;
        }
        out
    }
}

pub struct HeapSync {
    /// Read without synchronisation from mutator fast paths.
    pub(crate) request: CachePadded<Atomic<GcRequest>>,
    pub(crate) lists: Mutex<HeapletLists>,
    /// Signalled when a global collection finishes.
    pub(crate) cv_done: Condvar,
    /// Signalled each time `running` drops; the requester waits on it.
    pub(crate) cv_parked: Condvar,
}

impl HeapSync {
    pub(crate) fn new() -> Self {
        Self {
            request: CachePadded::new(Atomic::new(GcRequest::None)),
            lists: Mutex::new(HeapletLists::new()),
            cv_done: Condvar::new(),
            cv_parked: Condvar::new(),
        }
    }

    #[inline(always)]
    pub(crate) fn request_pending(&self) -> bool {
        self.request.load(atomic::Ordering::Relaxed) == GcRequest::GlobalGc
    }
}

unsafe impl Send for HeapSync {}
unsafe impl Sync for HeapSync {}
