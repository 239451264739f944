//! Block allocator: carves `BLOCK_SIZE` aligned blocks out of one large
//! reservation and recycles returned blocks through a lock-free free list.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::atomic::AtomicCell;

use crate::block::Block;
use crate::globals::BLOCK_SIZE;
use crate::mmap::Reservation;

/// Lock-free stack of free blocks, threaded through `Block::next`.
pub struct FreeBlockList {
    head: AtomicCell<*mut Block>,
    count: AtomicUsize,
}

impl FreeBlockList {
    pub fn new() -> Self {
        Self {
            head: AtomicCell::new(core::ptr::null_mut()),
            count: AtomicUsize::new(0),
        }
    }

    pub unsafe fn add_free(&self, free: *mut Block) {
        let mut next = self.head.load();
        loop {
            debug_assert_ne!(free, next);
            (*free).next = next;
            match self.head.compare_exchange(next, free) {
                Ok(_) => {
                    self.count.fetch_add(1, Ordering::AcqRel);
                    return;
                }
                Err(actual) => next = actual,
            }
        }
    }

    #[inline]
    pub fn take_free(&self) -> *mut Block {
        loop {
            unsafe {
                let head = self.head.load();
                if head.is_null() {
                    return core::ptr::null_mut();
                }
                if self.head.compare_exchange(head, (*head).next).is_err() {
                    continue;
                }
                self.count.fetch_sub(1, Ordering::AcqRel);
                return head;
            }
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

pub struct BlockAllocator {
    free_blocks: FreeBlockList,
    /// Bump cursor over the not-yet-carved part of the reservation.
    cursor: AtomicUsize,
    bound: usize,
    reservation: Reservation,
}

impl BlockAllocator {
    /// Reserve enough address space for `capacity` bytes of blocks.
    pub fn new(capacity: usize) -> Option<BlockAllocator> {
        let reservation = Reservation::new(capacity + BLOCK_SIZE)?;
        let data = reservation.aligned();
        let bound = data as usize + capacity;
        let this = Self {
            free_blocks: FreeBlockList::new(),
            cursor: AtomicUsize::new(data as usize),
            bound,
            reservation,
        };
        debug_assert!(data as usize % BLOCK_SIZE == 0);
        Some(this)
    }

    /// Get a fresh `BLOCK_SIZE` aligned block, or null when the reservation
    /// and the free list are both exhausted. The caller escalates to a
    /// collection before treating null as fatal.
    pub fn get_block(&self) -> *mut Block {
        let recycled = self.free_blocks.take_free();
        if !recycled.is_null() {
            self.reservation.commit(recycled as *mut u8, BLOCK_SIZE);
            return unsafe { Block::initialize(recycled as *mut u8) };
        }
        match self.carve() {
            p if p.is_null() => p,
            p => unsafe { Block::initialize(p as *mut u8) },
        }
    }

    fn carve(&self) -> *mut Block {
        let mut old = self.cursor.load(Ordering::Relaxed);
        loop {
            let new = old + BLOCK_SIZE;
            if new > self.bound {
                return core::ptr::null_mut();
            }
            match self
                .cursor
                .compare_exchange_weak(old, new, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => {
                    debug_assert!(old % BLOCK_SIZE == 0);
                    self.reservation.commit(old as *mut u8, BLOCK_SIZE);
                    return old as *mut Block;
                }
                Err(x) => old = x,
            }
        }
    }

    /// Return a block; its pages are given back to the OS.
    pub fn return_block(&self, block: *mut Block) {
        unsafe {
            (*block).allocated = 0;
            self.reservation.dontneed(block as *mut u8, BLOCK_SIZE);
            self.free_blocks.add_free(block);
        }
    }

    pub fn is_in_space(&self, object: *const u8) -> bool {
        self.reservation.start() <= object as *mut u8 && (object as usize) < self.bound
    }

    pub fn total_blocks(&self) -> usize {
        (self.bound - self.reservation.aligned() as usize) / BLOCK_SIZE
    }

    /// Number of blocks that can still be handed out.
    pub fn available_blocks(&self) -> usize {
        let uncarved = (self.bound - self.cursor.load(Ordering::Relaxed)) / BLOCK_SIZE;
        uncarved + self.free_blocks.count()
    }
}
