//! Spaces: per-generation groups of blocks with bump allocation.
//!
//! A space allocates by bumping `ap` inside its current block and links a
//! new block when the bump crosses `limit`. During a collection a space may
//! additionally act as a destination: its scan pointer then chases its
//! allocation pointer, Cheney style, across block boundaries.

use std::ptr::null_mut;

use crate::block::{Block, BlockList, Generation};
use crate::finalize::FinaliseList;
use crate::globals::{is_aligned, ALLOCATION_GRAIN};

pub struct Space {
    pub(crate) name: &'static str,
    pub(crate) generation: Generation,
    pub(crate) blocks: BlockList,
    /// Current allocation block; tail of `blocks`.
    pub(crate) current: *mut Block,
    pub(crate) ap: *mut u8,
    pub(crate) limit: *mut u8,
    /// Scan position, meaningful only while the space is a destination.
    pub(crate) scan_block: *mut Block,
    pub(crate) scan: *mut u8,
    /// Bytes used in blocks other than the current one.
    pub(crate) bytes_in_full_blocks: usize,
    /// Finalisable objects living in this space.
    pub(crate) finalisables: FinaliseList,
    /// True while this space is a from-space of the running collection.
    pub(crate) evacuating: bool,
    /// Where live objects of this space are copied while evacuating.
    pub(crate) destination: *mut Space,
}

impl Space {
    pub(crate) fn new(name: &'static str, generation: Generation) -> Space {
        Space {
            name,
            generation,
            blocks: BlockList::new(),
            current: null_mut(),
            ap: null_mut(),
            limit: null_mut(),
            scan_block: null_mut(),
            scan: null_mut(),
            bytes_in_full_blocks: 0,
            finalisables: FinaliseList::new(),
            evacuating: false,
            destination: null_mut(),
        }
    }

    /// Bump-allocate `size` bytes (already rounded to the grain), or null
    /// if the current block cannot hold them.
    #[inline(always)]
    pub(crate) fn allocate(&mut self, size: usize) -> *mut u8 {
        debug_assert!(is_aligned(size, ALLOCATION_GRAIN));
        let raw = self.ap;
        let new_ap = raw as usize + size;
        if new_ap > self.limit as usize {
            return null_mut();
        }
        self.ap = new_ap as *mut u8;
        raw
    }

    /// Persist the current block's fill level and make `block` the new
    /// allocation block.
    pub(crate) unsafe fn change_block(&mut self, block: *mut Block) {
        if !self.current.is_null() {
            (*self.current).used_limit = self.ap;
            self.bytes_in_full_blocks += self.ap as usize - (*self.current).begin() as usize;
        }
        (*block).assign(self as *mut Space, self.generation);
        self.blocks.push_back(block);
        self.current = block;
        self.ap = (*block).begin();
        self.limit = (*block).end();
    }

    pub(crate) fn used_bytes(&self) -> usize {
        let in_current = if self.current.is_null() {
            0
        } else {
            self.ap as usize - unsafe { (*self.current).begin() } as usize
        };
        self.bytes_in_full_blocks + in_current
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Give every block to `into`. Unless `complete`, one block is kept and
    /// reset so the next allocation avoids a round trip through the pools.
    /// Returns the number of payload bytes dropped.
    ///
    /// The finalisable list must have been spliced out beforehand.
    pub(crate) unsafe fn drain(&mut self, complete: bool, into: &mut BlockList) -> usize {
        debug_assert!(self.finalisables.is_empty());
        let dropped = self.used_bytes();
        #[cfg(debug_assertions)]
        self.poison_payloads();
        let keep = if complete {
            null_mut()
        } else {
            self.blocks.pop_front()
        };
        loop {
            let block = self.blocks.pop_front();
            if block.is_null() {
                break;
            }
            (*block).release();
            into.push_back(block);
        }
        self.current = null_mut();
        self.ap = null_mut();
        self.limit = null_mut();
        self.scan_block = null_mut();
        self.scan = null_mut();
        self.bytes_in_full_blocks = 0;
        if !keep.is_null() {
            self.change_block(keep);
        }
        dropped
    }

    /// Overwrite dropped payloads so stale references trip fast.
    #[cfg(debug_assertions)]
    unsafe fn poison_payloads(&mut self) {
        use crate::globals::WORD_SIZE;
        let current = self.current;
        let ap = self.ap;
        self.blocks.for_each(|block| {
            let begin = (*block).begin() as usize;
            let used = if block == current {
                ap as usize
            } else {
                (*block).used_limit as usize
            };
            let mut p = begin;
            while p < used {
                *(p as *mut usize) = 0;
                p += WORD_SIZE;
            }
        });
    }

    /// Arm the Cheney scan at the current allocation position.
    pub(crate) fn begin_scan(&mut self) {
        self.scan_block = self.current;
        self.scan = self.ap;
    }

    /// Next unscanned object, or null when the scan has caught up with the
    /// allocation pointer. Crosses block boundaries as needed.
    pub(crate) unsafe fn next_unscanned(&mut self) -> *mut u8 {
        loop {
            if self.scan_block.is_null() {
                // The space may have gained its first block after the scan
                // was armed.
                if self.blocks.is_empty() {
                    return null_mut();
                }
                self.scan_block = self.blocks.head();
                self.scan = (*self.scan_block).begin();
                continue;
            }
            let bound = if self.scan_block == self.current {
                self.ap
            } else {
                (*self.scan_block).used_limit
            };
            if (self.scan as usize) < bound as usize {
                return self.scan;
            }
            if self.scan_block == self.current {
                return null_mut();
            }
            self.scan_block = (*self.scan_block).next;
            if self.scan_block.is_null() {
                return null_mut();
            }
            self.scan = (*self.scan_block).begin();
        }
    }

    pub(crate) fn scan_advance(&mut self, size: usize) {
        debug_assert!(is_aligned(size, ALLOCATION_GRAIN));
        self.scan = (self.scan as usize + size) as *mut u8;
    }
}
