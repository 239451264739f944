//! The process-wide heap shared by all heaplets.
//!
//! The heap owns the sealed shape table, the block allocator, the pools of
//! unused and shared blocks, and the registry of heaplets. Mutator fast
//! paths never touch it except for the unsynchronised read of the request
//! word; everything else is slow-path work under the heap lock, and the
//! lock is never held across a collection.

use std::sync::Arc;

use atomic::Ordering;
use parking_lot::Mutex;

use crate::api::{CollectionKind, ShapeTable};
use crate::block::{Block, BlockList};
use crate::block_allocator::BlockAllocator;
use crate::error::FatalKind;
use crate::fatal;
use crate::finalize::{free_record, FinaliseList};
use crate::heaplet::Heaplet;
use crate::safepoint::{GcRequest, HeapSync, HeapletState};
use crate::statistics::HeapStatistics;

/// Blocks kept in the heap pool before they go back to the OS.
const HEAP_POOL_MAX_BLOCKS: usize = 64;

#[derive(Clone, Debug)]
pub struct HeapConfig {
    /// Address space reserved for blocks.
    pub capacity: usize,
    pub verbose: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: 512 * 1024 * 1024,
            verbose: false,
        }
    }
}

pub(crate) struct HeapPool {
    pub unused: BlockList,
    /// Shared-generation blocks adopted from destroyed heaplets.
    pub shared_blocks: BlockList,
    pub shared_finalisables: FinaliseList,
}

pub struct Heap {
    shapes: ShapeTable,
    block_allocator: BlockAllocator,
    sync: HeapSync,
    pool: Mutex<HeapPool>,
    config: HeapConfig,
}

unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    /// Create a heap over the given shape table. The table is sealed when
    /// the first heaplet is created.
    pub fn new(shapes: ShapeTable, config: HeapConfig) -> Arc<Heap> {
        let block_allocator = match BlockAllocator::new(config.capacity) {
            Some(allocator) => allocator,
            None => fatal!(
                FatalKind::AllocationExhausted,
                "cannot reserve {} bytes of heap address space",
                config.capacity
            ),
        };
        Arc::new(Heap {
            shapes,
            block_allocator,
            sync: HeapSync::new(),
            pool: Mutex::new(HeapPool {
                unused: BlockList::new(),
                shared_blocks: BlockList::new(),
                shared_finalisables: FinaliseList::new(),
            }),
            config,
        })
    }

    #[inline(always)]
    pub fn shape_table(&self) -> &ShapeTable {
        &self.shapes
    }

    #[inline(always)]
    pub(crate) fn sync(&self) -> &HeapSync {
        &self.sync
    }

    #[inline(always)]
    pub(crate) fn block_allocator(&self) -> &BlockAllocator {
        &self.block_allocator
    }

    pub fn statistics(&self) -> HeapStatistics {
        let lists = self.sync.lists.lock();
        let pool = self.pool.lock();
        HeapStatistics {
            heaplets_attached: lists.attached,
            blocks_total: self.block_allocator.total_blocks(),
            blocks_available: self.block_allocator.available_blocks(),
            shared_blocks: pool.shared_blocks.len(),
            pooled_blocks: pool.unused.len(),
        }
    }

    // ------------------------------------------------------------------
    // Block pool.

    pub(crate) fn take_pool_block(&self) -> *mut Block {
        let mut pool = self.pool.lock();
        unsafe { pool.unused.pop_front() }
    }

    pub(crate) fn give_block(&self, block: *mut Block) {
        let mut pool = self.pool.lock();
        if pool.unused.len() < HEAP_POOL_MAX_BLOCKS {
            unsafe {
                pool.unused.push_back(block);
            }
        } else {
            drop(pool);
            self.block_allocator.return_block(block);
        }
    }

    pub(crate) fn give_blocks(&self, blocks: &mut BlockList) {
        loop {
            let block = unsafe { blocks.pop_front() };
            if block.is_null() {
                break;
            }
            self.give_block(block);
        }
    }

    /// Take over a dying heaplet's shared-generation blocks and their
    /// finalisation records; shared objects outlive their creating heaplet.
    pub(crate) unsafe fn adopt_shared(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut pool = heap.pool.lock();
        let current = heaplet.shared_own.current;
        let ap = heaplet.shared_own.ap;
        heaplet.shared_own.blocks.for_each(|block| {
            (*block).space = core::ptr::null_mut();
            if block == current {
                (*block).used_limit = ap;
            }
        });
        pool.shared_blocks.append(&mut heaplet.shared_own.blocks);
        pool.shared_finalisables
            .splice_from(&mut heaplet.shared_own.finalisables);
        heaplet.shared_own.current = core::ptr::null_mut();
        heaplet.shared_own.ap = core::ptr::null_mut();
        heaplet.shared_own.limit = core::ptr::null_mut();
        heaplet.shared_own.bytes_in_full_blocks = 0;
    }

    // ------------------------------------------------------------------
    // Heaplet registry.

    pub(crate) unsafe fn attach(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut lists = heap.sync.lists.lock();
        while heap.sync.request_pending() {
            heap.sync.cv_done.wait(&mut lists);
        }
        lists.push_in_use(heaplet as *mut Heaplet);
        lists.attached += 1;
        lists.running += 1;
        heaplet.state.store(HeapletState::InUse, Ordering::SeqCst);
    }

    pub(crate) unsafe fn detach(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut lists = heap.sync.lists.lock();
        match heaplet.state.load(Ordering::Relaxed) {
            HeapletState::InUse => {
                lists.unlink_in_use(heaplet as *mut Heaplet);
                lists.running -= 1;
                heap.sync.cv_parked.notify_all();
            }
            HeapletState::NotToBeWokenUp => {
                lists.unlink_idle(heaplet as *mut Heaplet);
            }
            state => fatal!(
                FatalKind::InvariantViolated,
                "heaplet destroyed in state {:?}",
                state
            ),
        }
        lists.attached -= 1;
    }

    // ------------------------------------------------------------------
    // Global collection protocol. All entry points require the calling
    // heaplet to own its runtime fields with an empty SSB.

    /// Park at a safe point until the pending global collection finishes.
    pub(crate) unsafe fn participate_owned(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut lists = heap.sync.lists.lock();
        if !heap.sync.request_pending() {
            // The collection finished between the unsynchronised poll and
            // taking the lock.
            return;
        }
        heaplet.check_collection_enabled();
        heaplet.state.store(HeapletState::ToBeWokenUp, Ordering::SeqCst);
        lists.running -= 1;
        heap.sync.cv_parked.notify_all();
        while heap.sync.request_pending() {
            heap.sync.cv_done.wait(&mut lists);
        }
        heaplet.state.store(HeapletState::InUse, Ordering::SeqCst);
        lists.running += 1;
    }

    /// Request and run a collection across every heaplet. If another
    /// heaplet already requested one, park and let it do the work.
    pub(crate) unsafe fn global_collect_owned(requester: &mut Heaplet) {
        let heap = requester.heap.clone();
        let mut lists = heap.sync.lists.lock();
        if heap.sync.request_pending() {
            requester
                .state
                .store(HeapletState::ToBeWokenUp, Ordering::SeqCst);
            lists.running -= 1;
            heap.sync.cv_parked.notify_all();
            while heap.sync.request_pending() {
                heap.sync.cv_done.wait(&mut lists);
            }
            requester.state.store(HeapletState::InUse, Ordering::SeqCst);
            lists.running += 1;
            return;
        }
        heap.sync.request.store(GcRequest::GlobalGc, Ordering::SeqCst);
        requester
            .state
            .store(HeapletState::Collecting, Ordering::SeqCst);
        lists.running -= 1;
        while lists.running > 0 {
            heap.sync.cv_parked.wait(&mut lists);
        }
        let heaplets = lists.all();
        // Every mutator is parked; collect with the lock released.
        drop(lists);
        if heap.config.verbose {
            eprintln!("[gc] global collection over {} heaplets", heaplets.len());
        }
        for &target in heaplets.iter() {
            (*target).check_collection_enabled();
            (*target).scavenge(CollectionKind::Global, None);
        }
        let mut lists = heap.sync.lists.lock();
        heap.sync.request.store(GcRequest::None, Ordering::SeqCst);
        requester.state.store(HeapletState::InUse, Ordering::SeqCst);
        lists.running += 1;
        heap.sync.cv_done.notify_all();
    }

    /// Park the heaplet before potentially long blocking I/O so a global
    /// collection does not have to wait for the syscall to return.
    pub(crate) unsafe fn before_blocking_owned(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut lists = heap.sync.lists.lock();
        debug_assert_eq!(heaplet.state.load(Ordering::Relaxed), HeapletState::InUse);
        lists.unlink_in_use(heaplet as *mut Heaplet);
        lists.push_idle(heaplet as *mut Heaplet);
        heaplet
            .state
            .store(HeapletState::NotToBeWokenUp, Ordering::SeqCst);
        lists.running -= 1;
        heap.sync.cv_parked.notify_all();
    }

    /// Undo `before_blocking`; waits out any collection in progress.
    pub(crate) unsafe fn after_blocking_owned(heaplet: &mut Heaplet) {
        let heap = heaplet.heap.clone();
        let mut lists = heap.sync.lists.lock();
        debug_assert_eq!(
            heaplet.state.load(Ordering::Relaxed),
            HeapletState::NotToBeWokenUp
        );
        while heap.sync.request_pending() {
            heap.sync.cv_done.wait(&mut lists);
        }
        lists.unlink_idle(heaplet as *mut Heaplet);
        lists.push_in_use(heaplet as *mut Heaplet);
        heaplet.state.store(HeapletState::InUse, Ordering::SeqCst);
        lists.running += 1;
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Destroying the heap with heaplets still attached cannot happen:
        // every heaplet holds a strong `Arc<Heap>`, so the last reference
        // that runs this drop is released only after the last heaplet
        // detached. The misuse is unrepresentable rather than detected.
        let mut pool = self.pool.lock();
        loop {
            let record = unsafe { pool.shared_finalisables.pop() };
            if record.is_null() {
                break;
            }
            unsafe { free_record(record) };
        }
    }
}
