//! Heaplets: per-thread heap state.
//!
//! Each mutator thread owns exactly one heaplet and allocates, records
//! write-barrier entries and registers roots through it without any
//! locking. The heap lock is taken only in slow paths: block refills from
//! the shared pool, global-collection coordination, attach and detach.

use std::ptr::null_mut;
use std::sync::Arc;

use atomic::Atomic;
use hashbrown::HashSet;

use crate::api::{CollectAction, CollectionKind, Finalisation, ShapeTable, Word};
use crate::block::{block_payload_bytes, Block, BlockList, Generation};
use crate::error::FatalKind;
use crate::fatal;
use crate::finalize::{free_record, new_record, FinaliseList};
use crate::globals::WORD_SIZE;
use crate::heap::Heap;
use crate::roots::{
    GlobalRootHandle, GlobalRootList, HookFn, HookHandle, HookSet, TempRootFrame, TempRootSet,
};
use crate::safepoint::HeapletState;
use crate::sizing::SurvivalHistory;
use crate::statistics::HeapletStatistics;
use crate::space::Space;

/// Overapproximating set of old-generation objects that might refer to the
/// young generation.
pub(crate) type RememberedSet = HashSet<Word, ahash::RandomState>;

/// Per-heaplet collection tuning. All byte quantities are rounded up to the
/// allocation grain internally.
#[derive(Clone, Debug)]
pub struct HeapletOptions {
    /// Young-generation ageing steps between the nursery and old space.
    pub ageing_steps: usize,
    /// Initial nursery fill threshold before a minor collection.
    pub nursery_threshold: usize,
    pub min_nursery: usize,
    pub max_nursery: usize,
    /// Below this smoothed survival rate the nursery threshold shrinks.
    pub low_survival_rate: f64,
    /// Above this smoothed survival rate the nursery threshold grows.
    pub high_survival_rate: f64,
    pub growth_ratio: f64,
    pub shrinkage_ratio: f64,
    pub min_old: usize,
    pub max_old: usize,
    /// Initial old-space fill threshold before a major collection.
    pub old_threshold: usize,
    pub target_major_survival_rate: f64,
    /// Weight decay per collection of age in the survival history.
    pub recent_bias: f64,
    /// Free blocks kept heaplet-local before overflowing to the heap pool.
    pub max_unused_blocks: usize,
    pub verbose: bool,
}

impl Default for HeapletOptions {
    fn default() -> Self {
        Self {
            ageing_steps: 1,
            nursery_threshold: 512 * 1024,
            min_nursery: 128 * 1024,
            max_nursery: 8 * 1024 * 1024,
            low_survival_rate: 0.05,
            high_survival_rate: 0.40,
            growth_ratio: 1.5,
            shrinkage_ratio: 0.75,
            min_old: 1024 * 1024,
            max_old: 512 * 1024 * 1024,
            old_threshold: 2 * 1024 * 1024,
            target_major_survival_rate: 0.6,
            recent_bias: 0.75,
            max_unused_blocks: 16,
            verbose: false,
        }
    }
}

pub(crate) enum WhichHooks {
    PreCollection,
    PostCollection,
    PreSsbFlush,
    PostSsbFlush,
}

pub struct Heaplet {
    pub(crate) heap: Arc<Heap>,
    pub(crate) shapes: *const ShapeTable,

    pub(crate) nursery: Space,
    /// Two banks of ageing steps; the active bank holds objects, the other
    /// bank receives survivors at the next minor collection.
    pub(crate) steps: [Vec<Space>; 2],
    pub(crate) active_steps: usize,
    /// Two old-space banks, swapped by major collections.
    pub(crate) old: [Space; 2],
    pub(crate) active_old: usize,
    /// Shared-generation blocks owned by this heaplet. Never evacuated.
    pub(crate) shared_own: Space,

    pub(crate) unused: BlockList,
    pub(crate) remembered: RememberedSet,

    /// Payload end of the nursery's current block; SSB entries live between
    /// the mutator's allocation limit and this.
    pub(crate) ssb_anchor: *mut u8,
    /// Debug-mode ownership flag for the runtime fields.
    pub(crate) runtime_owned: bool,

    pub(crate) globals: GlobalRootList,
    pub(crate) temps: TempRootSet,
    pub(crate) pre_collection_hooks: HookSet,
    pub(crate) post_collection_hooks: HookSet,
    pub(crate) pre_ssb_flush_hooks: HookSet,
    pub(crate) post_ssb_flush_hooks: HookSet,

    pub(crate) collection_disabled: u32,
    pub(crate) options: HeapletOptions,
    pub(crate) nursery_threshold: usize,
    pub(crate) old_threshold: usize,
    pub(crate) survival: SurvivalHistory,
    pub stats: HeapletStatistics,

    // Collection-scoped state.
    pub(crate) scavenge_dests: Vec<*mut Space>,
    pub(crate) candidate_dead: FinaliseList,
    pub(crate) scavenge_active: bool,
    pub(crate) copied_bytes: usize,
    pub(crate) saw_young_field: bool,

    // Registration in the heap's intrusive lists.
    pub(crate) state: Atomic<HeapletState>,
    pub(crate) prev: *mut Heaplet,
    pub(crate) next: *mut Heaplet,
    pub(crate) destroyed: bool,
}

// A heaplet is single-threaded state, but it may be created on one thread
// and handed to the thread that will own it.
unsafe impl Send for Heaplet {}

impl Heaplet {
    /// Create a heaplet attached to `heap`. The first heaplet seals the
    /// heap's shape table.
    pub fn new(heap: &Arc<Heap>, options: HeapletOptions) -> Box<Heaplet> {
        heap.shape_table().seal();
        if options.min_nursery > options.max_nursery
            || options.min_old > options.max_old
            || options.low_survival_rate > options.high_survival_rate
            || !(0.0..1.0).contains(&options.recent_bias)
        {
            fatal!(FatalKind::MisuseAtMutator, "inconsistent heaplet options");
        }
        let n = options.ageing_steps;
        let make_bank = |name: &'static str| -> Vec<Space> {
            (0..n).map(|_| Space::new(name, Generation::Young)).collect()
        };
        let nursery_threshold = options
            .nursery_threshold
            .clamp(options.min_nursery, options.max_nursery);
        let old_threshold = options.old_threshold.clamp(options.min_old, options.max_old);
        let mut heaplet = Box::new(Heaplet {
            heap: heap.clone(),
            shapes: heap.shape_table() as *const ShapeTable,
            nursery: Space::new("nursery", Generation::Young),
            steps: [make_bank("step-bank-a"), make_bank("step-bank-b")],
            active_steps: 0,
            old: [
                Space::new("old-bank-a", Generation::Old),
                Space::new("old-bank-b", Generation::Old),
            ],
            active_old: 0,
            shared_own: Space::new("shared-own", Generation::Shared),
            unused: BlockList::new(),
            remembered: RememberedSet::with_hasher(ahash::RandomState::new()),
            ssb_anchor: null_mut(),
            runtime_owned: true,
            globals: GlobalRootList::new(),
            temps: TempRootSet::new(),
            pre_collection_hooks: HookSet::new(),
            post_collection_hooks: HookSet::new(),
            pre_ssb_flush_hooks: HookSet::new(),
            post_ssb_flush_hooks: HookSet::new(),
            collection_disabled: 0,
            options,
            nursery_threshold,
            old_threshold,
            survival: SurvivalHistory::new(),
            stats: HeapletStatistics::default(),
            scavenge_dests: Vec::new(),
            candidate_dead: FinaliseList::new(),
            scavenge_active: false,
            copied_bytes: 0,
            saw_young_field: false,
            state: Atomic::new(HeapletState::InUse),
            prev: null_mut(),
            next: null_mut(),
            destroyed: false,
        });
        unsafe {
            Heap::attach(&mut *heaplet);
        }
        heaplet
    }

    /// Detach from the heap and release every resource. Equivalent to
    /// dropping the box.
    pub fn destroy(self: Box<Self>) {
        drop(self);
    }

    #[inline(always)]
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Shape table with an unconstrained lifetime; the table is immutable
    /// and lives as long as the heap.
    #[inline(always)]
    pub(crate) fn shape_table<'a>(&self) -> &'a ShapeTable {
        unsafe { &*self.shapes }
    }

    // ------------------------------------------------------------------
    // Roots.

    /// Register `size_bytes` of caller-owned tagged words as roots.
    /// Deregistration is O(1) in any order but registration walks no lists;
    /// still, prefer temporary roots for function-local state.
    pub fn register_global_root(&mut self, buf: *mut Word, size_bytes: usize) -> GlobalRootHandle {
        self.globals.register(buf, size_bytes)
    }

    pub fn register_global_root_word(&mut self, word: *mut Word) -> GlobalRootHandle {
        self.globals.register(word, WORD_SIZE)
    }

    pub fn deregister_global_root(&mut self, handle: GlobalRootHandle) {
        self.globals.deregister(handle)
    }

    pub fn push_temporary_root(&mut self, buf: *mut Word, size_bytes: usize) {
        self.temps.push(buf, size_bytes)
    }

    pub fn push_temporary_root_word(&mut self, word: *mut Word) {
        self.temps.push(word, WORD_SIZE)
    }

    pub fn pop_temporary_root(&mut self) {
        self.temps.pop()
    }

    pub fn get_temporary_root_set_height(&self) -> usize {
        self.temps.height()
    }

    pub fn reset_temporary_root_set_height(&mut self, height: usize) {
        self.temps.reset_height(height)
    }

    pub fn remove_all_temporary_roots(&mut self) {
        self.temps.remove_all()
    }

    /// RAII frame restoring the temporary-root height on drop.
    pub fn temp_root_frame(&mut self) -> TempRootFrame<'_> {
        TempRootFrame::new(self)
    }

    // ------------------------------------------------------------------
    // Hooks.

    pub fn register_pre_collection_hook(&mut self, f: HookFn, data: *mut u8) -> HookHandle {
        self.pre_collection_hooks.register(f, data)
    }

    pub fn deregister_pre_collection_hook(&mut self, handle: HookHandle) {
        self.pre_collection_hooks.deregister(handle)
    }

    pub fn register_post_collection_hook(&mut self, f: HookFn, data: *mut u8) -> HookHandle {
        self.post_collection_hooks.register(f, data)
    }

    pub fn deregister_post_collection_hook(&mut self, handle: HookHandle) {
        self.post_collection_hooks.deregister(handle)
    }

    pub fn register_pre_ssb_flush_hook(&mut self, f: HookFn, data: *mut u8) -> HookHandle {
        self.pre_ssb_flush_hooks.register(f, data)
    }

    pub fn deregister_pre_ssb_flush_hook(&mut self, handle: HookHandle) {
        self.pre_ssb_flush_hooks.deregister(handle)
    }

    pub fn register_post_ssb_flush_hook(&mut self, f: HookFn, data: *mut u8) -> HookHandle {
        self.post_ssb_flush_hooks.register(f, data)
    }

    pub fn deregister_post_ssb_flush_hook(&mut self, handle: HookHandle) {
        self.post_ssb_flush_hooks.deregister(handle)
    }

    pub(crate) fn run_hooks(&mut self, which: WhichHooks, kind: CollectionKind) {
        let hooks = match which {
            WhichHooks::PreCollection => self.pre_collection_hooks.snapshot(),
            WhichHooks::PostCollection => self.post_collection_hooks.snapshot(),
            WhichHooks::PreSsbFlush => self.pre_ssb_flush_hooks.snapshot(),
            WhichHooks::PostSsbFlush => self.post_ssb_flush_hooks.snapshot(),
        };
        for hook in hooks {
            (hook.f)(self, hook.data, kind);
        }
    }

    // ------------------------------------------------------------------
    // Collection control.

    /// While disabled, any collection request or escalation is fatal, as is
    /// sharing.
    pub fn disable_collection(&mut self) {
        self.collection_disabled += 1;
    }

    pub fn enable_collection(&mut self) {
        if self.collection_disabled == 0 {
            fatal!(
                FatalKind::MisuseAtMutator,
                "enable_collection without matching disable_collection"
            );
        }
        self.collection_disabled -= 1;
    }

    pub fn collection_is_disabled(&self) -> bool {
        self.collection_disabled > 0
    }

    pub(crate) fn check_collection_enabled(&self) {
        if self.collection_disabled > 0 {
            fatal!(
                FatalKind::MisuseAtMutator,
                "collection requested while collection is disabled"
            );
        }
    }

    // ------------------------------------------------------------------
    // Finalisation registration.

    /// Register a just-allocated object of a finalisable shape.
    pub fn add_finalisable(&mut self, word: Word) {
        let shapes = self.shape_table();
        if shapes.is_unboxed(word) {
            fatal!(FatalKind::MisuseAtMutator, "cannot finalise an unboxed value");
        }
        let (index, shape) = match shapes.shape_of(word) {
            Some(found) => found,
            None => fatal!(FatalKind::UserShapeBug, "no shape recognises {:?}", word),
        };
        if shape.finalisation == Finalisation::None {
            fatal!(
                FatalKind::MisuseAtMutator,
                "shape {} is not finalisable",
                shape.name
            );
        }
        unsafe {
            let space = (*word.block()).space;
            if space.is_null() {
                fatal!(FatalKind::InvariantViolated, "{:?} is not in any space", word);
            }
            let record = new_record(word, index);
            (*space).finalisables.push(record);
        }
    }

    pub fn remove_finalisable(&mut self, word: Word) {
        unsafe {
            let space = (*word.block()).space;
            let record = if space.is_null() {
                null_mut()
            } else {
                (*space).finalisables.find(word)
            };
            if record.is_null() {
                fatal!(
                    FatalKind::MisuseAtMutator,
                    "remove_finalisable: {:?} has no finalisation record",
                    word
                );
            }
            (*space).finalisables.unlink(record);
            free_record(record);
        }
    }

    /// Arm or disarm the finaliser of an already-registered object. A
    /// complete-object finaliser may call this on itself to request another
    /// run at the next collection that finds it dead.
    pub fn set_need_to_run_finalizer(&mut self, word: Word, need: bool) {
        unsafe {
            let space = (*word.block()).space;
            let record = if space.is_null() {
                null_mut()
            } else {
                (*space).finalisables.find(word)
            };
            if record.is_null() {
                fatal!(
                    FatalKind::MisuseAtMutator,
                    "set_need_to_run_finalizer: {:?} has no finalisation record",
                    word
                );
            }
            (*record).need_to_run = need;
        }
    }

    // ------------------------------------------------------------------
    // Queries.

    /// Generation of a tagged object; `Immortal` for unboxed values.
    pub fn generation_of(&self, word: Word) -> Generation {
        if self.shape_table().is_unboxed(word) {
            return Generation::Immortal;
        }
        unsafe { word.generation() }
    }

    pub fn remembered_set_len(&self) -> usize {
        self.remembered.len()
    }

    pub fn nursery_used_bytes(&self) -> usize {
        self.nursery.used_bytes()
    }

    pub fn young_used_bytes(&self) -> usize {
        let mut bytes = self.nursery.used_bytes();
        for step in self.steps[self.active_steps].iter() {
            bytes += step.used_bytes();
        }
        bytes
    }

    pub fn old_used_bytes(&self) -> usize {
        self.old[self.active_old].used_bytes()
    }

    pub fn shared_used_bytes(&self) -> usize {
        self.shared_own.used_bytes()
    }

    pub fn statistics(&self) -> &HeapletStatistics {
        &self.stats
    }

    // ------------------------------------------------------------------
    // SSB.

    /// Flush the SSB region between `limit` and the anchor into the
    /// remembered set and return the restored limit. Flushing an empty SSB
    /// changes nothing.
    pub(crate) fn ssb_flush_internal(&mut self, limit: *mut u8) -> *mut u8 {
        let anchor = self.ssb_anchor;
        if anchor.is_null() {
            return limit;
        }
        if limit as usize >= anchor as usize {
            return anchor;
        }
        self.run_hooks(WhichHooks::PreSsbFlush, CollectionKind::None);
        unsafe {
            let mut slot = limit as usize;
            while slot < anchor as usize {
                let entry = *(slot as *const Word);
                self.ssb_record(entry);
                slot += WORD_SIZE;
            }
        }
        self.stats.ssb_flushes += 1;
        self.run_hooks(WhichHooks::PostSsbFlush, CollectionKind::None);
        anchor
    }

    /// Filtered insertion into the remembered set: only old-generation
    /// objects can hide an old-to-young reference.
    #[inline]
    pub(crate) fn ssb_record(&mut self, entry: Word) {
        debug_assert!(!self.shape_table().is_unboxed(entry));
        unsafe {
            if (*entry.block()).generation == Generation::Old {
                self.remembered.insert(entry);
                if self.remembered.len() > self.stats.remembered_set_peak {
                    self.stats.remembered_set_peak = self.remembered.len();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Runtime-field ownership.

    pub(crate) fn take_runtime(&mut self) -> (*mut u8, *mut u8) {
        debug_assert!(self.runtime_owned, "runtime fields already with the mutator");
        self.runtime_owned = false;
        self.ssb_anchor = self.nursery.limit;
        (self.nursery.ap, self.nursery.limit)
    }

    /// Runtime fields come home; the SSB must have been flushed already.
    pub(crate) fn give_runtime(&mut self, ap: *mut u8, limit: *mut u8) {
        debug_assert!(!self.runtime_owned, "runtime fields already owned");
        debug_assert_eq!(limit, self.nursery.limit);
        let _ = limit;
        if !ap.is_null() {
            self.nursery.ap = ap;
        }
        self.runtime_owned = true;
    }

    // ------------------------------------------------------------------
    // Block supply.

    /// A free block from the heaplet pool, the heap pool or the block
    /// allocator; null when everything is exhausted.
    pub(crate) unsafe fn get_unused_block(&mut self) -> *mut Block {
        let block = self.unused.pop_front();
        if !block.is_null() {
            return block;
        }
        let block = self.heap.take_pool_block();
        if !block.is_null() {
            return block;
        }
        self.heap.block_allocator().get_block()
    }

    /// Like `get_unused_block` but for collection destinations, where
    /// running out is fatal: the escalation ladder has nothing left.
    pub(crate) unsafe fn get_block_for_gc(&mut self) -> *mut Block {
        let block = self.get_unused_block();
        if block.is_null() {
            fatal!(
                FatalKind::AllocationExhausted,
                "no block available for a collection destination"
            );
        }
        block
    }

    /// Keep the heaplet pool bounded; surplus goes back to the heap.
    pub(crate) unsafe fn release_surplus_blocks(&mut self) {
        while self.unused.len() > self.options.max_unused_blocks {
            let block = self.unused.pop_front();
            self.heap.give_block(block);
        }
    }

    // ------------------------------------------------------------------
    // Allocation slow path.

    /// Called with the runtime fields owned by the heaplet and the SSB
    /// empty. On return at least `size` contiguous bytes exist between the
    /// nursery's allocation pointer and limit.
    pub(crate) unsafe fn allocate_slow_path(
        &mut self,
        size: usize,
        action: CollectAction,
    ) -> *mut u8 {
        debug_assert!(self.runtime_owned);
        if size > block_payload_bytes() {
            fatal!(
                FatalKind::AllocationExhausted,
                "allocation of {} bytes exceeds the block payload of {} bytes",
                size,
                block_payload_bytes()
            );
        }
        // Allocation is the canonical safe point.
        self.global_safe_point_owned();
        let mut attempts = 0;
        loop {
            let raw = self.nursery.allocate(size);
            if !raw.is_null() {
                self.ssb_anchor = self.nursery.limit;
                return raw;
            }
            attempts += 1;
            if attempts > 4 {
                fatal!(
                    FatalKind::AllocationExhausted,
                    "allocation of {} bytes failed after collection escalation",
                    size
                );
            }
            let block_change_wanted = action == CollectAction::BlockChange
                || (action == CollectAction::Default
                    && self.nursery.used_bytes() < self.nursery_threshold);
            if block_change_wanted {
                let block = self.get_unused_block();
                if !block.is_null() {
                    self.nursery.change_block(block);
                    continue;
                }
                // No block anywhere: escalate to a minor collection.
                self.check_collection_enabled();
                self.scavenge(CollectionKind::Minor, None);
                continue;
            }
            self.check_collection_enabled();
            if self.old_used_bytes() >= self.old_threshold {
                self.scavenge(CollectionKind::Major, None);
            } else {
                self.scavenge(CollectionKind::Minor, None);
            }
        }
    }

    // ------------------------------------------------------------------
    // Explicit collection entry. Runtime fields are owned by the heaplet.

    pub(crate) unsafe fn collect_owned(&mut self, action: CollectAction) {
        match action {
            CollectAction::BlockChange => {
                let block = self.get_unused_block();
                if block.is_null() {
                    self.check_collection_enabled();
                    self.scavenge(CollectionKind::Minor, None);
                } else {
                    self.nursery.change_block(block);
                }
            }
            CollectAction::Default | CollectAction::ForceEither => {
                self.check_collection_enabled();
                if self.old_used_bytes() >= self.old_threshold {
                    self.scavenge(CollectionKind::Major, None);
                } else {
                    self.scavenge(CollectionKind::Minor, None);
                }
            }
            CollectAction::ForceMinor => {
                self.check_collection_enabled();
                self.scavenge(CollectionKind::Minor, None);
            }
            CollectAction::ForceMajor => {
                self.check_collection_enabled();
                self.scavenge(CollectionKind::Major, None);
            }
            CollectAction::ForceGlobal => {
                self.check_collection_enabled();
                Heap::global_collect_owned(self);
            }
            CollectAction::Share => {
                fatal!(
                    FatalKind::MisuseAtMutator,
                    "collect(Share) carries no object; call share instead"
                );
            }
        }
        self.ssb_anchor = self.nursery.limit;
    }

    /// Promote `object` and its transitive closure into the shared
    /// generation. Returns the relocated reference.
    pub(crate) unsafe fn share_owned(&mut self, object: Word) -> Word {
        if self.collection_disabled > 0 {
            fatal!(
                FatalKind::MisuseAtMutator,
                "share requested while collection is disabled"
            );
        }
        let shapes = self.shape_table();
        if shapes.is_unboxed(object) {
            return object;
        }
        if (*object.block()).generation == Generation::Shared {
            return object;
        }
        let mut root = object;
        self.scavenge(CollectionKind::Major, Some(&mut root as *mut Word));
        self.stats.shares += 1;
        self.ssb_anchor = self.nursery.limit;
        root
    }

    /// Poll the heap request word; park and wait if a global collection is
    /// pending. Runtime fields must be owned by the heaplet.
    pub(crate) fn global_safe_point_owned(&mut self) {
        if self.heap.sync().request_pending() {
            unsafe {
                Heap::participate_owned(self);
            }
        }
    }

    // ------------------------------------------------------------------
    // Destruction.

    pub(crate) unsafe fn destroy_internal(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        debug_assert!(
            self.runtime_owned,
            "heaplet destroyed while the mutator holds its runtime fields"
        );
        self.run_quick_finalisers_on_destroy();
        let mut pool = BlockList::new();
        self.nursery.drain(true, &mut pool);
        for bank in 0..2 {
            for step in self.steps[bank].iter_mut() {
                step.drain(true, &mut pool);
            }
            self.old[bank].drain(true, &mut pool);
        }
        pool.append(&mut self.unused);
        // Shared objects outlive their creating heaplet.
        Heap::adopt_shared(self);
        self.heap.give_blocks(&mut pool);
        Heap::detach(self);
        self.globals.drop_all();
        self.remove_all_temporary_roots();
    }

    /// Resource-style cleanup at heaplet teardown: quick finalisers still
    /// pending run once; complete-object finalisers need a live heap to
    /// resurrect into and are skipped.
    unsafe fn run_quick_finalisers_on_destroy(&mut self) {
        let heap_ptr = Arc::as_ptr(&self.heap) as *mut Heap;
        let self_ptr = self as *mut Heaplet;
        let shapes = self.shape_table();
        let mut spaces: Vec<*mut Space> = vec![&mut self.nursery as *mut Space];
        for bank in 0..2 {
            for step in self.steps[bank].iter_mut() {
                spaces.push(step as *mut Space);
            }
            spaces.push(&mut self.old[bank] as *mut Space);
        }
        for &space in spaces.iter() {
            loop {
                let record = (*space).finalisables.pop();
                if record.is_null() {
                    break;
                }
                let shape = shapes.get((*record).shape);
                if shape.finalisation == Finalisation::Quick && (*record).need_to_run {
                    if let Some(finalize) = shape.finalize {
                        finalize(heap_ptr, self_ptr, (*record).object.untagged());
                        self.stats.finalisers_run += 1;
                    }
                }
                free_record(record);
            }
        }
    }
}

impl Drop for Heaplet {
    fn drop(&mut self) {
        unsafe {
            self.destroy_internal();
        }
    }
}
