//! Cheney copy scavenger.
//!
//! A collection names a set of from-spaces, each with a destination space,
//! and a set of roots. Live objects are copied out of the from-spaces as
//! their references are discovered; a scan pointer chases each destination
//! space's allocation pointer until no copy remains unscanned. A copied
//! object leaves behind its broken heart: the distinguished type code in
//! word 0 and the forwarded reference in the forward slot.

use std::ptr::null_mut;
use std::sync::Arc;

use crate::api::{CollectionKind, Finalisation, ShapeKind, Word};
use crate::block::{block_payload_bytes, Block, Generation};
use crate::error::FatalKind;
use crate::fatal;
use crate::finalize::{free_record, FinaliseList};
use crate::globals::{is_aligned, ALLOCATION_GRAIN, FORWARD_WORD_OFFSET, WORD_SIZE};
use crate::heap::Heap;
use crate::heaplet::{Heaplet, RememberedSet, WhichHooks};
use crate::sizing::{adapt_nursery_threshold, adapt_old_threshold};
use crate::space::Space;
use crate::statistics::ByteSize;

impl Heaplet {
    /// Update one root reference, copying its referent out of a from-space
    /// if needed. Safe to call only from collection hooks and user scan
    /// functions, while a collection is running.
    #[inline]
    pub unsafe fn handle_root_pointer(&mut self, word: *mut Word) {
        self.handle_word(word)
    }

    /// The scavenger's per-reference step: skip unboxed words and
    /// non-copying pointers, forward through broken hearts, otherwise copy
    /// the object into its from-space's destination.
    pub unsafe fn handle_word(&mut self, word: *mut Word) {
        debug_assert!(self.scavenge_active);
        let shapes = self.shape_table();
        let w = *word;
        if shapes.is_unboxed(w) {
            return;
        }
        let block = w.block();
        let space = (*block).space;
        if space.is_null() {
            // Shared blocks adopted from a destroyed heaplet have no owning
            // space; they never move.
            if (*block).generation != Generation::Shared {
                fatal!(FatalKind::InvariantViolated, "{:?} points into no space", w);
            }
            return;
        }
        if !(*space).evacuating {
            if (*block).generation == Generation::Young {
                self.saw_young_field = true;
            }
            return;
        }
        let from_raw = w.untagged();
        let first = *(from_raw as *const usize);
        if first == shapes.broken_heart_type_code() {
            let forwarded = *(from_raw.add(FORWARD_WORD_OFFSET * WORD_SIZE) as *const Word);
            *word = forwarded;
            if (*forwarded.block()).generation == Generation::Young {
                self.saw_young_field = true;
            }
            return;
        }
        let (_, shape) = match shapes.shape_of(w) {
            Some(found) => found,
            None => fatal!(FatalKind::InvariantViolated, "no shape recognises {:?}", w),
        };
        let size = (shape.size)(w);
        debug_assert!(size >= ALLOCATION_GRAIN && is_aligned(size, ALLOCATION_GRAIN));
        let dest = (*space).destination;
        debug_assert!(!dest.is_null());
        let to_raw = self.allocate_in_destination(dest, size);
        let copy = shape.copy;
        let _copied = copy(self, word, from_raw as *const u8, to_raw);
        debug_assert_eq!(_copied, size);
        let new_word = *word;
        debug_assert_eq!(new_word.untagged(), to_raw);
        *(from_raw as *mut usize) = shapes.broken_heart_type_code();
        *(from_raw.add(FORWARD_WORD_OFFSET * WORD_SIZE) as *mut Word) = new_word;
        self.copied_bytes += size;
        if (*new_word.block()).generation == Generation::Young {
            self.saw_young_field = true;
        }
    }

    /// Scan one object in place: update every tagged field it holds and
    /// return its size. If the scanned object lives in the old generation
    /// and ends up referring to something young, it joins the remembered
    /// set; this both records fresh promotions and re-filters remembered
    /// entries that were processed as roots.
    pub(crate) unsafe fn handle_object(&mut self, raw: *mut u8) -> usize {
        let shapes = self.shape_table();
        let (_, shape) = match shapes.shape_of_raw(raw) {
            Some(found) => found,
            None => fatal!(
                FatalKind::InvariantViolated,
                "cannot identify the object at {:p}",
                raw
            ),
        };
        self.saw_young_field = false;
        let size = match shape.kind {
            ShapeKind::Headered => match shape.scan {
                Some(scan) => scan(self, raw),
                None => (shape.size)((shape.encode)(raw)),
            },
            ShapeKind::Headerless => {
                // No header: every word is treated as a tagged field.
                let tagged = (shape.encode)(raw);
                let size = (shape.size)(tagged);
                for i in 0..size / WORD_SIZE {
                    self.handle_word(raw.add(i * WORD_SIZE) as *mut Word);
                }
                size
            }
        };
        if self.saw_young_field && (*Block::from_pointer(raw)).generation == Generation::Old {
            let tagged = (shape.encode)(raw);
            self.remembered.insert(tagged);
        }
        size
    }

    pub(crate) unsafe fn allocate_in_destination(
        &mut self,
        dest: *mut Space,
        size: usize,
    ) -> *mut u8 {
        if size > block_payload_bytes() {
            fatal!(
                FatalKind::AllocationExhausted,
                "object of {} bytes for {} exceeds the block payload of {} bytes",
                size,
                (*dest).name,
                block_payload_bytes()
            );
        }
        let raw = (*dest).allocate(size);
        if !raw.is_null() {
            return raw;
        }
        let block = self.get_block_for_gc();
        (*dest).change_block(block);
        let raw = (*dest).allocate(size);
        debug_assert!(!raw.is_null());
        raw
    }

    /// Process destination spaces until every copy has been scanned.
    pub(crate) unsafe fn drain_destinations(&mut self) {
        loop {
            let mut progressed = false;
            for i in 0..self.scavenge_dests.len() {
                let dest = self.scavenge_dests[i];
                loop {
                    let raw = (*dest).next_unscanned();
                    if raw.is_null() {
                        break;
                    }
                    let size = self.handle_object(raw);
                    (*dest).scan_advance(size);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// One full collection over this heaplet. The runtime fields must be
    /// owned by the heaplet and the SSB empty. With `share_root`, the
    /// root's transitive closure is first copied into the shared-own space;
    /// the rest of the heaplet then evacuates normally.
    pub(crate) unsafe fn scavenge(&mut self, kind: CollectionKind, share_root: Option<*mut Word>) {
        debug_assert!(self.runtime_owned);
        debug_assert!(!self.scavenge_active);
        debug_assert!(kind != CollectionKind::None);
        self.scavenge_active = true;
        let timer = if self.options.verbose {
            Some(std::time::Instant::now())
        } else {
            None
        };
        let minor = kind == CollectionKind::Minor;
        debug_assert!(share_root.is_none() || !minor);
        let active = self.active_steps;
        let reserve = 1 - active;
        let n = self.steps[0].len();
        let nursery_bytes = self.nursery.used_bytes();

        // From-spaces and the destination mapping.
        let mut froms: Vec<*mut Space> = Vec::with_capacity(n + 2);
        froms.push(&mut self.nursery as *mut Space);
        for i in 0..n {
            froms.push(&mut self.steps[active][i] as *mut Space);
        }
        let mut dests: Vec<*mut Space> = Vec::with_capacity(n + 1);
        if minor {
            let old_dest: *mut Space = &mut self.old[self.active_old];
            for i in 0..n {
                dests.push(&mut self.steps[reserve][i] as *mut Space);
            }
            // Nursery promotes into the first step, each step into the
            // next, the last step into old.
            (*froms[0]).destination = if n > 0 { dests[0] } else { old_dest };
            for i in 0..n {
                (*froms[1 + i]).destination = if i + 1 < n { dests[i + 1] } else { old_dest };
            }
            dests.push(old_dest);
        } else {
            froms.push(&mut self.old[self.active_old] as *mut Space);
            let old_dest: *mut Space = &mut self.old[1 - self.active_old];
            for &from in froms.iter() {
                (*from).destination = old_dest;
            }
            dests.push(old_dest);
        }

        let mut from_bytes = 0;
        for &from in froms.iter() {
            from_bytes += (*from).used_bytes();
            (*from).evacuating = true;
            // Snapshot the finalisables into the candidate-dead list.
            self.candidate_dead.splice_from(&mut (*from).finalisables);
        }
        for &dest in dests.iter() {
            (*dest).begin_scan();
        }
        self.copied_bytes = 0;
        let old_used_before = if minor { self.old_used_bytes() } else { 0 };

        // Sharing first copies the closure of the share root into the
        // shared-own space, with every from-space temporarily pointed
        // there. Broken hearts written here forward the rest of the heap
        // into the shared copies during the normal pass below.
        if let Some(root) = share_root {
            let shared: *mut Space = &mut self.shared_own;
            for &from in froms.iter() {
                (*from).destination = shared;
            }
            (*shared).begin_scan();
            self.scavenge_dests = vec![shared];
            self.handle_word(root);
            self.drain_destinations();
            let old_dest: *mut Space = &mut self.old[1 - self.active_old];
            for &from in froms.iter() {
                (*from).destination = old_dest;
            }
        }
        self.scavenge_dests = dests.clone();

        // Roots: hooks first, then the registered root sets, then (minor
        // only) the remembered set.
        self.run_hooks(WhichHooks::PreCollection, kind);
        let mut root_words: Vec<*mut Word> = Vec::new();
        self.globals.for_each_word(|word| root_words.push(word));
        self.temps.for_each_word(|word| root_words.push(word));
        for word in root_words {
            self.handle_word(word);
        }
        if minor {
            let remembered = std::mem::replace(
                &mut self.remembered,
                RememberedSet::with_hasher(ahash::RandomState::new()),
            );
            for entry in remembered.iter() {
                // Scanned in place; re-inserted by handle_object if it
                // still refers to something young.
                self.handle_object(entry.untagged());
            }
        } else {
            // A major collection empties the young generation, so no
            // old-to-young reference can survive it.
            self.remembered.clear();
        }
        self.drain_destinations();

        self.process_candidate_dead();
        debug_assert!(self.candidate_dead.is_empty());

        let promoted = if minor {
            self.old_used_bytes() - old_used_before
        } else {
            0
        };

        // Give the from-space blocks back. The nursery keeps one block so
        // the next allocation avoids a pool round trip.
        for &from in froms.iter() {
            (*from).evacuating = false;
            (*from).destination = null_mut();
        }
        self.nursery.drain(false, &mut self.unused);
        for i in 0..n {
            (*froms[1 + i]).drain(true, &mut self.unused);
        }
        if !minor {
            (*froms[n + 1]).drain(true, &mut self.unused);
        }
        if minor {
            self.active_steps = reserve;
        } else {
            self.active_old = 1 - self.active_old;
        }
        self.release_surplus_blocks();

        // Survival bookkeeping and threshold adaptation.
        let survival = if from_bytes > 0 {
            self.copied_bytes as f64 / from_bytes as f64
        } else {
            0.0
        };
        self.stats.last_survival_ratio = survival;
        self.stats.bytes_copied += self.copied_bytes;
        self.stats.bytes_allocated += nursery_bytes;
        match kind {
            CollectionKind::Minor => {
                self.stats.minor_collections += 1;
                self.stats.bytes_promoted += promoted;
                self.survival.record(survival);
                let live_young = self.young_used_bytes();
                self.nursery_threshold = adapt_nursery_threshold(
                    &self.options,
                    &self.survival,
                    self.nursery_threshold,
                    live_young,
                );
            }
            CollectionKind::Major | CollectionKind::Global => {
                if kind == CollectionKind::Global {
                    self.stats.global_collections += 1;
                } else {
                    self.stats.major_collections += 1;
                }
                let old_live = self.old_used_bytes();
                self.old_threshold = adapt_old_threshold(&self.options, old_live);
            }
            CollectionKind::None => unreachable!(),
        }

        if let Some(timer) = timer {
            eprintln!(
                "[gc] {:?} pause: {} live of {} (survival {:.4}) {:.3}ms",
                kind,
                ByteSize(self.copied_bytes),
                ByteSize(from_bytes),
                survival,
                timer.elapsed().as_micros() as f64 / 1000.0
            );
        }

        self.run_hooks(WhichHooks::PostCollection, kind);
        self.scavenge_dests.clear();
        self.scavenge_active = false;
    }

    /// Finalisation inside a collection. Records whose object was copied
    /// rejoin their destination space's live list. Dead complete-object
    /// candidates with an armed finaliser are resurrected, finalised, and
    /// stay registered; dead quick candidates have their finaliser run on
    /// the stale from-space object. Anything a resurrection revives along
    /// the way is spared.
    unsafe fn process_candidate_dead(&mut self) {
        if self.candidate_dead.is_empty() {
            return;
        }
        let shapes = self.shape_table();
        let heap_ptr = Arc::as_ptr(&self.heap) as *mut Heap;
        let broken = shapes.broken_heart_type_code();
        let mut deferred = FinaliseList::new();
        loop {
            let record = self.candidate_dead.pop();
            if record.is_null() {
                break;
            }
            let raw = (*record).object.untagged();
            if *(raw as *const usize) == broken {
                // Copied, hence alive: follow the forward pointer and
                // rejoin the live list of the space it now lives in.
                let forwarded = *(raw.add(FORWARD_WORD_OFFSET * WORD_SIZE) as *const Word);
                (*record).object = forwarded;
                (*(*forwarded.block()).space).finalisables.push(record);
                continue;
            }
            let shape = shapes.get((*record).shape);
            if shape.finalisation == Finalisation::CompleteObject && (*record).need_to_run {
                // Resurrect the object and everything reachable from it so
                // the finaliser sees valid fields.
                let mut root = (*record).object;
                self.handle_word(&mut root as *mut Word);
                self.drain_destinations();
                (*record).object = root;
                (*record).need_to_run = false;
                (*(*root.block()).space).finalisables.push(record);
                if let Some(finalize) = shape.finalize {
                    finalize(heap_ptr, self as *mut Heaplet, root.untagged());
                    self.stats.finalisers_run += 1;
                }
                continue;
            }
            // Quick candidates and disarmed complete-object candidates wait
            // until all resurrections ran: one of them may yet revive this
            // object.
            deferred.push(record);
        }
        loop {
            let record = deferred.pop();
            if record.is_null() {
                break;
            }
            let raw = (*record).object.untagged();
            if *(raw as *const usize) == broken {
                let forwarded = *(raw.add(FORWARD_WORD_OFFSET * WORD_SIZE) as *const Word);
                (*record).object = forwarded;
                (*(*forwarded.block()).space).finalisables.push(record);
                continue;
            }
            let shape = shapes.get((*record).shape);
            if shape.finalisation == Finalisation::Quick && (*record).need_to_run {
                if let Some(finalize) = shape.finalize {
                    // The object is garbage; only heap-external resources
                    // may be touched.
                    finalize(heap_ptr, self as *mut Heaplet, raw);
                    self.stats.finalisers_run += 1;
                }
            }
            free_record(record);
        }
    }
}
