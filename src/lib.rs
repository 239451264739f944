//! # Ember
//!
//! Ember is a generational, moving, copying garbage collector for VMs
//! implemented in Rust. One process-wide [`Heap`] is shared by many
//! threads; each thread mutates through its own [`Heaplet`], so the
//! allocation and write-barrier fast paths need no synchronisation at all.
//!
//! The heap is partitioned into aligned power-of-two blocks. Objects are
//! tagged machine words ([`Word`]): boxed references point into blocks and
//! carry a shape discriminant in their low bits, unboxed values encode
//! data in the rest of the word. User-registered [`Shape`]s teach the
//! collector to recognise, size, copy, scan and finalise each kind of
//! object.
//!
//! New objects are born in the nursery and survive minor collections
//! through ageing steps into the old space; major collections compact the
//! old space; a share operation lifts an object and its transitive closure
//! into the shared generation visible to other threads. Old-to-young
//! references are remembered coarsely, per object, through a sequential
//! store buffer living in the tail of the nursery's current block.

pub mod api;
pub mod block;
pub mod block_allocator;
pub mod error;
pub mod finalize;
pub mod globals;
pub mod heap;
pub mod heaplet;
pub mod mmap;
pub mod roots;
pub mod runtime;
pub mod safepoint;
pub mod scavenger;
pub mod sizing;
pub mod space;
pub mod statistics;

pub use api::{
    CollectAction, CollectionKind, CopyFn, EncodeFn, Finalisation, FinalizeFn, IsTypeCodeFn,
    RecogniseFn, ScanFn, Shape, ShapeIndex, ShapeKind, ShapeTable, SizeFn, Word,
};
pub use block::Generation;
pub use error::FatalKind;
pub use globals::{ALLOCATION_GRAIN, BLOCK_BIT_MASK, BLOCK_SIZE, TAG_BITS, TAG_MASK, WORD_SIZE};
pub use heap::{Heap, HeapConfig};
pub use heaplet::{Heaplet, HeapletOptions};
pub use roots::{GlobalRootHandle, HookFn, HookHandle, TempRootFrame};
pub use runtime::{
    after_blocking, allocate, before_blocking, collect, global_collection_safe_point,
    heaplet_to_runtime, request_global_collection, runtime_to_heaplet, safepoint, share,
    share_barrier, ssb_flush, write_barrier, write_barrier_with_share, RuntimeFields,
};
pub use sizing::SURVIVAL_RATIO_NO;
pub use statistics::{HeapStatistics, HeapletStatistics};

#[cfg(test)]
mod tests;
