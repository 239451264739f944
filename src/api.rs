//! Tagged words and the object shape registry.
//!
//! A tagged object is one machine word. Boxed references point into aligned
//! blocks and carry a shape discriminant in their low `TAG_BITS`; unboxed
//! values encode data in the remaining bits and never touch the heap.
//!
//! Shapes are descriptors registered once, at heap creation, and consulted
//! by the collector to recognise, size, copy, scan and finalise objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::block::{Block, Generation};
use crate::error::FatalKind;
use crate::fatal;
use crate::globals::{is_aligned, ALLOCATION_GRAIN, TAG_MASK};
use crate::heap::Heap;
use crate::heaplet::Heaplet;

/// A tagged object: one machine word, either a boxed reference into a block
/// or an unboxed value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word(usize);

impl Word {
    pub const NULL: Word = Word(0);

    #[inline(always)]
    pub const fn from_bits(bits: usize) -> Word {
        Word(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub const fn tag(self) -> usize {
        self.0 & TAG_MASK
    }

    /// Strip the tag bits. For boxed words this is the object pointer,
    /// aligned to the allocation grain.
    #[inline(always)]
    pub fn untagged(self) -> *mut u8 {
        (self.0 & !TAG_MASK) as *mut u8
    }

    #[inline(always)]
    pub fn tag_pointer(raw: *mut u8, tag: usize) -> Word {
        debug_assert!(is_aligned(raw as usize, ALLOCATION_GRAIN));
        debug_assert!(tag <= TAG_MASK);
        Word(raw as usize | tag)
    }

    /// Block header of a boxed word.
    #[inline(always)]
    pub fn block(self) -> *mut Block {
        Block::from_pointer(self.untagged())
    }

    /// Generation of a boxed word's block.
    #[inline(always)]
    pub unsafe fn generation(self) -> Generation {
        (*self.block()).generation
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:#x})", self.0)
    }
}

/// Kinds of collection, as seen by hooks and statistics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollectionKind {
    /// No collection in progress (SSB flush hooks outside a collection).
    None,
    Minor,
    Major,
    Global,
}

/// What `collect` should do.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollectAction {
    /// Let the heaplet decide based on thresholds.
    Default,
    /// Just link a fresh nursery block.
    BlockChange,
    ForceMinor,
    ForceMajor,
    /// Minor or major, whichever the thresholds call for.
    ForceEither,
    ForceGlobal,
    /// Rejected by `collect`, which has no object to share; sharing goes
    /// through [`crate::runtime::share`].
    Share,
}

pub type RecogniseFn = fn(Word) -> bool;
pub type EncodeFn = fn(*mut u8) -> Word;
pub type SizeFn = fn(Word) -> usize;
pub type IsTypeCodeFn = fn(usize) -> bool;

/// Copy the payload from `from` to `to` and write the new tagged reference
/// into `dest`. Returns the number of bytes written, which must equal the
/// object's size: a copy function may change the object's shape but not its
/// total size.
pub type CopyFn = unsafe fn(&mut Heaplet, *mut Word, *const u8, *mut u8) -> usize;

/// Call `Heaplet::handle_word` on every tagged field of the object at `raw`
/// (already in tospace) and return the object's size.
pub type ScanFn = unsafe fn(&mut Heaplet, *mut u8) -> usize;

pub type FinalizeFn = unsafe fn(*mut Heap, *mut Heaplet, *mut u8);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShapeKind {
    /// No type-code word; every word of the object is a tagged field.
    Headerless,
    /// Word 0 is a type code.
    Headered,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Finalisation {
    None,
    /// Finaliser runs on the from-space object; fields may be stale.
    Quick,
    /// The object and everything reachable from it is resurrected before
    /// the finaliser runs.
    CompleteObject,
}

pub struct Shape {
    pub name: &'static str,
    pub kind: ShapeKind,
    pub finalisation: Finalisation,
    pub recognise: RecogniseFn,
    pub encode: EncodeFn,
    pub size: SizeFn,
    pub is_type_code: Option<IsTypeCodeFn>,
    pub copy: CopyFn,
    pub scan: Option<ScanFn>,
    pub finalize: Option<FinalizeFn>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ShapeIndex(pub u32);

/// The shape registry. Append-only; frozen once the first heaplet exists.
///
/// `recognise` probes are consulted in registration order, so the user is
/// responsible for registering shapes in an order that gives unambiguous
/// recognition.
pub struct ShapeTable {
    invalid_object: Word,
    uninitialised_object: Word,
    broken_heart_type_code: usize,
    unboxed: fn(Word) -> bool,
    shapes: Vec<Shape>,
    headered: Vec<u32>,
    headerless: Vec<u32>,
    finalisable: Vec<u32>,
    quick_finalisable: Vec<u32>,
    complete_finalisable: Vec<u32>,
    sealed: AtomicBool,
}

impl ShapeTable {
    /// `invalid` and `uninitialised` are unboxed sentinels used for debug
    /// fill. `broken_heart_type_code` must be distinct from every real type
    /// code and from every valid unboxed encoding.
    pub fn new(
        invalid: Word,
        uninitialised: Word,
        broken_heart_type_code: usize,
        unboxed: fn(Word) -> bool,
    ) -> Self {
        Self {
            invalid_object: invalid,
            uninitialised_object: uninitialised,
            broken_heart_type_code,
            unboxed,
            shapes: Vec::new(),
            headered: Vec::new(),
            headerless: Vec::new(),
            finalisable: Vec::new(),
            quick_finalisable: Vec::new(),
            complete_finalisable: Vec::new(),
            sealed: AtomicBool::new(false),
        }
    }

    fn push(&mut self, shape: Shape) -> ShapeIndex {
        if self.is_sealed() {
            fatal!(
                FatalKind::MisuseAtMutator,
                "shape registration after the first heaplet was created"
            );
        }
        let index = self.shapes.len() as u32;
        match shape.kind {
            ShapeKind::Headered => self.headered.push(index),
            ShapeKind::Headerless => self.headerless.push(index),
        }
        match shape.finalisation {
            Finalisation::None => {}
            Finalisation::Quick => {
                self.finalisable.push(index);
                self.quick_finalisable.push(index);
            }
            Finalisation::CompleteObject => {
                self.finalisable.push(index);
                self.complete_finalisable.push(index);
            }
        }
        self.shapes.push(shape);
        ShapeIndex(index)
    }

    pub fn add_headerless(
        &mut self,
        name: &'static str,
        recognise: RecogniseFn,
        encode: EncodeFn,
        size: SizeFn,
        copy: CopyFn,
    ) -> ShapeIndex {
        self.push(Shape {
            name,
            kind: ShapeKind::Headerless,
            finalisation: Finalisation::None,
            recognise,
            encode,
            size,
            is_type_code: None,
            copy,
            scan: None,
            finalize: None,
        })
    }

    pub fn add_headered(
        &mut self,
        name: &'static str,
        recognise: RecogniseFn,
        encode: EncodeFn,
        size: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        scan: Option<ScanFn>,
    ) -> ShapeIndex {
        self.push(Shape {
            name,
            kind: ShapeKind::Headered,
            finalisation: Finalisation::None,
            recognise,
            encode,
            size,
            is_type_code: Some(is_type_code),
            copy,
            scan,
            finalize: None,
        })
    }

    pub fn add_headered_quickly_finalisable(
        &mut self,
        name: &'static str,
        recognise: RecogniseFn,
        encode: EncodeFn,
        size: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        scan: Option<ScanFn>,
        finalize: FinalizeFn,
    ) -> ShapeIndex {
        self.push(Shape {
            name,
            kind: ShapeKind::Headered,
            finalisation: Finalisation::Quick,
            recognise,
            encode,
            size,
            is_type_code: Some(is_type_code),
            copy,
            scan,
            finalize: Some(finalize),
        })
    }

    pub fn add_headered_complete_object_finalisable(
        &mut self,
        name: &'static str,
        recognise: RecogniseFn,
        encode: EncodeFn,
        size: SizeFn,
        is_type_code: IsTypeCodeFn,
        copy: CopyFn,
        scan: Option<ScanFn>,
        finalize: FinalizeFn,
    ) -> ShapeIndex {
        self.push(Shape {
            name,
            kind: ShapeKind::Headered,
            finalisation: Finalisation::CompleteObject,
            recognise,
            encode,
            size,
            is_type_code: Some(is_type_code),
            copy,
            scan,
            finalize: Some(finalize),
        })
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn is_unboxed(&self, word: Word) -> bool {
        (self.unboxed)(word)
    }

    #[inline(always)]
    pub fn broken_heart_type_code(&self) -> usize {
        self.broken_heart_type_code
    }

    pub fn invalid_object(&self) -> Word {
        self.invalid_object
    }

    pub fn uninitialised_object(&self) -> Word {
        self.uninitialised_object
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    #[inline]
    pub fn get(&self, index: ShapeIndex) -> &Shape {
        &self.shapes[index.0 as usize]
    }

    /// Registered shapes, in registration order.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn headered_shapes(&self) -> impl Iterator<Item = ShapeIndex> + '_ {
        self.headered.iter().map(|&i| ShapeIndex(i))
    }

    pub fn headerless_shapes(&self) -> impl Iterator<Item = ShapeIndex> + '_ {
        self.headerless.iter().map(|&i| ShapeIndex(i))
    }

    pub fn finalisable_shapes(&self) -> impl Iterator<Item = ShapeIndex> + '_ {
        self.finalisable.iter().map(|&i| ShapeIndex(i))
    }

    pub fn quick_finalisable_shapes(&self) -> impl Iterator<Item = ShapeIndex> + '_ {
        self.quick_finalisable.iter().map(|&i| ShapeIndex(i))
    }

    pub fn complete_object_finalisable_shapes(&self) -> impl Iterator<Item = ShapeIndex> + '_ {
        self.complete_finalisable.iter().map(|&i| ShapeIndex(i))
    }

    /// Find the shape of a boxed word by probing `recognise` in
    /// registration order.
    pub fn shape_of(&self, word: Word) -> Option<(ShapeIndex, &Shape)> {
        for (i, shape) in self.shapes.iter().enumerate() {
            if (shape.recognise)(word) {
                return Some((ShapeIndex(i as u32), shape));
            }
        }
        None
    }

    /// Find the headered shape whose type code matches `header`.
    pub(crate) fn shape_of_header(&self, header: usize) -> Option<(ShapeIndex, &Shape)> {
        for &i in self.headered.iter() {
            let shape = &self.shapes[i as usize];
            if let Some(is_type_code) = shape.is_type_code {
                if is_type_code(header) {
                    return Some((ShapeIndex(i), shape));
                }
            }
        }
        None
    }

    /// Identify the object at `raw` from memory alone: first by type code,
    /// then by probing the headerless shapes.
    pub(crate) unsafe fn shape_of_raw(&self, raw: *mut u8) -> Option<(ShapeIndex, &Shape)> {
        let first = *(raw as *const usize);
        if let Some(found) = self.shape_of_header(first) {
            return Some(found);
        }
        for &i in self.headerless.iter() {
            let shape = &self.shapes[i as usize];
            let tagged = (shape.encode)(raw);
            if (shape.recognise)(tagged) {
                return Some((ShapeIndex(i), shape));
            }
        }
        None
    }
}
