use std::mem::size_of;

/// Machine word size in bytes. Tagged objects are exactly one word.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Smallest object, in words. Two words are required so that a copied-out
/// object has room for the broken-heart type code and the forward pointer.
pub const MIN_OBJECT_WORDS: usize = 2;

/// Allocation grain in bytes. Allocation pointers and object sizes are
/// always multiples of this.
pub const ALLOCATION_GRAIN: usize = MIN_OBJECT_WORDS * WORD_SIZE;

/// Number of low bits of a boxed word available for the shape discriminant.
pub const TAG_BITS: u32 = WORD_SIZE.trailing_zeros() + MIN_OBJECT_WORDS.trailing_zeros();

pub const TAG_MASK: usize = (1 << TAG_BITS) - 1;

/// Block size in bytes. Must be a power of two so that masking the low bits
/// of any interior pointer yields the block header.
pub const BLOCK_SIZE: usize = 128 * 1024;

pub const BLOCK_BIT_MASK: usize = !(BLOCK_SIZE - 1);

/// Word offset, inside a copied-out object, of the forward pointer. Distinct
/// from word 0 which holds the broken-heart type code after the copy.
pub const FORWARD_WORD_OFFSET: usize = 1;

#[inline(always)]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !align.wrapping_sub(1)
}

#[inline(always)]
pub const fn align_up(addr: usize, align: usize) -> usize {
    addr.wrapping_add(align.wrapping_sub(1)) & !align.wrapping_sub(1)
}

#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & align.wrapping_sub(1) == 0
}

/// Round an allocation request up to the grain, honouring the minimum
/// object size.
#[inline(always)]
pub const fn round_up_allocation(size: usize) -> usize {
    let size = if size < ALLOCATION_GRAIN {
        ALLOCATION_GRAIN
    } else {
        size
    };
    align_up(size, ALLOCATION_GRAIN)
}
