//! Packed vector of fixed-width fields over 32-bit atomic words.
//!
//! Field width must divide 32, so a field never straddles two words. Reads
//! are relaxed loads and may run concurrently with a writer; writes are a
//! load/modify/store and must be serialized by the caller.

use core::sync::atomic::{AtomicU32, Ordering};

/// Bits per storage word.
pub const WORD_BITS: u32 = u32::BITS;

/// Bytes per storage word.
pub const WORD_SIZE: usize = core::mem::size_of::<AtomicU32>();

#[inline]
const fn check_width(bits: u32) {
    assert!(bits > 0 && bits <= WORD_BITS && WORD_BITS % bits == 0);
}

#[inline]
const fn fields_per_word(bits: u32) -> usize {
    (WORD_BITS / bits) as usize
}

/// Number of words needed to hold `num_fields` fields of `bits` each.
#[inline]
pub const fn num_words(num_fields: usize, bits: u32) -> usize {
    check_width(bits);
    num_fields.div_ceil(fields_per_word(bits))
}

/// Number of fields of `bits` each that fit in `num_words` words.
#[inline]
pub const fn num_fields(num_words: usize, bits: u32) -> usize {
    check_width(bits);
    num_words * fields_per_word(bits)
}

/// A borrowed view over packed fields of a fixed width.
#[derive(Clone, Copy)]
pub struct BitfieldVector<'a> {
    words: &'a [AtomicU32],
    bits: u32,
}

impl<'a> BitfieldVector<'a> {
    pub const fn new(words: &'a [AtomicU32], bits: u32) -> Self {
        check_width(bits);
        Self { words, bits }
    }

    /// Number of fields addressable in this vector.
    #[inline]
    pub const fn len(&self) -> usize {
        num_fields(self.words.len(), self.bits)
    }

    #[inline]
    fn locate(&self, index: usize) -> (&AtomicU32, u32, u32) {
        let per_word = fields_per_word(self.bits);
        let word = &self.words[index / per_word];
        let shift = (index % per_word) as u32 * self.bits;
        let mask = if self.bits == WORD_BITS {
            u32::MAX
        } else {
            (1u32 << self.bits) - 1
        };
        (word, shift, mask)
    }

    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        let (word, shift, mask) = self.locate(index);
        (word.load(Ordering::Relaxed) >> shift) & mask
    }

    /// Store `value` (truncated to the field width) at `index`.
    ///
    /// Not atomic with respect to other writers of the same word.
    #[inline]
    pub fn set(&self, index: usize, value: u32) {
        let (word, shift, mask) = self.locate(index);
        let old = word.load(Ordering::Relaxed);
        let new = (old & !(mask << shift)) | ((value & mask) << shift);
        word.store(new, Ordering::Relaxed);
    }
}
