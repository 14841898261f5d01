//! Atomic bitset backing the fast-fast bits.
//!
//! Stores are release and loads are acquire: a reader that observes a bit
//! change also observes every write the writer made before it.

use core::sync::atomic::{AtomicU64, Ordering};

pub const WORD_BITS: usize = u64::BITS as usize;

#[inline]
pub const fn num_words(num_bits: usize) -> usize {
    num_bits.div_ceil(WORD_BITS)
}

/// A borrowed view over a bitset stored in atomic words.
#[derive(Clone, Copy)]
pub struct Bitvector<'a> {
    words: &'a [AtomicU64],
}

impl<'a> Bitvector<'a> {
    pub const fn new(words: &'a [AtomicU64]) -> Self {
        Self { words }
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        let word = self.words[index / WORD_BITS].load(Ordering::Acquire);
        word & (1 << (index % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&self, index: usize, value: bool) {
        let word = &self.words[index / WORD_BITS];
        let bit = 1u64 << (index % WORD_BITS);
        if value {
            word.fetch_or(bit, Ordering::Release);
        } else {
            word.fetch_and(!bit, Ordering::Release);
        }
    }

    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}
