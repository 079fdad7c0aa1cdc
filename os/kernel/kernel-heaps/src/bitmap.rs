//! Lazily grown occupancy bitmap.
//!
//! Bits past the stored words read as free, so a heap over `[0, u64::MAX)`
//! only pays for the prefix it has actually touched.

use alloc::vec::Vec;

const WORD_BITS: u64 = u64::BITS as u64;

#[derive(Debug, Default)]
pub struct Bitmap {
    words: Vec<u64>,
}

#[inline]
fn word_index(bit: u64) -> usize {
    usize::try_from(bit / WORD_BITS).unwrap_or(usize::MAX)
}

#[inline]
const fn bit_mask(bit: u64) -> u64 {
    1 << (bit % WORD_BITS)
}

impl Bitmap {
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Highest bit index covered by stored words (exclusive).
    fn stored_bits(&self) -> u64 {
        self.words.len() as u64 * WORD_BITS
    }

    #[cfg(test)]
    pub fn get(&self, bit: u64) -> bool {
        self.words
            .get(word_index(bit))
            .is_some_and(|w| w & bit_mask(bit) != 0)
    }

    /// Mark `[start, start + count)`.
    ///
    /// Returns `false`, leaving the map untouched, if marking used would need
    /// more words than can be allocated. Clearing never grows.
    #[must_use]
    pub fn set_range(&mut self, start: u64, count: u64, used: bool) -> bool {
        if count == 0 {
            return true;
        }
        let end = start + count;
        if used {
            let Some(needed) = word_index(end - 1).checked_add(1) else {
                return false;
            };
            if needed > self.words.len() {
                if self.words.try_reserve(needed - self.words.len()).is_err() {
                    return false;
                }
                self.words.resize(needed, 0);
            }
        }
        let end = end.min(self.stored_bits());
        let mut bit = start;
        while bit < end {
            let w = word_index(bit);
            if bit.is_multiple_of(WORD_BITS) && end - bit >= WORD_BITS {
                self.words[w] = if used { u64::MAX } else { 0 };
                bit += WORD_BITS;
                continue;
            }
            if used {
                self.words[w] |= bit_mask(bit);
            } else {
                self.words[w] &= !bit_mask(bit);
            }
            bit += 1;
        }
        true
    }

    /// First free bit at or after `from`.
    pub fn next_free(&self, from: u64) -> u64 {
        let mut w = word_index(from);
        let Some(first) = self.words.get(w) else {
            return from;
        };
        let mut word = !first & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                return w as u64 * WORD_BITS + u64::from(word.trailing_zeros());
            }
            w += 1;
            match self.words.get(w) {
                Some(next) => word = !next,
                None => return w as u64 * WORD_BITS,
            }
        }
    }

    /// First used bit in `[from, end)`.
    pub fn next_used(&self, from: u64, end: u64) -> Option<u64> {
        if from >= end {
            return None;
        }
        let mut w = word_index(from);
        let mut word = self.words.get(w)? & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                let bit = w as u64 * WORD_BITS + u64::from(word.trailing_zeros());
                return (bit < end).then_some(bit);
            }
            w += 1;
            if w as u64 * WORD_BITS >= end {
                return None;
            }
            word = *self.words.get(w)?;
        }
    }

    /// First free bit in `[from, end)`.
    pub fn next_free_below(&self, from: u64, end: u64) -> Option<u64> {
        let bit = self.next_free(from);
        (bit < end).then_some(bit)
    }

    pub fn any_used(&self, start: u64, count: u64) -> bool {
        self.next_used(start, start + count).is_some()
    }

    pub fn all_used(&self, start: u64, count: u64) -> bool {
        self.next_free_below(start, start + count).is_none()
    }
}
