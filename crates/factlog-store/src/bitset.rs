//! Dense bit vector over small non-negative integers.
//!
//! `BitSet` is the value type every index in the store is built from:
//! category membership, relation rows, attribute presence, and every
//! intermediate result of plan execution.
//!
//! Bits are packed into 64-bit words. The logical `size` only grows; binary
//! operations treat the shorter operand as zero-extended and return a set
//! sized to the larger operand. Point access (`has_bit`, `set_bit`,
//! `clear_bit`) is strict: an index `>= size` is a caller bug and panics.

use crate::error::KbError;
use serde::{Deserialize, Serialize};
use std::fmt;

const WORD_BITS: usize = 64;

#[inline]
fn words_for(size: usize) -> usize {
    size.div_ceil(WORD_BITS)
}

/// Resizable set of `usize` indices in `0..size`.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BitSetRepr", into = "BitSetRepr")]
pub struct BitSet {
    /// Bit `i` lives at `words[i / 64] & (1 << (i % 64))`. Bits `>= size`
    /// are always zero.
    words: Vec<u64>,
    size: usize,
}

impl BitSet {
    /// Empty set with logical size `size`.
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0; words_for(size)],
            size,
        }
    }

    /// Set containing every index in `0..size`.
    pub fn full(size: usize) -> Self {
        let mut words = vec![u64::MAX; words_for(size)];
        let trailing = size % WORD_BITS;
        if trailing > 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << trailing) - 1;
            }
        }
        Self { words, size }
    }

    /// Set containing exactly `index`, sized to `size` or to `index + 1` if
    /// that is larger.
    pub fn singleton(size: usize, index: usize) -> Self {
        let mut out = Self::new(size.max(index + 1));
        out.set_bit(index);
        out
    }

    pub fn from_indices(size: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut out = Self::new(size);
        for i in indices {
            out.set_bit(i);
        }
        out
    }

    /// Logical size (number of addressable indices).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow the logical size. No-op if `new_size <= size`.
    pub fn resize(&mut self, new_size: usize) {
        if new_size <= self.size {
            return;
        }
        self.words.resize(words_for(new_size), 0);
        self.size = new_size;
    }

    #[inline]
    fn check(&self, index: usize, op: &str) {
        assert!(
            index < self.size,
            "BitSet::{op}: index {index} out of range for size {}",
            self.size
        );
    }

    pub fn has_bit(&self, index: usize) -> bool {
        self.check(index, "has_bit");
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Lenient membership test: indices `>= size` read as absent.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.size && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Set `index`, returning `true` if it was previously clear.
    pub fn set_bit(&mut self, index: usize) -> bool {
        self.check(index, "set_bit");
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clear `index`, returning `true` if it was previously set.
    pub fn clear_bit(&mut self, index: usize) -> bool {
        self.check(index, "clear_bit");
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    pub fn and(&self, other: &BitSet) -> BitSet {
        let mut out = self.clone();
        out.and_assign(other);
        out
    }

    pub fn or(&self, other: &BitSet) -> BitSet {
        let mut out = self.clone();
        out.or_assign(other);
        out
    }

    pub fn and_not(&self, other: &BitSet) -> BitSet {
        let mut out = self.clone();
        out.and_not_assign(other);
        out
    }

    /// In-place intersection; the result is sized to the larger operand.
    pub fn and_assign(&mut self, other: &BitSet) {
        self.resize(other.size);
        let shared = other.words.len();
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= *o;
        }
        for w in self.words.iter_mut().skip(shared) {
            *w = 0;
        }
    }

    /// In-place union; the result is sized to the larger operand.
    pub fn or_assign(&mut self, other: &BitSet) {
        self.resize(other.size);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= *o;
        }
    }

    /// In-place difference; the result is sized to the larger operand.
    pub fn and_not_assign(&mut self, other: &BitSet) {
        self.resize(other.size);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !*o;
        }
    }

    /// `true` if the two sets share at least one index. Does not allocate.
    pub fn intersects(&self, other: &BitSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Smallest set index, if any.
    pub fn first(&self) -> Option<usize> {
        self.iter_set_bits().next()
    }

    /// Ascending traversal of set indices.
    ///
    /// Each call re-scans the words, so the traversal can be restarted at will
    /// but must not be held across a mutation of `self`.
    pub fn iter_set_bits(&self) -> SetBits<'_> {
        SetBits {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter_set_bits().collect()
    }

    /// Set equality ignoring logical size.
    pub fn same_members(&self, other: &BitSet) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|&w| w == 0)
    }
}

/// Wire form of a [`BitSet`]; decoding checks the word invariants.
#[derive(Serialize, Deserialize)]
struct BitSetRepr {
    words: Vec<u64>,
    size: usize,
}

impl TryFrom<BitSetRepr> for BitSet {
    type Error = KbError;

    fn try_from(repr: BitSetRepr) -> Result<Self, Self::Error> {
        let BitSetRepr { words, size } = repr;
        if words.len() != words_for(size) {
            return Err(KbError::InvalidBitSet(format!(
                "{} words for size {size}, expected {}",
                words.len(),
                words_for(size)
            )));
        }
        let trailing = size % WORD_BITS;
        if trailing > 0 {
            if let Some(&last) = words.last() {
                if last >> trailing != 0 {
                    return Err(KbError::InvalidBitSet(format!(
                        "bits set at or above size {size}"
                    )));
                }
            }
        }
        Ok(Self { words, size })
    }
}

impl From<BitSet> for BitSetRepr {
    fn from(bs: BitSet) -> Self {
        Self {
            words: bs.words,
            size: bs.size,
        }
    }
}

/// Iterator returned by [`BitSet::iter_set_bits`].
pub struct SetBits<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let tz = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * WORD_BITS + tz);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitSet(size={}, ", self.size)?;
        f.debug_set().entries(self.iter_set_bits()).finish()?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_roundtrip() {
        let mut bs = BitSet::new(130);
        assert!(bs.set_bit(0));
        assert!(bs.set_bit(64));
        assert!(bs.set_bit(129));
        assert!(!bs.set_bit(64));
        assert!(bs.has_bit(129));
        assert!(bs.clear_bit(64));
        assert!(!bs.has_bit(64));
        assert_eq!(bs.to_vec(), vec![0, 129]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn has_bit_past_size_panics() {
        let bs = BitSet::new(10);
        bs.has_bit(10);
    }

    #[test]
    fn singleton_grows_to_fit_its_index() {
        let bs = BitSet::singleton(8, 20);
        assert_eq!(bs.size(), 21);
        assert_eq!(bs.to_vec(), vec![20]);
        assert_eq!(BitSet::singleton(64, 3).size(), 64);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_bit_on_empty_panics() {
        BitSet::new(0).set_bit(0);
    }

    #[test]
    fn full_masks_trailing_word() {
        let bs = BitSet::full(70);
        assert_eq!(bs.popcount(), 70);
        assert_eq!(bs.iter_set_bits().last(), Some(69));
    }

    #[test]
    fn mixed_size_operations_zero_extend() {
        let small = BitSet::from_indices(10, [1, 3]);
        let large = BitSet::from_indices(200, [3, 150]);

        let and = small.and(&large);
        assert_eq!(and.size(), 200);
        assert_eq!(and.to_vec(), vec![3]);

        let or = small.or(&large);
        assert_eq!(or.to_vec(), vec![1, 3, 150]);

        let diff = large.and_not(&small);
        assert_eq!(diff.to_vec(), vec![150]);
        assert!(small.intersects(&large));
        assert!(!BitSet::from_indices(10, [2]).intersects(&large));
    }

    #[test]
    fn resize_never_shrinks() {
        let mut bs = BitSet::from_indices(100, [99]);
        bs.resize(10);
        assert_eq!(bs.size(), 100);
        bs.resize(300);
        assert!(bs.has_bit(99));
        assert!(!bs.has_bit(299));
    }

    #[test]
    fn iteration_is_restartable() {
        let bs = BitSet::from_indices(256, [5, 63, 64, 255]);
        let first: Vec<_> = bs.iter_set_bits().collect();
        let second: Vec<_> = bs.iter_set_bits().collect();
        assert_eq!(first, second);
        assert_eq!(bs.first(), Some(5));
    }

    #[test]
    fn decode_checks_word_invariants() {
        let bs = BitSet::from_indices(100, [5, 99]);
        let json = serde_json::to_string(&bs).unwrap();
        let back: BitSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bs);
        assert!(back.has_bit(5));

        assert!(serde_json::from_str::<BitSet>(r#"{"words":[],"size":100}"#).is_err());
        assert!(serde_json::from_str::<BitSet>(r#"{"words":[0,0,0],"size":100}"#).is_err());
        // Bit 2 lies past a size of 2.
        assert!(serde_json::from_str::<BitSet>(r#"{"words":[4],"size":2}"#).is_err());
        let empty: BitSet = serde_json::from_str(r#"{"words":[],"size":0}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn same_members_ignores_size() {
        let a = BitSet::from_indices(8, [2]);
        let b = BitSet::from_indices(512, [2]);
        assert!(a.same_members(&b));
        assert!(!a.same_members(&BitSet::from_indices(512, [2, 400])));
    }
}
