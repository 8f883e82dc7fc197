//! Core Identifiers, Capacities, and Bit-Level Sets
//!
//! This module defines the **fundamental identifiers and set representations**
//! shared by every other part of the runtime: trait and detail ids, subject ids
//! and generations, chunk/belt/mechanism ids, and the growable [`BitMask`] that
//! backs traitmarks, detailmarks and filters.
//!
//! ## Design Philosophy
//!
//! - **Small copyable ids.** Every runtime concept is addressed by a compact
//!   integer, never by a pointer.
//! - **Bitset matching.** Component sets are bitmasks so that inclusion and
//!   exclusion tests are a handful of word operations.
//! - **Canonical form.** A [`BitMask`] never stores trailing zero words, so the
//!   derived `Eq` and `Hash` are set equality and masks can key hash maps
//!   directly (the traitmark → chunk cache relies on it).
//!
//! ## Marks
//!
//! [`Traitmark`] and [`Detailmark`] pair a mask with the sorted list of ids it
//! contains. The sorted list is the *line order* of a chunk or belt: the
//! position of a trait id within [`Traitmark::traits`] is the index of its trait
//! line. Lookups by id are a binary search over that list.
//!
//! ## Safety
//!
//! This module contains no unsafe code.

use smallvec::SmallVec;
use static_assertions::const_assert;


/// Identifier of a registered trait type.
pub type TraitId = u16;
/// Identifier of a registered detail class.
pub type DetailId = u16;
/// Index of a subject inside the machine's subject pool.
pub type SubjectId = u32;
/// Generation counter used to detect stale subject handles.
pub type Generation = u32;
/// Identifier of a chunk within its mechanism.
pub type ChunkId = u32;
/// Identifier of a belt within its mechanism.
pub type BeltId = u32;
/// Identifier of a mechanism within its machine.
pub type MechanismId = u32;
/// Index of a cursor inside a chain's embedded cursor pool.
pub type CursorId = usize;

/// Maximum number of registered trait types.
pub const TRAIT_CAP: usize = 1024;
/// Maximum number of registered detail classes.
pub const DETAIL_CAP: usize = 1024;

/// Default number of rows per storage block of a trait line.
pub const DEFAULT_LINE_BLOCK_CAPACITY: usize = 1024;

/// Generation that no live subject ever carries.
pub const NULL_GENERATION: Generation = 0;

const_assert!(TRAIT_CAP <= (TraitId::MAX as usize) + 1);
const_assert!(DETAIL_CAP <= (DetailId::MAX as usize) + 1);
const_assert!(DEFAULT_LINE_BLOCK_CAPACITY.is_power_of_two());

const WORD_BITS: usize = u64::BITS as usize;

/// Growable bitset over compact ids.
///
/// Stored as `u64` words; bit `i` lives in word `i / 64`. The word vector is
/// kept trimmed (no trailing zero words), which makes structural equality and
/// hashing coincide with set equality.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitMask {
    words: SmallVec<[u64; 2]>,
}

impl BitMask {
    /// Creates an empty mask.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mask from a list of bit indices.
    pub fn from_bits<I: IntoIterator<Item = usize>>(bits: I) -> Self {
        let mut mask = Self::new();
        for bit in bits {
            mask.set(bit);
        }
        mask
    }

    /// Sets `bit`, growing the word vector as needed.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % WORD_BITS);
    }

    /// Clears `bit`. Returns `true` if it was set.
    #[inline]
    pub fn clear(&mut self, bit: usize) -> bool {
        let word = bit / WORD_BITS;
        let Some(slot) = self.words.get_mut(word) else { return false };
        let flag = 1u64 << (bit % WORD_BITS);
        let was_set = *slot & flag != 0;
        *slot &= !flag;
        self.trim();
        was_set
    }

    /// Returns `true` if `bit` is set.
    #[inline]
    pub fn has(&self, bit: usize) -> bool {
        self.words
            .get(bit / WORD_BITS)
            .map_or(false, |word| (word >> (bit % WORD_BITS)) & 1 == 1)
    }

    /// Returns `true` if every bit of `other` is also set in `self`.
    #[inline]
    pub fn includes(&self, other: &BitMask) -> bool {
        if other.words.len() > self.words.len() {
            return false;
        }
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// Returns `true` if `self` and `other` share at least one bit.
    #[inline]
    pub fn intersects(&self, other: &BitMask) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Adds every bit of `other` to `self`.
    pub fn union_with(&mut self, other: &BitMask) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }

    /// Number of bits set in `self` but not in `other`.
    pub fn difference_count(&self, other: &BitMask) -> usize {
        self.words
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let b = other.words.get(i).copied().unwrap_or(0);
                (a & !b).count_ones() as usize
            })
            .sum()
    }

    /// Iterates over the set bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * WORD_BITS;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(base + tz)
                })
            })
    }

    #[inline]
    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl std::fmt::Debug for BitMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The exact, sorted set of trait types stored by a chunk.
///
/// ## Invariants
/// - `traits` lists exactly the bits of `mask`, ascending.
/// - The position of an id in `traits` is its line index in the chunk.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct Traitmark {
    mask: BitMask,
    traits: SmallVec<[TraitId; 8]>,
}

impl Traitmark {
    /// Builds a traitmark from a mask.
    pub fn from_mask(mask: BitMask) -> Self {
        let traits = mask.iter().map(|bit| bit as TraitId).collect();
        Self { mask, traits }
    }

    /// Builds a traitmark from trait ids in any order (duplicates collapse).
    pub fn from_ids(ids: &[TraitId]) -> Self {
        Self::from_mask(BitMask::from_bits(ids.iter().map(|&id| id as usize)))
    }

    /// The underlying mask.
    #[inline]
    pub fn mask(&self) -> &BitMask {
        &self.mask
    }

    /// Trait ids in line order.
    #[inline]
    pub fn traits(&self) -> &[TraitId] {
        &self.traits
    }

    /// Number of traits.
    #[inline]
    pub fn len(&self) -> usize {
        self.traits.len()
    }

    /// Returns `true` if the traitmark holds no traits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }

    /// Returns `true` if `trait_id` is part of this traitmark.
    #[inline]
    pub fn contains(&self, trait_id: TraitId) -> bool {
        self.mask.has(trait_id as usize)
    }

    /// Line index of `trait_id`, if present.
    #[inline]
    pub fn line_index_of(&self, trait_id: TraitId) -> Option<usize> {
        self.traits.binary_search(&trait_id).ok()
    }

    /// A copy of this traitmark with `trait_id` added.
    pub fn with(&self, trait_id: TraitId) -> Self {
        let mut mask = self.mask.clone();
        mask.set(trait_id as usize);
        Self::from_mask(mask)
    }

    /// A copy of this traitmark with `trait_id` removed.
    pub fn without(&self, trait_id: TraitId) -> Self {
        let mut mask = self.mask.clone();
        mask.clear(trait_id as usize);
        Self::from_mask(mask)
    }
}

/// The set of detail classes a belt caches lines for.
///
/// A belt accepts any subjective whose (hierarchy-expanded) detail classes are
/// all contained in its detailmark.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct Detailmark {
    mask: BitMask,
    details: SmallVec<[DetailId; 4]>,
}

impl Detailmark {
    /// Builds a detailmark from a mask.
    pub fn from_mask(mask: BitMask) -> Self {
        let details = mask.iter().map(|bit| bit as DetailId).collect();
        Self { mask, details }
    }

    /// The underlying mask.
    #[inline]
    pub fn mask(&self) -> &BitMask {
        &self.mask
    }

    /// Detail class ids in line order.
    #[inline]
    pub fn details(&self) -> &[DetailId] {
        &self.details
    }

    /// Number of detail lines.
    #[inline]
    pub fn len(&self) -> usize {
        self.details.len()
    }

    /// Returns `true` if the detailmark holds no classes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Line index of `detail_id`, if present.
    #[inline]
    pub fn line_index_of(&self, detail_id: DetailId) -> Option<usize> {
        self.details.binary_search(&detail_id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_keep_canonical_form() {
        let mut a = BitMask::new();
        a.set(3);
        a.set(130);
        assert!(a.has(130));
        assert!(a.clear(130));
        assert!(!a.clear(130));

        let b = BitMask::from_bits([3]);
        assert_eq!(a, b);
    }

    #[test]
    fn includes_handles_longer_operands() {
        let small = BitMask::from_bits([1, 2]);
        let large = BitMask::from_bits([1, 2, 200]);
        assert!(large.includes(&small));
        assert!(!small.includes(&large));
        assert!(small.includes(&BitMask::new()));
    }

    #[test]
    fn traitmark_line_order_is_ascending() {
        let mark = Traitmark::from_ids(&[9, 2, 5, 2]);
        assert_eq!(mark.traits(), &[2, 5, 9]);
        assert_eq!(mark.line_index_of(5), Some(1));
        assert_eq!(mark.line_index_of(4), None);
        assert_eq!(mark.without(5).traits(), &[2, 9]);
        assert_eq!(mark.with(1).line_index_of(2), Some(1));
    }

    #[test]
    fn difference_count_counts_extra_bits() {
        let a = BitMask::from_bits([0, 1, 70]);
        let b = BitMask::from_bits([1]);
        assert_eq!(a.difference_count(&b), 2);
        assert_eq!(b.difference_count(&a), 0);
    }
}
