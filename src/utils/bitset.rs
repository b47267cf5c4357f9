//! A fixed-size bit vector.
//!
//! Used by the backward liveness analysis of the IR emitter and by the field read-bit
//! bookkeeping of the optimizer, where sets are indexed by small dense integers
//! (value numbers, block indices, argument positions).
//!
//! # Example
//!
//! ```rust
//! use cfshrink::utils::BitSet;
//!
//! let mut live = BitSet::new(130);
//! live.insert(3);
//! live.insert(129);
//!
//! assert!(live.contains(129));
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![3, 129]);
//! ```

/// A bit vector for efficient set operations over `0..len`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold the indices `0..len`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of indices this set can hold.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Inserts `index`, returning `true` if it was not present before.
    ///
    /// Indices beyond the capacity are ignored.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Removes `index`, returning `true` if it was present.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = (index / 64, 1u64 << (index % 64));
        let present = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        present
    }

    /// Returns `true` if `index` is in the set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// In-place union. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | *theirs;
            changed |= merged != *mine;
            *mine = merged;
        }
        changed
    }

    /// In-place difference (`self \ other`). Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let reduced = *mine & !*theirs;
            changed |= reduced != *mine;
            *mine = reduced;
        }
        changed
    }

    /// Iterates over the set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
