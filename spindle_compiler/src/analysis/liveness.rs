//! Backward liveness of local bindings.
//!
//! A local is live before an instruction if some path from that instruction
//! reads it before writing it. Paths include exception edges, so a binding
//! read only by a handler stays live throughout the protected region.
//!
//! # Encoding
//!
//! ```text
//! LocalSet: one bit per local index, inline for up to 128 locals
//!   word 0: locals 0-63
//!   word 1: locals 64-127
//! ```

use crate::bytecode::{Instruction, LocalIndex};
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// LocalSet
// =============================================================================

/// Bitset of local indices.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LocalSet {
    words: SmallVec<[u64; 2]>,
}

impl LocalSet {
    /// Empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn split(index: LocalIndex) -> (usize, u64) {
        let index = usize::from(index);
        (index / 64, 1u64 << (index % 64))
    }

    /// Add a local. Returns true if it was absent.
    pub fn insert(&mut self, index: LocalIndex) -> bool {
        let (word, bit) = Self::split(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let absent = self.words[word] & bit == 0;
        self.words[word] |= bit;
        absent
    }

    /// Remove a local.
    pub fn remove(&mut self, index: LocalIndex) {
        let (word, bit) = Self::split(index);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !bit;
        }
    }

    /// Membership test.
    #[inline]
    pub fn contains(&self, index: LocalIndex) -> bool {
        let (word, bit) = Self::split(index);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// In-place union. Returns true if `self` grew.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut grew = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | *theirs;
            grew |= merged != *mine;
            *mine = merged;
        }
        grew
    }

    /// Number of live locals.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no local is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate over live indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = LocalIndex> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64u16).filter_map(move |b| {
                if bits & (1u64 << b) != 0 {
                    LocalIndex::try_from(w * 64).ok().map(|base| base + b)
                } else {
                    None
                }
            })
        })
    }
}

impl fmt::Debug for LocalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// =============================================================================
// Liveness
// =============================================================================

/// Live-in sets for every instruction.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<LocalSet>,
}

impl Liveness {
    /// Solve liveness given each instruction's successors, including
    /// exception-handler entries.
    pub fn compute(code: &[Instruction], successors: &[SmallVec<[usize; 4]>]) -> Self {
        let n = code.len();
        let mut live_in = vec![LocalSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for index in (0..n).rev() {
                let mut set = LocalSet::new();
                for &succ in &successors[index] {
                    if let Some(s) = live_in.get(succ) {
                        set.union_with(s);
                    }
                }
                match &code[index] {
                    Instruction::Load { slot, .. } | Instruction::Increment { slot, .. } => {
                        set.insert(*slot);
                    }
                    Instruction::Store { slot, kind } => {
                        set.remove(*slot);
                        if kind.width() == 2 {
                            set.remove(slot + 1);
                        }
                    }
                    _ => {}
                }
                if live_in[index].union_with(&set) {
                    changed = true;
                }
            }
        }
        Self { live_in }
    }

    /// Locals live before instruction `index`.
    #[inline]
    pub fn live_in(&self, index: usize) -> Option<&LocalSet> {
        self.live_in.get(index)
    }
}
