//! Coroutine lifecycle header.
//!
//! Packs the lifecycle state and the current state id into a single `u32` so
//! that diagnostics can read both with one atomic load.
//!
//! # Encoding
//!
//! ```text
//! Bits 0-1:  Lifecycle (Unstarted=0, Running=1, Suspended=2, Completed=3)
//! Bits 2-31: State id (the suspend point the coroutine last stopped at)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle of a task or generator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    /// Created, never stepped.
    #[default]
    Unstarted = 0,
    /// A step is executing.
    Running = 1,
    /// Waiting at a suspend point.
    Suspended = 2,
    /// Completed normally or with an error.
    Completed = 3,
}

impl Lifecycle {
    /// Number of bits used to encode the lifecycle.
    pub const BITS: u32 = 2;

    /// Mask for extracting the lifecycle from a header.
    pub const MASK: u32 = (1 << Self::BITS) - 1;

    /// Decode from the low bits.
    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & Self::MASK {
            0 => Self::Unstarted,
            1 => Self::Running,
            2 => Self::Suspended,
            _ => Self::Completed,
        }
    }

    /// Returns true once the coroutine has finished.
    #[inline(always)]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Display name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// State Header
// ============================================================================

/// Lifecycle and state id in one atomic word.
#[repr(transparent)]
pub struct StateHeader {
    bits: AtomicU32,
}

impl StateHeader {
    /// Largest representable state id.
    pub const MAX_STATE: u32 = (1 << 30) - 1;

    const STATE_SHIFT: u32 = Lifecycle::BITS;

    /// Header of an unstarted coroutine at state 0.
    #[inline]
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(Lifecycle::Unstarted as u32),
        }
    }

    #[inline]
    fn encode(lifecycle: Lifecycle, state: u32) -> u32 {
        debug_assert!(state <= Self::MAX_STATE);
        (state.min(Self::MAX_STATE) << Self::STATE_SHIFT) | lifecycle as u32
    }

    /// Current lifecycle.
    #[inline(always)]
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// State id last recorded.
    #[inline(always)]
    pub fn state(&self) -> u32 {
        self.bits.load(Ordering::Acquire) >> Self::STATE_SHIFT
    }

    /// Both halves from one load.
    #[inline(always)]
    pub fn load(&self) -> (Lifecycle, u32) {
        let bits = self.bits.load(Ordering::Acquire);
        (Lifecycle::from_bits(bits), bits >> Self::STATE_SHIFT)
    }

    /// A step for `state` begins.
    #[inline]
    pub fn run(&self, state: u32) {
        self.bits
            .store(Self::encode(Lifecycle::Running, state), Ordering::Release);
    }

    /// The coroutine suspended and will resume at `state`.
    #[inline]
    pub fn suspend(&self, state: u32) {
        self.bits
            .store(Self::encode(Lifecycle::Suspended, state), Ordering::Release);
    }

    /// The coroutine finished. The last state id is kept for diagnostics.
    #[inline]
    pub fn complete(&self) {
        self.bits
            .fetch_or(Lifecycle::Completed as u32, Ordering::AcqRel);
    }
}

impl Default for StateHeader {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lifecycle, state) = self.load();
        f.debug_struct("StateHeader")
            .field("lifecycle", &lifecycle)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_from_bits_masks() {
        assert_eq!(Lifecycle::from_bits(0b100), Lifecycle::Unstarted);
        assert_eq!(Lifecycle::from_bits(0xFFFF_FF02), Lifecycle::Suspended);
        assert_eq!(Lifecycle::from_bits(3), Lifecycle::Completed);
    }

    #[test]
    fn test_transitions_keep_state() {
        let header = StateHeader::new();
        assert_eq!(header.load(), (Lifecycle::Unstarted, 0));
        header.run(0);
        header.suspend(7);
        assert_eq!(header.load(), (Lifecycle::Suspended, 7));
        header.run(7);
        assert_eq!(header.lifecycle(), Lifecycle::Running);
        header.complete();
        assert_eq!(header.load(), (Lifecycle::Completed, 7));
        assert!(header.lifecycle().is_finished());
    }

    #[test]
    fn test_large_state_ids() {
        let header = StateHeader::new();
        header.suspend(StateHeader::MAX_STATE);
        assert_eq!(header.state(), StateHeader::MAX_STATE);
    }
}
