//! Spill-slot allocation.
//!
//! Values that survive a suspend point are persisted in fields of the
//! generated state object. Fields are pooled per [`ValueType`] and reused
//! first-fit across suspend points, so the pool for a type ends up as large as
//! the largest number of values of that type live at any *single* suspend
//! point, not the sum over all of them.
//!
//! ```text
//! suspend 1: int, int, String      pool[int]    = [f2, f3]
//! suspend 2: int, long             pool[String] = [f4]
//!                                  pool[long]   = [f5]
//! ```

use crate::bytecode::FieldId;
use rustc_hash::FxHashMap;
use spindle_core::ValueType;

/// Per-save-pass occupancy: how many slots of each type are claimed.
pub type Occupancy = FxHashMap<ValueType, usize>;

/// Pooled spill slots.
#[derive(Debug, Clone, Default)]
pub struct SlotPool {
    /// First field id handed out.
    base: u16,
    /// Slots per type, in allocation order.
    pools: FxHashMap<ValueType, Vec<FieldId>>,
    /// Type of every allocated slot, indexed by `id - base`.
    slots: Vec<ValueType>,
}

impl SlotPool {
    /// Pool whose first slot gets id `base` (ids below are taken by the
    /// captured arguments).
    pub fn with_base(base: u16) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Claim a slot of `ty` for the current save pass.
    ///
    /// Returns the Nth slot of that type, where N is how many have already
    /// been claimed in this pass, allocating a new one if the pool is too
    /// small.
    pub fn allocate(&mut self, ty: &ValueType, occupancy: &mut Occupancy) -> FieldId {
        let claimed = occupancy.entry(ty.clone()).or_insert(0);
        let index = *claimed;
        *claimed += 1;

        if let Some(&id) = self.pools.get(ty).and_then(|pool| pool.get(index)) {
            return id;
        }

        let offset = u16::try_from(self.slots.len()).unwrap_or(u16::MAX);
        let id = FieldId(self.base.saturating_add(offset));
        self.slots.push(ty.clone());
        self.pools.entry(ty.clone()).or_default().push(id);
        id
    }

    /// Number of slots allocated for `ty`.
    pub fn count_of(&self, ty: &ValueType) -> usize {
        self.pools.get(ty).map_or(0, Vec::len)
    }

    /// Total number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing was ever spilled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allocated slots in id order.
    pub fn slots(&self) -> impl Iterator<Item = (FieldId, &ValueType)> {
        let base = self.base;
        self.slots.iter().enumerate().map(move |(i, ty)| {
            let offset = u16::try_from(i).unwrap_or(u16::MAX);
            (FieldId(base.saturating_add(offset)), ty)
        })
    }
}
