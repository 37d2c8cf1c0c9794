//! Abstract frames.
//!
//! A [`Frame`] is the analyzer's view of the locals and operand stack before
//! an instruction. Each position holds a [`Slot`]: a tagged variant, so an
//! absent binding (`Top`) is never confused with one that holds an object
//! still under construction (`Uninit`).
//!
//! # Merge Lattice
//!
//! ```text
//!                 Top
//!        ┌─────────┼───────────────┐
//!   Value(Object)  Value(int) ...  Uninit(site)
//!    ┌────┴────┐
//! Value(A)  Value(B)
//!    └────┬────┘
//!        Null
//! ```
//!
//! Locals that disagree at a join become `Top` (unusable). Stack entries that
//! disagree are a fatal merge error: stack heights and kinds must agree on
//! every path.

use spindle_core::{Kind, SpindleError, SpindleResult, ValueType};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Slot
// =============================================================================

/// Abstract content of a local or stack position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Nothing usable (unset, second half of a two-slot value, or conflict).
    Top,
    /// The null literal.
    Null,
    /// An initialized value.
    Value(ValueType),
    /// An object allocated by the `New` at instruction `site` whose
    /// constructor has not run yet.
    Uninit {
        /// Class being constructed.
        class: Arc<str>,
        /// Index of the allocating instruction.
        site: usize,
    },
}

impl Slot {
    /// Kind of the value held, `None` for `Top`.
    #[inline]
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Self::Top => None,
            Self::Null | Self::Uninit { .. } => Some(Kind::Ref),
            Self::Value(ty) => Some(ty.kind()),
        }
    }

    /// Returns true if this slot can be read as `kind`.
    #[inline]
    pub fn accepts(&self, kind: Kind) -> bool {
        self.kind() == Some(kind)
    }

    /// Returns true if the slot holds a usable, constructed value.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Null | Self::Value(_))
    }

    /// Returns true if the slot holds a two-slot value.
    #[inline]
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Value(ty) if ty.width() == 2)
    }

    /// Join of two slots, `None` when they have no common type.
    pub fn join(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Self::Null, Self::Value(ty)) | (Self::Value(ty), Self::Null) if ty.is_reference() => {
                Some(Self::Value(ty.clone()))
            }
            (Self::Value(a), Self::Value(b)) => a.merge(b).map(Self::Value),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => f.write_str("-"),
            Self::Null => f.write_str("null"),
            Self::Value(ty) => write!(f, "{ty}"),
            Self::Uninit { class, site } => write!(f, "uninit {class}@{site}"),
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Locals and operand stack before an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Local bindings, one entry per local index.
    pub locals: Vec<Slot>,
    /// Operand stack, bottom first.
    pub stack: Vec<Slot>,
}

impl Frame {
    /// Entry frame for a procedure with the given parameters.
    pub fn entry(params: &[ValueType], max_locals: u16) -> Self {
        let mut locals = vec![Slot::Top; usize::from(max_locals)];
        let mut index = 0usize;
        for param in params {
            if let Some(slot) = locals.get_mut(index) {
                *slot = Slot::Value(param.clone());
            }
            index += usize::from(param.width());
        }
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    /// Frame seen by an exception handler: the given locals and a stack
    /// holding only the caught exception.
    pub fn handler(locals: Vec<Slot>, exception: ValueType) -> Self {
        Self {
            locals,
            stack: vec![Slot::Value(exception)],
        }
    }

    /// Merge `other` into `self`. Returns true if `self` changed.
    pub fn merge(&mut self, other: &Self, procedure: &Arc<str>, at: usize) -> SpindleResult<bool> {
        if self.stack.len() != other.stack.len() {
            return Err(SpindleError::merge(
                procedure,
                at,
                format!(
                    "stack height mismatch: {} vs {}",
                    self.stack.len(),
                    other.stack.len()
                ),
            ));
        }

        let mut changed = false;
        for (depth, (mine, theirs)) in self.stack.iter_mut().zip(&other.stack).enumerate() {
            let joined = mine.join(theirs).ok_or_else(|| {
                SpindleError::merge(
                    procedure,
                    at,
                    format!("stack entry {depth} cannot merge {mine} with {theirs}"),
                )
            })?;
            if *mine != joined {
                *mine = joined;
                changed = true;
            }
        }

        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            let joined = mine.join(theirs).unwrap_or(Slot::Top);
            if *mine != joined {
                *mine = joined;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Local-wise join with another set of locals, used for handler entry.
    pub fn join_locals(a: &[Slot], b: &[Slot]) -> Vec<Slot> {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.join(y).unwrap_or(Slot::Top))
            .collect()
    }

    /// Replace every copy of the placeholder from `site` with an initialized
    /// instance of `class`.
    pub fn initialize(&mut self, site: usize, class: &Arc<str>) {
        let constructed = Slot::Value(ValueType::Reference(Arc::clone(class)));
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if matches!(slot, Slot::Uninit { site: s, .. } if *s == site) {
                *slot = constructed.clone();
            }
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("locals [")?;
        for (i, slot) in self.locals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{slot}")?;
        }
        f.write_str("] stack [")?;
        for (i, slot) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{slot}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> Arc<str> {
        Arc::from("T.p")
    }

    #[test]
    fn test_entry_frame_marks_wide_params() {
        let frame = Frame::entry(&[ValueType::Long, ValueType::Int], 4);
        assert_eq!(frame.locals[0], Slot::Value(ValueType::Long));
        assert_eq!(frame.locals[1], Slot::Top);
        assert_eq!(frame.locals[2], Slot::Value(ValueType::Int));
        assert_eq!(frame.locals[3], Slot::Top);
    }

    #[test]
    fn test_join_null_with_reference() {
        let r = Slot::Value(ValueType::reference("Foo"));
        assert_eq!(Slot::Null.join(&r), Some(r.clone()));
        assert_eq!(r.join(&Slot::Null), Some(r));
        assert_eq!(Slot::Null.join(&Slot::Value(ValueType::Int)), None);
    }

    #[test]
    fn test_uninit_sites_do_not_join() {
        let a = Slot::Uninit {
            class: Arc::from("Foo"),
            site: 1,
        };
        let b = Slot::Uninit {
            class: Arc::from("Foo"),
            site: 2,
        };
        assert_eq!(a.join(&a), Some(a.clone()));
        assert_eq!(a.join(&b), None);
    }

    #[test]
    fn test_merge_conflicting_locals_become_top() {
        let mut a = Frame::entry(&[ValueType::Int], 1);
        let b = Frame::entry(&[ValueType::Long], 2);
        let changed = a.merge(&b, &name(), 0).unwrap();
        assert!(changed);
        assert_eq!(a.locals[0], Slot::Top);
    }

    #[test]
    fn test_merge_stack_height_mismatch_is_fatal() {
        let mut a = Frame::entry(&[], 0);
        let mut b = a.clone();
        b.stack.push(Slot::Value(ValueType::Int));
        assert!(matches!(
            a.merge(&b, &name(), 5),
            Err(SpindleError::Merge { at: 5, .. })
        ));
    }

    #[test]
    fn test_merge_stack_kind_mismatch_is_fatal() {
        let mut a = Frame::entry(&[], 0);
        a.stack.push(Slot::Value(ValueType::Int));
        let mut b = Frame::entry(&[], 0);
        b.stack.push(Slot::Value(ValueType::Float));
        assert!(a.merge(&b, &name(), 0).is_err());
    }

    #[test]
    fn test_merge_stack_references_widen() {
        let mut a = Frame::entry(&[], 0);
        a.stack.push(Slot::Value(ValueType::reference("A")));
        let mut b = Frame::entry(&[], 0);
        b.stack.push(Slot::Value(ValueType::reference("B")));
        assert!(a.merge(&b, &name(), 0).unwrap());
        assert_eq!(a.stack[0], Slot::Value(ValueType::object()));
        assert!(!a.merge(&b, &name(), 0).unwrap());
    }

    #[test]
    fn test_initialize_replaces_all_copies() {
        let mut frame = Frame::entry(&[], 1);
        let placeholder = Slot::Uninit {
            class: Arc::from("Foo"),
            site: 3,
        };
        frame.locals[0] = placeholder.clone();
        frame.stack.push(placeholder.clone());
        frame.stack.push(placeholder);
        frame.initialize(3, &Arc::from("Foo"));
        assert!(frame.locals[0].is_initialized());
        assert!(frame.stack.iter().all(Slot::is_initialized));
    }
}
