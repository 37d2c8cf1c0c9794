//! Value types.
//!
//! Every local binding and operand-stack entry the analyzer tracks carries a
//! [`ValueType`]. Types are also the keys of the spill-slot pools, so two
//! references of different classes get separate pools.
//!
//! # Slot Widths
//!
//! ```text
//! ┌──────────┬──────┬─────────────┐
//! │ Type     │ Kind │ Local width │
//! ├──────────┼──────┼─────────────┤
//! │ int      │ Int  │ 1           │
//! │ long     │ Long │ 2           │
//! │ float    │ Float│ 1           │
//! │ double   │Double│ 2           │
//! │ <class>  │ Ref  │ 1           │
//! └──────────┴──────┴─────────────┘
//! ```
//!
//! Operand-stack entries are always one entry per value regardless of width.

use std::fmt;
use std::sync::Arc;

/// Root of the reference hierarchy. Merging two distinct classes yields this.
pub const OBJECT_CLASS: &str = "Object";

/// Root of the exception hierarchy.
pub const THROWABLE_CLASS: &str = "Throwable";

/// Class thrown by a state object dispatched to an unknown state id.
pub const ILLEGAL_STATE_CLASS: &str = "IllegalStateException";

/// Class of the values produced by launching a task-kind state object.
pub const TASK_CLASS: &str = "Task";

/// Class of the values produced by launching a generator-kind state object.
pub const GENERATOR_CLASS: &str = "Generator";

/// Class of the value produced by the current-executor directive.
pub const EXECUTOR_CLASS: &str = "Executor";

// =============================================================================
// Kind
// =============================================================================

/// Machine-level category of a value, as seen by typed instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Object reference (including null).
    Ref,
}

impl Kind {
    /// Number of local indices a value of this kind occupies.
    #[inline]
    pub const fn width(self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    /// Short mnemonic prefix used by the disassembler.
    #[inline]
    pub const fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Ref => 'a',
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Ref => "ref",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ValueType
// =============================================================================

/// A concrete value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer (two local indices).
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float (two local indices).
    Double,
    /// Reference to an instance of the named class.
    Reference(Arc<str>),
}

impl ValueType {
    /// Reference type for `class`.
    #[inline]
    pub fn reference(class: impl Into<Arc<str>>) -> Self {
        Self::Reference(class.into())
    }

    /// The root reference type.
    #[inline]
    pub fn object() -> Self {
        Self::Reference(Arc::from(OBJECT_CLASS))
    }

    /// The root exception type.
    #[inline]
    pub fn throwable() -> Self {
        Self::Reference(Arc::from(THROWABLE_CLASS))
    }

    /// Kind of this type.
    #[inline]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Int => Kind::Int,
            Self::Long => Kind::Long,
            Self::Float => Kind::Float,
            Self::Double => Kind::Double,
            Self::Reference(_) => Kind::Ref,
        }
    }

    /// Number of local indices this type occupies.
    #[inline]
    pub fn width(&self) -> u16 {
        self.kind().width()
    }

    /// Returns true for reference types.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// Class name of a reference type.
    #[inline]
    pub fn class(&self) -> Option<&Arc<str>> {
        match self {
            Self::Reference(class) => Some(class),
            _ => None,
        }
    }

    /// Least upper bound at a control-flow join.
    ///
    /// Identical types merge to themselves and distinct reference types merge
    /// to [`OBJECT_CLASS`]. Anything else has no common type.
    pub fn merge(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Self::Reference(_), Self::Reference(_)) => Some(Self::object()),
            _ => None,
        }
    }

    /// Compact descriptor used in generated field names.
    pub fn descriptor(&self) -> String {
        match self {
            Self::Int => "I".to_owned(),
            Self::Long => "J".to_owned(),
            Self::Float => "F".to_owned(),
            Self::Double => "D".to_owned(),
            Self::Reference(class) => format!("L{class};"),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(class) => f.write_str(class),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl From<Kind> for ValueType {
    /// Primitive kinds map to their type, `Ref` maps to [`OBJECT_CLASS`].
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Int => Self::Int,
            Kind::Long => Self::Long,
            Kind::Float => Self::Float,
            Kind::Double => Self::Double,
            Kind::Ref => Self::object(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(ValueType::Int.width(), 1);
        assert_eq!(ValueType::Long.width(), 2);
        assert_eq!(ValueType::Double.width(), 2);
        assert_eq!(ValueType::reference("Foo").width(), 1);
    }

    #[test]
    fn test_merge_identical() {
        assert_eq!(ValueType::Int.merge(&ValueType::Int), Some(ValueType::Int));
        let foo = ValueType::reference("Foo");
        assert_eq!(foo.merge(&foo), Some(foo.clone()));
    }

    #[test]
    fn test_merge_distinct_references_widens_to_object() {
        let merged = ValueType::reference("Foo").merge(&ValueType::reference("Bar"));
        assert_eq!(merged, Some(ValueType::object()));
    }

    #[test]
    fn test_merge_primitive_mismatch_fails() {
        assert_eq!(ValueType::Int.merge(&ValueType::Long), None);
        assert_eq!(ValueType::Int.merge(&ValueType::object()), None);
    }

    #[test]
    fn test_descriptor_and_display() {
        assert_eq!(ValueType::Long.descriptor(), "J");
        assert_eq!(ValueType::reference("Foo").descriptor(), "LFoo;");
        assert_eq!(ValueType::Double.to_string(), "double");
        assert_eq!(ValueType::reference("Foo").to_string(), "Foo");
    }
}
