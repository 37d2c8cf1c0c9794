//! Coroutine metadata.
//!
//! A generated state object records where it came from so that a suspended
//! continuation can report the source location it will resume at.

use crate::types::ValueType;
use std::fmt;
use std::sync::Arc;

/// Description of a transformed procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineMetadata {
    /// Declaring entity (owner class or module).
    pub owner: Arc<str>,
    /// Procedure name.
    pub name: Arc<str>,
    /// Parameter types, in declaration order.
    pub params: Vec<ValueType>,
    /// Source file, when known.
    pub source_file: Option<Arc<str>>,
    /// Source line of each suspend point; entry `k - 1` belongs to state `k`.
    pub suspend_lines: Vec<u32>,
}

impl CoroutineMetadata {
    /// Number of genuine suspend points.
    #[inline]
    pub fn suspend_points(&self) -> usize {
        self.suspend_lines.len()
    }

    /// Source location a continuation for `state` resumes at.
    ///
    /// State 0 is the entry point and has no location.
    pub fn location(&self, state: u32) -> Option<SourceLocation> {
        let index = usize::try_from(state).ok()?.checked_sub(1)?;
        let line = *self.suspend_lines.get(index)?;
        Some(SourceLocation {
            owner: Arc::clone(&self.owner),
            name: Arc::clone(&self.name),
            source_file: self.source_file.clone(),
            line,
        })
    }
}

impl fmt::Display for CoroutineMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.owner, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A suspend point in source terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Declaring entity.
    pub owner: Arc<str>,
    /// Procedure name.
    pub name: Arc<str>,
    /// Source file, when known.
    pub source_file: Option<Arc<str>>,
    /// Line number (0 when unknown).
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.source_file.as_deref().unwrap_or("Unknown Source");
        write!(f, "{}.{}({}:{})", self.owner, self.name, file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CoroutineMetadata {
        CoroutineMetadata {
            owner: Arc::from("Orders"),
            name: Arc::from("fetch"),
            params: vec![ValueType::Int, ValueType::reference("String")],
            source_file: Some(Arc::from("Orders.sp")),
            suspend_lines: vec![14, 21],
        }
    }

    #[test]
    fn test_location_maps_state_to_line() {
        let meta = metadata();
        assert_eq!(meta.location(1).map(|l| l.line), Some(14));
        assert_eq!(meta.location(2).map(|l| l.line), Some(21));
    }

    #[test]
    fn test_location_out_of_range() {
        let meta = metadata();
        assert!(meta.location(0).is_none());
        assert!(meta.location(3).is_none());
    }

    #[test]
    fn test_display() {
        let meta = metadata();
        assert_eq!(meta.to_string(), "Orders.fetch(int, String)");
        assert_eq!(
            meta.location(2).map(|l| l.to_string()).as_deref(),
            Some("Orders.fetch(Orders.sp:21)")
        );
    }
}
