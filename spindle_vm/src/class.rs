//! Class hierarchy.
//!
//! Classes are single-inheritance and identified by name. Exception dispatch
//! and `cast` both reduce to [`ClassTable::is_subclass`].
//!
//! # Built-in Classes
//!
//! ```text
//! Object
//! ├── String
//! ├── Task
//! ├── Generator
//! ├── Executor
//! └── Throwable
//!     └── Exception
//!         └── RuntimeException
//!             ├── ArithmeticException
//!             ├── NullPointerException
//!             ├── ClassCastException
//!             ├── IllegalStateException
//!             └── HostError
//! ```

use crate::error::VmError;
use rustc_hash::FxHashMap;
use spindle_core::types::{
    EXECUTOR_CLASS, GENERATOR_CLASS, ILLEGAL_STATE_CLASS, OBJECT_CLASS, TASK_CLASS,
    THROWABLE_CLASS,
};
use std::sync::Arc;

/// Class of string constants.
pub const STRING_CLASS: &str = "String";
/// Base of checked exceptions.
pub const EXCEPTION_CLASS: &str = "Exception";
/// Base of unchecked exceptions.
pub const RUNTIME_EXCEPTION_CLASS: &str = "RuntimeException";
/// Integer division by zero.
pub const ARITHMETIC_CLASS: &str = "ArithmeticException";
/// Dereference of null.
pub const NULL_POINTER_CLASS: &str = "NullPointerException";
/// Failed `cast`.
pub const CLASS_CAST_CLASS: &str = "ClassCastException";
/// An error raised by the host (a native or the runtime) rather than by
/// interpreted code.
pub const HOST_ERROR_CLASS: &str = "HostError";

/// A defined class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    /// Class name.
    pub name: Arc<str>,
    /// Superclass, `None` only for `Object`.
    pub superclass: Option<Arc<str>>,
}

/// Name-indexed class hierarchy.
#[derive(Debug, Clone)]
pub struct ClassTable {
    classes: FxHashMap<Arc<str>, Class>,
}

impl ClassTable {
    /// Table holding the built-in classes.
    pub fn new() -> Self {
        let mut table = Self {
            classes: FxHashMap::default(),
        };
        table.insert(OBJECT_CLASS, None);
        for class in [STRING_CLASS, TASK_CLASS, GENERATOR_CLASS, EXECUTOR_CLASS, THROWABLE_CLASS] {
            table.insert(class, Some(OBJECT_CLASS));
        }
        table.insert(EXCEPTION_CLASS, Some(THROWABLE_CLASS));
        table.insert(RUNTIME_EXCEPTION_CLASS, Some(EXCEPTION_CLASS));
        for class in [
            ARITHMETIC_CLASS,
            NULL_POINTER_CLASS,
            CLASS_CAST_CLASS,
            ILLEGAL_STATE_CLASS,
            HOST_ERROR_CLASS,
        ] {
            table.insert(class, Some(RUNTIME_EXCEPTION_CLASS));
        }
        table
    }

    fn insert(&mut self, name: &str, superclass: Option<&str>) {
        let name: Arc<str> = Arc::from(name);
        self.classes.insert(
            Arc::clone(&name),
            Class {
                name,
                superclass: superclass.map(Arc::from),
            },
        );
    }

    /// Define `name` as a subclass of `superclass`.
    ///
    /// Redefining a class with the same superclass is a no-op.
    pub fn define(&mut self, name: &str, superclass: &str) -> Result<(), VmError> {
        if !self.classes.contains_key(superclass) {
            return Err(VmError::UnknownClass {
                class: Arc::from(superclass),
            });
        }
        match self.classes.get(name) {
            Some(existing) if existing.superclass.as_deref() == Some(superclass) => Ok(()),
            Some(_) => Err(VmError::ClassRedefined {
                class: Arc::from(name),
            }),
            None => {
                self.insert(name, Some(superclass));
                Ok(())
            }
        }
    }

    /// Look up a class.
    pub fn get(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    /// Returns true if `name` is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Returns true if `class` is `ancestor` or inherits from it.
    ///
    /// Unknown classes are subclasses of nothing but themselves.
    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.classes.get(name).and_then(|c| c.superclass.as_deref());
        }
        false
    }

    /// Number of defined classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Always false; the built-ins are always present.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_exception_chain() {
        let table = ClassTable::new();
        assert!(table.is_subclass(ARITHMETIC_CLASS, THROWABLE_CLASS));
        assert!(table.is_subclass(HOST_ERROR_CLASS, RUNTIME_EXCEPTION_CLASS));
        assert!(table.is_subclass(ILLEGAL_STATE_CLASS, OBJECT_CLASS));
        assert!(!table.is_subclass(EXCEPTION_CLASS, RUNTIME_EXCEPTION_CLASS));
        assert!(!table.is_subclass(STRING_CLASS, THROWABLE_CLASS));
    }

    #[test]
    fn test_define_user_class() {
        let mut table = ClassTable::new();
        table.define("OrderFailed", EXCEPTION_CLASS).unwrap();
        assert!(table.is_subclass("OrderFailed", THROWABLE_CLASS));
        assert!(table.define("OrderFailed", EXCEPTION_CLASS).is_ok());
        assert!(matches!(
            table.define("OrderFailed", OBJECT_CLASS),
            Err(VmError::ClassRedefined { .. })
        ));
        assert!(matches!(
            table.define("X", "Missing"),
            Err(VmError::UnknownClass { .. })
        ));
    }

    #[test]
    fn test_unknown_class_only_matches_itself() {
        let table = ClassTable::new();
        assert!(table.is_subclass("Ghost", "Ghost"));
        assert!(!table.is_subclass("Ghost", OBJECT_CLASS));
    }
}
