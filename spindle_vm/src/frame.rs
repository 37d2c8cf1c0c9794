//! Loaded procedures and call frames.
//!
//! A [`Compiled`] procedure resolves its labels and exception table to
//! instruction indices once, at load time. A [`Frame`] is the execution
//! context of one call: program counter, local bindings and operand stack.

use crate::class::ClassTable;
use crate::error::VmError;
use crate::value::{Object, Placeholder, Value};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use spindle_compiler::{Label, Procedure};
use spindle_core::Kind;
use std::sync::Arc;

/// Maximum nesting of interpreted calls.
pub const MAX_CALL_DEPTH: usize = 256;

/// Operand stack entries kept inline before spilling to the heap.
const INLINE_STACK: usize = 16;

// =============================================================================
// Compiled Procedure
// =============================================================================

/// A resolved exception handler.
#[derive(Debug, Clone)]
struct Handler {
    start: usize,
    end: usize,
    target: usize,
    catch_type: Option<Arc<str>>,
}

/// A procedure ready to execute.
#[derive(Debug)]
pub struct Compiled {
    /// The procedure.
    pub procedure: Procedure,
    /// `owner.name`.
    pub name: Arc<str>,
    labels: FxHashMap<Label, usize>,
    handlers: Vec<Handler>,
}

impl Compiled {
    /// Validate and resolve `procedure`.
    pub fn new(procedure: Procedure) -> Result<Self, VmError> {
        procedure.validate()?;
        let labels = procedure.label_positions()?;
        let name = procedure.qualified_name();
        let resolve = |label: Label| {
            labels.get(&label).copied().ok_or_else(|| VmError::BadLabel {
                procedure: Arc::clone(&name),
                label: label.id(),
            })
        };

        let mut handlers = Vec::with_capacity(procedure.regions.len());
        for region in &procedure.regions {
            handlers.push(Handler {
                start: resolve(region.start)?,
                end: resolve(region.end)?,
                target: resolve(region.handler)?,
                catch_type: region.catch_type.clone(),
            });
        }

        Ok(Self {
            procedure,
            name,
            labels,
            handlers,
        })
    }

    /// Instruction index of a label.
    #[inline]
    pub fn target(&self, label: Label) -> Result<usize, VmError> {
        self.labels.get(&label).copied().ok_or_else(|| VmError::BadLabel {
            procedure: Arc::clone(&self.name),
            label: label.id(),
        })
    }

    /// Handler for an exception of `class` raised at instruction `at`.
    ///
    /// Regions are searched in table order; the first match wins.
    pub fn handler_for(&self, at: usize, class: &str, classes: &ClassTable) -> Option<usize> {
        self.handlers
            .iter()
            .find(|h| {
                (h.start..h.end).contains(&at)
                    && h
                        .catch_type
                        .as_deref()
                        .is_none_or(|catch| classes.is_subclass(class, catch))
            })
            .map(|h| h.target)
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Execution context of one call.
pub struct Frame<'a> {
    /// Procedure being executed.
    pub code: &'a Compiled,
    /// Index of the next instruction.
    pub pc: usize,
    /// Index of the instruction being executed.
    pub at: usize,
    locals: Vec<Value>,
    stack: SmallVec<[Value; INLINE_STACK]>,
}

impl<'a> Frame<'a> {
    /// Frame with `args` bound to the parameter locals.
    pub fn new(code: &'a Compiled, args: Vec<Value>) -> Result<Self, VmError> {
        let procedure = &code.procedure;
        if args.len() != procedure.params.len() {
            return Err(VmError::Arity {
                target: Arc::clone(&code.name),
                expected: procedure.params.len(),
                found: args.len(),
            });
        }

        let mut frame = Self {
            code,
            pc: 0,
            at: 0,
            locals: vec![Value::Empty; usize::from(procedure.max_locals)],
            stack: SmallVec::new(),
        };
        let slots = procedure.param_slots();
        for ((arg, slot), ty) in args.into_iter().zip(slots).zip(&procedure.params) {
            frame.store(slot, ty.kind(), arg)?;
        }
        Ok(frame)
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Fault for an operand of the wrong kind.
    pub fn mismatch(&self, expected: Kind, found: &Value) -> VmError {
        VmError::TypeMismatch {
            procedure: Arc::clone(&self.code.name),
            at: self.at,
            expected,
            found: format!("{found:?}"),
        }
    }

    /// Fault for an operation undefined on its operands.
    pub fn invalid(&self, message: impl Into<String>) -> VmError {
        VmError::InvalidOperation {
            procedure: Arc::clone(&self.code.name),
            at: self.at,
            message: message.into(),
        }
    }

    // =========================================================================
    // Operand Stack
    // =========================================================================

    /// Push a value.
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop a value.
    #[inline]
    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or_else(|| VmError::StackUnderflow {
            procedure: Arc::clone(&self.code.name),
            at: self.at,
        })
    }

    /// Pop a value of `kind`.
    pub fn pop_kind(&mut self, kind: Kind) -> Result<Value, VmError> {
        let value = self.pop()?;
        if value.fits(kind) {
            Ok(value)
        } else {
            Err(self.mismatch(kind, &value))
        }
    }

    /// Pop an int.
    pub fn pop_int(&mut self) -> Result<i32, VmError> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(self.mismatch(Kind::Int, &other)),
        }
    }

    /// Pop `count` values, returned bottom first.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, VmError> {
        if self.stack.len() < count {
            return Err(VmError::StackUnderflow {
                procedure: Arc::clone(&self.code.name),
                at: self.at,
            });
        }
        let split = self.stack.len() - count;
        Ok(self.stack.drain(split..).collect())
    }

    /// Top of stack.
    pub fn peek(&self) -> Result<&Value, VmError> {
        self.stack.last().ok_or_else(|| VmError::StackUnderflow {
            procedure: Arc::clone(&self.code.name),
            at: self.at,
        })
    }

    /// Discard the operand stack (on entry to a handler).
    #[inline]
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Current stack depth.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    // =========================================================================
    // Locals
    // =========================================================================

    /// Read a local of `kind`.
    pub fn load(&self, slot: u16, kind: Kind) -> Result<Value, VmError> {
        let value = self.locals.get(usize::from(slot)).ok_or_else(|| VmError::BadLocal {
            procedure: Arc::clone(&self.code.name),
            slot,
        })?;
        if value.fits(kind) {
            Ok(value.clone())
        } else {
            Err(self.mismatch(kind, value))
        }
    }

    /// Write a local of `kind`. Wide values clear the upper index.
    pub fn store(&mut self, slot: u16, kind: Kind, value: Value) -> Result<(), VmError> {
        if !value.fits(kind) {
            return Err(self.mismatch(kind, &value));
        }
        let index = usize::from(slot);
        let width = usize::from(kind.width());
        if index + width > self.locals.len() {
            return Err(VmError::BadLocal {
                procedure: Arc::clone(&self.code.name),
                slot,
            });
        }
        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = Value::Empty;
        }
        Ok(())
    }

    /// Mutable access to an int local.
    pub fn int_local(&mut self, slot: u16) -> Result<&mut i32, VmError> {
        let name = &self.code.name;
        match self.locals.get_mut(usize::from(slot)) {
            Some(Value::Int(v)) => Ok(v),
            Some(other) => Err(VmError::TypeMismatch {
                procedure: Arc::clone(name),
                at: self.at,
                expected: Kind::Int,
                found: format!("{other:?}"),
            }),
            None => Err(VmError::BadLocal {
                procedure: Arc::clone(name),
                slot,
            }),
        }
    }

    /// Replace every copy of `placeholder` in locals and on the stack with
    /// the constructed `object`.
    pub fn initialize(&mut self, placeholder: &Arc<Placeholder>, object: &Arc<Object>) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if matches!(value, Value::Uninit(p) if Arc::ptr_eq(p, placeholder)) {
                *value = Value::Object(Arc::clone(object));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_compiler::{Instruction, ProcedureBuilder};
    use spindle_core::ValueType;

    fn compiled(params: &[ValueType]) -> Compiled {
        let mut b = ProcedureBuilder::new("T", "p");
        for p in params {
            b.add_param(p.clone());
        }
        b.emit(Instruction::Return);
        Compiled::new(b.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_arguments_bound_by_width() {
        let code = compiled(&[ValueType::Long, ValueType::Int]);
        let frame = Frame::new(&code, vec![Value::Long(7), Value::Int(3)]).unwrap();
        assert_eq!(frame.load(0, Kind::Long).unwrap(), Value::Long(7));
        assert_eq!(frame.load(2, Kind::Int).unwrap(), Value::Int(3));
        assert!(frame.load(1, Kind::Int).is_err());
    }

    #[test]
    fn test_arity_checked() {
        let code = compiled(&[ValueType::Int]);
        assert!(matches!(
            Frame::new(&code, vec![]),
            Err(VmError::Arity { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_stack_underflow() {
        let code = compiled(&[]);
        let mut frame = Frame::new(&code, vec![]).unwrap();
        frame.push(Value::Int(1));
        assert_eq!(frame.pop_n(1).unwrap(), vec![Value::Int(1)]);
        assert!(matches!(frame.pop(), Err(VmError::StackUnderflow { .. })));
    }

    #[test]
    fn test_initialize_replaces_every_copy() {
        let code = compiled(&[ValueType::object()]);
        let placeholder = Arc::new(Placeholder {
            class: Arc::from("Point"),
        });
        let mut frame = Frame::new(&code, vec![Value::Uninit(Arc::clone(&placeholder))]).unwrap();
        frame.push(Value::Uninit(Arc::clone(&placeholder)));
        let object = Arc::new(Object {
            class: Arc::from("Point"),
            members: Vec::new(),
        });
        frame.initialize(&placeholder, &object);
        assert!(matches!(frame.pop().unwrap(), Value::Object(_)));
        assert!(matches!(frame.load(0, Kind::Ref).unwrap(), Value::Object(_)));
    }
}
