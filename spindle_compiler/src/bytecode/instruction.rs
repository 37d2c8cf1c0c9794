//! Stack-machine instruction definitions.
//!
//! Procedures are sequences of [`Instruction`]s operating on an operand stack
//! and a flat array of local bindings. Control flow targets are symbolic
//! [`Label`]s bound by `Label` pseudo-instructions, so instructions can be
//! copied between procedures by rewriting labels alone.
//!
//! # Instruction Groups
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────┐
//! │ Pseudo       │ Label, Line                                          │
//! │ Data         │ Const, Load, Store, Increment, Pop, Dup, Swap        │
//! │ Arithmetic   │ Binary, Negate, Compare, Convert, Cast               │
//! │ Control      │ Jump, Branch, BranchCompare, BranchNull, TableSwitch │
//! │ Objects      │ New, Construct, GetMember, Invoke                    │
//! │ Exit         │ Throw, Return, ReturnValue                           │
//! │ Coroutines   │ Directive (source) / Intrinsic (generated)           │
//! └──────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! Directives are what a coroutine body is written with. The transformer
//! replaces every directive with intrinsics that talk to the driver and to the
//! fields of the generated state object; a transformed procedure never
//! contains a directive.

use spindle_core::{Kind, ValueType};
use std::fmt;
use std::sync::Arc;

/// A local binding index.
pub type LocalIndex = u16;

// =============================================================================
// Operands
// =============================================================================

/// A symbolic jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Label(pub u32);

impl Label {
    /// Label id.
    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Index of a field of a generated state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FieldId(pub u16);

impl FieldId {
    /// Field index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// An immediate constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The null reference.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String reference.
    Str(Arc<str>),
}

impl Constant {
    /// Type pushed by this constant, `None` for the null literal.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(ValueType::Int),
            Self::Long(_) => Some(ValueType::Long),
            Self::Float(_) => Some(ValueType::Float),
            Self::Double(_) => Some(ValueType::Double),
            Self::Str(_) => Some(ValueType::reference("String")),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v}f"),
            Self::Double(v) => write!(f, "{v}d"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division (integer division by zero throws).
    Div,
    /// Remainder.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
}

impl BinaryOp {
    /// Mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
        }
    }
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Greater or equal.
    Ge,
    /// Greater than.
    Gt,
    /// Less or equal.
    Le,
}

impl Condition {
    /// Evaluate against an ordering.
    #[inline]
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Ge => ordering != Less,
            Self::Gt => ordering == Greater,
            Self::Le => ordering != Greater,
        }
    }

    /// Mnemonic suffix.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Le => "le",
        }
    }
}

// =============================================================================
// Coroutine Operations
// =============================================================================

/// A coroutine operation as written in a coroutine body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Pop an awaitable, suspend until it resolves, push its result.
    Await,
    /// Pop a value and hand it to the consumer of the generator.
    Yield,
    /// Pop a generator and yield everything it yields.
    YieldAll,
    /// Report the final result. Pushes a marker that must be returned
    /// immediately by `ReturnValue(Ref)`.
    Ret {
        /// Whether a result value is popped first.
        with_value: bool,
    },
    /// Push the executor the running task is bound to.
    CurrentExecutor,
}

/// What a suspension hands to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendKind {
    /// Wait for an awaitable.
    Await,
    /// Expose a value to the generator consumer.
    Yield,
    /// Delegate to a nested generator.
    YieldAll,
}

impl SuspendKind {
    /// Mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Await => "await",
            Self::Yield => "yield",
            Self::YieldAll => "yield_all",
        }
    }
}

/// An operation emitted by the transformer for generated state objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intrinsic {
    /// Pop the operand and tell the driver to suspend and resume at `state`.
    /// The procedure must then exit normally.
    Suspend {
        /// What the operand is.
        kind: SuspendKind,
        /// State id to resume at.
        state: u32,
    },
    /// Pop the result and complete the task.
    Complete,
    /// Pop an exception and complete the task with it.
    CompleteError,
    /// Push the executor the task is bound to.
    CurrentExecutor,
    /// Pop `argc` arguments and push a new, unstarted instance of the named
    /// state object.
    Launch {
        /// State object name.
        object: Arc<str>,
        /// Number of captured arguments.
        argc: u16,
    },
    /// Push a field of the current state object.
    GetField {
        /// Field.
        field: FieldId,
        /// Field type.
        ty: ValueType,
    },
    /// Pop a value into a field of the current state object.
    PutField {
        /// Field.
        field: FieldId,
        /// Field type.
        ty: ValueType,
    },
}

// =============================================================================
// Instruction
// =============================================================================

/// A single instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Binds a label at this position.
    Label(Label),
    /// Source line of the following instructions.
    Line(u32),
    /// No operation.
    Nop,
    /// Push a constant.
    Const(Constant),
    /// Push a local.
    Load {
        /// Local index.
        slot: LocalIndex,
        /// Expected kind.
        kind: Kind,
    },
    /// Pop into a local.
    Store {
        /// Local index.
        slot: LocalIndex,
        /// Stored kind.
        kind: Kind,
    },
    /// Add a constant to an int local.
    Increment {
        /// Local index.
        slot: LocalIndex,
        /// Amount.
        delta: i32,
    },
    /// Discard the top of stack.
    Pop,
    /// Duplicate the top of stack.
    Dup,
    /// Swap the two top entries.
    Swap,
    /// Pop two operands of `kind`, push the result.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Operand kind.
        kind: Kind,
    },
    /// Negate the top of stack.
    Negate(Kind),
    /// Pop two operands of the kind, push -1, 0 or 1.
    Compare(Kind),
    /// Numeric conversion.
    Convert {
        /// Source kind.
        from: Kind,
        /// Target kind.
        to: Kind,
    },
    /// Pop any value and push it as `ValueType`, checked at runtime.
    Cast(ValueType),
    /// Unconditional jump.
    Jump(Label),
    /// Pop an int and jump if it compares to zero as `cond`.
    Branch {
        /// Condition.
        cond: Condition,
        /// Target.
        target: Label,
    },
    /// Pop two operands and jump if `a cond b`. References support `Eq`/`Ne`.
    BranchCompare {
        /// Condition.
        cond: Condition,
        /// Operand kind (`Int` or `Ref`).
        kind: Kind,
        /// Target.
        target: Label,
    },
    /// Pop a reference and jump on null (`is_null`) or non-null.
    BranchNull {
        /// Jump when the reference is null.
        is_null: bool,
        /// Target.
        target: Label,
    },
    /// Pop an int key and jump to `targets[key - low]`, or `default`.
    TableSwitch {
        /// Lowest key.
        low: i32,
        /// Target for keys out of range.
        default: Label,
        /// Dense jump table.
        targets: Vec<Label>,
    },
    /// Push an uninitialized instance of the class.
    New(Arc<str>),
    /// Pop `argc` arguments and an uninitialized receiver; initialize every
    /// copy of that receiver.
    Construct {
        /// Class being constructed.
        class: Arc<str>,
        /// Number of constructor arguments.
        argc: u16,
    },
    /// Pop an object and push its member at `index`.
    GetMember {
        /// Member index.
        index: u16,
        /// Member type.
        ty: ValueType,
    },
    /// Call a procedure or native by name.
    Invoke {
        /// Target name.
        target: Arc<str>,
        /// Number of arguments popped.
        argc: u16,
        /// Result pushed, if any.
        returns: Option<ValueType>,
    },
    /// Pop an exception and throw it.
    Throw,
    /// Return without a value.
    Return,
    /// Pop a value and return it.
    ReturnValue(Kind),
    /// Source-level coroutine operation.
    Directive(Directive),
    /// Generated coroutine operation.
    Intrinsic(Intrinsic),
}

impl Instruction {
    /// Returns true for `Label` and `Line`.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Label(_) | Self::Line(_))
    }

    /// Returns true if control never falls through to the next instruction.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Jump(_)
                | Self::TableSwitch { .. }
                | Self::Throw
                | Self::Return
                | Self::ReturnValue(_)
        )
    }

    /// Labels this instruction may jump to.
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Self::Jump(target)
            | Self::Branch { target, .. }
            | Self::BranchCompare { target, .. }
            | Self::BranchNull { target, .. } => vec![*target],
            Self::TableSwitch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend_from_slice(targets);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Copy with every label rewritten.
    pub fn map_labels(&self, mut f: impl FnMut(Label) -> Label) -> Self {
        match self {
            Self::Label(label) => Self::Label(f(*label)),
            Self::Jump(target) => Self::Jump(f(*target)),
            Self::Branch { cond, target } => Self::Branch {
                cond: *cond,
                target: f(*target),
            },
            Self::BranchCompare { cond, kind, target } => Self::BranchCompare {
                cond: *cond,
                kind: *kind,
                target: f(*target),
            },
            Self::BranchNull { is_null, target } => Self::BranchNull {
                is_null: *is_null,
                target: f(*target),
            },
            Self::TableSwitch {
                low,
                default,
                targets,
            } => Self::TableSwitch {
                low: *low,
                default: f(*default),
                targets: targets.iter().map(|t| f(*t)).collect(),
            },
            other => other.clone(),
        }
    }

    /// Copy with every local index shifted by `offset`.
    pub fn offset_locals(&self, offset: LocalIndex) -> Self {
        match self {
            Self::Load { slot, kind } => Self::Load {
                slot: slot + offset,
                kind: *kind,
            },
            Self::Store { slot, kind } => Self::Store {
                slot: slot + offset,
                kind: *kind,
            },
            Self::Increment { slot, delta } => Self::Increment {
                slot: slot + offset,
                delta: *delta,
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::Line(line) => write!(f, ".line {line}"),
            Self::Nop => f.write_str("nop"),
            Self::Const(c) => write!(f, "const {c}"),
            Self::Load { slot, kind } => write!(f, "{}load {slot}", kind.prefix()),
            Self::Store { slot, kind } => write!(f, "{}store {slot}", kind.prefix()),
            Self::Increment { slot, delta } => write!(f, "iinc {slot} {delta}"),
            Self::Pop => f.write_str("pop"),
            Self::Dup => f.write_str("dup"),
            Self::Swap => f.write_str("swap"),
            Self::Binary { op, kind } => write!(f, "{}{}", kind.prefix(), op.name()),
            Self::Negate(kind) => write!(f, "{}neg", kind.prefix()),
            Self::Compare(kind) => write!(f, "{}cmp", kind.prefix()),
            Self::Convert { from, to } => write!(f, "{}2{}", from.prefix(), to.prefix()),
            Self::Cast(ty) => write!(f, "cast {ty}"),
            Self::Jump(target) => write!(f, "goto {target}"),
            Self::Branch { cond, target } => write!(f, "if{} {target}", cond.name()),
            Self::BranchCompare { cond, kind, target } => {
                write!(f, "if_{}cmp{} {target}", kind.prefix(), cond.name())
            }
            Self::BranchNull { is_null, target } => {
                let op = if *is_null { "ifnull" } else { "ifnonnull" };
                write!(f, "{op} {target}")
            }
            Self::TableSwitch {
                low,
                default,
                targets,
            } => {
                write!(f, "tableswitch {low} [")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{target}")?;
                }
                write!(f, "] default {default}")
            }
            Self::New(class) => write!(f, "new {class}"),
            Self::Construct { class, argc } => write!(f, "construct {class}/{argc}"),
            Self::GetMember { index, ty } => write!(f, "getmember {index} {ty}"),
            Self::Invoke {
                target,
                argc,
                returns,
            } => match returns {
                Some(ty) => write!(f, "invoke {target}/{argc} -> {ty}"),
                None => write!(f, "invoke {target}/{argc}"),
            },
            Self::Throw => f.write_str("throw"),
            Self::Return => f.write_str("return"),
            Self::ReturnValue(kind) => write!(f, "{}return", kind.prefix()),
            Self::Directive(d) => match d {
                Directive::Await => f.write_str("@await"),
                Directive::Yield => f.write_str("@yield"),
                Directive::YieldAll => f.write_str("@yield_all"),
                Directive::Ret { with_value } => {
                    if *with_value {
                        f.write_str("@ret value")
                    } else {
                        f.write_str("@ret")
                    }
                }
                Directive::CurrentExecutor => f.write_str("@current_executor"),
            },
            Self::Intrinsic(i) => match i {
                Intrinsic::Suspend { kind, state } => {
                    write!(f, "%suspend {} -> {state}", kind.name())
                }
                Intrinsic::Complete => f.write_str("%complete"),
                Intrinsic::CompleteError => f.write_str("%complete_error"),
                Intrinsic::CurrentExecutor => f.write_str("%current_executor"),
                Intrinsic::Launch { object, argc } => write!(f, "%launch {object}/{argc}"),
                Intrinsic::GetField { field, ty } => write!(f, "%getfield {field} {ty}"),
                Intrinsic::PutField { field, ty } => write!(f, "%putfield {field} {ty}"),
            },
        }
    }
}
