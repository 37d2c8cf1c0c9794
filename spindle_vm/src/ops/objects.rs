//! Object instruction handlers: two-phase construction, member access and
//! checked casts.

use crate::class::ClassTable;
use crate::dispatch::ControlFlow;
use crate::error::VmError;
use crate::frame::Frame;
use crate::native::cast_error;
use crate::value::{Object, Placeholder, Value};
use spindle_core::types::OBJECT_CLASS;
use spindle_core::{Kind, ValueType};
use std::sync::Arc;

/// Push a placeholder for an instance of `class`.
pub fn new(frame: &mut Frame<'_>, class: &Arc<str>, classes: &ClassTable) -> Result<ControlFlow, VmError> {
    if !classes.contains(class) {
        return Err(VmError::UnknownClass {
            class: Arc::clone(class),
        });
    }
    frame.push(Value::Uninit(Arc::new(Placeholder {
        class: Arc::clone(class),
    })));
    Ok(ControlFlow::Continue)
}

/// Pop the arguments and the placeholder, and initialize every copy of it
/// with an instance whose members are the arguments.
pub fn construct(frame: &mut Frame<'_>, class: &Arc<str>, argc: u16) -> Result<ControlFlow, VmError> {
    let members = frame.pop_n(usize::from(argc))?;
    let receiver = frame.pop()?;
    let placeholder = match receiver {
        Value::Uninit(p) if p.class == *class => p,
        other => {
            return Err(frame.invalid(format!("construct {class} on {other:?}")));
        }
    };
    let object = Arc::new(Object {
        class: Arc::clone(class),
        members,
    });
    frame.initialize(&placeholder, &object);
    Ok(ControlFlow::Continue)
}

/// Push member `index` of the popped object.
pub fn get_member(frame: &mut Frame<'_>, index: u16, ty: &ValueType) -> Result<ControlFlow, VmError> {
    let object = match frame.pop()? {
        Value::Object(o) => o,
        Value::Null => return Ok(ControlFlow::Throw(Value::null_pointer("receiver"))),
        other => return Err(frame.mismatch(Kind::Ref, &other)),
    };
    let member = object
        .members
        .get(usize::from(index))
        .cloned()
        .ok_or_else(|| frame.invalid(format!("{} has no member {index}", object.class)))?;
    if !member.fits(ty.kind()) {
        return Err(frame.mismatch(ty.kind(), &member));
    }
    frame.push(member);
    Ok(ControlFlow::Continue)
}

/// Returns true if `value` may be viewed as `ty`.
///
/// Null is every reference type and every non-null value is an `Object`.
pub fn is_instance(value: &Value, ty: &ValueType, classes: &ClassTable) -> bool {
    match ty {
        ValueType::Reference(class) => {
            value.is_null()
                || &**class == OBJECT_CLASS
                || value
                    .class_name()
                    .is_some_and(|name| classes.is_subclass(name, class))
        }
        primitive => value.fits(primitive.kind()),
    }
}

/// Checked cast; throws `ClassCastException` on failure.
pub fn cast(frame: &mut Frame<'_>, ty: &ValueType, classes: &ClassTable) -> Result<ControlFlow, VmError> {
    let value = frame.pop()?;
    if !is_instance(&value, ty, classes) {
        return Ok(ControlFlow::Throw(cast_error(&ty.to_string(), &value)));
    }
    frame.push(value);
    Ok(ControlFlow::Continue)
}
