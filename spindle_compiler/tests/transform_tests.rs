//! Transformation integration tests.
//!
//! Every test builds a coroutine body with [`ProcedureBuilder`], transforms it
//! and inspects the generated state object. Generated step procedures are fed
//! back through the analyzer, which rejects inconsistent stacks and reads of
//! unset locals, so every successful transform is also a verification run.
//!
//! # Test Organization
//!
//! 1. Step Layout
//! 2. Spilling
//! 3. Exception Regions
//! 4. Structural Errors
//! 5. Diagnostics

use spindle_compiler::{
    BinaryOp, Condition, Constant, Directive, Instruction, Intrinsic, Procedure, ProcedureBuilder,
    ProcedureKind, StateObjectDef, SuspendKind, TransformConfig, TransformOutput, analyze,
    disassemble, transform,
};
use spindle_core::{Kind, SpindleError, ValueType};

// =============================================================================
// Test Helper Functions
// =============================================================================

fn future() -> ValueType {
    ValueType::reference("Future")
}

/// Transform with the default configuration and verify the step procedure.
fn transform_ok(procedure: &Procedure) -> TransformOutput {
    let out = transform(procedure, TransformConfig::default())
        .unwrap_or_else(|e| panic!("transform failed: {e}"));
    if let Err(e) = analyze(&out.state_object.step) {
        panic!("generated step fails analysis: {e}\n{}", out.state_object.dump());
    }
    out
}

fn transform_err(procedure: &Procedure) -> SpindleError {
    match transform(procedure, TransformConfig::default()) {
        Ok(out) => panic!("transform should fail:\n{}", out.state_object.dump()),
        Err(e) => e,
    }
}

fn count(def: &StateObjectDef, pred: impl Fn(&Instruction) -> bool) -> usize {
    def.step.code.iter().filter(|i| pred(i)).count()
}

fn task(name: &str) -> ProcedureBuilder {
    let mut b = ProcedureBuilder::new("Demo", name);
    b.set_kind(ProcedureKind::Task);
    b.set_source_file("Demo.src");
    b
}

fn generator(name: &str) -> ProcedureBuilder {
    let mut b = ProcedureBuilder::new("Demo", name);
    b.set_kind(ProcedureKind::Generator);
    b.set_source_file("Demo.src");
    b
}

fn finish_ret(mut b: ProcedureBuilder, with_value: bool) -> Procedure {
    b.emit_directive(Directive::Ret { with_value });
    b.emit(Instruction::ReturnValue(Kind::Ref));
    b.finish().unwrap()
}

/// `task sum(int a, long b) { await f(); await f(); return box(a + b); }`
fn two_awaits() -> Procedure {
    let mut b = task("sum");
    let a = b.add_param(ValueType::Int);
    let l = b.add_param(ValueType::Long);
    b.mark_line(10);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.mark_line(11);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.mark_line(12);
    b.emit_load(a, Kind::Int);
    b.emit(Instruction::Convert {
        from: Kind::Int,
        to: Kind::Long,
    });
    b.emit_load(l, Kind::Long);
    b.emit_binary(BinaryOp::Add, Kind::Long);
    b.emit_invoke("Box.long", 1, Some(ValueType::object()));
    finish_ret(b, true)
}

/// `generator squares(int n) { for i in 0..n { yield box(i * i); } }`
fn squares() -> Procedure {
    let mut b = generator("squares");
    let n = b.add_param(ValueType::Int);
    let i = b.alloc_local(&ValueType::Int);
    let head = b.new_label();
    let done = b.new_label();
    b.emit_int(0);
    b.emit_store(i, Kind::Int);
    b.bind_label(head);
    b.emit_load(i, Kind::Int);
    b.emit_load(n, Kind::Int);
    b.emit(Instruction::BranchCompare {
        cond: Condition::Ge,
        kind: Kind::Int,
        target: done,
    });
    b.mark_line(5);
    b.emit_load(i, Kind::Int);
    b.emit_load(i, Kind::Int);
    b.emit_binary(BinaryOp::Mul, Kind::Int);
    b.emit_invoke("Box.int", 1, Some(ValueType::object()));
    b.emit_directive(Directive::Yield);
    b.emit(Instruction::Increment { slot: i, delta: 1 });
    b.emit_jump(head);
    b.bind_label(done);
    finish_ret(b, false)
}

// =============================================================================
// 1. Step Layout
// =============================================================================

#[test]
fn test_dispatcher_heads_step_procedure() {
    let out = transform_ok(&two_awaits());
    let code = &out.state_object.step.code;
    assert!(matches!(code[0], Instruction::Label(_)));
    assert_eq!(code[1], Instruction::Load { slot: 0, kind: Kind::Int });
    match &code[2] {
        Instruction::TableSwitch { low, targets, .. } => {
            assert_eq!(*low, 0);
            assert_eq!(targets.len(), 3);
        }
        other => panic!("expected tableswitch, got {other}"),
    }
}

#[test]
fn test_task_step_signature() {
    let out = transform_ok(&two_awaits());
    let step = &out.state_object.step;
    assert_eq!(&*step.name, "step");
    assert_eq!(step.owner, out.state_object.name);
    assert_eq!(step.kind, ProcedureKind::Plain);
    assert_eq!(
        step.params,
        vec![ValueType::Int, ValueType::Int, ValueType::object()]
    );
}

#[test]
fn test_arguments_unpacked_into_shifted_locals() {
    let out = transform_ok(&two_awaits());
    let code = &out.state_object.step.code;
    let unpack = code
        .windows(2)
        .filter_map(|w| match (&w[0], &w[1]) {
            (
                Instruction::Intrinsic(Intrinsic::GetField { field, .. }),
                Instruction::Store { slot, kind },
            ) if field.0 < 2 => Some((field.0, *slot, *kind)),
            _ => None,
        })
        .take(2)
        .collect::<Vec<_>>();
    // int a at 0 -> 4, long b at 1..3 -> 5..7
    assert_eq!(unpack, vec![(0, 4, Kind::Int), (1, 5, Kind::Long)]);
}

#[test]
fn test_generator_layout_offset() {
    let out = transform_ok(&squares());
    let def = &out.state_object;
    assert_eq!(def.step.params, vec![ValueType::Int, ValueType::throwable()]);
    assert_eq!(def.layout.offset, 3);
    assert!(def.step.code.contains(&Instruction::Increment { slot: 4, delta: 1 }));
}

#[test]
fn test_generator_has_no_catch_all() {
    let out = transform_ok(&squares());
    assert!(out.state_object.step.regions.is_empty());
    assert_eq!(count(&out.state_object, |i| *i == Instruction::Intrinsic(Intrinsic::CompleteError)), 0);
}

#[test]
fn test_launcher_replaces_body() {
    let out = transform_ok(&squares());
    assert_eq!(out.launcher.params, vec![ValueType::Int]);
    assert_eq!(out.launcher.returns, Some(ValueType::reference("Generator")));
    assert!(analyze(&out.launcher).is_ok());
}

#[test]
fn test_no_suspend_points() {
    let mut b = task("plain");
    b.emit_int(7);
    b.emit_invoke("Box.int", 1, Some(ValueType::object()));
    let out = transform_ok(&finish_ret(b, true));
    assert!(out.state_object.resume_table.is_empty());
    assert_eq!(out.state_object.spill_fields().count(), 0);
    assert_eq!(count(&out.state_object, |i| *i == Instruction::Intrinsic(Intrinsic::Complete)), 1);
}

// =============================================================================
// 2. Spilling
// =============================================================================

#[test]
fn test_spill_slots_are_pooled_across_suspend_points() {
    let out = transform_ok(&two_awaits());
    let def = &out.state_object;
    let spills: Vec<_> = def.spill_fields().map(|f| f.ty.clone()).collect();
    assert_eq!(spills, vec![ValueType::Int, ValueType::Long]);
    assert!(def.resume_table.points().iter().all(|p| p.spilled == 2));
}

#[test]
fn test_generator_spills_loop_state() {
    let out = transform_ok(&squares());
    let def = &out.state_object;
    assert_eq!(def.resume_table.len(), 1);
    assert_eq!(def.resume_table.points()[0].kind, SuspendKind::Yield);
    assert_eq!(def.spill_fields().count(), 2);
}

#[test]
fn test_dead_locals_are_pruned() {
    // x is stored before the await and never read again
    let mut b = task("dead");
    let x = b.alloc_local(&ValueType::Int);
    b.emit_int(1);
    b.emit_store(x, Kind::Int);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    let p = finish_ret(b, true);

    let pruned = transform_ok(&p);
    assert_eq!(pruned.state_object.spill_fields().count(), 0);

    let config = TransformConfig {
        prune_dead_locals: false,
        ..TransformConfig::default()
    };
    let kept = transform(&p, config).unwrap();
    assert_eq!(kept.state_object.spill_fields().count(), 1);
    assert!(analyze(&kept.state_object.step).is_ok());
}

#[test]
fn test_operand_stack_below_await_is_spilled() {
    // box(a) + await f(): the boxed value sits under the awaitable
    let mut b = task("stack");
    let a = b.add_param(ValueType::Int);
    b.emit_load(a, Kind::Int);
    b.emit_invoke("Box.int", 1, Some(ValueType::object()));
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit_invoke("Demo.add", 2, Some(ValueType::object()));
    let out = transform_ok(&finish_ret(b, true));
    let def = &out.state_object;
    let spills: Vec<_> = def.spill_fields().map(|f| f.ty.clone()).collect();
    assert_eq!(spills, vec![ValueType::object()]);
    // operand parked in scratch while the stack is spilled
    assert!(def.step.code.contains(&Instruction::Store { slot: 3, kind: Kind::Ref }));
    assert!(def.step.code.contains(&Instruction::Load { slot: 3, kind: Kind::Ref }));
}

#[test]
fn test_uninitialized_stack_entries_are_rebuilt() {
    // new Pair(await f())
    let mut b = task("pair");
    b.emit(Instruction::New("Pair".into()));
    b.emit(Instruction::Dup);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Construct {
        class: "Pair".into(),
        argc: 1,
    });
    let out = transform_ok(&finish_ret(b, true));
    let def = &out.state_object;
    assert_eq!(def.spill_fields().count(), 0);
    assert_eq!(def.resume_table.points()[0].spilled, 0);
    // once in the body, once at resume
    assert_eq!(count(def, |i| matches!(i, Instruction::New(c) if &**c == "Pair")), 2);
    assert_eq!(count(def, |i| *i == Instruction::Pop), 2);
}

#[test]
fn test_placeholder_in_local_and_on_stack_is_rebuilt_once() {
    // x = new Pair; ... new Pair(await f()) with x aliasing the receiver
    let mut b = task("alias");
    let x = b.alloc_local(&ValueType::reference("Pair"));
    b.emit(Instruction::New("Pair".into()));
    b.emit(Instruction::Dup);
    b.emit(Instruction::Dup);
    b.emit_store(x, Kind::Ref);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Construct {
        class: "Pair".into(),
        argc: 1,
    });
    b.emit(Instruction::Pop);
    b.emit_load(x, Kind::Ref);
    b.emit(Instruction::GetMember {
        index: 0,
        ty: ValueType::object(),
    });
    // the step re-analysis rejects a member read through an uninitialized x
    let out = transform_ok(&finish_ret(b, true));
    let def = &out.state_object;
    assert_eq!(count(def, |i| matches!(i, Instruction::New(c) if &**c == "Pair")), 2);
    assert_eq!(def.spill_fields().count(), 0);
}

#[test]
fn test_null_local_is_rematerialized() {
    let mut b = task("null");
    let x = b.alloc_local(&ValueType::object());
    b.emit_const(Constant::Null);
    b.emit_store(x, Kind::Ref);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.emit_load(x, Kind::Ref);
    let out = transform_ok(&finish_ret(b, true));
    let def = &out.state_object;
    assert_eq!(def.spill_fields().count(), 0);
    assert_eq!(count(def, |i| *i == Instruction::Const(Constant::Null)), 2);
}

#[test]
fn test_unreachable_directive_becomes_nop() {
    let mut b = task("skip");
    let end = b.new_label();
    b.emit_jump(end);
    b.emit_directive(Directive::Await);
    b.bind_label(end);
    b.emit_const(Constant::Null);
    let out = transform_ok(&finish_ret(b, true));
    assert!(out.state_object.resume_table.is_empty());
    assert_eq!(count(&out.state_object, |i| *i == Instruction::Nop), 1);
}

#[test]
fn test_current_executor_is_lowered() {
    let mut b = task("exec");
    b.emit_directive(Directive::CurrentExecutor);
    let out = transform_ok(&finish_ret(b, true));
    assert_eq!(
        count(&out.state_object, |i| *i
            == Instruction::Intrinsic(Intrinsic::CurrentExecutor)),
        1
    );
}

// =============================================================================
// 3. Exception Regions
// =============================================================================

/// `task guarded() { try { await f(); await f(); } catch (Exception e) { } return null; }`
fn guarded() -> Procedure {
    let mut b = task("guarded");
    let (start, end, handler, after) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());
    b.bind_label(start);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.bind_label(end);
    b.emit_jump(after);
    b.bind_label(handler);
    b.emit(Instruction::Pop);
    b.bind_label(after);
    b.emit_const(Constant::Null);
    b.add_region(start, end, handler, Some("Exception".into()));
    finish_ret(b, true)
}

#[test]
fn test_region_split_around_each_suspend_point() {
    let out = transform_ok(&guarded());
    let regions = &out.state_object.step.regions;
    // three pieces of the try block, then the catch-all
    assert_eq!(regions.len(), 4);
    assert!(regions[..3].iter().all(|r| r.catch_type.as_deref() == Some("Exception")));
    assert!(regions[..3].iter().all(|r| r.handler == regions[0].handler));
    assert_eq!(regions[3].catch_type, None);
}

#[test]
fn test_region_outside_suspend_points_is_unsplit() {
    let mut b = task("outside");
    let (start, end, handler) = (b.new_label(), b.new_label(), b.new_label());
    let after = b.new_label();
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.bind_label(start);
    b.emit_invoke("Demo.g", 0, None);
    b.bind_label(end);
    b.emit_jump(after);
    b.bind_label(handler);
    b.emit(Instruction::Pop);
    b.bind_label(after);
    b.emit_const(Constant::Null);
    b.add_region(start, end, handler, None);
    let out = transform_ok(&finish_ret(b, true));
    assert_eq!(out.state_object.step.regions.len(), 2);
}

// =============================================================================
// 4. Structural Errors
// =============================================================================

#[test]
fn test_ret_must_be_returned() {
    let mut b = task("bad_ret");
    b.emit_const(Constant::Null);
    b.emit_directive(Directive::Ret { with_value: true });
    b.emit(Instruction::Pop);
    b.emit_const(Constant::Null);
    b.emit(Instruction::ReturnValue(Kind::Ref));
    assert!(matches!(
        transform_err(&b.finish().unwrap()),
        SpindleError::Structural { .. }
    ));
}

#[test]
fn test_await_in_generator_is_rejected() {
    let mut b = generator("bad_await");
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    assert!(matches!(
        transform_err(&finish_ret(b, false)),
        SpindleError::Structural { .. }
    ));
}

#[test]
fn test_yield_in_task_is_rejected() {
    let mut b = task("bad_yield");
    b.emit_const(Constant::Str("x".into()));
    b.emit_directive(Directive::Yield);
    assert!(matches!(
        transform_err(&finish_ret(b, false)),
        SpindleError::Structural { .. }
    ));
}

#[test]
fn test_bare_return_is_rejected() {
    let mut b = task("bare");
    b.emit(Instruction::Return);
    assert!(matches!(
        transform_err(&b.finish().unwrap()),
        SpindleError::Structural { .. }
    ));
}

#[test]
fn test_split_placeholder_is_rejected() {
    // new Pair; dup; 1; swap leaves [Pair?, int, Pair?] below the operand
    let mut b = task("split");
    b.emit(Instruction::New("Pair".into()));
    b.emit(Instruction::Dup);
    b.emit_int(1);
    b.emit(Instruction::Swap);
    b.emit_invoke("Demo.f", 0, Some(future()));
    b.emit_directive(Directive::Await);
    b.emit(Instruction::Pop);
    b.emit(Instruction::Swap);
    b.emit(Instruction::Construct {
        class: "Pair".into(),
        argc: 1,
    });
    assert!(matches!(
        transform_err(&finish_ret(b, true)),
        SpindleError::Structural { .. }
    ));
}

#[test]
fn test_inconsistent_stack_is_fatal() {
    let mut b = task("merge");
    let join = b.new_label();
    let other = b.new_label();
    b.emit_int(0);
    b.emit_branch(Condition::Eq, other);
    b.emit_int(1);
    b.emit_jump(join);
    b.bind_label(other);
    b.bind_label(join);
    b.emit(Instruction::Pop);
    b.emit_const(Constant::Null);
    assert!(matches!(
        transform_err(&finish_ret(b, true)),
        SpindleError::Merge { .. }
    ));
}

// =============================================================================
// 5. Diagnostics
// =============================================================================

#[test]
fn test_suspend_lines_recorded() {
    let out = transform_ok(&two_awaits());
    let meta = &out.state_object.metadata;
    assert_eq!(meta.suspend_lines, vec![10, 11]);
    let loc = meta.location(2).unwrap();
    assert_eq!(loc.to_string(), "Demo.sum(Demo.src:11)");
    assert!(meta.location(0).is_none());
}

#[test]
fn test_dump_lists_fields_and_states() {
    let out = transform_ok(&two_awaits());
    let dump = out.state_object.dump();
    assert!(dump.contains("state 2 ->"));
    assert!(dump.contains("[arg 1]"));
    assert!(dump.contains("%suspend await -> 2"));
    assert!(disassemble(&out.launcher).contains("%launch"));
}
