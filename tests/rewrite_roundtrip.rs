//! End-to-end rewrite tests: configure mocks, rewrite, materialize through
//! the image round-trip, and drive the loaded fake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fakeweave::prelude::*;

/// A unit with `static int Helper(int x) => x + 1;` and
/// `static int M() => Helper(5);`.
fn calculator() -> (CompiledUnit, Token, Token, Token) {
    let unit = CompiledUnit::new("Calc.Tests");
    let ty = unit.add_type("Calc", "Calculator", TypeFlavor::Class);

    let helper = unit.add_method(
        ty,
        "Helper",
        MethodFlags::STATIC,
        vec![TypeSig::I32],
        TypeSig::I32,
    );
    unit.set_body(
        helper,
        BodyAssembler::new().ldarg(0).ldc_i4(1).add().ret().finish(),
    );

    let m = unit.add_method(ty, "M", MethodFlags::STATIC, vec![], TypeSig::I32);
    unit.set_body(
        m,
        BodyAssembler::new().ldc_i4(5).call(helper).ret().finish(),
    );

    (unit, ty, helper, m)
}

fn helper_member(session: &FakeSession, ty: Token) -> SourceMember {
    session
        .resolve(&InvocationExpr::MethodCall {
            declaring_type: ty,
            name: "Helper".to_string(),
            args: vec![CapturedArg::literal(0, Value::I32(5))],
        })
        .unwrap()
}

fn isolated_session(unit: CompiledUnit) -> FakeSession {
    FakeSession::with_pool(unit, Arc::new(UnitPool::new()))
}

#[test]
fn replace_returns_configured_value_and_counts() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(42))?);

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(42));

    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 1);
    Ok(())
}

#[test]
fn replace_eliminates_every_direct_call() -> Result<()> {
    let (unit, ty, helper, _) = calculator();
    // static int Sum() => Helper(1) + Helper(2) + Helper(3);
    let sum = unit.add_method(ty, "Sum", MethodFlags::STATIC, vec![], TypeSig::I32);
    unit.set_body(
        sum,
        BodyAssembler::new()
            .ldc_i4(1)
            .call(helper)
            .ldc_i4(2)
            .call(helper)
            .add()
            .ldc_i4(3)
            .call(helper)
            .add()
            .ret()
            .finish(),
    );

    let mut session = isolated_session(unit);
    let member = session.resolve(&InvocationExpr::MethodCall {
        declaring_type: ty,
        name: "Helper".to_string(),
        args: vec![CapturedArg::literal(0, Value::I32(0))],
    })?;
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(42))?);

    let fake = session.execute(sum, vec![])?;

    let rewritten = fake.module().unit().body(sum).unwrap();
    let direct_calls = rewritten
        .instructions
        .iter()
        .filter(|ins| ins.opcode == OpCode::Call && ins.operand.token() == Some(helper))
        .count();
    assert_eq!(direct_calls, 0, "no direct call to the original may remain");

    assert_eq!(fake.invoke("Sum", vec![])?, Value::I32(126));
    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 3);
    Ok(())
}

#[test]
fn insert_before_runs_closure_and_keeps_result() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);

    let counter = Arc::new(AtomicUsize::new(0));
    let observed = counter.clone();
    session.mocks_mut().add(InsertMock::before(member, move || {
        observed.fetch_add(1, Ordering::Relaxed);
    }));

    let fake = session.execute(m, vec![])?;
    // No replace mock is present, so M keeps its un-mocked result.
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(6));
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn remove_discards_call_and_balances_stack() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session.mocks_mut().add(RemoveMock::new(member));

    let fake = session.execute(m, vec![])?;
    // The removed call's slot is balanced with the return type's default.
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(0));
    Ok(())
}

#[test]
fn conflicting_replace_and_remove_fail_at_rewrite_time() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session
        .mocks_mut()
        .add(ReplaceMock::returns(member.clone(), Value::I32(1))?);
    session.mocks_mut().add(RemoveMock::new(member));

    match session.execute(m, vec![]) {
        Err(Error::InjectionConflict { .. }) => Ok(()),
        other => panic!("expected an injection conflict, got {other:?}"),
    }
}

#[test]
fn unmatched_mock_is_reported_not_fatal() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    // static int Unused(int x) - never called from M.
    let unused = unit.add_method(
        ty,
        "Unused",
        MethodFlags::STATIC,
        vec![TypeSig::I32],
        TypeSig::I32,
    );
    unit.set_body(unused, BodyAssembler::new().ldarg(0).ret().finish());

    let mut session = isolated_session(unit);
    let member = session.resolve(&InvocationExpr::MethodCall {
        declaring_type: ty,
        name: "Unused".to_string(),
        args: vec![CapturedArg::literal(0, Value::I32(1))],
    })?;
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(9))?);

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(6));
    assert!(fake.diagnostics().has_warnings());
    Ok(())
}

#[test]
fn argument_checker_narrows_matching_to_literal_sites() -> Result<()> {
    let (unit, ty, helper, _) = calculator();
    // static int Pair() => Helper(5) + Helper(7);
    let pair = unit.add_method(ty, "Pair", MethodFlags::STATIC, vec![], TypeSig::I32);
    unit.set_body(
        pair,
        BodyAssembler::new()
            .ldc_i4(5)
            .call(helper)
            .ldc_i4(7)
            .call(helper)
            .add()
            .ret()
            .finish(),
    );

    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    let only_five: Arc<dyn ArgumentChecker> =
        Arc::new(|value: &Value| *value == Value::I32(5));
    session.mocks_mut().add(
        ReplaceMock::returns(member, Value::I32(100))?.with_checkers(vec![only_five])?,
    );

    let fake = session.execute(pair, vec![])?;
    // Helper(5) is replaced with 100, Helper(7) still runs and yields 8.
    assert_eq!(fake.invoke("Pair", vec![])?, Value::I32(108));
    Ok(())
}

#[test]
fn gate_closed_runs_original_uncounted() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session.mocks_mut().add(
        ReplaceMock::returns(member, Value::I32(42))?.when(|| false),
    );

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(6));
    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 0);
    Ok(())
}

#[test]
fn returns_with_computes_from_arguments() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session.mocks_mut().add(ReplaceMock::returns_with(member, |args| {
        match args.first() {
            Some(Value::I32(x)) => Value::I32(x * 10),
            _ => Value::Null,
        }
    })?);

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(50));
    Ok(())
}

#[test]
fn processor_appends_state_holder_fields() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);
    let member = helper_member(&session, ty);
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(42))?);

    let fake = session.execute(m, vec![])?;
    let synthesized: Vec<_> = fake
        .module()
        .unit()
        .fields()
        .into_iter()
        .filter(|field| field.flags.contains(FieldFlags::SYNTHESIZED))
        .collect();
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].declaring_type, ty);
    assert!(fake.module().static_value(synthesized[0].token).is_some());
    Ok(())
}

#[test]
fn fake_object_reports_source_type() -> Result<()> {
    let (unit, ty, _helper, m) = calculator();
    let session = isolated_session(unit);
    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.source_type(), ty);
    assert_eq!(fake.source_type_name(), "Calc.Calculator");
    assert!(fake.instance().is_none(), "static-only scenario has no instance");
    Ok(())
}

#[test]
fn boundary_inserts_run_at_entry_and_exit() -> Result<()> {
    let (unit, _ty, _helper, m) = calculator();
    let mut session = isolated_session(unit);

    let counter = Arc::new(AtomicUsize::new(0));
    let at_entry = counter.clone();
    session.mocks_mut().add(InsertMock::at_entry(m, move || {
        at_entry.fetch_add(1, Ordering::Relaxed);
    }));
    let at_exit = counter.clone();
    session.mocks_mut().add(InsertMock::at_exit(m, move || {
        at_exit.fetch_add(10, Ordering::Relaxed);
    }));

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(6));
    assert_eq!(counter.load(Ordering::Relaxed), 11);
    Ok(())
}

#[test]
fn property_getter_can_be_replaced() -> Result<()> {
    let unit = CompiledUnit::new("Prop.Tests");
    let ty = unit.add_type("Prop", "Widget", TypeFlavor::Class);
    let get_size = unit.add_method(
        ty,
        "get_Size",
        MethodFlags::STATIC | MethodFlags::SPECIAL_NAME,
        vec![],
        TypeSig::I32,
    );
    unit.set_body(get_size, BodyAssembler::new().ldc_i4(3).ret().finish());
    let m = unit.add_method(ty, "M", MethodFlags::STATIC, vec![], TypeSig::I32);
    unit.set_body(m, BodyAssembler::new().call(get_size).ret().finish());

    let mut session = isolated_session(unit);
    let member = session.resolve(&InvocationExpr::PropertyGet {
        declaring_type: ty,
        name: "Size".to_string(),
    })?;
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(8))?);

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(8));
    Ok(())
}

#[test]
fn constructor_mock_distinguishes_generic_instantiations() -> Result<()> {
    let unit = CompiledUnit::new("Ctor.Tests");
    let holder = unit.add_type("Ctor", "Holder", TypeFlavor::Class);
    unit.add_generic_params(holder, &["T"]);
    let ctor = unit.add_method(
        holder,
        ".ctor",
        MethodFlags::RT_SPECIAL_NAME,
        vec![],
        TypeSig::Unit,
    );
    unit.set_body(ctor, BodyAssembler::new().ret().finish());

    let probe = unit.add_type("Ctor", "Probe", TypeFlavor::Class);
    // static object Both() { var a = new Holder<int>(); var b = new Holder<string>(); return a; }
    let both = unit.add_method(probe, "Both", MethodFlags::STATIC, vec![], TypeSig::Object);
    unit.set_body(
        both,
        BodyAssembler::new()
            .newobj(ctor, vec![TypeSig::I32])
            .newobj(ctor, vec![TypeSig::Str])
            .pop()
            .ret()
            .finish(),
    );

    let mut session = isolated_session(unit);
    let member = session.resolve(&InvocationExpr::Constructor {
        declaring_type: holder,
        generic_args: vec![TypeSig::I32],
        args: vec![],
    })?;
    session
        .mocks_mut()
        .add(ReplaceMock::returns(member, Value::str("sentinel"))?);

    let fake = session.execute(both, vec![])?;
    // Only the Holder<int> construction site is replaced; Holder<string>
    // still constructs for real and is discarded by the pop.
    assert_eq!(fake.invoke("Both", vec![])?, Value::str("sentinel"));
    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 1);
    Ok(())
}
