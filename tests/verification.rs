//! Verification gating and eager configuration errors.

use std::sync::Arc;

use fakeweave::prelude::*;

fn calculator() -> (CompiledUnit, Token, Token) {
    let unit = CompiledUnit::new("Verify.Tests");
    let ty = unit.add_type("Verify", "Calculator", TypeFlavor::Class);

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

    (unit, ty, m)
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

#[test]
fn expected_two_calls_passes_on_exactly_two() -> Result<()> {
    let (unit, ty, m) = calculator();
    let mut session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = helper_member(&session, ty);
    session
        .mocks_mut()
        .add(VerifyMock::new(member, ExpectedCalls::exactly(2)?));

    let fake = session.execute(m, vec![])?;

    fake.invoke("M", vec![])?;
    assert!(fake.verify().is_err(), "one call must fail ExpectedCalls(2)");

    fake.invoke("M", vec![])?;
    fake.verify()?;

    fake.invoke("M", vec![])?;
    match fake.verify() {
        Err(Error::Verification { actual: 3, .. }) => Ok(()),
        other => panic!("expected a verification failure, got {other:?}"),
    }
}

#[test]
fn verify_does_not_change_behavior() -> Result<()> {
    let (unit, ty, m) = calculator();
    let mut session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = helper_member(&session, ty);
    session
        .mocks_mut()
        .add(VerifyMock::new(member, ExpectedCalls::at_least(1)?));

    let fake = session.execute(m, vec![])?;
    assert_eq!(fake.invoke("M", vec![])?, Value::I32(6));
    fake.verify()?;
    Ok(())
}

#[test]
fn checker_count_mismatch_is_an_eager_configuration_error() {
    let (unit, ty, _m) = calculator();
    let session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = helper_member(&session, ty);

    let checkers: Vec<Arc<dyn ArgumentChecker>> = vec![
        Arc::new(|_: &Value| true),
        Arc::new(|_: &Value| true),
    ];
    let result = ReplaceMock::returns(member, Value::I32(1))
        .and_then(|mock| mock.with_checkers(checkers));
    assert!(
        matches!(result, Err(Error::Configuration(_))),
        "two checkers for a one-parameter member must fail before any rewriting"
    );
}

#[test]
fn replace_against_void_member_is_a_configuration_error() -> Result<()> {
    let (unit, ty, _m) = calculator();
    // static void Log(int x) {}
    let log = unit.add_method(
        ty,
        "Log",
        MethodFlags::STATIC,
        vec![TypeSig::I32],
        TypeSig::Unit,
    );
    unit.set_body(log, BodyAssembler::new().ret().finish());

    let session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = session.resolve(&InvocationExpr::MethodCall {
        declaring_type: ty,
        name: "Log".to_string(),
        args: vec![CapturedArg::literal(0, Value::I32(1))],
    })?;

    assert!(matches!(
        ReplaceMock::returns(member, Value::I32(1)),
        Err(Error::Configuration(_))
    ));
    Ok(())
}

#[test]
fn non_positive_expected_calls_is_a_configuration_error() {
    assert!(matches!(
        ExpectedCalls::exactly(0),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        ExpectedCalls::at_least(0),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn gated_verify_counts_only_while_open() -> Result<()> {
    let (unit, ty, m) = calculator();
    let mut session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = helper_member(&session, ty);
    session.mocks_mut().add(
        VerifyMock::new(member, ExpectedCalls::exactly(1)?).when(|| false),
    );

    let fake = session.execute(m, vec![])?;
    fake.invoke("M", vec![])?;

    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 0, "a closed gate suppresses counting");
    assert!(fake.verify().is_err());
    Ok(())
}
