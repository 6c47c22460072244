//! Virtual dispatch completeness: a mock against an interface or virtual
//! member must be observed through every implementing receiver, including
//! devirtualized call sites.

use std::sync::Arc;

use fakeweave::prelude::*;
use fakeweave::runtime::ObjectData;

struct Workers {
    unit: CompiledUnit,
    iface: Token,
    a: Token,
    b: Token,
    a_work: Token,
    dispatcher: Token,
    run: Token,
}

/// interface IWorker { int Work(); } with implementations A (10) and B (20),
/// and Dispatcher.Run(object) calling through the interface.
fn workers() -> Workers {
    let unit = CompiledUnit::new("Work.Tests");
    let iface = unit.add_type("Work", "IWorker", TypeFlavor::Interface);
    let iface_work = unit.add_method(
        iface,
        "Work",
        MethodFlags::VIRTUAL | MethodFlags::ABSTRACT,
        vec![],
        TypeSig::I32,
    );

    let a = unit.add_type("Work", "A", TypeFlavor::Class);
    unit.add_interface_impl(a, iface);
    let a_work = unit.add_method(a, "Work", MethodFlags::VIRTUAL, vec![], TypeSig::I32);
    unit.set_body(a_work, BodyAssembler::new().ldc_i4(10).ret().finish());

    let b = unit.add_type("Work", "B", TypeFlavor::Class);
    unit.add_interface_impl(b, iface);
    let b_work = unit.add_method(b, "Work", MethodFlags::VIRTUAL, vec![], TypeSig::I32);
    unit.set_body(b_work, BodyAssembler::new().ldc_i4(20).ret().finish());

    let dispatcher = unit.add_type("Work", "Dispatcher", TypeFlavor::Class);
    let run = unit.add_method(
        dispatcher,
        "Run",
        MethodFlags::STATIC,
        vec![TypeSig::Object],
        TypeSig::I32,
    );
    unit.set_body(
        run,
        BodyAssembler::new().ldarg(0).callvirt(iface_work).ret().finish(),
    );

    Workers {
        unit,
        iface,
        a,
        b,
        a_work,
        dispatcher,
        run,
    }
}

fn interface_member(session: &FakeSession, iface: Token) -> SourceMember {
    session
        .resolve(&InvocationExpr::MethodCall {
            declaring_type: iface,
            name: "Work".to_string(),
            args: vec![],
        })
        .unwrap()
}

#[test]
fn unmocked_dispatch_picks_the_receiver_implementation() -> Result<()> {
    let workers = workers();
    let (a, b, run) = (workers.a, workers.b, workers.run);
    let session = FakeSession::with_pool(workers.unit, Arc::new(UnitPool::new()));
    let fake = session.execute(run, vec![])?;

    let a_instance = Value::Object(ObjectData::new(a));
    let b_instance = Value::Object(ObjectData::new(b));
    assert_eq!(fake.invoke("Run", vec![a_instance])?, Value::I32(10));
    assert_eq!(fake.invoke("Run", vec![b_instance])?, Value::I32(20));
    Ok(())
}

#[test]
fn interface_mock_is_observed_through_every_receiver() -> Result<()> {
    let workers = workers();
    let (iface, a, b, run) = (workers.iface, workers.a, workers.b, workers.run);
    let mut session = FakeSession::with_pool(workers.unit, Arc::new(UnitPool::new()));
    let member = interface_member(&session, iface);
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(99))?);

    let fake = session.execute(run, vec![])?;

    let a_instance = Value::Object(ObjectData::new(a));
    let b_instance = Value::Object(ObjectData::new(b));
    assert_eq!(fake.invoke("Run", vec![a_instance])?, Value::I32(99));
    assert_eq!(fake.invoke("Run", vec![b_instance])?, Value::I32(99));

    let (_, context) = &fake.execution_contexts()[0];
    assert_eq!(context.actual_calls(), 2);
    Ok(())
}

#[test]
fn interface_mock_catches_devirtualized_call_sites() -> Result<()> {
    let workers = workers();
    let (iface, dispatcher, a_work) = (workers.iface, workers.dispatcher, workers.a_work);
    // static int RunA(object w) => ((A)w).Work();  - a direct, devirtualized call.
    let run_a = workers.unit.add_method(
        dispatcher,
        "RunA",
        MethodFlags::STATIC,
        vec![TypeSig::Object],
        TypeSig::I32,
    );
    workers.unit.set_body(
        run_a,
        BodyAssembler::new().ldarg(0).callvirt(a_work).ret().finish(),
    );

    let a = workers.a;
    let mut session = FakeSession::with_pool(workers.unit, Arc::new(UnitPool::new()));
    let member = interface_member(&session, iface);
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(77))?);

    let fake = session.execute(run_a, vec![])?;
    let a_instance = Value::Object(ObjectData::new(a));
    assert_eq!(fake.invoke("RunA", vec![a_instance])?, Value::I32(77));
    Ok(())
}

#[test]
fn overriding_method_bodies_are_rewritten_too() -> Result<()> {
    let unit = CompiledUnit::new("Work.Chain");
    let iface = unit.add_type("Work", "IWorker", TypeFlavor::Interface);
    let iface_work = unit.add_method(
        iface,
        "Work",
        MethodFlags::VIRTUAL | MethodFlags::ABSTRACT,
        vec![],
        TypeSig::I32,
    );

    let a = unit.add_type("Work", "A", TypeFlavor::Class);
    unit.add_interface_impl(a, iface);
    let a_work = unit.add_method(a, "Work", MethodFlags::VIRTUAL, vec![], TypeSig::I32);
    unit.set_body(a_work, BodyAssembler::new().ldc_i4(10).ret().finish());

    // B delegates to A's implementation directly and adds 5. The delegation
    // call sits inside an overriding method, which must be scanned once the
    // interface member is mocked.
    let b = unit.add_type("Work", "B", TypeFlavor::Class);
    unit.add_interface_impl(b, iface);
    let b_work = unit.add_method(b, "Work", MethodFlags::VIRTUAL, vec![], TypeSig::I32);
    unit.set_body(
        b_work,
        BodyAssembler::new()
            .ldarg(0)
            .call(a_work)
            .ldc_i4(5)
            .add()
            .ret()
            .finish(),
    );

    let dispatcher = unit.add_type("Work", "Dispatcher", TypeFlavor::Class);
    let run = unit.add_method(
        dispatcher,
        "Run",
        MethodFlags::STATIC,
        vec![TypeSig::Object],
        TypeSig::I32,
    );
    unit.set_body(
        run,
        BodyAssembler::new().ldarg(0).callvirt(iface_work).ret().finish(),
    );

    let mut session = FakeSession::with_pool(unit, Arc::new(UnitPool::new()));
    let member = interface_member(&session, iface);
    session.mocks_mut().add(ReplaceMock::returns(member, Value::I32(50))?);

    let fake = session.execute(run, vec![])?;

    // The delegation call inside B.Work was rewritten alongside the target,
    // so driving B.Work directly observes the mock as well.
    let b_instance = Value::Object(ObjectData::new(b));
    assert_eq!(
        fake.module().invoke(b_work, Some(b_instance), vec![])?,
        Value::I32(55)
    );
    Ok(())
}
