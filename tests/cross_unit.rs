//! Cross-unit reconciliation: contract mocks, reference rows and the unit
//! pool under multi-unit sessions.

use std::sync::Arc;

use fakeweave::prelude::*;
use fakeweave::runtime::ObjectData;

/// An external library unit: class Thing { .ctor(); int Get() => 7; } plus
/// interface IExt { int Poll(); } implemented by ExtImpl (=> 7).
struct Library {
    unit: CompiledUnit,
    thing: Token,
    thing_ctor: Token,
    iface: Token,
    iface_poll: Token,
    impl_type: Token,
}

fn library() -> Library {
    let unit = CompiledUnit::new("Ext.Lib");
    let thing = unit.add_type("Ext", "Thing", TypeFlavor::Class);
    let thing_ctor = unit.add_method(
        thing,
        ".ctor",
        MethodFlags::RT_SPECIAL_NAME,
        vec![],
        TypeSig::Unit,
    );
    unit.set_body(thing_ctor, BodyAssembler::new().ret().finish());

    let iface = unit.add_type("Ext", "IExt", TypeFlavor::Interface);
    let iface_poll = unit.add_method(
        iface,
        "Poll",
        MethodFlags::VIRTUAL | MethodFlags::ABSTRACT,
        vec![],
        TypeSig::I32,
    );

    let impl_type = unit.add_type("Ext", "ExtImpl", TypeFlavor::Class);
    unit.add_interface_impl(impl_type, iface);
    let poll = unit.add_method(impl_type, "Poll", MethodFlags::VIRTUAL, vec![], TypeSig::I32);
    unit.set_body(poll, BodyAssembler::new().ldc_i4(7).ret().finish());

    Library {
        unit,
        thing,
        thing_ctor,
        iface,
        iface_poll,
        impl_type,
    }
}

#[test]
fn external_construction_is_repointed_and_registered() -> Result<()> {
    let library = library();
    let lib_identity = library.unit.identity();
    let thing_ctor = library.thing_ctor;

    let unit = CompiledUnit::new("App.Tests");
    let app = unit.add_type("App", "Main", TypeFlavor::Class);
    // static void UseThing() { new Thing(); }
    let use_thing = unit.add_method(app, "UseThing", MethodFlags::STATIC, vec![], TypeSig::Unit);
    unit.set_body(
        use_thing,
        BodyAssembler::new()
            .newobj(thing_ctor, vec![])
            .pop()
            .ret()
            .finish(),
    );

    let pool = Arc::new(UnitPool::new());
    let mut session = FakeSession::with_pool(unit, pool.clone());
    session.reference(library.unit);

    let fake = session.execute(use_thing, vec![])?;

    // The construction site now goes through an imported reference row, and
    // the defining unit was registered into the pool exactly once.
    let member_refs = fake.module().unit().member_refs();
    assert_eq!(member_refs.len(), 1);
    assert_eq!(member_refs[0].target, thing_ctor);
    assert!(pool.has_module(&lib_identity));

    assert_eq!(fake.invoke("UseThing", vec![])?, Value::Null);
    Ok(())
}

#[test]
fn external_interface_call_is_repointed_and_still_dispatches() -> Result<()> {
    let library = library();
    let (iface_poll, impl_type) = (library.iface_poll, library.impl_type);

    let unit = CompiledUnit::new("App.Tests");
    let app = unit.add_type("App", "Main", TypeFlavor::Class);
    // static int PollIt(object o) => ((IExt)o).Poll();
    let poll_it = unit.add_method(
        app,
        "PollIt",
        MethodFlags::STATIC,
        vec![TypeSig::Object],
        TypeSig::I32,
    );
    unit.set_body(
        poll_it,
        BodyAssembler::new().ldarg(0).callvirt(iface_poll).ret().finish(),
    );

    let pool = Arc::new(UnitPool::new());
    let mut session = FakeSession::with_pool(unit, pool.clone());
    session.reference(library.unit);

    let fake = session.execute(poll_it, vec![])?;

    let refs = fake.module().unit().member_refs();
    assert!(
        refs.iter().any(|row| row.target == iface_poll),
        "the interface call must go through an imported reference"
    );

    let receiver = Value::Object(ObjectData::new(impl_type));
    assert_eq!(fake.invoke("PollIt", vec![receiver])?, Value::I32(7));
    Ok(())
}

#[test]
fn external_cast_is_repointed() -> Result<()> {
    let library = library();
    let thing = library.thing;

    let unit = CompiledUnit::new("App.Tests");
    let app = unit.add_type("App", "Main", TypeFlavor::Class);
    // static object Reinterpret(object o) => (Thing)o;
    let reinterpret = unit.add_method(
        app,
        "Reinterpret",
        MethodFlags::STATIC,
        vec![TypeSig::Object],
        TypeSig::Object,
    );
    unit.set_body(
        reinterpret,
        BodyAssembler::new().ldarg(0).castclass(thing).ret().finish(),
    );

    let pool = Arc::new(UnitPool::new());
    let mut session = FakeSession::with_pool(unit, pool.clone());
    session.reference(library.unit);

    let fake = session.execute(reinterpret, vec![])?;

    let type_refs = fake.module().unit().type_refs();
    assert!(type_refs.iter().any(|row| row.target == thing));

    let instance = Value::Object(ObjectData::new(thing));
    assert_eq!(
        fake.invoke("Reinterpret", vec![instance.clone()])?,
        instance
    );
    // An unrelated runtime type must still fail the cast.
    let stranger = Value::Object(ObjectData::new(app));
    assert!(fake.invoke("Reinterpret", vec![stranger]).is_err());
    Ok(())
}

#[test]
fn pool_registration_is_idempotent_across_sessions() -> Result<()> {
    let library = library();
    let lib_identity = library.unit.identity();
    let thing_ctor = library.thing_ctor;
    let lib = Arc::new(library.unit);
    let pool = Arc::new(UnitPool::new());

    assert!(pool.try_add(lib.clone())?);
    assert!(!pool.try_add(lib.clone())?);
    assert_eq!(pool.len(), 1);
    assert!(pool.has_module(&lib_identity));

    // A session importing the same unit observes it as already registered.
    let unit = CompiledUnit::new("App.Second");
    let app = unit.add_type("App", "Main", TypeFlavor::Class);
    let use_thing = unit.add_method(app, "UseThing", MethodFlags::STATIC, vec![], TypeSig::Unit);
    unit.set_body(
        use_thing,
        BodyAssembler::new()
            .newobj(thing_ctor, vec![])
            .pop()
            .ret()
            .finish(),
    );

    let mut session = FakeSession::with_pool(unit, pool.clone());
    // The pool already owns the unit; hand the session a structurally
    // identical copy through the image codec.
    let image = fakeweave::materializer::write_unit(&lib);
    session.reference(fakeweave::materializer::read_unit(&image)?);

    let fake = session.execute(use_thing, vec![])?;
    assert_eq!(pool.len(), 1, "re-import must not duplicate the unit");
    assert_eq!(fake.invoke("UseThing", vec![])?, Value::Null);
    Ok(())
}
