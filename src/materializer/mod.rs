//! Materialization: from a rewritten unit to a live, instrumented object.
//!
//! The pipeline is strictly ordered: (1) the processor appends the state
//! holder fields the mocks require to the rewritten type, (2) the mutated unit
//! is serialized into an in-memory module image, (3) the image is loaded into
//! the execution environment and bound against the session's hook table,
//! (4) an instance of the rewritten source type is constructed with the
//! caller-supplied dependencies, (5) the caller receives a [`FakeObjectInfo`].
//!
//! Every failure in this pipeline is fatal and non-recoverable for the
//! session - there is no partial-success state. A caller may retry only by
//! constructing a new session.

mod loader;
mod writer;

pub use loader::read_unit;
pub use writer::write_unit;

use std::sync::Arc;

use crate::{
    metadata::{
        diagnostics::Diagnostics,
        method::FieldFlags,
        pool::UnitPool,
        token::Token,
        typesystem::TypeSig,
        unit::CompiledUnit,
    },
    mocks::Mock,
    runtime::{ExecutionContext, HookTable, LoadedModule, ObjectData, Value},
    Error, Result,
};

/// The terminal artifact of a fake session: the live instance plus the
/// original source type descriptor and everything needed to drive and verify
/// it.
pub struct FakeObjectInfo {
    instance: Option<Value>,
    source_type: Token,
    source_type_name: String,
    module: Arc<LoadedModule>,
    contexts: Vec<(String, Arc<ExecutionContext>)>,
    diagnostics: Arc<Diagnostics>,
}

impl FakeObjectInfo {
    /// The materialized instance; `None` for static-only scenarios.
    #[must_use]
    pub fn instance(&self) -> Option<&Value> {
        self.instance.as_ref()
    }

    /// Token of the original source type.
    #[must_use]
    pub fn source_type(&self) -> Token {
        self.source_type
    }

    /// Full name of the original source type.
    #[must_use]
    pub fn source_type_name(&self) -> &str {
        &self.source_type_name
    }

    /// The loaded module backing this fake.
    #[must_use]
    pub fn module(&self) -> &LoadedModule {
        &self.module
    }

    /// Invokes a method of the source type by name.
    ///
    /// Instance methods receive the materialized instance; static methods
    /// ignore it.
    ///
    /// # Errors
    /// [`Error::MemberNotFound`] for an unknown name, plus any execution
    /// fault.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let method = self.module.find_method(self.source_type, name)?;
        let definition = self.module.method_def(method)?;
        let this = if definition.is_static() {
            None
        } else {
            Some(self.instance.clone().ok_or_else(|| {
                Error::Execution(format!("{name} is an instance method but no instance exists"))
            })?)
        };
        self.module.invoke(method, this, args)
    }

    /// The execution contexts created for this materialization, labeled by
    /// their mock's description, in configuration order.
    #[must_use]
    pub fn execution_contexts(&self) -> &[(String, Arc<ExecutionContext>)] {
        &self.contexts
    }

    /// Checks every configured expected-call predicate.
    ///
    /// # Errors
    /// The first [`Error::Verification`] failure, in configuration order.
    pub fn verify(&self) -> Result<()> {
        for (_, context) in &self.contexts {
            context.verify()?;
        }
        Ok(())
    }

    /// Diagnostics collected during the session that produced this fake.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl std::fmt::Debug for FakeObjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FakeObjectInfo({}, instance: {})",
            self.source_type_name,
            self.instance.is_some()
        )
    }
}

/// Runs the materialization pipeline over a fully rewritten unit.
pub(crate) fn materialize(
    unit: &CompiledUnit,
    source_type: Token,
    ctor_args: Vec<Value>,
    mocks: &[Arc<dyn Mock>],
    hooks: Arc<HookTable>,
    pool: Arc<UnitPool>,
    diagnostics: Arc<Diagnostics>,
) -> Result<FakeObjectInfo> {
    let source_type_name = unit
        .get_type(source_type)
        .ok_or(Error::TypeNotFound(source_type))?
        .fullname();

    // Processor step: one synthesized static slot per bound hook. The slots
    // travel through the image as ordinary metadata and are assigned their
    // hook handles after the load.
    let mut state_fields = Vec::with_capacity(hooks.len());
    for id in 0..hooks.len() {
        let field = unit.add_field(
            source_type,
            &format!("<fake>state_{id}"),
            TypeSig::I32,
            FieldFlags::STATIC | FieldFlags::SYNTHESIZED,
        );
        state_fields.push(field);
    }
    if !state_fields.is_empty() {
        diagnostics.info(
            crate::metadata::diagnostics::DiagnosticCategory::Materialization,
            format!("appended {} state holder fields", state_fields.len()),
        );
    }

    let image = write_unit(unit);
    let loaded_unit = read_unit(&image)?;
    let module = Arc::new(LoadedModule::new(loaded_unit, hooks, pool));

    for (id, field) in state_fields.iter().enumerate() {
        module.set_static(*field, Value::I32(id as i32));
    }

    let instance = construct_instance(&module, source_type, ctor_args)?;

    let contexts = mocks
        .iter()
        .filter_map(|mock| {
            mock.execution_context()
                .map(|context| (mock.description(), context))
        })
        .collect();

    Ok(FakeObjectInfo {
        instance,
        source_type,
        source_type_name,
        module,
        contexts,
        diagnostics,
    })
}

fn construct_instance(
    module: &LoadedModule,
    source_type: Token,
    ctor_args: Vec<Value>,
) -> Result<Option<Value>> {
    match module.find_method(source_type, ".ctor") {
        Ok(ctor) => {
            let object = ObjectData::new(source_type);
            let this = Value::Object(object);
            module
                .invoke(ctor, Some(this.clone()), ctor_args)
                .map_err(|error| {
                    Error::Materialization(format!(
                        "constructing the rewritten source type failed: {error}"
                    ))
                })?;
            Ok(Some(this))
        }
        Err(_) => {
            if ctor_args.is_empty() {
                Ok(None)
            } else {
                Err(Error::Materialization(
                    "constructor dependencies supplied but the source type has no constructor"
                        .to_string(),
                ))
            }
        }
    }
}
