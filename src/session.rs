//! Fake sessions: configuration, rewrite and materialization of one fake.
//!
//! A [`FakeSession`] owns one rewrite: the target unit, the accessible
//! reference units, the mock collection (mutable only until
//! [`FakeSession::execute`] consumes it), the session hook table and the
//! process-wide unit pool. Executing the session runs the whole pipeline -
//! bind hooks, insert contract mocks, rewrite the affected call graph,
//! report never-matched mocks, materialize - and returns the
//! [`FakeObjectInfo`].
//!
//! Rewriting a session is single-threaded and synchronous; only the unit pool
//! and the type registry are shared with concurrently executing sessions.

use std::sync::Arc;

use crate::{
    expr::InvocationExpr,
    materializer::{materialize, FakeObjectInfo},
    metadata::{
        diagnostics::{DiagnosticCategory, Diagnostics},
        member::SourceMember,
        pool::UnitPool,
        token::Token,
        typesystem::TypeRegistry,
        unit::CompiledUnit,
    },
    mocks::{
        CastContract, ConstructorContract, InterfaceCallContract, Mock, MockCollection,
    },
    rewriter::Rewriter,
    runtime::{HookTable, Value},
    Error, Result,
};

/// One rewrite session producing one fake object.
pub struct FakeSession {
    unit: Arc<CompiledUnit>,
    externals: Vec<Arc<CompiledUnit>>,
    registry: Arc<TypeRegistry>,
    pool: Arc<UnitPool>,
    hooks: Arc<HookTable>,
    mocks: MockCollection,
    diagnostics: Arc<Diagnostics>,
}

impl FakeSession {
    /// Creates a session over the target unit, sharing the process-wide pool.
    #[must_use]
    pub fn new(unit: CompiledUnit) -> Self {
        Self::with_pool(unit, UnitPool::global())
    }

    /// Creates a session over the target unit with an explicit pool.
    #[must_use]
    pub fn with_pool(unit: CompiledUnit, pool: Arc<UnitPool>) -> Self {
        let registry = TypeRegistry::new();
        registry.register_unit(&unit);
        FakeSession {
            unit: Arc::new(unit),
            externals: Vec::new(),
            registry: Arc::new(registry),
            pool,
            hooks: Arc::new(HookTable::new()),
            mocks: MockCollection::new(),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    /// Registers another accessible unit whose definitions the target may
    /// reference.
    pub fn reference(&mut self, unit: CompiledUnit) {
        self.registry.register_unit(&unit);
        self.externals.push(Arc::new(unit));
    }

    /// The session's type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Resolves an invocation expression against the session's metadata.
    ///
    /// # Errors
    /// [`Error::Resolution`] when the expression cannot be resolved.
    pub fn resolve(&self, expr: &InvocationExpr) -> Result<SourceMember> {
        crate::expr::source_member(expr, &self.registry)
    }

    /// The mock collection, mutable during configuration.
    pub fn mocks_mut(&mut self) -> &mut MockCollection {
        &mut self.mocks
    }

    /// Rewrites the call graph of `target_method` and materializes the fake.
    ///
    /// Consuming the session freezes the mock collection; mocks configured
    /// after this point would belong to a new session.
    ///
    /// # Errors
    /// Any configuration, matching, injection, cross-unit or materialization
    /// error. All are fatal for the session.
    pub fn execute(self, target_method: Token, ctor_args: Vec<Value>) -> Result<FakeObjectInfo> {
        let target = self
            .registry
            .get_method(&target_method)
            .ok_or_else(|| {
                Error::Resolution(format!("target method {target_method} is not registered"))
            })?;
        let source_type = target.declaring_type;

        let mut mocks: Vec<Arc<dyn Mock>> = self.mocks.into_inner();
        let user_mock_count = mocks.len();
        for mock in &mocks {
            mock.bind(&self.hooks);
        }

        // Contract mocks reconcile every reference that crosses a unit
        // boundary; they are inserted automatically, never user-authored.
        mocks.push(Arc::new(InterfaceCallContract::new(
            self.pool.clone(),
            self.externals.clone(),
        )));
        mocks.push(Arc::new(ConstructorContract::value_types(
            self.pool.clone(),
            self.externals.clone(),
        )));
        mocks.push(Arc::new(ConstructorContract::reference_types(
            self.pool.clone(),
            self.externals.clone(),
        )));
        mocks.push(Arc::new(CastContract::new(
            self.pool.clone(),
            self.externals.clone(),
        )));

        Rewriter::new(
            &self.registry,
            self.unit.clone(),
            self.externals.clone(),
            &mocks,
        )
        .rewrite(target_method)?;

        for mock in mocks.iter().take(user_mock_count) {
            if !mock.was_matched() {
                self.diagnostics.warning(
                    DiagnosticCategory::Rewrite,
                    format!(
                        "{} never matched an instruction; wrong expression or unreachable call path",
                        mock.description()
                    ),
                );
            }
        }

        materialize(
            &self.unit,
            source_type,
            ctor_args,
            &mocks[..user_mock_count],
            self.hooks.clone(),
            self.pool.clone(),
            self.diagnostics.clone(),
        )
    }
}

impl std::fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FakeSession({}, {} mocks, {} reference units)",
            self.unit.name(),
            self.mocks.len(),
            self.externals.len()
        )
    }
}
