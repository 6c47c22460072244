//! Execution environment for loaded modules.
//!
//! This module provides a controlled, in-process execution environment for
//! rewritten compiled units: loaded modules with their static field slots, the
//! hook table binding injected instructions to runtime behavior, per-mock
//! execution contexts, and a stack-machine [`Interpreter`] driving method
//! bodies.
//!
//! # Key Components
//! - [`LoadedModule`] - A loaded unit plus statics, hooks and pool access
//! - [`HookTable`], [`RuntimeHook`] - Injected-instruction runtime binding
//! - [`ExecutionContext`] - Per-mock call counting, gating and verification
//! - [`Interpreter`] - Bytecode execution with virtual dispatch
//! - [`Value`] - The runtime value union

mod context;
mod hooks;
mod interpreter;
mod value;

pub use context::{CallsChecker, ExecutionContext, ExpectedCalls, GatePredicate};
pub use hooks::{FallbackCall, HookAction, HookTable, RuntimeHook};
pub use interpreter::{EvalLimits, Interpreter};
pub use value::{ObjectData, ObjectRef, Value};

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    assembly::MethodBody,
    metadata::{
        method::{FieldDef, Method},
        pool::UnitPool,
        token::Token,
        typesystem::UnitTypeRc,
        unit::CompiledUnit,
    },
    Error, Result,
};

/// A compiled unit loaded into the execution environment.
///
/// Holds the runnable metadata, the static field slots, and handles to the
/// session's hook table and the process-wide unit pool for resolving
/// cross-unit references at execution time.
pub struct LoadedModule {
    unit: CompiledUnit,
    statics: DashMap<u32, Value>,
    hooks: Arc<HookTable>,
    pool: Arc<UnitPool>,
}

impl LoadedModule {
    pub(crate) fn new(unit: CompiledUnit, hooks: Arc<HookTable>, pool: Arc<UnitPool>) -> Self {
        LoadedModule {
            unit,
            statics: DashMap::new(),
            hooks,
            pool,
        }
    }

    /// The loaded unit's metadata.
    #[must_use]
    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }

    /// The session's hook table.
    #[must_use]
    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// Assigns a static field slot.
    pub fn set_static(&self, field: Token, value: Value) {
        self.statics.insert(field.value(), value);
    }

    /// Reads a static field slot.
    #[must_use]
    pub fn static_value(&self, field: Token) -> Option<Value> {
        self.statics.get(&field.value()).map(|e| e.value().clone())
    }

    /// Chases reference rows to a definition token.
    pub(crate) fn resolve(&self, token: Token) -> Result<Token> {
        if let Some(target) = self.unit.resolve_ref(token) {
            return Ok(target);
        }
        if self.pool.find_defining_unit(token).is_some() {
            return Ok(token);
        }
        Err(Error::MemberNotFound(format!(
            "token {token} resolves to no definition in the loaded unit or the pool"
        )))
    }

    /// Looks up a method definition, falling back to pooled units.
    pub(crate) fn method_def(&self, token: Token) -> Result<Arc<Method>> {
        if let Some(method) = self.unit.get_method(token) {
            return Ok(method);
        }
        self.pool
            .find_defining_unit(token)
            .and_then(|unit| unit.get_method(token))
            .ok_or_else(|| Error::MemberNotFound(format!("method {token} is not loaded")))
    }

    /// Looks up a method body, falling back to pooled units.
    pub(crate) fn body_of(&self, token: Token) -> Option<MethodBody> {
        self.unit.body(token).or_else(|| {
            self.pool
                .find_defining_unit(token)
                .and_then(|unit| unit.body(token))
        })
    }

    /// Looks up a type definition, falling back to pooled units.
    pub(crate) fn type_of(&self, token: Token) -> Result<UnitTypeRc> {
        if let Some(ty) = self.unit.get_type(token) {
            return Ok(ty);
        }
        self.pool
            .find_defining_unit(token)
            .and_then(|unit| unit.get_type(token))
            .ok_or(Error::TypeNotFound(token))
    }

    /// Looks up a field definition, falling back to pooled units.
    pub(crate) fn field_of(&self, token: Token) -> Result<Arc<FieldDef>> {
        if let Some(field) = self.unit.get_field(token) {
            return Ok(field);
        }
        self.pool
            .find_defining_unit(token)
            .and_then(|unit| unit.get_field(token))
            .ok_or_else(|| Error::MemberNotFound(format!("field {token} is not loaded")))
    }

    /// Finds a method by name on a loaded type.
    ///
    /// # Errors
    /// [`Error::MemberNotFound`] when no method of that name is declared.
    pub fn find_method(&self, type_token: Token, name: &str) -> Result<Token> {
        let ty = self.type_of(type_token)?;
        for (_, method_token) in ty.methods.iter() {
            if let Ok(method) = self.method_def(*method_token) {
                if method.name == name {
                    return Ok(method.token);
                }
            }
        }
        Err(Error::MemberNotFound(format!(
            "method {name} not found on {}",
            ty.fullname()
        )))
    }

    /// Invokes a loaded method with default limits.
    ///
    /// # Errors
    /// Any [`Error::Execution`] fault raised by the interpreter.
    pub fn invoke(&self, method: Token, this: Option<Value>, args: Vec<Value>) -> Result<Value> {
        Interpreter::new(self).invoke(method, this, args)
    }
}
