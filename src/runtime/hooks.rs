//! Runtime hooks: the binding between injected instructions and mock behavior.
//!
//! Injection replaces or splices `call.hook` instructions whose operand is an
//! id into the session's [`HookTable`]. At execution time the interpreter pops
//! the hook's declared stack consumption, consults the gate and runtime
//! argument checkers, and either applies the hook's action or falls back to
//! the original member. Closures never enter the serialized module image;
//! only the hook id does, and the loader re-binds ids against the same
//! session table.

use std::sync::Arc;

use crate::{
    expr::ArgSource,
    metadata::{token::Token, typesystem::TypeSig},
    mocks::ArgumentChecker,
    runtime::{context::ExecutionContext, value::Value},
};

/// What an applied hook does to the operand stack.
pub enum HookAction {
    /// Push a configured stand-in value
    Return(ArgSource),
    /// Push the result of a closure over the consumed argument values
    ReturnWith(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>),
    /// Discard the consumed values; push a default when the removed call
    /// produced a value, preserving the net stack effect
    Discard {
        /// Return signature of the removed call, when it produced a value
        balance: Option<TypeSig>,
    },
    /// Run a zero-argument closure, stack-neutral
    Invoke(Arc<dyn Fn() + Send + Sync>),
    /// Only count the invocation, stack-neutral
    Count,
}

impl std::fmt::Debug for HookAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookAction::Return(_) => write!(f, "Return"),
            HookAction::ReturnWith(_) => write!(f, "ReturnWith"),
            HookAction::Discard { .. } => write!(f, "Discard"),
            HookAction::Invoke(_) => write!(f, "Invoke"),
            HookAction::Count => write!(f, "Count"),
        }
    }
}

/// The original member to execute when a hook declines to apply.
#[derive(Debug, Clone, Copy)]
pub struct FallbackCall {
    /// Definition token of the original member
    pub method: Token,
    /// The original construction site was a `newobj`
    pub is_ctor: bool,
}

/// One bound hook: action, runtime state and stack contract.
pub struct RuntimeHook {
    /// What the hook does when it applies
    pub action: HookAction,
    /// Shared runtime state: call counter, calls checker, gate
    pub context: Arc<ExecutionContext>,
    /// Operand-stack slots the hook consumes (arguments plus instance)
    pub consumes: usize,
    /// The consumed slots include a stack instance below the arguments
    pub has_instance: bool,
    /// Runtime argument checkers, in parameter order; empty matches any
    pub checkers: Vec<Arc<dyn ArgumentChecker>>,
    /// Original member to run when the gate is closed or a checker rejects
    pub fallback: Option<FallbackCall>,
}

impl RuntimeHook {
    /// Returns true when the consumed argument values pass all checkers.
    #[must_use]
    pub fn arguments_accepted(&self, args: &[Value]) -> bool {
        self.checkers
            .iter()
            .zip(args.iter())
            .all(|(checker, value)| checker.check(value))
    }
}

/// Session-scoped table binding hook ids to runtime behavior.
///
/// Append-only: ids are indices and never invalidated, so a serialized
/// `call.hook` operand stays meaningful for the lifetime of the session.
#[derive(Default)]
pub struct HookTable {
    hooks: boxcar::Vec<Arc<RuntimeHook>>,
}

impl HookTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a hook and returns its id.
    pub fn bind(&self, hook: RuntimeHook) -> u32 {
        self.hooks.push(Arc::new(hook)) as u32
    }

    /// Fetches a bound hook.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<RuntimeHook>> {
        self.hooks.get(id as usize).cloned()
    }

    /// Number of bound hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.count()
    }

    /// Returns true when no hook is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.count() == 0
    }
}
