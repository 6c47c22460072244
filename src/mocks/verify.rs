//! Verify mocks: count matched invocations without mutating their behavior.

use std::sync::{Arc, OnceLock};

use crate::{
    assembly::{BodyEmitter, Instruction, OpCode, Operand},
    metadata::member::SourceMember,
    runtime::{CallsChecker, ExecutionContext, GatePredicate, HookAction, HookTable},
    Error, Result,
};

use super::{
    checkers_accept_statically, member_matches, validate_checkers, ArgumentChecker, MatchContext,
    Matched, Mock,
};

/// Asserts an expected call count after execution.
///
/// The matched instruction executes unchanged; the mock only wraps it with a
/// stack-neutral counting hook against its execution context, checked by
/// [`crate::runtime::ExecutionContext::verify`] after the test body completes.
pub struct VerifyMock {
    member: SourceMember,
    calls_checker: Arc<dyn CallsChecker>,
    checkers: Vec<Arc<dyn ArgumentChecker>>,
    gate: Option<Arc<GatePredicate>>,
    hook: OnceLock<u32>,
    context: OnceLock<Arc<ExecutionContext>>,
    matched: Matched,
}

impl VerifyMock {
    /// Verifies that the member is called as the checker demands.
    #[must_use]
    pub fn new(member: SourceMember, calls_checker: impl CallsChecker + 'static) -> Self {
        VerifyMock {
            member,
            calls_checker: Arc::new(calls_checker),
            checkers: Vec::new(),
            gate: None,
            hook: OnceLock::new(),
            context: OnceLock::new(),
            matched: Matched::default(),
        }
    }

    /// Counts only calls whose arguments satisfy the checkers.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the checker count does not equal the
    /// member's formal parameter count.
    pub fn with_checkers(mut self, checkers: Vec<Arc<dyn ArgumentChecker>>) -> Result<Self> {
        validate_checkers(&self.member, &checkers)?;
        self.checkers = checkers;
        Ok(self)
    }

    /// Counts only while the gate predicate evaluates true.
    #[must_use]
    pub fn when(mut self, gate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }
}

impl Mock for VerifyMock {
    fn description(&self) -> String {
        format!("verify {}", self.member)
    }

    fn source_member(&self) -> Option<&SourceMember> {
        Some(&self.member)
    }

    fn bind(&self, hooks: &HookTable) {
        let context = Arc::new(ExecutionContext::new(
            Some(self.calls_checker.clone()),
            self.gate.clone(),
        ));
        let id = hooks.bind(crate::runtime::RuntimeHook {
            action: HookAction::Count,
            context: context.clone(),
            consumes: 0,
            has_instance: false,
            checkers: vec![],
            fallback: None,
        });
        let _ = self.hook.set(id);
        let _ = self.context.set(context);
    }

    fn execution_context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.get().cloned()
    }

    fn is_source_instruction(&self, ctx: &MatchContext<'_>) -> bool {
        member_matches(&self.member, ctx) && checkers_accept_statically(&self.checkers, ctx)
    }

    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()> {
        let id = self
            .hook
            .get()
            .copied()
            .ok_or_else(|| Error::Execution("verify mock injected before binding".to_string()))?;
        emitter.insert_before(
            ctx.index,
            vec![Instruction::new(OpCode::CallHook, Operand::Hook(id))],
        )
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}
