//! Remove mocks: delete a matched call, discarding its arguments.

use std::sync::{Arc, OnceLock};

use crate::{
    assembly::{BodyEmitter, Instruction, OpCode, Operand},
    metadata::member::{MemberKind, SourceMember},
    runtime::{
        CallsChecker, ExecutionContext, FallbackCall, GatePredicate, HookAction, HookTable,
    },
    Error, Result,
};

use super::{
    checkers_accept_statically, ensure_stack_slots, member_matches, validate_checkers,
    ArgumentChecker, MatchContext, Matched, Mock,
};

/// Deletes every matched call.
///
/// The injected hook balances the stack by discarding the same argument count
/// the original consumed, including the instance reference for non-static
/// members. When the removed call produced a value, the hook pushes the
/// return type's default so downstream instructions stay well-formed. Removed
/// invocations still count toward verification.
pub struct RemoveMock {
    member: SourceMember,
    checkers: Vec<Arc<dyn ArgumentChecker>>,
    calls_checker: Option<Arc<dyn CallsChecker>>,
    gate: Option<Arc<GatePredicate>>,
    hook: OnceLock<u32>,
    context: OnceLock<Arc<ExecutionContext>>,
    matched: Matched,
}

impl RemoveMock {
    /// Removes every matched call to the member.
    #[must_use]
    pub fn new(member: SourceMember) -> Self {
        RemoveMock {
            member,
            checkers: Vec::new(),
            calls_checker: None,
            gate: None,
            hook: OnceLock::new(),
            context: OnceLock::new(),
            matched: Matched::default(),
        }
    }

    /// Restricts matching to calls whose arguments satisfy the checkers.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the checker count does not equal the
    /// member's formal parameter count.
    pub fn with_checkers(mut self, checkers: Vec<Arc<dyn ArgumentChecker>>) -> Result<Self> {
        validate_checkers(&self.member, &checkers)?;
        self.checkers = checkers;
        Ok(self)
    }

    /// Configures the expected-call-count predicate.
    #[must_use]
    pub fn expected_calls(mut self, checker: impl CallsChecker + 'static) -> Self {
        self.calls_checker = Some(Arc::new(checker));
        self
    }

    /// Applies the mock only while the gate predicate evaluates true.
    #[must_use]
    pub fn when(mut self, gate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }
}

impl Mock for RemoveMock {
    fn description(&self) -> String {
        format!("remove {}", self.member)
    }

    fn source_member(&self) -> Option<&SourceMember> {
        Some(&self.member)
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn bind(&self, hooks: &HookTable) {
        let context = Arc::new(ExecutionContext::new(
            self.calls_checker.clone(),
            self.gate.clone(),
        ));
        let balance = (!self.member.return_type.is_unit()).then(|| self.member.return_type.clone());
        let id = hooks.bind(crate::runtime::RuntimeHook {
            action: HookAction::Discard { balance },
            context: context.clone(),
            consumes: self.member.consumed_slots(),
            has_instance: self.member.has_stack_instance(),
            checkers: self.checkers.clone(),
            fallback: Some(FallbackCall {
                method: self.member.token,
                is_ctor: self.member.kind == MemberKind::Constructor,
            }),
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
        ensure_stack_slots(ctx, &self.member)?;
        let id = self
            .hook
            .get()
            .copied()
            .ok_or_else(|| Error::Execution("remove mock injected before binding".to_string()))?;
        let hook = Instruction::new(OpCode::CallHook, Operand::Hook(id));
        emitter.replace(ctx.index, vec![hook])
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}
