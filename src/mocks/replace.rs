//! Replace mocks: swap a matched call for a configured return value.

use std::sync::{Arc, OnceLock};

use crate::{
    assembly::{BodyEmitter, Instruction, OpCode, Operand},
    expr::ArgSource,
    metadata::member::{MemberKind, SourceMember},
    runtime::{
        CallsChecker, ExecutionContext, FallbackCall, GatePredicate, HookAction, HookTable, Value,
    },
    Error, Result,
};

use super::{
    checkers_accept_statically, ensure_stack_slots, member_matches, validate_checkers,
    ArgumentChecker, MatchContext, Matched, Mock,
};

enum ReplaceValue {
    Fixed(ArgSource),
    Computed(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>),
}

/// Swaps every matched call for a return of a configured value.
///
/// The injected hook pops the same number of operand-stack values the original
/// call would have consumed - including the instance for non-static members -
/// and pushes the stand-in, so downstream instructions stay well-formed. When
/// a runtime gate is closed or a runtime argument checker rejects, the
/// original member executes instead and the invocation is not counted.
pub struct ReplaceMock {
    member: SourceMember,
    value: ReplaceValue,
    checkers: Vec<Arc<dyn ArgumentChecker>>,
    calls_checker: Option<Arc<dyn CallsChecker>>,
    gate: Option<Arc<GatePredicate>>,
    hook: OnceLock<u32>,
    context: OnceLock<Arc<ExecutionContext>>,
    matched: Matched,
}

impl ReplaceMock {
    /// Replaces matched calls with a fixed value.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the member has no return value - there is
    /// nothing a stand-in could replace.
    pub fn returns(member: SourceMember, value: Value) -> Result<Self> {
        Self::with_value(member, ReplaceValue::Fixed(ArgSource::Literal(value)))
    }

    /// Replaces matched calls with a value produced lazily per invocation.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the member has no return value.
    pub fn returns_lazy(
        member: SourceMember,
        producer: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::with_value(member, ReplaceValue::Fixed(ArgSource::Producer(Arc::new(producer))))
    }

    /// Replaces matched calls with an argument-driven value, for
    /// non-deterministic stand-ins.
    ///
    /// The closure receives the runtime argument values in parameter order.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the member has no return value.
    pub fn returns_with(
        member: SourceMember,
        compute: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::with_value(member, ReplaceValue::Computed(Arc::new(compute)))
    }

    fn with_value(member: SourceMember, value: ReplaceValue) -> Result<Self> {
        if member.kind != MemberKind::Constructor && member.return_type.is_unit() {
            return Err(Error::Configuration(format!(
                "replace mock configured against {member}, which has no return value"
            )));
        }
        Ok(ReplaceMock {
            member,
            value,
            checkers: Vec::new(),
            calls_checker: None,
            gate: None,
            hook: OnceLock::new(),
            context: OnceLock::new(),
            matched: Matched::default(),
        })
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

    fn hook_id(&self) -> Result<u32> {
        self.hook
            .get()
            .copied()
            .ok_or_else(|| Error::Execution("replace mock injected before binding".to_string()))
    }
}

impl Mock for ReplaceMock {
    fn description(&self) -> String {
        format!("replace {}", self.member)
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
        let action = match &self.value {
            ReplaceValue::Fixed(source) => HookAction::Return(source.clone()),
            ReplaceValue::Computed(compute) => HookAction::ReturnWith(compute.clone()),
        };
        let id = hooks.bind(crate::runtime::RuntimeHook {
            action,
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
        let hook = Instruction::new(OpCode::CallHook, Operand::Hook(self.hook_id()?));
        emitter.replace(ctx.index, vec![hook])
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}
