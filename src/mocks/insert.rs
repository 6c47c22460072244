//! Insert mocks: splice a closure invocation into a method body.

use std::sync::{Arc, OnceLock};

use crate::{
    assembly::{BodyEmitter, Instruction, OpCode, Operand},
    metadata::{member::SourceMember, token::Token},
    runtime::{ExecutionContext, HookAction, HookTable},
    Error, Result,
};

use super::{member_matches, MatchContext, Matched, Mock};

/// Where an insert lands relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertLocation {
    /// Immediately before the anchor
    Before,
    /// Immediately after the anchor
    After,
}

enum InsertAnchor {
    /// Every instruction matching a source member
    Member(SourceMember),
    /// The entry of a named method
    MethodEntry(Token),
    /// Every return path of a named method
    MethodExit(Token),
}

/// Splices a zero-argument closure invocation at the chosen location.
///
/// The injected hook is stack-neutral; the closure executes fully before
/// control resumes. Member-anchored inserts fire around every matched
/// instruction, boundary inserts at the entry or exit of one named method.
pub struct InsertMock {
    anchor: InsertAnchor,
    location: InsertLocation,
    closure: Arc<dyn Fn() + Send + Sync>,
    hook: OnceLock<u32>,
    context: OnceLock<Arc<ExecutionContext>>,
    matched: Matched,
}

impl InsertMock {
    /// Runs the closure immediately before every matched call.
    #[must_use]
    pub fn before(member: SourceMember, closure: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_anchor(InsertAnchor::Member(member), InsertLocation::Before, closure)
    }

    /// Runs the closure immediately after every matched call.
    #[must_use]
    pub fn after(member: SourceMember, closure: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_anchor(InsertAnchor::Member(member), InsertLocation::After, closure)
    }

    /// Runs the closure when the named method is entered.
    #[must_use]
    pub fn at_entry(method: Token, closure: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_anchor(
            InsertAnchor::MethodEntry(method),
            InsertLocation::Before,
            closure,
        )
    }

    /// Runs the closure before every return of the named method.
    #[must_use]
    pub fn at_exit(method: Token, closure: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_anchor(
            InsertAnchor::MethodExit(method),
            InsertLocation::Before,
            closure,
        )
    }

    fn with_anchor(
        anchor: InsertAnchor,
        location: InsertLocation,
        closure: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        InsertMock {
            anchor,
            location,
            closure: Arc::new(closure),
            hook: OnceLock::new(),
            context: OnceLock::new(),
            matched: Matched::default(),
        }
    }
}

impl Mock for InsertMock {
    fn description(&self) -> String {
        match &self.anchor {
            InsertAnchor::Member(member) => format!("insert {:?} {}", self.location, member),
            InsertAnchor::MethodEntry(method) => format!("insert at entry of {method}"),
            InsertAnchor::MethodExit(method) => format!("insert at exit of {method}"),
        }
    }

    fn source_member(&self) -> Option<&SourceMember> {
        match &self.anchor {
            InsertAnchor::Member(member) => Some(member),
            _ => None,
        }
    }

    fn bind(&self, hooks: &HookTable) {
        let context = Arc::new(ExecutionContext::new(None, None));
        let id = hooks.bind(crate::runtime::RuntimeHook {
            action: HookAction::Invoke(self.closure.clone()),
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
        match &self.anchor {
            InsertAnchor::Member(member) => member_matches(member, ctx),
            InsertAnchor::MethodEntry(method) => ctx.method.token == *method && ctx.index == 0,
            InsertAnchor::MethodExit(method) => {
                ctx.method.token == *method && ctx.instruction().opcode == OpCode::Ret
            }
        }
    }

    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()> {
        let id = self
            .hook
            .get()
            .copied()
            .ok_or_else(|| Error::Execution("insert mock injected before binding".to_string()))?;
        let hook = vec![Instruction::new(OpCode::CallHook, Operand::Hook(id))];
        match (&self.anchor, self.location) {
            // Exits splice ahead of the return regardless of the nominal location.
            (InsertAnchor::MethodExit(_), _) | (_, InsertLocation::Before) => {
                emitter.insert_before(ctx.index, hook)
            }
            (_, InsertLocation::After) => emitter.insert_after(ctx.index, hook),
        }
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}
