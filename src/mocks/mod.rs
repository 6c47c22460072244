//! Mock specifications and the instruction matcher.
//!
//! A [`Mock`] is a configured rewrite/observe action bound to a resolved
//! source member. Mocks are offered every instruction of every affected method
//! in program order; a match triggers the mock's injection routine, which
//! queues edits on the method's [`crate::assembly::BodyEmitter`].
//!
//! # Variants
//!
//! | Variant | Mutation | Purpose |
//! |---------|----------|---------|
//! | [`ReplaceMock`] | replace | Swap a call for a configured or computed return value |
//! | [`RemoveMock`] | replace | Delete the call, discarding its arguments |
//! | [`InsertMock`] | splice | Run a closure before/after a match or at a method boundary |
//! | [`VerifyMock`] | splice | Count invocations for post-execution verification |
//! | contract mocks | retarget | Re-point cross-unit references, preserving dispatch |
//!
//! All matching insert/verify mocks apply to one instruction; at most one
//! replace/remove mock may - a second is a configuration error surfaced at
//! rewrite time.
//!
//! # Matching
//!
//! An instruction matches a source member when its opcode fits the member
//! kind, its operand resolves to a member whose declaring type equals the
//! source member's declaring type or - for virtual/interface members - lies in
//! the registry's ancestors/descendants closure, and name plus parameter
//! signature agree after substituting the call site's generic arguments.
//! Argument checkers are additionally evaluated against values statically
//! available at the instruction (literal loads feeding the call); values that
//! are not statically available match vacuously and are re-checked at runtime.

mod contract;
mod insert;
mod remove;
mod replace;
mod verify;

pub use contract::{CastContract, ConstructorContract, InterfaceCallContract};
pub use insert::{InsertLocation, InsertMock};
pub use remove::RemoveMock;
pub use replace::ReplaceMock;
pub use verify::VerifyMock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    assembly::{BodyEmitter, Instruction, OpCode},
    metadata::{
        member::{MemberKind, SourceMember},
        method::Method,
        typesystem::{sigs_equal_erased, TypeRegistry, TypeSig},
        unit::CompiledUnit,
    },
    runtime::{ExecutionContext, HookTable, Value},
    Result,
};

/// Predicate over one runtime argument value, supplied per formal parameter.
///
/// The core does not implement comparison semantics; it only invokes checkers
/// in argument order, at match time against statically available values and at
/// runtime against the actual ones.
pub trait ArgumentChecker: Send + Sync {
    /// Returns true when the value satisfies the checker.
    fn check(&self, value: &Value) -> bool;

    /// Describes the checker for diagnostics.
    fn description(&self) -> String;
}

impl<F> ArgumentChecker for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn check(&self, value: &Value) -> bool {
        self(value)
    }

    fn description(&self) -> String {
        "predicate".to_string()
    }
}

/// Everything a mock can see while matching or injecting at one instruction.
pub struct MatchContext<'a> {
    /// The unit being rewritten
    pub unit: &'a CompiledUnit,
    /// The session's type registry
    pub registry: &'a TypeRegistry,
    /// The method whose body is being scanned
    pub method: &'a Method,
    /// The original instruction stream of that body
    pub instructions: &'a [Instruction],
    /// Index of the instruction on offer
    pub index: usize,
}

impl MatchContext<'_> {
    /// The instruction on offer.
    #[must_use]
    pub fn instruction(&self) -> &Instruction {
        &self.instructions[self.index]
    }
}

/// A configured rewrite/observe action bound to a source member.
pub trait Mock: Send + Sync {
    /// Short description for diagnostics.
    fn description(&self) -> String;

    /// The targeted source member, absent only for boundary inserts and
    /// contract mocks.
    fn source_member(&self) -> Option<&SourceMember> {
        None
    }

    /// Replace/remove mocks are mutually exclusive per instruction.
    fn is_mutating(&self) -> bool {
        false
    }

    /// Binds runtime behavior into the session's hook table.
    ///
    /// Called once per session before rewriting; injections reference the
    /// bound hook id.
    fn bind(&self, hooks: &HookTable) {
        let _ = hooks;
    }

    /// The runtime state created by [`Mock::bind`], when the mock has any.
    fn execution_context(&self) -> Option<Arc<ExecutionContext>> {
        None
    }

    /// Whether the instruction on offer is an occurrence of this mock's
    /// source member.
    fn is_source_instruction(&self, ctx: &MatchContext<'_>) -> bool;

    /// Called once per method before the first injection in that method.
    fn before_injection(&self, emitter: &mut BodyEmitter) -> Result<()> {
        let _ = emitter;
        Ok(())
    }

    /// Queues this mock's edit for the matched instruction.
    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()>;

    /// Called once per method after the last injection in that method.
    fn after_injection(&self, emitter: &mut BodyEmitter) -> Result<()> {
        let _ = emitter;
        Ok(())
    }

    /// Records that the mock matched at least once.
    fn mark_matched(&self);

    /// Whether the mock ever matched, surfaced for diagnostics after rewriting.
    fn was_matched(&self) -> bool;
}

/// Insertion-ordered set of mock specifications for one fake session.
///
/// Mutable only during configuration; the session consumes the collection
/// before rewriting, freezing it.
#[derive(Default)]
pub struct MockCollection {
    mocks: Vec<Arc<dyn Mock>>,
}

impl MockCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mock specification.
    pub fn add<M: Mock + 'static>(&mut self, mock: M) {
        self.mocks.push(Arc::new(mock));
    }

    /// Appends an already shared mock specification.
    pub fn add_shared(&mut self, mock: Arc<dyn Mock>) {
        self.mocks.push(mock);
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Mock>> {
        self.mocks.iter()
    }

    /// Number of configured mocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    /// Returns true when nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<Arc<dyn Mock>> {
        self.mocks
    }
}

/// Latched "was ever matched" flag shared by all mock variants.
#[derive(Default)]
pub(crate) struct Matched(AtomicBool);

impl Matched {
    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Core member-vs-instruction matching shared by all member-bound variants.
pub(crate) fn member_matches(member: &SourceMember, ctx: &MatchContext<'_>) -> bool {
    let instruction = ctx.instruction();
    let kind_fits = match member.kind {
        MemberKind::Method | MemberKind::PropertyGet | MemberKind::PropertySet => {
            matches!(instruction.opcode, OpCode::Call | OpCode::CallVirt)
        }
        MemberKind::Field => matches!(instruction.opcode, OpCode::LdFld | OpCode::StFld),
        MemberKind::Constructor => instruction.opcode == OpCode::NewObj,
    };
    if !kind_fits {
        return false;
    }

    let Some(operand_token) = instruction.operand.token() else {
        return false;
    };
    let Some(target) = ctx.unit.resolve_ref(operand_token) else {
        return false;
    };

    if member.kind == MemberKind::Field {
        let Some(field) = ctx.registry.get_field(&target) else {
            return false;
        };
        return field.name == member.name && field.declaring_type == member.declaring_type;
    }

    let Some(callee) = ctx.registry.get_method(&target) else {
        return false;
    };
    if callee.name != member.name {
        return false;
    }

    let declaring_related = callee.declaring_type == member.declaring_type
        || (member.is_virtual
            && ctx
                .registry
                .ancestors_and_descendants(member.declaring_type)
                .map(|closure| closure.contains(&callee.declaring_type))
                .unwrap_or(false));
    if !declaring_related {
        return false;
    }

    // The site's generic arguments close over both sides: the callee row and
    // the member's formal parameters name the same declaration, so open
    // parameters must be substituted consistently before comparing.
    let site_args = instruction.operand.generic_args();
    let callee_params: Vec<TypeSig> = callee
        .params
        .iter()
        .map(|param| param.substitute(site_args))
        .collect();
    let member_params: Vec<TypeSig> = member
        .params
        .iter()
        .map(|param| param.substitute(site_args))
        .collect();
    if !sigs_equal_erased(&callee_params, &member_params) {
        return false;
    }

    // A constructor expression with bound type arguments distinguishes
    // New<int>() from New<string>() occurring in the same body.
    if member.kind == MemberKind::Constructor && !member.generic_args.is_empty() {
        return site_args == member.generic_args.as_slice();
    }

    true
}

/// Argument values statically available at a call instruction.
///
/// Only the trivial case is decided statically: every formal argument fed by a
/// single-instruction literal load directly preceding the call. Anything else
/// yields `None` and the checkers are deferred to runtime.
#[must_use]
pub(crate) fn literal_arguments(ctx: &MatchContext<'_>, count: usize) -> Option<Vec<Value>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if ctx.index < count {
        return None;
    }
    let window = &ctx.instructions[ctx.index - count..ctx.index];
    let mut values = Vec::with_capacity(count);
    for instruction in window {
        if !instruction.is_literal_load() {
            return None;
        }
        values.push(match &instruction.operand {
            crate::assembly::Operand::Int32(value) => Value::I32(*value),
            crate::assembly::Operand::Int64(value) => Value::I64(*value),
            crate::assembly::Operand::Float64(value) => Value::F64(*value),
            crate::assembly::Operand::Str(value) => Value::str(value),
            _ => Value::Null,
        });
    }
    Some(values)
}

/// Match-time argument checking against statically available values.
pub(crate) fn checkers_accept_statically(
    checkers: &[Arc<dyn ArgumentChecker>],
    ctx: &MatchContext<'_>,
) -> bool {
    if checkers.is_empty() {
        return true;
    }
    match literal_arguments(ctx, checkers.len()) {
        Some(values) => checkers
            .iter()
            .zip(values.iter())
            .all(|(checker, value)| checker.check(value)),
        None => true,
    }
}

/// Validates a checker list against the member's formal parameter count.
///
/// An empty list means "match any arguments present"; a non-empty list must
/// cover every formal parameter.
pub(crate) fn validate_checkers(
    member: &SourceMember,
    checkers: &[Arc<dyn ArgumentChecker>],
) -> Result<()> {
    if !checkers.is_empty() && checkers.len() != member.params.len() {
        return Err(crate::Error::Configuration(format!(
            "{} argument checkers configured for {} with {} formal parameters",
            checkers.len(),
            member,
            member.params.len()
        )));
    }
    Ok(())
}

/// Best-effort static stack depth at an instruction.
///
/// Walks the stream from entry, resolving callee-dependent effects through the
/// metadata layer. Bails out (`None`) on branches or unresolvable operands;
/// the check is a guard against obviously unsatisfiable injections, not a
/// verifier.
#[must_use]
pub(crate) fn static_depth_before(ctx: &MatchContext<'_>) -> Option<usize> {
    let mut depth: usize = 0;
    for instruction in &ctx.instructions[..ctx.index] {
        match instruction.opcode {
            OpCode::Br | OpCode::BrTrue | OpCode::BrFalse | OpCode::CallHook => return None,
            OpCode::Call | OpCode::CallVirt | OpCode::NewObj => {
                let target = ctx.unit.resolve_ref(instruction.operand.token()?)?;
                let callee = ctx.registry.get_method(&target)?;
                depth = depth.checked_sub(callee.consumed_slots())?;
                if instruction.opcode == OpCode::NewObj || !callee.return_type.is_unit() {
                    depth += 1;
                }
            }
            _ => {
                let behavior = instruction.static_stack_behavior();
                depth = depth.checked_sub(behavior.pops)?;
                depth += behavior.pushes;
            }
        }
    }
    Some(depth)
}

/// Verifies that the stack holds the slots a member-bound injection consumes.
pub(crate) fn ensure_stack_slots(ctx: &MatchContext<'_>, member: &SourceMember) -> Result<()> {
    if let Some(depth) = static_depth_before(ctx) {
        if depth < member.consumed_slots() {
            return Err(crate::Error::StackImbalance {
                method: ctx.method.token,
                index: ctx.index,
                message: format!(
                    "{} consumes {} slots but only {} are present",
                    member,
                    member.consumed_slots(),
                    depth
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{BodyAssembler, Operand};
    use crate::expr::InvocationExpr;
    use crate::metadata::method::MethodFlags;
    use crate::metadata::token::Token;
    use crate::metadata::typesystem::TypeFlavor;

    struct Fixture {
        unit: CompiledUnit,
        registry: TypeRegistry,
        ty: Token,
        helper: Token,
        caller: Token,
    }

    fn fixture() -> Fixture {
        let unit = CompiledUnit::new("Match.Tests");
        let ty = unit.add_type("Match", "Widget", TypeFlavor::Class);
        let helper = unit.add_method(
            ty,
            "Helper",
            MethodFlags::STATIC,
            vec![TypeSig::I32],
            TypeSig::I32,
        );
        unit.set_body(
            helper,
            BodyAssembler::new().ldarg(0).ret().finish(),
        );
        let caller = unit.add_method(ty, "Caller", MethodFlags::STATIC, vec![], TypeSig::I32);
        unit.set_body(
            caller,
            BodyAssembler::new().ldc_i4(5).call(helper).ret().finish(),
        );

        let registry = TypeRegistry::new();
        registry.register_unit(&unit);
        Fixture {
            unit,
            registry,
            ty,
            helper,
            caller,
        }
    }

    fn resolve_helper(fixture: &Fixture) -> SourceMember {
        crate::expr::source_member(
            &InvocationExpr::MethodCall {
                declaring_type: fixture.ty,
                name: "Helper".to_string(),
                args: vec![crate::expr::CapturedArg::literal(0, Value::I32(5))],
            },
            &fixture.registry,
        )
        .unwrap()
    }

    fn context_at<'a>(
        fixture: &'a Fixture,
        method: &'a crate::metadata::method::Method,
        instructions: &'a [Instruction],
        index: usize,
    ) -> MatchContext<'a> {
        MatchContext {
            unit: &fixture.unit,
            registry: &fixture.registry,
            method,
            instructions,
            index,
        }
    }

    #[test]
    fn test_member_matches_call_site() {
        let fixture = fixture();
        let member = resolve_helper(&fixture);
        let method = fixture.unit.get_method(fixture.caller).unwrap();
        let body = fixture.unit.body(fixture.caller).unwrap();

        let at_call = context_at(&fixture, &method, &body.instructions, 1);
        assert!(member_matches(&member, &at_call));

        let at_literal = context_at(&fixture, &method, &body.instructions, 0);
        assert!(!member_matches(&member, &at_literal));
    }

    #[test]
    fn test_member_matches_rejects_other_member() {
        let fixture = fixture();
        let mut member = resolve_helper(&fixture);
        member.name = "Other".to_string();
        let method = fixture.unit.get_method(fixture.caller).unwrap();
        let body = fixture.unit.body(fixture.caller).unwrap();

        let at_call = context_at(&fixture, &method, &body.instructions, 1);
        assert!(!member_matches(&member, &at_call));
    }

    #[test]
    fn test_literal_arguments_window() {
        let fixture = fixture();
        let method = fixture.unit.get_method(fixture.caller).unwrap();
        let body = fixture.unit.body(fixture.caller).unwrap();

        let at_call = context_at(&fixture, &method, &body.instructions, 1);
        assert_eq!(literal_arguments(&at_call, 1), Some(vec![Value::I32(5)]));
        assert_eq!(literal_arguments(&at_call, 0), Some(vec![]));
        assert_eq!(literal_arguments(&at_call, 2), None);
    }

    #[test]
    fn test_generic_site_substitution() {
        let fixture = fixture();
        let generic = fixture.unit.add_type("Match", "Holder", TypeFlavor::Class);
        fixture.unit.add_generic_params(generic, &["T"]);
        let store = fixture.unit.add_method(
            generic,
            "Store",
            MethodFlags::STATIC,
            vec![TypeSig::Var(0)],
            TypeSig::Unit,
        );
        fixture.unit.set_body(store, BodyAssembler::new().ret().finish());
        let user = fixture.unit.add_method(
            fixture.ty,
            "User",
            MethodFlags::STATIC,
            vec![],
            TypeSig::Unit,
        );
        let body = BodyAssembler::new()
            .ldc_i4(1)
            .raw(Instruction::new(
                OpCode::Call,
                Operand::Spec(store, vec![TypeSig::I32]),
            ))
            .ret()
            .finish();
        fixture.unit.set_body(user, body.clone());
        fixture.registry.register_unit(&fixture.unit);

        let member = crate::expr::source_member(
            &InvocationExpr::MethodCall {
                declaring_type: generic,
                name: "Store".to_string(),
                args: vec![crate::expr::CapturedArg::literal(0, Value::I32(1))],
            },
            &fixture.registry,
        )
        .unwrap();
        let method = fixture.unit.get_method(user).unwrap();
        let at_call = context_at(&fixture, &method, &body.instructions, 1);
        assert!(member_matches(&member, &at_call));
    }

    #[test]
    fn test_validate_checkers_count() {
        let fixture = fixture();
        let member = resolve_helper(&fixture);
        let one: Vec<Arc<dyn ArgumentChecker>> = vec![Arc::new(|_: &Value| true)];
        assert!(validate_checkers(&member, &one).is_ok());
        assert!(validate_checkers(&member, &[]).is_ok());
        let two: Vec<Arc<dyn ArgumentChecker>> =
            vec![Arc::new(|_: &Value| true), Arc::new(|_: &Value| true)];
        assert!(validate_checkers(&member, &two).is_err());
    }
}
