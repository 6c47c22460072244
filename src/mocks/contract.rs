//! Contract mocks: cross-unit reference reconciliation.
//!
//! Contract mocks are not user-authored. The session inserts them whenever a
//! rewritten unit references definitions that live in another compiled unit -
//! part of a type's behavior in one unit, part in another. Their injection is
//! always "re-point the operand at the equivalent member imported into the
//! unit actually being executed" - never a removal or value substitution -
//! because their only job is referential correctness, not behavior change.
//!
//! Matching is purely on operand type identity; argument checkers do not
//! apply. The home unit of a referenced definition is registered into the
//! process-wide [`UnitPool`] on first import, so concurrent sessions importing
//! overlapping units stay consistent.

use std::sync::Arc;

use crate::{
    assembly::{BodyEmitter, OpCode, Operand},
    metadata::{pool::UnitPool, token::Token, typesystem::TypeFlavor, unit::CompiledUnit},
    Error, Result,
};

use super::{MatchContext, Matched, Mock};

fn rebuilt_operand(original: &Operand, token: Token) -> Operand {
    match original {
        Operand::Spec(_, args) => Operand::Spec(token, args.clone()),
        _ => Operand::Token(token),
    }
}

fn find_home(
    externals: &[Arc<CompiledUnit>],
    token: Token,
) -> Result<Arc<CompiledUnit>> {
    externals
        .iter()
        .find(|unit| unit.defines(token))
        .cloned()
        .ok_or_else(|| {
            Error::CrossUnit(format!(
                "definition {token} is not provided by any accessible unit"
            ))
        })
}

/// Re-points interface calls at members imported into the executing unit.
pub struct InterfaceCallContract {
    pool: Arc<UnitPool>,
    externals: Vec<Arc<CompiledUnit>>,
    matched: Matched,
}

impl InterfaceCallContract {
    /// Creates the contract over the session's accessible units.
    #[must_use]
    pub fn new(pool: Arc<UnitPool>, externals: Vec<Arc<CompiledUnit>>) -> Self {
        InterfaceCallContract {
            pool,
            externals,
            matched: Matched::default(),
        }
    }
}

impl Mock for InterfaceCallContract {
    fn description(&self) -> String {
        "contract: interface call rewrite".to_string()
    }

    fn is_source_instruction(&self, ctx: &MatchContext<'_>) -> bool {
        let instruction = ctx.instruction();
        if !matches!(instruction.opcode, OpCode::Call | OpCode::CallVirt) {
            return false;
        }
        let Some(token) = instruction.operand.token() else {
            return false;
        };
        if token.is_reference() || ctx.unit.defines(token) {
            return false;
        }
        let Some(callee) = ctx.registry.get_method(&token) else {
            return false;
        };
        ctx.registry
            .get(&callee.declaring_type)
            .is_some_and(|ty| ty.is_interface())
    }

    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()> {
        let instruction = ctx.instruction();
        let token = instruction
            .operand
            .token()
            .ok_or_else(|| Error::CrossUnit("interface call without operand token".to_string()))?;
        let callee = ctx
            .registry
            .get_method(&token)
            .ok_or_else(|| Error::CrossUnit(format!("interface member {token} is unregistered")))?;
        let home = find_home(&self.externals, token)?;
        self.pool.try_add(home.clone())?;
        let imported = ctx
            .unit
            .import_member(&home.identity(), callee.declaring_type, token)?;
        emitter.retarget(ctx.index, rebuilt_operand(&instruction.operand, imported))
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}

/// Re-points construction sites at constructors imported into the executing
/// unit, for value types or reference types.
pub struct ConstructorContract {
    pool: Arc<UnitPool>,
    externals: Vec<Arc<CompiledUnit>>,
    flavor: TypeFlavor,
    matched: Matched,
}

impl ConstructorContract {
    /// Contract for value-type construction sites.
    #[must_use]
    pub fn value_types(pool: Arc<UnitPool>, externals: Vec<Arc<CompiledUnit>>) -> Self {
        ConstructorContract {
            pool,
            externals,
            flavor: TypeFlavor::ValueType,
            matched: Matched::default(),
        }
    }

    /// Contract for reference-type construction sites.
    #[must_use]
    pub fn reference_types(pool: Arc<UnitPool>, externals: Vec<Arc<CompiledUnit>>) -> Self {
        ConstructorContract {
            pool,
            externals,
            flavor: TypeFlavor::Class,
            matched: Matched::default(),
        }
    }
}

impl Mock for ConstructorContract {
    fn description(&self) -> String {
        format!("contract: {} constructor rewrite", self.flavor)
    }

    fn is_source_instruction(&self, ctx: &MatchContext<'_>) -> bool {
        let instruction = ctx.instruction();
        if instruction.opcode != OpCode::NewObj {
            return false;
        }
        let Some(token) = instruction.operand.token() else {
            return false;
        };
        if token.is_reference() || ctx.unit.defines(token) {
            return false;
        }
        let Some(ctor) = ctx.registry.get_method(&token) else {
            return false;
        };
        ctx.registry
            .get(&ctor.declaring_type)
            .is_some_and(|ty| ty.flavor == self.flavor)
    }

    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()> {
        let instruction = ctx.instruction();
        let token = instruction
            .operand
            .token()
            .ok_or_else(|| Error::CrossUnit("construction without operand token".to_string()))?;
        let ctor = ctx
            .registry
            .get_method(&token)
            .ok_or_else(|| Error::CrossUnit(format!("constructor {token} is unregistered")))?;
        let home = find_home(&self.externals, token)?;
        self.pool.try_add(home.clone())?;
        let imported = ctx
            .unit
            .import_member(&home.identity(), ctor.declaring_type, token)?;
        emitter.retarget(ctx.index, rebuilt_operand(&instruction.operand, imported))
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}

/// Re-points cast and box sites at types imported into the executing unit.
pub struct CastContract {
    pool: Arc<UnitPool>,
    externals: Vec<Arc<CompiledUnit>>,
    matched: Matched,
}

impl CastContract {
    /// Creates the contract over the session's accessible units.
    #[must_use]
    pub fn new(pool: Arc<UnitPool>, externals: Vec<Arc<CompiledUnit>>) -> Self {
        CastContract {
            pool,
            externals,
            matched: Matched::default(),
        }
    }
}

impl Mock for CastContract {
    fn description(&self) -> String {
        "contract: type cast rewrite".to_string()
    }

    fn is_source_instruction(&self, ctx: &MatchContext<'_>) -> bool {
        let instruction = ctx.instruction();
        if !matches!(instruction.opcode, OpCode::CastClass | OpCode::Box) {
            return false;
        }
        let Some(token) = instruction.operand.token() else {
            return false;
        };
        !token.is_reference() && !ctx.unit.defines(token) && ctx.registry.get(&token).is_some()
    }

    fn inject(&self, ctx: &MatchContext<'_>, emitter: &mut BodyEmitter) -> Result<()> {
        let instruction = ctx.instruction();
        let token = instruction
            .operand
            .token()
            .ok_or_else(|| Error::CrossUnit("cast without operand token".to_string()))?;
        let home = find_home(&self.externals, token)?;
        self.pool.try_add(home.clone())?;
        let imported = ctx.unit.import_type(&home.identity(), token);
        emitter.retarget(ctx.index, rebuilt_operand(&instruction.operand, imported))
    }

    fn mark_matched(&self) {
        self.matched.set();
    }

    fn was_matched(&self) -> bool {
        self.matched.get()
    }
}
