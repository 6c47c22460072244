//! Method bodies: the ordered instruction stream of one compiled method.
//!
//! A [`MethodBody`] owns the instruction stream, local variable signatures and
//! the advisory maximum stack depth. Bodies are stored in their owning unit and
//! taken out wholesale by the rewriter while a
//! [`crate::assembly::BodyEmitter`] is in flight.
//!
//! [`BodyAssembler`] is the authoring side: a small fluent builder used by
//! tests and unit authors to write bodies without hand-constructing
//! instruction vectors.

use crate::metadata::token::Token;
use crate::metadata::typesystem::TypeSig;

use super::instruction::{Instruction, OpCode, Operand};

/// The compiled body of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Instructions in program order
    pub instructions: Vec<Instruction>,
    /// Advisory maximum operand-stack depth
    pub max_stack: usize,
    /// Local variable signatures
    pub locals: Vec<TypeSig>,
}

impl MethodBody {
    /// Creates a body from an instruction stream and locals.
    ///
    /// The maximum stack depth is estimated from the static stack effects;
    /// callee-dependent pops are not modeled, so the estimate is an upper
    /// bound on pushes rather than an exact depth.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, locals: Vec<TypeSig>) -> Self {
        let max_stack = estimate_max_stack(&instructions);
        MethodBody {
            instructions,
            max_stack,
            locals,
        }
    }

    /// Number of instructions in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true for an empty stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

fn estimate_max_stack(instructions: &[Instruction]) -> usize {
    let mut depth: isize = 0;
    let mut max: isize = 0;
    for instruction in instructions {
        let behavior = instruction.static_stack_behavior();
        depth = (depth - behavior.pops as isize).max(0) + behavior.pushes as isize;
        max = max.max(depth);
    }
    max.max(1) as usize
}

/// Fluent builder for method bodies.
///
/// # Examples
///
/// ```rust,ignore
/// let body = BodyAssembler::new()
///     .ldc_i4(5)
///     .call(helper)
///     .ret()
///     .finish();
/// ```
#[derive(Default)]
pub struct BodyAssembler {
    instructions: Vec<Instruction>,
    locals: Vec<TypeSig>,
}

impl BodyAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a local variable and returns its index.
    pub fn local(&mut self, sig: TypeSig) -> u16 {
        self.locals.push(sig);
        (self.locals.len() - 1) as u16
    }

    /// Appends a prebuilt instruction.
    #[must_use]
    pub fn raw(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// `nop`
    #[must_use]
    pub fn nop(self) -> Self {
        let instruction = Instruction::simple(OpCode::Nop);
        self.raw(instruction)
    }

    /// `ldarg <index>`
    #[must_use]
    pub fn ldarg(self, index: u16) -> Self {
        self.raw(Instruction::new(OpCode::LdArg, Operand::Arg(index)))
    }

    /// `ldloc <index>`
    #[must_use]
    pub fn ldloc(self, index: u16) -> Self {
        self.raw(Instruction::new(OpCode::LdLoc, Operand::Local(index)))
    }

    /// `stloc <index>`
    #[must_use]
    pub fn stloc(self, index: u16) -> Self {
        self.raw(Instruction::new(OpCode::StLoc, Operand::Local(index)))
    }

    /// `ldc.i4 <value>`
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        self.raw(Instruction::new(OpCode::LdcI4, Operand::Int32(value)))
    }

    /// `ldc.i8 <value>`
    #[must_use]
    pub fn ldc_i8(self, value: i64) -> Self {
        self.raw(Instruction::new(OpCode::LdcI8, Operand::Int64(value)))
    }

    /// `ldc.r8 <value>`
    #[must_use]
    pub fn ldc_r8(self, value: f64) -> Self {
        self.raw(Instruction::new(OpCode::LdcR8, Operand::Float64(value)))
    }

    /// `ldstr <value>`
    #[must_use]
    pub fn ldstr(self, value: impl Into<String>) -> Self {
        self.raw(Instruction::new(OpCode::LdStr, Operand::Str(value.into())))
    }

    /// `ldnull`
    #[must_use]
    pub fn ldnull(self) -> Self {
        self.raw(Instruction::simple(OpCode::LdNull))
    }

    /// `dup`
    #[must_use]
    pub fn dup(self) -> Self {
        self.raw(Instruction::simple(OpCode::Dup))
    }

    /// `pop`
    #[must_use]
    pub fn pop(self) -> Self {
        self.raw(Instruction::simple(OpCode::Pop))
    }

    /// `add`
    #[must_use]
    pub fn add(self) -> Self {
        self.raw(Instruction::simple(OpCode::Add))
    }

    /// `sub`
    #[must_use]
    pub fn sub(self) -> Self {
        self.raw(Instruction::simple(OpCode::Sub))
    }

    /// `mul`
    #[must_use]
    pub fn mul(self) -> Self {
        self.raw(Instruction::simple(OpCode::Mul))
    }

    /// `ceq`
    #[must_use]
    pub fn ceq(self) -> Self {
        self.raw(Instruction::simple(OpCode::Ceq))
    }

    /// `br <target>`
    #[must_use]
    pub fn br(self, target: usize) -> Self {
        self.raw(Instruction::new(OpCode::Br, Operand::Target(target)))
    }

    /// `brtrue <target>`
    #[must_use]
    pub fn brtrue(self, target: usize) -> Self {
        self.raw(Instruction::new(OpCode::BrTrue, Operand::Target(target)))
    }

    /// `brfalse <target>`
    #[must_use]
    pub fn brfalse(self, target: usize) -> Self {
        self.raw(Instruction::new(OpCode::BrFalse, Operand::Target(target)))
    }

    /// `ret`
    #[must_use]
    pub fn ret(self) -> Self {
        self.raw(Instruction::simple(OpCode::Ret))
    }

    /// `call <method>`
    #[must_use]
    pub fn call(self, method: Token) -> Self {
        self.raw(Instruction::new(OpCode::Call, Operand::Token(method)))
    }

    /// `callvirt <method>`
    #[must_use]
    pub fn callvirt(self, method: Token) -> Self {
        self.raw(Instruction::new(OpCode::CallVirt, Operand::Token(method)))
    }

    /// `newobj <ctor>` with an optional generic instantiation
    #[must_use]
    pub fn newobj(self, ctor: Token, generic_args: Vec<TypeSig>) -> Self {
        let operand = if generic_args.is_empty() {
            Operand::Token(ctor)
        } else {
            Operand::Spec(ctor, generic_args)
        };
        self.raw(Instruction::new(OpCode::NewObj, operand))
    }

    /// `ldfld <field>`
    #[must_use]
    pub fn ldfld(self, field: Token) -> Self {
        self.raw(Instruction::new(OpCode::LdFld, Operand::Token(field)))
    }

    /// `stfld <field>`
    #[must_use]
    pub fn stfld(self, field: Token) -> Self {
        self.raw(Instruction::new(OpCode::StFld, Operand::Token(field)))
    }

    /// `castclass <type>`
    #[must_use]
    pub fn castclass(self, ty: Token) -> Self {
        self.raw(Instruction::new(OpCode::CastClass, Operand::Token(ty)))
    }

    /// `box <type>`
    #[must_use]
    pub fn box_value(self, ty: Token) -> Self {
        self.raw(Instruction::new(OpCode::Box, Operand::Token(ty)))
    }

    /// Finalizes the body.
    #[must_use]
    pub fn finish(self) -> MethodBody {
        MethodBody::new(self.instructions, self.locals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_builds_stream() {
        let helper = Token::new(0x06000001);
        let body = BodyAssembler::new().ldc_i4(5).call(helper).ret().finish();
        assert_eq!(body.len(), 3);
        assert_eq!(body.instructions[0].opcode, OpCode::LdcI4);
        assert_eq!(body.instructions[1].operand.token(), Some(helper));
    }

    #[test]
    fn test_max_stack_estimate() {
        let body = BodyAssembler::new()
            .ldc_i4(1)
            .ldc_i4(2)
            .add()
            .ret()
            .finish();
        assert!(body.max_stack >= 2);
    }

    #[test]
    fn test_locals() {
        let mut asm = BodyAssembler::new();
        let slot = asm.local(TypeSig::I32);
        let body = asm.ldc_i4(7).stloc(slot).ldloc(slot).ret().finish();
        assert_eq!(body.locals, vec![TypeSig::I32]);
        assert_eq!(slot, 0);
    }
}
