//! Instruction model for compiled method bodies.
//!
//! The instruction set covers exactly the shapes relevant to member access -
//! calls, field loads/stores, object construction, casts, boxing - plus enough
//! surrounding material (literals, locals, arguments, arithmetic, branches) to
//! write realistic method bodies. This is not a general-purpose bytecode; it is
//! the mutation surface of the rewriter.
//!
//! # Key Types
//! - [`OpCode`] - Operation kind with its CIL-style mnemonic
//! - [`Operand`] - Inline operand (literal, token, branch target, hook id)
//! - [`FlowType`] - How an instruction affects control flow
//! - [`StackBehavior`] - Net operand-stack effect
//! - [`Instruction`] - One decoded operation
//!
//! Branch operands are instruction indices rather than byte offsets: the
//! stream is the unit of mutation, and indices are the stable handles the
//! emitter's remapping pass translates after edits.

use std::fmt;

use crate::metadata::token::Token;
use crate::metadata::typesystem::TypeSig;

/// Operation kind.
///
/// Mnemonics follow CIL conventions; `call.hook` is the one synthetic opcode,
/// emitted only by mock injection and resolved through the session's hook
/// table at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum OpCode {
    /// No operation
    #[strum(serialize = "nop")]
    Nop,
    /// Load argument by index
    #[strum(serialize = "ldarg")]
    LdArg,
    /// Load local by index
    #[strum(serialize = "ldloc")]
    LdLoc,
    /// Store local by index
    #[strum(serialize = "stloc")]
    StLoc,
    /// Load 32-bit integer constant
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Load 64-bit integer constant
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    /// Load 64-bit float constant
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    /// Load string constant
    #[strum(serialize = "ldstr")]
    LdStr,
    /// Load null reference
    #[strum(serialize = "ldnull")]
    LdNull,
    /// Duplicate top of stack
    #[strum(serialize = "dup")]
    Dup,
    /// Discard top of stack
    #[strum(serialize = "pop")]
    Pop,
    /// Add two values
    #[strum(serialize = "add")]
    Add,
    /// Subtract two values
    #[strum(serialize = "sub")]
    Sub,
    /// Multiply two values
    #[strum(serialize = "mul")]
    Mul,
    /// Divide two values
    #[strum(serialize = "div")]
    Div,
    /// Compare two values for equality
    #[strum(serialize = "ceq")]
    Ceq,
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br,
    /// Branch when true
    #[strum(serialize = "brtrue")]
    BrTrue,
    /// Branch when false
    #[strum(serialize = "brfalse")]
    BrFalse,
    /// Return from method
    #[strum(serialize = "ret")]
    Ret,
    /// Call a method directly
    #[strum(serialize = "call")]
    Call,
    /// Call a method with virtual dispatch
    #[strum(serialize = "callvirt")]
    CallVirt,
    /// Construct an object and call its constructor
    #[strum(serialize = "newobj")]
    NewObj,
    /// Load instance field
    #[strum(serialize = "ldfld")]
    LdFld,
    /// Store instance field
    #[strum(serialize = "stfld")]
    StFld,
    /// Cast object reference, faulting on mismatch
    #[strum(serialize = "castclass")]
    CastClass,
    /// Box a value into an object
    #[strum(serialize = "box")]
    Box,
    /// Invoke a bound runtime hook
    #[strum(serialize = "call.hook")]
    CallHook,
}

impl OpCode {
    /// Encodes the opcode as a single byte for the module image.
    #[must_use]
    pub(crate) fn to_byte(self) -> u8 {
        self as u8
    }

    /// Decodes an opcode byte from a module image.
    pub(crate) fn from_byte(value: u8) -> crate::Result<Self> {
        use strum::IntoEnumIterator;
        OpCode::iter()
            .find(|op| op.to_byte() == value)
            .ok_or_else(|| malformed_error!("Invalid opcode byte 0x{:02x}", value))
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Always transfers to the branch target
    Branch,
    /// Transfers to the branch target or falls through
    ConditionalBranch,
    /// Leaves the method
    Return,
}

/// Net operand-stack effect of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBehavior {
    /// Values consumed from the stack
    pub pops: usize,
    /// Values pushed onto the stack
    pub pushes: usize,
}

impl StackBehavior {
    /// Net change in stack depth.
    #[must_use]
    pub fn net(&self) -> isize {
        self.pushes as isize - self.pops as isize
    }
}

/// Inline operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 32-bit integer literal
    Int32(i32),
    /// 64-bit integer literal
    Int64(i64),
    /// 64-bit float literal
    Float64(f64),
    /// String literal
    Str(String),
    /// Local variable index
    Local(u16),
    /// Argument index; for instance methods index 0 is the instance
    Arg(u16),
    /// Branch target as an instruction index
    Target(usize),
    /// Metadata token (member or type)
    Token(Token),
    /// Metadata token with the call site's generic instantiation
    Spec(Token, Vec<TypeSig>),
    /// Bound runtime hook id
    Hook(u32),
}

impl Operand {
    /// The metadata token carried by this operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            Operand::Token(token) => Some(*token),
            Operand::Spec(token, _) => Some(*token),
            _ => None,
        }
    }

    /// The call site's generic instantiation, empty unless this is a `Spec`.
    #[must_use]
    pub fn generic_args(&self) -> &[TypeSig] {
        match self {
            Operand::Spec(_, args) => args,
            _ => &[],
        }
    }
}

/// One operation in a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Operation kind
    pub opcode: OpCode,
    /// Inline operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction from parts.
    #[must_use]
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// An instruction with no operand.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// How this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self.opcode {
            OpCode::Br => FlowType::Branch,
            OpCode::BrTrue | OpCode::BrFalse => FlowType::ConditionalBranch,
            OpCode::Ret => FlowType::Return,
            _ => FlowType::Sequential,
        }
    }

    /// Branch target index for branch instructions.
    #[must_use]
    pub fn branch_target(&self) -> Option<usize> {
        match (self.flow_type(), &self.operand) {
            (FlowType::Branch | FlowType::ConditionalBranch, Operand::Target(target)) => {
                Some(*target)
            }
            _ => None,
        }
    }

    /// Returns true for instruction shapes that can reference a member or type.
    #[must_use]
    pub fn is_member_access(&self) -> bool {
        matches!(
            self.opcode,
            OpCode::Call
                | OpCode::CallVirt
                | OpCode::NewObj
                | OpCode::LdFld
                | OpCode::StFld
                | OpCode::CastClass
                | OpCode::Box
        )
    }

    /// Static stack effect, for effects that do not depend on callee metadata.
    ///
    /// Calls consume their arguments according to the callee's signature; the
    /// matcher and interpreter resolve that through the metadata layer, so this
    /// reports only the operand-independent part.
    #[must_use]
    pub fn static_stack_behavior(&self) -> StackBehavior {
        match self.opcode {
            OpCode::Nop | OpCode::Br | OpCode::Ret | OpCode::CallHook => StackBehavior::default(),
            OpCode::LdArg
            | OpCode::LdLoc
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR8
            | OpCode::LdStr
            | OpCode::LdNull => StackBehavior { pops: 0, pushes: 1 },
            OpCode::Dup => StackBehavior { pops: 1, pushes: 2 },
            OpCode::Pop | OpCode::StLoc | OpCode::BrTrue | OpCode::BrFalse => {
                StackBehavior { pops: 1, pushes: 0 }
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Ceq => {
                StackBehavior { pops: 2, pushes: 1 }
            }
            OpCode::LdFld | OpCode::CastClass | OpCode::Box => {
                StackBehavior { pops: 1, pushes: 1 }
            }
            OpCode::StFld => StackBehavior { pops: 2, pushes: 0 },
            OpCode::Call | OpCode::CallVirt | OpCode::NewObj => StackBehavior::default(),
        }
    }

    /// Returns true for single-instruction literal producers.
    ///
    /// These are the argument values statically available to the matcher when a
    /// mock carries argument checkers.
    #[must_use]
    pub fn is_literal_load(&self) -> bool {
        matches!(
            self.opcode,
            OpCode::LdcI4 | OpCode::LdcI8 | OpCode::LdcR8 | OpCode::LdStr | OpCode::LdNull
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            Operand::Int32(value) => write!(f, "{} {value}", self.opcode),
            Operand::Int64(value) => write!(f, "{} {value}", self.opcode),
            Operand::Float64(value) => write!(f, "{} {value}", self.opcode),
            Operand::Str(value) => write!(f, "{} {value:?}", self.opcode),
            Operand::Local(index) | Operand::Arg(index) => {
                write!(f, "{}.{index}", self.opcode)
            }
            Operand::Target(target) => write!(f, "{} -> {target}", self.opcode),
            Operand::Token(token) => write!(f, "{} {token}", self.opcode),
            Operand::Spec(token, args) => {
                write!(f, "{} {token}<", self.opcode)?;
                for (position, arg) in args.iter().enumerate() {
                    if position > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            Operand::Hook(id) => write!(f, "{} #{id}", self.opcode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        assert_eq!(OpCode::LdcI4.to_string(), "ldc.i4");
        assert_eq!(OpCode::CallVirt.to_string(), "callvirt");
        assert_eq!(OpCode::CallHook.to_string(), "call.hook");
    }

    #[test]
    fn test_opcode_byte_roundtrip() {
        use strum::IntoEnumIterator;
        for op in OpCode::iter() {
            assert_eq!(OpCode::from_byte(op.to_byte()).unwrap(), op);
        }
    }

    #[test]
    fn test_invalid_opcode_byte() {
        assert!(OpCode::from_byte(0xFF).is_err());
    }

    #[test]
    fn test_branch_target() {
        let br = Instruction::new(OpCode::Br, Operand::Target(4));
        assert_eq!(br.branch_target(), Some(4));
        assert_eq!(br.flow_type(), FlowType::Branch);

        let call = Instruction::new(OpCode::Call, Operand::Token(Token::new(0x06000001)));
        assert_eq!(call.branch_target(), None);
        assert!(call.is_member_access());
    }

    #[test]
    fn test_literal_loads() {
        assert!(Instruction::new(OpCode::LdcI4, Operand::Int32(5)).is_literal_load());
        assert!(!Instruction::simple(OpCode::Dup).is_literal_load());
    }
}
