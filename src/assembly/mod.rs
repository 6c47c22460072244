//! Instruction streams, bodies and the mutation emitter.
//!
//! This module is the structural layer of the rewriting engine:
//!
//! - [`Instruction`], [`OpCode`], [`Operand`] - the instruction model
//! - [`MethodBody`], [`BodyAssembler`] - bodies and their authoring builder
//! - [`BodyEmitter`] - queued edits with a single remapping commit
//!
//! # Example
//! ```rust,ignore
//! let body = BodyAssembler::new().ldc_i4(5).call(helper).ret().finish();
//! let mut emitter = BodyEmitter::new(method, body);
//! emitter.replace(1, vec![Instruction::new(OpCode::CallHook, Operand::Hook(0))])?;
//! let rewritten = emitter.commit()?;
//! ```

mod body;
mod emitter;
mod instruction;

pub use body::{BodyAssembler, MethodBody};
pub use emitter::BodyEmitter;
pub use instruction::{FlowType, Instruction, OpCode, Operand, StackBehavior};
