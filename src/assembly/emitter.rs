//! Queued-edit emitter for method body mutation.
//!
//! A [`BodyEmitter`] is the handle used to mutate one method body in flight.
//! Mocks queue local edits - insert-before/after, replace, operand retarget -
//! addressed by stable original-stream indices. Nothing is applied until
//! [`BodyEmitter::commit`], which rebuilds the stream once, computes the
//! old-to-new index mapping, and remaps every branch-target operand in a single
//! pass rather than renumbering on every edit.
//!
//! Because edits are queued, a failed injection simply drops the emitter and
//! the body is recovered untouched via [`BodyEmitter::into_original`]; one
//! misbehaving mock can never leave a half-mutated body behind for the other
//! mocks scanning the same method.

use std::collections::{BTreeMap, HashMap};

use crate::{
    metadata::{token::Token, typesystem::TypeSig},
    Result,
};

use super::body::MethodBody;
use super::instruction::{Instruction, Operand};

/// Mutation handle over one method body.
pub struct BodyEmitter {
    method: Token,
    original: MethodBody,
    inserts_before: BTreeMap<usize, Vec<Instruction>>,
    inserts_after: BTreeMap<usize, Vec<Instruction>>,
    replacements: HashMap<usize, Vec<Instruction>>,
    retargets: HashMap<usize, Operand>,
    pending_locals: Vec<TypeSig>,
}

impl BodyEmitter {
    /// Acquires an emitter over a body taken out of its unit.
    #[must_use]
    pub fn new(method: Token, body: MethodBody) -> Self {
        BodyEmitter {
            method,
            original: body,
            inserts_before: BTreeMap::new(),
            inserts_after: BTreeMap::new(),
            replacements: HashMap::new(),
            retargets: HashMap::new(),
            pending_locals: Vec::new(),
        }
    }

    /// The method whose body is in flight.
    #[must_use]
    pub fn method(&self) -> Token {
        self.method
    }

    /// Read-only view of the original instruction stream for matching.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.original.instructions
    }

    /// Allocates a fresh local slot, visible only after commit.
    pub fn alloc_local(&mut self, sig: TypeSig) -> u16 {
        self.pending_locals.push(sig);
        (self.original.locals.len() + self.pending_locals.len() - 1) as u16
    }

    /// Queues instructions to be spliced immediately before `index`.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the index is out of range.
    pub fn insert_before(&mut self, index: usize, instructions: Vec<Instruction>) -> Result<()> {
        self.check_index(index)?;
        self.inserts_before
            .entry(index)
            .or_default()
            .extend(instructions);
        Ok(())
    }

    /// Queues instructions to be spliced immediately after `index`.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the index is out of range.
    pub fn insert_after(&mut self, index: usize, instructions: Vec<Instruction>) -> Result<()> {
        self.check_index(index)?;
        self.inserts_after
            .entry(index)
            .or_default()
            .extend(instructions);
        Ok(())
    }

    /// Queues a replacement of the instruction at `index`.
    ///
    /// # Errors
    /// [`crate::Error::InjectionConflict`] when another replacement is already
    /// queued for the same instruction; [`crate::Error::Execution`] when the
    /// index is out of range.
    pub fn replace(&mut self, index: usize, instructions: Vec<Instruction>) -> Result<()> {
        self.check_index(index)?;
        if self.replacements.contains_key(&index) {
            return Err(crate::Error::InjectionConflict {
                method: self.method,
                index,
            });
        }
        self.replacements.insert(index, instructions);
        Ok(())
    }

    /// Queues an operand rewrite of the instruction at `index`, keeping its shape.
    ///
    /// Used by contract mocks to re-point a reference at the equivalent member
    /// imported into the executing unit.
    ///
    /// # Errors
    /// [`crate::Error::Execution`] when the index is out of range.
    pub fn retarget(&mut self, index: usize, operand: Operand) -> Result<()> {
        self.check_index(index)?;
        self.retargets.insert(index, operand);
        Ok(())
    }

    /// Returns true when any edit is queued.
    #[must_use]
    pub fn has_edits(&self) -> bool {
        !(self.inserts_before.is_empty()
            && self.inserts_after.is_empty()
            && self.replacements.is_empty()
            && self.retargets.is_empty()
            && self.pending_locals.is_empty())
    }

    /// Releases the emitter without applying anything.
    #[must_use]
    pub fn into_original(self) -> MethodBody {
        self.original
    }

    /// Applies all queued edits and returns the rebuilt body.
    ///
    /// Original instructions keep their relative order; inserts-before land
    /// ahead of the instruction (and ahead of its replacement), inserts-after
    /// directly behind it. Branch targets always refer to original-stream
    /// indices when queued; the final pass remaps them through the old-to-new
    /// index table. Queued instructions must not carry branch targets.
    ///
    /// # Errors
    /// [`crate::Error::Malformed`] when a branch target points outside the
    /// original stream.
    pub fn commit(self) -> Result<MethodBody> {
        let original_len = self.original.instructions.len();
        let mut stream =
            Vec::with_capacity(original_len + self.inserts_before.len() + self.inserts_after.len());
        let mut index_map = vec![0usize; original_len];
        let mut inserted_pushes = 0usize;

        for (index, instruction) in self.original.instructions.into_iter().enumerate() {
            if let Some(spliced) = self.inserts_before.get(&index) {
                for extra in spliced {
                    inserted_pushes += extra.static_stack_behavior().pushes;
                    stream.push(extra.clone());
                }
            }

            index_map[index] = stream.len();
            if let Some(replacement) = self.replacements.get(&index) {
                for extra in replacement {
                    inserted_pushes += extra.static_stack_behavior().pushes;
                    stream.push(extra.clone());
                }
            } else if let Some(operand) = self.retargets.get(&index) {
                stream.push(Instruction::new(instruction.opcode, operand.clone()));
            } else {
                stream.push(instruction);
            }

            if let Some(spliced) = self.inserts_after.get(&index) {
                for extra in spliced {
                    inserted_pushes += extra.static_stack_behavior().pushes;
                    stream.push(extra.clone());
                }
            }
        }

        for instruction in &mut stream {
            if let Operand::Target(target) = instruction.operand {
                let mapped = index_map.get(target).copied().ok_or_else(|| {
                    malformed_error!(
                        "Branch target {} outside method {} with {} instructions",
                        target,
                        self.method,
                        original_len
                    )
                })?;
                instruction.operand = Operand::Target(mapped);
            }
        }

        let mut locals = self.original.locals;
        locals.extend(self.pending_locals);

        Ok(MethodBody {
            instructions: stream,
            max_stack: self.original.max_stack + inserted_pushes,
            locals,
        })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.original.instructions.len() {
            Ok(())
        } else {
            Err(crate::Error::Execution(format!(
                "edit index {index} outside body of {} ({} instructions)",
                self.method,
                self.original.instructions.len()
            )))
        }
    }
}
