//! The method / call-graph rewriter.
//!
//! Given a target method and a frozen mock set, the rewriter determines every
//! method that must be scanned - the target itself plus, for each mock whose
//! source member is virtual or declared on an interface, every overriding or
//! implementing method reachable through the type registry's closure, in
//! whichever registered unit its body lives. Each body is processed in a
//! single program-order pass: matches are collected first, conflicts checked,
//! then `before_injection` fires once per involved mock, `inject` once per
//! match, `after_injection` once per involved mock, and the emitter commits
//! with its one remapping pass.
//!
//! Matching is single-pass by contract: mocks never see the instructions
//! their own edits produce.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::{
    assembly::{BodyEmitter, Instruction, MethodBody},
    metadata::{
        method::Method,
        token::Token,
        typesystem::TypeRegistry,
        unit::CompiledUnit,
    },
    mocks::{MatchContext, Mock},
    Error, Result,
};

/// Drives instruction matching and injection across all affected methods.
pub struct Rewriter<'a> {
    registry: &'a TypeRegistry,
    units: Vec<Arc<CompiledUnit>>,
    mocks: &'a [Arc<dyn Mock>],
}

impl<'a> Rewriter<'a> {
    /// Creates a rewriter over the target unit, the other accessible units and
    /// a frozen mock set.
    #[must_use]
    pub fn new(
        registry: &'a TypeRegistry,
        target_unit: Arc<CompiledUnit>,
        externals: Vec<Arc<CompiledUnit>>,
        mocks: &'a [Arc<dyn Mock>],
    ) -> Self {
        let mut units = Vec::with_capacity(externals.len() + 1);
        units.push(target_unit);
        units.extend(externals);
        Rewriter {
            registry,
            units,
            mocks,
        }
    }

    /// Rewrites every affected method.
    ///
    /// # Errors
    /// Any matching, injection or cross-unit error; the session must treat all
    /// of them as fatal since no partial rewrite is returned.
    pub fn rewrite(&self, target_method: Token) -> Result<()> {
        for method in self.affected_methods(target_method)? {
            self.process_method(method)?;
        }
        Ok(())
    }

    /// The full ordered set of methods to scan.
    fn affected_methods(&self, target_method: Token) -> Result<Vec<Token>> {
        let mut ordered = vec![target_method];
        let mut seen: HashSet<Token> = ordered.iter().copied().collect();

        for mock in self.mocks {
            let Some(member) = mock.source_member() else {
                continue;
            };
            let declared_on_interface = self
                .registry
                .get(&member.declaring_type)
                .is_some_and(|ty| ty.is_interface());
            if !member.is_virtual && !declared_on_interface {
                continue;
            }

            let closure = self.registry.ancestors_and_descendants(member.declaring_type)?;
            let mut related: Vec<Token> = closure.iter().copied().collect();
            related.push(member.declaring_type);
            related.sort();
            for type_token in related {
                if let Some(overriding) =
                    self.registry
                        .find_method_on(type_token, &member.name, &member.params)
                {
                    if seen.insert(overriding.token) {
                        ordered.push(overriding.token);
                    }
                }
            }
        }
        Ok(ordered)
    }

    fn owner_of(&self, method: Token) -> Option<&Arc<CompiledUnit>> {
        self.units.iter().find(|unit| unit.defines(method))
    }

    /// Scans and mutates one method body.
    ///
    /// The body is taken out of its unit while the emitter is in flight and is
    /// restored untouched when anything fails, so no half-mutated body is ever
    /// observable.
    fn process_method(&self, method_token: Token) -> Result<()> {
        let owner = self.owner_of(method_token).ok_or_else(|| {
            Error::MemberNotFound(format!("method {method_token} is not defined in any unit"))
        })?;
        let method = owner.get_method(method_token).ok_or_else(|| {
            Error::MemberNotFound(format!("method {method_token} has no definition row"))
        })?;
        let Some(body) = owner.take_body(method_token) else {
            // Abstract and interface declarations carry no body to rewrite.
            return Ok(());
        };

        let backup = body.clone();
        match self.inject_into(owner, &method, body) {
            Ok(rewritten) => {
                owner.set_body(method_token, rewritten);
                Ok(())
            }
            Err(error) => {
                owner.set_body(method_token, backup);
                Err(error)
            }
        }
    }

    fn inject_into(
        &self,
        owner: &CompiledUnit,
        method: &Method,
        body: MethodBody,
    ) -> Result<MethodBody> {
        let mut emitter = BodyEmitter::new(method.token, body);
        let instructions: Vec<Instruction> = emitter.instructions().to_vec();

        let mut matches: Vec<(usize, usize)> = Vec::new();
        for index in 0..instructions.len() {
            let mut mutating_claimed = false;
            for (mock_index, mock) in self.mocks.iter().enumerate() {
                let ctx = MatchContext {
                    unit: owner,
                    registry: self.registry,
                    method,
                    instructions: &instructions,
                    index,
                };
                if !mock.is_source_instruction(&ctx) {
                    continue;
                }
                if mock.is_mutating() {
                    if mutating_claimed {
                        return Err(Error::InjectionConflict {
                            method: method.token,
                            index,
                        });
                    }
                    mutating_claimed = true;
                }
                mock.mark_matched();
                matches.push((mock_index, index));
            }
        }

        if matches.is_empty() {
            return emitter.commit();
        }

        let involved: BTreeSet<usize> = matches.iter().map(|(mock, _)| *mock).collect();
        for &mock_index in &involved {
            self.mocks[mock_index].before_injection(&mut emitter)?;
        }
        for &(mock_index, index) in &matches {
            let ctx = MatchContext {
                unit: owner,
                registry: self.registry,
                method,
                instructions: &instructions,
                index,
            };
            self.mocks[mock_index].inject(&ctx, &mut emitter)?;
        }
        for &mock_index in &involved {
            self.mocks[mock_index].after_injection(&mut emitter)?;
        }

        emitter.commit()
    }
}
