//! Central type registry and cross-unit type/member map.
//!
//! The [`TypeRegistry`] is the session's view over every type, method and field
//! of the accessible unit graph. It serves two consumers:
//!
//! - the instruction matcher, which resolves operand tokens to member metadata
//!   and asks whether a declaring type is related to a mocked member's type;
//! - the rewriter, which expands a virtual/interface mock to every overriding
//!   or implementing method that must be rewritten consistently.
//!
//! # Architecture
//!
//! The registry uses the same storage split as the rest of the metadata layer:
//! lock-free ordered maps (`SkipMap`) for the primary token-keyed stores and
//! concurrent hash maps (`DashMap`) for secondary indices. The
//! ancestor/descendant closure is computed lazily per type, memoized as a
//! complete `Arc<HashSet>` so readers never observe a partially-built entry,
//! and never mutated mid-rewrite.
//!
//! # Invariants
//!
//! - The closure is transitive: if A is an ancestor of B and B of C, then A is
//!   in C's closure.
//! - A type is never a member of its own closure.
//! - Base-type and interface edges are acyclic by construction; an observed
//!   cycle aborts with [`crate::Error::HierarchyCycle`] rather than being
//!   silently tolerated.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;

use crate::{
    metadata::{
        method::{FieldDef, Method},
        token::Token,
        typesystem::{sigs_equal_erased, TypeSig, UnitTypeRc},
        unit::CompiledUnit,
    },
    Error, Result,
};

/// Thread-safe registry of all types, methods and fields known to one session.
pub struct TypeRegistry {
    /// Primary type store, keyed by token value
    types: SkipMap<u32, UnitTypeRc>,
    /// Primary method store, keyed by token value
    methods: SkipMap<u32, Arc<Method>>,
    /// Primary field store, keyed by token value
    fields: SkipMap<u32, Arc<FieldDef>>,
    /// Full name index for expression resolution
    fullname_index: DashMap<String, Token>,
    /// Reverse hierarchy edges: base/interface -> derived/implementors
    children: DashMap<u32, Vec<Token>>,
    /// Memoized ancestor/descendant closures
    hierarchy: DashMap<u32, Arc<HashSet<Token>>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        TypeRegistry {
            types: SkipMap::new(),
            methods: SkipMap::new(),
            fields: SkipMap::new(),
            fullname_index: DashMap::new(),
            children: DashMap::new(),
            hierarchy: DashMap::new(),
        }
    }

    /// Ingests every type, method and field of a unit.
    ///
    /// Registration is additive; re-registering a unit is harmless. The
    /// memoized closures are not invalidated - units are registered before
    /// rewriting starts and the hierarchy is immutable afterwards.
    pub fn register_unit(&self, unit: &CompiledUnit) {
        for ty in unit.types() {
            self.fullname_index.insert(ty.fullname(), ty.token);
            if let Some(base) = ty.base {
                self.children
                    .entry(base.value())
                    .or_default()
                    .push(ty.token);
            }
            for iface in &ty.interfaces {
                self.children
                    .entry(iface.value())
                    .or_default()
                    .push(ty.token);
            }
            self.types.insert(ty.token.value(), ty);
        }
        for method in unit.methods() {
            self.methods.insert(method.token.value(), method);
        }
        for field in unit.fields() {
            self.fields.insert(field.token.value(), field);
        }
    }

    /// Looks up a type by token.
    #[must_use]
    pub fn get(&self, token: &Token) -> Option<UnitTypeRc> {
        self.types.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a method by token.
    #[must_use]
    pub fn get_method(&self, token: &Token) -> Option<Arc<Method>> {
        self.methods.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a field by token.
    #[must_use]
    pub fn get_field(&self, token: &Token) -> Option<Arc<FieldDef>> {
        self.fields.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a type by its full `Namespace.Name` form.
    #[must_use]
    pub fn get_by_fullname(&self, fullname: &str) -> Option<UnitTypeRc> {
        let token = *self.fullname_index.get(fullname)?;
        self.get(&token)
    }

    /// Finds a method declared directly on `type_token` with the given name and
    /// erased parameter signature.
    #[must_use]
    pub fn find_method_on(
        &self,
        type_token: Token,
        name: &str,
        params: &[TypeSig],
    ) -> Option<Arc<Method>> {
        let ty = self.get(&type_token)?;
        for (_, method_token) in ty.methods.iter() {
            if let Some(method) = self.get_method(method_token) {
                if method.name == name && sigs_equal_erased(&method.params, params) {
                    return Some(method);
                }
            }
        }
        None
    }

    /// Returns the set of all ancestor and descendant types of `token`.
    ///
    /// The set is the transitive closure over base-type and implemented-interface
    /// edges in both directions, excluding the type itself. Results are memoized
    /// per type for the lifetime of the registry.
    ///
    /// # Errors
    ///
    /// [`Error::TypeNotFound`] when the token is not registered;
    /// [`Error::HierarchyCycle`] when a walk re-enters a type already on its
    /// path, which the host type system forbids by construction.
    pub fn ancestors_and_descendants(&self, token: Token) -> Result<Arc<HashSet<Token>>> {
        if let Some(existing) = self.hierarchy.get(&token.value()) {
            return Ok(existing.value().clone());
        }
        if self.get(&token).is_none() {
            return Err(Error::TypeNotFound(token));
        }

        let mut closure = HashSet::new();
        let mut path = HashSet::new();
        self.walk_ancestors(token, &mut closure, &mut path)?;
        let mut path = HashSet::new();
        self.walk_descendants(token, &mut closure, &mut path)?;
        closure.remove(&token);

        let closure = Arc::new(closure);
        self.hierarchy.insert(token.value(), closure.clone());
        Ok(closure)
    }

    fn walk_ancestors(
        &self,
        token: Token,
        closure: &mut HashSet<Token>,
        path: &mut HashSet<Token>,
    ) -> Result<()> {
        if !path.insert(token) {
            return Err(Error::HierarchyCycle(token));
        }
        let ty = self.get(&token).ok_or(Error::TypeNotFound(token))?;
        let mut edges = Vec::with_capacity(ty.interfaces.len() + 1);
        if let Some(base) = ty.base {
            edges.push(base);
        }
        edges.extend(ty.interfaces.iter().copied());
        for parent in edges {
            if closure.insert(parent) {
                self.walk_ancestors(parent, closure, path)?;
            }
        }
        path.remove(&token);
        Ok(())
    }

    fn walk_descendants(
        &self,
        token: Token,
        closure: &mut HashSet<Token>,
        path: &mut HashSet<Token>,
    ) -> Result<()> {
        if !path.insert(token) {
            return Err(Error::HierarchyCycle(token));
        }
        let derived: Vec<Token> = self
            .children
            .get(&token.value())
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for child in derived {
            if closure.insert(child) {
                self.walk_descendants(child, closure, path)?;
            }
        }
        path.remove(&token);
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
