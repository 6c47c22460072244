//! Process-wide registry of imported compiled units.
//!
//! When several fake sessions run concurrently - a parallel test runner
//! creating fakes against overlapping reference units - each unit must be
//! imported at most once system-wide. The [`UnitPool`] is a concurrent map
//! with insert-if-absent semantics: sessions race through [`UnitPool::try_add`]
//! and exactly one wins; readers never observe a partially-registered entry
//! because the unit is fully constructed before insertion.

use std::sync::{Arc, OnceLock};

use dashmap::{DashMap, Entry};

use crate::{
    metadata::{identity::UnitIdentity, token::Token, unit::CompiledUnit},
    Error, Result,
};

static GLOBAL_POOL: OnceLock<Arc<UnitPool>> = OnceLock::new();

/// Registry preventing duplicate import of the same compiled unit.
pub struct UnitPool {
    units: DashMap<UnitIdentity, Arc<CompiledUnit>>,
}

impl UnitPool {
    /// Creates an isolated pool.
    ///
    /// Sessions normally share [`UnitPool::global`]; isolated pools exist for
    /// tests that must not see units registered elsewhere in the process.
    #[must_use]
    pub fn new() -> Self {
        UnitPool {
            units: DashMap::new(),
        }
    }

    /// The process-wide pool shared by all sessions.
    #[must_use]
    pub fn global() -> Arc<UnitPool> {
        GLOBAL_POOL.get_or_init(|| Arc::new(UnitPool::new())).clone()
    }

    /// Registers a unit if its identity is not present yet.
    ///
    /// Returns `true` when this call performed the registration and `false`
    /// when an identical unit was already present; either way the unit is
    /// registered exactly once system-wide.
    ///
    /// # Errors
    /// [`Error::UnitCollision`] when a unit with the same name+mvid but a
    /// different content digest is already registered - importing both would
    /// make member references ambiguous.
    pub fn try_add(&self, unit: Arc<CompiledUnit>) -> Result<bool> {
        let identity = unit.identity();
        match self.units.entry(identity.clone()) {
            Entry::Occupied(existing) => {
                if existing.key().colliding(&identity) {
                    Err(Error::UnitCollision(identity.to_string()))
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(unit);
                Ok(true)
            }
        }
    }

    /// Pure membership check by identity.
    #[must_use]
    pub fn has_module(&self, identity: &UnitIdentity) -> bool {
        self.units.contains_key(identity)
    }

    /// Fetches a registered unit by identity.
    #[must_use]
    pub fn get(&self, identity: &UnitIdentity) -> Option<Arc<CompiledUnit>> {
        self.units.get(identity).map(|e| e.value().clone())
    }

    /// Finds the registered unit defining the given token.
    #[must_use]
    pub fn find_defining_unit(&self, token: Token) -> Option<Arc<CompiledUnit>> {
        self.units
            .iter()
            .find(|e| e.value().defines(token))
            .map(|e| e.value().clone())
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true when no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Default for UnitPool {
    fn default() -> Self {
        Self::new()
    }
}
