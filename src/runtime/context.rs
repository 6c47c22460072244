//! Per-fake execution contexts and call-count verification.
//!
//! An [`ExecutionContext`] is created once per hook binding at materialization
//! time and mutated by injected runtime calls during every test invocation.
//! It is never reused across materializations and never shared across fake
//! object instances, so the only synchronization it needs is the atomic
//! counter itself.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crate::{Error, Result};

/// Predicate over the actual call count, checked after the test body ran.
pub trait CallsChecker: Send + Sync {
    /// Returns true when the actual count satisfies the expectation.
    fn check(&self, actual: u32) -> bool;

    /// Describes the expectation for verification failures.
    fn description(&self) -> String;
}

/// Standard expected-call-count predicates.
#[derive(Debug, Clone, Copy)]
pub enum ExpectedCalls {
    /// Exactly `n` calls
    Exactly(u32),
    /// At least `n` calls
    AtLeast(u32),
}

impl ExpectedCalls {
    /// Expects exactly `count` calls.
    ///
    /// # Errors
    /// [`Error::Configuration`] for a non-positive count - an expectation of
    /// zero calls is expressed by not mocking the member at all.
    pub fn exactly(count: u32) -> Result<Self> {
        if count == 0 {
            return Err(Error::Configuration(
                "expected call count must be positive".to_string(),
            ));
        }
        Ok(ExpectedCalls::Exactly(count))
    }

    /// Expects at least `count` calls.
    ///
    /// # Errors
    /// [`Error::Configuration`] for a non-positive count.
    pub fn at_least(count: u32) -> Result<Self> {
        if count == 0 {
            return Err(Error::Configuration(
                "expected call count must be positive".to_string(),
            ));
        }
        Ok(ExpectedCalls::AtLeast(count))
    }
}

impl CallsChecker for ExpectedCalls {
    fn check(&self, actual: u32) -> bool {
        match self {
            ExpectedCalls::Exactly(expected) => actual == *expected,
            ExpectedCalls::AtLeast(expected) => actual >= *expected,
        }
    }

    fn description(&self) -> String {
        match self {
            ExpectedCalls::Exactly(expected) => format!("exactly {expected} calls"),
            ExpectedCalls::AtLeast(expected) => format!("at least {expected} calls"),
        }
    }
}

/// Runtime gate deciding whether a mock applies on a given invocation.
pub type GatePredicate = dyn Fn() -> bool + Send + Sync;

/// Runtime state of one mock binding on one materialized fake object.
pub struct ExecutionContext {
    actual: AtomicU32,
    checker: Option<Arc<dyn CallsChecker>>,
    gate: Option<Arc<GatePredicate>>,
}

impl ExecutionContext {
    /// Creates a context with an optional calls checker and gate.
    #[must_use]
    pub fn new(checker: Option<Arc<dyn CallsChecker>>, gate: Option<Arc<GatePredicate>>) -> Self {
        ExecutionContext {
            actual: AtomicU32::new(0),
            checker,
            gate,
        }
    }

    /// Records one applied invocation and returns the new count.
    pub fn increment(&self) -> u32 {
        self.actual.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The number of applied invocations so far.
    #[must_use]
    pub fn actual_calls(&self) -> u32 {
        self.actual.load(Ordering::Relaxed)
    }

    /// Evaluates the runtime gate; an absent gate is open.
    #[must_use]
    pub fn gate_open(&self) -> bool {
        self.gate.as_ref().map_or(true, |gate| gate())
    }

    /// Checks the actual call count against the configured expectation.
    ///
    /// Without a configured checker any count passes - "called at least once"
    /// is never assumed implicitly.
    ///
    /// # Errors
    /// [`Error::Verification`] when the count fails the predicate.
    pub fn verify(&self) -> Result<()> {
        let actual = self.actual_calls();
        match &self.checker {
            Some(checker) if !checker.check(actual) => Err(Error::Verification {
                expected: checker.description(),
                actual,
            }),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecutionContext(actual: {})", self.actual_calls())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_expectation_rejected() {
        assert!(ExpectedCalls::exactly(0).is_err());
        assert!(ExpectedCalls::at_least(0).is_err());
    }

    #[test]
    fn test_verify_exact() {
        let checker = Arc::new(ExpectedCalls::exactly(2).unwrap());
        let context = ExecutionContext::new(Some(checker), None);
        context.increment();
        assert!(context.verify().is_err());
        context.increment();
        assert!(context.verify().is_ok());
        context.increment();
        assert!(matches!(
            context.verify(),
            Err(Error::Verification { actual: 3, .. })
        ));
    }

    #[test]
    fn test_no_checker_accepts_any_count() {
        let context = ExecutionContext::new(None, None);
        assert!(context.verify().is_ok());
        context.increment();
        assert!(context.verify().is_ok());
    }

    #[test]
    fn test_gate() {
        let open = ExecutionContext::new(None, None);
        assert!(open.gate_open());
        let closed = ExecutionContext::new(None, Some(Arc::new(|| false)));
        assert!(!closed.gate_open());
    }
}
