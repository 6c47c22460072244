use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Variants are grouped by the phase of a fake session in which they arise. Configuration and
/// resolution errors are raised eagerly at the call that caused them. Matching, injection,
/// cross-unit and materialization errors abort the whole rewrite session, since a half-mutated
/// method body is unsafe to load. Verification errors are ordinary expectation failures raised
/// after test execution and are deliberately distinguishable from the structural categories.
///
/// # Error Categories
///
/// ## Configuration and Resolution
/// - [`Error::Configuration`] - An invalid mock specification, detected before rewriting starts
/// - [`Error::Resolution`] - An invocation expression that cannot be resolved to a source member
///
/// ## Matching and Injection
/// - [`Error::InjectionConflict`] - Two mutually exclusive mocks matched the same instruction
/// - [`Error::StackImbalance`] - An injection precondition on the operand stack cannot be met
///
/// ## Cross-Unit Reconciliation
/// - [`Error::CrossUnit`] - A type or member required for import is missing from the closure
/// - [`Error::UnitCollision`] - Two structurally different units share one identity
/// - [`Error::TypeNotFound`] - A type token is not registered in the type system
/// - [`Error::MemberNotFound`] - A member lookup against loaded metadata failed
/// - [`Error::HierarchyCycle`] - The ancestor/descendant walk observed a cycle
///
/// ## Materialization and Execution
/// - [`Error::Materialization`] - Serialization or instantiation of a rewritten unit failed
/// - [`Error::Malformed`] - A module image is corrupt or truncated
/// - [`Error::OutOfBounds`] - A read beyond the end of a module image
/// - [`Error::Execution`] - The interpreter faulted while driving a loaded module
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded during execution
///
/// ## Verification
/// - [`Error::Verification`] - The actual call count failed the configured predicate
#[derive(Error, Debug)]
pub enum Error {
    /// An invalid mock specification.
    ///
    /// Raised eagerly at configuration time, never deferred to rewriting: argument-checker
    /// count mismatches, non-positive expected-call constraints, or a replace mock configured
    /// against a member with no return value.
    #[error("Invalid mock configuration: {0}")]
    Configuration(String),

    /// An invocation expression could not be resolved to a source member.
    ///
    /// The expression names a type or member that does not exist in the registered metadata,
    /// or its captured arguments do not fit the member's formal parameters.
    #[error("Failed to resolve invocation expression: {0}")]
    Resolution(String),

    /// Two mutually exclusive mocks matched the same instruction.
    ///
    /// At most one replace/remove mock may apply per instruction. This is a configuration
    /// mistake surfaced at rewrite time, not silently resolved by mock order.
    #[error("Conflicting replace/remove mocks matched instruction {index} of method {method}")]
    InjectionConflict {
        /// The method whose body was being rewritten
        method: Token,
        /// Index of the contested instruction within the method body
        index: usize,
    },

    /// An injection would leave the operand stack in an invalid state.
    ///
    /// For example, an instance call was matched but no stack instance is present at the
    /// injection site.
    #[error("Stack imbalance at instruction {index} of method {method}: {message}")]
    StackImbalance {
        /// The method whose body was being rewritten
        method: Token,
        /// Index of the offending instruction
        index: usize,
        /// What precondition failed
        message: String,
    },

    /// A type or member required for cross-unit import could not be found.
    ///
    /// Re-pointing the reference would be unsound, so the rewrite session is aborted.
    #[error("Cross-unit reference cannot be reconciled: {0}")]
    CrossUnit(String),

    /// A unit failed to register into the pool.
    ///
    /// Another unit with the same identity but a different content digest is already
    /// registered; importing both would make member references ambiguous.
    #[error("Unit identity collision in pool: {0}")]
    UnitCollision(String),

    /// Failed to find a type in the type system.
    #[error("Failed to find type in the type system - {0}")]
    TypeNotFound(Token),

    /// A member lookup against loaded metadata failed.
    #[error("Failed to find member - {0}")]
    MemberNotFound(String),

    /// The type hierarchy walk observed a cycle.
    ///
    /// Base-type and interface edges are acyclic by construction in the host type system;
    /// an observed cycle is a fatal metadata inconsistency, not a recoverable case.
    #[error("Cycle observed in type hierarchy at {0}")]
    HierarchyCycle(Token),

    /// Serialization, loading or instantiation of a rewritten unit failed.
    ///
    /// Always fatal and non-retryable within the session; the caller may retry by
    /// constructing a new session.
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// A module image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a module image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The interpreter faulted while executing a loaded module.
    ///
    /// Covers invalid casts, operand stack underflow, missing method bodies and
    /// exceeded step limits.
    #[error("Execution fault: {0}")]
    Execution(String),

    /// Reached the maximum call depth allowed during execution.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The actual call count failed the configured predicate.
    ///
    /// Raised by [`crate::runtime::ExecutionContext::verify`] after the test body has run.
    /// This represents an expectation about test behavior, not a malformed rewrite.
    #[error("Verification failed: expected {expected}, actual call count was {actual}")]
    Verification {
        /// Description of the configured calls checker
        expected: String,
        /// The observed call count
        actual: u32,
    },
}
