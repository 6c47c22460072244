//! # fakeweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! and traits. Import it to configure, execute and verify a fake without
//! spelling out module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all fakeweave operations
pub use crate::Error;

/// The result type used throughout fakeweave
pub use crate::Result;

// ================================================================================================
// Sessions and Materialization
// ================================================================================================

/// One rewrite session producing one fake object
pub use crate::session::FakeSession;

/// The materialized fake: instance, source type and verification surface
pub use crate::materializer::FakeObjectInfo;

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Compiled units and their identity
pub use crate::metadata::identity::UnitIdentity;
pub use crate::metadata::unit::CompiledUnit;

/// The process-wide unit pool
pub use crate::metadata::pool::UnitPool;

/// Type system essentials
pub use crate::metadata::typesystem::{TypeFlavor, TypeRegistry, TypeSig};

/// Method and field attribute flags
pub use crate::metadata::method::{FieldFlags, MethodFlags};

/// Resolved member identity
pub use crate::metadata::member::{MemberKind, SourceMember};

/// Session diagnostics
pub use crate::metadata::diagnostics::{DiagnosticCategory, DiagnosticSeverity, Diagnostics};

// ================================================================================================
// Expressions and Mocks
// ================================================================================================

/// Invocation expressions and captured arguments
pub use crate::expr::{ArgSource, CapturedArg, InvocationExpr};

/// Mock variants and configuration
pub use crate::mocks::{
    ArgumentChecker, InsertLocation, InsertMock, Mock, MockCollection, RemoveMock, ReplaceMock,
    VerifyMock,
};

// ================================================================================================
// Assembly and Runtime
// ================================================================================================

/// Instruction model and body authoring
pub use crate::assembly::{BodyAssembler, Instruction, MethodBody, OpCode, Operand};

/// Runtime values and verification
pub use crate::runtime::{
    CallsChecker, ExecutionContext, ExpectedCalls, Interpreter, LoadedModule, Value,
};
