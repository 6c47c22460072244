//! Metadata model of the compiled-unit world.
//!
//! # Key Components
//!
//! - [`token`] - Table+row identity for every metadata entity
//! - [`identity`] - Unit identity with MVID and content digest
//! - [`typesystem`] - Types, signatures and the session-wide registry
//! - [`method`] - Method and field definitions with attribute flags
//! - [`member`] - Resolved source-member identity for mocking
//! - [`unit`] - Compiled units and cross-unit reference rows
//! - [`pool`] - Process-wide unit pool with insert-if-absent semantics
//! - [`diagnostics`] - Lock-free diagnostic collection

pub mod diagnostics;
pub mod identity;
pub mod member;
pub mod method;
pub mod pool;
pub mod token;
pub mod typesystem;
pub mod unit;
