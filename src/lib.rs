// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # fakeweave
//!
//! A bytecode rewriting and mock-injection engine for CIL-style compiled units.
//!
//! `fakeweave` lets a test author replace, remove, augment or observe the
//! behavior of a specific member call - a method, property, field or
//! constructor access - *inside the compiled body of another method*, without
//! touching that method's source. The engine resolves a member reference to a
//! matchable instruction pattern, locates and mutates matching instructions
//! across one or more compiled units (respecting virtual dispatch, interface
//! resolution and generic instantiation), reconciles type and member identity
//! across unit boundaries, and materializes a runnable, instrumented object
//! from the result.
//!
//! ## Features
//!
//! - **Instruction-level matching** - Calls, field loads/stores, object
//!   construction, casts and boxing, matched by member identity after generic
//!   substitution
//! - **Safe structural mutation** - Queued edits with one branch-target
//!   remapping pass per method; a failed injection never leaves a
//!   half-mutated body
//! - **Virtual dispatch completeness** - Mocking an interface or virtual
//!   member rewrites every implementation reachable through the type closure
//! - **Cross-unit reconciliation** - Automatically inserted contract mocks
//!   re-point references that span compiled units; a process-wide unit pool
//!   guarantees at-most-once imports under concurrent sessions
//! - **In-process execution** - Mutated units serialize to an in-memory image,
//!   load into a stack-machine interpreter and run with per-mock call
//!   counting, gating and verification
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fakeweave::prelude::*;
//!
//! // Target: int M() => Helper(5), with Helper mocked to return 42.
//! let mut session = FakeSession::new(unit);
//! let helper = session.resolve(&helper_expr)?;
//! session.mocks_mut().add(ReplaceMock::returns(helper, Value::I32(42))?);
//!
//! let fake = session.execute(target_method, vec![])?;
//! assert_eq!(fake.invoke("M", vec![])?, Value::I32(42));
//! fake.verify()?;
//! ```
//!
//! ## Architecture
//!
//! `fakeweave` is organized into several key modules:
//!
//! - [`expr`] - Invocation expressions and source-member resolution
//! - [`mocks`] - Mock variants and the instruction matcher
//! - [`rewriter`] - Call-graph-aware matching and injection driving
//! - [`metadata`] - Units, types, members, the unit pool and the type registry
//! - [`assembly`] - Instruction streams, bodies and the mutation emitter
//! - [`materializer`] - Image serialization, loading and instantiation
//! - [`runtime`] - Execution contexts, hooks and the interpreter
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Configuration and
//! resolution errors surface eagerly at the call that caused them; matching,
//! injection, cross-unit and materialization errors abort the whole session;
//! verification failures are ordinary, distinguishable expectation errors.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Instruction streams, method bodies and the queued-edit emitter.
pub mod assembly;

/// Invocation expressions and per-concern resolution over their closed kind set.
pub mod expr;

/// Image serialization, loading and fake-object materialization.
pub mod materializer;

/// Units, types, members, identity, the unit pool and diagnostics.
pub mod metadata;

/// Mock variants, argument checkers and the instruction matcher.
pub mod mocks;

/// The method / call-graph rewriter.
pub mod rewriter;

/// Execution contexts, runtime hooks and the interpreter.
pub mod runtime;

/// Fake sessions tying configuration, rewrite and materialization together.
pub mod session;

/// The result type used throughout fakeweave.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use materializer::FakeObjectInfo;
pub use session::FakeSession;
