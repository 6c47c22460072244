//! Type system for the compiled-unit model.
//!
//! # Key Components
//! - [`TypeSig`] - Signature language for parameters, returns, locals and fields
//! - [`TypeFlavor`] - Class / value type / interface classification
//! - [`UnitType`] - A type definition and its append-only member lists
//! - [`TypeRegistry`] - Session-wide registry with the memoized
//!   ancestor/descendant closure used for virtual dispatch expansion

mod registry;
mod types;

pub use registry::TypeRegistry;
pub use types::{sigs_equal_erased, TypeFlavor, TypeSig, UnitType, UnitTypeRc};
