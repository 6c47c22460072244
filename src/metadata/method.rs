//! Method and field definitions with their attribute flags.
//!
//! # Key Types
//! - [`MethodFlags`], [`FieldFlags`]: attribute bitmasks
//! - [`Method`]: a method definition, optionally backed by a body in its unit
//! - [`FieldDef`]: a field definition

use bitflags::bitflags;

use crate::metadata::token::Token;
use crate::metadata::typesystem::TypeSig;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method attribute flags
    pub struct MethodFlags: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special (property accessors)
        const SPECIAL_NAME = 0x0800;
        /// Runtime provides special behavior, depending upon the name of the method
        const RT_SPECIAL_NAME = 0x1000;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Field attribute flags
    pub struct FieldFlags: u16 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written after
        const INIT_ONLY = 0x0020;
        /// Field was appended by the materializer's processor, not authored
        const SYNTHESIZED = 0x4000;
    }
}

/// A method definition.
///
/// The body lives in the owning [`crate::metadata::unit::CompiledUnit`] rather
/// than inline, so the rewriter can take a body out for mutation while the
/// definition stays readable to matchers scanning other methods.
#[derive(Debug, Clone)]
pub struct Method {
    /// Token identifying this method
    pub token: Token,
    /// Declaring type token
    pub declaring_type: Token,
    /// Method name; accessors use the `get_`/`set_` prefix, constructors are `.ctor`
    pub name: String,
    /// Attribute flags
    pub flags: MethodFlags,
    /// Formal parameter signatures, excluding the instance
    pub params: Vec<TypeSig>,
    /// Return signature, [`TypeSig::Unit`] for no value
    pub return_type: TypeSig,
    /// Number of declared generic parameters
    pub generic_params: u16,
}

impl Method {
    /// Returns true when invocations do not consume a stack instance.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns true when the method participates in virtual dispatch.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags
            .intersects(MethodFlags::VIRTUAL | MethodFlags::ABSTRACT)
    }

    /// Returns true for constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::RT_SPECIAL_NAME) && self.name == ".ctor"
    }

    /// Number of operand-stack slots one invocation consumes.
    #[must_use]
    pub fn consumed_slots(&self) -> usize {
        self.params.len() + usize::from(!self.is_static() && !self.is_constructor())
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Token identifying this field
    pub token: Token,
    /// Declaring type token
    pub declaring_type: Token,
    /// Field name
    pub name: String,
    /// Field signature
    pub sig: TypeSig,
    /// Attribute flags
    pub flags: FieldFlags,
}

impl FieldDef {
    /// Returns true for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}
