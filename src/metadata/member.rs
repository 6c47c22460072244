//! Resolved source-member identity.
//!
//! A [`SourceMember`] is the immutable identity of the thing a mock targets:
//! declaring type, member name and parameter-type signature, independent of
//! which generic instantiation or override is actually present in a given
//! instruction. It is produced exactly once per invocation expression by
//! [`crate::expr::source_member`] and read-only afterward.

use std::fmt;

use crate::metadata::token::Token;
use crate::metadata::typesystem::{sigs_equal_erased, TypeSig};

/// The kind of member an invocation expression resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MemberKind {
    /// An instance or static method call
    Method,
    /// A property getter access
    PropertyGet,
    /// A property setter access
    PropertySet,
    /// A field load or store
    Field,
    /// An object construction
    Constructor,
}

/// Identity of a member being mocked.
///
/// Two source members are equal iff their declaring type, name and
/// parameter-type sequence are equal after generic-parameter erasure. Return
/// type, flags and the resolved definition token deliberately do not
/// participate in equality.
#[derive(Debug, Clone)]
pub struct SourceMember {
    /// Declaring type token
    pub declaring_type: Token,
    /// Kind of member
    pub kind: MemberKind,
    /// Resolved member name (`get_X`/`set_X` for accessors, `.ctor` for constructors)
    pub name: String,
    /// Formal parameter signatures
    pub params: Vec<TypeSig>,
    /// Return signature; [`TypeSig::Unit`] for no value
    pub return_type: TypeSig,
    /// Member does not consume a stack instance
    pub is_static: bool,
    /// Member participates in virtual/interface dispatch
    pub is_virtual: bool,
    /// Generic type arguments captured for constructor expressions;
    /// empty means any instantiation matches
    pub generic_args: Vec<TypeSig>,
    /// Resolved definition token (method or field)
    pub token: Token,
}

impl SourceMember {
    /// Returns true when a matched instruction has an instance on the stack
    /// below the arguments.
    ///
    /// Constructions allocate their instance, so only non-static non-constructor
    /// members carry one.
    #[must_use]
    pub fn has_stack_instance(&self) -> bool {
        !self.is_static && self.kind != MemberKind::Constructor
    }

    /// Number of operand-stack slots a matched call consumes.
    #[must_use]
    pub fn consumed_slots(&self) -> usize {
        self.params.len() + usize::from(self.has_stack_instance())
    }
}

impl PartialEq for SourceMember {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_type == other.declaring_type
            && self.name == other.name
            && sigs_equal_erased(&self.params, &other.params)
    }
}

impl Eq for SourceMember {}

impl fmt::Display for SourceMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)?;
        write!(f, "(")?;
        for (position, param) in self.params.iter().enumerate() {
            if position > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}
