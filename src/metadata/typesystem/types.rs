//! Core type-system entities: type flavors, signatures and type definitions.
//!
//! # Key Types
//! - [`TypeFlavor`] - Classification of a type (class, value type, interface)
//! - [`TypeSig`] - Small signature language for parameter, return and field types
//! - [`UnitType`] - A type definition within a compiled unit

use std::fmt;
use std::sync::Arc;

use crate::metadata::token::Token;

/// Classification of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TypeFlavor {
    /// A reference type with a vtable
    Class,
    /// A value type copied on assignment
    ValueType,
    /// An interface contract with no state
    Interface,
}

impl TypeFlavor {
    /// Encodes the flavor as a single byte for the module image.
    #[must_use]
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            TypeFlavor::Class => 0,
            TypeFlavor::ValueType => 1,
            TypeFlavor::Interface => 2,
        }
    }

    /// Decodes a flavor byte from a module image.
    pub(crate) fn from_byte(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(TypeFlavor::Class),
            1 => Ok(TypeFlavor::ValueType),
            2 => Ok(TypeFlavor::Interface),
            _ => Err(malformed_error!("Invalid type flavor byte 0x{:02x}", value)),
        }
    }
}

/// Signature of a parameter, return value, local or field.
///
/// The signature language is deliberately small: the primitives the instruction
/// set can load as literals, named types for everything defined in a unit, and
/// `Var` for an open generic parameter by position. [`TypeSig::Unit`] is the
/// no-value return signature; a replace mock configured against it is a
/// configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value (a `void` return)
    Unit,
    /// Boolean
    Bool,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 64-bit float
    F64,
    /// Immutable string
    Str,
    /// Any object reference
    Object,
    /// A named type, by full name
    Named(String),
    /// An open generic parameter, by position
    Var(u16),
}

impl TypeSig {
    /// Returns true for the no-value signature.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self, TypeSig::Unit)
    }

    /// Erases generic parameters to a single marker.
    ///
    /// Source-member equality compares parameter sequences after erasure, so
    /// `List<T>.Add(T)` matches `Add` regardless of the instantiation present at
    /// a given call site.
    #[must_use]
    pub fn erased(&self) -> TypeSig {
        match self {
            TypeSig::Var(_) => TypeSig::Var(0),
            other => other.clone(),
        }
    }

    /// Substitutes the call site's generic arguments into this signature.
    ///
    /// An out-of-range position is left open; the erased comparison downstream
    /// still treats it as a generic parameter.
    #[must_use]
    pub fn substitute(&self, args: &[TypeSig]) -> TypeSig {
        match self {
            TypeSig::Var(index) => args
                .get(usize::from(*index))
                .cloned()
                .unwrap_or(TypeSig::Var(*index)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Unit => write!(f, "unit"),
            TypeSig::Bool => write!(f, "bool"),
            TypeSig::I32 => write!(f, "i32"),
            TypeSig::I64 => write!(f, "i64"),
            TypeSig::F64 => write!(f, "f64"),
            TypeSig::Str => write!(f, "str"),
            TypeSig::Object => write!(f, "object"),
            TypeSig::Named(name) => write!(f, "{name}"),
            TypeSig::Var(index) => write!(f, "!{index}"),
        }
    }
}

/// Compares two parameter sequences after generic erasure.
#[must_use]
pub fn sigs_equal_erased(a: &[TypeSig], b: &[TypeSig]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(left, right)| left.erased() == right.erased())
}

/// A type definition within a compiled unit.
///
/// Member lists are append-only (`boxcar::Vec`) so the materializer's processor
/// can add state-holder fields to an already-registered type without taking a
/// write lock over the whole definition.
#[derive(Clone)]
pub struct UnitType {
    /// Token identifying this type
    pub token: Token,
    /// Namespace, possibly empty
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Classification
    pub flavor: TypeFlavor,
    /// Base type token, `None` for roots and interfaces
    pub base: Option<Token>,
    /// Implemented interface tokens
    pub interfaces: Vec<Token>,
    /// Names of declared generic parameters
    pub generic_params: Vec<String>,
    /// Tokens of declared methods, append-only
    pub methods: Arc<boxcar::Vec<Token>>,
    /// Tokens of declared fields, append-only
    pub fields: Arc<boxcar::Vec<Token>>,
}

/// Reference counted pointer to a [`UnitType`].
pub type UnitTypeRc = Arc<UnitType>;

impl UnitType {
    /// Creates a new type definition with empty member lists.
    #[must_use]
    pub fn new(
        token: Token,
        namespace: impl Into<String>,
        name: impl Into<String>,
        flavor: TypeFlavor,
    ) -> Self {
        UnitType {
            token,
            namespace: namespace.into(),
            name: name.into(),
            flavor,
            base: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            methods: Arc::new(boxcar::Vec::new()),
            fields: Arc::new(boxcar::Vec::new()),
        }
    }

    /// Full name in `Namespace.Name` form.
    #[must_use]
    pub fn fullname(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns true for interface definitions.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flavor == TypeFlavor::Interface
    }

    /// Returns true for value type definitions.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flavor == TypeFlavor::ValueType
    }
}

impl fmt::Debug for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitType({} @ {})", self.fullname(), self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_erasure() {
        assert_eq!(TypeSig::Var(3).erased(), TypeSig::Var(0));
        assert_eq!(TypeSig::I32.erased(), TypeSig::I32);
    }

    #[test]
    fn test_sig_substitution() {
        let args = vec![TypeSig::I32, TypeSig::Str];
        assert_eq!(TypeSig::Var(1).substitute(&args), TypeSig::Str);
        assert_eq!(TypeSig::Var(5).substitute(&args), TypeSig::Var(5));
        assert_eq!(TypeSig::Bool.substitute(&args), TypeSig::Bool);
    }

    #[test]
    fn test_sigs_equal_erased() {
        let open = vec![TypeSig::Var(0), TypeSig::I32];
        let closed = vec![TypeSig::Var(7), TypeSig::I32];
        assert!(sigs_equal_erased(&open, &closed));
        assert!(!sigs_equal_erased(&open, &[TypeSig::I32]));
    }

    #[test]
    fn test_fullname() {
        let ty = UnitType::new(Token::new(0x02000001), "Calc", "Engine", TypeFlavor::Class);
        assert_eq!(ty.fullname(), "Calc.Engine");
        let global = UnitType::new(Token::new(0x02000002), "", "Engine", TypeFlavor::Class);
        assert_eq!(global.fullname(), "Engine");
    }
}
