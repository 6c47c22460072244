//! Invocation expressions and their resolution to source members.
//!
//! An [`InvocationExpr`] is a parsed reference, written in test-authoring
//! code, to a member access: a call, a property access, a field access or an
//! object construction. Expression kinds are a closed tagged enum, and each
//! concern over them - resolving the source member, listing the declared
//! arguments, evaluating the captured values - is one function with one
//! `match` per kind, so adding a concern never risks silently missing a kind.
//!
//! Captured arguments are explicit `{position, value-or-producer}` records
//! ([`CapturedArg`]): a literal captured at configuration time, or a producer
//! closure evaluated at mock-injection or runtime.

use std::fmt;
use std::sync::Arc;

use crate::{
    metadata::{
        member::{MemberKind, SourceMember},
        method::MethodFlags,
        token::Token,
        typesystem::{TypeRegistry, TypeSig},
    },
    runtime::Value,
    Error, Result,
};

/// A captured argument value or the closure producing it.
#[derive(Clone)]
pub enum ArgSource {
    /// A literal captured at configuration time
    Literal(Value),
    /// A producer evaluated when the value is needed
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl ArgSource {
    /// Materializes the value.
    #[must_use]
    pub fn evaluate(&self) -> Value {
        match self {
            ArgSource::Literal(value) => value.clone(),
            ArgSource::Producer(producer) => producer(),
        }
    }
}

impl fmt::Debug for ArgSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSource::Literal(value) => write!(f, "Literal({value})"),
            ArgSource::Producer(_) => write!(f, "Producer(..)"),
        }
    }
}

/// One declared argument of an invocation expression.
#[derive(Debug, Clone)]
pub struct CapturedArg {
    /// Formal parameter position
    pub position: usize,
    /// Value or producer
    pub source: ArgSource,
}

impl CapturedArg {
    /// Captures a literal at the given position.
    #[must_use]
    pub fn literal(position: usize, value: Value) -> Self {
        CapturedArg {
            position,
            source: ArgSource::Literal(value),
        }
    }

    /// Captures a producer closure at the given position.
    #[must_use]
    pub fn producer(
        position: usize,
        producer: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        CapturedArg {
            position,
            source: ArgSource::Producer(Arc::new(producer)),
        }
    }
}

/// A parsed member-access reference, pre-resolution.
///
/// Owned by the configuration that created it; read-only afterward.
#[derive(Debug)]
pub enum InvocationExpr {
    /// An instance or static method call
    MethodCall {
        /// Declaring type token
        declaring_type: Token,
        /// Method name
        name: String,
        /// Declared arguments in parameter order
        args: Vec<CapturedArg>,
    },
    /// A property getter access
    PropertyGet {
        /// Declaring type token
        declaring_type: Token,
        /// Property name, without the accessor prefix
        name: String,
    },
    /// A property setter access
    PropertySet {
        /// Declaring type token
        declaring_type: Token,
        /// Property name, without the accessor prefix
        name: String,
        /// The assigned value
        value: CapturedArg,
    },
    /// A field access
    FieldAccess {
        /// Declaring type token
        declaring_type: Token,
        /// Field name
        name: String,
    },
    /// An object construction
    Constructor {
        /// Declaring type token
        declaring_type: Token,
        /// Generic type arguments bound at the construction site;
        /// empty means any instantiation
        generic_args: Vec<TypeSig>,
        /// Declared constructor arguments
        args: Vec<CapturedArg>,
    },
}

/// Resolves an invocation expression to exactly one source member.
///
/// # Errors
/// [`Error::Resolution`] when the named type or member is not present in the
/// registered metadata, a property lacks the requested accessor, or the
/// declared argument count does not fit the member's formal parameters.
pub fn source_member(expr: &InvocationExpr, registry: &TypeRegistry) -> Result<SourceMember> {
    match expr {
        InvocationExpr::MethodCall {
            declaring_type,
            name,
            args,
        } => {
            let method = find_named_method(registry, *declaring_type, name)?;
            if args.len() != method.params.len() {
                return Err(Error::Resolution(format!(
                    "{name} declares {} arguments but has {} formal parameters",
                    args.len(),
                    method.params.len()
                )));
            }
            Ok(member_of_method(
                registry, *declaring_type, &method, MemberKind::Method, vec![],
            ))
        }
        InvocationExpr::PropertyGet {
            declaring_type,
            name,
        } => {
            let method = find_accessor(registry, *declaring_type, "get_", name)?;
            Ok(member_of_method(
                registry, *declaring_type, &method, MemberKind::PropertyGet, vec![],
            ))
        }
        InvocationExpr::PropertySet {
            declaring_type,
            name,
            value: _,
        } => {
            let method = find_accessor(registry, *declaring_type, "set_", name)?;
            Ok(member_of_method(
                registry, *declaring_type, &method, MemberKind::PropertySet, vec![],
            ))
        }
        InvocationExpr::FieldAccess {
            declaring_type,
            name,
        } => {
            let ty = registry
                .get(declaring_type)
                .ok_or(Error::TypeNotFound(*declaring_type))?;
            for (_, field_token) in ty.fields.iter() {
                if let Some(field) = registry.get_field(field_token) {
                    if field.name == *name {
                        return Ok(SourceMember {
                            declaring_type: *declaring_type,
                            kind: MemberKind::Field,
                            name: field.name.clone(),
                            params: vec![],
                            return_type: field.sig.clone(),
                            is_static: field.is_static(),
                            is_virtual: false,
                            generic_args: vec![],
                            token: field.token,
                        });
                    }
                }
            }
            Err(Error::Resolution(format!(
                "field {name} not found on {}",
                ty.fullname()
            )))
        }
        InvocationExpr::Constructor {
            declaring_type,
            generic_args,
            args,
        } => {
            let method = find_named_method(registry, *declaring_type, ".ctor")?;
            if args.len() != method.params.len() {
                return Err(Error::Resolution(format!(
                    "constructor declares {} arguments but has {} formal parameters",
                    args.len(),
                    method.params.len()
                )));
            }
            Ok(member_of_method(
                registry,
                *declaring_type,
                &method,
                MemberKind::Constructor,
                generic_args.clone(),
            ))
        }
    }
}

/// Lists the declared arguments of an expression, in parameter order.
#[must_use]
pub fn declared_arguments(expr: &InvocationExpr) -> &[CapturedArg] {
    match expr {
        InvocationExpr::MethodCall { args, .. } | InvocationExpr::Constructor { args, .. } => args,
        InvocationExpr::PropertySet { value, .. } => std::slice::from_ref(value),
        InvocationExpr::PropertyGet { .. } | InvocationExpr::FieldAccess { .. } => &[],
    }
}

/// Materializes the declared argument values.
#[must_use]
pub fn evaluated_arguments(expr: &InvocationExpr) -> Vec<Value> {
    declared_arguments(expr)
        .iter()
        .map(|arg| arg.source.evaluate())
        .collect()
}

fn find_named_method(
    registry: &TypeRegistry,
    declaring_type: Token,
    name: &str,
) -> Result<Arc<crate::metadata::method::Method>> {
    let ty = registry
        .get(&declaring_type)
        .ok_or(Error::TypeNotFound(declaring_type))?;
    for (_, method_token) in ty.methods.iter() {
        if let Some(method) = registry.get_method(method_token) {
            if method.name == name {
                return Ok(method);
            }
        }
    }
    Err(Error::Resolution(format!(
        "method {name} not found on {}",
        ty.fullname()
    )))
}

fn find_accessor(
    registry: &TypeRegistry,
    declaring_type: Token,
    prefix: &str,
    property: &str,
) -> Result<Arc<crate::metadata::method::Method>> {
    let accessor = format!("{prefix}{property}");
    let method = find_named_method(registry, declaring_type, &accessor).map_err(|_| {
        Error::Resolution(format!(
            "property {property} has no {prefix} accessor on {declaring_type}"
        ))
    })?;
    if !method.flags.contains(MethodFlags::SPECIAL_NAME) {
        return Err(Error::Resolution(format!(
            "{accessor} exists but is not a property accessor"
        )));
    }
    Ok(method)
}

fn member_of_method(
    _registry: &TypeRegistry,
    declaring_type: Token,
    method: &crate::metadata::method::Method,
    kind: MemberKind,
    generic_args: Vec<TypeSig>,
) -> SourceMember {
    SourceMember {
        declaring_type,
        kind,
        name: method.name.clone(),
        params: method.params.clone(),
        return_type: method.return_type.clone(),
        is_static: method.is_static(),
        is_virtual: method.is_virtual(),
        generic_args,
        token: method.token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::TypeFlavor;
    use crate::metadata::unit::CompiledUnit;

    fn setup() -> (TypeRegistry, Token) {
        let unit = CompiledUnit::new("Expr.Tests");
        let ty = unit.add_type("Expr", "Widget", TypeFlavor::Class);
        unit.add_method(
            ty,
            "Scale",
            MethodFlags::empty(),
            vec![TypeSig::I32],
            TypeSig::I32,
        );
        unit.add_method(
            ty,
            "get_Size",
            MethodFlags::SPECIAL_NAME,
            vec![],
            TypeSig::I32,
        );
        unit.add_method(
            ty,
            ".ctor",
            MethodFlags::RT_SPECIAL_NAME,
            vec![TypeSig::I32],
            TypeSig::Unit,
        );
        unit.add_field(
            ty,
            "count",
            TypeSig::I32,
            crate::metadata::method::FieldFlags::empty(),
        );

        let registry = TypeRegistry::new();
        registry.register_unit(&unit);
        (registry, ty)
    }

    #[test]
    fn test_resolve_method_call() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::MethodCall {
            declaring_type: ty,
            name: "Scale".to_string(),
            args: vec![CapturedArg::literal(0, Value::I32(3))],
        };
        let member = source_member(&expr, &registry).unwrap();
        assert_eq!(member.kind, MemberKind::Method);
        assert_eq!(member.params, vec![TypeSig::I32]);
        assert_eq!(evaluated_arguments(&expr), vec![Value::I32(3)]);
    }

    #[test]
    fn test_argument_count_mismatch_is_resolution_error() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::MethodCall {
            declaring_type: ty,
            name: "Scale".to_string(),
            args: vec![],
        };
        assert!(matches!(
            source_member(&expr, &registry),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_resolve_property_get() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::PropertyGet {
            declaring_type: ty,
            name: "Size".to_string(),
        };
        let member = source_member(&expr, &registry).unwrap();
        assert_eq!(member.name, "get_Size");
        assert_eq!(member.kind, MemberKind::PropertyGet);
    }

    #[test]
    fn test_missing_setter() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::PropertySet {
            declaring_type: ty,
            name: "Size".to_string(),
            value: CapturedArg::literal(0, Value::I32(1)),
        };
        assert!(matches!(
            source_member(&expr, &registry),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_resolve_constructor_captures_generics() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::Constructor {
            declaring_type: ty,
            generic_args: vec![TypeSig::I32],
            args: vec![CapturedArg::literal(0, Value::I32(7))],
        };
        let member = source_member(&expr, &registry).unwrap();
        assert_eq!(member.kind, MemberKind::Constructor);
        assert_eq!(member.generic_args, vec![TypeSig::I32]);
        assert!(!member.has_stack_instance());
    }

    #[test]
    fn test_resolve_field() {
        let (registry, ty) = setup();
        let expr = InvocationExpr::FieldAccess {
            declaring_type: ty,
            name: "count".to_string(),
        };
        let member = source_member(&expr, &registry).unwrap();
        assert_eq!(member.kind, MemberKind::Field);
        assert_eq!(member.return_type, TypeSig::I32);
    }

    #[test]
    fn test_producer_argument() {
        let arg = CapturedArg::producer(0, || Value::I32(41));
        assert_eq!(arg.source.evaluate(), Value::I32(41));
    }
}
