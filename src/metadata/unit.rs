//! Compiled units: the containers the rewriter mutates and the materializer
//! serializes.
//!
//! A [`CompiledUnit`] owns type, method and field definitions plus the method
//! bodies, all keyed by token. Bodies live beside the definitions rather than
//! inside them so the rewriter can take one out for mutation (an emitter in
//! flight) while matchers keep reading the definitions.
//!
//! Cross-unit references are explicit rows: a [`TypeRef`] names a type defined
//! in another unit, a [`MemberRef`] a method or field on such a type. Imports
//! are idempotent - re-importing a definition returns the existing reference
//! row - which is what keeps repeated contract-mock injections from growing
//! the reference tables.
//!
//! # Thread Safety
//!
//! All interior collections are concurrent maps; a unit can be read by
//! matchers while the materializer's processor appends synthesized fields.

use std::sync::Arc;

use dashmap::DashMap;
use uguid::Guid;

use crate::{
    assembly::MethodBody,
    metadata::{
        identity::UnitIdentity,
        method::{FieldDef, FieldFlags, Method, MethodFlags},
        token::{self, Token},
        typesystem::{TypeFlavor, TypeSig, UnitType, UnitTypeRc},
    },
    Error, Result,
};

/// A reference to a type defined in another compiled unit.
#[derive(Debug, Clone)]
pub struct TypeRef {
    /// Token of this reference row
    pub token: Token,
    /// The referenced type definition token in its home unit
    pub target: Token,
    /// Simple name of the home unit
    pub unit_name: String,
    /// MVID of the home unit
    pub unit_mvid: Guid,
}

/// A reference to a member defined in another compiled unit.
#[derive(Debug, Clone)]
pub struct MemberRef {
    /// Token of this reference row
    pub token: Token,
    /// The referenced member definition token in its home unit
    pub target: Token,
    /// The [`TypeRef`] row of the member's declaring type
    pub declaring_ref: Token,
}

/// One compiled unit: types, members, bodies and cross-unit reference rows.
pub struct CompiledUnit {
    name: String,
    mvid: Guid,
    types: DashMap<u32, UnitTypeRc>,
    methods: DashMap<u32, Arc<Method>>,
    fields: DashMap<u32, Arc<FieldDef>>,
    bodies: DashMap<u32, MethodBody>,
    type_refs: DashMap<u32, TypeRef>,
    member_refs: DashMap<u32, MemberRef>,
    /// external definition token -> local reference row
    import_index: DashMap<u32, Token>,
}

impl CompiledUnit {
    /// Creates an empty unit with a fresh MVID.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mvid = UnitIdentity::fresh_mvid(&name);
        Self::with_mvid(name, mvid)
    }

    /// Creates an empty unit with an explicit MVID.
    ///
    /// Intended for loaders reconstructing a serialized unit and for tests that
    /// need to provoke identity collisions.
    #[must_use]
    pub fn with_mvid(name: impl Into<String>, mvid: Guid) -> Self {
        CompiledUnit {
            name: name.into(),
            mvid,
            types: DashMap::new(),
            methods: DashMap::new(),
            fields: DashMap::new(),
            bodies: DashMap::new(),
            type_refs: DashMap::new(),
            member_refs: DashMap::new(),
            import_index: DashMap::new(),
        }
    }

    /// Simple name of the unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MVID of the unit.
    #[must_use]
    pub fn mvid(&self) -> Guid {
        self.mvid
    }

    /// Computes the unit's full identity, digesting the current metadata.
    ///
    /// The digest covers names, member shapes and body lengths; two units that
    /// differ structurally produce different digests even under one name+mvid.
    #[must_use]
    pub fn identity(&self) -> UnitIdentity {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.extend_from_slice(&self.mvid.to_bytes());

        let mut types: Vec<UnitTypeRc> = self.types();
        types.sort_by_key(|ty| ty.token);
        for ty in &types {
            buffer.extend_from_slice(&ty.token.value().to_le_bytes());
            buffer.extend_from_slice(ty.fullname().as_bytes());
            buffer.push(ty.flavor.to_byte());
        }

        let mut methods: Vec<Arc<Method>> = self.methods();
        methods.sort_by_key(|m| m.token);
        for method in &methods {
            buffer.extend_from_slice(&method.token.value().to_le_bytes());
            buffer.extend_from_slice(method.name.as_bytes());
            buffer.push(method.params.len() as u8);
            let body_len = self
                .bodies
                .get(&method.token.value())
                .map(|b| b.instructions.len())
                .unwrap_or(0);
            buffer.extend_from_slice(&(body_len as u32).to_le_bytes());
        }

        let mut fields: Vec<Arc<FieldDef>> = self.fields();
        fields.sort_by_key(|f| f.token);
        for field in &fields {
            buffer.extend_from_slice(&field.token.value().to_le_bytes());
            buffer.extend_from_slice(field.name.as_bytes());
        }

        UnitIdentity::new(self.name.clone(), self.mvid, UnitIdentity::digest_of(&buffer))
    }

    /// Adds a type definition and returns its token.
    pub fn add_type(&self, namespace: &str, name: &str, flavor: TypeFlavor) -> Token {
        let token = Token::alloc(token::TABLE_TYPE_DEF);
        self.types
            .insert(token.value(), Arc::new(UnitType::new(token, namespace, name, flavor)));
        token
    }

    /// Sets the base type of a definition. Only valid before registration.
    pub fn set_base(&self, ty: Token, base: Token) {
        if let Some(mut entry) = self.types.get_mut(&ty.value()) {
            Arc::make_mut(entry.value_mut()).base = Some(base);
        }
    }

    /// Records an implemented interface. Only valid before registration.
    pub fn add_interface_impl(&self, ty: Token, iface: Token) {
        if let Some(mut entry) = self.types.get_mut(&ty.value()) {
            Arc::make_mut(entry.value_mut()).interfaces.push(iface);
        }
    }

    /// Declares generic parameters on a type. Only valid before registration.
    pub fn add_generic_params(&self, ty: Token, names: &[&str]) {
        if let Some(mut entry) = self.types.get_mut(&ty.value()) {
            Arc::make_mut(entry.value_mut())
                .generic_params
                .extend(names.iter().map(|n| (*n).to_string()));
        }
    }

    /// Adds a method definition and returns its token.
    pub fn add_method(
        &self,
        declaring_type: Token,
        name: &str,
        flags: MethodFlags,
        params: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Token {
        let token = Token::alloc(token::TABLE_METHOD_DEF);
        let method = Method {
            token,
            declaring_type,
            name: name.to_string(),
            flags,
            params,
            return_type,
            generic_params: 0,
        };
        self.methods.insert(token.value(), Arc::new(method));
        if let Some(ty) = self.types.get(&declaring_type.value()) {
            ty.methods.push(token);
        }
        token
    }

    /// Adds a field definition and returns its token.
    pub fn add_field(
        &self,
        declaring_type: Token,
        name: &str,
        sig: TypeSig,
        flags: FieldFlags,
    ) -> Token {
        let token = Token::alloc(token::TABLE_FIELD);
        let field = FieldDef {
            token,
            declaring_type,
            name: name.to_string(),
            sig,
            flags,
        };
        self.fields.insert(token.value(), Arc::new(field));
        if let Some(ty) = self.types.get(&declaring_type.value()) {
            ty.fields.push(token);
        }
        token
    }

    /// Installs or replaces a method body.
    pub fn set_body(&self, method: Token, body: MethodBody) {
        self.bodies.insert(method.value(), body);
    }

    /// Takes a body out of the unit for mutation.
    ///
    /// The caller must put a body back (original or committed) before the unit
    /// is serialized.
    #[must_use]
    pub fn take_body(&self, method: Token) -> Option<MethodBody> {
        self.bodies.remove(&method.value()).map(|(_, body)| body)
    }

    /// Clones a method body for reading.
    #[must_use]
    pub fn body(&self, method: Token) -> Option<MethodBody> {
        self.bodies.get(&method.value()).map(|b| b.value().clone())
    }

    /// Looks up a type definition.
    #[must_use]
    pub fn get_type(&self, token: Token) -> Option<UnitTypeRc> {
        self.types.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a method definition.
    #[must_use]
    pub fn get_method(&self, token: Token) -> Option<Arc<Method>> {
        self.methods.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a field definition.
    #[must_use]
    pub fn get_field(&self, token: Token) -> Option<Arc<FieldDef>> {
        self.fields.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a cross-unit type reference row.
    #[must_use]
    pub fn get_type_ref(&self, token: Token) -> Option<TypeRef> {
        self.type_refs.get(&token.value()).map(|e| e.value().clone())
    }

    /// Looks up a cross-unit member reference row.
    #[must_use]
    pub fn get_member_ref(&self, token: Token) -> Option<MemberRef> {
        self.member_refs
            .get(&token.value())
            .map(|e| e.value().clone())
    }

    /// Returns true when the token names a definition row of this unit.
    #[must_use]
    pub fn defines(&self, token: Token) -> bool {
        self.types.contains_key(&token.value())
            || self.methods.contains_key(&token.value())
            || self.fields.contains_key(&token.value())
    }

    /// Chases a reference row to its definition token.
    ///
    /// Definition tokens of this unit resolve to themselves; reference rows
    /// resolve to their cross-unit target. Unknown tokens resolve to `None`.
    #[must_use]
    pub fn resolve_ref(&self, token: Token) -> Option<Token> {
        if self.defines(token) {
            return Some(token);
        }
        if let Some(member) = self.member_refs.get(&token.value()) {
            return Some(member.target);
        }
        if let Some(ty) = self.type_refs.get(&token.value()) {
            return Some(ty.target);
        }
        None
    }

    /// Imports a type defined in another unit, returning the reference row.
    ///
    /// Idempotent per target token.
    pub fn import_type(&self, home: &UnitIdentity, target: Token) -> Token {
        if let Some(existing) = self.import_index.get(&target.value()) {
            return *existing;
        }
        let token = Token::alloc(token::TABLE_TYPE_REF);
        self.type_refs.insert(
            token.value(),
            TypeRef {
                token,
                target,
                unit_name: home.name.clone(),
                unit_mvid: home.mvid,
            },
        );
        self.import_index.insert(target.value(), token);
        token
    }

    /// Imports a member defined in another unit, returning the reference row.
    ///
    /// The member's declaring type is imported alongside. Idempotent per
    /// target token.
    ///
    /// # Errors
    /// [`Error::CrossUnit`] when the declaring type cannot be determined.
    pub fn import_member(
        &self,
        home: &UnitIdentity,
        declaring_type: Token,
        target: Token,
    ) -> Result<Token> {
        if declaring_type.is_null() {
            return Err(Error::CrossUnit(format!(
                "member {target} has no declaring type to import from {home}"
            )));
        }
        if let Some(existing) = self.import_index.get(&target.value()) {
            return Ok(*existing);
        }
        let declaring_ref = self.import_type(home, declaring_type);
        let token = Token::alloc(token::TABLE_MEMBER_REF);
        self.member_refs.insert(
            token.value(),
            MemberRef {
                token,
                target,
                declaring_ref,
            },
        );
        self.import_index.insert(target.value(), token);
        Ok(token)
    }

    /// All type definitions, in no particular order.
    #[must_use]
    pub fn types(&self) -> Vec<UnitTypeRc> {
        self.types.iter().map(|e| e.value().clone()).collect()
    }

    /// All method definitions, in no particular order.
    #[must_use]
    pub fn methods(&self) -> Vec<Arc<Method>> {
        self.methods.iter().map(|e| e.value().clone()).collect()
    }

    /// All field definitions, in no particular order.
    #[must_use]
    pub fn fields(&self) -> Vec<Arc<FieldDef>> {
        self.fields.iter().map(|e| e.value().clone()).collect()
    }

    /// All cross-unit type reference rows.
    #[must_use]
    pub fn type_refs(&self) -> Vec<TypeRef> {
        self.type_refs.iter().map(|e| e.value().clone()).collect()
    }

    /// All cross-unit member reference rows.
    #[must_use]
    pub fn member_refs(&self) -> Vec<MemberRef> {
        self.member_refs.iter().map(|e| e.value().clone()).collect()
    }

    /// Inserts a reconstructed type row. Loader use only.
    pub(crate) fn insert_type(&self, ty: UnitTypeRc) {
        self.types.insert(ty.token.value(), ty);
    }

    /// Inserts a reconstructed method row. Loader use only.
    pub(crate) fn insert_method(&self, method: Arc<Method>) {
        if let Some(ty) = self.types.get(&method.declaring_type.value()) {
            ty.methods.push(method.token);
        }
        self.methods.insert(method.token.value(), method);
    }

    /// Inserts a reconstructed field row. Loader use only.
    pub(crate) fn insert_field(&self, field: Arc<FieldDef>) {
        if let Some(ty) = self.types.get(&field.declaring_type.value()) {
            ty.fields.push(field.token);
        }
        self.fields.insert(field.token.value(), field);
    }

    /// Inserts a reconstructed type reference row. Loader use only.
    pub(crate) fn insert_type_ref(&self, row: TypeRef) {
        self.import_index.insert(row.target.value(), row.token);
        self.type_refs.insert(row.token.value(), row);
    }

    /// Inserts a reconstructed member reference row. Loader use only.
    pub(crate) fn insert_member_ref(&self, row: MemberRef) {
        self.import_index.insert(row.target.value(), row.token);
        self.member_refs.insert(row.token.value(), row);
    }
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CompiledUnit({}, {} types, {} methods)",
            self.name,
            self.types.len(),
            self.methods.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::BodyAssembler;

    #[test]
    fn test_member_lists_track_additions() {
        let unit = CompiledUnit::new("Lib");
        let ty = unit.add_type("Lib", "Widget", TypeFlavor::Class);
        let method = unit.add_method(ty, "Run", MethodFlags::empty(), vec![], TypeSig::Unit);
        let field = unit.add_field(ty, "count", TypeSig::I32, FieldFlags::empty());

        let widget = unit.get_type(ty).unwrap();
        assert_eq!(widget.methods.count(), 1);
        assert_eq!(widget.fields.count(), 1);
        assert!(unit.defines(method));
        assert!(unit.defines(field));
    }

    #[test]
    fn test_take_body_removes() {
        let unit = CompiledUnit::new("Lib");
        let ty = unit.add_type("Lib", "Widget", TypeFlavor::Class);
        let method = unit.add_method(ty, "Run", MethodFlags::empty(), vec![], TypeSig::Unit);
        unit.set_body(method, BodyAssembler::new().ret().finish());

        let taken = unit.take_body(method).unwrap();
        assert!(unit.body(method).is_none());
        unit.set_body(method, taken);
        assert!(unit.body(method).is_some());
    }

    #[test]
    fn test_import_is_idempotent() {
        let home = CompiledUnit::new("Home");
        let home_ty = home.add_type("Home", "Thing", TypeFlavor::Class);
        let home_member =
            home.add_method(home_ty, "Act", MethodFlags::empty(), vec![], TypeSig::Unit);

        let unit = CompiledUnit::new("Target");
        let identity = home.identity();
        let first = unit.import_member(&identity, home_ty, home_member).unwrap();
        let second = unit.import_member(&identity, home_ty, home_member).unwrap();
        assert_eq!(first, second);
        assert_eq!(unit.member_refs().len(), 1);
        assert_eq!(unit.type_refs().len(), 1);
        assert_eq!(unit.resolve_ref(first), Some(home_member));
    }

    #[test]
    fn test_identity_digest_tracks_structure() {
        let unit = CompiledUnit::new("Lib");
        let before = unit.identity();
        unit.add_type("Lib", "Widget", TypeFlavor::Class);
        let after = unit.identity();
        assert_eq!(before, after, "name+mvid identity is stable");
        assert!(before.colliding(&after), "digest must change with structure");
    }
}
