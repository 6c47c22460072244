//! Serialization of a compiled unit into its in-memory module image.
//!
//! The image is a transient wire form: magic and version, unit identity, type
//! rows, field rows, method rows with inline bodies, and the cross-unit
//! reference tables. Rows are emitted in token order so identical units
//! produce identical images.

use crate::{
    assembly::{Instruction, MethodBody, Operand},
    file::io::{write_le, write_str},
    metadata::{typesystem::TypeSig, unit::CompiledUnit},
};

/// Image magic: `FKWV`.
pub(crate) const IMAGE_MAGIC: u32 = 0x464B_5756;
/// Current image format version.
pub(crate) const IMAGE_VERSION: u16 = 1;

/// Serializes a unit into its binary module image.
#[must_use]
pub fn write_unit(unit: &CompiledUnit) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024);
    write_le(&mut out, IMAGE_MAGIC);
    write_le(&mut out, IMAGE_VERSION);
    write_str(&mut out, unit.name());
    out.extend_from_slice(&unit.mvid().to_bytes());

    let mut types = unit.types();
    types.sort_by_key(|ty| ty.token);
    write_le(&mut out, types.len() as u32);
    for ty in &types {
        write_le(&mut out, ty.token.value());
        write_str(&mut out, &ty.namespace);
        write_str(&mut out, &ty.name);
        write_le(&mut out, ty.flavor.to_byte());
        write_le(&mut out, ty.base.map_or(0, |base| base.value()));
        write_le(&mut out, ty.interfaces.len() as u16);
        for iface in &ty.interfaces {
            write_le(&mut out, iface.value());
        }
        write_le(&mut out, ty.generic_params.len() as u16);
        for param in &ty.generic_params {
            write_str(&mut out, param);
        }
    }

    let mut fields = unit.fields();
    fields.sort_by_key(|field| field.token);
    write_le(&mut out, fields.len() as u32);
    for field in &fields {
        write_le(&mut out, field.token.value());
        write_le(&mut out, field.declaring_type.value());
        write_str(&mut out, &field.name);
        write_sig(&mut out, &field.sig);
        write_le(&mut out, field.flags.bits());
    }

    let mut methods = unit.methods();
    methods.sort_by_key(|method| method.token);
    write_le(&mut out, methods.len() as u32);
    for method in &methods {
        write_le(&mut out, method.token.value());
        write_le(&mut out, method.declaring_type.value());
        write_str(&mut out, &method.name);
        write_le(&mut out, method.flags.bits());
        write_le(&mut out, method.generic_params);
        write_sig(&mut out, &method.return_type);
        write_le(&mut out, method.params.len() as u16);
        for param in &method.params {
            write_sig(&mut out, param);
        }
        match unit.body(method.token) {
            Some(body) => {
                write_le(&mut out, 1u8);
                write_body(&mut out, &body);
            }
            None => write_le(&mut out, 0u8),
        }
    }

    let mut type_refs = unit.type_refs();
    type_refs.sort_by_key(|row| row.token);
    write_le(&mut out, type_refs.len() as u32);
    for row in &type_refs {
        write_le(&mut out, row.token.value());
        write_le(&mut out, row.target.value());
        write_str(&mut out, &row.unit_name);
        out.extend_from_slice(&row.unit_mvid.to_bytes());
    }

    let mut member_refs = unit.member_refs();
    member_refs.sort_by_key(|row| row.token);
    write_le(&mut out, member_refs.len() as u32);
    for row in &member_refs {
        write_le(&mut out, row.token.value());
        write_le(&mut out, row.target.value());
        write_le(&mut out, row.declaring_ref.value());
    }

    out
}

fn write_body(out: &mut Vec<u8>, body: &MethodBody) {
    write_le(out, body.max_stack as u32);
    write_le(out, body.locals.len() as u16);
    for local in &body.locals {
        write_sig(out, local);
    }
    write_le(out, body.instructions.len() as u32);
    for instruction in &body.instructions {
        write_instruction(out, instruction);
    }
}

fn write_instruction(out: &mut Vec<u8>, instruction: &Instruction) {
    write_le(out, instruction.opcode.to_byte());
    match &instruction.operand {
        Operand::None => write_le(out, 0u8),
        Operand::Int32(value) => {
            write_le(out, 1u8);
            write_le(out, *value);
        }
        Operand::Int64(value) => {
            write_le(out, 2u8);
            write_le(out, *value);
        }
        Operand::Float64(value) => {
            write_le(out, 3u8);
            write_le(out, value.to_bits());
        }
        Operand::Str(value) => {
            write_le(out, 4u8);
            write_str(out, value);
        }
        Operand::Local(index) => {
            write_le(out, 5u8);
            write_le(out, *index);
        }
        Operand::Arg(index) => {
            write_le(out, 6u8);
            write_le(out, *index);
        }
        Operand::Target(target) => {
            write_le(out, 7u8);
            write_le(out, *target as u32);
        }
        Operand::Token(token) => {
            write_le(out, 8u8);
            write_le(out, token.value());
        }
        Operand::Spec(token, args) => {
            write_le(out, 9u8);
            write_le(out, token.value());
            write_le(out, args.len() as u8);
            for arg in args {
                write_sig(out, arg);
            }
        }
        Operand::Hook(id) => {
            write_le(out, 10u8);
            write_le(out, *id);
        }
    }
}

pub(crate) fn write_sig(out: &mut Vec<u8>, sig: &TypeSig) {
    match sig {
        TypeSig::Unit => write_le(out, 0u8),
        TypeSig::Bool => write_le(out, 1u8),
        TypeSig::I32 => write_le(out, 2u8),
        TypeSig::I64 => write_le(out, 3u8),
        TypeSig::F64 => write_le(out, 4u8),
        TypeSig::Str => write_le(out, 5u8),
        TypeSig::Object => write_le(out, 6u8),
        TypeSig::Named(name) => {
            write_le(out, 7u8);
            write_str(out, name);
        }
        TypeSig::Var(index) => {
            write_le(out, 8u8);
            write_le(out, *index);
        }
    }
}
