//! Deserialization of a module image back into runnable metadata.
//!
//! Loading is strict: wrong magic, an unknown version, a truncated row or an
//! invalid opcode byte all reject the whole image. Partial loads are not
//! supported - either the complete unit materializes or the session fails.

use std::sync::Arc;

use uguid::Guid;

use crate::{
    assembly::{Instruction, MethodBody, OpCode, Operand},
    file::io::{read_bytes_at, read_le_at, read_str_at},
    metadata::{
        method::{FieldDef, FieldFlags, Method, MethodFlags},
        token::Token,
        typesystem::{TypeFlavor, TypeSig, UnitType},
        unit::{CompiledUnit, MemberRef, TypeRef},
    },
    Result,
};

use super::writer::{IMAGE_MAGIC, IMAGE_VERSION};

/// Parses a binary module image into a compiled unit.
///
/// # Errors
/// [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] when the
/// image is damaged, truncated or of an unsupported version.
pub fn read_unit(image: &[u8]) -> Result<CompiledUnit> {
    let mut offset = 0usize;

    let magic = read_le_at::<u32>(image, &mut offset)?;
    if magic != IMAGE_MAGIC {
        return Err(malformed_error!("Invalid image magic 0x{:08x}", magic));
    }
    let version = read_le_at::<u16>(image, &mut offset)?;
    if version != IMAGE_VERSION {
        return Err(malformed_error!("Unsupported image version {}", version));
    }

    let name = read_str_at(image, &mut offset)?;
    let mvid = read_guid_at(image, &mut offset)?;
    let unit = CompiledUnit::with_mvid(name, mvid);

    let type_count = read_le_at::<u32>(image, &mut offset)?;
    for _ in 0..type_count {
        let token = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let namespace = read_str_at(image, &mut offset)?;
        let type_name = read_str_at(image, &mut offset)?;
        let flavor = TypeFlavor::from_byte(read_le_at::<u8>(image, &mut offset)?)?;
        let base_raw = read_le_at::<u32>(image, &mut offset)?;

        let mut ty = UnitType::new(token, namespace, type_name, flavor);
        ty.base = (base_raw != 0).then(|| Token::new(base_raw));
        let iface_count = read_le_at::<u16>(image, &mut offset)?;
        for _ in 0..iface_count {
            ty.interfaces
                .push(Token::new(read_le_at::<u32>(image, &mut offset)?));
        }
        let generic_count = read_le_at::<u16>(image, &mut offset)?;
        for _ in 0..generic_count {
            ty.generic_params.push(read_str_at(image, &mut offset)?);
        }
        unit.insert_type(Arc::new(ty));
    }

    let field_count = read_le_at::<u32>(image, &mut offset)?;
    for _ in 0..field_count {
        let token = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let declaring_type = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let field_name = read_str_at(image, &mut offset)?;
        let sig = read_sig_at(image, &mut offset)?;
        let flags = FieldFlags::from_bits_truncate(read_le_at::<u16>(image, &mut offset)?);
        unit.insert_field(Arc::new(FieldDef {
            token,
            declaring_type,
            name: field_name,
            sig,
            flags,
        }));
    }

    let method_count = read_le_at::<u32>(image, &mut offset)?;
    for _ in 0..method_count {
        let token = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let declaring_type = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let method_name = read_str_at(image, &mut offset)?;
        let flags = MethodFlags::from_bits_truncate(read_le_at::<u32>(image, &mut offset)?);
        let generic_params = read_le_at::<u16>(image, &mut offset)?;
        let return_type = read_sig_at(image, &mut offset)?;
        let param_count = read_le_at::<u16>(image, &mut offset)?;
        let mut params = Vec::with_capacity(usize::from(param_count));
        for _ in 0..param_count {
            params.push(read_sig_at(image, &mut offset)?);
        }
        unit.insert_method(Arc::new(Method {
            token,
            declaring_type,
            name: method_name,
            flags,
            params,
            return_type,
            generic_params,
        }));
        let has_body = read_le_at::<u8>(image, &mut offset)?;
        if has_body != 0 {
            unit.set_body(token, read_body_at(image, &mut offset)?);
        }
    }

    let type_ref_count = read_le_at::<u32>(image, &mut offset)?;
    for _ in 0..type_ref_count {
        let token = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let target = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let unit_name = read_str_at(image, &mut offset)?;
        let unit_mvid = read_guid_at(image, &mut offset)?;
        unit.insert_type_ref(TypeRef {
            token,
            target,
            unit_name,
            unit_mvid,
        });
    }

    let member_ref_count = read_le_at::<u32>(image, &mut offset)?;
    for _ in 0..member_ref_count {
        let token = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let target = Token::new(read_le_at::<u32>(image, &mut offset)?);
        let declaring_ref = Token::new(read_le_at::<u32>(image, &mut offset)?);
        unit.insert_member_ref(MemberRef {
            token,
            target,
            declaring_ref,
        });
    }

    Ok(unit)
}

fn read_guid_at(image: &[u8], offset: &mut usize) -> Result<Guid> {
    let bytes = read_bytes_at(image, offset, 16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(bytes);
    Ok(Guid::from_bytes(raw))
}

fn read_body_at(image: &[u8], offset: &mut usize) -> Result<MethodBody> {
    let max_stack = read_le_at::<u32>(image, offset)? as usize;
    let local_count = read_le_at::<u16>(image, offset)?;
    let mut locals = Vec::with_capacity(usize::from(local_count));
    for _ in 0..local_count {
        locals.push(read_sig_at(image, offset)?);
    }
    let instruction_count = read_le_at::<u32>(image, offset)?;
    let mut instructions = Vec::with_capacity(instruction_count as usize);
    for _ in 0..instruction_count {
        instructions.push(read_instruction_at(image, offset)?);
    }
    Ok(MethodBody {
        instructions,
        max_stack,
        locals,
    })
}

fn read_instruction_at(image: &[u8], offset: &mut usize) -> Result<Instruction> {
    let opcode = OpCode::from_byte(read_le_at::<u8>(image, offset)?)?;
    let tag = read_le_at::<u8>(image, offset)?;
    let operand = match tag {
        0 => Operand::None,
        1 => Operand::Int32(read_le_at::<i32>(image, offset)?),
        2 => Operand::Int64(read_le_at::<i64>(image, offset)?),
        3 => Operand::Float64(f64::from_bits(read_le_at::<u64>(image, offset)?)),
        4 => Operand::Str(read_str_at(image, offset)?),
        5 => Operand::Local(read_le_at::<u16>(image, offset)?),
        6 => Operand::Arg(read_le_at::<u16>(image, offset)?),
        7 => Operand::Target(read_le_at::<u32>(image, offset)? as usize),
        8 => Operand::Token(Token::new(read_le_at::<u32>(image, offset)?)),
        9 => {
            let token = Token::new(read_le_at::<u32>(image, offset)?);
            let arg_count = read_le_at::<u8>(image, offset)?;
            let mut args = Vec::with_capacity(usize::from(arg_count));
            for _ in 0..arg_count {
                args.push(read_sig_at(image, offset)?);
            }
            Operand::Spec(token, args)
        }
        10 => Operand::Hook(read_le_at::<u32>(image, offset)?),
        _ => return Err(malformed_error!("Invalid operand tag {}", tag)),
    };
    Ok(Instruction::new(opcode, operand))
}

fn read_sig_at(image: &[u8], offset: &mut usize) -> Result<TypeSig> {
    let tag = read_le_at::<u8>(image, offset)?;
    Ok(match tag {
        0 => TypeSig::Unit,
        1 => TypeSig::Bool,
        2 => TypeSig::I32,
        3 => TypeSig::I64,
        4 => TypeSig::F64,
        5 => TypeSig::Str,
        6 => TypeSig::Object,
        7 => TypeSig::Named(read_str_at(image, offset)?),
        8 => TypeSig::Var(read_le_at::<u16>(image, offset)?),
        _ => return Err(malformed_error!("Invalid signature tag {}", tag)),
    })
}
