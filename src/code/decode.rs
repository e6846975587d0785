/*
    This file is part of Classgraft.

    Classgraft is free software: you can redistribute it and/or modify
    it under the terms of the GNU Lesser General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    Classgraft is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with Classgraft. (LICENSE.md)  If not, see <https://www.gnu.org/licenses/>.
*/
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use super::analysis::{DeclaredFrame, DeclaredKind, VerificationType};
use super::{Catch, Code, Instruction, Label, LocalVariable};
use crate::attr::{read_attributes, read_raw};
use crate::constant_pool::{ConstantPool, MemberKind, PoolEntry};
use crate::constants::attr;
use crate::constants::insn::*;
use crate::decoder::Decoder;
use crate::{Error, Result};

/// Hands out one label per byte offset, in order of first reference.
#[derive(Default)]
struct Labeler {
    labels: BTreeMap<u32, Label>,
}

impl Labeler {
    fn get_label(&mut self, offset: u32) -> Label {
        let next = Label(self.labels.len() as u32);
        *self.labels.entry(offset).or_insert(next)
    }
}

enum Parsed {
    Lines(Vec<(u32, u16)>),
    LocalVariables(Vec<LocalVariable>),
    LocalVariableTypes(Vec<LocalVariable>),
    StackMap(Vec<DeclaredFrame>),
    Raw(crate::attr::RawAttribute),
}

pub(super) fn parse(decoder: &mut Decoder<'_>, pool: &ConstantPool) -> Result<Code> {
    let mut whole = decoder.clone();
    let start = decoder.position();

    let max_stack = decoder.u16()?;
    let max_locals = decoder.u16()?;
    let code_len = decoder.u32()?;
    if code_len == 0 || code_len > u16::MAX as u32 {
        return Err(Error::Invalid("code length", code_len.to_string().into()));
    }
    let mut code = decoder.sub(code_len as usize)?;
    let code_start = code.position();

    let mut labeler = Labeler::default();
    let mut decoded = Vec::new();
    while !code.is_empty() {
        let offset = (code.position() - code_start) as u32;
        let insn = read_instruction(&mut code, offset, code_len, &mut labeler, pool)?;
        decoded.push((offset, insn));
    }

    let exceptions = decoder.u16()?;
    let mut catches = Vec::with_capacity(exceptions as usize);
    for _ in 0..exceptions {
        let start_pc = decoder.u16()? as u32;
        let end_pc = decoder.u16()? as u32;
        let handler_pc = decoder.u16()? as u32;
        let catch_type = decoder.u16()?;
        if start_pc >= end_pc || end_pc > code_len || handler_pc >= code_len {
            return Err(Error::Invalid(
                "exception table entry",
                format!("{}..{} -> {}", start_pc, end_pc, handler_pc).into(),
            ));
        }
        let catch = if catch_type == 0 {
            None
        } else {
            pool.read_class(catch_type)?;
            Some(catch_type)
        };
        catches.push(Catch {
            start: labeler.get_label(start_pc),
            end: labeler.get_label(end_pc),
            handler: labeler.get_label(handler_pc),
            catch,
        });
    }

    let parsed = read_attributes(decoder, pool, |name, name_idx, body| {
        Ok(match name {
            attr::LINE_NUMBER_TABLE => {
                let n = body.u16()?;
                let mut lines = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let pc = body.u16()? as u32;
                    let line = body.u16()?;
                    lines.push((pc, line));
                }
                Parsed::Lines(lines)
            }
            attr::LOCAL_VARIABLE_TABLE | attr::LOCAL_VARIABLE_TYPE_TABLE => {
                let n = body.u16()?;
                let mut vars = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let start_pc = body.u16()? as u32;
                    let len = body.u16()? as u32;
                    let var_name = body.u16()?;
                    let descriptor = body.u16()?;
                    let index = body.u16()?;
                    if start_pc + len > code_len {
                        return Err(Error::Invalid(
                            "local variable range",
                            format!("{}+{}", start_pc, len).into(),
                        ));
                    }
                    pool.read_utf8(var_name)?;
                    pool.read_utf8(descriptor)?;
                    vars.push(LocalVariable {
                        start: labeler.get_label(start_pc),
                        end: labeler.get_label(start_pc + len),
                        name: var_name,
                        descriptor,
                        index,
                    });
                }
                if name == attr::LOCAL_VARIABLE_TABLE {
                    Parsed::LocalVariables(vars)
                } else {
                    Parsed::LocalVariableTypes(vars)
                }
            }
            attr::STACK_MAP_TABLE => {
                let n = body.u16()?;
                let mut frames = Vec::with_capacity(n as usize);
                let mut previous: Option<u32> = None;
                for _ in 0..n {
                    let frame_type = body.u8()?;
                    let (delta, kind) = match frame_type {
                        0..=63 => (frame_type as u16, DeclaredKind::Same),
                        64..=127 => (frame_type as u16 - 64, DeclaredKind::SameLocals1(read_vtype(body, pool)?)),
                        247 => {
                            let delta = body.u16()?;
                            (delta, DeclaredKind::SameLocals1(read_vtype(body, pool)?))
                        }
                        248..=250 => (body.u16()?, DeclaredKind::Chop(251 - frame_type as usize)),
                        251 => (body.u16()?, DeclaredKind::Same),
                        252..=254 => {
                            let delta = body.u16()?;
                            let mut locals = Vec::with_capacity(3);
                            for _ in 251..frame_type {
                                locals.push(read_vtype(body, pool)?);
                            }
                            (delta, DeclaredKind::Append(locals))
                        }
                        255 => {
                            let delta = body.u16()?;
                            let locals = read_vtypes(body, pool)?;
                            let stack = read_vtypes(body, pool)?;
                            (delta, DeclaredKind::Full(locals, stack))
                        }
                        other => return Err(Error::Invalid("stack map frame type", other.to_string().into())),
                    };
                    let offset = match previous {
                        None => delta as u32,
                        Some(p) => p + delta as u32 + 1,
                    };
                    if offset >= code_len {
                        return Err(Error::Invalid("stack map frame offset", offset.to_string().into()));
                    }
                    previous = Some(offset);
                    frames.push(DeclaredFrame {
                        label: labeler.get_label(offset),
                        kind,
                    });
                }
                Parsed::StackMap(frames)
            }
            _ => Parsed::Raw(read_raw(name_idx, body)?),
        })
    })?;

    let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    let mut local_variables = Vec::new();
    let mut local_variable_types = Vec::new();
    let mut attributes = Vec::new();
    let mut declared_frames = Vec::new();
    for p in parsed {
        match p {
            Parsed::Lines(l) => {
                for (pc, line) in l {
                    lines.entry(pc).or_default().push(line);
                }
            }
            Parsed::LocalVariables(v) => local_variables.extend(v),
            Parsed::LocalVariableTypes(v) => local_variable_types.extend(v),
            Parsed::StackMap(f) => declared_frames.extend(f),
            Parsed::Raw(r) => attributes.push(r),
        }
    }

    // every label and line must sit on an instruction boundary
    let boundaries: BTreeSet<u32> = decoded
        .iter()
        .map(|(o, _)| *o)
        .chain(std::iter::once(code_len))
        .collect();
    if let Some(off) = labeler
        .labels
        .keys()
        .chain(lines.keys())
        .find(|o| !boundaries.contains(o))
    {
        return Err(Error::Invalid(
            "code offset",
            format!("{} is inside an instruction", off).into(),
        ));
    }

    let mut instructions =
        Vec::with_capacity(decoded.len() + labeler.labels.len() + lines.len());
    for (offset, insn) in decoded {
        if let Some(l) = labeler.labels.get(&offset) {
            instructions.push(Instruction::Label(*l));
        }
        if let Some(ls) = lines.remove(&offset) {
            instructions.extend(ls.into_iter().map(Instruction::LineNumber));
        }
        instructions.push(insn);
    }
    if let Some(l) = labeler.labels.get(&code_len) {
        instructions.push(Instruction::Label(*l));
    }
    if !lines.is_empty() {
        return Err(Error::Invalid("line number table", "entry at end of code".into()));
    }

    let consumed = decoder.position() - start;
    let original = whole.bytes(consumed)?.to_vec();
    Ok(Code {
        max_stack,
        max_locals,
        instructions,
        catches,
        local_variables,
        local_variable_types,
        attributes,
        declared_frames,
        next_label: labeler.labels.len() as u32,
        original: Some(original),
    })
}

/// Reads one `verification_type_info`. Offsets of uninitialized objects are not kept.
fn read_vtype(body: &mut Decoder<'_>, pool: &ConstantPool) -> Result<VerificationType> {
    use VerificationType::*;
    Ok(match body.u8()? {
        0 => Top,
        1 => Integer,
        2 => Float,
        3 => Double,
        4 => Long,
        5 => Null,
        6 => UninitializedThis,
        7 => Object(pool.read_class(body.u16()?)?.into_owned()),
        8 => {
            body.u16()?;
            Top
        }
        other => return Err(Error::Invalid("verification type", other.to_string().into())),
    })
}

fn read_vtypes(body: &mut Decoder<'_>, pool: &ConstantPool) -> Result<Vec<VerificationType>> {
    let n = body.u16()?;
    let mut types = Vec::with_capacity(n as usize);
    for _ in 0..n {
        types.push(read_vtype(body, pool)?);
    }
    Ok(types)
}

/// Checks that `idx` names a constant `ldc`, or `ldc2_w` when `wide`, can push.
fn loadable(pool: &ConstantPool, idx: u16, wide: bool) -> Result<u16> {
    let ok = match pool.get(idx)? {
        PoolEntry::Long(_) | PoolEntry::Double(_) => wide,
        PoolEntry::Integer(_)
        | PoolEntry::Float(_)
        | PoolEntry::String(_)
        | PoolEntry::Class(_)
        | PoolEntry::MethodType(_)
        | PoolEntry::MethodHandle(..) => !wide,
        PoolEntry::Dynamic(..) => true,
        _ => false,
    };
    if ok {
        Ok(idx)
    } else {
        Err(Error::Invalid(
            "constant pool entry",
            format!("#{} cannot be loaded by {}", idx, if wide { "ldc2_w" } else { "ldc" }).into(),
        ))
    }
}

/// Checks that `idx` is a member reference of the kind `op` expects.
fn member(pool: &ConstantPool, idx: u16, op: u8) -> Result<u16> {
    let kind = pool.read_member(idx)?.kind;
    let ok = match op {
        GETSTATIC..=PUTFIELD => kind == MemberKind::Field,
        INVOKEVIRTUAL => kind == MemberKind::Method,
        INVOKEINTERFACE => kind == MemberKind::InterfaceMethod,
        // invokespecial and invokestatic may name interface methods
        _ => kind != MemberKind::Field,
    };
    if ok {
        Ok(idx)
    } else {
        Err(Error::Invalid(
            "constant pool entry",
            format!("#{} is a {:?} reference, not one for opcode {:#04x}", idx, kind, op).into(),
        ))
    }
}

fn class(pool: &ConstantPool, idx: u16) -> Result<u16> {
    pool.read_class(idx)?;
    Ok(idx)
}

fn branch_target(offset: u32, rel: i32, code_len: u32) -> Result<u32> {
    let target = offset as i64 + rel as i64;
    if target < 0 || target >= code_len as i64 {
        Err(Error::Invalid(
            "branch target",
            format!("{} from offset {}", rel, offset).into(),
        ))
    } else {
        Ok(target as u32)
    }
}

fn read_instruction(
    code: &mut Decoder<'_>,
    offset: u32,
    code_len: u32,
    labeler: &mut Labeler,
    pool: &ConstantPool,
) -> Result<Instruction> {
    use Instruction::*;

    macro_rules! target {
        ($rel:expr) => {
            labeler.get_label(branch_target(offset, $rel, code_len)?)
        };
    }

    let op = code.u8()?;
    Ok(match op {
        NOP..=DCONST_1 => Op(op),
        BIPUSH => BiPush(code.i8()?),
        SIPUSH => SiPush(code.i16()?),
        LDC => Ldc(loadable(pool, code.u8()? as u16, false)?),
        LDC_W => Ldc(loadable(pool, code.u16()?, false)?),
        LDC2_W => Ldc2(loadable(pool, code.u16()?, true)?),
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Local(op, code.u8()? as u16),
        ILOAD_0..=ALOAD_3 => {
            let n = op - ILOAD_0;
            Local(ILOAD + n / 4, (n % 4) as u16)
        }
        ISTORE_0..=ASTORE_3 => {
            let n = op - ISTORE_0;
            Local(ISTORE + n / 4, (n % 4) as u16)
        }
        IALOAD..=SALOAD | IASTORE..=LXOR | I2L..=DCMPG => Op(op),
        IINC => IInc(code.u8()? as u16, code.i8()? as i16),
        IFEQ..=JSR | IFNULL | IFNONNULL => Jump(op, target!(code.i16()? as i32)),
        GOTO_W => Jump(GOTO, target!(code.i32()?)),
        JSR_W => Jump(JSR, target!(code.i32()?)),
        TABLESWITCH | LOOKUPSWITCH => {
            // operands are aligned to 4 bytes from the start of the code
            code.skip((3 - (offset & 3)) as usize)?;
            let default = target!(code.i32()?);
            if op == TABLESWITCH {
                let low = code.i32()?;
                let high = code.i32()?;
                if high < low {
                    return Err(Error::Invalid(
                        "tableswitch bounds",
                        format!("{}..{}", low, high).into(),
                    ));
                }
                let n = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(n.min(code.remaining() / 4));
                for _ in 0..n {
                    targets.push(target!(code.i32()?));
                }
                TableSwitch {
                    default,
                    low,
                    targets,
                }
            } else {
                let npairs = code.i32()?;
                if npairs < 0 {
                    return Err(Error::Invalid("lookupswitch size", npairs.to_string().into()));
                }
                let mut table = IndexMap::with_capacity((npairs as usize).min(code.remaining() / 8));
                for _ in 0..npairs {
                    let key = code.i32()?;
                    table.insert(key, target!(code.i32()?));
                }
                LookupSwitch { default, table }
            }
        }
        IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => Op(op),
        GETSTATIC..=PUTFIELD => Field(op, member(pool, code.u16()?, op)?),
        INVOKEVIRTUAL..=INVOKESTATIC => Invoke(op, member(pool, code.u16()?, op)?),
        INVOKEINTERFACE => {
            let idx = member(pool, code.u16()?, op)?;
            code.skip(2)?; // count and a zero byte, derived from the descriptor
            Invoke(op, idx)
        }
        INVOKEDYNAMIC => {
            let idx = code.u16()?;
            pool.read_invoke_dynamic(idx)?;
            code.skip(2)?;
            InvokeDynamic(idx)
        }
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Type(op, class(pool, code.u16()?)?),
        NEWARRAY => NewArray(code.u8()?),
        MULTIANEWARRAY => MultiANewArray(class(pool, code.u16()?)?, code.u8()?),
        WIDE => match code.u8()? {
            wide_op @ (ILOAD..=ALOAD | ISTORE..=ASTORE | RET) => Local(wide_op, code.u16()?),
            IINC => IInc(code.u16()?, code.i16()?),
            other => {
                return Err(Error::Invalid(
                    "wide opcode",
                    format!("{:#04x} at {}", other, offset).into(),
                ))
            }
        },
        _ => {
            return Err(Error::Invalid(
                "opcode",
                format!("{:#04x} at {}", op, offset).into(),
            ))
        }
    })
}
