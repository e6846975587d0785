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
//! Branch layout and bytecode emission.

use std::collections::HashMap;

use tracing::debug;

use super::{Instruction, Label};
use crate::constant_pool::ConstantPool;
use crate::constants::insn::*;
use crate::ty::MethodDescriptor;
use crate::{Error, ReadWrite, Result};

/// Byte offsets of an instruction sequence.
pub(crate) struct Layout {
    /// Offset of every instruction, pseudo instructions share the offset of what follows.
    offsets: Vec<u32>,
    /// Which jumps need the 32 bit form.
    wide: Vec<bool>,
    labels: HashMap<Label, usize>,
    code_len: u32,
}

/// Bytes between the opcode of a switch and its 4 byte aligned operands.
#[inline]
fn switch_padding(offset: u32) -> u32 {
    (4 - ((offset + 1) % 4)) % 4
}

fn size_of(insn: &Instruction, offset: u32, wide: bool) -> u32 {
    use Instruction::*;
    match insn {
        Instruction::Label(_) | LineNumber(_) => 0,
        Op(_) => 1,
        BiPush(_) | NewArray(_) => 2,
        SiPush(_) | Ldc2(_) | Field(..) | Type(..) => 3,
        Local(op, slot) => match *slot {
            0..=3 if *op != RET => 1,
            0..=255 => 2,
            _ => 4,
        },
        IInc(slot, inc) => {
            if *slot <= 255 && i8::try_from(*inc).is_ok() {
                3
            } else {
                6
            }
        }
        Ldc(idx) => {
            if *idx <= 255 {
                2
            } else {
                3
            }
        }
        Invoke(op, _) => {
            if *op == INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        InvokeDynamic(_) => 5,
        MultiANewArray(..) => 4,
        Jump(op, _) => match (wide, invert_jump(*op)) {
            (false, _) => 3,
            (true, None) => 5,
            // inverted condition jumping over a goto_w
            (true, Some(_)) => 8,
        },
        TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len() as u32,
        LookupSwitch { table, .. } => 1 + switch_padding(offset) + 8 + 8 * table.len() as u32,
    }
}

impl Layout {
    /// Places every instruction, widening jumps until every offset fits.
    pub fn compute(instructions: &[Instruction]) -> Result<Layout> {
        let mut labels = HashMap::new();
        for (idx, insn) in instructions.iter().enumerate() {
            if let Instruction::Label(l) = insn {
                if labels.insert(*l, idx).is_some() {
                    return Err(Error::InvalidCode(idx, format!("label {} placed twice", l.0).into()));
                }
            }
        }
        for (idx, insn) in instructions.iter().enumerate() {
            if let Instruction::TableSwitch { targets, .. } = insn {
                if targets.is_empty() {
                    return Err(Error::InvalidCode(idx, "tableswitch without targets".into()));
                }
            }
            if let Some(t) = insn.targets().into_iter().find(|t| !labels.contains_key(t)) {
                return Err(Error::InvalidCode(idx, format!("label {} is never placed", t.0).into()));
            }
        }

        let mut layout = Layout {
            offsets: vec![0; instructions.len()],
            wide: vec![false; instructions.len()],
            labels,
            code_len: 0,
        };
        let mut passes = 0;
        loop {
            passes += 1;
            let mut offset = 0u32;
            for (idx, insn) in instructions.iter().enumerate() {
                layout.offsets[idx] = offset;
                offset += size_of(insn, offset, layout.wide[idx]);
            }
            layout.code_len = offset;

            let mut changed = false;
            for (idx, insn) in instructions.iter().enumerate() {
                if let Instruction::Jump(_, target) = insn {
                    if !layout.wide[idx] && i16::try_from(layout.relative(idx, *target)).is_err() {
                        layout.wide[idx] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        if passes > 1 {
            debug!(
                "widened {} branches after {} layout passes",
                layout.wide.iter().filter(|w| **w).count(),
                passes
            );
        }
        if layout.code_len == 0 || layout.code_len > u16::MAX as u32 {
            return Err(Error::Overflow("code length"));
        }
        Ok(layout)
    }

    #[inline]
    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    /// Offset of the instruction at `idx`.
    #[inline]
    pub fn offset(&self, idx: usize) -> u32 {
        self.offsets.get(idx).copied().unwrap_or(self.code_len)
    }

    /// Whether the jump at `idx` uses the 32 bit form.
    #[inline]
    pub fn is_wide(&self, idx: usize) -> bool {
        self.wide.get(idx).copied().unwrap_or(false)
    }

    /// Whether `label` is placed in the laid out sequence.
    #[inline]
    pub fn has(&self, label: Label) -> bool {
        self.labels.contains_key(&label)
    }

    /// Offset of a placed label. Unplaced labels resolve to the end of the code.
    pub fn offset_of(&self, label: Label) -> u32 {
        self.labels
            .get(&label)
            .map_or(self.code_len, |&idx| self.offsets[idx])
    }

    /// Index of the instruction a label is placed at.
    pub fn index_of(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    fn relative(&self, from: usize, to: Label) -> i64 {
        self.offset_of(to) as i64 - self.offsets[from] as i64
    }
}

/// Writes the bytecode of `instructions` with the offsets of `layout`.
pub(crate) fn emit(instructions: &[Instruction], layout: &Layout, pool: &ConstantPool) -> Result<Vec<u8>> {
    use Instruction::*;

    let mut out: Vec<u8> = Vec::with_capacity(layout.code_len as usize);
    for (idx, insn) in instructions.iter().enumerate() {
        let here = layout.offsets[idx];
        debug_assert_eq!(out.len() as u32, here);
        macro_rules! rel {
            ($label:expr) => {
                layout.relative(idx, $label) as i32
            };
        }
        match insn {
            Instruction::Label(_) | LineNumber(_) => {}
            Op(op) => op.write_to(&mut out)?,
            BiPush(b) => {
                BIPUSH.write_to(&mut out)?;
                b.write_to(&mut out)?;
            }
            SiPush(s) => {
                SIPUSH.write_to(&mut out)?;
                s.write_to(&mut out)?;
            }
            Local(op, slot) => match *slot {
                0..=3 if *op != RET => {
                    let compact = if (ISTORE..=ASTORE).contains(op) {
                        ISTORE_0 + (op - ISTORE) * 4
                    } else {
                        ILOAD_0 + (op - ILOAD) * 4
                    };
                    (compact + *slot as u8).write_to(&mut out)?;
                }
                0..=255 => {
                    op.write_to(&mut out)?;
                    (*slot as u8).write_to(&mut out)?;
                }
                _ => {
                    WIDE.write_to(&mut out)?;
                    op.write_to(&mut out)?;
                    slot.write_to(&mut out)?;
                }
            },
            IInc(slot, inc) => match (u8::try_from(*slot), i8::try_from(*inc)) {
                (Ok(slot), Ok(inc)) => {
                    IINC.write_to(&mut out)?;
                    slot.write_to(&mut out)?;
                    inc.write_to(&mut out)?;
                }
                _ => {
                    WIDE.write_to(&mut out)?;
                    IINC.write_to(&mut out)?;
                    slot.write_to(&mut out)?;
                    inc.write_to(&mut out)?;
                }
            },
            Ldc(cp) => {
                if let Ok(cp) = u8::try_from(*cp) {
                    LDC.write_to(&mut out)?;
                    cp.write_to(&mut out)?;
                } else {
                    LDC_W.write_to(&mut out)?;
                    cp.write_to(&mut out)?;
                }
            }
            Ldc2(cp) => {
                LDC2_W.write_to(&mut out)?;
                cp.write_to(&mut out)?;
            }
            Field(op, cp) | Type(op, cp) => {
                op.write_to(&mut out)?;
                cp.write_to(&mut out)?;
            }
            Invoke(op, cp) => {
                op.write_to(&mut out)?;
                cp.write_to(&mut out)?;
                if *op == INVOKEINTERFACE {
                    let member = pool.read_member(*cp)?;
                    let desc: MethodDescriptor = member.descriptor.parse()?;
                    let count = u8::try_from(desc.arg_slots() + 1)
                        .map_err(|_| Error::InvalidCode(idx, "too many interface call arguments".into()))?;
                    count.write_to(&mut out)?;
                    0u8.write_to(&mut out)?;
                }
            }
            InvokeDynamic(cp) => {
                INVOKEDYNAMIC.write_to(&mut out)?;
                cp.write_to(&mut out)?;
                0u16.write_to(&mut out)?;
            }
            NewArray(atype) => {
                NEWARRAY.write_to(&mut out)?;
                atype.write_to(&mut out)?;
            }
            MultiANewArray(cp, dim) => {
                MULTIANEWARRAY.write_to(&mut out)?;
                cp.write_to(&mut out)?;
                dim.write_to(&mut out)?;
            }
            Jump(op, target) => {
                let off = rel!(*target);
                if !layout.wide[idx] {
                    op.write_to(&mut out)?;
                    (off as i16).write_to(&mut out)?;
                } else if let Some(inverted) = invert_jump(*op) {
                    inverted.write_to(&mut out)?;
                    8i16.write_to(&mut out)?;
                    GOTO_W.write_to(&mut out)?;
                    // relative to the goto_w itself
                    (off - 3).write_to(&mut out)?;
                } else {
                    let wide_op = if *op == JSR { JSR_W } else { GOTO_W };
                    wide_op.write_to(&mut out)?;
                    off.write_to(&mut out)?;
                }
            }
            TableSwitch {
                default,
                low,
                targets,
            } => {
                TABLESWITCH.write_to(&mut out)?;
                out.resize(out.len() + switch_padding(here) as usize, 0);
                rel!(*default).write_to(&mut out)?;
                low.write_to(&mut out)?;
                let high = *low as i64 + targets.len() as i64 - 1;
                let high = i32::try_from(high)
                    .map_err(|_| Error::InvalidCode(idx, "tableswitch range overflows".into()))?;
                high.write_to(&mut out)?;
                for t in targets {
                    rel!(*t).write_to(&mut out)?;
                }
            }
            LookupSwitch { default, table } => {
                LOOKUPSWITCH.write_to(&mut out)?;
                out.resize(out.len() + switch_padding(here) as usize, 0);
                rel!(*default).write_to(&mut out)?;
                (table.len() as i32).write_to(&mut out)?;
                // keys must be sorted for the binary search of the vm
                let mut pairs: Vec<_> = table.iter().collect();
                pairs.sort_unstable_by_key(|(k, _)| **k);
                for (key, target) in pairs {
                    key.write_to(&mut out)?;
                    rel!(*target).write_to(&mut out)?;
                }
            }
        }
    }
    Ok(out)
}

/// `(pc, line)` pairs of the `LineNumberTable`.
pub(crate) fn line_numbers(instructions: &[Instruction], layout: &Layout) -> Vec<(u32, u16)> {
    instructions
        .iter()
        .enumerate()
        .filter_map(|(idx, insn)| match insn {
            Instruction::LineNumber(line) if layout.offsets[idx] < layout.code_len => {
                Some((layout.offsets[idx], *line))
            }
            _ => None,
        })
        .collect()
}
