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
//! `StackMapTable` generation.
//!
//! A frame is recorded at every branch target and exception handler. Frames use
//! the most compact form that describes them relative to the previous frame.

use std::collections::BTreeMap;

use super::analysis::{Analysis, Frame, VerificationType};
use super::encode::Layout;
use super::{Catch, Instruction, Label};
use crate::attr::write_count;
use crate::constants::insn::invert_jump;
use crate::constant_pool::ConstantPool;
use crate::{Error, ReadWrite, Result};

const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const SAME_FRAME_EXTENDED: u8 = 251;
const FULL_FRAME: u8 = 255;

/// Drops the `Top` halves of long and double values.
pub(super) fn compress(slots: &[VerificationType]) -> Vec<&VerificationType> {
    let mut out = Vec::with_capacity(slots.len());
    let mut iter = slots.iter();
    while let Some(v) = iter.next() {
        out.push(v);
        if v.is_wide() {
            iter.next();
        }
    }
    out
}

fn compress_locals(frame: &Frame) -> Vec<&VerificationType> {
    let mut locals = compress(&frame.locals);
    while let Some(VerificationType::Top) = locals.last() {
        locals.pop();
    }
    locals
}

struct Writer<'a> {
    out: Vec<u8>,
    pool: &'a mut ConstantPool,
    layout: &'a Layout,
}

impl Writer<'_> {
    fn u8(&mut self, v: u8) -> Result<()> {
        v.write_to(&mut self.out)
    }

    fn u16(&mut self, v: u16) -> Result<()> {
        v.write_to(&mut self.out)
    }

    fn vtype(&mut self, v: &VerificationType) -> Result<()> {
        use VerificationType::*;
        match v {
            Top => self.u8(0),
            Integer => self.u8(1),
            Float => self.u8(2),
            Double => self.u8(3),
            Long => self.u8(4),
            Null => self.u8(5),
            UninitializedThis => self.u8(6),
            Object(name) => {
                let class = self.pool.insert_class(name)?;
                self.u8(7)?;
                self.u16(class)
            }
            Uninitialized(idx) => {
                let offset = self.layout.offset(*idx) as u16;
                self.u8(8)?;
                self.u16(offset)
            }
            Operand(_) => Err(Error::Invalid("stack map entry", "call operand placeholder".into())),
        }
    }

    fn vtypes(&mut self, vs: &[&VerificationType]) -> Result<()> {
        write_count(&mut self.out, vs.len(), "stack map frame entries")?;
        for v in vs {
            self.vtype(v)?;
        }
        Ok(())
    }
}

/// The offset and frame of a label, which are those of the first real instruction after it.
fn frame_at<'a>(
    label: Label,
    analysis: &'a Analysis,
    instructions: &[Instruction],
    layout: &Layout,
) -> Option<(u32, &'a Frame)> {
    let idx = layout.index_of(label)?;
    let real = (idx..instructions.len()).find(|&i| !instructions[i].is_pseudo())?;
    let frame = analysis.frames[real].as_ref()?;
    Some((layout.offset(real), frame))
}

/// Builds the body of a `StackMapTable`, or `None` when no frames are needed.
pub(crate) fn stack_map_table(
    analysis: &Analysis,
    instructions: &[Instruction],
    catches: &[Catch],
    layout: &Layout,
    pool: &mut ConstantPool,
) -> Result<Option<Vec<u8>>> {
    let mut targets: BTreeMap<u32, &Frame> = BTreeMap::new();
    for (idx, insn) in instructions.iter().enumerate() {
        if analysis.frames[idx].is_none() {
            continue;
        }
        for t in insn.targets() {
            if let Some((offset, frame)) = frame_at(t, analysis, instructions, layout) {
                targets.insert(offset, frame);
            }
        }
        // a widened conditional jumps over its goto_w to the next instruction
        if let Instruction::Jump(op, _) = insn {
            if layout.is_wide(idx) && invert_jump(*op).is_some() {
                let next = (idx + 1..instructions.len()).find(|&i| !instructions[i].is_pseudo());
                if let Some(frame) = next.and_then(|i| analysis.frames[i].as_ref()) {
                    targets.insert(layout.offset(idx + 1), frame);
                }
            }
        }
    }
    for c in catches {
        if let Some((offset, frame)) = frame_at(c.handler, analysis, instructions, layout) {
            targets.insert(offset, frame);
        }
    }
    if targets.is_empty() {
        return Ok(None);
    }

    let mut w = Writer {
        out: Vec::with_capacity(2 + targets.len() * 4),
        pool,
        layout,
    };
    write_count(&mut w.out, targets.len(), "stack map frames")?;

    let mut previous_locals = compress_locals(&analysis.initial);
    let mut previous_offset: Option<u32> = None;
    for (offset, frame) in targets {
        let delta = match previous_offset {
            None => offset,
            Some(p) => offset - p - 1,
        };
        let delta = u16::try_from(delta).map_err(|_| Error::Overflow("stack map offset"))?;
        previous_offset = Some(offset);

        let locals = compress_locals(frame);
        let stack = compress(&frame.stack);
        let common = previous_locals
            .iter()
            .zip(&locals)
            .take_while(|(a, b)| a == b)
            .count();

        if stack.is_empty() && locals == previous_locals {
            if delta < 64 {
                w.u8(delta as u8)?;
            } else {
                w.u8(SAME_FRAME_EXTENDED)?;
                w.u16(delta)?;
            }
        } else if stack.len() == 1 && locals == previous_locals {
            if delta < 64 {
                w.u8(64 + delta as u8)?;
            } else {
                w.u8(SAME_LOCALS_1_STACK_ITEM_EXTENDED)?;
                w.u16(delta)?;
            }
            w.vtype(stack[0])?;
        } else if stack.is_empty()
            && common == previous_locals.len()
            && (1..=3).contains(&(locals.len() - common))
        {
            // append
            w.u8(SAME_FRAME_EXTENDED + (locals.len() - common) as u8)?;
            w.u16(delta)?;
            for v in &locals[common..] {
                w.vtype(v)?;
            }
        } else if stack.is_empty()
            && common == locals.len()
            && (1..=3).contains(&(previous_locals.len() - common))
        {
            // chop
            w.u8(SAME_FRAME_EXTENDED - (previous_locals.len() - common) as u8)?;
            w.u16(delta)?;
        } else {
            w.u8(FULL_FRAME)?;
            w.u16(delta)?;
            w.vtypes(&locals)?;
            w.vtypes(&stack)?;
        }
        previous_locals = locals;
    }
    Ok(Some(w.out))
}
