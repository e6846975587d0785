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
use indexmap::IndexMap;

use crate::constants::insn::*;

/// A position inside an instruction sequence.
///
/// Labels are placed with [`Instruction::Label`] and only become byte offsets
/// when the method is assembled.
#[derive(Debug, Eq, PartialOrd, PartialEq, Ord, Hash, Copy, Clone)]
pub struct Label(pub u32);

/// A single instruction, or a pseudo instruction that carries position data.
///
/// Variants hold the opcode they were decoded from. Compact and wide encodings
/// (`iload_0`, `ldc_w`, `goto_w`, the `wide` prefix) are not distinguished here,
/// the assembler picks the shortest form that fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// An instruction without operands.
    Op(u8),
    BiPush(i8),
    SiPush(i16),
    /// A load, store or `ret` of a local variable slot.
    Local(u8, u16),
    IInc(u16, i16),
    /// `ldc` of a category one constant.
    Ldc(u16),
    /// `ldc2_w` of a `long` or `double` constant.
    Ldc2(u16),
    /// `getstatic`, `putstatic`, `getfield` or `putfield`.
    Field(u8, u16),
    /// `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`.
    Invoke(u8, u16),
    InvokeDynamic(u16),
    /// `new`, `anewarray`, `checkcast` or `instanceof` with a class entry.
    Type(u8, u16),
    /// `newarray` with the array type code.
    NewArray(u8),
    MultiANewArray(u16, u8),
    /// Any conditional or unconditional branch, including `jsr`.
    Jump(u8, Label),
    TableSwitch {
        default: Label,
        low: i32,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        table: IndexMap<i32, Label>,
    },
    /// Marks the position of a label.
    Label(Label),
    /// Marks the first instruction of a source line.
    LineNumber(u16),
}

impl Instruction {
    /// Returns `true` for instructions that emit no bytes.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Instruction::Label(_) | Instruction::LineNumber(_))
    }

    pub fn opcode(&self) -> Option<u8> {
        Some(match *self {
            Instruction::Op(op)
            | Instruction::Local(op, _)
            | Instruction::Field(op, _)
            | Instruction::Invoke(op, _)
            | Instruction::Type(op, _)
            | Instruction::Jump(op, _) => op,
            Instruction::BiPush(_) => BIPUSH,
            Instruction::SiPush(_) => SIPUSH,
            Instruction::IInc(..) => IINC,
            Instruction::Ldc(_) => LDC,
            Instruction::Ldc2(_) => LDC2_W,
            Instruction::InvokeDynamic(_) => INVOKEDYNAMIC,
            Instruction::NewArray(_) => NEWARRAY,
            Instruction::MultiANewArray(..) => MULTIANEWARRAY,
            Instruction::TableSwitch { .. } => TABLESWITCH,
            Instruction::LookupSwitch { .. } => LOOKUPSWITCH,
            Instruction::Label(_) | Instruction::LineNumber(_) => return None,
        })
    }

    /// Returns `true` if control never continues with the next instruction.
    #[inline]
    pub fn ends_flow(&self) -> bool {
        self.opcode().map_or(false, crate::constants::insn::ends_flow)
    }

    /// The labels this instruction may branch to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Instruction::Jump(_, l) => vec![*l],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Instruction::LookupSwitch { default, table } => std::iter::once(*default)
                .chain(table.values().copied())
                .collect(),
            _ => vec![],
        }
    }
}

/// An exception table entry. `end` is exclusive.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Catch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// A `Class` entry, or `None` to catch everything.
    pub catch: Option<u16>,
}

/// An entry of the `LocalVariableTable`, or of the `LocalVariableTypeTable` when
/// `descriptor` refers to a generic signature.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name: u16,
    pub descriptor: u16,
    pub index: u16,
}
