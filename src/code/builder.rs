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
use super::{Catch, Instruction, Label};
use crate::constant_pool::ConstantPool;
use crate::constants::insn::*;
use crate::Result;

/// Emits instructions while interning their constants in the class's pool.
///
/// ```
/// use classgraft::prelude::*;
///
/// let mut pool = ConstantPool::new();
/// let mut b = CodeBuilder::new(&mut pool);
/// b.get_static("java/lang/System", "out", "Ljava/io/PrintStream;").unwrap()
///     .ldc_string("hello").unwrap()
///     .invoke_virtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V").unwrap()
///     .op(insn::RETURN);
/// let (instructions, catches) = b.finish();
/// assert_eq!(instructions.len(), 4);
/// assert!(catches.is_empty());
/// ```
pub struct CodeBuilder<'a> {
    pool: &'a mut ConstantPool,
    instructions: Vec<Instruction>,
    catches: Vec<Catch>,
    next_label: u32,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(pool: &'a mut ConstantPool) -> Self {
        Self::starting_at(pool, 0)
    }

    /// A builder whose labels do not clash with the first `next_label` labels of a body.
    pub(crate) fn starting_at(pool: &'a mut ConstantPool, next_label: u32) -> Self {
        CodeBuilder {
            pool,
            instructions: Vec::new(),
            catches: Vec::new(),
            next_label,
        }
    }

    /// The constant pool of the class being edited.
    #[inline]
    pub fn pool(&mut self) -> &mut ConstantPool {
        self.pool
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Places `label` before the next instruction.
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.emit(Instruction::Label(label))
    }

    pub fn emit(&mut self, insn: Instruction) -> &mut Self {
        self.instructions.push(insn);
        self
    }

    /// An instruction without operands, such as `iadd` or `return`.
    pub fn op(&mut self, op: u8) -> &mut Self {
        self.emit(Instruction::Op(op))
    }

    /// A load or store such as `aload` with a local variable slot.
    pub fn local(&mut self, op: u8, slot: u16) -> &mut Self {
        self.emit(Instruction::Local(op, slot))
    }

    pub fn iinc(&mut self, slot: u16, by: i16) -> &mut Self {
        self.emit(Instruction::IInc(slot, by))
    }

    /// Pushes an `int` with the shortest instruction.
    pub fn int(&mut self, value: i32) -> Result<&mut Self> {
        Ok(match value {
            -1..=5 => self.op((ICONST_0 as i32 + value) as u8),
            v if i8::try_from(v).is_ok() => self.emit(Instruction::BiPush(v as i8)),
            v if i16::try_from(v).is_ok() => self.emit(Instruction::SiPush(v as i16)),
            v => {
                let idx = self.pool.insert_int(v)?;
                self.emit(Instruction::Ldc(idx))
            }
        })
    }

    pub fn long(&mut self, value: i64) -> Result<&mut Self> {
        Ok(match value {
            0 => self.op(LCONST_0),
            1 => self.op(LCONST_1),
            v => {
                let idx = self.pool.insert_long(v)?;
                self.emit(Instruction::Ldc2(idx))
            }
        })
    }

    pub fn ldc_string(&mut self, s: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_string(s)?;
        Ok(self.emit(Instruction::Ldc(idx)))
    }

    /// Pushes a `java/lang/Class` constant.
    pub fn ldc_class(&mut self, class: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_class(class)?;
        Ok(self.emit(Instruction::Ldc(idx)))
    }

    fn field(&mut self, op: u8, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_field(owner, name, descriptor)?;
        Ok(self.emit(Instruction::Field(op, idx)))
    }

    pub fn get_static(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(GETSTATIC, owner, name, descriptor)
    }

    pub fn put_static(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(PUTSTATIC, owner, name, descriptor)
    }

    pub fn get_field(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(GETFIELD, owner, name, descriptor)
    }

    pub fn put_field(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(PUTFIELD, owner, name, descriptor)
    }

    pub fn invoke_virtual(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_method(owner, name, descriptor)?;
        Ok(self.emit(Instruction::Invoke(INVOKEVIRTUAL, idx)))
    }

    pub fn invoke_special(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_method(owner, name, descriptor)?;
        Ok(self.emit(Instruction::Invoke(INVOKESPECIAL, idx)))
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_method(owner, name, descriptor)?;
        Ok(self.emit(Instruction::Invoke(INVOKESTATIC, idx)))
    }

    pub fn invoke_interface(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_interface_method(owner, name, descriptor)?;
        Ok(self.emit(Instruction::Invoke(INVOKEINTERFACE, idx)))
    }

    /// `new`, `anewarray`, `checkcast` or `instanceof`.
    pub fn type_insn(&mut self, op: u8, class: &str) -> Result<&mut Self> {
        let idx = self.pool.insert_class(class)?;
        Ok(self.emit(Instruction::Type(op, idx)))
    }

    pub fn new_object(&mut self, class: &str) -> Result<&mut Self> {
        self.type_insn(NEW, class)
    }

    pub fn jump(&mut self, op: u8, target: Label) -> &mut Self {
        self.emit(Instruction::Jump(op, target))
    }

    /// Starts a source line at the next instruction.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.emit(Instruction::LineNumber(line))
    }

    /// Registers a handler for `catch` thrown between `start` and `end`, or for any throwable.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch: Option<&str>) -> Result<&mut Self> {
        let catch = catch.map(|c| self.pool.insert_class(c)).transpose()?;
        self.catches.push(Catch {
            start,
            end,
            handler,
            catch,
        });
        Ok(self)
    }

    pub fn finish(self) -> (Vec<Instruction>, Vec<Catch>) {
        (self.instructions, self.catches)
    }

    /// Like `finish`, also returning the next unused label.
    pub(crate) fn finish_with_labels(self) -> (Vec<Instruction>, Vec<Catch>, u32) {
        (self.instructions, self.catches, self.next_label)
    }
}
