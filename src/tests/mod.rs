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
use crate::prelude::*;

mod archive;
mod code;
mod javac;
mod transform;
mod ty;

const OBJECT: &str = "java/lang/Object";

/// A public class extending `java/lang/Object` with the members added by `ops`.
pub fn build_class(name: &str, ops: &[Operation]) -> ClassModel {
    let mut class = ClassModel::new(name, Some(OBJECT), JavaVersion::J8).expect("new class");
    let hierarchy = BasicHierarchy::with_jdk_defaults();
    Transformer::new(TransformOptions::default(), &hierarchy)
        .apply(&mut class, ops)
        .expect("build class");
    class
}

pub fn class_bytes(name: &str, ops: &[Operation]) -> Vec<u8> {
    build_class(name, ops).to_bytes().expect("write class")
}

/// The default constructor every javac class has.
pub fn constructor() -> Operation {
    Operation::add_method("<init>", "()V", AccessFlags::ACC_PUBLIC, |b| {
        b.local(insn::ALOAD, 0)
            .invoke_special(OBJECT, "<init>", "()V")?
            .op(insn::RETURN);
        Ok(())
    })
}

/// `static int compute(int x) { return x * 2; }`
pub fn compute_twice() -> Operation {
    Operation::add_method(
        "compute",
        "(I)I",
        AccessFlags::ACC_PUBLIC | AccessFlags::ACC_STATIC,
        |b| {
            b.local(insn::ILOAD, 0)
                .op(insn::ICONST_2)
                .op(insn::IMUL)
                .op(insn::IRETURN);
            Ok(())
        },
    )
}

/// Parses `bytes` and returns the instructions of one method.
pub fn instructions_of(bytes: &[u8], name: &str, descriptor: &str) -> Vec<Instruction> {
    let class = ClassModel::parse(bytes).expect("parse class");
    let idx = class.find_method(name, descriptor).expect("method exists");
    class.methods[idx]
        .code()
        .expect("method has code")
        .instructions()
        .to_vec()
}

/// The real instructions of a body, without labels and line numbers.
pub fn opcodes(instructions: &[Instruction]) -> Vec<u8> {
    instructions.iter().filter_map(Instruction::opcode).collect()
}
