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
use crate::code::encode::Layout;
use crate::code::Code;
use crate::constants::insn::*;
use crate::decoder::Decoder;
use crate::member::{MethodAttribute, MethodInfo};
use crate::prelude::*;

use super::{build_class, class_bytes, compute_twice, constructor, instructions_of, opcodes};

const STATIC: AccessFlags = AccessFlags::from_bits_truncate(
    AccessFlags::ACC_PUBLIC.bits() | AccessFlags::ACC_STATIC.bits(),
);

fn method(name: &str, descriptor: &str, body: impl Fn(&mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static) -> Operation {
    Operation::add_method(name, descriptor, STATIC, body)
}

#[test]
fn decode_compact_forms() {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    assert_eq!(
        instructions_of(&bytes, "compute", "(I)I"),
        [
            Instruction::Local(ILOAD, 0),
            Instruction::Op(ICONST_2),
            Instruction::Op(IMUL),
            Instruction::Op(IRETURN)
        ]
    );
    let class = ClassModel::parse(&bytes).unwrap();
    let code = class.methods[1].code().unwrap();
    assert_eq!(code.max_stack(), 2);
    assert_eq!(code.max_locals(), 1);
    assert!(!code.is_modified());
}

#[test]
fn untouched_class_is_identical() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let mut class = ClassModel::parse(&bytes)?;
    assert!(!class.has_modified_code());
    assert_eq!(class.to_bytes()?, bytes);
    Ok(())
}

/// A static `(I)I` method around a hand encoded `Code` attribute.
fn raw_method(pool: &mut ConstantPool, code: &[u8]) -> Result<MethodInfo> {
    let mut attr = vec![0, 1, 0, 1];
    attr.extend_from_slice(&(code.len() as u32).to_be_bytes());
    attr.extend_from_slice(code);
    attr.extend_from_slice(&[0, 0, 0, 0]);
    let code = Code::parse(&mut Decoder::new(&attr), pool)?;
    Ok(MethodInfo {
        access: STATIC,
        name: pool.insert_utf8("id")?,
        descriptor: pool.insert_utf8("(I)I")?,
        attributes: vec![MethodAttribute::Code(code)],
    })
}

#[test]
fn untouched_body_keeps_its_encoding() -> Result<()> {
    let mut class = build_class("Raw", &[]);
    // wide iload 0, ireturn
    let m = raw_method(&mut class.pool, &[WIDE, ILOAD, 0, 0, IRETURN])?;
    class.methods.push(m);
    let bytes = class.to_bytes()?;

    let mut parsed = ClassModel::parse(&bytes)?;
    let code = parsed.methods[0].code().unwrap();
    assert_eq!(
        code.instructions(),
        [Instruction::Local(ILOAD, 0), Instruction::Op(IRETURN)]
    );
    assert_eq!(
        code.original.as_deref(),
        Some(&[0, 1, 0, 1, 0, 0, 0, 5, WIDE, ILOAD, 0, 0, IRETURN, 0, 0, 0, 0][..])
    );

    // touching the body reassembles it with the compact form
    parsed.methods[0].code_mut().unwrap().instructions_mut();
    let bytes = parsed.to_bytes()?;
    let reparsed = ClassModel::parse(&bytes)?;
    assert_eq!(
        reparsed.methods[0].code().unwrap().original.as_deref(),
        Some(&[0, 1, 0, 1, 0, 0, 0, 2, 0x1a, IRETURN, 0, 0, 0, 0][..])
    );
    Ok(())
}

#[test]
fn other_methods_survive_an_edit() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let before = ClassModel::parse(&bytes)?;
    let (out, report) = transform_class(
        &bytes,
        &[Operation::replace_method_body("compute", "(I)I", |b| {
            b.local(ILOAD, 0).op(ICONST_3).op(IMUL).op(IRETURN);
            Ok(())
        })],
        &TransformOptions::default(),
    )?;
    assert_eq!(report.methods_replaced, 1);
    let after = ClassModel::parse(&out)?;
    assert_eq!(
        before.methods[0].code().unwrap().original,
        after.methods[0].code().unwrap().original
    );
    assert_eq!(
        opcodes(after.methods[1].code().unwrap().instructions()),
        [ILOAD, ICONST_3, IMUL, IRETURN]
    );
    Ok(())
}

#[test]
fn far_branch_is_widened() {
    let bytes = class_bytes(
        "Far",
        &[method("far", "(I)I", |b| {
            let target = b.new_label();
            b.local(ILOAD, 0).jump(IFEQ, target);
            for _ in 0..40_000 {
                b.op(NOP);
            }
            b.place(target).op(ICONST_0).op(IRETURN);
            Ok(())
        })],
    );
    let ops = opcodes(&instructions_of(&bytes, "far", "(I)I"));
    // ifeq becomes ifne over a goto_w
    assert_eq!(ops[..3], [ILOAD, IFNE, GOTO]);
    assert_eq!(ops.iter().filter(|op| **op == NOP).count(), 40_000);
    assert_eq!(ops[ops.len() - 2..], [ICONST_0, IRETURN]);
}

#[test]
fn layout_of_wide_jumps() {
    let mut body = vec![Instruction::Label(Label(0))];
    body.extend(std::iter::repeat(Instruction::Op(NOP)).take(40_000));
    body.push(Instruction::Jump(GOTO, Label(0)));
    let layout = Layout::compute(&body).unwrap();
    assert_eq!(layout.code_len(), 40_005);
    assert!(layout.is_wide(body.len() - 1));

    body.insert(0, Instruction::Jump(IFNULL, Label(1)));
    body.push(Instruction::Label(Label(1)));
    body.push(Instruction::Op(RETURN));
    let layout = Layout::compute(&body).unwrap();
    assert_eq!(layout.code_len(), 8 + 40_000 + 5 + 1);
    assert!(layout.is_wide(0));

    let short = [
        Instruction::Label(Label(0)),
        Instruction::Jump(GOTO, Label(0)),
    ];
    assert_eq!(Layout::compute(&short).unwrap().code_len(), 3);
}

#[test]
fn layout_rejects_bad_labels() {
    let unplaced = [Instruction::Jump(GOTO, Label(7))];
    assert!(matches!(Layout::compute(&unplaced), Err(Error::InvalidCode(0, _))));
    let twice = [
        Instruction::Label(Label(0)),
        Instruction::Label(Label(0)),
        Instruction::Op(RETURN),
    ];
    assert!(matches!(Layout::compute(&twice), Err(Error::InvalidCode(1, _))));
}

#[test]
fn switches_round_trip() {
    let bytes = class_bytes(
        "Switch",
        &[
            method("table", "(I)I", |b| {
                let (one, two, default) = (b.new_label(), b.new_label(), b.new_label());
                b.local(ILOAD, 0).emit(Instruction::TableSwitch {
                    default,
                    low: 1,
                    targets: vec![one, two],
                });
                b.place(one).op(ICONST_1).op(IRETURN);
                b.place(two).op(ICONST_2).op(IRETURN);
                b.place(default).op(ICONST_M1).op(IRETURN);
                Ok(())
            }),
            method("lookup", "(I)I", |b| {
                let (a, default) = (b.new_label(), b.new_label());
                let table = [(10, a), (-5, a), (3, default)].into_iter().collect();
                b.local(ILOAD, 0)
                    .emit(Instruction::LookupSwitch { default, table });
                b.place(a).op(ICONST_1).op(IRETURN);
                b.place(default).op(ICONST_0).op(IRETURN);
                Ok(())
            }),
        ],
    );

    let table = instructions_of(&bytes, "table", "(I)I");
    match &table[1] {
        Instruction::TableSwitch { low, targets, .. } => {
            assert_eq!(*low, 1);
            assert_eq!(targets.len(), 2);
        }
        other => panic!("expected a tableswitch, got {:?}", other),
    }
    assert_eq!(
        opcodes(&table),
        [ILOAD, TABLESWITCH, ICONST_1, IRETURN, ICONST_2, IRETURN, ICONST_M1, IRETURN]
    );

    let lookup = instructions_of(&bytes, "lookup", "(I)I");
    match &lookup[1] {
        Instruction::LookupSwitch { table, .. } => {
            assert_eq!(table.keys().copied().collect::<Vec<_>>(), [-5, 3, 10]);
        }
        other => panic!("expected a lookupswitch, got {:?}", other),
    }
}

#[test]
fn dead_code_is_removed() {
    let bytes = class_bytes(
        "Dead",
        &[method("dead", "()I", |b| {
            b.op(ICONST_0).op(IRETURN).op(ICONST_1).op(IRETURN);
            Ok(())
        })],
    );
    assert_eq!(opcodes(&instructions_of(&bytes, "dead", "()I")), [ICONST_0, IRETURN]);
}

#[test]
fn line_numbers_round_trip() {
    let bytes = class_bytes(
        "Lines",
        &[method("lines", "()I", |b| {
            b.line(3).op(ICONST_0).line(4).op(IRETURN);
            Ok(())
        })],
    );
    assert_eq!(
        instructions_of(&bytes, "lines", "()I"),
        [
            Instruction::LineNumber(3),
            Instruction::Op(ICONST_0),
            Instruction::LineNumber(4),
            Instruction::Op(IRETURN)
        ]
    );
}

fn build_error(descriptor: &str, body: impl Fn(&mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static) -> Error {
    let mut class = ClassModel::new("Bad", Some("java/lang/Object"), JavaVersion::J8).unwrap();
    let hierarchy = BasicHierarchy::with_jdk_defaults();
    Transformer::new(TransformOptions::default(), &hierarchy)
        .apply(&mut class, &[method("bad", descriptor, body)])
        .unwrap_err()
}

#[test]
fn invalid_bodies_are_rejected() {
    // falls off the end
    let e = build_error("()V", |b| {
        b.op(ICONST_0).op(POP);
        Ok(())
    });
    assert!(matches!(e, Error::InvalidCode(..)), "{}", e);

    // stack heights 0 and 1 meet
    let e = build_error("(I)V", |b| {
        let join = b.new_label();
        b.local(ILOAD, 0).jump(IFEQ, join).op(ICONST_1).place(join).op(RETURN);
        Ok(())
    });
    assert!(matches!(e, Error::InvalidCode(..)), "{}", e);

    // underflow
    let e = build_error("()V", |b| {
        b.op(POP).op(RETURN);
        Ok(())
    });
    assert!(matches!(e, Error::InvalidCode(0, _)), "{}", e);

    // jump to a label that is never placed
    let e = build_error("()V", |b| {
        let nowhere = b.new_label();
        b.jump(GOTO, nowhere);
        Ok(())
    });
    assert!(matches!(e, Error::InvalidCode(..)), "{}", e);
}

#[test]
fn malformed_classes_are_rejected() {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0;
    assert!(matches!(ClassModel::parse(&bad_magic), Err(Error::Invalid("class header", _))));

    let mut future = bytes.clone();
    future[6..8].copy_from_slice(&70u16.to_be_bytes());
    assert!(matches!(ClassModel::parse(&future), Err(Error::UnsupportedVersion(70, 0))));

    let truncated = &bytes[..bytes.len() - 3];
    assert!(ClassModel::parse(truncated).unwrap_err().is_malformed());

    let mut trailing = bytes;
    trailing.push(0);
    assert!(matches!(ClassModel::parse(&trailing), Err(Error::Invalid("class file", _))));
}

#[test]
fn pool_operands_are_checked() -> Result<()> {
    let mut pool = ConstantPool::new();
    let text = pool.insert_utf8("text")?;
    let call = pool.insert_method("Util", "next", "()I")?;
    let [hi, lo] = call.to_be_bytes();
    let bodies: [&[u8]; 5] = [
        // past the end of the pool
        &[INVOKESTATIC, 0x7f, 0xff, IRETURN],
        &[LDC, text as u8, IRETURN],
        &[GETSTATIC, hi, lo, IRETURN],
        &[NEW, hi, lo, POP, ICONST_0, IRETURN],
        &[INVOKEINTERFACE, hi, lo, 1, 0, IRETURN],
    ];
    for body in bodies {
        let err = raw_method(&mut pool, body).unwrap_err();
        assert!(err.is_malformed(), "{:?}: {}", body, err);
    }
    raw_method(&mut pool, &[INVOKESTATIC, hi, lo, IRETURN])?;
    Ok(())
}

#[test]
fn loads_count_toward_max_locals() {
    let class = build_class(
        "Locals",
        &[
            method("int", "()I", |b| {
                b.local(ILOAD, 2).op(IRETURN);
                Ok(())
            }),
            method("long", "()J", |b| {
                b.local(LLOAD, 3).op(LRETURN);
                Ok(())
            }),
        ],
    );
    let max_locals = |name: &str, descriptor: &str| {
        class.methods[class.find_method(name, descriptor).unwrap()]
            .code()
            .unwrap()
            .max_locals()
    };
    assert_eq!(max_locals("int", "()I"), 3);
    assert_eq!(max_locals("long", "()J"), 5);
}
