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
use std::fs;

use crate::constants::insn::*;
use crate::member::{FieldAttribute, MethodAttribute};
use crate::prelude::*;

use super::{build_class, class_bytes, compute_twice, constructor, instructions_of, opcodes};

fn strict() -> TransformOptions {
    TransformOptions {
        member_mode: MemberMode::Strict,
        ..Default::default()
    }
}

fn apply(class: &mut ClassModel, ops: &[Operation], options: TransformOptions) -> Result<TransformReport> {
    let hierarchy = BasicHierarchy::with_jdk_defaults();
    Transformer::new(options, &hierarchy).apply(class, ops)
}

#[test]
fn duplicate_field_is_rejected_in_strict_mode() {
    let mut class = build_class("Counter", &[Operation::add_field("count", "I", AccessFlags::ACC_PRIVATE)]);
    let err = apply(
        &mut class,
        &[Operation::add_field("count", "J", AccessFlags::ACC_PRIVATE)],
        strict(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateMember(ref n, _) if n == "count"));
    assert!(err.is_local());
    assert_eq!(class.fields.len(), 1);
}

#[test]
fn duplicate_field_is_added_in_permissive_mode() -> Result<()> {
    let mut class = build_class("Counter", &[Operation::add_field("count", "I", AccessFlags::ACC_PRIVATE)]);
    let report = apply(
        &mut class,
        &[Operation::add_field("count", "I", AccessFlags::ACC_PRIVATE)],
        TransformOptions::default(),
    )?;
    assert_eq!(report.fields_added, 1);
    assert!(report.modified);
    assert_eq!(class.fields.len(), 2);
    Ok(())
}

#[test]
fn constant_field_survives_writing() -> Result<()> {
    let access = AccessFlags::ACC_PUBLIC | AccessFlags::ACC_STATIC | AccessFlags::ACC_FINAL;
    let bytes = class_bytes(
        "Limits",
        &[
            Operation::add_constant("MAX", "I", access, ConstantValue::Int(42)),
            Operation::add_constant("NAME", "Ljava/lang/String;", access, ConstantValue::String("limits".into())),
        ],
    );
    let class = ClassModel::parse(&bytes)?;
    let max = &class.fields[class.find_field("MAX").unwrap()];
    match max.attributes.as_slice() {
        [FieldAttribute::ConstantValue(idx)] => assert_eq!(class.pool.get(*idx)?, &PoolEntry::Integer(42)),
        other => panic!("unexpected attributes {:?}", other),
    }
    let name = &class.fields[class.find_field("NAME").unwrap()];
    match name.attributes.as_slice() {
        [FieldAttribute::ConstantValue(idx)] => assert_eq!(class.pool.read_string(*idx)?, "limits"),
        other => panic!("unexpected attributes {:?}", other),
    }
    Ok(())
}

#[test]
fn bad_field_descriptor_is_rejected() {
    let mut class = build_class("Broken", &[]);
    let err = apply(
        &mut class,
        &[Operation::add_field("x", "Q", AccessFlags::ACC_PUBLIC)],
        TransformOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_malformed(), "{}", err);
    assert!(class.fields.is_empty());
}

#[test]
fn added_method_round_trips() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let class = ClassModel::parse(&bytes)?;
    assert_eq!(class.methods.len(), 2);
    let idx = class.find_method("compute", "(I)I").unwrap();
    assert!(class.methods[idx].access.contains(AccessFlags::ACC_STATIC));
    assert_eq!(
        opcodes(&instructions_of(&bytes, "<init>", "()V")),
        [ALOAD, INVOKESPECIAL, RETURN]
    );
    Ok(())
}

#[test]
fn abstract_method_has_no_code() -> Result<()> {
    let access = AccessFlags::ACC_PUBLIC | AccessFlags::ACC_ABSTRACT;
    let bytes = class_bytes("Shape", &[Operation::add_abstract_method("area", "()D", access)]);
    let class = ClassModel::parse(&bytes)?;
    let method = &class.methods[class.find_method("area", "()D").unwrap()];
    assert!(method.access.contains(AccessFlags::ACC_ABSTRACT));
    assert!(method.code().is_none());
    assert!(!method.attributes.iter().any(|a| matches!(a, MethodAttribute::Code(_))));
    Ok(())
}

#[test]
fn body_must_match_access() {
    let mut class = build_class("Shape", &[]);
    let err = apply(
        &mut class,
        &[Operation::add_abstract_method("area", "()D", AccessFlags::ACC_PUBLIC)],
        TransformOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Invalid("method access", _)), "{}", err);

    let err = apply(
        &mut class,
        &[Operation::add_method(
            "area",
            "()D",
            AccessFlags::ACC_PUBLIC | AccessFlags::ACC_NATIVE,
            |b| {
                b.op(DCONST_0).op(DRETURN);
                Ok(())
            },
        )],
        TransformOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Invalid("method access", _)), "{}", err);
    assert!(class.methods.is_empty());
}

#[test]
fn duplicate_method_is_rejected_in_strict_mode() {
    let mut class = build_class("Calc", &[compute_twice()]);
    let err = apply(&mut class, &[compute_twice()], strict()).unwrap_err();
    assert!(matches!(err, Error::DuplicateMember(ref n, ref d) if n == "compute" && d == "(I)I"));
    assert_eq!(class.methods.len(), 1);
}

#[test]
fn replace_body() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let (out, report) = transform_class(
        &bytes,
        &[Operation::replace_method_body("compute", "(I)I", |b| {
            b.local(ILOAD, 0).op(ICONST_3).op(IMUL).op(IRETURN);
            Ok(())
        })],
        &TransformOptions::default(),
    )?;
    assert_eq!(report.methods_replaced, 1);
    assert!(report.modified);
    assert_eq!(
        instructions_of(&out, "compute", "(I)I"),
        [
            Instruction::Local(ILOAD, 0),
            Instruction::Op(ICONST_3),
            Instruction::Op(IMUL),
            Instruction::Op(IRETURN)
        ]
    );
    // the constructor is copied as it was
    assert_eq!(
        instructions_of(&out, "<init>", "()V"),
        instructions_of(&bytes, "<init>", "()V")
    );
    Ok(())
}

#[test]
fn bodiless_method_cannot_take_a_body() {
    let bytes = class_bytes(
        "Shape",
        &[
            Operation::add_abstract_method("area", "()D", AccessFlags::ACC_PUBLIC | AccessFlags::ACC_ABSTRACT),
            Operation::add_abstract_method("hash", "()I", AccessFlags::ACC_PUBLIC | AccessFlags::ACC_NATIVE),
        ],
    );
    for (name, descriptor) in [("area", "()D"), ("hash", "()I")] {
        let err = transform_class(
            &bytes,
            &[Operation::replace_method_body(name, descriptor, |b| {
                b.op(ICONST_0).op(IRETURN);
                Ok(())
            })],
            &TransformOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invalid("method access", _)), "{}", err);
    }
}

#[test]
fn replace_missing_method_fails() {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let err = transform_class(
        &bytes,
        &[Operation::replace_method_body("compute", "(J)J", |b| {
            b.local(LLOAD, 0).op(LRETURN);
            Ok(())
        })],
        &TransformOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SelectorNotFound(ref n, ref d) if n == "compute" && d == "(J)J"));
    assert!(err.is_local());
}

#[test]
fn unchanged_class_returns_input() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let rewriter = CallSiteRewriter::new().replace(CallSiteFilter::new("java/io/File", "mkdir"), |_, b| {
        b.op(ICONST_0);
        Ok(())
    });
    let (out, report) = transform_class(
        &bytes,
        &[Operation::rewrite_call_sites(rewriter)],
        &TransformOptions::default(),
    )?;
    assert_eq!(report, TransformReport::default());
    assert_eq!(out, bytes);
    Ok(())
}

#[test]
fn operations_apply_in_order() -> Result<()> {
    let bytes = class_bytes("Calc", &[constructor(), compute_twice()]);
    let (out, report) = transform_class(
        &bytes,
        &[
            Operation::add_method("triple", "(I)I", AccessFlags::ACC_PUBLIC | AccessFlags::ACC_STATIC, |b| {
                b.local(ILOAD, 0).op(ICONST_3).op(IMUL).op(IRETURN);
                Ok(())
            }),
            Operation::replace_method_body("compute", "(I)I", |b| {
                b.local(ILOAD, 0)
                    .invoke_static("Calc", "triple", "(I)I")?
                    .op(IRETURN);
                Ok(())
            }),
        ],
        &TransformOptions::default(),
    )?;
    assert_eq!(report.methods_added, 1);
    assert_eq!(report.methods_replaced, 1);
    assert_eq!(opcodes(&instructions_of(&out, "compute", "(I)I")), [ILOAD, INVOKESTATIC, IRETURN]);
    Ok(())
}

#[test]
fn report_merge_adds_up() {
    let mut total = TransformReport::default();
    total.merge(&TransformReport {
        modified: true,
        fields_added: 1,
        call_sites_rewritten: 2,
        ..Default::default()
    });
    total.merge(&TransformReport {
        methods_replaced: 1,
        call_sites_rewritten: 3,
        ..Default::default()
    });
    assert!(total.modified);
    assert_eq!(total.fields_added, 1);
    assert_eq!(total.methods_replaced, 1);
    assert_eq!(total.call_sites_rewritten, 5);
}

#[test]
fn transform_file_writes_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("Calc.class");
    let output = dir.path().join("out").join("Calc.class");
    fs::create_dir(dir.path().join("out"))?;
    fs::write(&input, class_bytes("Calc", &[constructor(), compute_twice()]))?;

    let report = transform_file(
        &input,
        &output,
        &[Operation::add_field("calls", "J", AccessFlags::ACC_PRIVATE)],
        &TransformOptions::default(),
    )?;
    assert_eq!(report.fields_added, 1);
    let class = ClassModel::parse(&fs::read(&output)?)?;
    assert!(class.find_field("calls").is_some());
    Ok(())
}

#[test]
fn failed_transform_leaves_output_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("Calc.class");
    let output = dir.path().join("Calc.out.class");
    fs::write(&input, class_bytes("Calc", &[constructor(), compute_twice()]))?;
    fs::write(&output, b"previous")?;

    let err = transform_file(
        &input,
        &output,
        &[Operation::replace_method_body("missing", "()V", |b| {
            b.op(RETURN);
            Ok(())
        })],
        &TransformOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SelectorNotFound(..)));
    assert_eq!(fs::read(&output)?, b"previous");
    // no temporary files are left behind
    assert_eq!(fs::read_dir(dir.path())?.count(), 2);
    Ok(())
}
