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
use std::io::{Cursor, Read, Write};
use std::time::Duration;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::constants::insn::*;
use crate::prelude::*;

use super::{class_bytes, constructor};

const MANIFEST: &[u8] = b"Manifest-Version: 1.0\r\nMain-Class: com.app.Creator\r\n\r\n";
const BROKEN: &[u8] = b"\xca\xfe\xba\xbenot a class";

fn creator(name: &str) -> Vec<u8> {
    class_bytes(
        name,
        &[
            constructor(),
            Operation::add_method(
                "create",
                "(Ljava/io/File;)Z",
                AccessFlags::ACC_PUBLIC | AccessFlags::ACC_STATIC,
                |b| {
                    b.local(ALOAD, 0)
                        .invoke_virtual("java/io/File", "mkdir", "()Z")?
                        .op(IRETURN);
                    Ok(())
                },
            ),
        ],
    )
}

fn plain(name: &str) -> Vec<u8> {
    class_bytes(name, &[constructor()])
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, FileOptions::default()).unwrap();
            continue;
        }
        let method = if name.ends_with(".class") {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        zip.start_file(*name, FileOptions::default().compression_method(method))
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Name, compression and data of every entry, in archive order.
fn contents(bytes: &[u8]) -> Vec<(String, CompressionMethod, Vec<u8>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_owned(), file.compression(), data)
        })
        .collect()
}

fn sample() -> Vec<u8> {
    zip_of(&[
        ("META-INF/MANIFEST.MF", MANIFEST),
        ("com/", &b""[..]),
        ("com/app/Creator.class", &creator("com/app/Creator")[..]),
        ("com/app/Plain.class", &plain("com/app/Plain")[..]),
        ("com/app/Broken.class", BROKEN),
        ("README.txt", &b"hello"[..]),
    ])
}

fn deny_mkdir() -> Operation {
    Operation::rewrite_call_sites(CallSiteRewriter::new().intercept(
        CallSiteFilter::new("java/io/File", "mkdir").descriptor("()Z"),
        |_, b| {
            b.new_object("java/lang/SecurityException")?
                .op(DUP)
                .invoke_special("java/lang/SecurityException", "<init>", "()V")?
                .op(ATHROW);
            Ok(())
        },
    ))
}

fn with_selector(selector: Selector) -> ArchiveOptions {
    ArchiveOptions {
        selector,
        ..Default::default()
    }
}

#[test]
fn rewrites_only_what_changes() -> Result<()> {
    let input = sample();
    let processor = ArchiveProcessor::new(vec![deny_mkdir()], ArchiveOptions::default());
    let (output, report) = processor.process_bytes(&input)?;

    assert_eq!(report.entries_scanned, 6);
    assert_eq!(report.input_len, input.len() as u64);
    assert_eq!(report.output_len, output.len() as u64);
    assert_eq!(report.classes_scanned, 2);
    assert_eq!(report.entries_modified, 1);
    assert_eq!(report.call_sites_rewritten, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].starts_with("com/app/Broken.class: "), "{:?}", report.warnings);

    let before = contents(&input);
    let after = contents(&output);
    let names: Vec<_> = after.iter().map(|(n, ..)| n.as_str()).collect();
    assert_eq!(
        names,
        [
            "META-INF/MANIFEST.MF",
            "com/",
            "com/app/Creator.class",
            "com/app/Plain.class",
            "com/app/Broken.class",
            "README.txt"
        ]
    );
    for i in [0, 1, 3, 4, 5] {
        assert_eq!(after[i], before[i], "{}", before[i].0);
    }
    assert_eq!(after[2].1, CompressionMethod::Deflated);
    assert_ne!(after[2].2, before[2].2);

    let class = ClassModel::parse(&after[2].2)?;
    let mkdir = CallSiteFilter::new("java/io/File", "mkdir");
    assert_eq!(count_call_sites(&class, &mkdir)?, 0);
    Ok(())
}

#[test]
fn nothing_to_do_keeps_every_entry() -> Result<()> {
    let input = zip_of(&[
        ("META-INF/MANIFEST.MF", MANIFEST),
        ("com/app/Plain.class", &plain("com/app/Plain")[..]),
    ]);
    let processor = ArchiveProcessor::new(vec![deny_mkdir()], ArchiveOptions::default());
    let (output, report) = processor.process_bytes(&input)?;
    assert_eq!(report.entries_modified, 0);
    assert!(report.warnings.is_empty());
    assert_eq!(contents(&output), contents(&input));
    Ok(())
}

#[test]
fn selectors() -> Result<()> {
    let input = zip_of(&[
        ("a/One.class", &creator("a/One")[..]),
        ("a/Two.class", &creator("a/Two")[..]),
        ("a/Three.class", &plain("a/Three")[..]),
    ]);
    let add = || vec![Operation::add_field("marker", "Z", AccessFlags::ACC_PRIVATE)];
    let modified = |selector: Selector| -> Result<usize> {
        let (_, report) = ArchiveProcessor::new(add(), with_selector(selector)).process_bytes(&input)?;
        Ok(report.entries_modified)
    };

    assert_eq!(modified(Selector::AllClasses)?, 3);
    assert_eq!(modified(Selector::ClassName("a.Two".into()))?, 1);
    assert_eq!(modified(Selector::ClassName("a/Two".into()))?, 1);
    assert_eq!(modified(Selector::ClassName("b/Two".into()))?, 0);
    assert_eq!(
        modified(Selector::DeclaresMethod {
            name: "create".into(),
            descriptor: "(Ljava/io/File;)Z".into()
        })?,
        2
    );
    assert_eq!(
        modified(Selector::CallsMethod(CallSiteFilter::new("java/io/File", "mkdir")))?,
        2
    );
    assert_eq!(
        modified(Selector::custom(|class| class.name().map_or(false, |n| n.ends_with("e"))))?,
        2
    );
    Ok(())
}

#[test]
fn failing_class_is_copied_with_a_warning() -> Result<()> {
    let input = zip_of(&[
        ("a/One.class", &creator("a/One")[..]),
        ("a/Three.class", &plain("a/Three")[..]),
    ]);
    let replace = Operation::replace_method_body("create", "(Ljava/io/File;)Z", |b| {
        b.op(ICONST_1).op(IRETURN);
        Ok(())
    });
    let (output, report) = ArchiveProcessor::new(vec![replace], ArchiveOptions::default()).process_bytes(&input)?;
    assert_eq!(report.entries_modified, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].starts_with("a/Three.class: "));
    assert_eq!(contents(&output)[1], contents(&input)[1]);
    Ok(())
}

#[test]
fn parallel_output_matches_sequential() -> Result<()> {
    let classes: Vec<(String, Vec<u8>)> = (0..17)
        .map(|i| {
            let name = format!("p/C{}", i);
            let bytes = if i % 3 == 0 { plain(&name) } else { creator(&name) };
            (format!("{}.class", name), bytes)
        })
        .collect();
    let entries: Vec<(&str, &[u8])> = classes
        .iter()
        .map(|(n, b)| (n.as_str(), b.as_slice()))
        .collect();
    let input = zip_of(&entries);

    let sequential = ArchiveProcessor::new(vec![deny_mkdir()], ArchiveOptions::default());
    let parallel = ArchiveProcessor::new(
        vec![deny_mkdir()],
        ArchiveOptions {
            jobs: 4,
            ..Default::default()
        },
    );
    let (one, mut one_report) = sequential.process_bytes(&input)?;
    let (many, mut many_report) = parallel.process_bytes(&input)?;
    one_report.elapsed = Duration::ZERO;
    many_report.elapsed = Duration::ZERO;
    assert_eq!(one_report, many_report);
    assert_eq!(one_report.entries_modified, 11);
    assert_eq!(one, many);

    let names: Vec<_> = contents(&many).into_iter().map(|(n, ..)| n).collect();
    let expected: Vec<_> = classes.into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, expected);
    Ok(())
}

#[test]
fn not_a_zip() {
    let processor = ArchiveProcessor::new(vec![], ArchiveOptions::default());
    let err = processor.process_bytes(b"PK not really").unwrap_err();
    assert!(matches!(err, Error::Zip(_)), "{}", err);
}

#[test]
fn process_file_replaces_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("app.jar");
    let output = dir.path().join("app-safe.jar");
    fs::write(&input, sample())?;

    let processor = ArchiveProcessor::new(vec![deny_mkdir()], ArchiveOptions::default());
    let report = processor.process_file(&input, &output)?;
    assert_eq!(report.entries_modified, 1);
    assert_eq!(report.input_len, fs::metadata(&input)?.len());
    assert_eq!(report.output_len, fs::metadata(&output)?.len());
    let after = contents(&fs::read(&output)?);
    assert_eq!(after.len(), 6);
    assert_eq!(after[0].2, MANIFEST);
    Ok(())
}
