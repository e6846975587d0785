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
//! Classes compiled by `javac`, edited and run with `-Xverify:all`.

use std::fs;
use std::process::Command;

use tempfile::{tempdir, TempDir};

use crate::constants::insn::*;
use crate::prelude::*;

use super::exec::{self, Execution};

const LOOPS: &str = r#"
import java.io.File;
import java.util.function.IntUnaryOperator;

public class Loops {
    static long total(int n) {
        long sum = 0;
        double scale = 1.5;
        try {
            for (int i = 0; i < n; i++) {
                if (i % 3 == 0) continue;
                sum += (long) (i * scale);
            }
        } catch (ArithmeticException e) {
            sum = -1;
        } finally {
            sum += 1;
        }
        return sum;
    }

    static String kind(String s) {
        switch (s) {
            case "dir": return "directory";
            case "file": return "regular";
            default: return "unknown";
        }
    }

    static boolean make(String name) {
        File f = new File(name);
        for (int attempt = 0; attempt < 2; attempt++) {
            try {
                if (f.mkdir()) return true;
            } catch (SecurityException e) {
                System.out.print("denied ");
                return false;
            }
        }
        return false;
    }

    public static void main(String[] args) {
        IntUnaryOperator twice = x -> x * 2;
        System.out.print(total(10) + " " + kind("dir") + " " + twice.applyAsInt(21) + " ");
        System.out.println(make("made"));
    }
}
"#;

const STREAMS: &str = r#"
import java.io.*;

class Shape { double area() { return 0; } }
class Circle extends Shape { double area() { return 3; } }
class Square extends Shape { double area() { return 4; } }

public class Streams {
    public static void main(String[] args) throws IOException {
        InputStream in;
        if (args.length > 0) {
            in = new ByteArrayInputStream(new byte[] {1});
        } else {
            in = new BufferedInputStream(new ByteArrayInputStream(new byte[] {2}));
        }
        Shape shape = args.length > 0 ? new Circle() : new Square();
        System.out.print(in.read() + " " + shape.area());
        try {
            new File("made").mkdir();
            System.out.print(" created");
        } catch (SecurityException e) {
            System.out.print(" blocked");
        }
        System.out.println();
    }
}
"#;

/// skip unless java and a javac of release 11 or later are installed.
fn should_skip() -> bool {
    if exec::should_skip() {
        return true;
    }
    let out = match Command::new("javac").arg("-version").output() {
        Ok(out) if out.status.success() => out,
        _ => return true,
    };
    // javac 8 prints its version on stderr
    let text = if out.stdout.is_empty() { &out.stderr } else { &out.stdout };
    let major = String::from_utf8_lossy(text)
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.split('.').next()?.parse::<u32>().ok());
    !matches!(major, Some(m) if m >= 11)
}

/// Compiles `(class name, source)` pairs into a fresh directory.
fn compile(sources: &[(&str, &str)]) -> Result<TempDir> {
    let dir = tempdir()?;
    let mut cmd = Command::new("javac");
    cmd.current_dir(dir.path()).args(["-g", "--release", "11"]);
    for (name, source) in sources {
        let file = format!("{}.java", name);
        fs::write(dir.path().join(&file), source)?;
        cmd.arg(file);
    }
    let out = cmd.output()?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    Ok(dir)
}

/// Applies `ops` to a compiled class in place.
fn edit(dir: &TempDir, class: &str, ops: &[Operation]) -> Result<TransformReport> {
    let path = dir.path().join(format!("{}.class", class));
    let (bytes, report) = transform_class(&fs::read(&path)?, ops, &TransformOptions::default())?;
    fs::write(&path, bytes)?;
    Ok(report)
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

#[test]
fn compiled_classes_round_trip() -> Result<()> {
    if should_skip() {
        return Ok(());
    }
    let dir = compile(&[("Loops", LOOPS), ("Streams", STREAMS)])?;
    for class in ["Loops", "Streams", "Shape", "Circle", "Square"] {
        let bytes = fs::read(dir.path().join(format!("{}.class", class)))?;
        let mut model = ClassModel::parse(&bytes)?;
        assert!(!model.has_modified_code());
        assert_eq!(model.to_bytes()?, bytes, "{} changed", class);
    }
    Ok(())
}

#[test]
fn reassembled_methods_verify() -> Result<()> {
    if should_skip() {
        return Ok(());
    }
    let dir = compile(&[("Loops", LOOPS)])?;
    let path = dir.path().join("Loops.class");
    let mut class = ClassModel::parse(&fs::read(&path)?)?;
    for method in &mut class.methods {
        if let Some(code) = method.code_mut() {
            code.instructions_mut();
        }
    }
    assert!(class.has_modified_code());
    fs::write(&path, class.to_bytes()?)?;

    Execution::new(dir, "Loops").case(true, "", "40 directory 42 true\n")?;
    Ok(())
}

#[test]
fn replaced_body_of_compiled_method() -> Result<()> {
    if should_skip() {
        return Ok(());
    }
    let dir = compile(&[("Loops", LOOPS)])?;
    let report = edit(
        &dir,
        "Loops",
        &[Operation::replace_method_body(
            "kind",
            "(Ljava/lang/String;)Ljava/lang/String;",
            |b| {
                b.ldc_string("replaced")?.op(ARETURN);
                Ok(())
            },
        )],
    )?;
    assert_eq!(report.methods_replaced, 1);

    Execution::new(dir, "Loops").case(true, "", "40 replaced 42 true\n")?;
    Ok(())
}

#[test]
fn call_inside_loop_and_try_is_intercepted() -> Result<()> {
    if should_skip() {
        return Ok(());
    }
    let dir = compile(&[("Loops", LOOPS)])?;
    let report = edit(&dir, "Loops", &[deny_mkdir()])?;
    assert_eq!(report.call_sites_rewritten, 1);

    let mut exec = Execution::new(dir, "Loops");
    exec.case(true, "", "40 directory 42 denied false\n")?;
    assert!(!exec.0.path().join("made").exists());
    Ok(())
}

#[test]
fn merged_locals_of_unlisted_classes_verify() -> Result<()> {
    if should_skip() {
        return Ok(());
    }
    let dir = compile(&[("Streams", STREAMS)])?;
    let mut exec = Execution::new(dir, "Streams");
    exec.case(true, "", "2 4.0 created\n")?;
    fs::remove_dir(exec.0.path().join("made"))?;

    // Circle and Square meet as Shape, which only the compiled frames know
    let report = edit(&exec.0, "Streams", &[deny_mkdir()])?;
    assert_eq!(report.call_sites_rewritten, 1);
    exec.case(true, "", "2 4.0 blocked\n")?;
    assert!(!exec.0.path().join("made").exists());
    Ok(())
}
