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
//! Declarative edits of a class.
//!
//! Operations are applied in order to a parsed [`ClassModel`]. The first failing
//! operation aborts the whole transformation; the model may then be partially
//! edited and should be discarded.

pub mod callsite;

use std::fmt::{Debug, Formatter};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::access::AccessFlags;
use crate::clazz::ClassModel;
use crate::code::{Code, CodeBuilder, MethodContext};
use crate::hierarchy::{BasicHierarchy, ClassHierarchy, Layered};
use crate::member::{FieldAttribute, FieldInfo, MethodAttribute, MethodInfo};
use crate::ty::{MethodDescriptor, Type};
use crate::{Error, Result};

use self::callsite::CallSiteRewriter;

/// Emits a method body.
pub type BodyFn = Box<dyn Fn(&mut CodeBuilder<'_>) -> Result<()> + Send + Sync>;

/// The initial value of a static field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

/// One structural edit.
pub enum Operation {
    AddField {
        name: String,
        descriptor: String,
        access: AccessFlags,
        constant: Option<ConstantValue>,
    },
    /// Adds a method. A method without a body must be `abstract` or `native`.
    AddMethod {
        name: String,
        descriptor: String,
        access: AccessFlags,
        body: Option<BodyFn>,
    },
    ReplaceMethodBody {
        name: String,
        descriptor: String,
        body: BodyFn,
    },
    RewriteCallSites(CallSiteRewriter),
}

impl Operation {
    pub fn add_field(name: impl Into<String>, descriptor: impl Into<String>, access: AccessFlags) -> Self {
        Operation::AddField {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            constant: None,
        }
    }

    /// A static field initialized through a `ConstantValue` attribute.
    pub fn add_constant(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: AccessFlags,
        value: ConstantValue,
    ) -> Self {
        Operation::AddField {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            constant: Some(value),
        }
    }

    pub fn add_method(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: AccessFlags,
        body: impl Fn(&mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Operation::AddMethod {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            body: Some(Box::new(body)),
        }
    }

    pub fn add_abstract_method(name: impl Into<String>, descriptor: impl Into<String>, access: AccessFlags) -> Self {
        Operation::AddMethod {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            body: None,
        }
    }

    pub fn replace_method_body(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        body: impl Fn(&mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Operation::ReplaceMethodBody {
            name: name.into(),
            descriptor: descriptor.into(),
            body: Box::new(body),
        }
    }

    pub fn rewrite_call_sites(rewriter: CallSiteRewriter) -> Self {
        Operation::RewriteCallSites(rewriter)
    }
}

impl Debug for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::AddField {
                name, descriptor, ..
            } => write!(f, "AddField({} {})", name, descriptor),
            Operation::AddMethod {
                name, descriptor, ..
            } => write!(f, "AddMethod({}{})", name, descriptor),
            Operation::ReplaceMethodBody { name, descriptor, .. } => {
                write!(f, "ReplaceMethodBody({}{})", name, descriptor)
            }
            Operation::RewriteCallSites(r) => write!(f, "RewriteCallSites({:?})", r),
        }
    }
}

/// What happens when an added member already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberMode {
    /// Fail with [`Error::DuplicateMember`].
    Strict,
    /// Add the member anyway.
    #[default]
    Permissive,
}

#[derive(Clone, Default)]
pub struct TransformOptions {
    pub member_mode: MemberMode,
    /// Classes the input depends on, consulted before the built in JDK classes when
    /// frames are merged by [`transform_class`] and the archive processor.
    pub hierarchy: Option<Arc<dyn ClassHierarchy>>,
}

impl TransformOptions {
    pub fn with_hierarchy(mut self, hierarchy: impl ClassHierarchy + 'static) -> Self {
        self.hierarchy = Some(Arc::new(hierarchy));
        self
    }
}

impl Debug for TransformOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformOptions")
            .field("member_mode", &self.member_mode)
            .field("hierarchy", &self.hierarchy.is_some())
            .finish()
    }
}

/// What a transformation did to one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub modified: bool,
    pub fields_added: usize,
    pub methods_added: usize,
    pub methods_replaced: usize,
    pub call_sites_rewritten: usize,
}

impl TransformReport {
    pub fn merge(&mut self, other: &TransformReport) {
        self.modified |= other.modified;
        self.fields_added += other.fields_added;
        self.methods_added += other.methods_added;
        self.methods_replaced += other.methods_replaced;
        self.call_sites_rewritten += other.call_sites_rewritten;
    }
}

/// Applies operations to classes.
pub struct Transformer<'h> {
    options: TransformOptions,
    hierarchy: &'h dyn ClassHierarchy,
}

impl<'h> Transformer<'h> {
    pub fn new(options: TransformOptions, hierarchy: &'h dyn ClassHierarchy) -> Self {
        Transformer { options, hierarchy }
    }

    pub fn apply(&self, class: &mut ClassModel, ops: &[Operation]) -> Result<TransformReport> {
        let class_name = class.name()?.into_owned();
        let mut report = TransformReport::default();
        for op in ops {
            match op {
                Operation::AddField {
                    name,
                    descriptor,
                    access,
                    constant,
                } => {
                    self.add_field(class, name, descriptor, *access, constant.as_ref())?;
                    report.fields_added += 1;
                }
                Operation::AddMethod {
                    name,
                    descriptor,
                    access,
                    body,
                } => {
                    self.add_method(class, &class_name, name, descriptor, *access, body.as_ref())?;
                    report.methods_added += 1;
                }
                Operation::ReplaceMethodBody {
                    name,
                    descriptor,
                    body,
                } => {
                    self.replace_body(class, &class_name, name, descriptor, body)?;
                    report.methods_replaced += 1;
                }
                Operation::RewriteCallSites(rewriter) => {
                    report.call_sites_rewritten += self.rewrite_call_sites(class, &class_name, rewriter)?;
                }
            }
        }
        report.modified = report.fields_added + report.methods_added + report.methods_replaced
            + report.call_sites_rewritten
            > 0;
        if report.modified {
            debug!("{}: {:?}", class_name, report);
        }
        Ok(report)
    }

    fn add_field(
        &self,
        class: &mut ClassModel,
        name: &str,
        descriptor: &str,
        access: AccessFlags,
        constant: Option<&ConstantValue>,
    ) -> Result<()> {
        descriptor.parse::<Type>()?;
        if class.find_field(name).is_some() {
            if self.options.member_mode == MemberMode::Strict {
                return Err(Error::DuplicateMember(name.into(), descriptor.into()));
            }
            debug!("adding field {} next to an existing one", name);
        }
        let pool = &mut class.pool;
        let mut attributes = vec![];
        if let Some(value) = constant {
            let idx = match value {
                ConstantValue::Int(i) => pool.insert_int(*i)?,
                ConstantValue::Long(l) => pool.insert_long(*l)?,
                ConstantValue::Float(f) => pool.insert_float(*f)?,
                ConstantValue::Double(d) => pool.insert_double(*d)?,
                ConstantValue::String(s) => pool.insert_string(s)?,
            };
            attributes.push(FieldAttribute::ConstantValue(idx));
        }
        let field = FieldInfo {
            access,
            name: pool.insert_utf8(name)?,
            descriptor: pool.insert_utf8(descriptor)?,
            attributes,
        };
        class.fields.push(field);
        Ok(())
    }

    /// Builds a body against the class's pool and computes its maxima.
    fn build_code(
        &self,
        class: &mut ClassModel,
        class_name: &str,
        name: &str,
        descriptor: &MethodDescriptor,
        access: AccessFlags,
        body: &BodyFn,
    ) -> Result<Code> {
        let mut builder = CodeBuilder::new(&mut class.pool);
        body(&mut builder)?;
        let (instructions, catches) = builder.finish();
        let mut code = Code::new(instructions, catches);
        let ctx = MethodContext {
            class_name,
            method_name: name,
            descriptor,
            is_static: access.contains(AccessFlags::ACC_STATIC),
            version: class.version,
            hierarchy: self.hierarchy,
        };
        code.compute_maxs(&ctx, &class.pool)?;
        Ok(code)
    }

    fn add_method(
        &self,
        class: &mut ClassModel,
        class_name: &str,
        name: &str,
        descriptor: &str,
        access: AccessFlags,
        body: Option<&BodyFn>,
    ) -> Result<()> {
        let desc: MethodDescriptor = descriptor.parse()?;
        let bodiless = access.is_bodiless();
        if bodiless == body.is_some() {
            return Err(Error::Invalid(
                "method access",
                format!(
                    "{}{} {}",
                    name,
                    descriptor,
                    if bodiless { "is abstract or native but has a body" } else { "has no body" }
                )
                .into(),
            ));
        }
        if class.find_method(name, descriptor).is_some() {
            if self.options.member_mode == MemberMode::Strict {
                return Err(Error::DuplicateMember(name.into(), descriptor.into()));
            }
            debug!("adding method {}{} next to an existing one", name, descriptor);
        }
        let mut attributes = vec![];
        if let Some(body) = body {
            let code = self.build_code(class, class_name, name, &desc, access, body)?;
            attributes.push(MethodAttribute::Code(code));
        }
        let method = MethodInfo {
            access,
            name: class.pool.insert_utf8(name)?,
            descriptor: class.pool.insert_utf8(descriptor)?,
            attributes,
        };
        class.methods.push(method);
        Ok(())
    }

    fn replace_body(
        &self,
        class: &mut ClassModel,
        class_name: &str,
        name: &str,
        descriptor: &str,
        body: &BodyFn,
    ) -> Result<()> {
        let idx = class
            .find_method(name, descriptor)
            .ok_or_else(|| Error::SelectorNotFound(name.into(), descriptor.into()))?;
        let desc: MethodDescriptor = descriptor.parse()?;
        let access = class.methods[idx].access;
        if access.is_bodiless() {
            return Err(Error::Invalid(
                "method access",
                format!("{}{} is abstract or native and cannot take a body", name, descriptor).into(),
            ));
        }
        let code = self.build_code(class, class_name, name, &desc, access, body)?;
        class.methods[idx].set_code(code);
        Ok(())
    }

    fn rewrite_call_sites(
        &self,
        class: &mut ClassModel,
        class_name: &str,
        rewriter: &CallSiteRewriter,
    ) -> Result<usize> {
        let mut total = 0;
        for method in &mut class.methods {
            if method.code().is_none() {
                continue;
            }
            let descriptor: MethodDescriptor = class.pool.read_utf8(method.descriptor)?.parse()?;
            let n = match method.code_mut() {
                Some(code) => rewriter.rewrite(code, &mut class.pool, class_name, &descriptor)?,
                None => 0,
            };
            if n == 0 {
                continue;
            }
            let name = class.pool.read_utf8(method.name)?.into_owned();
            let ctx = MethodContext {
                class_name,
                method_name: &name,
                descriptor: &descriptor,
                is_static: method.access.contains(AccessFlags::ACC_STATIC),
                version: class.version,
                hierarchy: self.hierarchy,
            };
            if let Some(code) = method.code_mut() {
                code.compute_maxs(&ctx, &class.pool)?;
            }
            total += n;
        }
        Ok(total)
    }
}

/// Parses a class, applies `ops` and writes it back.
///
/// A class that no operation changed is returned as the input bytes.
pub fn transform_class(
    bytes: &[u8],
    ops: &[Operation],
    options: &TransformOptions,
) -> Result<(Vec<u8>, TransformReport)> {
    let mut class = ClassModel::parse(bytes)?;
    let jdk = BasicHierarchy::with_jdk_defaults();
    let mut layers: Vec<&dyn ClassHierarchy> = Vec::with_capacity(2);
    if let Some(h) = &options.hierarchy {
        layers.push(h.as_ref());
    }
    layers.push(&jdk);
    let hierarchy = Layered(layers);
    let report = Transformer::new(options.clone(), &hierarchy).apply(&mut class, ops)?;
    if !report.modified {
        return Ok((bytes.to_vec(), report));
    }
    let out = class.write_with(&hierarchy)?;
    Ok((out, report))
}

/// Transforms the class file at `input` into `output`.
///
/// `output` is replaced atomically and left alone when the transformation fails.
pub fn transform_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    ops: &[Operation],
    options: &TransformOptions,
) -> Result<TransformReport> {
    let input = input.as_ref();
    let output = output.as_ref();
    let bytes = fs::read(input)?;
    let (out, report) = transform_class(&bytes, ops, options)?;
    write_atomically(output, &out)?;
    info!(
        "{} -> {}: {} call sites rewritten",
        input.display(),
        output.display(),
        report.call_sites_rewritten
    );
    Ok(report)
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
