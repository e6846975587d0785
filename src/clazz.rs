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
//! The in-memory form of a class file.

use std::borrow::Cow;

use crate::access::AccessFlags;
use crate::attr::{read_attributes, read_raw, write_count, RawAttribute};
use crate::constant_pool::ConstantPool;
use crate::constants::JVM_MAGIC;
use crate::decoder::Decoder;
use crate::hierarchy::{BasicHierarchy, ClassHierarchy, Layered};
use crate::member::{FieldInfo, MethodInfo};
use crate::version::JavaVersion;
use crate::{Error, ReadWrite, Result};

/// A parsed class.
///
/// Every `u16` field is an index into [`pool`](Self::pool). The pool only ever
/// grows, so indices read from the input stay valid through any edit.
#[derive(Debug, Clone)]
pub struct ClassModel {
    pub version: JavaVersion,
    pub access: AccessFlags,
    pub this_class: u16,
    /// `0` for `java/lang/Object`.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<RawAttribute>,
    pub pool: ConstantPool,
}

impl ClassModel {
    /// Creates an empty public class.
    pub fn new(name: &str, super_name: Option<&str>, version: JavaVersion) -> Result<ClassModel> {
        let mut pool = ConstantPool::new();
        let this_class = pool.insert_class(name)?;
        let super_class = match super_name {
            Some(s) => pool.insert_class(s)?,
            None => 0,
        };
        Ok(ClassModel {
            version,
            access: AccessFlags::ACC_PUBLIC | AccessFlags::ACC_SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
            pool,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<ClassModel> {
        let mut d = Decoder::new(bytes);
        let magic = d.u32()?;
        if magic != JVM_MAGIC {
            return Err(Error::Invalid("class header", format!("{:#010x}", magic).into()));
        }
        let minor = d.u16()?;
        let major = d.u16()?;
        let version = JavaVersion { major, minor }.validate()?;
        let pool = ConstantPool::parse(&mut d)?;

        let access = AccessFlags::from_bits_truncate(d.u16()?);
        let this_class = d.u16()?;
        pool.read_class(this_class)?;
        let super_class = d.u16()?;
        if super_class != 0 {
            pool.read_class(super_class)?;
        }
        let count = d.u16()?;
        let mut interfaces = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let itf = d.u16()?;
            pool.read_class(itf)?;
            interfaces.push(itf);
        }
        let count = d.u16()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fields.push(FieldInfo::parse(&mut d, &pool)?);
        }
        let count = d.u16()?;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            methods.push(MethodInfo::parse(&mut d, &pool)?);
        }
        let attributes = read_attributes(&mut d, &pool, |_, idx, body| read_raw(idx, body))?;
        if !d.is_empty() {
            return Err(Error::Invalid(
                "class file",
                format!("{} trailing bytes", d.remaining()).into(),
            ));
        }

        Ok(ClassModel {
            version,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
            pool,
        })
    }

    /// The internal name of this class, such as `java/lang/String`.
    pub fn name(&self) -> Result<Cow<'_, str>> {
        self.pool.read_class(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<Cow<'_, str>>> {
        if self.super_class == 0 {
            Ok(None)
        } else {
            self.pool.read_class(self.super_class).map(Some)
        }
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            matches!(m.name(&self.pool), Ok(n) if n == name)
                && matches!(m.descriptor(&self.pool), Ok(d) if d == descriptor)
        })
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| matches!(f.name(&self.pool), Ok(n) if n == name))
    }

    /// Returns `true` if any method body was edited since parsing.
    pub fn has_modified_code(&self) -> bool {
        self.methods
            .iter()
            .any(|m| m.code().map_or(false, |c| c.is_modified()))
    }

    /// Writes the class, resolving super classes against a few well known JDK classes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.write_with(&BasicHierarchy::with_jdk_defaults())
    }

    /// Writes the class.
    ///
    /// Edited method bodies are assembled first since that may add pool entries.
    /// Nothing is returned unless every part could be encoded.
    pub fn write_with(&mut self, hierarchy: &dyn ClassHierarchy) -> Result<Vec<u8>> {
        let name = self.name()?.into_owned();
        let mut own = BasicHierarchy::new();
        own.insert_class(self)?;
        let hierarchy = Layered(vec![&own as &dyn ClassHierarchy, hierarchy]);

        let mut body = Vec::new();
        self.access.write_to(&mut body)?;
        self.this_class.write_to(&mut body)?;
        self.super_class.write_to(&mut body)?;
        write_count(&mut body, self.interfaces.len(), "interfaces")?;
        for i in &self.interfaces {
            i.write_to(&mut body)?;
        }
        write_count(&mut body, self.fields.len(), "fields")?;
        for f in &self.fields {
            f.write(&mut body, &mut self.pool)?;
        }
        write_count(&mut body, self.methods.len(), "methods")?;
        for m in &mut self.methods {
            m.write(&mut body, &mut self.pool, &name, self.version, &hierarchy)?;
        }
        write_count(&mut body, self.attributes.len(), "class attributes")?;
        for a in &self.attributes {
            a.write_to(&mut body)?;
        }

        let mut out = Vec::with_capacity(body.len() + 1024);
        JVM_MAGIC.write_to(&mut out)?;
        self.version.minor.write_to(&mut out)?;
        self.version.major.write_to(&mut out)?;
        self.pool.write_to(&mut out)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}
