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
//! Fields and methods of a class.

use std::borrow::Cow;

use crate::access::AccessFlags;
use crate::attr::{read_attributes, read_raw, write_attribute, write_count, RawAttribute};
use crate::code::{Code, MethodContext};
use crate::constant_pool::ConstantPool;
use crate::constants::attr;
use crate::decoder::Decoder;
use crate::hierarchy::ClassHierarchy;
use crate::ty::MethodDescriptor;
use crate::version::JavaVersion;
use crate::{ReadWrite, Result};

#[derive(PartialEq, Debug, Clone)]
pub enum FieldAttribute {
    /// The `ConstantValue` of a static field, an index to a loadable constant.
    ConstantValue(u16),
    Raw(RawAttribute),
}

#[derive(PartialEq, Debug, Clone)]
pub struct FieldInfo {
    pub access: AccessFlags,
    pub name: u16,
    pub descriptor: u16,
    pub attributes: Vec<FieldAttribute>,
}

#[derive(PartialEq, Debug, Clone)]
pub enum MethodAttribute {
    Code(Code),
    Raw(RawAttribute),
}

#[derive(PartialEq, Debug, Clone)]
pub struct MethodInfo {
    pub access: AccessFlags,
    pub name: u16,
    pub descriptor: u16,
    pub attributes: Vec<MethodAttribute>,
}

fn read_header(decoder: &mut Decoder<'_>, pool: &ConstantPool) -> Result<(AccessFlags, u16, u16)> {
    let access = AccessFlags::from_bits_truncate(decoder.u16()?);
    let name = decoder.u16()?;
    let descriptor = decoder.u16()?;
    pool.read_utf8(name)?;
    pool.read_utf8(descriptor)?;
    Ok((access, name, descriptor))
}

fn write_header(out: &mut Vec<u8>, access: AccessFlags, name: u16, descriptor: u16) -> Result<()> {
    access.write_to(out)?;
    name.write_to(out)?;
    descriptor.write_to(out)
}

impl FieldInfo {
    pub(crate) fn parse(decoder: &mut Decoder<'_>, pool: &ConstantPool) -> Result<FieldInfo> {
        let (access, name, descriptor) = read_header(decoder, pool)?;
        let attributes = read_attributes(decoder, pool, |attr_name, idx, body| {
            Ok(if attr_name == attr::CONSTANT_VALUE {
                let value = body.u16()?;
                pool.get(value)?;
                FieldAttribute::ConstantValue(value)
            } else {
                FieldAttribute::Raw(read_raw(idx, body)?)
            })
        })?;
        Ok(FieldInfo {
            access,
            name,
            descriptor,
            attributes,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, pool: &mut ConstantPool) -> Result<()> {
        write_header(out, self.access, self.name, self.descriptor)?;
        write_count(out, self.attributes.len(), "field attributes")?;
        for a in &self.attributes {
            match a {
                FieldAttribute::ConstantValue(v) => {
                    let name = pool.insert_utf8(attr::CONSTANT_VALUE)?;
                    write_attribute(out, name, &v.to_be_bytes())?;
                }
                FieldAttribute::Raw(raw) => raw.write_to(out)?,
            }
        }
        Ok(())
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.read_utf8(self.name)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.read_utf8(self.descriptor)
    }
}

impl MethodInfo {
    pub(crate) fn parse(decoder: &mut Decoder<'_>, pool: &ConstantPool) -> Result<MethodInfo> {
        let (access, name, descriptor) = read_header(decoder, pool)?;
        let attributes = read_attributes(decoder, pool, |attr_name, idx, body| {
            Ok(if attr_name == attr::CODE {
                MethodAttribute::Code(Code::parse(body, pool)?)
            } else {
                MethodAttribute::Raw(read_raw(idx, body)?)
            })
        })?;
        Ok(MethodInfo {
            access,
            name,
            descriptor,
            attributes,
        })
    }

    /// Writes the method, assembling its body if it was changed.
    pub(crate) fn write(
        &mut self,
        out: &mut Vec<u8>,
        pool: &mut ConstantPool,
        class_name: &str,
        version: JavaVersion,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<()> {
        write_header(out, self.access, self.name, self.descriptor)?;
        write_count(out, self.attributes.len(), "method attributes")?;
        let method_name = pool.read_utf8(self.name)?.into_owned();
        let descriptor: MethodDescriptor = pool.read_utf8(self.descriptor)?.parse()?;
        for a in &mut self.attributes {
            match a {
                MethodAttribute::Code(code) => {
                    let ctx = MethodContext {
                        class_name,
                        method_name: &method_name,
                        descriptor: &descriptor,
                        is_static: self.access.contains(AccessFlags::ACC_STATIC),
                        version,
                        hierarchy,
                    };
                    let body = code.encode(&ctx, pool)?;
                    let name = pool.insert_utf8(attr::CODE)?;
                    write_attribute(out, name, &body)?;
                }
                MethodAttribute::Raw(raw) => raw.write_to(out)?,
            }
        }
        Ok(())
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.read_utf8(self.name)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>> {
        pool.read_utf8(self.descriptor)
    }

    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|a| match a {
            MethodAttribute::Code(c) => Some(c),
            MethodAttribute::Raw(_) => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|a| match a {
            MethodAttribute::Code(c) => Some(c),
            MethodAttribute::Raw(_) => None,
        })
    }

    /// Sets the body of this method, replacing any previous one.
    pub fn set_code(&mut self, code: Code) {
        match self.code_mut() {
            Some(c) => *c = code,
            None => self.attributes.push(MethodAttribute::Code(code)),
        }
    }
}
