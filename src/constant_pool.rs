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
//! The constant pool of a single class.
//!
//! The pool only ever grows. Entries read from a class keep their index, so every
//! index stored elsewhere in the class (including inside attributes that are
//! carried as opaque bytes) stays valid after new entries are interned.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;

use crate::constants::tag;
use crate::decoder::Decoder;
use crate::mod_utf8::{modified_utf8_to_string, string_to_modified_utf8};
use crate::{Error, ReadWrite, Result};

/// A constant entry with unresolved indices to other entries.
///
/// Floating point values are kept as their raw bits so that every NaN payload
/// survives and equal entries hash equally.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PoolEntry {
    /// Modified UTF-8 bytes, exactly as stored in the class file.
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    InterfaceMethodref(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

impl PoolEntry {
    /// returns the number of indices that this entry takes.
    #[inline]
    pub const fn size(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Returns `true` if this entry is a Long/Double constant, which takes 2 indices.
    #[inline]
    pub const fn is_wide(&self) -> bool {
        matches!(self, PoolEntry::Long(_) | PoolEntry::Double(_))
    }

    pub const fn tag(&self) -> u8 {
        match self {
            PoolEntry::Utf8(_) => tag::UTF8,
            PoolEntry::Integer(_) => tag::INTEGER,
            PoolEntry::Float(_) => tag::FLOAT,
            PoolEntry::Long(_) => tag::LONG,
            PoolEntry::Double(_) => tag::DOUBLE,
            PoolEntry::Class(_) => tag::CLASS,
            PoolEntry::String(_) => tag::STRING,
            PoolEntry::Fieldref(..) => tag::FIELDREF,
            PoolEntry::Methodref(..) => tag::METHODREF,
            PoolEntry::InterfaceMethodref(..) => tag::INTERFACE_METHODREF,
            PoolEntry::NameAndType(..) => tag::NAME_AND_TYPE,
            PoolEntry::MethodHandle(..) => tag::METHOD_HANDLE,
            PoolEntry::MethodType(_) => tag::METHOD_TYPE,
            PoolEntry::Dynamic(..) => tag::DYNAMIC,
            PoolEntry::InvokeDynamic(..) => tag::INVOKE_DYNAMIC,
            PoolEntry::Module(_) => tag::MODULE,
            PoolEntry::Package(_) => tag::PACKAGE,
        }
    }

    fn read_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let at = decoder.position();
        Ok(match decoder.u8()? {
            tag::UTF8 => {
                let len = decoder.u16()?;
                PoolEntry::Utf8(decoder.bytes(len as usize)?.to_vec())
            }
            tag::INTEGER => PoolEntry::Integer(decoder.i32()?),
            tag::FLOAT => PoolEntry::Float(decoder.u32()?),
            tag::LONG => PoolEntry::Long(decoder.i64()?),
            tag::DOUBLE => PoolEntry::Double(decoder.u64()?),
            tag::CLASS => PoolEntry::Class(decoder.u16()?),
            tag::STRING => PoolEntry::String(decoder.u16()?),
            tag::FIELDREF => PoolEntry::Fieldref(decoder.u16()?, decoder.u16()?),
            tag::METHODREF => PoolEntry::Methodref(decoder.u16()?, decoder.u16()?),
            tag::INTERFACE_METHODREF => {
                PoolEntry::InterfaceMethodref(decoder.u16()?, decoder.u16()?)
            }
            tag::NAME_AND_TYPE => PoolEntry::NameAndType(decoder.u16()?, decoder.u16()?),
            tag::METHOD_HANDLE => PoolEntry::MethodHandle(decoder.u8()?, decoder.u16()?),
            tag::METHOD_TYPE => PoolEntry::MethodType(decoder.u16()?),
            tag::DYNAMIC => PoolEntry::Dynamic(decoder.u16()?, decoder.u16()?),
            tag::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic(decoder.u16()?, decoder.u16()?),
            tag::MODULE => PoolEntry::Module(decoder.u16()?),
            tag::PACKAGE => PoolEntry::Package(decoder.u16()?),
            t => {
                return Err(Error::Invalid(
                    "constant pool tag",
                    format!("{} at byte {}", t, at).into(),
                ))
            }
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.tag().write_to(writer)?;
        match self {
            PoolEntry::Utf8(bytes) => {
                let len = u16::try_from(bytes.len()).map_err(|_| Error::Overflow("utf8 constant"))?;
                len.write_to(writer)?;
                writer.write_all(bytes)?;
            }
            PoolEntry::Integer(i) => i.write_to(writer)?,
            PoolEntry::Float(bits) => bits.write_to(writer)?,
            PoolEntry::Long(l) => l.write_to(writer)?,
            PoolEntry::Double(bits) => bits.write_to(writer)?,
            PoolEntry::Class(u)
            | PoolEntry::String(u)
            | PoolEntry::MethodType(u)
            | PoolEntry::Module(u)
            | PoolEntry::Package(u) => u.write_to(writer)?,
            PoolEntry::Fieldref(u1, u2)
            | PoolEntry::Methodref(u1, u2)
            | PoolEntry::InterfaceMethodref(u1, u2)
            | PoolEntry::NameAndType(u1, u2)
            | PoolEntry::Dynamic(u1, u2)
            | PoolEntry::InvokeDynamic(u1, u2) => {
                u1.write_to(writer)?;
                u2.write_to(writer)?;
            }
            PoolEntry::MethodHandle(kind, u) => {
                kind.write_to(writer)?;
                u.write_to(writer)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `Fieldref`, `Methodref` or `InterfaceMethodref`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub owner: Cow<'a, str>,
    pub name: Cow<'a, str>,
    pub descriptor: Cow<'a, str>,
}

/// An append-only constant pool with a dedup index.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    /// slot 0 and the slot after every wide entry are `None`
    entries: Vec<Option<PoolEntry>>,
    index: HashMap<PoolEntry, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Inserts one of the `u16, u16` reference kinds after interning its parts.
macro_rules! insert_ref {
    ($fn_name:ident, $variant:ident) => {
        pub fn $fn_name(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
            let class = self.insert_class(owner)?;
            let nat = self.insert_name_and_type(name, descriptor)?;
            self.insert(PoolEntry::$variant(class, nat))
        }
    };
}

impl ConstantPool {
    /// Creates an empty constant pool.
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![None],
            index: HashMap::new(),
        }
    }

    /// The `constant_pool_count` of the class file, one more than the highest index.
    #[inline]
    pub fn count(&self) -> u16 {
        // bounded by `insert`
        self.entries.len() as u16
    }

    pub fn parse(decoder: &mut Decoder<'_>) -> Result<Self> {
        let count = decoder.u16()?;
        if count == 0 {
            return Err(Error::Invalid("constant pool count", "0".into()));
        }
        let mut cp = ConstantPool {
            entries: Vec::with_capacity(count as usize),
            index: HashMap::with_capacity(count as usize),
        };
        cp.entries.push(None);
        while cp.entries.len() < count as usize {
            let idx = cp.entries.len() as u16;
            let entry = PoolEntry::read_from(decoder)?;
            let wide = entry.is_wide();
            // duplicates are legal, the first index is the canonical one
            cp.index.entry(entry.clone()).or_insert(idx);
            cp.entries.push(Some(entry));
            if wide {
                cp.entries.push(None);
            }
        }
        if cp.entries.len() != count as usize {
            return Err(Error::Invalid(
                "constant pool",
                "wide entry occupies the slot past the end".into(),
            ));
        }
        cp.validate()?;
        Ok(cp)
    }

    /// Checks every entry's references point to entries of the right kind.
    fn validate(&self) -> Result<()> {
        for (idx, entry) in self.entries.iter().enumerate() {
            let entry = match entry {
                Some(e) => e,
                None => continue,
            };
            let ok = match *entry {
                PoolEntry::Class(u)
                | PoolEntry::String(u)
                | PoolEntry::MethodType(u)
                | PoolEntry::Module(u)
                | PoolEntry::Package(u) => self.is(u, tag::UTF8),
                PoolEntry::Fieldref(c, nat)
                | PoolEntry::Methodref(c, nat)
                | PoolEntry::InterfaceMethodref(c, nat) => {
                    self.is(c, tag::CLASS) && self.is(nat, tag::NAME_AND_TYPE)
                }
                PoolEntry::NameAndType(n, d) => self.is(n, tag::UTF8) && self.is(d, tag::UTF8),
                PoolEntry::MethodHandle(kind, r) => {
                    (1..=9).contains(&kind)
                        && matches!(
                            self.get(r),
                            Ok(PoolEntry::Fieldref(..)
                                | PoolEntry::Methodref(..)
                                | PoolEntry::InterfaceMethodref(..))
                        )
                }
                PoolEntry::Dynamic(_, nat) | PoolEntry::InvokeDynamic(_, nat) => {
                    self.is(nat, tag::NAME_AND_TYPE)
                }
                _ => true,
            };
            if !ok {
                return Err(Error::Invalid(
                    "constant pool reference",
                    format!("entry #{} {:?}", idx, entry).into(),
                ));
            }
        }
        Ok(())
    }

    #[inline]
    fn is(&self, idx: u16, tag: u8) -> bool {
        matches!(self.get(idx), Ok(e) if e.tag() == tag)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.count().write_to(writer)?;
        for e in self.entries.iter().flatten() {
            e.write_to(writer)?;
        }
        Ok(())
    }

    pub fn get(&self, idx: u16) -> Result<&PoolEntry> {
        self.entries
            .get(idx as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Invalid("constant pool index", idx.to_string().into()))
    }

    /// Interns `entry`, returning the index of an equal entry when one exists.
    pub fn insert(&mut self, entry: PoolEntry) -> Result<u16> {
        if let Some(&idx) = self.index.get(&entry) {
            return Ok(idx);
        }
        let idx = self.entries.len();
        if idx + entry.size() as usize > u16::MAX as usize {
            return Err(Error::PoolOverflow);
        }
        let idx = idx as u16;
        let wide = entry.is_wide();
        self.index.insert(entry.clone(), idx);
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(idx)
    }

    pub fn insert_utf8(&mut self, s: &str) -> Result<u16> {
        let bytes = string_to_modified_utf8(s);
        if bytes.len() > u16::MAX as usize {
            return Err(Error::Overflow("utf8 constant"));
        }
        self.insert(PoolEntry::Utf8(bytes.into_owned()))
    }

    pub fn insert_class(&mut self, name: &str) -> Result<u16> {
        let name = self.insert_utf8(name)?;
        self.insert(PoolEntry::Class(name))
    }

    pub fn insert_string(&mut self, s: &str) -> Result<u16> {
        let s = self.insert_utf8(s)?;
        self.insert(PoolEntry::String(s))
    }

    pub fn insert_int(&mut self, i: i32) -> Result<u16> {
        self.insert(PoolEntry::Integer(i))
    }

    pub fn insert_float(&mut self, f: f32) -> Result<u16> {
        self.insert(PoolEntry::Float(f.to_bits()))
    }

    pub fn insert_long(&mut self, l: i64) -> Result<u16> {
        self.insert(PoolEntry::Long(l))
    }

    pub fn insert_double(&mut self, d: f64) -> Result<u16> {
        self.insert(PoolEntry::Double(d.to_bits()))
    }

    pub fn insert_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.insert_utf8(name)?;
        let descriptor = self.insert_utf8(descriptor)?;
        self.insert(PoolEntry::NameAndType(name, descriptor))
    }

    insert_ref!(insert_field, Fieldref);
    insert_ref!(insert_method, Methodref);
    insert_ref!(insert_interface_method, InterfaceMethodref);

    pub fn insert_method_type(&mut self, descriptor: &str) -> Result<u16> {
        let descriptor = self.insert_utf8(descriptor)?;
        self.insert(PoolEntry::MethodType(descriptor))
    }

    pub fn read_utf8(&self, idx: u16) -> Result<Cow<'_, str>> {
        match self.get(idx)? {
            PoolEntry::Utf8(bytes) => Ok(modified_utf8_to_string(bytes)?),
            e => Err(mismatch("Utf8", idx, e)),
        }
    }

    /// Reads the name of a `Class` entry.
    pub fn read_class(&self, idx: u16) -> Result<Cow<'_, str>> {
        match self.get(idx)? {
            PoolEntry::Class(name) => self.read_utf8(*name),
            e => Err(mismatch("Class", idx, e)),
        }
    }

    pub fn read_string(&self, idx: u16) -> Result<Cow<'_, str>> {
        match self.get(idx)? {
            PoolEntry::String(s) => self.read_utf8(*s),
            e => Err(mismatch("String", idx, e)),
        }
    }

    pub fn read_name_and_type(&self, idx: u16) -> Result<(Cow<'_, str>, Cow<'_, str>)> {
        match self.get(idx)? {
            PoolEntry::NameAndType(name, descriptor) => {
                Ok((self.read_utf8(*name)?, self.read_utf8(*descriptor)?))
            }
            e => Err(mismatch("NameAndType", idx, e)),
        }
    }

    pub fn read_member(&self, idx: u16) -> Result<MemberRef<'_>> {
        let (kind, class, nat) = match *self.get(idx)? {
            PoolEntry::Fieldref(c, nat) => (MemberKind::Field, c, nat),
            PoolEntry::Methodref(c, nat) => (MemberKind::Method, c, nat),
            PoolEntry::InterfaceMethodref(c, nat) => (MemberKind::InterfaceMethod, c, nat),
            ref e => return Err(mismatch("member reference", idx, e)),
        };
        let (name, descriptor) = self.read_name_and_type(nat)?;
        Ok(MemberRef {
            kind,
            owner: self.read_class(class)?,
            name,
            descriptor,
        })
    }

    /// Reads the name and descriptor of an `InvokeDynamic` entry.
    pub fn read_invoke_dynamic(&self, idx: u16) -> Result<(Cow<'_, str>, Cow<'_, str>)> {
        match self.get(idx)? {
            PoolEntry::InvokeDynamic(_, nat) => self.read_name_and_type(*nat),
            e => Err(mismatch("InvokeDynamic", idx, e)),
        }
    }
}

fn mismatch(expected: &'static str, idx: u16, found: &PoolEntry) -> Error {
    Error::Invalid(
        "constant pool entry",
        format!("expected {} at #{}, found {:?}", expected, idx, found).into(),
    )
}
