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
//! Structural editing of compiled Java class files.
//!
//! A class is parsed into a [`ClassModel`](clazz::ClassModel), edited through the
//! operations of the [`transform`] module and written back with every derived
//! piece of metadata (offsets, maxima, stack map frames) recomputed.
//! The [`archive`] module applies the same edits to every selected entry of a jar.

#[macro_use]
extern crate bitflags;

pub mod access;
pub mod archive;
pub mod attr;
pub mod clazz;
pub mod code;
pub mod constant_pool;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod hierarchy;
pub mod member;
pub mod mod_utf8;
pub mod transform;
pub mod ty;
pub mod version;

#[cfg(test)]
mod tests;

use std::io::{Read, Write};

pub use crate::error::{Error, Result};

/// Fixed-width big endian values of the class file format.
///
/// All integer types implement `ReadWrite`. Structures that need the constant
/// pool to be interpreted are read through [`Decoder`](decoder::Decoder) instead.
pub trait ReadWrite
where
    Self: Sized,
{
    fn read_from<T: Read>(reader: &mut T) -> Result<Self>;
    fn write_to<T: Write>(&self, writer: &mut T) -> Result<()>;
}

macro_rules! impl_readwrite_nums {
    ($($i:ty, $s:literal)*) => {
        $(
            impl ReadWrite for $i {
                fn read_from<T: Read>(reader: &mut T) -> Result<Self> {
                    let mut bytes = [0u8; $s];
                    reader.read_exact(&mut bytes)?;
                    Ok(<$i>::from_be_bytes(bytes))
                }
                fn write_to<T: Write>(&self, writer: &mut T) -> Result<()> {
                    writer.write_all(&self.to_be_bytes())?;
                    Ok(())
                }
            }
        )*
    };
}
impl_readwrite_nums! { u8, 1  i8, 1  u16, 2  i16, 2  u32, 4  i32, 4  u64, 8  i64, 8 }

pub mod prelude {
    pub use crate::access::AccessFlags;
    pub use crate::archive::{ArchiveOptions, ArchiveProcessor, ArchiveReport, Selector};
    pub use crate::clazz::ClassModel;
    pub use crate::code::{Catch, Code, CodeBuilder, Instruction, Label};
    pub use crate::constant_pool::{ConstantPool, PoolEntry};
    pub use crate::constants::insn;
    pub use crate::hierarchy::{BasicHierarchy, ClassHierarchy};
    pub use crate::member::{FieldInfo, MethodInfo};
    pub use crate::transform::callsite::{count_call_sites, CallSite, CallSiteFilter, CallSiteRewriter, Effect};
    pub use crate::transform::{
        transform_class, transform_file, BodyFn, ConstantValue, MemberMode, Operation,
        TransformOptions, TransformReport, Transformer,
    };
    pub use crate::ty::{MethodDescriptor, Type};
    pub use crate::version::JavaVersion;
    pub use crate::{Error, Result};
}
