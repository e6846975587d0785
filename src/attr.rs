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
use crate::constant_pool::ConstantPool;
use crate::decoder::Decoder;
use crate::{Error, ReadWrite, Result};

/// An attribute that is carried through untouched.
///
/// Indices inside `inner` stay valid because the constant pool is append-only.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RawAttribute {
    /// The `Utf8` entry holding the attribute name.
    pub name: u16,
    /// The inner data of this attribute.
    pub inner: Vec<u8>,
}

impl RawAttribute {
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        write_attribute(out, self.name, &self.inner)
    }
}

/// Reads an attribute table, handing each attribute body to `f`.
///
/// `f` must consume the whole body it is given.
pub(crate) fn read_attributes<T>(
    decoder: &mut Decoder<'_>,
    pool: &ConstantPool,
    mut f: impl FnMut(&str, u16, &mut Decoder<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let count = decoder.u16()?;
    let mut attrs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_idx = decoder.u16()?;
        let name = pool.read_utf8(name_idx)?;
        let len = decoder.u32()?;
        let mut body = decoder.sub(len as usize)?;
        attrs.push(f(&name, name_idx, &mut body)?);
        if !body.is_empty() {
            return Err(Error::AttributeLength(len, len - body.remaining() as u32));
        }
    }
    Ok(attrs)
}

pub(crate) fn read_raw(name: u16, decoder: &mut Decoder<'_>) -> Result<RawAttribute> {
    Ok(RawAttribute {
        name,
        inner: decoder.bytes(decoder.remaining())?.to_vec(),
    })
}

pub(crate) fn write_attribute(out: &mut Vec<u8>, name: u16, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| Error::Overflow("attribute length"))?;
    name.write_to(out)?;
    len.write_to(out)?;
    out.extend_from_slice(body);
    Ok(())
}

pub(crate) fn write_count(out: &mut Vec<u8>, count: usize, what: &'static str) -> Result<()> {
    u16::try_from(count)
        .map_err(|_| Error::Overflow(what))?
        .write_to(out)
}
