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
use crate::error::{Error, Result};
use crate::ReadWrite;

/// A big endian reader over an in-memory class file.
///
/// Every read is bounds checked and reports the absolute byte position it failed at.
///
/// ```
/// use classgraft::decoder::Decoder;
/// let mut decoder = Decoder::new(&[0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);
/// assert_eq!(decoder.u16().unwrap(), 0xBEEFu16);
/// assert_eq!(decoder.u32().unwrap(), 0xCAFEBABEu32);
/// assert!(decoder.is_empty());
/// ```
#[derive(Clone)]
pub struct Decoder<'a> {
    rest: &'a [u8],
    /// absolute position of `rest[0]` in the outermost buffer
    base: usize,
}

macro_rules! read_fn {
    ($($ty:ty, $fn_name:ident;)*) => {
        $(
            pub fn $fn_name(&mut self) -> Result<$ty> {
                let at = self.position();
                let v = <$ty>::read_from(&mut self.rest).map_err(|_| Error::Truncated(at))?;
                self.base += std::mem::size_of::<$ty>();
                Ok(v)
            }
        )*
    };
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Decoder<'a> {
        Decoder {
            rest: data,
            base: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    read_fn! {
        u8, u8;
        i8, i8;
        u16, u16;
        i16, i16;
        u32, u32;
        i32, i32;
        u64, u64;
        i64, i64;
    }

    /// Borrows the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.rest.len() {
            return Err(Error::Truncated(self.base + self.rest.len()));
        }
        let (taken, rest) = self.rest.split_at(len);
        self.rest = rest;
        self.base += len;
        Ok(taken)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(drop)
    }

    /// Splits off a decoder over the next `len` bytes, positions stay absolute.
    pub fn sub(&mut self, len: usize) -> Result<Decoder<'a>> {
        let base = self.base;
        let rest = self.bytes(len)?;
        Ok(Decoder { rest, base })
    }
}
