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
//! Conversions between Rust strings and the modified UTF-8 of class files.
//!
//! Modified UTF-8 encodes `\0` as two bytes and characters outside the basic
//! multilingual plane as a surrogate pair of three-byte sequences.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum MUTFError {
    #[error("Partial character at end of string")]
    PartialCharacterAtEnd,
    #[error("Malformed input around byte {0}")]
    AroundByte(usize),
}

#[inline]
fn is_plain(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b != 0 && b < 0x80)
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16, MUTFError> {
    match bytes.get(at) {
        None => Err(MUTFError::PartialCharacterAtEnd),
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        Some(_) => Err(MUTFError::AroundByte(at)),
    }
}

/// Decodes modified UTF-8. Unpaired surrogates become U+FFFD.
pub fn modified_utf8_to_string(bytes: &[u8]) -> Result<Cow<'_, str>, MUTFError> {
    if is_plain(bytes) {
        return std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|e| MUTFError::AroundByte(e.valid_up_to()));
    }
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = match b >> 4 {
            0..=7 if b != 0 => {
                i += 1;
                b as u16
            }
            12 | 13 => {
                let b2 = continuation(bytes, i + 1)?;
                i += 2;
                ((b as u16 & 0x1F) << 6) | b2
            }
            14 => {
                let b2 = continuation(bytes, i + 1)?;
                let b3 = continuation(bytes, i + 2)?;
                i += 3;
                ((b as u16 & 0x0F) << 12) | (b2 << 6) | b3
            }
            _ => return Err(MUTFError::AroundByte(i)),
        };
        units.push(unit);
    }
    Ok(Cow::Owned(
        char::decode_utf16(units)
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    ))
}

pub fn string_to_modified_utf8(s: &str) -> Cow<'_, [u8]> {
    if is_plain(s.as_bytes()) {
        return Cow::Borrowed(s.as_bytes());
    }
    let mut out = Vec::with_capacity(s.len() + 8);
    for unit in s.encode_utf16() {
        match unit {
            0x01..=0x7F => out.push(unit as u8),
            0x00 | 0x80..=0x7FF => {
                // 110xxxxx 10xxxxxx
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                // 1110xxxx 10xxxxxx 10xxxxxx
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Cow::Owned(out)
}
