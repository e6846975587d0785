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
use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, Cow<'static, str>),
    #[error("Unexpected end of data at byte {0}")]
    Truncated(usize),
    #[error(transparent)]
    MUTF(#[from] crate::mod_utf8::MUTFError),
    #[error("Attribute length mismatch: declared length ({0} bytes) differs from length consumed ({1} bytes)")]
    AttributeLength(u32, u32),
    #[error("Unsupported class file version {0}.{1}")]
    UnsupportedVersion(u16, u16),
    #[error("Constant pool exceeds 65535 entries")]
    PoolOverflow,
    #[error("{0} exceeds the class file limits")]
    Overflow(&'static str),
    #[error("No method matches {0}{1}")]
    SelectorNotFound(String, String),
    #[error("Member {0} {1} already exists")]
    DuplicateMember(String, String),
    #[error("Replacement for call to {0} is not stack compatible: {1}")]
    IncompatibleReplacement(String, Cow<'static, str>),
    #[error("Invalid code at instruction {0}: {1}")]
    InvalidCode(usize, Cow<'static, str>),
}

impl Error {
    /// The input bytes could not be understood as a class file.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::Invalid(..)
                | Error::Truncated(_)
                | Error::MUTF(_)
                | Error::AttributeLength(..)
                | Error::UnsupportedVersion(..)
        )
    }

    /// A recoverable failure of a single operation, the caller decides what to do with it.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::SelectorNotFound(..)
                | Error::DuplicateMember(..)
                | Error::IncompatibleReplacement(..)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
