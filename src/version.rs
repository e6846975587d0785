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
//! this module defines the version of a class file.

use std::fmt::{Display, Formatter, Result};

use crate::constants::{MAX_MAJOR_VERSION, MIN_MAJOR_VERSION, STACK_MAP_MAJOR_VERSION};
use crate::Error;

/// the version of a java class.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct JavaVersion {
    /// The major version.
    pub major: u16,
    /// The minor version.
    pub minor: u16,
}

impl JavaVersion {
    pub const J6: JavaVersion = JavaVersion::new(50);
    pub const J7: JavaVersion = JavaVersion::new(51);
    pub const J8: JavaVersion = JavaVersion::new(52);
    pub const J11: JavaVersion = JavaVersion::new(55);
    pub const J17: JavaVersion = JavaVersion::new(61);
    pub const J21: JavaVersion = JavaVersion::new(65);

    pub const fn new(major: u16) -> Self {
        JavaVersion { major, minor: 0 }
    }

    /// Checks that the reader understands this version.
    pub fn validate(self) -> crate::Result<Self> {
        if (MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&self.major) {
            Ok(self)
        } else {
            Err(Error::UnsupportedVersion(self.major, self.minor))
        }
    }

    /// Whether methods of this version need a `StackMapTable` to pass verification.
    pub fn requires_stack_map(self) -> bool {
        self.major >= STACK_MAP_MAJOR_VERSION
    }
}

impl Display for JavaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.major {
            45 if self.minor <= 3 => write!(f, "JDK 1.0.2 minor version {}", self.minor),
            45 => write!(f, "JDK 1.1 minor version {}", self.minor),
            46..=48 => write!(f, "JDK 1.{}", self.major - 44),
            major => write!(f, "Java SE {}", major - 44),
        }
    }
}
