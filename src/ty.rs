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
//! Field and method descriptors.

use std::fmt::{Display, Formatter, Write};
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::take_till1;
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, value};
use nom::multi::{many0, many1_count};
use nom::sequence::{delimited, pair};
use nom::IResult;

use crate::{Error, Result};

/// A field descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Type {
    /// A field descriptor representing the primitive `byte` (8-bit integer).
    Byte,
    /// A field descriptor representing the primitive `char` (UTF-16 code unit).
    Char,
    /// A field descriptor representing the primitive `double` (double-precision floating point number).
    Double,
    /// A field descriptor representing the primitive `float` (single-precision floating point number).
    Float,
    /// A field descriptor representing the primitive `int` (32-bit integer).
    Int,
    /// A field descriptor representing the primitive `long` (64-bit integer).
    Long,
    /// A field descriptor representing the primitive `boolean`.
    Boolean,
    /// A field descriptor representing the primitive `short` (16-bit integer).
    Short,
    /// A class type, by internal name such as `java/lang/String`.
    Ref(String),
    /// An array type with its dimension and element type.
    ArrayRef(u8, Box<Type>),
}

impl Type {
    /// returns `true` if this type is `Long` or `Double`.
    #[inline]
    pub fn is_wide(&self) -> bool {
        matches!(self, Type::Long | Type::Double)
    }

    /// Number of local variable or operand stack slots a value of this type takes.
    #[inline]
    pub fn slots(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    #[inline]
    pub fn reference(name: impl Into<String>) -> Type {
        Type::Ref(name.into())
    }

    /// Creates a new array field descriptor. If the underlying type is array, then the dimension is added to the original dimension and the original type is returned.
    pub fn array(dim: u8, mut t: Type) -> Type {
        match &mut t {
            Type::ArrayRef(ref mut orig_dim, ..) => {
                *orig_dim += dim;
                t
            }
            _ => Type::ArrayRef(dim, Box::new(t)),
        }
    }
}

/// A method descriptor, `None` as return type stands for `void`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<Type>,
    pub ret: Option<Type>,
}

impl MethodDescriptor {
    pub fn new(parameters: impl Into<Vec<Type>>, ret: Option<Type>) -> Self {
        MethodDescriptor {
            parameters: parameters.into(),
            ret,
        }
    }

    /// Operand stack slots taken by the arguments, without any receiver.
    pub fn arg_slots(&self) -> u16 {
        self.parameters.iter().map(Type::slots).sum()
    }

    pub fn ret_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, Type::slots)
    }
}

fn base_type(i: &str) -> IResult<&str, Type> {
    alt((
        value(Type::Byte, char('B')),
        value(Type::Char, char('C')),
        value(Type::Double, char('D')),
        value(Type::Float, char('F')),
        value(Type::Int, char('I')),
        value(Type::Long, char('J')),
        value(Type::Short, char('S')),
        value(Type::Boolean, char('Z')),
    ))(i)
}

fn object_type(i: &str) -> IResult<&str, Type> {
    map(
        delimited(char('L'), take_till1(|c: char| c == ';'), char(';')),
        |name: &str| Type::Ref(name.to_owned()),
    )(i)
}

fn array_type(i: &str) -> IResult<&str, Type> {
    map(
        pair(many1_count(char('[')), alt((base_type, object_type))),
        |(dim, t)| Type::ArrayRef(dim.min(u8::MAX as usize) as u8, Box::new(t)),
    )(i)
}

fn field_type(i: &str) -> IResult<&str, Type> {
    alt((base_type, object_type, array_type))(i)
}

fn return_type(i: &str) -> IResult<&str, Option<Type>> {
    alt((value(None, char('V')), map(field_type, Some)))(i)
}

fn method_descriptor(i: &str) -> IResult<&str, MethodDescriptor> {
    map(
        pair(
            delimited(char('('), many0(field_type), char(')')),
            return_type,
        ),
        |(parameters, ret)| MethodDescriptor { parameters, ret },
    )(i)
}

impl FromStr for Type {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        all_consuming(field_type)(s)
            .map(|(_, t)| t)
            .map_err(|_| Error::Invalid("field descriptor", s.to_owned().into()))
    }
}

impl FromStr for MethodDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        all_consuming(method_descriptor)(s)
            .map(|(_, t)| t)
            .map_err(|_| Error::Invalid("method descriptor", s.to_owned().into()))
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Byte => f.write_char('B'),
            Type::Char => f.write_char('C'),
            Type::Double => f.write_char('D'),
            Type::Float => f.write_char('F'),
            Type::Int => f.write_char('I'),
            Type::Long => f.write_char('J'),
            Type::Boolean => f.write_char('Z'),
            Type::Short => f.write_char('S'),
            Type::Ref(s) => write!(f, "L{};", s),
            Type::ArrayRef(dim, t) => {
                f.write_str(&"[".repeat(*dim as usize))?;
                t.fmt(f)
            }
        }
    }
}

impl Display for MethodDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_char('(')?;
        for t in &self.parameters {
            t.fmt(f)?;
        }
        f.write_char(')')?;
        match &self.ret {
            Some(t) => t.fmt(f),
            None => f.write_char('V'),
        }
    }
}
