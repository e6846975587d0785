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
use crate::ty::{MethodDescriptor, Type};

#[test]
fn parse_field_descriptors() {
    assert_eq!("I".parse::<Type>().unwrap(), Type::Int);
    assert_eq!(
        "Ljava/lang/String;".parse::<Type>().unwrap(),
        Type::reference("java/lang/String")
    );
    assert_eq!(
        "[[J".parse::<Type>().unwrap(),
        Type::ArrayRef(2, Box::new(Type::Long))
    );
    for bad in ["", "V", "L;", "Ljava/lang/String", "II", "[", "Q"] {
        assert!(bad.parse::<Type>().is_err(), "{:?} should not parse", bad);
    }
}

#[test]
fn parse_method_descriptors() {
    let desc: MethodDescriptor = "(IJLjava/lang/String;[D)V".parse().unwrap();
    assert_eq!(
        desc,
        MethodDescriptor::new(
            [
                Type::Int,
                Type::Long,
                Type::reference("java/lang/String"),
                Type::array(1, Type::Double)
            ],
            None
        )
    );
    assert_eq!(desc.arg_slots(), 5);
    assert_eq!(desc.ret_slots(), 0);
    assert_eq!(desc.to_string(), "(IJLjava/lang/String;[D)V");

    let desc: MethodDescriptor = "()D".parse().unwrap();
    assert_eq!(desc.arg_slots(), 0);
    assert_eq!(desc.ret_slots(), 2);

    for bad in ["", "()", "(V)V", "I", "()VV", "(I"] {
        assert!(bad.parse::<MethodDescriptor>().is_err(), "{:?} should not parse", bad);
    }
}

#[test]
fn array_dimensions_accumulate() {
    let t = Type::array(1, Type::array(2, Type::Int));
    assert_eq!(t, Type::ArrayRef(3, Box::new(Type::Int)));
    assert_eq!(t.to_string(), "[[[I");
    assert_eq!(t.slots(), 1);
}
