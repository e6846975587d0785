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
//! Super class lookup for merging reference types.

use std::collections::{HashMap, HashSet};

use crate::access::AccessFlags;
use crate::clazz::ClassModel;
use crate::Result;

const OBJECT: &str = "java/lang/Object";

/// Answers questions about classes that are not necessarily being edited.
pub trait ClassHierarchy: Send + Sync {
    /// The direct super class of `class`, or `None` if it is unknown or `java/lang/Object`.
    fn super_class(&self, class: &str) -> Option<String>;

    fn is_interface(&self, _class: &str) -> bool {
        false
    }

    /// The most specific class both `a` and `b` are assignable to.
    ///
    /// Interfaces and classes with an unknown ancestry merge to `java/lang/Object`.
    fn common_super_class(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_owned();
        }
        if self.is_interface(a) || self.is_interface(b) {
            return OBJECT.to_owned();
        }
        let mut ancestors = HashSet::new();
        let mut current = Some(a.to_owned());
        while let Some(c) = current {
            if !ancestors.insert(c.clone()) {
                break;
            }
            current = self.super_class(&c);
        }
        let mut seen = HashSet::new();
        let mut current = Some(b.to_owned());
        while let Some(c) = current {
            if ancestors.contains(&c) {
                return c;
            }
            if !seen.insert(c.clone()) {
                break;
            }
            current = self.super_class(&c);
        }
        OBJECT.to_owned()
    }
}

/// A hierarchy backed by a map of known classes.
#[derive(Debug, Default, Clone)]
pub struct BasicHierarchy {
    supers: HashMap<String, Option<String>>,
    interfaces: HashSet<String>,
}

impl BasicHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hierarchy that knows the common exception and value classes of the JDK.
    pub fn with_jdk_defaults() -> Self {
        let mut h = Self::new();
        for (class, sup) in [
            ("java/lang/Throwable", OBJECT),
            ("java/lang/Exception", "java/lang/Throwable"),
            ("java/lang/Error", "java/lang/Throwable"),
            ("java/lang/RuntimeException", "java/lang/Exception"),
            ("java/lang/SecurityException", "java/lang/RuntimeException"),
            ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
            ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
            ("java/lang/NullPointerException", "java/lang/RuntimeException"),
            ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
            ("java/lang/ClassCastException", "java/lang/RuntimeException"),
            ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
            ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
            ("java/io/IOException", "java/lang/Exception"),
            ("java/io/UncheckedIOException", "java/lang/RuntimeException"),
            ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
            ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
            ("java/lang/InterruptedException", "java/lang/Exception"),
            ("java/lang/String", OBJECT),
            ("java/lang/Number", OBJECT),
            ("java/lang/Integer", "java/lang/Number"),
            ("java/lang/Long", "java/lang/Number"),
            ("java/lang/Float", "java/lang/Number"),
            ("java/lang/Double", "java/lang/Number"),
            ("java/lang/Short", "java/lang/Number"),
            ("java/lang/Byte", "java/lang/Number"),
            ("java/lang/Boolean", OBJECT),
            ("java/lang/Character", OBJECT),
            ("java/lang/Class", OBJECT),
            ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
            ("java/lang/AbstractStringBuilder", OBJECT),
            ("java/io/File", OBJECT),
            ("java/io/InputStream", OBJECT),
            ("java/io/OutputStream", OBJECT),
            ("java/io/ByteArrayInputStream", "java/io/InputStream"),
            ("java/io/ByteArrayOutputStream", "java/io/OutputStream"),
            ("java/io/FileInputStream", "java/io/InputStream"),
            ("java/io/FileOutputStream", "java/io/OutputStream"),
            ("java/io/FilterInputStream", "java/io/InputStream"),
            ("java/io/FilterOutputStream", "java/io/OutputStream"),
            ("java/io/BufferedInputStream", "java/io/FilterInputStream"),
            ("java/io/BufferedOutputStream", "java/io/FilterOutputStream"),
            ("java/io/DataInputStream", "java/io/FilterInputStream"),
            ("java/io/DataOutputStream", "java/io/FilterOutputStream"),
            ("java/io/PrintStream", "java/io/FilterOutputStream"),
            ("java/io/Reader", OBJECT),
            ("java/io/Writer", OBJECT),
            ("java/io/InputStreamReader", "java/io/Reader"),
            ("java/io/BufferedReader", "java/io/Reader"),
            ("java/io/StringReader", "java/io/Reader"),
            ("java/io/FileNotFoundException", "java/io/IOException"),
        ] {
            h.insert(class, Some(sup), false);
        }
        for itf in [
            "java/lang/Runnable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
            "java/lang/Iterable",
            "java/util/Collection",
            "java/util/List",
            "java/util/Map",
            "java/io/Serializable",
        ] {
            h.insert(itf, Some(OBJECT), true);
        }
        h
    }

    pub fn insert(&mut self, class: &str, super_class: Option<&str>, is_interface: bool) {
        self.supers
            .insert(class.to_owned(), super_class.map(str::to_owned));
        if is_interface {
            self.interfaces.insert(class.to_owned());
        } else {
            self.interfaces.remove(class);
        }
    }

    /// Records the super class of a parsed class.
    pub fn insert_class(&mut self, class: &ClassModel) -> Result<()> {
        let name = class.name()?;
        let super_name = class.super_name()?;
        self.insert(
            &name,
            super_name.as_deref(),
            class.access.contains(AccessFlags::ACC_INTERFACE),
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.supers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supers.is_empty()
    }
}

impl ClassHierarchy for BasicHierarchy {
    fn super_class(&self, class: &str) -> Option<String> {
        self.supers.get(class).cloned().flatten()
    }

    fn is_interface(&self, class: &str) -> bool {
        self.interfaces.contains(class)
    }
}

/// Asks each hierarchy in turn, the first that knows a class wins.
pub(crate) struct Layered<'a>(pub Vec<&'a dyn ClassHierarchy>);

impl ClassHierarchy for Layered<'_> {
    fn super_class(&self, class: &str) -> Option<String> {
        self.0.iter().find_map(|h| h.super_class(class))
    }

    fn is_interface(&self, class: &str) -> bool {
        self.0.iter().any(|h| h.is_interface(class))
    }
}
