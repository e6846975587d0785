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
//! Method bodies.
//!
//! A [`Code`] read from a class keeps the bytes it was decoded from until one of its
//! `_mut` accessors is used. Untouched bodies are written back exactly as they were
//! read; touched bodies go through the full assembler: dead code removal, type
//! analysis, branch layout and stack map generation.

pub(crate) mod analysis;
mod builder;
mod decode;
pub(crate) mod encode;
pub(crate) mod frames;
mod structure;

use tracing::debug;

pub use builder::CodeBuilder;
pub use structure::*;

use crate::attr::{write_attribute, write_count, RawAttribute};
use crate::constant_pool::ConstantPool;
use crate::constants::attr;
use crate::decoder::Decoder;
use crate::hierarchy::ClassHierarchy;
use crate::ty::MethodDescriptor;
use crate::version::JavaVersion;
use crate::{ReadWrite, Result};

/// What the assembler needs to know about the method that owns a body.
pub(crate) struct MethodContext<'a> {
    pub class_name: &'a str,
    pub method_name: &'a str,
    pub descriptor: &'a MethodDescriptor,
    pub is_static: bool,
    pub version: JavaVersion,
    pub hierarchy: &'a dyn ClassHierarchy,
}

impl MethodContext<'_> {
    /// Local variable slots taken by the receiver and the parameters.
    pub fn parameter_slots(&self) -> u16 {
        self.descriptor.arg_slots() + if self.is_static { 0 } else { 1 }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Code {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) catches: Vec<Catch>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) local_variable_types: Vec<LocalVariable>,
    /// Code attributes other than the tables above, dropped once the body changes.
    pub(crate) attributes: Vec<RawAttribute>,
    /// The `StackMapTable` this body was read with, consulted when frames are recomputed.
    pub(crate) declared_frames: Vec<analysis::DeclaredFrame>,
    pub(crate) next_label: u32,
    /// The encoded `Code` attribute this body was read from.
    pub(crate) original: Option<Vec<u8>>,
}

impl Code {
    /// Creates a body from scratch. Maxima are computed when the class is written.
    pub fn new(instructions: Vec<Instruction>, catches: Vec<Catch>) -> Code {
        let next_label = instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Label(l) => Some(l.0 + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Code {
            instructions,
            catches,
            next_label,
            ..Default::default()
        }
    }

    #[inline]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[inline]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[inline]
    pub fn catches(&self) -> &[Catch] {
        &self.catches
    }

    #[inline]
    pub fn local_variables(&self) -> &[LocalVariable] {
        &self.local_variables
    }

    /// Returns `true` once the body no longer matches the bytes it was read from.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.original.is_none()
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        self.original = None;
        &mut self.instructions
    }

    pub fn catches_mut(&mut self) -> &mut Vec<Catch> {
        self.original = None;
        &mut self.catches
    }

    /// Allocates a label that is not used anywhere in this body yet.
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Replaces the whole body. Debug tables of the old body go with it.
    pub fn replace(&mut self, instructions: Vec<Instruction>, catches: Vec<Catch>) {
        *self = Code::new(instructions, catches);
    }

    /// Runs the analyzer and stores the maxima it found.
    pub(crate) fn compute_maxs(&mut self, ctx: &MethodContext<'_>, pool: &ConstantPool) -> Result<()> {
        let analysis = analysis::analyze(ctx, pool, &self.instructions, &self.catches, &self.declared_frames)?;
        self.max_stack = analysis.max_stack;
        self.max_locals = analysis.max_locals.max(ctx.parameter_slots());
        Ok(())
    }

    pub(crate) fn parse(decoder: &mut Decoder<'_>, pool: &ConstantPool) -> Result<Code> {
        decode::parse(decoder, pool)
    }

    /// Encodes the body of the `Code` attribute.
    pub(crate) fn encode(&mut self, ctx: &MethodContext<'_>, pool: &mut ConstantPool) -> Result<Vec<u8>> {
        if let Some(original) = &self.original {
            return Ok(original.clone());
        }

        let mut analysis = analysis::analyze(ctx, pool, &self.instructions, &self.catches, &self.declared_frames)?;
        if analysis.has_dead_code(&self.instructions) {
            let before = self.instructions.len();
            let reachable = &analysis.frames;
            let mut idx = 0;
            self.instructions.retain(|insn| {
                let keep = insn.is_pseudo() || reachable[idx].is_some();
                idx += 1;
                keep
            });
            debug!(
                "{}.{}: removed {} unreachable instructions",
                ctx.class_name,
                ctx.method_name,
                before - self.instructions.len()
            );
            analysis = analysis::analyze(ctx, pool, &self.instructions, &self.catches, &self.declared_frames)?;
        }
        self.max_stack = analysis.max_stack;
        self.max_locals = analysis.max_locals.max(ctx.parameter_slots());

        let layout = encode::Layout::compute(&self.instructions)?;
        let code = encode::emit(&self.instructions, &layout, pool)?;

        let mut out = Vec::with_capacity(code.len() + 64);
        self.max_stack.write_to(&mut out)?;
        self.max_locals.write_to(&mut out)?;
        (code.len() as u32).write_to(&mut out)?;
        out.extend_from_slice(&code);

        let before = self.catches.len();
        self.catches
            .retain(|c| layout.offset_of(c.start) < layout.offset_of(c.end));
        if self.catches.len() != before {
            debug!(
                "{}.{}: dropped {} empty exception ranges",
                ctx.class_name,
                ctx.method_name,
                before - self.catches.len()
            );
        }
        write_count(&mut out, self.catches.len(), "exception table")?;
        for c in &self.catches {
            (layout.offset_of(c.start) as u16).write_to(&mut out)?;
            (layout.offset_of(c.end) as u16).write_to(&mut out)?;
            (layout.offset_of(c.handler) as u16).write_to(&mut out)?;
            c.catch.unwrap_or(0).write_to(&mut out)?;
        }

        if !self.attributes.is_empty() {
            debug!(
                "{}.{}: dropping {} code attributes of the old body",
                ctx.class_name,
                ctx.method_name,
                self.attributes.len()
            );
            self.attributes.clear();
        }

        let mut attrs: Vec<(u16, Vec<u8>)> = Vec::new();
        let lines = encode::line_numbers(&self.instructions, &layout);
        if !lines.is_empty() {
            let mut body = Vec::with_capacity(2 + lines.len() * 4);
            write_count(&mut body, lines.len(), "line number table")?;
            for (pc, line) in lines {
                (pc as u16).write_to(&mut body)?;
                line.write_to(&mut body)?;
            }
            attrs.push((pool.insert_utf8(attr::LINE_NUMBER_TABLE)?, body));
        }
        for (name, table) in [
            (attr::LOCAL_VARIABLE_TABLE, &mut self.local_variables),
            (attr::LOCAL_VARIABLE_TYPE_TABLE, &mut self.local_variable_types),
        ] {
            table.retain(|v| layout.has(v.start) && layout.has(v.end));
            if table.is_empty() {
                continue;
            }
            let mut body = Vec::with_capacity(2 + table.len() * 10);
            write_count(&mut body, table.len(), name)?;
            for v in table.iter() {
                let start = layout.offset_of(v.start);
                (start as u16).write_to(&mut body)?;
                ((layout.offset_of(v.end) - start) as u16).write_to(&mut body)?;
                v.name.write_to(&mut body)?;
                v.descriptor.write_to(&mut body)?;
                v.index.write_to(&mut body)?;
            }
            attrs.push((pool.insert_utf8(name)?, body));
        }
        if ctx.version.requires_stack_map() {
            if let Some(body) =
                frames::stack_map_table(&analysis, &self.instructions, &self.catches, &layout, pool)?
            {
                debug!("{}.{}: regenerated stack map frames", ctx.class_name, ctx.method_name);
                attrs.push((pool.insert_utf8(attr::STACK_MAP_TABLE)?, body));
            }
        }

        write_count(&mut out, attrs.len(), "code attributes")?;
        for (name, body) in attrs {
            write_attribute(&mut out, name, &body)?;
        }
        Ok(out)
    }
}
