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
//! Type state analysis of method bodies.
//!
//! The analysis computes, for every instruction, the types of the local variables
//! and of the operand stack before it executes. It runs a worklist over the
//! instruction sequence starting from the frame implied by the method descriptor.
//! When two paths meet, their frames are merged: locals are cut to the shorter
//! length and mismatched entries become `Top`, references merge to their common
//! super class, and the stacks must have the same height.
//!
//! Long and double values take two slots everywhere, the second slot is `Top`.
//! Instructions that are never reached keep a `None` frame.
//!
//! A body read from a class file remembers the frames its `StackMapTable`
//! declared. Where two different classes meet at such a frame, the declared type
//! is used instead of asking the hierarchy, which may not know either class.

use std::collections::HashMap;

use super::frames::compress;
use super::{Catch, Instruction, Label, MethodContext};
use crate::constant_pool::{ConstantPool, PoolEntry};
use crate::constants::atype::*;
use crate::constants::insn::*;
use crate::hierarchy::ClassHierarchy;
use crate::ty::{MethodDescriptor, Type};
use crate::{Error, Result};

const OBJECT: &str = "java/lang/Object";
const THROWABLE: &str = "java/lang/Throwable";

/// The verification type of one slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// An object created by the `new` at this instruction index.
    Uninitialized(usize),
    /// A class or array type, by internal name or array descriptor.
    Object(String),
    /// The receiver or an argument of a call being replaced, by position.
    Operand(usize),
}

use VerificationType::*;

impl VerificationType {
    pub fn is_wide(&self) -> bool {
        matches!(self, Long | Double)
    }

    fn is_reference(&self) -> bool {
        matches!(self, Null | UninitializedThis | Uninitialized(_) | Object(_))
    }

    /// Whether a value of type `v` fits where `self` is expected, without comparing classes.
    pub fn accepts(&self, v: &VerificationType) -> bool {
        match self {
            Object(_) => matches!(v, Null | Object(_)),
            t => t == v,
        }
    }

    pub fn from_type(t: &Type) -> VerificationType {
        match t {
            Type::Byte | Type::Char | Type::Short | Type::Boolean | Type::Int => Integer,
            Type::Float => Float,
            Type::Long => Long,
            Type::Double => Double,
            Type::Ref(name) => Object(name.clone()),
            arr @ Type::ArrayRef(..) => Object(arr.to_string()),
        }
    }

    fn from_descriptor(descriptor: &str) -> Result<VerificationType> {
        Ok(VerificationType::from_type(&descriptor.parse()?))
    }
}

/// Locals and operand stack, one entry per slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Pushes a value, with the `Top` half of long and double values.
    fn push(&mut self, v: VerificationType) {
        let wide = v.is_wide();
        self.stack.push(v);
        if wide {
            self.stack.push(Top);
        }
    }

    fn push_type(&mut self, t: &Type) {
        self.push(VerificationType::from_type(t))
    }

    fn pop(&mut self, at: usize) -> Result<VerificationType> {
        self.stack
            .pop()
            .ok_or_else(|| Error::InvalidCode(at, "operand stack underflow".into()))
    }

    fn pop_n(&mut self, at: usize, n: usize) -> Result<()> {
        if self.stack.len() < n {
            return Err(Error::InvalidCode(at, "operand stack underflow".into()));
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    fn store(&mut self, slot: usize, v: VerificationType) {
        let wide = v.is_wide();
        let end = slot + if wide { 2 } else { 1 };
        if self.locals.len() < end {
            self.locals.resize(end, Top);
        }
        // overwriting the second half of a long or double invalidates it
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = Top;
        }
        self.locals[slot] = v;
        if wide {
            self.locals[slot + 1] = Top;
        }
    }

    fn replace_all(&mut self, from: &VerificationType, to: &VerificationType) {
        for v in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if v == from {
                *v = to.clone();
            }
        }
    }
}

/// A frame of the `StackMapTable` a body was read with, relative to the one before it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DeclaredFrame {
    pub label: Label,
    pub kind: DeclaredKind,
}

/// The compressed frame forms. Types leave out the `Top` half of wide values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeclaredKind {
    Same,
    SameLocals1(VerificationType),
    Chop(usize),
    Append(Vec<VerificationType>),
    Full(Vec<VerificationType>, Vec<VerificationType>),
}

/// The result of analyzing one method body.
#[derive(Debug)]
pub(crate) struct Analysis {
    /// The frame before every instruction, `None` for unreachable ones.
    pub frames: Vec<Option<Frame>>,
    /// The frame on method entry.
    pub initial: Frame,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl Analysis {
    /// Returns `true` if a real instruction can never execute.
    pub fn has_dead_code(&self, instructions: &[Instruction]) -> bool {
        instructions
            .iter()
            .zip(&self.frames)
            .any(|(insn, f)| !insn.is_pseudo() && f.is_none())
    }
}

/// Executes single instructions against a frame.
pub(crate) struct Interpreter<'a> {
    pub pool: &'a ConstantPool,
    pub class_name: &'a str,
    /// When unset, reads of unknown locals produce the type the opcode expects.
    pub strict: bool,
}

impl Interpreter<'_> {
    /// Applies the stack and local effect of `insn`, which sits at index `at`.
    pub fn execute(&self, frame: &mut Frame, at: usize, insn: &Instruction) -> Result<()> {
        match insn {
            Instruction::Label(_) | Instruction::LineNumber(_) => {}
            Instruction::Op(op) => self.execute_op(frame, at, *op)?,
            Instruction::BiPush(_) | Instruction::SiPush(_) => frame.push(Integer),
            Instruction::Local(op, slot) => {
                let slot = *slot as usize;
                match *op {
                    ILOAD => frame.push(Integer),
                    LLOAD => frame.push(Long),
                    FLOAD => frame.push(Float),
                    DLOAD => frame.push(Double),
                    ALOAD => {
                        let local = frame.locals.get(slot).filter(|v| v.is_reference()).cloned();
                        match local {
                            Some(v) => frame.push(v),
                            None if !self.strict => frame.push(Object(OBJECT.into())),
                            None => {
                                return Err(Error::InvalidCode(
                                    at,
                                    format!("aload of local {} which holds no reference", slot).into(),
                                ))
                            }
                        }
                    }
                    ISTORE | FSTORE | ASTORE => {
                        let v = frame.pop(at)?;
                        frame.store(slot, v);
                    }
                    LSTORE | DSTORE => {
                        frame.pop_n(at, 2)?;
                        frame.store(slot, if *op == LSTORE { Long } else { Double });
                    }
                    RET => {}
                    other => {
                        return Err(Error::InvalidCode(at, format!("not a local variable opcode: {:#04x}", other).into()))
                    }
                }
            }
            Instruction::IInc(slot, _) => {
                if self.strict && frame.locals.get(*slot as usize) != Some(&Integer) {
                    return Err(Error::InvalidCode(at, format!("iinc of non int local {}", slot).into()));
                }
            }
            Instruction::Ldc(idx) => {
                let v = match self.pool.get(*idx)? {
                    PoolEntry::Integer(_) => Integer,
                    PoolEntry::Float(_) => Float,
                    PoolEntry::String(_) => Object("java/lang/String".into()),
                    PoolEntry::Class(_) => Object("java/lang/Class".into()),
                    PoolEntry::MethodType(_) => Object("java/lang/invoke/MethodType".into()),
                    PoolEntry::MethodHandle(..) => Object("java/lang/invoke/MethodHandle".into()),
                    PoolEntry::Dynamic(_, nat) => {
                        let (_, desc) = self.pool.read_name_and_type(*nat)?;
                        VerificationType::from_descriptor(&desc)?
                    }
                    e => return Err(Error::InvalidCode(at, format!("ldc of {:?}", e).into())),
                };
                if v.is_wide() {
                    return Err(Error::InvalidCode(at, "ldc of a two slot constant".into()));
                }
                frame.push(v);
            }
            Instruction::Ldc2(idx) => {
                let v = match self.pool.get(*idx)? {
                    PoolEntry::Long(_) => Long,
                    PoolEntry::Double(_) => Double,
                    PoolEntry::Dynamic(_, nat) => {
                        let (_, desc) = self.pool.read_name_and_type(*nat)?;
                        VerificationType::from_descriptor(&desc)?
                    }
                    e => return Err(Error::InvalidCode(at, format!("ldc2_w of {:?}", e).into())),
                };
                if !v.is_wide() {
                    return Err(Error::InvalidCode(at, "ldc2_w of a one slot constant".into()));
                }
                frame.push(v);
            }
            Instruction::Field(op, idx) => {
                let member = self.pool.read_member(*idx)?;
                let t: Type = member.descriptor.parse()?;
                match *op {
                    GETSTATIC => frame.push_type(&t),
                    PUTSTATIC => frame.pop_n(at, t.slots() as usize)?,
                    GETFIELD => {
                        frame.pop(at)?;
                        frame.push_type(&t);
                    }
                    _ => frame.pop_n(at, t.slots() as usize + 1)?,
                }
            }
            Instruction::Invoke(op, idx) => {
                let member = self.pool.read_member(*idx)?;
                let desc: MethodDescriptor = member.descriptor.parse()?;
                frame.pop_n(at, desc.arg_slots() as usize)?;
                if *op != INVOKESTATIC {
                    let receiver = frame.pop(at)?;
                    if *op == INVOKESPECIAL && member.name == "<init>" {
                        let initialized = match receiver {
                            UninitializedThis => Some(Object(self.class_name.into())),
                            Uninitialized(_) => Some(Object(member.owner.clone().into_owned())),
                            _ => None,
                        };
                        if let Some(initialized) = initialized {
                            frame.replace_all(&receiver, &initialized);
                        }
                    }
                }
                if let Some(ret) = &desc.ret {
                    frame.push_type(ret);
                }
            }
            Instruction::InvokeDynamic(idx) => {
                let (_, desc) = self.pool.read_invoke_dynamic(*idx)?;
                let desc: MethodDescriptor = desc.parse()?;
                frame.pop_n(at, desc.arg_slots() as usize)?;
                if let Some(ret) = &desc.ret {
                    frame.push_type(ret);
                }
            }
            Instruction::Type(op, idx) => {
                let name = self.pool.read_class(*idx)?;
                match *op {
                    NEW => frame.push(Uninitialized(at)),
                    ANEWARRAY => {
                        frame.pop(at)?;
                        frame.push(Object(array_of(&name)));
                    }
                    CHECKCAST => {
                        frame.pop(at)?;
                        frame.push(Object(name.into_owned()));
                    }
                    _ => {
                        frame.pop(at)?;
                        frame.push(Integer);
                    }
                }
            }
            Instruction::NewArray(atype) => {
                frame.pop(at)?;
                let desc = match *atype {
                    T_BOOLEAN => "[Z",
                    T_CHAR => "[C",
                    T_FLOAT => "[F",
                    T_DOUBLE => "[D",
                    T_BYTE => "[B",
                    T_SHORT => "[S",
                    T_INT => "[I",
                    T_LONG => "[J",
                    other => {
                        return Err(Error::InvalidCode(at, format!("newarray of type {}", other).into()))
                    }
                };
                frame.push(Object(desc.into()));
            }
            Instruction::MultiANewArray(idx, dims) => {
                frame.pop_n(at, *dims as usize)?;
                frame.push(Object(self.pool.read_class(*idx)?.into_owned()));
            }
            Instruction::Jump(op, _) => match *op {
                IFEQ..=IFLE | IFNULL | IFNONNULL => frame.pop_n(at, 1)?,
                IF_ICMPEQ..=IF_ACMPNE => frame.pop_n(at, 2)?,
                _ => {}
            },
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => frame.pop_n(at, 1)?,
        }
        Ok(())
    }

    fn execute_op(&self, frame: &mut Frame, at: usize, op: u8) -> Result<()> {
        // pops `$n` slots, then pushes `$v`
        macro_rules! op {
            ($n:expr => $v:expr) => {{
                frame.pop_n(at, $n)?;
                frame.push($v);
            }};
            ($n:expr) => {
                frame.pop_n(at, $n)?
            };
        }
        match op {
            NOP => {}
            ACONST_NULL => frame.push(Null),
            ICONST_M1..=ICONST_5 => frame.push(Integer),
            LCONST_0 | LCONST_1 => frame.push(Long),
            FCONST_0..=FCONST_2 => frame.push(Float),
            DCONST_0 | DCONST_1 => frame.push(Double),
            IALOAD | BALOAD | CALOAD | SALOAD => op!(2 => Integer),
            LALOAD => op!(2 => Long),
            FALOAD => op!(2 => Float),
            DALOAD => op!(2 => Double),
            AALOAD => {
                frame.pop(at)?;
                let array = frame.pop(at)?;
                frame.push(component_of(&array));
            }
            IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => op!(3),
            LASTORE | DASTORE => op!(4),
            POP => op!(1),
            POP2 => op!(2),
            DUP..=SWAP => {
                let n = match op {
                    DUP => 1,
                    DUP_X1 | DUP2 | SWAP => 2,
                    DUP_X2 | DUP2_X1 => 3,
                    _ => 4,
                };
                if frame.stack.len() < n {
                    return Err(Error::InvalidCode(at, "operand stack underflow".into()));
                }
                // v[0] is the top of the stack
                let v: Vec<_> = frame.stack.drain(frame.stack.len() - n..).rev().collect();
                let order: &[usize] = match op {
                    DUP => &[0, 0],
                    DUP_X1 => &[0, 1, 0],
                    DUP_X2 => &[0, 2, 1, 0],
                    DUP2 => &[1, 0, 1, 0],
                    DUP2_X1 => &[1, 0, 2, 1, 0],
                    DUP2_X2 => &[1, 0, 3, 2, 1, 0],
                    _ => &[0, 1],
                };
                frame.stack.extend(order.iter().map(|&i| v[i].clone()));
            }
            IADD..=DNEG => {
                let (slots, v) = match (op - IADD) % 4 {
                    0 => (1, Integer),
                    1 => (2, Long),
                    2 => (1, Float),
                    _ => (2, Double),
                };
                if op >= INEG {
                    op!(slots => v)
                } else {
                    op!(slots * 2 => v)
                }
            }
            ISHL | ISHR | IUSHR => op!(2 => Integer),
            LSHL | LSHR | LUSHR => op!(3 => Long),
            IAND | IOR | IXOR => op!(2 => Integer),
            LAND | LOR | LXOR => op!(4 => Long),
            I2L => op!(1 => Long),
            I2F => op!(1 => Float),
            I2D => op!(1 => Double),
            L2I => op!(2 => Integer),
            L2F => op!(2 => Float),
            L2D => op!(2 => Double),
            F2I => op!(1 => Integer),
            F2L => op!(1 => Long),
            F2D => op!(1 => Double),
            D2I => op!(2 => Integer),
            D2L => op!(2 => Long),
            D2F => op!(2 => Float),
            I2B | I2C | I2S => op!(1 => Integer),
            LCMP => op!(4 => Integer),
            FCMPL | FCMPG => op!(2 => Integer),
            DCMPL | DCMPG => op!(4 => Integer),
            IRETURN | FRETURN | ARETURN => op!(1),
            LRETURN | DRETURN => op!(2),
            RETURN => {}
            ARRAYLENGTH => op!(1 => Integer),
            ATHROW | MONITORENTER | MONITOREXIT => op!(1),
            other => {
                return Err(Error::InvalidCode(at, format!("unknown opcode {:#04x}", other).into()))
            }
        }
        Ok(())
    }
}

fn array_of(name: &str) -> String {
    if name.starts_with('[') {
        format!("[{}", name)
    } else {
        format!("[L{};", name)
    }
}

fn component_of(array: &VerificationType) -> VerificationType {
    match array {
        Null => Null,
        Object(name) => match name.strip_prefix('[') {
            Some(inner) if inner.starts_with('[') => Object(inner.into()),
            Some(inner) if inner.starts_with('L') && inner.ends_with(';') => {
                Object(inner[1..inner.len() - 1].into())
            }
            _ => Object(OBJECT.into()),
        },
        _ => Object(OBJECT.into()),
    }
}

/// The element of an array type that is itself a reference, as a class name or array descriptor.
fn reference_element(array: &str) -> Option<&str> {
    let inner = array.strip_prefix('[')?;
    if inner.starts_with('[') {
        Some(inner)
    } else {
        inner.strip_prefix('L')?.strip_suffix(';')
    }
}

/// The most specific type both `x` and `y` are assignable to.
fn merge_reference(x: &str, y: &str, hierarchy: &dyn ClassHierarchy) -> String {
    if x == y {
        return x.into();
    }
    match (x.starts_with('['), y.starts_with('[')) {
        (false, false) => hierarchy.common_super_class(x, y),
        (true, true) => match (reference_element(x), reference_element(y)) {
            (Some(ex), Some(ey)) => array_of(&merge_reference(ex, ey, hierarchy)),
            // arrays of different primitives
            _ => OBJECT.into(),
        },
        _ => OBJECT.into(),
    }
}

fn merge_type(
    a: &VerificationType,
    b: &VerificationType,
    hierarchy: &dyn ClassHierarchy,
) -> VerificationType {
    match (a, b) {
        _ if a == b => a.clone(),
        (Null, Object(_)) => b.clone(),
        (Object(_), Null) => a.clone(),
        (Object(x), Object(y)) => Object(merge_reference(x, y, hierarchy)),
        _ => Top,
    }
}

/// Merges one slot. Two different classes take the declared type of the slot when there is one.
fn merge_slot(
    a: &VerificationType,
    b: &VerificationType,
    declared: Option<&VerificationType>,
    hierarchy: &dyn ClassHierarchy,
) -> VerificationType {
    match (a, b, declared) {
        (Object(x), Object(y), Some(d @ Object(_))) if x != y => d.clone(),
        _ => merge_type(a, b, hierarchy),
    }
}

/// Merges `incoming` into `existing`, returning `true` if `existing` changed.
fn merge_into(
    existing: &mut Frame,
    incoming: &Frame,
    at: usize,
    hierarchy: &dyn ClassHierarchy,
    declared: Option<&Frame>,
) -> Result<bool> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(Error::InvalidCode(
            at,
            format!(
                "stack heights {} and {} meet",
                existing.stack.len(),
                incoming.stack.len()
            )
            .into(),
        ));
    }
    let mut changed = false;
    for (n, (e, i)) in existing.stack.iter_mut().zip(&incoming.stack).enumerate() {
        let merged = merge_slot(e, i, declared.and_then(|d| d.stack.get(n)), hierarchy);
        if merged == Top && *e != Top {
            return Err(Error::InvalidCode(
                at,
                format!("incompatible stack entries {:?} and {:?} meet", e, i).into(),
            ));
        }
        if merged != *e {
            *e = merged;
            changed = true;
        }
    }
    if incoming.locals.len() < existing.locals.len() {
        existing.locals.truncate(incoming.locals.len());
        changed = true;
    }
    for (n, (e, i)) in existing.locals.iter_mut().zip(&incoming.locals).enumerate() {
        let merged = merge_slot(e, i, declared.and_then(|d| d.locals.get(n)), hierarchy);
        if merged != *e {
            *e = merged;
            changed = true;
        }
    }
    Ok(changed)
}

/// The frame on entry of the method described by `ctx`.
pub(crate) fn initial_frame(ctx: &MethodContext<'_>) -> Frame {
    let mut frame = Frame::default();
    if !ctx.is_static {
        if ctx.method_name == "<init>" && ctx.class_name != OBJECT {
            frame.locals.push(UninitializedThis);
        } else {
            frame.locals.push(Object(ctx.class_name.into()));
        }
    }
    for p in &ctx.descriptor.parameters {
        let v = VerificationType::from_type(p);
        let wide = v.is_wide();
        frame.locals.push(v);
        if wide {
            frame.locals.push(Top);
        }
    }
    frame
}

fn expand(types: &[VerificationType]) -> Vec<VerificationType> {
    let mut slots = Vec::with_capacity(types.len() + 2);
    for v in types {
        slots.push(v.clone());
        if v.is_wide() {
            slots.push(Top);
        }
    }
    slots
}

/// Resolves declared frames to slot form, keyed by the index of their label.
fn declared_frames(
    initial: &Frame,
    declared: &[DeclaredFrame],
    labels: &HashMap<Label, usize>,
) -> HashMap<usize, Frame> {
    let mut resolved = HashMap::with_capacity(declared.len());
    let mut locals: Vec<VerificationType> = compress(&initial.locals).into_iter().cloned().collect();
    for d in declared {
        let stack = match &d.kind {
            DeclaredKind::Same => vec![],
            DeclaredKind::SameLocals1(v) => vec![v.clone()],
            DeclaredKind::Chop(n) => {
                locals.truncate(locals.len().saturating_sub(*n));
                vec![]
            }
            DeclaredKind::Append(vs) => {
                locals.extend(vs.iter().cloned());
                vec![]
            }
            DeclaredKind::Full(l, s) => {
                locals = l.clone();
                s.clone()
            }
        };
        if let Some(&idx) = labels.get(&d.label) {
            resolved.insert(
                idx,
                Frame {
                    locals: expand(&locals),
                    stack: expand(&stack),
                },
            );
        }
    }
    resolved
}

/// One past the highest local slot `insn` reads or writes.
fn local_extent(insn: &Instruction) -> Option<usize> {
    match insn {
        Instruction::Local(op, slot) => {
            let width = if matches!(*op, LLOAD | DLOAD | LSTORE | DSTORE) { 2 } else { 1 };
            Some(*slot as usize + width)
        }
        Instruction::IInc(slot, _) => Some(*slot as usize + 1),
        _ => None,
    }
}

/// Runs the analysis over a method body.
///
/// `declared` are the frames the body was read with, empty for new bodies.
pub(crate) fn analyze(
    ctx: &MethodContext<'_>,
    pool: &ConstantPool,
    instructions: &[Instruction],
    catches: &[Catch],
    declared: &[DeclaredFrame],
) -> Result<Analysis> {
    let labels: HashMap<Label, usize> = instructions
        .iter()
        .enumerate()
        .filter_map(|(idx, insn)| match insn {
            Instruction::Label(l) => Some((*l, idx)),
            _ => None,
        })
        .collect();
    let resolve = |l: Label, at: usize| {
        labels
            .get(&l)
            .copied()
            .ok_or_else(|| Error::InvalidCode(at, format!("label {} is never placed", l.0).into()))
    };

    // (start, end, handler, caught type) as instruction indices
    let mut handlers = Vec::with_capacity(catches.len());
    for c in catches {
        let caught = match c.catch {
            Some(idx) => pool.read_class(idx)?.into_owned(),
            None => THROWABLE.into(),
        };
        let n = instructions.len();
        handlers.push((resolve(c.start, n)?, resolve(c.end, n)?, resolve(c.handler, n)?, caught));
    }

    let interpreter = Interpreter {
        pool,
        class_name: ctx.class_name,
        strict: true,
    };
    let initial = initial_frame(ctx);
    let mut frames: Vec<Option<Frame>> = vec![None; instructions.len()];
    let mut max_stack = 0usize;
    let mut max_locals = initial.locals.len();
    if instructions.is_empty() {
        return Err(Error::InvalidCode(0, "empty method body".into()));
    }
    frames[0] = Some(initial.clone());
    let declared = declared_frames(&initial, declared, &labels);

    let mut queued = vec![false; instructions.len()];
    let mut worklist = vec![0usize];
    queued[0] = true;

    macro_rules! flow {
        ($target:expr, $frame:expr, $from:expr) => {{
            let target: usize = $target;
            let incoming: &Frame = $frame;
            if target >= instructions.len() {
                return Err(Error::InvalidCode($from, "execution falls off the end of the code".into()));
            }
            max_stack = max_stack.max(incoming.stack.len());
            max_locals = max_locals.max(incoming.locals.len());
            let changed = match frames[target].take() {
                Some(mut existing) => {
                    let changed = merge_into(&mut existing, incoming, target, ctx.hierarchy, declared.get(&target))?;
                    frames[target] = Some(existing);
                    changed
                }
                None => {
                    frames[target] = Some(incoming.clone());
                    true
                }
            };
            if changed && !queued[target] {
                queued[target] = true;
                worklist.push(target);
            }
        }};
    }

    while let Some(idx) = worklist.pop() {
        queued[idx] = false;
        let before = match &frames[idx] {
            Some(f) => f.clone(),
            None => continue,
        };
        let insn = &instructions[idx];
        let mut after = before.clone();
        interpreter.execute(&mut after, idx, insn)?;
        if let Some(end) = local_extent(insn) {
            max_locals = max_locals.max(end);
        }

        if !insn.is_pseudo() {
            for (start, end, handler, caught) in &handlers {
                if (*start..*end).contains(&idx) {
                    let mut exc = Frame {
                        locals: before.locals.clone(),
                        stack: vec![Object(caught.clone())],
                    };
                    flow!(*handler, &exc, idx);
                    if !insn.ends_flow() {
                        exc.locals = after.locals.clone();
                        flow!(*handler, &exc, idx);
                    }
                }
            }
        }

        match insn {
            Instruction::Jump(JSR, target) => {
                let mut sub = after.clone();
                sub.push(Top);
                flow!(resolve(*target, idx)?, &sub, idx);
                flow!(idx + 1, &after, idx);
            }
            _ => {
                for t in insn.targets() {
                    flow!(resolve(t, idx)?, &after, idx);
                }
                if !insn.ends_flow() {
                    flow!(idx + 1, &after, idx);
                }
            }
        }
    }

    Ok(Analysis {
        frames,
        initial,
        max_stack: u16::try_from(max_stack).map_err(|_| Error::Overflow("operand stack"))?,
        max_locals: u16::try_from(max_locals).map_err(|_| Error::Overflow("local variables"))?,
    })
}
