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
//! Finding and replacing method invocations.
//!
//! A [`CallSiteRewriter`] holds an ordered list of rules. Each rule pairs a
//! predicate on the invoked method with a closure that emits the replacement.
//! The first rule whose predicate accepts a call site wins.
//!
//! Replacements are checked against the stack effect of the call they replace:
//!
//! * an [`Effect::Exact`] replacement consumes the receiver and arguments and
//!   leaves a value of the result's kind, exactly like the call;
//! * an [`Effect::Terminal`] replacement ends with `athrow` or the return the
//!   enclosing method uses, and may leave the stack in any state before that.
//!
//! Reference results are checked by kind only, the classes are not compared.
//!
//! ```
//! use classgraft::prelude::*;
//!
//! let rewriter = CallSiteRewriter::new().intercept(
//!     CallSiteFilter::new("java/io/File", "mkdir").descriptor("()Z"),
//!     |_site, b| {
//!         b.new_object("java/lang/SecurityException")?
//!             .op(insn::DUP)
//!             .ldc_string("blocked")?
//!             .invoke_special("java/lang/SecurityException", "<init>", "(Ljava/lang/String;)V")?
//!             .op(insn::ATHROW);
//!         Ok(())
//!     },
//! );
//! assert_eq!(rewriter.len(), 1);
//! ```

use std::fmt::{Debug, Display, Formatter};

use tracing::debug;

use crate::clazz::ClassModel;
use crate::code::analysis::{Frame, Interpreter, VerificationType};
use crate::code::{Code, CodeBuilder, Instruction};
use crate::constant_pool::{ConstantPool, MemberKind};
use crate::constants::insn::*;
use crate::ty::{MethodDescriptor, Type};
use crate::{Error, Result};

/// The target of an invoke instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub opcode: u8,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

impl CallSite {
    /// The call site of `insn`, if it invokes a method.
    pub fn of(insn: &Instruction, pool: &ConstantPool) -> Result<Option<CallSite>> {
        let (opcode, idx) = match insn {
            Instruction::Invoke(op, idx) => (*op, *idx),
            _ => return Ok(None),
        };
        let member = pool.read_member(idx)?;
        Ok(Some(CallSite {
            opcode,
            owner: member.owner.into_owned(),
            name: member.name.into_owned(),
            descriptor: member.descriptor.into_owned(),
            is_interface: member.kind == MemberKind::InterfaceMethod,
        }))
    }

    pub fn is_static(&self) -> bool {
        self.opcode == INVOKESTATIC
    }

    /// Stack slots taken by the receiver and the arguments.
    pub fn consumed_slots(&self) -> Result<u16> {
        let desc: MethodDescriptor = self.descriptor.parse()?;
        Ok(desc.arg_slots() + if self.is_static() { 0 } else { 1 })
    }

    /// Stack slots taken by the result.
    pub fn returned_slots(&self) -> Result<u16> {
        let desc: MethodDescriptor = self.descriptor.parse()?;
        Ok(desc.ret_slots())
    }
}

impl Display for CallSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Matches call sites by owner, name and optionally descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteFilter {
    pub owner: String,
    pub name: String,
    pub descriptor: Option<String>,
}

impl CallSiteFilter {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        CallSiteFilter {
            owner: owner.into(),
            name: name.into(),
            descriptor: None,
        }
    }

    /// Restricts the filter to one overload.
    pub fn descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn matches(&self, site: &CallSite) -> bool {
        site.owner == self.owner
            && site.name == self.name
            && self.descriptor.as_ref().map_or(true, |d| *d == site.descriptor)
    }
}

/// The stack contract of a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Behaves like the call on the operand stack.
    Exact,
    /// Never completes normally.
    Terminal,
}

type Predicate = Box<dyn Fn(&CallSite) -> bool + Send + Sync>;
type Build = Box<dyn Fn(&CallSite, &mut CodeBuilder<'_>) -> Result<()> + Send + Sync>;

struct Rule {
    predicate: Predicate,
    effect: Effect,
    build: Build,
}

/// An ordered set of call site replacement rules.
#[derive(Default)]
pub struct CallSiteRewriter {
    rules: Vec<Rule>,
}

impl Debug for CallSiteRewriter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSiteRewriter")
            .field("rules", &self.rules.iter().map(|r| r.effect).collect::<Vec<_>>())
            .finish()
    }
}

impl CallSiteRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule with an arbitrary predicate.
    pub fn rule(
        mut self,
        predicate: impl Fn(&CallSite) -> bool + Send + Sync + 'static,
        effect: Effect,
        build: impl Fn(&CallSite, &mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule {
            predicate: Box::new(predicate),
            effect,
            build: Box::new(build),
        });
        self
    }

    /// Replaces matching calls by code with the same stack effect.
    pub fn replace(
        self,
        filter: CallSiteFilter,
        build: impl Fn(&CallSite, &mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.rule(move |site| filter.matches(site), Effect::Exact, build)
    }

    /// Replaces matching calls by code that throws or returns.
    pub fn intercept(
        self,
        filter: CallSiteFilter,
        build: impl Fn(&CallSite, &mut CodeBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.rule(move |site| filter.matches(site), Effect::Terminal, build)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rule_for(&self, site: &CallSite) -> Option<&Rule> {
        self.rules.iter().find(|r| (r.predicate)(site))
    }

    /// Returns `true` if any rule applies to `site`.
    pub fn matches(&self, site: &CallSite) -> bool {
        self.rule_for(site).is_some()
    }

    /// Counts the call sites of `class` that some rule applies to.
    pub fn count(&self, class: &ClassModel) -> Result<usize> {
        count_where(class, |site| self.matches(site))
    }

    /// Rewrites every matching call site of `code`, returning how many were replaced.
    ///
    /// A body without matches is left untouched. `enclosing` describes the method owning `code`.
    pub(crate) fn rewrite(
        &self,
        code: &mut Code,
        pool: &mut ConstantPool,
        class_name: &str,
        enclosing: &MethodDescriptor,
    ) -> Result<usize> {
        let mut matches = Vec::new();
        for (idx, insn) in code.instructions().iter().enumerate() {
            if let Some(site) = CallSite::of(insn, pool)? {
                if let Some(rule) = self.rule_for(&site) {
                    matches.push((idx, site, rule));
                }
            }
        }
        if matches.is_empty() {
            return Ok(0);
        }

        let count = matches.len();
        let mut next_label = code.next_label;
        let old = std::mem::take(code.instructions_mut());
        let mut instructions = Vec::with_capacity(old.len() + count * 8);
        let mut pending = matches.into_iter().peekable();
        for (idx, insn) in old.into_iter().enumerate() {
            match pending.next_if(|(at, ..)| *at == idx) {
                Some((_, site, rule)) => {
                    let mut builder = CodeBuilder::starting_at(pool, next_label);
                    (rule.build)(&site, &mut builder)?;
                    let (replacement, catches, next) = builder.finish_with_labels();
                    if !catches.is_empty() {
                        return Err(Error::IncompatibleReplacement(
                            site.to_string(),
                            "replacements cannot declare exception handlers".into(),
                        ));
                    }
                    check_stack_effect(&site, rule.effect, &replacement, pool, class_name, enclosing)?;
                    debug!("{}: replaced call to {}", class_name, site);
                    instructions.extend(replacement);
                    next_label = next;
                }
                None => instructions.push(insn),
            }
        }
        *code.instructions_mut() = instructions;
        code.next_label = next_label;
        Ok(count)
    }
}

/// The stack slots a value of type `t` takes.
fn slots_of(t: Option<&Type>) -> Vec<VerificationType> {
    match t.map(VerificationType::from_type) {
        None => vec![],
        Some(v) if v.is_wide() => vec![v, VerificationType::Top],
        Some(v) => vec![v],
    }
}

fn return_opcode(t: Option<&Type>) -> u8 {
    match t.map(VerificationType::from_type) {
        None => RETURN,
        Some(VerificationType::Integer) => IRETURN,
        Some(VerificationType::Long) => LRETURN,
        Some(VerificationType::Float) => FRETURN,
        Some(VerificationType::Double) => DRETURN,
        Some(_) => ARETURN,
    }
}

fn check_stack_effect(
    site: &CallSite,
    effect: Effect,
    replacement: &[Instruction],
    pool: &ConstantPool,
    class_name: &str,
    enclosing: &MethodDescriptor,
) -> Result<()> {
    let incompatible = |why: String| Error::IncompatibleReplacement(site.to_string(), why.into());
    let desc: MethodDescriptor = site.descriptor.parse()?;

    // the replacement starts with markers for the receiver and the arguments
    let mut operands = Vec::with_capacity(desc.parameters.len() + 1);
    if !site.is_static() {
        operands.push(VerificationType::Object(site.owner.clone()));
    }
    operands.extend(desc.parameters.iter().map(VerificationType::from_type));
    let mut frame = Frame::default();
    for (i, v) in operands.iter().enumerate() {
        frame.stack.push(VerificationType::Operand(i));
        if v.is_wide() {
            frame.stack.push(VerificationType::Top);
        }
    }
    let resolve = |v: &VerificationType| match v {
        VerificationType::Operand(i) => operands[*i].clone(),
        v => v.clone(),
    };

    let interpreter = Interpreter {
        pool,
        class_name,
        strict: false,
    };
    let last = replacement.iter().rposition(|i| !i.is_pseudo());
    for (idx, insn) in replacement.iter().enumerate() {
        if effect == Effect::Terminal && Some(idx) == last {
            if let Some(op @ IRETURN..=RETURN) = insn.opcode() {
                let expected = slots_of(enclosing.ret.as_ref());
                if op != return_opcode(enclosing.ret.as_ref()) {
                    return Err(incompatible(format!(
                        "returns with opcode {:#04x} from a method returning {}",
                        op,
                        enclosing.ret.as_ref().map_or_else(|| "void".to_owned(), Type::to_string)
                    )));
                }
                if let Some(v) = expected.first() {
                    let returned = frame
                        .stack
                        .len()
                        .checked_sub(expected.len())
                        .map(|at| resolve(&frame.stack[at]));
                    match returned {
                        Some(r) if v.accepts(&r) => {}
                        Some(r) => {
                            return Err(incompatible(format!("returns {:?} where {:?} is expected", r, v)))
                        }
                        None => return Err(incompatible("returns from an empty stack".into())),
                    }
                }
            }
        }
        interpreter.execute(&mut frame, idx, insn).map_err(|e| match e {
            Error::InvalidCode(at, why) => incompatible(format!("instruction {}: {}", at, why)),
            e => e,
        })?;
    }

    match effect {
        Effect::Exact => {
            if frame.stack.iter().any(|v| matches!(v, VerificationType::Operand(_))) {
                return Err(incompatible("leaves the receiver or an argument of the call on the stack".into()));
            }
            let expected = slots_of(desc.ret.as_ref());
            if frame.stack.len() != expected.len() {
                return Err(incompatible(format!(
                    "leaves {} stack slots where the call leaves {}",
                    frame.stack.len(),
                    expected.len()
                )));
            }
            match expected.iter().zip(&frame.stack).find(|(e, v)| !e.accepts(v)) {
                Some((e, v)) => Err(incompatible(format!("leaves {:?} where the call leaves {:?}", v, e))),
                None => Ok(()),
            }
        }
        Effect::Terminal => match replacement.iter().rev().find_map(Instruction::opcode) {
            Some(ATHROW | IRETURN..=RETURN) => Ok(()),
            _ => Err(incompatible("terminal replacement must end with athrow or a return".into())),
        },
    }
}

fn count_where(class: &ClassModel, mut f: impl FnMut(&CallSite) -> bool) -> Result<usize> {
    let mut n = 0;
    for m in &class.methods {
        if let Some(code) = m.code() {
            for insn in code.instructions() {
                if let Some(site) = CallSite::of(insn, &class.pool)? {
                    if f(&site) {
                        n += 1;
                    }
                }
            }
        }
    }
    Ok(n)
}

/// Counts the call sites of `class` that `filter` matches, without editing anything.
pub fn count_call_sites(class: &ClassModel, filter: &CallSiteFilter) -> Result<usize> {
    count_where(class, |site| filter.matches(site))
}
