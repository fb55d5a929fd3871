// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small assembler for main-block code.
//!
//! [`Asm`] wraps a [`ProgramBuilder`] and adds labels: jumps may name a label before it is
//! placed, and offsets are patched when the program is finished. Emission errors are deferred and
//! reported by [`Asm::finish`], so calls can be chained.
//!
//! ```
//! use sieve_tape::asm::Asm;
//! use sieve_tape::opcode::CoreOp;
//!
//! let mut a = Asm::new();
//! let end = a.label();
//! a.jmp(end).keep(&[]);
//! a.place(end).unwrap();
//! a.stop();
//! let program = a.finish().unwrap();
//! assert_eq!(program.code().as_bytes(), [CoreOp::Jmp.byte(), 0, 0, 0, 6, 5, 0, 4]);
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::block::{Address, EmitError};
use crate::extension::Extension;
use crate::object::ObjectClass;
use crate::opcode::CoreOp;
use crate::program::{BlockId, Program, ProgramBuilder};

/// A jump target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A side effect to attach to `keep` or `redirect`.
#[derive(Clone, Copy)]
pub struct SideEffectRef<'a> {
    /// Contributing extension.
    pub ext: &'a Arc<dyn Extension>,
    /// Position in the extension's side-effect table.
    pub code: u8,
}

impl fmt::Debug for SideEffectRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectRef")
            .field("ext", &self.ext.name())
            .field("code", &self.code)
            .finish()
    }
}

#[derive(Clone, Debug)]
struct Fixup {
    at: Address,
    label: Label,
}

/// Main-block assembler.
#[derive(Clone, Debug, Default)]
pub struct Asm {
    pb: ProgramBuilder,
    labels: Vec<Option<Address>>,
    fixups: Vec<Fixup>,
    error: Option<EmitError>,
}

impl Asm {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current address in the main block.
    #[must_use]
    pub fn pc(&self) -> Address {
        self.pb.code().size()
    }

    /// The underlying builder, for extension blocks and anything else not covered here.
    pub fn builder_mut(&mut self) -> &mut ProgramBuilder {
        &mut self.pb
    }

    /// Allocates a new label.
    #[must_use]
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(u32::try_from(self.labels.len() - 1).unwrap_or(u32::MAX))
    }

    /// Places `label` at the current address.
    pub fn place(&mut self, label: Label) -> Result<(), EmitError> {
        let pc = self.pc();
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(EmitError::UnresolvedLabel)?;
        if slot.is_some() {
            return Err(EmitError::DuplicateLabel);
        }
        *slot = Some(pc);
        Ok(())
    }

    /// Records that code emitted from now on belongs to script `line`.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.pb.mark_line(line);
        self
    }

    /// `JMP label`.
    pub fn jmp(&mut self, label: Label) -> &mut Self {
        self.jump(CoreOp::Jmp, label)
    }

    /// `JMPTRUE label`.
    pub fn jmp_true(&mut self, label: Label) -> &mut Self {
        self.jump(CoreOp::JmpTrue, label)
    }

    /// `JMPFALSE label`.
    pub fn jmp_false(&mut self, label: Label) -> &mut Self {
        self.jump(CoreOp::JmpFalse, label)
    }

    /// `STOP`.
    pub fn stop(&mut self) -> &mut Self {
        self.core(CoreOp::Stop)
    }

    /// `DISCARD`.
    pub fn discard(&mut self) -> &mut Self {
        self.core(CoreOp::Discard)
    }

    /// `KEEP side_effects`.
    pub fn keep(&mut self, side_effects: &[SideEffectRef<'_>]) -> &mut Self {
        self.core(CoreOp::Keep);
        self.side_effects(side_effects)
    }

    /// `REDIRECT side_effects address`.
    pub fn redirect(&mut self, address: &str, side_effects: &[SideEffectRef<'_>]) -> &mut Self {
        self.core(CoreOp::Redirect);
        self.side_effects(side_effects);
        self.string(address.as_bytes())
    }

    /// Operation `code` of `ext`. Operands follow via [`Asm::number`], [`Asm::string`], ...
    pub fn ext_op(&mut self, ext: &Arc<dyn Extension>, code: u8) -> &mut Self {
        let r = self
            .pb
            .emit_extension_operation(BlockId::MAIN, ext, code)
            .map(drop);
        self.record(r)
    }

    /// Integer operand.
    pub fn number(&mut self, n: u64) -> &mut Self {
        self.pb.main_block().emit_integer(n);
        self
    }

    /// String operand.
    pub fn string(&mut self, bytes: &[u8]) -> &mut Self {
        self.pb.main_block().emit_string(bytes);
        self
    }

    /// Core object operand.
    pub fn core_object(&mut self, class: ObjectClass, code: u8) -> &mut Self {
        let r = self
            .pb
            .emit_core_object(BlockId::MAIN, class, code)
            .map(drop);
        self.record(r)
    }

    /// Extension object operand.
    pub fn ext_object(&mut self, class: ObjectClass, ext: &Arc<dyn Extension>, code: u8) -> &mut Self {
        let r = self
            .pb
            .emit_extension_object(BlockId::MAIN, class, ext, code)
            .map(drop);
        self.record(r)
    }

    /// Raw bytes, unchecked.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.pb.main_block().emit_data(bytes);
        self
    }

    /// Patches all jumps and returns the program.
    pub fn finish(mut self) -> Result<Program, EmitError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        for f in &self.fixups {
            let Some(target) = self.labels.get(f.label.0 as usize).and_then(|x| *x) else {
                return Err(EmitError::UnresolvedLabel);
            };
            let offset = relative(f.at, target)?;
            self.pb
                .main_block()
                .update_data(f.at, &offset.to_be_bytes())?;
        }
        Ok(self.pb.finish())
    }

    fn core(&mut self, op: CoreOp) -> &mut Self {
        self.pb.main_block().emit_byte(op.byte());
        self
    }

    fn jump(&mut self, op: CoreOp, label: Label) -> &mut Self {
        self.core(op);
        let at = self.pb.main_block().emit_offset(0);
        self.fixups.push(Fixup { at, label });
        self
    }

    fn side_effects(&mut self, side_effects: &[SideEffectRef<'_>]) -> &mut Self {
        self.number(side_effects.len() as u64);
        for s in side_effects {
            let r = self
                .pb
                .emit_extension_object(BlockId::MAIN, ObjectClass::SideEffect, s.ext, s.code)
                .map(drop);
            self.record(r);
        }
        self
    }

    fn record(&mut self, r: Result<(), EmitError>) -> &mut Self {
        if let Err(e) = r
            && self.error.is_none()
        {
            self.error = Some(e);
        }
        self
    }
}

fn relative(at: Address, target: Address) -> Result<i32, EmitError> {
    let at = i64::try_from(at).map_err(|_| EmitError::OffsetOverflow)?;
    let target = i64::try_from(target).map_err(|_| EmitError::OffsetOverflow)?;
    i32::try_from(target - at).map_err(|_| EmitError::OffsetOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectDef;

    struct Flag;

    impl ObjectDef for Flag {
        fn identifier(&self) -> &str {
            "seen"
        }
    }

    static FLAG: Flag = Flag;
    static FLAGS: [&dyn ObjectDef; 1] = [&FLAG];

    struct Flags;

    impl Extension for Flags {
        fn name(&self) -> &str {
            "imap4flags"
        }

        fn objects(&self, class: ObjectClass) -> &[&'static dyn ObjectDef] {
            match class {
                ObjectClass::SideEffect => &FLAGS,
                _ => &[],
            }
        }
    }

    #[test]
    fn forward_and_backward_jumps_are_patched() {
        let mut a = Asm::new();
        let top = a.label();
        let end = a.label();
        a.discard();
        a.place(top).unwrap();
        a.jmp_true(end).jmp(top);
        a.place(end).unwrap();
        a.stop();
        let p = a.finish().unwrap();
        // JMPTRUE at 1 (offset at 2), JMP at 6 (offset at 7), STOP at 11.
        let mut cursor = 2;
        assert_eq!(p.code().read_offset(&mut cursor), Ok(9));
        let mut cursor = 7;
        assert_eq!(p.code().read_offset(&mut cursor), Ok(-6));
    }

    #[test]
    fn unplaced_label_is_an_error() {
        let mut a = Asm::new();
        let l = a.label();
        a.jmp(l);
        assert_eq!(a.finish().unwrap_err(), EmitError::UnresolvedLabel);

        let mut a = Asm::new();
        let l = a.label();
        a.place(l).unwrap();
        assert_eq!(a.place(l), Err(EmitError::DuplicateLabel));
    }

    #[test]
    fn side_effects_and_redirect_layout() {
        let flags: Arc<dyn Extension> = Arc::new(Flags);
        let mut a = Asm::new();
        a.redirect("x@y", &[SideEffectRef {
            ext: &flags,
            code: 0,
        }]);
        let p = a.finish().unwrap();
        assert_eq!(
            p.code().as_bytes(),
            [CoreOp::Redirect.byte(), 1, 0, 3, b'x', b'@', b'y', 0]
        );
    }

    #[test]
    fn first_emit_error_is_reported() {
        let flags: Arc<dyn Extension> = Arc::new(Flags);
        let mut a = Asm::new();
        a.ext_op(&flags, 0).ext_object(ObjectClass::SideEffect, &flags, 4);
        assert_eq!(
            a.finish().unwrap_err(),
            EmitError::ObjectOutOfRange { code: 0, count: 0 }
        );
    }
}
