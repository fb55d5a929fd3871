// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Textual code dumps.
//!
//! Dumping walks the main block with the same decoding path as execution but calls each
//! operation's [`Operation::dump`](crate::operation::Operation::dump) instead of executing it.
//! Nothing is ever reported to a result sink.
//!
//! Format, one line per operation or operand:
//!
//! ```text
//! 00000000: JMPFALSE 8 [00000009]
//! 00000005: KEEP
//! 00000007:   side effect: imap4flags:seen
//! 00000009: STOP
//! 0000000a: [End of code]
//! ```
//!
//! A decoding failure ends the listing with `Binary is corrupt.`.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use crate::block::{Address, Block};
use crate::format::DecodeError;
use crate::object::ObjectClass;
use crate::program::Program;

/// Line that ends a listing whose code failed to decode.
pub const CORRUPT_MARKER: &str = "Binary is corrupt.";

/// Output state handed to [`Operation::dump`](crate::operation::Operation::dump).
#[derive(Debug)]
pub struct DumpEnv<'p> {
    program: &'p Program,
    out: String,
    op_address: Address,
    indent: usize,
}

impl<'p> DumpEnv<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        Self {
            program,
            out: String::new(),
            op_address: 0,
            indent: 0,
        }
    }

    pub(crate) fn begin(&mut self, address: Address) {
        self.op_address = address;
        self.indent = 0;
    }

    pub(crate) fn raw_line(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{args}");
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }

    /// The program being dumped.
    #[must_use]
    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// The main code block.
    #[must_use]
    pub fn code(&self) -> &'p Block {
        self.program.code()
    }

    /// Address of the operation being dumped.
    #[must_use]
    pub fn op_address(&self) -> Address {
        self.op_address
    }

    /// Writes the operation's own line.
    pub fn op_line(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{:08x}: {args}", self.op_address);
    }

    /// Writes an operand line for data starting at `address`, at the current indent.
    pub fn operand_line(&mut self, address: Address, args: fmt::Arguments<'_>) {
        let _ = writeln!(
            self.out,
            "{address:08x}: {:width$}{args}",
            "",
            width = self.indent * 2
        );
    }

    /// Indents subsequent operand lines one level.
    pub fn descend(&mut self) {
        self.indent += 1;
    }

    /// Undoes one [`DumpEnv::descend`].
    pub fn ascend(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Dumps an integer operand.
    pub fn dump_number(&mut self, cursor: &mut Address, label: &str) -> Result<u64, DecodeError> {
        let at = *cursor;
        let n = self.code().read_integer(cursor)?;
        self.operand_line(at, format_args!("{label}: {n}"));
        Ok(n)
    }

    /// Dumps a string operand.
    pub fn dump_string(
        &mut self,
        cursor: &mut Address,
        label: &str,
    ) -> Result<&'p [u8], DecodeError> {
        let at = *cursor;
        let s = self.code().read_string(cursor)?;
        self.operand_line(
            at,
            format_args!("{label}: {:?}", String::from_utf8_lossy(s)),
        );
        Ok(s)
    }

    /// Dumps an object operand of `class`.
    pub fn dump_object(&mut self, cursor: &mut Address, class: ObjectClass) -> Result<(), DecodeError> {
        let at = *cursor;
        let program = self.program;
        let obj = program.read_object(program.code(), cursor, class)?;
        match obj.extension.and_then(|i| program.extensions().get(i)) {
            Some(ext) => self.operand_line(
                at,
                format_args!("{}: {}:{}", class.name(), ext.name(), obj.def.identifier()),
            ),
            None => self.operand_line(at, format_args!("{}: {}", class.name(), obj.def.identifier())),
        }
        Ok(())
    }

    /// Dumps a side-effect list, one line per side effect.
    pub fn dump_side_effects(&mut self, cursor: &mut Address) -> Result<(), DecodeError> {
        let program = self.program;
        let code = program.code();
        let count = program.read_side_effect_count(code, cursor)?;
        for _ in 0..count {
            let at = *cursor;
            let effect = program.read_side_effect(code, cursor)?;
            self.operand_line(
                at,
                format_args!(
                    "side effect: {}:{}",
                    effect.extension,
                    effect.object.def.identifier()
                ),
            );
        }
        Ok(())
    }
}

/// Result of [`Interpreter::dump_code`](crate::interp::Interpreter::dump_code).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeDump {
    pub(crate) text: String,
    pub(crate) addresses: Vec<Address>,
    pub(crate) corrupt: bool,
}

impl CodeDump {
    /// The listing.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Addresses of every operation that was decoded, in visit order.
    #[must_use]
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Returns `true` if the listing stopped at undecodable code.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

impl fmt::Display for CodeDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
