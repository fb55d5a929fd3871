// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The operation interface shared by core opcodes and extension operations.
//!
//! An operation is decoded from the main block and then either dumped (textual listing) or
//! executed. Both paths receive the cursor positioned just past the operation reference and must
//! leave it at the next operation (or, for jumps, at the jump target).

use core::fmt;

use crate::block::Address;
use crate::dump::DumpEnv;
use crate::extension::ExtIndex;
use crate::format::DecodeError;
use crate::interp::{RuntimeEnv, Trap};

/// An executable operation.
pub trait Operation: Sync {
    /// Upper-case mnemonic used in dumps and traces.
    fn mnemonic(&self) -> &'static str;

    /// Writes the operation (and its operands) to `env`, advancing `cursor` past the operands.
    ///
    /// The default prints the bare mnemonic and reads no operands.
    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        let _ = cursor;
        env.op_line(format_args!("{}", self.mnemonic()));
        Ok(())
    }

    /// Executes the operation.
    ///
    /// Operations that only exist for validation or dumping may keep the default, which traps.
    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        let _ = (env, cursor);
        Err(Trap::NotExecutable {
            mnemonic: self.mnemonic(),
        })
    }
}

/// A decoded operation reference.
#[derive(Copy, Clone)]
pub struct OperationRef<'p> {
    /// Contributing extension, or `None` for core opcodes.
    pub extension: Option<ExtIndex>,
    /// Opcode byte (core) or position in the extension's operation table.
    pub code: u8,
    /// The operation itself.
    pub op: &'p dyn Operation,
}

impl fmt::Debug for OperationRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRef")
            .field("extension", &self.extension)
            .field("code", &self.code)
            .field("mnemonic", &self.op.mnemonic())
            .finish()
    }
}
