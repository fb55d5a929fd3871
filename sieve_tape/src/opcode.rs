// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core opcodes.
//!
//! Opcode bytes below [`BUILTIN_OPCODE_COUNT`] select a core operation directly; larger bytes
//! are extension references (see [`Program::read_operation`](crate::program::Program)).
//!
//! Operand layout:
//!
//! | opcode | operands |
//! |---|---|
//! | `JMP`, `JMPTRUE`, `JMPFALSE` | offset |
//! | `STOP`, `DISCARD` | - |
//! | `KEEP` | side-effect list |
//! | `REDIRECT` | side-effect list, address string |
//!
//! A side-effect list is an integer count followed by that many side-effect object references.

use crate::action::{ActionRequest, Operand};
use crate::block::Address;
use crate::dump::DumpEnv;
use crate::format::DecodeError;
use crate::interp::{RuntimeEnv, Trap};
use crate::operation::Operation;

/// Number of opcode bytes reserved for core operations (including the invalid byte `0`).
pub const BUILTIN_OPCODE_COUNT: u8 = 8;

/// A core operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoreOp {
    /// Unconditional jump.
    Jmp = 1,
    /// Jump if the test result is `true`.
    JmpTrue = 2,
    /// Jump if the test result is `false`.
    JmpFalse = 3,
    /// End the run.
    Stop = 4,
    /// File the message into the default mailbox.
    Keep = 5,
    /// Silently drop the message.
    Discard = 6,
    /// Forward the message to an address.
    Redirect = 7,
}

impl CoreOp {
    /// Every core operation, in opcode order.
    pub const ALL: [Self; 7] = [
        Self::Jmp,
        Self::JmpTrue,
        Self::JmpFalse,
        Self::Stop,
        Self::Keep,
        Self::Discard,
        Self::Redirect,
    ];

    /// Returns the opcode byte value.
    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Parses an opcode from its byte value.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(usize::from(b).checked_sub(1)?).copied()
    }

    /// The operation implementing this opcode.
    #[must_use]
    pub fn operation(self) -> &'static dyn Operation {
        match self {
            Self::Jmp => &Self::Jmp,
            Self::JmpTrue => &Self::JmpTrue,
            Self::JmpFalse => &Self::JmpFalse,
            Self::Stop => &Self::Stop,
            Self::Keep => &Self::Keep,
            Self::Discard => &Self::Discard,
            Self::Redirect => &Self::Redirect,
        }
    }

    /// Returns `true` for the three jump opcodes.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::JmpTrue | Self::JmpFalse)
    }
}

impl Operation for CoreOp {
    fn mnemonic(&self) -> &'static str {
        match self {
            Self::Jmp => "JMP",
            Self::JmpTrue => "JMPTRUE",
            Self::JmpFalse => "JMPFALSE",
            Self::Stop => "STOP",
            Self::Keep => "KEEP",
            Self::Discard => "DISCARD",
            Self::Redirect => "REDIRECT",
        }
    }

    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        match self {
            Self::Jmp | Self::JmpTrue | Self::JmpFalse => {
                let pc = *cursor;
                let offset = env.code().read_offset(cursor)?;
                let target = i64::try_from(pc)
                    .unwrap_or(i64::MAX)
                    .saturating_add(i64::from(offset));
                env.op_line(format_args!("{} {} [{:08x}]", self.mnemonic(), offset, target));
            }
            Self::Stop | Self::Discard => env.op_line(format_args!("{}", self.mnemonic())),
            Self::Keep => {
                env.op_line(format_args!("{}", self.mnemonic()));
                env.descend();
                env.dump_side_effects(cursor)?;
                env.ascend();
            }
            Self::Redirect => {
                env.op_line(format_args!("{}", self.mnemonic()));
                env.descend();
                env.dump_side_effects(cursor)?;
                env.dump_string(cursor, "address")?;
                env.ascend();
            }
        }
        Ok(())
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        match self {
            Self::Jmp => env.program_jump(cursor, true),
            Self::JmpTrue => {
                let jump = env.test_result();
                env.program_jump(cursor, jump)
            }
            Self::JmpFalse => {
                let jump = !env.test_result();
                env.program_jump(cursor, jump)
            }
            Self::Stop => {
                env.stop();
                Ok(())
            }
            Self::Keep => {
                let side_effects = env.read_side_effects(cursor)?;
                let source_line = env.source_line();
                env.add_action(&ActionRequest {
                    action: "keep",
                    args: &[],
                    side_effects: &side_effects,
                    source_line,
                })
            }
            Self::Discard => {
                let source_line = env.source_line();
                env.add_action(&ActionRequest {
                    action: "discard",
                    args: &[],
                    side_effects: &[],
                    source_line,
                })
            }
            Self::Redirect => {
                let side_effects = env.read_side_effects(cursor)?;
                let address = env.read_string(cursor)?;
                let source_line = env.source_line();
                env.add_action(&ActionRequest {
                    action: "redirect",
                    args: &[Operand::String(address)],
                    side_effects: &side_effects,
                    source_line,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_stable() {
        assert_eq!(CoreOp::Jmp as u8, 1);
        assert_eq!(CoreOp::JmpTrue as u8, 2);
        assert_eq!(CoreOp::JmpFalse as u8, 3);
        assert_eq!(CoreOp::Stop as u8, 4);
        assert_eq!(CoreOp::Redirect as u8, 7);
        assert!(CoreOp::Redirect.byte() < BUILTIN_OPCODE_COUNT);
    }

    #[test]
    fn from_byte_rejects_reserved_and_extension_range() {
        assert_eq!(CoreOp::from_byte(0), None);
        assert_eq!(CoreOp::from_byte(BUILTIN_OPCODE_COUNT), None);
        for op in CoreOp::ALL {
            assert_eq!(CoreOp::from_byte(op.byte()), Some(op));
        }
    }

    #[test]
    fn operation_table_matches_opcode() {
        for op in CoreOp::ALL {
            assert_eq!(op.operation().mnemonic(), op.mnemonic());
        }
        assert!(CoreOp::JmpFalse.is_jump());
        assert!(!CoreOp::Stop.is_jump());
    }
}
