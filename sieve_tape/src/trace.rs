// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing hooks for the interpreter.
//!
//! Tracing is optional and `no_std` friendly. The interpreter only emits events requested by a
//! [`TraceMask`]. Pass a mask and a [`TraceSink`] to [`Interpreter::run`] or
//! [`Interpreter::start`].

#[cfg(doc)]
use crate::interp::Interpreter;

use crate::block::Address;
use crate::interp::{Halt, TrapInfo};
use crate::program::Program;

/// A set of trace events requested by a [`TraceSink`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceMask(u32);

impl core::ops::BitOr for TraceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for TraceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl TraceMask {
    /// No tracing.
    pub const NONE: Self = Self(0);
    /// Trace run boundaries.
    ///
    /// Enables:
    /// - [`TraceSink::run_start`]
    /// - [`TraceSink::run_end`]
    pub const RUN: Self = Self(1 << 0);
    /// Trace each decoded operation.
    ///
    /// Enables:
    /// - [`TraceSink::op`]
    pub const OP: Self = Self(1 << 1);

    /// Returns `true` if this mask includes all bits in `other`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// Run outcome for tracing.
#[derive(Clone, Debug)]
pub enum TraceOutcome<'a> {
    /// The run halted normally.
    Halted(Halt),
    /// The run aborted.
    Trap(&'a TrapInfo),
}

/// A trace sink that can receive interpreter events.
pub trait TraceSink {
    /// Returns the set of events the sink wants.
    fn mask(&self) -> TraceMask {
        TraceMask::NONE
    }

    /// Called at the start of a run.
    ///
    /// Called only if `mask()` includes [`TraceMask::RUN`].
    fn run_start(&mut self, _program: &Program) {}

    /// Called for each operation, after it is decoded and before it executes.
    ///
    /// Called only if `mask()` includes [`TraceMask::OP`].
    ///
    /// - `pc`: address of the operation in the main block
    /// - `mnemonic`: the operation's mnemonic
    fn op(&mut self, _program: &Program, _pc: Address, _mnemonic: &'static str) {}

    /// Called at the end of a run.
    ///
    /// Called only if `mask()` includes [`TraceMask::RUN`].
    fn run_end(&mut self, _program: &Program, _outcome: TraceOutcome<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_union_contains_both() {
        let mut m = TraceMask::RUN;
        assert!(!m.contains(TraceMask::OP));
        m |= TraceMask::OP;
        assert!(m.contains(TraceMask::RUN | TraceMask::OP));
        assert!(m.contains(TraceMask::NONE));
    }
}
