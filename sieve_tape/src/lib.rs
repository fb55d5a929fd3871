// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `sieve_tape`: the binary form of compiled mail-filter scripts and the interpreter that runs it.
//!
//! A compiled script is a [`program::Program`]: a main code block of variable-length operations,
//! auxiliary blocks owned by extensions, and a per-program table that interns the extensions the
//! code refers to. Operations are either core opcodes ([`opcode::CoreOp`]) or contributed by an
//! [`extension::Extension`]; both are decoded through one dispatch path and can be executed by an
//! [`interp::Interpreter`] or listed with [`interp::Interpreter::dump_code`].
//!
//! ## Example
//!
//! ```
//! extern crate alloc;
//!
//! use alloc::sync::Arc;
//!
//! use sieve_tape::action::ActionLog;
//! use sieve_tape::asm::Asm;
//! use sieve_tape::extension::ExtensionRegistry;
//! use sieve_tape::interp::{Halt, Interpreter};
//! use sieve_tape::trace::TraceMask;
//!
//! let mut a = Asm::new();
//! a.redirect("postmaster@example.org", &[]).stop().discard();
//! let program = Arc::new(a.finish()?);
//!
//! let registry = ExtensionRegistry::new();
//! let mut interp = Interpreter::new(program, &registry);
//! let mut log = ActionLog::new();
//! let report = interp.run(&(), &mut log, TraceMask::NONE, None).unwrap();
//!
//! assert_eq!(report.halt, Halt::Stopped);
//! assert_eq!(log.names().collect::<Vec<_>>(), ["redirect"]);
//! # Ok::<(), sieve_tape::block::EmitError>(())
//! ```

#![no_std]

extern crate alloc;

pub mod action;
pub mod asm;
pub mod block;
pub mod dump;
pub mod extension;
pub mod format;
pub mod interp;
pub mod object;
pub mod opcode;
pub mod operation;
pub mod program;
pub mod trace;
