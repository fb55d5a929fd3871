// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Extensions shared by the conformance tests.
//!
//! - `test`: `TEST_TRUE`, `TEST_FALSE` and `ACTION <name>`, plus the side effects `seen` and
//!   `flagged`.
//! - `vacation`: a single operation, `VACATION <days> <reason>`, reported as action `vacation`.

use std::sync::Arc;

use sieve_tape::action::{ActionRequest, Operand};
use sieve_tape::block::Address;
use sieve_tape::dump::DumpEnv;
use sieve_tape::extension::{Extension, ExtensionRegistry};
use sieve_tape::format::DecodeError;
use sieve_tape::interp::{RuntimeEnv, Trap};
use sieve_tape::object::{CoreObject, ObjectClass, ObjectDef};
use sieve_tape::operation::Operation;

/// Sets the test result to a constant.
#[derive(Debug)]
pub struct SetTest(pub bool);

impl Operation for SetTest {
    fn mnemonic(&self) -> &'static str {
        if self.0 { "TEST_TRUE" } else { "TEST_FALSE" }
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, _cursor: &mut Address) -> Result<(), Trap> {
        env.set_test_result(self.0);
        Ok(())
    }
}

/// Reports an action named by its string operand.
#[derive(Debug)]
pub struct NamedAction;

impl Operation for NamedAction {
    fn mnemonic(&self) -> &'static str {
        "ACTION"
    }

    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        env.op_line(format_args!("ACTION"));
        env.descend();
        env.dump_string(cursor, "name")?;
        env.ascend();
        Ok(())
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        let name = env.read_string(cursor)?;
        let Ok(name) = core::str::from_utf8(name) else {
            return Err(env.fail("action name is not UTF-8"));
        };
        let line = env.source_line();
        env.add_action(&ActionRequest {
            action: name,
            args: &[],
            side_effects: &[],
            source_line: line,
        })
    }
}

/// `VACATION <days> <reason>`.
#[derive(Debug)]
pub struct Vacation;

impl Operation for Vacation {
    fn mnemonic(&self) -> &'static str {
        "VACATION"
    }

    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        env.op_line(format_args!("VACATION"));
        env.descend();
        env.dump_number(cursor, "days")?;
        env.dump_string(cursor, "reason")?;
        env.ascend();
        Ok(())
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        let days = env.read_number(cursor)?;
        let reason = env.read_string(cursor)?;
        let line = env.source_line();
        env.add_action(&ActionRequest {
            action: "vacation",
            args: &[Operand::Number(days), Operand::String(reason)],
            side_effects: &[],
            source_line: line,
        })
    }
}

/// Code of `TEST_TRUE` within the `test` extension.
pub const TEST_TRUE: u8 = 0;
/// Code of `TEST_FALSE` within the `test` extension.
pub const TEST_FALSE: u8 = 1;
/// Code of `ACTION` within the `test` extension.
pub const ACTION: u8 = 2;

/// Side-effect code of `seen`.
pub const SEEN: u8 = 0;
/// Side-effect code of `flagged`.
pub const FLAGGED: u8 = 1;

static SET_TRUE: SetTest = SetTest(true);
static SET_FALSE: SetTest = SetTest(false);
static NAMED_ACTION: NamedAction = NamedAction;
static TEST_OPS: [&dyn Operation; 3] = [&SET_TRUE, &SET_FALSE, &NAMED_ACTION];

static SEEN_FLAG: CoreObject = CoreObject { identifier: "seen" };
static FLAGGED_FLAG: CoreObject = CoreObject {
    identifier: "flagged",
};
static TEST_EFFECTS: [&dyn ObjectDef; 2] = [&SEEN_FLAG, &FLAGGED_FLAG];

static VACATION: Vacation = Vacation;
static VACATION_OPS: [&dyn Operation; 1] = [&VACATION];

/// The `test` extension.
#[derive(Debug)]
pub struct TestExtension;

impl Extension for TestExtension {
    fn name(&self) -> &str {
        "test"
    }

    fn operations(&self) -> &[&'static dyn Operation] {
        &TEST_OPS
    }

    fn objects(&self, class: ObjectClass) -> &[&'static dyn ObjectDef] {
        match class {
            ObjectClass::SideEffect => &TEST_EFFECTS,
            _ => &[],
        }
    }
}

/// The `vacation` extension.
#[derive(Debug)]
pub struct VacationExtension;

impl Extension for VacationExtension {
    fn name(&self) -> &str {
        "vacation"
    }

    fn operations(&self) -> &[&'static dyn Operation] {
        &VACATION_OPS
    }
}

/// A fresh handle to the `test` extension.
#[must_use]
pub fn test_extension() -> Arc<dyn Extension> {
    Arc::new(TestExtension)
}

/// A fresh handle to the `vacation` extension.
#[must_use]
pub fn vacation_extension() -> Arc<dyn Extension> {
    Arc::new(VacationExtension)
}

/// A registry holding both fixture extensions.
#[must_use]
pub fn registry() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    for ext in [test_extension(), vacation_extension()] {
        if let Err(e) = registry.register(ext) {
            unreachable!("fixture extensions have distinct names: {e}");
        }
    }
    registry
}
