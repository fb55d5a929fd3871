// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use std::sync::Arc;

use sieve_tape::action::{ActionLog, OwnedOperand};
use sieve_tape::asm::{Asm, SideEffectRef};
use sieve_tape::block::Address;
use sieve_tape::extension::{ExtIndex, ExtensionRegistry};
use sieve_tape::format::DecodeError;
use sieve_tape::interp::{Halt, Interpreter, RunReport, Step, Trap, TrapInfo};
use sieve_tape::object::ObjectClass;
use sieve_tape::opcode::{BUILTIN_OPCODE_COUNT, CoreOp};
use sieve_tape::program::{BlockId, Program, ProgramBuilder};
use sieve_tape::trace::{TraceMask, TraceSink};
use sieve_tape_conformance::{
    ACTION, FLAGGED, SEEN, TEST_FALSE, TEST_TRUE, registry, test_extension, vacation_extension,
};

fn run(program: Program) -> (Result<RunReport, TrapInfo>, ActionLog) {
    let mut interp = Interpreter::new(Arc::new(program), &registry());
    let mut log = ActionLog::new();
    let res = interp.run(&(), &mut log, TraceMask::NONE, None);
    (res, log)
}

#[test]
fn golden_minimal_program_bytes_v0_1() {
    let mut pb = ProgramBuilder::new();
    pb.emit_core_operation(BlockId::MAIN, CoreOp::Stop).unwrap();
    let p = pb.finish();

    // Locks in the container encoding of a minimal program.
    let expected: &[u8] = &[
        // magic "SIEVEBIN"
        0x53, 0x49, 0x45, 0x56, 0x45, 0x42, 0x49, 0x4e,
        // version_major=0, version_minor=1
        0x00, 0x00, 0x01, 0x00,
        // extensions: tag=1, len=1, payload=[count=0]
        0x01, 0x01, 0x00,
        // blocks: tag=2, len=3, payload=[count=1, len=1, STOP]
        0x02, 0x03, 0x01, 0x01, 0x04,
    ];
    assert_eq!(p.encode(), expected);
    assert_eq!(Program::decode(expected, &ExtensionRegistry::new()).unwrap(), p);
}

#[test]
fn stop_prevents_later_actions() {
    // [test-true, branch-if-true, action-A, stop, action-B]
    let test = test_extension();
    let mut pb = ProgramBuilder::new();
    pb.emit_extension_operation(BlockId::MAIN, &test, TEST_TRUE)
        .unwrap();
    pb.emit_core_operation(BlockId::MAIN, CoreOp::JmpTrue).unwrap();
    let to_a = pb.main_block().emit_offset(0);
    pb.main_block().resolve_offset(to_a).unwrap();
    pb.emit_extension_operation(BlockId::MAIN, &test, ACTION)
        .unwrap();
    pb.main_block().emit_cstring("action-A");
    pb.emit_core_operation(BlockId::MAIN, CoreOp::Stop).unwrap();
    pb.emit_extension_operation(BlockId::MAIN, &test, ACTION)
        .unwrap();
    pb.main_block().emit_cstring("action-B");

    let (res, log) = run(pb.finish());
    assert_eq!(
        res.unwrap(),
        RunReport {
            halt: Halt::Stopped,
            steps: 4,
            soft_failures: 0,
        }
    );
    assert_eq!(log.names().collect::<Vec<_>>(), ["action-A"]);
}

#[test]
fn branches_follow_the_test_result() {
    for (test_op, expected) in [(TEST_TRUE, "then"), (TEST_FALSE, "else")] {
        let test = test_extension();
        let mut a = Asm::new();
        let else_ = a.label();
        let end = a.label();
        a.ext_op(&test, test_op).jmp_false(else_);
        a.ext_op(&test, ACTION).string(b"then").jmp(end);
        a.place(else_).unwrap();
        a.ext_op(&test, ACTION).string(b"else");
        a.place(end).unwrap();

        let (res, log) = run(a.finish().unwrap());
        assert_eq!(res.unwrap().halt, Halt::Completed);
        assert_eq!(log.names().collect::<Vec<_>>(), [expected]);
    }
}

#[test]
fn truncated_string_fails_and_leaves_other_blocks_alone() {
    let test = test_extension();
    let mut pb = ProgramBuilder::new();
    let aux = pb.extension_block(&test);
    pb.block_mut(aux).unwrap().emit_cstring("kept");
    pb.emit_extension_operation(BlockId::MAIN, &test, ACTION)
        .unwrap();
    pb.main_block().emit_cstring("action-A");
    let p = pb.finish();

    // Drop the terminator of the main block's only string.
    let mut truncated = p.code().as_bytes().to_vec();
    truncated.pop();
    let mut cursor = 2;
    assert_eq!(
        sieve_tape::block::Block::from_bytes(truncated.clone()).read_string(&mut cursor),
        Err(DecodeError::OutOfBounds)
    );
    assert_eq!(cursor, 2);

    // The same corruption inside a container only breaks the main block.
    let mut bad = ProgramBuilder::new();
    let bad_aux = bad.extension_block(&test);
    bad.block_mut(bad_aux).unwrap().emit_cstring("kept");
    bad.main_block().emit_data(&truncated);
    let bad = Program::decode(&bad.finish().encode(), &registry()).unwrap();

    let aux_block = bad.extension_block(ExtIndex(0)).unwrap();
    assert_eq!(aux_block, p.extension_block(ExtIndex(0)).unwrap());
    let mut cursor = 0;
    assert_eq!(aux_block.read_string(&mut cursor), Ok(&b"kept"[..]));

    let (res, log) = run(bad);
    assert_eq!(
        res.unwrap_err(),
        TrapInfo {
            pc: 0,
            line: None,
            trap: Trap::Decode(DecodeError::OutOfBounds),
        }
    );
    assert!(log.actions.is_empty());
}

#[test]
fn jump_targets_must_stay_inside_the_main_block() {
    // Landing on address 0 is rejected.
    let mut a = Asm::new();
    let top = a.label();
    a.place(top).unwrap();
    a.jmp(top);
    let (res, _) = run(a.finish().unwrap());
    assert_eq!(
        res.unwrap_err().trap,
        Trap::JumpOutOfRange { pc: 1, offset: -1 }
    );

    // Landing exactly on the end completes the run.
    let mut a = Asm::new();
    let end = a.label();
    a.jmp(end).discard();
    a.place(end).unwrap();
    let (res, log) = run(a.finish().unwrap());
    assert_eq!(res.unwrap().halt, Halt::Completed);
    assert!(log.actions.is_empty());

    // One past the end is rejected.
    let mut pb = ProgramBuilder::new();
    pb.emit_core_operation(BlockId::MAIN, CoreOp::Jmp).unwrap();
    pb.main_block().emit_offset(5);
    let (res, _) = run(pb.finish());
    assert_eq!(
        res.unwrap_err().trap,
        Trap::JumpOutOfRange { pc: 1, offset: 5 }
    );
}

#[derive(Default)]
struct OpAddresses(Vec<Address>);

impl TraceSink for OpAddresses {
    fn mask(&self) -> TraceMask {
        TraceMask::OP
    }

    fn op(&mut self, _program: &Program, pc: Address, _mnemonic: &'static str) {
        self.0.push(pc);
    }
}

#[test]
fn dump_visits_the_same_operations_as_execution() {
    let test = test_extension();
    let vacation = vacation_extension();
    let mut a = Asm::new();
    a.ext_op(&test, TEST_TRUE)
        .keep(&[SideEffectRef {
            ext: &test,
            code: SEEN,
        }])
        .ext_op(&vacation, 0)
        .number(7)
        .string(b"away")
        .redirect("postmaster@example.org", &[])
        .discard();
    let program = Arc::new(a.finish().unwrap());

    let mut interp = Interpreter::new(Arc::clone(&program), &registry());
    let mut log = ActionLog::new();
    let mut trace = OpAddresses::default();
    let mask = trace.mask();
    interp.run(&(), &mut log, mask, Some(&mut trace)).unwrap();

    let dump = interp.dump_code();
    assert!(!dump.is_corrupt());
    assert_eq!(dump.addresses(), trace.0.as_slice());
    assert_eq!(log.actions.len(), 4);
}

#[test]
fn dump_listing_format() {
    let test = test_extension();
    let vacation = vacation_extension();
    let mut a = Asm::new();
    a.keep(&[
        SideEffectRef {
            ext: &test,
            code: SEEN,
        },
        SideEffectRef {
            ext: &test,
            code: FLAGGED,
        },
    ])
    .ext_op(&vacation, 0)
    .number(7)
    .string(b"away")
    .stop();
    let program = Arc::new(a.finish().unwrap());

    let dump = Interpreter::new(program, &registry()).dump_code();
    assert_eq!(
        dump.to_string(),
        "00000000: KEEP\n\
         00000002:   side effect: test:seen\n\
         00000004:   side effect: test:flagged\n\
         00000006: VACATION\n\
         00000007:   days: 7\n\
         00000008:   reason: \"away\"\n\
         0000000e: STOP\n\
         0000000f: [End of code]\n"
    );
}

#[test]
fn extensions_are_interned_once_in_first_use_order() {
    let test = test_extension();
    let vacation = vacation_extension();
    let mut a = Asm::new();
    a.ext_op(&vacation, 0).number(1).string(b"");
    a.ext_op(&test, TEST_TRUE);
    a.ext_op(&vacation, 0).number(2).string(b"");
    let p = a.finish().unwrap();

    let names: Vec<_> = p.extensions().iter().map(|(_, e)| e.name().to_string()).collect();
    assert_eq!(names, ["vacation", "test"]);
    // vacation has one operation, so its extension byte is followed directly by `days`.
    assert_eq!(p.code().as_bytes()[..2], [BUILTIN_OPCODE_COUNT, 1]);
    // test has three: extension byte, then selector.
    assert_eq!(p.code().as_bytes()[4..6], [BUILTIN_OPCODE_COUNT + 1, TEST_TRUE]);
    assert_eq!(p.code().as_bytes()[6], BUILTIN_OPCODE_COUNT);
}

#[test]
fn actions_carry_arguments_side_effects_and_lines() {
    let test = test_extension();
    let vacation = vacation_extension();
    let mut a = Asm::new();
    a.line(3).ext_op(&vacation, 0).number(7).string(b"away");
    a.line(4).redirect(
        "boss@example.org",
        &[SideEffectRef {
            ext: &test,
            code: FLAGGED,
        }],
    );
    let p = a.finish().unwrap();

    // Survives a container round trip.
    let p = Program::decode(&p.encode(), &registry()).unwrap();
    let (res, log) = run(p);
    res.unwrap();

    assert_eq!(log.actions.len(), 2);
    let vac = &log.actions[0];
    assert_eq!(vac.action, "vacation");
    assert_eq!(
        vac.args,
        [OwnedOperand::Number(7), OwnedOperand::String(b"away".to_vec())]
    );
    assert_eq!(vac.source_line, Some(3));

    let redirect = &log.actions[1];
    assert_eq!(redirect.action, "redirect");
    assert_eq!(redirect.side_effects, ["test:flagged"]);
    assert_eq!(
        redirect.args,
        [OwnedOperand::String(b"boss@example.org".to_vec())]
    );
    assert_eq!(redirect.source_line, Some(4));
}

#[test]
fn core_objects_round_trip_through_the_container() {
    let mut a = Asm::new();
    a.core_object(ObjectClass::MatchType, 1)
        .core_object(ObjectClass::Comparator, 0);
    let p = a.finish().unwrap();
    let p = Program::decode(&p.encode(), &ExtensionRegistry::new()).unwrap();

    let mut cursor = 0;
    let m = p
        .read_object(p.code(), &mut cursor, ObjectClass::MatchType)
        .unwrap();
    assert_eq!(m.def.identifier(), "contains");
    let c = p
        .read_object(p.code(), &mut cursor, ObjectClass::Comparator)
        .unwrap();
    assert_eq!(c.def.identifier(), "i;octet");
    assert_eq!(cursor, p.code_size());
}

#[test]
fn one_program_runs_on_many_threads() {
    let test = test_extension();
    let mut a = Asm::new();
    a.ext_op(&test, ACTION).string(b"fileinto").keep(&[]);
    let program = Arc::new(a.finish().unwrap());
    let registry = registry();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let program = Arc::clone(&program);
                let registry = &registry;
                s.spawn(move || {
                    let mut interp = Interpreter::new(program, registry);
                    let mut log = ActionLog::new();
                    for _ in 0..10 {
                        interp.run(&(), &mut log, TraceMask::NONE, None).unwrap();
                    }
                    log.names().map(str::to_string).collect::<Vec<_>>()
                })
            })
            .collect();
        for h in handles {
            let names = h.join().unwrap();
            assert_eq!(names.len(), 20);
            assert!(names.chunks(2).all(|c| *c == ["fileinto", "keep"]));
        }
    });
}

#[test]
fn embedders_can_bound_endless_loops_with_step() {
    let mut a = Asm::new();
    let top = a.label();
    a.discard();
    a.place(top).unwrap();
    a.jmp(top);
    let program = Arc::new(a.finish().unwrap());

    let mut interp = Interpreter::new(program, &ExtensionRegistry::new());
    let mut log = ActionLog::new();
    let mut run = interp.start(&(), &mut log, TraceMask::NONE, None);
    for _ in 0..1000 {
        assert_eq!(run.step().unwrap(), Step::Continue);
    }
    assert_eq!(run.steps(), 1000);
    assert_eq!(run.program_counter(), 1);
    drop(run);
    assert_eq!(log.actions.len(), 1);
}

#[test]
fn unknown_extension_code_is_corrupt() {
    let mut pb = ProgramBuilder::new();
    // Extension byte for index 0 in a program with no extensions.
    pb.main_block().emit_byte(BUILTIN_OPCODE_COUNT);
    let (res, _) = run(pb.finish());
    assert_eq!(
        res.unwrap_err().trap,
        Trap::Decode(DecodeError::UnknownExtension { index: 0 })
    );
}
