// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interpreter.
//!
//! An [`Interpreter`] executes one shared [`Program`] against messages. Each run starts at
//! address 0 of the main block and proceeds one operation at a time until the code is exhausted
//! (`Completed`), a `STOP` executes (`Stopped`), or something goes wrong (a [`TrapInfo`]).
//!
//! There is no built-in step budget: programs may contain backward jumps, so embedders that need
//! a bound drive the run with [`Run::step`] and stop calling it when their budget is spent.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use crate::action::{ActionRequest, ActionStatus, ResultSink, SideEffect};
use crate::block::Address;
use crate::dump::{CORRUPT_MARKER, CodeDump, DumpEnv};
use crate::extension::{ExtIndex, Extension, ExtensionContexts, ExtensionRegistry};
use crate::format::DecodeError;
use crate::object::{ObjectClass, ObjectRef};
use crate::operation::OperationRef;
use crate::program::Program;
use crate::trace::{TraceMask, TraceOutcome, TraceSink};

/// A runtime trap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    /// The code could not be decoded.
    Decode(DecodeError),
    /// A jump would leave the main block (or land on address 0).
    JumpOutOfRange {
        /// Address of the offset operand.
        pc: Address,
        /// The offending offset.
        offset: i32,
    },
    /// The operation has no runtime behavior.
    NotExecutable {
        /// Mnemonic of the operation.
        mnemonic: &'static str,
    },
    /// The result sink rejected an action.
    ActionFailed {
        /// The rejected action.
        action: String,
    },
    /// An extension operation failed.
    OperationFailed {
        /// Mnemonic of the operation.
        mnemonic: &'static str,
        /// What went wrong.
        reason: String,
    },
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "corrupt code: {e}"),
            Self::JumpOutOfRange { pc, offset } => {
                write!(f, "jump offset {offset} at {pc:08x} is out of range")
            }
            Self::NotExecutable { mnemonic } => write!(f, "{mnemonic} cannot be executed"),
            Self::ActionFailed { action } => write!(f, "action '{action}' failed"),
            Self::OperationFailed { mnemonic, reason } => write!(f, "{mnemonic} failed: {reason}"),
        }
    }
}

impl core::error::Error for Trap {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Trap {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// A trap annotated with location information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapInfo {
    /// Address of the operation that trapped.
    pub pc: Address,
    /// Script line of that operation, if known.
    pub line: Option<u32>,
    /// Trap kind.
    pub trap: Trap,
}

impl fmt::Display for TrapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "trap at {:08x} line {line}: {}", self.pc, self.trap),
            None => write!(f, "trap at {:08x}: {}", self.pc, self.trap),
        }
    }
}

impl core::error::Error for TrapInfo {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.trap)
    }
}

/// How a run ended normally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    /// The program counter reached the end of the main block.
    Completed,
    /// A `STOP` operation executed.
    Stopped,
}

/// Summary of a finished run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub halt: Halt,
    /// Operations executed.
    pub steps: u64,
    /// Actions the result sink reported as [`ActionStatus::SoftFail`].
    pub soft_failures: u32,
}

/// Outcome of [`Run::step`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// One operation executed; call [`Run::step`] again.
    Continue,
    /// The run is over.
    Halted(Halt),
}

#[derive(Copy, Clone, Debug, Default)]
struct RunState {
    pc: Address,
    stopped: bool,
    test_result: bool,
    soft_failures: u32,
}

/// Executes a program.
///
/// An interpreter is single-threaded, but any number of interpreters (on any threads) may share
/// one `Arc<Program>`.
pub struct Interpreter {
    program: Arc<Program>,
    slots: Vec<Arc<dyn Extension>>,
    contexts: ExtensionContexts,
    state: RunState,
}

impl Interpreter {
    /// Creates an interpreter for `program`.
    ///
    /// Every extension preloaded in `registry` and every extension the program references is
    /// loaded exactly once, preloaded ones first. Program extensions keep their program index as
    /// context slot; preloaded extensions the program does not reference get the slots after.
    pub fn new(program: Arc<Program>, registry: &ExtensionRegistry) -> Self {
        let mut slots: Vec<Arc<dyn Extension>> = program
            .extensions()
            .iter()
            .map(|(_, ext)| Arc::clone(ext))
            .collect();
        let mut contexts = ExtensionContexts::new();

        for ext in registry.preloaded() {
            let slot = match slots.iter().position(|s| s.name() == ext.name()) {
                Some(slot) => slot,
                None => {
                    slots.push(Arc::clone(ext));
                    slots.len() - 1
                }
            };
            tracing::trace!(name = ext.name(), slot, "loading preloaded extension");
            ext.interpreter_load(slot_index(slot), &mut contexts);
        }
        for (index, ext) in program.extensions().iter() {
            if registry.preloaded().any(|p| p.name() == ext.name()) {
                continue;
            }
            tracing::trace!(name = ext.name(), slot = index.0, "loading extension");
            ext.interpreter_load(index, &mut contexts);
        }

        Self {
            program,
            slots,
            contexts,
            state: RunState::default(),
        }
    }

    /// The program this interpreter runs.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Clears run state (program counter, stop flag, test result). Extension contexts persist.
    pub fn reset(&mut self) {
        self.state = RunState::default();
    }

    /// Current program counter.
    #[must_use]
    pub fn program_counter(&self) -> Address {
        self.state.pc
    }

    /// Current test result.
    #[must_use]
    pub fn test_result(&self) -> bool {
        self.state.test_result
    }

    /// Context slot of the extension called `name`, if it is loaded in this interpreter.
    #[must_use]
    pub fn extension_slot(&self, name: &str) -> Option<ExtIndex> {
        self.slots
            .iter()
            .position(|s| s.name() == name)
            .map(slot_index)
    }

    /// Extension contexts.
    #[must_use]
    pub fn contexts(&self) -> &ExtensionContexts {
        &self.contexts
    }

    /// Extension contexts, mutably.
    pub fn contexts_mut(&mut self) -> &mut ExtensionContexts {
        &mut self.contexts
    }

    /// Starts a run against `message`.
    ///
    /// Actions are reported to `result`. Trace events selected by `trace_mask` go to `trace`.
    pub fn start<'i, 'a>(
        &'i mut self,
        message: &'a dyn Any,
        result: &'a mut dyn ResultSink,
        trace_mask: TraceMask,
        mut trace: Option<&'a mut dyn TraceSink>,
    ) -> Run<'i, 'a> {
        self.reset();
        tracing::debug!(code_size = self.program.code_size(), "run start");
        if trace_mask.contains(TraceMask::RUN)
            && let Some(t) = trace.as_mut()
        {
            let t: &mut dyn TraceSink = &mut **t;
            t.run_start(&self.program);
        }
        Run {
            interp: self,
            message,
            result,
            trace_mask,
            trace,
            steps: 0,
            end: None,
        }
    }

    /// Runs the program against `message` to completion.
    pub fn run<'a>(
        &mut self,
        message: &'a dyn Any,
        result: &'a mut dyn ResultSink,
        trace_mask: TraceMask,
        trace: Option<&'a mut dyn TraceSink>,
    ) -> Result<RunReport, TrapInfo> {
        self.start(message, result, trace_mask, trace).finish()
    }

    /// Produces a textual listing of the main block without executing anything.
    ///
    /// Decoding stops at the first corrupt operation.
    pub fn dump_code(&mut self) -> CodeDump {
        self.reset();
        let program: &Program = &self.program;
        let code = program.code();
        let mut env = DumpEnv::new(program);
        let mut addresses = Vec::new();
        let mut corrupt = false;

        while self.state.pc < code.size() {
            let pc = self.state.pc;
            let mut cursor = pc;
            env.begin(pc);
            let dumped = program.read_operation(code, &mut cursor).and_then(|operation| {
                addresses.push(pc);
                operation.op.dump(&mut env, &mut cursor)
            });
            if let Err(e) = dumped {
                tracing::debug!(pc, error = %e, "dump stopped at corrupt code");
                env.raw_line(format_args!("{CORRUPT_MARKER}"));
                corrupt = true;
                break;
            }
            self.state.pc = cursor;
        }
        if !corrupt {
            env.raw_line(format_args!("{:08x}: [End of code]", code.size()));
        }

        CodeDump {
            text: env.finish(),
            addresses,
            corrupt,
        }
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("slots", &self.slots.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("contexts", &self.contexts)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn slot_index(slot: usize) -> ExtIndex {
    ExtIndex(u32::try_from(slot).unwrap_or(u32::MAX))
}

fn trap_info(program: &Program, pc: Address, trap: Trap) -> TrapInfo {
    TrapInfo {
        pc,
        line: program.line_at(pc),
        trap,
    }
}

#[derive(Clone, Debug)]
enum RunEnd {
    Halted(Halt),
    Trapped(TrapInfo),
}

/// A run in progress, created by [`Interpreter::start`].
pub struct Run<'i, 'a> {
    interp: &'i mut Interpreter,
    message: &'a dyn Any,
    result: &'a mut dyn ResultSink,
    trace_mask: TraceMask,
    trace: Option<&'a mut dyn TraceSink>,
    steps: u64,
    end: Option<RunEnd>,
}

impl Run<'_, '_> {
    /// Executes one operation.
    ///
    /// Once the run has ended every further call repeats the final outcome without executing
    /// anything.
    pub fn step(&mut self) -> Result<Step, TrapInfo> {
        match &self.end {
            Some(RunEnd::Halted(halt)) => return Ok(Step::Halted(*halt)),
            Some(RunEnd::Trapped(info)) => return Err(info.clone()),
            None => {}
        }
        match self.execute_next() {
            Ok(None) => Ok(Step::Continue),
            Ok(Some(halt)) => {
                self.end(RunEnd::Halted(halt));
                Ok(Step::Halted(halt))
            }
            Err(info) => {
                self.end(RunEnd::Trapped(info.clone()));
                Err(info)
            }
        }
    }

    /// Steps until the run ends.
    pub fn finish(mut self) -> Result<RunReport, TrapInfo> {
        loop {
            if let Step::Halted(halt) = self.step()? {
                return Ok(RunReport {
                    halt,
                    steps: self.steps,
                    soft_failures: self.interp.state.soft_failures,
                });
            }
        }
    }

    /// Operations executed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Address of the next operation.
    #[must_use]
    pub fn program_counter(&self) -> Address {
        self.interp.state.pc
    }

    /// Current test result.
    #[must_use]
    pub fn test_result(&self) -> bool {
        self.interp.state.test_result
    }

    fn execute_next(&mut self) -> Result<Option<Halt>, TrapInfo> {
        let interp = &mut *self.interp;
        let program: &Program = &interp.program;
        if interp.state.stopped {
            return Ok(Some(Halt::Stopped));
        }
        let pc = interp.state.pc;
        let code = program.code();
        if pc >= code.size() {
            return Ok(Some(Halt::Completed));
        }

        let mut cursor = pc;
        let operation = program
            .read_operation(code, &mut cursor)
            .map_err(|e| trap_info(program, pc, Trap::Decode(e)))?;
        if self.trace_mask.contains(TraceMask::OP)
            && let Some(t) = self.trace.as_mut()
        {
            let t: &mut dyn TraceSink = &mut **t;
            t.op(program, pc, operation.op.mnemonic());
        }
        tracing::trace!(pc, op = operation.op.mnemonic(), "execute");

        let mut env = RuntimeEnv {
            program,
            state: &mut interp.state,
            contexts: &mut interp.contexts,
            message: self.message,
            result: &mut *self.result,
            operation,
            address: pc,
        };
        operation
            .op
            .execute(&mut env, &mut cursor)
            .map_err(|trap| trap_info(program, pc, trap))?;
        self.steps += 1;
        interp.state.pc = cursor;
        Ok(None)
    }

    fn end(&mut self, end: RunEnd) {
        let program: &Program = &self.interp.program;
        match &end {
            RunEnd::Halted(halt) => tracing::debug!(?halt, steps = self.steps, "run halted"),
            RunEnd::Trapped(info) => tracing::debug!(error = %info, "run aborted"),
        }
        if self.trace_mask.contains(TraceMask::RUN)
            && let Some(t) = self.trace.as_mut()
        {
            let outcome = match &end {
                RunEnd::Halted(halt) => TraceOutcome::Halted(*halt),
                RunEnd::Trapped(info) => TraceOutcome::Trap(info),
            };
            let t: &mut dyn TraceSink = &mut **t;
            t.run_end(program, outcome);
        }
        self.end = Some(end);
    }
}

impl fmt::Debug for Run<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("pc", &self.interp.state.pc)
            .field("steps", &self.steps)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Execution state handed to [`Operation::execute`](crate::operation::Operation::execute).
pub struct RuntimeEnv<'r> {
    program: &'r Program,
    state: &'r mut RunState,
    contexts: &'r mut ExtensionContexts,
    message: &'r dyn Any,
    result: &'r mut dyn ResultSink,
    operation: OperationRef<'r>,
    address: Address,
}

impl<'r> RuntimeEnv<'r> {
    /// The running program.
    #[must_use]
    pub fn program(&self) -> &'r Program {
        self.program
    }

    /// The message being filtered.
    #[must_use]
    pub fn message(&self) -> &'r dyn Any {
        self.message
    }

    /// The operation being executed.
    #[must_use]
    pub fn operation(&self) -> OperationRef<'r> {
        self.operation
    }

    /// Script line of the operation being executed, if known.
    #[must_use]
    pub fn source_line(&self) -> Option<u32> {
        self.program.line_at(self.address)
    }

    /// Current test result.
    #[must_use]
    pub fn test_result(&self) -> bool {
        self.state.test_result
    }

    /// Sets the test result consumed by `JMPTRUE`/`JMPFALSE`.
    pub fn set_test_result(&mut self, value: bool) {
        self.state.test_result = value;
    }

    /// Ends the run after the current operation.
    pub fn stop(&mut self) {
        self.state.stopped = true;
    }

    /// Reads a jump offset and, if `jump`, moves `cursor` to its target.
    ///
    /// The target is relative to the offset operand and must satisfy `0 < target <= code size`,
    /// whether or not the jump is taken.
    pub fn program_jump(&mut self, cursor: &mut Address, jump: bool) -> Result<(), Trap> {
        let pc = *cursor;
        let offset = self.program.code().read_offset(cursor)?;
        let target = i64::try_from(pc)
            .ok()
            .and_then(|pc| pc.checked_add(i64::from(offset)))
            .and_then(|t| usize::try_from(t).ok())
            .filter(|&t| t > 0 && t <= self.program.code_size())
            .ok_or(Trap::JumpOutOfRange { pc, offset })?;
        if jump {
            *cursor = target;
        }
        Ok(())
    }

    /// Reads an integer operand.
    pub fn read_number(&self, cursor: &mut Address) -> Result<u64, DecodeError> {
        self.program.code().read_integer(cursor)
    }

    /// Reads a string operand.
    pub fn read_string(&self, cursor: &mut Address) -> Result<&'r [u8], DecodeError> {
        self.program.code().read_string(cursor)
    }

    /// Reads an object operand of `class`.
    pub fn read_object(
        &self,
        cursor: &mut Address,
        class: ObjectClass,
    ) -> Result<ObjectRef<'r>, DecodeError> {
        self.program.read_object(self.program.code(), cursor, class)
    }

    /// Reads a side-effect list.
    pub fn read_side_effects(
        &self,
        cursor: &mut Address,
    ) -> Result<Vec<SideEffect<'r>>, DecodeError> {
        self.program.read_side_effects(self.program.code(), cursor)
    }

    /// Context of the extension that contributed the current operation.
    #[must_use]
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.contexts.get_as(self.operation.extension?)
    }

    /// Mutable context of the extension that contributed the current operation.
    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.contexts.get_as_mut(self.operation.extension?)
    }

    /// All extension contexts.
    pub fn contexts_mut(&mut self) -> &mut ExtensionContexts {
        &mut *self.contexts
    }

    /// Replaces the current operation's extension context.
    ///
    /// Does nothing for core operations.
    pub fn set_context(&mut self, context: Box<dyn Any>) {
        if let Some(index) = self.operation.extension {
            self.contexts.set(index, context);
        }
    }

    /// Reports an action to the result sink.
    ///
    /// A soft failure is counted and logged; a hard failure traps.
    pub fn add_action(&mut self, request: &ActionRequest<'_>) -> Result<(), Trap> {
        match self.result.add_action(self.message, request) {
            ActionStatus::Ok => Ok(()),
            ActionStatus::SoftFail => {
                self.state.soft_failures += 1;
                tracing::warn!(
                    action = request.action,
                    pc = self.address,
                    "action failed; continuing"
                );
                Ok(())
            }
            ActionStatus::HardFail => Err(Trap::ActionFailed {
                action: String::from(request.action),
            }),
        }
    }

    /// Builds a [`Trap::OperationFailed`] for the current operation.
    #[must_use]
    pub fn fail(&self, reason: impl Into<String>) -> Trap {
        Trap::OperationFailed {
            mnemonic: self.operation.op.mnemonic(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for RuntimeEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("operation", &self.operation)
            .field("address", &self.address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
