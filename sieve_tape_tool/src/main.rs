// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![doc = "Command-line front end for `sieve_tape`.\n\n\
          This is a std-only tool crate. It is not part of the core library.\n"]

mod exts;
mod listing;
mod message;

use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sieve_tape::action::{ActionRequest, ActionStatus, ResultSink};
use sieve_tape::block::Address;
use sieve_tape::extension::ExtensionRegistry;
use sieve_tape::interp::Interpreter;
use sieve_tape::program::Program;
use sieve_tape::trace::{TraceMask, TraceOutcome, TraceSink};
use tracing_subscriber::EnvFilter;

use crate::message::Message;

const USAGE: &str = "usage:
  sieve_tape_tool asm <listing.json> <out.bin>
  sieve_tape_tool dump <program.bin>
  sieve_tape_tool run [--trace] <program.bin> [message.eml]";

/// Prints every action to stdout.
#[derive(Default)]
struct PrintSink {
    count: usize,
}

impl ResultSink for PrintSink {
    fn add_action(&mut self, _message: &dyn Any, request: &ActionRequest<'_>) -> ActionStatus {
        self.count += 1;
        let r = request.record();
        let mut line = r.action;
        for arg in &r.args {
            line.push_str(&format!(" {arg:?}"));
        }
        if !r.side_effects.is_empty() {
            line.push_str(&format!(" [{}]", r.side_effects.join(", ")));
        }
        if let Some(n) = r.source_line {
            line.push_str(&format!(" (line {n})"));
        }
        println!("{line}");
        ActionStatus::Ok
    }
}

/// Prints executed operations to stderr.
struct PrintTrace;

impl TraceSink for PrintTrace {
    fn mask(&self) -> TraceMask {
        TraceMask::RUN | TraceMask::OP
    }

    fn run_start(&mut self, program: &Program) {
        eprintln!("run: {} bytes of code", program.code_size());
    }

    fn op(&mut self, program: &Program, pc: Address, mnemonic: &'static str) {
        match program.line_at(pc) {
            Some(line) => eprintln!("{pc:08x}: {mnemonic} (line {line})"),
            None => eprintln!("{pc:08x}: {mnemonic}"),
        }
    }

    fn run_end(&mut self, _program: &Program, outcome: TraceOutcome<'_>) {
        match outcome {
            TraceOutcome::Halted(halt) => eprintln!("halted: {halt:?}"),
            TraceOutcome::Trap(info) => eprintln!("trapped: {info}"),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn next_path(args: &mut impl Iterator<Item = String>) -> Result<PathBuf> {
    match args.next() {
        Some(p) => Ok(PathBuf::from(p)),
        None => bail!("{USAGE}"),
    }
}

fn load_program(path: &Path, registry: &ExtensionRegistry) -> Result<Program> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let program =
        Program::decode(&bytes, registry).with_context(|| format!("decode {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        code_size = program.code_size(),
        extensions = program.extensions().len(),
        "loaded program"
    );
    Ok(program)
}

fn cmd_asm(mut args: impl Iterator<Item = String>) -> Result<()> {
    let input = next_path(&mut args)?;
    let output = next_path(&mut args)?;
    if args.next().is_some() {
        bail!("{USAGE}");
    }
    let json = fs::read_to_string(&input).with_context(|| format!("read {}", input.display()))?;
    let listing = listing::parse(&json).with_context(|| format!("parse {}", input.display()))?;
    let registry = exts::registry().context("build extension registry")?;
    let program = listing::assemble(&listing, &registry)
        .with_context(|| format!("assemble {}", input.display()))?;
    let bytes = program.encode();
    fs::write(&output, &bytes).with_context(|| format!("write {}", output.display()))?;
    tracing::info!(bytes = bytes.len(), out = %output.display(), "assembled");
    Ok(())
}

fn cmd_dump(mut args: impl Iterator<Item = String>) -> Result<()> {
    let path = next_path(&mut args)?;
    let registry = exts::registry().context("build extension registry")?;
    let program = load_program(&path, &registry)?;
    let mut interp = Interpreter::new(Arc::new(program), &registry);
    let dump = interp.dump_code();
    print!("{dump}");
    if dump.is_corrupt() {
        bail!("{} is corrupt", path.display());
    }
    Ok(())
}

fn cmd_run(args: impl Iterator<Item = String>) -> Result<()> {
    let mut args = args.peekable();
    let trace = args.next_if(|a| a == "--trace").is_some();
    let path = next_path(&mut args)?;
    let message = match args.next() {
        Some(m) => {
            let text = fs::read_to_string(&m).with_context(|| format!("read {m}"))?;
            Message::parse(&text)
        }
        None => Message::default(),
    };

    let registry = exts::registry().context("build extension registry")?;
    let program = load_program(&path, &registry)?;
    let mut interp = Interpreter::new(Arc::new(program), &registry);
    let mut sink = PrintSink::default();
    let mut printer = PrintTrace;
    let mask = if trace { printer.mask() } else { TraceMask::NONE };
    let trace_sink: Option<&mut dyn TraceSink> = if trace { Some(&mut printer) } else { None };
    let report = interp
        .run(&message, &mut sink, mask, trace_sink)
        .with_context(|| format!("run {}", path.display()))?;
    // No explicit action leaves the message in the inbox.
    if sink.count == 0 {
        println!("keep (implicit)");
    }
    tracing::info!(halt = ?report.halt, steps = report.steps, "run finished");
    if report.soft_failures > 0 {
        tracing::warn!(count = report.soft_failures, "some actions failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("asm") => cmd_asm(args),
        Some("dump") => cmd_dump(args),
        Some("run") => cmd_run(args),
        _ => bail!("{USAGE}"),
    }
}
