// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! JSON listings.
//!
//! ```json
//! { "code": [
//!     { "op": "line", "line": 1 },
//!     { "op": "ext", "extension": "header", "operation": "HEADER",
//!       "operands": [ { "match_type": "contains" }, { "comparator": "i;ascii-casemap" },
//!                     { "string": "subject" }, { "string": "report" } ] },
//!     { "op": "jmp_false", "label": "other" },
//!     { "op": "ext", "extension": "fileinto", "operation": "FILEINTO",
//!       "operands": [ { "side_effects": ["imap4flags:seen"] }, { "string": "Reports" } ] },
//!     { "op": "stop" },
//!     { "op": "label", "name": "other" },
//!     { "op": "keep" }
//! ] }
//! ```
//!
//! Objects are named by identifier; extension objects as `extension:identifier`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use sieve_tape::asm::{Asm, Label, SideEffectRef};
use sieve_tape::extension::{Extension, ExtensionRegistry};
use sieve_tape::object::{ObjectClass, ObjectDef};
use sieve_tape::program::Program;

#[derive(Deserialize, Debug)]
pub(crate) struct Listing {
    code: Vec<Insn>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Insn {
    Label {
        name: String,
    },
    Line {
        line: u32,
    },
    Jmp {
        label: String,
    },
    JmpTrue {
        label: String,
    },
    JmpFalse {
        label: String,
    },
    Stop,
    Keep {
        #[serde(default)]
        side_effects: Vec<String>,
    },
    Discard,
    Redirect {
        address: String,
        #[serde(default)]
        side_effects: Vec<String>,
    },
    Ext {
        extension: String,
        operation: String,
        #[serde(default)]
        operands: Vec<Operand>,
    },
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum Operand {
    Number(u64),
    String(String),
    Comparator(String),
    MatchType(String),
    AddressPart(String),
    SideEffects(Vec<String>),
}

struct Assembler<'r> {
    registry: &'r ExtensionRegistry,
    asm: Asm,
    /// Label per name, and whether it has been placed.
    labels: HashMap<String, (Label, bool)>,
}

impl Assembler<'_> {
    fn label(&mut self, name: &str) -> Label {
        if let Some(&(l, _)) = self.labels.get(name) {
            return l;
        }
        let l = self.asm.label();
        self.labels.insert(name.to_string(), (l, false));
        l
    }

    fn extension(&self, name: &str) -> Result<Arc<dyn Extension>> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown extension '{name}'"))
    }

    /// Resolves `ext:identifier` side-effect names.
    fn side_effects(&self, names: &[String]) -> Result<Vec<(Arc<dyn Extension>, u8)>> {
        names
            .iter()
            .map(|name| {
                let (ext, id) = name
                    .split_once(':')
                    .ok_or_else(|| anyhow!("side effect '{name}' is not 'extension:identifier'"))?;
                let ext = self.extension(ext)?;
                let code = position(ext.objects(ObjectClass::SideEffect), id)
                    .ok_or_else(|| anyhow!("unknown side effect '{name}'"))?;
                Ok((ext, code))
            })
            .collect()
    }

    fn object(&mut self, class: ObjectClass, name: &str) -> Result<()> {
        if let Some((ext, id)) = name.split_once(':') {
            let ext = self.extension(ext)?;
            let code = position(ext.objects(class), id)
                .ok_or_else(|| anyhow!("unknown {} '{name}'", class.name()))?;
            self.asm.ext_object(class, &ext, code);
        } else {
            let code = position(class.core_objects(), name)
                .ok_or_else(|| anyhow!("unknown {} '{name}'", class.name()))?;
            self.asm.core_object(class, code);
        }
        Ok(())
    }

    fn side_effect_list(&mut self, names: &[String]) -> Result<()> {
        let resolved = self.side_effects(names)?;
        self.asm.number(resolved.len() as u64);
        for (ext, code) in &resolved {
            self.asm.ext_object(ObjectClass::SideEffect, ext, *code);
        }
        Ok(())
    }

    fn insn(&mut self, insn: &Insn) -> Result<()> {
        match insn {
            Insn::Label { name } => {
                let l = self.label(name);
                self.asm
                    .place(l)
                    .with_context(|| format!("label '{name}'"))?;
                self.labels.insert(name.clone(), (l, true));
            }
            Insn::Line { line } => {
                self.asm.line(*line);
            }
            Insn::Jmp { label } => {
                let l = self.label(label);
                self.asm.jmp(l);
            }
            Insn::JmpTrue { label } => {
                let l = self.label(label);
                self.asm.jmp_true(l);
            }
            Insn::JmpFalse { label } => {
                let l = self.label(label);
                self.asm.jmp_false(l);
            }
            Insn::Stop => {
                self.asm.stop();
            }
            Insn::Discard => {
                self.asm.discard();
            }
            Insn::Keep { side_effects } => {
                let resolved = self.side_effects(side_effects)?;
                let refs: Vec<_> = resolved
                    .iter()
                    .map(|(ext, code)| SideEffectRef { ext, code: *code })
                    .collect();
                self.asm.keep(&refs);
            }
            Insn::Redirect {
                address,
                side_effects,
            } => {
                let resolved = self.side_effects(side_effects)?;
                let refs: Vec<_> = resolved
                    .iter()
                    .map(|(ext, code)| SideEffectRef { ext, code: *code })
                    .collect();
                self.asm.redirect(address, &refs);
            }
            Insn::Ext {
                extension,
                operation,
                operands,
            } => {
                let ext = self.extension(extension)?;
                let code = ext
                    .operations()
                    .iter()
                    .position(|op| op.mnemonic().eq_ignore_ascii_case(operation))
                    .and_then(|i| u8::try_from(i).ok())
                    .ok_or_else(|| anyhow!("'{extension}' has no operation '{operation}'"))?;
                self.asm.ext_op(&ext, code);
                for operand in operands {
                    match operand {
                        Operand::Number(n) => {
                            self.asm.number(*n);
                        }
                        Operand::String(s) => {
                            self.asm.string(s.as_bytes());
                        }
                        Operand::Comparator(name) => self.object(ObjectClass::Comparator, name)?,
                        Operand::MatchType(name) => self.object(ObjectClass::MatchType, name)?,
                        Operand::AddressPart(name) => self.object(ObjectClass::AddressPart, name)?,
                        Operand::SideEffects(names) => self.side_effect_list(names)?,
                    }
                }
            }
        }
        Ok(())
    }
}

fn position(table: &[&'static dyn ObjectDef], id: &str) -> Option<u8> {
    table
        .iter()
        .position(|o| o.identifier() == id)
        .and_then(|i| u8::try_from(i).ok())
}

/// Parses a JSON listing.
pub(crate) fn parse(json: &str) -> Result<Listing> {
    Ok(serde_json::from_str(json)?)
}

/// Assembles `listing`, resolving extensions through `registry`.
pub(crate) fn assemble(listing: &Listing, registry: &ExtensionRegistry) -> Result<Program> {
    let mut a = Assembler {
        registry,
        asm: Asm::new(),
        labels: HashMap::new(),
    };
    for (i, insn) in listing.code.iter().enumerate() {
        a.insn(insn)
            .with_context(|| format!("instruction {i}: {insn:?}"))?;
    }
    let mut unplaced: Vec<_> = a
        .labels
        .iter()
        .filter(|(_, (_, placed))| !placed)
        .map(|(name, _)| name.as_str())
        .collect();
    if !unplaced.is_empty() {
        unplaced.sort_unstable();
        bail!("labels never placed: {}", unplaced.join(", "));
    }
    Ok(a.asm.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use sieve_tape::action::ActionLog;
    use sieve_tape::interp::Interpreter;
    use sieve_tape::opcode::CoreOp;
    use sieve_tape::trace::TraceMask;

    use crate::exts;
    use crate::message::Message;

    const SAMPLE: &str = r#"{ "code": [
        { "op": "line", "line": 1 },
        { "op": "ext", "extension": "header", "operation": "header",
          "operands": [ { "match_type": "contains" }, { "comparator": "i;ascii-casemap" },
                        { "string": "subject" }, { "string": "report" } ] },
        { "op": "jmp_false", "label": "other" },
        { "op": "line", "line": 2 },
        { "op": "ext", "extension": "fileinto", "operation": "FILEINTO",
          "operands": [ { "side_effects": ["imap4flags:seen"] }, { "string": "Reports" } ] },
        { "op": "stop" },
        { "op": "label", "name": "other" },
        { "op": "line", "line": 4 },
        { "op": "keep", "side_effects": ["imap4flags:flagged", "imap4flags:deleted"] }
    ] }"#;

    #[test]
    fn sample_assembles() {
        let registry = exts::registry().unwrap();
        let p = assemble(&parse(SAMPLE).unwrap(), &registry).unwrap();
        let names: Vec<_> = p.extensions().iter().map(|(_, e)| e.name().to_string()).collect();
        assert_eq!(names, ["header", "fileinto", "imap4flags"]);
        assert_eq!(p.line_at(0), Some(1));
        assert_eq!(p.code().as_bytes().last(), Some(&3));
        assert_eq!(p.line_at(p.code_size() - 1), Some(4));
    }

    #[test]
    fn errors_name_the_instruction() {
        let registry = exts::registry().unwrap();
        let bad = parse(r#"{ "code": [ { "op": "keep", "side_effects": ["imap4flags:purple"] } ] }"#)
            .unwrap();
        let err = assemble(&bad, &registry).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("instruction 0"), "{msg}");
        assert!(msg.contains("unknown side effect 'imap4flags:purple'"), "{msg}");

        let dangling = parse(r#"{ "code": [ { "op": "jmp", "label": "nowhere" } ] }"#).unwrap();
        let err = assemble(&dangling, &registry).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn core_operations_without_extensions() {
        let p = assemble(
            &parse(r#"{ "code": [ { "op": "redirect", "address": "a@b" }, { "op": "discard" } ] }"#)
                .unwrap(),
            &ExtensionRegistry::new(),
        )
        .unwrap();
        assert_eq!(
            p.code().as_bytes(),
            [CoreOp::Redirect.byte(), 0, 3, b'a', b'@', b'b', 0, CoreOp::Discard.byte()]
        );
        assert!(p.extensions().is_empty());
    }

    #[test]
    fn demo_listing_runs() {
        let registry = exts::registry().unwrap();
        let listing = parse(include_str!("../demos/reports.json")).unwrap();
        let p = Arc::new(assemble(&listing, &registry).unwrap());
        let mut interp = Interpreter::new(p, &registry);
        for (eml, expected) in [
            (include_str!("../demos/report.eml"), "fileinto"),
            (include_str!("../demos/spam.eml"), "discard"),
        ] {
            let mut log = ActionLog::new();
            interp
                .run(&Message::parse(eml), &mut log, TraceMask::NONE, None)
                .unwrap();
            assert_eq!(log.names().collect::<Vec<_>>(), [expected]);
        }
    }
}
