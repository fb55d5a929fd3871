// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Extensions the tool knows about.
//!
//! - `fileinto`: `FILEINTO <side effects> <folder>`
//! - `imap4flags`: side effects `seen`, `flagged`, `answered`, `deleted`
//! - `header`: `HEADER <match type> <comparator> <field> <key>`, a test

use std::sync::Arc;

use sieve_tape::action::{ActionRequest, Operand};
use sieve_tape::block::Address;
use sieve_tape::dump::DumpEnv;
use sieve_tape::extension::{Extension, ExtensionRegistry, RegistryError};
use sieve_tape::format::DecodeError;
use sieve_tape::interp::{RuntimeEnv, Trap};
use sieve_tape::object::{CoreObject, ObjectClass, ObjectDef};
use sieve_tape::operation::Operation;

use crate::message::Message;

struct FileIntoOp;

impl Operation for FileIntoOp {
    fn mnemonic(&self) -> &'static str {
        "FILEINTO"
    }

    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        env.op_line(format_args!("FILEINTO"));
        env.descend();
        env.dump_side_effects(cursor)?;
        env.dump_string(cursor, "folder")?;
        env.ascend();
        Ok(())
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        let side_effects = env.read_side_effects(cursor)?;
        let folder = env.read_string(cursor)?;
        let source_line = env.source_line();
        env.add_action(&ActionRequest {
            action: "fileinto",
            args: &[Operand::String(folder)],
            side_effects: &side_effects,
            source_line,
        })
    }
}

struct HeaderOp;

impl Operation for HeaderOp {
    fn mnemonic(&self) -> &'static str {
        "HEADER"
    }

    fn dump(&self, env: &mut DumpEnv<'_>, cursor: &mut Address) -> Result<(), DecodeError> {
        env.op_line(format_args!("HEADER"));
        env.descend();
        env.dump_object(cursor, ObjectClass::MatchType)?;
        env.dump_object(cursor, ObjectClass::Comparator)?;
        env.dump_string(cursor, "field")?;
        env.dump_string(cursor, "key")?;
        env.ascend();
        Ok(())
    }

    fn execute(&self, env: &mut RuntimeEnv<'_>, cursor: &mut Address) -> Result<(), Trap> {
        let match_type = env.read_object(cursor, ObjectClass::MatchType)?;
        let comparator = env.read_object(cursor, ObjectClass::Comparator)?;
        let field = env.read_string(cursor)?;
        let key = env.read_string(cursor)?;

        let Ok(field) = std::str::from_utf8(field) else {
            return Err(env.fail("header field name is not UTF-8"));
        };
        let fold = match comparator.def.identifier() {
            "i;octet" => false,
            "i;ascii-casemap" => true,
            other => return Err(env.fail(format!("unsupported comparator {other}"))),
        };
        let matcher: fn(&[u8], &[u8]) -> bool = match match_type.def.identifier() {
            "is" => is,
            "contains" => contains,
            "matches" => glob,
            other => return Err(env.fail(format!("unsupported match type {other}"))),
        };

        let key = fold_case(key, fold);
        let hit = env.message().downcast_ref::<Message>().is_some_and(|m| {
            m.header(field)
                .any(|v| matcher(&fold_case(v.as_bytes(), fold), &key))
        });
        tracing::trace!(field, hit, "header test");
        env.set_test_result(hit);
        Ok(())
    }
}

fn fold_case(s: &[u8], fold: bool) -> Vec<u8> {
    if fold {
        s.to_ascii_lowercase()
    } else {
        s.to_vec()
    }
}

fn is(value: &[u8], key: &[u8]) -> bool {
    value == key
}

fn contains(value: &[u8], key: &[u8]) -> bool {
    key.is_empty() || value.windows(key.len()).any(|w| w == key)
}

/// `*` matches any run of bytes, `?` any single byte, `\` escapes the next byte.
fn glob(value: &[u8], pattern: &[u8]) -> bool {
    let (mut v, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p).copied() {
            Some(b'*') => {
                p += 1;
                backtrack = Some((p, v));
                continue;
            }
            Some(b'?') => {
                p += 1;
                v += 1;
                continue;
            }
            Some(b'\\') if pattern.get(p + 1) == Some(&value[v]) => {
                p += 2;
                v += 1;
                continue;
            }
            Some(c) if c != b'\\' && c == value[v] => {
                p += 1;
                v += 1;
                continue;
            }
            _ => {}
        }
        let Some((bp, bv)) = backtrack else {
            return false;
        };
        p = bp;
        v = bv + 1;
        backtrack = Some((bp, bv + 1));
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

static FILEINTO: FileIntoOp = FileIntoOp;
static FILEINTO_OPS: [&dyn Operation; 1] = [&FILEINTO];

static HEADER: HeaderOp = HeaderOp;
static HEADER_OPS: [&dyn Operation; 1] = [&HEADER];

static SEEN: CoreObject = CoreObject { identifier: "seen" };
static FLAGGED: CoreObject = CoreObject {
    identifier: "flagged",
};
static ANSWERED: CoreObject = CoreObject {
    identifier: "answered",
};
static DELETED: CoreObject = CoreObject {
    identifier: "deleted",
};
static FLAGS: [&dyn ObjectDef; 4] = [&SEEN, &FLAGGED, &ANSWERED, &DELETED];

struct FileInto;

impl Extension for FileInto {
    fn name(&self) -> &str {
        "fileinto"
    }

    fn operations(&self) -> &[&'static dyn Operation] {
        &FILEINTO_OPS
    }
}

struct Imap4Flags;

impl Extension for Imap4Flags {
    fn name(&self) -> &str {
        "imap4flags"
    }

    fn objects(&self, class: ObjectClass) -> &[&'static dyn ObjectDef] {
        match class {
            ObjectClass::SideEffect => &FLAGS,
            _ => &[],
        }
    }
}

struct Header;

impl Extension for Header {
    fn name(&self) -> &str {
        "header"
    }

    fn operations(&self) -> &[&'static dyn Operation] {
        &HEADER_OPS
    }
}

/// Registry with every extension the tool ships.
pub(crate) fn registry() -> Result<ExtensionRegistry, RegistryError> {
    let mut registry = ExtensionRegistry::new();
    let all: [Arc<dyn Extension>; 3] = [Arc::new(FileInto), Arc::new(Imap4Flags), Arc::new(Header)];
    for ext in all {
        registry.register(ext)?;
    }
    Ok(registry)
}
