// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Result sink interface.
//!
//! The interpreter never performs delivery itself. Action operations (`keep`, `discard`,
//! `redirect`, and any extension actions) are handed to an embedder-provided [`ResultSink`]
//! together with the message being filtered.

use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;

use crate::object::ObjectRef;

/// A borrowed action argument.
///
/// Strings point straight into the program's code block.
#[derive(Copy, Clone, Debug)]
pub enum Operand<'a> {
    /// Unsigned integer.
    Number(u64),
    /// Byte string.
    String(&'a [u8]),
    /// Object reference (comparator, match type, ...).
    Object(ObjectRef<'a>),
}

impl Operand<'_> {
    /// Returns the payload of a string operand.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(s) => Some(*s),
            _ => None,
        }
    }

    /// Converts this borrowed view into an owned [`OwnedOperand`].
    ///
    /// Mainly intended for tests and simple sinks.
    #[must_use]
    pub fn to_owned_operand(&self) -> OwnedOperand {
        match *self {
            Self::Number(n) => OwnedOperand::Number(n),
            Self::String(s) => OwnedOperand::String(s.to_vec()),
            Self::Object(o) => OwnedOperand::Object(String::from(o.def.identifier())),
        }
    }
}

/// Owned counterpart of [`Operand`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedOperand {
    /// Unsigned integer.
    Number(u64),
    /// Byte string.
    String(Vec<u8>),
    /// Object identifier.
    Object(String),
}

/// A side effect attached to an action (e.g. "mark as seen").
#[derive(Copy, Clone, Debug)]
pub struct SideEffect<'a> {
    /// Name of the extension that contributed the side effect.
    pub extension: &'a str,
    /// The side-effect object.
    pub object: ObjectRef<'a>,
}

/// One action handed to a [`ResultSink`].
#[derive(Copy, Clone, Debug)]
pub struct ActionRequest<'a> {
    /// Action name (`"keep"`, `"discard"`, `"redirect"`, or an extension action).
    pub action: &'a str,
    /// Action arguments in encoding order.
    pub args: &'a [Operand<'a>],
    /// Side effects attached to the action.
    pub side_effects: &'a [SideEffect<'a>],
    /// Script line of the operation, if the program carries a line table.
    pub source_line: Option<u32>,
}

impl ActionRequest<'_> {
    /// Copies the request into an owned [`RecordedAction`].
    #[must_use]
    pub fn record(&self) -> RecordedAction {
        RecordedAction {
            action: String::from(self.action),
            args: self.args.iter().map(Operand::to_owned_operand).collect(),
            side_effects: self
                .side_effects
                .iter()
                .map(|s| {
                    let mut id = String::from(s.extension);
                    id.push(':');
                    id.push_str(s.object.def.identifier());
                    id
                })
                .collect(),
            source_line: self.source_line,
        }
    }
}

/// Owned copy of an [`ActionRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedAction {
    /// Action name.
    pub action: String,
    /// Owned arguments.
    pub args: Vec<OwnedOperand>,
    /// Side effects as `extension:identifier`.
    pub side_effects: Vec<String>,
    /// Script line, if known.
    pub source_line: Option<u32>,
}

/// How the sink handled an action.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action was accepted.
    Ok,
    /// The action failed, but the run continues.
    ///
    /// The interpreter counts these in [`RunReport::soft_failures`](crate::interp::RunReport).
    SoftFail,
    /// The action failed and the run must abort.
    HardFail,
}

/// Receives the actions a run produces.
pub trait ResultSink {
    /// Records one action for `message`.
    fn add_action(&mut self, message: &dyn Any, request: &ActionRequest<'_>) -> ActionStatus;
}

/// A [`ResultSink`] that accepts and records every action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionLog {
    /// Recorded actions, in execution order.
    pub actions: Vec<RecordedAction>,
}

impl ActionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Action names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.iter().map(|a| a.action.as_str())
    }
}

impl ResultSink for ActionLog {
    fn add_action(&mut self, _message: &dyn Any, request: &ActionRequest<'_>) -> ActionStatus {
        self.actions.push(request.record());
        ActionStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtIndex;
    use crate::object::{COMPARATOR_OCTET, CoreObject};

    static SEEN: CoreObject = CoreObject { identifier: "seen" };

    #[test]
    fn record_copies_everything() {
        let args = [
            Operand::String(b"a@example.org"),
            Operand::Number(7),
            Operand::Object(ObjectRef {
                extension: None,
                code: 0,
                def: &COMPARATOR_OCTET,
            }),
        ];
        let side_effects = [SideEffect {
            extension: "imap4flags",
            object: ObjectRef {
                extension: Some(ExtIndex(0)),
                code: 0,
                def: &SEEN,
            },
        }];
        let req = ActionRequest {
            action: "redirect",
            args: &args,
            side_effects: &side_effects,
            source_line: Some(3),
        };

        let mut log = ActionLog::new();
        assert_eq!(log.add_action(&(), &req), ActionStatus::Ok);
        assert_eq!(
            log.actions,
            [RecordedAction {
                action: "redirect".into(),
                args: alloc::vec![
                    OwnedOperand::String(b"a@example.org".to_vec()),
                    OwnedOperand::Number(7),
                    OwnedOperand::Object("i;octet".into()),
                ],
                side_effects: alloc::vec!["imap4flags:seen".into()],
                source_line: Some(3),
            }]
        );
        assert_eq!(log.names().collect::<Vec<_>>(), ["redirect"]);
    }
}
