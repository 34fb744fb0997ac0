// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The in-memory transcript: `ChatMessage` is what the
//! driver assembles into LLM context and what `dialog-coordinator`'s restore
//! logic rebuilds from durable `PersistedRecord`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, GenSeq};

/// One entry in a dialog's transcript, as consumed by context assembly.
///
/// This is a closed sum type with exhaustive matching throughout, unlike
/// `PersistedRecord`, which has an "unknown" catch-all variant —
/// it is produced only by `dialog-coordinator`'s restore mapping, which is
/// itself responsible for skipping unknown persisted tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    /// The initial or injected user prompt for a generation.
    Prompting { content: String, at: DateTime<Utc> },
    /// Assistant reasoning/thinking content (not shown to the user directly).
    Thinking {
        content: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    /// Assistant prose output.
    Saying {
        content: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    /// A tool/function call the assistant requested.
    FuncCall {
        call_id: CallId,
        name: String,
        arguments: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    /// The result of executing a `FuncCall`.
    FuncResult {
        call_id: CallId,
        content: String,
        is_error: bool,
        at: DateTime<Utc>,
    },
    /// A reply from a subdialog mirrored into the caller's transcript.
    TellaskResult {
        responder_id: String,
        tellask_content: String,
        content: String,
        call_id: CallId,
        at: DateTime<Utc>,
    },
    /// Rendered markdown shown to a UI but never sent back to the model.
    UiOnly { content: String, at: DateTime<Utc> },
    /// System-injected environment context (reminders tail, language guide).
    Environment { content: String, at: DateTime<Utc> },
    /// The language/behavior guide appended after reminders.
    Guide { content: String, at: DateTime<Utc> },
}

impl ChatMessage {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ChatMessage::Prompting { at, .. }
            | ChatMessage::Thinking { at, .. }
            | ChatMessage::Saying { at, .. }
            | ChatMessage::FuncCall { at, .. }
            | ChatMessage::FuncResult { at, .. }
            | ChatMessage::TellaskResult { at, .. }
            | ChatMessage::UiOnly { at, .. }
            | ChatMessage::Environment { at, .. }
            | ChatMessage::Guide { at, .. } => *at,
        }
    }

    /// Whether this variant is a "user-like" anchor for reminder placement
    /// during context assembly.
    pub fn is_user_like(&self) -> bool {
        matches!(
            self,
            ChatMessage::Prompting { .. } | ChatMessage::TellaskResult { .. }
        )
    }

    /// Approximate token cost, used by the driver's budget gate.
    pub fn approx_tokens(&self) -> usize {
        let len = match self {
            ChatMessage::Prompting { content, .. }
            | ChatMessage::Thinking { content, .. }
            | ChatMessage::Saying { content, .. }
            | ChatMessage::UiOnly { content, .. }
            | ChatMessage::Environment { content, .. }
            | ChatMessage::Guide { content, .. } => content.len(),
            ChatMessage::FuncCall {
                name, arguments, ..
            } => name.len() + arguments.len(),
            ChatMessage::FuncResult { content, .. } => content.len(),
            ChatMessage::TellaskResult {
                tellask_content,
                content,
                ..
            } => tellask_content.len() + content.len(),
        };
        (len / 4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn prompting_and_tellask_result_are_user_like() {
        let p = ChatMessage::Prompting {
            content: "hi".into(),
            at: now(),
        };
        assert!(p.is_user_like());

        let t = ChatMessage::TellaskResult {
            responder_id: "pangu".into(),
            tellask_content: "do x".into(),
            content: "done".into(),
            call_id: "c1".into(),
            at: now(),
        };
        assert!(t.is_user_like());
    }

    #[test]
    fn saying_is_not_user_like() {
        let s = ChatMessage::Saying {
            content: "ack".into(),
            genseq: GenSeq(1),
            at: now(),
        };
        assert!(!s.is_user_like());
    }

    #[test]
    fn approx_tokens_is_never_zero_for_nonempty_content() {
        let s = ChatMessage::Saying {
            content: "abc".into(),
            genseq: GenSeq(1),
            at: now(),
        };
        assert_eq!(s.approx_tokens(), 1);
    }
}
