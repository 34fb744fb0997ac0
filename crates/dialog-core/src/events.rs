// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The wire event contract: every dialog publishes this enum through its
//! `EventChannel`. Variant names match the `*_evt` identifiers a
//! UI/gateway consumer expects, so it can map one-to-one.

use chrono::{DateTime, Utc};
use dialog_model::{Course, GenSeq};

#[derive(Debug, Clone)]
pub enum DialogEvent {
    MarkdownStart { genseq: GenSeq },
    MarkdownChunk { genseq: GenSeq, text: String },
    MarkdownFinish { genseq: GenSeq },
    ThinkingStart { genseq: GenSeq },
    ThinkingChunk { genseq: GenSeq, text: String },
    ThinkingFinish { genseq: GenSeq },
    FuncCallRequested { call_id: String, name: String, arguments: String },
    FuncResult { call_id: String, content: String, is_error: bool },
    TeammateCallStart { call_id: String, call_name: String, target_agent_id: String },
    TeammateCallResponse { call_id: String, subdialog_id: String },
    TeammateResponse { call_id: String, subdialog_id: String, content: String },
    SubdialogCreated { subdialog_id: String, target_agent_id: String },
    CourseUpdate { course: Course },
    GeneratingStart { genseq: GenSeq, at: DateTime<Utc> },
    GeneratingFinish { genseq: GenSeq, context_health: ContextHealth, model_id: String },
    ContextHealth(ContextHealth),
    WebSearchCall { call_id: String, query: String },
    StreamError { detail: String },
    EndOfUserSaying,
    Q4hAnswered { id: String },
    FullRemindersUpdate { reminders: Vec<String> },
    ProblemUpserted { key: String, class: String, message: String },
    ProblemRemoved { key: String },
}

/// `context_health_evt` payload, computed the way
/// `Session::context_fraction`/`is_near_limit` do it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextHealth {
    pub token_count: usize,
    pub max_tokens: usize,
    pub near_limit: bool,
}

impl ContextHealth {
    pub const NEAR_LIMIT_THRESHOLD: f32 = 0.85;

    pub fn compute(token_count: usize, max_tokens: usize) -> Self {
        let fraction = if max_tokens == 0 {
            0.0
        } else {
            token_count as f32 / max_tokens as f32
        };
        Self {
            token_count,
            max_tokens,
            near_limit: fraction >= Self::NEAR_LIMIT_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_health_flags_near_limit() {
        let h = ContextHealth::compute(900, 1000);
        assert!(h.near_limit);
    }

    #[test]
    fn context_health_not_near_limit_below_threshold() {
        let h = ContextHealth::compute(100, 1000);
        assert!(!h.near_limit);
    }

    #[test]
    fn context_health_zero_max_tokens_is_not_near_limit() {
        let h = ContextHealth::compute(5, 0);
        assert!(!h.near_limit);
    }
}
