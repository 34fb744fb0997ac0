// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The durable JSONL record type. Distinct from
//! [`crate::message::ChatMessage`]: `PersistedRecord` is what actually lands
//! on disk, one per line of a course file, and it carries an `unknown`
//! catch-all so that a future record kind never breaks restore of an older
//! log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CallId, GenSeq};

/// One line of a course's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistedRecord {
    AgentThought {
        content: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    AgentWords {
        content: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    UiOnlyMarkdown {
        content: String,
        at: DateTime<Utc>,
    },
    HumanText {
        content: String,
        at: DateTime<Utc>,
    },
    FuncCall {
        call_id: CallId,
        name: String,
        arguments: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    FuncResult {
        call_id: CallId,
        content: String,
        is_error: bool,
        at: DateTime<Utc>,
    },
    WebSearchCall {
        call_id: CallId,
        query: String,
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    TeammateCallResult {
        call_id: CallId,
        responder_id: String,
        content: String,
        at: DateTime<Utc>,
    },
    TeammateResponse {
        response_id: String,
        call_id: CallId,
        content: String,
        at: DateTime<Utc>,
    },
    TeammateCallAnchor {
        call_id: CallId,
        callee_agent_id: String,
        session_slug: String,
        at: DateTime<Utc>,
    },
    QuestForSup {
        question: String,
        call_id: CallId,
        at: DateTime<Utc>,
    },
    GenStart {
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    GenFinish {
        genseq: GenSeq,
        at: DateTime<Utc>,
    },
    /// A record tag this build does not recognize. `#[serde(other)]` on an
    /// internally-tagged enum only admits a fieldless variant, so the
    /// payload is not recoverable: the line deserializes without erroring,
    /// but its content is gone and restore drops it.
    #[serde(other)]
    Unknown,
}

impl PersistedRecord {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            PersistedRecord::AgentThought { at, .. }
            | PersistedRecord::AgentWords { at, .. }
            | PersistedRecord::UiOnlyMarkdown { at, .. }
            | PersistedRecord::HumanText { at, .. }
            | PersistedRecord::FuncCall { at, .. }
            | PersistedRecord::FuncResult { at, .. }
            | PersistedRecord::WebSearchCall { at, .. }
            | PersistedRecord::TeammateCallResult { at, .. }
            | PersistedRecord::TeammateResponse { at, .. }
            | PersistedRecord::TeammateCallAnchor { at, .. }
            | PersistedRecord::QuestForSup { at, .. }
            | PersistedRecord::GenStart { at, .. }
            | PersistedRecord::GenFinish { at, .. } => Some(*at),
            PersistedRecord::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PersistedRecord::Unknown)
    }

    /// Parse a single JSONL line. A malformed line (not even valid JSON) is
    /// distinguished from a recognized-but-unknown tag so callers can log the
    /// former as a data integrity concern and the latter as routine forward
    /// compatibility.
    pub fn from_line(line: &str) -> Result<PersistedRecord, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Raw JSON form kept around for tooling that needs to inspect a record
/// without committing to this build's enum shape (e.g. a log-tail viewer).
pub fn parse_raw(line: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn round_trips_through_json() {
        let rec = PersistedRecord::AgentWords {
            content: "hello".into(),
            genseq: GenSeq(3),
            at: now(),
        };
        let line = rec.to_line().unwrap();
        let back = PersistedRecord::from_line(&line).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn unknown_tag_parses_without_error() {
        let line = r#"{"type":"from_the_future","whatever":1}"#;
        let rec = PersistedRecord::from_line(line).unwrap();
        assert!(rec.is_unknown());
        assert_eq!(rec.at(), None);
    }

    #[test]
    fn garbage_json_is_a_parse_error_not_unknown() {
        let line = "not json at all";
        assert!(PersistedRecord::from_line(line).is_err());
    }

    #[test]
    fn teammate_call_anchor_round_trips() {
        let rec = PersistedRecord::TeammateCallAnchor {
            call_id: "c1".into(),
            callee_agent_id: "pangu".into(),
            session_slug: "research".into(),
            at: now(),
        };
        let line = rec.to_line().unwrap();
        assert_eq!(PersistedRecord::from_line(&line).unwrap(), rec);
    }
}
