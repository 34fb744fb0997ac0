// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Human questions and subdialog bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, Course};

/// A pending human-input request. At most one may be pending per dialog
/// (invariant enforced by `dialog-persist`'s `WriteBackBuffer`, not here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanQuestion {
    pub id: String,
    pub mention_list: Vec<String>,
    pub tellask_content: String,
    pub asked_at: DateTime<Utc>,
    pub call_id: Option<CallId>,
    pub call_site_ref: CallSiteRef,
}

/// Where in the transcript a question (or call) originated, for UI
/// highlighting on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteRef {
    pub course: Course,
    pub message_index: usize,
}

/// Which of the three subdialog call shapes produced a given subdialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallName {
    Tellask,
    TellaskSessionless,
    FreshBootsReasoning,
}

/// The coordinator-level classification of a subdialog call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// `tellaskSessionless`: one-shot fan-out, no registry entry.
    A,
    /// `tellask` with a `sessionSlug`: registry-tracked, reused while alive.
    B,
    /// `freshBootsReasoning`: self-tellask side branch, tool-calling
    /// disabled.
    C,
}

/// A subdialog call that has been dispatched but not yet resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubdialog {
    pub subdialog_id: String,
    pub created_at: DateTime<Utc>,
    pub call_name: CallName,
    pub mention_list: Option<Vec<String>>,
    pub tellask_content: String,
    pub target_agent_id: String,
    pub call_id: CallId,
    pub calling_course: Option<Course>,
    pub call_type: CallType,
    pub session_slug: Option<String>,
}

/// The call that spawned a subdialog, carried in the child's own metadata
/// so a later `tellaskBack` can build a `SubdialogResponse` without needing
/// to read anything out of the parent's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnInfo {
    pub call_id: CallId,
    pub call_type: CallType,
    pub call_name: CallName,
    pub tellask_content: String,
    pub origin_member_id: String,
    pub mention_list: Option<Vec<String>>,
}

/// Terminal outcome of a resolved subdialog call, enqueued onto the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdialogResponseStatus {
    Completed,
    Failed,
    Dead,
}

/// A finished subdialog's reply, queued for the parent to mirror into its
/// transcript on its next `take`/`commit` cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdialogResponse {
    pub response_id: String,
    pub subdialog_id: String,
    pub response: String,
    pub completed_at: DateTime<Utc>,
    pub status: SubdialogResponseStatus,
    pub call_type: CallType,
    pub call_name: CallName,
    pub mention_list: Option<Vec<String>>,
    pub tellask_content: String,
    pub responder_id: String,
    pub origin_member_id: String,
    pub call_id: CallId,
}
