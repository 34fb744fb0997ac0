// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `Latest`: the small per-dialog descriptor written
//! through `WriteBackBuffer` and read back on restore, plus the `RunState`
//! sum type it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::Course;

/// Why a dialog stopped making progress on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserStop,
    EmergencyStop,
}

/// Why a dialog is `interrupted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InterruptedReason {
    UserStop,
    EmergencyStop,
    ServerRestart,
    SystemStop { detail: String },
}

/// Why a dialog is `blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockedReason {
    NeedsHumanInput,
    WaitingForSubdialogs,
    NeedsHumanInputAndSubdialogs,
}

/// Why a dialog is `dead`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeadReason {
    DeclaredByUser,
    System { detail: String },
}

/// Terminal status once a dialog's course has truly ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Archived,
}

/// The dialog lifecycle sum type. A dialog with any
/// un-answered `HumanQuestion` must be in `Blocked`, `Interrupted`, `Dead`,
/// or `Terminal` after reconciliation — never `Proceeding` (invariant 5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunState {
    IdleWaitingUser,
    Proceeding,
    ProceedingStopRequested { reason: StopReason },
    Interrupted(InterruptedReason),
    Blocked(BlockedReason),
    Dead(DeadReason),
    Terminal { status: TerminalStatus },
}

impl RunState {
    /// Invariant 5: can a dialog with a pending `HumanQuestion` legally be in
    /// this state?
    pub fn permits_pending_question(&self) -> bool {
        matches!(
            self,
            RunState::Blocked(_) | RunState::Interrupted(_) | RunState::Dead(_) | RunState::Terminal { .. }
        )
    }

    pub fn is_proceeding(&self) -> bool {
        matches!(self, RunState::Proceeding)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, RunState::Dead(_))
    }
}

/// Overall lifecycle status of the dialog as a whole (coarser than
/// `RunState`, survives archival).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogStatus {
    Active,
    Completed,
    Archived,
}

/// The small per-dialog descriptor coalesced through `WriteBackBuffer` and
/// consulted on every drive decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latest {
    pub current_course: Course,
    pub last_modified: DateTime<Utc>,
    pub status: DialogStatus,
    pub generating: bool,
    pub needs_drive: bool,
    pub diligence_push_remaining_budget: u32,
    pub run_state: RunState,
}

impl Latest {
    pub fn new_idle(now: DateTime<Utc>, diligence_push_budget: u32) -> Self {
        Self {
            current_course: Course::FIRST,
            last_modified: now,
            status: DialogStatus::Active,
            generating: false,
            needs_drive: false,
            diligence_push_remaining_budget: diligence_push_budget,
            run_state: RunState::IdleWaitingUser,
        }
    }

    /// Apply a `Latest` write, enforcing invariant 6: `current_course` never
    /// moves backward, and `last_modified` always advances.
    pub fn apply(&mut self, mut patch: Latest) {
        if patch.current_course < self.current_course {
            patch.current_course = self.current_course;
        }
        *self = patch;
    }
}
