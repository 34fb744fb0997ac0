// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! RunState reconciler: at startup, downgrade any dialog left
//! `proceeding ∧ generating` by a crash to `interrupted`, and any dialog
//! with a pending question to `blocked` — this must hold before anything
//! else in the process touches these dialogs.

use std::path::Path;

use dialog_model::{BlockedReason, InterruptedReason, Latest, RunState};
use dialog_persist::DialogPersistence;
use tracing::info;

/// Tally of what reconciliation changed, logged once as a single
/// structured summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationSummary {
    pub dialogs_scanned: u32,
    pub downgraded_to_interrupted: u32,
    pub downgraded_to_blocked: u32,
}

/// Reconciles one dialog's `latest.yaml` in place. Returns `None` if the
/// dialog has no `latest.yaml` yet (nothing to reconcile).
pub async fn reconcile_dialog(
    persistence: &DialogPersistence,
    dir: &Path,
) -> anyhow::Result<Option<RunState>> {
    let Some(mut latest) = persistence.read_latest(dir).await? else {
        return Ok(None);
    };

    let was_crashed_mid_drive = matches!(latest.run_state, RunState::Proceeding) && latest.generating;
    if was_crashed_mid_drive {
        latest.run_state = RunState::Interrupted(InterruptedReason::ServerRestart);
        latest.generating = false;
    }

    let q4h = persistence.load_q4h(dir).await?;
    if !q4h.is_empty() {
        let pending = persistence.load_pending_subdialogs(dir).await?;
        latest.run_state = RunState::Blocked(if pending.is_empty() {
            BlockedReason::NeedsHumanInput
        } else {
            BlockedReason::NeedsHumanInputAndSubdialogs
        });
        latest.generating = false;
    }

    let final_state = latest.run_state.clone();
    persistence.write_latest(dir, latest).await?;
    Ok(Some(final_state))
}

/// Walks every dialog directory under `status_dir` (typically
/// `<workspaceRoot>/.dialogs/active`) and reconciles it, logging one
/// structured summary line at the end.
pub async fn reconcile_workspace(
    persistence: &DialogPersistence,
    status_dir: &Path,
) -> anyhow::Result<ReconciliationSummary> {
    let dirs = persistence.enumerate_dialogs(status_dir).await?;
    let mut summary = ReconciliationSummary::default();

    for dir in dirs {
        summary.dialogs_scanned += 1;
        let before = persistence.read_latest(&dir).await?;
        if let Some(after) = reconcile_dialog(persistence, &dir).await? {
            match (&before.map(|l| l.run_state), &after) {
                (Some(RunState::Proceeding), RunState::Interrupted(_)) => {
                    summary.downgraded_to_interrupted += 1;
                }
                (_, RunState::Blocked(_)) => summary.downgraded_to_blocked += 1,
                _ => {}
            }
        }
    }

    info!(
        dialogs_scanned = summary.dialogs_scanned,
        downgraded_to_interrupted = summary.downgraded_to_interrupted,
        downgraded_to_blocked = summary.downgraded_to_blocked,
        "startup reconciliation complete"
    );
    Ok(summary)
}
