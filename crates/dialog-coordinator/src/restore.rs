// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Restore: rebuild a dialog's in-memory [`ChatMessage`] transcript from
//! its durable `PersistedRecord` log, then recurse down into its
//! subdialogs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dialog_core::Dialog;
use dialog_model::{ChatMessage, Course, DialogId, PersistedRecord};
use dialog_persist::{DialogPersistence, LogStore};
use tracing::warn;

use crate::layout::{DialogTreeStatus, WorkspaceLayout};
use crate::registry::DialogRegistry;

/// Maps one durable record to its transcript equivalent. Control events
/// (`gen_start`/`gen_finish`/`quest_for_sup`/`teammate_call_anchor`/
/// `web_search_call`) and bookkeeping-only `teammate_response` entries carry
/// no transcript-visible content and map to `None`.
fn record_to_message(record: PersistedRecord) -> Option<ChatMessage> {
    match record {
        PersistedRecord::AgentThought { content, genseq, at } => {
            Some(ChatMessage::Thinking { content, genseq, at })
        }
        PersistedRecord::AgentWords { content, genseq, at } => {
            Some(ChatMessage::Saying { content, genseq, at })
        }
        PersistedRecord::UiOnlyMarkdown { content, at } => Some(ChatMessage::UiOnly { content, at }),
        PersistedRecord::HumanText { content, at } => Some(ChatMessage::Prompting { content, at }),
        PersistedRecord::FuncCall {
            call_id,
            name,
            arguments,
            genseq,
            at,
        } => Some(ChatMessage::FuncCall {
            call_id,
            name,
            arguments,
            genseq,
            at,
        }),
        PersistedRecord::FuncResult {
            call_id,
            content,
            is_error,
            at,
        } => Some(ChatMessage::FuncResult {
            call_id,
            content,
            is_error,
            at,
        }),
        PersistedRecord::TeammateCallResult {
            call_id,
            responder_id,
            content,
            at,
        } => Some(ChatMessage::TellaskResult {
            responder_id,
            tellask_content: String::new(),
            content,
            call_id,
            at,
        }),
        // Bookkeeping only: the mirrored reply already landed as a
        // TeammateCallResult in the same append batch (see
        // `coordinator::mirror_responses`).
        PersistedRecord::TeammateResponse { .. } => None,
        PersistedRecord::WebSearchCall { .. }
        | PersistedRecord::TeammateCallAnchor { .. }
        | PersistedRecord::QuestForSup { .. }
        | PersistedRecord::GenStart { .. }
        | PersistedRecord::GenFinish { .. } => None,
        PersistedRecord::Unknown => {
            warn!("skipping unrecognized persisted record during restore");
            None
        }
    }
}

/// Rebuilds the transcript from `current_course`'s own log only. Earlier
/// courses are not replayed into the live transcript; a restored dialog's
/// continuity with them comes from its condensed `course_prefix`, not from
/// reconstructing their messages.
pub async fn rebuild_transcript(
    log_store: &LogStore,
    id: &DialogId,
    dir: &Path,
    current_course: Course,
) -> anyhow::Result<Vec<ChatMessage>> {
    let records = log_store.read(id, dir, current_course).await?;
    Ok(records.into_iter().filter_map(record_to_message).collect())
}

/// Instantiates one dialog (not its children) from its on-disk directory,
/// registers it, and returns the handle plus the directory it was loaded
/// from (callers recurse into `subdialogs/` themselves).
async fn restore_one(
    persistence: &DialogPersistence,
    log_store: &LogStore,
    registry: &DialogRegistry,
    id: DialogId,
    dir: PathBuf,
) -> anyhow::Result<Option<Arc<Dialog>>> {
    let Some(metadata) = persistence.read_metadata(&dir).await? else {
        return Ok(None);
    };
    let Some(latest) = persistence.read_latest(&dir).await? else {
        return Ok(None);
    };

    let mut dialog = Dialog::new(
        id.clone(),
        metadata.agent_id.clone(),
        latest.diligence_push_remaining_budget,
    );
    dialog.task_document_path = metadata.task_document_path.clone();
    let dialog = Arc::new(dialog);

    let transcript = rebuild_transcript(log_store, &id, &dir, latest.current_course).await?;
    let last_genseq = transcript
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Thinking { genseq, .. }
            | ChatMessage::Saying { genseq, .. }
            | ChatMessage::FuncCall { genseq, .. } => Some(*genseq),
            _ => None,
        })
        .max()
        .unwrap_or(dialog_model::GenSeq(0));
    let reminders = persistence.load_reminders(&dir).await?;
    let pending = persistence.load_pending_subdialogs(&dir).await?;

    {
        let mut state = dialog.acquire().await;
        state.transcript = transcript;
        state.reminders = reminders;
        state.current_course = latest.current_course;
        state.last_genseq = last_genseq;
        state.run_state = latest.run_state;
        state.diligence_push_remaining_budget = latest.diligence_push_remaining_budget;
        state.disable_diligence_push = metadata.disable_diligence_push;
        state.suppress_diligence_push = metadata.suppress_diligence_push;
        state.pending_subdialogs = pending.into_iter().map(|p| p.subdialog_id).collect();
        // TODO: course_prefix is not yet persisted anywhere, so a dialog
        // restored mid-lifetime starts with no carryover from courses
        // before the latest one.
    }

    registry.insert(dialog.clone());
    Ok(Some(dialog))
}

/// Restores a root dialog and every subdialog beneath it, depth-first.
/// Returns the handles for every dialog actually restored (root first).
pub async fn restore_dialog_hierarchy(
    persistence: &DialogPersistence,
    log_store: &LogStore,
    registry: &DialogRegistry,
    layout: &WorkspaceLayout,
    status: DialogTreeStatus,
    root_self_id: &str,
) -> anyhow::Result<Vec<Arc<Dialog>>> {
    let root_dir = layout.root_dialog_dir(status, root_self_id);
    let root_id = DialogId::root(root_self_id);
    let mut restored = Vec::new();

    let Some(root) = restore_one(persistence, log_store, registry, root_id, root_dir.clone()).await? else {
        return Ok(restored);
    };
    restored.push(root);

    let mut stack = vec![root_dir];
    while let Some(parent_dir) = stack.pop() {
        let subdialogs_dir = parent_dir.join("subdialogs");
        let mut entries = match tokio::fs::read_dir(&subdialogs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let child_dir = entry.path();
            let child_self_id = entry.file_name().to_string_lossy().into_owned();
            let child_id = DialogId::child(child_self_id, root_self_id);
            if let Some(child) =
                restore_one(persistence, log_store, registry, child_id, child_dir.clone()).await?
            {
                restored.push(child);
                stack.push(child_dir);
            }
        }
    }

    Ok(restored)
}
