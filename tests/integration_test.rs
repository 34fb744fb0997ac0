// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests composing `dialog-core`'s [`Driver`] with
//! `dialog-coordinator`'s [`Coordinator`] and reconciler over a real temp
//! workspace, without any running process or network access.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dialog_core::{Dialog, Driver, DriveInput, DriverConfig, DriveOutcome, TeammateCallName, TeammateCallRequest};
use dialog_coordinator::{
    reconcile_workspace, Coordinator, DialogRegistry, DialogTreeStatus, DispatchOutcome,
    WorkspaceLayout,
};
use dialog_model::mock::{ScriptedProvider, ScriptedTurn};
use dialog_model::{
    BlockedReason, CallName, CallType, ChatMessage, DeadReason, DialogId, InterruptedReason,
    ResponseEvent, RunState, SubdialogResponse, SubdialogResponseStatus,
};
use dialog_persist::{DialogMetadata, DialogPersistence, LogStore};
use dialog_tools::ToolRegistry;
use tempfile::TempDir;

fn metadata(id: DialogId, agent_id: &str, parent_self_id: Option<&str>) -> DialogMetadata {
    DialogMetadata {
        id,
        agent_id: agent_id.to_string(),
        task_document_path: None,
        created_at: Utc::now(),
        disable_diligence_push: false,
        suppress_diligence_push: false,
        parent_self_id: parent_self_id.map(str::to_string),
        spawn: None,
    }
}

fn driver_for(
    provider: ScriptedProvider,
    log_store: &Arc<LogStore>,
    persistence: &Arc<DialogPersistence>,
) -> Driver {
    Driver::new(
        Arc::new(provider),
        Arc::new(ToolRegistry::new()),
        log_store.clone(),
        persistence.clone(),
        DriverConfig::default(),
    )
}

/// Scenario: a basic `tellaskSessionless` roundtrip. The parent suspends on
/// a teammate call, the coordinator spawns and drives the child, the
/// child's reply is mirrored back, and only then does the parent resume
/// and speak again.
///
/// Also covers the ordering invariant: the mirrored `tellask_result_msg`
/// must land in the parent's transcript strictly before the assistant
/// saying produced by the resumed drive.
#[tokio::test]
async fn tellask_sessionless_roundtrip_orders_before_resume() {
    let workspace = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(workspace.path());
    let persistence = Arc::new(DialogPersistence::new());
    let log_store = Arc::new(LogStore::new(workspace.path()));
    let registry = Arc::new(DialogRegistry::new());
    let coordinator = Coordinator::new(registry.clone(), persistence.clone(), log_store.clone(), 3);

    let parent_dir = layout.root_dialog_dir(DialogTreeStatus::Active, "parent");
    tokio::fs::create_dir_all(&parent_dir).await.unwrap();
    let parent = Arc::new(Dialog::new(DialogId::root("parent"), "pangu", 3));
    registry.insert(parent.clone());
    persistence
        .write_metadata(&parent_dir, &metadata(DialogId::root("parent"), "pangu", None))
        .await
        .unwrap();

    let parent_provider = ScriptedProvider::tool_then_text(
        "c1",
        "tellask_sessionless",
        r#"{"agentId":"fengshen","tellaskContent":"Please compute 1+1.\nReturn only the number."}"#,
        "Ack: 2",
    );
    let parent_driver = driver_for(parent_provider, &log_store, &persistence);

    let outcome = parent_driver
        .drive(
            &parent,
            &parent_dir,
            DriveInput::user("compute 1+1, reply with only the number"),
        )
        .await
        .unwrap();
    let calls = match outcome {
        DriveOutcome::Suspended(calls) => calls,
        other => panic!("expected Suspended, got {other:?}"),
    };
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call_name, TeammateCallName::TellaskSessionless);

    let dispatch = coordinator
        .dispatch(
            &parent,
            &parent_dir,
            |id| layout.child_dialog_dir(&parent_dir, id),
            &calls[0],
        )
        .await
        .unwrap();
    let child_id = match dispatch {
        DispatchOutcome::SubdialogSpawned { child_id, reused } => {
            assert!(!reused);
            child_id
        }
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    };
    let child_dir = layout.child_dialog_dir(&parent_dir, &child_id.self_id);
    let child = registry.get(&child_id).unwrap();

    let child_driver = driver_for(ScriptedProvider::always_text("2"), &log_store, &persistence);
    let child_outcome = child_driver
        .drive(
            &child,
            &child_dir,
            DriveInput::user("Please compute 1+1.\nReturn only the number."),
        )
        .await
        .unwrap();
    assert!(matches!(child_outcome, DriveOutcome::Quiet));

    coordinator
        .deliver_response(
            &parent,
            &parent_dir,
            SubdialogResponse {
                response_id: "r1".into(),
                subdialog_id: child_id.self_id.clone(),
                response: "2".into(),
                completed_at: Utc::now(),
                status: SubdialogResponseStatus::Completed,
                call_type: CallType::A,
                call_name: CallName::TellaskSessionless,
                mention_list: None,
                tellask_content: "Please compute 1+1.\nReturn only the number.".into(),
                responder_id: "fengshen".into(),
                origin_member_id: "pangu".into(),
                call_id: calls[0].call_id.clone(),
            },
        )
        .await
        .unwrap();

    let tellask_index = {
        let state = parent.acquire().await;
        state
            .transcript
            .iter()
            .position(|m| matches!(m, ChatMessage::TellaskResult { content, .. } if content == "2"))
            .expect("tellask result should be mirrored into the parent transcript")
    };

    let resume_outcome = parent_driver
        .drive(&parent, &parent_dir, DriveInput::internal("continue"))
        .await
        .unwrap();
    assert!(matches!(resume_outcome, DriveOutcome::Quiet));

    let state = parent.acquire().await;
    let saying_index = state
        .transcript
        .iter()
        .position(|m| matches!(m, ChatMessage::Saying { content, .. } if content == "Ack: 2"))
        .expect("parent should resume and speak after the mirror");
    assert!(
        tellask_index < saying_index,
        "tellask_result_msg must precede the resumed saying"
    );
}

/// Scenario: nested deferral. Parent asks A; A asks B before replying; B's
/// answer only surfaces in A's own transcript and the parent's mirrored
/// reply, never A's intermediate remark.
#[tokio::test]
async fn nested_subdialog_deferral_only_mirrors_the_final_reply() {
    let workspace = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(workspace.path());
    let persistence = Arc::new(DialogPersistence::new());
    let log_store = Arc::new(LogStore::new(workspace.path()));
    let registry = Arc::new(DialogRegistry::new());
    let coordinator = Coordinator::new(registry.clone(), persistence.clone(), log_store.clone(), 3);

    let parent_dir = layout.root_dialog_dir(DialogTreeStatus::Active, "parent");
    tokio::fs::create_dir_all(&parent_dir).await.unwrap();
    let parent = Arc::new(Dialog::new(DialogId::root("parent"), "pangu", 3));
    registry.insert(parent.clone());
    persistence
        .write_metadata(&parent_dir, &metadata(DialogId::root("parent"), "pangu", None))
        .await
        .unwrap();

    let parent_driver = driver_for(
        ScriptedProvider::tool_then_text(
            "pc1",
            "tellask_sessionless",
            r#"{"agentId":"fengshen","tellaskContent":"look into the research question"}"#,
            "Ack: 2",
        ),
        &log_store,
        &persistence,
    );
    let outcome = parent_driver
        .drive(&parent, &parent_dir, DriveInput::user("kick off research"))
        .await
        .unwrap();
    let parent_calls = match outcome {
        DriveOutcome::Suspended(c) => c,
        other => panic!("expected Suspended, got {other:?}"),
    };

    let dispatch_a = coordinator
        .dispatch(
            &parent,
            &parent_dir,
            |id| layout.child_dialog_dir(&parent_dir, id),
            &parent_calls[0],
        )
        .await
        .unwrap();
    let a_id = match dispatch_a {
        DispatchOutcome::SubdialogSpawned { child_id, .. } => child_id,
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    };
    let a_dir = layout.child_dialog_dir(&parent_dir, &a_id.self_id);
    let a = registry.get(&a_id).unwrap();

    // A's first turn both remarks and defers to B in the same generation.
    let a_driver = driver_for(
        ScriptedProvider::from_turns(vec![
            ScriptedTurn::Events(vec![
                ResponseEvent::TextDelta("let me check with B first".into()),
                ResponseEvent::ToolCall {
                    id: "ac1".into(),
                    name: "tellask_sessionless".into(),
                    arguments: r#"{"agentId":"shu","tellaskContent":"what's 1+1?"}"#.into(),
                },
                ResponseEvent::Done,
            ]),
            ScriptedTurn::Events(vec![ResponseEvent::TextDelta("A-final: 2".into()), ResponseEvent::Done]),
        ]),
        &log_store,
        &persistence,
    );
    let a_outcome = a_driver
        .drive(&a, &a_dir, DriveInput::user("look into the research question"))
        .await
        .unwrap();
    let a_calls = match a_outcome {
        DriveOutcome::Suspended(c) => c,
        other => panic!("expected Suspended, got {other:?}"),
    };

    let dispatch_b = coordinator
        .dispatch(&a, &a_dir, |id| layout.child_dialog_dir(&a_dir, id), &a_calls[0])
        .await
        .unwrap();
    let b_id = match dispatch_b {
        DispatchOutcome::SubdialogSpawned { child_id, .. } => child_id,
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    };
    let b_dir = layout.child_dialog_dir(&a_dir, &b_id.self_id);
    let b = registry.get(&b_id).unwrap();

    tokio::time::sleep(Duration::from_millis(1800)).await;

    let b_driver = driver_for(ScriptedProvider::always_text("2"), &log_store, &persistence);
    let b_outcome = b_driver
        .drive(&b, &b_dir, DriveInput::user("what's 1+1?"))
        .await
        .unwrap();
    assert!(matches!(b_outcome, DriveOutcome::Quiet));

    coordinator
        .deliver_response(
            &a,
            &a_dir,
            SubdialogResponse {
                response_id: "rb".into(),
                subdialog_id: b_id.self_id.clone(),
                response: "2".into(),
                completed_at: Utc::now(),
                status: SubdialogResponseStatus::Completed,
                call_type: CallType::A,
                call_name: CallName::TellaskSessionless,
                mention_list: None,
                tellask_content: "what's 1+1?".into(),
                responder_id: "shu".into(),
                origin_member_id: "fengshen".into(),
                call_id: a_calls[0].call_id.clone(),
            },
        )
        .await
        .unwrap();

    let a_resume = a_driver
        .drive(&a, &a_dir, DriveInput::internal("continue"))
        .await
        .unwrap();
    assert!(matches!(a_resume, DriveOutcome::Quiet));

    coordinator
        .deliver_response(
            &parent,
            &parent_dir,
            SubdialogResponse {
                response_id: "ra".into(),
                subdialog_id: a_id.self_id.clone(),
                response: "A-final: 2".into(),
                completed_at: Utc::now(),
                status: SubdialogResponseStatus::Completed,
                call_type: CallType::A,
                call_name: CallName::TellaskSessionless,
                mention_list: None,
                tellask_content: "look into the research question".into(),
                responder_id: "fengshen".into(),
                origin_member_id: "pangu".into(),
                call_id: parent_calls[0].call_id.clone(),
            },
        )
        .await
        .unwrap();

    let tellask_index = {
        let state = parent.acquire().await;
        assert!(
            !state
                .transcript
                .iter()
                .any(|m| matches!(m, ChatMessage::Saying { content, .. } if content == "let me check with B first")),
            "A's intermediate saying must not leak into the parent"
        );
        state
            .transcript
            .iter()
            .position(|m| matches!(m, ChatMessage::TellaskResult { content, .. } if content == "A-final: 2"))
            .expect("A's final reply should be mirrored into the parent")
    };

    let resume = parent_driver
        .drive(&parent, &parent_dir, DriveInput::internal("continue"))
        .await
        .unwrap();
    assert!(matches!(resume, DriveOutcome::Quiet));

    let state = parent.acquire().await;
    let saying_index = state
        .transcript
        .iter()
        .position(|m| matches!(m, ChatMessage::Saying { content, .. } if content == "Ack: 2"))
        .expect("parent should resume and speak after A's final reply");
    assert!(tellask_index < saying_index);
}

/// Scenario: dead-slug reuse. Two type-B calls against the same
/// `(agentId, sessionSlug)` produce one child while it is alive; once it
/// is declared dead, the same slug spawns a second, distinct child, and
/// the registry follows the new one.
#[tokio::test]
async fn dead_type_b_slug_is_reused_into_a_fresh_child() {
    let workspace = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(workspace.path());
    let persistence = Arc::new(DialogPersistence::new());
    let log_store = Arc::new(LogStore::new(workspace.path()));
    let registry = Arc::new(DialogRegistry::new());
    let coordinator = Coordinator::new(registry.clone(), persistence.clone(), log_store.clone(), 3);

    let parent_dir = layout.root_dialog_dir(DialogTreeStatus::Active, "parent");
    tokio::fs::create_dir_all(&parent_dir).await.unwrap();
    let parent = Dialog::new(DialogId::root("parent"), "pangu", 3);

    let call = TeammateCallRequest {
        call_id: "c1".into(),
        call_name: TeammateCallName::Tellask,
        raw_arguments: r#"{"agentId":"pangu","tellaskContent":"start","sessionSlug":"dupe-session"}"#.into(),
    };
    let child_dir_for = |id: &str| layout.child_dialog_dir(&parent_dir, id);

    let first = coordinator
        .dispatch(&parent, &parent_dir, child_dir_for, &call)
        .await
        .unwrap();
    let first_id = match first {
        DispatchOutcome::SubdialogSpawned { child_id, reused } => {
            assert!(!reused);
            child_id
        }
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    };

    let second = coordinator
        .dispatch(&parent, &parent_dir, child_dir_for, &call)
        .await
        .unwrap();
    match second {
        DispatchOutcome::SubdialogSpawned { child_id, reused } => {
            assert!(reused);
            assert_eq!(child_id, first_id);
        }
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    }

    let subdialogs_dir = parent_dir.join("subdialogs");
    let count_children = || async {
        let mut n = 0usize;
        let mut entries = tokio::fs::read_dir(&subdialogs_dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_type().await.unwrap().is_dir() {
                n += 1;
            }
        }
        n
    };
    assert_eq!(count_children().await, 1);

    let first_dir = layout.child_dialog_dir(&parent_dir, &first_id.self_id);
    let mut latest = persistence.read_latest(&first_dir).await.unwrap().unwrap();
    latest.run_state = RunState::Dead(DeadReason::DeclaredByUser);
    persistence.write_latest(&first_dir, latest).await.unwrap();

    let third = coordinator
        .dispatch(&parent, &parent_dir, child_dir_for, &call)
        .await
        .unwrap();
    let third_id = match third {
        DispatchOutcome::SubdialogSpawned { child_id, reused } => {
            assert!(!reused);
            child_id
        }
        other => panic!("expected SubdialogSpawned, got {other:?}"),
    };
    assert_ne!(third_id, first_id);
    assert_eq!(count_children().await, 2);

    let subdialog_registry = persistence.load_registry(&parent_dir).await.unwrap();
    assert_eq!(
        subdialog_registry.lookup("pangu", "dupe-session"),
        Some(third_id.self_id.as_str())
    );
}

/// Scenario: crash reconciliation. Two dialogs are staged on disk as
/// `proceeding` with `generating = true`, one with a pending question and
/// one without; reconciling the workspace downgrades both out of
/// `proceeding`, differentiating on whether a question is outstanding.
#[tokio::test]
async fn workspace_reconciliation_downgrades_stale_proceeding_dialogs() {
    let workspace = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(workspace.path());
    let persistence = DialogPersistence::new();
    let status_dir = layout.status_dir(DialogTreeStatus::Active);

    let dir_a = status_dir.join("dialog-a");
    let dir_b = status_dir.join("dialog-b");
    tokio::fs::create_dir_all(&dir_a).await.unwrap();
    tokio::fs::create_dir_all(&dir_b).await.unwrap();

    for (dir, self_id) in [(&dir_a, "dialog-a"), (&dir_b, "dialog-b")] {
        persistence
            .write_metadata(dir, &metadata(DialogId::root(self_id), "pangu", None))
            .await
            .unwrap();
        let mut latest = dialog_model::Latest::new_idle(Utc::now(), 3);
        latest.run_state = RunState::Proceeding;
        latest.generating = true;
        persistence.write_latest(dir, latest).await.unwrap();
    }

    persistence
        .append_human_question(
            &dir_b,
            dialog_model::HumanQuestion {
                id: "q1".into(),
                mention_list: vec![],
                tellask_content: "which branch?".into(),
                asked_at: Utc::now(),
                call_id: None,
                call_site_ref: dialog_model::CallSiteRef {
                    course: dialog_model::Course::FIRST,
                    message_index: 0,
                },
            },
        )
        .await
        .unwrap();

    let summary = reconcile_workspace(&persistence, &status_dir).await.unwrap();
    assert_eq!(summary.dialogs_scanned, 2);
    assert_eq!(summary.downgraded_to_interrupted, 1);
    assert_eq!(summary.downgraded_to_blocked, 1);

    let latest_a = persistence.read_latest(&dir_a).await.unwrap().unwrap();
    assert_eq!(
        latest_a.run_state,
        RunState::Interrupted(InterruptedReason::ServerRestart)
    );
    assert!(!latest_a.generating);

    let latest_b = persistence.read_latest(&dir_b).await.unwrap().unwrap();
    assert_eq!(
        latest_b.run_state,
        RunState::Blocked(BlockedReason::NeedsHumanInput)
    );
    assert!(!latest_b.generating);
}

/// Scenario: internal drives never leak into the persisted transcript or
/// course log. A priming drive runs with `PersistMode::Internal`, then a
/// normal drive follows; only the normal drive's input shows up as a
/// `human_text_record`, and the priming content never reaches the second
/// drive's LLM request.
#[tokio::test]
async fn internal_drive_never_leaks_into_persisted_state_or_next_context() {
    let workspace = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(workspace.path());
    let persistence = Arc::new(DialogPersistence::new());
    let log_store = Arc::new(LogStore::new(workspace.path()));
    let dialog_dir = layout.root_dialog_dir(DialogTreeStatus::Active, "d1");
    tokio::fs::create_dir_all(&dialog_dir).await.unwrap();
    let dialog = Dialog::new(DialogId::root("d1"), "pangu", 3);

    let provider = Arc::new(ScriptedProvider::always_text("noted"));
    let driver = Driver::new(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        log_store.clone(),
        persistence.clone(),
        DriverConfig::default(),
    );

    let priming_outcome = driver
        .drive(&dialog, &dialog_dir, DriveInput::internal("Priming context, ignore"))
        .await
        .unwrap();
    assert!(matches!(priming_outcome, DriveOutcome::Quiet));

    let provider2 = Arc::new(ScriptedProvider::always_text("status: on track"));
    let driver2 = Driver::new(
        provider2.clone(),
        Arc::new(ToolRegistry::new()),
        log_store.clone(),
        persistence.clone(),
        DriverConfig::default(),
    );
    let outcome = driver2
        .drive(&dialog, &dialog_dir, DriveInput::user("Continue with task status"))
        .await
        .unwrap();
    assert!(matches!(outcome, DriveOutcome::Quiet));

    let records = log_store
        .read(&DialogId::root("d1"), &dialog_dir, dialog_model::Course::FIRST)
        .await
        .unwrap();
    let human_texts: Vec<&String> = records
        .iter()
        .filter_map(|r| match r {
            dialog_model::PersistedRecord::HumanText { content, .. } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(human_texts.len(), 1);
    assert_eq!(human_texts[0], "Continue with task status");

    let last_request = provider2.last_request.lock().unwrap().clone().unwrap();
    assert!(
        !last_request
            .messages
            .iter()
            .any(|m| m.text.contains("Priming context")),
        "the internal priming drive's content must not reach a later drive's LLM context"
    );
}
