// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Driver: drives one dialog through a single course of generation,
//! tool dispatch, and diligence auto-continue. The hardest single piece
//! of the system: context assembly order, the LLM retry wrapper, and the
//! handoff to `dialog-coordinator` for teammate calls all live here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dialog_model::{
    classify_anyhow_error, CallId, ChatMessage, CompletionRequest, DialogStatus, GenSeq,
    HumanQuestion, Latest, ModelProvider, PersistedRecord, ProviderErrorClass, ProviderMessage,
    ResponseEvent, RunState,
};
use dialog_persist::{DialogPersistence, LogStore};
use dialog_tools::{ToolCall as DialogToolCall, ToolRegistry};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::dialog::Dialog;
use crate::events::{ContextHealth, DialogEvent};

/// Whether a drive's messages land in the durable transcript or are
/// consumed once and forgotten. Internal drives, used for diligence
/// nudges and system-initiated turns, must never leak into the
/// persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    Persist,
    Internal,
}

/// What kicks off one drive loop.
#[derive(Debug, Clone)]
pub struct DriveInput {
    pub content: String,
    pub persist_mode: PersistMode,
}

impl DriveInput {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            persist_mode: PersistMode::Persist,
        }
    }

    pub fn internal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            persist_mode: PersistMode::Internal,
        }
    }
}

/// The three subdialog call shapes plus the two calls that never spawn a
/// subdialog: `askHuman` just raises a `HumanQuestion`,
/// `tellaskBack` replies into an already-open parent call rather than
/// opening a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeammateCallName {
    Tellask,
    TellaskSessionless,
    FreshBootsReasoning,
    AskHuman,
    TellaskBack,
}

impl TeammateCallName {
    /// Tool names the model is expected to call by, matching the registry's
    /// reserved call surface.
    fn from_tool_name(name: &str) -> Option<Self> {
        match name {
            "tellask" => Some(Self::Tellask),
            "tellask_sessionless" => Some(Self::TellaskSessionless),
            "fresh_boots_reasoning" => Some(Self::FreshBootsReasoning),
            "ask_human" => Some(Self::AskHuman),
            "tellask_back" => Some(Self::TellaskBack),
            _ => None,
        }
    }
}

/// A teammate-shaped call the driver could not resolve itself; handed to
/// `dialog-coordinator` for classification and dispatch.
#[derive(Debug, Clone)]
pub struct TeammateCallRequest {
    pub call_id: CallId,
    pub call_name: TeammateCallName,
    pub raw_arguments: String,
}

/// How one drive loop ended.
#[derive(Debug, Clone)]
pub enum DriveOutcome {
    /// The course ran to completion with no outstanding calls; the dialog
    /// is idle again.
    Quiet,
    /// One or more teammate calls need coordinator handling before this
    /// course can continue.
    Suspended(Vec<TeammateCallRequest>),
    /// The diligence push budget was exhausted, or a fatal provider error
    /// occurred; the dialog needs human attention.
    Blocked,
}

/// Tunables that would normally be loaded by `dialog-config`; defined here
/// (rather than depended on) to avoid a cycle between the two crates.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub max_retries: u32,
    pub max_iterations_per_drive: u32,
    pub diligence_text: String,
    pub prepended_context: Option<String>,
    pub memories: Vec<String>,
    pub language_guide: Option<String>,
    pub max_tokens: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_iterations_per_drive: 50,
            diligence_text: "Continue working toward the task. If nothing remains, say so.".into(),
            prepended_context: None,
            memories: Vec::new(),
            language_guide: None,
            max_tokens: 128_000,
        }
    }
}

const LLM_PROVIDER_REJECTED_KEY: &str = "llm_provider_rejected_request";

/// Drives dialogs by calling a [`ModelProvider`], dispatching tools through
/// a [`ToolRegistry`], and persisting every step through [`LogStore`] and
/// [`DialogPersistence`]. Stateless across calls: all mutable state lives
/// on the [`Dialog`] passed in.
pub struct Driver {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    log_store: Arc<LogStore>,
    persistence: Arc<DialogPersistence>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        log_store: Arc<LogStore>,
        persistence: Arc<DialogPersistence>,
        config: DriverConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            log_store,
            persistence,
            config,
        }
    }

    /// Run one course: acquire the dialog's mutex, push the input, loop
    /// generation/tool-dispatch/diligence until quiet, suspended on a
    /// teammate call, or blocked, then release. `dialog_dir` is the
    /// directory `dialog-persist` reads and writes this dialog's files in.
    pub async fn drive(
        &self,
        dlg: &Dialog,
        dialog_dir: &std::path::Path,
        input: DriveInput,
    ) -> anyhow::Result<DriveOutcome> {
        let task_document = match &dlg.task_document_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => Some(content),
                Err(error) => {
                    warn!(dialog = %dlg.id, path = %path.display(), %error, "failed to read task document");
                    None
                }
            },
            None => None,
        };

        let mut state = dlg.acquire().await;
        state.run_state = RunState::Proceeding;

        let course = state.current_course;
        // Tracked for future `CallSiteRef` construction when a question is
        // raised mid-course; unused until `dialog-coordinator` wires it up.
        let _ephemeral_index = if input.persist_mode == PersistMode::Persist {
            let idx = state.push_message(ChatMessage::Prompting {
                content: input.content.clone(),
                at: Utc::now(),
            });
            self.log_store
                .append(
                    &dlg.id,
                    dialog_dir,
                    course,
                    &PersistedRecord::HumanText {
                        content: input.content.clone(),
                        at: Utc::now(),
                    },
                )
                .await?;
            Some(idx)
        } else {
            None
        };

        let mut iterations = 0u32;
        let outcome = loop {
            iterations += 1;
            if iterations > self.config.max_iterations_per_drive {
                warn!(dialog = %dlg.id, iterations, "drive exceeded max iterations per course");
                break DriveOutcome::Blocked;
            }

            let genseq = state.next_genseq();
            dlg.publish(DialogEvent::GeneratingStart {
                genseq,
                at: Utc::now(),
            });

            let context = assemble_context(
                &state,
                &self.config,
                &input,
                iterations == 1,
                task_document.as_deref(),
            );
            let tools = if input_is_fresh_boots(&state) {
                Vec::new()
            } else {
                self.tools
                    .schemas()
                    .into_iter()
                    .map(|s| dialog_model::ToolSchema {
                        name: s.name,
                        description: s.description,
                        parameters: s.parameters,
                    })
                    .collect()
            };

            let request = CompletionRequest {
                messages: context,
                tools,
            };

            let outcome_of_call = self.run_llm_with_retry(&mut state, request, genseq).await;
            let response = match outcome_of_call {
                Ok(response) => response,
                Err(()) => break DriveOutcome::Blocked,
            };

            let health = ContextHealth::compute(
                state.transcript.iter().map(|m| m.approx_tokens()).sum(),
                self.config.max_tokens,
            );
            dlg.publish(DialogEvent::GeneratingFinish {
                genseq,
                context_health: health,
                model_id: self.provider.model_name().to_string(),
            });

            if input.persist_mode == PersistMode::Persist {
                if !response.text.is_empty() {
                    state.push_message(ChatMessage::Saying {
                        content: response.text.clone(),
                        genseq,
                        at: Utc::now(),
                    });
                    self.log_store
                        .append(
                            &dlg.id,
                            dialog_dir,
                            course,
                            &PersistedRecord::AgentWords {
                                content: response.text.clone(),
                                genseq,
                                at: Utc::now(),
                            },
                        )
                        .await?;
                }
            }
            if !response.text.is_empty() {
                dlg.publish(DialogEvent::MarkdownStart { genseq });
                dlg.publish(DialogEvent::MarkdownChunk {
                    genseq,
                    text: response.text.clone(),
                });
                dlg.publish(DialogEvent::MarkdownFinish { genseq });
            }

            let mut teammate_calls = Vec::new();
            for call in &response.tool_calls {
                match TeammateCallName::from_tool_name(&call.name) {
                    Some(name) => {
                        teammate_calls.push(TeammateCallRequest {
                            call_id: call.id.clone(),
                            call_name: name,
                            raw_arguments: call.arguments.clone(),
                        });
                    }
                    None => {
                        self.dispatch_tool_call(&mut state, dlg, dialog_dir, course, genseq, call)
                            .await?;
                    }
                }
            }

            if !teammate_calls.is_empty() {
                state.run_state = RunState::Blocked(dialog_model::BlockedReason::WaitingForSubdialogs);
                break DriveOutcome::Suspended(teammate_calls);
            }

            if !response.tool_calls.is_empty() {
                // Tool results were appended to the transcript; loop again
                // so the model can see them.
                continue;
            }

            // No tool calls and no teammate calls: either the course is
            // genuinely finished, or diligence should nudge it forward.
            // Diligence auto-continue is root-only; a subdialog that falls
            // silent just goes quiet.
            if state.disable_diligence_push || state.suppress_diligence_push || !dlg.id.is_root() {
                break DriveOutcome::Quiet;
            }
            if state.diligence_push_remaining_budget == 0 {
                let question_id = uuid::Uuid::new_v4().to_string();
                let question = HumanQuestion {
                    id: question_id,
                    mention_list: Vec::new(),
                    tellask_content: "diligence push budget exhausted".into(),
                    asked_at: Utc::now(),
                    call_id: None,
                    call_site_ref: dialog_model::CallSiteRef {
                        course: state.current_course,
                        message_index: state.transcript.len(),
                    },
                };
                self.persistence.append_human_question(dialog_dir, question).await?;
                self.log_store
                    .append(
                        &dlg.id,
                        dialog_dir,
                        course,
                        &PersistedRecord::QuestForSup {
                            question: "q4h-diligence-push-budget-exhausted".into(),
                            call_id: String::new(),
                            at: Utc::now(),
                        },
                    )
                    .await?;
                state.run_state = RunState::Blocked(dialog_model::BlockedReason::NeedsHumanInput);
                break DriveOutcome::Blocked;
            }
            state.diligence_push_remaining_budget -= 1;
            debug!(
                dialog = %dlg.id,
                remaining = state.diligence_push_remaining_budget,
                "diligence auto-continue"
            );
            state.push_message(ChatMessage::Environment {
                content: self.config.diligence_text.clone(),
                at: Utc::now(),
            });
        };

        state.run_state = match &outcome {
            DriveOutcome::Quiet => RunState::IdleWaitingUser,
            DriveOutcome::Suspended(_) => {
                RunState::Blocked(dialog_model::BlockedReason::WaitingForSubdialogs)
            }
            DriveOutcome::Blocked => RunState::Blocked(dialog_model::BlockedReason::NeedsHumanInput),
        };

        let health = ContextHealth::compute(
            state.transcript.iter().map(|m| m.approx_tokens()).sum(),
            self.config.max_tokens,
        );
        let mut latest = Latest::new_idle(Utc::now(), state.diligence_push_remaining_budget);
        latest.current_course = state.current_course;
        latest.status = if state.run_state.is_dead() {
            DialogStatus::Archived
        } else {
            DialogStatus::Active
        };
        latest.generating = false;
        latest.needs_drive = matches!(outcome, DriveOutcome::Suspended(_));
        latest.run_state = state.run_state.clone();
        self.persistence.write_latest(dialog_dir, latest).await?;
        dlg.publish(DialogEvent::ContextHealth(health));

        Ok(outcome)
    }

    async fn dispatch_tool_call(
        &self,
        state: &mut crate::dialog::DialogState,
        dlg: &Dialog,
        dialog_dir: &std::path::Path,
        course: dialog_model::Course,
        genseq: GenSeq,
        call: &ResponseToolCall,
    ) -> anyhow::Result<()> {
        state.push_message(ChatMessage::FuncCall {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            genseq,
            at: Utc::now(),
        });
        self.log_store
            .append(
                &dlg.id,
                dialog_dir,
                course,
                &PersistedRecord::FuncCall {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    genseq,
                    at: Utc::now(),
                },
            )
            .await?;
        dlg.publish(DialogEvent::FuncCallRequested {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let args: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
        let output = self
            .tools
            .execute(&DialogToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args,
            })
            .await;

        state.push_message(ChatMessage::FuncResult {
            call_id: call.id.clone(),
            content: output.content.clone(),
            is_error: output.is_error,
            at: Utc::now(),
        });
        self.log_store
            .append(
                &dlg.id,
                dialog_dir,
                course,
                &PersistedRecord::FuncResult {
                    call_id: call.id.clone(),
                    content: output.content.clone(),
                    is_error: output.is_error,
                    at: Utc::now(),
                },
            )
            .await?;
        dlg.publish(DialogEvent::FuncResult {
            call_id: call.id.clone(),
            content: output.content,
            is_error: output.is_error,
        });
        Ok(())
    }

    /// The LLM retry wrapper: exponential backoff up
    /// to `max_retries` for `Retriable` failures, immediate propagation of
    /// `Rejected`/`Fatal`. Clears the rejected-request problem on the first
    /// success after it was raised.
    async fn run_llm_with_retry(
        &self,
        state: &mut crate::dialog::DialogState,
        request: CompletionRequest,
        genseq: GenSeq,
    ) -> Result<CollectedResponse, ()> {
        let mut attempt = 0u32;
        loop {
            match self.provider.complete(request.clone()).await {
                Ok(stream) => {
                    if state.problems.remove(LLM_PROVIDER_REJECTED_KEY) {
                        debug!("llm provider recovered, clearing rejected-request problem");
                    }
                    match collect_response(stream, genseq).await {
                        Ok(response) => return Ok(response),
                        Err(detail) => {
                            state.problems.upsert(
                                "llm_stream_error",
                                "stream_error",
                                detail,
                                Utc::now(),
                            );
                            return Err(());
                        }
                    }
                }
                Err(err) => match classify_anyhow_error(&err) {
                    ProviderErrorClass::Retriable if attempt < self.config.max_retries => {
                        attempt += 1;
                        let backoff_ms = (1000u64 * 2u64.pow(attempt.min(20))).min(30_000);
                        warn!(attempt, backoff_ms, error = %err, "retrying llm call");
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    ProviderErrorClass::Retriable => {
                        state.problems.upsert(
                            LLM_PROVIDER_REJECTED_KEY,
                            "retriable_exhausted",
                            err.to_string(),
                            Utc::now(),
                        );
                        return Err(());
                    }
                    ProviderErrorClass::Rejected { detail } => {
                        state.problems.upsert(
                            LLM_PROVIDER_REJECTED_KEY,
                            "rejected",
                            detail,
                            Utc::now(),
                        );
                        return Err(());
                    }
                    ProviderErrorClass::Fatal => {
                        state.problems.upsert(
                            LLM_PROVIDER_REJECTED_KEY,
                            "fatal",
                            err.to_string(),
                            Utc::now(),
                        );
                        return Err(());
                    }
                },
            }
        }
    }
}

fn input_is_fresh_boots(_state: &crate::dialog::DialogState) -> bool {
    // `freshBootsReasoning` side branches run as their own dialog with
    // their own Driver instance; the parent dialog never
    // toggles this mid-course, so this always holds for a normal drive.
    false
}

/// A response event with a stable `id`; mirrors `dialog_model::ResponseEvent`'s
/// tool-call shape but detached from the stream so it can be collected and
/// matched against twice (once for persistence, once for teammate-call
/// classification).
#[derive(Debug, Clone)]
pub struct ResponseToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

struct CollectedResponse {
    text: String,
    tool_calls: Vec<ResponseToolCall>,
}

/// Drains a response stream into a single collected turn. A stream-level
/// `ResponseEvent::Error` is surfaced as `Err` so the retry wrapper's caller
/// can raise a problem; it is not itself retried (the provider has already
/// committed to the turn by the time it streams).
async fn collect_response(
    mut stream: dialog_model::ResponseStream,
    genseq: GenSeq,
) -> Result<CollectedResponse, String> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(ResponseEvent::TextDelta(chunk)) => text.push_str(&chunk),
            Ok(ResponseEvent::ThinkingDelta(_)) => {}
            Ok(ResponseEvent::ToolCall {
                id,
                name,
                arguments,
            }) => tool_calls.push(ResponseToolCall {
                id,
                name,
                arguments,
            }),
            Ok(ResponseEvent::Usage { .. }) => {}
            Ok(ResponseEvent::Done) => break,
            Ok(ResponseEvent::Error(detail)) => return Err(detail),
            Err(err) => return Err(err.to_string()),
        }
    }
    let _ = genseq;
    Ok(CollectedResponse { text, tool_calls })
}

/// Builds the provider-facing message list in strict order: prepended
/// context, memories, the task document, the condensed course-prefix
/// carryover from prior courses, the transcript, an ephemeral
/// first-iteration insertion, then reminders inserted right after the most
/// recent user-like message (or, if there is none yet, standing in as the
/// user anchor itself), with the language guide last.
fn assemble_context(
    state: &crate::dialog::DialogState,
    config: &DriverConfig,
    input: &DriveInput,
    is_first_iteration: bool,
    task_document: Option<&str>,
) -> Vec<ProviderMessage> {
    let mut messages = Vec::new();

    if let Some(prepended) = &config.prepended_context {
        messages.push(ProviderMessage::system(prepended.clone()));
    }
    for memory in &config.memories {
        messages.push(ProviderMessage::system(format!("memory: {memory}")));
    }
    if let Some(doc) = task_document {
        messages.push(ProviderMessage::system(format!("task document:\n{doc}")));
    }
    for prefix in &state.course_prefix {
        messages.push(ProviderMessage::system(prefix.clone()));
    }

    let last_user_like = state.last_user_like_index();
    for (idx, msg) in state.transcript.iter().enumerate() {
        messages.push(chat_message_to_provider(msg));
        if Some(idx) == last_user_like && !state.reminders.is_empty() {
            let joined = state.reminders.join("\n");
            messages.push(ProviderMessage::system(format!("reminders:\n{joined}")));
        }
    }
    if last_user_like.is_none() && !state.reminders.is_empty() {
        let joined = state.reminders.join("\n");
        messages.push(ProviderMessage::user(format!("reminders:\n{joined}")));
    }

    if input.persist_mode == PersistMode::Internal && is_first_iteration {
        messages.push(ProviderMessage::user(input.content.clone()));
    }

    if let Some(guide) = &config.language_guide {
        messages.push(ProviderMessage::system(guide.clone()));
    }

    messages
}

fn chat_message_to_provider(msg: &ChatMessage) -> ProviderMessage {
    match msg {
        ChatMessage::Prompting { content, .. } => ProviderMessage::user(content.clone()),
        ChatMessage::Thinking { content, .. } => ProviderMessage::assistant(content.clone()),
        ChatMessage::Saying { content, .. } => ProviderMessage::assistant(content.clone()),
        ChatMessage::FuncCall {
            name, arguments, ..
        } => ProviderMessage::assistant(format!("[call {name}: {arguments}]")),
        ChatMessage::FuncResult { content, .. } => ProviderMessage::user(content.clone()),
        ChatMessage::TellaskResult { content, .. } => ProviderMessage::user(content.clone()),
        ChatMessage::UiOnly { content, .. } => ProviderMessage::assistant(content.clone()),
        ChatMessage::Environment { content, .. } => ProviderMessage::system(content.clone()),
        ChatMessage::Guide { content, .. } => ProviderMessage::system(content.clone()),
    }
}
