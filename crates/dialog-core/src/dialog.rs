// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory dialog model: transcript, reminders, course/genseq, active
//! generation, run-state, mutated only under the dialog's own FIFO mutex
//! and published through an [`EventChannel`].

use std::path::PathBuf;

use chrono::Utc;
use dialog_model::{ChatMessage, Course, DialogId, GenSeq, RunState};
use dialog_sync::EventChannel;
use tokio::sync::{Mutex, MutexGuard};

use crate::events::DialogEvent;
use crate::problems::ProblemLedger;

/// Everything that changes during a drive, guarded by [`Dialog::acquire`].
pub struct DialogState {
    pub transcript: Vec<ChatMessage>,
    pub reminders: Vec<String>,
    /// One condensed line per finished course, oldest first. Rendered at
    /// the start of every subsequent course's context so the model keeps
    /// continuity without replaying the full prior transcript.
    pub course_prefix: Vec<String>,
    pub current_course: Course,
    pub last_genseq: GenSeq,
    pub active_gen: Option<(Course, GenSeq)>,
    pub pending_subdialogs: Vec<String>,
    pub run_state: RunState,
    pub diligence_push_remaining_budget: u32,
    pub disable_diligence_push: bool,
    pub suppress_diligence_push: bool,
    pub problems: ProblemLedger,
}

impl DialogState {
    fn new_idle(diligence_push_budget: u32) -> Self {
        Self {
            transcript: Vec::new(),
            reminders: Vec::new(),
            course_prefix: Vec::new(),
            current_course: Course::FIRST,
            last_genseq: GenSeq(0),
            active_gen: None,
            pending_subdialogs: Vec::new(),
            run_state: RunState::IdleWaitingUser,
            diligence_push_remaining_budget: diligence_push_budget,
            disable_diligence_push: false,
            suppress_diligence_push: false,
            problems: ProblemLedger::new(),
        }
    }

    /// Appends a message and returns its index in the transcript, mirroring
    /// the ordering invariant that driven code relies on: `indexOf`
    /// comparisons are over this index space.
    pub fn push_message(&mut self, msg: ChatMessage) -> usize {
        self.transcript.push(msg);
        self.transcript.len() - 1
    }

    pub fn next_genseq(&mut self) -> GenSeq {
        self.last_genseq = self.last_genseq.next();
        self.last_genseq
    }

    /// Condenses the finished course's transcript to one carry-forward
    /// line, clears the transcript, and advances to the next course. The
    /// condensed line is what a restored dialog has to go on for courses
    /// before the latest one, so the live and restored views stay aligned.
    pub fn start_new_course(&mut self) -> Course {
        let finished = self.current_course;
        let summary = self
            .transcript
            .iter()
            .rev()
            .find_map(|m| match m {
                ChatMessage::Saying { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "no assistant reply recorded".to_string());
        self.course_prefix.push(format!("course {finished}: {summary}"));
        self.transcript.clear();
        self.current_course = self.current_course.next();
        self.current_course
    }

    /// The most recent user-like message index, if any. Reminders are
    /// inserted after this message during context assembly.
    pub fn last_user_like_index(&self) -> Option<usize> {
        self.transcript.iter().rposition(|m| m.is_user_like())
    }
}

/// One addressable dialog: immutable identity plus mutex-guarded state and
/// an event-publishing side channel. Exactly one live instance per
/// `(rootId, selfId)` is enforced by the process-global registry, not by
/// this type itself.
pub struct Dialog {
    pub id: DialogId,
    pub agent_id: String,
    pub task_document_path: Option<PathBuf>,
    events: EventChannel<DialogEvent>,
    state: Mutex<DialogState>,
}

impl Dialog {
    pub fn new(id: DialogId, agent_id: impl Into<String>, diligence_push_budget: u32) -> Self {
        Self {
            id,
            agent_id: agent_id.into(),
            task_document_path: None,
            events: EventChannel::new(),
            state: Mutex::new(DialogState::new_idle(diligence_push_budget)),
        }
    }

    /// Acquire the dialog's FIFO mutex. Holding the guard across an
    /// `.await` is expected (a drive does exactly that); the guard must
    /// never be held across a parent/child transition.
    pub async fn acquire(&self) -> MutexGuard<'_, DialogState> {
        self.state.lock().await
    }

    pub fn events(&self) -> &EventChannel<DialogEvent> {
        &self.events
    }

    pub fn publish(&self, event: DialogEvent) {
        self.events.publish(event);
    }

    pub fn emit_course_update(&self, course: Course) {
        self.publish(DialogEvent::CourseUpdate { course });
    }

    pub fn emit_reminders_update(&self, reminders: Vec<String>) {
        self.publish(DialogEvent::FullRemindersUpdate { reminders });
    }
}
