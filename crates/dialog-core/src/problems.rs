// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A small ledger of transient problems, keyed by a stable id tied to the
//! dialog and problem class, supporting upsert and remove.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemEntry {
    pub class: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Keyed by a stable id tied to the dialog and problem class, e.g.
/// `"llm_provider_rejected_request"`.
#[derive(Debug, Default)]
pub struct ProblemLedger {
    entries: HashMap<String, ProblemEntry>,
}

impl ProblemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this created a new entry or changed an existing
    /// one's message (callers use this to decide whether to emit an event).
    pub fn upsert(&mut self, key: impl Into<String>, class: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        let key = key.into();
        let message = message.into();
        let changed = match self.entries.get(&key) {
            Some(existing) => existing.message != message,
            None => true,
        };
        self.entries.insert(
            key,
            ProblemEntry {
                class: class.into(),
                message,
                raised_at: now,
            },
        );
        changed
    }

    /// Returns `true` if a problem with this key existed and was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&ProblemEntry> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ProblemEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
