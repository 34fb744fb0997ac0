// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The process-global dialog registry: at most one live [`Dialog`] per
//! `(rootId, selfId)`, stored in a keyed map since dialogs are looked up
//! by id rather than enumerated wholesale.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dialog_core::Dialog;
use dialog_model::DialogId;

/// Thread-safe map from dialog id to its single live in-memory instance.
/// Held process-wide; every subsystem that needs a dialog goes through
/// here rather than constructing its own `Dialog`.
#[derive(Default)]
pub struct DialogRegistry {
    dialogs: RwLock<HashMap<DialogId, Arc<Dialog>>>,
}

impl DialogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &DialogId) -> Option<Arc<Dialog>> {
        self.dialogs.read().expect("registry lock poisoned").get(id).cloned()
    }

    pub fn contains(&self, id: &DialogId) -> bool {
        self.dialogs.read().expect("registry lock poisoned").contains_key(id)
    }

    /// Registers `dialog`, replacing any previous entry for the same id.
    /// Callers are responsible for ensuring at most one live instance
    /// exists (restore and creation both route through this).
    pub fn insert(&self, dialog: Arc<Dialog>) {
        let id = dialog.id.clone();
        self.dialogs
            .write()
            .expect("registry lock poisoned")
            .insert(id, dialog);
    }

    pub fn remove(&self, id: &DialogId) -> Option<Arc<Dialog>> {
        self.dialogs.write().expect("registry lock poisoned").remove(id)
    }

    pub fn len(&self) -> usize {
        self.dialogs.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DialogId> {
        self.dialogs.read().expect("registry lock poisoned").keys().cloned().collect()
    }
}
