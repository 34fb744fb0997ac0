// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `<workspaceRoot>/.dialogs/<status>/<rootSelfId>/[subdialogs/<selfId>/...]`.
//! `DialogPersistence` itself is deliberately directory-agnostic (every
//! method takes a `dir: &Path`); this is the one place that knows the
//! shape of the tree those directories form.

use std::path::{Path, PathBuf};

use dialog_persist::DialogPersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogTreeStatus {
    Active,
    Completed,
    Archived,
}

impl DialogTreeStatus {
    fn dir_name(self) -> &'static str {
        match self {
            DialogTreeStatus::Active => "active",
            DialogTreeStatus::Completed => "completed",
            DialogTreeStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace_root.into(),
        }
    }

    pub fn status_dir(&self, status: DialogTreeStatus) -> PathBuf {
        self.root.join(".dialogs").join(status.dir_name())
    }

    pub fn root_dialog_dir(&self, status: DialogTreeStatus, root_self_id: &str) -> PathBuf {
        self.status_dir(status).join(root_self_id)
    }

    pub fn child_dialog_dir(&self, parent_dir: &Path, child_self_id: &str) -> PathBuf {
        DialogPersistence::subdialog_dir(parent_dir, child_self_id)
    }
}
