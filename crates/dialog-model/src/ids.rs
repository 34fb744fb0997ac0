// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Core identifiers: `DialogId`, `Course`, `GenSeq`, `CallId`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(selfId, rootId)`. A root dialog has `self_id == root_id`. A subdialog's
/// `root_id` is its *parent*'s `self_id` — the chain to the true root is
/// walked via metadata, not stored flat here (see `dialog-coordinator`'s
/// restore logic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub self_id: String,
    pub root_id: String,
}

impl DialogId {
    pub fn root(self_id: impl Into<String>) -> Self {
        let self_id = self_id.into();
        Self {
            root_id: self_id.clone(),
            self_id,
        }
    }

    pub fn child(self_id: impl Into<String>, parent_self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            root_id: parent_self_id.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.self_id == self.root_id
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root_id, self.self_id)
    }
}

/// A logical "turn" bracket within a dialog. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Course(pub u64);

impl Course {
    pub const FIRST: Course = Course(1);

    pub fn next(self) -> Course {
        Course(self.0 + 1)
    }

    pub fn file_name(self) -> String {
        format!("course-{:03}.jsonl", self.0)
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier for a single LLM generation, increasing across all
/// courses of a dialog (invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenSeq(pub u64);

impl GenSeq {
    pub fn next(self) -> GenSeq {
        GenSeq(self.0 + 1)
    }
}

impl fmt::Display for GenSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque string tagging a tool/teammate call within a dialog; correlates
/// call-start events with result events.
pub type CallId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_dialog_id_is_its_own_root() {
        let id = DialogId::root("abc");
        assert!(id.is_root());
        assert_eq!(id.self_id, "abc");
        assert_eq!(id.root_id, "abc");
    }

    #[test]
    fn child_dialog_id_points_at_parent_self_id() {
        let parent = DialogId::root("root1");
        let child = DialogId::child("child1", parent.self_id.clone());
        assert!(!child.is_root());
        assert_eq!(child.root_id, "root1");
    }

    #[test]
    fn course_file_name_is_zero_padded() {
        assert_eq!(Course(1).file_name(), "course-001.jsonl");
        assert_eq!(Course(42).file_name(), "course-042.jsonl");
        assert_eq!(Course(1000).file_name(), "course-1000.jsonl");
    }

    #[test]
    fn course_and_genseq_increment() {
        assert_eq!(Course(1).next(), Course(2));
        assert_eq!(GenSeq(5).next(), GenSeq(6));
    }
}
