// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only per-course JSONL logs. The durable, crash-consistent
//! source of truth for a dialog's transcript.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dialog_model::{Course, DialogId, PersistedRecord};
use dialog_sync::FifoMutex;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record in {path} at line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// `append`/`read` serialized per `(workspace root, dialog id, course)` so
/// that parallel test workspaces never contend on the same key.
pub struct LogStore {
    root: PathBuf,
    locks: FifoMutex<String>,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: FifoMutex::new(),
        }
    }

    fn key(&self, id: &DialogId, course: Course) -> String {
        format!("{}::{}::{}", self.root.display(), id, course)
    }

    pub fn course_path(&self, dialog_dir: &Path, course: Course) -> PathBuf {
        dialog_dir.join(course.file_name())
    }

    /// Append one record as a single JSON line. Serialized per-key so
    /// concurrent appends to the same `(dialogId, course)` never interleave
    /// partial writes.
    pub async fn append(
        &self,
        id: &DialogId,
        dialog_dir: &Path,
        course: Course,
        record: &PersistedRecord,
    ) -> Result<(), LogStoreError> {
        let _guard = self.locks.acquire(self.key(id, course)).await;
        let path = self.course_path(dialog_dir, course);
        let line = record
            .to_line()
            .expect("PersistedRecord always serializes");

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LogStoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| LogStoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(b"\n")
            .await
            .map_err(|source| LogStoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.flush().await.map_err(|source| LogStoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Read every record of a course. A JSON parse failure on the last
    /// non-empty line is treated as a truncated crash tail and silently
    /// dropped; a parse failure on any earlier line is fatal.
    pub async fn read(
        &self,
        id: &DialogId,
        dialog_dir: &Path,
        course: Course,
    ) -> Result<Vec<PersistedRecord>, LogStoreError> {
        let _guard = self.locks.acquire(self.key(id, course)).await;
        let path = self.course_path(dialog_dir, course);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LogStoreError::Io { path, source }),
        };

        let lines: Vec<&str> = contents
            .split('\n')
            .filter(|l| !l.trim().is_empty())
            .collect();

        let mut records = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match PersistedRecord::from_line(line) {
                Ok(rec) => records.push(rec),
                Err(e) if idx == lines.len() - 1 => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "ignoring truncated trailing record (crash tail)"
                    );
                }
                Err(source) => {
                    return Err(LogStoreError::Parse {
                        path,
                        line: idx + 1,
                        source,
                    })
                }
            }
        }
        Ok(records)
    }
}

/// Shared handle, cloned into every component that needs to append/read.
pub type SharedLogStore = Arc<LogStore>;
