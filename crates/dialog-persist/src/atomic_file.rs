// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Crash-safe single-file writes: write to a unique temp file in the
//! destination directory, then rename into place. A rename that fails with
//! `ENOENT` (the temp file was swept by e.g. a concurrent cleanup pass) is
//! retried a bounded number of times, recreating the temp file each time.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;

use tokio::fs;
use tokio::time::{sleep, Duration};

const MAX_RENAME_RETRIES: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum AtomicFileError {
    #[error("failed to write temp file {path}: {source}")]
    WriteTemp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rename {from} -> {to} failed after {retries} retries: {source}")]
    RenameExhausted {
        from: PathBuf,
        to: PathBuf,
        retries: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("rename {from} -> {to} failed: {source}")]
    RenameFatal {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn temp_path(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let basename = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    dir.join(format!(
        ".{basename}.{}.{}.tmp",
        process::id(),
        uuid::Uuid::new_v4()
    ))
}

/// Atomically replace `target`'s contents with `data`.
pub async fn write(target: &Path, data: &[u8]) -> Result<(), AtomicFileError> {
    let mut tmp = temp_path(target);
    fs::write(&tmp, data)
        .await
        .map_err(|source| AtomicFileError::WriteTemp {
            path: tmp.clone(),
            source,
        })?;

    for attempt in 1..=MAX_RENAME_RETRIES {
        match fs::rename(&tmp, target).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    attempt,
                    tmp = %tmp.display(),
                    target = %target.display(),
                    "atomic rename target temp file missing, recreating"
                );
                sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                tmp = temp_path(target);
                fs::write(&tmp, data)
                    .await
                    .map_err(|source| AtomicFileError::WriteTemp {
                        path: tmp.clone(),
                        source,
                    })?;
            }
            Err(e) => {
                return Err(AtomicFileError::RenameFatal {
                    from: tmp,
                    to: target.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    Err(AtomicFileError::RenameExhausted {
        from: tmp.clone(),
        to: target.to_path_buf(),
        retries: MAX_RENAME_RETRIES,
        source: std::io::Error::new(ErrorKind::NotFound, "temp file missing on every attempt"),
    })
}
