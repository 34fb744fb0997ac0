// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable storage for the dialog orchestration kernel: atomic single-file
//! writes, append-only per-course transcript logs, coalesced write-back for
//! frequently-touched small artifacts, and the directory layout and
//! protocols tying them together into one dialog's persisted state.

pub mod atomic_file;
pub mod log_store;
pub mod persistence;
pub mod writeback;

pub use atomic_file::AtomicFileError;
pub use log_store::{LogStore, LogStoreError, SharedLogStore};
pub use persistence::{
    DialogMetadata, DialogPersistence, InvariantViolation, RegistryEntry, SubdialogRegistry,
};
pub use writeback::{StageDecision, WriteBackBuffer, WriteBackSink, WRITEBACK_WINDOW_MS};
