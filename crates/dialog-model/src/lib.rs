// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Data model shared across the dialog orchestration kernel: identifiers,
//! the in-memory transcript, the durable record format, the `Latest`
//! descriptor and run-state sum type, subdialog bookkeeping, and the narrow
//! LLM provider interface the driver depends on.

pub mod ids;
pub mod latest;
pub mod message;
pub mod mock;
pub mod provider;
pub mod records;
pub mod subdialog;

pub use ids::{CallId, Course, DialogId, GenSeq};
pub use latest::{
    BlockedReason, DeadReason, DialogStatus, InterruptedReason, Latest, RunState, StopReason,
    TerminalStatus,
};
pub use message::ChatMessage;
pub use provider::{
    classify_anyhow_error, classify_status_code, ClassifiedProviderError, ClassifyProviderError,
    CompletionRequest, ModelProvider, ProviderErrorClass, ProviderMessage, ResponseEvent,
    ResponseStream, Role, ToolSchema,
};
pub use records::PersistedRecord;
pub use subdialog::{
    CallName, CallSiteRef, CallType, HumanQuestion, PendingSubdialog, SpawnInfo,
    SubdialogResponse, SubdialogResponseStatus,
};
