// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The dialog orchestration kernel: the in-memory `Dialog`/`DialogState`,
//! the `Driver` that advances a dialog one course at a time, the wire
//! event contract, and the transient problem ledger.

pub mod dialog;
pub mod driver;
pub mod events;
pub mod problems;

pub use dialog::{Dialog, DialogState};
pub use driver::{
    DriveInput, DriveOutcome, Driver, DriverConfig, PersistMode, TeammateCallName,
    TeammateCallRequest,
};
pub use events::{ContextHealth, DialogEvent};
pub use problems::{ProblemEntry, ProblemLedger};
