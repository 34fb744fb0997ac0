// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The subdialog coordinator, startup reconciler, and restore logic:
//! everything that sits above a single [`dialog_core::Dialog`] and ties
//! many of them together into one workspace.

pub mod coordinator;
pub mod layout;
pub mod reconciler;
pub mod registry;
pub mod restore;

pub use coordinator::{Coordinator, CoordinatorError, DispatchOutcome};
pub use layout::{DialogTreeStatus, WorkspaceLayout};
pub use reconciler::{reconcile_dialog, reconcile_workspace, ReconciliationSummary};
pub use registry::DialogRegistry;
pub use restore::{rebuild_transcript, restore_dialog_hierarchy};
