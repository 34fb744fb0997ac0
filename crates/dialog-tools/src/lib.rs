// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The narrow tool registry interface the driver dispatches through. The
//! full tool catalog is a collaborator concern; this crate ships the
//! registry machinery plus two illustrative tools: `shell_cmd` and
//! `add_reminder`.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::add_reminder::AddReminderTool;
pub use builtin::shell_cmd::ShellCmdTool;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolOutput};
