// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Runs a shell command and returns its combined stdout/stderr.
pub struct ShellCmdTool;

#[async_trait]
impl Tool for ShellCmdTool {
    fn name(&self) -> &str {
        "shell_cmd"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "the command line to run" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing required argument: command");
        };

        match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                if !output.stderr.is_empty() {
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                if output.status.success() {
                    ToolOutput::ok(&call.id, text)
                } else {
                    ToolOutput::err(
                        &call.id,
                        format!("exit status {}: {text}", output.status),
                    )
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("failed to spawn shell: {e}")),
        }
    }
}
