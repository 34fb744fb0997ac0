// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Appends a reminder string to the dialog's `reminders` list. The actual
/// reminder store lives on the `Dialog` (`dialog-core`); this tool holds a
/// handle to it so the driver can wire it up per-dialog at dispatch time.
#[derive(Default, Clone)]
pub struct AddReminderTool {
    reminders: Arc<Mutex<Vec<String>>>,
}

impl AddReminderTool {
    pub fn new(reminders: Arc<Mutex<Vec<String>>>) -> Self {
        Self { reminders }
    }

    pub fn reminders(&self) -> Vec<String> {
        self.reminders.lock().expect("reminders poisoned").clone()
    }
}

#[async_trait]
impl Tool for AddReminderTool {
    fn name(&self) -> &str {
        "add_reminder"
    }

    fn description(&self) -> &str {
        "Add a reminder that will be surfaced at the end of future context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "reminder text" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(text) = call.args.get("text").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing required argument: text");
        };
        self.reminders
            .lock()
            .expect("reminders poisoned")
            .push(text.to_string());
        ToolOutput::ok(&call.id, "reminder added")
    }
}
