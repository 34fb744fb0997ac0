// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic [`ModelProvider`] implementations for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{
    ClassifiedProviderError, CompletionRequest, ModelProvider, ProviderErrorClass, ResponseEvent,
    ResponseStream, Role,
};

/// Echoes the last user message back as the assistant response.
#[derive(Default)]
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.clone())
            .unwrap_or_else(|| "[no input]".to_string());

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage {
                input_tokens: 10,
                output_tokens: 10,
            }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider. Each call to `complete` pops the next response
/// script off the front of the queue, letting a test specify an exact event
/// sequence — including tool calls — across successive generation turns
/// without network access.
/// One queued turn: either a normal event sequence or a call that should
/// fail with a given classification, for exercising the driver's retry
/// wrapper deterministically.
pub enum ScriptedTurn {
    Events(Vec<ResponseEvent>),
    Fail(ProviderErrorClass, String),
}

pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<ScriptedTurn>>>,
    name: String,
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self::from_turns(scripts.into_iter().map(ScriptedTurn::Events).collect())
    }

    pub fn from_turns(scripts: Vec<ScriptedTurn>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage {
                input_tokens: 5,
                output_tokens: 5,
            },
            ResponseEvent::Done,
        ]])
    }

    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Done,
            ],
            vec![ResponseEvent::TextDelta(final_text.into()), ResponseEvent::Done],
        ])
    }

    /// A script that fails to produce a script at all: every `complete()`
    /// call returns an error, for exercising the driver's retry wrapper.
    pub fn always_errors() -> Self {
        Self::new(Vec::new())
    }

    /// Fails `retriable_failures` times with a retriable classification,
    /// then succeeds with `reply`.
    pub fn flaky_then_text(retriable_failures: u32, reply: impl Into<String>) -> Self {
        let mut turns = Vec::new();
        for _ in 0..retriable_failures {
            turns.push(ScriptedTurn::Fail(
                ProviderErrorClass::Retriable,
                "connection reset".into(),
            ));
        }
        turns.push(ScriptedTurn::Events(vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Done,
        ]));
        Self::from_turns(turns)
    }

    /// Fails once with a rejected classification (no retry expected).
    pub fn rejects(detail: impl Into<String>) -> Self {
        Self::from_turns(vec![ScriptedTurn::Fail(
            ProviderErrorClass::Rejected {
                detail: detail.into(),
            },
            "bad request".into(),
        )])
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().expect("last_request poisoned") = Some(req);
        let turn = {
            let mut scripts = self.scripts.lock().expect("scripts poisoned");
            if scripts.is_empty() {
                return Err(ClassifiedProviderError::new(
                    ProviderErrorClass::Fatal,
                    "ScriptedProvider: no more scripts queued",
                )
                .into());
            }
            scripts.remove(0)
        };
        match turn {
            ScriptedTurn::Events(events) => {
                let events: Vec<anyhow::Result<ResponseEvent>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(events)))
            }
            ScriptedTurn::Fail(class, message) => {
                Err(ClassifiedProviderError::new(class, message).into())
            }
        }
    }
}
