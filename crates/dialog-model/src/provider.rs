// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The narrow interface the driver speaks to talk to an LLM backend, plus
//! the error taxonomy its retry wrapper classifies against. Concrete
//! vendor providers (Anthropic, OpenAI-compatible, ...) are a
//! collaborator, not part of this crate; callers supply any
//! `ModelProvider` implementation, and [`crate::mock`] supplies one for
//! tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

/// A message role in the wire protocol sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the request sent to the provider. Content shape is
/// intentionally simple (text only) — multimodal parts are a collaborator
/// concern left to the concrete provider implementation.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: Role,
    pub text: String,
}

impl ProviderMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A tool/function schema advertised to the model, except when the call is
/// type C (`freshBootsReasoning`), for which the driver sends no tools at
/// all.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Request for one generation turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolSchema>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Done,
    Error(String),
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// How a failed provider call should be handled by the driver's retry
/// wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorClass {
    /// Network transport errors, timeouts, 408/429/5xx, connection
    /// reset/refused, DNS transient, header/body timeout. Retry with
    /// backoff.
    Retriable,
    /// 4xx other than 408/429. No retry; raise
    /// `llm_provider_rejected_request` and fail fast.
    Rejected { detail: String },
    /// Cancellation or anything uncategorized. Propagate immediately.
    Fatal,
}

/// Classify a provider error for the retry wrapper. Concrete providers
/// should implement this on their own error type; [`classify_status_code`]
/// is a ready-made helper for HTTP-shaped providers.
pub trait ClassifyProviderError {
    fn classify(&self) -> ProviderErrorClass;
}

/// Helper for HTTP-backed providers: map a status code to the taxonomy.
pub fn classify_status_code(status: u16, detail: impl Into<String>) -> ProviderErrorClass {
    match status {
        408 | 429 => ProviderErrorClass::Retriable,
        500..=599 => ProviderErrorClass::Retriable,
        400..=499 => ProviderErrorClass::Rejected {
            detail: detail.into(),
        },
        _ => ProviderErrorClass::Fatal,
    }
}

/// A provider error already tagged with its class, for providers that know
/// up front how a failure should be handled (as opposed to `anyhow`-wrapped
/// transport errors the driver has to classify heuristically).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedProviderError {
    pub class: ProviderErrorClass,
    pub message: String,
}

impl ClassifiedProviderError {
    pub fn new(class: ProviderErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl ClassifyProviderError for ClassifiedProviderError {
    fn classify(&self) -> ProviderErrorClass {
        self.class.clone()
    }
}

/// Classify an error surfaced from [`ModelProvider::complete`] or its
/// stream. A [`ClassifiedProviderError`] downcasts to its own tag;
/// anything else is uncategorized and therefore fatal.
pub fn classify_anyhow_error(err: &anyhow::Error) -> ProviderErrorClass {
    match err.downcast_ref::<ClassifiedProviderError>() {
        Some(tagged) => tagged.classify(),
        None => ProviderErrorClass::Fatal,
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}
