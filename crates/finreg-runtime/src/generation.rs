//! Generation collaborator.
//!
//! A [`Generator`] turns a checklist item and its retrieved evidence into a
//! [`RawFinding`]. [`LlmGenerator`] asks a model through an [`LlmProvider`];
//! [`RecordedGenerator`] replays stored model answers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use finreg_core::{ChecklistItem, RawFinding, Regime, RetrievalResult, Section};
use serde_json::Value;
use thiserror::Error;

use crate::prompts;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError, TokenUsage};
use crate::response::parse_raw_finding;

/// Model id reported by [`RecordedGenerator`].
pub const RECORDED_MODEL: &str = "recorded";

/// Errors from the generation collaborator.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Model response is missing required field: {0}")]
    MissingField(String),

    /// The provider answered and billed the call, but the answer was unusable.
    #[error("{source}")]
    Unusable {
        #[source]
        source: Box<GenerationError>,
        usage: TokenUsage,
    },

    #[error("No recorded response for item {0}")]
    NoRecording(String),

    #[error("Failed to read recordings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse recordings: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenerationError {
    /// Whether another attempt could produce a usable finding.
    ///
    /// Models answer non-deterministically, so a malformed or incomplete
    /// answer is worth asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Timeout(_)
            | GenerationError::MalformedResponse(_)
            | GenerationError::MissingField(_) => true,
            GenerationError::Provider(e) => e.is_transient(),
            GenerationError::Unusable { source, .. } => source.is_retryable(),
            GenerationError::NoRecording(_) | GenerationError::Io(_) | GenerationError::Json(_) => {
                false
            }
        }
    }

    /// Tokens billed by a call that still failed.
    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            GenerationError::Unusable { usage, .. } => Some(usage),
            _ => None,
        }
    }
}

/// Input for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub item: &'a ChecklistItem,
    pub section: &'a Section,
    pub retrieval: &'a RetrievalResult,
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub raw: RawFinding,
    pub usage: TokenUsage,
}

/// Produces raw findings for checklist items.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation, GenerationError>;

    /// Model id recorded in the audit trail.
    fn model(&self) -> &str;
}

/// Generator backed by an LLM provider.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
    regime: Regime,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig, regime: Regime) -> Self {
        Self {
            provider,
            config,
            regime,
        }
    }

    fn messages(&self, request: &GenerationRequest<'_>) -> Vec<ChatMessage> {
        let evidence = prompts::format_evidence(request.retrieval, &request.item.input_types);
        vec![
            ChatMessage::system(prompts::system_prompt(self.regime)),
            ChatMessage::user(prompts::user_prompt(
                request.item,
                request.section,
                &evidence,
            )),
        ]
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation, GenerationError> {
        let response = self
            .provider
            .complete(self.messages(request), &self.config)
            .await?;

        tracing::debug!(
            item = %request.item.id,
            provider = self.provider.name(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            stop_reason = ?response.stop_reason,
            "Model responded"
        );

        let raw = parse_raw_finding(&response.content).map_err(|e| GenerationError::Unusable {
            source: Box::new(e),
            usage: response.usage,
        })?;
        Ok(Generation {
            raw,
            usage: response.usage,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Generator that replays model answers keyed by item id.
///
/// A recording is either the model's text output or the JSON answer object
/// itself. Both go through the same parser as live output.
#[derive(Debug, Clone, Default)]
pub struct RecordedGenerator {
    responses: HashMap<String, String>,
}

impl RecordedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load recordings from a JSON object `{ "<item id>": <answer>, ... }`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, GenerationError> {
        let recorded: HashMap<String, Value> = serde_json::from_str(json)?;
        let responses = recorded
            .into_iter()
            .map(|(id, answer)| match answer {
                Value::String(text) => (id, text),
                other => (id, other.to_string()),
            })
            .collect();
        Ok(Self { responses })
    }

    pub fn insert(&mut self, item_id: impl Into<String>, response: impl Into<String>) {
        self.responses.insert(item_id.into(), response.into());
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl Generator for RecordedGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation, GenerationError> {
        let text = self
            .responses
            .get(&request.item.id)
            .ok_or_else(|| GenerationError::NoRecording(request.item.id.clone()))?;

        Ok(Generation {
            raw: parse_raw_finding(text)?,
            usage: TokenUsage::default(),
        })
    }

    fn model(&self) -> &str {
        RECORDED_MODEL
    }
}
