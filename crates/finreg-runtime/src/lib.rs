//! # finreg-runtime
//!
//! Async audit pipeline for finreg.
//!
//! `finreg-core` decides; this crate gathers. It owns the collaborator
//! seams ([`Retriever`], [`Generator`]), the LLM provider abstraction,
//! retries with backoff, usage accounting and section checkpoints.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finreg_core::{Catalog, ReportMeta};
//! use finreg_runtime::{AuditPipeline, RecordedGenerator, RecordedRetriever, RuntimeConfig};
//!
//! let catalog = Catalog::from_file("catalog.yaml")?;
//! let pipeline = AuditPipeline::new(
//!     Arc::new(RecordedRetriever::from_file("retrieval.json")?),
//!     Arc::new(RecordedGenerator::from_file("responses.json")?),
//!     RuntimeConfig::default(),
//! )?;
//!
//! let result = pipeline.run(&catalog, meta).await?;
//! println!("{}", result.report.verdict);
//! ```

pub mod checkpoint;
pub mod config;
pub mod generation;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod response;
pub mod retrieval;
pub mod usage;

pub use checkpoint::{
    CheckpointError, CheckpointKey, CheckpointStatus, CheckpointStore, SectionCheckpoint,
};
pub use config::{ConfigError, RetryConfig, RuntimeConfig, DEFAULT_MODEL};
pub use generation::{
    Generation, GenerationError, GenerationRequest, Generator, LlmGenerator, RecordedGenerator,
};
pub use pipeline::{AuditPipeline, PipelineError, RunResult};
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
pub use response::parse_raw_finding;
pub use retrieval::{RecordedRetriever, RetrievalError, RetrievalQuery, Retriever};
pub use usage::{LlmUsage, UsageTracker};

#[cfg(feature = "anthropic")]
pub use providers::AnthropicProvider;
