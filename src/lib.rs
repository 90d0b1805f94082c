//! # Stock Metadata Batch
//!
//! Batch generation of stock-marketplace metadata (title, description,
//! keywords, category) for media files, driven through a small pool of
//! rate-limited API keys.
//!
//! ## Key Features
//!
//! - **Credential-aware rate limiting**: each key gets a per-minute request
//!   budget; batches are assigned round-robin and wait for the window to
//!   roll over when every key is exhausted
//! - **Concurrent batches**: every item in a batch is dispatched at once
//!   under the same key; batches run strictly in sequence
//! - **Backoff**: failed calls are retried with exponential delay
//!   (1s doubling to 30s) until they succeed or the run is stopped
//! - **Two-pass retry**: items that fail the main pass get exactly one more
//!   pass; failures there become visible error results
//! - **Pause / resume / stop**: cooperative, never aborting requests that
//!   are already in flight
//! - **Marketplace CSV export**: Adobe Stock, Shutterstock, Freepik, Getty,
//!   iStock, Dreamstime, Vecteezy and a general layout
//!
//! ## Quick Start
//!
//! 1. Stage files with [`preprocess::stage_files`]
//! 2. Create a [`GenerationController`] with a [`MetadataGenerator`]
//!    (e.g. [`GeminiClient`]) and your [`Settings`]
//! 3. Call [`GenerationController::start`] and watch
//!    [`GenerationController::subscribe`] for progress
//! 4. Export with [`export::write_csv`]

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod export;
pub mod gemini;
pub mod limiter;
pub mod normalize;
pub mod parser;
pub mod preprocess;
pub mod prompt;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{BackoffConfig, ControlSettings, GeneratorConfig, GeneratorConfigBuilder};
pub use controller::GenerationController;
pub use error::{GenerationError, Result};
pub use events::{EventSink, GenerationEvent, NoticeLevel};
pub use export::StockSite;
pub use gemini::{GeminiClient, GeminiConfig};
pub use limiter::CredentialRateLimiter;
pub use settings::Settings;
pub use store::{ResultStore, StagingArea};
pub use types::{
    CompletionSummary, Credential, EncodedPayload, GeneratedFields, GenerationMode,
    GenerationRequest, MetadataFields, Pass, ProgressSnapshot, PromptFields, ResultRecord,
    RunOutcome, RunPhase, WorkItem, WorkItemStatus,
};

/// The external generation service.
///
/// Given a prompt and an encoded image, return structured fields or fail.
/// Implementations should not retry on their own; the caller wraps every
/// call in backoff.
///
/// # Example
///
/// ```ignore
/// use stock_metadata_batch::*;
///
/// struct Canned;
///
/// impl MetadataGenerator for Canned {
///     async fn generate(
///         &self,
///         request: &GenerationRequest,
///         _credential: &Credential,
///     ) -> Result<GeneratedFields> {
///         Ok(GeneratedFields::Prompt(PromptFields {
///             description: format!("{} bytes", request.payload.base64_data.len()),
///         }))
///     }
/// }
/// ```
pub trait MetadataGenerator: Send + Sync {
    /// Perform one generation call with `credential`.
    fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> impl std::future::Future<Output = Result<GeneratedFields>> + Send;
}
