use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GenerationError, Result};
use crate::types::GenerationMode;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_REQUESTS_PER_MINUTE: usize = 15;

/// Exponential backoff parameters for a single item's generation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Give up after this many failed calls. `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Scheduling parameters captured once per run.
///
/// Use [`GeneratorConfig::builder()`] or [`GeneratorConfig::default()`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Items dispatched together under one credential.
    ///
    /// Used as-is by [`crate::scheduler::BatchScheduler`]. A
    /// [`crate::GenerationController`] replaces it with
    /// [`ControlSettings::batch_size`] whenever that is non-zero, so set the
    /// batch size through the settings when running a controller.
    pub batch_size: usize,
    /// Per-credential request budget inside one rate window.
    pub requests_per_minute: usize,
    /// Length of the shared rate window.
    pub rate_window: Duration,
    /// Extra wait past the window end before re-scanning credentials.
    pub wait_margin: Duration,
    /// How often the rate-limit countdown is published.
    pub status_tick: Duration,
    /// Pause between the primary pass and the retry pass.
    pub retry_settle_delay: Duration,
    pub backoff: BackoffConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            rate_window: Duration::from_secs(60),
            wait_margin: Duration::from_secs(1),
            status_tick: Duration::from_secs(1),
            retry_settle_delay: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder::default()
    }

    /// Reject values that could never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GenerationError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.requests_per_minute == 0 {
            return Err(GenerationError::InvalidConfig(
                "requests per minute must be at least 1".to_string(),
            ));
        }
        if self.rate_window.is_zero() {
            return Err(GenerationError::InvalidConfig(
                "rate window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Batch size actually used for dispatch.
    ///
    /// A batch larger than the per-credential limit could never be assigned,
    /// so it is clamped to the limit.
    ///
    /// ```
    /// use stock_metadata_batch::GeneratorConfig;
    ///
    /// let config = GeneratorConfig::builder()
    ///     .with_batch_size(5)
    ///     .with_requests_per_minute(2)
    ///     .build();
    ///
    /// assert_eq!(config.effective_batch_size(), 2);
    /// ```
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(self.requests_per_minute).max(1)
    }
}

/// Builder for [`GeneratorConfig`].
#[derive(Default)]
pub struct GeneratorConfigBuilder {
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    /// See [`GeneratorConfig::batch_size`] for how this interacts with
    /// [`ControlSettings::batch_size`].
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn with_requests_per_minute(mut self, limit: usize) -> Self {
        self.config.requests_per_minute = limit;
        self
    }

    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.config.rate_window = window;
        self
    }

    pub fn with_wait_margin(mut self, margin: Duration) -> Self {
        self.config.wait_margin = margin;
        self
    }

    pub fn with_status_tick(mut self, tick: Duration) -> Self {
        self.config.status_tick = tick;
        self
    }

    pub fn with_retry_settle_delay(mut self, delay: Duration) -> Self {
        self.config.retry_settle_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Cap the number of calls per attempt (default: unlimited).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.backoff.max_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> GeneratorConfig {
        self.config
    }
}

/// Extra phrases appended to titles and keywords in metadata mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdvanceTitle {
    pub transparent_bg: bool,
    pub white_bg: bool,
    pub vector: bool,
    pub illustration: bool,
}

impl AdvanceTitle {
    /// Enabled augmentations, in the order they are appended.
    pub fn phrases(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.transparent_bg {
            out.push("isolated on transparent background");
        }
        if self.white_bg {
            out.push("isolated on white background");
        }
        if self.vector {
            out.push("Vector");
        }
        if self.illustration {
            out.push("illustration");
        }
        out
    }
}

/// Style switches for prompt mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromptSwitches {
    pub silhouette: bool,
    pub white_bg: bool,
    pub transparent_bg: bool,
    pub custom_prompt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomPromptSelect {
    #[default]
    Default,
    SetCustom,
}

/// User-facing generation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlSettings {
    pub active_tab: GenerationMode,
    pub title_length: u32,
    pub desc_length: u32,
    pub keywords_count: usize,
    pub batch_size: usize,
    pub advance_title: AdvanceTitle,
    pub custom_prompt_select: CustomPromptSelect,
    pub custom_prompt_entry: String,
    pub desc_words: u32,
    pub prompt_switches: PromptSwitches,
    pub custom_prompt_entry_prompt: String,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            active_tab: GenerationMode::Metadata,
            title_length: 60,
            desc_length: 150,
            keywords_count: 30,
            batch_size: DEFAULT_BATCH_SIZE,
            advance_title: AdvanceTitle::default(),
            custom_prompt_select: CustomPromptSelect::Default,
            custom_prompt_entry: String::new(),
            desc_words: 40,
            prompt_switches: PromptSwitches::default(),
            custom_prompt_entry_prompt: String::new(),
        }
    }
}
