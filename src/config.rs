//! Configuration for the job pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Defaults match what the hosted APIs tolerate in
//! practice: one request per second per API with five in flight, three
//! attempts with a 2 s / 4 s / 8 s backoff, and a one-second pause re-check.
//!
//! # Validation
//! Setters clamp obviously wrong values (a temperature of 7, zero attempts)
//! and [`PipelineConfigBuilder::build`] rejects combinations that cannot work,
//! so a bad config fails before any job is created.

use crate::error::DocTransError;
use crate::governor::GovernorLimits;
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Recognition model used when a provider is named without a model.
pub const DEFAULT_RECOGNITION_MODEL: &str = "deepseek-ai/DeepSeek-OCR";
pub const DEFAULT_TRANSLATION_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSLATION_MODEL: &str = "gpt-4";
pub const DEFAULT_EMBEDDING_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// An HTTP API reachable with a base URL, a key and a model name.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl EndpointConfig {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    /// Override base, key and model from `{prefix}_API_BASE`, `{prefix}_API_KEY`
    /// and `{prefix}_MODEL` when they are set and non-empty.
    pub fn overlay_env(mut self, prefix: &str) -> Self {
        let var = |suffix: &str| {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        if let Some(base) = var("API_BASE") {
            self.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(key) = var("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = var("MODEL") {
            self.model = model;
        }
        self
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .finish()
    }
}

// ── Per-backend settings ─────────────────────────────────────────────────────

/// Vision provider settings for the recognition stage.
#[derive(Clone)]
pub struct RecognitionConfig {
    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,
    /// Provider name (e.g. "openai", "ollama") for `ProviderFactory`.
    pub provider_name: Option<String>,
    /// Model identifier. Also selects the prompt and the cleanup rules.
    pub model: Option<String>,
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Output token cap per page. Default: 8000.
    pub max_tokens: usize,
    /// Per-call timeout. Default: 180 s; large scans are slow.
    pub timeout: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 8000,
            timeout: Duration::from_secs(180),
        }
    }
}

impl fmt::Debug for RecognitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionConfig")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationConfig {
    pub endpoint: EndpointConfig,
    /// Default: 0.3.
    pub temperature: f32,
    /// Default: 4000.
    pub max_tokens: usize,
    /// Default: 60 s.
    pub timeout: Duration,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::new(DEFAULT_TRANSLATION_API_BASE, DEFAULT_TRANSLATION_MODEL),
            temperature: 0.3,
            max_tokens: 4000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub endpoint: EndpointConfig,
    /// Default: 30 s.
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::new(DEFAULT_EMBEDDING_API_BASE, DEFAULT_EMBEDDING_MODEL),
            timeout: Duration::from_secs(30),
        }
    }
}

/// How stored corrections feed into translation.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionConfig {
    /// Reuse and inject corrections at all. Default: true.
    pub enabled: bool,
    /// Minimum cosine similarity for a reuse match. Default: 0.85.
    pub similarity_threshold: f32,
    /// Estimated tokens the prompt examples may use. Default: 4000.
    pub token_budget: usize,
    /// Hard cap on examples rendered into one prompt. Default: 10.
    pub max_examples: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            token_budget: 4000,
            max_examples: crate::prompts::MAX_PROMPT_EXAMPLES,
        }
    }
}

// ── PipelineConfig ───────────────────────────────────────────────────────────

/// Everything the clients and the orchestrator need.
///
/// # Example
/// ```rust
/// use edgequake_doctrans::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .max_attempts(5)
///     .retry_delays(vec![Duration::from_secs(1), Duration::from_secs(3)])
///     .translation_model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    /// Default: 60 requests / 60 s, 5 in flight.
    pub recognition_limits: GovernorLimits,
    /// Default: 60 requests / 60 s, 5 in flight.
    pub translation_limits: GovernorLimits,
    /// Default: 100 requests / 60 s, 10 in flight.
    pub embedding_limits: GovernorLimits,
    pub recognition: RecognitionConfig,
    pub translation: TranslationConfig,
    pub embedding: EmbeddingConfig,
    pub corrections: CorrectionConfig,
    /// Longest a paused job waits before re-checking its control flags.
    /// Default: 1 s.
    pub pause_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            recognition_limits: GovernorLimits::per_minute(60, 5),
            translation_limits: GovernorLimits::per_minute(60, 5),
            embedding_limits: GovernorLimits::per_minute(100, 10),
            recognition: RecognitionConfig::default(),
            translation: TranslationConfig::default(),
            embedding: EmbeddingConfig::default(),
            corrections: CorrectionConfig::default(),
            pause_poll: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults with translation and embedding endpoints read from
    /// `DOCTRANS_TRANSLATE_*` and `DOCTRANS_EMBEDDING_*`, and the retry
    /// policy from `DOCTRANS_MAX_ATTEMPTS` and `DOCTRANS_RETRY_DELAYS`
    /// (comma-separated seconds, e.g. `2,4,8`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.translation.endpoint = config.translation.endpoint.overlay_env("DOCTRANS_TRANSLATE");
        config.embedding.endpoint = config.embedding.endpoint.overlay_env("DOCTRANS_EMBEDDING");
        config.retry = overlay_retry(config.retry, |name| {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        });
        config
    }
}

/// Apply `DOCTRANS_MAX_ATTEMPTS` / `DOCTRANS_RETRY_DELAYS` as read by `var`.
/// Unparseable values are logged and ignored.
fn overlay_retry(mut retry: RetryPolicy, var: impl Fn(&str) -> Option<String>) -> RetryPolicy {
    if let Some(raw) = var("DOCTRANS_MAX_ATTEMPTS") {
        match raw.trim().parse::<u32>() {
            Ok(n) => retry.max_attempts = n.max(1),
            Err(e) => warn!("Ignoring DOCTRANS_MAX_ATTEMPTS={:?}: {}", raw, e),
        }
    }
    if let Some(raw) = var("DOCTRANS_RETRY_DELAYS") {
        match RetryPolicy::parse_delays(&raw) {
            Ok(delays) if !delays.is_empty() => retry.delays = delays,
            Ok(_) => warn!("Ignoring empty DOCTRANS_RETRY_DELAYS"),
            Err(e) => warn!("Ignoring DOCTRANS_RETRY_DELAYS={:?}: {}", raw, e),
        }
    }
    retry
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing config, e.g. [`PipelineConfig::from_env`].
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.config.retry.delays = delays;
        self
    }

    pub fn recognition_limits(mut self, limits: GovernorLimits) -> Self {
        self.config.recognition_limits = limits;
        self
    }

    pub fn translation_limits(mut self, limits: GovernorLimits) -> Self {
        self.config.translation_limits = limits;
        self
    }

    pub fn embedding_limits(mut self, limits: GovernorLimits) -> Self {
        self.config.embedding_limits = limits;
        self
    }

    pub fn recognition_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.recognition.provider = Some(provider);
        self
    }

    pub fn recognition_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.recognition.provider_name = Some(name.into());
        self
    }

    pub fn recognition_model(mut self, model: impl Into<String>) -> Self {
        self.config.recognition.model = Some(model.into());
        self
    }

    pub fn recognition_timeout(mut self, timeout: Duration) -> Self {
        self.config.recognition.timeout = timeout;
        self
    }

    pub fn translation_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.config.translation.endpoint = endpoint;
        self
    }

    pub fn translation_model(mut self, model: impl Into<String>) -> Self {
        self.config.translation.endpoint.model = model.into();
        self
    }

    pub fn translation_temperature(mut self, t: f32) -> Self {
        self.config.translation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn translation_max_tokens(mut self, n: usize) -> Self {
        self.config.translation.max_tokens = n;
        self
    }

    pub fn translation_timeout(mut self, timeout: Duration) -> Self {
        self.config.translation.timeout = timeout;
        self
    }

    pub fn embedding_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.config.embedding.endpoint = endpoint;
        self
    }

    pub fn corrections_enabled(mut self, enabled: bool) -> Self {
        self.config.corrections.enabled = enabled;
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.corrections.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn correction_token_budget(mut self, tokens: usize) -> Self {
        self.config.corrections.token_budget = tokens;
        self
    }

    pub fn pause_poll(mut self, interval: Duration) -> Self {
        self.config.pause_poll = interval;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocTransError> {
        let c = &self.config;
        for (name, limits) in [
            ("recognition", c.recognition_limits),
            ("translation", c.translation_limits),
            ("embedding", c.embedding_limits),
        ] {
            if limits.max_requests == 0 || limits.max_concurrent == 0 {
                return Err(DocTransError::InvalidConfig(format!(
                    "{name} limits must allow at least one request, got {limits:?}"
                )));
            }
            if limits.window.is_zero() {
                return Err(DocTransError::InvalidConfig(format!(
                    "{name} rate window must be longer than zero"
                )));
            }
        }
        if c.pause_poll.is_zero() {
            return Err(DocTransError::InvalidConfig(
                "pause poll interval must be longer than zero".into(),
            ));
        }
        if c.translation.endpoint.api_base.is_empty() {
            return Err(DocTransError::InvalidConfig(
                "translation API base URL is empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.retry.delays.len(), 3);
        assert_eq!(c.embedding_limits, GovernorLimits::per_minute(100, 10));
        assert_eq!(c.recognition.max_tokens, 8000);
        assert_eq!(c.translation.endpoint.model, "gpt-4");
        assert!((c.corrections.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(c.pause_poll, Duration::from_secs(1));
    }

    #[test]
    fn setters_clamp() {
        let c = PipelineConfig::builder()
            .max_attempts(0)
            .translation_temperature(9.0)
            .similarity_threshold(1.5)
            .build()
            .unwrap();
        assert_eq!(c.retry.max_attempts, 1);
        assert_eq!(c.translation.temperature, 2.0);
        assert_eq!(c.corrections.similarity_threshold, 1.0);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = PipelineConfig::builder()
            .translation_limits(GovernorLimits::per_minute(0, 5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("translation"));

        assert!(PipelineConfig::builder()
            .pause_poll(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn retry_settings_overlay_defaults() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |name: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.to_string())
            }
        };

        let retry = overlay_retry(
            RetryPolicy::default(),
            env(&[("DOCTRANS_MAX_ATTEMPTS", "5"), ("DOCTRANS_RETRY_DELAYS", "1, 3")]),
        );
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delays, vec![Duration::from_secs(1), Duration::from_secs(3)]);

        let retry = overlay_retry(
            RetryPolicy::default(),
            env(&[("DOCTRANS_MAX_ATTEMPTS", "many"), ("DOCTRANS_RETRY_DELAYS", "2,x")]),
        );
        assert_eq!(retry, RetryPolicy::default());

        let retry = overlay_retry(RetryPolicy::default(), env(&[("DOCTRANS_RETRY_DELAYS", " , ")]));
        assert_eq!(retry.delays.len(), 3);
    }

    #[test]
    fn endpoint_debug_masks_key() {
        let e = EndpointConfig::new("https://x/v1/", "m").with_api_key("sk-secret");
        assert_eq!(e.api_base, "https://x/v1");
        let shown = format!("{e:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("***"));
        assert!(!EndpointConfig::new("b", "m").with_api_key("  ").has_key());
    }
}
