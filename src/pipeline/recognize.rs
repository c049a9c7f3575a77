//! Recognition: one page image → its text.
//!
//! [`RecognitionBackend`] is the seam to the multimodal model;
//! [`VisionRecognizer`] implements it over an `edgequake_llm` provider. The
//! [`RecognitionClient`] wraps a backend with the recognition governor, the
//! retry policy and output cleanup, and is what the orchestrator calls.
//!
//! Text files stand in for pages without a model call: a `.txt` or `.md`
//! page is read verbatim with confidence 1.0. That keeps already-digital
//! documents on the same job path as scans.

use crate::config::{PipelineConfig, RecognitionConfig, DEFAULT_RECOGNITION_MODEL};
use crate::error::{BackendError, DocTransError, UnitError};
use crate::governor::AdmissionGovernor;
use crate::pipeline::cleanup::clean_recognized_text;
use crate::pipeline::encode::encode_page_bytes;
use crate::prompts::{is_grounding_model, recognition_prompt};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Text extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: Option<f32>,
}

/// A multimodal model able to read one page image.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<Recognition, BackendError>;

    /// Whether the output carries grounding layout markup.
    fn grounding(&self) -> bool {
        false
    }
}

// ── Vision provider backend ──────────────────────────────────────────────────

/// Recognition through an `edgequake_llm` vision provider.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, config: &RecognitionConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl RecognitionBackend for VisionRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<Recognition, BackendError> {
        let image = encode_page_bytes(image).map_err(|e| BackendError::InvalidInput(e.to_string()))?;

        // One user turn: the instruction plus the page image.
        let messages = vec![ChatMessage::user_with_images(
            recognition_prompt(&self.model),
            vec![image],
        )];

        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| BackendError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "Recognition: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(BackendError::MalformedResponse(
                "model returned no text".into(),
            ));
        }
        Ok(Recognition {
            text: response.content,
            confidence: None,
        })
    }

    fn grounding(&self) -> bool {
        is_grounding_model(&self.model)
    }
}

/// Map a provider error message onto a retry class.
fn classify_provider_error(msg: &str) -> BackendError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized") || lower.contains("invalid api key") {
        BackendError::Auth(msg.to_string())
    } else {
        BackendError::Transport(msg.to_string())
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DocTransError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocTransError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), created through
///    [`ProviderFactory::create_llm_provider`], which reads the provider's key.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
///
/// Returns the provider and the model name that drives prompt selection.
pub fn resolve_provider(config: &RecognitionConfig) -> Result<(Arc<dyn LLMProvider>, String), DocTransError> {
    let model = config.model.clone();

    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), model.unwrap_or_default()));
    }

    if let Some(ref name) = config.provider_name {
        let model = model.unwrap_or_else(|| DEFAULT_RECOGNITION_MODEL.to_string());
        return Ok((create_vision_provider(name, &model)?, model));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            let model = model.unwrap_or(env_model);
            return Ok((create_vision_provider(&prov, &model)?, model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = model.unwrap_or_else(|| "gpt-4.1-nano".to_string());
            return Ok((create_vision_provider("openai", &model)?, model));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocTransError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, model.unwrap_or_default()))
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Governed, retried recognition of page files.
#[derive(Clone)]
pub struct RecognitionClient {
    backend: Arc<dyn RecognitionBackend>,
    governor: Arc<AdmissionGovernor>,
    retry: RetryPolicy,
}

impl RecognitionClient {
    pub fn new(backend: Arc<dyn RecognitionBackend>, governor: Arc<AdmissionGovernor>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            governor,
            retry,
        }
    }

    /// Resolve the vision provider and wrap it.
    pub fn from_config(config: &PipelineConfig, governor: Arc<AdmissionGovernor>) -> Result<Self, DocTransError> {
        let (provider, model) = resolve_provider(&config.recognition)?;
        info!("Recognition model: {}", if model.is_empty() { "<provider default>" } else { &model });
        let backend = VisionRecognizer::new(provider, model, &config.recognition);
        Ok(Self::new(Arc::new(backend), governor, config.retry.clone()))
    }

    /// Recognize page `page_number` stored at `path`.
    ///
    /// Failures are per-page: the caller records them and moves on.
    pub async fn recognize_page(&self, page_number: usize, path: &Path) -> Result<Recognition, UnitError> {
        if is_text_page(path) {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| unreadable(page_number, path, e))?;
            return Ok(Recognition {
                text: clean_recognized_text(&text, false),
                confidence: Some(1.0),
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| unreadable(page_number, path, e))?;
        self.recognize_bytes(page_number, &bytes).await
    }

    /// Recognize an in-memory page image.
    pub async fn recognize_bytes(&self, page_number: usize, bytes: &[u8]) -> Result<Recognition, UnitError> {
        let backend = &self.backend;
        let governor = &self.governor;
        let label = format!("Page {page_number}");

        let result = self
            .retry
            .run(
                &label,
                || async move {
                    let _permit = governor.acquire().await?;
                    backend.recognize(bytes).await
                },
                BackendError::is_retryable,
            )
            .await;

        match result {
            Ok(recognition) => Ok(Recognition {
                text: clean_recognized_text(&recognition.text, backend.grounding()),
                confidence: recognition.confidence,
            }),
            Err(e) => Err(UnitError::RecognitionFailed {
                page: page_number,
                attempts: e.attempts(),
                detail: e.into_inner().to_string(),
            }),
        }
    }
}

fn is_text_page(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
}

fn unreadable(page: usize, path: &Path, e: std::io::Error) -> UnitError {
    UnitError::SourceUnreadable {
        page,
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}
