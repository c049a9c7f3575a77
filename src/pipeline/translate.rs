//! Translation: one sentence → its translation.
//!
//! Two wire dialects implement [`TranslationBackend`]:
//!
//! - [`ChatCompletionsDialect`]: OpenAI-style `POST {base}/chat/completions`
//!   with a system and a user message, bearer auth.
//! - [`GenerateContentDialect`]: single-turn
//!   `POST {base}/models/{model}:generateContent?key=…`; the system prompt and
//!   the text are combined into one user part.
//!
//! The dialect is chosen once, in [`build_backend`], from the configured base
//! URL and model. [`TranslationClient`] adds correction reuse, prompt
//! assembly, the translation governor and retries on top.

use crate::config::{PipelineConfig, TranslationConfig};
use crate::correction::CorrectionMatcher;
use crate::error::{BackendError, DocTransError, UnitError};
use crate::governor::AdmissionGovernor;
use crate::pipeline::http;
use crate::prompts::{single_turn_prompt, translation_system_prompt};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An LLM able to translate a text under a system prompt.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(&self, text: &str, system_prompt: &str) -> Result<String, BackendError>;
}

// ── Dialect selection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    ChatCompletions,
    GenerateContent,
}

/// Google endpoints and Gemini models speak `generateContent`; everything
/// else is assumed OpenAI-compatible.
pub fn select_dialect(api_base: &str, model: &str) -> Dialect {
    if api_base.contains("generativelanguage.googleapis.com") || model.to_ascii_lowercase().contains("gemini") {
        Dialect::GenerateContent
    } else {
        Dialect::ChatCompletions
    }
}

/// Construct the backend for the configured endpoint.
pub fn build_backend(config: &TranslationConfig) -> Result<Arc<dyn TranslationBackend>, DocTransError> {
    let Some(api_key) = config.endpoint.api_key.clone() else {
        return Err(DocTransError::ProviderNotConfigured {
            provider: "translation".into(),
            hint: "Set DOCTRANS_TRANSLATE_API_KEY (and optionally DOCTRANS_TRANSLATE_API_BASE / \
                   DOCTRANS_TRANSLATE_MODEL) or pass --translate-api-key."
                .into(),
        });
    };
    let http = http::client(config.timeout)?;
    let dialect = select_dialect(&config.endpoint.api_base, &config.endpoint.model);
    info!(
        "Translation endpoint: {} ({:?}, model {})",
        config.endpoint.api_base, dialect, config.endpoint.model
    );

    let backend: Arc<dyn TranslationBackend> = match dialect {
        Dialect::ChatCompletions => Arc::new(ChatCompletionsDialect {
            http,
            api_base: config.endpoint.api_base.clone(),
            api_key,
            model: config.endpoint.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }),
        Dialect::GenerateContent => Arc::new(GenerateContentDialect {
            http,
            api_base: config.endpoint.api_base.clone(),
            api_key,
            model: config.endpoint.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }),
    };
    Ok(backend)
}

// ── Chat completions ─────────────────────────────────────────────────────────

pub struct ChatCompletionsDialect {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

pub fn chat_completions_body(model: &str, system_prompt: &str, text: &str, temperature: f32, max_tokens: usize) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": text },
        ],
        "temperature": temperature,
        "max_tokens": max_tokens,
    })
}

pub fn parse_chat_completion(body: &Value) -> Result<String, BackendError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| BackendError::MalformedResponse("missing choices[0].message.content".into()))
}

#[async_trait]
impl TranslationBackend for ChatCompletionsDialect {
    async fn translate(&self, text: &str, system_prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = chat_completions_body(&self.model, system_prompt, text, self.temperature, self.max_tokens);
        let answer = http::post_json(&self.http, &url, Some(&self.api_key), &body, self.timeout).await?;
        if let Some(usage) = answer.get("usage") {
            debug!("Translation usage: {}", usage);
        }
        parse_chat_completion(&answer)
    }
}

// ── Generate content ─────────────────────────────────────────────────────────

pub struct GenerateContentDialect {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

pub fn generate_content_body(system_prompt: &str, text: &str, temperature: f32, max_tokens: usize) -> Value {
    json!({
        "contents": [
            { "parts": [ { "text": single_turn_prompt(system_prompt, text) } ] }
        ],
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_tokens,
        },
    })
}

pub fn parse_generate_content(body: &Value) -> Result<String, BackendError> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| BackendError::MalformedResponse("missing candidates[0].content.parts[0].text".into()))
}

#[async_trait]
impl TranslationBackend for GenerateContentDialect {
    async fn translate(&self, text: &str, system_prompt: &str) -> Result<String, BackendError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let body = generate_content_body(system_prompt, text, self.temperature, self.max_tokens);
        let answer = http::post_json(&self.http, &url, None, &body, self.timeout).await?;
        if let Some(usage) = answer.get("usageMetadata") {
            debug!("Translation usage: {}", usage);
        }
        parse_generate_content(&answer)
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// A translated unit and where the translation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub from_correction: bool,
}

/// Correction-aware, governed, retried translation.
#[derive(Clone)]
pub struct TranslationClient {
    backend: Arc<dyn TranslationBackend>,
    governor: Arc<AdmissionGovernor>,
    retry: RetryPolicy,
    matcher: Option<CorrectionMatcher>,
    token_budget: usize,
    max_examples: usize,
}

impl TranslationClient {
    pub fn new(backend: Arc<dyn TranslationBackend>, governor: Arc<AdmissionGovernor>, retry: RetryPolicy) -> Self {
        let defaults = crate::config::CorrectionConfig::default();
        Self {
            backend,
            governor,
            retry,
            matcher: None,
            token_budget: defaults.token_budget,
            max_examples: defaults.max_examples,
        }
    }

    /// Consult `matcher` before every call and feed it into the prompt.
    pub fn with_corrections(mut self, matcher: CorrectionMatcher, token_budget: usize, max_examples: usize) -> Self {
        self.matcher = Some(matcher);
        self.token_budget = token_budget;
        self.max_examples = max_examples;
        self
    }

    /// Build the HTTP backend from config. `matcher` is ignored when
    /// corrections are disabled.
    pub fn from_config(
        config: &PipelineConfig,
        governor: Arc<AdmissionGovernor>,
        matcher: Option<CorrectionMatcher>,
    ) -> Result<Self, DocTransError> {
        let client = Self::new(build_backend(&config.translation)?, governor, config.retry.clone());
        Ok(match matcher {
            Some(m) if config.corrections.enabled => {
                client.with_corrections(m, config.corrections.token_budget, config.corrections.max_examples)
            }
            _ => client,
        })
    }

    /// Translate unit `ordinal`. Failures are per-unit.
    pub async fn translate_unit(
        &self,
        ordinal: usize,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Translation, UnitError> {
        if let Some(matcher) = &self.matcher {
            if let Some(hit) = matcher.best_match(text, source_language, target_language).await {
                return Ok(Translation {
                    text: hit.corrected_translation,
                    from_correction: true,
                });
            }
        }

        let examples = match &self.matcher {
            Some(matcher) => {
                matcher
                    .prompt_selection(source_language, target_language, self.token_budget)
                    .await
            }
            None => Vec::new(),
        };
        let system_prompt = translation_system_prompt(source_language, target_language, &examples, self.max_examples);

        let backend = &self.backend;
        let governor = &self.governor;
        let prompt = system_prompt.as_str();
        let label = format!("Unit {ordinal}");

        self.retry
            .run(
                &label,
                || async move {
                    let _permit = governor.acquire().await?;
                    backend.translate(text, prompt).await
                },
                BackendError::is_retryable,
            )
            .await
            .map(|text| Translation {
                text,
                from_correction: false,
            })
            .map_err(|e| UnitError::TranslationFailed {
                ordinal,
                detail: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::NewCorrection;
    use crate::governor::GovernorLimits;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TranslationBackend for RecordingBackend {
        async fn translate(&self, text: &str, system_prompt: &str) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(system_prompt.to_string());
            Ok(format!("<{text}>"))
        }
    }

    struct DownBackend;

    #[async_trait]
    impl TranslationBackend for DownBackend {
        async fn translate(&self, _: &str, _: &str) -> Result<String, BackendError> {
            Err(BackendError::Transport("connection refused".into()))
        }
    }

    fn governor() -> Arc<AdmissionGovernor> {
        Arc::new(AdmissionGovernor::new("translation", GovernorLimits::per_minute(60, 5)))
    }

    #[test]
    fn dialect_follows_endpoint_and_model() {
        assert_eq!(select_dialect("https://api.openai.com/v1", "gpt-4"), Dialect::ChatCompletions);
        assert_eq!(
            select_dialect("https://generativelanguage.googleapis.com/v1beta", "x"),
            Dialect::GenerateContent
        );
        assert_eq!(select_dialect("https://proxy.local/v1", "Gemini-2.0-flash"), Dialect::GenerateContent);
    }

    #[test]
    fn chat_body_and_response_shape() {
        let body = chat_completions_body("gpt-4", "SYS", "Hallo", 0.3, 4000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hallo");
        assert_eq!(body["max_tokens"], 4000);

        let answer = json!({ "choices": [ { "message": { "content": " Hello \n" } } ] });
        assert_eq!(parse_chat_completion(&answer).unwrap(), "Hello");
        assert!(matches!(
            parse_chat_completion(&json!({ "choices": [] })),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[test]
    fn generate_content_body_and_response_shape() {
        let body = generate_content_body("SYS", "Hallo", 0.3, 4000);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "SYS\n\nText to translate:\nHallo");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4000);

        let answer = json!({ "candidates": [ { "content": { "parts": [ { "text": "Hello" } ] } } ] });
        assert_eq!(parse_generate_content(&answer).unwrap(), "Hello");
        assert!(parse_generate_content(&json!({})).is_err());
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = build_backend(&TranslationConfig::default()).err().unwrap();
        assert!(matches!(err, DocTransError::ProviderNotConfigured { .. }));
    }

    #[tokio::test]
    async fn exact_correction_skips_the_backend() {
        let store = Arc::new(MemoryStore::new());
        let matcher = CorrectionMatcher::new(store, None, 0.85);
        matcher
            .create(NewCorrection::new("Hello.", "Hallo!", "en", "de"))
            .await
            .unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let client = TranslationClient::new(backend.clone(), governor(), RetryPolicy::no_retry())
            .with_corrections(matcher, 4000, 10);

        let hit = client.translate_unit(0, "Hello.", "en", "de").await.unwrap();
        assert_eq!(hit, Translation { text: "Hallo!".into(), from_correction: true });
        assert!(backend.prompts.lock().unwrap().is_empty());

        let miss = client.translate_unit(1, "Bye.", "en", "de").await.unwrap();
        assert_eq!(miss.text, "<Bye.>");
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("1. \"Hello.\" → \"Hallo!\""));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_translation_is_a_unit_error() {
        let client = TranslationClient::new(
            Arc::new(DownBackend),
            governor(),
            RetryPolicy::new(2, vec![Duration::from_secs(1)]),
        );
        let err = client.translate_unit(7, "Hi.", "en", "de").await.unwrap_err();
        match err {
            UnitError::TranslationFailed { ordinal, detail } => {
                assert_eq!(ordinal, 7);
                assert!(detail.contains("connection refused"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
