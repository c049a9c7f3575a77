//! Embeddings for correction matching.
//!
//! [`GeminiEmbedder`] calls `POST {base}/models/{model}:embedContent?key=…`
//! and reads `embedding.values`. [`EmbeddingClient`] puts the embedding
//! governor and the retry policy in front of any [`EmbeddingBackend`].

use crate::config::{EmbeddingConfig, PipelineConfig};
use crate::error::{BackendError, DocTransError, RetryError};
use crate::governor::AdmissionGovernor;
use crate::pipeline::http;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

pub struct GeminiEmbedder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiEmbedder {
    /// `None` when no API key is configured.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>, DocTransError> {
        let Some(api_key) = config.endpoint.api_key.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            http: http::client(config.timeout)?,
            api_base: config.endpoint.api_base.clone(),
            api_key,
            model: config.endpoint.model.clone(),
            timeout: config.timeout,
        }))
    }
}

pub fn embed_content_body(model: &str, text: &str) -> Value {
    json!({
        "model": format!("models/{model}"),
        "content": { "parts": [ { "text": text } ] },
    })
}

pub fn parse_embedding(body: &Value) -> Result<Vec<f32>, BackendError> {
    let values = body
        .pointer("/embedding/values")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::MalformedResponse("missing embedding.values".into()))?;
    let vector: Vec<f32> = values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
    if vector.is_empty() || vector.len() != values.len() {
        return Err(BackendError::MalformedResponse(
            "embedding.values is empty or not numeric".into(),
        ));
    }
    Ok(vector)
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let answer = http::post_json(
            &self.http,
            &url,
            None,
            &embed_content_body(&self.model, text),
            self.timeout,
        )
        .await?;
        parse_embedding(&answer)
    }
}

/// Governed, retried embedding.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    governor: Arc<AdmissionGovernor>,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, governor: Arc<AdmissionGovernor>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            governor,
            retry,
        }
    }

    /// `None` when the embedding endpoint has no key; matching then falls
    /// back to exact reuse only.
    pub fn from_config(config: &PipelineConfig, governor: Arc<AdmissionGovernor>) -> Result<Option<Self>, DocTransError> {
        let Some(embedder) = GeminiEmbedder::from_config(&config.embedding)? else {
            info!("No embedding key configured; corrections match exactly only");
            return Ok(None);
        };
        Ok(Some(Self::new(Arc::new(embedder), governor, config.retry.clone())))
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RetryError<BackendError>> {
        let backend = &self.backend;
        let governor = &self.governor;
        self.retry
            .run(
                "Embedding",
                || async move {
                    let _permit = governor.acquire().await?;
                    backend.embed(text).await
                },
                BackendError::is_retryable,
            )
            .await
    }
}
