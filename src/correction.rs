//! User-approved corrections and how they are matched and selected.
//!
//! A [`Correction`] overrides the translation of one source text. The
//! [`CorrectionMatcher`] uses them in two ways:
//!
//! 1. **Direct reuse.** Before a unit is sent to the LLM, the matcher looks
//!    for a correction whose source is the same text (exact match) or is
//!    close in embedding space ([`CorrectionMatcher::find_similar`]). A hit
//!    replaces the LLM call.
//! 2. **Prompt examples.** Otherwise a bounded set of recent corrections is
//!    rendered into the system prompt ([`CorrectionMatcher::prompt_selection`])
//!    so the model stays consistent with earlier choices.
//!
//! Matching never fails a translation: store or embedding trouble is logged
//! and the unit falls back to a plain LLM call.

use crate::error::StoreError;
use crate::pipeline::embed::EmbeddingClient;
use crate::store::CorrectionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A user-approved source → target override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub id: Uuid,
    pub source_text: String,
    pub corrected_translation: String,
    pub source_language: String,
    pub target_language: String,
    /// Embedding of `source_text`; absent when the embedding backend was
    /// unavailable at creation time.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the user when creating a correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCorrection {
    pub source_text: String,
    pub corrected_translation: String,
    pub source_language: String,
    pub target_language: String,
}

impl NewCorrection {
    pub fn new(
        source_text: impl Into<String>,
        corrected_translation: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            corrected_translation: corrected_translation.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
        }
    }
}

impl Correction {
    pub fn from_new(new: NewCorrection, embedding: Option<Vec<f32>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_text: new.source_text,
            corrected_translation: new.corrected_translation,
            source_language: new.source_language,
            target_language: new.target_language,
            embedding,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A correction reduced to what the prompt needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptExample {
    pub source: String,
    pub translation: String,
}

// ── Pure selection logic ─────────────────────────────────────────────────────

/// Cosine similarity of two vectors; 0.0 when either is empty, has zero norm,
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Rough token count of a correction: one token per three characters.
pub fn estimated_tokens(source: &str, translation: &str) -> usize {
    (source.chars().count() + translation.chars().count()) / 3
}

/// Candidates whose embedding is at least `threshold` similar to `query`,
/// in candidate order.
pub fn similar_to(query: &[f32], candidates: Vec<Correction>, threshold: f32) -> Vec<Correction> {
    candidates
        .into_iter()
        .filter(|c| {
            c.embedding
                .as_deref()
                .is_some_and(|e| cosine_similarity(query, e) >= threshold)
        })
        .collect()
}

/// Greedy prompt packing: most recently used first, stop at the first
/// correction that would push the running total over `token_budget`.
pub fn select_for_prompt(mut candidates: Vec<Correction>, token_budget: usize) -> Vec<PromptExample> {
    crate::store::sort_by_recency(&mut candidates);

    let mut used = 0usize;
    let mut selected = Vec::new();
    for c in candidates {
        let cost = estimated_tokens(&c.source_text, &c.corrected_translation);
        if used + cost > token_budget {
            break;
        }
        used += cost;
        selected.push(PromptExample {
            source: c.source_text,
            translation: c.corrected_translation,
        });
    }
    selected
}

// ── Matcher ──────────────────────────────────────────────────────────────────

/// Looks up corrections for a unit of source text.
#[derive(Clone)]
pub struct CorrectionMatcher {
    store: Arc<dyn CorrectionStore>,
    embedder: Option<Arc<EmbeddingClient>>,
    threshold: f32,
}

impl std::fmt::Debug for CorrectionMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionMatcher")
            .field("embedder", &self.embedder.is_some())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl CorrectionMatcher {
    pub fn new(
        store: Arc<dyn CorrectionStore>,
        embedder: Option<Arc<EmbeddingClient>>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            threshold,
        }
    }

    /// Corrections for the pair whose embedding is within `threshold` of the
    /// embedding of `text`. Empty when no embedder is configured or the
    /// embedding call fails.
    pub async fn find_similar(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        threshold: f32,
    ) -> Vec<Correction> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };

        let candidates: Vec<Correction> = match self
            .store
            .load_corrections(source_language, target_language)
            .await
        {
            Ok(all) => all.into_iter().filter(|c| c.embedding.is_some()).collect(),
            Err(e) => {
                warn!("Correction lookup failed, continuing without: {}", e);
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        match embedder.embed(text).await {
            Ok(query) => similar_to(&query, candidates, threshold),
            Err(e) => {
                warn!("Embedding failed, skipping similar corrections: {}", e);
                Vec::new()
            }
        }
    }

    /// Best stored correction for `text`: an exact source match first, then
    /// the first similar one. A hit counts as a use.
    pub async fn best_match(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Option<Correction> {
        let wanted = text.trim();
        let exact = match self
            .store
            .load_corrections(source_language, target_language)
            .await
        {
            Ok(all) => all.into_iter().find(|c| c.source_text.trim() == wanted),
            Err(e) => {
                warn!("Correction lookup failed, continuing without: {}", e);
                return None;
            }
        };

        let hit = match exact {
            Some(c) => Some(c),
            None => self
                .find_similar(text, source_language, target_language, self.threshold)
                .await
                .into_iter()
                .next(),
        }?;

        debug!("Reusing correction {} for '{}'", hit.id, wanted);
        if let Err(e) = self.store.increment_usage(hit.id).await {
            warn!("Could not record use of correction {}: {}", hit.id, e);
        }
        Some(hit)
    }

    /// Recent corrections for the pair that fit in `token_budget`.
    pub async fn prompt_selection(
        &self,
        source_language: &str,
        target_language: &str,
        token_budget: usize,
    ) -> Vec<PromptExample> {
        match self
            .store
            .load_corrections(source_language, target_language)
            .await
        {
            Ok(all) => select_for_prompt(all, token_budget),
            Err(e) => {
                warn!("Correction lookup failed, prompt has no examples: {}", e);
                Vec::new()
            }
        }
    }

    /// Store a new correction, embedding its source text when possible.
    pub async fn create(&self, new: NewCorrection) -> Result<Correction, StoreError> {
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&new.source_text).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Storing correction without embedding: {}", e);
                    None
                }
            },
            None => None,
        };
        let correction = Correction::from_new(new, embedding);
        self.store.insert_correction(&correction).await?;
        Ok(correction)
    }
}
