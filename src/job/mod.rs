//! Jobs: the persisted record of one OCR and/or translation run.
//!
//! A [`Job`] is mutated only by the orchestrator task that owns it. Everything
//! in it is serialisable so a [`crate::store::JobStore`] can checkpoint it
//! after every unit and a later process can resume from `cursor`.
//!
//! Invariants kept by the orchestrator:
//!
//! - `0 <= cursor <= total`
//! - `results.len() == cursor` while the job is not FAILED
//! - `results` is append-only within a stage

pub mod orchestrator;
pub mod plan;
pub mod registry;

use crate::error::UnitError;
use crate::segment::PageText;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub use orchestrator::{JobRequest, JobTicket, Orchestrator, Resumed};
pub use plan::{Unit, UnitPayload};
pub use registry::{ControlGuard, ControlRegistry, ControlState, JobControl};

// ── Identity ─────────────────────────────────────────────────────────────────

/// Unique, time-ordered job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// ── Kind, status, stage ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ocr,
    Translate,
    OcrThenTranslate,
}

impl JobKind {
    /// The stage a fresh job of this kind starts in.
    pub fn first_stage(self) -> Stage {
        match self {
            JobKind::Ocr | JobKind::OcrThenTranslate => Stage::Recognition,
            JobKind::Translate => Stage::Translation,
        }
    }

    pub fn needs_recognition(self) -> bool {
        matches!(self, JobKind::Ocr | JobKind::OcrThenTranslate)
    }

    pub fn needs_translation(self) -> bool {
        matches!(self, JobKind::Translate | JobKind::OcrThenTranslate)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            JobKind::Ocr => "ocr",
            JobKind::Translate => "translate",
            JobKind::OcrThenTranslate => "ocr_then_translate",
        })
    }
}

/// Lifecycle status.
///
/// ```text
/// PENDING ─▶ PROCESSING ─┬─▶ COMPLETED
///                 ▲  │   ├─▶ FAILED
///                 │  ▼   └─▶ STOPPED
///                PAUSED ────▶ STOPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Completed | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

/// Which unit list `cursor` and `results` currently describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Recognition,
    Translation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Stage::Recognition => "recognition",
            Stage::Translation => "translation",
        })
    }
}

// ── Source material ──────────────────────────────────────────────────────────

/// What a job was created from. Units are always re-derived from this, so it
/// must never change after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
    /// Page images (or `.txt`/`.md` files standing in for pages), in page order.
    Images { pages: Vec<PathBuf> },
    /// Plain text to translate.
    Text { text: String },
    /// Page texts, e.g. taken from a completed OCR job.
    Pages { pages: Vec<PageText> },
}

/// Source and target language codes. `source` may be `"auto"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn is_auto(&self) -> bool {
        self.source.trim().eq_ignore_ascii_case("auto")
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Output of one recognition unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedPage {
    /// 1-based page number.
    pub page_number: usize,
    /// Extracted text; empty when the page failed.
    pub text: String,
    pub confidence: Option<f32>,
    pub error: Option<UnitError>,
}

/// Output of one translation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedUnit {
    pub source: String,
    /// Translated text, or a `[Translation Error: ...]` placeholder.
    pub translation: String,
    /// Pages the source sentence was taken from.
    pub page_numbers: Vec<usize>,
    /// Set when the translation came from a stored correction.
    pub from_correction: bool,
    pub error: Option<UnitError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitResult {
    Page(RecognizedPage),
    Sentence(TranslatedUnit),
}

impl UnitResult {
    pub fn is_error(&self) -> bool {
        match self {
            UnitResult::Page(p) => p.error.is_some(),
            UnitResult::Sentence(s) => s.error.is_some(),
        }
    }
}

// ── Job ──────────────────────────────────────────────────────────────────────

/// One OCR or translation run with its persisted progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage: Stage,
    pub source: JobSource,
    /// Required for kinds with a translation stage.
    pub languages: Option<LanguagePair>,
    /// Unit count of the current stage.
    pub total: usize,
    /// Index of the next unit to process in the current stage.
    pub cursor: usize,
    pub results: Vec<UnitResult>,
    /// Pages produced by a finished recognition stage.
    #[serde(default)]
    pub recognized: Vec<RecognizedPage>,
    pub message: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, source: JobSource, languages: Option<LanguagePair>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Pending,
            stage: kind.first_stage(),
            source,
            languages,
            total: 0,
            cursor: 0,
            results: Vec::new(),
            recognized: Vec::new(),
            message: "Pending".into(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Recognized pages: the finished recognition stage, or the results of
    /// the recognition stage in progress.
    pub fn pages(&self) -> Vec<RecognizedPage> {
        if !self.recognized.is_empty() {
            return self.recognized.clone();
        }
        self.results
            .iter()
            .filter_map(|r| match r {
                UnitResult::Page(p) => Some(p.clone()),
                UnitResult::Sentence(_) => None,
            })
            .collect()
    }

    /// Recognized text of every page, separated by blank lines.
    pub fn recognized_text(&self) -> String {
        self.pages()
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Translated units so far, in order.
    pub fn translations(&self) -> impl Iterator<Item = &TranslatedUnit> {
        self.results.iter().filter_map(|r| match r {
            UnitResult::Sentence(s) => Some(s),
            UnitResult::Page(_) => None,
        })
    }

    /// Translations joined with single spaces; errors keep their placeholder.
    pub fn translated_text(&self) -> String {
        self.translations()
            .map(|t| t.translation.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn progress(&self, live: bool) -> JobProgress {
        JobProgress {
            id: self.id,
            kind: self.kind,
            status: self.status,
            stage: self.stage,
            cursor: self.cursor,
            total: self.total,
            message: self.message.clone(),
            partial_results: self.results.clone(),
            error: self.error.clone(),
            live,
        }
    }
}

/// Read-only snapshot returned by [`Orchestrator::progress`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage: Stage,
    pub cursor: usize,
    pub total: usize,
    pub message: String,
    pub partial_results: Vec<UnitResult>,
    pub error: Option<String>,
    /// Whether a run for this job is active in this process.
    pub live: bool,
}

impl JobProgress {
    /// Completed share of the current stage, 0–100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return if self.status == JobStatus::Completed { 100 } else { 0 };
        }
        ((self.cursor.min(self.total) * 100) / self.total) as u8
    }
}
