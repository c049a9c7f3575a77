//! # edgequake-doctrans
//!
//! Resumable OCR and translation jobs over rate-limited model APIs.
//!
//! A job turns page images into text (recognition), text into sentences and
//! sentences into another language (translation), or both in sequence. Each
//! job is a list of units processed in order; after every unit the job is
//! checkpointed, so it can be paused, stopped and resumed, even from another
//! process.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submit ─▶ plan units ─▶ persist PENDING ─▶ run task
//!                                              │
//!        ┌─────────────── per unit ────────────┤
//!        │  control check (pause / stop)       │
//!        │  governor permit ─▶ backend call    │  retried with backoff
//!        │  append result, cursor += 1, save   │
//!        └─────────────────────────────────────┘
//!                                              │
//!                                    COMPLETED / STOPPED / FAILED
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doctrans::{
//!     FileStore, JobRequest, LanguagePair, Orchestrator, PipelineConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FileStore::open(".doctrans").await?);
//!     let config = PipelineConfig::from_env();
//!     let orchestrator = Orchestrator::from_config(&config, store.clone(), store)?;
//!
//!     let ticket = orchestrator
//!         .submit(JobRequest::translate_text(
//!             "The cat sat. The dog ran.",
//!             LanguagePair::new("en", "de"),
//!         ))
//!         .await?;
//!     let id = ticket.id;
//!     ticket.wait().await?;
//!
//!     let job = orchestrator.load(id).await?;
//!     println!("{}", job.translated_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doctrans` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod correction;
pub mod error;
pub mod governor;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod segment;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CorrectionConfig, EmbeddingConfig, EndpointConfig, PipelineConfig, PipelineConfigBuilder,
    RecognitionConfig, TranslationConfig,
};
pub use correction::{Correction, CorrectionMatcher, NewCorrection};
pub use error::{BackendError, DocTransError, RetryError, StoreError, UnitError};
pub use governor::{AdmissionGovernor, GovernorLimits, Governors};
pub use job::{
    ControlRegistry, Job, JobId, JobKind, JobProgress, JobRequest, JobSource, JobStatus, JobTicket,
    LanguagePair, Orchestrator, RecognizedPage, Resumed, Stage, TranslatedUnit, UnitResult,
};
pub use pipeline::recognize::{RecognitionBackend, RecognitionClient};
pub use pipeline::translate::{TranslationBackend, TranslationClient};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retry::RetryPolicy;
pub use segment::{detect_language, split_sentences, Language, PageText};
pub use store::{CorrectionStore, FileStore, JobStore, MemoryStore};
