//! The job state machine.
//!
//! One background task per job walks the units of the job's current stage in
//! order. Before each unit it reads the job's [`JobControl`]; after each unit
//! it appends the result, advances `cursor` and saves the whole job, so a
//! crash after unit *i* resumes at *i + 1* and never redoes *i*.
//!
//! ```text
//!            submit / resume
//!                  │
//!   PENDING ──▶ PROCESSING ──(cursor == total)──▶ COMPLETED
//!                 │   ▲   └──(store / planning error)──▶ FAILED
//!          pause  ▼   │ resume
//!                PAUSED
//!                 │ stop (from PROCESSING or PAUSED)
//!                 ▼
//!              STOPPED
//! ```
//!
//! A stop with no live run in this process marks the persisted job STOPPED
//! whatever its status, finished jobs included.
//!
//! ## Failure policy
//!
//! A unit that still fails after retries is recorded inline and the job moves
//! on: pages get an empty text with the error attached, sentences get a
//! `[Translation Error: …]` placeholder. Only whole-job problems (the store
//! refusing a checkpoint, units that cannot be planned) end in FAILED.
//!
//! ## Resumption
//!
//! [`Orchestrator::resume`] either clears the pause flag of a live run or,
//! when no run is live in this process (restart, crash, stop), re-plans the
//! units from the persisted source and starts a new run at the persisted
//! `cursor`. Planning is deterministic, so the new run sees the same units.

use super::plan::{plan_stage, StagePlan, Unit, UnitPayload};
use super::registry::{ControlGuard, ControlRegistry, JobControl};
use super::{
    Job, JobId, JobKind, JobProgress, JobSource, JobStatus, LanguagePair, RecognizedPage, Stage,
    TranslatedUnit, UnitResult,
};
use crate::config::PipelineConfig;
use crate::correction::CorrectionMatcher;
use crate::error::{DocTransError, UnitError};
use crate::governor::Governors;
use crate::pipeline::embed::EmbeddingClient;
use crate::pipeline::recognize::RecognitionClient;
use crate::pipeline::translate::TranslationClient;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::segment::PageText;
use crate::store::{CorrectionStore, JobStore};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub source: JobSource,
    pub languages: Option<LanguagePair>,
}

impl JobRequest {
    /// Recognize page images (or text files) in order.
    pub fn ocr(pages: Vec<PathBuf>) -> Self {
        Self {
            kind: JobKind::Ocr,
            source: JobSource::Images { pages },
            languages: None,
        }
    }

    /// Recognize pages, then translate the recognized text.
    pub fn ocr_then_translate(pages: Vec<PathBuf>, languages: LanguagePair) -> Self {
        Self {
            kind: JobKind::OcrThenTranslate,
            source: JobSource::Images { pages },
            languages: Some(languages),
        }
    }

    pub fn translate_text(text: impl Into<String>, languages: LanguagePair) -> Self {
        Self {
            kind: JobKind::Translate,
            source: JobSource::Text { text: text.into() },
            languages: Some(languages),
        }
    }

    pub fn translate_pages(pages: Vec<PageText>, languages: LanguagePair) -> Self {
        Self {
            kind: JobKind::Translate,
            source: JobSource::Pages { pages },
            languages: Some(languages),
        }
    }
}

/// Handle to a dispatched run.
#[derive(Debug)]
pub struct JobTicket {
    pub id: JobId,
    pub handle: JoinHandle<Result<JobStatus, DocTransError>>,
}

impl JobTicket {
    /// Wait for the run to end and return the status it ended in.
    pub async fn wait(self) -> Result<JobStatus, DocTransError> {
        self.handle
            .await
            .map_err(|e| DocTransError::Internal(format!("Job task panicked: {e}")))?
    }
}

/// Outcome of [`Orchestrator::resume`].
#[derive(Debug)]
pub enum Resumed {
    /// A live run was paused and has been told to continue.
    Signalled,
    /// No run was live; a new one was started from the persisted cursor.
    Restarted(JobTicket),
}

/// Drives jobs and answers control calls.
///
/// Cheap to clone; clones share the store, the registry and the clients.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<ControlRegistry>,
    recognition: Option<Arc<RecognitionClient>>,
    translation: Option<Arc<TranslationClient>>,
    pause_poll: Duration,
    progress: ProgressCallback,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("live_jobs", &self.registry.live_jobs())
            .field("recognition", &self.recognition.is_some())
            .field("translation", &self.translation.is_some())
            .field("pause_poll", &self.pause_poll)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<ControlRegistry>) -> Self {
        Self {
            store,
            registry,
            recognition: None,
            translation: None,
            pause_poll: Duration::from_secs(1),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Build every client the configuration allows.
    ///
    /// A client whose provider or key is missing is left out; submitting a
    /// job that needs it then fails with
    /// [`DocTransError::ProviderNotConfigured`].
    pub fn from_config(
        config: &PipelineConfig,
        jobs: Arc<dyn JobStore>,
        corrections: Arc<dyn CorrectionStore>,
    ) -> Result<Self, DocTransError> {
        let governors = Governors::from_config(config);
        let mut orchestrator = Self::new(jobs, ControlRegistry::new()).with_pause_poll(config.pause_poll);

        match RecognitionClient::from_config(config, Arc::clone(&governors.recognition)) {
            Ok(client) => orchestrator = orchestrator.with_recognition(client),
            Err(DocTransError::ProviderNotConfigured { hint, .. }) => {
                debug!("Recognition unavailable: {}", hint);
            }
            Err(e) => return Err(e),
        }

        let matcher = if config.corrections.enabled {
            let embedder = EmbeddingClient::from_config(config, Arc::clone(&governors.embedding))?;
            Some(CorrectionMatcher::new(
                corrections,
                embedder.map(Arc::new),
                config.corrections.similarity_threshold,
            ))
        } else {
            None
        };

        match TranslationClient::from_config(config, Arc::clone(&governors.translation), matcher) {
            Ok(client) => orchestrator = orchestrator.with_translation(client),
            Err(DocTransError::ProviderNotConfigured { hint, .. }) => {
                debug!("Translation unavailable: {}", hint);
            }
            Err(e) => return Err(e),
        }

        Ok(orchestrator)
    }

    pub fn with_recognition(mut self, client: RecognitionClient) -> Self {
        self.recognition = Some(Arc::new(client));
        self
    }

    pub fn with_translation(mut self, client: TranslationClient) -> Self {
        self.translation = Some(Arc::new(client));
        self
    }

    pub fn with_pause_poll(mut self, interval: Duration) -> Self {
        self.pause_poll = interval;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    pub fn registry(&self) -> &Arc<ControlRegistry> {
        &self.registry
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Validate, persist as PENDING and start a background run.
    ///
    /// Configuration problems are reported here, before anything is stored.
    pub async fn submit(&self, request: JobRequest) -> Result<JobTicket, DocTransError> {
        self.check_clients(request.kind)?;
        check_source(&request)?;

        let mut job = Job::new(request.kind, request.source, request.languages);
        job.total = plan_stage(&job)?.units.len();
        self.store.save(&job).await?;
        info!("Job {}: submitted ({}, {} units)", job.id, job.kind, job.total);

        self.dispatch(job)
    }

    /// Translate the pages of a completed recognition job as a new job.
    pub async fn submit_translation_of(
        &self,
        ocr_job: JobId,
        languages: LanguagePair,
    ) -> Result<JobTicket, DocTransError> {
        let job = self.load(ocr_job).await?;
        if !job.kind.needs_recognition() || job.status != JobStatus::Completed {
            return Err(DocTransError::InvalidConfig(format!(
                "job {ocr_job} is not a completed OCR job (kind {}, status {})",
                job.kind, job.status
            )));
        }
        let pages = job
            .pages()
            .into_iter()
            .filter(|p| p.error.is_none())
            .map(|p| PageText::new(p.page_number, p.text))
            .collect();
        self.submit(JobRequest::translate_pages(pages, languages)).await
    }

    // ── Control ──────────────────────────────────────────────────────────

    /// Ask a live run to pause before its next unit.
    pub fn pause(&self, id: JobId) -> Result<(), DocTransError> {
        let control = self.registry.get(id).ok_or(DocTransError::NotRunning { id })?;
        control.pause();
        info!("Job {}: pause requested", id);
        Ok(())
    }

    /// Continue a paused run, or restart a job that has no live run.
    pub async fn resume(&self, id: JobId) -> Result<Resumed, DocTransError> {
        if let Some(control) = self.registry.get(id) {
            control.resume();
            info!("Job {}: resume requested", id);
            return Ok(Resumed::Signalled);
        }

        let job = self.load(id).await?;
        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Err(DocTransError::CannotResume {
                id,
                reason: format!("job is {}", job.status),
            });
        }
        self.check_clients(job.kind)?;
        let plan = plan_stage(&job)?;
        if let Err(reason) = check_resumable(&job, &plan) {
            return Err(DocTransError::CannotResume { id, reason });
        }

        info!(
            "Job {}: restarting {} stage at unit {}/{}",
            id, job.stage, job.cursor, job.total
        );
        Ok(Resumed::Restarted(self.dispatch(job)?))
    }

    /// Stop a live run before its next unit. Without a live run (the job
    /// already finished, or was never tracked in this process) the persisted
    /// status is marked STOPPED directly, whatever it was.
    pub async fn stop(&self, id: JobId) -> Result<(), DocTransError> {
        if let Some(control) = self.registry.get(id) {
            control.stop();
            info!("Job {}: stop requested", id);
            return Ok(());
        }

        let mut job = self.load(id).await?;
        let previous = job.status;
        mark_stopped(&mut job);
        self.store.save(&job).await?;
        info!("Job {}: marked stopped (no live run, was {})", id, previous);
        Ok(())
    }

    /// Snapshot of a job's persisted state.
    pub async fn progress(&self, id: JobId) -> Result<JobProgress, DocTransError> {
        let job = self.load(id).await?;
        Ok(job.progress(self.registry.is_live(id)))
    }

    /// Load a job or fail with [`DocTransError::JobNotFound`].
    pub async fn load(&self, id: JobId) -> Result<Job, DocTransError> {
        self.store
            .load(id)
            .await?
            .ok_or(DocTransError::JobNotFound { id })
    }

    // ── Run loop ─────────────────────────────────────────────────────────

    fn check_clients(&self, kind: JobKind) -> Result<(), DocTransError> {
        if kind.needs_recognition() && self.recognition.is_none() {
            return Err(DocTransError::ProviderNotConfigured {
                provider: "recognition".into(),
                hint: "Configure a vision provider (OPENAI_API_KEY, or EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL).".into(),
            });
        }
        if kind.needs_translation() && self.translation.is_none() {
            return Err(DocTransError::ProviderNotConfigured {
                provider: "translation".into(),
                hint: "Set DOCTRANS_TRANSLATE_API_KEY.".into(),
            });
        }
        Ok(())
    }

    /// Register the control signal, then spawn the run.
    fn dispatch(&self, job: Job) -> Result<JobTicket, DocTransError> {
        let guard = self.registry.register(job.id)?;
        let id = job.id;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(job, guard).await });
        Ok(JobTicket { id, handle })
    }

    async fn run(self, mut job: Job, guard: ControlGuard) -> Result<JobStatus, DocTransError> {
        let id = job.id;
        match self.drive(&mut job, guard.control()).await {
            Ok(status) => {
                self.progress.on_job_finished(id, status);
                Ok(status)
            }
            Err(e) => {
                error!("Job {}: failed: {}", id, e);
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                job.message = format!("Failed at {}/{}", job.cursor, job.total);
                job.touch();
                if let Err(save_err) = self.store.save(&job).await {
                    error!("Job {}: could not persist failure: {}", id, save_err);
                }
                self.progress.on_job_finished(id, JobStatus::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&self, job: &mut Job, control: &JobControl) -> Result<JobStatus, DocTransError> {
        loop {
            let plan = plan_stage(job)?;
            if let Err(reason) = check_resumable(job, &plan) {
                return Err(DocTransError::CannotResume { id: job.id, reason });
            }
            job.total = plan.units.len();

            job.status = JobStatus::Processing;
            job.message = processing_message(job);
            job.touch();
            self.store.save(job).await?;
            info!(
                "Job {}: {} stage, unit {}/{}",
                job.id, job.stage, job.cursor, job.total
            );
            self.progress
                .on_stage_start(job.id, job.stage, job.cursor, job.total);

            while job.cursor < plan.units.len() {
                let state = control.state();
                if state.stopped {
                    return self.finish_stopped(job).await;
                }
                if state.paused {
                    job.status = JobStatus::Paused;
                    job.message = format!("Paused at {}/{}", job.cursor, job.total);
                    job.touch();
                    self.store.save(job).await?;
                    info!("Job {}: paused at {}/{}", job.id, job.cursor, job.total);
                    self.progress.on_paused(job.id, job.cursor, job.total);

                    let state = control.wait_while_paused(self.pause_poll).await;
                    if state.stopped {
                        return self.finish_stopped(job).await;
                    }

                    job.status = JobStatus::Processing;
                    job.message = processing_message(job);
                    job.touch();
                    self.store.save(job).await?;
                    info!("Job {}: resumed at {}/{}", job.id, job.cursor, job.total);
                    self.progress.on_resumed(job.id, job.cursor, job.total);
                }

                let unit = &plan.units[job.cursor];
                self.progress
                    .on_unit_start(job.id, job.stage, unit.ordinal, job.total);

                let result = self.process_unit(job.stage, unit, &plan).await?;
                let failure = unit_error(&result);
                if let Some(ref detail) = failure {
                    warn!("Job {}: unit {} failed: {}", job.id, unit.ordinal + 1, detail);
                }

                job.results.push(result);
                job.cursor += 1;
                job.message = processing_message(job);
                job.touch();
                self.store.save(job).await?;
                if let Some(detail) = failure {
                    self.progress
                        .on_unit_error(job.id, job.stage, unit.ordinal, &detail);
                }
                self.progress
                    .on_unit_complete(job.id, job.stage, job.cursor, job.total);
            }

            if job.kind == JobKind::OcrThenTranslate && job.stage == Stage::Recognition {
                self.switch_to_translation(job).await?;
                continue;
            }

            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.message = "Completed".into();
            job.touch();
            self.store.save(job).await?;
            info!("Job {}: completed ({} units)", job.id, job.total);
            return Ok(JobStatus::Completed);
        }
    }

    async fn switch_to_translation(&self, job: &mut Job) -> Result<(), DocTransError> {
        job.recognized = job.pages();
        job.results.clear();
        job.cursor = 0;
        job.stage = Stage::Translation;
        job.total = plan_stage(job)?.units.len();
        job.message = format!("Recognition complete, translating {} units", job.total);
        job.touch();
        self.store.save(job).await?;
        info!(
            "Job {}: recognized {} pages, {} sentences to translate",
            job.id,
            job.recognized.len(),
            job.total
        );
        Ok(())
    }

    async fn finish_stopped(&self, job: &mut Job) -> Result<JobStatus, DocTransError> {
        mark_stopped(job);
        self.store.save(job).await?;
        info!("Job {}: stopped after {}/{} units", job.id, job.cursor, job.total);
        Ok(JobStatus::Stopped)
    }

    /// Run one unit. Unit-level failures come back inside the result; only
    /// wiring errors are returned as `Err`.
    async fn process_unit(&self, stage: Stage, unit: &Unit, plan: &StagePlan) -> Result<UnitResult, DocTransError> {
        match (stage, &unit.payload) {
            (Stage::Recognition, UnitPayload::Page { page_number, path }) => {
                let client = self.recognition.as_ref().ok_or_else(|| DocTransError::ProviderNotConfigured {
                    provider: "recognition".into(),
                    hint: String::new(),
                })?;
                let page = match client.recognize_page(*page_number, path).await {
                    Ok(r) => RecognizedPage {
                        page_number: *page_number,
                        text: r.text,
                        confidence: r.confidence,
                        error: None,
                    },
                    Err(e) => RecognizedPage {
                        page_number: *page_number,
                        text: String::new(),
                        confidence: None,
                        error: Some(e),
                    },
                };
                Ok(UnitResult::Page(page))
            }
            (Stage::Translation, UnitPayload::Text(text)) => {
                let client = self.translation.as_ref().ok_or_else(|| DocTransError::ProviderNotConfigured {
                    provider: "translation".into(),
                    hint: String::new(),
                })?;
                let (Some(source), Some(target)) = (&plan.source_language, &plan.target_language) else {
                    return Err(DocTransError::Internal("translation stage without languages".into()));
                };
                let unit_result = match client.translate_unit(unit.ordinal, text, source, target).await {
                    Ok(t) => TranslatedUnit {
                        source: text.clone(),
                        translation: t.text,
                        page_numbers: unit.page_numbers.clone(),
                        from_correction: t.from_correction,
                        error: None,
                    },
                    Err(e) => TranslatedUnit {
                        source: text.clone(),
                        translation: format!("[Translation Error: {}]", error_detail(&e)),
                        page_numbers: unit.page_numbers.clone(),
                        from_correction: false,
                        error: Some(e),
                    },
                };
                Ok(UnitResult::Sentence(unit_result))
            }
            (stage, payload) => Err(DocTransError::Internal(format!(
                "unit {} of the {} stage has an unexpected payload: {:?}",
                unit.ordinal, stage, payload
            ))),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn check_source(request: &JobRequest) -> Result<(), DocTransError> {
    let ok = match (&request.kind, &request.source) {
        (JobKind::Ocr | JobKind::OcrThenTranslate, JobSource::Images { .. }) => true,
        (JobKind::Translate, JobSource::Text { .. } | JobSource::Pages { .. }) => true,
        _ => false,
    };
    if !ok {
        return Err(DocTransError::InvalidConfig(format!(
            "a {} job cannot be created from this source",
            request.kind
        )));
    }
    if request.kind.needs_translation() && request.languages.is_none() {
        return Err(DocTransError::InvalidConfig(format!(
            "a {} job needs a source and target language",
            request.kind
        )));
    }
    Ok(())
}

/// The persisted progress must line up with the freshly planned units.
fn check_resumable(job: &Job, plan: &StagePlan) -> Result<(), String> {
    if job.results.len() != job.cursor {
        return Err(format!(
            "{} results recorded for cursor {}",
            job.results.len(),
            job.cursor
        ));
    }
    if job.cursor > 0 && job.total != plan.units.len() {
        return Err(format!(
            "source now yields {} units, job recorded {}",
            plan.units.len(),
            job.total
        ));
    }
    if job.cursor > plan.units.len() {
        return Err(format!(
            "cursor {} is past the {} planned units",
            job.cursor,
            plan.units.len()
        ));
    }
    Ok(())
}

fn mark_stopped(job: &mut Job) {
    job.status = JobStatus::Stopped;
    job.message = format!("Stopped after {}/{} units", job.cursor, job.total);
    job.touch();
}

fn processing_message(job: &Job) -> String {
    if job.cursor < job.total {
        format!("Processing unit {}/{}", job.cursor + 1, job.total)
    } else {
        format!("Processed {}/{} units", job.cursor, job.total)
    }
}

fn unit_error(result: &UnitResult) -> Option<String> {
    match result {
        UnitResult::Page(p) => p.error.as_ref().map(ToString::to_string),
        UnitResult::Sentence(s) => s.error.as_ref().map(error_detail),
    }
}

fn error_detail(e: &UnitError) -> String {
    match e {
        UnitError::TranslationFailed { detail, .. } => detail.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_must_fit_kind() {
        let bad = JobRequest {
            kind: JobKind::Ocr,
            source: JobSource::Text { text: "x".into() },
            languages: None,
        };
        assert!(matches!(check_source(&bad), Err(DocTransError::InvalidConfig(_))));

        let no_langs = JobRequest {
            kind: JobKind::Translate,
            source: JobSource::Text { text: "x".into() },
            languages: None,
        };
        assert!(check_source(&no_langs).is_err());
        assert!(check_source(&JobRequest::ocr(vec!["a.png".into()])).is_ok());
    }

    #[test]
    fn resumability_checks_cursor_against_plan() {
        let mut job = Job::new(
            JobKind::Translate,
            JobSource::Text { text: "One. Two.".into() },
            Some(LanguagePair::new("en", "de")),
        );
        let plan = plan_stage(&job).unwrap();
        job.total = plan.units.len();
        assert!(check_resumable(&job, &plan).is_ok());

        job.cursor = 1;
        assert!(check_resumable(&job, &plan).unwrap_err().contains("results"));

        job.results.push(UnitResult::Sentence(TranslatedUnit {
            source: "One.".into(),
            translation: "Eins.".into(),
            page_numbers: vec![1],
            from_correction: false,
            error: None,
        }));
        job.total = 5;
        assert!(check_resumable(&job, &plan).unwrap_err().contains("yields 2"));
    }

    #[test]
    fn messages_describe_next_unit() {
        let mut job = Job::new(JobKind::Ocr, JobSource::Images { pages: vec![] }, None);
        job.total = 3;
        job.cursor = 1;
        assert_eq!(processing_message(&job), "Processing unit 2/3");
        mark_stopped(&mut job);
        assert_eq!(job.message, "Stopped after 1/3 units");
        assert_eq!(job.status, JobStatus::Stopped);
    }

    #[test]
    fn translation_error_detail_is_unwrapped() {
        let e = UnitError::TranslationFailed {
            ordinal: 3,
            detail: "HTTP 500".into(),
        };
        assert_eq!(error_detail(&e), "HTTP 500");
    }
}
