//! Error types for the edgequake-doctrans library.
//!
//! Failures are split by how far they reach:
//!
//! * [`DocTransError`]: **Fatal** for the call or the job: configuration is
//!   missing, a job does not exist, a control operation does not apply, or the
//!   store failed while the orchestrator was checkpointing. A job whose run
//!   ends with one of these is marked FAILED.
//!
//! * [`UnitError`]: **Non-fatal**: a single page or sentence could not be
//!   processed after all retries. It is recorded inline in the job results and
//!   the job moves on to the next unit.
//!
//! * [`BackendError`]: a single upstream call failed. [`BackendError::is_retryable`]
//!   tells the retrier whether another attempt can help.
//!
//! * [`RetryError`]: what the retrier hands back once it gives up.

use crate::job::JobId;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doctrans library.
#[derive(Debug, Error)]
pub enum DocTransError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A client needed by the job kind is not configured (missing API key etc.).
    #[error("Provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Job control errors ────────────────────────────────────────────────
    /// No job with this identity exists in the store.
    #[error("Job {id} not found")]
    JobNotFound { id: JobId },

    /// The job has no live control signal in this process.
    #[error("Job {id} is not running in this process")]
    NotRunning { id: JobId },

    /// The job cannot be resumed from its persisted state.
    #[error("Job {id} cannot be resumed: {reason}")]
    CannotResume { id: JobId, reason: String },

    /// A run for this job is already active in this process.
    #[error("Job {id} is already running")]
    AlreadyRunning { id: JobId },

    // ── Persistence ───────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by a persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A non-fatal error for a single unit of a job.
///
/// Stored alongside the unit result so callers can inspect partial success
/// rather than losing the whole document to one bad page or sentence.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The recognition backend failed after retries.
    #[error("Page {page}: recognition failed after {attempts} attempts: {detail}")]
    RecognitionFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The page image or text could not be read from disk.
    #[error("Page {page}: cannot read '{path}': {detail}")]
    SourceUnreadable {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// The translation backend failed after retries.
    #[error("Unit {ordinal}: translation failed: {detail}")]
    TranslationFailed { ordinal: usize, detail: String },
}

/// Failure of one upstream API call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Connection reset, DNS failure, provider SDK error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not finish within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered with a non-success HTTP status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The API answered 2xx but the body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Authentication or authorisation was rejected; retry will not help.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The request could not be built from the input (e.g. undecodable image).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The client is shutting down or was never able to reach the backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<crate::governor::AdmissionClosed> for BackendError {
    fn from(e: crate::governor::AdmissionClosed) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}

impl BackendError {
    /// Whether another attempt has a chance of succeeding.
    ///
    /// Network trouble, timeouts, malformed bodies, 408, 429 and 5xx are
    /// transient; 401/403, the remaining 4xx and a closed governor are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_)
            | BackendError::Timeout { .. }
            | BackendError::MalformedResponse(_) => true,
            BackendError::Status { code, .. } => {
                *code == 408 || *code == 429 || (500..600).contains(code)
            }
            BackendError::Auth(_)
            | BackendError::InvalidInput(_)
            | BackendError::Unavailable(_) => false,
        }
    }

    /// Classify an HTTP status + body into the matching variant.
    pub fn from_status(code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match code {
            401 | 403 => BackendError::Auth(format!("HTTP {code}: {body}")),
            _ => BackendError::Status { code, body },
        }
    }

    /// Classify a reqwest failure; `timeout_secs` is the client timeout in force.
    pub fn from_reqwest(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            BackendError::Timeout { secs: timeout_secs }
        } else if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Returned by [`crate::retry::RetryPolicy::run`] once it stops trying.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// Every attempt failed with a retryable error.
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The operation failed with an error the caller marked as permanent.
    #[error(transparent)]
    Permanent(E),
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::Transport("reset".into()).is_retryable());
        assert!(BackendError::Timeout { secs: 60 }.is_retryable());
        assert!(BackendError::MalformedResponse("no choices".into()).is_retryable());
        assert!(BackendError::from_status(429, "slow down").is_retryable());
        assert!(BackendError::from_status(503, "busy").is_retryable());
        assert!(!BackendError::from_status(400, "bad request").is_retryable());
        assert!(!BackendError::from_status(401, "bad key").is_retryable());
    }

    #[test]
    fn auth_status_maps_to_auth_variant() {
        let e = BackendError::from_status(403, "forbidden");
        assert!(matches!(e, BackendError::Auth(_)));
        assert!(e.to_string().contains("403"));
    }

    #[test]
    fn exhausted_display_mentions_attempts() {
        let e: RetryError<BackendError> = RetryError::Exhausted {
            attempts: 3,
            last: BackendError::Timeout { secs: 60 },
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.contains("60s"), "got: {msg}");
        assert_eq!(e.attempts(), 3);
    }

    #[test]
    fn unit_error_display() {
        let e = UnitError::RecognitionFailed {
            page: 4,
            attempts: 3,
            detail: "HTTP 502".into(),
        };
        assert!(e.to_string().contains("Page 4"));
        assert!(e.to_string().contains("HTTP 502"));
    }

    #[test]
    fn not_running_display() {
        let id = JobId::new();
        let e = DocTransError::NotRunning { id };
        assert!(e.to_string().contains(&id.to_string()));
    }
}
