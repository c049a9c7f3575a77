//! Calls to the outside world and the text handling around them.
//!
//! ## Data Flow
//!
//! ```text
//! page file ──▶ encode ──▶ recognize ──▶ cleanup ──▶ RecognizedPage
//!                 (base64)   (vision LLM)  (markup strip)
//!
//! sentence ──▶ corrections ──▶ translate ──▶ TranslatedUnit
//!               (exact / embed)  (chat or generateContent)
//! ```
//!
//! Every client here puts an [`crate::governor::AdmissionGovernor`] permit
//! and a [`crate::retry::RetryPolicy`] around each attempt, so the permit is
//! held for one upstream call and never across a backoff sleep.

pub mod cleanup;
pub mod embed;
pub mod encode;
pub(crate) mod http;
pub mod recognize;
pub mod translate;

pub use http::mask_key;
