//! Minimal JSON-over-HTTP helper shared by the translation and embedding
//! dialects.

use crate::error::{BackendError, DocTransError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Build a client with a whole-request timeout.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, DocTransError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DocTransError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// POST `body` as JSON and parse a JSON answer. Non-2xx statuses become
/// [`BackendError::Status`] (or `Auth` for 401/403).
pub(crate) async fn post_json(
    http: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    timeout: Duration,
) -> Result<Value, BackendError> {
    let payload = serde_json::to_vec(body).map_err(|e| BackendError::InvalidInput(e.to_string()))?;
    debug!("POST {} ({} bytes)", mask_key(url), payload.len());

    let mut request = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let secs = timeout.as_secs();
    let response = request
        .send()
        .await
        .map_err(|e| BackendError::from_reqwest(e.without_url(), secs))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BackendError::from_reqwest(e.without_url(), secs))?;

    if !status.is_success() {
        return Err(BackendError::from_status(status.as_u16(), truncate(&text, 500)));
    }
    serde_json::from_str(&text).map_err(|e| BackendError::MalformedResponse(e.to_string()))
}

static RE_KEY_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"([?&]key=)[^&]*").unwrap());

/// Hide a `key=` query parameter before a URL reaches the logs.
pub fn mask_key(url: &str) -> String {
    RE_KEY_PARAM.replace_all(url, "${1}***").into_owned()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_key_parameter() {
        assert_eq!(
            mask_key("https://h/v1beta/models/m:generateContent?key=AIza123&alt=json"),
            "https://h/v1beta/models/m:generateContent?key=***&alt=json"
        );
        assert_eq!(mask_key("https://h/v1/chat/completions"), "https://h/v1/chat/completions");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
