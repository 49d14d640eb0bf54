use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to an external collaborator.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure: connection refused, DNS, TLS, reset.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// No response within the configured bound.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body was not the JSON we expected.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// A required secret is not available.
    #[error("secret `{0}` is not set")]
    MissingSecret(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Classify a reqwest error, separating timeouts and decode failures
    /// from plain transport errors.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(timeout)
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Http(err)
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Longest response body excerpt kept in a [`RemoteError::Status`].
pub(crate) const MAX_ERROR_BODY: usize = 512;

pub(crate) fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let out = truncate_body(body);
        assert!(out.len() <= MAX_ERROR_BODY + '…'.len_utf8());
        assert!(out.ends_with('…'));
    }

    #[test]
    fn short_bodies_are_kept() {
        assert_eq!(truncate_body("nope".into()), "nope");
    }

    #[test]
    fn status_error_message() {
        let err = RemoteError::Status { status: 503, body: "down".into() };
        assert_eq!(err.to_string(), "unexpected status 503: down");
    }
}
