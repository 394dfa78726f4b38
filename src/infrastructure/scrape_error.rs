//! Error types for partition fetches and page extraction
//!
//! Every variant is retried by proxy rotation; [`ScrapeError::kind`] only
//! decides how a failure is reported.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Response body too short ({length} bytes)")]
    BodyTooShort { length: usize },

    #[error("Embedded page state not found")]
    PayloadNotFound,

    #[error("Embedded page state is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("Key '{key}' missing from page state (available: {})", available.join(", "))]
    MissingKey { key: String, available: Vec<String> },
}

impl ExtractionError {
    pub fn missing_key(key: impl Into<String>, available: Vec<String>) -> Self {
        Self::MissingKey { key: key.into(), available }
    }
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Rate limited (HTTP 429): {url}")]
    RateLimited { url: String },

    #[error("HTTP request failed: {status} - {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Invalid proxy configuration: {message}")]
    InvalidProxy { message: String },

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Failure class used for logging and attempt diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    RateLimited,
    Extraction,
}

impl ScrapeError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Extraction(_) => FailureKind::Extraction,
            Self::HttpStatus { .. } | Self::Network { .. } | Self::InvalidProxy { .. } => {
                FailureKind::Transient
            }
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return Self::RateLimited {
                    url: err.url().map(ToString::to_string).unwrap_or_default(),
                };
            }
        }
        let message = if err.is_timeout() {
            format!("timeout: {err}")
        } else if err.is_connect() {
            format!("connect failed: {err}")
        } else {
            err.to_string()
        };
        Self::Network { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguished() {
        assert_eq!(
            ScrapeError::RateLimited { url: "u".into() }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            ScrapeError::from(ExtractionError::PayloadNotFound).kind(),
            FailureKind::Extraction
        );
        assert_eq!(
            ScrapeError::HttpStatus { status: 503, url: "u".into() }.kind(),
            FailureKind::Transient
        );
        assert_eq!(ScrapeError::network("reset").kind(), FailureKind::Transient);
    }

    #[test]
    fn missing_key_lists_available_keys() {
        let err = ExtractionError::missing_key("allPage", vec!["meta".into(), "user".into()]);
        assert_eq!(
            err.to_string(),
            "Key 'allPage' missing from page state (available: meta, user)"
        );
    }
}
