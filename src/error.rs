//! Error types for the edgequake-pdf2text library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`PipelineError`] — **Fatal for a document** (or for the invocation when
//!   it happens before any document is opened): unreadable PDF, checkpoint
//!   that cannot be written or trusted, provider not configured. The batch
//!   runner records it against the document and moves on to the next one.
//!
//! * [`BatchFailure`] — **Non-fatal**: one page batch failed (rate limited
//!   past its budget, rejected by the API, bad render) while every other batch
//!   is fine. Stored inside [`crate::pipeline::client::ExtractionResult`] and
//!   persisted in the checkpoint so the next run retries exactly that batch.
//!
//! [`ErrorKind`] is the classification shared by the retry policy, the
//! checkpoint file and the summary report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2text library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The PDF could not be opened, is not a PDF, or has zero pages.
    #[error("Document '{path}' is unreadable: {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },

    /// The source directory handed to the batch runner could not be listed.
    #[error("Cannot list documents in '{path}': {source}")]
    SourceDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Persisting the checkpoint failed; state integrity is no longer guaranteed.
    #[error("Failed to write checkpoint '{path}': {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint exists but cannot be parsed or has an unknown version.
    #[error("Checkpoint '{path}' is corrupt: {detail}\nRemove it or rerun with --reset.")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// The checkpoint was produced for a different page count or batch size.
    #[error("Checkpoint '{path}' does not match this run: {detail}\nRerun with the original batch size or pass --reset.")]
    CheckpointMismatch { path: PathBuf, detail: String },

    /// The summary report or text output could not be written.
    #[error("Failed to write '{path}': {source}")]
    SummaryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Provider / config errors ──────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder or settings-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (a blocking task panicked, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether this error was raised by the checkpoint layer.
    pub fn is_checkpoint_error(&self) -> bool {
        matches!(
            self,
            PipelineError::CheckpointWrite { .. }
                | PipelineError::CheckpointCorrupt { .. }
                | PipelineError::CheckpointMismatch { .. }
        )
    }
}

/// Classification of a failed extraction request.
///
/// Serialised in snake_case into `checkpoint.json` and `summary.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 429 or an explicit rate-limit message.
    RateLimited,
    /// HTTP 5xx, overloaded backend.
    ServiceUnavailable,
    /// The call exceeded the per-request timeout.
    Timeout,
    /// HTTP 4xx other than 429: bad key, bad request, payload too large.
    ClientError,
    /// The request cannot be built: a page that could not be rendered or
    /// encoded.
    Malformed,
}

impl ErrorKind {
    /// Whether a retry can plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::ServiceUnavailable | ErrorKind::Timeout
        )
    }

    /// Map an HTTP-style status code onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ErrorKind::RateLimited,
            408 => ErrorKind::Timeout,
            400..=499 => ErrorKind::ClientError,
            _ => ErrorKind::ServiceUnavailable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ClientError => "client_error",
            ErrorKind::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal error for a single page batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct BatchFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BatchFailure {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Build a failure from an HTTP-style status code.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_onto_taxonomy() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_status(408), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::ClientError);
        assert_eq!(ErrorKind::from_status(401), ErrorKind::ClientError);
        assert_eq!(ErrorKind::from_status(413), ErrorKind::ClientError);
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ServiceUnavailable.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::ClientError.is_retryable());
        assert!(!ErrorKind::Malformed.is_retryable());
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"service_unavailable\"");
        let back: ErrorKind = serde_json::from_str("\"rate_limited\"").unwrap();
        assert_eq!(back, ErrorKind::RateLimited);
    }

    #[test]
    fn batch_failure_display() {
        let f = BatchFailure::from_status(503, "overloaded");
        assert_eq!(f.to_string(), "service_unavailable: overloaded");
    }

    #[test]
    fn checkpoint_mismatch_display_has_hint() {
        let e = PipelineError::CheckpointMismatch {
            path: PathBuf::from("out/doc/checkpoint.json"),
            detail: "batch size 1 != 2".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("--reset"), "got: {msg}");
        assert!(e.is_checkpoint_error());
    }

    #[test]
    fn unreadable_is_not_a_checkpoint_error() {
        let e = PipelineError::DocumentUnreadable {
            path: PathBuf::from("a.pdf"),
            detail: "zero pages".into(),
        };
        assert!(!e.is_checkpoint_error());
        assert!(e.to_string().contains("zero pages"));
    }
}
