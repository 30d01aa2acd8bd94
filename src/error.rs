//! Error types for the docstamp library.
//!
//! Each pipeline stage has its own error enum so callers can match on the
//! stage that failed without string inspection:
//!
//! * [`FetchError`]: an input could not be acquired (bad path, HTTP status,
//!   transport failure, unsupported scheme).
//! * [`AssemblyError`]: merging or writing an output document failed.
//! * [`StampError`]: the stamp request itself is malformed.
//! * [`PageRangeError`]: a `"1-2,5"` style page specifier did not parse.
//!
//! [`DocstampError`] wraps all of them for the top-level entry points in
//! [`crate::transform`].
//!
//! There is no image decoding error: an undecodable non-PDF
//! input is passed through un-normalized and only logged.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to acquire the raw bytes of one input.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The input names a scheme other than `file`, `http` or `https`.
    #[error("Unsupported file source '{input}': scheme '{scheme}' is not one of file, http, https")]
    UnsupportedScheme { input: String, scheme: String },

    /// The server answered with a non-2xx status.
    #[error("Failed to download '{url}': HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Local file does not exist.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    Timeout { url: String, secs: u64 },

    /// Connection, TLS or body-read failure.
    #[error("Failed to download '{url}': {reason}")]
    TransportFailure { url: String, reason: String },

    /// Any other local I/O failure (including writing into the work directory).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// `true` when the failure is attributable to the caller's input rather
    /// than to the network or the local machine.
    pub fn is_client_error(&self) -> bool {
        match self {
            FetchError::UnsupportedScheme { .. }
            | FetchError::NotFound { .. }
            | FetchError::PermissionDenied { .. } => true,
            FetchError::HttpStatus { status, .. } => (400..500).contains(status),
            FetchError::Timeout { .. }
            | FetchError::TransportFailure { .. }
            | FetchError::Io { .. } => false,
        }
    }
}

/// Failure while merging documents or writing results.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Merge was asked to combine zero documents.
    #[error("No files to merge")]
    Empty,

    /// A batch operation got an output list it cannot map onto its documents.
    #[error("Got {outputs} outputs for {documents} documents (expected 0, 1 for a single document, or {documents})")]
    OutputCountMismatch { documents: usize, outputs: usize },

    /// A source could not be parsed by the PDF engine.
    #[error("'{filename}' is not a readable PDF: {detail}")]
    InvalidPdf { filename: String, detail: String },

    /// Serialising or writing the output failed.
    #[error("Failed to write output '{target}': {detail}")]
    WriteFailure { target: String, detail: String },
}

/// Caller errors in a stamp request.
#[derive(Debug, Error)]
pub enum StampError {
    /// `pages` must hold exactly one filter per document.
    #[error("Got {filters} page filters for {documents} documents")]
    InvalidPageFilterLength { documents: usize, filters: usize },

    /// The stamp carries nothing to draw.
    #[error("Stamp has no content: {0}")]
    MissingStampContent(String),

    /// A size or scale outside its valid range.
    #[error("Invalid stamp parameter: {0}")]
    InvalidParameter(String),

    /// The overlay page could not be generated.
    #[error("Failed to render stamp: {0}")]
    Render(String),
}

/// Malformed page specifier such as `"4-3"` or `"1-2,"`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid page range '{input}': {reason}")]
pub struct PageRangeError {
    pub input: String,
    pub reason: String,
}

/// All errors returned by the top-level docstamp entry points.
#[derive(Debug, Error)]
pub enum DocstampError {
    // ── Stage errors ──────────────────────────────────────────────────────
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Stamp(#[from] StampError),

    #[error(transparent)]
    PageRange(#[from] PageRangeError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, runtime creation).
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_display() {
        let e = FetchError::HttpStatus {
            url: "https://example.com/a.pdf".into(),
            status: 404,
        };
        let msg = e.to_string();
        assert!(msg.contains("404"), "got: {msg}");
        assert!(msg.contains("example.com"));
    }

    #[test]
    fn client_error_classification() {
        assert!(FetchError::HttpStatus {
            url: "u".into(),
            status: 403
        }
        .is_client_error());
        assert!(!FetchError::HttpStatus {
            url: "u".into(),
            status: 502
        }
        .is_client_error());
        assert!(!FetchError::TransportFailure {
            url: "u".into(),
            reason: "reset".into()
        }
        .is_client_error());
        assert!(FetchError::UnsupportedScheme {
            input: "s3://b/k".into(),
            scheme: "s3".into()
        }
        .is_client_error());
    }

    #[test]
    fn output_mismatch_display() {
        let e = AssemblyError::OutputCountMismatch {
            documents: 3,
            outputs: 2,
        };
        assert!(e.to_string().contains("2 outputs for 3 documents"));
    }

    #[test]
    fn stage_errors_convert_into_umbrella() {
        let e: DocstampError = AssemblyError::Empty.into();
        assert!(matches!(e, DocstampError::Assembly(AssemblyError::Empty)));
        assert_eq!(e.to_string(), "No files to merge");
    }
}
