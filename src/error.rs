//! Error types for the slicebatch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SliceError`]: **Fatal for one document**: the document cannot be
//!   processed at all (not a PDF, wrong password, a page would not render,
//!   the output directory is not writable). Returned as `Err(SliceError)` from
//!   [`crate::process::process_document`]. In a multi-document run the error
//!   is recorded for that document and the next one is processed.
//!
//! * [`ParseError`]: **Non-fatal**: a single page's model call failed
//!   (timeout, bad credential, empty answer). It never leaves the batch
//!   coordinator as an error; its `Display` text becomes the reason of a
//!   [`crate::output::ParseResult::Failure`].

use std::path::PathBuf;
use thiserror::Error;

/// Document-level errors.
///
/// Page-level model failures use [`ParseError`] and are stored in the
/// [`crate::output::BatchReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SliceError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The source could not be opened as a PDF (missing `%PDF` header,
    /// corrupt xref, encrypted, unreadable file).
    #[error("Document '{name}' is unreadable: {detail}")]
    DocumentUnreadable { name: String, detail: String },

    /// pdfium failed to render or encode a specific page. The whole document
    /// is abandoned so no page number is ever missing downstream.
    #[error("Rendering failed for page {page}: {detail}")]
    PageRender { page: u32, detail: String },

    /// Could not bind to a pdfium shared library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib) to use an existing copy,\n\
or place the platform library in the working directory."
    )]
    PdfiumUnavailable(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Writing an artifact (page image, result file, summary, source copy) failed.
    #[error("Failed to write '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Input / config errors ─────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller handed the pipeline something it cannot schedule.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// More documents than one invocation accepts.
    #[error("Too many documents: {count} given, at most {max} per run")]
    TooManyDocuments { count: usize, max: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (a blocking task panicked, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SliceError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SliceError::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// A page-level failure of the remote model call.
///
/// The parser never retries; the batch coordinator turns the `Display` text
/// into a `Failure(reason)` verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The call did not finish within the per-call timeout.
    #[error("timeout")]
    Timeout,

    /// Connection refused, DNS failure, TLS error, body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 401 / 403.
    #[error("authentication failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The body was not the expected chat-completion JSON.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The model answered with no text.
    #[error("empty response from model")]
    EmptyResponse,

    /// Error surfaced by an edgequake-llm provider.
    #[error("{0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reason_is_bare() {
        assert_eq!(ParseError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn auth_error_display() {
        let e = ParseError::Auth {
            status: 401,
            body: "invalid api key".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("invalid api key"), "got: {msg}");
    }

    #[test]
    fn too_many_documents_display() {
        let e = SliceError::TooManyDocuments { count: 21, max: 20 };
        assert!(e.to_string().contains("21"));
        assert!(e.to_string().contains("20"));
    }

    #[test]
    fn persistence_keeps_source() {
        use std::error::Error as _;
        let e = SliceError::persistence(
            "/tmp/x/1.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().contains("/tmp/x/1.txt"));
        assert!(e.source().is_some());
    }
}
