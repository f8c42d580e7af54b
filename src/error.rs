//! Error types for the edgequake-pdf2pages library.
//!
//! Three types reflect three distinct failure scopes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (missing
//!   input, unreadable PDF metadata, output directory not writable). Returned
//!   as `Err(PipelineError)` from [`crate::convert::run`].
//!
//! * [`ToolError`] — **Per-item**: one external invocation or one network
//!   call failed (non-zero exit, timeout, unparsable output). Never escapes a
//!   batch; stages turn it into a [`PageError`].
//!
//! * [`PageError`] — the serialisable record written to the manifest's
//!   `errors[]` array, one per page that did not make it to the end.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2pages library.
///
/// Page-level failures use [`PageError`] and are collected in the
/// manifest rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input is neither a PDF, a supported image, nor a directory.
    #[error("Unsupported input '{path}': expected a PDF, an image, or a folder of images")]
    UnsupportedInput { path: PathBuf },

    /// The input folder contains no supported images.
    #[error("Folder '{path}' contains no supported images (png, jpg, tif, webp, bmp, gif)")]
    EmptyFolder { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF metadata could not be read; the page count is unknown.
    #[error("Cannot read PDF metadata for '{path}': {detail}\nIs poppler-utils (pdfinfo) installed?")]
    UnreadablePdf { path: PathBuf, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Text extraction was requested but no text generator could be created.
    #[error("Text generation provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the output directory or write the manifest.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure of a single external invocation or network call.
///
/// Stages convert these into [`PageError`] records; a `ToolError` never
/// aborts sibling items in the same batch.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all (not installed, not executable).
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited non-zero (or was killed by a signal).
    #[error("'{program}' exited with {}: {stderr}", describe_exit(.code))]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The program exceeded its timeout and was killed.
    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// The program's output did not have the expected shape.
    #[error("unexpected output: {0}")]
    Parse(String),

    /// A required file read or write failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The text-generation service returned an error.
    #[error("text generation failed: {0}")]
    Generation(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

impl ToolError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ToolError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A page that failed at some stage, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    /// 1-based page index.
    pub index: usize,
    /// Human-readable failure description.
    pub error: String,
}

impl PageError {
    pub fn new(index: usize, error: impl fmt::Display) -> Self {
        Self {
            index,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page {}: {}", self.index, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_display_with_code() {
        let e = ToolError::ExitStatus {
            program: "pdftoppm".into(),
            code: Some(99),
            stderr: "Syntax Error".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("code 99"), "got: {msg}");
        assert!(msg.contains("Syntax Error"));
    }

    #[test]
    fn exit_status_display_signal() {
        let e = ToolError::ExitStatus {
            program: "magick".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(e.to_string().contains("signal"));
    }

    #[test]
    fn timeout_display() {
        let e = ToolError::Timeout {
            program: "tesseract".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn page_error_from_tool_error() {
        let cause = ToolError::Parse("missing 'text' column".into());
        let pe = PageError::new(4, &cause);
        assert_eq!(pe.index, 4);
        assert!(pe.error.contains("missing 'text' column"));
        assert_eq!(pe.to_string(), format!("Page 4: {}", pe.error));
    }

    #[test]
    fn page_error_serialises_flat() {
        let pe = PageError::new(2, "render failed");
        let json = serde_json::to_value(&pe).unwrap();
        assert_eq!(json, serde_json::json!({"index": 2, "error": "render failed"}));
    }
}
