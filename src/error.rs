//! Error types for the papertab library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PaperTabError`] — **Fatal** for one document (or for the whole run):
//!   the PDF cannot be opened, the provider is not configured, the
//!   configuration is invalid. Returned as `Err(PaperTabError)` from the
//!   document-level entry points. The corpus entry point turns it into
//!   [`crate::output::DocumentOutcome::Failed`] and moves on.
//!
//! * [`TableError`] — **Non-fatal**: one table could not be rendered, its
//!   batch entry is missing, or the model's answer was unusable. Stored on
//!   [`crate::output::VisionDetail`]; the document's other tables proceed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the papertab library.
///
/// Table-level failures use [`TableError`] and are recorded on the
/// table's [`crate::output::VisionDetail`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PaperTabError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A page number outside `1..=total` was requested.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib) to the directory holding libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// No vision provider could be resolved (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The batch endpoint answered with a non-success HTTP status.
    #[error("Batch API returned HTTP {status}: {message}")]
    BatchApi { status: u16, message: String },

    /// Transport-level failure talking to the provider.
    #[error("Batch request to {provider} failed: {detail}")]
    BatchTransport { provider: String, detail: String },

    /// The provider answered, but not in the documented shape.
    #[error("Unexpected batch response from {provider}: {detail}")]
    BatchProtocol { provider: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
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

/// A non-fatal error for a single table.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum TableError {
    /// Page rasterisation or image encoding failed.
    #[error("{table_id}: rendering failed: {detail}")]
    RenderFailed { table_id: String, detail: String },

    /// The finished batch had no entry for this table's `custom_id`.
    #[error("{table_id}: no batch result for '{custom_id}'")]
    MissingResult { table_id: String, custom_id: String },

    /// The provider reported an error, cancellation or expiry for this entry.
    #[error("{table_id}: provider did not answer: {detail}")]
    ProviderFailed { table_id: String, detail: String },

    /// The whole batch could not be submitted or polled.
    #[error("{table_id}: batch failed: {detail}")]
    BatchFailed { table_id: String, detail: String },

    /// The answer was received but is not a valid structured reply.
    #[error("{table_id}: answer is not a valid table object")]
    Unparseable { table_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_api_display() {
        let e = PaperTabError::BatchApi {
            status: 429,
            message: "rate_limit_error".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("429"), "got: {msg}");
        assert!(msg.contains("rate_limit_error"));
    }

    #[test]
    fn provider_not_configured_display() {
        let e = PaperTabError::ProviderNotConfigured {
            provider: "auto".into(),
            hint: "Set ANTHROPIC_API_KEY".into(),
        };
        assert!(e.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn table_error_mentions_custom_id() {
        let e = TableError::MissingResult {
            table_id: "paper_p3_t2".into(),
            custom_id: "paper_p3_t2__transcriber".into(),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("paper_p3_t2:"));
        assert!(msg.contains("paper_p3_t2__transcriber"));
    }

    #[test]
    fn table_error_serialises() {
        let e = TableError::Unparseable {
            table_id: "x_p1_t1".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("Unparseable"));
    }
}
