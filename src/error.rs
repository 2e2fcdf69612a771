//! Error types for the mdparse library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ParseError`]: **Fatal**: the document cannot be converted at all
//!   (unsupported format, corrupt PDF, provider not configured). Returned as
//!   `Err(ParseError)` from [`crate::converter::DocumentConverter::convert`].
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (render glitch,
//!   transient API error) but the other pages are fine. Stored inside
//!   [`crate::output::PageResult`]; the page is left out of the export.
//!
//! HTTP status mapping for these lives in [`crate::server::ApiError`].

use thiserror::Error;

/// All fatal errors returned by the converter.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Neither the extension nor the leading bytes identify a supported format.
    #[error("Unsupported document format for '{name}'{}",
        .extension.as_deref().map(|e| format!(" (extension '.{e}')")).unwrap_or_default())]
    UnsupportedFormat {
        name: String,
        extension: Option<String>,
    },

    /// The name says PDF but the bytes do not start with `%PDF`.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// A text document was not valid UTF-8.
    #[error("'{name}' is not valid UTF-8 text (invalid byte at offset {offset})")]
    InvalidEncoding { name: String, offset: usize },

    /// An image upload could not be decoded.
    #[error("Image '{name}' could not be decoded: {detail}")]
    ImageDecodeFailed { name: String, detail: String },

    /// The document decoded fine but has nothing to convert.
    #[error("Document '{name}' is empty")]
    EmptyDocument { name: String },

    /// The `url` source is not an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a valid HTTP/HTTPS URL")]
    InvalidUrl { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The remote document is larger than the upload limit.
    #[error("Document at '{url}' exceeds the maximum allowed size of {limit} bytes")]
    DownloadTooLarge { url: String, limit: usize },

    /// The URL resolves to an address that is not publicly routable.
    #[error("Refusing to fetch '{url}': {addr} is not a public address")]
    ForbiddenHost { url: String, addr: std::net::IpAddr },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was configured.
    #[error("PDF '{name}' is encrypted and requires a password")]
    PasswordRequired { name: String },

    /// A password was configured but it is wrong for this document.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page failed after all retries; output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParseError {
    /// Build a [`ParseError::UnsupportedFormat`] for the given document name.
    pub(crate) fn unsupported(name: &str) -> Self {
        ParseError::UnsupportedFormat {
            name: name.to_string(),
            extension: crate::converter::extension_of(name),
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The conversion continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page image encoding failed.
    #[error("Page {page}: encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// LLM call timed out on the final attempt.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
