//! # mdparse
//!
//! An HTTP service that turns uploaded documents into Markdown.
//!
//! `POST /parse` takes a multipart body with a `file` part, buffers it,
//! converts it and answers `{"text": "<markdown>"}`. PDF pages and images
//! are read by a Vision Language Model (VLM); Markdown and plain-text
//! uploads are normalised without one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (bytes + filename)
//!  │
//!  ├─ 1. Detect  format from extension, then magic bytes
//!  ├─ 2. Render  rasterise PDF pages via pdfium (spawn_blocking)
//!  ├─ 3. Encode  PNG → base64 ImageData
//!  ├─ 4. VLM     concurrent calls to gpt-4.1-nano / claude / gemini / …
//!  ├─ 5. Polish  post-processing (fences, tables, whitespace)
//!  └─ 6. Export  pages joined into one Markdown string
//! ```
//!
//! ## Library use
//!
//! ```rust,no_run
//! use mdparse::{ConversionConfig, DocumentConverter, DocumentStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = DocumentConverter::new(ConversionConfig::default());
//!     let bytes = std::fs::read("paper.pdf")?;
//!     let result = converter.convert(DocumentStream::new("paper.pdf", bytes)).await?;
//!     println!("{}", result.document.export_to_markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdparse` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod converter;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, FidelityTier, PageSeparator, ServerConfig};
pub use converter::{Convert, DocumentConverter, DocumentStream, ImageKind, InputFormat};
pub use error::{PageError, ParseError};
pub use output::{ConversionResult, ConversionStats, ConvertedDocument, DocumentMetadata, PageResult};
pub use progress::{
    ConversionProgressCallback, NoopProgressCallback, ProgressCallback, TracingProgressCallback,
};
pub use server::{router, ApiError, AppState, ParseResponse};
