//! Pipeline stages used by the converter.
//!
//! Each submodule implements one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess
//! (URL)     (pdfium)   (base64)   (VLM)   (cleanup)
//! ```
//!
//! 1. [`input`]: download `url` sources into a `DocumentStream`
//! 2. [`render`]: rasterise PDF pages; runs in `spawn_blocking`
//! 3. [`encode`]: decode uploaded images, PNG-encode and base64-wrap page
//!    images for the multimodal request body
//! 4. [`llm`]: drive the VLM call with timeout and retry/backoff
//! 5. [`postprocess`]: deterministic cleanup of VLM output and text uploads

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
