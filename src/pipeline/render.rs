//! PDF rasterisation: render every page of an in-memory PDF via pdfium.
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering,
//! so all work here runs inside `tokio::task::spawn_blocking`; the serving
//! loop keeps accepting requests while a document renders.
//!
//! Page size is bounded twice: by DPI (page points × dpi / 72) and by
//! `max_rendered_pixels` on either edge, whichever is smaller.
//!
//! ## Library lifetime
//!
//! `FPDF_InitLibrary` / `FPDF_DestroyLibrary` act on process-global state.
//! The library is therefore bound once, on the first PDF, and the [`Pdfium`]
//! handle lives until exit. Dropping a per-request handle would tear pdfium
//! down under any other request still rendering.

use crate::config::ConversionConfig;
use crate::error::ParseError;
use crate::output::DocumentMetadata;
use bytes::Bytes;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded PDF: metadata plus one image per page, in page order.
pub struct RenderedDocument {
    pub metadata: DocumentMetadata,
    /// `(page_index_0based, image)` tuples.
    pub pages: Vec<(usize, DynamicImage)>,
}

/// Bind to a pdfium shared library.
///
/// `lib_path` may point at the library file itself or at the directory that
/// holds it. Without a path, the working directory is tried first, then the
/// system library search path.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ParseError> {
    let bindings = match lib_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ParseError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

/// The process-wide pdfium instance, bound on first use.
///
/// `lib_path` only matters for the call that performs the binding. A failed
/// bind leaves nothing cached, so the next document tries again.
pub fn shared_pdfium(lib_path: Option<&Path>) -> Result<&'static Pdfium, ParseError> {
    bind_once(&PDFIUM, lib_path)
}

fn bind_once<'a>(
    cell: &'a OnceCell<Pdfium>,
    lib_path: Option<&Path>,
) -> Result<&'a Pdfium, ParseError> {
    cell.get_or_try_init(|| {
        let pdfium = bind_pdfium(lib_path)?;
        info!("pdfium bound");
        Ok(pdfium)
    })
}

/// Load a PDF from memory, read its metadata and rasterise every page.
pub async fn render_document(
    name: &str,
    data: Bytes,
    config: &ConversionConfig,
) -> Result<RenderedDocument, ParseError> {
    let name = name.to_string();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();
    let lib_path: Option<PathBuf> = config.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        render_document_blocking(
            &name,
            &data,
            dpi,
            max_pixels,
            password.as_deref(),
            lib_path.as_deref(),
        )
    })
    .await
    .map_err(|e| ParseError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of [`render_document`].
fn render_document_blocking(
    name: &str,
    data: &[u8],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    lib_path: Option<&Path>,
) -> Result<RenderedDocument, ParseError> {
    let pdfium = shared_pdfium(lib_path)?;

    let document = pdfium
        .load_pdf_from_byte_slice(data, password)
        .map_err(|e| classify_load_error(name, password.is_some(), format!("{:?}", e)))?;

    let metadata = read_metadata(&document);
    info!("PDF '{}' loaded: {} pages", name, metadata.page_count);

    let pages = document.pages();
    let mut results = Vec::with_capacity(metadata.page_count);

    for (idx, page) in pages.iter().enumerate() {
        let target_width = target_width_px(page.width().value, dpi, max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .set_maximum_height(max_pixels as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ParseError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push((idx, image));
    }

    Ok(RenderedDocument {
        metadata,
        pages: results,
    })
}

/// Target bitmap width for a page `width_pts` points wide.
fn target_width_px(width_pts: f32, dpi: u32, max_pixels: u32) -> i32 {
    let at_dpi = (width_pts * dpi as f32 / 72.0).round() as i64;
    at_dpi.clamp(1, max_pixels as i64) as i32
}

/// pdfium reports password problems through the same load error as
/// corruption; tell them apart by the error text.
fn classify_load_error(name: &str, had_password: bool, detail: String) -> ParseError {
    if detail.to_lowercase().contains("password") {
        if had_password {
            ParseError::WrongPassword {
                name: name.to_string(),
            }
        } else {
            ParseError::PasswordRequired {
                name: name.to_string(),
            }
        }
    } else {
        ParseError::CorruptPdf {
            name: name.to_string(),
            detail,
        }
    }
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: Some(format!("{:?}", document.version())),
    }
}
