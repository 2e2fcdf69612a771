//! The document converter: bytes plus a filename hint in, a
//! [`ConvertedDocument`] with a Markdown export out.
//!
//! ## Formats
//!
//! | Format | Detected by | Pipeline |
//! |--------|-------------|----------|
//! | PDF | `.pdf`, `%PDF` | pdfium render → PNG → VLM → cleanup |
//! | Image | `.png`, `.jpg`, `.jpeg`, magic bytes | decode/downscale → PNG → VLM → cleanup |
//! | Markdown | `.md`, `.markdown` | UTF-8 decode → whitespace normalisation |
//! | Plain text | `.txt` | UTF-8 decode → whitespace normalisation |
//!
//! The extension wins when it is known; the leading bytes are only consulted
//! when the name has no extension or an unrecognised one.
//!
//! ## Sharing
//!
//! One [`DocumentConverter`] serves the whole process. It is never mutated
//! after construction except for the VLM provider, which is resolved once on
//! first use and then cached.

use crate::config::ConversionConfig;
use crate::error::{PageError, ParseError};
use crate::output::{ConversionResult, ConversionStats, ConvertedDocument, DocumentMetadata, PageResult};
use crate::pipeline::{encode, llm, postprocess, render};
use async_trait::async_trait;
use bytes::Bytes;
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Name given to an upload that arrived without a filename.
pub const DEFAULT_DOCUMENT_NAME: &str = "document.pdf";

/// Default model when a provider is chosen without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// An in-memory document with the name it was submitted under.
///
/// The name is only a format hint; it is never used as a path.
#[derive(Clone)]
pub struct DocumentStream {
    pub name: String,
    pub data: Bytes,
}

impl DocumentStream {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Use `name` when present and non-blank, otherwise [`DEFAULT_DOCUMENT_NAME`].
    pub fn with_optional_name(name: Option<&str>, data: impl Into<Bytes>) -> Self {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DOCUMENT_NAME);
        Self::new(name, data)
    }
}

impl fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStream")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Raster formats accepted as single-page documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
}

/// A document format the converter knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Pdf,
    Image(ImageKind),
    Markdown,
    PlainText,
}

impl InputFormat {
    /// Infer the format from the document name, falling back to the leading bytes.
    pub fn infer(name: &str, data: &[u8]) -> Option<Self> {
        extension_of(name)
            .and_then(|ext| Self::from_extension(&ext))
            .or_else(|| Self::sniff(data))
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(InputFormat::Pdf),
            "png" => Some(InputFormat::Image(ImageKind::Png)),
            "jpg" | "jpeg" => Some(InputFormat::Image(ImageKind::Jpeg)),
            "md" | "markdown" => Some(InputFormat::Markdown),
            "txt" | "text" => Some(InputFormat::PlainText),
            _ => None,
        }
    }

    /// Recognise binary formats by their signature.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"%PDF") {
            Some(InputFormat::Pdf)
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(InputFormat::Image(ImageKind::Png))
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(InputFormat::Image(ImageKind::Jpeg))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Pdf => "pdf",
            InputFormat::Image(ImageKind::Png) => "png",
            InputFormat::Image(ImageKind::Jpeg) => "jpeg",
            InputFormat::Markdown => "markdown",
            InputFormat::PlainText => "text",
        }
    }

    /// Whether this format goes through the VLM.
    pub fn is_visual(&self) -> bool {
        matches!(self, InputFormat::Pdf | InputFormat::Image(_))
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cased extension of a document name, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Anything that turns a [`DocumentStream`] into a [`ConversionResult`].
///
/// The HTTP layer depends on this trait rather than on [`DocumentConverter`].
#[async_trait]
pub trait Convert: Send + Sync {
    async fn convert(&self, source: DocumentStream) -> Result<ConversionResult, ParseError>;
}

/// Converts documents to Markdown according to a [`ConversionConfig`].
pub struct DocumentConverter {
    config: ConversionConfig,
    provider: OnceCell<Arc<dyn LLMProvider>>,
}

impl fmt::Debug for DocumentConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConverter")
            .field("config", &self.config)
            .field("provider_ready", &self.provider.initialized())
            .finish()
    }
}

impl DocumentConverter {
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            provider: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Resolve the VLM provider now instead of on the first visual document.
    pub async fn ensure_provider(&self) -> Result<Arc<dyn LLMProvider>, ParseError> {
        self.provider
            .get_or_try_init(|| async { resolve_provider(&self.config) })
            .await
            .map(Arc::clone)
    }

    /// Convert one document.
    ///
    /// # Errors
    /// Fatal problems only: unsupported or malformed input, provider
    /// missing, or every page failing. Individual page failures are
    /// reported in the returned pages and stats.
    pub async fn convert(&self, source: DocumentStream) -> Result<ConversionResult, ParseError> {
        let total_start = Instant::now();
        let DocumentStream { name, data } = source;

        if data.is_empty() {
            return Err(ParseError::EmptyDocument { name });
        }

        let format =
            InputFormat::infer(&name, &data).ok_or_else(|| ParseError::unsupported(&name))?;
        info!("Converting '{}' ({} bytes) as {}", name, data.len(), format);

        let (metadata, pages, timings) = match format {
            InputFormat::Pdf => self.convert_pdf(&name, data).await?,
            InputFormat::Image(_) => self.convert_image(&name, &data).await?,
            InputFormat::Markdown | InputFormat::PlainText => {
                let page = convert_text(&name, &data)?;
                let metadata = DocumentMetadata {
                    page_count: 1,
                    ..Default::default()
                };
                (metadata, vec![page], Timings::default())
            }
        };

        self.assemble(name, format, metadata, pages, timings, total_start)
    }

    /// Apply the failure rules and wrap the pages into a [`ConversionResult`].
    fn assemble(
        &self,
        name: String,
        format: InputFormat,
        metadata: DocumentMetadata,
        pages: Vec<PageResult>,
        timings: Timings,
        total_start: Instant,
    ) -> Result<ConversionResult, ParseError> {
        let processed = pages.iter().filter(|p| p.is_ok()).count();
        let failed = pages.len() - processed;

        if processed == 0 {
            let first_error = pages
                .iter()
                .find_map(|p| p.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(ParseError::AllPagesFailed {
                total: pages.len(),
                retries: self.config.max_retries,
                first_error,
            });
        }

        let stats = ConversionStats {
            total_pages: metadata.page_count,
            processed_pages: processed,
            failed_pages: failed,
            total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
            total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            render_duration_ms: timings.render_ms,
            llm_duration_ms: timings.llm_ms,
        };

        info!(
            "Converted '{}': {}/{} pages, {}ms total",
            name, processed, stats.total_pages, stats.total_duration_ms
        );

        Ok(ConversionResult {
            document: ConvertedDocument {
                name,
                format,
                metadata,
                pages,
                page_separator: self.config.page_separator.clone(),
                include_metadata: self.config.include_metadata,
            },
            stats,
        })
    }

    async fn convert_pdf(
        &self,
        name: &str,
        data: Bytes,
    ) -> Result<(DocumentMetadata, Vec<PageResult>, Timings), ParseError> {
        if !data.starts_with(b"%PDF") {
            return Err(ParseError::NotAPdf {
                name: name.to_string(),
                magic: data.iter().take(4).copied().collect(),
            });
        }

        // Fail before rendering when no provider can be built.
        let provider = self.ensure_provider().await?;

        let render_start = Instant::now();
        let rendered = render::render_document(name, data, &self.config).await?;
        let render_ms = render_start.elapsed().as_millis() as u64;
        info!("Rendered {} pages in {}ms", rendered.pages.len(), render_ms);

        if rendered.pages.is_empty() {
            return Err(ParseError::EmptyDocument {
                name: name.to_string(),
            });
        }

        let mut encode_failures = Vec::new();
        let mut encoded = Vec::with_capacity(rendered.pages.len());
        for (idx, img) in &rendered.pages {
            match encode::encode_page(img) {
                Ok(data) => encoded.push((*idx, data)),
                Err(e) => {
                    warn!("Failed to encode page {}: {}", idx + 1, e);
                    encode_failures.push(PageResult {
                        error: Some(PageError::EncodeFailed {
                            page: idx + 1,
                            detail: e.to_string(),
                        }),
                        ..PageResult::text(idx + 1, String::new())
                    });
                }
            }
        }
        drop(rendered.pages);

        let llm_start = Instant::now();
        let mut pages = self.transcribe(&provider, &encoded).await;
        let llm_ms = llm_start.elapsed().as_millis() as u64;

        pages.extend(encode_failures);
        pages.sort_by_key(|p| p.page_num);

        Ok((rendered.metadata, pages, Timings { render_ms, llm_ms }))
    }

    async fn convert_image(
        &self,
        name: &str,
        data: &[u8],
    ) -> Result<(DocumentMetadata, Vec<PageResult>, Timings), ParseError> {
        let provider = self.ensure_provider().await?;

        let render_start = Instant::now();
        let owned = data.to_vec();
        let max_pixels = self.config.max_rendered_pixels;
        let image_data = tokio::task::spawn_blocking(move || {
            encode::load_image(&owned, max_pixels).and_then(|img| encode::encode_page(&img))
        })
        .await
        .map_err(|e| ParseError::Internal(format!("Image task panicked: {}", e)))?
        .map_err(|e| ParseError::ImageDecodeFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        let render_ms = render_start.elapsed().as_millis() as u64;

        let llm_start = Instant::now();
        let pages = self.transcribe(&provider, &[(0, image_data)]).await;
        let llm_ms = llm_start.elapsed().as_millis() as u64;

        let metadata = DocumentMetadata {
            page_count: 1,
            ..Default::default()
        };
        Ok((metadata, pages, Timings { render_ms, llm_ms }))
    }

    /// Run encoded pages through the VLM and clean the successful ones.
    async fn transcribe(
        &self,
        provider: &Arc<dyn LLMProvider>,
        pages: &[(usize, ImageData)],
    ) -> Vec<PageResult> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_start(pages.len());
        }

        let results = if self.config.maintain_format {
            process_sequential(provider, pages, &self.config).await
        } else {
            process_concurrent(provider, pages, &self.config).await
        };

        let results: Vec<PageResult> = results
            .into_iter()
            .map(|mut pr| {
                if pr.is_ok() {
                    pr.markdown = postprocess::clean_markdown(&pr.markdown);
                }
                pr
            })
            .collect();

        if let Some(ref cb) = self.config.progress_callback {
            let ok = results.iter().filter(|p| p.is_ok()).count();
            cb.on_conversion_complete(pages.len(), ok);
        }

        results
    }
}

#[async_trait]
impl Convert for DocumentConverter {
    async fn convert(&self, source: DocumentStream) -> Result<ConversionResult, ParseError> {
        DocumentConverter::convert(self, source).await
    }
}

#[derive(Default)]
struct Timings {
    render_ms: u64,
    llm_ms: u64,
}

/// Decode a text upload and normalise it; no VLM involved.
fn convert_text(name: &str, data: &[u8]) -> Result<PageResult, ParseError> {
    let text = std::str::from_utf8(data).map_err(|e| ParseError::InvalidEncoding {
        name: name.to_string(),
        offset: e.valid_up_to(),
    })?;

    let markdown = postprocess::normalise_text(text);
    if markdown.trim().is_empty() {
        return Err(ParseError::EmptyDocument {
            name: name.to_string(),
        });
    }
    debug!("Normalised text document '{}' → {} bytes", name, markdown.len());
    Ok(PageResult::text(1, markdown))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ParseError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ParseError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`: a pre-built provider, used as-is.
/// 2. `config.provider_name` (+ `config.model`) via [`ProviderFactory`].
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set, then full auto-detection.
fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, ParseError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ParseError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Process pages concurrently, at most `config.concurrency` in flight.
async fn process_concurrent(
    provider: &Arc<dyn LLMProvider>,
    pages: &[(usize, ImageData)],
    config: &ConversionConfig,
) -> Vec<PageResult> {
    let total_pages = pages.len();
    let futs: Vec<_> = pages
        .iter()
        .map(|(idx, img_data)| {
            let page_num = idx + 1;
            let img = img_data.clone();
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_start(page_num, total_pages);
                }
                let result = llm::process_page(provider, page_num, img, None, config).await;
                report_page(config, &result, total_pages);
                result
            }
        })
        .collect();

    stream::iter(futs)
        .buffer_unordered(config.concurrency)
        .collect()
        .await
}

/// Process pages in order, passing each page's Markdown to the next.
async fn process_sequential(
    provider: &Arc<dyn LLMProvider>,
    pages: &[(usize, ImageData)],
    config: &ConversionConfig,
) -> Vec<PageResult> {
    let mut results = Vec::with_capacity(pages.len());
    let mut prior_markdown: Option<String> = None;
    let total_pages = pages.len();

    for (idx, img_data) in pages {
        let page_num = idx + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, total_pages);
        }
        let result = llm::process_page(
            provider,
            page_num,
            img_data.clone(),
            prior_markdown.as_deref(),
            config,
        )
        .await;
        report_page(config, &result, total_pages);

        if result.is_ok() {
            prior_markdown = Some(result.markdown.clone());
        }
        results.push(result);
    }

    results
}

fn report_page(config: &ConversionConfig, result: &PageResult, total_pages: usize) {
    if let Some(ref cb) = config.progress_callback {
        match &result.error {
            None => cb.on_page_complete(result.page_num, total_pages, result.markdown.len()),
            Some(e) => cb.on_page_error(result.page_num, total_pages, &e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ConversionProgressCallback;
    use edgequake_llm::{ChatMessage, CompletionOptions, LLMResponse, LlmError, MockProvider};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn converter() -> DocumentConverter {
        DocumentConverter::new(ConversionConfig::default())
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn page_image() -> ImageData {
        ImageData::new("aGVsbG8=", "image/png")
    }

    fn vlm_converter(provider: Arc<dyn LLMProvider>, maintain_format: bool) -> DocumentConverter {
        let config = ConversionConfig::builder()
            .provider(provider)
            .concurrency(1)
            .max_retries(0)
            .retry_backoff_ms(1)
            .maintain_format(maintain_format)
            .build()
            .unwrap();
        DocumentConverter::new(config)
    }

    /// Answers `page N` for call N and fails the calls listed in `fail_on`.
    #[derive(Default)]
    struct ScriptedProvider {
        fail_on: Vec<usize>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn failing_on(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
                ..Default::default()
            }
        }

        fn always_failing() -> Self {
            Self::failing_on((1..=64).collect())
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-vision"
        }

        fn max_context_length(&self) -> usize {
            128_000
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            Err(LlmError::ApiError("text completion not used".into()))
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.complete(prompt).await
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.fail_on.contains(&call) {
                return Err(LlmError::ApiError("upstream unavailable".into()));
            }
            Ok(LLMResponse::new(format!("page {call}"), "scripted-vision").with_usage(100, 10))
        }
    }

    #[derive(Default)]
    struct CountingCallback {
        started: AtomicUsize,
        page_starts: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        finished: Mutex<Option<(usize, usize)>>,
    }

    impl ConversionProgressCallback for CountingCallback {
        fn on_conversion_start(&self, _total_pages: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.page_starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _markdown_len: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
            *self.finished.lock().unwrap() = Some((total_pages, success_count));
        }
    }

    #[test]
    fn infer_prefers_known_extension() {
        assert_eq!(InputFormat::infer("paper.PDF", b""), Some(InputFormat::Pdf));
        assert_eq!(
            InputFormat::infer("scan.jpeg", b"%PDF-1.7"),
            Some(InputFormat::Image(ImageKind::Jpeg))
        );
        assert_eq!(InputFormat::infer("notes.md", b""), Some(InputFormat::Markdown));
        assert_eq!(InputFormat::infer("notes.txt", b""), Some(InputFormat::PlainText));
    }

    #[test]
    fn infer_sniffs_when_extension_missing_or_unknown() {
        assert_eq!(InputFormat::infer("upload", b"%PDF-1.4\n"), Some(InputFormat::Pdf));
        assert_eq!(
            InputFormat::infer("upload.bin", b"\x89PNG\r\n\x1a\n...."),
            Some(InputFormat::Image(ImageKind::Png))
        );
        assert_eq!(
            InputFormat::infer("photo", &[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(InputFormat::Image(ImageKind::Jpeg))
        );
        assert_eq!(InputFormat::infer("slides.pptx", b"PK\x03\x04"), None);
    }

    #[test]
    fn missing_or_blank_name_defaults_to_pdf() {
        assert_eq!(
            DocumentStream::with_optional_name(None, Vec::new()).name,
            DEFAULT_DOCUMENT_NAME
        );
        assert_eq!(
            DocumentStream::with_optional_name(Some("  "), Vec::new()).name,
            DEFAULT_DOCUMENT_NAME
        );
        assert_eq!(
            DocumentStream::with_optional_name(Some("a.md"), Vec::new()).name,
            "a.md"
        );
    }

    #[test]
    fn extension_of_handles_odd_names() {
        assert_eq!(extension_of("archive.tar.GZ").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".hidden"), None);
    }

    #[tokio::test]
    async fn converts_markdown_without_provider() {
        let source = DocumentStream::new("notes.md", "# Notes\r\n\r\n- one   \r\n- two\r\n");
        let result = converter().convert(source).await.unwrap();

        assert_eq!(result.document.format, InputFormat::Markdown);
        assert_eq!(result.document.export_to_markdown(), "# Notes\n\n- one\n- two\n");
        assert_eq!(result.stats.processed_pages, 1);
        assert_eq!(result.stats.total_input_tokens, 0);
    }

    #[tokio::test]
    async fn rejects_non_utf8_text() {
        let source = DocumentStream::new("notes.txt", vec![b'o', b'k', 0xFF, 0xFE]);
        let err = converter().convert(source).await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidEncoding { offset: 2, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn rejects_whitespace_only_text() {
        let source = DocumentStream::new("blank.txt", " \n\t\n");
        let err = converter().convert(source).await.unwrap_err();
        assert!(matches!(err, ParseError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn rejects_pdf_name_with_wrong_magic() {
        let source = DocumentStream::new("paper.pdf", "hello world");
        let err = converter().convert(source).await.unwrap_err();
        match err {
            ParseError::NotAPdf { magic, .. } => assert_eq!(magic, b"hell".to_vec()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_unknown_format() {
        let source = DocumentStream::new("deck.pptx", "PK\x03\x04");
        let err = converter().convert(source).await.unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn rejects_empty_upload() {
        let source = DocumentStream::new("document.pdf", Vec::new());
        let err = converter().convert(source).await.unwrap_err();
        assert!(matches!(err, ParseError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn empty_upload_is_empty_whatever_its_name() {
        for name in ["blob", "x.docx", "deck.pptx"] {
            let err = converter()
                .convert(DocumentStream::new(name, Vec::new()))
                .await
                .unwrap_err();
            assert!(matches!(err, ParseError::EmptyDocument { .. }), "{name}: {err:?}");
        }
    }

    #[tokio::test]
    async fn png_upload_is_transcribed_and_unfenced() {
        let mock = MockProvider::new();
        mock.add_response("```markdown\n# Scanned\n\nBody text.\n```").await;
        let converter = vlm_converter(Arc::new(mock), false);

        let result = converter
            .convert(DocumentStream::new("scan.png", png_bytes()))
            .await
            .unwrap();

        assert_eq!(result.document.format, InputFormat::Image(ImageKind::Png));
        assert_eq!(result.document.export_to_markdown(), "# Scanned\n\nBody text.\n");
        assert_eq!(result.stats.total_pages, 1);
        assert_eq!(result.stats.processed_pages, 1);
        assert_eq!(result.stats.failed_pages, 0);
    }

    #[tokio::test]
    async fn undecodable_image_is_rejected_before_the_vlm() {
        let provider = Arc::new(ScriptedProvider::default());
        let converter = vlm_converter(provider.clone(), false);

        let err = converter
            .convert(DocumentStream::new("scan.png", "not really a png"))
            .await
            .unwrap_err();

        assert!(matches!(err, ParseError::ImageDecodeFailed { .. }), "{err:?}");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_provider_fails_the_whole_image() {
        let provider = Arc::new(ScriptedProvider::always_failing());
        let config = ConversionConfig::builder()
            .provider(provider.clone())
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();

        let err = DocumentConverter::new(config)
            .convert(DocumentStream::new("scan.png", png_bytes()))
            .await
            .unwrap_err();

        match err {
            ParseError::AllPagesFailed {
                total,
                retries,
                first_error,
            } => {
                assert_eq!(total, 1);
                assert_eq!(retries, 2);
                assert!(first_error.contains("upstream unavailable"), "{first_error}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_pages_report_progress_and_keep_failures() {
        let callback = Arc::new(CountingCallback::default());
        let config = ConversionConfig::builder()
            .provider(Arc::new(ScriptedProvider::failing_on(vec![2])))
            .concurrency(1)
            .max_retries(0)
            .progress_callback(callback.clone())
            .build()
            .unwrap();
        let converter = DocumentConverter::new(config);
        let provider = converter.ensure_provider().await.unwrap();
        let pages: Vec<_> = (0..3).map(|i| (i, page_image())).collect();

        let results = converter.transcribe(&provider, &pages).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|p| p.is_ok()).count(), 2);
        assert!(matches!(
            results[1].error,
            Some(PageError::LlmFailed { page: 2, .. })
        ));
        // cleanup runs on successful pages only
        assert_eq!(results[0].markdown, "page 1\n");
        assert!(results[1].markdown.is_empty());

        assert_eq!(callback.started.load(Ordering::SeqCst), 1);
        assert_eq!(callback.page_starts.load(Ordering::SeqCst), 3);
        assert_eq!(callback.completed.load(Ordering::SeqCst), 2);
        assert_eq!(callback.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*callback.finished.lock().unwrap(), Some((3, 2)));
    }

    #[tokio::test]
    async fn sequential_mode_sends_previous_page_as_context() {
        let provider = Arc::new(ScriptedProvider::default());
        let converter = vlm_converter(provider.clone(), true);
        let handle: Arc<dyn LLMProvider> = provider.clone();
        let pages: Vec<_> = (0..3).map(|i| (i, page_image())).collect();

        let results = converter.transcribe(&handle, &pages).await;

        let pages_seen: Vec<usize> = results.iter().map(|p| p.page_num).collect();
        assert_eq!(pages_seen, vec![1, 2, 3]);

        let seen = provider.seen.lock().unwrap();
        let lengths: Vec<usize> = seen.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 3, 3]);
        assert!(seen[1][1].content.contains("page 1"));
        assert!(seen[2][1].content.contains("page 2"));
    }

    #[tokio::test]
    async fn sequential_mode_skips_context_after_a_failed_page() {
        let provider = Arc::new(ScriptedProvider::failing_on(vec![1]));
        let converter = vlm_converter(provider.clone(), true);
        let handle: Arc<dyn LLMProvider> = provider.clone();
        let pages: Vec<_> = (0..2).map(|i| (i, page_image())).collect();

        let results = converter.transcribe(&handle, &pages).await;

        assert!(!results[0].is_ok());
        assert!(results[1].is_ok());
        let lengths: Vec<usize> = provider.seen.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 2]);
    }

    #[test]
    fn partial_failure_is_counted_not_fatal() {
        let failed = PageResult {
            error: Some(PageError::LlmFailed {
                page: 2,
                retries: 0,
                detail: "boom".into(),
            }),
            ..PageResult::text(2, String::new())
        };
        let pages = vec![
            PageResult::text(1, "one\n".into()),
            failed,
            PageResult::text(3, "three\n".into()),
        ];
        let metadata = DocumentMetadata {
            page_count: 3,
            ..Default::default()
        };

        let result = converter()
            .assemble(
                "paper.pdf".into(),
                InputFormat::Pdf,
                metadata,
                pages,
                Timings::default(),
                Instant::now(),
            )
            .unwrap();

        assert_eq!(result.stats.total_pages, 3);
        assert_eq!(result.stats.processed_pages, 2);
        assert_eq!(result.stats.failed_pages, 1);
        assert_eq!(result.document.export_to_markdown(), "one\n\nthree\n");
    }
}
