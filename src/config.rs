//! Configuration types for the parse service.
//!
//! Conversion behaviour is controlled through [`ConversionConfig`], built via
//! its [`ConversionConfigBuilder`]; the listening socket and upload limits
//! live in [`ServerConfig`]. One converter is built per process from a
//! `ConversionConfig` and shared read-only by every request, so a single
//! struct can be logged at startup and compared between deployments.
//!
//! # Builder over constructor
//! Most of the twenty-odd fields have sensible defaults. The builder lets
//! callers set only the knobs they need, and adding a field never breaks an
//! existing call site. Setters clamp obviously out-of-range values;
//! [`ConversionConfigBuilder::build`] rejects the combinations clamping
//! cannot fix.

use crate::error::ParseError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for document-to-Markdown conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use mdparse::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(150)
///     .concurrency(10)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// Text at 150 DPI is sharp enough for a VLM to read reliably while
    /// page images stay well below typical API upload limits (~20 MB).
    /// Raise it to 200–300 for small print; drop it to 96 for very large
    /// pages where request size matters more than pixel density.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A cap independent of DPI: a 200-DPI render of an A0 poster would be
    /// around 13 000 × 18 000 px. Either dimension is capped and the other
    /// scaled proportionally, so one page never allocates much more than
    /// `max_rendered_pixels²` pixels. Applies to rasterised PDF pages and to
    /// uploaded images alike.
    pub max_rendered_pixels: u32,

    /// Number of concurrent VLM API calls per document. Default: 10.
    ///
    /// VLM calls are network-bound, so ten in flight cut wall-clock time by
    /// close to an order of magnitude on long documents. Lower it when the
    /// provider answers with `429`. The limit is per request; concurrent
    /// requests each get their own budget.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the LLM completion. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page; higher values
    /// trade accuracy for variety.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 4096.
    ///
    /// Dense pages (tables, code listings) can exceed 2 000 output tokens;
    /// setting this too low silently truncates the Markdown mid-sentence.
    /// 4 096 covers nearly every academic-paper page while keeping per-page
    /// cost predictable.
    pub max_tokens: usize,

    /// Maximum retry attempts on a VLM API failure. Default: 3.
    ///
    /// Most 5xx and timeout errors are transient (an overloaded backend, a
    /// network blip). Three retries absorb them without holding a request
    /// open for long. A page that still fails is recorded as a
    /// [`crate::error::PageError`] and left out of the export.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. With many pages in
    /// flight, fixed-interval retries would all land on a recovering
    /// endpoint at the same moment; doubling spreads them out.
    pub retry_backoff_ms: u64,

    /// PDF user password applied to encrypted uploads.
    pub password: Option<String>,

    /// Custom system prompt. If None, the built-in prompt for `fidelity` is used.
    pub system_prompt: Option<String>,

    /// Sequential mode: pass the previous page's Markdown as context to the VLM. Default: false.
    ///
    /// A VLM does not know that page 3 continues the numbered list from
    /// page 2. Sending the prior page as context lets it continue lists,
    /// keep heading levels and avoid repeating section titles.
    ///
    /// The cost: pages of one document are processed one at a time, so a
    /// 100-page PDF takes several times longer than in concurrent mode. Worth
    /// it for books and reports; leave it off for slide decks and scans of
    /// unrelated pages.
    pub maintain_format: bool,

    /// Fidelity tier controlling prompt complexity and output richness. Default: [`FidelityTier::Tier2`].
    ///
    /// Higher tiers ask for LaTeX, HTML table fallback and figure captions,
    /// which costs input tokens on every page.
    pub fidelity: FidelityTier,

    /// Page separator in the exported Markdown. Default: None.
    pub page_separator: PageSeparator,

    /// Prefix the export with YAML front-matter built from document metadata. Default: false.
    pub include_metadata: bool,

    /// Download timeout for `url` sources in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-VLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Explicit pdfium library file or directory. Default: None (working directory, then system).
    pub pdfium_lib_path: Option<PathBuf>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 10,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            system_prompt: None,
            maintain_format: false,
            fidelity: FidelityTier::default(),
            page_separator: PageSeparator::default(),
            include_metadata: false,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("maintain_format", &self.maintain_format)
            .field("fidelity", &self.fidelity)
            .field("page_separator", &self.page_separator)
            .field("include_metadata", &self.include_metadata)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn maintain_format(mut self, v: bool) -> Self {
        self.config.maintain_format = v;
        self
    }

    pub fn fidelity(mut self, tier: FidelityTier) -> Self {
        self.config.fidelity = tier;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ParseError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ParseError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ParseError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ParseError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// Listening socket and request limits for the HTTP service.
///
/// The defaults bind every interface on port 8000 and accept uploads of any
/// size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Largest accepted upload in bytes. `None` disables the limit.
    pub max_upload_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            max_upload_bytes: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Quality tier controlling which Markdown features the VLM is asked to produce.
///
/// Prompt complexity trades against cost and latency: the LaTeX and
/// HTML-table instructions add roughly a third to the system prompt and can
/// confuse models that handle those constructs poorly. Pick the lowest tier
/// the downstream consumer needs.
///
/// | Tier | Use case |
/// |------|----------|
/// | 1 | Plain-text extraction, embedding pipelines |
/// | 2 | Documentation, wikis, readable reports (default) |
/// | 3 | Scientific papers, technical books with math and complex tables |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FidelityTier {
    /// Basic: text, headings, lists only. Lowest prompt overhead.
    Tier1,
    /// Structural: text, headings, lists, GFM tables, code. (default)
    #[default]
    Tier2,
    /// High-fidelity: Tier2 + LaTeX math (`$…$`, `$$…$$`), HTML table fallback, image captions.
    Tier3,
}

/// How to separate pages in the exported Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }

    /// Parse the textual form used on the command line: `none`, `hr`, `comment`,
    /// or anything else as a custom separator.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => PageSeparator::None,
            "hr" | "---" => PageSeparator::HorizontalRule,
            "comment" => PageSeparator::Comment,
            _ => PageSeparator::Custom(s.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = ConversionConfig::builder()
            .dpi(10)
            .concurrency(0)
            .temperature(5.0)
            .max_rendered_pixels(3)
            .build()
            .unwrap();
        assert_eq!(config.dpi, 72);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_rendered_pixels, 100);
    }

    #[test]
    fn build_rejects_zero_api_timeout() {
        let err = ConversionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let config = ConversionConfig::builder()
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn server_defaults_bind_all_interfaces_on_8000() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address().to_string(), "0.0.0.0:8000");
        assert_eq!(server.max_upload_bytes, None);
    }

    #[test]
    fn separator_render_and_parse() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::Comment.render(7), "\n\n<!-- page 7 -->\n\n");
        assert_eq!(PageSeparator::parse("HR"), PageSeparator::HorizontalRule);
        assert_eq!(PageSeparator::parse("comment"), PageSeparator::Comment);
        assert_eq!(
            PageSeparator::parse("* * *"),
            PageSeparator::Custom("* * *".into())
        );
    }
}
