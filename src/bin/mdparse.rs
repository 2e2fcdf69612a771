//! Server binary for mdparse.
//!
//! A thin shim over the library crate: maps CLI flags onto
//! `ConversionConfig` / `ServerConfig`, installs logging and serves
//! `POST /parse` until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use mdparse::{
    server, AppState, ConversionConfig, DocumentConverter, FidelityTier, PageSeparator,
    ServerConfig, TracingProgressCallback,
};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on 0.0.0.0:8000 with the provider auto-detected from the environment
  mdparse

  # Local only, on another port, with a specific model
  mdparse --host 127.0.0.1 --port 9000 --provider openai --model gpt-4.1-mini

  # Convert a document
  curl -F file=@paper.pdf http://127.0.0.1:8000/parse

  # Convert a document by URL
  curl -F url=https://arxiv.org/pdf/1706.03762 http://127.0.0.1:8000/parse

SUPPORTED FORMATS:
  .pdf                 rendered with pdfium, transcribed by the VLM
  .png .jpg .jpeg      transcribed by the VLM
  .md .markdown .txt   normalised, no VLM call

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or containing directory)
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Serve document-to-Markdown conversion over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "mdparse",
    version,
    about = "HTTP service that converts uploaded documents to Markdown",
    long_about = "Accepts a multipart upload on POST /parse and returns {\"text\": \"<markdown>\"}. \
PDF pages and images are transcribed with a Vision Language Model (OpenAI, Anthropic, Gemini, \
Azure OpenAI, Ollama, or any OpenAI-compatible endpoint); Markdown and text files are normalised.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "MDPARSE_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "MDPARSE_PORT", default_value_t = 8000)]
    port: u16,

    /// Reject uploads larger than this many bytes (unlimited when unset).
    #[arg(long, env = "MDPARSE_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "MDPARSE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum rendered image edge in pixels.
    #[arg(long, env = "MDPARSE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Concurrent VLM calls per document.
    #[arg(short, long, env = "MDPARSE_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Sequential mode: pass previous page as context for format continuity.
    #[arg(long, env = "MDPARSE_MAINTAIN_FORMAT")]
    maintain_format: bool,

    /// Output quality: tier1, tier2, tier3.
    #[arg(long, env = "MDPARSE_FIDELITY", value_enum, default_value = "tier2")]
    fidelity: FidelityArg,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "MDPARSE_SEPARATOR", default_value = "none")]
    separator: String,

    /// Prepend YAML front matter with document metadata.
    #[arg(long, env = "MDPARSE_METADATA")]
    metadata: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "MDPARSE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "MDPARSE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "MDPARSE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MDPARSE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "MDPARSE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Accept a `url` field in place of an uploaded file. The server then
    /// fetches documents from client-supplied URLs.
    #[arg(long, env = "MDPARSE_ALLOW_URL_SOURCES")]
    allow_url_sources: bool,

    /// Let `url` sources reach loopback, private and link-local addresses.
    #[arg(long, env = "MDPARSE_ALLOW_PRIVATE_URL_HOSTS", requires = "allow_url_sources")]
    allow_private_url_hosts: bool,

    /// Download timeout in seconds for `url` sources.
    #[arg(long, env = "MDPARSE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "MDPARSE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to libpdfium, or the directory containing it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Start even when no LLM provider can be resolved (text uploads still work).
    #[arg(long, env = "MDPARSE_SKIP_PROVIDER_CHECK")]
    skip_provider_check: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MDPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MDPARSE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FidelityArg {
    Tier1,
    Tier2,
    Tier3,
}

impl From<FidelityArg> for FidelityTier {
    fn from(v: FidelityArg) -> Self {
        match v {
            FidelityArg::Tier1 => FidelityTier::Tier1,
            FidelityArg::Tier2 => FidelityTier::Tier2,
            FidelityArg::Tier3 => FidelityTier::Tier3,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).await?;
    let converter = DocumentConverter::new(config);

    if cli.skip_provider_check {
        tracing::info!("Skipping provider check; provider resolves on first visual document");
    } else {
        converter
            .ensure_provider()
            .await
            .context("No usable LLM provider (use --skip-provider-check to start anyway)")?;
    }

    let server_config = ServerConfig {
        host: cli.host,
        port: cli.port,
        max_upload_bytes: cli.max_upload_bytes,
    };

    let state = AppState::new(Arc::new(converter))
        .with_max_upload_bytes(server_config.max_upload_bytes)
        .with_url_sources(cli.allow_url_sources)
        .with_private_url_hosts(cli.allow_private_url_hosts)
        .with_download_timeout_secs(cli.download_timeout);

    server::serve(&server_config, state, server::shutdown_signal())
        .await
        .with_context(|| format!("Server on {} failed", server_config.bind_address()))?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .concurrency(cli.concurrency)
        .maintain_format(cli.maintain_format)
        .fidelity(cli.fidelity.clone().into())
        .page_separator(PageSeparator::parse(&cli.separator))
        .include_metadata(cli.metadata)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .progress_callback(Arc::new(TracingProgressCallback));

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }

    builder.build().context("Invalid configuration")
}
