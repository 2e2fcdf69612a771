//! HTTP surface: `POST /parse` and `GET /health`.
//!
//! The handler buffers the uploaded `file` part, hands it to the shared
//! converter and returns the Markdown export as `{"text": "..."}`. Any
//! converter failure becomes an error response; there is no partial success.

use crate::config::{ConversionConfig, ServerConfig};
use crate::converter::{Convert, DocumentStream};
use crate::error::ParseError;
use crate::pipeline::input::{self, DownloadPolicy};
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn, Level};

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<dyn Convert>,
    /// Maximum accepted size of the `file` part and of `url` downloads;
    /// `None` accepts anything.
    pub max_upload_bytes: Option<usize>,
    /// Accept the `url` field. Off by default: it makes the server fetch
    /// arbitrary client-chosen URLs.
    pub allow_url_sources: bool,
    /// Let `url` sources reach loopback, private and link-local hosts.
    pub allow_private_url_hosts: bool,
    /// Timeout for `url` downloads.
    pub download_timeout_secs: u64,
}

impl AppState {
    pub fn new(converter: Arc<dyn Convert>) -> Self {
        Self {
            converter,
            max_upload_bytes: None,
            allow_url_sources: false,
            allow_private_url_hosts: false,
            download_timeout_secs: ConversionConfig::default().download_timeout_secs,
        }
    }

    pub fn with_max_upload_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn with_url_sources(mut self, allow: bool) -> Self {
        self.allow_url_sources = allow;
        self
    }

    pub fn with_private_url_hosts(mut self, allow: bool) -> Self {
        self.allow_private_url_hosts = allow;
        self
    }

    pub fn with_download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            timeout_secs: self.download_timeout_secs,
            max_bytes: self.max_upload_bytes,
            allow_private_hosts: self.allow_private_url_hosts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String },

    #[error("Missing 'file' field in multipart body")]
    MissingFile,

    #[error("Upload exceeds the maximum allowed size of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Conversion(#[from] ParseError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conversion(e) => match e {
                ParseError::InvalidUrl { .. } | ParseError::ForbiddenHost { .. } => {
                    StatusCode::BAD_REQUEST
                }
                ParseError::DownloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ParseError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ParseError::NotAPdf { .. }
                | ParseError::InvalidEncoding { .. }
                | ParseError::ImageDecodeFailed { .. }
                | ParseError::EmptyDocument { .. }
                | ParseError::CorruptPdf { .. }
                | ParseError::PasswordRequired { .. }
                | ParseError::WrongPassword { .. }
                | ParseError::RasterisationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ParseError::DownloadFailed { .. } | ParseError::AllPagesFailed { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                ParseError::ProviderNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ParseError::DownloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ParseError::InvalidConfig(_)
                | ParseError::PdfiumBindingFailed(_)
                | ParseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to send to the client.
    pub fn user_message(&self) -> String {
        if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Internal service error: {:#}", self);
            } else {
                warn!("Upstream failure: {}", self);
            }
        } else {
            debug!("Client error: {}", self);
        }

        let body = serde_json::json!({ "detail": self.user_message() });
        (status, Json(body)).into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let parse_route = match state.max_upload_bytes {
        // Headroom for multipart framing; the handler enforces the exact limit.
        Some(limit) => {
            post(parse_document).layer(DefaultBodyLimit::max(limit.saturating_add(16 * 1024)))
        }
        None => post(parse_document).layer(DefaultBodyLimit::disable()),
    };

    Router::new()
        .route("/parse", parse_route)
        .route("/health", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// `POST /parse`: convert the uploaded document and return its Markdown.
pub async fn parse_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ParseResponse>, ApiError> {
    let mut upload: Option<DocumentStream> = None;
    let mut url: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" if upload.is_none() => {
                upload = Some(read_file_field(field, state.max_upload_bytes).await?);
            }
            "url" if url.is_none() => {
                let value = field.text().await.map_err(multipart_error)?;
                url = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let source = match (upload, url) {
        (Some(source), _) => source,
        (None, Some(_)) if !state.allow_url_sources => {
            return Err(ApiError::BadRequest {
                message: "URL sources are disabled on this server; upload the document as 'file'"
                    .to_string(),
            });
        }
        (None, Some(url)) => input::download(&url, &state.download_policy()).await?,
        (None, None) => return Err(ApiError::MissingFile),
    };

    info!(
        filename = %source.name,
        size = source.data.len(),
        "Parsing uploaded document"
    );

    let result = state.converter.convert(source).await?;
    Ok(Json(ParseResponse {
        text: result.document.export_to_markdown(),
    }))
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn read_file_field(
    mut field: Field<'_>,
    limit: Option<usize>,
) -> Result<DocumentStream, ApiError> {
    let filename = field.file_name().map(str::to_string);
    let mut data: Vec<u8> = Vec::new();

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        data.extend_from_slice(&chunk);
        if let Some(limit) = limit {
            if data.len() > limit {
                warn!(
                    filename = ?filename,
                    received = data.len(),
                    limit,
                    "Upload size limit exceeded, aborting"
                );
                return Err(ApiError::PayloadTooLarge { limit });
            }
        }
    }

    Ok(DocumentStream::with_optional_name(filename.as_deref(), data))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest {
        message: format!("Failed to parse multipart data: {}", e),
    }
}

/// Bind `config.bind_address()` and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_address();
    let listener = TcpListener::bind(addr).await?;
    info!("mdparse listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: ParseError) -> StatusCode {
        ApiError::from(e).status_code()
    }

    #[test]
    fn client_side_document_problems_are_4xx() {
        assert_eq!(status_of(ParseError::unsupported("a.pptx")), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            status_of(ParseError::EmptyDocument { name: "a.txt".into() }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ParseError::PasswordRequired { name: "a.pdf".into() }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ParseError::InvalidUrl { input: "ftp://x".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ParseError::ForbiddenHost {
                url: "http://127.0.0.1/".into(),
                addr: "127.0.0.1".parse().unwrap()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ParseError::DownloadTooLarge {
                url: "https://x/a.pdf".into(),
                limit: 16
            }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ApiError::MissingFile.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ApiError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn upstream_problems_are_5xx() {
        assert_eq!(
            status_of(ParseError::AllPagesFailed {
                total: 2,
                retries: 3,
                first_error: "boom".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ParseError::ProviderNotConfigured {
                provider: "auto".into(),
                hint: String::new()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ParseError::DownloadTimeout {
                url: "https://x/a.pdf".into(),
                secs: 5
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let e = ApiError::from(ParseError::PdfiumBindingFailed("/opt/secret/libpdfium.so".into()));
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.user_message(), "Internal server error");

        let e = ApiError::from(ParseError::EmptyDocument { name: "a.md".into() });
        assert!(e.user_message().contains("a.md"));
    }
}
