//! HTTP server for the remote processing contract
//!
//! `POST /api/process-image` takes a multipart form with an `image` file and
//! an optional `options` JSON part, and answers with the processed image.
//! `GET /api/process-image` describes the server's capabilities.

use crate::{
    config::{Capabilities, ProcessingOptions},
    error::{ErrorKind, PipelineError},
    processor::PipelineProcessor,
    remote::{HEADER_ORIGINAL_SIZE, HEADER_PROCESSED_SIZE, HEADER_PROCESSING_TIME, PROCESS_IMAGE_PATH},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Semaphore};
use tokio_util::sync::CancellationToken;

/// Slack on top of the image size limit for the multipart envelope
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Bearer token required on processing requests
    pub api_token: Option<String>,
    /// Concurrent processing requests before answering 429
    pub capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_token: None,
            capacity: 4,
        }
    }
}

#[derive(Clone)]
struct AppState {
    processor: PipelineProcessor,
    api_token: Option<Arc<str>>,
    permits: Arc<Semaphore>,
}

/// Error response carrying a pipeline error
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::BackgroundRemovalFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidOptions => StatusCode::BAD_REQUEST,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        (status, self.0.user_message()).into_response()
    }
}

/// Build the router serving `processor`
#[must_use]
pub fn router(processor: PipelineProcessor, config: &ServerConfig) -> Router {
    let body_limit = processor.config().max_file_size + MULTIPART_OVERHEAD;
    let state = AppState {
        processor,
        api_token: config.api_token.as_deref().map(Arc::from),
        permits: Arc::new(Semaphore::new(config.capacity.max(1))),
    };

    Router::new()
        .route(PROCESS_IMAGE_PATH, get(capabilities).post(process_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves
///
/// # Errors
/// Returns an error when the server loop fails.
pub async fn serve<F>(
    listener: TcpListener,
    processor: PipelineProcessor,
    config: &ServerConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Listening for processing requests");
    axum::serve(listener, router(processor, config))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `config.bind_addr` and serve until `shutdown` resolves
///
/// # Errors
/// Returns an error when binding or serving fails.
pub async fn run<F>(processor: PipelineProcessor, config: ServerConfig, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve(listener, processor, &config, shutdown).await
}

async fn capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    Json(state.processor.capabilities())
}

async fn process_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let _permit = Arc::clone(&state.permits)
        .try_acquire_owned()
        .map_err(|_| PipelineError::quota_exceeded("Server is at capacity, retry later"))?;

    let mut image: Option<(Vec<u8>, String)> = None;
    let mut options = ProcessingOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::invalid_options(format!("Malformed form data: {e}")))?
    {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::invalid_options(format!("Unreadable image: {e}")))?;
                image = Some((data.to_vec(), filename));
            },
            Some("options") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| PipelineError::invalid_options(format!("Unreadable options: {e}")))?;
                options = serde_json::from_str(&text)
                    .map_err(|e| PipelineError::invalid_options(format!("Invalid options: {e}")))?;
            },
            _ => {},
        }
    }

    let (bytes, filename) =
        image.ok_or_else(|| PipelineError::invalid_options("Missing 'image' form field"))?;
    options.validate()?;

    let result = state
        .processor
        .process_bytes(bytes, &filename, &options, CancellationToken::new())
        .await?;

    let mut response = result.bytes.clone().into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(result.mime_type()),
    );
    response_headers.insert(HEADER_ORIGINAL_SIZE, HeaderValue::from(result.original_size));
    response_headers.insert(HEADER_PROCESSED_SIZE, HeaderValue::from(result.processed_size()));
    response_headers.insert(
        HEADER_PROCESSING_TIME,
        HeaderValue::from(result.timings.total_ms),
    );
    Ok(response)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(PipelineError::Unauthorized("Missing or invalid bearer token".to_string()).into())
    }
}
