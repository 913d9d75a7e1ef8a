//! Remote execution delegate
//!
//! Client side of the HTTP processing contract: the image and its options are
//! posted as multipart form data, the processed image comes back as the body
//! with size and timing headers.

use crate::{
    config::{Capabilities, OutputFormat, ProcessingOptions},
    error::{PipelineError, Result},
    services::validation::detect_format,
};
use instant::Duration;
use reqwest::{header::HeaderMap, multipart, StatusCode};
use tokio_util::sync::CancellationToken;

/// Path of the processing and discovery endpoint
pub const PROCESS_IMAGE_PATH: &str = "/api/process-image";
/// Size of the submitted image in bytes
pub const HEADER_ORIGINAL_SIZE: &str = "x-original-size";
/// Server-side processing duration in milliseconds
pub const HEADER_PROCESSING_TIME: &str = "x-processing-time";
/// Size of the returned image in bytes
pub const HEADER_PROCESSED_SIZE: &str = "x-processed-size";

/// Connection settings for a remote processing service
#[derive(Debug, Clone)]
pub struct RemoteDelegateConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl RemoteDelegateConfig {
    #[must_use]
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Processed image returned by the remote service
#[derive(Debug, Clone)]
pub struct RemoteResult {
    pub bytes: Vec<u8>,
    pub original_size: usize,
    pub processed_size: usize,
    pub processing_time_ms: u64,
    pub content_type: String,
}

impl RemoteResult {
    /// Processed size relative to original size, derived from headers
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.processed_size as f64 / self.original_size as f64
    }

    /// Output format announced by `Content-Type`
    #[must_use]
    pub fn format(&self) -> Option<OutputFormat> {
        let mime = self.content_type.split(';').next().unwrap_or_default().trim();
        OutputFormat::from_name(mime)
    }
}

/// HTTP client for the remote processing contract
#[derive(Debug, Clone)]
pub struct RemoteDelegate {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl RemoteDelegate {
    /// Create a delegate for `config`
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: RemoteDelegateConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::stage_error("remote", e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                PROCESS_IMAGE_PATH
            ),
            api_token: config.api_token,
        })
    }

    /// Full URL of the processing endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Process `bytes` remotely with `options`
    ///
    /// Cancelling `cancel` drops the in-flight request and returns `Cancelled`.
    ///
    /// # Errors
    /// - `InvalidOptions` for out-of-range options (checked before sending)
    /// - `Unauthorized`, `QuotaExceeded`, `BackgroundRemovalFailed` mapped from status codes
    /// - `Internal` for transport failures and other non-success statuses
    pub async fn process(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
        cancel: &CancellationToken,
    ) -> Result<RemoteResult> {
        options.validate()?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let original_size = bytes.len();
        tracing::debug!(
            endpoint = %self.endpoint,
            filename,
            bytes = original_size,
            "Sending image to remote processor"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Remote request aborted by cancellation");
                Err(PipelineError::Cancelled)
            },
            result = self.send(bytes, filename, options) => result,
        }
    }

    async fn send(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
    ) -> Result<RemoteResult> {
        let original_size = bytes.len();
        let mime = detect_format(&bytes)
            .map_or("application/octet-stream", |format| format.to_mime_type());

        let image_part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(transport_error)?;
        let options_json = serde_json::to_string(options)
            .map_err(|e| PipelineError::stage_error("remote", e.to_string()))?;
        let form = multipart::Form::new()
            .part("image", image_part)
            .text("options", options_json);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?.to_vec();
        if body.is_empty() {
            return Err(PipelineError::stage_error(
                "remote",
                "remote processor returned an empty body",
            ));
        }

        let result = RemoteResult {
            original_size: header_number(&headers, HEADER_ORIGINAL_SIZE)
                .map_or(original_size, |v| v as usize),
            processed_size: header_number(&headers, HEADER_PROCESSED_SIZE)
                .map_or(body.len(), |v| v as usize),
            processing_time_ms: header_number(&headers, HEADER_PROCESSING_TIME).unwrap_or(0),
            content_type: headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string(),
            bytes: body,
        };

        tracing::debug!(
            processed = result.processed_size,
            ms = result.processing_time_ms,
            "Remote processing completed"
        );
        Ok(result)
    }

    /// Read the service's capabilities from the discovery endpoint
    ///
    /// # Errors
    /// Returns an error for transport failures, non-success statuses or
    /// malformed JSON.
    pub async fn capabilities(&self) -> Result<Capabilities> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<Capabilities>()
            .await
            .map_err(|e| PipelineError::stage_error("remote", format!("capabilities: {e}")))
    }
}

fn transport_error(error: reqwest::Error) -> PipelineError {
    PipelineError::stage_error("remote", error.to_string())
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map a non-success status and its body onto the pipeline error taxonomy
pub(crate) fn status_error(status: StatusCode, body: &str) -> PipelineError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.trim().to_string()
    };

    match status {
        StatusCode::UNAUTHORIZED => PipelineError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => PipelineError::QuotaExceeded(message),
        StatusCode::UNPROCESSABLE_ENTITY => PipelineError::BackgroundRemovalFailed(message),
        StatusCode::BAD_REQUEST => PipelineError::InvalidOptions(message),
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            PipelineError::Validation(message)
        },
        other => PipelineError::stage_error("remote", format!("HTTP {}: {message}", other.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "limit").kind(),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "no subject").kind(),
            ErrorKind::BackgroundRemovalFailed
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, "quality").kind(),
            ErrorKind::InvalidOptions
        );
        assert_eq!(
            status_error(StatusCode::UNSUPPORTED_MEDIA_TYPE, "not an image").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "").kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_status_error_keeps_body_message() {
        let err = status_error(StatusCode::UNPROCESSABLE_ENTITY, "  no subject found\n");
        assert_eq!(err.to_string(), "Background removal failed: no subject found");
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let delegate =
            RemoteDelegate::new(RemoteDelegateConfig::new("http://localhost:9000/")).unwrap();
        assert_eq!(
            delegate.endpoint(),
            "http://localhost:9000/api/process-image"
        );
    }

    #[test]
    fn test_remote_result_ratio_and_format() {
        let result = RemoteResult {
            bytes: vec![0; 10],
            original_size: 400,
            processed_size: 100,
            processing_time_ms: 12,
            content_type: "image/webp; charset=binary".to_string(),
        };
        assert!((result.compression_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(result.format(), Some(OutputFormat::ModernLossy));
    }

    #[tokio::test]
    async fn test_process_rejects_invalid_options_before_sending() {
        let delegate =
            RemoteDelegate::new(RemoteDelegateConfig::new("http://127.0.0.1:9")).unwrap();
        let options = ProcessingOptions {
            quality: 0.0,
            ..ProcessingOptions::default()
        };
        let err = delegate
            .process(vec![1, 2, 3], "x.jpg", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    }

    #[tokio::test]
    async fn test_process_returns_cancelled_for_cancelled_token() {
        let delegate =
            RemoteDelegate::new(RemoteDelegateConfig::new("http://127.0.0.1:9")).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = delegate
            .process(vec![1], "x.jpg", &ProcessingOptions::default(), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
