//! Error types for the listing pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse error classification used for status reporting and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    BackgroundRemovalFailed,
    QuotaExceeded,
    Unauthorized,
    InvalidOptions,
    Cancelled,
    Internal,
}

/// Error types for pipeline, queue and delegate operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input rejected by the validator (size, signature, undecodable data)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Segmentation raised or produced no usable mask
    #[error("Background removal failed: {0}")]
    BackgroundRemovalFailed(String),

    /// Caller-side or remote-side capacity limit hit
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Remote delegate rejected the credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Processing options outside their valid ranges
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Work stopped intentionally through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected failure inside a stage
    #[error("Internal error during {stage}: {message}")]
    Internal { stage: String, message: String },

    /// Segmentation backend inference errors (wrapped by the remover)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Segmentation model loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new background removal error
    pub fn background_removal<S: Into<String>>(msg: S) -> Self {
        Self::BackgroundRemovalFailed(msg.into())
    }

    /// Create a new quota error
    pub fn quota_exceeded<S: Into<String>>(msg: S) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create a new invalid options error
    pub fn invalid_options<S: Into<String>>(msg: S) -> Self {
        Self::InvalidOptions(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create an internal error attributed to a pipeline stage
    pub fn stage_error<S: std::fmt::Display, M: Into<String>>(stage: S, message: M) -> Self {
        Self::Internal {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Create an options error carrying the valid range
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidOptions(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Classify the error for status reporting
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::BackgroundRemovalFailed(_) | Self::Inference(_) | Self::Model(_) => {
                ErrorKind::BackgroundRemovalFailed
            },
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidOptions(_) => ErrorKind::InvalidOptions,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error represents an intentional stop rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Human-readable message safe to show to end users
    ///
    /// Internal errors only expose the stage name; library details stay in logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::InvalidOptions(msg) => msg.clone(),
            Self::BackgroundRemovalFailed(_) | Self::Inference(_) | Self::Model(_) => {
                "Background removal failed. Try again or process without background removal."
                    .to_string()
            },
            Self::QuotaExceeded(_) => {
                "Processing limit reached. Upgrade your plan or try again later.".to_string()
            },
            Self::Unauthorized(_) => "Not authorized to use the processing service.".to_string(),
            Self::Cancelled => "Processing was cancelled.".to_string(),
            Self::Internal { stage, .. } => format!("Processing failed during {stage}."),
            Self::Io(_) => "Processing failed while reading or writing data.".to_string(),
        }
    }
}
