use reqwest::StatusCode;
use thiserror::Error;

/// Failures surfaced by the data-access layer.
///
/// Transient per-endpoint failures never appear here on their own; the
/// failover client absorbs them and only reports [`DataAccessError::AllEndpointsFailed`]
/// once every endpoint has been tried.
#[derive(Debug, Error)]
pub enum DataAccessError {
    /// No usable endpoint remained after normalization and filtering.
    #[error("no API base URLs are configured: {0}")]
    Configuration(String),

    /// The caller's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// Every endpoint answered with a transient failure. One diagnostic per
    /// attempted endpoint, in attempt order.
    #[error("All API hosts failed: {}", .0.join("; "))]
    AllEndpointsFailed(Vec<String>),

    /// The request could not be built at all; retrying elsewhere would not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A non-2xx answer. `detail` carries the backend's `{"detail": ...}`
    /// message when the body has one.
    #[error(
        "request to {path} failed with status {status}{}",
        .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
    )]
    Status {
        path: String,
        status: StatusCode,
        detail: Option<String>,
    },

    /// The payload parsed but did not have the expected collection shape.
    #[error("{0}")]
    DataShape(String),

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DataAccessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message meant for end users: the backend's own detail when present.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status {
                detail: Some(detail),
                ..
            } => detail.clone(),
            other => other.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Cancelled => "cancelled",
            Self::AllEndpointsFailed(_) => "exhausted",
            Self::InvalidRequest(_) => "fatal",
            Self::Status { .. } => "status",
            Self::DataShape(_) => "data_shape",
            Self::Decode(_) => "decode",
        }
    }
}

pub type Result<T, E = DataAccessError> = std::result::Result<T, E>;
