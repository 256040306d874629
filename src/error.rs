use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Timeout of [{timeout_ms}ms] reached when fetching terms from [{url}]")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Tantivy error: {0}")]
    Tantivy(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, LookupError>;

impl From<tantivy::TantivyError> for LookupError {
    fn from(e: tantivy::TantivyError) -> Self {
        LookupError::Tantivy(e.to_string())
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(e: serde_json::Error) -> Self {
        LookupError::Json(e.to_string())
    }
}

impl LookupError {
    /// True for failures raised while talking to a backend, as opposed to
    /// misconfiguration caught before any connection was attempted.
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            LookupError::Timeout { .. }
                | LookupError::Transport(_)
                | LookupError::Format(_)
                | LookupError::Query(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LookupError::Config(_) => StatusCode::BAD_REQUEST,
            LookupError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            LookupError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LookupError::Transport(_) => StatusCode::BAD_GATEWAY,
            LookupError::Format(_) => StatusCode::BAD_GATEWAY,
            LookupError::Query(_) => StatusCode::BAD_GATEWAY,
            LookupError::Tantivy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LookupError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            LookupError::Config(_) => "lookup_config_error",
            LookupError::InvalidQuery(_) => "invalid_query",
            LookupError::Timeout { .. } => "lookup_timeout",
            LookupError::Transport(_) => "lookup_transport_error",
            LookupError::Format(_) => "lookup_format_error",
            LookupError::Query(_) => "lookup_query_error",
            LookupError::Tantivy(_) => "internal_error",
            LookupError::Json(_) => "json_error",
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            LookupError::Config(_) => {
                Some("Check the lookup url, driver, command, and args".to_string())
            }
            LookupError::Timeout { .. } => {
                Some("Raise the lookup timeout or check the source latency".to_string())
            }
            LookupError::Transport(_) => Some("Check that the lookup source is reachable".to_string()),
            LookupError::Format(_) => Some(
                "The source must return a JSON array, or set a path into the returned object"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let error_code = self.error_code();
        let error_response = ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
            request_id: format!("req_fj_{}", uuid::Uuid::new_v4()),
            suggestion: self.suggestion(),
            docs: Some(format!("https://flapjack.dev/docs/errors/{}", error_code)),
        };

        (self.status_code(), Json(error_response)).into_response()
    }
}
