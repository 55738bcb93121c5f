use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Billing is not configured (missing credentials, price map, or backing
    /// store). Surfaced as 503 so operators know to fix configuration rather
    /// than clients retrying.
    #[error("Billing not configured: {0}")]
    Configuration(String),

    /// Bad caller input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook authenticity failure. The request is rejected outright and no
    /// state change happens.
    #[error("Webhook signature rejected: {0}")]
    Signature(String),

    /// The billing provider call failed.
    #[error("Billing provider error during '{operation}': {message}")]
    Upstream {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    /// The entitlement store failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BillingError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) | Self::Signature(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => match self.upstream_kind() {
                Some(UpstreamKind::UnknownPrice | UpstreamKind::BadCredentials) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                None => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Store(_) | Self::Internal(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Classify known upstream failures so they can get stable, user-safe
    /// messages instead of leaking raw provider output.
    fn upstream_kind(&self) -> Option<UpstreamKind> {
        let Self::Upstream { message, .. } = self else {
            return None;
        };
        let lower = message.to_lowercase();
        if lower.contains("no such price") {
            Some(UpstreamKind::UnknownPrice)
        } else if lower.contains("invalid api key") {
            Some(UpstreamKind::BadCredentials)
        } else {
            None
        }
    }

    /// Client-facing message. For client errors (4xx) the real message is
    /// useful and safe; server-side failures collapse to stable generic
    /// messages, with the full detail going to logs only.
    fn safe_message(&self) -> String {
        match self {
            Self::Validation(msg) => format!("Invalid request: {}", msg),
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::Signature(_) => "Invalid webhook signature".to_string(),
            Self::Configuration(_) => "Billing is not configured".to_string(),
            Self::Upstream { .. } => match self.upstream_kind() {
                Some(UpstreamKind::UnknownPrice) => {
                    "Billing is misconfigured: the subscription price is not recognized"
                        .to_string()
                }
                Some(UpstreamKind::BadCredentials) => {
                    "Billing is misconfigured: provider credentials were rejected".to_string()
                }
                None => "Billing provider request failed".to_string(),
            },
            Self::Store(_) | Self::Internal(_) | Self::Anyhow(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamKind {
    UnknownPrice,
    BadCredentials,
}

/// Standard error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
    error_id: String,
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        // Full detail stays server-side; the body carries the safe message.
        tracing::error!(
            target: "stoicaf::billing",
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Request failed"
        );

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
        });

        (status, body).into_response()
    }
}

/// Result type alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;
