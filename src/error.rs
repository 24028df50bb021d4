//! Error types for the gateway.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The canonical request is missing or unusable. Raised before any vendor call.
    #[error("Invalid request: {message}")]
    InvalidInput { message: String },

    /// No vendor declares this model name. Raised before any vendor call.
    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    /// Network, auth or transport failure reported by the invocation boundary.
    #[error("{operation} failed: {message}")]
    VendorCallFailed {
        operation: &'static str,
        message: String,
        status: Option<u16>,
    },

    /// The vendor answered with a body or event payload we could not decode.
    #[error("Failed to decode vendor payload: {message}")]
    VendorDecodeFailed { message: String },

    /// The vendor event stream produced a member we do not know.
    #[error("Unsupported vendor stream event: {tag}")]
    UnsupportedVendorEvent { tag: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    pub fn vendor_call(operation: &'static str, msg: impl Into<String>, status: Option<u16>) -> Self {
        Self::VendorCallFailed {
            operation,
            message: msg.into(),
            status,
        }
    }

    pub fn vendor_decode(msg: impl Into<String>) -> Self {
        Self::VendorDecodeFailed {
            message: msg.into(),
        }
    }

    pub fn unsupported_event(tag: impl Into<String>) -> Self {
        Self::UnsupportedVendorEvent { tag: tag.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status surfaced to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::UnknownModel { .. } => StatusCode::NOT_FOUND,
            Self::VendorCallFailed { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::VendorDecodeFailed { .. }
            | Self::UnsupportedVendorEvent { .. }
            | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI-style `error.type` string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } | Self::Json(_) => "invalid_request_error",
            Self::UnknownModel { .. } => "model_not_found",
            Self::VendorCallFailed { .. } | Self::Http(_) => "upstream_error",
            Self::VendorDecodeFailed { .. } | Self::UnsupportedVendorEvent { .. } => {
                "upstream_decode_error"
            }
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
