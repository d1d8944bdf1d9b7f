//! Unified error taxonomy and the downstream-facing error mapper.
//!
//! `GatewayError` is the single error type routes return. Its
//! `ResponseError` impl hides upstream identity from the client while the
//! detailed variant and any wrapped upstream message are still logged and
//! recorded on the request log.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("API key expired")]
    ExpiredApiKey,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no upstreams configured for model '{model}'")]
    NoUpstreamsConfigured { model: String },

    #[error("all upstream candidates exhausted after {attempts} attempt(s)")]
    AllUpstreamsUnavailable { attempts: usize },

    #[error("request to upstream timed out after {timeout_secs}s")]
    RequestTimeout { timeout_secs: u64 },

    #[error("client disconnected mid-request")]
    ClientDisconnected,

    #[error("circuit open for upstream {upstream_id}")]
    CircuitOpen { upstream_id: String },

    #[error("upstream stream ended abnormally")]
    StreamError,

    #[error("gateway misconfigured: {0}")]
    Configuration(String),

    #[error("service unavailable")]
    ServiceUnavailable,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl GatewayError {
    /// Stable machine-readable code, independent of the `Display` message.
    /// Never includes an upstream name, URL, or raw upstream error text.
    fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingApiKey => "MISSING_API_KEY",
            GatewayError::InvalidApiKey => "INVALID_API_KEY",
            GatewayError::ExpiredApiKey => "EXPIRED_API_KEY",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::NoUpstreamsConfigured { .. } => "NO_UPSTREAMS_CONFIGURED",
            GatewayError::AllUpstreamsUnavailable { .. } => "ALL_UPSTREAMS_UNAVAILABLE",
            GatewayError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            GatewayError::ClientDisconnected => "CLIENT_DISCONNECTED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::StreamError => "STREAM_ERROR",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// The message returned to the caller. For variants that wrap upstream
    /// detail (none currently do directly — upstream responses are
    /// forwarded verbatim by the proxy route, not through this type) this
    /// stays generic; everything else reuses the `Display` text since none
    /// of it names an upstream.
    fn public_message(&self) -> String {
        match self {
            GatewayError::CircuitOpen { .. } => "upstream temporarily unavailable".to_string(),
            GatewayError::AllUpstreamsUnavailable { .. } => {
                "no upstream was able to serve this request".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingApiKey
            | GatewayError::InvalidApiKey
            | GatewayError::ExpiredApiKey => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoUpstreamsConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::AllUpstreamsUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ClientDisconnected => StatusCode::BAD_REQUEST,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::StreamError => StatusCode::BAD_GATEWAY,
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        log::error!("gateway error: {} ({})", self, self.code());
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        })
    }
}
