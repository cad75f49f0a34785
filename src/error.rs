//! Error types and error codes for the proxy service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Origin did not answer within the fetch timeout
    Timeout,
    /// Origin hostname did not resolve
    DnsError,
    /// TLS handshake with the origin failed
    TlsError,
    /// Origin refused or dropped the connection
    ConnectError,
    /// Operator supplied an unusable target
    InvalidConfiguration,
    /// Unknown browser emulation profile
    InvalidProfile,
    /// Client request could not be forwarded
    InvalidRequest,
    /// Path is outside the proxy prefix
    NotFound,
    /// Origin body exceeded the configured limit
    ResponseTooLarge,
    /// Unknown/internal error
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::DnsError => write!(f, "DNS_ERROR"),
            ErrorCode::TlsError => write!(f, "TLS_ERROR"),
            ErrorCode::ConnectError => write!(f, "CONNECT_ERROR"),
            ErrorCode::InvalidConfiguration => write!(f, "INVALID_CONFIGURATION"),
            ErrorCode::InvalidProfile => write!(f, "INVALID_PROFILE"),
            ErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::ResponseTooLarge => write!(f, "RESPONSE_TOO_LARGE"),
            ErrorCode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Standard error response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_profiles: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            error: error.into(),
            code,
            available_profiles: None,
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.available_profiles = Some(profiles);
        self
    }
}

/// Proxy error with HTTP status code
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ProxyError {
    pub fn new(status: StatusCode, error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status,
            response: ErrorResponse::new(error, code),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.response.code
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message,
            ErrorCode::InvalidConfiguration,
        )
    }

    pub fn invalid_profile(profile: &str, available: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            response: ErrorResponse::new(
                format!("Unknown TLS profile: {}", profile),
                ErrorCode::InvalidProfile,
            )
            .with_profiles(available),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidRequest)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, ErrorCode::NotFound)
    }

    /// Origin could not be reached; timeouts map to 504, everything else to 502.
    pub fn origin_unreachable(code: ErrorCode, message: impl Into<String>) -> Self {
        let status = if code == ErrorCode::Timeout {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self::new(status, message, code)
    }

    pub fn response_too_large(size: u64, max: usize) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            format!(
                "Origin response too large: {} bytes (max: {} bytes)",
                size, max
            ),
            ErrorCode::ResponseTooLarge,
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::Unknown,
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.response.code, self.response.error)
    }
}

impl std::error::Error for ProxyError {}

/// Classify wreq errors talking to the origin into error codes
pub fn classify_wreq_error(err: &wreq::Error) -> (ErrorCode, String) {
    let message = err.to_string();

    if err.is_timeout() {
        (
            ErrorCode::Timeout,
            format!("Origin timed out: {}", message),
        )
    } else if err.is_connect() {
        let lower = message.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("getaddrinfo") {
            (
                ErrorCode::DnsError,
                format!("Origin DNS resolution failed: {}", message),
            )
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
            (ErrorCode::TlsError, format!("Origin TLS error: {}", message))
        } else {
            (
                ErrorCode::ConnectError,
                format!("Origin unreachable: {}", message),
            )
        }
    } else if err.is_request() {
        (
            ErrorCode::InvalidRequest,
            format!("Origin request could not be built: {}", message),
        )
    } else {
        (ErrorCode::ConnectError, format!("Origin unreachable: {}", message))
    }
}
