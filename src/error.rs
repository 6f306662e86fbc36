//! Unified error handling for the street-coverage library.
//!
//! The matching engine itself never fails: degenerate input yields an empty
//! or zero-valued result. Errors only come from the external map-matching
//! service, and the hybrid orchestrator turns every one of them into a local
//! fallback. Keeping them as a closed enum lets the orchestrator match on
//! every failure kind explicitly.

use std::fmt;

/// Coarse failure category, used for logging and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapErrorKind {
    MissingCredentials,
    RateLimited,
    NoMatch,
    InsufficientPoints,
    RequestFailed,
    InvalidResponse,
    Config,
}

/// Unified error type for street-coverage operations.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageError {
    /// Access token missing, invalid or rejected by the provider (HTTP 401/403)
    MissingCredentials { message: String },
    /// Provider rate limit hit (HTTP 429)
    RateLimited { retry_after_secs: Option<u64> },
    /// Provider could not match the trace to its road network
    NoMatch { code: String, message: String },
    /// Trace has fewer points than the provider accepts
    InsufficientPoints {
        point_count: usize,
        minimum_required: usize,
    },
    /// Network failure, timeout or unexpected HTTP status
    RequestFailed {
        message: String,
        status_code: Option<u16>,
    },
    /// Provider answered with a body we could not decode
    InvalidResponse { message: String },
    /// Configuration error
    Config { message: String },
}

impl CoverageError {
    /// Failure category of this error.
    pub fn kind(&self) -> SnapErrorKind {
        match self {
            CoverageError::MissingCredentials { .. } => SnapErrorKind::MissingCredentials,
            CoverageError::RateLimited { .. } => SnapErrorKind::RateLimited,
            CoverageError::NoMatch { .. } => SnapErrorKind::NoMatch,
            CoverageError::InsufficientPoints { .. } => SnapErrorKind::InsufficientPoints,
            CoverageError::RequestFailed { .. } => SnapErrorKind::RequestFailed,
            CoverageError::InvalidResponse { .. } => SnapErrorKind::InvalidResponse,
            CoverageError::Config { .. } => SnapErrorKind::Config,
        }
    }

    /// Stable error code, as logged at the orchestrator boundary.
    ///
    /// For `NoMatch` this is the provider's own code (`NoMatch`, `NoSegment`, ...).
    pub fn code(&self) -> &str {
        match self {
            CoverageError::MissingCredentials { .. } => "InvalidToken",
            CoverageError::RateLimited { .. } => "RateLimited",
            CoverageError::NoMatch { code, .. } => code,
            CoverageError::InsufficientPoints { .. } => "InsufficientPoints",
            CoverageError::RequestFailed { .. } => "RequestFailed",
            CoverageError::InvalidResponse { .. } => "InvalidResponse",
            CoverageError::Config { .. } => "ConfigError",
        }
    }
}

impl fmt::Display for CoverageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageError::MissingCredentials { message } => {
                write!(f, "Map matching credentials rejected: {}", message)
            }
            CoverageError::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "Map matching rate limited, retry after {}s", secs)
                } else {
                    write!(f, "Map matching rate limited")
                }
            }
            CoverageError::NoMatch { code, message } => {
                write!(f, "No match found ({}): {}", code, message)
            }
            CoverageError::InsufficientPoints {
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Trace has {} points, minimum {} required",
                    point_count, minimum_required
                )
            }
            CoverageError::RequestFailed {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "Map matching request failed ({}): {}", code, message)
                } else {
                    write!(f, "Map matching request failed: {}", message)
                }
            }
            CoverageError::InvalidResponse { message } => {
                write!(f, "Invalid map matching response: {}", message)
            }
            CoverageError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for CoverageError {}

impl From<serde_json::Error> for CoverageError {
    fn from(e: serde_json::Error) -> Self {
        CoverageError::InvalidResponse {
            message: e.to_string(),
        }
    }
}

/// Result type alias for street-coverage operations.
pub type Result<T> = std::result::Result<T, CoverageError>;
