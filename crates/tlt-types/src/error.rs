//! Closed error-kind set carried in structured error bodies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error categories used across the ingress, gateway, and agent layers.
///
/// The set is closed: every failure surfaced over the wire maps to exactly
/// one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Envelope or payload failed its contract.
    ValidationError,
    /// Ingress sliding window or queue ceiling exceeded.
    RateLimited,
    /// Role policy denied the tool invocation.
    AccessDenied,
    /// Referenced entity does not exist.
    NotFound,
    /// Back-end behind the gateway is unreachable.
    ServiceUnavailable,
    /// An upstream call exceeded its deadline.
    UpstreamTimeout,
    /// An upstream call failed with a semantic error.
    UpstreamError,
    /// Language-model output did not match the bound schema.
    ParseError,
    /// Filesystem read/write failure.
    IoError,
    /// Anything that should never surface verbatim to users.
    InternalError,
}

impl ErrorKind {
    /// Stable wire string for this kind (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation-error",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::AccessDenied => "access-denied",
            ErrorKind::NotFound => "not-found",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::UpstreamTimeout => "upstream-timeout",
            ErrorKind::UpstreamError => "upstream-error",
            ErrorKind::ParseError => "parse-error",
            ErrorKind::IoError => "io-error",
            ErrorKind::InternalError => "internal-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body returned by HTTP endpoints and tool envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    /// Offending field for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorBody {
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            field: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {} ({field})", self.error, self.message),
            None => write!(f, "{}: {}", self.error, self.message),
        }
    }
}

impl std::error::Error for ErrorBody {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"service-unavailable\"");
        let back: ErrorKind = serde_json::from_str("\"rate-limited\"").unwrap();
        assert_eq!(back, ErrorKind::RateLimited);
    }

    #[test]
    fn as_str_matches_serde() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::RateLimited,
            ErrorKind::AccessDenied,
            ErrorKind::NotFound,
            ErrorKind::ServiceUnavailable,
            ErrorKind::UpstreamTimeout,
            ErrorKind::UpstreamError,
            ErrorKind::ParseError,
            ErrorKind::IoError,
            ErrorKind::InternalError,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
