//! The five top-level error kinds the engine can surface: configuration
//! problems, request-build failures, transport failures, assertion
//! failures, and warmup anomalies.

use thiserror::Error;

/// Configuration-time errors: bad YAML, missing required fields, unreadable
/// file-backed variable sources.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    InvalidField(String),
}

/// Errors raised while turning a [`crate::domain::RequestItem`] into an
/// actual HTTP request: template rendering, header parsing, body
/// compression.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("invalid URL '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("failed to compress request body: {0}")]
    Compression(#[from] std::io::Error),
    #[error("failed to build request: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Errors in sending a request and receiving a response, distinct from
/// assertion failures against a received response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A condition tree evaluated false against a response.
#[derive(Debug, Error, Clone)]
#[error("assertion failed: {message}")]
pub struct AssertionFailure {
    pub message: String,
    pub actual: Option<String>,
    pub expected: Option<String>,
}

/// Raised during the warmup pass when a response falls outside
/// `valid_status_codes_during_warmup`.
#[derive(Debug, Error, Clone)]
#[error("warmup anomaly: {url} returned status {status}, expected one of {expected:?}")]
pub struct WarmupAnomaly {
    pub url: String,
    pub status: u16,
    pub expected: Vec<u16>,
}

/// Helper to categorize common HTTP status codes for display.
pub fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        // 2xx Success
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",

        // 3xx Redirection
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",

        // 4xx Client Errors
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        429 => "Too Many Requests",

        // 5xx Server Errors
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",

        _ => "Unknown Status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_status_code_names() {
        assert_eq!(categorize_status_code(200), "OK");
        assert_eq!(categorize_status_code(404), "Not Found");
        assert_eq!(categorize_status_code(500), "Internal Server Error");
        assert_eq!(categorize_status_code(503), "Service Unavailable");
    }

    #[test]
    fn config_error_messages_are_descriptive() {
        let err = ConfigError::InvalidField("variable 'x': missing 'path'".into());
        assert!(err.to_string().contains("missing 'path'"));
    }

    #[test]
    fn warmup_anomaly_reports_expected_codes() {
        let err = WarmupAnomaly {
            url: "http://example.com".into(),
            status: 503,
            expected: vec![200, 201],
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("200"));
    }
}
