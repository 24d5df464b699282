//! Error types for vendpoint usage analytics

use std::{error::Error as StdError, fmt};

/// Main error type for vendpoint usage analytics
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Configuration {
        /// Error message
        message: String,
    },

    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// A record field that should hold a number does not
    NonNumeric {
        /// Name of the value field
        field: String,
        /// Timestamp of the offending record
        timestamp: i64,
        /// Rendering of the value that was found
        found: String,
    },

    /// Authentication error
    Authentication(String),

    /// Not found error
    NotFound {
        /// Resource that was not found
        resource: String,
    },

    /// Non-success HTTP response from the admin API
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Transport-level request failure
    Request(String),

    /// Serialization error
    Serialization(serde_json::Error),

    /// Other error
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new validation error
    #[must_use]
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Configuration { message } => write!(f, "Configuration error: {message}"),
            Self::Validation { field, message } => {
                write!(f, "Validation error: {field} - {message}")
            }
            Self::NonNumeric {
                field,
                timestamp,
                found,
            } => write!(
                f,
                "Non-numeric value for field '{field}' in record at {timestamp}: {found}"
            ),
            Self::Authentication(msg) => write!(f, "Authentication failed: {msg}"),
            Self::NotFound { resource } => write!(f, "Resource not found: {resource}"),
            Self::Http { status, message } => write!(f, "API returned {status}: {message}"),
            Self::Request(msg) => write!(f, "Request failed: {msg}"),
            Self::Serialization(err) => write!(f, "Serialization error: {err}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// From implementations for automatic conversions
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::uninlined_format_args
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "records.json");
        let app_error = Error::from(io_error);

        assert!(matches!(app_error, Error::Io(_)));
        assert!(format!("{}", app_error).contains("I/O error"));
        assert!(app_error.source().is_some());
    }

    #[test]
    fn test_validation_error() {
        let error = Error::validation("bucket_size", "must be greater than zero");

        assert_eq!(
            format!("{}", error),
            "Validation error: bucket_size - must be greater than zero"
        );
        assert!(error.source().is_none());
    }

    #[test]
    fn test_non_numeric_error_names_field_and_record() {
        let error = Error::NonNumeric {
            field: "elapsed_time".to_string(),
            timestamp: 1_700_000_000,
            found: "\"slow\"".to_string(),
        };

        assert_eq!(
            format!("{}", error),
            "Non-numeric value for field 'elapsed_time' in record at 1700000000: \"slow\""
        );
    }

    #[test]
    fn test_http_and_request_errors() {
        let error = Error::Http {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert_eq!(format!("{}", error), "API returned 500: Internal Server Error");

        let error = Error::Request("connection refused".to_string());
        assert_eq!(format!("{}", error), "Request failed: connection refused");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{\"a\": nope}").unwrap_err();
        let app_error = Error::from(json_error);

        assert!(matches!(app_error, Error::Serialization(_)));
        assert!(app_error.source().is_some());
    }

    #[test]
    fn test_config_error_conversion() {
        let app_error = Error::from(config::ConfigError::NotFound("api.base_url".to_string()));

        match app_error {
            Error::Configuration { message } => assert!(message.contains("api.base_url")),
            other => panic!("Expected Configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_all_error_display_variants() {
        let test_cases = vec![
            (Error::Io(io::Error::other("disk")), "I/O error:"),
            (Error::configuration("bad"), "Configuration error: bad"),
            (
                Error::Authentication("expired token".to_string()),
                "Authentication failed: expired token",
            ),
            (
                Error::NotFound {
                    resource: "/admin/logs".to_string(),
                },
                "Resource not found: /admin/logs",
            ),
            (Error::Other("other error".to_string()), "other error"),
        ];

        for (error, expected) in test_cases {
            let display = format!("{}", error);
            assert!(
                display.contains(expected),
                "Error display '{}' should contain '{}'",
                display,
                expected
            );
        }
    }
}
