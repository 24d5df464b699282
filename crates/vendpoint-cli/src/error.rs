//! Error types for the command-line front end

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CLI operations
pub(crate) type CliResult<T> = Result<T, CliError>;

/// Errors that can occur while running a command
#[derive(Error, Debug)]
pub(crate) enum CliError {
    /// Failure reported by the core library or the API client
    #[error(transparent)]
    Core(#[from] vendpoint_core::Error),

    /// Input file could not be read
    #[error("Failed to read input {path}: {source}")]
    Input {
        /// Path of the input, `-` for standard input
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Input was not a JSON array of log records
    #[error("Invalid log records in {path}: {source}")]
    InvalidRecords {
        /// Path of the input
        path: PathBuf,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// Argument combination that cannot be served
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// CSV rendering error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON rendering error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML rendering error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// Writing output failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub(crate) const fn exit_code(&self) -> u8 {
        match self {
            Self::Arguments(_) => 2,
            Self::Core(vendpoint_core::Error::Authentication(_)) => 3,
            Self::Core(
                vendpoint_core::Error::Request(_)
                | vendpoint_core::Error::Http { .. }
                | vendpoint_core::Error::NotFound { .. },
            ) => 4,
            _ => 1,
        }
    }
}
