//! Core types and aggregation for validator endpoint usage charts
//!
//! Request logs fetched from the admin API are bucketed into fixed-width time
//! windows and shaped into series a chart can draw directly.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod series;
pub mod span;
pub mod summary;
pub mod types;

// Re-export commonly used types
pub use aggregate::{
    AggregationRequest, BUCKET_START_KEY, Bucket, BucketSize, GroupedBucket, NonNumericPolicy,
    aggregate, aggregate_grouped,
};
pub use config::{Config, LoggingConfig};
pub use error::{Error, Result};
pub use series::{AMOUNT_COLUMN, ChartRow, LabelZone, format_bucket_label, usage_series};
pub use span::Span;
pub use summary::UsageSummary;
pub use types::{
    CountFilters, CountResponse, FieldValue, LogFilters, LogRecord, Record, RequestStatus,
    UnixSeconds, tag,
};

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the configured level. The format is
/// `json` for structured output and pretty-printed otherwise.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter or a global
/// subscriber is already installed.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .map_err(|e| Error::configuration(format!("invalid log level '{}': {e}", logging.level)))?,
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let result = if logging.format.eq_ignore_ascii_case("json") {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| Error::Other(format!("failed to initialise logging: {e}")))
}
