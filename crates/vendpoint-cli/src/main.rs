//! Validator endpoint usage charts
//!
//! Fetches request logs from the admin API and renders them as time-bucketed
//! series, counts and summaries.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

mod commands;
mod error;
mod output;

use clap::{Args, Parser, Subcommand};
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use vendpoint_core::{Config, LogFilters, NonNumericPolicy, Span, UnixSeconds};

/// Command line interface for vendpoint usage analytics
#[derive(Parser, Debug)]
#[command(
    name = "vendpoint-usage",
    version = env!("CARGO_PKG_VERSION"),
    about = "Usage charts for the validator endpoint admin API",
    long_about = "Fetches request logs from the validator endpoint admin API and renders time-bucketed usage series, request counts and summaries."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Admin API base URL
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Session token sent as a bearer token
    #[arg(long, global = true, env = "VENDPOINT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Successful versus failed requests over the history window
    Usage {
        /// Bucket width, e.g. PT1H or 6h
        #[arg(short, long, value_name = "SPAN")]
        granularity: Option<Span>,

        /// Look-back window, e.g. P1W or 30d
        #[arg(long, value_name = "SPAN")]
        history: Option<Span>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Aggregate a JSON array of log records offline
    Aggregate(AggregateArgs),

    /// Count requests or distinct API keys
    Count {
        /// Log filters
        #[command(flatten)]
        filters: FilterArgs,

        /// Count distinct API keys instead of requests
        #[arg(long)]
        unique_api_keys: bool,
    },

    /// List log records, newest first
    Logs {
        /// Log filters
        #[command(flatten)]
        filters: FilterArgs,

        /// Maximum number of records
        #[arg(short = 'n', long, default_value = "100")]
        lines: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Request totals and distinct API keys over a window
    Summary {
        /// Window length
        #[arg(long, value_name = "SPAN", default_value = "P1D")]
        since: Span,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Inspect configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Arguments of the offline `aggregate` command
#[derive(Args, Debug)]
struct AggregateArgs {
    /// JSON file holding an array of log records, `-` for standard input
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    input: PathBuf,

    /// Bucket width
    #[arg(short, long, value_name = "SPAN")]
    bucket: Option<Span>,

    /// Numeric field to average per bucket
    #[arg(long, value_name = "FIELD", conflicts_with = "group_by")]
    value_field: Option<String>,

    /// Report the sum of the value field instead of its mean
    #[arg(long, requires = "value_field")]
    sum: bool,

    /// Field whose value selects the group of a record
    #[arg(long, value_name = "FIELD", requires = "groups")]
    group_by: Option<String>,

    /// Group labels, comma separated
    #[arg(long, value_delimiter = ',', value_name = "LABELS", requires = "group_by")]
    groups: Vec<String>,

    /// Handling of values that are not numbers
    #[arg(long, value_name = "POLICY")]
    on_non_numeric: Option<NonNumericPolicy>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
}

/// Filters shared by the `count` and `logs` commands
#[derive(Args, Debug)]
struct FilterArgs {
    /// Restrict to one API key
    #[arg(long)]
    key: Option<String>,

    /// Restrict to one responder hotkey
    #[arg(long, value_name = "HOTKEY")]
    responder_hotkey: Option<String>,

    /// Restrict by API-side success
    #[arg(long, value_name = "BOOL")]
    api_success: Option<bool>,

    /// Restrict by network success
    #[arg(long, value_name = "BOOL")]
    success: Option<bool>,

    /// Only records within this span of now
    #[arg(long, value_name = "SPAN", conflicts_with = "start")]
    since: Option<Span>,

    /// Inclusive lower bound, unix seconds
    #[arg(long, value_name = "UNIX")]
    start: Option<UnixSeconds>,

    /// Inclusive upper bound, unix seconds
    #[arg(long, value_name = "UNIX")]
    end: Option<UnixSeconds>,
}

impl FilterArgs {
    fn to_filters(&self, now: UnixSeconds) -> LogFilters {
        LogFilters {
            key: self.key.clone(),
            responder_hotkey: self.responder_hotkey.clone(),
            is_api_success: self.api_success,
            is_success: self.success,
            start: self.start.or_else(|| self.since.map(|span| span.window_start(now))),
            end: self.end,
            lines: None,
        }
    }
}

/// Load configuration and apply command line overrides
fn resolve_config(cli: &Cli) -> vendpoint_core::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ref level) = cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(ref format) = cli.log_format {
        config.logging.format.clone_from(format);
    }
    if let Some(ref base_url) = cli.base_url {
        config.api.base_url.clone_from(base_url);
    }
    if cli.token.is_some() {
        config.api.token.clone_from(&cli.token);
    }
    config.check()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = vendpoint_core::init_logging(&config.logging) {
        eprintln!("Error: {e}");
        return ExitCode::from(1);
    }
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.api.base_url,
        "vendpoint-usage starting"
    );

    match commands::run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_usage_arguments() {
        let cli = Cli::try_parse_from([
            "vendpoint-usage",
            "usage",
            "--granularity",
            "6h",
            "--history",
            "P1M",
            "--format",
            "csv",
        ])
        .unwrap();

        match cli.command {
            Commands::Usage {
                granularity,
                history,
                format,
            } => {
                assert_eq!(granularity.unwrap().as_secs(), 6 * 3600);
                assert_eq!(history.unwrap().as_secs(), 30 * 86_400);
                assert_eq!(format, OutputFormat::Csv);
            }
            other => panic!("Expected usage command, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_span_is_rejected() {
        assert!(Cli::try_parse_from(["vendpoint-usage", "usage", "--granularity", "PT0S"]).is_err());
    }

    #[test]
    fn test_aggregate_arguments() {
        let cli = Cli::try_parse_from([
            "vendpoint-usage",
            "aggregate",
            "--input",
            "logs.json",
            "--group-by",
            "status",
            "--groups",
            "success,error",
        ])
        .unwrap();

        match cli.command {
            Commands::Aggregate(args) => {
                assert_eq!(args.input, PathBuf::from("logs.json"));
                assert_eq!(args.group_by.as_deref(), Some("status"));
                assert_eq!(args.groups, vec!["success", "error"]);
                assert_eq!(args.format, OutputFormat::Table);
            }
            other => panic!("Expected aggregate command, got {other:?}"),
        }
    }

    #[test]
    fn test_sum_requires_value_field() {
        assert!(Cli::try_parse_from(["vendpoint-usage", "aggregate", "--sum"]).is_err());
    }

    #[test]
    fn test_groups_require_group_by() {
        let error =
            Cli::try_parse_from(["vendpoint-usage", "aggregate", "--groups", "success,error"])
                .unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_group_by_conflicts_with_value_field() {
        assert!(
            Cli::try_parse_from([
                "vendpoint-usage",
                "aggregate",
                "--value-field",
                "elapsed_time",
                "--group-by",
                "status",
                "--groups",
                "success"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_filter_args_since() {
        let cli = Cli::try_parse_from([
            "vendpoint-usage",
            "count",
            "--key",
            "sk-1",
            "--since",
            "1d",
            "--success",
            "false",
        ])
        .unwrap();

        match cli.command {
            Commands::Count {
                filters,
                unique_api_keys,
            } => {
                assert!(!unique_api_keys);
                let filters = filters.to_filters(200_000);
                assert_eq!(filters.key.as_deref(), Some("sk-1"));
                assert_eq!(filters.start, Some(200_000 - 86_400));
                assert_eq!(filters.is_success, Some(false));
                assert_eq!(filters.lines, None);
            }
            other => panic!("Expected count command, got {other:?}"),
        }
    }
}
