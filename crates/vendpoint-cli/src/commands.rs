//! Command handlers

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use crate::{AggregateArgs, Commands};
use std::io::{self, Write};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::info;
use vendpoint_client::{LogClient, RequestContext};
use vendpoint_core::{
    AMOUNT_COLUMN, AggregationRequest, BUCKET_START_KEY, ChartRow, Config, CountFilters,
    LogRecord, RequestStatus, Span, UnixSeconds, aggregate, aggregate_grouped,
};

/// Run one subcommand against the resolved configuration
pub(crate) async fn run(command: Commands, config: &Config) -> CliResult<()> {
    let mut out = io::stdout();
    let now = chrono::Utc::now().timestamp();

    match command {
        Commands::Usage {
            granularity,
            history,
            format,
        } => {
            let granularity = granularity.unwrap_or(config.chart.granularity);
            let history = history.unwrap_or(config.chart.history);
            usage(config, granularity, history, now, format, &mut out).await
        }
        Commands::Aggregate(args) => {
            let records = read_records(&args.input).await?;
            aggregate_records(&records, &args, config, &mut out)
        }
        Commands::Count {
            filters,
            unique_api_keys,
        } => {
            let (client, ctx) = connect(config)?;
            let filters = CountFilters {
                filters: filters.to_filters(now),
                unique_api_keys,
            };
            let count = client.count(&ctx, &filters).await?;
            writeln!(out, "{count}")?;
            Ok(())
        }
        Commands::Logs {
            filters,
            lines,
            format,
        } => {
            let (client, ctx) = connect(config)?;
            let filters = filters.to_filters(now).with_lines(lines);
            let records = client.logs(&ctx, &filters).await?;
            output::write_logs(&records, config.chart.timezone, format, &mut out)
        }
        Commands::Summary { since, format } => {
            let (client, ctx) = connect(config)?;
            let summary = client.summary(&ctx, since.window_start(now)).await?;
            info!(
                requests = summary.requests,
                unique_api_keys = summary.unique_api_keys,
                "Fetched usage summary"
            );
            output::write_summary(&summary, config.chart.timezone, format, &mut out)
        }
        Commands::Config { show } => show_config(config, show, &mut out),
    }
}

fn connect(config: &Config) -> CliResult<(LogClient, RequestContext)> {
    let client = LogClient::from_config(&config.api)?;
    Ok((client, RequestContext::from_config(&config.api)))
}

async fn usage(
    config: &Config,
    granularity: Span,
    history: Span,
    now: UnixSeconds,
    format: OutputFormat,
    out: &mut (impl Write + Send),
) -> CliResult<()> {
    let bucket_size = granularity.bucket_size()?;
    let start = history.window_start(now);
    info!(
        granularity = %granularity,
        history = %history,
        start,
        "Fetching usage series"
    );

    let (client, ctx) = connect(config)?;
    let buckets = client
        .usage_series(&ctx, start, bucket_size, config.api.max_records)
        .await?;
    let rows: Vec<ChartRow> = buckets
        .iter()
        .map(|bucket| ChartRow::from_grouped(bucket, config.chart.timezone))
        .collect();
    output::write_series(&buckets, &rows, &RequestStatus::labels(), format, out)
}

/// Read a JSON array of log records from a file or standard input
async fn read_records(path: &Path) -> CliResult<Vec<LogRecord>> {
    let input_error = |source| CliError::Input {
        path: path.to_path_buf(),
        source,
    };

    let text = if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .map_err(input_error)?;
        text
    } else {
        tokio::fs::read_to_string(path).await.map_err(input_error)?
    };

    serde_json::from_str(&text).map_err(|source| CliError::InvalidRecords {
        path: path.to_path_buf(),
        source,
    })
}

fn aggregate_records(
    records: &[LogRecord],
    args: &AggregateArgs,
    config: &Config,
    out: &mut impl Write,
) -> CliResult<()> {
    let bucket_size = args.bucket.unwrap_or(config.chart.granularity).bucket_size()?;
    let zone = config.chart.timezone;

    if let Some(ref group_by) = args.group_by {
        if args.groups.is_empty() {
            return Err(CliError::Arguments(
                "--group-by needs at least one label in --groups".to_string(),
            ));
        }
        check_group_labels(&args.groups, args.format)?;
        let buckets = aggregate_grouped(records, bucket_size, group_by, &args.groups)?;
        let rows: Vec<ChartRow> = buckets
            .iter()
            .map(|bucket| ChartRow::from_grouped(bucket, zone))
            .collect();
        return output::write_series(&buckets, &rows, &args.groups, args.format, out);
    }

    let mut request = AggregationRequest::count(bucket_size)
        .on_non_numeric(args.on_non_numeric.unwrap_or(config.chart.on_non_numeric));
    if let Some(ref field) = args.value_field {
        request = request.value_field(field.clone());
        if args.sum {
            request = request.sum();
        }
    }

    let buckets = aggregate(records, &request)?;
    let rows: Vec<ChartRow> = buckets
        .iter()
        .map(|bucket| ChartRow::from_bucket(bucket, zone))
        .collect();
    output::write_series(&buckets, &rows, &[AMOUNT_COLUMN], args.format, out)
}

/// Group labels must not collide with the keys a series row already uses
fn check_group_labels(groups: &[String], format: OutputFormat) -> CliResult<()> {
    let reserved: &[&str] = match format {
        OutputFormat::Json => &[BUCKET_START_KEY],
        OutputFormat::Csv | OutputFormat::Table => &output::SERIES_KEYS,
    };
    match groups.iter().find(|group| reserved.contains(&group.as_str())) {
        Some(group) => Err(CliError::Arguments(format!(
            "'{group}' already names a series column and cannot be a group label"
        ))),
        None => Ok(()),
    }
}

/// Print the resolved configuration, with the session token masked
fn show_config(config: &Config, show: bool, out: &mut impl Write) -> CliResult<()> {
    if !show {
        writeln!(out, "Configuration is valid (api: {})", config.api.base_url)?;
        return Ok(());
    }

    let mut shown = config.clone();
    if shown.api.token.is_some() {
        shown.api.token = Some("<redacted>".to_string());
    }
    write!(out, "{}", toml::to_string_pretty(&shown)?)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    fn aggregate_args(args: &[&str]) -> AggregateArgs {
        let argv = ["vendpoint-usage", "aggregate"].iter().chain(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Aggregate(args) => args,
            _ => unreachable!("aggregate arguments always parse to the aggregate command"),
        }
    }

    fn records() -> Vec<LogRecord> {
        serde_json::from_value(serde_json::json!([
            {"timestamp": 0, "is_success": true, "latency": 1.0},
            {"timestamp": 30, "is_success": false, "latency": "3"},
            {"timestamp": 61, "is_success": true, "latency": "n/a"},
        ]))
        .unwrap()
    }

    fn run_aggregate(args: &[&str]) -> CliResult<String> {
        let mut out = Vec::new();
        aggregate_records(&records(), &aggregate_args(args), &Config::default(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_aggregate_counts() {
        let text = run_aggregate(&["--bucket", "1m", "--format", "csv"]).unwrap();
        assert_eq!(
            text,
            "timestamp,time,amount\n0,1970-01-01 00:00,2\n60,1970-01-01 00:01,1\n"
        );
    }

    #[test]
    fn test_aggregate_rejects_text_values_by_default() {
        let error = run_aggregate(&["--bucket", "1m", "--value-field", "latency"]).unwrap_err();
        assert!(matches!(
            error,
            CliError::Core(vendpoint_core::Error::NonNumeric { .. })
        ));
    }

    #[test]
    fn test_aggregate_skip_and_sum() {
        let text = run_aggregate(&[
            "--bucket",
            "1m",
            "--value-field",
            "latency",
            "--sum",
            "--on-non-numeric",
            "skip",
            "--format",
            "csv",
        ])
        .unwrap();
        assert_eq!(
            text,
            "timestamp,time,amount\n0,1970-01-01 00:00,4\n60,1970-01-01 00:01,0\n"
        );
    }

    #[test]
    fn test_aggregate_grouped_json() {
        let text = run_aggregate(&[
            "--bucket",
            "PT1H",
            "--group-by",
            "is_success",
            "--groups",
            "true,false",
            "--format",
            "json",
        ])
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{"timestamp": 0, "true": 2, "false": 1}])
        );
    }

    #[test]
    fn test_group_label_cannot_be_the_timestamp_key() {
        for format in ["json", "csv", "table"] {
            let error = run_aggregate(&[
                "--group-by",
                "is_success",
                "--groups",
                "true,timestamp",
                "--format",
                format,
            ])
            .unwrap_err();
            assert!(matches!(error, CliError::Arguments(ref m) if m.contains("'timestamp'")));
            assert_eq!(error.exit_code(), 2);
        }
    }

    #[test]
    fn test_time_label_only_reserved_for_tabular_output() {
        for format in ["csv", "table"] {
            let error =
                run_aggregate(&["--group-by", "kind", "--groups", "time", "--format", format])
                    .unwrap_err();
            assert!(matches!(error, CliError::Arguments(ref m) if m.contains("'time'")));
        }

        let text = run_aggregate(&[
            "--bucket",
            "PT1H",
            "--group-by",
            "kind",
            "--groups",
            "time",
            "--format",
            "json",
        ])
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!([{"timestamp": 0, "time": 0}]));
    }

    #[test]
    fn test_grouped_csv_header_follows_requested_groups() {
        let text = run_aggregate(&[
            "--bucket",
            "PT1H",
            "--group-by",
            "is_success",
            "--groups",
            "false,true,false",
            "--format",
            "csv",
        ])
        .unwrap();
        assert_eq!(text, "timestamp,time,false,true\n0,1970-01-01 00:00,1,2\n");
    }

    #[tokio::test]
    async fn test_read_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"timestamp": 5}}]"#).unwrap();

        let records = read_records(file.path()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 5);
    }

    #[tokio::test]
    async fn test_read_records_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let error = read_records(file.path()).await.unwrap_err();
        assert!(matches!(error, CliError::InvalidRecords { .. }));

        let missing = read_records(Path::new("/nonexistent/logs.json")).await.unwrap_err();
        assert!(matches!(missing, CliError::Input { .. }));
    }

    #[test]
    fn test_show_config_masks_token() {
        let mut config = Config::default();
        config.api.token = Some("secret".to_string());

        let mut out = Vec::new();
        show_config(&config, true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("secret"));
        assert!(text.contains("<redacted>"));
        assert!(text.contains("granularity = \"PT1H\""));
    }
}
