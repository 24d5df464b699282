//! Rendering of series, logs and summaries

use crate::error::CliResult;
use clap::ValueEnum;
use serde::Serialize;
use std::io::Write;
use vendpoint_core::{
    BUCKET_START_KEY, ChartRow, LabelZone, LogRecord, UsageSummary, format_bucket_label,
};

/// Leading columns of every tabular series
pub(crate) const SERIES_KEYS: [&str; 2] = [BUCKET_START_KEY, "time"];

/// Output format of a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Aligned text
    #[default]
    Table,
    /// Chart objects as JSON
    Json,
    /// Comma-separated values with a header row
    Csv,
}

/// Render a numeric cell, integral values without a fraction
fn format_value(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.3}")
    }
}

/// Write a chart series
///
/// JSON output is the serialized buckets as they come from aggregation;
/// CSV and table output use the flattened rows under `columns`, so an empty
/// series still gets its full header.
pub(crate) fn write_series<T: Serialize, S: AsRef<str>>(
    buckets: &[T],
    rows: &[ChartRow],
    columns: &[S],
    format: OutputFormat,
    out: &mut impl Write,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => write_json(buckets, out),
        OutputFormat::Csv => write_rows_csv(&header(columns), rows, out),
        OutputFormat::Table => write_rows_table(&header(columns), rows, out),
    }
}

/// Pretty-printed JSON followed by a newline
pub(crate) fn write_json<T: Serialize + ?Sized>(value: &T, out: &mut impl Write) -> CliResult<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Series keys followed by the value columns, duplicates collapsed
fn header<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    let mut header: Vec<String> = SERIES_KEYS.iter().map(|key| (*key).to_string()).collect();
    for column in columns.iter().map(AsRef::as_ref) {
        if !header.iter().skip(SERIES_KEYS.len()).any(|seen| seen == column) {
            header.push(column.to_string());
        }
    }
    header
}

fn cells(row: &ChartRow) -> Vec<String> {
    let mut cells = vec![row.timestamp.to_string(), row.label.clone()];
    cells.extend(row.values.iter().map(|(_, value)| format_value(*value)));
    cells
}

fn write_rows_csv(header: &[String], rows: &[ChartRow], out: &mut impl Write) -> CliResult<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(cells(row))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_rows_table(header: &[String], rows: &[ChartRow], out: &mut impl Write) -> CliResult<()> {
    let body: Vec<Vec<String>> = rows.iter().map(cells).collect();
    write_table(header, &body, out)
}

/// Write left-aligned text columns separated by two spaces
fn write_table(header: &[String], body: &[Vec<String>], out: &mut impl Write) -> CliResult<()> {
    let mut widths: Vec<usize> = header.iter().map(String::len).collect();
    for row in body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut line = |cells: &[String]| -> CliResult<()> {
        let text = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "{}", text.trim_end())?;
        Ok(())
    };

    line(header)?;
    for row in body {
        line(row)?;
    }
    Ok(())
}

/// One log record, flattened for CSV and table output
#[derive(Debug, Serialize)]
struct LogRow<'a> {
    timestamp: i64,
    time: String,
    api_key: &'a str,
    responder_hotkey: &'a str,
    is_api_success: Option<bool>,
    is_success: Option<bool>,
    elapsed_time: Option<f64>,
    return_code: &'a str,
}

impl<'a> LogRow<'a> {
    fn new(record: &'a LogRecord, zone: LabelZone) -> Self {
        Self {
            timestamp: record.timestamp,
            time: format_bucket_label(record.timestamp, zone),
            api_key: record.api_key.as_deref().unwrap_or_default(),
            responder_hotkey: record.responder_hotkey.as_deref().unwrap_or_default(),
            is_api_success: record.is_api_success,
            is_success: record.is_success,
            elapsed_time: record.elapsed_time,
            return_code: record.return_code.as_deref().unwrap_or_default(),
        }
    }

    fn cells(&self) -> Vec<String> {
        let flag = |value: Option<bool>| value.map(|v| v.to_string()).unwrap_or_default();
        vec![
            self.timestamp.to_string(),
            self.time.clone(),
            self.api_key.to_string(),
            self.responder_hotkey.to_string(),
            flag(self.is_api_success),
            flag(self.is_success),
            self.elapsed_time.map(|t| format!("{t:.3}")).unwrap_or_default(),
            self.return_code.to_string(),
        ]
    }
}

const LOG_HEADER: [&str; 8] = [
    "timestamp",
    "time",
    "api_key",
    "responder_hotkey",
    "is_api_success",
    "is_success",
    "elapsed_time",
    "return_code",
];

/// Write log records
pub(crate) fn write_logs(
    records: &[LogRecord],
    zone: LabelZone,
    format: OutputFormat,
    out: &mut impl Write,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => write_json(records, out),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for record in records {
                writer.serialize(LogRow::new(record, zone))?;
            }
            if records.is_empty() {
                writer.write_record(LOG_HEADER)?;
            }
            writer.flush()?;
            Ok(())
        }
        OutputFormat::Table => {
            let header: Vec<String> = LOG_HEADER.iter().map(|h| (*h).to_string()).collect();
            let body: Vec<Vec<String>> = records
                .iter()
                .map(|record| LogRow::new(record, zone).cells())
                .collect();
            write_table(&header, &body, out)
        }
    }
}

/// Write a usage summary
pub(crate) fn write_summary(
    summary: &UsageSummary,
    zone: LabelZone,
    format: OutputFormat,
    out: &mut impl Write,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => write_json(summary, out),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            writer.serialize(summary)?;
            writer.flush()?;
            Ok(())
        }
        OutputFormat::Table => {
            let rate = summary
                .success_rate()
                .map_or_else(|| "n/a".to_string(), |rate| format!("{:.1}%", rate * 100.0));
            let body = vec![
                vec!["since".to_string(), format_bucket_label(summary.since, zone)],
                vec!["requests".to_string(), summary.requests.to_string()],
                vec!["successful".to_string(), summary.successful.to_string()],
                vec!["failed".to_string(), summary.failed.to_string()],
                vec!["success rate".to_string(), rate],
                vec!["unique api keys".to_string(), summary.unique_api_keys.to_string()],
            ];
            write_table(&["metric".to_string(), "value".to_string()], &body, out)
        }
    }
}
