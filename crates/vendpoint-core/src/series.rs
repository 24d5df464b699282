//! Chart-ready series built from aggregated buckets

use crate::aggregate::{Bucket, BucketSize, GroupedBucket, aggregate_grouped};
use crate::types::{LogRecord, RequestStatus, UnixSeconds, tag};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Axis label format, `yyyy-MM-dd HH:mm`
pub const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Column holding the value of an ungrouped bucket
pub const AMOUNT_COLUMN: &str = "amount";

/// Time zone used to render bucket labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelZone {
    /// Coordinated universal time
    #[default]
    Utc,
    /// The host's local time zone
    Local,
}

impl std::str::FromStr for LabelZone {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utc" => Ok(Self::Utc),
            "local" => Ok(Self::Local),
            other => Err(crate::Error::validation(
                "timezone",
                format!("expected 'utc' or 'local', got '{other}'"),
            )),
        }
    }
}

/// Render a bucket start as an axis label
///
/// Timestamps outside chrono's range render as the raw number.
#[must_use]
pub fn format_bucket_label(timestamp: UnixSeconds, zone: LabelZone) -> String {
    let Some(utc) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return timestamp.to_string();
    };
    match zone {
        LabelZone::Utc => utc.format(LABEL_FORMAT).to_string(),
        LabelZone::Local => utc.with_timezone(&Local).format(LABEL_FORMAT).to_string(),
    }
}

/// Successful versus failed requests per bucket
///
/// The two sets come from separate `is_success=true` and `is_success=false`
/// queries; each record is tagged with its set's status before grouping.
///
/// # Errors
///
/// Returns a validation error for a timestamp whose bucket start does not
/// fit an `i64`.
pub fn usage_series(
    success: &[LogRecord],
    failure: &[LogRecord],
    bucket_size: BucketSize,
) -> crate::Result<Vec<GroupedBucket>> {
    let tagged = success
        .iter()
        .map(|record| tag(record, RequestStatus::FIELD, RequestStatus::Success.label()))
        .chain(
            failure
                .iter()
                .map(|record| tag(record, RequestStatus::FIELD, RequestStatus::Error.label())),
        );
    aggregate_grouped(tagged, bucket_size, RequestStatus::FIELD, &RequestStatus::labels())
}

/// One row of a tabular rendering
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    /// Bucket start
    pub timestamp: UnixSeconds,
    /// Formatted bucket start
    pub label: String,
    /// Column name and value pairs
    pub values: Vec<(String, f64)>,
}

impl ChartRow {
    /// Row for an ungrouped bucket, with a single `amount` column
    #[must_use]
    pub fn from_bucket(bucket: &Bucket, zone: LabelZone) -> Self {
        Self {
            timestamp: bucket.bucket_start,
            label: format_bucket_label(bucket.bucket_start, zone),
            values: vec![(AMOUNT_COLUMN.to_string(), bucket.value)],
        }
    }

    /// Row for a grouped bucket, one column per group
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_grouped(bucket: &GroupedBucket, zone: LabelZone) -> Self {
        Self {
            timestamp: bucket.bucket_start,
            label: format_bucket_label(bucket.bucket_start, zone),
            values: bucket
                .counts
                .iter()
                .map(|(group, count)| (group.clone(), *count as f64))
                .collect(),
        }
    }

    /// Column names of this row
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_format_bucket_label_utc() {
        assert_eq!(format_bucket_label(0, LabelZone::Utc), "1970-01-01 00:00");
        assert_eq!(
            format_bucket_label(1_700_000_000, LabelZone::Utc),
            "2023-11-14 22:13"
        );
    }

    #[test]
    fn test_format_bucket_label_local_has_same_shape() {
        let label = format_bucket_label(1_700_000_000, LabelZone::Local);
        assert_eq!(label.len(), "yyyy-MM-dd HH:mm".len());
    }

    #[test]
    fn test_format_bucket_label_out_of_range() {
        assert_eq!(format_bucket_label(i64::MAX, LabelZone::Utc), i64::MAX.to_string());
    }

    #[test]
    fn test_label_zone_parsing() {
        assert_eq!("UTC".parse::<LabelZone>().unwrap(), LabelZone::Utc);
        assert_eq!("local".parse::<LabelZone>().unwrap(), LabelZone::Local);
        assert!("mars".parse::<LabelZone>().is_err());
    }

    #[test]
    fn test_usage_series() {
        let success = vec![LogRecord::at(0), LogRecord::at(100), LogRecord::at(3700)];
        let failure = vec![LogRecord::at(5)];

        let series = usage_series(&success, &failure, BucketSize::new(3600).unwrap()).unwrap();

        assert_eq!(
            serde_json::to_value(&series).unwrap(),
            json!([
                {"timestamp": 0, "success": 2, "error": 1},
                {"timestamp": 3600, "success": 1, "error": 0},
            ])
        );
    }

    #[test]
    fn test_usage_series_ignores_record_status_field() {
        let success = vec![LogRecord::at(0).with_field("status", "error")];
        let series = usage_series(&success, &[], BucketSize::new(60).unwrap()).unwrap();

        assert_eq!(series[0].count("success"), 1);
        assert_eq!(series[0].count("error"), 0);
    }

    #[test]
    fn test_chart_rows() {
        let row = ChartRow::from_bucket(
            &Bucket {
                bucket_start: 60,
                value: 2.5,
            },
            LabelZone::Utc,
        );
        assert_eq!(row.label, "1970-01-01 00:01");
        assert_eq!(row.values, vec![("amount".to_string(), 2.5)]);

        let grouped = usage_series(&[LogRecord::at(0)], &[], BucketSize::new(60).unwrap()).unwrap();
        let row = ChartRow::from_grouped(&grouped[0], LabelZone::Utc);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["success", "error"]);
        assert_eq!(row.values[0].1, 1.0_f64);
    }
}
