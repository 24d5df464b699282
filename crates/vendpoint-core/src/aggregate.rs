//! Time-bucket aggregation of timestamped records
//!
//! Records are grouped by `floor(timestamp / size) * size`. Output is always
//! ordered by bucket start, ascending. Both functions are pure: the same
//! input and parameters give the same buckets.

use crate::types::{FieldValue, Record, UnixSeconds};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Width of a time bucket in seconds, always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketSize(i64);

impl BucketSize {
    /// Validate a bucket width
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero or widths beyond `i64::MAX`.
    pub fn new(secs: u64) -> Result<Self> {
        match i64::try_from(secs) {
            Ok(0) => Err(Error::validation(
                "bucket_size",
                "must be greater than zero",
            )),
            Ok(secs) => Ok(Self(secs)),
            Err(_) => Err(Error::validation(
                "bucket_size",
                format!("{secs} seconds does not fit a timestamp"),
            )),
        }
    }

    /// Width in seconds
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_secs(self) -> u64 {
        self.0 as u64
    }

    /// Start of the bucket containing `timestamp`
    ///
    /// `None` when that start lies below `i64::MIN`, which happens near the
    /// bottom of the range for widths that do not divide `2^63`.
    #[must_use]
    pub const fn bucket_start(self, timestamp: UnixSeconds) -> Option<UnixSeconds> {
        timestamp.div_euclid(self.0).checked_mul(self.0)
    }

    fn checked_start(self, timestamp: UnixSeconds) -> Result<UnixSeconds> {
        self.bucket_start(timestamp).ok_or_else(|| {
            Error::validation(
                "timestamp",
                format!("{timestamp} has no {self} bucket start in range"),
            )
        })
    }
}

impl fmt::Display for BucketSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// What to do when a value field does not hold a number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonNumericPolicy {
    /// Fail the aggregation
    #[default]
    Reject,
    /// Leave the value out of the sum and the divisor
    Skip,
}

impl std::str::FromStr for NonNumericPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "skip" => Ok(Self::Skip),
            other => Err(Error::validation(
                "on_non_numeric",
                format!("expected 'reject' or 'skip', got '{other}'"),
            )),
        }
    }
}

/// Function applied to a bucket's raw sum instead of averaging
pub type Transform = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Parameters of an ungrouped aggregation
#[derive(Clone)]
pub struct AggregationRequest {
    bucket_size: BucketSize,
    value_field: Option<String>,
    transform: Option<Transform>,
    on_non_numeric: NonNumericPolicy,
}

impl fmt::Debug for AggregationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRequest")
            .field("bucket_size", &self.bucket_size)
            .field("value_field", &self.value_field)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .field("on_non_numeric", &self.on_non_numeric)
            .finish()
    }
}

impl AggregationRequest {
    /// Count records per bucket
    #[must_use]
    pub const fn count(bucket_size: BucketSize) -> Self {
        Self {
            bucket_size,
            value_field: None,
            transform: None,
            on_non_numeric: NonNumericPolicy::Reject,
        }
    }

    /// Average (or transform the sum of) this field per bucket
    #[must_use]
    pub fn value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = Some(field.into());
        self
    }

    /// Apply `transform` to the raw sum instead of averaging
    #[must_use]
    pub fn transform(mut self, transform: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Report the plain sum per bucket
    #[must_use]
    pub fn sum(self) -> Self {
        self.transform(|sum| sum)
    }

    /// Choose how non-numeric values are handled
    #[must_use]
    pub const fn on_non_numeric(mut self, policy: NonNumericPolicy) -> Self {
        self.on_non_numeric = policy;
        self
    }

    /// Bucket width
    #[must_use]
    pub const fn bucket_size(&self) -> BucketSize {
        self.bucket_size
    }
}

/// One point of an ungrouped series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Start of the bucket
    #[serde(rename = "timestamp")]
    pub bucket_start: UnixSeconds,
    /// Count, mean or transformed sum
    #[serde(rename = "amount")]
    pub value: f64,
}

/// Key under which a grouped bucket serializes its start
///
/// Group labels share the object with it, so no label may take this name.
pub const BUCKET_START_KEY: &str = "timestamp";

/// One point of a grouped series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedBucket {
    /// Start of the bucket
    #[serde(rename = "timestamp")]
    pub bucket_start: UnixSeconds,
    /// Count per group label, in the order the groups were requested
    #[serde(flatten)]
    pub counts: IndexMap<String, u64>,
}

impl GroupedBucket {
    /// Count for one label; zero for labels that are not tracked
    #[must_use]
    pub fn count(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    /// Sum over all labels
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[derive(Default)]
struct Accumulator {
    records: u64,
    contributions: u64,
    sum: f64,
}

/// Aggregate records into an ascending series of buckets
///
/// Without a value field each bucket holds its record count. With one, the
/// field values are summed and divided by the number of contributing
/// records, or passed to the transform when one is set. Buckets without any
/// contribution hold `0`.
///
/// # Errors
///
/// Returns [`Error::NonNumeric`] when a value field is not numeric and the
/// policy is [`NonNumericPolicy::Reject`], and a validation error for a
/// timestamp whose bucket start does not fit an `i64`.
pub fn aggregate<I>(records: I, request: &AggregationRequest) -> Result<Vec<Bucket>>
where
    I: IntoIterator,
    I::Item: Record,
{
    let size = request.bucket_size;
    let mut buckets: BTreeMap<UnixSeconds, Accumulator> = BTreeMap::new();
    let mut skipped = 0_u64;

    for record in records {
        let timestamp = record.timestamp();
        let acc = buckets.entry(size.checked_start(timestamp)?).or_default();
        acc.records += 1;

        let Some(field) = request.value_field.as_deref() else {
            continue;
        };
        let value = record.field(field);
        let number = value.as_ref().and_then(FieldValue::as_number);
        match number {
            Some(number) => {
                acc.sum += number;
                acc.contributions += 1;
            }
            None => {
                let found = value.map_or_else(|| "missing".to_string(), |v| v.to_string());
                if request.on_non_numeric == NonNumericPolicy::Reject {
                    return Err(Error::NonNumeric {
                        field: field.to_string(),
                        timestamp,
                        found,
                    });
                }
                warn!(field, timestamp, found = %found, "Skipping non-numeric value");
                skipped += 1;
            }
        }
    }

    debug!(
        buckets = buckets.len(),
        bucket_size = size.as_secs(),
        value_field = request.value_field.as_deref(),
        skipped,
        "Aggregated records"
    );

    Ok(buckets
        .into_iter()
        .map(|(bucket_start, acc)| Bucket {
            bucket_start,
            value: bucket_value(&acc, request),
        })
        .collect())
}

#[allow(clippy::cast_precision_loss)]
fn bucket_value(acc: &Accumulator, request: &AggregationRequest) -> f64 {
    if request.value_field.is_none() {
        return acc.records as f64;
    }
    if acc.contributions == 0 {
        return 0.0;
    }
    match request.transform {
        Some(ref transform) => transform(acc.sum),
        None => acc.sum / acc.contributions as f64,
    }
}

/// Count records per bucket and group label
///
/// Every bucket carries a zero-initialised count for each label in `groups`
/// (duplicates collapse, order is kept). A record whose `group_by` label is
/// not in `groups`, or that has no label, still opens its bucket but is not
/// counted.
///
/// # Errors
///
/// Returns a validation error when a label is [`BUCKET_START_KEY`] or a
/// timestamp's bucket start does not fit an `i64`.
pub fn aggregate_grouped<I, S>(
    records: I,
    bucket_size: BucketSize,
    group_by: &str,
    groups: &[S],
) -> Result<Vec<GroupedBucket>>
where
    I: IntoIterator,
    I::Item: Record,
    S: AsRef<str>,
{
    if groups.iter().any(|group| group.as_ref() == BUCKET_START_KEY) {
        return Err(Error::validation(
            "groups",
            format!("'{BUCKET_START_KEY}' holds the bucket start and cannot be a group label"),
        ));
    }

    let template: IndexMap<String, u64> = groups
        .iter()
        .map(|group| (group.as_ref().to_string(), 0))
        .collect();
    let mut buckets: BTreeMap<UnixSeconds, IndexMap<String, u64>> = BTreeMap::new();
    let mut dropped = 0_u64;

    for record in records {
        let counts = buckets
            .entry(bucket_size.checked_start(record.timestamp())?)
            .or_insert_with(|| template.clone());

        let value = record.field(group_by);
        let counted = value
            .as_ref()
            .and_then(FieldValue::as_label)
            .and_then(|label| counts.get_mut(label.as_ref()))
            .map(|count| *count += 1)
            .is_some();
        if !counted {
            dropped += 1;
        }
    }

    debug!(
        buckets = buckets.len(),
        bucket_size = bucket_size.as_secs(),
        group_by,
        groups = template.len(),
        dropped,
        "Aggregated grouped records"
    );

    Ok(buckets
        .into_iter()
        .map(|(bucket_start, counts)| GroupedBucket {
            bucket_start,
            counts,
        })
        .collect())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::unreadable_literal
)]
mod tests {
    use super::*;
    use crate::types::{LogRecord, tag};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn size(secs: u64) -> BucketSize {
        BucketSize::new(secs).unwrap()
    }

    fn at(timestamps: &[i64]) -> Vec<LogRecord> {
        timestamps.iter().map(|&t| LogRecord::at(t)).collect()
    }

    #[test]
    fn test_bucket_size_validation() {
        assert!(BucketSize::new(0).is_err());
        assert!(BucketSize::new(u64::MAX).is_err());
        assert_eq!(size(60).as_secs(), 60);
        assert_eq!(size(60).to_string(), "60s");
    }

    #[test]
    fn test_bucket_start_floors() {
        let minute = size(60);
        assert_eq!(minute.bucket_start(0), Some(0));
        assert_eq!(minute.bucket_start(59), Some(0));
        assert_eq!(minute.bucket_start(60), Some(60));
        assert_eq!(minute.bucket_start(-1), Some(-60));
        assert_eq!(minute.bucket_start(-60), Some(-60));
    }

    #[test]
    fn test_bucket_start_at_range_bottom() {
        assert_eq!(size(1 << 62).bucket_start(i64::MIN), Some(i64::MIN));
        assert_eq!(size(1).bucket_start(i64::MIN), Some(i64::MIN));
        assert_eq!(size((1 << 62) + 1).bucket_start(i64::MIN), None);
        assert_eq!(size(60).bucket_start(i64::MIN), None);

        let wide = size((1 << 62) + 1);
        let start = wide.bucket_start(i64::MIN + (1 << 62) + 1).unwrap();
        assert_eq!(start.rem_euclid((1 << 62) + 1), 0);
    }

    #[test]
    fn test_unrepresentable_bucket_start_is_rejected() {
        let wide = size((1 << 62) + 1);
        let records = at(&[i64::MIN]);

        let err = aggregate(&records, &AggregationRequest::count(wide)).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "timestamp"));

        let err = aggregate_grouped(&records, wide, "status", &["a"]).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "timestamp"));
    }

    #[test]
    fn test_count_per_bucket() {
        let buckets = aggregate(&at(&[0, 30, 61]), &AggregationRequest::count(size(60))).unwrap();

        assert_eq!(
            buckets,
            vec![
                Bucket { bucket_start: 0, value: 2.0 },
                Bucket { bucket_start: 60, value: 1.0 },
            ]
        );
    }

    #[test]
    fn test_output_is_sorted_regardless_of_input_order() {
        let buckets =
            aggregate(&at(&[7200, 10, 3700, 20]), &AggregationRequest::count(size(3600))).unwrap();

        let starts: Vec<_> = buckets.iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![0, 3600, 7200]);
    }

    #[test]
    fn test_empty_input() {
        let records: Vec<LogRecord> = Vec::new();
        assert!(aggregate(&records, &AggregationRequest::count(size(60))).unwrap().is_empty());
        assert!(aggregate_grouped(&records, size(60), "status", &["a"]).unwrap().is_empty());
    }

    #[test]
    fn test_mean_of_value_field() {
        let records = vec![
            LogRecord::at(0).with_field("v", 10),
            LogRecord::at(0).with_field("v", 20),
        ];
        let request = AggregationRequest::count(size(60)).value_field("v");

        let buckets = aggregate(&records, &request).unwrap();
        assert_eq!(buckets, vec![Bucket { bucket_start: 0, value: 15.0 }]);
    }

    #[test]
    fn test_transform_applies_to_raw_sum() {
        let records = vec![
            LogRecord::at(0).with_field("v", 10),
            LogRecord::at(5).with_field("v", 20),
            LogRecord::at(65).with_field("v", 4),
        ];
        let request = AggregationRequest::count(size(60))
            .value_field("v")
            .transform(|sum| sum * 2.0);

        let buckets = aggregate(&records, &request).unwrap();
        assert_eq!(buckets[0].value, 60.0);
        assert_eq!(buckets[1].value, 8.0);

        let summed = aggregate(&records, &AggregationRequest::count(size(60)).value_field("v").sum())
            .unwrap();
        assert_eq!(summed[0].value, 30.0);
    }

    #[test]
    fn test_declared_field_and_coercions() {
        let mut fast = LogRecord::at(0);
        fast.elapsed_time = Some(0.5);
        let mut slow = LogRecord::at(1);
        slow.elapsed_time = Some(1.5);
        let text = LogRecord::at(2).with_field("elapsed", "2.0");
        let flag = LogRecord::at(3).with_field("elapsed", true);

        let request = AggregationRequest::count(size(60)).value_field("elapsed_time");
        assert_eq!(aggregate(&[fast, slow], &request).unwrap()[0].value, 1.0);

        let request = AggregationRequest::count(size(60)).value_field("elapsed");
        assert_eq!(aggregate(&[text, flag], &request).unwrap()[0].value, 1.5);
    }

    #[test]
    fn test_non_numeric_rejected_by_default() {
        let records = vec![
            LogRecord::at(0).with_field("v", 1),
            LogRecord::at(42).with_field("v", "slow"),
        ];
        let request = AggregationRequest::count(size(60)).value_field("v");

        match aggregate(&records, &request) {
            Err(Error::NonNumeric {
                field,
                timestamp,
                found,
            }) => {
                assert_eq!(field, "v");
                assert_eq!(timestamp, 42);
                assert_eq!(found, "\"slow\"");
            }
            other => panic!("Expected NonNumeric error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_rejected() {
        let request = AggregationRequest::count(size(60)).value_field("v");
        let err = aggregate(&at(&[0]), &request).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_non_numeric_skipped_leaves_divisor() {
        let records = vec![
            LogRecord::at(0).with_field("v", 10),
            LogRecord::at(1).with_field("v", json!(null)),
            LogRecord::at(2).with_field("v", 20),
            LogRecord::at(61).with_field("v", "n/a"),
        ];
        let request = AggregationRequest::count(size(60))
            .value_field("v")
            .on_non_numeric(NonNumericPolicy::Skip);

        let buckets = aggregate(&records, &request).unwrap();
        assert_eq!(
            buckets,
            vec![
                Bucket { bucket_start: 0, value: 15.0 },
                Bucket { bucket_start: 60, value: 0.0 },
            ]
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("skip".parse::<NonNumericPolicy>().unwrap(), NonNumericPolicy::Skip);
        assert_eq!(" Reject ".parse::<NonNumericPolicy>().unwrap(), NonNumericPolicy::Reject);
        assert!("coerce".parse::<NonNumericPolicy>().is_err());
        assert_eq!(NonNumericPolicy::default(), NonNumericPolicy::Reject);
    }

    #[test]
    fn test_grouped_success_and_error() {
        let success = at(&[0]);
        let failure = at(&[0]);
        let records = success
            .iter()
            .map(|r| tag(r, "status", "success"))
            .chain(failure.iter().map(|r| tag(r, "status", "error")));

        let buckets = aggregate_grouped(records, size(3600), "status", &["success", "error"]).unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].bucket_start, 0);
        assert_eq!(buckets[0].count("success"), 1);
        assert_eq!(buckets[0].count("error"), 1);
        assert_eq!(
            serde_json::to_value(&buckets[0]).unwrap(),
            json!({"timestamp": 0, "success": 1, "error": 1})
        );
    }

    #[test]
    fn test_grouped_zero_fills_and_drops_unknown_labels() {
        let records = vec![
            LogRecord::at(10).with_field("region", "eu"),
            LogRecord::at(20).with_field("region", "apac"),
            LogRecord::at(4000),
        ];

        let buckets = aggregate_grouped(&records, size(3600), "region", &["eu", "us", "eu"]).unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].counts.len(), 2);
        assert_eq!(buckets[0].count("eu"), 1);
        assert_eq!(buckets[0].count("us"), 0);
        assert_eq!(buckets[0].count("apac"), 0);
        assert_eq!(buckets[1].bucket_start, 3600);
        assert_eq!(buckets[1].total(), 0);
        let labels: Vec<_> = buckets[1].counts.keys().cloned().collect();
        assert_eq!(labels, vec!["eu", "us"]);
    }

    #[test]
    fn test_grouped_by_boolean_field() {
        let mut ok = LogRecord::at(0);
        ok.is_success = Some(true);
        let mut failed = LogRecord::at(1);
        failed.is_success = Some(false);
        let never_ran = LogRecord::at(2);

        let buckets =
            aggregate_grouped(&[ok, failed, never_ran], size(60), "is_success", &["true", "false"])
                .unwrap();

        assert_eq!(buckets[0].count("true"), 1);
        assert_eq!(buckets[0].count("false"), 1);
    }

    #[test]
    fn test_group_label_cannot_shadow_bucket_start() {
        let records = vec![LogRecord::at(7200).with_field("kind", "timestamp")];

        let err = aggregate_grouped(&records, size(3600), "kind", &["timestamp"]).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "groups"));

        let buckets = aggregate_grouped(&records, size(3600), "kind", &["time"]).unwrap();
        assert_eq!(
            serde_json::to_value(&buckets).unwrap(),
            json!([{"timestamp": 7200, "time": 0}])
        );
    }

    #[test]
    fn test_request_debug_hides_transform() {
        let request = AggregationRequest::count(size(60)).value_field("v").sum();
        let debug = format!("{request:?}");
        assert!(debug.contains("<fn>"));
        assert!(debug.contains("\"v\""));
    }
}
