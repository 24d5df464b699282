//! Property tests for time-bucket aggregation

#![allow(
    clippy::unwrap_used,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use vendpoint_core::{
    AggregationRequest, BucketSize, LogRecord, NonNumericPolicy, RequestStatus, aggregate,
    aggregate_grouped, tag, usage_series,
};

fn records_strategy() -> impl Strategy<Value = Vec<LogRecord>> {
    prop::collection::vec(
        (-86_400i64..4_000_000_000i64, -1_000i32..1_000i32),
        0..200,
    )
    .prop_map(|points| {
        points
            .into_iter()
            .map(|(t, v)| LogRecord::at(t).with_field("v", v))
            .collect()
    })
}

proptest! {
    #[test]
    fn representable_starts_are_multiples_of_size(
        timestamp in any::<i64>(),
        size in 1u64..=i64::MAX as u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let width = size.as_secs() as i64;
        if let Some(start) = size.bucket_start(timestamp) {
            prop_assert_eq!(start.rem_euclid(width), 0);
            prop_assert!(start <= timestamp);
            prop_assert!(timestamp - start < width);
        }
    }

    #[test]
    fn bucket_starts_are_multiples_of_size(
        records in records_strategy(),
        size in 1u64..1_000_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let buckets = aggregate(&records, &AggregationRequest::count(size)).unwrap();

        for bucket in &buckets {
            prop_assert_eq!(bucket.bucket_start.rem_euclid(size.as_secs() as i64), 0);
        }
    }

    #[test]
    fn counts_sum_to_record_count(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let buckets = aggregate(&records, &AggregationRequest::count(size)).unwrap();

        let total: f64 = buckets.iter().map(|b| b.value).sum();
        prop_assert_eq!(total, records.len() as f64);
    }

    #[test]
    fn buckets_are_strictly_ascending(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let buckets = aggregate(&records, &AggregationRequest::count(size).value_field("v")).unwrap();

        prop_assert!(buckets.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
    }

    #[test]
    fn every_record_lands_in_its_bucket(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let buckets = aggregate(&records, &AggregationRequest::count(size)).unwrap();
        let width = size.as_secs() as i64;

        for record in &records {
            let hit = buckets
                .iter()
                .any(|b| b.bucket_start <= record.timestamp && record.timestamp < b.bucket_start + width);
            prop_assert!(hit);
        }
    }

    #[test]
    fn grouped_buckets_have_every_group(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let groups = ["even", "odd", "never"];
        let tagged: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(i, r)| tag(r, "parity", if i % 2 == 0 { "even" } else { "odd" }))
            .collect();

        let buckets = aggregate_grouped(&tagged, size, "parity", &groups).unwrap();

        let mut counted = 0;
        for bucket in &buckets {
            prop_assert_eq!(bucket.counts.len(), groups.len());
            prop_assert_eq!(bucket.count("never"), 0);
            counted += bucket.total();
        }
        prop_assert_eq!(counted, records.len() as u64);
    }

    #[test]
    fn aggregation_is_idempotent(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let request = AggregationRequest::count(size).value_field("v");

        let first = aggregate(&records, &request).unwrap();
        let second = aggregate(&records, &request).unwrap();
        prop_assert_eq!(first, second);

        let grouped_first = usage_series(&records, &records, size).unwrap();
        let grouped_second = usage_series(&records, &records, size).unwrap();
        prop_assert_eq!(grouped_first, grouped_second);
    }

    #[test]
    fn mean_lies_between_extremes(
        records in records_strategy(),
        size in 1u64..100_000u64,
    ) {
        let size = BucketSize::new(size).unwrap();
        let buckets = aggregate(&records, &AggregationRequest::count(size).value_field("v")).unwrap();

        for bucket in &buckets {
            prop_assert!((-1_000.0..1_000.0).contains(&bucket.value));
        }
    }
}

#[test]
fn documented_examples() {
    let minute = BucketSize::new(60).unwrap();
    let records = vec![LogRecord::at(0), LogRecord::at(30), LogRecord::at(61)];
    let buckets = aggregate(&records, &AggregationRequest::count(minute)).unwrap();
    assert_eq!(
        serde_json::to_value(&buckets).unwrap(),
        serde_json::json!([
            {"timestamp": 0, "amount": 2.0},
            {"timestamp": 60, "amount": 1.0},
        ])
    );

    let success = vec![LogRecord::at(0)];
    let failure = vec![LogRecord::at(0)];
    let grouped = usage_series(&success, &failure, BucketSize::new(3600).unwrap()).unwrap();
    assert_eq!(
        serde_json::to_value(&grouped).unwrap(),
        serde_json::json!([{"timestamp": 0, "success": 1, "error": 1}])
    );
    assert_eq!(RequestStatus::labels().len(), grouped[0].counts.len());

    let averaged = vec![
        LogRecord::at(0).with_field("v", 10),
        LogRecord::at(0).with_field("v", 20),
    ];
    let buckets = aggregate(
        &averaged,
        &AggregationRequest::count(minute)
            .value_field("v")
            .on_non_numeric(NonNumericPolicy::Reject),
    )
    .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, 15.0);
}

#[test]
fn records_deserialized_from_admin_api_aggregate() {
    let body = r#"[
        {"api_key": "sk-1", "timestamp": 1700000100, "responder_hotkey": "5Fh", "is_success": true, "elapsed_time": 2.0},
        {"api_key": "sk-2", "timestamp": 1700000200, "responder_hotkey": "5Fh", "is_success": true, "elapsed_time": 4.0},
        {"api_key": "sk-1", "timestamp": 1700003700, "responder_hotkey": null, "is_success": null}
    ]"#;
    let records: Vec<LogRecord> = serde_json::from_str(body).unwrap();

    let request = AggregationRequest::count(BucketSize::new(3600).unwrap())
        .value_field("elapsed_time")
        .on_non_numeric(NonNumericPolicy::Skip);
    let buckets = aggregate(&records, &request).unwrap();

    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].bucket_start, 1_699_999_200);
    assert_eq!(buckets[0].value, 3.0);
    assert_eq!(buckets[1].value, 0.0);

    assert!(
        aggregate(&records, &AggregationRequest::count(BucketSize::new(3600).unwrap()).value_field("elapsed_time"))
            .is_err()
    );
}
