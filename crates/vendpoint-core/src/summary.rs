//! Usage summary cards

use crate::types::{LogRecord, UnixSeconds};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Request totals over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Window start
    pub since: UnixSeconds,
    /// Requests in the window
    pub requests: u64,
    /// Requests whose network call succeeded
    pub successful: u64,
    /// Requests that failed or never reached the network
    pub failed: u64,
    /// Distinct API keys seen in the window
    pub unique_api_keys: u64,
}

impl UsageSummary {
    /// Summarise the records with `timestamp >= since`
    ///
    /// Records without an API key do not count towards `unique_api_keys`.
    #[must_use]
    pub fn from_records<'a, I>(records: I, since: UnixSeconds) -> Self
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        let mut summary = Self {
            since,
            ..Self::default()
        };
        let mut keys: HashSet<&str> = HashSet::new();

        for record in records.into_iter().filter(|r| r.timestamp >= since) {
            summary.requests += 1;
            if record.succeeded() {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
            if let Some(ref key) = record.api_key {
                keys.insert(key);
            }
        }

        summary.unique_api_keys = keys.len() as u64;
        summary
    }

    /// Share of successful requests, `None` for an empty window
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.successful as f64 / self.requests as f64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(timestamp: i64, key: Option<&str>, success: Option<bool>) -> LogRecord {
        LogRecord {
            api_key: key.map(str::to_string),
            is_success: success,
            ..LogRecord::at(timestamp)
        }
    }

    #[test]
    fn test_summary_counts_window_only() {
        let records = vec![
            record(10, Some("a"), Some(true)),
            record(100, Some("a"), Some(true)),
            record(110, Some("b"), Some(false)),
            record(120, None, None),
        ];

        let summary = UsageSummary::from_records(&records, 100);

        assert_eq!(
            summary,
            UsageSummary {
                since: 100,
                requests: 3,
                successful: 1,
                failed: 2,
                unique_api_keys: 2,
            }
        );
        assert_eq!(summary.success_rate().unwrap(), 1.0 / 3.0);
    }

    #[test]
    fn test_empty_summary() {
        let records: Vec<LogRecord> = Vec::new();
        let summary = UsageSummary::from_records(&records, 0);
        assert_eq!(summary.requests, 0);
        assert!(summary.success_rate().is_none());
    }
}
