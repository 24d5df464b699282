//! Core data types for vendpoint usage analytics

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::Validate;

/// Unix timestamp in seconds
pub type UnixSeconds = i64;

/// Role of a chat message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user
    User,
    /// System prompt
    System,
    /// Model response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::System => write!(f, "system"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single prompt message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

/// One logged API request, as served by `GET /admin/logs`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// When the request was received
    pub timestamp: UnixSeconds,

    /// API key the request was made with
    #[serde(default)]
    pub api_key: Option<String>,

    /// Hotkey of the miner that answered
    #[serde(default)]
    pub responder_hotkey: Option<String>,

    /// Prompt messages sent to the network
    #[serde(default)]
    pub prompt: Vec<Message>,

    /// Whether the request passed API-side checks
    #[serde(default)]
    pub is_api_success: Option<bool>,

    /// API-side error, if any
    #[serde(default)]
    pub api_error: Option<String>,

    /// Response text
    #[serde(default)]
    pub response: Option<String>,

    /// Whether the network call succeeded; `None` when it never ran
    #[serde(default)]
    pub is_success: Option<bool>,

    /// Message returned by the network call
    #[serde(default)]
    pub return_message: Option<String>,

    /// Network call duration in seconds
    #[serde(default)]
    pub elapsed_time: Option<f64>,

    /// Source protocol version
    #[serde(default)]
    pub src_version: Option<i64>,

    /// Destination protocol version
    #[serde(default)]
    pub dest_version: Option<i64>,

    /// Return code of the network call
    #[serde(default)]
    pub return_code: Option<String>,

    /// Fields the model does not declare
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a record with only a timestamp set
    #[must_use]
    pub fn at(timestamp: UnixSeconds) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Attach an undeclared field
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Whether the network call is known to have succeeded
    ///
    /// A missing `is_success` counts as a failure, matching the admin API filter.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_success == Some(true)
    }
}

/// Explicitly typed value of a record field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Any JSON number
    Number(f64),
    /// Text
    Text(Cow<'a, str>),
}

impl FieldValue<'_> {
    /// Numeric view of the value
    ///
    /// Numbers pass through, booleans become `1`/`0` and text is parsed after
    /// trimming. Everything else has no numeric value.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Null | Self::Number(_) => None,
        }
    }

    /// Label used when grouping by this value
    ///
    /// Integral numbers render without a fractional part. Null has no label.
    #[must_use]
    pub fn as_label(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            Self::Number(n) => Some(Cow::Owned(format_number(*n))),
            Self::Text(s) => Some(Cow::Borrowed(s.as_ref())),
        }
    }
}

impl std::fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl<'a> From<&'a serde_json::Value> for FieldValue<'a> {
    fn from(value: &'a serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(s) => Self::Text(Cow::Borrowed(s)),
            // Composite values are rendered as JSON text
            other => Self::Text(Cow::Owned(other.to_string())),
        }
    }
}

/// Anything the aggregator can bucket
pub trait Record {
    /// Unix timestamp of the record in seconds
    fn timestamp(&self) -> UnixSeconds;

    /// Look up a field by name; `None` when the record has no such field
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

fn opt_text(value: Option<&String>) -> FieldValue<'_> {
    value.map_or(FieldValue::Null, |s| FieldValue::Text(Cow::Borrowed(s)))
}

impl Record for LogRecord {
    fn timestamp(&self) -> UnixSeconds {
        self.timestamp
    }

    #[allow(clippy::cast_precision_loss)]
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let value = match name {
            "timestamp" => FieldValue::Number(self.timestamp as f64),
            "api_key" => opt_text(self.api_key.as_ref()),
            "responder_hotkey" => opt_text(self.responder_hotkey.as_ref()),
            "api_error" => opt_text(self.api_error.as_ref()),
            "response" => opt_text(self.response.as_ref()),
            "return_message" => opt_text(self.return_message.as_ref()),
            "return_code" => opt_text(self.return_code.as_ref()),
            "is_api_success" => self.is_api_success.map_or(FieldValue::Null, FieldValue::Bool),
            "is_success" => self.is_success.map_or(FieldValue::Null, FieldValue::Bool),
            "elapsed_time" => self.elapsed_time.map_or(FieldValue::Null, FieldValue::Number),
            "src_version" => self
                .src_version
                .map_or(FieldValue::Null, |v| FieldValue::Number(v as f64)),
            "dest_version" => self
                .dest_version
                .map_or(FieldValue::Null, |v| FieldValue::Number(v as f64)),
            "prompt" => FieldValue::Text(Cow::Owned(
                serde_json::to_string(&self.prompt).unwrap_or_default(),
            )),
            other => return self.extra.get(other).map(FieldValue::from),
        };
        Some(value)
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn timestamp(&self) -> UnixSeconds {
        (**self).timestamp()
    }

    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        (**self).field(name)
    }
}

/// A record view with one extra synthetic field
#[derive(Debug, Clone, Copy)]
pub struct Tagged<'a, R> {
    record: R,
    field: &'a str,
    label: &'a str,
}

/// Wrap `record` so that `field` resolves to `label`
pub const fn tag<'a, R: Record>(record: R, field: &'a str, label: &'a str) -> Tagged<'a, R> {
    Tagged {
        record,
        field,
        label,
    }
}

impl<R: Record> Record for Tagged<'_, R> {
    fn timestamp(&self) -> UnixSeconds {
        self.record.timestamp()
    }

    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        if name == self.field {
            Some(FieldValue::Text(Cow::Borrowed(self.label)))
        } else {
            self.record.field(name)
        }
    }
}

/// Outcome label used by the usage chart
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Network call succeeded
    Success,
    /// Network call failed or never ran
    Error,
}

impl RequestStatus {
    /// Name of the synthetic field carrying the status
    pub const FIELD: &'static str = "status";

    /// Chart label of the status
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Both labels in chart order
    #[must_use]
    pub const fn labels() -> [&'static str; 2] {
        [Self::Success.label(), Self::Error.label()]
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Filters accepted by the log endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct LogFilters {
    /// Restrict to one API key
    pub key: Option<String>,
    /// Restrict to one responder hotkey
    pub responder_hotkey: Option<String>,
    /// Restrict by API-side success
    pub is_api_success: Option<bool>,
    /// Restrict by network success; `false` also matches records that never ran
    pub is_success: Option<bool>,
    /// Inclusive lower timestamp bound
    pub start: Option<UnixSeconds>,
    /// Inclusive upper timestamp bound
    pub end: Option<UnixSeconds>,
    /// Maximum number of records to return (server default is 100)
    #[validate(range(min = 1))]
    pub lines: Option<u32>,
}

impl LogFilters {
    /// Filters for one outcome since `start`
    #[must_use]
    pub fn outcome_since(success: bool, start: UnixSeconds) -> Self {
        Self {
            is_success: Some(success),
            start: Some(start),
            ..Self::default()
        }
    }

    /// Set the record limit
    #[must_use]
    pub const fn with_lines(mut self, lines: u32) -> Self {
        self.lines = Some(lines);
        self
    }

    /// Validate the filters before they are sent
    ///
    /// # Errors
    ///
    /// Returns a validation error if `lines` is zero or `start` lies after
    /// `end`.
    pub fn check(&self) -> crate::Result<()> {
        self.validate()
            .map_err(|e| crate::Error::validation("lines", e.to_string()))?;
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(crate::Error::validation(
                "start",
                format!("start {start} is after end {end}"),
            ));
        }
        Ok(())
    }

    /// Render the set filters as query pairs, in a stable order
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ref key) = self.key {
            pairs.push(("key", key.clone()));
        }
        if let Some(ref hotkey) = self.responder_hotkey {
            pairs.push(("responder_hotkey", hotkey.clone()));
        }
        if let Some(is_api_success) = self.is_api_success {
            pairs.push(("is_api_success", is_api_success.to_string()));
        }
        if let Some(is_success) = self.is_success {
            pairs.push(("is_success", is_success.to_string()));
        }
        if let Some(start) = self.start {
            pairs.push(("start", start.to_string()));
        }
        if let Some(end) = self.end {
            pairs.push(("end", end.to_string()));
        }
        if let Some(lines) = self.lines {
            pairs.push(("lines", lines.to_string()));
        }
        pairs
    }
}

/// Filters accepted by `GET /admin/logs/count`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountFilters {
    /// Common log filters; `lines` is ignored by the count endpoint
    #[serde(flatten)]
    pub filters: LogFilters,
    /// Count distinct API keys instead of requests
    #[serde(default)]
    pub unique_api_keys: bool,
}

impl CountFilters {
    /// Render the set filters as query pairs
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<_> = self
            .filters
            .to_query_pairs()
            .into_iter()
            .filter(|(name, _)| *name != "lines")
            .collect();
        if self.unique_api_keys {
            pairs.push(("unique_api_keys", "true".to_string()));
        }
        pairs
    }
}

/// Body of `GET /admin/logs/count`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountResponse {
    /// Number of matching requests or keys
    pub count: u64,
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::unreadable_literal,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    fn sample_json() -> serde_json::Value {
        json!({
            "api_key": "sk-abc",
            "timestamp": 1700000123,
            "responder_hotkey": "5F3sa2TJ",
            "prompt": [{"role": "user", "content": "hello"}],
            "is_api_success": true,
            "api_error": null,
            "response": "hi",
            "is_success": true,
            "return_message": "Success",
            "elapsed_time": 1.25,
            "src_version": 600,
            "dest_version": 610,
            "return_code": "Success",
            "region": "eu"
        })
    }

    #[test]
    fn test_log_record_deserialization() {
        let record: LogRecord = serde_json::from_value(sample_json()).unwrap();

        assert_eq!(record.timestamp, 1700000123);
        assert_eq!(record.api_key.as_deref(), Some("sk-abc"));
        assert_eq!(record.prompt.len(), 1);
        assert_eq!(record.prompt[0].role, Role::User);
        assert_eq!(record.elapsed_time, Some(1.25));
        assert_eq!(record.extra.get("region"), Some(&json!("eu")));
        assert!(record.succeeded());
    }

    #[test]
    fn test_minimal_log_record() {
        let record: LogRecord = serde_json::from_value(json!({"timestamp": 60})).unwrap();

        assert_eq!(record, LogRecord::at(60));
        assert!(!record.succeeded());
    }

    #[test]
    fn test_log_record_requires_timestamp() {
        let result = serde_json::from_value::<LogRecord>(json!({"api_key": "sk"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_field_lookup() {
        let record: LogRecord = serde_json::from_value(sample_json()).unwrap();

        assert_eq!(record.field("timestamp"), Some(FieldValue::Number(1700000123.0)));
        assert_eq!(record.field("is_success"), Some(FieldValue::Bool(true)));
        assert_eq!(record.field("api_error"), Some(FieldValue::Null));
        assert_eq!(record.field("src_version"), Some(FieldValue::Number(600.0)));
        assert_eq!(
            record.field("region"),
            Some(FieldValue::Text(Cow::Borrowed("eu")))
        );
        assert_eq!(record.field("missing"), None);
    }

    #[rstest]
    #[case(FieldValue::Number(2.5), Some(2.5))]
    #[case(FieldValue::Bool(true), Some(1.0))]
    #[case(FieldValue::Bool(false), Some(0.0))]
    #[case(FieldValue::Text(Cow::Borrowed(" 12 ")), Some(12.0))]
    #[case(FieldValue::Text(Cow::Borrowed("slow")), None)]
    #[case(FieldValue::Text(Cow::Borrowed("")), None)]
    #[case(FieldValue::Text(Cow::Borrowed("NaN")), None)]
    #[case(FieldValue::Null, None)]
    fn test_numeric_coercion(#[case] value: FieldValue<'static>, #[case] expected: Option<f64>) {
        assert_eq!(value.as_number(), expected);
    }

    #[rstest]
    #[case(FieldValue::Text(Cow::Borrowed("success")), Some("success"))]
    #[case(FieldValue::Bool(false), Some("false"))]
    #[case(FieldValue::Number(3.0), Some("3"))]
    #[case(FieldValue::Number(0.5), Some("0.5"))]
    #[case(FieldValue::Null, None)]
    fn test_group_labels(#[case] value: FieldValue<'static>, #[case] expected: Option<&str>) {
        assert_eq!(value.as_label().as_deref(), expected);
    }

    #[test]
    fn test_tagged_record_overrides_one_field() {
        let record = LogRecord::at(10).with_field("status", "ignored");
        let tagged = tag(&record, RequestStatus::FIELD, "success");

        assert_eq!(tagged.timestamp(), 10);
        assert_eq!(
            tagged.field("status"),
            Some(FieldValue::Text(Cow::Borrowed("success")))
        );
        assert_eq!(tagged.field("api_key"), Some(FieldValue::Null));
    }

    #[test]
    fn test_request_status_labels() {
        assert_eq!(RequestStatus::labels(), ["success", "error"]);
        assert_eq!(RequestStatus::Error.to_string(), "error");
        assert_eq!(
            serde_json::to_string(&RequestStatus::Success).unwrap(),
            "\"success\""
        );
    }

    #[test]
    fn test_log_filters_query_pairs() {
        let filters = LogFilters {
            key: Some("sk-1".to_string()),
            is_success: Some(false),
            start: Some(1700000000),
            lines: Some(500),
            ..LogFilters::default()
        };

        assert_eq!(
            filters.to_query_pairs(),
            vec![
                ("key", "sk-1".to_string()),
                ("is_success", "false".to_string()),
                ("start", "1700000000".to_string()),
                ("lines", "500".to_string()),
            ]
        );
        assert!(LogFilters::default().to_query_pairs().is_empty());
    }

    #[test]
    fn test_outcome_filters() {
        let filters = LogFilters::outcome_since(true, 42).with_lines(10);
        assert_eq!(filters.is_success, Some(true));
        assert_eq!(filters.start, Some(42));
        assert_eq!(filters.lines, Some(10));
    }

    #[test]
    fn test_log_filters_validation() {
        assert!(LogFilters::default().with_lines(1).validate().is_ok());
        assert!(LogFilters::default().with_lines(0).validate().is_err());
        assert!(LogFilters::default().with_lines(0).check().is_err());

        let inverted = LogFilters {
            start: Some(10),
            end: Some(5),
            ..LogFilters::default()
        };
        assert!(matches!(
            inverted.check(),
            Err(crate::Error::Validation { ref field, .. }) if field == "start"
        ));
        assert!(LogFilters::outcome_since(true, 0).check().is_ok());
    }

    #[test]
    fn test_count_filters_drop_lines() {
        let filters = CountFilters {
            filters: LogFilters::outcome_since(true, 5).with_lines(100),
            unique_api_keys: true,
        };

        assert_eq!(
            filters.to_query_pairs(),
            vec![
                ("is_success", "true".to_string()),
                ("start", "5".to_string()),
                ("unique_api_keys", "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_count_response_deserialization() {
        let response: CountResponse = serde_json::from_str(r#"{"count": 17}"#).unwrap();
        assert_eq!(response.count, 17);
    }

    proptest! {
        #[test]
        fn test_timestamp_field_matches_record(ts in -1_000_000_000i64..5_000_000_000i64) {
            let record = LogRecord::at(ts);
            prop_assert_eq!(record.field("timestamp").and_then(|v| v.as_number()), Some(ts as f64));
        }

        #[test]
        fn test_numeric_text_roundtrips(n in -1.0e9f64..1.0e9f64) {
            let text = n.to_string();
            let value = FieldValue::Text(Cow::Owned(text));
            prop_assert_eq!(value.as_number(), Some(n));
        }
    }
}
