//! Durations used as chart granularity and history window
//!
//! Spans parse from ISO-8601 durations (`PT1H`, `P1W`, `P6M`) or from
//! shorthand (`90s`, `6h`, `1mo`). Calendar units are casual: a month is
//! 30 days and a year 365 days.

use crate::aggregate::BucketSize;
use crate::types::UnixSeconds;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

/// A positive duration in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Span(u64);

/// A named span offered by the dashboard selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    /// Human label
    pub label: &'static str,
    /// The span
    pub span: Span,
}

/// Chart bucket widths
pub const GRANULARITY_PRESETS: [Preset; 5] = [
    Preset { label: "1 minute", span: Span(MINUTE) },
    Preset { label: "1 hour", span: Span(HOUR) },
    Preset { label: "6 hours", span: Span(6 * HOUR) },
    Preset { label: "1 day", span: Span(DAY) },
    Preset { label: "1 week", span: Span(WEEK) },
];

/// Chart look-back windows
pub const HISTORY_PRESETS: [Preset; 6] = [
    Preset { label: "1 hour", span: Span(HOUR) },
    Preset { label: "1 day", span: Span(DAY) },
    Preset { label: "1 week", span: Span(WEEK) },
    Preset { label: "1 month", span: Span(MONTH) },
    Preset { label: "6 months", span: Span(6 * MONTH) },
    Preset { label: "1 year", span: Span(YEAR) },
];

impl Span {
    /// Default chart granularity
    pub const DEFAULT_GRANULARITY: Self = Self(HOUR);

    /// Default chart history
    pub const DEFAULT_HISTORY: Self = Self(WEEK);

    /// One day, the window of the usage summary cards
    pub const DAY: Self = Self(DAY);

    /// Build a span from seconds
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero.
    pub fn from_secs(secs: u64) -> Result<Self> {
        if secs == 0 {
            return Err(Error::validation("span", "must be longer than zero seconds"));
        }
        Ok(Self(secs))
    }

    /// Parse ISO-8601 or shorthand notation
    ///
    /// # Errors
    ///
    /// Returns a validation error when the text is not a positive duration.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let secs = if text.starts_with(['P', 'p']) {
            parse_iso(text)
        } else {
            parse_shorthand(text)
        }
        .ok_or_else(|| Error::validation("span", format!("cannot parse duration '{text}'")))?;
        Self::from_secs(secs)
    }

    /// Length in seconds
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Use this span as a bucket width
    ///
    /// # Errors
    ///
    /// Returns a validation error if the span does not fit a timestamp.
    pub fn bucket_size(self) -> Result<BucketSize> {
        BucketSize::new(self.0)
    }

    /// Start of a look-back window of this length ending at `now`
    #[must_use]
    pub fn window_start(self, now: UnixSeconds) -> UnixSeconds {
        now.saturating_sub(i64::try_from(self.0).unwrap_or(i64::MAX))
    }

    /// Canonical ISO-8601 rendering, largest units first
    #[must_use]
    pub fn to_iso(self) -> String {
        let mut rest = self.0;
        let mut date = String::new();
        for (unit, suffix) in [(YEAR, 'Y'), (MONTH, 'M'), (WEEK, 'W'), (DAY, 'D')] {
            if rest >= unit {
                date.push_str(&format!("{}{suffix}", rest / unit));
                rest %= unit;
            }
        }
        let mut time = String::new();
        for (unit, suffix) in [(HOUR, 'H'), (MINUTE, 'M'), (1, 'S')] {
            if rest >= unit {
                time.push_str(&format!("{}{suffix}", rest / unit));
                rest %= unit;
            }
        }
        if time.is_empty() {
            format!("P{date}")
        } else {
            format!("P{date}T{time}")
        }
    }

    /// Label of the matching preset, if any
    #[must_use]
    pub fn preset_label(self) -> Option<&'static str> {
        GRANULARITY_PRESETS
            .iter()
            .chain(HISTORY_PRESETS.iter())
            .find(|preset| preset.span == self)
            .map(|preset| preset.label)
    }
}

fn parse_iso(text: &str) -> Option<u64> {
    let body = text.get(1..)?.to_ascii_uppercase();
    if body.is_empty() {
        return None;
    }
    let (date, time) = match body.split_once('T') {
        Some((_, "")) => return None,
        Some((date, time)) => (date.to_string(), Some(time.to_string())),
        None => (body, None),
    };
    let mut total = sum_components(&date, &[('Y', YEAR), ('M', MONTH), ('W', WEEK), ('D', DAY)])?;
    if let Some(time) = time {
        total = total.checked_add(sum_components(&time, &[('H', HOUR), ('M', MINUTE), ('S', 1)])?)?;
    }
    Some(total)
}

/// Sum `<number><unit>` components whose units appear in `units` order
fn sum_components(text: &str, units: &[(char, u64)]) -> Option<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut next_unit = 0;
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let offset = units.get(next_unit..)?.iter().position(|(unit, _)| *unit == c)?;
        let (_, secs) = units.get(next_unit + offset)?;
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(*secs)?)?;
        digits.clear();
        next_unit += offset + 1;
    }
    digits.is_empty().then_some(total)
}

fn parse_shorthand(text: &str) -> Option<u64> {
    let split = text.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = text.split_at(split);
    let value: u64 = number.parse().ok()?;
    let secs = match unit.trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => WEEK,
        "mo" | "month" | "months" => MONTH,
        "y" | "year" | "years" => YEAR,
        _ => return None,
    };
    value.checked_mul(secs)
}

impl FromStr for Span {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Span {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Span> for String {
    fn from(span: Span) -> Self {
        span.to_iso()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.preset_label() {
            Some(label) => f.write_str(label),
            None => f.write_str(&self.to_iso()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::missing_panics_doc, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("PT1M", 60)]
    #[case("PT1H", 3_600)]
    #[case("PT6H", 21_600)]
    #[case("P1D", 86_400)]
    #[case("P1W", 604_800)]
    #[case("P1M", 2_592_000)]
    #[case("P6M", 15_552_000)]
    #[case("P1Y", 31_536_000)]
    #[case("P1DT12H", 129_600)]
    #[case("PT1H30M15S", 5_415)]
    #[case("pt2h", 7_200)]
    fn test_parse_iso(#[case] text: &str, #[case] secs: u64) {
        assert_eq!(Span::parse(text).unwrap().as_secs(), secs);
    }

    #[rstest]
    #[case("90s", 90)]
    #[case("1m", 60)]
    #[case("6h", 21_600)]
    #[case("1d", 86_400)]
    #[case("2 weeks", 1_209_600)]
    #[case("1mo", 2_592_000)]
    #[case("1y", 31_536_000)]
    fn test_parse_shorthand(#[case] text: &str, #[case] secs: u64) {
        assert_eq!(Span::parse(text).unwrap().as_secs(), secs);
    }

    #[rstest]
    #[case("")]
    #[case("P")]
    #[case("PT")]
    #[case("P1H")]
    #[case("PT1D")]
    #[case("P1D1Y")]
    #[case("P1")]
    #[case("PT0S")]
    #[case("0h")]
    #[case("h")]
    #[case("10 fortnights")]
    fn test_parse_rejects(#[case] text: &str) {
        assert!(Span::parse(text).is_err(), "expected '{text}' to be rejected");
    }

    #[test]
    fn test_to_iso_is_canonical() {
        assert_eq!(Span::parse("1h").unwrap().to_iso(), "PT1H");
        assert_eq!(Span::parse("P7D").unwrap().to_iso(), "P1W");
        assert_eq!(Span::parse("90m").unwrap().to_iso(), "PT1H30M");
        assert_eq!(Span::parse("P1DT1S").unwrap().to_iso(), "P1DT1S");
    }

    #[test]
    fn test_display_uses_preset_labels() {
        assert_eq!(Span::DEFAULT_GRANULARITY.to_string(), "1 hour");
        assert_eq!(Span::DEFAULT_HISTORY.to_string(), "1 week");
        assert_eq!(Span::parse("P6M").unwrap().to_string(), "6 months");
        assert_eq!(Span::parse("45s").unwrap().to_string(), "PT45S");
    }

    #[test]
    fn test_window_start() {
        assert_eq!(Span::DAY.window_start(1_700_086_400), 1_700_000_000);
        assert_eq!(Span::DAY.window_start(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_bucket_size_from_span() {
        let size = Span::DEFAULT_GRANULARITY.bucket_size().unwrap();
        assert_eq!(size.as_secs(), 3_600);
        assert!(Span(u64::MAX).bucket_size().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Span::DEFAULT_HISTORY).unwrap();
        assert_eq!(json, "\"P1W\"");

        let span: Span = serde_json::from_str("\"6h\"").unwrap();
        assert_eq!(span.as_secs(), 21_600);

        assert!(serde_json::from_str::<Span>("\"soon\"").is_err());
    }

    #[test]
    fn test_presets_are_sorted() {
        assert!(GRANULARITY_PRESETS.windows(2).all(|w| w[0].span < w[1].span));
        assert!(HISTORY_PRESETS.windows(2).all(|w| w[0].span < w[1].span));
    }

    proptest! {
        #[test]
        fn test_iso_roundtrip(secs in 1u64..100_000_000u64) {
            let span = Span::from_secs(secs).unwrap();
            prop_assert_eq!(Span::parse(&span.to_iso()).unwrap(), span);
        }
    }
}
