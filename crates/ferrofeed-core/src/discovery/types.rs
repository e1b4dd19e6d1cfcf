//! Semantic type inference for JSON leaf values.

use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Semantic type tag attached to discovered fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Null,
    Date,
    Object,
    Array,
}

impl FieldType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    pub const fn is_container(self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("iso date pattern is valid")
});

static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?(Z|z|[+-]\d{2}(?::?\d{2})?)?$",
    )
    .expect("iso datetime pattern is valid")
});

static SLASHED_YMD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})/(\d{2})/(\d{2})$").expect("yyyy/mm/dd pattern is valid")
});

static SLASHED_MDY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").expect("mm/dd/yyyy pattern is valid")
});

static DASHED_DMY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})-(\d{2})-(\d{4})$").expect("dd-mm-yyyy pattern is valid")
});

static UNIX_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{10}|\d{13})$").expect("timestamp pattern is valid"));

/// Classifies a JSON value into its semantic type. Never fails; anything
/// ambiguous falls through to [`FieldType::String`].
pub fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Array(_) => FieldType::Array,
        Value::Object(_) => FieldType::Object,
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        Value::String(text) => infer_string_type(text),
    }
}

fn infer_string_type(text: &str) -> FieldType {
    if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
        return FieldType::Boolean;
    }
    if is_date_like(text) {
        return FieldType::Date;
    }
    if parse_numeric(text).is_some() {
        return FieldType::Number;
    }
    FieldType::String
}

/// True when `text` matches one of the supported date shapes and names a
/// real calendar instant (or is a bare 10/13 digit Unix timestamp).
pub fn is_date_like(text: &str) -> bool {
    let trimmed = text.trim();
    UNIX_TIMESTAMP.is_match(trimmed) || parse_calendar_millis(trimmed).is_some()
}

/// Parses a finite number from a string, ignoring surrounding whitespace.
pub fn parse_numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Milliseconds since the Unix epoch for calendar-formatted dates.
///
/// Bare numeric timestamps are not handled here; callers that
/// need them compare the integer value directly.
pub fn parse_calendar_millis(text: &str) -> Option<i64> {
    let trimmed = text.trim();

    if let Some(caps) = ISO_DATE.captures(trimmed) {
        let date = calendar_date(&caps[1], &caps[2], &caps[3])?;
        return Some(midnight_millis(date));
    }
    if let Some(caps) = SLASHED_YMD.captures(trimmed) {
        let date = calendar_date(&caps[1], &caps[2], &caps[3])?;
        return Some(midnight_millis(date));
    }
    if let Some(caps) = SLASHED_MDY.captures(trimmed) {
        let date = calendar_date(&caps[3], &caps[1], &caps[2])?;
        return Some(midnight_millis(date));
    }
    if let Some(caps) = DASHED_DMY.captures(trimmed) {
        let date = calendar_date(&caps[3], &caps[2], &caps[1])?;
        return Some(midnight_millis(date));
    }
    if let Some(caps) = ISO_DATETIME.captures(trimmed) {
        let date = calendar_date(&caps[1], &caps[2], &caps[3])?;
        let hour = caps[4].parse::<u8>().ok()?;
        let minute = caps[5].parse::<u8>().ok()?;
        let second = caps
            .get(6)
            .map_or(Some(0), |m| m.as_str().parse::<u8>().ok())?;
        let nanos = caps.get(7).map_or(Some(0), |m| fraction_nanos(m.as_str()))?;
        let time = Time::from_hms_nano(hour, minute, second, nanos).ok()?;
        let offset = match caps.get(8) {
            Some(m) => parse_offset(m.as_str())?,
            None => UtcOffset::UTC,
        };
        let instant = PrimitiveDateTime::new(date, time).assume_offset(offset);
        return Some(unix_millis(instant));
    }

    None
}

fn calendar_date(year: &str, month: &str, day: &str) -> Option<Date> {
    let year = year.parse::<i32>().ok()?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day = day.parse::<u8>().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn fraction_nanos(fraction: &str) -> Option<u32> {
    let digits = fraction.len().min(9);
    let value = fraction[..digits].parse::<u32>().ok()?;
    Some(value * 10_u32.pow(9 - digits as u32))
}

fn parse_offset(raw: &str) -> Option<UtcOffset> {
    if raw.eq_ignore_ascii_case("z") {
        return Some(UtcOffset::UTC);
    }
    let sign: i8 = if raw.starts_with('-') { -1 } else { 1 };
    let digits = raw[1..].replace(':', "");
    let hours = digits.get(0..2)?.parse::<i8>().ok()?;
    let minutes = match digits.get(2..4) {
        Some(m) => m.parse::<i8>().ok()?,
        None => 0,
    };
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

fn midnight_millis(date: Date) -> i64 {
    unix_millis(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

fn unix_millis(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}
