//! Detection and normalization of date-keyed financial time series.
//!
//! Many market-data APIs (Alpha Vantage being the best known) return series
//! as an object keyed by date whose values are OHLC-style records:
//!
//! ```json
//! {"2025-01-02": {"1. open": "11", "4. close": "12"},
//!  "2025-01-01": {"1. open": "10", "4. close": "11"}}
//! ```
//!
//! [`normalize`] rewrites that shape into a date-ascending array of records
//! with an explicit date field, which the flattener can then treat like any
//! other array response.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::discovery::schema::join_path;
use crate::discovery::types::{is_date_like, parse_calendar_millis, parse_numeric};

/// Field name used for the date column when none is given.
pub const DEFAULT_DATE_KEY: &str = "date";

/// Substrings that mark a key as a market-data field.
pub const FINANCIAL_KEYWORDS: &[&str] = &[
    "open", "high", "low", "close", "volume", "price", "rate", "value", "bid", "ask", "vwap",
    "rsi", "macd", "sma", "ema", "change", "amount", "adjusted", "dividend", "split",
];

/// True when `value` is an object keyed entirely by dates whose values are
/// all objects, at least one of which looks like a market-data record.
pub fn is_financial_time_series(value: &Value) -> bool {
    let Value::Object(entries) = value else {
        return false;
    };
    if entries.len() < 2 {
        return false;
    }
    if !entries.keys().all(|key| is_date_like(key)) {
        return false;
    }

    let mut records = Vec::with_capacity(entries.len());
    for value in entries.values() {
        match value {
            Value::Object(record) => records.push(record),
            _ => return false,
        }
    }

    records.into_iter().any(looks_like_market_record)
}

fn looks_like_market_record(record: &Map<String, Value>) -> bool {
    let keyword_hits = record
        .keys()
        .filter(|key| {
            let lowered = key.to_lowercase();
            FINANCIAL_KEYWORDS
                .iter()
                .any(|keyword| lowered.contains(keyword))
        })
        .count();
    if keyword_hits >= 2 {
        return true;
    }

    let numeric_fields = record.values().filter(|value| is_numeric_coercible(value)).count();
    numeric_fields >= 2
}

fn is_numeric_coercible(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => parse_numeric(text).is_some(),
        _ => false,
    }
}

/// Rewrites a date-keyed series into records sorted ascending by date.
///
/// Each record is `{date_key: <key>}` followed by the fields of the value
/// object. Non-object values are skipped; callers normally check
/// [`is_financial_time_series`] first.
pub fn normalize(series: &Value, date_key: &str) -> Vec<Value> {
    let Value::Object(entries) = series else {
        return Vec::new();
    };

    let keyed = entries.iter().filter_map(|(key, value)| {
        let fields = value.as_object()?;
        let mut record = Map::with_capacity(fields.len() + 1);
        record.insert(date_key.to_owned(), Value::String(key.clone()));
        for (name, field) in fields {
            record.insert(name.clone(), field.clone());
        }
        Some((DateKey::new(key), Value::Object(record)))
    });

    sort_by_date(keyed).into_iter().map(|(_, record)| record).collect()
}

/// Parsed forms of a series key, computed once per record.
#[derive(Debug, Clone)]
struct DateKey {
    raw: String,
    calendar: Option<i64>,
    integer: Option<i64>,
}

impl DateKey {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_owned(),
            calendar: parse_calendar_millis(raw),
            integer: raw.trim().parse::<i64>().ok(),
        }
    }
}

/// Orders two series keys: calendar date when both parse, otherwise integer
/// timestamp when both are integers, otherwise plain string order.
pub fn compare_date_keys(left: &str, right: &str) -> Ordering {
    compare_parsed(&DateKey::new(left), &DateKey::new(right))
}

fn compare_parsed(left: &DateKey, right: &DateKey) -> Ordering {
    if let (Some(a), Some(b)) = (left.calendar, right.calendar) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (left.integer, right.integer) {
        return a.cmp(&b);
    }
    left.raw.cmp(&right.raw)
}

// The pairwise comparator is not a total order when a series mixes key
// formats, so records are placed by binary insertion rather than `sort_by`,
// which may panic on inconsistent comparisons.
fn sort_by_date(items: impl Iterator<Item = (DateKey, Value)>) -> Vec<(DateKey, Value)> {
    let mut sorted: Vec<(DateKey, Value)> = Vec::new();
    for item in items {
        let index =
            sorted.partition_point(|(existing, _)| compare_parsed(existing, &item.0) != Ordering::Greater);
        sorted.insert(index, item);
    }
    sorted
}

/// Resolves a dot path inside `document`; numeric segments index arrays.
///
/// Keys that themselves contain dots (`"1. open"`) are tried whole before the
/// path is split.
pub fn value_at_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(document);
    }
    if let Some(direct) = document.as_object().and_then(|object| object.get(path)) {
        return Some(direct);
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let next = match document {
        Value::Object(object) => object.get(head)?,
        Value::Array(items) => items.get(head.parse::<usize>().ok()?)?,
        _ => return None,
    };
    match rest {
        Some(rest) => value_at_path(next, rest),
        None => Some(next),
    }
}

/// Dot paths of every financial series inside `document`, outermost first.
///
/// Offered to configuration flows as a suggestion for `financialDataPath`;
/// the update pipeline never calls it.
pub fn detect_series_paths(document: &Value) -> Vec<String> {
    let mut found = Vec::new();
    if is_financial_time_series(document) {
        found.push(String::new());
        return found;
    }
    collect_series_paths(document, "", &mut found);
    found
}

fn collect_series_paths(value: &Value, prefix: &str, found: &mut Vec<String>) {
    let Value::Object(object) = value else {
        return;
    };
    for (key, nested) in object {
        let path = join_path(prefix, key);
        if is_financial_time_series(nested) {
            found.push(path);
        } else if nested.is_object() {
            collect_series_paths(nested, &path, found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alpha_vantage_daily() -> Value {
        json!({
            "2025-01-02": {"1. open": "11", "2. high": "13", "3. low": "10", "4. close": "12"},
            "2025-01-01": {"1. open": "10", "2. high": "12", "3. low": "9", "4. close": "11"}
        })
    }

    #[test]
    fn detects_numbered_ohlc_keys() {
        assert!(is_financial_time_series(&alpha_vantage_daily()));
    }

    #[test]
    fn falls_back_to_numeric_field_count() {
        let series = json!({
            "2025-01-01": {"a": "1.5", "b": 2},
            "2025-01-02": {"a": "1.6", "b": 3}
        });
        assert!(is_financial_time_series(&series));
    }

    #[test]
    fn rejects_non_series_shapes() {
        assert!(!is_financial_time_series(&json!([1, 2])));
        assert!(!is_financial_time_series(&json!("2025-01-01")));
        assert!(!is_financial_time_series(&json!({"2025-01-01": {"open": 1, "close": 2}})));
        assert!(!is_financial_time_series(&json!({
            "2025-01-01": {"open": 1, "close": 2},
            "latest": {"open": 1, "close": 2}
        })));
        assert!(!is_financial_time_series(&json!({
            "2025-01-01": {"open": 1, "close": 2},
            "2025-01-02": [1, 2]
        })));
        assert!(!is_financial_time_series(&json!({
            "2025-01-01": {"label": "x"},
            "2025-01-02": {"label": "y"}
        })));
    }

    #[test]
    fn normalize_adds_date_and_sorts_ascending() {
        let records = normalize(&alpha_vantage_daily(), DEFAULT_DATE_KEY);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["date"], "2025-01-01");
        assert_eq!(records[1]["date"], "2025-01-02");
        assert_eq!(records[0]["4. close"], "11");
        assert_eq!(records[0].as_object().map(Map::len), Some(5));
    }

    #[test]
    fn normalize_honours_custom_date_key() {
        let records = normalize(&alpha_vantage_daily(), "timestamp");
        assert!(records[0].get("timestamp").is_some());
        assert!(records[0].get("date").is_none());
    }

    #[test]
    fn integer_timestamps_sort_numerically() {
        let series = json!({
            "1700000000": {"open": 1, "close": 2},
            "999999999": {"open": 1, "close": 2},
            "1600000000": {"open": 1, "close": 2}
        });
        let dates: Vec<_> = normalize(&series, "date")
            .into_iter()
            .map(|record| record["date"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(dates, vec!["999999999", "1600000000", "1700000000"]);
    }

    #[test]
    fn comparator_uses_three_tiers_in_order() {
        assert_eq!(compare_date_keys("12/31/2024", "2025-01-01"), Ordering::Less);
        assert_eq!(compare_date_keys("100", "20"), Ordering::Greater);
        assert_eq!(compare_date_keys("b-key", "a-key"), Ordering::Greater);
    }

    #[test]
    fn value_at_path_handles_keys_with_spaces_and_arrays() {
        let document = json!({
            "Meta Data": {"1. Information": "Daily"},
            "Time Series (Daily)": alpha_vantage_daily(),
            "rows": [{"x": 1}, {"x": 2}]
        });

        assert!(value_at_path(&document, "Time Series (Daily)").is_some());
        assert_eq!(value_at_path(&document, "rows.1.x"), Some(&json!(2)));
        assert_eq!(value_at_path(&document, "Meta Data.1. Information"), Some(&json!("Daily")));
        assert!(value_at_path(&document, "missing.path").is_none());
    }

    #[test]
    fn detect_series_paths_finds_nested_series() {
        let document = json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": alpha_vantage_daily()
        });
        assert_eq!(detect_series_paths(&document), vec!["Time Series (Daily)"]);
        assert_eq!(detect_series_paths(&alpha_vantage_daily()), vec![""]);
    }
}
