//! Behavior-driven tests for discovery and normalization
//!
//! These tests verify how sample documents are described and reshaped
//! before any transport is involved.

use ferrofeed_core::{
    build_batch, discover, flatten, is_financial_time_series, normalize, unflatten, BatchMetadata,
    FieldType, Scalar, SourceConfig, DEFAULT_DATE_KEY,
};
use serde_json::{json, Value};

fn alpha_vantage_daily() -> Value {
    json!({
        "2025-01-01": {"1. open": "10", "2. high": "12", "3. low": "9", "4. close": "11"},
        "2025-01-02": {"1. open": "11", "2. high": "13", "3. low": "10", "4. close": "12"}
    })
}

fn assert_only_scalars(value: &Value) {
    let object = value.as_object().expect("unflatten yields an object");
    for nested in object.values() {
        assert!(!nested.is_array(), "arrays must not survive flattening");
        if nested.is_object() {
            assert_only_scalars(nested);
        }
    }
}

// =============================================================================
// Discovery: already flat documents
// =============================================================================

#[test]
fn when_document_is_already_flat_system_types_fields_and_keeps_values() {
    // Given: A flat price document
    let document = json!({"price": 1234.56, "updated": "2025-12-26"});

    // When: The system discovers and flattens it
    let discovery = discover(&document);
    let record = flatten(&document, "");

    // Then: Price is a number, updated is a date, values pass through unchanged
    assert_eq!(discovery.paths, vec!["price", "updated"]);
    assert_eq!(discovery.fields[0].field_type, FieldType::Number);
    assert_eq!(discovery.fields[1].field_type, FieldType::Date);
    assert_eq!(record.len(), 2);
    assert_eq!(record["price"].as_f64(), Some(1234.56));
    assert_eq!(record["updated"], Scalar::from("2025-12-26"));
}

#[test]
fn when_strings_look_like_other_types_system_infers_semantic_types() {
    // Given: Strings carrying booleans, numbers, timestamps and invalid dates
    let document = json!({
        "flag": "TRUE",
        "amount": " 42.5 ",
        "epoch": "1735689600",
        "bad_date": "2025-02-30",
        "label": "EURUSD"
    });

    // When: The system discovers the document
    let discovery = discover(&document);
    let types: Vec<FieldType> = discovery.fields.iter().map(|f| f.field_type).collect();

    // Then: Each string is classified by content, and impossible dates fall back
    assert_eq!(
        types,
        vec![
            FieldType::Boolean,
            FieldType::Number,
            FieldType::Date,
            FieldType::String,
            FieldType::String
        ]
    );
}

// =============================================================================
// Financial series: detection and normalization
// =============================================================================

#[test]
fn when_document_is_daily_ohlc_series_system_normalizes_in_date_order() {
    // Given: An Alpha Vantage style daily series
    let series = alpha_vantage_daily();

    // When: The system checks and normalizes it
    let detected = is_financial_time_series(&series);
    let records = normalize(&series, DEFAULT_DATE_KEY);

    // Then: Two ascending records carry a date key plus the four OHLC keys
    assert!(detected);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["date"], "2025-01-01");
    assert_eq!(records[1]["date"], "2025-01-02");
    for record in &records {
        let keys: Vec<&str> = record
            .as_object()
            .expect("record is an object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["date", "1. open", "2. high", "3. low", "4. close"]);
    }
}

#[test]
fn when_series_keys_are_out_of_order_system_sorts_ascending() {
    // Given: A series listed newest first with mixed calendar formats
    let series = json!({
        "2025/01/03": {"open": 3, "close": 4},
        "2025-01-01": {"open": 1, "close": 2},
        "01/02/2025": {"open": 2, "close": 3}
    });

    // When: The system normalizes it
    let dates: Vec<String> = normalize(&series, "day")
        .iter()
        .map(|record| record["day"].as_str().unwrap_or_default().to_owned())
        .collect();

    // Then: Records follow calendar order regardless of key format
    assert_eq!(dates, vec!["2025-01-01", "01/02/2025", "2025/01/03"]);
}

#[test]
fn when_object_is_keyed_by_dates_without_market_fields_system_does_not_treat_it_as_series() {
    // Given: Date-keyed objects holding only labels
    let calendar = json!({
        "2025-01-01": {"holiday": "New Year"},
        "2025-12-25": {"holiday": "Christmas"}
    });

    // When / Then: Detection rejects it
    assert!(!is_financial_time_series(&calendar));
}

#[test]
fn when_financial_path_is_configured_batch_contains_normalized_rows() {
    // Given: A response with metadata and a nested daily series
    let payload = json!({
        "Meta Data": {"2. Symbol": "IBM"},
        "Time Series (Daily)": alpha_vantage_daily()
    });
    let config = SourceConfig::new("https://www.alphavantage.co/query")
        .with_financial_data_path("Time Series (Daily)");

    // When: The payload runs through the update pipeline
    let batch = build_batch(
        &payload,
        &config,
        BatchMetadata {
            source_id: String::from("ibm"),
            source: config.endpoint.clone(),
            transport: None,
        },
    );

    // Then: One flat row per day, oldest first
    assert_eq!(batch.total_count, 2);
    assert_eq!(batch.records[0]["date"], Scalar::from("2025-01-01"));
    assert_eq!(batch.records[1]["4. close"], Scalar::from("12"));
}

// =============================================================================
// Flattening: only scalars survive and the shape round-trips
// =============================================================================

#[test]
fn when_document_is_deeply_nested_flatten_leaves_no_nested_values() {
    // Given: A document with nested objects, arrays and nulls
    let document = json!({
        "quote": {"bid": {"px": 1.1, "size": 5}, "ask": {"px": 1.2, "size": 3}},
        "venues": ["a", "b"],
        "halted": null,
        "meta": {"tags": [{"k": "v"}], "ok": true}
    });

    // When: The system flattens and re-nests it
    let record = flatten(&document, "");
    let restored = unflatten(&record);

    // Then: Keys are dotted paths, arrays became strings, nesting is restored
    assert_eq!(record["quote.bid.px"].as_f64(), Some(1.1));
    assert_eq!(record["venues"], Scalar::from(r#"["a","b"]"#));
    assert_eq!(record["halted"], Scalar::Null);
    assert_eq!(restored["quote"]["ask"]["size"], json!(3));
    assert_eq!(restored["meta"]["ok"], json!(true));
    assert_only_scalars(&restored);
}

#[test]
fn when_array_response_mixes_objects_and_scalars_each_element_yields_a_record() {
    // Given: An array payload with a non-object element
    let payload = json!([{"id": 1}, 7, {"id": 3, "extra": {"x": 1}}]);
    let config = SourceConfig::new("https://api.example.com/items");

    // When: The payload runs through the pipeline
    let batch = build_batch(
        &payload,
        &config,
        BatchMetadata {
            source_id: String::from("items"),
            source: config.endpoint.clone(),
            transport: None,
        },
    );

    // Then: Every element maps to one record, the scalar to an empty one
    assert_eq!(batch.total_count, 3);
    assert!(batch.records[1].is_empty());
    assert!(batch.records[2].contains_key("extra.x"));
}
