//! Package schema normalization
//!
//! Ensures every record carries the required fields for its data type,
//! filling gaps with documented defaults. Records that are not objects
//! cannot be normalized and reject the package.

use chrono::Utc;
use serde_json::Value;

use crate::errors::{CoreError, CoreResult};

/// Current schema version for every data type
pub const SCHEMA_VERSION: &str = "1.0";

/// Required fields per data type
pub fn required_fields(data_type: &str) -> &'static [&'static str] {
    match data_type {
        "app_usage" => &["app_id", "timestamp", "duration", "action"],
        "location" => &["timestamp", "latitude", "longitude", "accuracy"],
        "browsing_history" => &["timestamp", "url", "duration", "page_title"],
        "health" => &["timestamp", "type", "measurement", "unit"],
        "financial" => &["timestamp", "type", "amount", "currency"],
        _ => &[],
    }
}

/// Default for a missing required field
fn default_value(field: &str, data_type: &str) -> Value {
    match field {
        "timestamp" => Value::String(Utc::now().to_rfc3339()),
        "duration" if data_type == "app_usage" => Value::from(0),
        "action" if data_type == "app_usage" => Value::String("unknown".to_string()),
        _ => Value::Null,
    }
}

/// Normalize records to the data type's schema
pub fn format_records(records: Vec<Value>, data_type: &str) -> CoreResult<Vec<Value>> {
    let fields = required_fields(data_type);

    records
        .into_iter()
        .map(|record| {
            let mut obj = match record {
                Value::Object(obj) => obj,
                other => {
                    return Err(CoreError::validation(format!(
                        "Record cannot be normalized to {} schema: expected object, got {}",
                        data_type,
                        type_name(&other)
                    )));
                }
            };

            for field in fields {
                if !obj.contains_key(*field) {
                    obj.insert(field.to_string(), default_value(field, data_type));
                }
            }
            Ok(Value::Object(obj))
        })
        .collect()
}

/// Completeness score: share of non-null values across all fields
pub fn data_quality_score(records: &[Value]) -> f64 {
    let mut total = 0usize;
    let mut filled = 0usize;

    for record in records {
        if let Value::Object(obj) = record {
            for value in obj.values() {
                total += 1;
                if !value.is_null() {
                    filled += 1;
                }
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        (filled as f64 / total as f64 * 100.0).round() / 100.0
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_get_defaults() {
        let records = vec![json!({"app_id": "com.example.mail"})];
        let out = format_records(records, "app_usage").unwrap();
        let rec = out[0].as_object().unwrap();

        assert_eq!(rec["duration"], 0);
        assert_eq!(rec["action"], "unknown");
        assert!(rec["timestamp"].is_string());
    }

    #[test]
    fn test_non_object_record_rejects_package() {
        let records = vec![json!("just a string")];
        let err = format_records(records, "location").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_unknown_data_type_passes_records_through() {
        let records = vec![json!({"anything": true})];
        let out = format_records(records, "custom").unwrap();
        assert_eq!(out[0]["anything"], true);
    }

    #[test]
    fn test_quality_score() {
        let records = vec![json!({"a": 1, "b": null}), json!({"a": 2, "b": 3})];
        assert_eq!(data_quality_score(&records), 0.75);
        assert_eq!(data_quality_score(&[]), 0.0);
    }
}
