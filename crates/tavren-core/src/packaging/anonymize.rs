//! Tiered anonymization transforms
//!
//! Each level applies all transforms of the levels below it:
//!
//! - minimal: pseudonymize direct identifiers, truncate IPs, mask emails
//! - moderate: generalize timestamps to hour precision, round coordinates
//!   to 2 decimals, health measurements to integers, currency to tens
//! - strong_with_longitudinal: day-precision timestamps, 1-decimal
//!   coordinates, 10-year age buckets, currency buckets; session ids are
//!   rewritten through a package-local map so intra-user sequences stay
//!   linkable
//! - strong: additionally break longitudinal linkability with fresh random
//!   session and user identifiers per record

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto::pseudonymize;
use crate::entities::AnonymizationLevel;

/// Apply the transform stack for the given level
pub fn anonymize_records(
    records: Vec<Value>,
    data_type: &str,
    level: AnonymizationLevel,
) -> Vec<Value> {
    match level {
        AnonymizationLevel::Minimal => apply(records, data_type, Stage::Minimal),
        AnonymizationLevel::Moderate => apply(records, data_type, Stage::Moderate),
        AnonymizationLevel::StrongWithLongitudinal => {
            apply(records, data_type, Stage::Strong { longitudinal: true })
        }
        AnonymizationLevel::Strong => apply(records, data_type, Stage::Strong { longitudinal: false }),
    }
}

enum Stage {
    Minimal,
    Moderate,
    Strong { longitudinal: bool },
}

fn apply(records: Vec<Value>, data_type: &str, stage: Stage) -> Vec<Value> {
    let mut session_map: HashMap<String, String> = HashMap::new();

    records
        .into_iter()
        .map(|record| {
            let mut obj = match record {
                Value::Object(obj) => obj,
                other => return other,
            };

            minimal(&mut obj);
            match &stage {
                Stage::Minimal => {}
                Stage::Moderate => moderate(&mut obj, data_type),
                Stage::Strong { longitudinal } => {
                    moderate(&mut obj, data_type);
                    strong(&mut obj, data_type, *longitudinal, &mut session_map);
                }
            }
            Value::Object(obj)
        })
        .collect()
}

fn minimal(obj: &mut Map<String, Value>) {
    for key in ["user_id", "device_id"] {
        if let Some(value) = obj.get(key).and_then(Value::as_str) {
            let pseudonym = pseudonymize(value);
            obj.insert(key.to_string(), Value::String(pseudonym));
        }
    }

    if let Some(ip) = obj.get("ip_address").and_then(Value::as_str) {
        obj.insert("ip_address".to_string(), Value::String(truncate_ip(ip)));
    }

    if let Some(email) = obj.get("email").and_then(Value::as_str) {
        obj.insert("email".to_string(), Value::String(mask_email(email)));
    }
}

fn moderate(obj: &mut Map<String, Value>, data_type: &str) {
    if let Some(ts) = parse_timestamp(obj) {
        let truncated = ts
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts);
        obj.insert(
            "timestamp".to_string(),
            Value::String(truncated.to_rfc3339()),
        );
    }

    round_coordinate(obj, "latitude", 2);
    round_coordinate(obj, "longitude", 2);

    if data_type == "health" {
        if let Some(measurement) = obj.get("measurement").and_then(Value::as_f64) {
            obj.insert(
                "measurement".to_string(),
                Value::from(measurement.round() as i64),
            );
        }
    }

    if data_type == "financial" {
        if let Some(amount) = obj.get("amount").and_then(Value::as_f64) {
            obj.insert(
                "amount".to_string(),
                Value::from(((amount / 10.0).round() * 10.0) as i64),
            );
        }
    }
}

fn strong(
    obj: &mut Map<String, Value>,
    data_type: &str,
    preserve_longitudinal: bool,
    session_map: &mut HashMap<String, String>,
) {
    if let Some(ts) = parse_timestamp(obj) {
        let truncated = ts
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts);
        obj.insert(
            "timestamp".to_string(),
            Value::String(truncated.to_rfc3339()),
        );
    }

    round_coordinate(obj, "latitude", 1);
    round_coordinate(obj, "longitude", 1);

    if data_type == "health" {
        if let Some(age) = obj.get("age").and_then(Value::as_f64) {
            let decade = (age as i64 / 10) * 10;
            obj.insert(
                "age".to_string(),
                Value::String(format!("{}-{}", decade, decade + 9)),
            );
        }
    }

    if data_type == "financial" {
        if let Some(amount) = obj.get("amount").and_then(Value::as_f64) {
            obj.insert(
                "amount".to_string(),
                Value::String(currency_bucket(amount).to_string()),
            );
        }
    }

    if preserve_longitudinal {
        if let Some(session) = obj.get("session_id").and_then(Value::as_str) {
            let next = session_map.len() + 1;
            let replacement = session_map
                .entry(session.to_string())
                .or_insert_with(|| format!("session_{}", next))
                .clone();
            obj.insert("session_id".to_string(), Value::String(replacement));
        }
    } else {
        if obj.contains_key("session_id") {
            obj.insert(
                "session_id".to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        if obj.contains_key("user_id") {
            let tag = rand::thread_rng().gen_range(1000..=9999);
            obj.insert("user_id".to_string(), Value::String(format!("anon_{}", tag)));
        }
    }
}

fn parse_timestamp(obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
    obj.get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn round_coordinate(obj: &mut Map<String, Value>, key: &str, decimals: u32) {
    if let Some(coord) = obj.get(key).and_then(Value::as_f64) {
        let factor = 10f64.powi(decimals as i32);
        obj.insert(
            key.to_string(),
            Value::from((coord * factor).round() / factor),
        );
    }
}

/// Zero the host portion of an IPv4 address; anything else collapses to
/// the null address
fn truncate_ip(ip: &str) -> String {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok()) {
        format!("{}.{}.0.0", parts[0], parts[1])
    } else {
        "0.0.0.0".to_string()
    }
}

/// Reduce the localpart to its first character plus asterisks
fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => match local.chars().next() {
            Some(first) => format!("{}*****@{}", first, domain),
            None => "*****".to_string(),
        },
        None => "*****".to_string(),
    }
}

fn currency_bucket(amount: f64) -> &'static str {
    if amount < 100.0 {
        "<100"
    } else if amount < 500.0 {
        "100-500"
    } else if amount < 1000.0 {
        "500-1000"
    } else {
        ">1000"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decimals(value: f64) -> usize {
        let s = format!("{}", value);
        s.split('.').nth(1).map(|d| d.len()).unwrap_or(0)
    }

    #[test]
    fn test_minimal_pseudonymizes_identifiers() {
        let records = vec![json!({
            "user_id": "u1",
            "device_id": "device_1",
            "ip_address": "192.168.1.77",
            "email": "alice@example.com",
            "payload": "kept",
        })];
        let out = anonymize_records(records, "app_usage", AnonymizationLevel::Minimal);
        let rec = out[0].as_object().unwrap();

        assert_ne!(rec["user_id"], "u1");
        assert_eq!(rec["user_id"].as_str().unwrap().len(), 16);
        assert_eq!(rec["ip_address"], "192.168.0.0");
        assert_eq!(rec["email"], "a*****@example.com");
        assert_eq!(rec["payload"], "kept");
    }

    #[test]
    fn test_minimal_pseudonym_is_stable() {
        let records = vec![json!({"user_id": "u1"}), json!({"user_id": "u1"})];
        let out = anonymize_records(records, "app_usage", AnonymizationLevel::Minimal);
        assert_eq!(out[0]["user_id"], out[1]["user_id"]);
    }

    #[test]
    fn test_malformed_ip_zeroed() {
        let records = vec![json!({"ip_address": "fe80::1"})];
        let out = anonymize_records(records, "location", AnonymizationLevel::Minimal);
        assert_eq!(out[0]["ip_address"], "0.0.0.0");
    }

    #[test]
    fn test_moderate_generalizes_time_and_coords() {
        let records = vec![json!({
            "timestamp": "2025-06-15T14:37:22Z",
            "latitude": 40.712845,
            "longitude": -74.006012,
        })];
        let out = anonymize_records(records, "location", AnonymizationLevel::Moderate);
        let rec = out[0].as_object().unwrap();

        let ts = rec["timestamp"].as_str().unwrap();
        assert!(ts.starts_with("2025-06-15T14:00:00"));
        assert_eq!(rec["latitude"], 40.71);
        assert_eq!(rec["longitude"], -74.01);
    }

    #[test]
    fn test_moderate_rounds_health_and_currency() {
        let health = anonymize_records(
            vec![json!({"measurement": 71.6})],
            "health",
            AnonymizationLevel::Moderate,
        );
        assert_eq!(health[0]["measurement"], 72);

        let financial = anonymize_records(
            vec![json!({"amount": 123.4})],
            "financial",
            AnonymizationLevel::Moderate,
        );
        assert_eq!(financial[0]["amount"], 120);
    }

    #[test]
    fn test_strong_with_longitudinal_keeps_sessions_linkable() {
        let records = vec![
            json!({"timestamp": "2025-06-15T14:37:22Z", "latitude": 40.712845, "longitude": -74.0061, "session_id": "s-abc", "user_id": "u1"}),
            json!({"timestamp": "2025-06-16T09:10:00Z", "latitude": 40.7311, "longitude": -74.0155, "session_id": "s-abc", "user_id": "u1"}),
            json!({"timestamp": "2025-06-16T10:00:00Z", "latitude": 40.70, "longitude": -74.00, "session_id": "s-def", "user_id": "u1"}),
        ];
        let out = anonymize_records(
            records,
            "location",
            AnonymizationLevel::StrongWithLongitudinal,
        );

        // Same input session maps to the same rewritten id; distinct stays
        // distinct
        assert_eq!(out[0]["session_id"], out[1]["session_id"]);
        assert_ne!(out[0]["session_id"], out[2]["session_id"]);

        for rec in &out {
            let ts = rec["timestamp"].as_str().unwrap();
            assert!(ts.contains("T00:00:00"), "day precision expected: {}", ts);
            assert!(decimals(rec["latitude"].as_f64().unwrap()) <= 1);
            assert!(decimals(rec["longitude"].as_f64().unwrap()) <= 1);
        }
    }

    #[test]
    fn test_strong_breaks_longitudinal_linkability() {
        let records = vec![
            json!({"session_id": "s-abc", "user_id": "u1"}),
            json!({"session_id": "s-abc", "user_id": "u1"}),
        ];
        let out = anonymize_records(records, "app_usage", AnonymizationLevel::Strong);

        assert_ne!(out[0]["session_id"], out[1]["session_id"]);
        assert!(out[0]["user_id"].as_str().unwrap().starts_with("anon_"));
    }

    #[test]
    fn test_strong_buckets_age_and_currency() {
        let health = anonymize_records(
            vec![json!({"age": 34})],
            "health",
            AnonymizationLevel::Strong,
        );
        assert_eq!(health[0]["age"], "30-39");

        let financial = anonymize_records(
            vec![
                json!({"amount": 42.0}),
                json!({"amount": 250.0}),
                json!({"amount": 700.0}),
                json!({"amount": 1500.0}),
            ],
            "financial",
            AnonymizationLevel::Strong,
        );
        assert_eq!(financial[0]["amount"], "<100");
        assert_eq!(financial[1]["amount"], "100-500");
        assert_eq!(financial[2]["amount"], "500-1000");
        assert_eq!(financial[3]["amount"], ">1000");
    }
}
