//! Mock upstream data source
//!
//! Generates plausible records per data type with the field sets the
//! anonymization transforms operate on. Production deployments replace
//! this with the real data lake adapter behind the same trait.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{json, Value};

use crate::errors::{CoreError, CoreResult};
use crate::store::UserDataSource;

/// Data types the mock source can serve
pub const KNOWN_DATA_TYPES: &[&str] = &[
    "app_usage",
    "location",
    "browsing_history",
    "health",
    "financial",
];

#[derive(Default)]
pub struct MockDataSource;

impl MockDataSource {
    pub fn new() -> Self {
        Self
    }

    fn app_usage(user_id: &str) -> Vec<Value> {
        let apps = [
            "com.example.mail",
            "com.example.browser",
            "com.example.maps",
            "com.example.social",
            "com.example.game",
        ];
        let actions = ["open", "close", "background", "foreground"];
        let mut rng = rand::thread_rng();

        (0..20)
            .map(|_| {
                let ts = Utc::now() - Duration::hours(rng.gen_range(0..72));
                json!({
                    "user_id": user_id,
                    "device_id": format!("device_{}", rng.gen_range(1..=3)),
                    "app_id": apps[rng.gen_range(0..apps.len())],
                    "timestamp": ts.to_rfc3339(),
                    "duration": rng.gen_range(10..=3600),
                    "action": actions[rng.gen_range(0..actions.len())],
                    "session_id": format!("session_{}", rng.gen_range(1..=5)),
                    "battery_level": rng.gen_range(10..=100),
                })
            })
            .collect()
    }

    fn location(user_id: &str) -> Vec<Value> {
        let (base_lat, base_lon) = (40.7128_f64, -74.0060_f64);
        let mut rng = rand::thread_rng();

        (0..15)
            .map(|_| {
                let ts = Utc::now() - Duration::hours(rng.gen_range(0..48));
                json!({
                    "user_id": user_id,
                    "device_id": format!("device_{}", rng.gen_range(1..=3)),
                    "timestamp": ts.to_rfc3339(),
                    "latitude": base_lat + rng.gen_range(-0.1..0.1),
                    "longitude": base_lon + rng.gen_range(-0.1..0.1),
                    "accuracy": rng.gen_range(5..=100),
                    "altitude": rng.gen_range(0..=100),
                    "speed": rng.gen_range(0..=30),
                    "session_id": format!("session_{}", rng.gen_range(1..=5)),
                    "ip_address": format!("192.168.1.{}", rng.gen_range(1..=255)),
                })
            })
            .collect()
    }

    fn browsing_history(user_id: &str) -> Vec<Value> {
        let domains = [
            "example.com",
            "news.example.com",
            "shop.example.com",
            "social.example.com",
            "mail.example.com",
        ];
        let mut rng = rand::thread_rng();

        (0..25)
            .map(|_| {
                let domain = domains[rng.gen_range(0..domains.len())];
                let ts = Utc::now() - Duration::hours(rng.gen_range(0..96));
                json!({
                    "user_id": user_id,
                    "device_id": format!("device_{}", rng.gen_range(1..=3)),
                    "timestamp": ts.to_rfc3339(),
                    "url": format!("https://{}/page{}", domain, rng.gen_range(1..=100)),
                    "page_title": format!("{} - Page", domain),
                    "duration": rng.gen_range(5..=1800),
                    "session_id": format!("session_{}", rng.gen_range(1..=5)),
                    "ip_address": format!("192.168.1.{}", rng.gen_range(1..=255)),
                })
            })
            .collect()
    }

    fn health(user_id: &str) -> Vec<Value> {
        let types = ["heart_rate", "steps", "sleep", "weight"];
        let units = ["bpm", "count", "hours", "kg"];
        let mut rng = rand::thread_rng();

        (0..30)
            .map(|_| {
                let idx = rng.gen_range(0..types.len());
                let measurement: f64 = match types[idx] {
                    "heart_rate" => rng.gen_range(60.0..100.0),
                    "steps" => rng.gen_range(1000.0..15000.0),
                    "sleep" => rng.gen_range(4.0..10.0),
                    _ => rng.gen_range(50.0..100.0),
                };
                let ts = Utc::now() - Duration::hours(rng.gen_range(0..168));
                json!({
                    "user_id": user_id,
                    "timestamp": ts.to_rfc3339(),
                    "type": types[idx],
                    "measurement": (measurement * 10.0).round() / 10.0,
                    "unit": units[idx],
                    "device_id": format!("health_device_{}", rng.gen_range(1..=3)),
                    "age": rng.gen_range(25..=65),
                    "session_id": format!("health_session_{}", rng.gen_range(1..=5)),
                })
            })
            .collect()
    }

    fn financial(user_id: &str) -> Vec<Value> {
        let categories = [
            "groceries",
            "entertainment",
            "utilities",
            "dining",
            "travel",
        ];
        let mut rng = rand::thread_rng();

        (0..40)
            .map(|_| {
                let ts = Utc::now() - Duration::days(rng.gen_range(0..60));
                json!({
                    "user_id": user_id,
                    "timestamp": ts.to_rfc3339(),
                    "type": "purchase",
                    "category": categories[rng.gen_range(0..categories.len())],
                    "amount": (rng.gen_range(5.0..500.0) * 100.0_f64).round() / 100.0,
                    "currency": "USD",
                    "account_id": format!("acct_{}", rng.gen_range(1000..=9999)),
                    "email": format!("user{}@example.com", rng.gen_range(100..=999)),
                })
            })
            .collect()
    }
}

#[async_trait]
impl UserDataSource for MockDataSource {
    async fn fetch(&self, user_id: &str, data_type: &str) -> CoreResult<Vec<Value>> {
        match data_type {
            "app_usage" => Ok(Self::app_usage(user_id)),
            "location" => Ok(Self::location(user_id)),
            "browsing_history" => Ok(Self::browsing_history(user_id)),
            "health" => Ok(Self::health(user_id)),
            "financial" => Ok(Self::financial(user_id)),
            other => Err(CoreError::validation(format!(
                "Unknown data type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_types_serve_records() {
        let source = MockDataSource::new();
        for data_type in KNOWN_DATA_TYPES {
            let records = source.fetch("u1", data_type).await.unwrap();
            assert!(!records.is_empty(), "{} should serve records", data_type);
            for record in &records {
                assert!(record.get("timestamp").is_some());
                assert_eq!(record["user_id"], "u1");
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let source = MockDataSource::new();
        assert!(source.fetch("u1", "dreams").await.is_err());
    }
}
