use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Development fallbacks that must never survive into production
const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing")]
    MissingVariable(String),
    #[error("Failed to parse environment variable {variable}: {message}")]
    ParseError { variable: String, message: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub secrets: SecretsConfig,
    pub redis_url: Option<String>,
    pub limits: LimitsConfig,
    pub trust: TrustConfig,
    pub logging: LoggingConfig,
    pub ledger_log_path: String,
    pub encrypt_data_packages: bool,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Process-wide keys, immutable after init. Rotation requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    pub jwt_secret_key: String,
    pub data_encryption_key: String,
    pub admin_api_key: String,
    pub export_hmac_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub access_token_expire_minutes: i64,
    pub minimum_payout_threshold: f64,
    /// DSR exports per user per day (admins bypass)
    pub dsr_export_per_day: u64,
    /// Insight requests per user per five-minute window
    pub insight_per_window: u64,
    pub insight_window_seconds: u64,
    /// Simultaneous heavy insight computations per user
    pub insight_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub low_threshold: f64,
    pub high_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError {
            variable: name.to_string(),
            message: e.to_string(),
        })
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv();

        let server = ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8080")?,
            workers: env::var("SERVER_WORKERS")
                .ok()
                .map(|v| {
                    v.parse().map_err(|e: std::num::ParseIntError| {
                        ConfigError::ParseError {
                            variable: "SERVER_WORKERS".to_string(),
                            message: e.to_string(),
                        }
                    })
                })
                .transpose()?,
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "10")?,
        };

        let secrets = SecretsConfig {
            jwt_secret_key: env::var("JWT_SECRET_KEY").unwrap_or_else(|_| DEV_SECRET.to_string()),
            data_encryption_key: env::var("DATA_ENCRYPTION_KEY")
                .unwrap_or_else(|_| DEV_SECRET.to_string()),
            admin_api_key: env::var("ADMIN_API_KEY").unwrap_or_else(|_| DEV_SECRET.to_string()),
            export_hmac_key: env::var("EXPORT_HMAC_KEY").unwrap_or_else(|_| DEV_SECRET.to_string()),
        };

        let limits = LimitsConfig {
            access_token_expire_minutes: parse_var("ACCESS_TOKEN_EXPIRE_MINUTES", "30")?,
            minimum_payout_threshold: parse_var("MINIMUM_PAYOUT_THRESHOLD", "5.0")?,
            dsr_export_per_day: parse_var("DSR_EXPORT_PER_DAY", "1")?,
            insight_per_window: parse_var("INSIGHT_RATE_LIMIT", "5")?,
            insight_window_seconds: parse_var("INSIGHT_RATE_WINDOW_SECONDS", "300")?,
            insight_concurrency: parse_var("INSIGHT_CONCURRENCY", "2")?,
        };

        let trust = TrustConfig {
            low_threshold: parse_var("LOW_TRUST_THRESHOLD", "0.3")?,
            high_threshold: parse_var("HIGH_TRUST_THRESHOLD", "0.7")?,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            },
        };

        Ok(ApiConfig {
            server,
            database,
            secrets,
            redis_url: env::var("REDIS_URL").ok(),
            limits,
            trust,
            logging,
            ledger_log_path: env::var("LEDGER_LOG_PATH")
                .unwrap_or_else(|_| "data/consent_ledger.jsonl".to_string()),
            encrypt_data_packages: parse_var("ENCRYPT_DATA_PACKAGES", "true")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Fail fast when a production deployment is missing secrets or left
    /// them at a development default
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "Server port cannot be 0".to_string(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Database URL cannot be empty".to_string(),
            ));
        }
        if self.trust.low_threshold >= self.trust.high_threshold {
            return Err(ConfigError::InvalidConfig(
                "LOW_TRUST_THRESHOLD must be below HIGH_TRUST_THRESHOLD".to_string(),
            ));
        }

        if self.is_production() {
            let secrets = [
                ("JWT_SECRET_KEY", &self.secrets.jwt_secret_key),
                ("DATA_ENCRYPTION_KEY", &self.secrets.data_encryption_key),
                ("ADMIN_API_KEY", &self.secrets.admin_api_key),
                ("EXPORT_HMAC_KEY", &self.secrets.export_hmac_key),
            ];
            for (name, value) in secrets {
                if value.is_empty() || value == DEV_SECRET {
                    return Err(ConfigError::InvalidConfig(format!(
                        "{} must be set in production",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
            },
            database: DatabaseConfig {
                url: "sqlite://tavren.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            secrets: SecretsConfig {
                jwt_secret_key: DEV_SECRET.to_string(),
                data_encryption_key: DEV_SECRET.to_string(),
                admin_api_key: DEV_SECRET.to_string(),
                export_hmac_key: DEV_SECRET.to_string(),
            },
            redis_url: None,
            limits: LimitsConfig {
                access_token_expire_minutes: 30,
                minimum_payout_threshold: 5.0,
                dsr_export_per_day: 1,
                insight_per_window: 5,
                insight_window_seconds: 300,
                insight_concurrency: 2,
            },
            trust: TrustConfig {
                low_threshold: 0.3,
                high_threshold: 0.7,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            ledger_log_path: "data/consent_ledger.jsonl".to_string(),
            encrypt_data_packages: false,
            environment: "development".to_string(),
        }
    }
}
