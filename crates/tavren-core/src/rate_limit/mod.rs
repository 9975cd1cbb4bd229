//! Per-key fixed-window rate limiting
//!
//! Redis-backed when available, with an in-process fallback map guarded by
//! a mutex. A Redis failure mid-flight falls back to memory rather than
//! denying or allowing unconditionally. Invalid Redis URL schemes
//! downgrade to the fallback with a warning instead of failing boot.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::errors::CoreResult;

/// Accepted Redis URL schemes
const REDIS_SCHEMES: [&str; 3] = ["redis://", "rediss://", "unix://"];

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub current: u64,
    pub ttl_remaining: u64,
}

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    count: u64,
    expires_at: f64,
}

/// Fixed-window counter keyed by caller identity
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    prefix: String,
    memory: Mutex<HashMap<String, MemoryEntry>>,
}

impl RateLimiter {
    /// Build with an optional Redis connection
    pub fn new(redis: Option<ConnectionManager>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to Redis if the URL is present and its scheme is valid;
    /// otherwise run on the in-memory fallback.
    pub async fn connect(redis_url: Option<&str>, prefix: impl Into<String>) -> Self {
        let redis = match redis_url {
            Some(url) if REDIS_SCHEMES.iter().any(|s| url.starts_with(s)) => {
                match redis::Client::open(url) {
                    Ok(client) => match ConnectionManager::new(client).await {
                        Ok(manager) => {
                            info!("Redis rate limiter initialized");
                            Some(manager)
                        }
                        Err(e) => {
                            warn!(error = %e, "Redis unavailable; using in-memory rate limiting");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Invalid Redis URL; using in-memory rate limiting");
                        None
                    }
                }
            }
            Some(url) => {
                warn!(
                    url,
                    "Redis disabled - URL scheme must be one of redis://, rediss://, unix://"
                );
                None
            }
            None => None,
        };
        Self::new(redis, prefix)
    }

    /// Whether the limiter is running against Redis or the fallback map
    pub fn backend(&self) -> &'static str {
        if self.redis.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn now_secs() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Count a request against the key's window: first request opens the
    /// window with count 1; below the limit increments; at the limit
    /// denies. At most `limit` calls are allowed per window.
    pub async fn allow(&self, key: &str, limit: u64, window_seconds: u64) -> RateLimitDecision {
        let full_key = self.full_key(key);

        if let Some(redis) = &self.redis {
            match self.redis_allow(redis.clone(), &full_key, limit, window_seconds).await {
                Ok(decision) => return decision,
                Err(e) => {
                    error!(error = %e, "Redis rate-limit check failed; falling back to memory");
                }
            }
        }
        self.memory_allow(&full_key, limit, window_seconds).await
    }

    async fn redis_allow(
        &self,
        mut conn: ConnectionManager,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> CoreResult<RateLimitDecision> {
        let (current, ttl): (Option<u64>, i64) = redis::pipe()
            .get(key)
            .ttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::errors::CoreError::dependency(e.to_string()))?;

        let current = current.unwrap_or(0);
        if current == 0 || ttl <= 0 {
            let _: () = conn
                .set_ex(key, 1u64, window_seconds)
                .await
                .map_err(|e| crate::errors::CoreError::dependency(e.to_string()))?;
            return Ok(RateLimitDecision {
                allowed: true,
                current: 1,
                ttl_remaining: window_seconds,
            });
        }

        if current < limit {
            let _: u64 = conn
                .incr(key, 1u64)
                .await
                .map_err(|e| crate::errors::CoreError::dependency(e.to_string()))?;
            Ok(RateLimitDecision {
                allowed: true,
                current: current + 1,
                ttl_remaining: ttl as u64,
            })
        } else {
            Ok(RateLimitDecision {
                allowed: false,
                current,
                ttl_remaining: ttl as u64,
            })
        }
    }

    async fn memory_allow(&self, key: &str, limit: u64, window_seconds: u64) -> RateLimitDecision {
        let now = Self::now_secs();
        let mut store = self.memory.lock().await;

        match store.get_mut(key) {
            Some(entry) if now <= entry.expires_at => {
                if entry.count < limit {
                    entry.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        current: entry.count,
                        ttl_remaining: (entry.expires_at - now) as u64,
                    }
                } else {
                    RateLimitDecision {
                        allowed: false,
                        current: entry.count,
                        ttl_remaining: (entry.expires_at - now) as u64,
                    }
                }
            }
            _ => {
                store.insert(
                    key.to_string(),
                    MemoryEntry {
                        count: 1,
                        expires_at: now + window_seconds as f64,
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    current: 1,
                    ttl_remaining: window_seconds,
                }
            }
        }
    }

    /// Non-consuming check: would the key be allowed right now?
    pub async fn check(&self, key: &str, limit: u64) -> bool {
        let full_key = self.full_key(key);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            match conn.get::<_, Option<u64>>(&full_key).await {
                Ok(current) => return current.unwrap_or(0) < limit,
                Err(e) => {
                    error!(error = %e, "Redis rate-limit check failed; falling back to memory");
                }
            }
        }

        let now = Self::now_secs();
        let store = self.memory.lock().await;
        match store.get(&full_key) {
            Some(entry) if now <= entry.expires_at => entry.count < limit,
            _ => true,
        }
    }

    /// Record that a successful operation consumed quota (the DSR export
    /// path checks first, performs the export, then touches)
    pub async fn touch(&self, key: &str, window_seconds: u64) {
        let full_key = self.full_key(key);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: Result<(), redis::RedisError> = async {
                let exists: bool = conn.exists(&full_key).await?;
                if exists {
                    let _: u64 = conn.incr(&full_key, 1u64).await?;
                } else {
                    let _: () = conn.set_ex(&full_key, 1u64, window_seconds).await?;
                }
                Ok(())
            }
            .await;
            match result {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, "Redis rate-limit update failed; falling back to memory");
                }
            }
        }

        let now = Self::now_secs();
        let mut store = self.memory.lock().await;
        match store.get_mut(&full_key) {
            Some(entry) if now <= entry.expires_at => entry.count += 1,
            _ => {
                store.insert(
                    full_key,
                    MemoryEntry {
                        count: 1,
                        expires_at: now + window_seconds as f64,
                    },
                );
            }
        }
    }

    /// Approximate timestamp of the key's last request, reconstructed from
    /// the remaining TTL
    pub async fn last_request(&self, key: &str, window_seconds: u64) -> Option<DateTime<Utc>> {
        let full_key = self.full_key(key);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            match conn.ttl::<_, i64>(&full_key).await {
                Ok(ttl) if ttl > 0 => {
                    let elapsed = window_seconds.saturating_sub(ttl as u64);
                    return Some(Utc::now() - ChronoDuration::seconds(elapsed as i64));
                }
                Ok(_) => return None,
                Err(e) => {
                    error!(error = %e, "Redis TTL lookup failed; falling back to memory");
                }
            }
        }

        let now = Self::now_secs();
        let store = self.memory.lock().await;
        let entry = store.get(&full_key)?;
        if now > entry.expires_at {
            return None;
        }
        let elapsed = window_seconds as f64 - (entry.expires_at - now);
        Some(Utc::now() - ChronoDuration::seconds(elapsed as i64))
    }
}

/// Derive the limiter key from the authenticated user, else from the
/// client address (honoring the first X-Forwarded-For token)
pub fn request_key(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    peer_addr: Option<&str>,
    path: &str,
) -> String {
    if let Some(user_id) = user_id {
        return format!("{}:{}", user_id, path);
    }
    let ip = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or(peer_addr)
        .unwrap_or("unknown");
    format!("{}:{}", ip, path)
}
