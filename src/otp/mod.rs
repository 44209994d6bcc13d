use crate::entities::payment::PaymentReferenceType;
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Key identifying the resource a verification code was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OtpKey {
    pub resource_type: PaymentReferenceType,
    pub resource_id: Uuid,
}

impl OtpKey {
    pub fn new(resource_type: PaymentReferenceType, resource_id: Uuid) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }

    fn storage_key(&self) -> String {
        format!("pawmart:otp:{}:{}", self.resource_type, self.resource_id)
    }
}

/// A stored verification code with its logical expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOtp {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredOtp {
    pub fn new(code: String, ttl: Duration) -> Self {
        Self {
            code,
            expires_at: Utc::now() + ChronoDuration::seconds(ttl.as_secs() as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Storage for issued one-time codes
///
/// Implementations must retain entries past their logical expiry so an
/// expired lookup can still be told apart from a code that was never
/// issued, and must make `remove_if_match` atomic so two racing verifies
/// cannot both consume the same code.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Inserts or replaces the code stored for a key
    async fn put(&self, key: &OtpKey, otp: StoredOtp) -> Result<(), ServiceError>;

    async fn get(&self, key: &OtpKey) -> Result<Option<StoredOtp>, ServiceError>;

    async fn remove(&self, key: &OtpKey) -> Result<(), ServiceError>;

    /// Removes the stored code only when it equals `code`; returns whether
    /// anything was removed
    async fn remove_if_match(&self, key: &OtpKey, code: &str) -> Result<bool, ServiceError>;
}

/// In-memory store for tests and single-node deployments
#[derive(Debug, Default, Clone)]
pub struct MemoryOtpStore {
    entries: Arc<DashMap<OtpKey, StoredOtp>>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn put(&self, key: &OtpKey, otp: StoredOtp) -> Result<(), ServiceError> {
        self.entries.insert(*key, otp);
        Ok(())
    }

    async fn get(&self, key: &OtpKey) -> Result<Option<StoredOtp>, ServiceError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, key: &OtpKey) -> Result<(), ServiceError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_if_match(&self, key: &OtpKey, code: &str) -> Result<bool, ServiceError> {
        Ok(self
            .entries
            .remove_if(key, |_, stored| stored.code == code)
            .is_some())
    }
}

// Compare-and-delete has to happen server-side; GET followed by DEL would
// let two verifies both observe the code before either removes it.
const REMOVE_IF_MATCH_SCRIPT: &str = r#"
local stored = redis.call('GET', KEYS[1])
if stored then
  local decoded = cjson.decode(stored)
  if decoded.code == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
  end
end
return 0
"#;

/// Redis-backed store for multi-node deployments
///
/// Entries carry a native TTL of twice the logical expiry: between logical
/// expiry and eviction a lookup still answers, while eviction guarantees
/// cleanup across restarts without any sweeper task.
#[derive(Clone)]
pub struct RedisOtpStore {
    client: Arc<redis::Client>,
    retention: Duration,
}

impl RedisOtpStore {
    pub fn new(redis_url: &str, logical_ttl: Duration) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url).map_err(store_error)?;
        Ok(Self {
            client: Arc::new(client),
            retention: logical_ttl * 2,
        })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, ServiceError> {
        self.client
            .get_async_connection()
            .await
            .map_err(store_error)
    }
}

fn store_error(err: redis::RedisError) -> ServiceError {
    ServiceError::UpstreamUnavailable(format!("otp store: {}", err))
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn put(&self, key: &OtpKey, otp: StoredOtp) -> Result<(), ServiceError> {
        let json = serde_json::to_string(&otp)
            .map_err(|e| ServiceError::InternalError(format!("otp serialization: {}", e)))?;

        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key.storage_key(), json, self.retention.as_secs() as usize)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn get(&self, key: &OtpKey) -> Result<Option<StoredOtp>, ServiceError> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(key.storage_key()).await.map_err(store_error)?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(|e| ServiceError::InternalError(format!("otp deserialization: {}", e)))
    }

    async fn remove(&self, key: &OtpKey) -> Result<(), ServiceError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key.storage_key())
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn remove_if_match(&self, key: &OtpKey, code: &str) -> Result<bool, ServiceError> {
        let mut conn = self.connection().await?;
        let removed: i32 = redis::Script::new(REMOVE_IF_MATCH_SCRIPT)
            .key(key.storage_key())
            .arg(code)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed == 1)
    }
}
