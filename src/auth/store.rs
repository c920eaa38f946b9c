use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session store backend failure: {0}")]
    Backend(String),

    #[error("session record corrupt: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// External keyed store backing session records: atomic per-key get,
/// set-with-TTL and delete. The store is the single source of truth for
/// revocation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;
}

/// Redis-backed session store using a pooled connection manager. Records
/// are stored as JSON strings under their token id with a TTL, so natural
/// expiry needs no sweeper.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("failed to create redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to redis: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value.to_string(), ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// In-memory store with lazy expiry, for development and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Value, Instant)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), StoreError> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock().insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// A store that fails every call, for exercising outage policies in tests.
#[derive(Default)]
pub struct FailingSessionStore;

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Backend("store offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: Value, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(StoreError::Backend("store offline".to_string()))
    }

    async fn del(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("store offline".to_string()))
    }
}
