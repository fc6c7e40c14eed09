//! Durable state store adapter.
//!
//! All protocol state lives in an external key-value store under three key
//! namespaces: flow records, device records, and first-party token digests.
//! TTL enforcement is the store's job; nothing here polls timestamps. The
//! `Kv` trait is the seam: `RedisStore` backs production, `MemoryStore`
//! backs tests and local development with identical semantics.

use crate::errors::SyzygyError;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Flow records expire ten minutes after creation, unconditionally.
pub const FLOW_TTL_SECONDS: u64 = 600;
/// First-party access tokens live one day.
pub const ACCESS_TOKEN_TTL_SECONDS: u64 = 86_400;
/// First-party refresh tokens live four weeks.
pub const REFRESH_TOKEN_TTL_SECONDS: u64 = 2_419_200;
/// Device records outlive the refresh token by a small grace margin, and the
/// margin is re-applied on every rotation.
pub const DEVICE_TTL_GRACE_SECONDS: u64 = 300;

/// Expiry mode for `Kv::set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expire this many seconds from now.
    After(u64),
    /// Overwrite the value but preserve the key's remaining TTL.
    Keep,
    /// No expiry.
    None,
}

/// Minimal key-value surface the protocol needs. `delete` reports whether a
/// live key was removed; that return value is the atomic claim primitive the
/// flow machine relies on.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SyzygyError>;
    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<(), SyzygyError>;
    async fn delete(&self, key: &str) -> Result<bool, SyzygyError>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool, SyzygyError>;
}

/// Redis-backed store over one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, SyzygyError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Kv for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyzygyError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<(), SyzygyError> {
        let mut conn = self.conn.clone();
        match expiry {
            Expiry::After(seconds) => {
                let _: () = conn.set_ex(key, value, seconds).await?;
            }
            Expiry::Keep => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("KEEPTTL")
                    .query_async(&mut conn)
                    .await?;
            }
            Expiry::None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SyzygyError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool, SyzygyError> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.expire(key, ttl_seconds as i64).await?;
        Ok(applied)
    }
}

/// In-memory store with the same TTL and claim semantics. Deadlines use
/// `tokio::time::Instant` so paused-clock tests exercise expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: String,
    deadline: Option<Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &MemoryEntry) -> bool {
        entry.deadline.map_or(true, |d| Instant::now() < d)
    }
}

#[async_trait]
impl Kv for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyzygyError> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        match entries.get(key) {
            Some(entry) if Self::is_live(entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, expiry: Expiry) -> Result<(), SyzygyError> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        let deadline = match expiry {
            Expiry::After(seconds) => Some(Instant::now() + Duration::from_secs(seconds)),
            Expiry::Keep => entries
                .get(key)
                .filter(|e| Self::is_live(e))
                .and_then(|e| e.deadline),
            Expiry::None => None,
        };
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                deadline,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SyzygyError> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        match entries.remove(key) {
            Some(entry) => Ok(Self::is_live(&entry)),
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool, SyzygyError> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        match entries.get_mut(key) {
            Some(entry) if Self::is_live(entry) => {
                entry.deadline = Some(Instant::now() + Duration::from_secs(ttl_seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// One in-progress or just-completed authorization attempt, keyed by `state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub tmp_token_digest: String,
    pub salt: String,
    pub device_generate_id: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_refresh_token: Option<String>,
}

/// The durable device-to-provider linkage, keyed by the server-minted
/// device id. The provider refresh token never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_generate_id: String,
    pub provider_refresh_token: String,
}

/// Salted digest of a first-party token. One slot per device per token kind,
/// overwritten wholesale on rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDigest {
    pub digest: String,
    pub salt: String,
}

fn flow_key(state: &str) -> String {
    format!("syzygy-flow-id-{state}")
}

fn device_key(device_id: &str) -> String {
    format!("syzygy-device-id-{device_id}")
}

fn access_token_key(device_id: &str) -> String {
    format!("syzygy-access-token-{device_id}")
}

fn refresh_token_key(device_id: &str) -> String {
    format!("syzygy-refresh-token-{device_id}")
}

/// Typed operations over the three key namespaces.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn Kv>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn put_flow(
        &self,
        state: &str,
        record: &FlowRecord,
        expiry: Expiry,
    ) -> Result<(), SyzygyError> {
        let value = serde_json::to_string(record)?;
        self.kv.set(&flow_key(state), &value, expiry).await
    }

    pub async fn get_flow(&self, state: &str) -> Result<Option<FlowRecord>, SyzygyError> {
        match self.kv.get(&flow_key(state)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Deletes the flow record, reporting whether a live record was removed.
    /// Callers that branch on the return value get at-most-once claim
    /// semantics under concurrent requests.
    pub async fn delete_flow(&self, state: &str) -> Result<bool, SyzygyError> {
        self.kv.delete(&flow_key(state)).await
    }

    pub async fn put_device(
        &self,
        device_id: &str,
        record: &DeviceRecord,
    ) -> Result<(), SyzygyError> {
        let value = serde_json::to_string(record)?;
        self.kv
            .set(
                &device_key(device_id),
                &value,
                Expiry::After(REFRESH_TOKEN_TTL_SECONDS + DEVICE_TTL_GRACE_SECONDS),
            )
            .await
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, SyzygyError> {
        match self.kv.get(&device_key(device_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_device(&self, device_id: &str) -> Result<bool, SyzygyError> {
        self.kv.delete(&device_key(device_id)).await
    }

    /// Re-arms the device record TTL after a token rotation.
    pub async fn extend_device(&self, device_id: &str) -> Result<bool, SyzygyError> {
        self.kv
            .expire(
                &device_key(device_id),
                REFRESH_TOKEN_TTL_SECONDS + DEVICE_TTL_GRACE_SECONDS,
            )
            .await
    }

    pub async fn put_access_token(
        &self,
        device_id: &str,
        digest: &TokenDigest,
    ) -> Result<(), SyzygyError> {
        let value = serde_json::to_string(digest)?;
        self.kv
            .set(
                &access_token_key(device_id),
                &value,
                Expiry::After(ACCESS_TOKEN_TTL_SECONDS),
            )
            .await
    }

    pub async fn get_access_token(
        &self,
        device_id: &str,
    ) -> Result<Option<TokenDigest>, SyzygyError> {
        match self.kv.get(&access_token_key(device_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn put_refresh_token(
        &self,
        device_id: &str,
        digest: &TokenDigest,
    ) -> Result<(), SyzygyError> {
        let value = serde_json::to_string(digest)?;
        self.kv
            .set(
                &refresh_token_key(device_id),
                &value,
                Expiry::After(REFRESH_TOKEN_TTL_SECONDS),
            )
            .await
    }

    pub async fn get_refresh_token(
        &self,
        device_id: &str,
    ) -> Result<Option<TokenDigest>, SyzygyError> {
        match self.kv.get(&refresh_token_key(device_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Removes both token slots; used at deregistration so revocation does
    /// not wait for the slots' own TTLs.
    pub async fn delete_tokens(&self, device_id: &str) -> Result<(), SyzygyError> {
        self.kv.delete(&access_token_key(device_id)).await?;
        self.kv.delete(&refresh_token_key(device_id)).await?;
        Ok(())
    }
}
