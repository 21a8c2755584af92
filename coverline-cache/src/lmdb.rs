//! LMDB-backed remote tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store shared by every worker process on a host.
//!
//! # Value Format
//!
//! Each value is `[expires_at: i64 LE millis][created_at: i64 LE millis][json]`.
//! Expired values are treated as absent and deleted on the next read.
//!
//! # Blocking
//!
//! LMDB transactions are synchronous, so every operation runs on Tokio's
//! blocking pool. `Env` is reference counted and `Database` is a handle, which
//! makes the tier cheap to clone into those closures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use coverline_core::clock::deadline_after;
use coverline_core::{CacheError, Clock, Timestamp};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::key::CacheKey;
use crate::traits::{RemoteEntry, RemoteTier};

/// Size of the value header (two little-endian i64 timestamps).
const HEADER_LEN: usize = 16;

const TIER_NAME: &str = "lmdb";

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// The blocking task was cancelled or panicked.
    #[error("Blocking task failed: {0}")]
    Join(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Remote {
            tier: TIER_NAME.to_string(),
            reason: e.to_string(),
        }
    }
}

/// LMDB remote tier.
#[derive(Clone)]
pub struct LmdbRemoteTier {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LmdbRemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbRemoteTier")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LmdbRemoteTier {
    /// Open (or create) an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `clock` - Time source for expiry
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path in this process and
        // the files are not truncated while mapped.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "opened LMDB cache tier");

        Ok(Self {
            env,
            db,
            path: path.as_ref().to_path_buf(),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every expired entry. Returns the count removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        self.run_blocking(move |tier| {
            let expired = tier.collect_keys(|_, value| is_expired(value, now))?;
            tier.delete_expired(&expired, now)
        })
        .await
    }

    async fn run_blocking<R, F>(&self, op: F) -> Result<R, CacheError>
    where
        R: Send + 'static,
        F: FnOnce(LmdbRemoteTier) -> Result<R, LmdbCacheError> + Send + 'static,
    {
        let tier = self.clone();
        let result = tokio::task::spawn_blocking(move || op(tier))
            .await
            .map_err(|e| LmdbCacheError::Join(e.to_string()))?;
        result.map_err(CacheError::from)
    }

    fn read_entry(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn write_entry(&self, key: &[u8], value: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    /// Iterate over all entries and collect the keys accepted by `pred`.
    fn collect_keys<F>(&self, pred: F) -> Result<Vec<Vec<u8>>, LmdbCacheError>
    where
        F: Fn(&[u8], &[u8]) -> bool,
    {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if pred(key, value) {
                keys.push(key.to_vec());
            }
        }

        Ok(keys)
    }

    /// Delete those `keys` whose stored entry is expired at `now` or unreadable.
    ///
    /// Expiry is re-checked inside the write transaction, so an entry another
    /// process refreshed after it was read survives.
    fn delete_expired(&self, keys: &[Vec<u8>], now: Timestamp) -> Result<u64, LmdbCacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            let expired = self
                .db
                .get(&wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
                .is_some_and(|value| is_expired(value, now));
            if expired
                && self
                    .db
                    .delete(&mut wtxn, key)
                    .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

#[async_trait]
impl RemoteTier for LmdbRemoteTier {
    fn name(&self) -> &'static str {
        TIER_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<RemoteEntry>, CacheError> {
        let now = self.clock.now();
        let key = key.as_bytes().to_vec();
        self.run_blocking(move |tier| {
            let Some(bytes) = tier.read_entry(&key)? else {
                return Ok(None);
            };

            match decode(&bytes) {
                Some(entry) if entry.expires_at > now => Ok(Some(entry)),
                Some(_) => {
                    tier.delete_expired(std::slice::from_ref(&key), now)?;
                    Ok(None)
                }
                None => {
                    tier.delete_expired(std::slice::from_ref(&key), now)?;
                    Err(LmdbCacheError::Corrupt(format!(
                        "{} bytes, header needs {HEADER_LEN}",
                        bytes.len()
                    )))
                }
            }
        })
        .await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now();
        let key = key.as_bytes().to_vec();
        if ttl.is_zero() {
            return self
                .run_blocking(move |tier| tier.delete_keys(&[key]).map(|_| ()))
                .await;
        }

        let full_bytes = encode(&value, now, deadline_after(now, ttl));
        self.run_blocking(move |tier| tier.write_entry(&key, &full_bytes))
            .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let key = key.as_bytes().to_vec();
        self.run_blocking(move |tier| tier.delete_keys(&[key]).map(|n| n > 0))
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let prefix = prefix.as_bytes().to_vec();
        self.run_blocking(move |tier| {
            let keys = tier.collect_keys(|key, _| key.starts_with(&prefix))?;
            tier.delete_keys(&keys)
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.run_blocking(|tier| {
            let mut wtxn = tier
                .env
                .write_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            tier.db
                .clear(&mut wtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            wtxn.commit()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
        })
        .await
    }
}

fn encode(value: &[u8], created_at: Timestamp, expires_at: Timestamp) -> Vec<u8> {
    let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
    full_bytes.extend_from_slice(&expires_at.timestamp_millis().to_le_bytes());
    full_bytes.extend_from_slice(&created_at.timestamp_millis().to_le_bytes());
    full_bytes.extend_from_slice(value);
    full_bytes
}

fn decode_header(bytes: &[u8]) -> Option<(Timestamp, Timestamp)> {
    let expires: [u8; 8] = bytes.get(0..8)?.try_into().ok()?;
    let created: [u8; 8] = bytes.get(8..HEADER_LEN)?.try_into().ok()?;
    let expires_at = DateTime::from_timestamp_millis(i64::from_le_bytes(expires))?;
    let created_at = DateTime::from_timestamp_millis(i64::from_le_bytes(created))?;
    Some((expires_at, created_at))
}

fn is_expired(bytes: &[u8], now: Timestamp) -> bool {
    match decode_header(bytes) {
        Some((expires_at, _)) => expires_at <= now,
        None => true,
    }
}

fn decode(bytes: &[u8]) -> Option<RemoteEntry> {
    let (expires_at, created_at) = decode_header(bytes)?;
    Some(RemoteEntry {
        value: bytes[HEADER_LEN..].to_vec(),
        created_at,
        expires_at,
    })
}
