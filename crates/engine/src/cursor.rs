//! Address state store: durable per-address cursors.
//!
//! Each address's cursor is written only by that address's check, and every
//! write replaces the whole record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use chainwatch_common::error::{WatchError, WatchResult};
use chainwatch_common::types::Cursor;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, address: &str) -> WatchResult<Option<Cursor>>;

    /// Atomically replace the cursor for `address`.
    async fn save(&self, address: &str, cursor: &Cursor) -> WatchResult<()>;
}

/// Process-local store. Cursors do not survive a restart; the lookback window
/// then bounds what is re-notified.
#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<String, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of addresses with a cursor.
    pub async fn len(&self) -> usize {
        self.cursors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cursors.read().await.is_empty()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, address: &str) -> WatchResult<Option<Cursor>> {
        Ok(self.cursors.read().await.get(address).cloned())
    }

    async fn save(&self, address: &str, cursor: &Cursor) -> WatchResult<()> {
        self.cursors
            .write()
            .await
            .insert(address.to_string(), cursor.clone());
        Ok(())
    }
}

/// Cursors kept in a single JSON file, for deployments without a database.
///
/// Every save rewrites the whole file through a temporary sibling that is
/// renamed over the old one, so a crash leaves either the previous or the
/// new contents on disk.
pub struct FileCursorStore {
    path: PathBuf,
    tmp_path: PathBuf,
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl FileCursorStore {
    /// Open the store at `path`, reading existing cursors. A missing file is
    /// an empty store; an unreadable or malformed one is an error.
    pub async fn open(path: impl AsRef<Path>) -> WatchResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");

        let cursors = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WatchError::Storage(format!("malformed cursor file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(WatchError::Storage(format!(
                    "reading cursor file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        tracing::debug!(path = %path.display(), cursors = cursors.len(), "Opened cursor file");
        Ok(Self {
            path,
            tmp_path: PathBuf::from(tmp_name),
            cursors: Mutex::new(cursors),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, cursors: &HashMap<String, Cursor>) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(cursors)?;
        fs::write(&self.tmp_path, content).await?;
        fs::rename(&self.tmp_path, &self.path).await
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, address: &str) -> WatchResult<Option<Cursor>> {
        Ok(self.cursors.lock().await.get(address).cloned())
    }

    async fn save(&self, address: &str, cursor: &Cursor) -> WatchResult<()> {
        let mut cursors = self.cursors.lock().await;
        let mut next = cursors.clone();
        next.insert(address.to_string(), cursor.clone());

        // Memory only changes once the file does.
        self.persist(&next).await.map_err(|e| {
            WatchError::Storage(format!(
                "saving cursor for {} to {}: {}",
                address,
                self.path.display(),
                e
            ))
        })?;
        *cursors = next;
        Ok(())
    }
}

/// PostgreSQL-backed store; one row per address in `address_cursors`.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, address: &str) -> WatchResult<Option<Cursor>> {
        let row: Option<(Option<String>, Option<DateTime<Utc>>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT last_event_id, last_event_at, last_checked_at FROM address_cursors WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatchError::Storage(format!("loading cursor for {}: {}", address, e)))?;

        Ok(row.map(|(last_event_id, last_event_at, last_checked_at)| Cursor {
            last_event_id,
            last_event_at,
            last_checked_at,
        }))
    }

    async fn save(&self, address: &str, cursor: &Cursor) -> WatchResult<()> {
        // Single upsert statement: the row is replaced as a unit.
        sqlx::query(
            r#"
            INSERT INTO address_cursors (address, last_event_id, last_event_at, last_checked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (address) DO UPDATE
            SET last_event_id = $2, last_event_at = $3, last_checked_at = $4, updated_at = NOW()
            "#,
        )
        .bind(address)
        .bind(&cursor.last_event_id)
        .bind(cursor.last_event_at)
        .bind(cursor.last_checked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| WatchError::Storage(format!("saving cursor for {}: {}", address, e)))?;

        Ok(())
    }
}
