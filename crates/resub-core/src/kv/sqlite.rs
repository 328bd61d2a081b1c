//! SQLite-backed store (the persisted state database).
//!
//! The database file lives under the XDG state directory:
//! `~/.local/state/resub/state.db`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

use super::{entry_size, KvError, KvStore};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed key/value table.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: Pool<Sqlite>,
    quota: Option<u64>,
}

impl SqliteKvStore {
    /// Open (or create) the default state database and run migrations.
    pub async fn open_default(quota: Option<u64>) -> Result<Self, KvError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("resub")
            .map_err(|e| KvError::Unavailable(e.to_string()))?;
        let db_path = xdg_dirs.get_state_home().join("resub").join("state.db");
        Self::open_at(db_path, quota).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>, quota: Option<u64>) -> Result<Self, KvError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let store = SqliteKvStore { pool, quota };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened state database");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), KvError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                size INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;

        if let Some(quota) = self.quota {
            let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM kv")
                .fetch_one(&mut *tx)
                .await?;
            let used = used.max(0) as u64;
            let mut after = used;
            for (k, v) in &entries {
                let old: Option<i64> = sqlx::query_scalar("SELECT size FROM kv WHERE key = ?")
                    .bind(k)
                    .fetch_optional(&mut *tx)
                    .await?;
                after = after.saturating_sub(old.unwrap_or(0).max(0) as u64);
                after += entry_size(k, v);
            }
            if after > quota {
                tx.rollback().await?;
                return Err(KvError::QuotaExceeded {
                    needed: after.saturating_sub(used),
                    available: quota.saturating_sub(used),
                });
            }
        }

        for (k, v) in &entries {
            let text = v.to_string();
            let size = entry_size(k, v) as i64;
            sqlx::query(
                "INSERT INTO kv (key, value, size) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, size = excluded.size",
            )
            .bind(k)
            .bind(text)
            .bind(size)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;
        for k in keys {
            sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(k)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64, KvError> {
        let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM kv")
            .fetch_one(&self.pool)
            .await?;
        Ok(used.max(0) as u64)
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory(quota: Option<u64>) -> Result<SqliteKvStore, KvError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = SqliteKvStore { pool, quota };
    store.migrate().await?;
    Ok(store)
}
