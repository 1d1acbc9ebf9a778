//! Offline cache (§4.11). Grounded in `original_source/agent/offline_cache.py`;
//! reuses the same `sqlx` + SQLite dependency the server already carries
//! rather than introducing a second embedded store.

use std::path::Path;

use chrono::{DateTime, Utc};
use heimdall_types::rules::ResolvedRules;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingEvent {
    pub id: i64,
    pub payload: String,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

pub struct OfflineCache {
    pool: SqlitePool,
}

impl OfflineCache {
    pub async fn open(config_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        let db_path = config_dir.join("offline_cache.db");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                event_type TEXT NOT NULL CHECK (event_type IN ('usage_event', 'heartbeat')),
                created_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cached_rules (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                rules_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        sqlx::query(
            "CREATE TABLE pending_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                event_type TEXT NOT NULL CHECK (event_type IN ('usage_event', 'heartbeat')),
                created_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE cached_rules (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                rules_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn queue(&self, payload: &Value, event_type: &str) -> anyhow::Result<i64> {
        let result = sqlx::query("INSERT INTO pending_events (payload, event_type, created_at) VALUES (?, ?, ?)")
            .bind(payload.to_string())
            .bind(event_type)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn queue_usage_event(&self, payload: &Value) -> anyhow::Result<i64> {
        self.queue(payload, "usage_event").await
    }

    pub async fn queue_heartbeat(&self, payload: &Value) -> anyhow::Result<i64> {
        self.queue(payload, "heartbeat").await
    }

    pub async fn get_pending_events(&self, limit: i64) -> anyhow::Result<Vec<PendingEvent>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, payload, event_type, created_at FROM pending_events \
             WHERE synced = 0 ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, payload, event_type, created_at)| PendingEvent {
                id,
                payload,
                event_type,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    pub async fn mark_synced(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE pending_events SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_synced_batch(&self, ids: &[i64]) -> anyhow::Result<()> {
        for id in ids {
            self.mark_synced(*id).await?;
        }
        Ok(())
    }

    pub async fn cache_rules(&self, rules: &ResolvedRules) -> anyhow::Result<()> {
        let json = serde_json::to_string(rules)?;
        sqlx::query(
            "INSERT INTO cached_rules (id, rules_json, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET rules_json = excluded.rules_json, updated_at = excluded.updated_at",
        )
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cached_rules(&self) -> anyhow::Result<Option<ResolvedRules>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT rules_json FROM cached_rules WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some((json,)) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    pub async fn pending_count(&self) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_events WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Deletes synced rows older than `days` (default 7 — a transient
    /// relay buffer, not the server's 90-day usage-event record).
    pub async fn cleanup(&self, days: i64) -> anyhow::Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM pending_events WHERE synced = 1 AND created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queue_and_drain_round_trip() {
        let cache = OfflineCache::open_in_memory().await.unwrap();
        let id = cache.queue_usage_event(&json!({"a": 1})).await.unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 1);

        let pending = cache.get_pending_events(50).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        cache.mark_synced(id).await.unwrap();
        assert_eq!(cache.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cached_rules_upsert_replaces_prior_value() {
        let cache = OfflineCache::open_in_memory().await.unwrap();
        assert!(cache.get_cached_rules().await.unwrap().is_none());

        cache.cache_rules(&ResolvedRules::unknown()).await.unwrap();
        let rules = cache.get_cached_rules().await.unwrap().unwrap();
        assert_eq!(rules.day_type, "unknown");
    }
}
