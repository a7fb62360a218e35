use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::{
    ConsolidationCheckpoint, MemoryEntry, MemoryKind, MemoryStore, Namespace, PersonalityState,
    PersonalityStore,
};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

/// Checkpoints kept per namespace; older ones are pruned on insert.
const CHECKPOINTS_KEPT: i64 = 8;

/// Durable store for memory entries, links, personality state and
/// consolidation checkpoints, one SQLite file for every namespace.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA busy_timeout = 5000")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %db_path.as_ref().display(), "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_entries (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                embedding BLOB NOT NULL,
                importance REAL NOT NULL CHECK (importance >= 0.0 AND importance <= 1.0),
                sentiment REAL NOT NULL CHECK (sentiment >= -1.0 AND sentiment <= 1.0),
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                archived INTEGER NOT NULL DEFAULT 0,
                merged_into TEXT,
                PRIMARY KEY (namespace, id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create memory_entries table")?;

        // Undirected links, stored once with low_id < high_id.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_links (
                namespace TEXT NOT NULL,
                low_id TEXT NOT NULL,
                high_id TEXT NOT NULL,
                PRIMARY KEY (namespace, low_id, high_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create memory_links table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS personality_state (
                namespace TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create personality_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consolidation_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                report_json TEXT NOT NULL,
                entries_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create consolidation_checkpoints table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_namespace ON consolidation_checkpoints(namespace, id)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create checkpoint index")?;

        Ok(())
    }

    /// Namespaces that have at least one memory entry or a saved personality.
    pub async fn namespaces(&self) -> Result<Vec<Namespace>> {
        let rows = sqlx::query(
            "SELECT namespace FROM memory_entries UNION SELECT namespace FROM personality_state ORDER BY namespace",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list namespaces")?;

        Ok(rows
            .iter()
            .map(|row| Namespace::new(row.get::<String, _>("namespace")))
            .collect())
    }

    async fn write_entry(
        tx: &mut Transaction<'_, Sqlite>,
        namespace: &Namespace,
        entry: &MemoryEntry,
    ) -> Result<()> {
        let embedding =
            bincode::serialize(&entry.embedding).context("Failed to encode embedding")?;

        sqlx::query(
            r#"
            INSERT INTO memory_entries
                (namespace, id, content, kind, embedding, importance, sentiment,
                 created_at, last_accessed_at, access_count, archived, merged_into)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, id) DO UPDATE SET
                content = excluded.content,
                kind = excluded.kind,
                embedding = excluded.embedding,
                importance = excluded.importance,
                sentiment = excluded.sentiment,
                created_at = excluded.created_at,
                last_accessed_at = excluded.last_accessed_at,
                access_count = excluded.access_count,
                archived = excluded.archived,
                merged_into = excluded.merged_into
            "#,
        )
        .bind(namespace.as_str())
        .bind(entry.id.to_string())
        .bind(&entry.content)
        .bind(entry.kind.as_str())
        .bind(embedding)
        .bind(entry.importance as f64)
        .bind(entry.sentiment as f64)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.last_accessed_at.timestamp_millis())
        .bind(entry.access_count as i64)
        .bind(entry.archived)
        .bind(entry.merged_into.map(|id| id.to_string()))
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to write memory entry {}", entry.id))?;

        let id = entry.id.to_string();
        sqlx::query("DELETE FROM memory_links WHERE namespace = ? AND (low_id = ? OR high_id = ?)")
            .bind(namespace.as_str())
            .bind(&id)
            .bind(&id)
            .execute(&mut **tx)
            .await
            .context("Failed to clear memory links")?;

        for other in &entry.links {
            let other = other.to_string();
            let (low, high) = if id < other { (&id, &other) } else { (&other, &id) };
            sqlx::query("INSERT OR IGNORE INTO memory_links (namespace, low_id, high_id) VALUES (?, ?, ?)")
                .bind(namespace.as_str())
                .bind(low)
                .bind(high)
                .execute(&mut **tx)
                .await
                .context("Failed to write memory link")?;
        }

        Ok(())
    }

    fn row_to_entry(row: &SqliteRow) -> Result<MemoryEntry> {
        let id: String = row.get("id");
        let kind: String = row.get("kind");
        let blob: Vec<u8> = row.get("embedding");
        let merged_into: Option<String> = row.get("merged_into");

        Ok(MemoryEntry {
            id: Uuid::parse_str(&id).with_context(|| format!("Bad entry id {id}"))?,
            content: row.get("content"),
            kind: MemoryKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown memory kind '{}' on {}", kind, id))?,
            embedding: bincode::deserialize(&blob)
                .with_context(|| format!("Failed to decode embedding of {id}"))?,
            importance: row.get::<f64, _>("importance") as f32,
            sentiment: row.get::<f64, _>("sentiment") as f32,
            created_at: from_millis(row.get("created_at")),
            last_accessed_at: from_millis(row.get("last_accessed_at")),
            access_count: row.get::<i64, _>("access_count").max(0) as u64,
            links: BTreeSet::new(),
            archived: row.get::<i64, _>("archived") != 0,
            merged_into: merged_into
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .with_context(|| format!("Bad merged_into on {id}"))?,
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn load_entries(&self, namespace: &Namespace) -> Result<Vec<MemoryEntry>> {
        let rows = sqlx::query("SELECT * FROM memory_entries WHERE namespace = ? ORDER BY created_at, id")
            .bind(namespace.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to query memory entries")?;

        let mut entries = rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;

        let link_rows = sqlx::query("SELECT low_id, high_id FROM memory_links WHERE namespace = ?")
            .bind(namespace.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to query memory links")?;

        let positions: HashMap<Uuid, usize> =
            entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        for row in link_rows {
            let low = Uuid::parse_str(&row.get::<String, _>("low_id"))?;
            let high = Uuid::parse_str(&row.get::<String, _>("high_id"))?;
            if let (Some(&a), Some(&b)) = (positions.get(&low), positions.get(&high)) {
                entries[a].links.insert(high);
                entries[b].links.insert(low);
            } else {
                tracing::warn!(%low, %high, "Dangling memory link ignored");
            }
        }

        tracing::debug!(namespace = %namespace, count = entries.len(), "Loaded memory entries");
        Ok(entries)
    }

    async fn insert_entry(&self, namespace: &Namespace, entry: &MemoryEntry) -> Result<()> {
        self.save_entries(namespace, std::slice::from_ref(entry)).await
    }

    async fn save_entries(&self, namespace: &Namespace, entries: &[MemoryEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        for entry in entries {
            Self::write_entry(&mut tx, namespace, entry).await?;
        }
        tx.commit().await.context("Failed to commit memory entries")?;
        Ok(())
    }

    async fn record_checkpoint(
        &self,
        namespace: &Namespace,
        checkpoint: &ConsolidationCheckpoint,
    ) -> Result<()> {
        let report = serde_json::to_string(&checkpoint.report)
            .context("Failed to serialize consolidation report")?;
        let entries = serde_json::to_string(&checkpoint.entries)
            .context("Failed to serialize checkpoint entries")?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query(
            "INSERT INTO consolidation_checkpoints (namespace, completed_at, report_json, entries_json) VALUES (?, ?, ?, ?)",
        )
        .bind(namespace.as_str())
        .bind(checkpoint.completed_at.timestamp_millis())
        .bind(&report)
        .bind(&entries)
        .execute(&mut *tx)
        .await
        .context("Failed to record consolidation checkpoint")?;

        sqlx::query(
            r#"
            DELETE FROM consolidation_checkpoints
            WHERE namespace = ? AND id NOT IN (
                SELECT id FROM consolidation_checkpoints
                WHERE namespace = ? ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(namespace.as_str())
        .bind(namespace.as_str())
        .bind(CHECKPOINTS_KEPT)
        .execute(&mut *tx)
        .await
        .context("Failed to prune old checkpoints")?;

        tx.commit().await.context("Failed to commit checkpoint")?;
        tracing::debug!(namespace = %namespace, "Consolidation checkpoint recorded");
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<ConsolidationCheckpoint>> {
        let row = sqlx::query(
            "SELECT completed_at, report_json, entries_json FROM consolidation_checkpoints WHERE namespace = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(namespace.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query consolidation checkpoints")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let report: String = row.get("report_json");
        let entries: String = row.get("entries_json");
        Ok(Some(ConsolidationCheckpoint {
            completed_at: from_millis(row.get("completed_at")),
            report: serde_json::from_str(&report).context("Failed to parse checkpoint report")?,
            entries: serde_json::from_str(&entries).context("Failed to parse checkpoint entries")?,
        }))
    }
}

#[async_trait]
impl PersonalityStore for SqliteStore {
    async fn load_personality(&self, namespace: &Namespace) -> Result<Option<PersonalityState>> {
        let row = sqlx::query("SELECT state_json FROM personality_state WHERE namespace = ?")
            .bind(namespace.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query personality_state")?;

        if let Some(row) = row {
            let json: String = row.get("state_json");
            let state: PersonalityState =
                serde_json::from_str(&json).context("Failed to deserialize personality state")?;
            Ok(Some(state))
        } else {
            Ok(None)
        }
    }

    async fn save_personality(&self, namespace: &Namespace, state: &PersonalityState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to serialize personality state")?;
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO personality_state (namespace, state_json, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(namespace) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
        )
        .bind(namespace.as_str())
        .bind(&json)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to save personality state")?;

        tracing::debug!(namespace = %namespace, "Personality state saved");
        Ok(())
    }
}
