//! SQLite persistence for conversation turns and their embeddings.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversation_turns`: the append-only structured log
//! - `turn_embeddings`: one vector per turn, keyed by `turn_id`
//!
//! The tables are deliberately not linked by a foreign key: the two
//! stores are written independently and may diverge.

use crate::vector;
use async_trait::async_trait;
use chrono::Utc;
use relayclaw_core::error::PersistenceError;
use relayclaw_core::store::{SimilarityHit, SimilarityStore, TurnStore};
use relayclaw_core::turn::{ConversationTurn, EmbeddingRecord, TurnRole};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed turn and similarity store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is a separate database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Open a database file, creating parent directories as needed.
    pub async fn open(path: &std::path::Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Storage(format!("{}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_turns (
                iid             INTEGER PRIMARY KEY AUTOINCREMENT,
                turn_id         TEXT UNIQUE NOT NULL,
                conversation_id TEXT NOT NULL,
                role            TEXT NOT NULL,
                model_used      TEXT NOT NULL,
                content         TEXT NOT NULL,
                token_count     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("conversation_turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation \
             ON conversation_turns(conversation_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("conversation index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turn_embeddings (
                turn_id      TEXT PRIMARY KEY NOT NULL,
                dimension    INTEGER NOT NULL,
                vector       BLOB NOT NULL,
                source_text  TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("turn_embeddings table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, PersistenceError> {
        let get = |col: &str| -> Result<String, PersistenceError> {
            row.try_get(col)
                .map_err(|e| PersistenceError::QueryFailed(format!("{col} column: {e}")))
        };

        let role = get("role")?
            .parse::<TurnRole>()
            .map_err(PersistenceError::QueryFailed)?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&get("created_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PersistenceError::QueryFailed(format!("created_at column: {e}")))?;

        let token_count: i64 = row
            .try_get("token_count")
            .map_err(|e| PersistenceError::QueryFailed(format!("token_count column: {e}")))?;

        Ok(ConversationTurn {
            conversation_id: get("conversation_id")?,
            turn_id: get("turn_id")?,
            role,
            model_used: get("model_used")?,
            content: get("content")?,
            token_count: u32::try_from(token_count).unwrap_or(0),
            created_at,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<EmbeddingRecord, PersistenceError> {
        let blob: Vec<u8> = row
            .try_get("vector")
            .map_err(|e| PersistenceError::QueryFailed(format!("vector column: {e}")))?;
        Ok(EmbeddingRecord {
            turn_id: row
                .try_get("turn_id")
                .map_err(|e| PersistenceError::QueryFailed(format!("turn_id column: {e}")))?,
            vector: blob_to_vector(&blob),
            source_text: row
                .try_get("source_text")
                .map_err(|e| PersistenceError::QueryFailed(format!("source_text column: {e}")))?,
        })
    }
}

/// Serialize an embedding vector to little-endian bytes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl TurnStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_turns
                (turn_id, conversation_id, role, model_used, content, token_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&turn.turn_id)
        .bind(&turn.conversation_id)
        .bind(turn.role.as_str())
        .bind(&turn.model_used)
        .bind(&turn.content)
        .bind(i64::from(turn.token_count))
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("append turn {}: {e}", turn.turn_id)))?;

        debug!(turn_id = %turn.turn_id, conversation_id = %turn.conversation_id, "Turn stored");
        Ok(())
    }

    async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationTurn>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_turns WHERE conversation_id = ?1 ORDER BY iid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<ConversationTurn>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM conversation_turns WHERE turn_id = ?1")
            .bind(turn_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        row.as_ref().map(Self::row_to_turn).transpose()
    }
}

#[async_trait]
impl SimilarityStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO turn_embeddings (turn_id, dimension, vector, source_text, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(turn_id) DO UPDATE SET
                dimension = excluded.dimension,
                vector = excluded.vector,
                source_text = excluded.source_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.turn_id)
        .bind(record.vector.len() as i64)
        .bind(vector_to_blob(&record.vector))
        .bind(&record.source_text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            PersistenceError::Storage(format!("upsert embedding {}: {e}", record.turn_id))
        })?;

        Ok(())
    }

    async fn contains(&self, turn_id: &str) -> Result<bool, PersistenceError> {
        let row = sqlx::query("SELECT 1 FROM turn_embeddings WHERE turn_id = ?1")
            .bind(turn_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn count(&self) -> Result<usize, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM turn_embeddings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        Ok(n as usize)
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT turn_id, vector, source_text FROM turn_embeddings WHERE dimension = ?1",
        )
        .bind(query.len() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

        let records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vector::rank_by_similarity(&records, query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn record(turn_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            turn_id: turn_id.into(),
            vector,
            source_text: format!("source {turn_id}"),
        }
    }

    #[test]
    fn blob_roundtrip_is_exact() {
        let v = vec![0.1f32, -2.5, f32::MIN_POSITIVE, 1e9];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }

    #[tokio::test]
    async fn turns_come_back_in_order() {
        let store = test_store().await;
        let user = ConversationTurn::user("conv-1", "code", "Write a function");
        let reply = ConversationTurn::assistant("conv-1", "qwen2.5-coder:7b", "fn f() {}", Some(4));
        let other = ConversationTurn::user("conv-2", "simple", "hi");

        store.append_turn(&user).await.unwrap();
        store.append_turn(&other).await.unwrap();
        store.append_turn(&reply).await.unwrap();

        let turns = store.conversation("conv-1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_id, user.turn_id);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].content, "fn f() {}");
        assert_eq!(turns[1].token_count, 4);
        assert_eq!(turns[1].model_used, "qwen2.5-coder:7b");
    }

    #[tokio::test]
    async fn turns_are_append_only() {
        let store = test_store().await;
        let turn = ConversationTurn::user("conv-1", "simple", "original");
        store.append_turn(&turn).await.unwrap();

        let mut altered = turn.clone();
        altered.content = "rewritten".into();
        assert!(store.append_turn(&altered).await.is_err());

        let stored = store.get_turn(&turn.turn_id).await.unwrap().unwrap();
        assert_eq!(stored.content, "original");
    }

    #[tokio::test]
    async fn get_missing_turn_is_none() {
        let store = test_store().await;
        assert!(store.get_turn("nope").await.unwrap().is_none());
        assert!(store.conversation("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_same_turn_keeps_one_record() {
        let store = test_store().await;
        store.upsert(&record("t1", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("t1", vec![0.0, 1.0])).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.contains("t1").await.unwrap());
        assert!(!store.contains("t2").await.unwrap());

        let hits = store.search(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_ranks_and_ignores_other_dimensions() {
        let store = test_store().await;
        store.upsert(&record("near", vec![1.0, 0.1])).await.unwrap();
        store.upsert(&record("far", vec![0.0, 1.0])).await.unwrap();
        store.upsert(&record("3d", vec![1.0, 0.0, 0.0])).await.unwrap();

        let hits = store.search(&[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert_eq!(hits[0].source_text, "source near");
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relayclaw.db");
        let store = SqliteStore::open(&path).await.unwrap();
        store
            .append_turn(&ConversationTurn::user("c", "simple", "persisted"))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
