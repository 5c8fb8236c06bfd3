//! Storage traits for conversation turns and their embeddings.
//!
//! Implementations: SQLite (durable) and in-memory (for testing).
//! Both traits are append/upsert only; nothing in the proxy deletes
//! history.

use crate::error::PersistenceError;
use crate::turn::{ConversationTurn, EmbeddingRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A similarity search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub turn_id: String,
    pub source_text: String,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// The durable conversation log.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append one turn. Turns are never updated after this.
    async fn append_turn(
        &self,
        turn: &ConversationTurn,
    ) -> std::result::Result<(), PersistenceError>;

    /// All turns of a conversation, oldest first.
    async fn conversation(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<ConversationTurn>, PersistenceError>;

    /// A single turn by id.
    async fn get_turn(
        &self,
        turn_id: &str,
    ) -> std::result::Result<Option<ConversationTurn>, PersistenceError>;
}

/// The vector index over persisted turns, keyed by turn id.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the vector for `record.turn_id`.
    ///
    /// Upserting the same turn twice leaves exactly one record.
    async fn upsert(&self, record: &EmbeddingRecord) -> std::result::Result<(), PersistenceError>;

    /// Whether an embedding for this turn already exists.
    async fn contains(&self, turn_id: &str) -> std::result::Result<bool, PersistenceError>;

    /// Number of indexed turns.
    async fn count(&self) -> std::result::Result<usize, PersistenceError>;

    /// The `limit` nearest records to `vector`, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> std::result::Result<Vec<SimilarityHit>, PersistenceError>;
}
