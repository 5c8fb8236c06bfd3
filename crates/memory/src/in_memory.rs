//! In-memory turn and similarity store (for testing and ephemeral runs).

use crate::vector;
use async_trait::async_trait;
use relayclaw_core::error::PersistenceError;
use relayclaw_core::store::{SimilarityHit, SimilarityStore, TurnStore};
use relayclaw_core::turn::{ConversationTurn, EmbeddingRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Non-persistent store backed by `Vec` and `HashMap`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    turns: Arc<RwLock<Vec<ConversationTurn>>>,
    embeddings: Arc<RwLock<HashMap<String, EmbeddingRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored turn, in insertion order.
    pub async fn all_turns(&self) -> Vec<ConversationTurn> {
        self.turns.read().await.clone()
    }
}

#[async_trait]
impl TurnStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), PersistenceError> {
        let mut turns = self.turns.write().await;
        if turns.iter().any(|t| t.turn_id == turn.turn_id) {
            return Err(PersistenceError::Storage(format!("turn {} already exists", turn.turn_id)));
        }
        turns.push(turn.clone());
        Ok(())
    }

    async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationTurn>, PersistenceError> {
        let turns = self.turns.read().await;
        Ok(turns
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<ConversationTurn>, PersistenceError> {
        let turns = self.turns.read().await;
        Ok(turns.iter().find(|t| t.turn_id == turn_id).cloned())
    }
}

#[async_trait]
impl SimilarityStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<(), PersistenceError> {
        self.embeddings
            .write()
            .await
            .insert(record.turn_id.clone(), record.clone());
        Ok(())
    }

    async fn contains(&self, turn_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.embeddings.read().await.contains_key(turn_id))
    }

    async fn count(&self) -> Result<usize, PersistenceError> {
        Ok(self.embeddings.read().await.len())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, PersistenceError> {
        let embeddings = self.embeddings.read().await;
        Ok(vector::rank_by_similarity(embeddings.values(), query, limit))
    }
}
