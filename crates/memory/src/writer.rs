//! Persistence writer: the single owner of conversation-turn writes.
//!
//! - [`PersistenceWriter::write_turn`] writes to the structured store
//!   inside the request lifecycle, with bounded retry. Failures are logged
//!   and counted; they never change what the client receives.
//! - [`PersistenceWriter::index_turn`] hands the turn to a bounded queue
//!   served by a fixed pool of workers that embed the text and upsert it
//!   into the similarity store. A full queue drops the job.
//!
//! The two stores are written independently and may diverge: a turn can
//! be stored but never indexed.

use relayclaw_core::error::PersistenceError;
use relayclaw_core::provider::{EmbeddingRequest, Provider};
use relayclaw_core::store::{SimilarityStore, TurnStore};
use relayclaw_core::turn::{ConversationTurn, EmbeddingRecord};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where and how completed turns are indexed.
#[derive(Clone)]
pub struct IndexTarget {
    pub store: Arc<dyn SimilarityStore>,
    pub embedder: Arc<dyn Provider>,
    /// Embedding model id
    pub model: String,
}

/// Writer tuning.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub write_max_attempts: u32,
    pub index_max_attempts: u32,
    pub index_workers: usize,
    pub index_queue: usize,
    pub embed_timeout: Duration,
    /// Base delay between attempts; grows linearly per attempt
    pub retry_backoff: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            write_max_attempts: 3,
            index_max_attempts: 3,
            index_workers: 2,
            index_queue: 256,
            embed_timeout: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct Counters {
    turns_written: AtomicU64,
    write_failures: AtomicU64,
    indexed: AtomicU64,
    index_skipped: AtomicU64,
    index_dropped: AtomicU64,
    index_failed: AtomicU64,
}

/// Point-in-time persistence counters, reported on `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceStats {
    pub turns_written: u64,
    pub write_failures: u64,
    pub indexed: u64,
    /// Jobs skipped because the turn was already indexed
    pub index_skipped: u64,
    /// Jobs dropped because the queue was full or closed
    pub index_dropped: u64,
    /// Jobs abandoned after exhausting retries
    pub index_failed: u64,
}

struct IndexJob {
    turn_id: String,
    text: String,
}

pub struct PersistenceWriter {
    turns: Arc<dyn TurnStore>,
    settings: WriterSettings,
    counters: Arc<Counters>,
    indexing: bool,
    queue: std::sync::Mutex<Option<mpsc::Sender<IndexJob>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl PersistenceWriter {
    /// Create a writer. Must be called inside a tokio runtime when `index`
    /// is set, since the worker pool is spawned immediately.
    pub fn new(
        turns: Arc<dyn TurnStore>,
        index: Option<IndexTarget>,
        settings: WriterSettings,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let indexing = index.is_some();

        let (queue, workers) = match index {
            Some(target) => {
                let (tx, rx) = mpsc::channel(settings.index_queue.max(1));
                let rx = Arc::new(tokio::sync::Mutex::new(rx));
                let target = Arc::new(target);
                let workers = (0..settings.index_workers.max(1))
                    .map(|worker| {
                        tokio::spawn(index_worker(
                            worker,
                            rx.clone(),
                            target.clone(),
                            settings.clone(),
                            counters.clone(),
                        ))
                    })
                    .collect();
                info!(
                    workers = settings.index_workers,
                    queue = settings.index_queue,
                    model = %target.model,
                    "Similarity indexing enabled"
                );
                (Some(tx), workers)
            }
            None => {
                info!("Similarity indexing disabled (no embedding model configured)");
                (None, Vec::new())
            }
        };

        Self {
            turns,
            settings,
            counters,
            indexing,
            queue: std::sync::Mutex::new(queue),
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    pub fn indexing_enabled(&self) -> bool {
        self.indexing
    }

    /// Append a turn to the structured store, retrying transient failures.
    ///
    /// Returns whether the turn was stored.
    pub async fn write_turn(&self, turn: &ConversationTurn) -> bool {
        let max = self.settings.write_max_attempts.max(1);
        for attempt in 1..=max {
            match self.turns.append_turn(turn).await {
                Ok(()) => {
                    self.counters.turns_written.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) if attempt < max => {
                    warn!(
                        turn_id = %turn.turn_id,
                        attempt,
                        error = %e,
                        "Turn write failed, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                }
                Err(e) => {
                    self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        turn_id = %turn.turn_id,
                        conversation_id = %turn.conversation_id,
                        error = %e,
                        "Turn write failed, giving up"
                    );
                }
            }
        }
        false
    }

    /// Queue a turn for embedding. Never blocks; a full queue drops the job.
    pub fn index_turn(&self, turn: &ConversationTurn) {
        if !self.indexing || turn.content.trim().is_empty() {
            return;
        }

        let job = IndexJob {
            turn_id: turn.turn_id.clone(),
            text: turn.content.clone(),
        };

        let guard = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(tx) = guard.as_ref() else {
            self.counters.index_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(turn_id = %turn.turn_id, "Index queue closed, dropping job");
            return;
        };

        match tx.try_send(job) {
            Ok(()) => debug!(turn_id = %turn.turn_id, "Index job queued"),
            Err(TrySendError::Full(job)) => {
                self.counters.index_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(turn_id = %job.turn_id, "Index queue full, dropping job");
            }
            Err(TrySendError::Closed(job)) => {
                self.counters.index_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(turn_id = %job.turn_id, "Index queue closed, dropping job");
            }
        }
    }

    /// Close the index queue and wait for the workers to drain it.
    pub async fn shutdown(&self) {
        let sender = match self.queue.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Index worker ended abnormally");
            }
        }

        info!(stats = ?self.stats(), "Persistence writer drained");
    }

    pub fn stats(&self) -> PersistenceStats {
        let c = &self.counters;
        PersistenceStats {
            turns_written: c.turns_written.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            indexed: c.indexed.load(Ordering::Relaxed),
            index_skipped: c.index_skipped.load(Ordering::Relaxed),
            index_dropped: c.index_dropped.load(Ordering::Relaxed),
            index_failed: c.index_failed.load(Ordering::Relaxed),
        }
    }
}

async fn index_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<IndexJob>>>,
    target: Arc<IndexTarget>,
    settings: WriterSettings,
    counters: Arc<Counters>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };
        index_one(&job, &target, &settings, &counters).await;
    }
    debug!(worker, "Index worker stopped");
}

async fn index_one(
    job: &IndexJob,
    target: &IndexTarget,
    settings: &WriterSettings,
    counters: &Counters,
) {
    match target.store.contains(&job.turn_id).await {
        Ok(true) => {
            counters.index_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(turn_id = %job.turn_id, "Turn already indexed");
            return;
        }
        Ok(false) => {}
        // The upsert is idempotent, so an unknown state is safe to index
        Err(e) => debug!(turn_id = %job.turn_id, error = %e, "Index lookup failed"),
    }

    let max = settings.index_max_attempts.max(1);
    for attempt in 1..=max {
        match embed_and_upsert(job, target, settings).await {
            Ok(()) => {
                counters.indexed.fetch_add(1, Ordering::Relaxed);
                debug!(turn_id = %job.turn_id, "Turn indexed");
                return;
            }
            Err(e) if attempt < max => {
                debug!(turn_id = %job.turn_id, attempt, error = %e, "Indexing failed, retrying");
                tokio::time::sleep(settings.retry_backoff * attempt).await;
            }
            Err(e) => {
                counters.index_failed.fetch_add(1, Ordering::Relaxed);
                warn!(turn_id = %job.turn_id, error = %e, "Indexing failed, dropping job");
            }
        }
    }
}

async fn embed_and_upsert(
    job: &IndexJob,
    target: &IndexTarget,
    settings: &WriterSettings,
) -> Result<(), PersistenceError> {
    let request = EmbeddingRequest {
        model: target.model.clone(),
        inputs: vec![job.text.clone()],
    };

    let response = tokio::time::timeout(settings.embed_timeout, target.embedder.embed(request))
        .await
        .map_err(|_| {
            PersistenceError::EmbeddingFailed(format!(
                "timed out after {}ms",
                settings.embed_timeout.as_millis()
            ))
        })?
        .map_err(|e| PersistenceError::EmbeddingFailed(e.to_string()))?;

    let vector = response
        .embeddings
        .into_iter()
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PersistenceError::EmbeddingFailed("empty embedding response".into()))?;

    target
        .store
        .upsert(&EmbeddingRecord {
            turn_id: job.turn_id.clone(),
            vector,
            source_text: job.text.clone(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use async_trait::async_trait;
    use relayclaw_core::error::ProviderError;
    use relayclaw_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Semaphore;

    /// Embeds text as `[len, 1.0]`; fails the first `fail_first` calls and
    /// waits on `gate` when set.
    struct TestEmbedder {
        calls: AtomicU32,
        fail_first: u32,
        gate: Option<Arc<Semaphore>>,
    }

    impl TestEmbedder {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
                gate: None,
            }
        }
    }

    #[async_trait]
    impl Provider for TestEmbedder {
        fn name(&self) -> &str {
            "test-embedder"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("embedding only".into()))
        }

        async fn embed(
            &self,
            request: EmbeddingRequest,
        ) -> Result<EmbeddingResponse, ProviderError> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ProviderError::Network("connection refused".into()));
            }
            Ok(EmbeddingResponse {
                embeddings: request.inputs.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
                model: request.model,
                usage: None,
            })
        }
    }

    /// A turn store that fails the first `fail_first` appends.
    struct FlakyTurnStore {
        inner: InMemoryStore,
        attempts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TurnStore for FlakyTurnStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), PersistenceError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(PersistenceError::Storage("database is locked".into()));
            }
            self.inner.append_turn(turn).await
        }

        async fn conversation(&self, id: &str) -> Result<Vec<ConversationTurn>, PersistenceError> {
            self.inner.conversation(id).await
        }

        async fn get_turn(&self, id: &str) -> Result<Option<ConversationTurn>, PersistenceError> {
            self.inner.get_turn(id).await
        }
    }

    fn settings() -> WriterSettings {
        WriterSettings {
            retry_backoff: Duration::ZERO,
            ..WriterSettings::default()
        }
    }

    fn writer_with(
        store: &InMemoryStore,
        embedder: TestEmbedder,
        settings: WriterSettings,
    ) -> PersistenceWriter {
        PersistenceWriter::new(
            Arc::new(store.clone()),
            Some(IndexTarget {
                store: Arc::new(store.clone()),
                embedder: Arc::new(embedder),
                model: "nomic-embed-text".into(),
            }),
            settings,
        )
    }

    #[tokio::test]
    async fn write_turn_stores_turn() {
        let store = InMemoryStore::new();
        let writer = PersistenceWriter::new(Arc::new(store.clone()), None, settings());
        let turn = ConversationTurn::user("c1", "simple", "hello");

        assert!(writer.write_turn(&turn).await);
        assert_eq!(store.get_turn(&turn.turn_id).await.unwrap().unwrap().content, "hello");
        assert_eq!(writer.stats().turns_written, 1);
    }

    #[tokio::test]
    async fn write_turn_retries_transient_failures() {
        let turns = Arc::new(FlakyTurnStore {
            inner: InMemoryStore::new(),
            attempts: AtomicU32::new(0),
            fail_first: 2,
        });
        let writer = PersistenceWriter::new(turns.clone(), None, settings());
        let turn = ConversationTurn::user("c1", "simple", "hello");

        assert!(writer.write_turn(&turn).await);
        assert_eq!(turns.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(writer.stats().write_failures, 0);
    }

    #[tokio::test]
    async fn write_turn_gives_up_and_counts() {
        let turns = Arc::new(FlakyTurnStore {
            inner: InMemoryStore::new(),
            attempts: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let writer = PersistenceWriter::new(turns.clone(), None, settings());

        assert!(!writer.write_turn(&ConversationTurn::user("c1", "simple", "x")).await);
        assert_eq!(turns.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(writer.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn index_turn_twice_yields_one_record() {
        let store = InMemoryStore::new();
        let writer = writer_with(&store, TestEmbedder::ok(), settings());
        let turn = ConversationTurn::assistant("c1", "llama3.2:3b", "Hello", None);

        writer.index_turn(&turn);
        writer.index_turn(&turn);
        writer.shutdown().await;

        assert_eq!(SimilarityStore::count(&store).await.unwrap(), 1);
        assert!(store.contains(&turn.turn_id).await.unwrap());
        let stats = writer.stats();
        assert_eq!(stats.indexed + stats.index_skipped, 2);
    }

    #[tokio::test]
    async fn index_retries_then_succeeds() {
        let store = InMemoryStore::new();
        let embedder = TestEmbedder {
            fail_first: 2,
            ..TestEmbedder::ok()
        };
        let writer = writer_with(&store, embedder, settings());

        writer.index_turn(&ConversationTurn::user("c1", "simple", "retry me"));
        writer.shutdown().await;

        assert_eq!(SimilarityStore::count(&store).await.unwrap(), 1);
        assert_eq!(writer.stats().index_failed, 0);
    }

    #[tokio::test]
    async fn index_gives_up_after_max_attempts() {
        let store = InMemoryStore::new();
        let embedder = TestEmbedder {
            fail_first: u32::MAX,
            ..TestEmbedder::ok()
        };
        let writer = writer_with(&store, embedder, settings());

        writer.index_turn(&ConversationTurn::user("c1", "simple", "never"));
        writer.shutdown().await;

        assert_eq!(SimilarityStore::count(&store).await.unwrap(), 0);
        assert_eq!(writer.stats().index_failed, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_jobs() {
        let store = InMemoryStore::new();
        let gate = Arc::new(Semaphore::new(0));
        let embedder = TestEmbedder {
            gate: Some(gate.clone()),
            ..TestEmbedder::ok()
        };
        let writer = writer_with(
            &store,
            embedder,
            WriterSettings {
                index_workers: 1,
                index_queue: 1,
                embed_timeout: Duration::from_secs(30),
                ..settings()
            },
        );

        for i in 0..3 {
            writer.index_turn(&ConversationTurn::user("c1", "simple", format!("turn {i}")));
        }
        assert!(writer.stats().index_dropped >= 1);

        gate.add_permits(10);
        writer.shutdown().await;
        let stats = writer.stats();
        assert_eq!(stats.indexed + stats.index_dropped, 3);
    }

    #[tokio::test]
    async fn disabled_indexing_is_a_no_op() {
        let store = InMemoryStore::new();
        let writer = PersistenceWriter::new(Arc::new(store.clone()), None, settings());
        assert!(!writer.indexing_enabled());

        writer.index_turn(&ConversationTurn::user("c1", "simple", "hi"));
        writer.shutdown().await;
        assert_eq!(writer.stats(), PersistenceStats::default());
    }

    #[tokio::test]
    async fn index_after_shutdown_is_dropped() {
        let store = InMemoryStore::new();
        let writer = writer_with(&store, TestEmbedder::ok(), settings());
        writer.shutdown().await;

        writer.index_turn(&ConversationTurn::user("c1", "simple", "late"));
        assert_eq!(writer.stats().index_dropped, 1);
    }
}
