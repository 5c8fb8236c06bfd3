//! Persistence for RelayClaw: conversation turns, their embeddings, and
//! the writer that owns both.

pub mod in_memory;
pub mod recall;
pub mod vector;
pub mod writer;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use recall::{RECALL_TOOL, RecallTool};
pub use vector::{cosine_similarity, rank_by_similarity};
pub use writer::{IndexTarget, PersistenceStats, PersistenceWriter, WriterSettings};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
