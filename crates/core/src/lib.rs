//! # RelayClaw Core
//!
//! Domain types, traits, and error definitions for the RelayClaw routing
//! proxy. This crate has **no framework dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Layout
//!
//! - [`message`]: OpenAI-style chat messages as they cross the proxy
//! - [`provider`]: the seam over backend, embedding and decision models
//! - [`route`] / [`classification`]: routing targets and cascade results
//! - [`turn`] / [`store`]: persisted conversation records and their stores
//! - [`wire`]: audit-log events
//! - [`tool`]: the tool capability used for forced tool context

pub mod classification;
pub mod error;
pub mod message;
pub mod provider;
pub mod route;
pub mod store;
pub mod tool;
pub mod turn;
pub mod wire;

// Re-export key types at crate root for ergonomics
pub use classification::{ClassificationResult, Tier};
pub use error::{Error, Result};
pub use message::{ChatMessage, ChatRequest, ConversationId, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use route::{Route, RouteName};
pub use store::{SimilarityHit, SimilarityStore, TurnStore};
pub use tool::{Tool, ToolRegistry};
pub use turn::{ConversationTurn, EmbeddingRecord, TurnRole};
pub use wire::{Direction, WireEvent};
