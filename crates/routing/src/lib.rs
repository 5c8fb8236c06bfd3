//! # RelayClaw Routing
//!
//! Decides which route answers a request. Tiers run cheapest first and
//! the first confident one wins:
//!
//! 1. [`overrides`]: an explicit `z: code ...` directive
//! 2. [`embedding`]: nearest [`centroid`] to the prompt embedding
//! 3. [`decision`]: a small model answering in JSON
//! 4. the configured default route
//!
//! [`cascade::Router`] runs them over the hot-swappable [`table`].

pub mod cascade;
pub mod centroid;
pub mod decision;
pub mod embedding;
pub mod overrides;
pub mod table;

#[cfg(test)]
mod testing;

pub use cascade::{Routed, Router, RoutingDecision, Stage, StageOutcome, StageTrace};
pub use centroid::{CentroidError, CentroidSet};
pub use decision::DecisionEngine;
pub use embedding::EmbeddingClassifier;
pub use overrides::{Directive, OverrideParser, ParsedOverride};
pub use table::{RouteTable, SharedRouteTable};
