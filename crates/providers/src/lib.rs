//! Model endpoint clients for RelayClaw.
//!
//! Every endpoint the proxy talks to (the inference backend, the embedding
//! provider, the decision model) implements `relayclaw_core::Provider`
//! through [`OpenAiCompatProvider`]. [`registry::build_from_config`] wires
//! them up from configuration.

pub mod openai_compat;
pub mod registry;

pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ModelEndpoint, ProviderSet, build_from_config};
