//! `relayclaw classify`: route a prompt without calling the backend.
//!
//! The embedding and decision tiers still call their configured models.

use relayclaw_routing::{Routed, Router};
use std::path::Path;

pub async fn run(config_path: &Path, prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let providers = relayclaw_providers::build_from_config(&config);
    let router = Router::from_config(&config, &providers)?;

    match router.route(prompt).await {
        Routed::Help(text) => println!("{text}"),
        Routed::Decided(decision) => {
            let report = serde_json::json!({
                "route": decision.route.name,
                "backend_model_id": decision.route.backend_model_id,
                "classification": decision.result,
                "rewritten_prompt": decision.rewritten_prompt,
                "trace": decision.trace,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
