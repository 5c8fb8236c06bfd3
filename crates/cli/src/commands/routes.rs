//! `relayclaw routes`: show the validated route table.

use relayclaw_routing::{RouteTable, Router};
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let table = RouteTable::from_config(&config)?;
    let providers = relayclaw_providers::build_from_config(&config);
    let router = Router::from_config(&config, &providers)?;

    println!("RelayClaw Routes");
    println!("================");
    println!("  Config:    {}", config_path.display());
    println!("  Default:   {}", table.default_route().name);
    println!(
        "  Tiers:     {}",
        router.tiers().iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" → ")
    );
    println!("  Threshold: {}", config.routing.borderline_threshold);
    println!();

    for route in table.routes() {
        let marker = if route.name == table.default_route().name {
            "*"
        } else {
            " "
        };
        println!("  {marker} {:<12} {}", route.name, route.backend_model_id);
    }
    println!();
    println!("{}", table.help_text());

    Ok(())
}
