//! The route table: routes, default route and directive aliases.
//!
//! Readers take a snapshot per request with [`SharedRouteTable::load`];
//! a reload builds and validates a whole new table, then swaps it in
//! atomically. In-flight requests keep the snapshot they started with.

use crate::overrides::OverrideParser;
use arc_swap::ArcSwap;
use relayclaw_config::{AppConfig, ConfigError};
use relayclaw_core::route::Route;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    default_route: Route,
    overrides: OverrideParser,
}

impl RouteTable {
    /// Build a table from validated configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let default_route = config
            .route(&config.routing.default_route)
            .cloned()
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "default route '{}' is not in the route table",
                    config.routing.default_route
                ))
            })?;

        Ok(Self {
            routes: config.routes.clone(),
            default_route,
            overrides: OverrideParser::new(&config.overrides, &config.routes),
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn default_route(&self) -> &Route {
        &self.default_route
    }

    pub fn overrides(&self) -> &OverrideParser {
        &self.overrides
    }

    pub fn resolve(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn help_text(&self) -> String {
        self.overrides.help_text(&self.routes)
    }
}

/// A route table shared across requests and swapped on reload.
#[derive(Debug, Clone)]
pub struct SharedRouteTable {
    inner: Arc<ArcSwap<RouteTable>>,
}

impl SharedRouteTable {
    pub fn new(table: RouteTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// The current table.
    pub fn load(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }

    pub fn store(&self, table: RouteTable) {
        self.inner.store(Arc::new(table));
    }
}
