//! Routes: named destinations a request can be assigned to.

use serde::{Deserialize, Serialize};

/// The name of a route, e.g. `"simple"`, `"complex"`, `"code"`.
pub type RouteName = String;

/// A named routing target, defined entirely by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Unique route name
    pub name: RouteName,

    /// The concrete model id the backend is asked for
    pub backend_model_id: String,

    /// Shown in the override help text
    #[serde(default)]
    pub description: String,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        backend_model_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend_model_id: backend_model_id.into(),
            description: description.into(),
        }
    }
}
