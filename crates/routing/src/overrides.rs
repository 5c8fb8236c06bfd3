//! Tier 1: explicit routing directives typed by the user.
//!
//! ```text
//! z: code Write a function            → route "code"
//! z: code, search Write a function    → route "code", tool "search"
//! z: web latest rust release          → tool "search", route left to the cascade
//! z: help                             → directive listing, no backend call
//! ```
//!
//! The prefix is matched case-insensitively after leading whitespace. The
//! first whitespace-delimited token after it is the directive group; the
//! group continues across whitespace while a token ends with `,` or the
//! next one starts with `,`. Everything after the group is the prompt.
//! Parsing is pure: no I/O, no allocation beyond the result.

use relayclaw_config::OverrideConfig;
use relayclaw_core::classification::{ClassificationResult, Tier};
use relayclaw_core::route::{Route, RouteName};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use tracing::{debug, warn};

const HELP_DIRECTIVE: &str = "help";

/// Parsed directives from one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// The forced route, if a route alias was given
    pub route: Option<RouteName>,
    /// Forced tools, by tool name
    pub tools: BTreeSet<String>,
    /// The prompt with prefix and directive group removed
    pub prompt: String,
    /// Tokens that matched nothing
    pub ignored: Vec<String>,
}

impl Directive {
    /// The Tier 1 result, when the directive decides the route.
    pub fn classification(&self) -> Option<ClassificationResult> {
        self.route.as_ref().map(|route| {
            ClassificationResult::decided(route.clone(), 1.0, Tier::Override)
                .with_tools(self.tools.iter().cloned())
                .with_reasoning("explicit directive")
        })
    }
}

/// Result of scanning a prompt for directives.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOverride {
    /// No prefix present; route the text as-is
    Absent,
    /// The directive list was exactly `help`
    Help,
    Directive(Directive),
}

/// Directive parser built from the override config and the route table.
#[derive(Debug, Clone)]
pub struct OverrideParser {
    prefix: String,
    /// alias (lowercase) → route name; includes every route name itself
    route_aliases: BTreeMap<String, RouteName>,
    /// alias (lowercase) → tool name
    tool_aliases: BTreeMap<String, String>,
}

impl OverrideParser {
    pub fn new(config: &OverrideConfig, routes: &[Route]) -> Self {
        let mut route_aliases: BTreeMap<String, RouteName> = config
            .route_aliases
            .iter()
            .map(|(alias, route)| (alias.to_lowercase(), route.clone()))
            .collect();
        for route in routes {
            route_aliases.insert(route.name.to_lowercase(), route.name.clone());
        }

        let tool_aliases = config
            .tool_aliases
            .iter()
            .map(|(alias, tool)| (alias.to_lowercase(), tool.clone()))
            .collect();

        Self {
            prefix: config.prefix.trim().to_string(),
            route_aliases,
            tool_aliases,
        }
    }

    /// Scan `text` for a directive prefix.
    pub fn parse(&self, text: &str) -> ParsedOverride {
        let trimmed = text.trim_start();
        let Some(head) = trimmed.get(..self.prefix.len()) else {
            return ParsedOverride::Absent;
        };
        if self.prefix.is_empty() || !head.eq_ignore_ascii_case(&self.prefix) {
            return ParsedOverride::Absent;
        }

        let (group, prompt) = split_directive_group(trimmed[self.prefix.len()..].trim_start());

        let tokens: Vec<String> = group
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.len() == 1 && tokens[0] == HELP_DIRECTIVE {
            return ParsedOverride::Help;
        }

        let mut directive = Directive {
            route: None,
            tools: BTreeSet::new(),
            prompt: prompt.trim().to_string(),
            ignored: Vec::new(),
        };

        for token in tokens {
            if let Some(route) = self.route_aliases.get(&token) {
                match &directive.route {
                    None => directive.route = Some(route.clone()),
                    Some(first) if first != route => {
                        warn!(
                            kept = %first,
                            ignored = %route,
                            "Multiple route directives, keeping the first"
                        );
                    }
                    Some(_) => {}
                }
            } else if let Some(tool) = self.tool_aliases.get(&token) {
                directive.tools.insert(tool.clone());
            } else {
                directive.ignored.push(token);
            }
        }

        if !directive.ignored.is_empty() {
            warn!(tokens = ?directive.ignored, "Ignoring unknown override directives");
        }
        debug!(route = ?directive.route, tools = ?directive.tools, "Override directive parsed");

        ParsedOverride::Directive(directive)
    }

    /// The in-band listing returned for `<prefix> help`.
    pub fn help_text(&self, routes: &[Route]) -> String {
        let mut out = String::new();
        let prefix = &self.prefix;
        let _ = writeln!(
            out,
            "Routing directives: start your message with `{prefix} <directives> <prompt>`."
        );
        let _ = writeln!(
            out,
            "Combine directives with commas, e.g. `{prefix} code, search How do I ...`."
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Routes:");
        for route in routes {
            let aliases: Vec<&str> = self
                .route_aliases
                .iter()
                .filter(|(alias, target)| {
                    **target == route.name && **alias != route.name.to_lowercase()
                })
                .map(|(alias, _)| alias.as_str())
                .collect();
            let _ = write!(out, "  {} → {}", route.name, route.backend_model_id);
            if !aliases.is_empty() {
                let _ = write!(out, " (aliases: {})", aliases.join(", "));
            }
            if !route.description.is_empty() {
                let _ = write!(out, ": {}", route.description);
            }
            let _ = writeln!(out);
        }

        if !self.tool_aliases.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Tools:");
            let mut by_tool: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (alias, tool) in &self.tool_aliases {
                by_tool.entry(tool.as_str()).or_default().push(alias.as_str());
            }
            for (tool, aliases) in by_tool {
                let _ = writeln!(out, "  {tool} ({})", aliases.join(", "));
            }
        }

        let _ = writeln!(out);
        let _ = write!(out, "`{prefix} help` shows this message.");
        out
    }
}

/// Split `rest` into the directive group and the remaining prompt.
fn split_directive_group(rest: &str) -> (String, &str) {
    let mut group = String::new();
    let mut rest = rest;

    while !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..end];
        group.push_str(token);
        let after = rest[end..].trim_start();
        let continues = token.ends_with(',') || after.starts_with(',');
        rest = after;
        if !continues {
            break;
        }
    }

    (group, rest)
}
