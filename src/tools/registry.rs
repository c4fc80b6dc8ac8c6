//! Registry of locally defined tools.
//!
//! Tools register once at process start; a name collision after
//! normalization aborts startup rather than surfacing per request.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::error::GatewayError;
use crate::tools::{SchemaShape, Tool, ToolSet};

/// Converts a human-readable identifier into a snake-cased, provider-safe
/// token ("searchGoogle" -> "search_google", "Scrape URL" -> "scrape_url").
pub fn normalize_tool_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (index, ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev = index.checked_sub(1).map(|i| chars[i]);
            let next = chars.get(index + 1);
            let boundary = match prev {
                Some(prev_ch) => {
                    prev_ch.is_lowercase()
                        || prev_ch.is_ascii_digit()
                        || (prev_ch.is_uppercase()
                            && next.is_some_and(|next_ch| next_ch.is_lowercase()))
                }
                None => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else if ch.is_alphanumeric() {
            out.push(*ch);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }

    out.trim_end_matches('_').to_string()
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its normalized name. Collisions are fatal at
    /// load time, not per request.
    pub fn register(&mut self, tool: Tool) -> Result<(), GatewayError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(GatewayError::Configuration(format!(
                "Duplicate tool name '{}' after normalization",
                name
            )));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the registered tools as a fresh [`ToolSet`] plus the
    /// provider-shaped schema array for `shape`.
    pub fn list_tools(&self, shape: SchemaShape) -> (ToolSet, Value) {
        let mut set = ToolSet::default();
        for tool in self.tools.values() {
            set.insert(tool.clone());
        }
        let schema = set.schema(shape);
        (set, schema)
    }

    /// The tool set alone, for callers that derive the schema after merging
    /// in MCP tools.
    pub fn tool_set(&self) -> ToolSet {
        let mut set = ToolSet::default();
        for tool in self.tools.values() {
            set.insert(tool.clone());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_identifiers_to_snake_case() {
        assert_eq!(normalize_tool_name("searchGoogle"), "search_google");
        assert_eq!(normalize_tool_name("Scrape URL"), "scrape_url");
        assert_eq!(normalize_tool_name("execute-code"), "execute_code");
        assert_eq!(normalize_tool_name("already_snake"), "already_snake");
        assert_eq!(normalize_tool_name("HTTPFetch"), "http_fetch");
    }

    #[test]
    fn collisions_after_normalization_are_fatal() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                Tool::builder("searchGoogle", "one")
                    .handler(|_| Box::pin(async { Ok(Value::Null) })),
            )
            .unwrap();

        let err = registry
            .register(
                Tool::builder("search_google", "two")
                    .handler(|_| Box::pin(async { Ok(Value::Null) })),
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn list_tools_returns_set_and_schema() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                Tool::builder("searchGoogle", "Search the web.")
                    .parameter("q", "string", "The search query")
                    .handler(|_| Box::pin(async { Ok(Value::Null) })),
            )
            .unwrap();

        let (set, schema) = registry.list_tools(SchemaShape::OpenAi);
        assert!(set.get("search_google").is_some());
        assert_eq!(schema[0]["function"]["name"], json!("search_google"));
        assert_eq!(
            schema[0]["function"]["parameters"]["required"],
            json!(["q"])
        );
    }
}
