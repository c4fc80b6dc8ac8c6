//! Callable tools and the per-request tool set.
//!
//! A [`Tool`] pairs a declared signature (ordered, typed parameters) with an
//! async callable. Local tools are invoked positionally in declaration
//! order after their arguments validate against the derived JSON schema;
//! MCP-bridged tools receive the raw argument object untouched and leave
//! validation to the remote server.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};

pub mod registry;

pub use registry::{normalize_tool_name, ToolRegistry};

pub type PositionalHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;
pub type ObjectHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;
pub type AnnounceHook = Arc<dyn Fn(&[Value]) -> String + Send + Sync>;
pub type PresentHook = Arc<dyn Fn(&Value, &[Value]) -> String + Send + Sync>;

/// Which wire format a schema listing should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaShape {
    OpenAi,
    Anthropic,
}

#[derive(Clone)]
enum ToolExecutor {
    /// Local callable invoked with arguments in declared parameter order.
    Positional(PositionalHandler),
    /// Pass-through callable handed the raw argument object (MCP bridge).
    Object(ObjectHandler),
}

#[derive(Clone)]
pub struct ToolParameter {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub required: bool,
}

#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    schema: Value,
    executor: ToolExecutor,
    announce: Option<AnnounceHook>,
    present: Option<PresentHook>,
}

impl Tool {
    pub fn builder(name: &str, description: &str) -> ToolBuilder {
        ToolBuilder::new(name, description)
    }

    /// Wraps a remote tool descriptor; the schema arrives ready-made from
    /// the server listing and arguments are forwarded unvalidated.
    pub fn remote(name: &str, description: &str, schema: Value, handler: ObjectHandler) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            schema,
            executor: ToolExecutor::Object(handler),
            announce: None,
            present: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    /// Executes the tool against a model-supplied argument object.
    ///
    /// Errors here are tool-level: callers feed them back to the model as
    /// the tool's answer rather than failing the request.
    pub async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, String> {
        match &self.executor {
            ToolExecutor::Object(handler) => handler(arguments.clone()).await,
            ToolExecutor::Positional(handler) => {
                self.validate_arguments(arguments)?;
                handler(self.positional_arguments(arguments)).await
            }
        }
    }

    pub fn announce(&self, arguments: &Map<String, Value>) -> Option<String> {
        let hook = self.announce.as_ref()?;
        Some(hook(&self.positional_arguments(arguments)))
    }

    pub fn present(&self, result: &Value, arguments: &Map<String, Value>) -> Option<String> {
        let hook = self.present.as_ref()?;
        Some(hook(result, &self.positional_arguments(arguments)))
    }

    /// Argument keys must match declared parameter names exactly; anything
    /// absent is passed through as null for optional parameters.
    fn positional_arguments(&self, arguments: &Map<String, Value>) -> Vec<Value> {
        self.parameters
            .iter()
            .map(|parameter| arguments.get(&parameter.name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn validate_arguments(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        let validator = jsonschema::validator_for(&self.schema)
            .map_err(|err| format!("Invalid schema for tool '{}': {}", self.name, err))?;
        let instance = Value::Object(arguments.clone());
        validator
            .validate(&instance)
            .map_err(|err| format!("Invalid arguments for tool '{}': {}", self.name, err))
    }
}

pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    announce: Option<AnnounceHook>,
    present: Option<PresentHook>,
}

impl ToolBuilder {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            announce: None,
            present: None,
        }
    }

    pub fn parameter(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn optional_parameter(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            required: false,
        });
        self
    }

    pub fn announce<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        self.announce = Some(Arc::new(hook));
        self
    }

    pub fn present<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> String + Send + Sync + 'static,
    {
        self.present = Some(Arc::new(hook));
        self
    }

    pub fn handler<F>(self, handler: F) -> Tool
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        let schema = derive_parameter_schema(&self.parameters);
        Tool {
            name: normalize_tool_name(&self.name),
            description: self.description,
            parameters: self.parameters,
            schema,
            executor: ToolExecutor::Positional(Arc::new(handler)),
            announce: self.announce,
            present: self.present,
        }
    }
}

fn derive_parameter_schema(parameters: &[ToolParameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for parameter in parameters {
        properties.insert(
            parameter.name.clone(),
            json!({
                "type": parameter.kind,
                "description": parameter.description,
            }),
        );
        if parameter.required {
            required.push(Value::String(parameter.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The merged collection of tools available to one agent for one request.
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: HashMap<String, Arc<Tool>>,
}

impl ToolSet {
    pub fn insert(&mut self, tool: Arc<Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.get(name)
    }

    /// Later entries win on name clashes, so MCP tools merged after local
    /// ones shadow them.
    pub fn merge(&mut self, other: ToolSet) {
        self.tools.extend(other.tools);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Provider-shaped schema array, sorted by tool name for stable output.
    pub fn schema(&self, shape: SchemaShape) -> Value {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        let entries = names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                match shape {
                    SchemaShape::OpenAi => json!({
                        "type": "function",
                        "function": {
                            "name": tool.name(),
                            "description": tool.description(),
                            "parameters": tool.parameter_schema(),
                        }
                    }),
                    SchemaShape::Anthropic => json!({
                        "name": tool.name(),
                        "description": tool.description(),
                        "input_schema": tool.parameter_schema(),
                    }),
                }
            })
            .collect();
        Value::Array(entries)
    }
}
