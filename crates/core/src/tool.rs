//! Tool trait: the abstraction over avatar capabilities.
//!
//! Tools give an avatar the ability to look things up or compute things
//! while it composes a reply: search the web, evaluate an expression, read a
//! page. Each tool declares a [`ToolSpec`] once; the registry validates every
//! proposed invocation against it before the tool ever runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    /// The JSON Schema `type` keyword for this kind.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    /// Whether a JSON value has this kind. Integers count as numbers.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// The declared contract of a tool: name, description, parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique key in the registry
    pub name: String,

    /// Natural-language description (sent to the model)
    pub description: String,

    /// Named parameters
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// Render as a JSON Schema object.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.kind.json_type(),
                    "description": p.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert into a ToolDefinition for sending to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }

    /// Check arguments against the declared parameters.
    ///
    /// Arguments must be an object; every required parameter present; every
    /// present parameter of the declared type; no undeclared keys. `null` for
    /// an optional parameter counts as absent.
    pub fn validate(&self, arguments: &Value) -> std::result::Result<Map<String, Value>, ToolError> {
        let Value::Object(args) = arguments else {
            return Err(ToolError::InvalidArguments(format!(
                "{}: arguments must be a JSON object",
                self.name
            )));
        };

        for key in args.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(ToolError::InvalidArguments(format!(
                    "{}: unknown parameter '{key}'",
                    self.name
                )));
            }
        }

        let mut clean = Map::new();
        for p in &self.params {
            match args.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "{}: missing required parameter '{}'",
                        self.name, p.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(v) if !p.kind.matches(v) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "{}: parameter '{}' must be of type {}",
                        self.name,
                        p.name,
                        p.kind.json_type()
                    )));
                }
                Some(v) => {
                    clean.insert(p.name.clone(), v.clone());
                }
            }
        }
        Ok(clean)
    }
}

/// A tool call proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

impl ToolInvocation {
    /// Build from the raw call a backend returned. Unparseable argument text
    /// becomes a string value so validation reports it.
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw_arguments: &str) -> Self {
        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw_arguments).unwrap_or_else(|_| Value::String(raw_arguments.to_string()))
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one invocation, fed back into the next model round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Tool that was asked for
    pub tool_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Output text, or the error text on failure
    pub output: String,
}

impl ToolResult {
    pub fn ok(invocation: &ToolInvocation, output: impl Into<String>) -> Self {
        Self {
            call_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            success: true,
            output: output.into(),
        }
    }

    pub fn error(invocation: &ToolInvocation, err: &ToolError) -> Self {
        Self {
            call_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            success: false,
            output: format!("Error: {err}"),
        }
    }
}

/// The core Tool trait.
///
/// Each built-in tool (calculator, web_search, wikipedia, ...) implements
/// this trait and is enumerated once at startup.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The declared contract. Its `name` must equal the registration name.
    fn spec(&self) -> ToolSpec;

    /// Execute with arguments that already passed validation.
    async fn execute(&self, arguments: Map<String, Value>) -> std::result::Result<String, ToolError>;
}

struct Registered {
    spec: ToolSpec,
    tool: Box<dyn Tool>,
}

/// An immutable mapping from tool name to spec + executable.
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Build the registry from `(declared name, tool)` pairs.
    ///
    /// A tool whose spec name differs from its declared name, or whose name
    /// is already taken, is rejected and logged; the rest still register.
    pub fn discover(candidates: Vec<(String, Box<dyn Tool>)>, timeout: Duration) -> Self {
        let mut registry = Self::new(timeout);
        for (declared, tool) in candidates {
            if let Err(e) = registry.register_as(&declared, tool) {
                error!(tool = %declared, error = %e, "Tool rejected during discovery");
            }
        }
        debug!(tools = ?registry.names(), "Tool discovery complete");
        registry
    }

    /// Register one tool under `declared`.
    pub fn register_as(&mut self, declared: &str, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let spec = tool.spec();
        if spec.name != declared {
            return Err(ToolError::Registration(format!(
                "declared name '{declared}' does not match spec name '{}'",
                spec.name
            )));
        }
        if self.tools.contains_key(declared) {
            return Err(ToolError::Registration(format!("duplicate tool name '{declared}'")));
        }
        self.tools.insert(declared.to_string(), Registered { spec, tool });
        Ok(())
    }

    /// Get a tool's spec by name.
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|r| &r.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions for the given names, skipping unknown ones, in input order.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|r| r.spec.to_definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate and execute an invocation. Never returns an error: every
    /// failure becomes an error ToolResult.
    pub async fn invoke(&self, invocation: &ToolInvocation) -> ToolResult {
        let Some(entry) = self.tools.get(&invocation.name) else {
            return ToolResult::error(invocation, &ToolError::NotFound(invocation.name.clone()));
        };

        let args = match entry.spec.validate(&invocation.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "Tool arguments rejected");
                return ToolResult::error(invocation, &e);
            }
        };

        match tokio::time::timeout(self.timeout, entry.tool.execute(args)).await {
            Ok(Ok(output)) => ToolResult::ok(invocation, output),
            Ok(Err(e)) => {
                warn!(tool = %invocation.name, error = %e, "Tool execution failed");
                ToolResult::error(invocation, &e)
            }
            Err(_) => {
                let e = ToolError::Timeout {
                    tool_name: invocation.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                };
                warn!(tool = %invocation.name, "Tool timed out");
                ToolResult::error(invocation, &e)
            }
        }
    }

    /// Like [`invoke`](Self::invoke), but first checks the tool is in the
    /// caller's enabled set. A disabled tool never executes.
    pub async fn invoke_enabled(&self, invocation: &ToolInvocation, enabled: &[String]) -> ToolResult {
        if !enabled.iter().any(|n| n == &invocation.name) {
            let e = if self.contains(&invocation.name) {
                ToolError::NotEnabled(invocation.name.clone())
            } else {
                ToolError::NotFound(invocation.name.clone())
            };
            return ToolResult::error(invocation, &e);
        }
        self.invoke(invocation).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
