//! Locally implemented functions the completion engine may ask us to call mid-run.

use crate::log_internal;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, future::Future, sync::Arc};

pub type ToolArgs = Map<String, Value>;
type ToolFn = Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("malformed arguments for `{tool}`: {reason}")]
    MalformedArguments { tool: String, reason: String },

    #[error("tool `{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolParameter {
    pub name: String,
    /// JSON schema type, e.g. `string`
    pub kind: String,
    pub description: String,
    pub required: bool,
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    function: ToolFn,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new<F, Fut>(name: &str, description: &str, function: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            parameters: Vec::new(),
            function: Arc::new(move |args| Box::pin(function(args))),
        }
    }

    /// Declares a required string parameter.
    pub fn param(self, name: &str, description: &str) -> Self {
        self.parameter(name, "string", description, true)
    }

    pub fn parameter(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_owned(),
            kind: kind.to_owned(),
            description: description.to_owned(),
            required,
        });
        self
    }

    /// Function-tool schema as the completion engine expects it.
    pub fn definition(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind, "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }

    pub async fn call(&self, args: ToolArgs) -> anyhow::Result<String> {
        (self.function)(args).await
    }
}

/// Ordered set of tools, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, replacing any tool of the same name in place.
    pub fn register(&mut self, tool: Tool) {
        match self.index.get(&tool.name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn with(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Schemas for every tool, in registration order.  Regenerated on every call so the remote
    /// assistant always sees the current tool set.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(Tool::definition).collect()
    }

    pub fn get(&self, name: &str) -> Result<&Tool, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_owned()))
    }

    /// Decodes `arguments` (a JSON object), then runs the named tool.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let args = match serde_json::from_str::<Value>(arguments) {
            Ok(Value::Object(args)) => args,
            Ok(other) => {
                return Err(ToolError::MalformedArguments {
                    tool: name.to_owned(),
                    reason: format!("expected a JSON object, got `{}`", other),
                })
            }
            Err(e) => {
                return Err(ToolError::MalformedArguments {
                    tool: name.to_owned(),
                    reason: e.to_string(),
                })
            }
        };
        let tool = self.get(name)?;

        log_internal!("Calling tool {}({})", name, arguments);
        tool.call(args).await.map_err(|e| ToolError::Execution {
            tool: name.to_owned(),
            message: e.to_string(),
        })
    }
}

/// Fetches a required string argument.
pub fn str_arg<'a>(args: &'a ToolArgs, name: &str) -> anyhow::Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing string argument `{}`", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn shout_text(args: ToolArgs) -> anyhow::Result<String> {
        Ok(str_arg(&args, "text")?.to_uppercase())
    }

    async fn out_of_order(_: ToolArgs) -> anyhow::Result<String> {
        anyhow::bail!("out of order")
    }

    async fn nothing(_: ToolArgs) -> anyhow::Result<String> {
        Ok(String::new())
    }

    fn shout() -> Tool {
        Tool::new("shout", "Repeat the text loudly.", shout_text)
            .param("text", "What to shout.")
            .parameter("times", "integer", "How many times.", false)
    }

    fn broken() -> Tool {
        Tool::new("broken", "Always fails.", out_of_order)
    }

    #[test]
    fn definitions_follow_declared_parameters() {
        let registry = ToolRegistry::new().with(shout());
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);

        let function = &defs[0]["function"];
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(function["name"], "shout");
        assert_eq!(function["parameters"]["type"], "object");
        assert_eq!(
            function["parameters"]["properties"]["times"]["type"],
            "integer"
        );
        assert_eq!(function["parameters"]["required"], json!(["text"]));
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ToolRegistry::new().with(shout()).with(broken());
        registry.register(Tool::new("shout", "Quieter now.", nothing));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.definitions()[0]["function"]["description"], "Quieter now.");
    }

    #[tokio::test]
    async fn invoke_runs_tool() {
        let registry = ToolRegistry::new().with(shout());
        let out = registry.invoke("shout", r#"{"text": "hi"}"#).await.unwrap();
        assert_eq!(out, "HI");
    }

    #[tokio::test]
    async fn invoke_reports_each_failure_kind() {
        let registry = ToolRegistry::new().with(shout()).with(broken());

        assert!(matches!(
            registry.invoke("shout", "{not json").await,
            Err(ToolError::MalformedArguments { .. })
        ));
        assert!(matches!(
            registry.invoke("shout", "[1, 2]").await,
            Err(ToolError::MalformedArguments { .. })
        ));
        assert!(matches!(
            registry.invoke("whisper", "{}").await,
            Err(ToolError::UnknownTool(name)) if name == "whisper"
        ));
        assert!(matches!(
            registry.invoke("broken", "").await,
            Err(ToolError::Execution { message, .. }) if message == "out of order"
        ));
        // Missing argument surfaces from inside the tool
        assert!(matches!(
            registry.invoke("shout", "{}").await,
            Err(ToolError::Execution { .. })
        ));
    }
}
