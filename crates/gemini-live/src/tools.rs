//! Registry of remote-invocable tools and the dispatch contract.
//!
//! The registry is built once at startup and shared read-only across the
//! session. Dispatch never drops a call: whatever happens inside a handler,
//! the caller gets back exactly one [`FunctionResponse`] carrying the
//! original call id, with failures encoded as an error payload.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::types::{FunctionCall, FunctionDeclaration, FunctionResponse};

pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct RegisteredTool {
    declaration: FunctionDeclaration,
    handler: ToolHandler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its declared name, replacing any previous
    /// registration for that name.
    pub fn register<F, Fut>(&mut self, declaration: FunctionDeclaration, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = declaration.name.clone();
        self.tools.insert(
            name,
            RegisteredTool {
                declaration,
                handler: Arc::new(move |args| Box::pin(handler(args))),
            },
        );
    }

    /// Declarations to embed in the setup frame, in a stable order.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<FunctionDeclaration> = self
            .tools
            .values()
            .map(|tool| tool.declaration.clone())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Runs one inbound invocation to completion. Unknown tools and handler
    /// failures become error-shaped payloads, never a missing response.
    pub async fn dispatch(&self, call: FunctionCall) -> FunctionResponse {
        let FunctionCall { id, name, args } = call;
        let response = match self.tools.get(&name) {
            None => {
                tracing::error!(tool = %name, call = %id, "call for unregistered tool");
                json!({"error": format!("tool '{name}' is not implemented")})
            }
            Some(tool) => match (tool.handler)(args).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(tool = %name, call = %id, error = %e, "tool handler failed");
                    json!({"error": e.to_string()})
                }
            },
        };
        FunctionResponse { id, name, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_declaration(name: &str) -> FunctionDeclaration {
        FunctionDeclaration {
            name: name.to_string(),
            description: format!("test tool {name}"),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    #[tokio::test]
    async fn dispatch_returns_handler_result_with_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(sample_declaration("echo"), |args| async move {
            Ok(json!({"echoed": args}))
        });

        let response = registry
            .dispatch(FunctionCall {
                id: "c7".into(),
                name: "echo".into(),
                args: json!({"x": 1}),
            })
            .await;

        assert_eq!(response.id, "c7");
        assert_eq!(response.name, "echo");
        assert_eq!(response.response["echoed"]["x"], json!(1));
    }

    #[tokio::test]
    async fn unknown_tool_gets_error_response_with_matching_id() {
        let registry = ToolRegistry::new();
        let response = registry
            .dispatch(FunctionCall {
                id: "x1".into(),
                name: "unknownTool".into(),
                args: json!({}),
            })
            .await;

        assert_eq!(response.id, "x1");
        assert!(response.response["error"].as_str().unwrap().contains("unknownTool"));
    }

    #[tokio::test]
    async fn failing_handler_is_converted_to_error_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(sample_declaration("broken"), |_args| async move {
            anyhow::bail!("database unavailable")
        });

        let response = registry
            .dispatch(FunctionCall {
                id: "c9".into(),
                name: "broken".into(),
                args: json!({}),
            })
            .await;

        assert_eq!(response.id, "c9");
        assert_eq!(response.response["error"], json!("database unavailable"));
    }

    #[test]
    fn declarations_are_stable_and_complete() {
        let mut registry = ToolRegistry::new();
        registry.register(sample_declaration("zeta"), |_| async { Ok(json!({})) });
        registry.register(sample_declaration("alpha"), |_| async { Ok(json!({})) });

        let names: Vec<String> = registry
            .declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.len(), 2);
    }
}
