//! Closure-backed local tools.
//!
//! Lets the host register an async closure as an in-process tool:
//!
//! ```ignore
//! let state = FnTool::new("get_current_state", "Current browser view", |_args| async move {
//!     Ok(ToolOutput::json(json!({"region": "chr1:1-5000"})))
//! });
//! registry.register_local(Arc::new(state));
//! ```

use async_trait::async_trait;
use seqpilot_core::error::ToolError;
use seqpilot_core::tool::{Tool, ToolOutput};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;
type Handler = Box<dyn Fn(Value) -> BoxedFuture + Send + Sync>;

pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: serde_json::json!({ "type": "object", "properties": {} }),
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Set the JSON schema advertised for the tool's parameters.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        (self.handler)(arguments).await
    }
}
