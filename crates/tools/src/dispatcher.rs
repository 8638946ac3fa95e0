//! Tool dispatcher: runs one [`ToolCall`] and always returns a [`ToolResult`].
//!
//! Unresolved names produce a failed result with ranked suggestions and a
//! sample of what is available. Resolved calls run under a time budget with
//! panics caught. Every dispatch, whatever the outcome, appends exactly one
//! audit record.

use crate::registry::ToolRegistry;
use crate::suggest::{MAX_SUGGESTIONS, SAMPLE_SIZE, rank_suggestions, sample_names};
use chrono::Utc;
use futures::FutureExt;
use seqpilot_core::error::ToolError;
use seqpilot_core::event::{DomainEvent, EventBus};
use seqpilot_core::memory::{MemoryRecord, MemoryRecorder};
use seqpilot_core::tool::{ToolCall, ToolResult, truncate_chars};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default per-call budget.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Cause-chain entries kept in an error message.
const MAX_CAUSES: usize = 5;

/// Characters kept per cause.
const MAX_CAUSE_CHARS: usize = 300;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    recorder: Arc<dyn MemoryRecorder>,
    events: Option<Arc<EventBus>>,
    timeout: Duration,
    agent_label: String,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, recorder: Arc<dyn MemoryRecorder>) -> Self {
        Self {
            registry,
            recorder,
            events: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            agent_label: "seqpilot".into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_agent_label(mut self, label: impl Into<String>) -> Self {
        self.agent_label = label.into();
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &Arc<dyn MemoryRecorder> {
        &self.recorder
    }

    /// Execute one call. Never fails; errors are captured in the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();

        let result = match self.registry.resolve(&call.name) {
            None => self.not_found(call),
            Some(handle) => {
                debug!(tool = %call.name, source = %handle.source(), origin = handle.origin(), "Dispatching tool call");
                let outcome = tokio::time::timeout(
                    self.timeout,
                    AssertUnwindSafe(handle.invoke(call.arguments())).catch_unwind(),
                )
                .await;

                let outcome = match outcome {
                    Err(_) => Err(ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_secs: self.timeout.as_secs().max(1),
                    }),
                    Ok(Err(panic)) => Err(ToolError::ExecutionFailed {
                        tool_name: call.name.clone(),
                        reason: format!("panicked: {}", panic_message(panic.as_ref())),
                    }),
                    Ok(Ok(result)) => result,
                };

                let elapsed = start.elapsed().as_millis() as u64;
                match outcome {
                    Ok(output) => ToolResult {
                        tool_name: call.name.clone(),
                        parameters: call.parameters.clone(),
                        success: true,
                        value: Some(output.value),
                        error: None,
                        suggestions: Vec::new(),
                        execution_time_ms: elapsed,
                        agent_label: self.agent_label.clone(),
                    },
                    Err(e) => ToolResult {
                        tool_name: call.name.clone(),
                        parameters: call.parameters.clone(),
                        success: false,
                        value: None,
                        error: Some(error_chain(&e)),
                        suggestions: Vec::new(),
                        execution_time_ms: elapsed,
                        agent_label: self.agent_label.clone(),
                    },
                }
            }
        };

        if result.success {
            info!(tool = %result.tool_name, duration_ms = result.execution_time_ms, "Tool executed");
        } else {
            warn!(
                tool = %result.tool_name,
                duration_ms = result.execution_time_ms,
                error = result.error.as_deref().unwrap_or_default(),
                "Tool failed"
            );
        }

        if let Err(e) = self.recorder.append(MemoryRecord::from_result(&result)).await {
            warn!(tool = %result.tool_name, error = %e, "Failed to record tool call");
        }

        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: result.tool_name.clone(),
                success: result.success,
                duration_ms: result.execution_time_ms,
                timestamp: Utc::now(),
            });
        }

        result
    }

    fn not_found(&self, call: &ToolCall) -> ToolResult {
        let catalog = self.registry.catalog();
        let suggestions = rank_suggestions(&call.name, catalog.names(), MAX_SUGGESTIONS);
        let available = sample_names(catalog.names(), SAMPLE_SIZE);

        let mut error = ToolError::NotFound(call.name.clone()).to_string();
        if available.is_empty() {
            error.push_str(". No tools are currently available.");
        } else {
            error.push_str(&format!(". Available tools include: {}", available.join(", ")));
            if catalog.len() > available.len() {
                error.push_str(&format!(" (and {} more)", catalog.len() - available.len()));
            }
        }

        ToolResult {
            tool_name: call.name.clone(),
            parameters: call.parameters.clone(),
            success: false,
            value: None,
            error: Some(error),
            suggestions,
            execution_time_ms: 0,
            agent_label: self.agent_label.clone(),
        }
    }
}

/// The error and its causes, one per line, truncated.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = truncate_chars(&error.to_string(), MAX_CAUSE_CHARS);
    let mut source = error.source();
    let mut depth = 0;
    while let Some(cause) = source {
        if depth == MAX_CAUSES {
            out.push_str("\n  ...");
            break;
        }
        out.push_str("\n  caused by: ");
        out.push_str(&truncate_chars(&cause.to_string(), MAX_CAUSE_CHARS));
        source = cause.source();
        depth += 1;
    }
    out
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
