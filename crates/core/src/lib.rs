//! # seqpilot core
//!
//! Domain types, traits, and error definitions for the seqpilot tool-calling
//! orchestrator. This crate has **no framework dependencies**; it defines the
//! domain model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every seam of the orchestrator is a trait here:
//! - [`Provider`]: one chat-completion call against one LLM endpoint
//! - [`Tool`]: an in-process callable capability
//! - [`MemoryRecorder`]: the append-only audit log of tool invocations
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted providers and mock tools without touching the loop.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{MemoryError, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryRecord, MemoryRecorder};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolOutput, ToolResult};
