//! LLM provider implementations for seqpilot.
//!
//! All providers implement the `seqpilot_core::Provider` trait. The router
//! builds them from configuration; [`ResilientCaller`] adds retry and
//! cross-provider failover on top.

pub mod openai_compat;
pub mod resilience;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use resilience::{ResilienceError, ResilientCaller, RetryPolicy};
pub use router::{ProviderProfile, ProviderRouter, build_from_config};
