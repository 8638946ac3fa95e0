//! Subcommand implementations and the shared wiring they use.

pub mod agent;
pub mod config_cmd;
pub mod host;
pub mod memory;
pub mod onboard;
pub mod providers;
pub mod tools;

use seqpilot_agent::Orchestrator;
use seqpilot_config::AppConfig;
use seqpilot_core::event::EventBus;
use seqpilot_providers::{ResilientCaller, RetryPolicy, build_from_config};
use seqpilot_tools::{Dispatcher, ToolRegistry, register_from_config};
use std::sync::Arc;
use std::time::Duration;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build the tool registry: host tools, plugins, and tool servers (connected
/// when `connect` is set or `auto_connect` is on).
pub async fn build_registry(
    config: &AppConfig,
    events: &Arc<EventBus>,
    connect: bool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    host::register_host_tools(&mut registry, host::BrowserView::shared());
    register_from_config(
        &mut registry,
        config,
        Some(events.clone()),
        connect || config.tool_servers.auto_connect,
    )
    .await;
    registry
}

/// Everything `agent` needs, wired from config.
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub events: Arc<EventBus>,
}

pub async fn build_runtime(config: &AppConfig, connect: bool) -> CliResult<Runtime> {
    let events = Arc::new(EventBus::default());

    let router = build_from_config(config).map_err(|e| format!("Provider setup failed: {e}"))?;
    let caller = ResilientCaller::new(Arc::new(router), RetryPolicy::from_config(&config.retry))
        .with_events(events.clone());

    let registry = build_registry(config, &events, connect).await;
    let recorder = seqpilot_memory::recorder_from_config(config);
    let dispatcher = Dispatcher::new(Arc::new(registry), recorder)
        .with_timeout(Duration::from_secs(config.agent.tool_timeout_secs))
        .with_agent_label(config.agent.agent_label.clone())
        .with_events(events.clone());

    let orchestrator = Orchestrator::from_config(config, Arc::new(caller), Arc::new(dispatcher))
        .with_events(events.clone());

    Ok(Runtime {
        orchestrator: Arc::new(orchestrator),
        events,
    })
}
