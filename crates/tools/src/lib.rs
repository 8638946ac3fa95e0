//! Tools for seqpilot.
//!
//! Everything between model text and a tool backend lives here:
//!
//! - [`parser`] pulls tool calls out of free-form model output
//! - [`registry`] maps names to local functions, plugin functions and remote
//!   tool-server methods
//! - [`dispatcher`] runs a call under a time budget and audits the outcome
//! - [`plugin`] and [`remote`] are the two out-of-process backends
//!
//! Plugins are loaded from directories explicitly; remote servers connect only
//! when asked to.

pub mod dispatcher;
pub mod fn_tool;
pub mod parser;
pub mod plugin;
pub mod registry;
pub mod remote;
pub mod suggest;

use seqpilot_config::AppConfig;
use seqpilot_core::event::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub use dispatcher::Dispatcher;
pub use fn_tool::FnTool;
pub use parser::{has_dangling_fragment, parse_tool_calls, strip_tool_calls};
pub use plugin::{PluginError, ProcessPlugin, ToolPlugin, load_plugins_from_dir};
pub use registry::{CatalogEntry, ExecutionHandle, SourceCounts, ToolCatalog, ToolRegistry, ToolSource};
pub use remote::{RemoteError, RemoteToolServer};

/// Register configured plugins and tool servers on `registry`.
///
/// Plugin directories are scanned when plugins are enabled. Tool servers are
/// always registered but only connected when `connect` is true (the
/// `auto_connect` flag or an explicit request); failed connections are logged
/// and the server stays registered for a later reconnect.
pub async fn register_from_config(
    registry: &mut ToolRegistry,
    config: &AppConfig,
    events: Option<Arc<EventBus>>,
    connect: bool,
) {
    if config.plugins.enabled {
        let mut dirs: Vec<PathBuf> = config.plugins.dirs.iter().map(PathBuf::from).collect();
        if dirs.is_empty() {
            dirs.push(AppConfig::plugins_dir());
        }
        for dir in dirs {
            for plugin in load_plugins_from_dir(&dir) {
                registry.register_plugin(Arc::new(plugin));
            }
        }
    }

    for entry in &config.tool_servers.servers {
        let mut server = RemoteToolServer::from_entry(entry);
        if let Some(bus) = &events {
            server = server.with_events(bus.clone());
        }
        let server = Arc::new(server);
        if connect {
            match server.connect().await {
                Ok(count) => info!(server = %entry.name, tools = count, "Tool server ready"),
                Err(e) => warn!(server = %entry.name, error = %e, "Tool server unavailable"),
            }
        }
        registry.register_server(server);
    }
}
