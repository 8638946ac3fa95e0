//! Tool registry: one namespace over local functions, plugin functions and
//! remote tool-server methods.
//!
//! Registration is an explicit `&mut self` operation done while wiring the
//! host; after that the registry is shared read-only. `resolve` and `catalog`
//! apply the same precedence (local, then plugins in registration order, then
//! remote servers in registration order) so whatever the model is told about
//! is exactly what dispatch can reach. Remote tools only appear while their
//! server is connected.

use crate::plugin::ToolPlugin;
use crate::remote::{RemoteError, RemoteToolServer};
use seqpilot_core::error::ToolError;
use seqpilot_core::tool::{Tool, ToolDefinition, ToolOutput};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Where a tool lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolSource {
    Local,
    Plugin,
    Remote,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Plugin => "plugin",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved backend, ready to invoke.
#[derive(Clone)]
pub enum ExecutionHandle {
    Local(Arc<dyn Tool>),
    Plugin {
        plugin: Arc<dyn ToolPlugin>,
        function: String,
    },
    Remote {
        server: Arc<RemoteToolServer>,
        tool: String,
    },
}

impl ExecutionHandle {
    pub fn source(&self) -> ToolSource {
        match self {
            Self::Local(_) => ToolSource::Local,
            Self::Plugin { .. } => ToolSource::Plugin,
            Self::Remote { .. } => ToolSource::Remote,
        }
    }

    /// Name of the owning plugin or server, `"local"` for in-process tools.
    pub fn origin(&self) -> &str {
        match self {
            Self::Local(_) => "local",
            Self::Plugin { plugin, .. } => plugin.name(),
            Self::Remote { server, .. } => server.name(),
        }
    }

    /// Run the backend.
    pub async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        match self {
            Self::Local(tool) => tool.execute(arguments).await,
            Self::Plugin { plugin, function } => plugin.call(function, arguments).await,
            Self::Remote { server, tool } => server
                .call_tool(tool, arguments)
                .await
                .map(ToolOutput::json)
                .map_err(|e| remote_to_tool_error(tool, e)),
        }
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(tool) => f.debug_tuple("Local").field(&tool.name()).finish(),
            Self::Plugin { plugin, function } => f
                .debug_struct("Plugin")
                .field("plugin", &plugin.name())
                .field("function", function)
                .finish(),
            Self::Remote { server, tool } => f
                .debug_struct("Remote")
                .field("server", &server.name())
                .field("tool", tool)
                .finish(),
        }
    }
}

fn remote_to_tool_error(tool: &str, error: RemoteError) -> ToolError {
    match error {
        RemoteError::NotConnected(server) | RemoteError::Disconnected(server) => {
            ToolError::Disconnected(server)
        }
        RemoteError::Timeout { timeout_ms, .. } => ToolError::Timeout {
            tool_name: tool.to_string(),
            timeout_secs: timeout_ms.div_ceil(1000),
        },
        other => ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: other.to_string(),
        },
    }
}

/// One callable tool as advertised to the model.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: ToolDefinition,
    pub source: ToolSource,
    /// Owning plugin or server name, `"local"` for in-process tools
    pub origin: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCounts {
    pub local: usize,
    pub plugin: usize,
    pub remote: usize,
}

impl SourceCounts {
    pub fn total(&self) -> usize {
        self.local + self.plugin + self.remote
    }
}

/// A snapshot of everything currently resolvable.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    pub entries: Vec<CatalogEntry>,
    pub counts: SourceCounts,
}

impl ToolCatalog {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.definition.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    local: BTreeMap<String, Arc<dyn Tool>>,
    plugins: Vec<Arc<dyn ToolPlugin>>,
    servers: Vec<Arc<RemoteToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-process tool. Replaces any local tool with the same name.
    pub fn register_local(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "Registering local tool");
        self.local.insert(name, tool);
    }

    /// Register a plugin. Replaces any plugin with the same name.
    pub fn register_plugin(&mut self, plugin: Arc<dyn ToolPlugin>) {
        debug!(plugin = %plugin.name(), functions = plugin.functions().len(), "Registering plugin");
        self.plugins.retain(|p| p.name() != plugin.name());
        self.plugins.push(plugin);
    }

    /// Register a tool server. Its tools resolve only while it is connected.
    pub fn register_server(&mut self, server: Arc<RemoteToolServer>) {
        debug!(server = %server.name(), address = %server.address(), "Registering tool server");
        self.servers.retain(|s| s.name() != server.name());
        self.servers.push(server);
    }

    pub fn plugins(&self) -> &[Arc<dyn ToolPlugin>] {
        &self.plugins
    }

    pub fn servers(&self) -> &[Arc<RemoteToolServer>] {
        &self.servers
    }

    /// Find the backend for `name`.
    pub fn resolve(&self, name: &str) -> Option<ExecutionHandle> {
        if let Some(tool) = self.local.get(name) {
            return Some(ExecutionHandle::Local(tool.clone()));
        }
        for plugin in &self.plugins {
            if plugin.functions().iter().any(|f| f.name == name) {
                return Some(ExecutionHandle::Plugin {
                    plugin: plugin.clone(),
                    function: name.to_string(),
                });
            }
        }
        for server in &self.servers {
            if server.has_tool(name) {
                return Some(ExecutionHandle::Remote {
                    server: server.clone(),
                    tool: name.to_string(),
                });
            }
        }
        None
    }

    /// Flattened, deduplicated list of what `resolve` can reach right now.
    pub fn catalog(&self) -> ToolCatalog {
        let mut seen = HashSet::new();
        let mut catalog = ToolCatalog::default();

        for tool in self.local.values() {
            if seen.insert(tool.name().to_string()) {
                catalog.entries.push(CatalogEntry {
                    definition: tool.to_definition(),
                    source: ToolSource::Local,
                    origin: "local".into(),
                });
                catalog.counts.local += 1;
            }
        }
        for plugin in &self.plugins {
            for def in plugin.functions() {
                if seen.insert(def.name.clone()) {
                    catalog.entries.push(CatalogEntry {
                        definition: def,
                        source: ToolSource::Plugin,
                        origin: plugin.name().to_string(),
                    });
                    catalog.counts.plugin += 1;
                }
            }
        }
        for server in &self.servers {
            for def in server.tools() {
                if seen.insert(def.name.clone()) {
                    catalog.entries.push(CatalogEntry {
                        definition: def,
                        source: ToolSource::Remote,
                        origin: server.name().to_string(),
                    });
                    catalog.counts.remote += 1;
                }
            }
        }
        catalog
    }

    /// Documentation blocks supplied by plugins, as `(plugin name, docs)`.
    pub fn plugin_docs(&self) -> Vec<(String, String)> {
        self.plugins
            .iter()
            .filter_map(|p| {
                p.describe()
                    .filter(|d| !d.trim().is_empty())
                    .map(|d| (p.name().to_string(), d))
            })
            .collect()
    }
}
