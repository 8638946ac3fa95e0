//! Plugins: groups of tool functions that describe themselves.
//!
//! A plugin advertises its callable functions and, separately, a block of
//! natural-language documentation that is folded into the system prompt as-is.
//!
//! [`ProcessPlugin`] is the on-disk flavour: a directory with a `plugin.toml`
//! manifest and a command that is spawned once per call. The request goes to
//! stdin as `{"function": ..., "parameters": {...}}` and the reply is read from
//! stdout, either `{"success": true, "result": ...}` /
//! `{"success": false, "error": "..."}` or plain text.
//!
//! Manifest format:
//! ```toml
//! name = "sequence-tools"
//! description = "Sequence utilities"
//! command = "python3"
//! args = ["main.py"]
//! docs_file = "DOCS.md"
//!
//! [[functions]]
//! name = "translate_sequence"
//! description = "Translate DNA to protein"
//! parameters = { type = "object", properties = { sequence = { type = "string" } } }
//! ```

use async_trait::async_trait;
use seqpilot_core::error::ToolError;
use seqpilot_core::tool::{ToolDefinition, ToolOutput};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Manifest file name looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// The contract every plugin implements, in-process or not.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// The functions this plugin exposes.
    fn functions(&self) -> Vec<ToolDefinition>;

    /// Documentation and usage examples for the system prompt.
    fn describe(&self) -> Option<String> {
        None
    }

    /// Invoke one of this plugin's functions.
    async fn call(
        &self,
        function: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Inline documentation
    #[serde(default)]
    pub docs: Option<String>,

    /// Documentation file, relative to the plugin directory
    #[serde(default)]
    pub docs_file: Option<String>,

    #[serde(default)]
    pub functions: Vec<ToolDefinition>,
}

/// A plugin backed by an external command.
#[derive(Debug)]
pub struct ProcessPlugin {
    manifest: PluginManifest,
    dir: PathBuf,
    docs: Option<String>,
}

impl ProcessPlugin {
    /// Load the plugin in `dir` from its manifest.
    pub fn load(dir: &Path) -> Result<Self, PluginError> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|source| PluginError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: PluginManifest =
            toml::from_str(&content).map_err(|e| PluginError::Manifest {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.name.trim().is_empty() || manifest.command.trim().is_empty() {
            return Err(PluginError::Manifest {
                path,
                reason: "name and command must not be empty".into(),
            });
        }
        if let Some(f) = manifest.functions.iter().find(|f| f.name.trim().is_empty()) {
            return Err(PluginError::Manifest {
                path,
                reason: format!("function with empty name ({})", f.description),
            });
        }

        let docs = match (&manifest.docs, &manifest.docs_file) {
            (Some(inline), _) => Some(inline.clone()),
            (None, Some(file)) => {
                let docs_path = dir.join(file);
                Some(std::fs::read_to_string(&docs_path).map_err(|source| {
                    PluginError::Io {
                        path: docs_path,
                        source,
                    }
                })?)
            }
            (None, None) => None,
        };

        Ok(Self {
            manifest,
            dir: dir.to_path_buf(),
            docs,
        })
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Commands given as `./script` resolve against the plugin directory.
    fn program(&self) -> PathBuf {
        let command = Path::new(&self.manifest.command);
        if self.manifest.command.starts_with("./") || self.manifest.command.starts_with(".\\") {
            self.dir.join(command)
        } else {
            command.to_path_buf()
        }
    }

    fn failed(&self, function: &str, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: function.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolPlugin for ProcessPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn functions(&self) -> Vec<ToolDefinition> {
        self.manifest.functions.clone()
    }

    fn describe(&self) -> Option<String> {
        self.docs.clone()
    }

    async fn call(
        &self,
        function: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        if !self.manifest.functions.iter().any(|f| f.name == function) {
            return Err(ToolError::NotFound(format!("{}.{function}", self.manifest.name)));
        }

        let request = serde_json::json!({
            "function": function,
            "parameters": parameters,
        });

        debug!(plugin = %self.manifest.name, function = %function, "Spawning plugin process");

        let mut child = Command::new(self.program())
            .args(&self.manifest.args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(function, format!("failed to start plugin: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = request.to_string();
            payload.push('\n');
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| self.failed(function, format!("failed to write request: {e}")))?;
            // Dropping stdin closes the pipe so the plugin sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.failed(function, format!("plugin did not finish: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(plugin = %self.manifest.name, function = %function, exit_code = code, "Plugin failed");
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(self.failed(function, format!("exit code {code}: {detail}")));
        }

        parse_plugin_reply(&stdout).map_err(|reason| self.failed(function, reason))
    }
}

/// Interpret a plugin's stdout.
fn parse_plugin_reply(stdout: &str) -> Result<ToolOutput, String> {
    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(stdout)
        && let Some(success) = obj.get("success").and_then(|v| v.as_bool())
    {
        if success {
            let value = obj.get("result").cloned().unwrap_or(serde_json::Value::Null);
            return Ok(ToolOutput::json(value));
        }
        let error = obj
            .get("error")
            .map(|e| match e {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "plugin reported failure".into());
        return Err(error);
    }
    Ok(ToolOutput::text(stdout))
}

/// Load every plugin found directly under `dir`.
///
/// Each subdirectory holding a `plugin.toml` is one plugin; `dir` itself is
/// accepted too. Broken manifests are logged and skipped.
pub fn load_plugins_from_dir(dir: &Path) -> Vec<ProcessPlugin> {
    let mut plugins = Vec::new();
    if !dir.exists() {
        debug!(dir = %dir.display(), "Plugin directory does not exist");
        return plugins;
    }

    let mut candidates = Vec::new();
    if dir.join(MANIFEST_FILE).is_file() {
        candidates.push(dir.to_path_buf());
    }

    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut dirs: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir() && p.join(MANIFEST_FILE).is_file())
                .collect();
            dirs.sort();
            candidates.extend(dirs);
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read plugin directory");
            return plugins;
        }
    }

    for path in candidates {
        match ProcessPlugin::load(&path) {
            Ok(plugin) => {
                info!(
                    plugin = %plugin.name(),
                    functions = plugin.manifest.functions.len(),
                    "Loaded plugin"
                );
                plugins.push(plugin);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping plugin"),
        }
    }

    plugins
}
