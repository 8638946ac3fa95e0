//! Local tools standing in for the genome browser host.
//!
//! The CLI has no real browser view, so it keeps a small in-memory one that
//! the model can read and move around.

use seqpilot_core::error::ToolError;
use seqpilot_core::tool::ToolOutput;
use seqpilot_tools::{FnTool, ToolRegistry};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserView {
    pub region: String,
    pub tracks: Vec<String>,
}

pub type SharedView = Arc<Mutex<BrowserView>>;

impl BrowserView {
    pub fn shared() -> SharedView {
        Arc::new(Mutex::new(Self::default()))
    }
}

impl Default for BrowserView {
    fn default() -> Self {
        Self {
            region: "chr1:1-10000".into(),
            tracks: vec!["sequence".into(), "genes".into()],
        }
    }
}

/// A parsed `chrom:start-end` locus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn parse(text: &str) -> Result<Self, ToolError> {
        let invalid = || {
            ToolError::InvalidArguments(format!(
                "region '{text}' is not of the form chrom:start-end"
            ))
        };
        let (chrom, span) = text.trim().split_once(':').ok_or_else(invalid)?;
        let (start, end) = span.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.replace(',', "").parse().map_err(|_| invalid())?;
        let end: u64 = end.replace(',', "").parse().map_err(|_| invalid())?;
        if chrom.is_empty() || start == 0 || end < start {
            return Err(invalid());
        }
        Ok(Self {
            chrom: chrom.to_string(),
            start,
            end,
        })
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

fn poisoned(tool: &str) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: "browser view lock poisoned".into(),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string parameter '{key}'")))
}

/// Register `get_current_state`, `navigate` and `add_track` over `view`.
pub fn register_host_tools(registry: &mut ToolRegistry, view: SharedView) {
    let state_view = view.clone();
    let get_state = FnTool::new(
        "get_current_state",
        "Return the region and tracks currently shown in the browser",
        move |_args| {
            let view = state_view.clone();
            async move {
                let snapshot = view
                    .lock()
                    .map_err(|_| poisoned("get_current_state"))?
                    .clone();
                Ok(ToolOutput::json(json!(snapshot)))
            }
        },
    );

    let nav_view = view.clone();
    let navigate = FnTool::new(
        "navigate",
        "Move the browser to a region such as chr1:1000-2000",
        move |args| {
            let view = nav_view.clone();
            async move {
                let region = Region::parse(required_str(&args, "region")?)?;
                let mut view = view.lock().map_err(|_| poisoned("navigate"))?;
                view.region = region.to_string();
                Ok(ToolOutput::json(json!({ "region": view.region })))
            }
        },
    )
    .with_schema(json!({
        "type": "object",
        "properties": { "region": { "type": "string", "description": "chrom:start-end" } },
        "required": ["region"]
    }));

    let track_view = view;
    let add_track = FnTool::new(
        "add_track",
        "Show an additional annotation track",
        move |args| {
            let view = track_view.clone();
            async move {
                let name = required_str(&args, "name")?.trim().to_string();
                if name.is_empty() {
                    return Err(ToolError::InvalidArguments("track name is empty".into()));
                }
                let mut view = view.lock().map_err(|_| poisoned("add_track"))?;
                if view.tracks.contains(&name) {
                    return Ok(ToolOutput::text(format!("Track '{name}' is already shown")));
                }
                view.tracks.push(name.clone());
                Ok(ToolOutput::json(json!({ "added": name, "tracks": view.tracks })))
            }
        },
    )
    .with_schema(json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    }));

    registry.register_local(Arc::new(get_state));
    registry.register_local(Arc::new(navigate));
    registry.register_local(Arc::new(add_track));
}
