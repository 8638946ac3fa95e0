//! Remote tool-server client: newline-delimited JSON over TCP.
//!
//! On connect the client asks the server for its catalog:
//!
//! ```text
//! → {"id":1,"method":"list_tools"}
//! ← {"id":1,"result":{"tools":[{"name":..,"description":..,"parameters":{..}}]}}
//! ```
//!
//! and invokes tools with
//!
//! ```text
//! → {"id":7,"method":"call_tool","params":{"name":"blast_search","arguments":{..}}}
//! ← {"id":7,"result":<value>}   or   {"id":7,"error":{"message":".."}}
//! ```
//!
//! A background reader routes each response to the caller waiting on its id.
//! When the socket closes, every pending call fails, the server is marked
//! disconnected and its tools disappear from the registry until
//! [`RemoteToolServer::reconnect`] is called.

use seqpilot_config::ToolServerEntry;
use seqpilot_core::event::{DomainEvent, EventBus};
use seqpilot_core::tool::ToolDefinition;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Responder = oneshot::Sender<Result<Value, RemoteError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to connect to tool server '{server}' at {address}: {reason}")]
    Connect {
        server: String,
        address: String,
        reason: String,
    },

    #[error("Tool server '{0}' is not connected")]
    NotConnected(String),

    #[error("Tool server '{0}' disconnected")]
    Disconnected(String),

    #[error("Tool server '{server}' did not answer within {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },

    #[error("Tool server '{server}' returned an error: {message}")]
    Remote { server: String, message: String },

    #[error("Protocol error from tool server '{server}': {reason}")]
    Protocol { server: String, reason: String },
}

struct Inner {
    name: String,
    address: String,
    connect_timeout: Duration,
    call_timeout: Duration,
    connected: AtomicBool,
    /// Bumped on every connect so a stale reader can't reset a newer session
    generation: AtomicU64,
    next_id: AtomicU64,
    tools: RwLock<Vec<ToolDefinition>>,
    pending: Mutex<HashMap<u64, Responder>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    events: Option<Arc<EventBus>>,
}

/// A persistent connection to one tool server.
pub struct RemoteToolServer {
    inner: Arc<Inner>,
}

impl RemoteToolServer {
    /// Create an unconnected client for a configured server.
    pub fn from_entry(entry: &ToolServerEntry) -> Self {
        Self::new(
            &entry.name,
            &entry.address,
            Duration::from_secs(entry.connect_timeout_secs),
            Duration::from_secs(entry.call_timeout_secs),
        )
    }

    pub fn new(
        name: &str,
        address: &str,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                address: address.to_string(),
                connect_timeout,
                call_timeout,
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                tools: RwLock::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                reader: Mutex::new(None),
                events: None,
            }),
        }
    }

    /// Publish disconnect notifications on this bus. Call before connecting.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(events);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The advertised catalog; empty while disconnected.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        if !self.is_connected() {
            return Vec::new();
        }
        self.inner
            .tools
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Whether `name` is currently callable on this server.
    pub fn has_tool(&self, name: &str) -> bool {
        self.is_connected()
            && self
                .inner
                .tools
                .read()
                .map(|t| t.iter().any(|d| d.name == name))
                .unwrap_or(false)
    }

    /// Open the socket and run the catalog handshake. Returns the tool count.
    pub async fn connect(&self) -> Result<usize, RemoteError> {
        let inner = &self.inner;
        let connect_error = |reason: String| RemoteError::Connect {
            server: inner.name.clone(),
            address: inner.address.clone(),
            reason,
        };

        let stream = tokio::time::timeout(inner.connect_timeout, TcpStream::connect(&inner.address))
            .await
            .map_err(|_| connect_error("connection timed out".into()))?
            .map_err(|e| connect_error(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let generation = {
            let mut writer = inner.writer.lock().await;
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            // Nothing will answer calls made on the previous session
            inner.fail_all_pending();
            if let Some(mut old) = writer.replace(write_half) {
                let _ = old.shutdown().await;
            }
            generation
        };

        let reader = tokio::spawn(read_loop(self.inner.clone(), read_half, generation));
        if let Ok(mut slot) = inner.reader.lock()
            && let Some(old) = slot.replace(reader)
        {
            old.abort();
        }

        let result = match self.request("list_tools", None).await {
            Ok(result) => result,
            Err(e) => {
                self.disconnect().await;
                return Err(e);
            }
        };

        let tools = match parse_catalog(&result) {
            Ok(tools) => tools,
            Err(reason) => {
                self.disconnect().await;
                return Err(RemoteError::Protocol {
                    server: inner.name.clone(),
                    reason,
                });
            }
        };

        let count = tools.len();
        if let Ok(mut slot) = inner.tools.write() {
            *slot = tools;
        }
        inner.connected.store(true, Ordering::SeqCst);
        info!(server = %inner.name, address = %inner.address, tools = count, "Connected to tool server");
        Ok(count)
    }

    /// Drop the current session (if any) and connect again.
    pub async fn reconnect(&self) -> Result<usize, RemoteError> {
        self.disconnect().await;
        self.connect().await
    }

    /// Close the session. Pending calls fail with `Disconnected`.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.reader.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.inner.mark_disconnected();
    }

    /// Invoke a tool and wait for its result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::NotConnected(self.inner.name.clone()));
        }
        self.request(
            "call_tool",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RemoteError> {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = inner.pending.lock() {
            pending.insert(id, tx);
        }

        let mut message = json!({ "id": id, "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }
        let mut line = message.to_string();
        line.push('\n');

        debug!(server = %inner.name, id, method, "Sending tool-server request");

        {
            let mut writer = inner.writer.lock().await;
            let Some(w) = writer.as_mut() else {
                inner.forget(id);
                return Err(RemoteError::NotConnected(inner.name.clone()));
            };
            if let Err(e) = w.write_all(line.as_bytes()).await {
                warn!(server = %inner.name, error = %e, "Write to tool server failed");
                inner.forget(id);
                return Err(RemoteError::Disconnected(inner.name.clone()));
            }
        }

        match tokio::time::timeout(inner.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RemoteError::Disconnected(inner.name.clone())),
            Err(_) => {
                inner.forget(id);
                Err(RemoteError::Timeout {
                    server: inner.name.clone(),
                    timeout_ms: inner.call_timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Inner {
    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    fn fail_all_pending(&self) {
        let drained: Vec<Responder> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().map(|(_, tx)| tx).collect(),
            Err(_) => Vec::new(),
        };
        for tx in drained {
            let _ = tx.send(Err(RemoteError::Disconnected(self.name.clone())));
        }
    }

    fn mark_disconnected(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Ok(mut tools) = self.tools.write() {
            tools.clear();
        }
        self.fail_all_pending();
        if was_connected {
            warn!(server = %self.name, "Tool server disconnected");
            if let Some(bus) = &self.events {
                bus.publish(DomainEvent::ToolServerDisconnected {
                    server: self.name.clone(),
                });
            }
        }
    }

    fn route(&self, message: Value) {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            debug!(server = %self.name, "Ignoring tool-server message without id");
            return;
        };
        let responder = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(_) => None,
        };
        let Some(tx) = responder else {
            debug!(server = %self.name, id, "No caller waiting for response");
            return;
        };

        let outcome = if let Some(error) = message.get("error") {
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            Err(RemoteError::Remote {
                server: self.name.clone(),
                message: text,
            })
        } else {
            Ok(message.get("result").cloned().unwrap_or(Value::Null))
        };
        let _ = tx.send(outcome);
    }
}

async fn read_loop(inner: Arc<Inner>, read_half: OwnedReadHalf, generation: u64) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(raw)) => {
                if raw.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&raw) {
                    Ok(message) => inner.route(message),
                    Err(e) => warn!(server = %inner.name, error = %e, "Invalid JSON from tool server"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(server = %inner.name, error = %e, "Tool server read failed");
                break;
            }
        }
    }

    // connect() swaps sessions under the writer lock, so check it while held
    let mut writer = inner.writer.lock().await;
    if inner.generation.load(Ordering::SeqCst) == generation {
        writer.take();
        inner.mark_disconnected();
    }
}

fn parse_catalog(result: &Value) -> Result<Vec<ToolDefinition>, String> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| "list_tools result has no 'tools' array".to_string())?;

    let mut defs = Vec::with_capacity(tools.len());
    for tool in tools {
        match serde_json::from_value::<ToolDefinition>(tool.clone()) {
            Ok(def) if !def.name.trim().is_empty() => defs.push(def),
            Ok(_) => warn!("Skipping remote tool with empty name"),
            Err(e) => warn!(error = %e, "Skipping malformed remote tool definition"),
        }
    }
    Ok(defs)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn client(addr: &str, call_timeout: Duration) -> RemoteToolServer {
        RemoteToolServer::new("genome-tools", addr, Duration::from_secs(2), call_timeout)
    }

    #[tokio::test]
    async fn handshake_loads_catalog() {
        let addr = test_server::spawn().await;
        let server = client(&addr.to_string(), Duration::from_secs(5));
        assert!(!server.is_connected());
        assert!(server.tools().is_empty());

        let count = server.connect().await.unwrap();
        assert_eq!(count, 5);
        assert!(server.is_connected());
        assert!(server.has_tool("blast_search"));
        let blast = server
            .tools()
            .into_iter()
            .find(|t| t.name == "blast_search")
            .unwrap();
        assert_eq!(blast.description, "Search NCBI BLAST");
    }

    #[tokio::test]
    async fn call_and_remote_error() {
        let addr = test_server::spawn().await;
        let server = client(&addr.to_string(), Duration::from_secs(5));
        server.connect().await.unwrap();

        let value = server
            .call_tool("echo", json!({"sequence": "ATGGCC"}))
            .await
            .unwrap();
        assert_eq!(value, json!({"sequence": "ATGGCC"}));

        let err = server.call_tool("fail", json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Remote { ref message, .. } if message == "sequence too short"));
    }

    #[tokio::test]
    async fn responses_are_routed_by_id() {
        let addr = test_server::spawn().await;
        let server = Arc::new(client(&addr.to_string(), Duration::from_secs(5)));
        server.connect().await.unwrap();

        let slow = {
            let server = server.clone();
            tokio::spawn(async move { server.call_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = server.call_tool("echo", json!({"n": 2})).await.unwrap();
        assert_eq!(fast, json!({"n": 2}));
        assert_eq!(slow.await.unwrap().unwrap(), json!("slow done"));
    }

    #[tokio::test]
    async fn call_timeout() {
        let addr = test_server::spawn().await;
        let server = client(&addr.to_string(), Duration::from_millis(50));
        server.connect().await.unwrap();
        let err = server.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { .. }));
        // Still usable afterwards
        assert!(server.is_connected());
    }

    #[tokio::test]
    async fn disconnect_drops_tools_until_reconnect() {
        let addr = test_server::spawn().await;
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let server = client(&addr.to_string(), Duration::from_secs(5)).with_events(bus.clone());
        server.connect().await.unwrap();

        let err = server.call_tool("hangup", json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Disconnected(_)));
        assert!(!server.is_connected());
        assert!(server.tools().is_empty());
        assert!(!server.has_tool("echo"));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::ToolServerDisconnected { server } if server == "genome-tools"));

        let err = server.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotConnected(_)));

        server.reconnect().await.unwrap();
        assert!(server.has_tool("echo"));
        assert_eq!(server.call_tool("echo", json!(1)).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn connecting_again_fails_calls_on_the_old_session() {
        let addr = test_server::spawn().await;
        let server = Arc::new(client(&addr.to_string(), Duration::from_secs(5)));
        server.connect().await.unwrap();

        let slow = {
            let server = server.clone();
            tokio::spawn(async move { server.call_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.connect().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), slow)
            .await
            .expect("old call should fail without waiting for its timeout")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RemoteError::Disconnected(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_connected());
        assert_eq!(server.call_tool("echo", json!(2)).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn stale_reader_leaves_new_session_alone() {
        let addr = test_server::spawn().await;
        let server = client(&addr.to_string(), Duration::from_secs(5));
        server.connect().await.unwrap();
        let stale = server.inner.generation.load(Ordering::SeqCst) - 1;

        // A socket whose peer hangs up at once, read under the old generation
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let (stream, accepted) = tokio::join!(TcpStream::connect(local), listener.accept());
        drop(accepted.unwrap());
        let (read_half, _write_half) = stream.unwrap().into_split();
        read_loop(server.inner.clone(), read_half, stale).await;

        assert!(server.is_connected());
        assert!(server.inner.writer.lock().await.is_some());
        assert_eq!(server.call_tool("echo", json!(3)).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let server = client(&addr.to_string(), Duration::from_secs(1));
        let err = server.connect().await.unwrap_err();
        assert!(matches!(err, RemoteError::Connect { .. }));
        assert!(!server.is_connected());
    }

    #[test]
    fn catalog_requires_tools_array() {
        assert!(parse_catalog(&json!({"items": []})).is_err());
        assert_eq!(parse_catalog(&json!({"tools": []})).unwrap().len(), 0);
    }
}
