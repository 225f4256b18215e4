//! Distributed tool channel.
//!
//! Worker nodes connect over WebSocket, advertise toolsets, and execute
//! tool calls on request. Wire protocol (JSON frames, payload under
//! `data`):
//!
//! Server → worker: `connection_ack` {serverId, message}
//! Server → worker: `execute_tool`  {requestId, toolName, toolArgs}
//! Server → worker: `register_ack`  {tools, count}
//! Server → worker: `fetch_file`    {requestId, path}
//! Worker → server: `register_tools`   {tools: [descriptor, ...]}
//! Worker → server: `unregister_tools` {tools: [name, ...]}
//! Worker → server: `tool_result`      {requestId?, status, result?, error?}
//! Worker → server: `file_result`      {requestId, status, content?, error?}
//! Worker → server: `report_ip`        {localIPs, publicIP}
//! Worker → server: `heartbeat`
//!
//! Each in-flight call is one pending record, keyed per session so that
//! disconnect cleanup only touches that session's waiters. Exactly one
//! of {result delivered, timeout fired, session-died rejection} removes
//! a record.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vcphub_runtime::{DistributedExecutor, EventBus, RemoteFileSource};
use vcphub_types::{ChannelEvent, HubConfig, VcpError, VcpResult};

use crate::hub::{self, Frame};

/// One in-flight request awaiting a matching `tool_result` or
/// `file_result` frame.
struct PendingRequest {
    tool: String,
    created_ms: i64,
    responder: oneshot::Sender<VcpResult<serde_json::Value>>,
}

/// A connected worker node.
pub struct WorkerSession {
    pub id: String,
    /// JSON frames queued for the socket writer. A single writer task
    /// owns the sink, which serializes concurrent sends.
    outbound: mpsc::UnboundedSender<String>,
    name: std::sync::RwLock<Option<String>>,
    tools: std::sync::RwLock<Vec<String>>,
    local_ips: std::sync::RwLock<Vec<String>>,
    public_ip: std::sync::RwLock<Option<String>>,
    last_activity_ms: AtomicI64,
    open: AtomicBool,
    pending: DashMap<String, PendingRequest>,
}

impl WorkerSession {
    fn new(id: String, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            outbound,
            name: std::sync::RwLock::new(None),
            tools: std::sync::RwLock::new(Vec::new()),
            local_ips: std::sync::RwLock::new(Vec::new()),
            public_ip: std::sync::RwLock::new(None),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            open: AtomicBool::new(true),
            pending: DashMap::new(),
        }
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Advertised tool names.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// In-flight request count, mainly for tests and admin views.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn send_frame(&self, frame: &Frame) -> bool {
        self.outbound.send(frame.to_text()).is_ok()
    }
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Read-only view of a session for enumeration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub tools: Vec<String>,
    pub local_ips: Vec<String>,
    pub public_ip: Option<String>,
    pub last_activity_ms: i64,
}

/// The distributed tool channel: session registry, frame dispatch, and
/// request/response correlation.
pub struct DistributedChannel {
    config: HubConfig,
    sessions: DashMap<String, Arc<WorkerSession>>,
    events: EventBus<ChannelEvent>,
}

impl DistributedChannel {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            events: EventBus::new(),
        }
    }

    /// Event bus carrying `tools_registered` / `tools_unregistered` /
    /// `async_tool_result` / `server_connected` / `ip_report`.
    #[must_use]
    pub fn events(&self) -> &EventBus<ChannelEvent> {
        &self.events
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot every live session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|entry| {
                let s = entry.value();
                SessionSnapshot {
                    id: s.id.clone(),
                    name: s.name.read().unwrap_or_else(|e| e.into_inner()).clone(),
                    tools: s.tool_names(),
                    local_ips: s
                        .local_ips
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone(),
                    public_ip: s
                        .public_ip
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone(),
                    last_activity_ms: s.last_activity_ms.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    /// Create a session and return it with the receiving end of its
    /// outbound frame queue. The caller (socket loop or test) drains
    /// the receiver.
    pub fn open_session(&self) -> (Arc<WorkerSession>, mpsc::UnboundedReceiver<String>) {
        let id = generate_id("node");
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(WorkerSession::new(id.clone(), tx));
        self.sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, "worker session opened");
        self.events.publish(ChannelEvent::ServerConnected {
            session_id: id,
            name: None,
        });
        (session, rx)
    }

    /// Tear a session down: reject its waiters, announce its tools as
    /// gone, and forget it. Idempotent.
    pub fn close_session(&self, session_id: &str) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };
        session.open.store(false, Ordering::Relaxed);

        let keys: Vec<String> = session.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0usize;
        for key in keys {
            if let Some((_, pending)) = session.pending.remove(&key) {
                let _ = pending.responder.send(Err(VcpError::DistributedConnection(
                    format!("node '{session_id}' disconnected"),
                )));
                drained += 1;
            }
        }

        let tools = session.tool_names();
        info!(
            session_id,
            drained,
            tools = tools.len(),
            "worker session closed"
        );
        self.events.publish(ChannelEvent::ToolsUnregistered {
            session_id: session_id.to_string(),
            tools,
        });
    }

    /// Close every session whose last activity is older than
    /// `max_idle_ms`. Returns the reaped session ids. Callers run this
    /// on whatever cadence suits them; heartbeats keep live workers out
    /// of its reach.
    pub fn reap_idle(&self, max_idle_ms: i64) -> Vec<String> {
        let now = Utc::now().timestamp_millis();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                now - entry.value().last_activity_ms.load(Ordering::Relaxed) > max_idle_ms
            })
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in &stale {
            warn!(session_id = %session_id, max_idle_ms, "closing idle worker session");
            self.close_session(session_id);
        }
        stale
    }

    // -- frame dispatch ----------------------------------------------------

    /// Handle one inbound text frame from a session. Protocol
    /// violations are logged; the session stays up.
    pub fn handle_frame(&self, session: &Arc<WorkerSession>, raw: &str) {
        session.touch();
        let frame: Frame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "undecodable frame ignored");
                return;
            }
        };
        match frame.kind.as_str() {
            "register_tools" => self.on_register_tools(session, &frame.data),
            "unregister_tools" => self.on_unregister_tools(session, &frame.data),
            "tool_result" => self.on_result(session, frame.data, false),
            "file_result" => self.on_result(session, frame.data, true),
            "report_ip" => self.on_report_ip(session, &frame.data),
            "heartbeat" => {}
            other => {
                warn!(session_id = %session.id, frame_type = other, "unknown frame type ignored");
            }
        }
    }

    fn on_register_tools(&self, session: &Arc<WorkerSession>, data: &serde_json::Value) {
        let tools: Vec<serde_json::Value> = data
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        let names: Vec<String> = tools
            .iter()
            .filter_map(|t| {
                t.get("name")
                    .or_else(|| t.get("id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect();

        {
            let mut owned = session.tools.write().unwrap_or_else(|e| e.into_inner());
            for name in &names {
                if !owned.contains(name) {
                    owned.push(name.clone());
                }
            }
        }
        if let Some(reported) = data
            .get("serverName")
            .or_else(|| data.get("name"))
            .and_then(|v| v.as_str())
        {
            *session.name.write().unwrap_or_else(|e| e.into_inner()) = Some(reported.to_string());
        }

        session.send_frame(&Frame::new(
            "register_ack",
            serde_json::json!({ "tools": names, "count": names.len() }),
        ));
        info!(session_id = %session.id, count = names.len(), "worker advertised tools");
        self.events.publish(ChannelEvent::ToolsRegistered {
            session_id: session.id.clone(),
            tools,
        });
    }

    fn on_unregister_tools(&self, session: &Arc<WorkerSession>, data: &serde_json::Value) {
        let names: Vec<String> = data
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if names.is_empty() {
            return;
        }
        session
            .tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| !names.contains(t));
        info!(session_id = %session.id, count = names.len(), "worker withdrew tools");
        self.events.publish(ChannelEvent::ToolsUnregistered {
            session_id: session.id.clone(),
            tools: names,
        });
    }

    fn on_result(&self, session: &Arc<WorkerSession>, data: serde_json::Value, is_file: bool) {
        let Some(request_id) = data.get("requestId").and_then(|v| v.as_str()) else {
            // Worker-pushed asynchronous result: a pure event.
            debug!(session_id = %session.id, "async tool result received");
            self.events.publish(ChannelEvent::AsyncToolResult {
                session_id: session.id.clone(),
                payload: data,
            });
            return;
        };
        let request_id = request_id.to_string();

        let Some((_, pending)) = session.pending.remove(&request_id) else {
            warn!(
                session_id = %session.id,
                request_id = %request_id,
                "late or unknown result discarded"
            );
            return;
        };

        let ok = data.get("status").and_then(|s| s.as_str()) == Some("success");
        let outcome = if ok {
            if is_file {
                Ok(data)
            } else {
                Ok(data.get("result").cloned().unwrap_or(serde_json::Value::Null))
            }
        } else {
            let reason = data
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("node reported failure without detail")
                .to_string();
            Err(VcpError::ToolExecutionFailed {
                tool: pending.tool.clone(),
                reason,
            })
        };
        debug!(
            session_id = %session.id,
            request_id = %request_id,
            tool = %pending.tool,
            elapsed_ms = Utc::now().timestamp_millis() - pending.created_ms,
            ok,
            "pending request resolved"
        );
        // A send failure means the waiter already timed out; the record
        // is gone either way.
        let _ = pending.responder.send(outcome);
    }

    fn on_report_ip(&self, session: &Arc<WorkerSession>, data: &serde_json::Value) {
        let local_ips: Vec<String> = data
            .get("localIPs")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let public_ip = data
            .get("publicIP")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        *session
            .local_ips
            .write()
            .unwrap_or_else(|e| e.into_inner()) = local_ips.clone();
        *session
            .public_ip
            .write()
            .unwrap_or_else(|e| e.into_inner()) = public_ip.clone();
        self.events.publish(ChannelEvent::IpReport {
            session_id: session.id.clone(),
            local_ips,
            public_ip,
        });
    }

    // -- outbound calls ----------------------------------------------------

    /// Execute a tool on a worker session and await its result.
    ///
    /// # Errors
    ///
    /// `distributed-connection-error` for unknown/closed sessions,
    /// `distributed-timeout` when no matching `tool_result` arrives in
    /// time, `tool-execution-failed` when the node reports failure.
    pub async fn execute(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
        timeout_ms: u64,
    ) -> VcpResult<serde_json::Value> {
        let session = self.live_session(session_id)?;
        let request_id = generate_id("req");
        let rx = self.enqueue_pending(&session, &request_id, tool_name);

        let frame = Frame::new(
            "execute_tool",
            serde_json::json!({
                "requestId": request_id,
                "toolName": tool_name,
                "toolArgs": args,
            }),
        );
        if !session.send_frame(&frame) {
            session.pending.remove(&request_id);
            return Err(VcpError::DistributedConnection(format!(
                "session '{session_id}' writer is gone"
            )));
        }

        self.await_pending(&session, session_id, tool_name, request_id, timeout_ms, rx)
            .await
    }

    fn live_session(&self, session_id: &str) -> VcpResult<Arc<WorkerSession>> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                VcpError::DistributedConnection(format!("no session '{session_id}'"))
            })?;
        if !session.is_open() {
            return Err(VcpError::DistributedConnection(format!(
                "session '{session_id}' is closed"
            )));
        }
        Ok(session)
    }

    fn enqueue_pending(
        &self,
        session: &Arc<WorkerSession>,
        request_id: &str,
        tool_name: &str,
    ) -> oneshot::Receiver<VcpResult<serde_json::Value>> {
        let (responder, rx) = oneshot::channel();
        session.pending.insert(
            request_id.to_string(),
            PendingRequest {
                tool: tool_name.to_string(),
                created_ms: Utc::now().timestamp_millis(),
                responder,
            },
        );
        rx
    }

    async fn await_pending(
        &self,
        session: &Arc<WorkerSession>,
        session_id: &str,
        tool_name: &str,
        request_id: String,
        timeout_ms: u64,
        rx: oneshot::Receiver<VcpResult<serde_json::Value>>,
    ) -> VcpResult<serde_json::Value> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(VcpError::DistributedConnection(format!(
                "node '{session_id}' went away before replying"
            ))),
            Err(_) => {
                session.pending.remove(&request_id);
                warn!(
                    session_id,
                    request_id = %request_id,
                    tool = tool_name,
                    timeout_ms,
                    "distributed call timed out"
                );
                Err(VcpError::DistributedTimeout {
                    tool: tool_name.to_string(),
                    session_id: session_id.to_string(),
                    request_id,
                    timeout_ms,
                })
            }
        }
    }

    /// Ask one session for a file body; resolves with the `file_result`
    /// payload.
    async fn request_file_from(
        &self,
        session: &Arc<WorkerSession>,
        path: &str,
        timeout_ms: u64,
    ) -> VcpResult<serde_json::Value> {
        let request_id = generate_id("req");
        let rx = self.enqueue_pending(session, &request_id, "fetch_file");
        let frame = Frame::new(
            "fetch_file",
            serde_json::json!({ "requestId": request_id, "path": path }),
        );
        if !session.send_frame(&frame) {
            session.pending.remove(&request_id);
            return Err(VcpError::DistributedConnection(format!(
                "session '{}' writer is gone",
                session.id
            )));
        }
        self.await_pending(session, &session.id, "fetch_file", request_id, timeout_ms, rx)
            .await
    }
}

impl std::fmt::Debug for DistributedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedChannel")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DistributedExecutor for DistributedChannel {
    async fn execute(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
        timeout_ms: u64,
    ) -> VcpResult<serde_json::Value> {
        DistributedChannel::execute(self, session_id, tool_name, args, timeout_ms).await
    }
}

#[async_trait]
impl RemoteFileSource for DistributedChannel {
    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn request_file(&self, path: &str, timeout_ms: u64) -> VcpResult<String> {
        let sessions: Vec<Arc<WorkerSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if sessions.is_empty() {
            return Err(VcpError::DistributedConnection(
                "no worker sessions linked".into(),
            ));
        }
        let mut last_err = None;
        for session in sessions {
            match self.request_file_from(&session, path, timeout_ms).await {
                Ok(result) => {
                    if let Some(content) = result.get("content").and_then(|c| c.as_str()) {
                        return Ok(content.to_string());
                    }
                    warn!(session_id = %session.id, path, "file_result without content");
                    last_err = Some(VcpError::ToolExecutionFailed {
                        tool: "fetch_file".into(),
                        reason: format!("node '{}' sent a file_result without content", session.id),
                    });
                }
                Err(e) => {
                    debug!(session_id = %session.id, path, error = %e, "node could not serve file");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            VcpError::DistributedConnection("no worker sessions linked".into())
        }))
    }
}

/// Opaque unique id: `<prefix>_<unix-ms>_<uuid suffix>`.
fn generate_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}_{}_{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

/// Drive one worker socket: greet, pump outbound frames, dispatch
/// inbound ones, and clean the session up when the socket dies.
pub async fn worker_socket_loop(channel: Arc<DistributedChannel>, socket: WebSocket) {
    let (session, mut outbound_rx) = channel.open_session();
    let (mut sink, mut stream) = socket.split();

    let ack = hub::connection_ack(&channel.config.server_id).to_text();
    if sink.send(Message::Text(ack.into())).await.is_err() {
        channel.close_session(&session.id);
        return;
    }

    loop {
        tokio::select! {
            queued = outbound_rx.recv() => match queued {
                Some(frame) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => channel.handle_frame(&session, &text),
                Some(Ok(Message::Ping(payload))) => {
                    session.touch();
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %session.id, error = %e, "socket receive error");
                    break;
                }
            },
        }
    }

    channel.close_session(&session.id);
}
