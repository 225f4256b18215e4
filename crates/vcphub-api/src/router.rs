//! Channel path bindings.
//!
//! Each WebSocket channel claims a path with a trailing shared-key
//! segment:
//!
//! - `/VCPlog/VCP_Key=<key>`
//! - `/vcpinfo/VCP_Key=<key>`
//! - `/vcp-distributed-server/VCP_Key=<key>`
//! - `/vcp-chrome-observer/VCP_Key=<key>`
//! - `/vcp-admin-panel/VCP_Key=<key>`
//!
//! The embedding HTTP layer mounts the returned router wherever it
//! serves upgrades.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::warn;

use vcphub_types::HubConfig;

use crate::channels::{BroadcastChannel, BroadcastHub};
use crate::distributed::{self, DistributedChannel};
use crate::hub;

/// Shared state behind every channel handler.
#[derive(Debug)]
pub struct HubState {
    pub config: HubConfig,
    pub distributed: Arc<DistributedChannel>,
    pub channels: Arc<BroadcastHub>,
}

/// Build the channel router.
#[must_use]
pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/VCPlog/:key", get(log_ws))
        .route("/vcpinfo/:key", get(info_ws))
        .route("/vcp-distributed-server/:key", get(distributed_ws))
        .route("/vcp-chrome-observer/:key", get(chrome_observer_ws))
        .route("/vcp-admin-panel/:key", get(admin_panel_ws))
        .with_state(state)
}

/// Refuse the upgrade unless the path segment carries the shared key.
fn check_key(state: &HubState, channel: &str, segment: &str) -> Result<(), Response> {
    if let Err(e) = hub::authorize(segment, &state.config.shared_key) {
        warn!(channel, error = %e, "websocket upgrade rejected");
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }
    Ok(())
}

async fn distributed_ws(
    ws: WebSocketUpgrade,
    Path(key): Path<String>,
    State(state): State<Arc<HubState>>,
) -> Response {
    if let Err(resp) = check_key(&state, "distributed-tool", &key) {
        return resp;
    }
    let channel = state.distributed.clone();
    ws.on_upgrade(move |socket| distributed::worker_socket_loop(channel, socket))
        .into_response()
}

async fn log_ws(
    ws: WebSocketUpgrade,
    Path(key): Path<String>,
    State(state): State<Arc<HubState>>,
) -> Response {
    broadcast_upgrade(ws, state.clone(), state.channels.log.clone(), "log", &key)
}

async fn info_ws(
    ws: WebSocketUpgrade,
    Path(key): Path<String>,
    State(state): State<Arc<HubState>>,
) -> Response {
    broadcast_upgrade(ws, state.clone(), state.channels.info.clone(), "info", &key)
}

async fn admin_panel_ws(
    ws: WebSocketUpgrade,
    Path(key): Path<String>,
    State(state): State<Arc<HubState>>,
) -> Response {
    broadcast_upgrade(
        ws,
        state.clone(),
        state.channels.admin_panel.clone(),
        "admin-panel",
        &key,
    )
}

async fn chrome_observer_ws(
    ws: WebSocketUpgrade,
    Path(key): Path<String>,
    State(state): State<Arc<HubState>>,
) -> Response {
    broadcast_upgrade(
        ws,
        state.clone(),
        state.channels.chrome_observer.clone(),
        "chrome-observer",
        &key,
    )
}

fn broadcast_upgrade(
    ws: WebSocketUpgrade,
    state: Arc<HubState>,
    channel: Arc<BroadcastChannel>,
    name: &'static str,
    key: &str,
) -> Response {
    if let Err(resp) = check_key(&state, name, key) {
        return resp;
    }
    let server_id = state.config.server_id.clone();
    ws.on_upgrade(move |socket| async move { channel.socket_loop(&server_id, socket).await })
        .into_response()
}
