//! Event → log-channel forwarding.
//!
//! Presentation glue: runtime and channel events become `vcp_log`
//! frames on the log broadcast channel, so connected log subscribers
//! watch plugin registrations, executions, and worker traffic live.
//! Purely advisory; nothing in the core depends on these frames.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use vcphub_runtime::{EventBus, PluginRuntime};
use vcphub_types::{ChannelEvent, RuntimeEvent};

use crate::channels::BroadcastChannel;
use crate::distributed::DistributedChannel;

/// Forward runtime events (`registered`, `executed`, `error`,
/// `unloaded`) to the log channel.
pub fn spawn_runtime_log_forwarder(
    runtime: &PluginRuntime,
    log: Arc<BroadcastChannel>,
) -> JoinHandle<()> {
    forward(runtime.events(), log)
}

/// Forward channel events (`server_connected`, `tools_registered`, ...)
/// to the log channel.
pub fn spawn_channel_log_forwarder(
    channel: &DistributedChannel,
    log: Arc<BroadcastChannel>,
) -> JoinHandle<()> {
    forward(channel.events(), log)
}

fn forward<T>(bus: &EventBus<T>, log: Arc<BroadcastChannel>) -> JoinHandle<()>
where
    T: Clone + Send + serde::Serialize + 'static,
{
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let data = serde_json::to_value(&event).unwrap_or_default();
                    log.publish("vcp_log", data);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "log forwarder lagged behind events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// Keep the generic bound honest for both event families.
const _: fn() = || {
    fn assert_serialize<T: serde::Serialize>() {}
    assert_serialize::<RuntimeEvent>();
    assert_serialize::<ChannelEvent>();
};
