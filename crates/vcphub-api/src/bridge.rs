//! Channel → runtime wiring.
//!
//! Worker-advertised toolsets become distributed plugins in the runtime
//! registry, and session death (or selective withdrawal) removes them
//! again. The channel is also installed as the runtime's distributed
//! executor, so `execute` on a distributed plugin routes back through
//! its owning session.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use vcphub_runtime::PluginRuntime;
use vcphub_types::ChannelEvent;

use crate::distributed::DistributedChannel;

/// Connect a distributed channel to a plugin runtime.
///
/// Installs the channel as the runtime's distributed executor and
/// spawns a forwarder task translating channel events into bulk
/// registry operations. Dropping the returned handle does not stop the
/// forwarder; abort it for a clean shutdown.
pub async fn wire_runtime(
    channel: Arc<DistributedChannel>,
    runtime: Arc<PluginRuntime>,
) -> JoinHandle<()> {
    runtime.set_distributed_executor(channel.clone()).await;

    let mut events = channel.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::ToolsRegistered { session_id, tools }) => {
                    let accepted = runtime.bulk_register(&session_id, &tools).await;
                    debug!(
                        session_id,
                        accepted = accepted.len(),
                        "forwarded worker toolset to runtime"
                    );
                }
                Ok(ChannelEvent::ToolsUnregistered { session_id, tools }) => {
                    let removed = runtime.bulk_unregister_named(&session_id, &tools).await;
                    debug!(
                        session_id,
                        removed = removed.len(),
                        "withdrew worker toolset from runtime"
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "runtime bridge lagged behind channel events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
