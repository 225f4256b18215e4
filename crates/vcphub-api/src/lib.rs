//! WebSocket surface of the VCP hub.
//!
//! [`distributed`] drives the worker-node tool channel: session
//! registry, request/response correlation, timeouts, and disconnect
//! cleanup. [`channels`] holds the thin broadcast shells (log, info,
//! admin-panel, chrome-observer). [`hub`] is the shared base both build
//! on, and [`router`] binds every channel to its `VCP_Key` path pattern
//! for the embedding HTTP layer to mount.

pub mod bridge;
pub mod channels;
pub mod distributed;
pub mod hub;
pub mod observer;
pub mod router;

pub use bridge::wire_runtime;
pub use channels::{BroadcastChannel, BroadcastHub};
pub use observer::{spawn_channel_log_forwarder, spawn_runtime_log_forwarder};
pub use distributed::{DistributedChannel, SessionSnapshot, WorkerSession};
pub use hub::Frame;
pub use router::{router, HubState};
