//! Shared vocabulary for the VCP hub.
//!
//! Pure data and error types used by both the runtime and the API
//! surface: plugin descriptors and on-disk manifests, parsed tool
//! invocations, hub events, and configuration structs. No I/O here.

pub mod config;
pub mod error;
pub mod event;
pub mod invocation;
pub mod plugin;

pub use config::{EngineConfig, FetcherConfig, HubConfig, ParserConfig};
pub use error::{VcpError, VcpResult};
pub use event::{ChannelEvent, RuntimeEvent};
pub use invocation::ToolInvocation;
pub use plugin::{
    CapabilityManifest, ConfigSchemaEntry, InvocationCommand, PluginDescriptor, PluginKind,
    PluginManifest,
};
