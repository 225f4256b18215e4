//! Runtime core of the VCP hub.
//!
//! Four pieces wired together:
//!
//! - [`parser`] extracts delimited tool-request blocks from model output
//!   and formats results for re-ingestion.
//! - [`template`] expands `{{KEY}}` placeholders by consulting ordered
//!   providers, one of which is backed by the plugin catalog.
//! - [`runtime`] keeps the plugin registry and catalog, and dispatches
//!   execution to subprocesses, distributed nodes, or internal handlers.
//! - [`file_fetch`] resolves paths to bytes through a tiered cache /
//!   filesystem / distributed-node lookup.

pub mod events;
pub mod file_fetch;
pub mod parser;
pub mod preprocess;
pub mod runtime;
pub mod strings;
pub mod template;

pub use events::EventBus;
pub use file_fetch::{FetchSource, FetchStats, FetchedFile, FileFetcher, RemoteFileSource};
pub use parser::ToolCallParser;
pub use preprocess::{MessagePreprocessor, PreprocessPipeline};
pub use runtime::loader::load_plugins_from_dir;
pub use runtime::{
    DistributedExecutor, ExecTimeouts, InternalExecRequest, PluginRuntime, Service,
};
pub use template::{Provider, ResolveContext, TemplateEngine};
