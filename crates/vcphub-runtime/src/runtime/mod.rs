//! Plugin runtime: registry, catalog, and execution dispatch.
//!
//! The registry is the single source of truth for every plugin kind.
//! All mutations (register, unload, bulk register/unregister) rebuild
//! the catalog atomically, so template readers always see a rendering
//! that matches some complete registry state. Execution dispatch is a
//! `match` over the descriptor's kind tag.

pub mod catalog;
pub mod loader;
pub mod subprocess;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use vcphub_types::{
    CapabilityManifest, PluginDescriptor, PluginKind, RuntimeEvent, VcpError, VcpResult,
};

use crate::events::EventBus;
use crate::preprocess::{run_stages, MessagePreprocessor};
use crate::template::CatalogSource;

/// Per-kind execution timeouts, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct ExecTimeouts {
    pub subprocess_ms: u64,
    pub distributed_ms: u64,
    pub internal_ms: u64,
}

impl Default for ExecTimeouts {
    fn default() -> Self {
        Self {
            subprocess_ms: 10_000,
            distributed_ms: 30_000,
            internal_ms: 5_000,
        }
    }
}

/// Executor seam for distributed plugins; implemented by the
/// distributed tool channel.
#[async_trait]
pub trait DistributedExecutor: Send + Sync {
    async fn execute(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &serde_json::Value,
        timeout_ms: u64,
    ) -> VcpResult<serde_json::Value>;
}

/// Handle to a long-lived service plugin, retrievable by name.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
}

/// One internal-plugin execution request, delivered to whichever task
/// the embedding app attached via [`PluginRuntime::set_internal_executor`].
pub struct InternalExecRequest {
    pub plugin_id: String,
    pub args: serde_json::Value,
    pub responder: oneshot::Sender<VcpResult<serde_json::Value>>,
}

impl std::fmt::Debug for InternalExecRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalExecRequest")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// Registry, catalog, and execution dispatch for every plugin kind.
pub struct PluginRuntime {
    registry: RwLock<HashMap<String, PluginDescriptor>>,
    catalog: RwLock<HashMap<String, String>>,
    /// Registration order of preprocessor plugins.
    preprocessor_order: RwLock<Vec<String>>,
    preprocessor_impls: RwLock<HashMap<String, Arc<dyn MessagePreprocessor>>>,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    statics: RwLock<HashMap<String, String>>,
    distributed: RwLock<Option<Arc<dyn DistributedExecutor>>>,
    internal_tx: RwLock<Option<mpsc::Sender<InternalExecRequest>>>,
    events: EventBus<RuntimeEvent>,
    timeouts: ExecTimeouts,
}

impl PluginRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(ExecTimeouts::default())
    }

    #[must_use]
    pub fn with_timeouts(timeouts: ExecTimeouts) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            catalog: RwLock::new(HashMap::new()),
            preprocessor_order: RwLock::new(Vec::new()),
            preprocessor_impls: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            statics: RwLock::new(HashMap::new()),
            distributed: RwLock::new(None),
            internal_tx: RwLock::new(None),
            events: EventBus::new(),
            timeouts,
        }
    }

    /// Event bus carrying `registered` / `executed` / `error` /
    /// `unloaded` notifications.
    #[must_use]
    pub fn events(&self) -> &EventBus<RuntimeEvent> {
        &self.events
    }

    // -- registration ------------------------------------------------------

    /// Register a plugin of any kind.
    ///
    /// Re-registering an existing id overwrites it, except for
    /// distributed plugins: an id collision there is refused.
    ///
    /// # Errors
    ///
    /// `invalid-plugin-manifest` for missing id/name, `plugin-load-error`
    /// for a refused distributed collision.
    pub async fn register(&self, descriptor: PluginDescriptor) -> VcpResult<()> {
        descriptor.validate()?;
        let mut registry = self.registry.write().await;
        if let Some(existing) = registry.get(&descriptor.id) {
            if matches!(descriptor.kind, PluginKind::Distributed { .. }) {
                warn!(
                    plugin = %descriptor.id,
                    existing_kind = existing.kind.tag(),
                    "refusing distributed registration over existing plugin id"
                );
                return Err(VcpError::PluginLoad {
                    plugin: descriptor.id.clone(),
                    reason: "id already registered; distributed plugins never overwrite".into(),
                });
            }
            let existing = existing.clone();
            debug!(plugin = %descriptor.id, "overwriting existing registration");
            self.detach_side_tables(&existing).await;
        }

        self.attach_side_tables(&descriptor).await;
        let id = descriptor.id.clone();
        let kind = descriptor.kind.tag().to_string();
        registry.insert(id.clone(), descriptor);
        let rendered = catalog::render_catalog(&registry);
        drop(registry);
        *self.catalog.write().await = rendered;

        info!(plugin = %id, kind = %kind, "plugin registered");
        self.events.publish(RuntimeEvent::Registered { id, kind });
        Ok(())
    }

    /// Remove a plugin, returning its descriptor.
    ///
    /// # Errors
    ///
    /// `plugin-not-found` when the id is unknown.
    pub async fn unload(&self, id: &str) -> VcpResult<PluginDescriptor> {
        let mut registry = self.registry.write().await;
        let removed = registry
            .remove(id)
            .ok_or_else(|| VcpError::PluginNotFound(id.to_string()))?;
        let rendered = catalog::render_catalog(&registry);
        drop(registry);
        self.detach_side_tables(&removed).await;
        *self.catalog.write().await = rendered;

        info!(plugin = %id, "plugin unloaded");
        self.events
            .publish(RuntimeEvent::Unloaded { id: id.to_string() });
        Ok(removed)
    }

    async fn attach_side_tables(&self, descriptor: &PluginDescriptor) {
        match &descriptor.kind {
            PluginKind::Preprocessor => {
                let mut order = self.preprocessor_order.write().await;
                if !order.contains(&descriptor.id) {
                    order.push(descriptor.id.clone());
                }
            }
            PluginKind::Static => {
                let mut statics = self.statics.write().await;
                for (k, v) in &descriptor.static_values {
                    statics.insert(k.clone(), v.clone());
                }
            }
            _ => {}
        }
    }

    async fn detach_side_tables(&self, descriptor: &PluginDescriptor) {
        match &descriptor.kind {
            PluginKind::Preprocessor => {
                self.preprocessor_order
                    .write()
                    .await
                    .retain(|id| id != &descriptor.id);
                self.preprocessor_impls.write().await.remove(&descriptor.id);
            }
            PluginKind::Static => {
                let mut statics = self.statics.write().await;
                for key in descriptor.static_values.keys() {
                    statics.remove(key);
                }
            }
            PluginKind::Service => {
                self.services.write().await.remove(&descriptor.id);
            }
            _ => {}
        }
    }

    // -- lookups -----------------------------------------------------------

    /// Snapshot of the rendered catalog, keyed by `VCP<id>`.
    pub async fn tool_catalog(&self) -> HashMap<String, String> {
        self.catalog.read().await.clone()
    }

    /// Snapshot of one descriptor.
    pub async fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.registry.read().await.get(id).cloned()
    }

    /// Ids of every registered plugin.
    pub async fn plugin_ids(&self) -> Vec<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    /// The static placeholder map contributed by static plugins.
    pub async fn static_values(&self) -> HashMap<String, String> {
        self.statics.read().await.clone()
    }

    /// Retrieve a bound service handle.
    pub async fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().await.get(name).cloned()
    }

    /// Attach the live handle for a registered service plugin.
    ///
    /// # Errors
    ///
    /// `plugin-not-found` unless `id` names a registered service plugin.
    pub async fn bind_service(&self, id: &str, handle: Arc<dyn Service>) -> VcpResult<()> {
        let registry = self.registry.read().await;
        match registry.get(id) {
            Some(d) if matches!(d.kind, PluginKind::Service) => {
                drop(registry);
                self.services.write().await.insert(id.to_string(), handle);
                Ok(())
            }
            _ => Err(VcpError::PluginNotFound(id.to_string())),
        }
    }

    /// Attach the transformation body for a registered preprocessor.
    ///
    /// # Errors
    ///
    /// `plugin-not-found` unless `id` names a registered preprocessor.
    pub async fn bind_preprocessor(
        &self,
        id: &str,
        stage: Arc<dyn MessagePreprocessor>,
    ) -> VcpResult<()> {
        let registry = self.registry.read().await;
        match registry.get(id) {
            Some(d) if matches!(d.kind, PluginKind::Preprocessor) => {
                drop(registry);
                self.preprocessor_impls
                    .write()
                    .await
                    .insert(id.to_string(), stage);
                Ok(())
            }
            _ => Err(VcpError::PluginNotFound(id.to_string())),
        }
    }

    // -- execution ---------------------------------------------------------

    /// Attach the distributed executor (the tool channel).
    pub async fn set_distributed_executor(&self, executor: Arc<dyn DistributedExecutor>) {
        *self.distributed.write().await = Some(executor);
    }

    /// Attach the consumer for internal-plugin execution requests.
    pub async fn set_internal_executor(&self, tx: mpsc::Sender<InternalExecRequest>) {
        *self.internal_tx.write().await = Some(tx);
    }

    /// Execute a plugin by id.
    ///
    /// Emits `executed` on success and `error` on failure, exactly one
    /// of the two per call. Retries are the caller's concern.
    ///
    /// # Errors
    ///
    /// `tool-not-found` for unknown ids; otherwise whatever the kind's
    /// execution path produced.
    pub async fn execute(
        &self,
        id: &str,
        args: &serde_json::Value,
    ) -> VcpResult<serde_json::Value> {
        let result = match self.descriptor(id).await {
            Some(descriptor) => self.dispatch(&descriptor, args).await,
            None => Err(VcpError::ToolNotFound(id.to_string())),
        };
        match &result {
            Ok(_) => {
                self.events
                    .publish(RuntimeEvent::Executed { id: id.to_string() });
            }
            Err(e) => {
                self.events.publish(RuntimeEvent::ExecutionFailed {
                    id: id.to_string(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn dispatch(
        &self,
        descriptor: &PluginDescriptor,
        args: &serde_json::Value,
    ) -> VcpResult<serde_json::Value> {
        match &descriptor.kind {
            PluginKind::Subprocess { base_dir } => {
                subprocess::run(&descriptor.id, base_dir, args, self.timeouts.subprocess_ms).await
            }
            PluginKind::Distributed { session_id } => {
                let executor = self.distributed.read().await.clone().ok_or_else(|| {
                    VcpError::DistributedConnection(
                        "no distributed executor configured".to_string(),
                    )
                })?;
                let timeout_ms = self.timeouts.distributed_ms;
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    executor.execute(session_id, &descriptor.id, args, timeout_ms),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(VcpError::ToolTimeout {
                        tool: descriptor.id.clone(),
                        timeout_ms,
                    }),
                }
            }
            PluginKind::Internal => self.dispatch_internal(descriptor, args).await,
            PluginKind::Direct => Err(VcpError::InvalidToolRequest(format!(
                "plugin '{}' is direct-routed by the embedding layer",
                descriptor.id
            ))),
            PluginKind::Preprocessor | PluginKind::Service | PluginKind::Static => {
                Err(VcpError::InvalidToolRequest(format!(
                    "plugin '{}' is a {} plugin and cannot be executed",
                    descriptor.id,
                    descriptor.kind.tag()
                )))
            }
        }
    }

    async fn dispatch_internal(
        &self,
        descriptor: &PluginDescriptor,
        args: &serde_json::Value,
    ) -> VcpResult<serde_json::Value> {
        // Catalog-style internal tools advertise no commands and resolve
        // to an empty list without leaving the runtime.
        if descriptor.capabilities.invocation_commands.is_empty() {
            return Ok(serde_json::json!({ "status": "success", "result": [] }));
        }

        let tx = self.internal_tx.read().await.clone().ok_or_else(|| {
            VcpError::ToolExecutionFailed {
                tool: descriptor.id.clone(),
                reason: "no internal executor attached".into(),
            }
        })?;
        let (responder, rx) = oneshot::channel();
        tx.send(InternalExecRequest {
            plugin_id: descriptor.id.clone(),
            args: args.clone(),
            responder,
        })
        .await
        .map_err(|_| VcpError::ToolExecutionFailed {
            tool: descriptor.id.clone(),
            reason: "internal executor is gone".into(),
        })?;

        let timeout_ms = self.timeouts.internal_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(VcpError::ToolExecutionFailed {
                tool: descriptor.id.clone(),
                reason: "internal handler dropped the request".into(),
            }),
            Err(_) => Err(VcpError::ToolTimeout {
                tool: descriptor.id.clone(),
                timeout_ms,
            }),
        }
    }

    // -- preprocessing -----------------------------------------------------

    /// Run every bound preprocessor over the message list, in plugin
    /// registration order. Never fails.
    pub async fn preprocess(
        &self,
        messages: Vec<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        let order = self.preprocessor_order.read().await.clone();
        let impls = self.preprocessor_impls.read().await;
        let stages: Vec<Arc<dyn MessagePreprocessor>> = order
            .iter()
            .filter_map(|id| impls.get(id).cloned())
            .collect();
        drop(impls);
        run_stages(&stages, messages).await
    }

    // -- bulk distributed operations ---------------------------------------

    /// Register every tool a worker session advertised.
    ///
    /// Raw descriptors come straight off the wire: `name` is mandatory,
    /// `id` falls back to `name`, collisions with any existing plugin
    /// are refused with a warning. The catalog is rebuilt once at the
    /// end. Returns the accepted ids.
    pub async fn bulk_register(
        &self,
        session_id: &str,
        tools: &[serde_json::Value],
    ) -> Vec<String> {
        let mut registry = self.registry.write().await;
        let mut accepted = Vec::new();

        for raw in tools {
            let Some(name) = raw
                .get("name")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
            else {
                warn!(session_id, "skipping advertised tool without a name");
                continue;
            };
            let id = raw
                .get("id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(name);
            if registry.contains_key(id) {
                warn!(
                    session_id,
                    plugin = id,
                    "refusing distributed tool: id collides with an existing plugin"
                );
                continue;
            }
            let capabilities: CapabilityManifest = raw
                .get("capabilities")
                .and_then(|c| serde_json::from_value(c.clone()).ok())
                .unwrap_or_default();
            let descriptor = PluginDescriptor {
                id: id.to_string(),
                name: name.to_string(),
                version: raw
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: raw
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                kind: PluginKind::Distributed {
                    session_id: session_id.to_string(),
                },
                capabilities,
                static_values: HashMap::new(),
            };
            registry.insert(descriptor.id.clone(), descriptor);
            accepted.push(id.to_string());
        }

        let rendered = catalog::render_catalog(&registry);
        drop(registry);
        *self.catalog.write().await = rendered;

        info!(
            session_id,
            count = accepted.len(),
            "registered distributed tools"
        );
        for id in &accepted {
            self.events.publish(RuntimeEvent::Registered {
                id: id.clone(),
                kind: "distributed".into(),
            });
        }
        accepted
    }

    /// Drop every plugin owned by a worker session. Returns the removed
    /// ids; the catalog is rebuilt once.
    pub async fn bulk_unregister(&self, session_id: &str) -> Vec<String> {
        self.bulk_unregister_where(session_id, |_| true).await
    }

    /// Drop the named plugins, if owned by the session (selective
    /// withdrawal via `unregister_tools`).
    pub async fn bulk_unregister_named(&self, session_id: &str, names: &[String]) -> Vec<String> {
        self.bulk_unregister_where(session_id, |id| names.iter().any(|n| n == id))
            .await
    }

    async fn bulk_unregister_where(
        &self,
        session_id: &str,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut registry = self.registry.write().await;
        let doomed: Vec<String> = registry
            .values()
            .filter(|d| d.session_id() == Some(session_id) && keep(&d.id))
            .map(|d| d.id.clone())
            .collect();
        for id in &doomed {
            registry.remove(id);
        }
        let rendered = catalog::render_catalog(&registry);
        drop(registry);
        *self.catalog.write().await = rendered;

        if !doomed.is_empty() {
            info!(
                session_id,
                count = doomed.len(),
                "unregistered distributed tools"
            );
        }
        for id in &doomed {
            self.events
                .publish(RuntimeEvent::Unloaded { id: id.clone() });
        }
        doomed
    }
}

impl Default for PluginRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CatalogSource for PluginRuntime {
    async fn catalog(&self) -> HashMap<String, String> {
        self.tool_catalog().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcphub_types::InvocationCommand;

    fn sum_descriptor() -> PluginDescriptor {
        let mut d = PluginDescriptor::new(
            "Sum",
            "Sum",
            PluginKind::Subprocess {
                base_dir: "plugins/Sum".into(),
            },
        );
        d.capabilities = CapabilityManifest {
            invocation_commands: vec![InvocationCommand {
                command: "add".into(),
                description: "adds two numbers".into(),
                example: "add 1 2".into(),
            }],
        };
        d
    }

    #[tokio::test]
    async fn catalog_rebuilds_after_registration() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        let catalog = runtime.tool_catalog().await;
        let entry = catalog.get("VCPSum").expect("catalog entry exists");
        assert!(entry.contains("- Sum (Sum) - command: add:"));
        assert!(entry.contains("adds two numbers"));
        assert!(entry.contains("add 1 2"));
    }

    #[tokio::test]
    async fn unload_drops_the_catalog_entry() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        runtime.unload("Sum").await.unwrap();
        assert!(runtime.tool_catalog().await.is_empty());
        assert!(runtime.descriptor("Sum").await.is_none());
    }

    #[tokio::test]
    async fn unload_unknown_id_fails() {
        let runtime = PluginRuntime::new();
        let err = runtime.unload("Ghost").await.unwrap_err();
        assert_eq!(err.kind(), "plugin-not-found");
    }

    #[tokio::test]
    async fn distributed_duplicate_is_refused() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        let dup = PluginDescriptor::new(
            "Sum",
            "Sum",
            PluginKind::Distributed {
                session_id: "node_1".into(),
            },
        );
        let err = runtime.register(dup).await.unwrap_err();
        assert_eq!(err.kind(), "plugin-load-error");
        // The original registration is untouched.
        let d = runtime.descriptor("Sum").await.unwrap();
        assert_eq!(d.kind.tag(), "subprocess");
    }

    #[tokio::test]
    async fn non_distributed_duplicate_overwrites() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        let mut replacement = sum_descriptor();
        replacement.description = "v2".into();
        runtime.register(replacement).await.unwrap();
        assert_eq!(runtime.descriptor("Sum").await.unwrap().description, "v2");
    }

    #[tokio::test]
    async fn execute_emits_exactly_one_event_per_call() {
        let runtime = PluginRuntime::new();
        let mut rx = runtime.events().subscribe();
        // Internal plugin with no commands: baseline empty-list result.
        runtime
            .register(PluginDescriptor::new("Notes", "Notes", PluginKind::Internal))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap(); // registered

        let out = runtime
            .execute("Notes", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out["result"], serde_json::json!([]));
        match rx.recv().await.unwrap() {
            RuntimeEvent::Executed { id } => assert_eq!(id, "Notes"),
            other => panic!("unexpected event: {other:?}"),
        }

        let err = runtime
            .execute("Missing", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool-not-found");
        match rx.recv().await.unwrap() {
            RuntimeEvent::ExecutionFailed { id, kind, .. } => {
                assert_eq!(id, "Missing");
                assert_eq!(kind, "tool-not-found");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // No second event for either call.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn internal_plugin_with_commands_goes_through_the_executor() {
        let runtime = PluginRuntime::new();
        let mut d = PluginDescriptor::new("Clock", "Clock", PluginKind::Internal);
        d.capabilities.invocation_commands.push(InvocationCommand {
            command: "now".into(),
            description: "tells the time".into(),
            example: String::new(),
        });
        runtime.register(d).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<InternalExecRequest>(4);
        runtime.set_internal_executor(tx).await;
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let _ = req
                    .responder
                    .send(Ok(serde_json::json!({"plugin": req.plugin_id})));
            }
        });

        let out = runtime
            .execute("Clock", &serde_json::json!({"cmd": "now"}))
            .await
            .unwrap();
        assert_eq!(out["plugin"], "Clock");
    }

    #[tokio::test]
    async fn internal_executor_timeout_fails_the_call() {
        let runtime = PluginRuntime::with_timeouts(ExecTimeouts {
            internal_ms: 50,
            ..ExecTimeouts::default()
        });
        let mut d = PluginDescriptor::new("Stuck", "Stuck", PluginKind::Internal);
        d.capabilities.invocation_commands.push(InvocationCommand {
            command: "wait".into(),
            description: "never answers".into(),
            example: String::new(),
        });
        runtime.register(d).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<InternalExecRequest>(4);
        runtime.set_internal_executor(tx).await;
        tokio::spawn(async move {
            // Hold the responder without answering.
            let mut parked = Vec::new();
            while let Some(req) = rx.recv().await {
                parked.push(req);
            }
        });

        let err = runtime
            .execute("Stuck", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool-timeout");
    }

    #[tokio::test]
    async fn distributed_without_executor_fails_fast() {
        let runtime = PluginRuntime::new();
        let d = PluginDescriptor::new(
            "Remote",
            "Remote",
            PluginKind::Distributed {
                session_id: "node_1".into(),
            },
        );
        runtime.register(d).await.unwrap();
        let err = runtime
            .execute("Remote", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "distributed-connection-error");
    }

    struct EchoExecutor;

    #[async_trait]
    impl DistributedExecutor for EchoExecutor {
        async fn execute(
            &self,
            session_id: &str,
            tool_name: &str,
            args: &serde_json::Value,
            _timeout_ms: u64,
        ) -> VcpResult<serde_json::Value> {
            Ok(serde_json::json!({
                "session": session_id,
                "tool": tool_name,
                "args": args,
            }))
        }
    }

    #[tokio::test]
    async fn distributed_dispatch_reaches_the_executor() {
        let runtime = PluginRuntime::new();
        runtime
            .set_distributed_executor(Arc::new(EchoExecutor))
            .await;
        let d = PluginDescriptor::new(
            "Remote",
            "Remote",
            PluginKind::Distributed {
                session_id: "node_7".into(),
            },
        );
        runtime.register(d).await.unwrap();
        let out = runtime
            .execute("Remote", &serde_json::json!({"q": 1}))
            .await
            .unwrap();
        assert_eq!(out["session"], "node_7");
        assert_eq!(out["tool"], "Remote");
    }

    #[tokio::test]
    async fn non_executable_kinds_are_rejected() {
        let runtime = PluginRuntime::new();
        runtime
            .register(PluginDescriptor::new("Pre", "Pre", PluginKind::Preprocessor))
            .await
            .unwrap();
        let err = runtime
            .execute("Pre", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-tool-request");
    }

    #[tokio::test]
    async fn static_registration_populates_the_placeholder_map() {
        let runtime = PluginRuntime::new();
        let mut d = PluginDescriptor::new("Motd", "Motd", PluginKind::Static);
        d.static_values.insert("Motd".into(), "be kind".into());
        runtime.register(d).await.unwrap();
        assert_eq!(
            runtime.static_values().await.get("Motd").map(String::as_str),
            Some("be kind")
        );
        runtime.unload("Motd").await.unwrap();
        assert!(runtime.static_values().await.is_empty());
    }

    #[tokio::test]
    async fn bulk_register_refuses_collisions_without_events() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        let mut rx = runtime.events().subscribe();

        let tools = vec![
            serde_json::json!({"name": "Sum"}),
            serde_json::json!({"name": "Weather", "capabilities": {
                "invocationCommands": [{"command": "query", "description": "current weather"}]
            }}),
            serde_json::json!({"description": "nameless"}),
        ];
        let accepted = runtime.bulk_register("node_1", &tools).await;
        assert_eq!(accepted, vec!["Weather".to_string()]);

        // Exactly one registered event, for Weather.
        match rx.recv().await.unwrap() {
            RuntimeEvent::Registered { id, kind } => {
                assert_eq!(id, "Weather");
                assert_eq!(kind, "distributed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        // The colliding entry kept its original kind.
        assert_eq!(runtime.descriptor("Sum").await.unwrap().kind.tag(), "subprocess");
        assert!(runtime.tool_catalog().await.contains_key("VCPWeather"));
    }

    #[tokio::test]
    async fn bulk_unregister_drops_only_that_session() {
        let runtime = PluginRuntime::new();
        runtime
            .bulk_register("node_1", &[serde_json::json!({"name": "A"})])
            .await;
        runtime
            .bulk_register("node_2", &[serde_json::json!({"name": "B"})])
            .await;
        let removed = runtime.bulk_unregister("node_1").await;
        assert_eq!(removed, vec!["A".to_string()]);
        assert!(runtime.descriptor("A").await.is_none());
        assert!(runtime.descriptor("B").await.is_some());
    }

    #[tokio::test]
    async fn bulk_unregister_named_is_selective() {
        let runtime = PluginRuntime::new();
        runtime
            .bulk_register(
                "node_1",
                &[
                    serde_json::json!({"name": "A"}),
                    serde_json::json!({"name": "B"}),
                ],
            )
            .await;
        let removed = runtime
            .bulk_unregister_named("node_1", &["B".to_string()])
            .await;
        assert_eq!(removed, vec!["B".to_string()]);
        assert!(runtime.descriptor("A").await.is_some());
    }

    struct Reverser;

    #[async_trait]
    impl MessagePreprocessor for Reverser {
        fn name(&self) -> &str {
            "reverser"
        }
        async fn process(
            &self,
            mut messages: Vec<serde_json::Value>,
        ) -> VcpResult<Vec<serde_json::Value>> {
            messages.reverse();
            Ok(messages)
        }
    }

    #[tokio::test]
    async fn preprocess_runs_bound_stages_in_registration_order() {
        let runtime = PluginRuntime::new();
        runtime
            .register(PluginDescriptor::new("Rev", "Rev", PluginKind::Preprocessor))
            .await
            .unwrap();
        runtime
            .bind_preprocessor("Rev", Arc::new(Reverser))
            .await
            .unwrap();
        let out = runtime
            .preprocess(vec![serde_json::json!(1), serde_json::json!(2)])
            .await;
        assert_eq!(out, vec![serde_json::json!(2), serde_json::json!(1)]);
    }

    #[tokio::test]
    async fn bind_preprocessor_requires_matching_kind() {
        let runtime = PluginRuntime::new();
        runtime.register(sum_descriptor()).await.unwrap();
        let err = runtime
            .bind_preprocessor("Sum", Arc::new(Reverser))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "plugin-not-found");
    }

    struct NullService;

    impl Service for NullService {
        fn name(&self) -> &str {
            "null"
        }
    }

    #[tokio::test]
    async fn service_handles_are_bound_and_retrieved() {
        let runtime = PluginRuntime::new();
        runtime
            .register(PluginDescriptor::new("Store", "Store", PluginKind::Service))
            .await
            .unwrap();
        runtime
            .bind_service("Store", Arc::new(NullService))
            .await
            .unwrap();
        assert!(runtime.service("Store").await.is_some());
        assert!(runtime.service("Nope").await.is_none());
    }
}
