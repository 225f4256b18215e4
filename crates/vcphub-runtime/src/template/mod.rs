//! Template engine: `{{KEY}}` placeholder expansion.
//!
//! Keys match `[A-Za-z0-9_:]+`. Providers are consulted in registration
//! order; the first one returning a value for a key wins, and the value
//! is itself resolved recursively before substitution. A per-call stack
//! doubles as the cycle detector and the depth counter. Unresolved
//! placeholders are left intact for downstream consumers.

mod providers;

pub use providers::{
    CatalogProvider, CatalogSource, EnvProvider, Provider, StaticProvider, TimeProvider,
};

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use vcphub_types::{EngineConfig, VcpError, VcpResult};

/// Per-call context: values that override every provider for the
/// duration of one `resolve` call.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub vars: HashMap<String, String>,
}

impl ResolveContext {
    /// Context with a single override, a common test/caller shorthand.
    #[must_use]
    pub fn with(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = HashMap::new();
        vars.insert(key.into(), value.into());
        Self { vars }
    }
}

/// Placeholder-expansion engine with ordered providers.
pub struct TemplateEngine {
    config: EngineConfig,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    /// Cached substitution regexes, keyed by placeholder key. Bounded;
    /// flushed wholesale on overflow.
    regex_cache: Mutex<HashMap<String, Regex>>,
    key_re: Regex,
}

impl TemplateEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: RwLock::new(Vec::new()),
            regex_cache: Mutex::new(HashMap::new()),
            key_re: Regex::new(r"\{\{([A-Za-z0-9_:]+)\}\}").expect("key pattern is valid"),
        }
    }

    /// Append a provider. Registration order is resolution priority.
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) {
        let mut providers = self.providers.write().await;
        debug!(provider = provider.name(), "registered template provider");
        providers.push(provider);
    }

    /// Resolve every placeholder in `text`.
    ///
    /// # Errors
    ///
    /// Fails with `circular-dependency`, `max-recursion-depth`, or a
    /// fan-out breach; individual provider errors are logged and the
    /// next provider is tried.
    pub async fn resolve(&self, text: &str, ctx: &ResolveContext) -> VcpResult<String> {
        let mut stack = Vec::new();
        self.resolve_with_stack(text.to_string(), ctx, &mut stack)
            .await
    }

    /// Unique keys appearing in `text`, in first-appearance order.
    fn extract_keys(&self, text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for caps in self.key_re.captures_iter(text) {
            let key = &caps[1];
            if !seen.iter().any(|k| k == key) {
                seen.push(key.to_string());
            }
        }
        seen
    }

    fn resolve_with_stack<'a>(
        &'a self,
        text: String,
        ctx: &'a ResolveContext,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, VcpResult<String>> {
        Box::pin(async move {
            let keys = self.extract_keys(&text);
            if keys.is_empty() {
                return Ok(text);
            }
            if keys.len() > self.config.max_fanout {
                return Err(VcpError::VariableResolve {
                    key: keys[self.config.max_fanout].clone(),
                    reason: format!(
                        "{} unique placeholders exceed the fan-out cap of {}",
                        keys.len(),
                        self.config.max_fanout
                    ),
                });
            }

            let mut substitutions: Vec<(String, String)> = Vec::new();
            for key in keys {
                if let Some(value) = self.resolve_key(&key, ctx, stack).await? {
                    substitutions.push((key, value));
                }
                // No provider claimed the key: leave the placeholder
                // intact, it may be meant for a downstream consumer.
            }

            self.apply_substitutions(text, &substitutions).await
        })
    }

    /// Resolve one key through context overrides, then providers in
    /// order, recursing into the produced value.
    async fn resolve_key(
        &self,
        key: &str,
        ctx: &ResolveContext,
        stack: &mut Vec<String>,
    ) -> VcpResult<Option<String>> {
        if self.config.cycle_detection && stack.iter().any(|k| k == key) {
            return Err(VcpError::CircularDependency {
                key: key.to_string(),
                stack: format!("{} -> {}", stack.join(" -> "), key),
            });
        }
        if stack.len() >= self.config.max_depth {
            return Err(VcpError::MaxRecursionDepth {
                key: key.to_string(),
                max_depth: self.config.max_depth,
            });
        }

        let raw = match self.lookup(key, ctx).await {
            Some(v) => v,
            None => return Ok(None),
        };

        stack.push(key.to_string());
        let resolved = self.resolve_with_stack(raw, ctx, stack).await;
        stack.pop();
        resolved.map(Some)
    }

    /// First matching value: context overrides win, then providers in
    /// registration order. Provider errors are logged and skipped.
    async fn lookup(&self, key: &str, ctx: &ResolveContext) -> Option<String> {
        if let Some(v) = ctx.vars.get(key) {
            return Some(v.clone());
        }
        let providers = self.providers.read().await;
        for provider in providers.iter() {
            match provider.resolve(key, ctx).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        key,
                        error = %e,
                        "template provider failed; trying next"
                    );
                }
            }
        }
        None
    }

    /// Batched replacement: one cached regex per literal placeholder,
    /// all substitutions applied before returning.
    async fn apply_substitutions(
        &self,
        text: String,
        substitutions: &[(String, String)],
    ) -> VcpResult<String> {
        if substitutions.is_empty() {
            return Ok(text);
        }
        let mut cache = self.regex_cache.lock().await;
        let mut out = text;
        for (key, value) in substitutions {
            if !cache.contains_key(key) {
                if cache.len() >= self.config.regex_cache_size {
                    debug!(
                        size = cache.len(),
                        "substitution regex cache full; flushing"
                    );
                    cache.clear();
                }
                let pattern = regex::escape(&format!("{{{{{key}}}}}"));
                let re = Regex::new(&pattern).map_err(|e| VcpError::VariableResolve {
                    key: key.clone(),
                    reason: format!("substitution pattern failed to compile: {e}"),
                })?;
                cache.insert(key.clone(), re);
            }
            let re = &cache[key];
            out = re
                .replace_all(&out, regex::NoExpand(value))
                .into_owned();
        }
        Ok(out)
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct MapProvider {
        map: HashMap<String, String>,
    }

    impl MapProvider {
        fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                map: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Provider for MapProvider {
        fn name(&self) -> &str {
            "map"
        }
        async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
            Ok(self.map.get(key).cloned())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
            Err(VcpError::VariableResolve {
                key: key.to_string(),
                reason: "always broken".into(),
            })
        }
    }

    async fn engine_with(pairs: &[(&str, &str)]) -> TemplateEngine {
        let engine = TemplateEngine::new(EngineConfig::default());
        engine.register_provider(MapProvider::new(pairs)).await;
        engine
    }

    #[tokio::test]
    async fn plain_text_is_identity() {
        let engine = engine_with(&[]).await;
        let out = engine
            .resolve("no placeholders here", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "no placeholders here");
    }

    #[tokio::test]
    async fn simple_substitution() {
        let engine = engine_with(&[("Name", "Ada")]).await;
        let out = engine
            .resolve("hello {{Name}}!", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "hello Ada!");
    }

    #[tokio::test]
    async fn repeated_placeholder_is_replaced_everywhere() {
        let engine = engine_with(&[("X", "1")]).await;
        let out = engine
            .resolve("{{X}}+{{X}}={{X}}{{X}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "1+1=11");
    }

    #[tokio::test]
    async fn unresolved_placeholders_stay_intact() {
        let engine = engine_with(&[("Known", "v")]).await;
        let out = engine
            .resolve("{{Known}} {{Unknown}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "v {{Unknown}}");
    }

    #[tokio::test]
    async fn nested_values_resolve_recursively() {
        let engine = engine_with(&[("Outer", "[{{Inner}}]"), ("Inner", "core")]).await;
        let out = engine
            .resolve("x {{Outer}} y", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "x [core] y");
    }

    #[tokio::test]
    async fn cycle_is_detected_and_named() {
        let engine = engine_with(&[("A", "{{B}}"), ("B", "{{A}}")]).await;
        let err = engine
            .resolve("start {{A}} end", &ResolveContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "circular-dependency");
        let msg = err.to_string();
        assert!(msg.contains("'A'") || msg.contains("'B'"));
    }

    #[tokio::test]
    async fn self_cycle_is_detected() {
        let engine = engine_with(&[("A", "again {{A}}")]).await;
        let err = engine
            .resolve("{{A}}", &ResolveContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "circular-dependency");
    }

    #[tokio::test]
    async fn depth_cap_boundary() {
        // Chain of `cap` keys resolves; chain of `cap + 1` keys fails.
        let cap = EngineConfig::default().max_depth;
        let mut ok_pairs: Vec<(String, String)> = Vec::new();
        for i in 1..cap {
            ok_pairs.push((format!("A{i}"), format!("{{{{A{}}}}}", i + 1)));
        }
        ok_pairs.push((format!("A{cap}"), "end".to_string()));
        let borrowed: Vec<(&str, &str)> = ok_pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let engine = engine_with(&borrowed).await;
        let out = engine
            .resolve("{{A1}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "end");

        let mut deep_pairs: Vec<(String, String)> = Vec::new();
        for i in 1..=cap {
            deep_pairs.push((format!("B{i}"), format!("{{{{B{}}}}}", i + 1)));
        }
        deep_pairs.push((format!("B{}", cap + 1), "end".to_string()));
        let borrowed: Vec<(&str, &str)> = deep_pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let engine = engine_with(&borrowed).await;
        let err = engine
            .resolve("{{B1}}", &ResolveContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "max-recursion-depth");
    }

    #[tokio::test]
    async fn fanout_cap_fails_the_call() {
        let config = EngineConfig {
            max_fanout: 3,
            ..EngineConfig::default()
        };
        let engine = TemplateEngine::new(config);
        let err = engine
            .resolve("{{A}} {{B}} {{C}} {{D}}", &ResolveContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "variable-resolve-error");
    }

    #[tokio::test]
    async fn provider_error_falls_through_to_next() {
        let engine = TemplateEngine::new(EngineConfig::default());
        engine.register_provider(Arc::new(FailingProvider)).await;
        engine
            .register_provider(MapProvider::new(&[("K", "value")]))
            .await;
        let out = engine
            .resolve("{{K}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "value");
    }

    #[tokio::test]
    async fn first_provider_wins() {
        let engine = TemplateEngine::new(EngineConfig::default());
        engine
            .register_provider(MapProvider::new(&[("K", "first")]))
            .await;
        engine
            .register_provider(MapProvider::new(&[("K", "second")]))
            .await;
        let out = engine
            .resolve("{{K}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "first");
    }

    #[tokio::test]
    async fn context_overrides_providers() {
        let engine = engine_with(&[("K", "provided")]).await;
        let out = engine
            .resolve("{{K}}", &ResolveContext::with("K", "override"))
            .await
            .unwrap();
        assert_eq!(out, "override");
    }

    #[tokio::test]
    async fn replacement_value_with_dollar_signs_is_literal() {
        let engine = engine_with(&[("Price", "$100 and ${brace}")]).await;
        let out = engine
            .resolve("cost: {{Price}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "cost: $100 and ${brace}");
    }

    #[tokio::test]
    async fn regex_cache_overflow_flushes_and_keeps_working() {
        let config = EngineConfig {
            regex_cache_size: 2,
            ..EngineConfig::default()
        };
        let engine = TemplateEngine::new(config);
        engine
            .register_provider(MapProvider::new(&[("A", "1"), ("B", "2"), ("C", "3")]))
            .await;
        let out = engine
            .resolve("{{A}}{{B}}{{C}}", &ResolveContext::default())
            .await
            .unwrap();
        assert_eq!(out, "123");
    }
}
