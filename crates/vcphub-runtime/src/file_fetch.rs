//! Tiered file fetcher.
//!
//! Resolves a path to bytes through layered lookups, first hit wins:
//!
//! 1. cache directory (key = SHA-256 of the normalized path, extension
//!    preserved for MIME inference)
//! 2. local filesystem (`file://` URLs are stripped to bare paths)
//! 3. HTTP download, for `http(s)://` paths
//! 4. connected worker nodes, via `fetch_file` / `file_result` frames
//!
//! Cache writes are best-effort and the directory is swept back under a
//! byte budget after each write; cache content is regenerable and there
//! is no index file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vcphub_types::{FetcherConfig, VcpError, VcpResult};

/// Where a fetched file ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Cache directory or local filesystem.
    Local,
    /// A connected worker node.
    Distributed,
    /// Downloaded over HTTP.
    Fetched,
}

/// A resolved file.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub size: u64,
    pub from_cache: bool,
    pub source: FetchSource,
}

/// Cumulative fetcher statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub cached_files: usize,
    pub total_bytes: u64,
}

/// Seam to the distributed tool channel: ask connected workers for a
/// file body, returned as base64.
#[async_trait]
pub trait RemoteFileSource: Send + Sync {
    /// Number of currently linked worker sessions.
    fn session_count(&self) -> usize;

    /// Request `path` from connected workers; the first success wins.
    async fn request_file(&self, path: &str, timeout_ms: u64) -> VcpResult<String>;
}

/// Three-layer file resolver with a disk cache.
pub struct FileFetcher {
    config: FetcherConfig,
    remote: RwLock<Option<Arc<dyn RemoteFileSource>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileFetcher {
    #[must_use]
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            remote: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Link the distributed layer. Without it, layer 4 is skipped.
    pub async fn set_remote(&self, remote: Arc<dyn RemoteFileSource>) {
        *self.remote.write().await = Some(remote);
    }

    /// Resolve `path` to bytes through the layered lookup.
    ///
    /// # Errors
    ///
    /// `tool-execution-failed` naming the path when every layer misses.
    pub async fn fetch(&self, path: &str) -> VcpResult<FetchedFile> {
        let normalized = normalize_path(path);
        let cache_path = self.cache_path(&normalized);
        let mime = mime_for_path(&normalized);

        // Layer 1: cache.
        if let Ok(bytes) = tokio::fs::read(&cache_path).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path = %normalized, "file served from cache");
            let size = bytes.len() as u64;
            return Ok(FetchedFile {
                bytes,
                mime,
                size,
                from_cache: true,
                source: FetchSource::Local,
            });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        if is_http_url(&normalized) {
            // Layer 3 applies instead of the filesystem for URLs.
            let bytes = self.fetch_http(&normalized).await?;
            self.store_in_cache(&cache_path, &bytes).await;
            let size = bytes.len() as u64;
            return Ok(FetchedFile {
                bytes,
                mime,
                size,
                from_cache: false,
                source: FetchSource::Fetched,
            });
        }

        // Layer 2: local filesystem.
        if let Ok(bytes) = tokio::fs::read(&normalized).await {
            self.store_in_cache(&cache_path, &bytes).await;
            let size = bytes.len() as u64;
            return Ok(FetchedFile {
                bytes,
                mime,
                size,
                from_cache: false,
                source: FetchSource::Local,
            });
        }

        // Layer 4: connected worker nodes.
        let remote = self.remote.read().await.clone();
        if let Some(remote) = remote.filter(|r| r.session_count() > 0) {
            let content = remote
                .request_file(&normalized, self.config.distributed_timeout_ms)
                .await?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content.trim())
                .map_err(|e| VcpError::ToolExecutionFailed {
                    tool: "FileFetch".into(),
                    reason: format!("node returned undecodable file body for '{normalized}': {e}"),
                })?;
            self.store_in_cache(&cache_path, &bytes).await;
            info!(path = %normalized, bytes = bytes.len(), "file fetched from worker node");
            let size = bytes.len() as u64;
            return Ok(FetchedFile {
                bytes,
                mime,
                size,
                from_cache: false,
                source: FetchSource::Distributed,
            });
        }

        Err(VcpError::ToolExecutionFailed {
            tool: "FileFetch".into(),
            reason: format!(
                "unable to resolve '{normalized}' from cache, filesystem, or connected nodes"
            ),
        })
    }

    async fn fetch_http(&self, url: &str) -> VcpResult<Vec<u8>> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| VcpError::ToolExecutionFailed {
                tool: "FileFetch".into(),
                reason: format!("download of '{url}' failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(VcpError::ToolExecutionFailed {
                tool: "FileFetch".into(),
                reason: format!("download of '{url}' failed: HTTP {}", response.status()),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VcpError::ToolExecutionFailed {
                tool: "FileFetch".into(),
                reason: format!("download of '{url}' failed mid-body: {e}"),
            })?;
        Ok(bytes.to_vec())
    }

    /// Cache file path for a normalized request path.
    fn cache_path(&self, normalized: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let key = format!("{:x}", hasher.finalize());
        self.config
            .cache_dir
            .join(format!("{key}{}", path_extension(normalized)))
    }

    /// Best-effort cache write followed by a budget sweep.
    async fn store_in_cache(&self, cache_path: &Path, bytes: &[u8]) {
        if let Err(e) = tokio::fs::create_dir_all(&self.config.cache_dir).await {
            warn!(error = %e, "cannot create cache directory");
            return;
        }
        if let Err(e) = tokio::fs::write(cache_path, bytes).await {
            warn!(path = %cache_path.display(), error = %e, "cache write failed");
            return;
        }
        self.sweep_to_budget().await;
    }

    /// Remove oldest cache files until the directory fits the budget.
    async fn sweep_to_budget(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.cache_dir).await else {
            return;
        };
        let mut files: Vec<(std::time::SystemTime, u64, PathBuf)> = Vec::new();
        let mut total: u64 = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            total += meta.len();
            files.push((mtime, meta.len(), entry.path()));
        }
        if total <= self.config.cache_budget_bytes {
            return;
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, len, path) in files {
            if total <= self.config.cache_budget_bytes {
                break;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    total = total.saturating_sub(len);
                    debug!(path = %path.display(), "evicted cache file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cache eviction failed"),
            }
        }
    }

    /// Delete every cached file. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// `tool-execution-failed` when the cache directory cannot be read.
    pub async fn clear_cache(&self) -> VcpResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.config.cache_dir).await {
            Ok(entries) => entries,
            // A cache that never materialized is already clear.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(VcpError::ToolExecutionFailed {
                    tool: "FileFetch".into(),
                    reason: format!("cannot read cache directory: {e}"),
                });
            }
        };
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        info!(removed, "file cache cleared");
        Ok(removed)
    }

    /// Cumulative hit/miss counters plus current on-disk cache totals.
    pub async fn stats(&self) -> FetchStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        let mut cached_files = 0;
        let mut total_bytes = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(&self.config.cache_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(meta) = entry.metadata().await {
                    if meta.is_file() {
                        cached_files += 1;
                        total_bytes += meta.len();
                    }
                }
            }
        }

        FetchStats {
            hits,
            misses,
            hit_rate,
            cached_files,
            total_bytes,
        }
    }
}

impl std::fmt::Debug for FileFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Strip a `file://` scheme down to a bare path.
fn normalize_path(path: &str) -> String {
    path.strip_prefix("file://").unwrap_or(path).to_string()
}

fn is_http_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Extension of the request path including the dot, query strings
/// stripped; empty when there is none.
fn path_extension(path: &str) -> String {
    let without_query = path.split(['?', '#']).next().unwrap_or(path);
    Path::new(without_query)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// MIME type inferred from the path extension.
fn mime_for_path(path: &str) -> String {
    let ext = path_extension(path);
    let mime = match ext.as_str() {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".svg" => "image/svg+xml",
        ".mp3" => "audio/mpeg",
        ".wav" => "audio/wav",
        ".ogg" => "audio/ogg",
        ".mp4" => "video/mp4",
        ".mov" => "video/quicktime",
        ".webm" => "video/webm",
        ".pdf" => "application/pdf",
        ".txt" => "text/plain",
        ".md" => "text/markdown",
        ".json" => "application/json",
        ".html" => "text/html",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher_in(dir: &Path) -> FileFetcher {
        FileFetcher::new(FetcherConfig {
            cache_dir: dir.join("cache"),
            distributed_timeout_ms: 200,
            cache_budget_bytes: 512 * 1024 * 1024,
        })
    }

    #[tokio::test]
    async fn filesystem_hit_then_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("note.txt");
        tokio::fs::write(&target, b"hello").await.unwrap();
        let fetcher = fetcher_in(dir.path());

        let first = fetcher.fetch(target.to_str().unwrap()).await.unwrap();
        assert_eq!(first.bytes, b"hello");
        assert_eq!(first.mime, "text/plain");
        assert!(!first.from_cache);
        assert_eq!(first.source, FetchSource::Local);

        // Remove the original; the cache copy must now answer.
        tokio::fs::remove_file(&target).await.unwrap();
        let second = fetcher.fetch(target.to_str().unwrap()).await.unwrap();
        assert_eq!(second.bytes, b"hello");
        assert!(second.from_cache);
        assert_eq!(second.source, FetchSource::Local);

        let stats = fetcher.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.cached_files, 1);
        assert_eq!(stats.total_bytes, 5);
    }

    #[tokio::test]
    async fn file_url_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.json");
        tokio::fs::write(&target, b"{}").await.unwrap();
        let fetcher = fetcher_in(dir.path());
        let url = format!("file://{}", target.display());
        let got = fetcher.fetch(&url).await.unwrap();
        assert_eq!(got.bytes, b"{}");
        assert_eq!(got.mime, "application/json");
    }

    struct StubRemote {
        sessions: usize,
        body: Vec<u8>,
    }

    #[async_trait]
    impl RemoteFileSource for StubRemote {
        fn session_count(&self) -> usize {
            self.sessions
        }
        async fn request_file(&self, _path: &str, _timeout_ms: u64) -> VcpResult<String> {
            Ok(base64::engine::general_purpose::STANDARD.encode(&self.body))
        }
    }

    #[tokio::test]
    async fn distributed_layer_answers_when_local_misses() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_in(dir.path());
        fetcher
            .set_remote(Arc::new(StubRemote {
                sessions: 1,
                body: b"remote bytes".to_vec(),
            }))
            .await;

        let missing = dir.path().join("ghost.png");
        let got = fetcher.fetch(missing.to_str().unwrap()).await.unwrap();
        assert_eq!(got.bytes, b"remote bytes");
        assert_eq!(got.source, FetchSource::Distributed);
        assert_eq!(got.mime, "image/png");

        // Cached now: a second fetch is a cache hit.
        let again = fetcher.fetch(missing.to_str().unwrap()).await.unwrap();
        assert!(again.from_cache);
    }

    #[tokio::test]
    async fn distributed_layer_is_skipped_without_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_in(dir.path());
        fetcher
            .set_remote(Arc::new(StubRemote {
                sessions: 0,
                body: b"x".to_vec(),
            }))
            .await;
        let missing = dir.path().join("nope.bin");
        let err = fetcher.fetch(missing.to_str().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), "tool-execution-failed");
        assert!(err.to_string().contains("nope.bin"));
    }

    #[tokio::test]
    async fn all_layers_missing_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_in(dir.path());
        let err = fetcher.fetch("/definitely/not/here.dat").await.unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.dat"));
    }

    #[tokio::test]
    async fn clear_cache_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        tokio::fs::write(&target, b"abc").await.unwrap();
        let fetcher = fetcher_in(dir.path());
        fetcher.fetch(target.to_str().unwrap()).await.unwrap();
        assert_eq!(fetcher.clear_cache().await.unwrap(), 1);
        assert_eq!(fetcher.stats().await.cached_files, 0);
    }

    #[tokio::test]
    async fn clear_cache_on_missing_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher_in(dir.path());
        assert_eq!(fetcher.clear_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_keeps_the_cache_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FileFetcher::new(FetcherConfig {
            cache_dir: dir.path().join("cache"),
            distributed_timeout_ms: 200,
            cache_budget_bytes: 10,
        });
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, b"12345678").await.unwrap();
        tokio::fs::write(&b, b"abcdefgh").await.unwrap();
        fetcher.fetch(a.to_str().unwrap()).await.unwrap();
        fetcher.fetch(b.to_str().unwrap()).await.unwrap();
        let stats = fetcher.stats().await;
        assert!(stats.total_bytes <= 10);
        assert_eq!(stats.cached_files, 1);
    }

    #[test]
    fn extension_handling() {
        assert_eq!(path_extension("/a/b/c.PNG"), ".png");
        assert_eq!(path_extension("http://x/y.jpg?size=2"), ".jpg");
        assert_eq!(path_extension("/no/ext"), "");
    }

    #[test]
    fn mime_defaults_to_octet_stream() {
        assert_eq!(mime_for_path("/a/b.xyz"), "application/octet-stream");
        assert_eq!(mime_for_path("/a/b"), "application/octet-stream");
        assert_eq!(mime_for_path("/a/b.mp4"), "video/mp4");
    }
}
