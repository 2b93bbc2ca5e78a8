//! Transform invocation strategies
//!
//! `Transform` is the seam the host implements: a per-file string
//! transform plus optional hooks. The engine drives it through a
//! `ProcessStrategy` — the default strategy invokes the transform every
//! time, the persistent strategy consults the two-level cache first.

use crate::cache::KvStore;
use crate::deps::Dependencies;
use crate::error::{RefractError, RefractResult};
use crate::fingerprint;
use crate::stats::BuildStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The structured result of one transform invocation
///
/// `extras` carries transform-defined fields alongside the output so a
/// `post_process` hook can see them even on a persistent-cache hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub output: String,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl ProcessResult {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            extras: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

/// What `process_string` may return: plain output bytes or the
/// structured form. Normalized to `ProcessResult` at the strategy
/// boundary.
#[derive(Debug, Clone)]
pub enum Output {
    Text(String),
    Structured(ProcessResult),
}

impl Output {
    pub fn into_result(self) -> ProcessResult {
        match self {
            Output::Text(text) => ProcessResult::new(text),
            Output::Structured(result) => result,
        }
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Output::Text(text)
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Output::Text(text.to_string())
    }
}

impl From<ProcessResult> for Output {
    fn from(result: ProcessResult) -> Self {
        Output::Structured(result)
    }
}

/// Per-invocation context handed to the transform
///
/// Carries the relative path being processed and the dependency
/// declaration seam.
pub struct TransformContext {
    relative_path: String,
    dependencies: Option<Arc<Mutex<Dependencies>>>,
}

impl TransformContext {
    pub(crate) fn new(
        relative_path: impl Into<String>,
        dependencies: Option<Arc<Mutex<Dependencies>>>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            dependencies,
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Declare the files this file depends on
    ///
    /// Relative paths resolve against this file's directory inside the
    /// input tree; absolute paths may point anywhere. Fails unless the
    /// engine was built with `dependency_invalidation`.
    pub fn set_dependencies<P: AsRef<Path>>(&self, deps: &[P]) -> RefractResult<()> {
        let handle = self.dependencies.as_ref().ok_or_else(|| {
            RefractError::invariant("set_dependencies requires the dependency_invalidation option")
        })?;
        let mut guard = handle
            .lock()
            .map_err(|_| RefractError::invariant("dependency tracker lock poisoned"))?;
        guard.set_dependencies(&self.relative_path, deps)
    }
}

/// The per-file transform a host plugs into the engine
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    /// Short name used in logs and in the plugin cache key
    fn name(&self) -> &str;

    /// Transform one file's contents
    async fn process_string(
        &self,
        ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output>;

    /// Hook run on every result, including persistent-cache hits. Its
    /// return value is what lands in the output tree but is never
    /// written back to the cache.
    async fn post_process(
        &self,
        result: ProcessResult,
        _relative_path: &str,
    ) -> RefractResult<ProcessResult> {
        Ok(result)
    }

    /// Override the plugin-wide cache key component
    fn cache_key(&self) -> Option<String> {
        None
    }

    /// Override the per-file cache key
    fn cache_key_for(&self, contents: &str, relative_path: &str) -> String {
        fingerprint::file_cache_key(contents, relative_path)
    }

    /// Root of the transform's own package; required for persistence
    fn base_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// Strategy behind `process_string` dispatch
#[async_trait]
pub trait ProcessStrategy: Send + Sync {
    async fn process(
        &self,
        transform: &dyn Transform,
        ctx: &TransformContext,
        contents: &str,
        force_invalidate: bool,
        stats: &BuildStats,
    ) -> RefractResult<ProcessResult>;
}

/// Memoryless strategy: invoke, normalize, post-process
pub struct DefaultStrategy;

#[async_trait]
impl ProcessStrategy for DefaultStrategy {
    async fn process(
        &self,
        transform: &dyn Transform,
        ctx: &TransformContext,
        contents: &str,
        _force_invalidate: bool,
        stats: &BuildStats,
    ) -> RefractResult<ProcessResult> {
        stats.record_process_string();
        let result = transform.process_string(ctx, contents).await?.into_result();
        stats.record_post_process();
        transform.post_process(result, ctx.relative_path()).await
    }
}

/// Caching strategy: in-memory map first, then the injected store
///
/// Both layers hold the pre-`post_process` result, so the hook runs on
/// every retrieval and its return value is never re-cached.
pub struct PersistentStrategy {
    namespace: String,
    store: Arc<dyn KvStore>,
    memory: Mutex<HashMap<String, ProcessResult>>,
}

impl PersistentStrategy {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            memory: Mutex::new(HashMap::new()),
        }
    }

    fn memory_get(&self, key: &str) -> Option<ProcessResult> {
        self.memory
            .lock()
            .ok()
            .and_then(|guard| guard.get(key).cloned())
    }

    fn memory_put(&self, key: &str, result: &ProcessResult) {
        if let Ok(mut guard) = self.memory.lock() {
            guard.insert(key.to_string(), result.clone());
        }
    }

    fn store_get(&self, key: &str) -> Option<ProcessResult> {
        let bytes = self.store.get(&self.namespace, key)?;
        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                // treat undecodable entries as misses
                debug!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    fn store_put(&self, key: &str, result: &ProcessResult) {
        match serde_json::to_vec(result) {
            Ok(bytes) => self.store.set(&self.namespace, key, &bytes),
            Err(e) => debug!("Skipping unserializable cache entry {}: {}", key, e),
        }
    }
}

#[async_trait]
impl ProcessStrategy for PersistentStrategy {
    async fn process(
        &self,
        transform: &dyn Transform,
        ctx: &TransformContext,
        contents: &str,
        force_invalidate: bool,
        stats: &BuildStats,
    ) -> RefractResult<ProcessResult> {
        let key = transform.cache_key_for(contents, ctx.relative_path());

        if !force_invalidate {
            let cached = self.memory_get(&key).or_else(|| {
                let fetched = self.store_get(&key)?;
                self.memory_put(&key, &fetched);
                Some(fetched)
            });
            if let Some(result) = cached {
                debug!("Cache hit for {}", ctx.relative_path());
                stats.record_cache_hit();
                stats.record_post_process();
                return transform.post_process(result, ctx.relative_path()).await;
            }
        }

        stats.record_process_string();
        let result = transform.process_string(ctx, contents).await?.into_result();

        self.memory_put(&key, &result);
        self.store_put(&key, &result);
        stats.record_cache_prime();

        stats.record_post_process();
        transform.post_process(result, ctx.relative_path()).await
    }
}
