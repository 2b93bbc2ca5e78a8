//! Build engine
//!
//! `Filter` owns the incremental build loop: walk the input tree, diff
//! against the snapshot retained from the previous build, merge in
//! dependency invalidations, and dispatch the resulting patch list
//! through the mirror applier and the worker pool. A failed build marks
//! the engine for reset, so the next build re-mirrors from scratch.

pub mod applier;

use crate::cache::{DiskStore, KvStore};
use crate::deps::Dependencies;
use crate::env::EnvConfig;
use crate::error::{RefractError, RefractResult};
use crate::fingerprint;
use crate::options::FilterOptions;
use crate::processor::{
    DefaultStrategy, PersistentStrategy, ProcessStrategy, Transform, TransformContext,
};
use crate::snapshot::diff::{dedup, diff, PatchEntry, PatchOp};
use crate::snapshot::Snapshot;
use crate::stats::BuildStats;
use crate::worker::{Task, WorkerPool};
use applier::{MirrorApplier, PathMapper};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Folded into the plugin cache key so incompatible cache layouts from
/// older versions read as misses
const CACHE_FORMAT_VERSION: &str = "1";

/// Injected hash over the transform's environment (package sources,
/// config); the persistent-cache namespace changes when it does
pub type EnvHashFn = Arc<dyn Fn(&Path) -> String + Send + Sync>;

/// Incremental per-file transform engine
pub struct Filter<T: Transform> {
    transform: Arc<T>,
    options: FilterOptions,
    env: EnvConfig,
    input_dir: PathBuf,
    mapper: PathMapper,
    applier: Arc<MirrorApplier>,
    strategy: Option<Arc<dyn ProcessStrategy>>,
    backend: Option<Arc<dyn KvStore>>,
    env_hash: Option<EnvHashFn>,
    prev_snapshot: Snapshot,
    dependencies: Option<Arc<Mutex<Dependencies>>>,
    stats: Arc<BuildStats>,
    concurrency: usize,
    needs_reset: bool,
}

impl<T: Transform> std::fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("options", &self.options)
            .field("env", &self.env)
            .field("input_dir", &self.input_dir)
            .field("concurrency", &self.concurrency)
            .field("needs_reset", &self.needs_reset)
            .finish_non_exhaustive()
    }
}

impl<T: Transform> Filter<T> {
    /// Construct an engine over `input_dir`, mirroring into `output_dir`
    pub fn new(
        transform: T,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        options: FilterOptions,
    ) -> RefractResult<Self> {
        if !FilterOptions::is_utf8(&options.input_encoding) {
            return Err(RefractError::UnsupportedEncoding(
                options.input_encoding.clone(),
            ));
        }
        if !FilterOptions::is_utf8(&options.output_encoding) {
            return Err(RefractError::UnsupportedEncoding(
                options.output_encoding.clone(),
            ));
        }
        if options.persist && transform.base_dir().is_none() {
            return Err(RefractError::UnimplementedBaseDir);
        }

        let env = EnvConfig::capture();
        let input_dir = input_dir.into();
        let output_dir = output_dir.into();
        let concurrency = env.resolve_concurrency(options.concurrency);
        let mapper = PathMapper::new(options.extensions.clone(), options.target_extension.clone());
        let dependencies = options
            .dependency_invalidation
            .then(|| Arc::new(Mutex::new(Dependencies::new(&input_dir))));

        Ok(Self {
            transform: Arc::new(transform),
            mapper,
            applier: Arc::new(MirrorApplier::new(&input_dir, output_dir)),
            strategy: None,
            backend: None,
            env_hash: None,
            prev_snapshot: Snapshot::empty(),
            dependencies,
            stats: Arc::new(BuildStats::default()),
            concurrency,
            needs_reset: false,
            input_dir,
            options,
            env,
        })
    }

    /// Inject a persistent-cache backend; must precede the first build
    pub fn with_backend(mut self, backend: Arc<dyn KvStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Inject the plugin environment hash; must precede the first build
    pub fn with_env_hash(mut self, env_hash: EnvHashFn) -> Self {
        self.env_hash = Some(env_hash);
        self
    }

    pub fn stats(&self) -> Arc<BuildStats> {
        self.stats.clone()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        self.applier.output_dir()
    }

    /// Serialize the dependency tracker for host-side persistence
    pub fn serialize_dependencies(&self) -> RefractResult<String> {
        let deps = self.dependencies.as_ref().ok_or_else(|| {
            RefractError::invariant("dependency_invalidation is not enabled")
        })?;
        self.lock_deps(deps)?.serialize()
    }

    /// Restore a dependency tracker serialized by a previous process,
    /// rebased onto this engine's input directory
    pub fn restore_dependencies(&mut self, json: &str) -> RefractResult<()> {
        let deps = self.dependencies.as_ref().ok_or_else(|| {
            RefractError::invariant("dependency_invalidation is not enabled")
        })?;
        let restored = Dependencies::deserialize(json, &self.input_dir)?;
        *self.lock_deps(deps)? = restored;
        Ok(())
    }

    /// Run one incremental build
    pub async fn build(&mut self) -> RefractResult<()> {
        if self.needs_reset {
            self.reset()?;
        }
        self.needs_reset = true;

        if self.strategy.is_none() {
            self.strategy = Some(self.create_strategy()?);
        }

        let next_snapshot = Snapshot::walk(&self.input_dir)?;

        // merge dependency invalidations as synthetic patches
        let mut patches = diff(&self.prev_snapshot, &next_snapshot);
        let mut forced: HashSet<String> = HashSet::new();
        if let Some(deps) = &self.dependencies {
            let invalidated = self.lock_deps(deps)?.get_invalidated_files()?;
            for rel in invalidated {
                if let Some(entry) = self.prev_snapshot.get(&rel) {
                    patches.push(PatchEntry::new(
                        PatchOp::Change,
                        rel.clone(),
                        Some(entry.clone()),
                    ));
                } else if let Some(entry) = next_snapshot.get(&rel) {
                    patches.push(PatchEntry::new(
                        PatchOp::Create,
                        rel.clone(),
                        Some(entry.clone()),
                    ));
                } else {
                    // the dependent itself is gone; the diff removes it
                    continue;
                }
                forced.insert(rel);
            }
        }
        let patches = dedup(patches);
        self.prev_snapshot = next_snapshot;

        // a fresh unsealed tracker for this build: declarations are
        // dropped for unlinked files and for files about to reprocess,
        // which re-declare as they run
        let stale: Vec<String> = patches
            .iter()
            .filter(|p| match p.op {
                PatchOp::Unlink => true,
                PatchOp::Create | PatchOp::Change => self.mapper.can_process(&p.relative_path),
                PatchOp::Mkdir | PatchOp::Rmdir => false,
            })
            .map(|p| p.relative_path.clone())
            .collect();
        if let Some(deps) = &self.dependencies {
            let mut guard = self.lock_deps(deps)?;
            let working = guard.copy_without(&stale);
            *guard = working;
        }

        if patches.is_empty() {
            debug!("{}: no changes, build is a no-op", self.label());
            self.needs_reset = false;
            return Ok(());
        }

        let strategy = match &self.strategy {
            Some(strategy) => strategy.clone(),
            None => return Err(RefractError::invariant("strategy not initialized")),
        };

        let mut tasks: Vec<Task> = Vec::new();
        for patch in &patches {
            let rel = &patch.relative_path;
            match patch.op {
                PatchOp::Mkdir => self.applier.mkdir(rel).await?,
                PatchOp::Rmdir => self.applier.rmdir(rel).await?,
                PatchOp::Unlink => {
                    let dest = self
                        .mapper
                        .dest_file_path(rel)
                        .unwrap_or_else(|| rel.clone());
                    self.applier.unlink(&dest).await?;
                    self.stats.record_file_unlinked();
                }
                PatchOp::Create | PatchOp::Change => {
                    let is_dir = patch
                        .entry
                        .as_ref()
                        .map(|e| e.is_dir())
                        .unwrap_or_else(|| rel.ends_with('/'));
                    if is_dir {
                        self.applier.mkdir(rel).await?;
                    } else if self.mapper.can_process(rel) {
                        tasks.push(self.make_task(
                            rel.clone(),
                            strategy.clone(),
                            patch.op == PatchOp::Change,
                            forced.contains(rel),
                        ));
                    } else {
                        self.applier.mirror(rel).await?;
                        self.stats.record_file_symlinked();
                    }
                }
            }
        }

        let patch_count = patches.len();
        let task_count = tasks.len();
        if self.options.async_eval {
            WorkerPool::new(self.concurrency).run_all(tasks).await?;
        } else {
            for task in tasks {
                task.await?;
            }
        }

        if let Some(deps) = &self.dependencies {
            let mut guard = self.lock_deps(deps)?;
            guard.seal();
            guard.capture_dependency_state()?;
        }

        self.needs_reset = false;
        info!(
            "{}: applied {} patches, {} transformed",
            self.label(),
            patch_count,
            task_count
        );
        Ok(())
    }

    fn make_task(
        &self,
        relative_path: String,
        strategy: Arc<dyn ProcessStrategy>,
        is_change: bool,
        force_invalidate: bool,
    ) -> Task {
        let transform = self.transform.clone();
        let applier = self.applier.clone();
        let mapper = self.mapper.clone();
        let stats = self.stats.clone();
        let dependencies = self.dependencies.clone();
        let input_dir = self.input_dir.clone();
        Box::pin(async move {
            process_file(
                transform,
                strategy,
                applier,
                mapper,
                stats,
                dependencies,
                input_dir,
                relative_path,
                is_change,
                force_invalidate,
            )
            .await
        })
    }

    fn create_strategy(&self) -> RefractResult<Arc<dyn ProcessStrategy>> {
        if !self.options.persist {
            return Ok(Arc::new(DefaultStrategy));
        }
        if !self.env.persistence_allowed() {
            debug!("{}: persistent cache disabled under CI", self.label());
            return Ok(Arc::new(DefaultStrategy));
        }

        let base_dir = self
            .transform
            .base_dir()
            .ok_or(RefractError::UnimplementedBaseDir)?;
        let env_hash = match self.transform.cache_key() {
            Some(key) => key,
            None => match &self.env_hash {
                Some(hash_fn) => hash_fn(&base_dir),
                None => default_env_hash(&base_dir),
            },
        };
        let namespace = fingerprint::compose_key(&[
            self.display_name(),
            env_hash.as_str(),
            CACHE_FORMAT_VERSION,
        ]);
        let store: Arc<dyn KvStore> = match &self.backend {
            Some(store) => store.clone(),
            None => Arc::new(DiskStore::new(self.env.resolve_cache_root())),
        };

        info!(
            "{}: persistent cache enabled, namespace {}",
            self.label(),
            namespace
        );
        Ok(Arc::new(PersistentStrategy::new(namespace, store)))
    }

    /// Clear everything retained from the failed previous build
    fn reset(&mut self) -> RefractResult<()> {
        info!("{}: resetting output after failed build", self.label());
        self.applier.clear_output()?;
        self.prev_snapshot = Snapshot::empty();
        if let Some(deps) = &self.dependencies {
            *self.lock_deps(deps)? = Dependencies::new(&self.input_dir);
        }
        Ok(())
    }

    fn lock_deps<'a>(
        &self,
        deps: &'a Arc<Mutex<Dependencies>>,
    ) -> RefractResult<std::sync::MutexGuard<'a, Dependencies>> {
        deps.lock()
            .map_err(|_| RefractError::invariant("dependency tracker lock poisoned"))
    }

    fn display_name(&self) -> &str {
        self.options.name.as_deref().unwrap_or(self.transform.name())
    }

    fn label(&self) -> String {
        match &self.options.annotation {
            Some(annotation) => format!("{} ({})", self.display_name(), annotation),
            None => self.display_name().to_string(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_file<T: Transform>(
    transform: Arc<T>,
    strategy: Arc<dyn ProcessStrategy>,
    applier: Arc<MirrorApplier>,
    mapper: PathMapper,
    stats: Arc<BuildStats>,
    dependencies: Option<Arc<Mutex<Dependencies>>>,
    input_dir: PathBuf,
    relative_path: String,
    is_change: bool,
    force_invalidate: bool,
) -> RefractResult<()> {
    let src = input_dir.join(&relative_path);
    let contents = tokio::fs::read_to_string(&src)
        .await
        .map_err(|e| RefractError::io(format!("reading {}", src.display()), e))?;

    let ctx = TransformContext::new(relative_path.clone(), dependencies);
    let result = strategy
        .process(transform.as_ref(), &ctx, &contents, force_invalidate, &stats)
        .await
        .map_err(|e| RefractError::transform(relative_path.as_str(), &input_dir, e))?;

    let dest = mapper.dest_file_path(&relative_path).ok_or_else(|| {
        RefractError::invariant(format!(
            "no destination path for processable file {}",
            relative_path
        ))
    })?;
    applier
        .write_processed(&dest, result.output.as_bytes(), is_change)
        .await?;
    stats.record_file_processed();
    Ok(())
}

fn default_env_hash(base_dir: &Path) -> String {
    let base = base_dir.to_string_lossy();
    fingerprint::compose_key(&[base.as_ref(), env!("CARGO_PKG_VERSION")])
}
