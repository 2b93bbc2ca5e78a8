//! Process environment capture
//!
//! Environment variables are read once at engine construction and the
//! resolved values are carried for the lifetime of the instance.

use std::path::PathBuf;

/// Resolved environment configuration
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Worker concurrency from `JOBS`
    pub jobs: Option<usize>,

    /// Whether the process runs under CI (`CI` truthy)
    pub ci: bool,

    /// `FORCE_PERSISTENCE_IN_CI` overrides the CI gate
    pub force_persistence_in_ci: bool,

    /// `PERSISTENT_FILTER_CACHE_ROOT` overrides the cache root
    pub cache_root: Option<PathBuf>,
}

impl EnvConfig {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            jobs: std::env::var("JOBS")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0),
            ci: is_truthy(std::env::var("CI").ok()),
            force_persistence_in_ci: is_truthy(std::env::var("FORCE_PERSISTENCE_IN_CI").ok()),
            cache_root: std::env::var("PERSISTENT_FILTER_CACHE_ROOT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Whether persistence may be enabled for an opted-in caller
    pub fn persistence_allowed(&self) -> bool {
        !self.ci || self.force_persistence_in_ci
    }

    /// Resolve worker concurrency: explicit option, else `JOBS`, else
    /// one less than the machine parallelism (at least 1)
    pub fn resolve_concurrency(&self, explicit: Option<usize>) -> usize {
        explicit
            .filter(|&n| n > 0)
            .or(self.jobs)
            .unwrap_or_else(default_concurrency)
    }

    /// The persistent cache root: env override, else a per-user temp dir
    pub fn resolve_cache_root(&self) -> PathBuf {
        self.cache_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("refract-cache"))
    }
}

fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).max(1)
}

fn is_truthy(value: Option<String>) -> bool {
    match value {
        Some(v) => !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"),
        None => false,
    }
}
