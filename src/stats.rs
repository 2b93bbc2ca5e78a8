//! Build instrumentation
//!
//! Counters are cumulative for the lifetime of the engine instance and
//! shared with worker tasks through an `Arc`. Hosts and tests observe
//! transform activity here instead of patching counters into transforms.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Instrumentation sink incremented by the processor and applier
#[derive(Debug, Default)]
pub struct BuildStats {
    process_string_calls: AtomicUsize,
    post_process_calls: AtomicUsize,
    persistent_cache_hit: AtomicUsize,
    persistent_cache_prime: AtomicUsize,
    files_processed: AtomicUsize,
    files_symlinked: AtomicUsize,
    files_unlinked: AtomicUsize,
}

impl BuildStats {
    pub fn record_process_string(&self) {
        self.process_string_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post_process(&self) {
        self.post_process_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.persistent_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_prime(&self) {
        self.persistent_cache_prime.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_symlinked(&self) {
        self.files_symlinked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_unlinked(&self) {
        self.files_unlinked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn process_string_calls(&self) -> usize {
        self.process_string_calls.load(Ordering::Relaxed)
    }

    pub fn post_process_calls(&self) -> usize {
        self.post_process_calls.load(Ordering::Relaxed)
    }

    pub fn persistent_cache_hit(&self) -> usize {
        self.persistent_cache_hit.load(Ordering::Relaxed)
    }

    pub fn persistent_cache_prime(&self) -> usize {
        self.persistent_cache_prime.load(Ordering::Relaxed)
    }

    pub fn files_processed(&self) -> usize {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn files_symlinked(&self) -> usize {
        self.files_symlinked.load(Ordering::Relaxed)
    }

    pub fn files_unlinked(&self) -> usize {
        self.files_unlinked.load(Ordering::Relaxed)
    }
}
