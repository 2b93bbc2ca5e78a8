//! Refract - Incremental Per-File Transform Engine
//!
//! One node in a build pipeline: applies a user-supplied per-file
//! transform over an input tree and writes a mirror output tree. Between
//! builds it diffs filesystem snapshots and consults declared cross-file
//! dependencies to reprocess only what changed, optionally skipping work
//! entirely through a persistent, content-fingerprinted transform cache.

pub mod cache;
pub mod deps;
pub mod engine;
pub mod env;
pub mod error;
pub mod fingerprint;
pub mod options;
pub mod processor;
pub mod snapshot;
pub mod stats;
pub mod worker;

pub use engine::Filter;
pub use error::{RefractError, RefractResult};
pub use options::FilterOptions;
pub use processor::{Output, ProcessResult, Transform, TransformContext};
