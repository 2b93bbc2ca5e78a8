//! Error types for Refract
//!
//! All modules use `RefractResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Refract operations
pub type RefractResult<T> = Result<T, RefractError>;

/// All errors that can occur while building
#[derive(Error, Debug)]
pub enum RefractError {
    // Construction errors
    #[error("persist=true requires the transform to implement base_dir()")]
    UnimplementedBaseDir,

    #[error("unsupported encoding: {0} (only utf-8 is supported)")]
    UnsupportedEncoding(String),

    // Build errors
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("cannot declare dependencies for {file}: instance is sealed")]
    Sealed { file: String },

    #[error("transform failed for {file} in {tree_dir}")]
    Transform {
        file: String,
        tree_dir: PathBuf,
        #[source]
        source: Box<RefractError>,
    },

    #[error("worker task panicked: {0}")]
    TaskPanic(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Transform-defined failures
    #[error("{0}")]
    User(String),
}

impl RefractError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invariant violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Annotate a transform failure with the file and input tree it came from
    pub fn transform(
        file: impl Into<String>,
        tree_dir: impl Into<PathBuf>,
        source: RefractError,
    ) -> Self {
        Self::Transform {
            file: file.into(),
            tree_dir: tree_dir.into(),
            source: Box::new(source),
        }
    }
}
