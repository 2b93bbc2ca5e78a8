//! Engine options
//!
//! Plain data passed to `Filter::new`. Collaborators (cache backend,
//! environment hash) are injected through the engine builder methods
//! rather than carried here.

/// Options recognized by [`crate::engine::Filter`]
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Display name; defaults to the transform's `name()`
    pub name: Option<String>,

    /// Free-form annotation included in log lines
    pub annotation: Option<String>,

    /// Opt in to the persistent cache (still gated by the CI policy)
    pub persist: bool,

    /// File extensions the transform handles; `None` processes every file
    pub extensions: Option<Vec<String>>,

    /// Replacement extension for destination paths
    pub target_extension: Option<String>,

    /// Input file encoding; only utf-8 is supported
    pub input_encoding: String,

    /// Output file encoding; only utf-8 is supported
    pub output_encoding: String,

    /// Drive transforms through the bounded worker pool
    pub async_eval: bool,

    /// Enable the cross-file dependency tracker
    pub dependency_invalidation: bool,

    /// Worker pool concurrency; falls back to `JOBS`, then cpu count - 1
    pub concurrency: Option<usize>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            name: None,
            annotation: None,
            persist: false,
            extensions: None,
            target_extension: None,
            input_encoding: "utf8".to_string(),
            output_encoding: "utf8".to_string(),
            async_eval: false,
            dependency_invalidation: false,
            concurrency: None,
        }
    }
}

impl FilterOptions {
    /// Whether an encoding string names the supported utf-8 encoding
    pub(crate) fn is_utf8(encoding: &str) -> bool {
        encoding.eq_ignore_ascii_case("utf8") || encoding.eq_ignore_ascii_case("utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = FilterOptions::default();
        assert!(!opts.persist);
        assert!(!opts.async_eval);
        assert!(opts.extensions.is_none());
        assert_eq!(opts.input_encoding, "utf8");
    }

    #[test]
    fn utf8_spellings() {
        assert!(FilterOptions::is_utf8("utf8"));
        assert!(FilterOptions::is_utf8("UTF-8"));
        assert!(!FilterOptions::is_utf8("latin1"));
    }
}
