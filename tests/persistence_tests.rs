//! Persistent-cache scenarios across engine instances

mod common;

use common::*;
use refract::cache::DiskStore;
use refract::{Filter, FilterOptions};
use std::sync::Arc;
use tempfile::TempDir;

fn persist_options() -> FilterOptions {
    init_logging();
    // keep these tests meaningful on CI runners
    std::env::set_var("FORCE_PERSISTENCE_IN_CI", "1");
    FilterOptions {
        persist: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn second_process_hits_the_warm_cache() {
    let input = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_file(input.path(), "a.js", "alpha");
    write_file(input.path(), "b.js", "beta");
    let store = Arc::new(DiskStore::new(cache.path()));

    let warm_output = TempDir::new().unwrap();
    let mut warm = Filter::new(
        Stamping::new(input.path()),
        input.path(),
        warm_output.path(),
        persist_options(),
    )
    .unwrap()
    .with_backend(store.clone());
    warm.build().await.unwrap();
    assert_eq!(warm.stats().process_string_calls(), 2);
    assert_eq!(warm.stats().persistent_cache_prime(), 2);

    // a fresh engine simulates a cold process over the same inputs
    let cold_output = TempDir::new().unwrap();
    let mut cold = Filter::new(
        Stamping::new(input.path()),
        input.path(),
        cold_output.path(),
        persist_options(),
    )
    .unwrap()
    .with_backend(store);
    cold.build().await.unwrap();

    assert_eq!(cold.stats().process_string_calls(), 0);
    assert_eq!(cold.stats().persistent_cache_hit(), 2);
    // post_process still ran for every file
    assert_eq!(cold.stats().post_process_calls(), 2);
    assert_eq!(read_file(cold_output.path(), "a.js"), "alpha<stamped>");
}

#[tokio::test]
async fn post_process_rewrite_applies_on_every_build() {
    let input = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_file(input.path(), "x.js", "payload");
    let store = Arc::new(DiskStore::new(cache.path()));

    for round in 0..2 {
        let output = TempDir::new().unwrap();
        let mut filter = Filter::new(
            Stamping::new(input.path()),
            input.path(),
            output.path(),
            persist_options(),
        )
        .unwrap()
        .with_backend(store.clone());
        filter.build().await.unwrap();

        // the stamp appears exactly once, cached or not: the cache holds
        // the pre-post_process value
        assert_eq!(read_file(output.path(), "x.js"), "payload<stamped>");
        if round == 1 {
            assert_eq!(filter.stats().process_string_calls(), 0);
        }
    }
}

#[tokio::test]
async fn changed_content_misses_the_cache() {
    let input = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_file(input.path(), "x.js", "first");
    let store = Arc::new(DiskStore::new(cache.path()));

    {
        let output = TempDir::new().unwrap();
        let mut filter = Filter::new(
            Stamping::new(input.path()),
            input.path(),
            output.path(),
            persist_options(),
        )
        .unwrap()
        .with_backend(store.clone());
        filter.build().await.unwrap();
        assert_eq!(filter.stats().process_string_calls(), 1);
    }

    write_file(input.path(), "x.js", "second");
    let output = TempDir::new().unwrap();
    let mut filter = Filter::new(
        Stamping::new(input.path()),
        input.path(),
        output.path(),
        persist_options(),
    )
    .unwrap()
    .with_backend(store);
    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 1);
    assert_eq!(read_file(output.path(), "x.js"), "second<stamped>");
}

#[tokio::test]
async fn cache_key_override_separates_namespaces() {
    struct Versioned {
        base_dir: std::path::PathBuf,
        version: &'static str,
    }

    #[async_trait::async_trait]
    impl refract::Transform for Versioned {
        fn name(&self) -> &str {
            "versioned"
        }

        async fn process_string(
            &self,
            _ctx: &refract::TransformContext,
            contents: &str,
        ) -> refract::RefractResult<refract::Output> {
            Ok(format!("{}:{}", self.version, contents).into())
        }

        fn cache_key(&self) -> Option<String> {
            Some(self.version.to_string())
        }

        fn base_dir(&self) -> Option<std::path::PathBuf> {
            Some(self.base_dir.clone())
        }
    }

    let input = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_file(input.path(), "x.js", "data");
    let store = Arc::new(DiskStore::new(cache.path()));

    // same inputs, different cache_key: the second version must not see
    // the first version's entries
    for version in ["v1", "v2"] {
        let output = TempDir::new().unwrap();
        let mut filter = Filter::new(
            Versioned {
                base_dir: input.path().to_path_buf(),
                version,
            },
            input.path(),
            output.path(),
            persist_options(),
        )
        .unwrap()
        .with_backend(store.clone());
        filter.build().await.unwrap();

        assert_eq!(filter.stats().process_string_calls(), 1);
        assert_eq!(
            read_file(output.path(), "x.js"),
            format!("{}:data", version)
        );
    }
}
