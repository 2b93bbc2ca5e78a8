//! End-to-end build scenarios

mod common;

use common::*;
use refract::{Filter, FilterOptions, RefractError};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn rot13_options() -> FilterOptions {
    FilterOptions {
        extensions: Some(vec!["js".to_string(), "md".to_string()]),
        target_extension: Some("foo".to_string()),
        ..Default::default()
    }
}

fn rot13_fixture() -> (TempDir, TempDir) {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_file(input.path(), "a/README.md", "Nicest cats in need of homes");
    write_file(input.path(), "a/foo.js", "Nicest dogs in need of homes");
    write_file(input.path(), "a/bar/bar.js", "Dogs... who needs dogs?");
    (input, output)
}

#[tokio::test]
async fn rot13_over_three_files() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();

    assert_eq!(
        read_file(output.path(), "a/README.foo"),
        "Avprfg pngf va arrq bs ubzrf"
    );
    assert_eq!(
        read_file(output.path(), "a/foo.foo"),
        "Avprfg qbtf va arrq bs ubzrf"
    );
    assert_eq!(
        read_file(output.path(), "a/bar/bar.foo"),
        "Qbtf... jub arrqf qbtf?"
    );
    assert_eq!(filter.stats().process_string_calls(), 3);
}

#[tokio::test]
async fn noop_rebuild_processes_nothing() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();
    let before = list_files(output.path());

    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 3);
    assert_eq!(list_files(output.path()), before);
}

#[tokio::test]
async fn single_file_change_reprocesses_only_it() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();

    // let the mtime tick past the recorded snapshot
    tokio::time::sleep(Duration::from_millis(30)).await;
    write_file(input.path(), "a/README.md", "OMG");
    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 4);
    assert_eq!(read_file(output.path(), "a/README.foo"), "BZT");
    assert_eq!(
        read_file(output.path(), "a/foo.foo"),
        "Avprfg qbtf va arrq bs ubzrf"
    );
}

#[tokio::test]
async fn unlink_removes_transformed_output() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();
    assert!(output.path().join("a/README.foo").exists());

    std::fs::remove_file(input.path().join("a/README.md")).unwrap();
    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 3);
    assert!(!output.path().join("a/README.foo").exists());
    assert!(output.path().join("a/foo.foo").exists());
}

#[tokio::test]
async fn rename_propagates_to_output() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();

    std::fs::rename(
        input.path().join("a/README.md"),
        input.path().join("a/README-r.md"),
    )
    .unwrap();
    filter.build().await.unwrap();

    assert!(!output.path().join("a/README.foo").exists());
    assert_eq!(
        read_file(output.path(), "a/README-r.foo"),
        "Avprfg pngf va arrq bs ubzrf"
    );
}

#[tokio::test]
async fn extension_gating_skips_unmatched_files() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_file(input.path(), "code.js", "let x");
    write_file(input.path(), "notes.md", "jotting");

    let options = FilterOptions {
        extensions: Some(vec!["js".to_string()]),
        ..Default::default()
    };
    let mut filter = Filter::new(Rot13, input.path(), output.path(), options).unwrap();

    filter.build().await.unwrap();
    assert_eq!(filter.stats().process_string_calls(), 1);
    assert_eq!(read_file(output.path(), "notes.md"), "jotting");

    tokio::time::sleep(Duration::from_millis(30)).await;
    write_file(input.path(), "notes.md", "more jotting");
    filter.build().await.unwrap();

    // the unmatched file was mirrored again, never processed
    assert_eq!(filter.stats().process_string_calls(), 1);
    assert_eq!(read_file(output.path(), "notes.md"), "more jotting");
}

#[tokio::test]
async fn identical_output_preserves_mtime() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_file(input.path(), "stable.js", "same content");

    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), FilterOptions::default()).unwrap();
    filter.build().await.unwrap();

    let dest = output.path().join("stable.js");
    let before = std::fs::metadata(&dest).unwrap();

    // rewrite the input with identical content after the mtime ticks;
    // the transform output matches what is on disk, so the write is
    // skipped and the output stat survives
    tokio::time::sleep(Duration::from_millis(30)).await;
    write_file(input.path(), "stable.js", "same content");
    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 2);
    let after = std::fs::metadata(&dest).unwrap();
    assert_eq!(before.modified().unwrap(), after.modified().unwrap());
    assert_eq!(before.len(), after.len());
}

#[tokio::test]
async fn midbuild_failure_then_recovery() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_file(input.path(), "index.js", "console.log(\"hi\")");

    let mut filter = Filter::new(
        Flaky::new(1),
        input.path(),
        output.path(),
        FilterOptions::default(),
    )
    .unwrap();

    let err = filter.build().await.unwrap_err();
    assert!(matches!(err, RefractError::Transform { .. }));
    assert!(list_files(output.path()).is_empty());

    filter.build().await.unwrap();
    assert_eq!(list_files(output.path()), vec!["index.js".to_string()]);
    assert_eq!(read_file(output.path(), "index.js"), "console.log(\"hi\")");
}

#[tokio::test]
async fn async_partial_failure_keeps_successes() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for i in 0..4 {
        write_file(
            input.path(),
            &format!("index{}.js", i),
            &format!("file {}", i),
        );
    }

    let options = FilterOptions {
        async_eval: true,
        concurrency: Some(4),
        ..Default::default()
    };
    let mut filter = Filter::new(Alternating, input.path(), output.path(), options).unwrap();

    assert!(filter.build().await.is_err());
    assert_eq!(
        list_files(output.path()),
        vec!["index1.js".to_string(), "index3.js".to_string()]
    );
}

async fn timed_build(concurrency: usize) -> Duration {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for i in 0..4 {
        write_file(input.path(), &format!("f{}.js", i), "body");
    }

    let options = FilterOptions {
        async_eval: true,
        concurrency: Some(concurrency),
        ..Default::default()
    };
    let mut filter =
        Filter::new(Slow { delay_ms: 100 }, input.path(), output.path(), options).unwrap();

    let started = Instant::now();
    filter.build().await.unwrap();
    started.elapsed()
}

#[tokio::test]
async fn throttling_bounds_wall_clock() {
    assert!(timed_build(1).await >= Duration::from_millis(400));
    assert!(timed_build(2).await >= Duration::from_millis(200));

    let wide = timed_build(4).await;
    assert!(wide >= Duration::from_millis(100));
    assert!(wide < Duration::from_millis(200));
}

#[tokio::test]
async fn new_file_is_picked_up_incrementally() {
    let (input, output) = rot13_fixture();
    let mut filter =
        Filter::new(Rot13, input.path(), output.path(), rot13_options()).unwrap();

    filter.build().await.unwrap();

    write_file(input.path(), "a/new.js", "Abba");
    filter.build().await.unwrap();

    assert_eq!(filter.stats().process_string_calls(), 4);
    assert_eq!(read_file(output.path(), "a/new.foo"), "Noon");
}
