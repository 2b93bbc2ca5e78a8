//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use refract::{Output, ProcessResult, RefractError, RefractResult, Transform, TransformContext};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initialize test logging once; `RUST_LOG=refract=debug` shows builds
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Write a file under `dir`, creating parent directories
pub fn write_file(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Read a file under `dir` as a string
pub fn read_file(dir: &Path, rel: &str) -> String {
    std::fs::read_to_string(dir.join(rel)).unwrap()
}

/// Every file path (forward-slash relative) present under `dir`
pub fn list_files(dir: &Path) -> Vec<String> {
    fn visit(dir: &Path, prefix: &str, out: &mut Vec<String>) {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        for name in names {
            let full = dir.join(&name);
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if full.is_dir() {
                visit(&full, &rel, out);
            } else {
                out.push(rel);
            }
        }
    }
    let mut out = Vec::new();
    if dir.exists() {
        visit(dir, "", &mut out);
    }
    out
}

pub fn rot13(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a' + 13) % 26) + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A' + 13) % 26) + b'A') as char,
            other => other,
        })
        .collect()
}

/// ROT-13 transform used by the end-to-end scenarios
#[derive(Default)]
pub struct Rot13;

#[async_trait]
impl Transform for Rot13 {
    fn name(&self) -> &str {
        "rot13"
    }

    async fn process_string(
        &self,
        _ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        Ok(rot13(contents).into())
    }
}

/// Passthrough that fails its first `fail_first` invocations
pub struct Flaky {
    calls: AtomicUsize,
    fail_first: usize,
}

impl Flaky {
    pub fn new(fail_first: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
        }
    }
}

#[async_trait]
impl Transform for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn process_string(
        &self,
        _ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(RefractError::User(format!("induced failure {}", call)));
        }
        Ok(contents.into())
    }
}

/// Fails for files whose trailing digit is even (`index0.js`, `index2.js`)
pub struct Alternating;

#[async_trait]
impl Transform for Alternating {
    fn name(&self) -> &str {
        "alternating"
    }

    async fn process_string(
        &self,
        ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        let digit = ctx
            .relative_path()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .next_back()
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0);
        if digit % 2 == 0 {
            return Err(RefractError::User(format!(
                "induced failure for {}",
                ctx.relative_path()
            )));
        }
        Ok(contents.into())
    }
}

/// Passthrough that sleeps to make throttling observable
pub struct Slow {
    pub delay_ms: u64,
}

#[async_trait]
impl Transform for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn process_string(
        &self,
        _ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(contents.into())
    }
}

/// Declares a dependency for every `include <path>` directive line
#[derive(Default)]
pub struct Inliner;

#[async_trait]
impl Transform for Inliner {
    fn name(&self) -> &str {
        "inliner"
    }

    async fn process_string(
        &self,
        ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        let deps: Vec<&str> = contents
            .lines()
            .filter_map(|line| line.strip_prefix("include "))
            .map(str::trim)
            .collect();
        if !deps.is_empty() {
            ctx.set_dependencies(&deps)?;
        }
        Ok(contents.into())
    }
}

/// Persisting passthrough whose `post_process` stamps every result
pub struct Stamping {
    base_dir: PathBuf,
}

impl Stamping {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl Transform for Stamping {
    fn name(&self) -> &str {
        "stamping"
    }

    async fn process_string(
        &self,
        _ctx: &TransformContext,
        contents: &str,
    ) -> RefractResult<Output> {
        Ok(contents.into())
    }

    async fn post_process(
        &self,
        mut result: ProcessResult,
        _relative_path: &str,
    ) -> RefractResult<ProcessResult> {
        result.output = format!("{}<stamped>", result.output);
        Ok(result)
    }

    fn base_dir(&self) -> Option<PathBuf> {
        Some(self.base_dir.clone())
    }
}
