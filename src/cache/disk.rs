//! Disk-backed compressed key/value store
//!
//! One gzip-compressed file per key under `root/namespace/`. Writes go
//! through a temp file and a rename, which keeps concurrent engine
//! instances sharing a namespace atomic per key.

use super::KvStore;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-per-key gzip store rooted at a cache directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.gz", key))
    }

    fn read_entry(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let file = std::fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn write_entry(&self, path: &Path, value: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(value)?;
        let compressed = encoder.finish()?;

        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, &compressed)?;
        std::fs::rename(&tmp, path)
    }
}

impl KvStore for DiskStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(namespace, key);
        if !path.exists() {
            return None;
        }
        match self.read_entry(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Corrupted cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) {
        let path = self.entry_path(namespace, key);
        match self.write_entry(&path, value) {
            Ok(()) => debug!("Primed cache entry {}", path.display()),
            Err(e) => warn!("Failed to write cache entry {}: {}", path.display(), e),
        }
    }
}
