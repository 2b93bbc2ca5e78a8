//! Output tree application
//!
//! Turns patch operations into writes on the mirror tree: directories
//! are created and removed in patch order, transformed files are
//! written (skipping byte-identical rewrites to preserve mtimes), and
//! unprocessed files are symlinked back to the input. Paths currently
//! materialized as symlinks are tracked so a later transformed write
//! replaces the link instead of writing through it.

use crate::error::{RefractError, RefractResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

/// Destination-path mapping from the `extensions` / `target_extension`
/// options
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    extensions: Option<Vec<String>>,
    target_extension: Option<String>,
}

impl PathMapper {
    pub fn new(extensions: Option<Vec<String>>, target_extension: Option<String>) -> Self {
        Self {
            extensions,
            target_extension,
        }
    }

    /// Where a processed file lands in the output tree
    ///
    /// Directories map to `None`. With no extension list every file maps
    /// to itself. With one, a matching extension maps to itself or to
    /// the target extension; anything else maps to `None` (the file is
    /// mirrored, not processed).
    pub fn dest_file_path(&self, relative_path: &str) -> Option<String> {
        if relative_path.ends_with('/') {
            return None;
        }
        let extensions = match &self.extensions {
            Some(extensions) => extensions,
            None => return Some(relative_path.to_string()),
        };
        for ext in extensions {
            let suffix = format!(".{}", ext);
            if relative_path.ends_with(&suffix) {
                return match &self.target_extension {
                    Some(target) => Some(format!(
                        "{}.{}",
                        &relative_path[..relative_path.len() - suffix.len()],
                        target
                    )),
                    None => Some(relative_path.to_string()),
                };
            }
        }
        None
    }

    pub fn can_process(&self, relative_path: &str) -> bool {
        self.dest_file_path(relative_path).is_some()
    }
}

/// Applies patch operations to the output tree
#[derive(Debug)]
pub struct MirrorApplier {
    input_dir: PathBuf,
    output_dir: PathBuf,
    output_links: Mutex<HashSet<String>>,
}

impl MirrorApplier {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            output_links: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn out_path(&self, relative_path: &str) -> PathBuf {
        self.output_dir.join(relative_path.trim_end_matches('/'))
    }

    fn is_link(&self, relative_path: &str) -> bool {
        self.output_links
            .lock()
            .map(|links| links.contains(relative_path))
            .unwrap_or(false)
    }

    fn track_link(&self, relative_path: &str, present: bool) {
        if let Ok(mut links) = self.output_links.lock() {
            if present {
                links.insert(relative_path.to_string());
            } else {
                links.remove(relative_path);
            }
        }
    }

    pub async fn mkdir(&self, relative_path: &str) -> RefractResult<()> {
        let path = self.out_path(relative_path);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| RefractError::io(format!("mkdir {}", path.display()), e))
    }

    pub async fn rmdir(&self, relative_path: &str) -> RefractResult<()> {
        let path = self.out_path(relative_path);
        match fs::remove_dir(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RefractError::io(format!("rmdir {}", path.display()), e)),
        }
    }

    pub async fn unlink(&self, relative_path: &str) -> RefractResult<()> {
        let path = self.out_path(relative_path);
        self.track_link(relative_path, false);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RefractError::io(format!("unlink {}", path.display()), e)),
        }
    }

    /// Mirror an unprocessed input file into the output
    ///
    /// Symlinks on unix, copies elsewhere. Any existing output at the
    /// path is removed first.
    pub async fn mirror(&self, relative_path: &str) -> RefractResult<()> {
        let source = self.input_dir.join(relative_path);
        let dest = self.out_path(relative_path);

        match fs::remove_file(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RefractError::io(
                    format!("replacing output {}", dest.display()),
                    e,
                ))
            }
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RefractError::io(format!("mkdir {}", parent.display()), e))?;
        }

        link_or_copy(&source, &dest).await?;
        self.track_link(relative_path, true);
        debug!("Mirrored {}", relative_path);
        Ok(())
    }

    /// Write a transformed result to the output tree
    ///
    /// Replaces a tracked symlink at the destination first. On a change
    /// the existing output is read and a byte-identical write is skipped
    /// so `(mode, size, mtime)` survive. Returns whether bytes were
    /// written.
    pub async fn write_processed(
        &self,
        relative_path: &str,
        bytes: &[u8],
        is_change: bool,
    ) -> RefractResult<bool> {
        let dest = self.out_path(relative_path);

        if self.is_link(relative_path) {
            self.unlink(relative_path).await?;
        } else if is_change {
            if let Ok(existing) = fs::read(&dest).await {
                if existing == bytes {
                    debug!("Unchanged output for {}, preserving mtime", relative_path);
                    return Ok(false);
                }
            }
        }

        match fs::write(&dest, bytes).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // the parent directory may not exist yet; create and retry once
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|e| RefractError::io(format!("mkdir {}", parent.display()), e))?;
                }
                fs::write(&dest, bytes)
                    .await
                    .map_err(|e| RefractError::io(format!("writing {}", dest.display()), e))?;
                Ok(true)
            }
            Err(e) => Err(RefractError::io(format!("writing {}", dest.display()), e)),
        }
    }

    /// Remove everything under the output directory
    pub fn clear_output(&self) -> RefractResult<()> {
        if let Ok(mut links) = self.output_links.lock() {
            links.clear();
        }
        if !self.output_dir.exists() {
            return std::fs::create_dir_all(&self.output_dir).map_err(|e| {
                RefractError::io(format!("creating {}", self.output_dir.display()), e)
            });
        }
        let entries = std::fs::read_dir(&self.output_dir)
            .map_err(|e| RefractError::io(format!("reading {}", self.output_dir.display()), e))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| RefractError::io("reading output entry".to_string(), e))?;
            let path = entry.path();
            let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| RefractError::io(format!("removing {}", path.display()), e))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn link_or_copy(source: &Path, dest: &Path) -> RefractResult<()> {
    fs::symlink(source, dest)
        .await
        .map_err(|e| RefractError::io(format!("symlinking {}", dest.display()), e))
}

#[cfg(not(unix))]
async fn link_or_copy(source: &Path, dest: &Path) -> RefractResult<()> {
    fs::copy(source, dest)
        .await
        .map(|_| ())
        .map_err(|e| RefractError::io(format!("copying to {}", dest.display()), e))
}
