//! Directory snapshots
//!
//! A `Snapshot` is an immutable, sorted listing of a tree's entries used
//! for diffing. Entries carry either stat metadata (size, mtime, mode) or
//! a content hash; the hash variant backs local dependency tracking where
//! files are rewritten with identical content many times per build.

pub mod diff;

use crate::error::{RefractError, RefractResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Entry metadata, tagged `stat` or `hash` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Meta {
    Stat { size: u64, mtime: i64, mode: u32 },
    Hash { hash: String },
}

/// A single filesystem item visible in a tree
///
/// `relative_path` is forward-slash separated with no leading slash;
/// directory entries end in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub relative_path: String,
    #[serde(flatten)]
    pub meta: Meta,
}

impl Entry {
    /// A directory entry; appends the trailing `/` if missing
    pub fn dir(relative_path: impl Into<String>, mtime: i64, mode: u32) -> Self {
        let mut path = relative_path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            relative_path: path,
            meta: Meta::Stat {
                size: 0,
                mtime,
                mode,
            },
        }
    }

    /// A file entry with stat metadata
    pub fn file(relative_path: impl Into<String>, size: u64, mtime: i64, mode: u32) -> Self {
        Self {
            relative_path: relative_path.into(),
            meta: Meta::Stat { size, mtime, mode },
        }
    }

    /// A file entry tracked by content hash
    pub fn hashed(relative_path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            meta: Meta::Hash { hash: hash.into() },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.relative_path.ends_with('/')
    }

    /// Whether this entry's state differs from `other` at the same path
    ///
    /// Stat entries compare `(size, mtime, mode)` for files and `mode`
    /// for directories; hash entries compare hashes. A metadata-kind
    /// mismatch always reads as changed.
    pub fn changed_from(&self, other: &Entry) -> bool {
        match (&self.meta, &other.meta) {
            (
                Meta::Stat { size, mtime, mode },
                Meta::Stat {
                    size: o_size,
                    mtime: o_mtime,
                    mode: o_mode,
                },
            ) => {
                if self.is_dir() {
                    mode != o_mode
                } else {
                    size != o_size || mtime != o_mtime || mode != o_mode
                }
            }
            (Meta::Hash { hash }, Meta::Hash { hash: o_hash }) => hash != o_hash,
            _ => true,
        }
    }
}

/// Compare relative paths component-wise
///
/// This is the walk emission order: within a directory, names sort
/// lexicographically, and a directory's contents follow it immediately.
/// Plain string comparison would order `a.txt` before the directory
/// entry `a/` but after its child `a/b`, breaking the merge walk.
pub fn path_cmp(a: &str, b: &str) -> Ordering {
    let a_parts = a.trim_end_matches('/').split('/');
    let b_parts = b.trim_end_matches('/').split('/');
    a_parts.cmp(b_parts)
}

/// An ordered, immutable sequence of entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    entries: Vec<Entry>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from an entry list, sorting into walk order
    pub fn from_entries(mut entries: Vec<Entry>) -> Self {
        entries.sort_by(|a, b| path_cmp(&a.relative_path, &b.relative_path));
        Self { entries }
    }

    /// Walk a directory tree into a snapshot
    ///
    /// Depth-first with per-directory name sorting. Symbolic links are
    /// followed to their target stat but listed at their own path. Any
    /// entry that fails to stat fails the walk.
    pub fn walk(dir: &Path) -> RefractResult<Self> {
        let mut entries = Vec::new();
        walk_into(dir, "", &mut entries)?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up an entry by exact relative path
    pub fn get(&self, relative_path: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| path_cmp(&e.relative_path, relative_path))
            .ok()
            .and_then(|idx| {
                // path_cmp treats "a" and "a/" as equal keys; require an
                // exact match so callers can distinguish file from dir.
                let entry = &self.entries[idx];
                (entry.relative_path == relative_path).then_some(entry)
            })
    }
}

fn walk_into(dir: &Path, prefix: &str, entries: &mut Vec<Entry>) -> RefractResult<()> {
    let mut names: Vec<String> = Vec::new();
    let read = std::fs::read_dir(dir)
        .map_err(|e| RefractError::io(format!("reading directory {}", dir.display()), e))?;
    for item in read {
        let item =
            item.map_err(|e| RefractError::io(format!("reading entry in {}", dir.display()), e))?;
        names.push(item.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in names {
        let full = dir.join(&name);
        // fs::metadata follows symlinks to the target stat
        let meta = std::fs::metadata(&full)
            .map_err(|e| RefractError::io(format!("stat {}", full.display()), e))?;
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        let mtime = mtime_millis(&meta);
        let mode = file_mode(&meta);

        if meta.is_dir() {
            entries.push(Entry::dir(relative.clone(), mtime, mode));
            walk_into(&full, &relative, entries)?;
        } else {
            entries.push(Entry::file(relative, meta.len(), mtime, mode));
        }
    }
    Ok(())
}

/// Modification time in integer milliseconds since the epoch
pub(crate) fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
pub(crate) fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
pub(crate) fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0
}
