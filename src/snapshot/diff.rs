//! Snapshot diffing
//!
//! Turns two snapshots into an ordered patch that reconstructs the next
//! tree from the previous one: removals deepest-first (children before
//! their directory), then additions and changes in walk order (a
//! directory before its children).

use super::{path_cmp, Entry, Snapshot};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// A single patch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Mkdir,
    Rmdir,
    Unlink,
    Create,
    Change,
}

/// `(op, relative_path, destination entry)` triple
///
/// The entry is the destination state for `Create`/`Change`/`Mkdir` and
/// absent for `Unlink`/`Rmdir`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEntry {
    pub op: PatchOp,
    pub relative_path: String,
    pub entry: Option<Entry>,
}

impl PatchEntry {
    pub fn new(op: PatchOp, relative_path: impl Into<String>, entry: Option<Entry>) -> Self {
        Self {
            op,
            relative_path: relative_path.into(),
            entry,
        }
    }
}

/// An ordered sequence of patch operations
pub type Patch = Vec<PatchEntry>;

/// Diff two snapshots into a patch
pub fn diff(prev: &Snapshot, next: &Snapshot) -> Patch {
    let prev_entries = prev.entries();
    let next_entries = next.entries();
    let mut removals: Patch = Vec::new();
    let mut additions: Patch = Vec::new();

    let mut i = 0;
    let mut j = 0;
    while i < prev_entries.len() && j < next_entries.len() {
        let p = &prev_entries[i];
        let n = &next_entries[j];
        match path_cmp(&p.relative_path, &n.relative_path) {
            Ordering::Less => {
                removals.push(removal_of(p));
                i += 1;
            }
            Ordering::Greater => {
                additions.push(addition_of(n));
                j += 1;
            }
            Ordering::Equal => {
                if p.is_dir() != n.is_dir() {
                    // a path flipped between file and directory
                    removals.push(removal_of(p));
                    additions.push(addition_of(n));
                } else if p.changed_from(n) {
                    additions.push(PatchEntry::new(
                        PatchOp::Change,
                        n.relative_path.clone(),
                        Some(n.clone()),
                    ));
                }
                i += 1;
                j += 1;
            }
        }
    }
    for p in &prev_entries[i..] {
        removals.push(removal_of(p));
    }
    for n in &next_entries[j..] {
        additions.push(addition_of(n));
    }

    // children precede their directory on removal
    removals.reverse();
    removals.extend(additions);
    removals
}

/// Drop duplicate `(op, path)` pairs, keeping the first occurrence
pub fn dedup(patch: Patch) -> Patch {
    let mut seen: HashSet<(PatchOp, String)> = HashSet::new();
    patch
        .into_iter()
        .filter(|p| seen.insert((p.op, p.relative_path.clone())))
        .collect()
}

fn removal_of(entry: &Entry) -> PatchEntry {
    let op = if entry.is_dir() {
        PatchOp::Rmdir
    } else {
        PatchOp::Unlink
    };
    PatchEntry::new(op, entry.relative_path.clone(), None)
}

fn addition_of(entry: &Entry) -> PatchEntry {
    let op = if entry.is_dir() {
        PatchOp::Mkdir
    } else {
        PatchOp::Create
    };
    PatchEntry::new(op, entry.relative_path.clone(), Some(entry.clone()))
}
