//! Cross-file dependency tracking
//!
//! A transform may declare "file A depends on files B, C" while it runs.
//! After a build the instance is sealed and a baseline of every declared
//! dependency is captured: content hashes for paths inside the input
//! tree, stat triples for paths outside it. Inside-tree paths are often
//! rewritten with identical content between builds, so hashing avoids
//! false invalidation; outside paths are cheap to stat and rarely change.
//! On the next build the baseline is diffed against current state and
//! every dependent of a changed path is reported for reprocessing.

use crate::error::{RefractError, RefractResult};
use crate::fingerprint;
use crate::snapshot::diff::{diff, PatchOp};
use crate::snapshot::{Entry, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// The two filesystem roots a dependency can live under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FsRoot {
    /// Inside the plugin's input tree; tracked by content hash
    Local,
    /// Anywhere else; tracked by stat and keyed by absolute path
    External,
}

/// Per-file declared dependencies with captured baseline state
#[derive(Debug, Clone)]
pub struct Dependencies {
    root_dir: PathBuf,
    dependency_map: BTreeMap<String, Vec<PathBuf>>,
    dependents_map: HashMap<PathBuf, Vec<String>>,
    all_deps: BTreeMap<FsRoot, BTreeSet<String>>,
    fs_trees: HashMap<FsRoot, Snapshot>,
    sealed: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Serialized {
    root_dir: String,
    dependencies: BTreeMap<String, Vec<String>>,
    fs_trees: Vec<SerializedTree>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedTree {
    fs_root: String,
    entries: Vec<Entry>,
}

impl Dependencies {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            dependency_map: BTreeMap::new(),
            dependents_map: HashMap::new(),
            all_deps: BTreeMap::new(),
            fs_trees: HashMap::new(),
            sealed: false,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Declare the dependencies of `relative_path`
    ///
    /// Absolute paths are kept as-is. Relative paths resolve against the
    /// directory of the declaring file inside the root. Fails once the
    /// instance is sealed.
    pub fn set_dependencies<P: AsRef<Path>>(
        &mut self,
        relative_path: &str,
        deps: &[P],
    ) -> RefractResult<()> {
        if self.sealed {
            return Err(RefractError::Sealed {
                file: relative_path.to_string(),
            });
        }

        let file_dir = match relative_path.rsplit_once('/') {
            Some((dir, _)) => self.root_dir.join(dir),
            None => self.root_dir.clone(),
        };

        let resolved: Vec<PathBuf> = deps
            .iter()
            .map(|dep| {
                let dep = dep.as_ref();
                if dep.is_absolute() {
                    normalize(dep)
                } else {
                    normalize(&file_dir.join(dep))
                }
            })
            .collect();

        debug!(
            "{} declares {} dependencies",
            relative_path,
            resolved.len()
        );
        self.dependency_map
            .insert(relative_path.to_string(), resolved);
        Ok(())
    }

    /// Dependencies declared for one file, if any
    pub fn dependencies_of(&self, relative_path: &str) -> Option<&[PathBuf]> {
        self.dependency_map.get(relative_path).map(|v| v.as_slice())
    }

    /// All declared dependency paths, grouped by root and deduplicated
    pub fn all_deps_by_fs_root(&self) -> &BTreeMap<FsRoot, BTreeSet<String>> {
        &self.all_deps
    }

    /// Build the reverse index and dependency sets; idempotent
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }

        let mut dependents: HashMap<PathBuf, Vec<String>> = HashMap::new();
        let mut all_deps: BTreeMap<FsRoot, BTreeSet<String>> = BTreeMap::new();
        for (file, deps) in &self.dependency_map {
            for dep in deps {
                let entry = dependents.entry(dep.clone()).or_default();
                if !entry.contains(file) {
                    entry.push(file.clone());
                }
                let (root, key) = self.classify(dep);
                all_deps.entry(root).or_default().insert(key);
            }
        }

        self.dependents_map = dependents;
        self.all_deps = all_deps;
        self.sealed = true;
    }

    /// Capture the current state of every declared dependency as the
    /// baseline for the next invalidation query
    pub fn capture_dependency_state(&mut self) -> RefractResult<()> {
        for root in [FsRoot::Local, FsRoot::External] {
            let tree = self.compute_tree(root)?;
            self.fs_trees.insert(root, tree);
        }
        Ok(())
    }

    /// Files whose declared dependencies changed since the baseline
    ///
    /// Recomputes dependency state, diffs it against the baseline, maps
    /// changed paths through the reverse index, and adopts the new state
    /// as the baseline.
    pub fn get_invalidated_files(&mut self) -> RefractResult<Vec<String>> {
        self.seal();

        let mut invalidated: BTreeSet<String> = BTreeSet::new();
        for root in [FsRoot::Local, FsRoot::External] {
            let current = self.compute_tree(root)?;
            let baseline = self.fs_trees.get(&root).cloned().unwrap_or_default();
            for op in diff(&baseline, &current) {
                match op.op {
                    PatchOp::Create | PatchOp::Change | PatchOp::Unlink => {
                        let abs = self.absolute_for(root, &op.relative_path);
                        if let Some(files) = self.dependents_map.get(&abs) {
                            invalidated.extend(files.iter().cloned());
                        }
                    }
                    PatchOp::Mkdir | PatchOp::Rmdir => {}
                }
            }
            self.fs_trees.insert(root, current);
        }

        if !invalidated.is_empty() {
            debug!(
                "{} files invalidated by dependency changes",
                invalidated.len()
            );
        }
        Ok(invalidated.into_iter().collect())
    }

    /// A fresh unsealed instance carrying all declarations except those
    /// of the given files; the captured baseline is carried along
    pub fn copy_without(&self, files: &[String]) -> Dependencies {
        let mut dependency_map = self.dependency_map.clone();
        for file in files {
            dependency_map.remove(file);
        }
        Dependencies {
            root_dir: self.root_dir.clone(),
            dependency_map,
            dependents_map: HashMap::new(),
            all_deps: BTreeMap::new(),
            fs_trees: self.fs_trees.clone(),
            sealed: false,
        }
    }

    /// Serialize to the `{rootDir, dependencies, fsTrees}` JSON form
    pub fn serialize(&self) -> RefractResult<String> {
        let root_str = path_string(&self.root_dir);
        let dependencies = self
            .dependency_map
            .iter()
            .map(|(file, deps)| (file.clone(), deps.iter().map(|d| path_string(d)).collect()))
            .collect();
        let fs_trees = [FsRoot::Local, FsRoot::External]
            .into_iter()
            .map(|root| SerializedTree {
                fs_root: match root {
                    FsRoot::Local => root_str.clone(),
                    FsRoot::External => "/".to_string(),
                },
                entries: self
                    .fs_trees
                    .get(&root)
                    .map(|t| t.entries().to_vec())
                    .unwrap_or_default(),
            })
            .collect();

        let serialized = Serialized {
            root_dir: root_str,
            dependencies,
            fs_trees,
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    /// Deserialize, rebasing onto `root_dir`
    ///
    /// Stored dependency paths under the old root are rewritten under the
    /// new one; external paths are kept verbatim. The result is sealed
    /// with the stored trees as its baseline.
    pub fn deserialize(json: &str, root_dir: &Path) -> RefractResult<Dependencies> {
        let serialized: Serialized = serde_json::from_str(json)?;
        let old_root = PathBuf::from(&serialized.root_dir);

        let mut instance = Dependencies::new(root_dir);
        for (file, deps) in serialized.dependencies {
            let rebased: Vec<PathBuf> = deps
                .iter()
                .map(|dep| {
                    let dep = Path::new(dep);
                    match dep.strip_prefix(&old_root) {
                        Ok(rel) => instance.root_dir.join(rel),
                        Err(_) => dep.to_path_buf(),
                    }
                })
                .collect();
            instance.dependency_map.insert(file, rebased);
        }
        for tree in serialized.fs_trees {
            let root = if tree.fs_root == serialized.root_dir {
                FsRoot::Local
            } else {
                FsRoot::External
            };
            instance
                .fs_trees
                .insert(root, Snapshot::from_entries(tree.entries));
        }
        instance.seal();
        Ok(instance)
    }

    /// Which root a dependency belongs to and its path relative to it
    fn classify(&self, dep: &Path) -> (FsRoot, String) {
        match dep.strip_prefix(&self.root_dir) {
            Ok(rel) => (FsRoot::Local, path_string(rel)),
            Err(_) => (FsRoot::External, path_string(dep)),
        }
    }

    fn absolute_for(&self, root: FsRoot, key: &str) -> PathBuf {
        match root {
            FsRoot::Local => self.root_dir.join(key),
            FsRoot::External => PathBuf::from(key),
        }
    }

    /// Snapshot the current state of one root's dependencies
    ///
    /// Missing files are recorded with empty metadata so their later
    /// appearance reads as a change.
    fn compute_tree(&self, root: FsRoot) -> RefractResult<Snapshot> {
        let keys = match self.all_deps.get(&root) {
            Some(keys) => keys,
            None => return Ok(Snapshot::empty()),
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let abs = self.absolute_for(root, key);
            match root {
                FsRoot::Local => {
                    let hash = match std::fs::read(&abs) {
                        Ok(bytes) => fingerprint::hash_bytes(&bytes),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                        Err(e) => {
                            return Err(RefractError::io(
                                format!("hashing dependency {}", abs.display()),
                                e,
                            ))
                        }
                    };
                    entries.push(Entry::hashed(key.clone(), hash));
                }
                FsRoot::External => {
                    let entry = match std::fs::metadata(&abs) {
                        Ok(meta) => Entry::file(
                            key.clone(),
                            meta.len(),
                            crate::snapshot::mtime_millis(&meta),
                            crate::snapshot::file_mode(&meta),
                        ),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            Entry::file(key.clone(), 0, 0, 0)
                        }
                        Err(e) => {
                            return Err(RefractError::io(
                                format!("stat dependency {}", abs.display()),
                                e,
                            ))
                        }
                    };
                    entries.push(entry);
                }
            }
        }
        Ok(Snapshot::from_entries(entries))
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching
/// the filesystem, so declared dependencies need not exist yet
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
