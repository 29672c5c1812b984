//! Output assembly
//!
//! Copies the artifact trees of every node reachable from the plan's roots
//! into one output directory, in plan order. The tree is built next to the
//! destination and renamed into place, so a failed assembly never leaves a
//! half-written output behind. A previous output (one carrying
//! [`MANIFEST_FILE`]) is replaced; any other non-empty directory is refused.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::core::plan::{BuildPlan, ResolvedNode};
use crate::error::{ArtifactConflict, AssemblyError};
use crate::infra::store::{Store, ARTIFACT_DIRS};

/// Manifest written at the root of every assembled output
pub const MANIFEST_FILE: &str = "weaver-manifest.json";

/// Assembly options
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyOptions {
    /// Follow runtime dependency edges only
    pub runtime_only: bool,
}

/// A component included in an assembled output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestComponent {
    pub name: String,
    pub version: String,
    pub hash: String,
}

/// Contents of [`MANIFEST_FILE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyManifest {
    /// Target triplet
    pub target: String,
    /// Components in plan order
    pub components: Vec<ManifestComponent>,
    /// Every file and symlink, mapped to the component that placed it
    pub files: BTreeMap<String, String>,
}

/// Result of an assembly
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    /// Output directory
    pub path: PathBuf,
    /// Files replaced through `overridable`
    pub overridden: Vec<PathBuf>,
    /// The manifest written to the output
    pub manifest: AssemblyManifest,
}

/// Who placed a file and where it came from
struct Placed {
    owner: String,
    source: PathBuf,
}

fn io_error(path: &Path, e: &std::io::Error) -> AssemblyError {
    AssemblyError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    }
}

/// Assemble the plan's closure into `destination`
///
/// `destination` must not exist, be an empty directory, or hold an earlier
/// assembled output.
pub fn assemble(
    plan: &BuildPlan,
    store: &Store,
    destination: &Path,
    options: &AssemblyOptions,
) -> Result<AssemblyReport, AssemblyError> {
    let previous = existing_output(destination)?;

    let closure = plan.closure(options.runtime_only);
    let nodes: Vec<&ResolvedNode> = plan
        .order()
        .filter(|node| closure.contains(&node.hash))
        .collect();

    let mut entries = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let entry = store
            .lookup(&node.hash)
            .ok_or_else(|| AssemblyError::Incomplete {
                component: node.id(),
                hash: node.hash.to_string(),
            })?;
        entries.push((*node, entry.path));
    }

    let staging = staging_path(destination);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| io_error(&staging, &e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| io_error(&staging, &e))?;

    tracing::info!(
        "Assembling {} component(s) into '{}'",
        entries.len(),
        destination.display()
    );

    let populated = populate(&entries, &staging).and_then(|(files, overridden)| {
        let manifest = AssemblyManifest {
            target: plan.target().triplet(),
            components: nodes
                .iter()
                .map(|node| ManifestComponent {
                    name: node.name().to_string(),
                    version: node.version.to_string(),
                    hash: node.hash.to_string(),
                })
                .collect(),
            files,
        };
        write_manifest(&staging, &manifest)?;
        Ok((manifest, overridden))
    });

    let (manifest, overridden) = match populated {
        Ok(done) => done,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!("Failed to remove '{}': {}", staging.display(), cleanup);
            }
            return Err(e);
        }
    };

    install(&staging, destination, previous)?;

    Ok(AssemblyReport {
        path: destination.to_path_buf(),
        overridden,
        manifest,
    })
}

/// What currently sits at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existing {
    Nothing,
    EmptyDir,
    Output,
}

fn existing_output(destination: &Path) -> Result<Existing, AssemblyError> {
    if !destination.exists() {
        return Ok(Existing::Nothing);
    }
    let mut contents = fs::read_dir(destination).map_err(|e| io_error(destination, &e))?;
    if contents.next().is_none() {
        return Ok(Existing::EmptyDir);
    }
    if destination.join(MANIFEST_FILE).is_file() {
        return Ok(Existing::Output);
    }
    Err(AssemblyError::OutputNotEmpty {
        path: destination.to_path_buf(),
    })
}

/// Move the staged tree to the destination, swapping out an earlier output
fn install(staging: &Path, destination: &Path, previous: Existing) -> Result<(), AssemblyError> {
    match previous {
        Existing::Nothing => {}
        Existing::EmptyDir => {
            fs::remove_dir(destination).map_err(|e| io_error(destination, &e))?;
        }
        Existing::Output => {
            let old = sibling_path(destination, "old");
            if old.exists() {
                fs::remove_dir_all(&old).map_err(|e| io_error(&old, &e))?;
            }
            fs::rename(destination, &old).map_err(|e| io_error(destination, &e))?;
            if let Err(e) = fs::rename(staging, destination) {
                if let Err(restore) = fs::rename(&old, destination) {
                    tracing::warn!(
                        "Failed to restore '{}' from '{}': {}",
                        destination.display(),
                        old.display(),
                        restore
                    );
                }
                return Err(io_error(destination, &e));
            }
            tracing::debug!("Replaced previous output at '{}'", destination.display());
            if let Err(e) = fs::remove_dir_all(&old) {
                tracing::warn!("Failed to remove '{}': {}", old.display(), e);
            }
            return Ok(());
        }
    }
    fs::rename(staging, destination).map_err(|e| io_error(destination, &e))
}

/// Sibling directory the output is built in
fn staging_path(destination: &Path) -> PathBuf {
    sibling_path(destination, "tmp")
}

fn sibling_path(destination: &Path, kind: &str) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy().into_owned());
    let hidden = format!(".{name}.weaver-{kind}-{}", std::process::id());
    match destination.parent() {
        Some(parent) => parent.join(hidden),
        None => PathBuf::from(hidden),
    }
}

/// Copy every artifact tree into `staging`
///
/// Returns the file owner map and the overridden paths. Every collision,
/// including a file where another component has a directory, is collected
/// before failing.
fn populate(
    entries: &[(&ResolvedNode, PathBuf)],
    staging: &Path,
) -> Result<(BTreeMap<String, String>, Vec<PathBuf>), AssemblyError> {
    let mut placed: BTreeMap<PathBuf, Placed> = BTreeMap::new();
    let mut directories: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut overridden = Vec::new();

    for (node, entry_path) in entries {
        for dir in ARTIFACT_DIRS {
            let root = entry_path.join(dir);
            if !root.is_dir() {
                continue;
            }

            let mut walker = WalkDir::new(&root)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();
            while let Some(item) = walker.next() {
                let item = item.map_err(|e| AssemblyError::Io {
                    path: root.clone(),
                    error: e.to_string(),
                })?;
                let Ok(inner) = item.path().strip_prefix(&root) else {
                    continue;
                };
                let relative = Path::new(dir).join(inner);
                let target = staging.join(&relative);

                if item.file_type().is_dir() {
                    if let Some(previous) = placed.get(&relative) {
                        conflicts.push(ArtifactConflict {
                            path: relative,
                            first: previous.owner.clone(),
                            second: node.id(),
                        });
                        walker.skip_current_dir();
                        continue;
                    }
                    fs::create_dir_all(&target).map_err(|e| io_error(&target, &e))?;
                    directories.entry(relative).or_insert_with(|| node.id());
                    continue;
                }

                if let Some(owner) = directories.get(&relative) {
                    conflicts.push(ArtifactConflict {
                        path: relative,
                        first: owner.clone(),
                        second: node.id(),
                    });
                    continue;
                }

                if let Some(previous) = placed.get(&relative) {
                    if same_contents(&previous.source, item.path()) {
                        continue;
                    }
                    if !node.spec.may_override(&relative) {
                        conflicts.push(ArtifactConflict {
                            path: relative,
                            first: previous.owner.clone(),
                            second: node.id(),
                        });
                        continue;
                    }
                    tracing::debug!(
                        "{} overrides {} from {}",
                        node.id(),
                        relative.display(),
                        previous.owner
                    );
                    fs::remove_file(&target).map_err(|e| io_error(&target, &e))?;
                    overridden.push(relative.clone());
                }

                copy_entry(item.path(), &target)?;
                placed.insert(
                    relative,
                    Placed {
                        owner: node.id(),
                        source: item.path().to_path_buf(),
                    },
                );
            }
        }
    }

    if !conflicts.is_empty() {
        return Err(AssemblyError::ArtifactConflict { conflicts });
    }

    let files = placed
        .into_iter()
        .map(|(path, p)| (path.to_string_lossy().replace('\\', "/"), p.owner))
        .collect();
    Ok((files, overridden))
}

/// Copy a file, keeping symlinks as symlinks
fn copy_entry(source: &Path, target: &Path) -> Result<(), AssemblyError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
    }

    let metadata = fs::symlink_metadata(source).map_err(|e| io_error(source, &e))?;
    if metadata.file_type().is_symlink() {
        return copy_symlink(source, target);
    }

    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| io_error(target, &e))
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), AssemblyError> {
    let link = fs::read_link(source).map_err(|e| io_error(source, &e))?;
    std::os::unix::fs::symlink(&link, target).map_err(|e| io_error(target, &e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), AssemblyError> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| io_error(target, &e))
}

/// Whether two artifact files are the same symlink or the same bytes
fn same_contents(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (fs::symlink_metadata(a), fs::symlink_metadata(b)) else {
        return false;
    };

    match (meta_a.file_type().is_symlink(), meta_b.file_type().is_symlink()) {
        (true, true) => matches!((fs::read_link(a), fs::read_link(b)), (Ok(x), Ok(y)) if x == y),
        (false, false) => {
            meta_a.len() == meta_b.len()
                && matches!((fs::read(a), fs::read(b)), (Ok(x), Ok(y)) if x == y)
        }
        _ => false,
    }
}

fn write_manifest(staging: &Path, manifest: &AssemblyManifest) -> Result<(), AssemblyError> {
    let path = staging.join(MANIFEST_FILE);
    let mut json = serde_json::to_string_pretty(manifest).map_err(|e| AssemblyError::Io {
        path: path.clone(),
        error: e.to_string(),
    })?;
    json.push('\n');
    fs::write(&path, json).map_err(|e| io_error(&path, &e))
}
