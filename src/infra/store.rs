//! Content-addressed build store
//!
//! Every plan node is materialized into one store entry keyed by its content
//! hash. The on-disk layout is versioned so incompatible layouts never share
//! entries:
//!
//! ```text
//! <store>/v1/entries/<hash>/status.json
//! <store>/v1/entries/<hash>/{bin,lib,rootfs}/
//! <store>/v1/locks/<hash>.lock
//! <store>/v1/staging/<hash>-<token>/{bin,lib,rootfs}/
//! <store>/v1/trash/
//! ```
//!
//! There is no in-process locking. Reservations are lock files created with
//! `create_new`, and every status change is a write to a temporary file
//! followed by a rename, so a crash at any point leaves an entry either
//! absent, `reserved` or `failed`, never a partially visible `complete`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::defaults;
use crate::core::hasher::ContentHash;
use crate::error::StoreError;

/// Layout version directory
pub const LAYOUT_VERSION: &str = "v1";

/// Artifact tree directories every complete entry holds
pub const ARTIFACT_DIRS: [&str; 3] = ["bin", "lib", "rootfs"];

const STATUS_FILE: &str = "status.json";

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Unique id for reservations, staging directories and temp files
fn unique_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let count = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:08x}-{count}", std::process::id())
}

/// Entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// A build is claimed but not committed
    Reserved,
    /// Artifacts are committed
    Complete,
    /// The last attempt failed; the hash may be reserved again
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserved => write!(f, "reserved"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A store entry as recorded in `status.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Content hash
    pub hash: ContentHash,
    /// Component name
    pub component: String,
    /// Component version
    pub version: String,
    /// Status
    pub status: EntryStatus,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the entry was first reserved (unix seconds)
    pub created_at: u64,
    /// When the entry was committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Last cache hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<u64>,
    /// Image produced by the build, if the engine reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Entry directory
    #[serde(skip)]
    pub path: PathBuf,
}

impl StoreEntry {
    /// One of the artifact tree directories
    pub fn artifact_dir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Most recent use, falling back to completion and creation time
    pub fn last_activity(&self) -> u64 {
        self.last_used_at
            .or(self.completed_at)
            .unwrap_or(self.created_at)
    }
}

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    token: String,
    pid: u32,
    created_at: u64,
}

/// Who holds a reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHolder {
    /// Holder process id, when known
    pub pid: Option<u32>,
    /// Holder token, when known
    pub token: Option<String>,
}

impl fmt::Display for ReservationHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.pid, &self.token) {
            (Some(pid), Some(token)) => write!(f, "pid {pid} (token {token})"),
            (Some(pid), None) => write!(f, "pid {pid}"),
            _ => write!(f, "an unknown holder"),
        }
    }
}

/// Exclusive right to build one hash
///
/// Consumed by [`Store::commit`] or [`Store::release`]. Dropping a token
/// without either leaves the entry `reserved` until the reservation is
/// reclaimed as stale.
#[derive(Debug)]
pub struct ReservationToken {
    hash: ContentHash,
    id: String,
    staging: PathBuf,
}

impl ReservationToken {
    /// Reserved hash
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Token id, as written to the lock file
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Private staging directory with empty `bin/`, `lib/` and `rootfs/`
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }
}

/// Result of [`Store::reserve`]
#[derive(Debug)]
pub enum Reservation {
    /// This caller may build
    Claimed(ReservationToken),
    /// Someone else is building; wait and retry
    AlreadyReserved {
        /// Current holder
        holder: ReservationHolder,
    },
    /// Nothing to build
    AlreadyComplete(StoreEntry),
}

/// Output of a build, ready to commit
#[derive(Debug, Clone)]
pub struct Artifacts {
    /// Directory holding `bin/`, `lib/` and `rootfs/`
    pub root: PathBuf,
    /// Image reference reported by the build engine
    pub image_ref: Option<String>,
}

/// One entry removed (or to be removed) by garbage collection
#[derive(Debug, Clone, Serialize)]
pub struct RemovedEntry {
    pub hash: ContentHash,
    pub component: String,
    pub version: String,
    pub status: EntryStatus,
    pub bytes: u64,
}

/// Garbage collection report
#[derive(Debug, Default, Serialize)]
pub struct GcReport {
    /// Entries removed
    pub removed: Vec<RemovedEntry>,
    /// Bytes freed by removed entries and swept staging directories
    pub bytes_freed: u64,
    /// Entries skipped because they are reserved or locked
    pub skipped_reserved: usize,
    /// Orphaned staging directories swept
    pub staging_swept: usize,
    /// Nothing was deleted
    pub dry_run: bool,
}

/// Store summary
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    /// Store root
    pub path: PathBuf,
    /// Complete entries
    pub complete: usize,
    /// Failed entries
    pub failed: usize,
    /// Reserved entries
    pub reserved: usize,
    /// Total size in bytes
    pub size_bytes: u64,
}

impl StoreInfo {
    /// Format size for display
    pub fn format_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Human readable byte count
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Size of a directory tree, not following symlinks
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// On-disk build store
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    stale_after: Duration,
}

impl Store {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            root: root.into(),
            stale_after: Duration::from_secs(defaults::STALE_RESERVATION_SECS),
        };
        for dir in ["entries", "locks", "staging", "trash"] {
            let path = store.layout().join(dir);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, &e))?;
        }
        Ok(store)
    }

    /// Age after which a reservation whose holder cannot be checked counts
    /// as abandoned
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layout(&self) -> PathBuf {
        self.root.join(LAYOUT_VERSION)
    }

    /// Directory of an entry
    pub fn entry_path(&self, hash: &ContentHash) -> PathBuf {
        self.layout().join("entries").join(hash.as_str())
    }

    fn status_path(&self, hash: &ContentHash) -> PathBuf {
        self.entry_path(hash).join(STATUS_FILE)
    }

    fn lock_path(&self, hash: &ContentHash) -> PathBuf {
        self.layout().join("locks").join(format!("{hash}.lock"))
    }

    fn staging_root(&self) -> PathBuf {
        self.layout().join("staging")
    }

    fn trash_root(&self) -> PathBuf {
        self.layout().join("trash")
    }

    /// Read an entry's status record, whatever its status
    pub fn status(&self, hash: &ContentHash) -> Result<Option<StoreEntry>, StoreError> {
        let path = self.status_path(hash);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, &e)),
        };
        let mut entry: StoreEntry =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                error: e.to_string(),
            })?;
        if &entry.hash != hash {
            return Err(StoreError::Corrupt {
                path,
                error: format!("record belongs to {}", entry.hash),
            });
        }
        entry.path = self.entry_path(hash);
        Ok(Some(entry))
    }

    /// Find a complete entry
    ///
    /// Unreadable records and complete entries with a missing artifact tree
    /// are logged and reported as absent, so the caller rebuilds them.
    pub fn lookup(&self, hash: &ContentHash) -> Option<StoreEntry> {
        let entry = match self.status(hash) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Store integrity: {}; treating {} as missing", e, hash.short());
                return None;
            }
        };

        if entry.status != EntryStatus::Complete {
            return None;
        }

        if let Some(missing) = ARTIFACT_DIRS
            .iter()
            .map(|d| entry.artifact_dir(d))
            .find(|p| !p.is_dir())
        {
            tracing::warn!(
                "Store integrity: {} ({}) is complete but '{}' is missing; rebuilding",
                entry.component,
                hash.short(),
                missing.display()
            );
            return None;
        }

        Some(entry)
    }

    /// Whether a reservation lock exists for `hash`
    pub fn is_locked(&self, hash: &ContentHash) -> bool {
        self.lock_path(hash).exists()
    }

    /// Claim the right to build `hash`
    pub fn reserve(
        &self,
        hash: &ContentHash,
        component: &str,
        version: &str,
    ) -> Result<Reservation, StoreError> {
        let lock_path = self.lock_path(hash);

        // One extra attempt after reclaiming a stale lock
        for _ in 0..2 {
            if let Some(entry) = self.lookup(hash) {
                return Ok(Reservation::AlreadyComplete(entry));
            }

            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(file) => return self.claim(hash, component, version, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let record = read_lock(&lock_path);
                    if self.is_stale(&lock_path, record.as_ref()) {
                        self.reclaim(hash, record.as_ref())?;
                        continue;
                    }
                    return Ok(Reservation::AlreadyReserved {
                        holder: ReservationHolder {
                            pid: record.as_ref().map(|r| r.pid),
                            token: record.map(|r| r.token),
                        },
                    });
                }
                Err(e) => return Err(StoreError::io(&lock_path, &e)),
            }
        }

        let record = read_lock(&lock_path);
        Ok(Reservation::AlreadyReserved {
            holder: ReservationHolder {
                pid: record.as_ref().map(|r| r.pid),
                token: record.map(|r| r.token),
            },
        })
    }

    fn claim(
        &self,
        hash: &ContentHash,
        component: &str,
        version: &str,
        file: File,
    ) -> Result<Reservation, StoreError> {
        let lock_path = self.lock_path(hash);
        let id = write_lock(&lock_path, file)?;

        // A commit may have landed between the lookup and the lock
        if let Some(entry) = self.lookup(hash) {
            remove_file_if_exists(&lock_path)?;
            return Ok(Reservation::AlreadyComplete(entry));
        }

        let created_at = self
            .status(hash)
            .ok()
            .flatten()
            .map_or_else(now_secs, |e| e.created_at);
        let entry = StoreEntry {
            hash: hash.clone(),
            component: component.to_string(),
            version: version.to_string(),
            status: EntryStatus::Reserved,
            reason: None,
            created_at,
            completed_at: None,
            last_used_at: None,
            image_ref: None,
            path: self.entry_path(hash),
        };
        self.write_status(&entry)?;

        let staging = self.staging_root().join(format!("{hash}-{id}"));
        for dir in ARTIFACT_DIRS {
            let path = staging.join(dir);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, &e))?;
        }

        tracing::debug!("Reserved {} ({}) with token {}", component, hash.short(), id);

        Ok(Reservation::Claimed(ReservationToken {
            hash: hash.clone(),
            id,
            staging,
        }))
    }

    fn is_stale(&self, lock_path: &Path, record: Option<&LockRecord>) -> bool {
        // A live foreign holder keeps its lock however long its build runs.
        // This process's own locks can belong to dropped tokens, so only
        // their age counts.
        if let Some(record) = record {
            if record.pid != std::process::id() {
                match process_alive(record.pid) {
                    Some(true) => return false,
                    Some(false) => return true,
                    None => {}
                }
            }
        }

        let created = record.map(|r| r.created_at).or_else(|| {
            fs::metadata(lock_path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
        });
        created.is_some_and(|created| now_secs().saturating_sub(created) > self.stale_after.as_secs())
    }

    /// Take over an abandoned lock
    ///
    /// The lock is renamed to a private tombstone. If the tombstone turns out
    /// to be a different lock than the one judged stale, it is linked back.
    fn reclaim(&self, hash: &ContentHash, observed: Option<&LockRecord>) -> Result<(), StoreError> {
        let lock_path = self.lock_path(hash);
        let tombstone = self.trash_root().join(format!("{hash}-{}.lock", unique_id()));

        match fs::rename(&lock_path, &tombstone) {
            Ok(()) => {}
            // Someone else reclaimed or released it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(&lock_path, &e)),
        }

        let taken = read_lock(&tombstone);
        let same = match (observed, taken.as_ref()) {
            (Some(observed), Some(taken)) => observed.token == taken.token,
            (None, _) => true,
            (Some(_), None) => false,
        };

        if same {
            tracing::warn!(
                "Reclaimed stale reservation on {} held by {}",
                hash.short(),
                observed.map_or_else(|| "an unknown holder".to_string(), |r| format!("pid {}", r.pid))
            );
            remove_file_if_exists(&tombstone)?;
        } else if let Err(e) = fs::hard_link(&tombstone, &lock_path) {
            tracing::warn!(
                "Could not restore live reservation on {}: {}",
                hash.short(),
                e
            );
            remove_file_if_exists(&tombstone)?;
        } else {
            remove_file_if_exists(&tombstone)?;
        }
        Ok(())
    }

    fn verify_token(&self, token: &ReservationToken) -> Result<(), StoreError> {
        match read_lock(&self.lock_path(&token.hash)) {
            Some(record) if record.token == token.id => Ok(()),
            _ => Err(StoreError::ReservationLost {
                hash: token.hash.to_string(),
            }),
        }
    }

    /// Publish a build
    ///
    /// Moves the artifact tree into the entry, then flips the status to
    /// `complete` with an atomic rename, then drops the lock.
    pub fn commit(
        &self,
        token: ReservationToken,
        artifacts: &Artifacts,
    ) -> Result<StoreEntry, StoreError> {
        self.verify_token(&token)?;

        let mut entry = self
            .status(&token.hash)?
            .ok_or_else(|| StoreError::ReservationLost {
                hash: token.hash.to_string(),
            })?;

        for dir in ARTIFACT_DIRS {
            let source = artifacts.root.join(dir);
            let dest = entry.artifact_dir(dir);
            if dest.exists() {
                fs::remove_dir_all(&dest).map_err(|e| StoreError::io(&dest, &e))?;
            }
            if source.is_dir() {
                fs::rename(&source, &dest).map_err(|e| StoreError::io(&source, &e))?;
            } else {
                fs::create_dir_all(&dest).map_err(|e| StoreError::io(&dest, &e))?;
            }
        }

        let now = now_secs();
        entry.status = EntryStatus::Complete;
        entry.reason = None;
        entry.completed_at = Some(now);
        entry.last_used_at = Some(now);
        entry.image_ref.clone_from(&artifacts.image_ref);
        self.write_status(&entry)?;

        remove_file_if_exists(&self.lock_path(&token.hash))?;
        remove_dir_if_exists(&token.staging)?;

        tracing::info!("Committed {} {} ({})", entry.component, entry.version, token.hash.short());
        Ok(entry)
    }

    /// Give up a reservation, recording why
    pub fn release(&self, token: ReservationToken, reason: &str) -> Result<(), StoreError> {
        let owned = self.verify_token(&token);

        remove_dir_if_exists(&token.staging)?;
        owned?;

        if let Some(mut entry) = self.status(&token.hash)? {
            for dir in ARTIFACT_DIRS {
                remove_dir_if_exists(&entry.artifact_dir(dir))?;
            }
            entry.status = EntryStatus::Failed;
            entry.reason = Some(reason.to_string());
            entry.completed_at = None;
            self.write_status(&entry)?;
        }

        remove_file_if_exists(&self.lock_path(&token.hash))?;
        tracing::debug!("Released {}: {}", token.hash.short(), reason);
        Ok(())
    }

    /// Record a cache hit
    pub fn touch(&self, hash: &ContentHash) -> Result<(), StoreError> {
        if let Some(mut entry) = self.status(hash)? {
            entry.last_used_at = Some(now_secs());
            self.write_status(&entry)?;
        }
        Ok(())
    }

    /// All readable entries, by hash
    pub fn list(&self) -> Result<Vec<StoreEntry>, StoreError> {
        let entries_dir = self.layout().join("entries");
        let dir = fs::read_dir(&entries_dir).map_err(|e| StoreError::io(&entries_dir, &e))?;

        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|e| StoreError::io(&entries_dir, &e))?;
            let name = item.file_name();
            let Some(hash) = name.to_str().and_then(ContentHash::from_hex) else {
                continue;
            };
            match self.status(&hash) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable store entry: {}", e),
            }
        }
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(entries)
    }

    /// Entry counts and size
    pub fn info(&self) -> Result<StoreInfo, StoreError> {
        let entries = self.list()?;
        let count = |status: EntryStatus| entries.iter().filter(|e| e.status == status).count();
        Ok(StoreInfo {
            path: self.root.clone(),
            complete: count(EntryStatus::Complete),
            failed: count(EntryStatus::Failed),
            reserved: count(EntryStatus::Reserved),
            size_bytes: dir_size(&self.layout()),
        })
    }

    /// Remove entries selected by `predicate`
    ///
    /// Reserved entries and entries with a lock are never offered to the
    /// predicate. Removed entries are renamed into the trash first, so a
    /// reader never sees a half-deleted entry. Staging directories whose
    /// reservation is gone are swept.
    pub fn gc<F>(&self, predicate: F, dry_run: bool) -> Result<GcReport, StoreError>
    where
        F: Fn(&StoreEntry) -> bool,
    {
        let mut report = GcReport {
            dry_run,
            ..GcReport::default()
        };

        for entry in self.list()? {
            if entry.status == EntryStatus::Reserved || self.is_locked(&entry.hash) {
                report.skipped_reserved += 1;
                continue;
            }
            if !predicate(&entry) {
                continue;
            }

            let bytes = dir_size(&entry.path);
            if !dry_run {
                // Hold the lock while removing, so a concurrent reserve
                // either sees the lock or finds the entry already gone
                let lock_path = self.lock_path(&entry.hash);
                let file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        report.skipped_reserved += 1;
                        continue;
                    }
                    Err(e) => return Err(StoreError::io(&lock_path, &e)),
                };
                let removed = write_lock(&lock_path, file).and_then(|_| self.remove_entry(&entry));
                remove_file_if_exists(&lock_path)?;
                if !removed? {
                    continue;
                }
            }

            tracing::debug!("Collected {} {} ({})", entry.component, entry.version, entry.hash.short());
            report.bytes_freed += bytes;
            report.removed.push(RemovedEntry {
                hash: entry.hash,
                component: entry.component,
                version: entry.version,
                status: entry.status,
                bytes,
            });
        }

        self.sweep_staging(&mut report)?;

        tracing::info!(
            "Garbage collection removed {} entries, freed {}{}",
            report.removed.len(),
            format_size(report.bytes_freed),
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }

    /// Move an unlocked entry to the trash and delete it
    ///
    /// Returns `false` when the entry changed since it was listed.
    fn remove_entry(&self, listed: &StoreEntry) -> Result<bool, StoreError> {
        match self.status(&listed.hash) {
            Ok(Some(current)) if current.status == listed.status => {}
            _ => return Ok(false),
        }

        let trashed = self
            .trash_root()
            .join(format!("{}-{}", listed.hash, unique_id()));
        match fs::rename(&listed.path, &trashed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::io(&listed.path, &e)),
        }
        if let Err(e) = fs::remove_dir_all(&trashed) {
            tracing::warn!("Failed to empty trash '{}': {}", trashed.display(), e);
        }
        Ok(true)
    }

    fn sweep_staging(&self, report: &mut GcReport) -> Result<(), StoreError> {
        let staging = self.staging_root();
        let dir = fs::read_dir(&staging).map_err(|e| StoreError::io(&staging, &e))?;

        for item in dir {
            let item = item.map_err(|e| StoreError::io(&staging, &e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if name.len() <= 65 || !name.is_char_boundary(64) {
                continue;
            }
            let (hash, token) = name.split_at(64);
            let token = token.trim_start_matches('-');
            let Some(hash) = ContentHash::from_hex(hash) else {
                continue;
            };

            let live = read_lock(&self.lock_path(&hash)).is_some_and(|r| r.token == token);
            if live {
                continue;
            }

            let path = item.path();
            report.bytes_freed += dir_size(&path);
            report.staging_swept += 1;
            if !report.dry_run {
                remove_dir_if_exists(&path)?;
            }
        }
        Ok(())
    }

    fn write_status(&self, entry: &StoreEntry) -> Result<(), StoreError> {
        let dir = self.entry_path(&entry.hash);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, &e))?;

        let path = dir.join(STATUS_FILE);
        let tmp = dir.join(format!("{STATUS_FILE}.{}.tmp", unique_id()));
        let encoded = serde_json::to_vec_pretty(entry).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            error: e.to_string(),
        })?;

        let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, &e))?;
        file.write_all(&encoded)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, &e))
    }
}

/// Fill a freshly created lock file with this process's record
fn write_lock(lock_path: &Path, mut file: File) -> Result<String, StoreError> {
    let record = LockRecord {
        token: unique_id(),
        pid: std::process::id(),
        created_at: now_secs(),
    };
    let encoded = serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt {
        path: lock_path.to_path_buf(),
        error: e.to_string(),
    })?;
    file.write_all(&encoded)
        .and_then(|()| file.sync_all())
        .map_err(|e| StoreError::io(lock_path, &e))?;
    Ok(record.token)
}

fn read_lock(path: &Path) -> Option<LockRecord> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Whether a process exists; `None` when this platform cannot tell
fn process_alive(pid: u32) -> Option<bool> {
    if cfg!(target_os = "linux") {
        Some(Path::new("/proc").join(pid.to_string()).exists())
    } else {
        None
    }
}

fn remove_file_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, &e)),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, &e)),
    }
}
