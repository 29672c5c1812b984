//! CLI implementation for `weaver gc`

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use crate::cli::commands::{load_plan, Session};
use crate::cli::output;
use crate::core::hasher::ContentHash;
use crate::error::WeaverError;
use crate::infra::store::{format_size, EntryStatus, StoreEntry};

const SECS_PER_DAY: u64 = 24 * 3600;

/// Garbage collection options
#[derive(Debug, Clone)]
pub struct GcOptions {
    pub catalog: PathBuf,
    pub target: Option<String>,
    pub all: bool,
    pub older_than_days: Option<u64>,
    pub dry_run: bool,
    pub components: Vec<String>,
}

/// Which entries a collection removes
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Remove everything
    pub all: bool,
    /// Keep entries used by this plan
    pub keep: Option<BTreeSet<ContentHash>>,
    /// Only remove entries whose last activity is before this time (unix seconds)
    pub unused_since: Option<u64>,
}

impl Selection {
    /// Whether `entry` should be removed
    ///
    /// Failed entries are always removed. Complete entries are removed when a
    /// plan or an age is given and every given condition holds.
    pub fn matches(&self, entry: &StoreEntry) -> bool {
        if self.all || entry.status == EntryStatus::Failed {
            return true;
        }
        if self.keep.is_none() && self.unused_since.is_none() {
            return false;
        }

        let unreferenced = self
            .keep
            .as_ref()
            .map_or(true, |keep| !keep.contains(&entry.hash));
        let old = self
            .unused_since
            .map_or(true, |cutoff| entry.last_activity() < cutoff);
        unreferenced && old
    }
}

/// Execute the gc command
pub fn execute(session: &Session, options: GcOptions) -> Result<()> {
    let mut selection = Selection {
        all: options.all,
        ..Selection::default()
    };

    if !options.components.is_empty() {
        let target = session.target(options.target.as_deref())?;
        let plan = load_plan(&options.catalog, &options.components, &target)?;
        selection.keep = Some(plan.order().map(|node| node.hash.clone()).collect());
    }
    if let Some(days) = options.older_than_days {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        selection.unused_since = Some(now.saturating_sub(days * SECS_PER_DAY));
    }

    let store = session.open_store()?;
    let report = store
        .gc(|entry| selection.matches(entry), options.dry_run)
        .map_err(WeaverError::from)?;

    if output::is_json() {
        return output::print_json(&report);
    }

    let verb = if options.dry_run { "Would remove" } else { "Removed" };
    for entry in &report.removed {
        output::say(format!(
            "  {} {}@{} ({}, {})",
            entry.hash.short(),
            entry.component,
            entry.version,
            entry.status,
            format_size(entry.bytes)
        ));
    }
    output::success(format!(
        "{verb} {} entr{} ({})",
        report.removed.len(),
        if report.removed.len() == 1 { "y" } else { "ies" },
        format_size(report.bytes_freed)
    ));
    if report.skipped_reserved > 0 {
        output::warning(format!(
            "Skipped {} reserved entr{}",
            report.skipped_reserved,
            if report.skipped_reserved == 1 { "y" } else { "ies" }
        ));
    }
    if report.staging_swept > 0 {
        output::say(format!(
            "Swept {} orphaned staging director{}",
            report.staging_swept,
            if report.staging_swept == 1 { "y" } else { "ies" }
        ));
    }

    Ok(())
}
