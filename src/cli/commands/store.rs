//! CLI command for `weaver store`

use anyhow::Result;

use crate::cli::commands::Session;
use crate::cli::output::{self, status};
use crate::error::WeaverError;

/// Execute `store info`
pub fn info(session: &Session) -> Result<()> {
    let store = session.open_store()?;
    let info = store.info().map_err(WeaverError::from)?;

    if output::is_json() {
        return output::print_json(&info);
    }

    output::say(format!("{} Store Information\n", status::INFO));
    output::say(format!("Location: {}", info.path.display()));
    output::say(format!("Size: {}", info.format_size()));
    output::say(format!("Complete: {}", info.complete));
    output::say(format!("Failed: {}", info.failed));
    output::say(format!("Reserved: {}", info.reserved));
    Ok(())
}

/// Execute `store list`
pub fn list(session: &Session) -> Result<()> {
    let store = session.open_store()?;
    let mut entries = store.list().map_err(WeaverError::from)?;
    entries.sort_by(|a, b| (&a.component, &a.version).cmp(&(&b.component, &b.version)));

    if output::is_json() {
        return output::print_json(&entries);
    }

    if entries.is_empty() {
        output::say("Store is empty");
        return Ok(());
    }
    for entry in &entries {
        let reason = entry
            .reason
            .as_deref()
            .map(|r| format!(": {r}"))
            .unwrap_or_default();
        output::say(format!(
            "{}  {:<24} {:<12} {}{}",
            entry.hash.short(),
            entry.component,
            entry.version,
            entry.status,
            reason
        ));
    }
    Ok(())
}
