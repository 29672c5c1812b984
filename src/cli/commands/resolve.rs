//! CLI implementation for `weaver resolve`
//!
//! Prints the build plan level by level without touching the store.

use std::path::Path;

use anyhow::Result;

use crate::cli::commands::{load_plan, Session};
use crate::cli::output;

/// Execute the resolve command
pub fn execute(
    session: &Session,
    catalog: &Path,
    target: Option<&str>,
    components: &[String],
) -> Result<()> {
    let target = session.target(target)?;
    let plan = load_plan(catalog, components, &target)?;

    if output::is_json() {
        return output::print_json(&plan.summary());
    }

    output::say(format!(
        "Plan for {} ({} component(s), {} level(s))",
        target,
        plan.len(),
        plan.levels().len()
    ));
    for (level, hashes) in plan.levels().iter().enumerate() {
        output::say(format!("\nLevel {level}"));
        for node in hashes.iter().filter_map(|h| plan.node(h)) {
            let deps: Vec<&str> = node.dependencies.iter().map(|d| d.name.as_str()).collect();
            if deps.is_empty() {
                output::say(format!("  {} {}", node.hash.short(), node.id()));
            } else {
                output::say(format!(
                    "  {} {} <- {}",
                    node.hash.short(),
                    node.id(),
                    deps.join(", ")
                ));
            }
        }
    }

    Ok(())
}
