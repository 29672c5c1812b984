//! Build command implementation
//!
//! Implements `weaver build`: resolve, build every missing node through the
//! container engine, then optionally assemble the closure and build a
//! runtime image from it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::commands::{load_plan, Session};
use crate::cli::output::{self, status};
use crate::core::assemble::{AssemblyOptions, AssemblyReport};
use crate::core::orchestrator::{BuildReport, NodeState, Orchestrator, OrchestratorConfig};
use crate::error::WeaverError;
use crate::infra::container::{ContainerEngine, ContainerRuntime};
use crate::infra::executor::Executor;

/// Build options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Catalog file
    pub catalog: PathBuf,
    /// Target architecture or triplet
    pub target: Option<String>,
    /// Number of parallel builds
    pub jobs: Option<usize>,
    /// Assembly destination
    pub output: Option<PathBuf>,
    /// Follow runtime edges only when assembling
    pub runtime_only: bool,
    /// Runtime image tag
    pub image: Option<String>,
    /// Container engine
    pub engine: Option<String>,
    /// Base image
    pub base_image: Option<String>,
    /// Requested components
    pub components: Vec<String>,
}

#[derive(Serialize)]
struct BuildOutput<'a> {
    target: String,
    report: &'a BuildReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    assembly: Option<&'a AssemblyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

/// Execute the build command
pub async fn execute(session: &Session, options: BuildOptions) -> Result<()> {
    let target = session.target(options.target.as_deref())?;
    let plan = load_plan(&options.catalog, &options.components, &target)?;

    let engine_name = options
        .engine
        .as_deref()
        .or(session.config.build.engine.as_deref());
    let runtime = ContainerRuntime::select(engine_name)
        .map_err(|e| WeaverError::Generic(e.to_string()))?;

    let jobs = options
        .jobs
        .filter(|j| *j > 0)
        .unwrap_or_else(|| session.config.jobs());
    let base_image = options
        .base_image
        .as_deref()
        .unwrap_or_else(|| session.config.base_image());

    let executor = Executor::new(Arc::new(ContainerEngine::new(runtime)), base_image)
        .with_build_jobs(num_cpus::get().div_ceil(jobs).max(1));
    let store = session.open_store()?;
    let orchestrator = Orchestrator::new(
        store,
        executor,
        OrchestratorConfig {
            jobs,
            reservation_wait: session.config.reservation_wait(),
            ..OrchestratorConfig::default()
        },
    );

    output::say(format!(
        "Building {} component(s) for {} with {} ({} job(s))",
        plan.len(),
        target,
        runtime.command(),
        jobs
    ));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; finishing running builds");
                cancel.cancel();
            }
        })
    };

    let bar = output::create_build_bar(plan.len() as u64);
    let report = orchestrator
        .run(&plan, &cancel, |node, state| {
            if state.is_terminal() {
                bar.inc(1);
            }
            if matches!(state, NodeState::Building | NodeState::Failed(_)) {
                bar.set_message(format!("{} {}", state.label(), node.id()));
            }
        })
        .await;
    bar.finish_and_clear();
    interrupt.abort();

    if !report.success() {
        if output::is_json() {
            output::print_json(&BuildOutput {
                target: target.triplet(),
                report: &report,
                assembly: None,
                image: None,
            })?;
        } else {
            print_failures(&report);
        }
        return Err(WeaverError::BuildFailed {
            failed: report.failed.len(),
            blocked: report.blocked.len(),
            cancelled: report.cancelled.len(),
        }
        .into());
    }

    output::success(format!(
        "{} built, {} cached",
        report.built.len(),
        report.cache_hits.len()
    ));

    let mut assembly = None;
    let mut image = None;
    if let Some(destination) = &options.output {
        let assembled = orchestrator
            .assemble(
                &plan,
                destination,
                &AssemblyOptions {
                    runtime_only: options.runtime_only,
                },
            )
            .map_err(WeaverError::from)?;
        output::success(format!(
            "Assembled {} component(s) into {}",
            assembled.manifest.components.len(),
            destination.display()
        ));

        if let Some(tag) = &options.image {
            let built = orchestrator
                .executor()
                .build_runtime_image(destination, tag)
                .await
                .map_err(|e| WeaverError::Generic(e.to_string()))
                .with_context(|| format!("Failed to build runtime image {tag}"))?;
            output::success(format!("Built runtime image {built}"));
            image = Some(built.to_string());
        }
        assembly = Some(assembled);
    }

    if output::is_json() {
        output::print_json(&BuildOutput {
            target: target.triplet(),
            report: &report,
            assembly: assembly.as_ref(),
            image,
        })?;
    }

    Ok(())
}

fn print_failures(report: &BuildReport) {
    if output::is_quiet() {
        return;
    }

    for failed in &report.failed {
        eprintln!("{} {} failed: {}", status::ERROR, failed.id, failed.cause);
    }
    for blocked in &report.blocked {
        eprintln!(
            "{} {} blocked by {}",
            status::WARNING,
            blocked.id,
            blocked.blocked_by.join(", ")
        );
    }
    if !report.cancelled.is_empty() {
        eprintln!(
            "{} cancelled: {}",
            status::INFO,
            report.cancelled.join(", ")
        );
    }
}
