//! Integration tests for building and assembling plans
//!
//! Builds run against a fake capability that writes deterministic files, so
//! these tests exercise the orchestrator, the store and assembly end to end
//! without a container engine.

mod common;

use common::{orchestrator, FakeCapability, TestProject, SAMPLE_CATALOG};
use predicates::prelude::*;
use tokio_util::sync::CancellationToken;
use weaver::core::assemble::{AssemblyOptions, MANIFEST_FILE};
use weaver::core::orchestrator::NodeState;

#[tokio::test]
async fn test_second_run_builds_nothing_and_assembles_identical_output() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["gcc"]);
    let capability = FakeCapability::new();
    let orch = orchestrator(&project.store_path(), capability.clone(), 4);
    let out = project.path().join("sysroot");
    let files = [MANIFEST_FILE, "bin/gcc", "lib/libglibc.so", "rootfs/usr/share/binutils/VERSION"];

    let first = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert!(first.success(), "{first:?}");
    assert_eq!(first.built.len(), plan.len());
    assert_eq!(capability.calls(), plan.len());
    orch.assemble(&plan, &out, &AssemblyOptions::default()).unwrap();
    let before: Vec<Vec<u8>> = files.iter().map(|f| std::fs::read(out.join(f)).unwrap()).collect();

    let second = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert!(second.success());
    assert!(second.built.is_empty());
    assert_eq!(second.cache_hits.len(), plan.len());
    assert_eq!(capability.calls(), plan.len());
    orch.assemble(&plan, &out, &AssemblyOptions::default()).unwrap();

    for (file, bytes) in files.iter().zip(&before) {
        assert_eq!(&std::fs::read(out.join(file)).unwrap(), bytes, "{file} differs");
    }
}

#[tokio::test]
async fn test_toolchain_is_built_in_dependency_order() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["gcc"]);
    let capability = FakeCapability::new();
    let orch = orchestrator(&project.store_path(), capability.clone(), 4);

    assert!(orch.run(&plan, &CancellationToken::new(), |_, _| {}).await.success());

    let order = capability.built();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("binutils") < pos("glibc"));
    assert!(pos("linux-headers") < pos("glibc"));
    assert!(pos("glibc") < pos("gcc"));
}

#[tokio::test]
async fn test_failure_reports_blocked_dependents() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["gcc", "make"]);
    let orch = orchestrator(
        &project.store_path(),
        FakeCapability::failing(&["binutils"]),
        2,
    );

    let report = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert!(!report.success());

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "binutils@2.42.0");
    assert!(report.failed[0].cause.contains("Error 1"));

    let mut blocked: Vec<&str> = report.blocked.iter().map(|b| b.id.as_str()).collect();
    blocked.sort_unstable();
    assert_eq!(blocked, vec!["gcc@13.2.0", "glibc@2.41.0"]);

    let mut built = report.built.clone();
    built.sort();
    assert_eq!(built, vec!["linux-headers@6.6.0", "make@4.4.1"]);
}

#[tokio::test]
async fn test_retry_after_failure_reuses_completed_nodes() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["gcc"]);

    let broken = orchestrator(&project.store_path(), FakeCapability::failing(&["glibc"]), 2);
    let report = broken.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert_eq!(report.failed.len(), 1);

    let fixed_capability = FakeCapability::new();
    let fixed = orchestrator(&project.store_path(), fixed_capability.clone(), 2);
    let report = fixed.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert!(report.success(), "{report:?}");

    let mut rebuilt = fixed_capability.built();
    rebuilt.sort();
    assert_eq!(rebuilt, vec!["gcc", "glibc"]);
    assert_eq!(report.cache_hits.len(), 2);
}

#[tokio::test]
async fn test_cancellation_lets_running_build_finish() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["gcc"]);
    let capability = FakeCapability::slow(50);
    let orch = orchestrator(&project.store_path(), capability.clone(), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let report = orch
        .run(&plan, &cancel, move |_, state| {
            if *state == NodeState::Building {
                trigger.cancel();
            }
        })
        .await;

    assert!(!report.success());
    assert_eq!(report.built.len(), 1);
    assert_eq!(report.cancelled.len(), plan.len() - 1);
    assert!(report.failed.is_empty());
    assert_eq!(capability.calls(), 1);

    let store = orch.store();
    assert!(store.list().unwrap().iter().all(|e| !store.is_locked(&e.hash)));

    let resumed = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert!(resumed.success());
    assert_eq!(resumed.cache_hits.len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_build_each_node_once() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["glibc"]);
    let first_capability = FakeCapability::slow(20);
    let second_capability = FakeCapability::slow(20);
    let first = orchestrator(&project.store_path(), first_capability.clone(), 2);
    let second = orchestrator(&project.store_path(), second_capability.clone(), 2);

    let cancel = CancellationToken::new();
    let (a, b) = futures::future::join(
        first.run(&plan, &cancel, |_, _| {}),
        second.run(&plan, &cancel, |_, _| {}),
    )
    .await;

    assert!(a.success(), "{a:?}");
    assert!(b.success(), "{b:?}");
    assert_eq!(first_capability.calls() + second_capability.calls(), plan.len());
    assert_eq!(a.built.len() + b.built.len(), plan.len());
}

#[tokio::test]
async fn test_runtime_only_assembly_drops_build_dependencies() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["glibc"]);
    let orch = orchestrator(&project.store_path(), FakeCapability::new(), 2);
    assert!(orch.run(&plan, &CancellationToken::new(), |_, _| {}).await.success());

    let out = assert_fs::TempDir::new().unwrap();
    let dest = out.path().join("sysroot");
    orch.assemble(&plan, &dest, &AssemblyOptions { runtime_only: true })
        .unwrap();

    assert!(predicate::path::is_file().eval(&dest.join("bin/glibc")));
    assert!(predicate::path::is_file().eval(&dest.join("bin/binutils")));
    assert!(predicate::path::missing().eval(&dest.join("bin/linux-headers")));

    let manifest = std::fs::read_to_string(dest.join(MANIFEST_FILE)).unwrap();
    assert!(predicate::str::contains("glibc@2.41.0").eval(&manifest));
    assert!(!manifest.contains("linux-headers"));
}

#[test]
fn test_build_with_unknown_engine_is_a_general_failure() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let output = project.run(&["build", "--engine", "lxc", "gcc"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(common::stderr(&output).contains("Unknown container engine 'lxc'"));
    assert!(!project.file_exists("store/v1/entries"));
}

#[test]
fn test_build_of_cyclic_catalog_fails_before_touching_the_store() {
    let project = TestProject::with_catalog(common::CYCLIC_CATALOG);
    let output = project.run(&["build", "--engine", "docker", "a"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(!project.file_exists("store"));
}
