//! Integration tests for the build store and the `weaver store` / `weaver gc`
//! commands
//!
//! - concurrent reservations of one hash admit exactly one builder
//! - an abandoned reservation stays `reserved` and is never collected
//! - gc selection through the command line

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{orchestrator, stderr, stdout, FakeCapability, TestProject, SAMPLE_CATALOG};
use tokio_util::sync::CancellationToken;
use weaver::core::hasher::ContentHash;
use weaver::infra::store::{Artifacts, EntryStatus, Reservation, Store};

fn hash(seed: char) -> ContentHash {
    ContentHash::from_hex(&seed.to_string().repeat(64)).unwrap()
}

#[test]
fn test_concurrent_reserve_admits_one_builder() {
    let project = TestProject::new();
    let store = project.store();
    let target = hash('a');
    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let store = store.clone();
            let target = target.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match store.reserve(&target, "zlib", "1.3.1").unwrap() {
                    Reservation::Claimed(token) => {
                        let root = token.staging_dir().to_path_buf();
                        std::fs::write(root.join("lib/libz.so"), b"z").unwrap();
                        store
                            .commit(token, &Artifacts { root, image_ref: None })
                            .unwrap();
                        1
                    }
                    Reservation::AlreadyReserved { .. } | Reservation::AlreadyComplete(_) => 0,
                }
            })
        })
        .collect();

    let claimed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(claimed, 1);

    let entry = store.lookup(&target).expect("entry is complete");
    assert_eq!(std::fs::read(entry.artifact_dir("lib").join("libz.so")).unwrap(), b"z");
}

#[test]
fn test_abandoned_reservation_is_never_complete() {
    let project = TestProject::new();
    let store = project.store();
    let target = hash('b');

    let Reservation::Claimed(token) = store.reserve(&target, "gcc", "13.2.0").unwrap() else {
        panic!("expected a fresh reservation");
    };
    std::fs::write(token.staging_dir().join("bin/gcc"), b"partial").unwrap();
    // The holder dies between staging and commit
    drop(token);

    assert!(store.lookup(&target).is_none());
    let status = store.status(&target).unwrap().unwrap();
    assert_eq!(status.status, EntryStatus::Reserved);

    let report = store.gc(|_| true, false).unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.skipped_reserved, 1);
    assert!(store.status(&target).unwrap().is_some());
}

#[test]
fn test_stale_reservation_can_be_rebuilt() {
    let project = TestProject::new();
    let store = project.store();
    let target = hash('c');

    let Reservation::Claimed(token) = store.reserve(&target, "glibc", "2.41.0").unwrap() else {
        panic!("expected a fresh reservation");
    };
    drop(token);

    let impatient = Store::open(project.store_path())
        .unwrap()
        .with_stale_after(std::time::Duration::ZERO);
    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(matches!(
        impatient.reserve(&target, "glibc", "2.41.0").unwrap(),
        Reservation::Claimed(_)
    ));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_reservation_of_exited_builder_is_rebuilt() {
    let project = TestProject::new();
    let plan = project.plan(SAMPLE_CATALOG, &["glibc"]);
    let glibc = plan.by_name("glibc").unwrap();
    let store = project.store();

    // A builder claims glibc and dies mid-build
    let Reservation::Claimed(token) = store.reserve(&glibc.hash, "glibc", "2.41.0").unwrap() else {
        panic!("expected a fresh reservation");
    };
    drop(token);
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    let lock = project
        .store_path()
        .join("v1/locks")
        .join(format!("{}.lock", glibc.hash));
    let mut record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&lock).unwrap()).unwrap();
    record["pid"] = serde_json::json!(dead_pid);
    std::fs::write(&lock, serde_json::to_vec(&record).unwrap()).unwrap();
    assert_eq!(store.status(&glibc.hash).unwrap().unwrap().status, EntryStatus::Reserved);

    // The next run under the default stale age takes it over
    let capability = FakeCapability::new();
    let orch = orchestrator(&project.store_path(), capability.clone(), 2);
    let report = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;

    assert!(report.success(), "{report:?}");
    assert!(report.built.contains(&"glibc@2.41.0".to_string()));
    assert!(store.lookup(&glibc.hash).is_some());
    assert!(!store.is_locked(&glibc.hash));
}

#[test]
fn test_store_info_on_empty_store() {
    let project = TestProject::new();
    let output = project.run(&["store", "info", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["complete"], 0);
    assert_eq!(info["reserved"], 0);
}

#[tokio::test]
async fn test_store_list_and_gc_through_cli() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let plan = project.plan(SAMPLE_CATALOG, &["glibc"]);
    let capability = FakeCapability::new();
    let orch = orchestrator(&project.store_path(), capability, 2);
    assert!(orch.run(&plan, &CancellationToken::new(), |_, _| {}).await.success());

    let listed = project.run(&["store", "list"]);
    assert!(listed.status.success(), "stderr: {}", stderr(&listed));
    let text = stdout(&listed);
    assert!(text.contains("glibc"));
    assert!(text.contains("binutils"));
    assert!(text.contains("linux-headers"));

    // Keeping the glibc plan removes nothing
    let kept = project.run(&["gc", "--json", "--target", "x86_64", "glibc"]);
    assert!(kept.status.success(), "stderr: {}", stderr(&kept));
    let report: serde_json::Value = serde_json::from_slice(&kept.stdout).unwrap();
    assert_eq!(report["removed"].as_array().unwrap().len(), 0);

    // Keeping only binutils removes glibc and the headers
    let pruned = project.run(&["gc", "--json", "--dry-run", "--target", "x86_64", "binutils"]);
    let report: serde_json::Value = serde_json::from_slice(&pruned.stdout).unwrap();
    assert_eq!(report["removed"].as_array().unwrap().len(), 2);
    assert_eq!(report["dry_run"], true);
    assert_eq!(project.store().list().unwrap().len(), 3);

    let all = project.run(&["gc", "--all"]);
    assert!(all.status.success(), "stderr: {}", stderr(&all));
    assert!(project.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_gc_without_selection_removes_failed_entries_only() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let plan = project.plan(SAMPLE_CATALOG, &["glibc"]);
    let orch = orchestrator(&project.store_path(), FakeCapability::failing(&["glibc"]), 2);
    let report = orch.run(&plan, &CancellationToken::new(), |_, _| {}).await;
    assert_eq!(report.failed.len(), 1);

    let output = project.run(&["gc", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let gc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let removed = gc["removed"].as_array().unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0]["component"], "glibc");

    let remaining: Vec<_> = project.store().list().unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|e| e.status == EntryStatus::Complete));
}
