//! Integration tests for global output flags
//!
//! - --quiet suppresses everything except errors
//! - --json turns errors into machine-readable objects
//! - -v enables tracing output on stderr

mod common;

use common::{stderr, stdout, TestProject, SAMPLE_CATALOG};

#[test]
fn test_quiet_suppresses_plan_output() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let output = project.run(&["--quiet", "resolve", "gcc"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).trim().is_empty());
}

#[test]
fn test_quiet_still_reports_errors() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let output = project.run(&["-q", "resolve", "musl"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("musl"));
}

#[test]
fn test_json_error_is_an_object() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);
    let output = project.run(&["--json", "resolve", "musl"]);
    assert_eq!(output.status.code(), Some(2));

    let line = stderr(&output)
        .lines()
        .rev()
        .find(|l| l.starts_with('{'))
        .map(str::to_string)
        .expect("JSON error on stderr");
    let error: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert!(error["error"].as_str().unwrap().contains("musl"));
    assert!(error["causes"].is_array());
}

#[test]
fn test_verbose_enables_logging() {
    let project = TestProject::with_catalog(SAMPLE_CATALOG);

    let quiet = project.run(&["resolve", "gcc"]);
    assert!(!stderr(&quiet).contains("INFO"));

    let verbose = project.run(&["-v", "resolve", "gcc"]);
    assert!(verbose.status.success());
    assert!(stderr(&verbose).contains("INFO"));
}

#[test]
fn test_version_flag() {
    let project = TestProject::new();
    let output = project.run(&["--version"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_no_subcommand_prints_help() {
    let project = TestProject::new();
    let output = project.run(&[]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage"));
}
