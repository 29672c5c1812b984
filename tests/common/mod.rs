//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use weaver::core::catalog::{Catalog, Request};
use weaver::core::orchestrator::{Orchestrator, OrchestratorConfig};
use weaver::core::plan::BuildPlan;
use weaver::core::resolver;
use weaver::core::target::Target;
use weaver::infra::container::{BuildCapability, BuildRequest, CapabilityError, ImageRef};
use weaver::infra::executor::Executor;
use weaver::infra::store::Store;

/// Test project context
///
/// A temporary directory holding a catalog, a config file and a store, so
/// tests never touch the user's real directories.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a project with [`SAMPLE_CATALOG`] as `weaver.toml`
    pub fn with_catalog(catalog: &str) -> Self {
        let project = Self::new();
        project.create_file("weaver.toml", catalog);
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Store root used by this project
    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Run the weaver binary inside the project
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_weaver"))
            .current_dir(self.dir.path())
            .env("WEAVER_STORE_DIR", self.store_path())
            .env("WEAVER_CONFIG", self.dir.path().join("config.toml"))
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("Failed to execute weaver")
    }

    /// Open the project's store
    pub fn store(&self) -> Store {
        Store::open(self.store_path()).expect("Failed to open store")
    }

    /// Resolve requests against a catalog text
    pub fn plan(&self, catalog: &str, requests: &[&str]) -> BuildPlan {
        plan(catalog, requests)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve requests against a catalog text for x86_64
pub fn plan(catalog: &str, requests: &[&str]) -> BuildPlan {
    let catalog = Catalog::from_toml(catalog).expect("Failed to parse catalog");
    let requests: Vec<Request> = requests
        .iter()
        .map(|r| r.parse().expect("Invalid request"))
        .collect();
    resolver::resolve(&requests, &catalog, &Target::for_arch("x86_64")).expect("Failed to resolve")
}

/// stdout as text
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// stderr as text
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Build capability that writes deterministic files instead of running a
/// container engine
///
/// Each build writes `bin/<name>`, `lib/lib<name>.so` and
/// `rootfs/usr/share/<name>/VERSION`, with contents derived from the image
/// tag, so identical configurations produce identical bytes.
#[derive(Default)]
pub struct FakeCapability {
    calls: AtomicUsize,
    built: Mutex<Vec<String>>,
    failing: Vec<String>,
    delay_ms: u64,
}

impl FakeCapability {
    /// A capability that always succeeds
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A capability that fails builds of the named components
    pub fn failing(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: names.iter().map(|n| (*n).to_string()).collect(),
            ..Self::default()
        })
    }

    /// A capability whose builds take `ms` milliseconds
    pub fn slow(ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay_ms: ms,
            ..Self::default()
        })
    }

    /// Number of builds requested
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Component names built, in request order
    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

fn component_of(tag: &str) -> String {
    tag.trim_start_matches("weaver/")
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl BuildCapability for FakeCapability {
    fn name(&self) -> &str {
        "fake"
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageRef, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = component_of(&request.tag);
        self.built.lock().unwrap().push(name.clone());

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.failing.contains(&name) {
            return Err(CapabilityError::BuildFailed {
                engine: "fake".into(),
                code: Some(2),
                stderr: format!("make: *** [{name}] Error 1"),
            });
        }

        if let Some(out) = &request.output_dir {
            write(out, &format!("bin/{name}"), &request.tag);
            write(out, &format!("lib/lib{name}.so"), &request.tag);
            write(out, &format!("rootfs/usr/share/{name}/VERSION"), &request.tag);
        }
        Ok(ImageRef(request.tag.clone()))
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Orchestrator over `store_root` driven by `capability`
pub fn orchestrator(store_root: &Path, capability: Arc<FakeCapability>, jobs: usize) -> Orchestrator {
    let store = Store::open(store_root).expect("Failed to open store");
    let executor = Executor::new(capability, "debian:bookworm-slim").with_build_jobs(2);
    Orchestrator::new(
        store,
        executor,
        OrchestratorConfig {
            jobs,
            ..OrchestratorConfig::default()
        },
    )
}

/// Toolchain catalog: binutils <- glibc <- gcc, with a build-only header
/// dependency and an unrelated `make`
pub const SAMPLE_CATALOG: &str = r#"
[[component]]
name = "binutils"
version = "2.42"
revision = "binutils-2_42"

[[component]]
name = "binutils"
version = "2.40"
revision = "binutils-2_40"

[[component]]
name = "linux-headers"
version = "6.6.0"
revision = "v6.6"

[[component]]
name = "glibc"
version = "2.41.0"
revision = "glibc-2.41"
overridable = ["rootfs/etc/"]
[component.flags]
configure = ["--disable-werror"]
[component.dependencies]
binutils = ">=2.40"
linux-headers = { version = "*", kind = "build" }

[[component]]
name = "gcc"
version = "13.2.0"
revision = "releases/gcc-13.2.0"
[component.flags]
configure = ["--enable-languages=c,c++"]
features = ["lto"]
[component.dependencies]
glibc = "*"
binutils = "*"

[[component]]
name = "make"
version = "4.4.1"
revision = "4.4.1"
"#;

/// Catalog with a dependency cycle
pub const CYCLIC_CATALOG: &str = r#"
[[component]]
name = "a"
version = "1.0.0"
[component.dependencies]
b = "*"

[[component]]
name = "b"
version = "1.0.0"
[component.dependencies]
a = "*"
"#;
