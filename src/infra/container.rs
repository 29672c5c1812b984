//! Container build capability
//!
//! Weaver never runs compilers itself. Every build goes through one
//! capability: "build an image from a Dockerfile and a build context". The
//! default implementation drives the Docker or Podman CLI with BuildKit named
//! contexts and a local exporter, so the image's final stage lands on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Lines of engine stderr kept in error messages
const STDERR_TAIL_LINES: usize = 30;

/// Build capability errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No container engine on PATH
    #[error("Neither Docker nor Podman found in PATH")]
    EngineNotFound,

    /// Unknown engine name in configuration
    #[error("Unknown container engine '{name}': expected docker, podman or auto")]
    UnknownEngine { name: String },

    /// Engine process could not be started or fed
    #[error("Failed to run {engine}: {message}")]
    Spawn { engine: String, message: String },

    /// Engine reported a failed build
    #[error("{engine} build exited with {}: {stderr}", code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    BuildFailed {
        engine: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Reference to a built image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(pub String);

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One image build
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Image tag
    pub tag: String,
    /// Dockerfile text, sent on stdin
    pub dockerfile: String,
    /// Main build context directory
    pub context_dir: PathBuf,
    /// Export the final stage to this directory
    pub output_dir: Option<PathBuf>,
    /// Extra named contexts (`--build-context name=path`)
    pub named_contexts: BTreeMap<String, PathBuf>,
    /// Build arguments
    pub build_args: BTreeMap<String, String>,
}

/// The only channel to the container engine
#[async_trait]
pub trait BuildCapability: Send + Sync {
    /// Engine name for messages
    fn name(&self) -> &str;

    /// Build an image
    async fn build_image(&self, request: &BuildRequest) -> Result<ImageRef, CapabilityError>;
}

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Docker with BuildKit
    Docker,
    /// Podman
    Podman,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// First runtime found on PATH, Docker preferred
    pub fn detect() -> Option<Self> {
        [Self::Docker, Self::Podman]
            .into_iter()
            .find(|runtime| which::which(runtime.command()).is_ok())
    }

    /// Runtime for a configured engine name; `auto` detects
    pub fn select(name: Option<&str>) -> Result<Self, CapabilityError> {
        match name.map(str::trim) {
            None | Some("" | "auto") => Self::detect().ok_or(CapabilityError::EngineNotFound),
            Some(name) => name.parse(),
        }
    }
}

impl FromStr for ContainerRuntime {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(CapabilityError::UnknownEngine {
                name: s.to_string(),
            }),
        }
    }
}

/// [`BuildCapability`] backed by the Docker or Podman CLI
#[derive(Debug, Clone)]
pub struct ContainerEngine {
    runtime: ContainerRuntime,
}

impl ContainerEngine {
    /// Create an engine for a runtime
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Runtime in use
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Command line arguments for a build
    pub fn build_args(&self, request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            "-".to_string(),
            "--tag".to_string(),
            request.tag.clone(),
        ];

        for (name, path) in &request.named_contexts {
            args.push("--build-context".to_string());
            args.push(format!("{name}={}", path.display()));
        }

        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }

        if let Some(output) = &request.output_dir {
            args.push("--output".to_string());
            args.push(format!("type=local,dest={}", output.display()));
        }

        args.push(request.context_dir.display().to_string());
        args
    }
}

#[async_trait]
impl BuildCapability for ContainerEngine {
    fn name(&self) -> &str {
        self.runtime.command()
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageRef, CapabilityError> {
        let engine = self.runtime.command();
        let spawn_error = |e: std::io::Error| CapabilityError::Spawn {
            engine: engine.to_string(),
            message: e.to_string(),
        };

        tracing::debug!("{} {}", engine, self.build_args(request).join(" "));

        let mut child = Command::new(engine)
            .args(self.build_args(request))
            .env("DOCKER_BUILDKIT", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.dockerfile.as_bytes())
                .await
                .map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(CapabilityError::BuildFailed {
                engine: engine.to_string(),
                code: output.status.code(),
                stderr: stderr_tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(ImageRef(request.tag.clone()))
    }
}

/// Last lines of engine output
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
