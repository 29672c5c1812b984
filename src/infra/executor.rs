//! Build executor
//!
//! Materializes one plan node: checks that every dependency artifact tree is
//! present, renders the Dockerfile, hands it to the build capability and
//! makes sure the output directory has the artifact layout the store expects.
//! Failures are reported once; retry policy belongs to the orchestrator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::plan::ResolvedNode;
use crate::core::target::Target;
use crate::error::ExecutorError;
use crate::infra::container::{BuildCapability, BuildRequest, ImageRef};
use crate::infra::dockerfile::{self, BuildDockerfile, SOURCE_CONTEXT};
use crate::infra::store::{Artifacts, ARTIFACT_DIRS};

/// Directory inside the output directory holding the build context
const CONTEXT_DIR: &str = ".weaver-context";

/// A completed dependency handed to a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyArtifact {
    /// Dependency name
    pub name: String,
    /// Store entry directory holding `bin/`, `lib/` and `rootfs/`
    pub path: PathBuf,
}

/// Runs builds through a [`BuildCapability`]
#[derive(Clone)]
pub struct Executor {
    capability: Arc<dyn BuildCapability>,
    base_image: String,
    build_jobs: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("capability", &self.capability.name())
            .field("base_image", &self.base_image)
            .field("build_jobs", &self.build_jobs)
            .finish()
    }
}

impl Executor {
    /// Create an executor
    pub fn new(capability: Arc<dyn BuildCapability>, base_image: impl Into<String>) -> Self {
        Self {
            capability,
            base_image: base_image.into(),
            build_jobs: num_cpus::get(),
        }
    }

    /// Parallel jobs passed to each build as `{jobs}`
    #[must_use]
    pub fn with_build_jobs(mut self, jobs: usize) -> Self {
        self.build_jobs = jobs.max(1);
        self
    }

    /// Name of the underlying capability
    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    /// Image tag for a node
    pub fn image_tag(node: &ResolvedNode) -> String {
        format!("weaver/{}:{}", node.name(), node.hash.short())
    }

    /// Check every declared dependency has a complete artifact tree
    fn check_dependencies<'a>(
        node: &ResolvedNode,
        dependencies: &'a [DependencyArtifact],
    ) -> Result<BTreeMap<String, &'a Path>, ExecutorError> {
        let mut contexts = BTreeMap::new();
        for dep in &node.dependencies {
            let artifact = dependencies.iter().find(|a| a.name == dep.name);
            let path = artifact.map(|a| a.path.clone()).unwrap_or_default();

            let missing = match artifact {
                None => true,
                Some(a) => ARTIFACT_DIRS.iter().any(|d| !a.path.join(d).is_dir()),
            };
            if missing {
                return Err(ExecutorError::DependencyArtifactMissing {
                    component: node.id(),
                    dependency: dep.name.clone(),
                    path,
                });
            }
            if let Some(artifact) = artifact {
                contexts.insert(dockerfile::dependency_context(&dep.name), artifact.path.as_path());
            }
        }
        Ok(contexts)
    }

    /// Build a node into `output_dir`
    pub async fn build(
        &self,
        node: &ResolvedNode,
        target: &Target,
        dependencies: &[DependencyArtifact],
        output_dir: &Path,
    ) -> Result<Artifacts, ExecutorError> {
        let contexts = Self::check_dependencies(node, dependencies)?;
        let context_error = |path: &Path, e: std::io::Error| ExecutorError::Context {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let mut named_contexts: BTreeMap<String, PathBuf> = contexts
            .into_iter()
            .map(|(name, path)| (name, path.to_path_buf()))
            .collect();
        if let Some(source) = &node.spec.source {
            if !source.is_dir() {
                return Err(ExecutorError::Context {
                    path: source.clone(),
                    error: "source tree does not exist".to_string(),
                });
            }
            named_contexts.insert(SOURCE_CONTEXT.to_string(), source.clone());
        }

        let text = BuildDockerfile {
            node,
            target,
            base_image: &self.base_image,
            jobs: self.build_jobs,
            has_source: node.spec.source.is_some(),
        }
        .render();

        let context_dir = output_dir.join(CONTEXT_DIR);
        tokio::fs::create_dir_all(&context_dir)
            .await
            .map_err(|e| context_error(&context_dir, e))?;
        let dockerfile_path = context_dir.join("Dockerfile");
        tokio::fs::write(&dockerfile_path, &text)
            .await
            .map_err(|e| context_error(&dockerfile_path, e))?;

        let request = BuildRequest {
            tag: Self::image_tag(node),
            dockerfile: text,
            context_dir: context_dir.clone(),
            output_dir: Some(output_dir.to_path_buf()),
            named_contexts,
            build_args: BTreeMap::new(),
        };

        tracing::info!(
            "Building {} ({}) with {}",
            node.id(),
            node.hash.short(),
            self.capability.name()
        );

        let image = self
            .capability
            .build_image(&request)
            .await
            .map_err(|e| ExecutorError::ExternalBuildFailed {
                component: node.id(),
                message: e.to_string(),
            })?;

        for dir in ARTIFACT_DIRS {
            let path = output_dir.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| context_error(&path, e))?;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&context_dir).await {
            tracing::debug!("Leaving build context '{}': {}", context_dir.display(), e);
        }

        Ok(Artifacts {
            root: output_dir.to_path_buf(),
            image_ref: Some(image.0),
        })
    }

    /// Build a `FROM scratch` image from an assembled tree's `rootfs/`
    pub async fn build_runtime_image(
        &self,
        assembled: &Path,
        tag: &str,
    ) -> Result<ImageRef, ExecutorError> {
        let request = BuildRequest {
            tag: tag.to_string(),
            dockerfile: dockerfile::runtime_image(),
            context_dir: assembled.to_path_buf(),
            ..BuildRequest::default()
        };

        tracing::info!("Building runtime image {}", tag);
        self.capability
            .build_image(&request)
            .await
            .map_err(|e| ExecutorError::ExternalBuildFailed {
                component: tag.to_string(),
                message: e.to_string(),
            })
    }
}
