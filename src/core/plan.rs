//! Build plans
//!
//! A [`BuildPlan`] is the output of resolution: a DAG of [`ResolvedNode`]s
//! keyed by content hash. Nodes refer to their dependencies by hash only, so
//! the plan owns every node exactly once and traversal never chases live
//! references.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use semver::Version;
use serde::Serialize;

use crate::core::component::{ComponentSpec, DependencyKind};
use crate::core::hasher::ContentHash;
use crate::core::target::Target;

/// Edge from a node to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Dependency name
    pub name: String,
    /// How the dependency is used
    pub kind: DependencyKind,
    /// Content hash of the selected dependency node
    pub hash: ContentHash,
}

/// A component bound to an exact version and exact dependency hashes
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    /// Content hash of the full transitive configuration
    pub hash: ContentHash,
    /// The spec the node was resolved from
    pub spec: ComponentSpec,
    /// Selected version
    pub version: Version,
    /// Dependencies, ordered by name
    pub dependencies: Vec<ResolvedDependency>,
    /// Generation in the plan; 0 for nodes without dependencies
    pub level: usize,
}

impl ResolvedNode {
    /// Component name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// `name@version`
    pub fn id(&self) -> String {
        format!("{}@{}", self.spec.name, self.version)
    }
}

/// DAG of resolved nodes with a generation order
#[derive(Debug, Clone)]
pub struct BuildPlan {
    target: Target,
    nodes: BTreeMap<ContentHash, ResolvedNode>,
    roots: Vec<ContentHash>,
    levels: Vec<Vec<ContentHash>>,
}

impl BuildPlan {
    pub(crate) fn new(
        target: Target,
        nodes: BTreeMap<ContentHash, ResolvedNode>,
        roots: Vec<ContentHash>,
        levels: Vec<Vec<ContentHash>>,
    ) -> Self {
        Self {
            target,
            nodes,
            roots,
            levels,
        }
    }

    /// Target every node is built for
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Look up a node
    pub fn node(&self, hash: &ContentHash) -> Option<&ResolvedNode> {
        self.nodes.get(hash)
    }

    /// Nodes of the requested components, in request order
    pub fn roots(&self) -> &[ContentHash] {
        &self.roots
    }

    /// Generations; every node's dependencies sit in earlier generations
    pub fn levels(&self) -> &[Vec<ContentHash>] {
        &self.levels
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the plan is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in build order (level by level, by name within a level)
    pub fn order(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.levels
            .iter()
            .flatten()
            .filter_map(|hash| self.nodes.get(hash))
    }

    /// The node selected for a component name
    pub fn by_name(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes.values().find(|node| node.name() == name)
    }

    /// Nodes that depend directly on `hash`
    pub fn dependents(&self, hash: &ContentHash) -> Vec<&ContentHash> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.dependencies.iter().any(|d| &d.hash == hash))
            .map(|(h, _)| h)
            .collect()
    }

    /// Every node that depends on `hash`, directly or not
    pub fn transitive_dependents(&self, hash: &ContentHash) -> BTreeSet<ContentHash> {
        let mut reverse: BTreeMap<&ContentHash, Vec<&ContentHash>> = BTreeMap::new();
        for (h, node) in &self.nodes {
            for dep in &node.dependencies {
                reverse.entry(&dep.hash).or_default().push(h);
            }
        }

        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([hash]);
        while let Some(current) = queue.pop_front() {
            for dependent in reverse.get(current).into_iter().flatten() {
                if found.insert((*dependent).clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        found
    }

    /// Nodes reachable from the roots
    ///
    /// With `runtime_only`, only runtime edges are followed; build and
    /// development dependencies stay out of the closure.
    pub fn closure(&self, runtime_only: bool) -> BTreeSet<ContentHash> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&ContentHash> = self.roots.iter().collect();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(hash) {
                stack.extend(
                    node.dependencies
                        .iter()
                        .filter(|d| !runtime_only || d.kind == DependencyKind::Runtime)
                        .map(|d| &d.hash),
                );
            }
        }
        seen
    }

    /// Serializable summary for `--json` output
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            target: self.target.triplet(),
            roots: self
                .roots
                .iter()
                .filter_map(|h| self.nodes.get(h))
                .map(ResolvedNode::id)
                .collect(),
            levels: self
                .levels
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .filter_map(|h| self.nodes.get(h))
                        .map(|node| NodeSummary {
                            name: node.name().to_string(),
                            version: node.version.to_string(),
                            hash: node.hash.to_string(),
                            dependencies: node
                                .dependencies
                                .iter()
                                .map(|d| format!("{} ({})", d.name, d.kind.as_str()))
                                .collect(),
                        })
                        .collect()
                })
                .collect(),
        }
    }
}

/// Plan summary
#[derive(Debug, Serialize)]
pub struct PlanSummary {
    /// Target triplet
    pub target: String,
    /// Requested nodes as `name@version`
    pub roots: Vec<String>,
    /// Generations
    pub levels: Vec<Vec<NodeSummary>>,
}

/// One node in a [`PlanSummary`]
#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub version: String,
    pub hash: String,
    pub dependencies: Vec<String>,
}
