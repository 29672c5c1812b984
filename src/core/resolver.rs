//! Dependency resolution
//!
//! Turns a set of requests into a [`BuildPlan`]:
//!
//! 1. version selection by fixpoint iteration over the catalog
//! 2. conflict and cycle checks on the selected graph
//! 3. generation (level) order
//! 4. content hashes, computed in generation order so every dependency hash
//!    exists before its dependents are hashed

use std::collections::{BTreeMap, BTreeSet, HashMap};

use semver::Version;

use crate::core::catalog::{Catalog, Request};
use crate::core::component::ComponentSpec;
use crate::core::hasher::{self, ContentHash, NodeConfig};
use crate::core::plan::{BuildPlan, ResolvedDependency, ResolvedNode};
use crate::core::target::Target;
use crate::core::version::VersionRange;
use crate::error::{Requirement, ResolverError};

/// Requirer name used for constraints coming from the request itself
const REQUEST_REQUIRER: &str = "<request>";

/// Dependency graph over component names
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Adjacency list: component -> dependencies, both sorted
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component and its dependencies
    pub fn add_component(&mut self, name: &str, dependencies: impl IntoIterator<Item = String>) {
        let deps: BTreeSet<String> = dependencies.into_iter().collect();
        for dep in &deps {
            self.edges.entry(dep.clone()).or_default();
        }
        self.edges.entry(name.to_string()).or_default().extend(deps);
    }

    /// Find a cycle, if any
    ///
    /// Iterative depth-first search with an explicit stack. The returned path
    /// starts and ends with the same component.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            OnStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in self.edges.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }

            // (node, its dependencies, index of the next dependency to visit)
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            marks.insert(start.as_str(), Mark::OnStack);
            stack.push((start.as_str(), self.dependencies(start), 0));

            while let Some((node, deps, next)) = stack.last_mut() {
                let Some(&dep) = deps.get(*next) else {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                    continue;
                };
                *next += 1;

                match marks.get(dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::OnStack) => {
                        let from = stack
                            .iter()
                            .position(|(n, _, _)| *n == dep)
                            .unwrap_or_default();
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|(n, _, _)| (*n).to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    None => {
                        marks.insert(dep, Mark::OnStack);
                        stack.push((dep, self.dependencies(dep), 0));
                    }
                }
            }
        }

        None
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Generations in Kahn order
    ///
    /// Level 0 holds components without dependencies; a component sits one
    /// level above its deepest dependency. Names are sorted within a level.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, ResolverError> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ResolverError::CyclicDependency { cycle });
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut current: Vec<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut levels = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for name in &current {
                for dependent in dependents.get(name).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            next.sort_unstable();
            levels.push(current.iter().map(|s| (*s).to_string()).collect());
            current = next;
        }

        Ok(levels)
    }

    fn dependencies(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

struct Constraint {
    requirer: String,
    range: VersionRange,
}

fn requirements(constraints: &[Constraint]) -> Vec<Requirement> {
    constraints
        .iter()
        .map(|c| Requirement {
            requirer: c.requirer.clone(),
            range: c.range.to_string(),
        })
        .collect()
}

/// Collect constraints from the requests and from the currently selected specs
fn collect_constraints(
    requests: &[Request],
    catalog: &Catalog,
    selection: &BTreeMap<String, Version>,
) -> BTreeMap<String, Vec<Constraint>> {
    let mut constraints: BTreeMap<String, Vec<Constraint>> = BTreeMap::new();

    for request in requests {
        constraints
            .entry(request.name.clone())
            .or_default()
            .push(Constraint {
                requirer: REQUEST_REQUIRER.to_string(),
                range: request.range.clone(),
            });
    }

    for (name, version) in selection {
        let Some(spec) = catalog.get(name, version) else {
            continue;
        };
        for (dep, decl) in &spec.dependencies {
            // Ranges are validated when the catalog is loaded
            let range = decl.parse_range().unwrap_or_else(|_| VersionRange::any());
            constraints.entry(dep.clone()).or_default().push(Constraint {
                requirer: format!("{name}@{version}"),
                range,
            });
        }
    }

    constraints
}

/// Highest catalog version satisfying every constraint
fn select(
    name: &str,
    constraints: &[Constraint],
    catalog: &Catalog,
) -> Result<Version, ResolverError> {
    if !catalog.contains(name) {
        let mut required_by: Vec<String> = constraints.iter().map(|c| c.requirer.clone()).collect();
        required_by.dedup();
        return Err(ResolverError::UnknownComponent {
            component: name.to_string(),
            required_by,
        });
    }

    catalog
        .versions(name)
        .iter()
        .find(|entry| constraints.iter().all(|c| c.range.matches(&entry.version)))
        .map(|entry| entry.version.clone())
        .ok_or_else(|| ResolverError::VersionConflict {
            component: name.to_string(),
            requirements: requirements(constraints),
        })
}

/// Drop selected components no longer reachable from the requests
fn prune(
    requests: &[Request],
    catalog: &Catalog,
    selection: &mut BTreeMap<String, Version>,
) {
    let mut reachable = BTreeSet::new();
    let mut stack: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
    while let Some(name) = stack.pop() {
        if !reachable.insert(name.to_string()) {
            continue;
        }
        if let Some(spec) = selection.get(name).and_then(|v| catalog.get(name, v)) {
            stack.extend(spec.dependencies.keys().map(String::as_str));
        }
    }
    selection.retain(|name, _| reachable.contains(name));
}

/// Select one version per component
///
/// Each round recomputes every constraint from the requests and the
/// dependency declarations of the current selection, then selects the
/// highest satisfying version per component in lexical order. Stops once a
/// round changes nothing.
pub fn select_versions(
    requests: &[Request],
    catalog: &Catalog,
) -> Result<BTreeMap<String, Version>, ResolverError> {
    let max_rounds = catalog.len() * 2 + 2;
    let mut selection: BTreeMap<String, Version> = BTreeMap::new();

    for round in 0..max_rounds {
        let constraints = collect_constraints(requests, catalog, &selection);

        let mut next = BTreeMap::new();
        for (name, constraints) in &constraints {
            next.insert(name.clone(), select(name, constraints, catalog)?);
        }
        prune(requests, catalog, &mut next);

        if next == selection {
            tracing::debug!("Version selection converged after {} rounds", round + 1);
            return Ok(selection);
        }
        selection = next;
    }

    // No fixpoint: report the component whose version kept changing
    let constraints = collect_constraints(requests, catalog, &selection);
    let previous = selection.clone();
    let mut next = BTreeMap::new();
    for (name, constraints) in &constraints {
        next.insert(name.clone(), select(name, constraints, catalog)?);
    }
    let unstable = next
        .iter()
        .find(|(name, version)| previous.get(*name) != Some(*version))
        .map(|(name, _)| name.clone())
        .unwrap_or_default();

    Err(ResolverError::VersionConflict {
        requirements: constraints
            .get(&unstable)
            .map(Vec::as_slice)
            .map(requirements)
            .unwrap_or_default(),
        component: unstable,
    })
}

fn check_conflicts(
    selection: &BTreeMap<String, &ComponentSpec>,
) -> Result<(), ResolverError> {
    for (name, spec) in selection {
        if let Some(other) = spec
            .conflicts_with
            .iter()
            .find(|other| selection.contains_key(*other))
        {
            return Err(ResolverError::ComponentConflict {
                component: name.clone(),
                other: other.clone(),
            });
        }
    }
    Ok(())
}

/// Resolve requests against a catalog into a build plan
pub fn resolve(
    requests: &[Request],
    catalog: &Catalog,
    target: &Target,
) -> Result<BuildPlan, ResolverError> {
    if requests.is_empty() {
        return Ok(BuildPlan::new(
            target.clone(),
            BTreeMap::new(),
            Vec::new(),
            Vec::new(),
        ));
    }

    let versions = select_versions(requests, catalog)?;

    let specs: BTreeMap<String, &ComponentSpec> = versions
        .iter()
        .filter_map(|(name, version)| catalog.get(name, version).map(|spec| (name.clone(), spec)))
        .collect();

    check_conflicts(&specs)?;

    let mut graph = DependencyGraph::new();
    for (name, spec) in &specs {
        graph.add_component(name, spec.dependencies.keys().cloned());
    }
    let name_levels = graph.levels()?;

    let mut hashes: BTreeMap<String, ContentHash> = BTreeMap::new();
    let mut nodes = BTreeMap::new();
    let mut levels = Vec::with_capacity(name_levels.len());

    for (level, names) in name_levels.iter().enumerate() {
        let mut level_hashes = Vec::with_capacity(names.len());
        for name in names {
            let Some(spec) = specs.get(name) else {
                continue;
            };

            let dep_hashes: BTreeMap<String, ContentHash> = spec
                .dependencies
                .keys()
                .filter_map(|dep| hashes.get(dep).map(|h| (dep.clone(), h.clone())))
                .collect();

            let hash = hasher::hash(&NodeConfig {
                spec,
                target,
                dependencies: &dep_hashes,
            })?;

            let dependencies = spec
                .dependencies
                .iter()
                .filter_map(|(dep, decl)| {
                    dep_hashes.get(dep).map(|h| ResolvedDependency {
                        name: dep.clone(),
                        kind: decl.kind(),
                        hash: h.clone(),
                    })
                })
                .collect();

            tracing::debug!("Resolved {}@{} -> {}", name, versions[name], hash.short());

            hashes.insert(name.clone(), hash.clone());
            nodes.insert(
                hash.clone(),
                ResolvedNode {
                    hash: hash.clone(),
                    spec: (*spec).clone(),
                    version: versions[name].clone(),
                    dependencies,
                    level,
                },
            );
            level_hashes.push(hash);
        }
        levels.push(level_hashes);
    }

    let mut roots: Vec<ContentHash> = Vec::new();
    for request in requests {
        if let Some(hash) = hashes.get(&request.name) {
            if !roots.contains(hash) {
                roots.push(hash.clone());
            }
        }
    }

    tracing::info!(
        "Resolved {} component(s) in {} level(s) for {}",
        nodes.len(),
        levels.len(),
        target
    );

    Ok(BuildPlan::new(target.clone(), nodes, roots, levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::component::DependencyKind;

    fn catalog(specs: Vec<ComponentSpec>) -> Catalog {
        Catalog::from_specs(specs).unwrap()
    }

    fn requests(names: &[&str]) -> Vec<Request> {
        names.iter().map(|n| n.parse().unwrap()).collect()
    }

    fn position(plan: &BuildPlan, name: &str) -> usize {
        plan.order().position(|n| n.name() == name).unwrap()
    }

    #[test]
    fn test_simple_dependency_order() {
        let mut graph = DependencyGraph::new();
        graph.add_component("app", vec!["lib".to_string()]);
        graph.add_component("lib", vec![]);

        let levels = graph.levels().unwrap();
        assert_eq!(levels, vec![vec!["lib".to_string()], vec!["app".to_string()]]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let mut graph = DependencyGraph::new();
        graph.add_component("a", vec!["b".to_string()]);
        graph.add_component("b", vec!["c".to_string()]);
        graph.add_component("c", vec!["a".to_string()]);

        assert!(graph.has_cycle());
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_diamond_levels_share_generation() {
        let mut graph = DependencyGraph::new();
        graph.add_component("top", vec!["left".into(), "right".into()]);
        graph.add_component("left", vec!["base".into()]);
        graph.add_component("right", vec!["base".into()]);

        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1], vec!["left".to_string(), "right".to_string()]);
    }

    #[test]
    fn test_toolchain_order() {
        let cat = catalog(vec![
            ComponentSpec::new("binutils", "2.42"),
            ComponentSpec::new("glibc", "2.41").with_dependency("binutils", ">=2.40"),
            ComponentSpec::new("gcc", "13.2.0").with_dependency("glibc", "*"),
        ]);
        let plan = resolve(&requests(&["gcc", "binutils", "glibc"]), &cat, &Target::default()).unwrap();

        assert!(position(&plan, "binutils") < position(&plan, "glibc"));
        assert!(position(&plan, "glibc") < position(&plan, "gcc"));
        assert_eq!(plan.roots().len(), 3);
    }

    #[test]
    fn test_cycle_names_both_components() {
        let cat = catalog(vec![
            ComponentSpec::new("a", "1.0").with_dependency("b", "*"),
            ComponentSpec::new("b", "1.0").with_dependency("a", "*"),
        ]);
        match resolve(&requests(&["a"]), &cat, &Target::default()) {
            Err(ResolverError::CyclicDependency { cycle }) => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_version_conflict_names_requirers() {
        let cat = catalog(vec![
            ComponentSpec::new("dep", "1.5"),
            ComponentSpec::new("dep", "2.1"),
            ComponentSpec::new("x", "1.0").with_dependency("dep", ">=2"),
            ComponentSpec::new("y", "1.0").with_dependency("dep", "<2"),
        ]);
        match resolve(&requests(&["x", "y"]), &cat, &Target::default()) {
            Err(ResolverError::VersionConflict {
                component,
                requirements,
            }) => {
                assert_eq!(component, "dep");
                let requirers: Vec<&str> = requirements.iter().map(|r| r.requirer.as_str()).collect();
                assert!(requirers.contains(&"x@1.0.0"));
                assert!(requirers.contains(&"y@1.0.0"));
            }
            other => panic!("expected version conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_selects_highest_satisfying_version() {
        let cat = catalog(vec![
            ComponentSpec::new("binutils", "2.40"),
            ComponentSpec::new("binutils", "2.41"),
            ComponentSpec::new("binutils", "2.42"),
            ComponentSpec::new("glibc", "2.41").with_dependency("binutils", "<2.42"),
        ]);

        let plan = resolve(&requests(&["glibc"]), &cat, &Target::default()).unwrap();
        assert_eq!(plan.by_name("binutils").unwrap().version, Version::new(2, 41, 0));

        let plan = resolve(&requests(&["binutils@latest"]), &cat, &Target::default()).unwrap();
        assert_eq!(plan.by_name("binutils").unwrap().version, Version::new(2, 42, 0));

        let plan = resolve(&requests(&["binutils@2.40"]), &cat, &Target::default()).unwrap();
        assert_eq!(plan.by_name("binutils").unwrap().version, Version::new(2, 40, 0));
    }

    #[test]
    fn test_later_constraint_lowers_selection() {
        // `c` is first selected at 2.0 from the request, then `a`'s
        // declaration pulls it down to 1.0 on the next round.
        let cat = catalog(vec![
            ComponentSpec::new("c", "1.0"),
            ComponentSpec::new("c", "2.0"),
            ComponentSpec::new("a", "1.0").with_dependency("c", "<2"),
            ComponentSpec::new("root", "1.0")
                .with_dependency("a", "*")
                .with_dependency("c", "*"),
        ]);
        let plan = resolve(&requests(&["root"]), &cat, &Target::default()).unwrap();
        assert_eq!(plan.by_name("c").unwrap().version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_dependency_switch_prunes_unused_components() {
        // app@2 would pull `old`, but the request pins app below 2
        let cat = catalog(vec![
            ComponentSpec::new("old", "1.0"),
            ComponentSpec::new("app", "1.0"),
            ComponentSpec::new("app", "2.0").with_dependency("old", "*"),
        ]);
        let plan = resolve(&requests(&["app@<2"]), &cat, &Target::default()).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.by_name("old").is_none());
    }

    #[test]
    fn test_unknown_component() {
        let cat = catalog(vec![ComponentSpec::new("gcc", "13.2").with_dependency("mpfr", "*")]);
        match resolve(&requests(&["gcc"]), &cat, &Target::default()) {
            Err(ResolverError::UnknownComponent {
                component,
                required_by,
            }) => {
                assert_eq!(component, "mpfr");
                assert_eq!(required_by, vec!["gcc@13.2.0"]);
            }
            other => panic!("expected unknown component, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_conflict() {
        let mut glibc = ComponentSpec::new("glibc", "2.41");
        glibc.conflicts_with = vec!["musl".into()];
        let cat = catalog(vec![glibc, ComponentSpec::new("musl", "1.2.5")]);

        assert!(matches!(
            resolve(&requests(&["glibc", "musl"]), &cat, &Target::default()),
            Err(ResolverError::ComponentConflict { .. })
        ));
    }

    #[test]
    fn test_moving_revision_is_rejected() {
        let mut gcc = ComponentSpec::new("gcc", "14.0");
        gcc.revision = Some("master".into());
        let cat = catalog(vec![gcc]);
        assert!(matches!(
            resolve(&requests(&["gcc"]), &cat, &Target::default()),
            Err(ResolverError::Hash(_))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let cat = catalog(vec![
            ComponentSpec::new("zlib", "1.3.1"),
            ComponentSpec::new("openssl", "3.2").with_dependency("zlib", "*"),
            ComponentSpec::new("curl", "8.6")
                .with_dependency("openssl", "*")
                .with_dependency("zlib", "*"),
        ]);
        let target = Target::for_arch("aarch64");
        let a = resolve(&requests(&["curl"]), &cat, &target).unwrap();
        let b = resolve(&requests(&["curl"]), &cat, &target).unwrap();

        assert_eq!(a.levels(), b.levels());
        assert_eq!(a.roots(), b.roots());
    }

    #[test]
    fn test_dependency_change_propagates_to_dependents() {
        let target = Target::default();
        let base = catalog(vec![
            ComponentSpec::new("zlib", "1.3.1"),
            ComponentSpec::new("curl", "8.6").with_dependency("zlib", "*"),
        ]);
        let mut patched_zlib = ComponentSpec::new("zlib", "1.3.1");
        patched_zlib.flags.cflags = vec!["-O3".into()];
        let patched = catalog(vec![
            patched_zlib,
            ComponentSpec::new("curl", "8.6").with_dependency("zlib", "*"),
        ]);

        let a = resolve(&requests(&["curl"]), &base, &target).unwrap();
        let b = resolve(&requests(&["curl"]), &patched, &target).unwrap();
        assert_ne!(a.by_name("curl").unwrap().hash, b.by_name("curl").unwrap().hash);
    }

    #[test]
    fn test_dependency_kinds_recorded() {
        let cat = catalog(vec![
            ComponentSpec::new("linux-headers", "6.6"),
            ComponentSpec::new("glibc", "2.41").with_dependency_kind(
                "linux-headers",
                "*",
                DependencyKind::Build,
            ),
        ]);
        let plan = resolve(&requests(&["glibc"]), &cat, &Target::default()).unwrap();
        let glibc = plan.by_name("glibc").unwrap();
        assert_eq!(glibc.dependencies[0].kind, DependencyKind::Build);

        assert_eq!(plan.closure(false).len(), 2);
        assert_eq!(plan.closure(true).len(), 1);
    }

    #[test]
    fn test_transitive_dependents() {
        let cat = catalog(vec![
            ComponentSpec::new("binutils", "2.42"),
            ComponentSpec::new("glibc", "2.41").with_dependency("binutils", "*"),
            ComponentSpec::new("gcc", "13.2.0").with_dependency("glibc", "*"),
            ComponentSpec::new("make", "4.4"),
        ]);
        let plan = resolve(&requests(&["gcc", "make"]), &cat, &Target::default()).unwrap();
        let binutils = &plan.by_name("binutils").unwrap().hash;

        let dependents = plan.transitive_dependents(binutils);
        assert_eq!(dependents.len(), 2);
        assert!(!dependents.contains(&plan.by_name("make").unwrap().hash));
        assert_eq!(plan.dependents(binutils).len(), 1);
    }
}
