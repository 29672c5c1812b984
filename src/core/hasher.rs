//! Content hashing of resolved build configurations
//!
//! A node's hash covers everything that can change its build output: name,
//! exact version, revision, target, flags, recipe and the hashes of its
//! dependencies. Because dependency hashes are inputs, the hash is a digest
//! of the whole transitive configuration.
//!
//! The configuration is serialized canonically before hashing:
//! - struct fields in a fixed order, maps as `BTreeMap`
//! - feature sets sorted and deduplicated
//! - every flag and command whitespace-normalized, empty ones dropped
//! - positional flag lists keep their order (`-O2 -O0` is not `-O0 -O2`)

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::component::{ComponentSpec, RecipeKind};
use crate::core::target::Target;
use crate::core::version;
use crate::error::HashError;

/// Domain prefix; bump when the canonical form changes
pub const HASH_DOMAIN: &str = "weaver-config-v1";

/// Length of the short form used in logs and image tags
const SHORT_LEN: usize = 12;

/// SHA-256 content hash, lowercase hex
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a 64 character lowercase hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(hex.to_string()))
    }

    /// Full hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Everything the hash of one node depends on
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig<'a> {
    /// Component at an exact version
    pub spec: &'a ComponentSpec,
    /// Plan target
    pub target: &'a Target,
    /// Hash of every declared dependency, by name
    pub dependencies: &'a BTreeMap<String, ContentHash>,
}

#[derive(Serialize)]
struct CanonicalConfig<'a> {
    domain: &'static str,
    name: &'a str,
    version: String,
    revision: Option<&'a str>,
    target: String,
    flags: CanonicalFlags,
    recipe: CanonicalRecipe<'a>,
    dependencies: BTreeMap<&'a str, CanonicalDependency<'a>>,
}

#[derive(Serialize)]
struct CanonicalFlags {
    cflags: Vec<String>,
    cxxflags: Vec<String>,
    ldflags: Vec<String>,
    configure: Vec<String>,
    make: Vec<String>,
    features: Vec<String>,
    env: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct CanonicalRecipe<'a> {
    kind: RecipeKind,
    base_image: Option<&'a str>,
    setup: Vec<String>,
    steps: Vec<String>,
    install_targets: Vec<String>,
}

#[derive(Serialize)]
struct CanonicalDependency<'a> {
    kind: &'static str,
    hash: &'a str,
}

/// Collapse whitespace runs and trim
fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| normalize(v))
        .filter(|v| !v.is_empty())
        .collect()
}

fn unresolved(spec: &ComponentSpec, reason: impl Into<String>) -> HashError {
    HashError::UnresolvedConfig {
        component: spec.name.clone(),
        reason: reason.into(),
    }
}

/// Hash a fully resolved node configuration
///
/// Fails with [`HashError::UnresolvedConfig`] when the version is not an
/// exact version, the revision is a moving alias, or the dependency hashes
/// do not match the declared dependencies one to one.
pub fn hash(config: &NodeConfig<'_>) -> Result<ContentHash, HashError> {
    let spec = config.spec;

    if version::is_moving_alias(&spec.version) {
        return Err(unresolved(
            spec,
            format!("version '{}' is a moving alias", spec.version),
        ));
    }
    let exact = spec
        .parsed_version()
        .map_err(|e| unresolved(spec, e.to_string()))?;

    let revision = match spec.revision.as_deref().map(str::trim) {
        Some("") => return Err(unresolved(spec, "revision is empty")),
        Some(rev) if version::is_moving_alias(rev) => {
            return Err(unresolved(
                spec,
                format!("revision '{rev}' is a moving alias, pin a commit or tag"),
            ))
        }
        other => other,
    };

    let mut dependencies = BTreeMap::new();
    for (name, decl) in &spec.dependencies {
        let dep_hash = config
            .dependencies
            .get(name)
            .ok_or_else(|| unresolved(spec, format!("dependency '{name}' has no resolved hash")))?;
        dependencies.insert(
            name.as_str(),
            CanonicalDependency {
                kind: decl.kind().as_str(),
                hash: dep_hash.as_str(),
            },
        );
    }
    if let Some(extra) = config
        .dependencies
        .keys()
        .find(|name| !spec.dependencies.contains_key(*name))
    {
        return Err(unresolved(
            spec,
            format!("hash supplied for undeclared dependency '{extra}'"),
        ));
    }

    let mut features: Vec<String> = spec
        .flags
        .features
        .iter()
        .map(|f| normalize(f))
        .filter(|f| !f.is_empty())
        .collect();
    features.sort();
    features.dedup();

    let canonical = CanonicalConfig {
        domain: HASH_DOMAIN,
        name: &spec.name,
        version: exact.to_string(),
        revision,
        target: config.target.triplet(),
        flags: CanonicalFlags {
            cflags: normalize_list(&spec.flags.cflags),
            cxxflags: normalize_list(&spec.flags.cxxflags),
            ldflags: normalize_list(&spec.flags.ldflags),
            configure: normalize_list(&spec.flags.configure),
            make: normalize_list(&spec.flags.make),
            features,
            env: spec
                .flags
                .env
                .iter()
                .map(|(k, v)| (k.trim().to_string(), normalize(v)))
                .collect(),
        },
        recipe: CanonicalRecipe {
            kind: spec.recipe.kind,
            base_image: spec.recipe.base_image.as_deref().map(str::trim),
            setup: normalize_list(&spec.recipe.setup),
            steps: normalize_list(&spec.recipe.steps),
            install_targets: normalize_list(&spec.recipe.install_targets),
        },
        dependencies,
    };

    let encoded = serde_json::to_vec(&canonical).map_err(|e| HashError::Serialize {
        component: spec.name.clone(),
        error: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN.as_bytes());
    hasher.update([0u8]);
    hasher.update(&encoded);
    Ok(ContentHash(hex::encode(hasher.finalize())))
}
