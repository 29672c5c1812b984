//! Component specifications
//!
//! A component is one buildable unit (`gcc`, `binutils`, `glibc`, a user
//! package) at one version, with the flags and recipe used to build it and
//! the dependencies it declares.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::version::{self, VersionError, VersionRange};

/// How a dependency is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed to build, not shipped in runtime output
    Build,
    /// Needed at runtime
    #[default]
    Runtime,
    /// Needed to develop against the component (headers, static libs)
    Development,
}

impl DependencyKind {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Development => "development",
        }
    }
}

/// A declared dependency
///
/// Written either as a bare range (`binutils = ">=2.40"`) or as a table
/// (`linux-headers = { version = "*", kind = "build" }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    /// Bare range, runtime dependency
    Range(String),
    /// Range with an explicit kind
    Detailed {
        /// Version range
        #[serde(default = "any_range")]
        version: String,
        /// Dependency kind
        #[serde(default)]
        kind: DependencyKind,
    },
}

fn any_range() -> String {
    "*".to_string()
}

impl DependencyDecl {
    /// The range as written
    pub fn range(&self) -> &str {
        match self {
            Self::Range(range) | Self::Detailed { version: range, .. } => range,
        }
    }

    /// The dependency kind
    pub fn kind(&self) -> DependencyKind {
        match self {
            Self::Range(_) => DependencyKind::Runtime,
            Self::Detailed { kind, .. } => *kind,
        }
    }

    /// Parse the range
    pub fn parse_range(&self) -> Result<VersionRange, VersionError> {
        version::parse_range(self.range())
    }
}

/// Compiler and configure flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFlags {
    /// C compiler flags, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cflags: Vec<String>,
    /// C++ compiler flags, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cxxflags: Vec<String>,
    /// Linker flags, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ldflags: Vec<String>,
    /// Extra configure (or cmake) arguments, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure: Vec<String>,
    /// Extra make arguments, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub make: Vec<String>,
    /// Enabled features (unordered)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,
    /// Extra environment for every build step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Build system driving a component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    /// `configure && make && make install`
    #[default]
    Autotools,
    /// `make && make install`
    Make,
    /// `cmake -B build && cmake --build && cmake --install`
    Cmake,
    /// Only the recipe's `steps`
    Script,
}

/// How a component is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Build system
    #[serde(default)]
    pub kind: RecipeKind,
    /// Base image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// Commands run before the build (installing host tools, patching)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    /// Commands for `script` recipes, or extra steps after install
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    /// Make targets used to install
    #[serde(default = "default_install_targets")]
    pub install_targets: Vec<String>,
}

fn default_install_targets() -> Vec<String> {
    vec!["install".to_string()]
}

impl Default for Recipe {
    fn default() -> Self {
        Self {
            kind: RecipeKind::default(),
            base_image: None,
            setup: Vec::new(),
            steps: Vec::new(),
            install_targets: default_install_targets(),
        }
    }
}

/// A component at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Component name
    pub name: String,
    /// Version (lenient semver, e.g. `2.41`)
    pub version: String,
    /// Source revision (commit or tag) the version is built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Local, already verified source tree (relative to the catalog)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Build flags
    #[serde(default)]
    pub flags: BuildFlags,
    /// Build recipe
    #[serde(default)]
    pub recipe: Recipe,
    /// Declared dependencies by name
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyDecl>,
    /// Components that cannot appear in the same plan
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,
    /// Path prefixes this component may overwrite during assembly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overridable: Vec<String>,
}

impl ComponentSpec {
    /// Create a spec with default flags and recipe
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            revision: None,
            description: None,
            source: None,
            flags: BuildFlags::default(),
            recipe: Recipe::default(),
            dependencies: BTreeMap::new(),
            conflicts_with: Vec::new(),
            overridable: Vec::new(),
        }
    }

    /// Add a runtime dependency
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies
            .insert(name.into(), DependencyDecl::Range(range.into()));
        self
    }

    /// Add a dependency with an explicit kind
    #[must_use]
    pub fn with_dependency_kind(
        mut self,
        name: impl Into<String>,
        range: impl Into<String>,
        kind: DependencyKind,
    ) -> Self {
        self.dependencies.insert(
            name.into(),
            DependencyDecl::Detailed {
                version: range.into(),
                kind,
            },
        );
        self
    }

    /// `name@version`
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Parsed version
    pub fn parsed_version(&self) -> Result<semver::Version, VersionError> {
        version::parse_version(&self.version)
    }

    /// Whether `relative` (a path inside the artifact tree) may replace a
    /// file placed by an earlier component
    ///
    /// Prefixes match whole path components: `rootfs/etc` covers
    /// `rootfs/etc/hosts` but not `rootfs/etcetera`.
    pub fn may_override(&self, relative: &std::path::Path) -> bool {
        self.overridable
            .iter()
            .any(|prefix| relative.starts_with(prefix.trim_start_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_decl_forms() {
        let toml_src = r#"
            name = "glibc"
            version = "2.41"

            [dependencies]
            binutils = ">=2.40"
            linux-headers = { version = "6.6", kind = "build" }
            libgcc = { kind = "development" }
        "#;
        let spec: ComponentSpec = toml::from_str(toml_src).unwrap();

        let binutils = &spec.dependencies["binutils"];
        assert_eq!(binutils.range(), ">=2.40");
        assert_eq!(binutils.kind(), DependencyKind::Runtime);

        let headers = &spec.dependencies["linux-headers"];
        assert_eq!(headers.range(), "6.6");
        assert_eq!(headers.kind(), DependencyKind::Build);

        let libgcc = &spec.dependencies["libgcc"];
        assert_eq!(libgcc.range(), "*");
        assert_eq!(libgcc.kind(), DependencyKind::Development);
    }

    #[test]
    fn test_recipe_defaults() {
        let spec: ComponentSpec = toml::from_str("name = \"zlib\"\nversion = \"1.3.1\"").unwrap();
        assert_eq!(spec.recipe.kind, RecipeKind::Autotools);
        assert_eq!(spec.recipe.install_targets, vec!["install".to_string()]);
        assert!(spec.flags.features.is_empty());
    }

    #[test]
    fn test_may_override() {
        let mut spec = ComponentSpec::new("gcc", "13.2.0");
        spec.overridable = vec![
            "lib/libgcc_s.so.1".into(),
            "/rootfs/etc/".into(),
            "rootfs/usr/share".into(),
        ];

        assert!(spec.may_override(std::path::Path::new("lib/libgcc_s.so.1")));
        assert!(spec.may_override(std::path::Path::new("rootfs/etc/ld.so.conf")));
        assert!(spec.may_override(std::path::Path::new("rootfs/usr/share/zoneinfo/UTC")));
        assert!(!spec.may_override(std::path::Path::new("bin/gcc")));
        assert!(!spec.may_override(std::path::Path::new("lib/libgcc_s.so.1.0")));
        assert!(!spec.may_override(std::path::Path::new("rootfs/etcetera/x")));
        assert!(!spec.may_override(std::path::Path::new("rootfs/usr/shared/x")));
    }

    #[test]
    fn test_id() {
        assert_eq!(ComponentSpec::new("gcc", "13.2.0").id(), "gcc@13.2.0");
    }
}
