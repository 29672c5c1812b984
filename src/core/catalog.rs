//! Component catalog
//!
//! The catalog is the declarative listing of every component version the
//! resolver may choose from. It is read from a TOML file with one
//! `[[component]]` table per component version.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use semver::Version;
use serde::Deserialize;

use crate::core::component::ComponentSpec;
use crate::core::version::{self, VersionRange};
use crate::error::CatalogError;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").expect("valid name pattern"))
}

/// Check a component name
pub fn validate_name(name: &str) -> Result<(), CatalogError> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(CatalogError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "component")]
    components: Vec<ComponentSpec>,
}

/// A catalog entry: a spec with its parsed version
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Parsed version
    pub version: Version,
    /// The spec
    pub spec: ComponentSpec,
}

/// Available component specs, grouped by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// name -> entries sorted by version, highest first
    components: BTreeMap<String, Vec<CatalogEntry>>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from TOML
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_specs(file.components)
    }

    /// Load a catalog file
    ///
    /// Relative `source` paths are resolved against the catalog's directory.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let file: CatalogFile =
            toml::from_str(&content).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let specs: Vec<ComponentSpec> = file
            .components
            .into_iter()
            .map(|mut spec| {
                if let Some(source) = spec.source.take() {
                    spec.source = Some(if source.is_relative() {
                        base.join(source)
                    } else {
                        source
                    });
                }
                spec
            })
            .collect();

        Self::from_specs(specs)
    }

    /// Build a catalog from specs, validating each one
    pub fn from_specs(specs: impl IntoIterator<Item = ComponentSpec>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.add(spec)?;
        }
        Ok(catalog)
    }

    /// Add a spec
    pub fn add(&mut self, spec: ComponentSpec) -> Result<(), CatalogError> {
        validate_name(&spec.name)?;

        let parsed = spec
            .parsed_version()
            .map_err(|e| CatalogError::InvalidVersion {
                component: spec.name.clone(),
                version: spec.version.clone(),
                reason: e.to_string(),
            })?;

        for (dep, decl) in &spec.dependencies {
            validate_name(dep)?;
            decl.parse_range()
                .map_err(|e| CatalogError::InvalidRequirement {
                    component: spec.name.clone(),
                    dependency: dep.clone(),
                    requirement: decl.range().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let entries = self.components.entry(spec.name.clone()).or_default();
        if entries.iter().any(|e| e.version == parsed) {
            return Err(CatalogError::Duplicate {
                name: spec.name,
                version: parsed.to_string(),
            });
        }

        let position = entries
            .iter()
            .position(|e| e.version < parsed)
            .unwrap_or(entries.len());
        entries.insert(
            position,
            CatalogEntry {
                version: parsed,
                spec,
            },
        );
        Ok(())
    }

    /// All versions of a component, highest first
    pub fn versions(&self, name: &str) -> &[CatalogEntry] {
        self.components.get(name).map_or(&[], Vec::as_slice)
    }

    /// Look up one version
    pub fn get(&self, name: &str, version: &Version) -> Option<&ComponentSpec> {
        self.versions(name)
            .iter()
            .find(|e| &e.version == version)
            .map(|e| &e.spec)
    }

    /// Whether the catalog knows a component
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Component names in lexical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Number of component versions
    pub fn len(&self) -> usize {
        self.components.values().map(Vec::len).sum()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A requested component: `name` or `name@range`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Component name
    pub name: String,
    /// Accepted versions
    pub range: VersionRange,
}

impl Request {
    /// Request any version of a component
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: VersionRange::any(),
        }
    }
}

impl FromStr for Request {
    type Err = CatalogError;

    /// A bare version after `@` is an exact pin; anything else is a range
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CatalogError::InvalidRequest {
            request: s.to_string(),
            reason,
        };

        let (name, range) = match s.split_once('@') {
            Some((name, range)) => (name.trim(), range.trim()),
            None => (s.trim(), ""),
        };
        validate_name(name).map_err(|e| invalid(e.to_string()))?;

        let starts_with_digit = range.chars().next().is_some_and(|c| c.is_ascii_digit());
        let range = if starts_with_digit {
            let pinned = version::parse_version(range).map_err(|e| invalid(e.to_string()))?;
            VersionRange::exact(&pinned)
        } else {
            version::parse_range(range).map_err(|e| invalid(e.to_string()))?
        };

        Ok(Self {
            name: name.to_string(),
            range,
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}
