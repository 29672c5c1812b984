//! Version parsing and range matching
//!
//! Toolchain components rarely publish strict semver (`2.41`, `v13`), so
//! versions are parsed leniently and padded to three components before they
//! reach [`semver`]. Ranges use semver requirement syntax, plus `*` and the
//! moving aliases `latest`, `main` and `master`, which all mean "the highest
//! version in the catalog".

use std::fmt;

use semver::{Version, VersionReq};
use thiserror::Error;

/// Range spellings that select the highest available version
pub const MOVING_ALIASES: &[&str] = &["latest", "main", "master"];

/// Errors related to version parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Invalid version constraint format
    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    /// Invalid version format
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// Parse a version string, padding missing minor/patch components
///
/// # Examples
/// ```
/// use weaver::core::version::parse_version;
///
/// assert_eq!(parse_version("2.41").unwrap().to_string(), "2.41.0");
/// assert_eq!(parse_version("v13").unwrap().to_string(), "13.0.0");
/// ```
pub fn parse_version(version: &str) -> Result<semver::Version, VersionError> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);

    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded).map_err(|e| VersionError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a string is a moving alias rather than a fixed version
pub fn is_moving_alias(value: &str) -> bool {
    MOVING_ALIASES
        .iter()
        .any(|alias| alias.eq_ignore_ascii_case(value.trim()))
}

/// A parsed version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    req: Option<VersionReq>,
}

impl VersionRange {
    /// Range matching every version
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            req: None,
        }
    }

    /// Range matching exactly one version
    pub fn exact(version: &Version) -> Self {
        Self {
            raw: format!("={version}"),
            req: Some(VersionReq {
                comparators: vec![semver::Comparator {
                    op: semver::Op::Exact,
                    major: version.major,
                    minor: Some(version.minor),
                    patch: Some(version.patch),
                    pre: version.pre.clone(),
                }],
            }),
        }
    }

    /// Check whether a version satisfies this range
    pub fn matches(&self, version: &Version) -> bool {
        self.req.as_ref().map_or(true, |req| req.matches(version))
    }

    /// The range as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the range pins a single version
    pub fn is_exact(&self) -> bool {
        self.req.as_ref().is_some_and(|req| {
            req.comparators.len() == 1
                && req.comparators[0].op == semver::Op::Exact
                && req.comparators[0].minor.is_some()
                && req.comparators[0].patch.is_some()
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a version range
///
/// Empty strings, `*` and moving aliases match everything.
pub fn parse_range(constraint: &str) -> Result<VersionRange, VersionError> {
    let trimmed = constraint.trim();
    if trimmed.is_empty() || trimmed == "*" || is_moving_alias(trimmed) {
        return Ok(VersionRange {
            raw: if trimmed.is_empty() { "*" } else { trimmed }.to_string(),
            req: None,
        });
    }

    let req = VersionReq::parse(trimmed).map_err(|e| VersionError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: e.to_string(),
    })?;

    Ok(VersionRange {
        raw: trimmed.to_string(),
        req: Some(req),
    })
}

/// Compare two versions
pub fn compare_versions(v1: &str, v2: &str) -> Result<std::cmp::Ordering, VersionError> {
    Ok(parse_version(v1)?.cmp(&parse_version(v2)?))
}
