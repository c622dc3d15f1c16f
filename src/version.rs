//! Semantic version values and version constraints.
//!
//! The registry accepts a deliberately strict version grammar:
//! `v?MAJOR.MINOR.PATCH(-PRERELEASE)?` where the prerelease label is
//! `[a-z0-9]+` (no dots, no build metadata). Anything a published module
//! version carries must round-trip through [`Version::parse`].
//!
//! Ordering follows numeric field dominance major → minor → patch, then
//! stable > prerelease, then lexical comparison of the prerelease label.
//!
//! Constraints support Terraform's operator set as accepted by the registry:
//! `=`, `>`, `>=`, `<`, `<=` and the pessimistic `~>`, where
//! `~> X.Y.Z` means `>= X.Y.Z, < X.(Y+1).0`. Comma-separated lists AND.

use crate::error::{RegistryError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The strict version grammar. Build metadata (`+...`) is not accepted.
static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([a-z0-9]+))?$").unwrap_or_else(|e| {
        // A literal pattern that fails to compile is a build defect.
        panic!("version regex failed to compile: {e}")
    })
});

/// A registry module version.
///
/// Wraps a [`semver::Version`] as the storage and display backbone while
/// enforcing the registry's stricter grammar at parse time and the
/// registry's ordering (lexical prerelease comparison) at compare time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    inner: semver::Version,
}

impl Version {
    /// Parse a version string.
    ///
    /// Accepts an optional leading `v`. Rejects missing components,
    /// dotted or uppercase prerelease labels, and build metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::VersionParse`] on any deviation from
    /// `v?MAJOR.MINOR.PATCH(-PRERELEASE)?`.
    pub fn parse(s: &str) -> Result<Self> {
        let caps = VERSION_RE.captures(s.trim()).ok_or_else(|| {
            crate::err!(VersionParse {
                version: s.to_string(),
                message: "expected MAJOR.MINOR.PATCH with optional [a-z0-9]+ prerelease".to_string(),
            })
        })?;

        let field = |i: usize| -> Result<u64> {
            caps.get(i)
                .map(|m| m.as_str())
                .unwrap_or("0")
                .parse::<u64>()
                .map_err(|e| {
                    crate::err!(VersionParse {
                        version: s.to_string(),
                        message: format!("numeric component out of range: {e}"),
                    })
                })
        };

        let mut inner = semver::Version::new(field(1)?, field(2)?, field(3)?);
        if let Some(pre) = caps.get(4) {
            inner.pre = semver::Prerelease::new(pre.as_str()).map_err(|e| {
                crate::err!(VersionParse {
                    version: s.to_string(),
                    message: format!("invalid prerelease label: {e}"),
                })
            })?;
        }

        Ok(Self { inner })
    }

    /// Construct a stable version from its numeric components.
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            inner: semver::Version::new(major, minor, patch),
        }
    }

    /// Major component.
    #[must_use]
    pub fn major(&self) -> u64 {
        self.inner.major
    }

    /// Minor component.
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    /// Patch component.
    #[must_use]
    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    /// The prerelease label, if any.
    #[must_use]
    pub fn prerelease(&self) -> Option<&str> {
        if self.inner.pre.is_empty() {
            None
        } else {
            Some(self.inner.pre.as_str())
        }
    }

    /// A version is a beta version iff its prerelease component is non-empty.
    #[must_use]
    pub fn is_beta(&self) -> bool {
        !self.inner.pre.is_empty()
    }

    /// Access the underlying semver value.
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.inner
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl TryFrom<String> for Version {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner
            .major
            .cmp(&other.inner.major)
            .then_with(|| self.inner.minor.cmp(&other.inner.minor))
            .then_with(|| self.inner.patch.cmp(&other.inner.patch))
            .then_with(|| match (self.prerelease(), other.prerelease()) {
                // Stable sorts above any prerelease of the same triple.
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Represents a version constraint expression.
///
/// Supports the registry's operator subset of Terraform's constraint syntax:
/// - `= 1.0.0` (or bare `1.0.0`) - Exact version
/// - `> 1.0.0`, `>= 1.0.0` - Greater than
/// - `< 1.0.0`, `<= 1.0.0` - Less than
/// - `~> 1.0.0` - Pessimistic constraint
/// - `>= 1.0.0, < 2.0.0` - Multiple constraints (AND)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// The raw constraint string as written
    pub raw: String,

    /// Parsed version ranges
    pub ranges: Vec<VersionRange>,
}

impl Constraint {
    /// Parse a constraint string into a `Constraint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the constraint string is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        let mut ranges = Vec::new();

        // Split on comma for multiple constraints
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            ranges.push(parse_single_constraint(part)?);
        }

        if ranges.is_empty() {
            return Err(crate::err!(ConstraintParse {
                constraint: s.to_string(),
                message: "empty constraint".to_string(),
            }));
        }

        Ok(Self {
            raw: s.to_string(),
            ranges,
        })
    }

    /// Check if this constraint is satisfied by a given version.
    #[must_use]
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.ranges.iter().all(|range| range.contains(version))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Represents a single version range component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionRange {
    /// Exact version match: `= X.Y.Z`
    Exact(Version),
    /// Greater than: `> X.Y.Z`
    GreaterThan(Version),
    /// Greater than or equal: `>= X.Y.Z`
    GreaterThanOrEqual(Version),
    /// Less than: `< X.Y.Z`
    LessThan(Version),
    /// Less than or equal: `<= X.Y.Z`
    LessThanOrEqual(Version),
    /// Pessimistic constraint: `~> X.Y.Z`
    Pessimistic {
        /// The version specified in the constraint
        version: Version,
        /// Number of version components written (2=X.Y, 3=X.Y.Z)
        parts: usize,
    },
}

impl VersionRange {
    /// Check if a version satisfies this range.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => version == v,
            Self::GreaterThan(v) => version > v,
            Self::GreaterThanOrEqual(v) => version >= v,
            Self::LessThan(v) => version < v,
            Self::LessThanOrEqual(v) => version <= v,
            Self::Pessimistic { version: v, parts } => {
                // ~> X.Y.Z allows >= X.Y.Z and < X.(Y+1).0
                // ~> X.Y allows >= X.Y.0 and < (X+1).0.0
                let upper = pessimistic_upper_bound(v, *parts);
                version >= v && version < &upper
            }
        }
    }
}

/// Parse a single constraint expression.
fn parse_single_constraint(s: &str) -> Result<VersionRange> {
    let s = s.trim();

    // Pessimistic constraint
    if let Some(version_str) = s.strip_prefix("~>") {
        let version_str = version_str.trim();
        // Count dots in the written version string to determine parts
        let parts = version_str.matches('.').count() + 1;
        let version = parse_constraint_version(version_str)?;
        return Ok(VersionRange::Pessimistic { version, parts });
    }

    if let Some(version_str) = s.strip_prefix(">=") {
        return Ok(VersionRange::GreaterThanOrEqual(parse_constraint_version(version_str)?));
    }

    if let Some(version_str) = s.strip_prefix("<=") {
        return Ok(VersionRange::LessThanOrEqual(parse_constraint_version(version_str)?));
    }

    if let Some(version_str) = s.strip_prefix('>') {
        return Ok(VersionRange::GreaterThan(parse_constraint_version(version_str)?));
    }

    if let Some(version_str) = s.strip_prefix('<') {
        return Ok(VersionRange::LessThan(parse_constraint_version(version_str)?));
    }

    // Exact (with or without = prefix)
    let version_str = s.strip_prefix('=').unwrap_or(s);
    Ok(VersionRange::Exact(parse_constraint_version(version_str)?))
}

/// Parse a version written inside a constraint, tolerating incomplete
/// component lists (`1.0` becomes `1.0.0`).
fn parse_constraint_version(s: &str) -> Result<Version> {
    let s = s.trim();
    let normalized = match s.matches('.').count() {
        0 => format!("{s}.0.0"),
        1 => format!("{s}.0"),
        _ => s.to_string(),
    };

    Version::parse(&normalized).map_err(|_| {
        crate::err!(ConstraintParse {
            constraint: s.to_string(),
            message: "constraint version must be numeric components with optional prerelease".to_string(),
        })
    })
}

/// Calculate the upper bound for a pessimistic constraint.
fn pessimistic_upper_bound(v: &Version, parts: usize) -> Version {
    match parts {
        3 => Version::new(v.major(), v.minor() + 1, 0),
        2 => Version::new(v.major() + 1, 0, 0),
        _ => Version::new(u64::MAX, u64::MAX, u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!((v.major(), v.minor(), v.patch()), (1, 2, 3));
        assert!(!v.is_beta());
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_parse_v_prefix() {
        let v = Version::parse("v1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_prerelease() {
        let v = Version::parse("1.2.3-beta1").unwrap();
        assert_eq!(v.prerelease(), Some("beta1"));
        assert!(v.is_beta());
        assert_eq!(v.to_string(), "1.2.3-beta1");
    }

    #[test_case::test_case("1.2" ; "missing patch")]
    #[test_case::test_case("1" ; "major only")]
    #[test_case::test_case("" ; "empty")]
    #[test_case::test_case("1.2.3+build5" ; "build metadata")]
    #[test_case::test_case("1.2.3-beta+5" ; "prerelease with build metadata")]
    #[test_case::test_case("1.2.3-beta.1" ; "dotted prerelease")]
    #[test_case::test_case("1.2.3-BETA" ; "uppercase prerelease")]
    #[test_case::test_case("1.2.3-rc_1" ; "underscore prerelease")]
    fn test_reject(input: &str) {
        assert!(Version::parse(input).is_err(), "{input} should be rejected");
    }

    #[test]
    fn test_ordering_numeric_dominance() {
        let a = Version::parse("1.2.3").unwrap();
        let b = Version::parse("1.10.0").unwrap();
        let c = Version::parse("2.0.0").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_ordering_stable_above_prerelease() {
        let stable = Version::parse("1.0.0").unwrap();
        let beta = Version::parse("1.0.0-beta").unwrap();
        assert!(beta < stable);
        // A prerelease of a higher triple still sorts above a lower stable.
        let next_beta = Version::parse("1.0.1-alpha").unwrap();
        assert!(stable < next_beta);
    }

    #[test]
    fn test_ordering_prerelease_lexical() {
        let alpha = Version::parse("1.0.0-alpha").unwrap();
        let beta = Version::parse("1.0.0-beta").unwrap();
        assert!(alpha < beta);

        // Lexical, not numeric: "11" < "2"
        let eleven = Version::parse("1.0.0-11").unwrap();
        let two = Version::parse("1.0.0-2").unwrap();
        assert!(eleven < two);
    }

    #[test]
    fn test_ordering_trichotomy_and_transitivity() {
        let versions = [
            Version::parse("0.9.9").unwrap(),
            Version::parse("1.0.0-alpha").unwrap(),
            Version::parse("1.0.0-beta").unwrap(),
            Version::parse("1.0.0").unwrap(),
            Version::parse("1.0.1").unwrap(),
            Version::parse("1.1.0").unwrap(),
        ];
        for (i, a) in versions.iter().enumerate() {
            for (j, b) in versions.iter().enumerate() {
                match i.cmp(&j) {
                    Ordering::Less => assert!(a < b, "{a} should be < {b}"),
                    Ordering::Equal => assert_eq!(a, b),
                    Ordering::Greater => assert!(a > b, "{a} should be > {b}"),
                }
            }
        }
    }

    #[test]
    fn test_constraint_exact() {
        let c = Constraint::parse("1.0.0").unwrap();
        assert!(c.is_satisfied_by(&Version::parse("1.0.0").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("1.0.1").unwrap()));
    }

    #[test]
    fn test_constraint_bounds() {
        let c = Constraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert_eq!(c.ranges.len(), 2);
        assert!(c.is_satisfied_by(&Version::parse("1.5.0").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("0.9.0").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn test_pessimistic_three_parts() {
        // ~> X.Y.Z matches V iff V >= X.Y.Z and V < X.(Y+1).0
        let c = Constraint::parse("~> 1.2.3").unwrap();
        assert!(c.is_satisfied_by(&Version::parse("1.2.3").unwrap()));
        assert!(c.is_satisfied_by(&Version::parse("1.2.9").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("1.3.0").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("1.2.2").unwrap()));
    }

    #[test]
    fn test_pessimistic_two_parts() {
        let c = Constraint::parse("~> 1.2").unwrap();
        assert!(c.is_satisfied_by(&Version::parse("1.2.0").unwrap()));
        assert!(c.is_satisfied_by(&Version::parse("1.9.0").unwrap()));
        assert!(!c.is_satisfied_by(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn test_constraint_rejects_garbage() {
        assert!(Constraint::parse("").is_err());
        assert!(Constraint::parse("~> abc").is_err());
        assert!(Constraint::parse("!= 1.0.0").is_err());
    }
}
