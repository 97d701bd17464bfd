//! Schema versioning utilities

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// A schema version: `major.minor.patch` with `major >= 1`.
///
/// Ordering is lexicographic on `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemVer {
    major: u64,
    minor: u64,
    patch: u64,
}

impl SemVer {
    /// The first version of every new schema family.
    pub const INITIAL: SemVer = SemVer {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Create a version, rejecting major version zero
    pub fn new(major: u64, minor: u64, patch: u64) -> Result<Self> {
        if major == 0 {
            return Err(SchemaError::InvalidVersion(format!(
                "{major}.{minor}.{patch}: major version must be at least 1"
            )));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// Parse a version string (e.g., "1.2.3" or "v1.2.3").
    ///
    /// Pre-release and build metadata are not part of schema versions.
    pub fn parse(version_str: &str) -> Result<Self> {
        let trimmed = version_str.strip_prefix('v').unwrap_or(version_str);
        let parsed = semver::Version::parse(trimmed)
            .map_err(|e| SchemaError::InvalidVersion(format!("{version_str}: {e}")))?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(SchemaError::InvalidVersion(format!(
                "{version_str}: pre-release and build metadata are not supported"
            )));
        }
        Self::new(parsed.major, parsed.minor, parsed.patch)
    }

    /// Parse the three numeric components of a key (e.g., `["1", "0", "2"]`)
    pub fn from_parts(major: &str, minor: &str, patch: &str) -> Result<Self> {
        let component = |s: &str| {
            s.parse::<u64>().map_err(|_| {
                SchemaError::InvalidVersion(format!(
                    "{major}.{minor}.{patch}: '{s}' is not a non-negative integer"
                ))
            })
        };
        Self::new(component(major)?, component(minor)?, component(patch)?)
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Whether both versions belong to the same major family
    pub fn same_major(&self, other: &SemVer) -> bool {
        self.major == other.major
    }

    /// The underscore-joined form used inside keys (e.g., "1_2_3")
    pub fn key_string(&self) -> String {
        format!("{}_{}_{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SemVer {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SemVer> for String {
    fn from(v: SemVer) -> Self {
        v.to_string()
    }
}

impl From<SemVer> for semver::Version {
    fn from(v: SemVer) -> Self {
        semver::Version::new(v.major, v.minor, v.patch)
    }
}

/// Kind of version bump requested for a new schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReleaseType::Major => "major",
            ReleaseType::Minor => "minor",
            ReleaseType::Patch => "patch",
        };
        f.write_str(name)
    }
}

impl FromStr for ReleaseType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "major" => Ok(ReleaseType::Major),
            "minor" => Ok(ReleaseType::Minor),
            "patch" => Ok(ReleaseType::Patch),
            other => Err(SchemaError::InvalidVersion(format!(
                "unknown release type '{other}' (expected major, minor or patch)"
            ))),
        }
    }
}

/// Numeric names of the immediate subdirectories of `dir`, sorted ascending.
///
/// Non-numeric entries and plain files are ignored; a missing directory has
/// no versions.
pub fn numeric_subdirs(dir: &Path) -> Result<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut numbers = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Compute the version a release of `release` type creates from `current`,
/// given the family directory holding `<major>/<minor>/<patch>` subdirectories.
///
/// - major: one past the highest existing major, minor and patch reset
/// - minor: the next minor line, at its next free patch
/// - patch: the next free patch within the current minor line
pub fn next_version(family_dir: &Path, current: SemVer, release: ReleaseType) -> Result<SemVer> {
    let bump = |n: u64| {
        n.checked_add(1)
            .ok_or_else(|| SchemaError::InvalidVersion(format!("version number {n} cannot be incremented")))
    };
    let next_free = |dir: &Path| -> Result<u64> {
        numeric_subdirs(dir)?.last().map_or(Ok(0), |max| bump(*max))
    };

    match release {
        ReleaseType::Major => {
            let majors = numeric_subdirs(family_dir)?;
            let highest = majors.last().copied().unwrap_or(0).max(current.major);
            SemVer::new(bump(highest)?, 0, 0)
        }
        ReleaseType::Minor => {
            let minor = bump(current.minor)?;
            let minor_dir = family_dir
                .join(current.major.to_string())
                .join(minor.to_string());
            SemVer::new(current.major, minor, next_free(&minor_dir)?)
        }
        ReleaseType::Patch => {
            let minor_dir = family_dir
                .join(current.major.to_string())
                .join(current.minor.to_string());
            let patch = next_free(&minor_dir)?.max(bump(current.patch)?);
            SemVer::new(current.major, current.minor, patch)
        }
    }
}
