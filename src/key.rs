//! Schema identity: keys and their validated decomposition
//!
//! A [`Key`] is the opaque cache index `{domain...}_{family}_{major}_{minor}_{patch}`.
//! A [`Core`] is the validated form it decomposes into. Keys are only built
//! from a `Core` or from input that has already been validated, so holding a
//! `Key` means holding a well-formed identity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::version::SemVer;

/// File suffix shared by every schema source file
pub const SCHEMA_SUFFIX: &str = ".schema.json";

/// Separator used in on-disk keys and `JSM` directive arguments
pub const KEY_SEPARATOR: char = '_';

/// Separator used in CLI-facing paths (e.g., `acme/billing/invoice/1/0/0`)
pub const PATH_SEPARATOR: char = '/';

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

fn valid_segment(s: &str) -> bool {
    SEGMENT.is_match(s)
}

/// Opaque schema identifier, always well-formed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Wrap a string that is already known to be a valid key.
    ///
    /// Use [`Core::parse`] for untrusted input.
    pub fn from_trusted(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the schema source for this key
    pub fn file_name(&self) -> String {
        format!("{}{}", self.0, SCHEMA_SUFFIX)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validated decomposition of a [`Key`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Core {
    domain: Vec<String>,
    family_name: String,
    version: SemVer,
}

impl Core {
    /// Build a core from explicit parts
    pub fn new(domain: Vec<String>, family_name: impl Into<String>, version: SemVer) -> Result<Self> {
        let family_name = family_name.into();
        if domain.is_empty() {
            return Err(SchemaError::InvalidDomain(String::new()));
        }
        if let Some(bad) = domain.iter().find(|s| !valid_segment(s)) {
            return Err(SchemaError::InvalidDomain(bad.clone()));
        }
        if !valid_segment(&family_name) {
            return Err(SchemaError::InvalidFamily(family_name));
        }
        Ok(Self {
            domain,
            family_name,
            version,
        })
    }

    /// Parse a delimited string: at least one domain segment, the family
    /// name and three version integers.
    pub fn parse(input: &str, separator: char) -> Result<Self> {
        let parts: Vec<&str> = input.split(separator).collect();
        if parts.len() < 5 {
            return Err(SchemaError::InvalidKeyFormat {
                input: input.to_string(),
                reason: format!(
                    "expected at least 5 '{separator}'-separated parts (domain, family, major, minor, patch), got {}",
                    parts.len()
                ),
            });
        }

        let (head, version) = parts.split_at(parts.len() - 3);
        let (domain, family) = head.split_at(head.len() - 1);
        let version = SemVer::from_parts(version[0], version[1], version[2])?;
        Self::new(
            domain.iter().map(|s| s.to_string()).collect(),
            family[0],
            version,
        )
    }

    /// Decompose a trusted key
    pub fn from_key(key: &Key) -> Result<Self> {
        Self::parse(key.as_str(), KEY_SEPARATOR)
    }

    /// Parse a CLI-facing `domain/.../family` path (no version) at `version`
    pub fn from_domain_and_family(path: &str, version: SemVer) -> Result<Self> {
        let parts: Vec<&str> = path.trim_matches(PATH_SEPARATOR).split(PATH_SEPARATOR).collect();
        if parts.len() < 2 {
            return Err(SchemaError::InvalidKeyFormat {
                input: path.to_string(),
                reason: "expected '<domain>/.../<family>'".to_string(),
            });
        }
        let (domain, family) = parts.split_at(parts.len() - 1);
        Self::new(domain.iter().map(|s| s.to_string()).collect(), family[0], version)
    }

    pub fn domain(&self) -> &[String] {
        &self.domain
    }

    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    pub fn version(&self) -> SemVer {
        self.version
    }

    /// The same family at another version
    pub fn with_version(&self, version: SemVer) -> Self {
        Self {
            domain: self.domain.clone(),
            family_name: self.family_name.clone(),
            version,
        }
    }

    pub fn key(&self) -> Key {
        Key(format!(
            "{}{sep}{}{sep}{}",
            self.domain.join(&KEY_SEPARATOR.to_string()),
            self.family_name,
            self.version.key_string(),
            sep = KEY_SEPARATOR
        ))
    }

    /// `<root>/<domain...>/<family>`
    pub fn family_dir(&self, root: &Path) -> PathBuf {
        let mut dir = root.to_path_buf();
        dir.extend(&self.domain);
        dir.push(&self.family_name);
        dir
    }

    /// `<root>/<domain...>/<family>/<major>`
    pub fn major_dir(&self, root: &Path) -> PathBuf {
        self.family_dir(root).join(self.version.major().to_string())
    }

    /// `<root>/<domain...>/<family>/<major>/<minor>/<patch>`
    pub fn home_dir(&self, root: &Path) -> PathBuf {
        self.major_dir(root)
            .join(self.version.minor().to_string())
            .join(self.version.patch().to_string())
    }

    /// Full path of the schema source file
    pub fn schema_path(&self, root: &Path) -> PathBuf {
        self.home_dir(root).join(self.key().file_name())
    }
}

impl fmt::Display for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.domain.join("/"),
            self.family_name,
            self.version
        )
    }
}
