//! Schema discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SchemaError};
use crate::key::{Key, SCHEMA_SUFFIX};
use crate::registry::Registry;

/// Produces the keys of schemas to test, lazily
pub trait Searcher {
    fn search<'a>(&'a self) -> Box<dyn Iterator<Item = Result<Key>> + 'a>;
}

/// A fixed list of keys
impl Searcher for Vec<Key> {
    fn search<'a>(&'a self) -> Box<dyn Iterator<Item = Result<Key>> + 'a> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

/// Every schema file below a directory of the registry, in path order
pub struct DirectorySearcher<'r> {
    registry: &'r Registry,
    dir: PathBuf,
}

impl<'r> DirectorySearcher<'r> {
    /// Search the whole registry
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            dir: registry.root().to_path_buf(),
        }
    }

    /// Search below `dir`, which must lie inside the registry root
    pub fn within(registry: &'r Registry, dir: &Path) -> Result<Self> {
        let dir = dir.canonicalize()?;
        if !dir.starts_with(registry.root()) {
            return Err(SchemaError::PathOutsideRoot {
                path: dir,
                root: registry.root().to_path_buf(),
            });
        }
        Ok(Self { registry, dir })
    }
}

impl Searcher for DirectorySearcher<'_> {
    fn search<'a>(&'a self) -> Box<dyn Iterator<Item = Result<Key>> + 'a> {
        let walker = WalkDir::new(&self.dir).sort_by_file_name().into_iter();
        Box::new(walker.filter_map(move |entry| match entry {
            Err(e) => Some(Err(e.into())),
            Ok(entry) => {
                let is_schema = entry.file_type().is_file()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.ends_with(SCHEMA_SUFFIX));
                is_schema.then(|| self.registry.key_from_schema_path(entry.path()))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::version::ReleaseType;
    use tempfile::tempdir;

    #[test]
    fn test_finds_every_schema_in_path_order() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(Some(dir.path()), RegistryConfig::default()).unwrap();
        let user = registry.create_schema("acme/user").unwrap();
        registry.create_schema_version(user.key(), ReleaseType::Minor).unwrap();
        registry.create_schema("acme/billing/invoice").unwrap();
        std::fs::write(user.home_dir().join("pass").join("doc.json"), "{}").unwrap();

        let keys: Vec<String> = DirectorySearcher::new(&registry)
            .search()
            .map(|k| k.unwrap().to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["acme_billing_invoice_1_0_0", "acme_user_1_0_0", "acme_user_1_1_0"]
        );

        let scoped = DirectorySearcher::within(&registry, &registry.root().join("acme").join("user")).unwrap();
        assert_eq!(scoped.search().count(), 2);
    }

    #[test]
    fn test_within_rejects_outside_dirs() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let registry = Registry::new(Some(dir.path()), RegistryConfig::default()).unwrap();
        assert!(DirectorySearcher::within(&registry, other.path()).is_err());
    }
}
