//! Schema Registry
//!
//! Owns the schema cache for one registry root and deduplicates the two
//! expensive operations on it: loading a schema from disk (once per key) and
//! rendering + compiling it (once per key and environment).
//!
//! Directory structure: `<root>/<domain...>/<family>/<major>/<minor>/<patch>/`
//! holding `<key>.schema.json` plus `pass/` and `fail/` test documents.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::compiler::{JsonSchemaCompiler, SchemaCompiler};
use crate::config::{resolve_root, EnvironmentConfig, RegistryConfig};
use crate::error::{Result, SchemaError};
use crate::flight::FlightGroup;
use crate::key::{Core, Key, KEY_SEPARATOR, SCHEMA_SUFFIX};
use crate::renderer::Renderer;
use crate::schema::{RenderInfo, Schema, TestDocType};
use crate::version::{next_version, numeric_subdirs, ReleaseType, SemVer};

/// The main schema registry
pub struct Registry {
    /// Canonical path to the registry root
    root: PathBuf,
    config: RegistryConfig,
    compiler: Arc<dyn SchemaCompiler>,
    /// Loaded schemas; only grows until [`Registry::reset`]
    cache: RwLock<HashMap<Key, Arc<Schema>>>,
    loads: FlightGroup<Arc<Schema>>,
    renders: FlightGroup<Arc<RenderInfo>>,
}

impl Registry {
    /// Open the registry at `root` (or [`crate::config::ROOT_DIR_ENV`]),
    /// loading its configuration from disk
    pub fn open(root: Option<&Path>) -> Result<Self> {
        let root = resolve_root(root)?;
        let config = RegistryConfig::load(&root)?;
        Self::new(Some(&root), config)
    }

    /// Create a registry with an explicit configuration
    pub fn new(root: Option<&Path>, config: RegistryConfig) -> Result<Self> {
        Self::with_compiler(root, config, Arc::new(JsonSchemaCompiler::new()))
    }

    /// Create a registry compiling validators with `compiler`
    pub fn with_compiler(
        root: Option<&Path>,
        config: RegistryConfig,
        compiler: Arc<dyn SchemaCompiler>,
    ) -> Result<Self> {
        let root = resolve_root(root)?;
        debug!(root = %root.display(), "opened schema registry");
        Ok(Self {
            root,
            config,
            compiler,
            cache: RwLock::new(HashMap::new()),
            loads: FlightGroup::new(),
            renders: FlightGroup::new(),
        })
    }

    /// Get the root path of the registry
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Resolve an environment name through the configuration
    pub fn environment(&self, name: &str) -> Result<EnvironmentConfig> {
        self.config.environment(name)
    }

    /// Number of cached schemas
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Forget every cached schema and compiled document
    pub fn reset(&self) {
        self.cache.write().clear();
        self.compiler.clear();
    }

    fn cached(&self, key: &Key) -> Option<Arc<Schema>> {
        self.cache.read().get(key).cloned()
    }

    fn insert(&self, schema: Schema) -> Arc<Schema> {
        self.cache
            .write()
            .entry(schema.key().clone())
            .or_insert_with(|| Arc::new(schema))
            .clone()
    }

    /// Get a schema, loading it from disk on first use.
    ///
    /// Concurrent first requests for the same key share a single load.
    pub fn get_schema_by_key(&self, key: &Key) -> Result<Arc<Schema>> {
        if let Some(schema) = self.cached(key) {
            return Ok(schema);
        }

        self.loads.run(key.as_str(), || {
            if let Some(schema) = self.cached(key) {
                return Ok(schema);
            }
            let schema = Schema::load(key, self)?;
            debug!(%key, "loaded schema");
            Ok(self.insert(schema))
        })
    }

    /// Create version 1.0.0 of a new family from a `domain/.../family` path
    pub fn create_schema(&self, domain_and_family: &str) -> Result<Arc<Schema>> {
        let core = Core::from_domain_and_family(domain_and_family, SemVer::INITIAL)?;
        let key = core.key();

        if self.cached(&key).is_some() || core.schema_path(&self.root).exists() {
            return Err(SchemaError::AlreadyExists(key.to_string()));
        }

        let schema = Schema::new(&key, self)?.save()?;
        info!(%key, path = %schema.path().display(), "created schema");
        Ok(self.insert(schema))
    }

    /// Create the next version of the schema at `path`
    pub fn create_new_schema_version(&self, path: &Path, release: ReleaseType) -> Result<Arc<Schema>> {
        let key = self.key_from_schema_path(path)?;
        self.create_schema_version(&key, release)
    }

    /// Create the next `release` version of `key` by copying its schema file
    /// and test documents into the new version's directory
    pub fn create_schema_version(&self, key: &Key, release: ReleaseType) -> Result<Arc<Schema>> {
        let current = self.get_schema_by_key(key)?;
        let family_dir = current.core().family_dir(&self.root);
        let version = next_version(&family_dir, current.version(), release)?;

        let core = current.core().with_version(version);
        let new_key = core.key();
        let new_home = core.home_dir(&self.root);
        if self.cached(&new_key).is_some() || new_home.exists() {
            return Err(SchemaError::AlreadyExists(new_key.to_string()));
        }

        copy_dir(current.home_dir(), &new_home)?;
        fs::rename(
            new_home.join(current.key().file_name()),
            core.schema_path(&self.root),
        )?;

        let schema = Schema::load(&new_key, self)?;
        info!(from = %key, to = %new_key, %release, "created schema version");
        Ok(self.insert(schema))
    }

    /// Render and compile `schema` for `env`, at most once per pair.
    ///
    /// Concurrent callers for the same pair wait for the in-flight render;
    /// the rendered document is registered with the compiler exactly once.
    pub fn coordinate_render(&self, schema: &Arc<Schema>, env: &EnvironmentConfig) -> Result<Arc<RenderInfo>> {
        let flight_key = format!("{}:{}", schema.key(), env.name);
        self.renders.run(&flight_key, || {
            if let Some(info) = schema.cached_render(&env.name) {
                return Ok(info);
            }

            let rendered = Renderer::new(self, schema, env).render()?;
            let id = schema.canonical_id(env);
            self.compiler.add_schema(&id, &rendered.document)?;
            let validator = match self.compiler.compile(&id) {
                Ok(validator) => validator,
                Err(e) => {
                    self.compiler.remove_schema(&id);
                    return Err(e);
                }
            };
            debug!(key = %schema.key(), env = %env.name, %id, "rendered and compiled schema");

            Ok(schema.store_render(
                &env.name,
                RenderInfo {
                    id,
                    rendered: rendered.text,
                    document: rendered.document,
                    validator,
                },
            ))
        })
    }

    /// Fail if the `JSM` dependencies reachable from `schema` form a cycle.
    ///
    /// Dependencies that cannot be parsed or loaded are skipped here; the
    /// render reports them.
    pub(crate) fn check_dependency_cycles(&self, schema: &Arc<Schema>) -> Result<()> {
        let mut path = Vec::new();
        let mut done = HashSet::new();
        self.visit_dependencies(schema, &mut path, &mut done)
    }

    fn visit_dependencies(
        &self,
        schema: &Arc<Schema>,
        path: &mut Vec<Key>,
        done: &mut HashSet<Key>,
    ) -> Result<()> {
        let key = schema.key();
        if done.contains(key) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|k| k == key) {
            let mut cycle = path[start..].to_vec();
            cycle.push(key.clone());
            return Err(SchemaError::CircularDependency(cycle));
        }

        path.push(key.clone());
        for arg in schema.template().dependencies() {
            let Ok(core) = Core::parse(arg, KEY_SEPARATOR) else {
                continue;
            };
            let Ok(dependency) = self.get_schema_by_key(&core.key()) else {
                continue;
            };
            self.visit_dependencies(&dependency, path, done)?;
        }
        path.pop();
        done.insert(key.clone());
        Ok(())
    }

    /// Key of the schema file at `path`.
    ///
    /// The file must lie inside the registry root, end in `.schema.json` and
    /// sit in the directory its key names.
    pub fn key_from_schema_path(&self, path: &Path) -> Result<Key> {
        let canonical =
            self.canonical_within_root(path, || SchemaError::NotASchemaFile(path.to_path_buf()))?;
        if !canonical.is_file() {
            return Err(SchemaError::NotASchemaFile(path.to_path_buf()));
        }
        let stem = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(SCHEMA_SUFFIX))
            .ok_or_else(|| SchemaError::NotASchemaFile(path.to_path_buf()))?;

        let core = Core::parse(stem, KEY_SEPARATOR)?;
        if core.schema_path(&self.root) != canonical {
            return Err(SchemaError::MisplacedSchema {
                key: core.key(),
                path: canonical,
            });
        }
        Ok(core.key())
    }

    /// The schema a `pass/` or `fail/` test document belongs to
    pub fn schema_for_test_document(&self, path: &Path) -> Result<(Arc<Schema>, TestDocType)> {
        let not_a_test = || SchemaError::NotATestDocument(path.to_path_buf());
        let canonical = self.canonical_within_root(path, not_a_test)?;

        if !canonical.is_file() || canonical.extension().map_or(true, |ext| ext != "json") {
            return Err(not_a_test());
        }
        let doc_dir = canonical.parent().ok_or_else(not_a_test)?;
        let doc_type = doc_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(TestDocType::from_dir_name)
            .ok_or_else(not_a_test)?;
        let home = doc_dir.parent().ok_or_else(not_a_test)?;

        let mut schema_files = Vec::new();
        for entry in fs::read_dir(home)? {
            let entry_path = entry?.path();
            let is_schema = entry_path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SCHEMA_SUFFIX));
            if is_schema {
                schema_files.push(entry_path);
            }
        }
        let [schema_file] = schema_files.as_slice() else {
            return Err(not_a_test());
        };

        let key = self.key_from_schema_path(schema_file)?;
        Ok((self.get_schema_by_key(&key)?, doc_type))
    }

    /// Canonical form of an existing `path` inside the root; a missing path
    /// fails with `missing()`
    fn canonical_within_root(
        &self,
        path: &Path,
        missing: impl FnOnce() -> SchemaError,
    ) -> Result<PathBuf> {
        let outside = |p: &Path| SchemaError::PathOutsideRoot {
            path: p.to_path_buf(),
            root: self.root.clone(),
        };
        match path.canonicalize() {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(canonical),
            Ok(canonical) => Err(outside(&canonical)),
            Err(_) if path.is_absolute() && !path.starts_with(&self.root) => Err(outside(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
            Err(e) => Err(e.into()),
        }
    }

    /// Later schemas of the same major family, ascending by version
    pub fn major_family_future_schemas(&self, schema: &Schema) -> Result<Vec<Arc<Schema>>> {
        let current = schema.version();
        self.major_family_schemas(schema.core(), |minor| minor >= current.minor(), |minor, patch| {
            (minor, patch) > (current.minor(), current.patch())
        })
    }

    /// Earlier schemas of the same major family, ascending by version
    pub fn major_family_earlier_schemas(&self, schema: &Schema) -> Result<Vec<Arc<Schema>>> {
        let current = schema.version();
        self.major_family_schemas(schema.core(), |minor| minor <= current.minor(), |minor, patch| {
            (minor, patch) < (current.minor(), current.patch())
        })
    }

    fn major_family_schemas(
        &self,
        core: &Core,
        minor_filter: impl Fn(u64) -> bool,
        version_filter: impl Fn(u64, u64) -> bool,
    ) -> Result<Vec<Arc<Schema>>> {
        let major = core.version().major();
        let major_dir = core.major_dir(&self.root);

        let mut schemas = Vec::new();
        for minor in numeric_subdirs(&major_dir)? {
            if !minor_filter(minor) {
                continue;
            }
            for patch in numeric_subdirs(&major_dir.join(minor.to_string()))? {
                if !version_filter(minor, patch) {
                    continue;
                }
                let other = core.with_version(SemVer::new(major, minor, patch)?);
                if !other.schema_path(&self.root).is_file() {
                    debug!(key = %other.key(), "skipping version directory without a schema file");
                    continue;
                }
                schemas.push(self.get_schema_by_key(&other.key())?);
            }
        }
        Ok(schemas)
    }
}

/// Recursively copy `src` to `dst`
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| SchemaError::PathOutsideRoot {
                path: entry.path().to_path_buf(),
                root: src.to_path_buf(),
            })?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Registry) {
        let dir = tempdir().unwrap();
        let registry = Registry::new(Some(dir.path()), RegistryConfig::default()).unwrap();
        (dir, registry)
    }

    fn key(s: &str) -> Key {
        Key::from_trusted(s)
    }

    #[test]
    fn test_create_schema() {
        let (_dir, registry) = setup();
        let schema = registry.create_schema("acme/billing/invoice").unwrap();

        assert_eq!(schema.key().as_str(), "acme_billing_invoice_1_0_0");
        assert!(schema.exists());
        assert!(schema.path().is_file());
        assert!(schema.home_dir().join("pass").is_dir());
        assert!(schema.home_dir().join("fail").is_dir());

        let again = registry.get_schema_by_key(schema.key()).unwrap();
        assert!(Arc::ptr_eq(&schema, &again));
    }

    #[test]
    fn test_create_schema_rejects_existing() {
        let (_dir, registry) = setup();
        registry.create_schema("acme/user").unwrap();
        assert!(matches!(
            registry.create_schema("acme/user"),
            Err(SchemaError::AlreadyExists(_))
        ));

        // Present on disk but not cached
        registry.reset();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create_schema("acme/user"),
            Err(SchemaError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_schema_rejects_bad_names() {
        let (_dir, registry) = setup();
        assert!(registry.create_schema("user").is_err());
        assert!(matches!(
            registry.create_schema("Acme/user"),
            Err(SchemaError::InvalidDomain(_))
        ));
    }

    #[test]
    fn test_load_failure_is_not_cached() {
        let (_dir, registry) = setup();
        assert!(matches!(
            registry.get_schema_by_key(&key("acme_user_1_0_0")),
            Err(SchemaError::SchemaNotFound { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_loads_share_one_schema() {
        let (_dir, registry) = setup();
        let created = registry.create_schema("acme/user").unwrap();
        registry.reset();

        let loaded: Vec<Arc<Schema>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.get_schema_by_key(created.key()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(loaded.iter().all(|s| Arc::ptr_eq(s, &loaded[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_schema_version_copies_tests() {
        let (_dir, registry) = setup();
        let first = registry.create_schema("acme/user").unwrap();
        fs::write(first.home_dir().join("pass").join("ok.json"), "{}").unwrap();

        let minor = registry
            .create_schema_version(first.key(), ReleaseType::Minor)
            .unwrap();
        assert_eq!(minor.key().as_str(), "acme_user_1_1_0");
        assert!(minor.path().is_file());
        assert!(!minor.home_dir().join(first.key().file_name()).exists());
        assert!(minor.home_dir().join("pass").join("ok.json").is_file());

        let major = registry
            .create_new_schema_version(&minor.path(), ReleaseType::Major)
            .unwrap();
        assert_eq!(major.key().as_str(), "acme_user_2_0_0");

        let patch = registry
            .create_schema_version(first.key(), ReleaseType::Patch)
            .unwrap();
        assert_eq!(patch.key().as_str(), "acme_user_1_0_1");
    }

    #[test]
    fn test_key_from_schema_path() {
        let (_dir, registry) = setup();
        let schema = registry.create_schema("acme/user").unwrap();
        assert_eq!(
            registry.key_from_schema_path(&schema.path()).unwrap(),
            *schema.key()
        );

        let pass_doc = schema.home_dir().join("pass").join("a.json");
        fs::write(&pass_doc, "{}").unwrap();
        assert!(matches!(
            registry.key_from_schema_path(&pass_doc),
            Err(SchemaError::NotASchemaFile(_))
        ));
    }

    #[test]
    fn test_key_from_schema_path_rejects_escape() {
        let (_dir, registry) = setup();
        let outside = tempdir().unwrap();
        let file = outside.path().join("acme_user_1_0_0.schema.json");
        fs::write(&file, "{}").unwrap();

        assert!(matches!(
            registry.key_from_schema_path(&file),
            Err(SchemaError::PathOutsideRoot { .. })
        ));
        let dotted = registry.root().join("..").join(outside.path().file_name().unwrap()).join("acme_user_1_0_0.schema.json");
        assert!(matches!(
            registry.key_from_schema_path(&dotted),
            Err(SchemaError::PathOutsideRoot { .. })
        ));
    }

    #[test]
    fn test_missing_paths_are_not_io_errors() {
        let (_dir, registry) = setup();
        assert!(matches!(
            registry.key_from_schema_path(Path::new("no/such/acme_user_1_0_0.schema.json")),
            Err(SchemaError::NotASchemaFile(_))
        ));
        assert!(matches!(
            registry.key_from_schema_path(&registry.root().join("acme_user_1_0_0.schema.json")),
            Err(SchemaError::NotASchemaFile(_))
        ));
        assert!(matches!(
            registry.schema_for_test_document(Path::new("no/such/pass/doc.json")),
            Err(SchemaError::NotATestDocument(_))
        ));
    }

    #[test]
    fn test_failed_compile_can_be_retried() {
        let (_dir, registry) = setup();
        let schema = registry.create_schema("acme/user").unwrap();
        fs::write(schema.path(), r#"{"$id": "{{ ID }}", "type": 12}"#).unwrap();
        registry.reset();

        let schema = registry.get_schema_by_key(schema.key()).unwrap();
        let env = EnvironmentConfig::new("dev", "http://p", "http://q", false);
        for _ in 0..2 {
            let err = schema.render(&registry, &env).unwrap_err();
            assert!(
                matches!(err.innermost(), SchemaError::InvalidJsonSchema { .. }),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn test_key_from_misplaced_schema() {
        let (_dir, registry) = setup();
        let file = registry.root().join("acme_user_1_0_0.schema.json");
        fs::write(&file, "{}").unwrap();
        assert!(matches!(
            registry.key_from_schema_path(&file),
            Err(SchemaError::MisplacedSchema { .. })
        ));
    }

    #[test]
    fn test_schema_for_test_document() {
        let (_dir, registry) = setup();
        let schema = registry.create_schema("acme/user").unwrap();
        let doc = schema.home_dir().join("fail").join("bad.json");
        fs::write(&doc, "{}").unwrap();

        let (found, doc_type) = registry.schema_for_test_document(&doc).unwrap();
        assert!(Arc::ptr_eq(&found, &schema));
        assert_eq!(doc_type, TestDocType::Fail);

        let stray = schema.home_dir().join("stray.json");
        fs::write(&stray, "{}").unwrap();
        assert!(matches!(
            registry.schema_for_test_document(&stray),
            Err(SchemaError::NotATestDocument(_))
        ));
    }

    #[test]
    fn test_major_family_enumeration() {
        let (_dir, registry) = setup();
        let first = registry.create_schema("acme/user").unwrap();
        for release in [ReleaseType::Patch, ReleaseType::Minor, ReleaseType::Major] {
            registry.create_schema_version(first.key(), release).unwrap();
        }
        // 1.0.0, 1.0.1, 1.1.0, 2.0.0 plus an empty version directory
        fs::create_dir_all(first.core().major_dir(registry.root()).join("1").join("7")).unwrap();

        let middle = registry.get_schema_by_key(&key("acme_user_1_0_1")).unwrap();
        let names = |schemas: Vec<Arc<Schema>>| -> Vec<String> {
            schemas.iter().map(|s| s.version().to_string()).collect()
        };
        assert_eq!(names(registry.major_family_future_schemas(&middle).unwrap()), vec!["1.1.0"]);
        assert_eq!(names(registry.major_family_earlier_schemas(&middle).unwrap()), vec!["1.0.0"]);
        assert_eq!(
            names(registry.major_family_future_schemas(&first).unwrap()),
            vec!["1.0.1", "1.1.0"]
        );
    }

    #[test]
    fn test_dependency_cycle_detected() {
        let (_dir, registry) = setup();
        let a = registry.create_schema("acme/a").unwrap();
        let b = registry.create_schema("acme/b").unwrap();
        fs::write(a.path(), r#"{"$ref": "{{ JSM "acme_b_1_0_0" }}"}"#).unwrap();
        fs::write(b.path(), r#"{"$ref": "{{ JSM "acme_a_1_0_0" }}"}"#).unwrap();
        registry.reset();

        let a = registry.get_schema_by_key(a.key()).unwrap();
        let env = EnvironmentConfig::new("dev", "http://p", "http://q", false);
        match a.render(&registry, &env) {
            Err(SchemaError::CircularDependency(cycle)) => {
                let names: Vec<_> = cycle.iter().map(Key::as_str).collect();
                assert_eq!(names, vec!["acme_a_1_0_0", "acme_b_1_0_0", "acme_a_1_0_0"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }
}
