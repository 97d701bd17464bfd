//! Schema types and structures
//!
//! A [`Schema`] is one concrete version of a schema family: its identity, the
//! template parsed from its source file and a lock-guarded block of artifacts
//! computed from it per environment (canonical IDs, renders, compiled
//! validators) plus its test documents.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::Validator;
use crate::config::EnvironmentConfig;
use crate::error::{Result, SchemaError};
use crate::key::{Core, Key, SCHEMA_SUFFIX};
use crate::registry::Registry;
use crate::template::Template;
use crate::version::SemVer;

/// Extension property marking a schema as publicly published
pub const PUBLIC_PROPERTY: &str = "x-public";

/// Kind of test document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestDocType {
    /// Must validate cleanly
    Pass,
    /// Must be rejected
    Fail,
}

impl TestDocType {
    /// Directory holding documents of this type, relative to the schema home
    pub fn dir_name(&self) -> &'static str {
        match self {
            TestDocType::Pass => "pass",
            TestDocType::Fail => "fail",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "pass" => Some(TestDocType::Pass),
            "fail" => Some(TestDocType::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for TestDocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A test document and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TestInfo {
    pub path: PathBuf,
    pub document: Value,
}

impl TestInfo {
    /// Read and parse a test document
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let document = serde_json::from_str(&content).map_err(|source| {
            SchemaError::InvalidTestDocument {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }
}

/// Everything produced by one successful render of a schema for an environment
pub struct RenderInfo {
    /// Canonical ID the rendered schema declares
    pub id: String,
    /// Rendered JSON text
    pub rendered: String,
    /// Rendered JSON document
    pub document: Value,
    /// Validator compiled from `document`
    pub validator: Arc<dyn Validator>,
}

impl fmt::Debug for RenderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderInfo")
            .field("id", &self.id)
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}

/// Artifacts derived from a schema source, keyed by environment name
#[derive(Default)]
struct Computed {
    renders: HashMap<String, Arc<RenderInfo>>,
    ids: HashMap<String, String>,
    tests: HashMap<TestDocType, Arc<Vec<TestInfo>>>,
}

/// One concrete version of a schema family
pub struct Schema {
    core: Core,
    key: Key,
    home: PathBuf,
    exists: bool,
    src_doc: String,
    template: Template,
    is_public: bool,
    computed: Mutex<Computed>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("key", &self.key)
            .field("exists", &self.exists)
            .field("is_public", &self.is_public)
            .finish_non_exhaustive()
    }
}

impl Schema {
    /// An in-memory scaffold for `key`; nothing is read or written.
    pub fn new(key: &Key, registry: &Registry) -> Result<Self> {
        let core = Core::from_key(key)?;
        let source = scaffold(&core);
        Self::from_source(core, registry.root(), source, false)
    }

    /// Read and parse the schema source for `key`
    pub fn load(key: &Key, registry: &Registry) -> Result<Self> {
        let core = Core::from_key(key)?;
        let path = core.schema_path(registry.root());
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::SchemaNotFound {
                    key: key.clone(),
                    path,
                })
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_source(core, registry.root(), source, true)
    }

    fn from_source(core: Core, root: &Path, source: String, exists: bool) -> Result<Self> {
        let key = core.key();
        let template = Template::parse(&source).map_err(|e| SchemaError::TemplateParse {
            key: key.clone(),
            offset: e.offset,
            message: e.message,
        })?;
        let is_public = detect_public(&template);
        Ok(Self {
            home: core.home_dir(root),
            core,
            key,
            exists,
            src_doc: source,
            template,
            is_public,
            computed: Mutex::new(Computed::default()),
        })
    }

    /// Write the source and empty `pass/` and `fail/` directories to disk
    pub fn save(self) -> Result<Self> {
        for doc_type in [TestDocType::Pass, TestDocType::Fail] {
            fs::create_dir_all(self.home.join(doc_type.dir_name()))?;
        }
        fs::write(self.path(), &self.src_doc)?;
        Ok(Self {
            exists: true,
            ..self
        })
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn version(&self) -> SemVer {
        self.core.version()
    }

    /// Whether the source file was present on disk when this schema was built
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Raw template source
    pub fn source(&self) -> &str {
        &self.src_doc
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// Directory holding the schema file and its test directories
    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    /// Path of the schema source file
    pub fn path(&self) -> PathBuf {
        self.home.join(self.key.file_name())
    }

    /// The ID this schema is published under in `env`
    pub fn canonical_id(&self, env: &EnvironmentConfig) -> String {
        let mut computed = self.computed.lock();
        computed
            .ids
            .entry(env.name.clone())
            .or_insert_with(|| format!("{}{}{}", env.base_url(self.is_public), self.key, SCHEMA_SUFFIX))
            .clone()
    }

    /// Render and compile this schema for `env`, at most once per environment
    pub fn render(self: &Arc<Self>, registry: &Registry, env: &EnvironmentConfig) -> Result<Arc<RenderInfo>> {
        if let Some(info) = self.cached_render(&env.name) {
            return Ok(info);
        }
        registry.check_dependency_cycles(self)?;
        registry.coordinate_render(self, env)
    }

    pub fn cached_render(&self, env_name: &str) -> Option<Arc<RenderInfo>> {
        self.computed.lock().renders.get(env_name).cloned()
    }

    /// Cache a render; an entry stored first by another path wins.
    pub(crate) fn store_render(&self, env_name: &str, info: RenderInfo) -> Arc<RenderInfo> {
        self.computed
            .lock()
            .renders
            .entry(env_name.to_string())
            .or_insert_with(|| Arc::new(info))
            .clone()
    }

    /// Test documents of the given type, sorted by path
    pub fn test_documents(&self, doc_type: TestDocType) -> Result<Arc<Vec<TestInfo>>> {
        if let Some(docs) = self.computed.lock().tests.get(&doc_type) {
            return Ok(docs.clone());
        }

        let docs = Arc::new(read_test_documents(&self.home.join(doc_type.dir_name()))?);
        Ok(self
            .computed
            .lock()
            .tests
            .entry(doc_type)
            .or_insert(docs)
            .clone())
    }

    /// Drop every computed artifact
    pub fn clear_computed(&self) {
        *self.computed.lock() = Computed::default();
    }
}

fn read_test_documents(dir: &Path) -> Result<Vec<TestInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| TestInfo::load(p)).collect()
}

/// Read `x-public` from the source with every directive stubbed out.
///
/// Sources that do not parse this way are treated as private; the render
/// reports the real problem.
fn detect_public(template: &Template) -> bool {
    template
        .execute(|_| Ok::<_, ()>(String::new()))
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        .and_then(|doc| doc.get(PUBLIC_PROPERTY).and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Source of a freshly created schema
pub fn scaffold(core: &Core) -> String {
    let doc = serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "{{ ID }}",
        "title": core.family_name(),
        "description": format!("{} schema", core.family_name()),
        PUBLIC_PROPERTY: false,
        "type": "object",
        "properties": {},
        "additionalProperties": true,
    });
    // Pretty-printing cannot fail for a `Value` built in memory.
    serde_json::to_string_pretty(&doc).unwrap_or_default() + "\n"
}
