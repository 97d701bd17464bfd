//! Error types for the schema registry

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::compiler::ValidationFailure;
use crate::key::Key;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Invalid domain '{0}': segments must match ^[a-z0-9-]+$ and at least one is required")]
    InvalidDomain(String),

    #[error("Invalid family name '{0}': must match ^[a-z0-9-]+$")]
    InvalidFamily(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid key format '{input}': {reason}")]
    InvalidKeyFormat { input: String, reason: String },

    #[error("Schema not found: {key} (expected at {path:?})")]
    SchemaNotFound { key: Key, path: PathBuf },

    #[error("Schema already exists: {0}")]
    AlreadyExists(String),

    #[error("Registry root is not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("Location {path:?} is outside the registry root {root:?}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Not a schema file: {0:?}")]
    NotASchemaFile(PathBuf),

    #[error("Schema file {path:?} is not in the directory of key {key}")]
    MisplacedSchema { key: Key, path: PathBuf },

    #[error("Not a test document (expected <schema home>/pass|fail/*.json): {0:?}")]
    NotATestDocument(PathBuf),

    #[error("Template syntax error in {key} at offset {offset}: {message}")]
    TemplateParse {
        key: Key,
        offset: usize,
        message: String,
    },

    #[error("Template execution failed for {key}: {source}")]
    TemplateExecution {
        key: Key,
        #[source]
        source: Box<SchemaError>,
    },

    #[error("Invalid JSM argument '{arg}': {source}")]
    InvalidDependencyKey {
        arg: String,
        #[source]
        source: Box<SchemaError>,
    },

    #[error("Dependency {key} could not be loaded: {source}")]
    DependencyNotLoaded {
        key: Key,
        #[source]
        source: Box<SchemaError>,
    },

    #[error("Circular JSM dependency: {}", .0.iter().map(Key::as_str).collect::<Vec<_>>().join(" -> "))]
    CircularDependency(Vec<Key>),

    #[error("Rendered {key} is not valid JSON: {source}")]
    InvalidJson {
        key: Key,
        #[source]
        source: serde_json::Error,
    },

    #[error("Rendered {id} is not a valid JSON Schema: {message}")]
    InvalidJsonSchema { id: String, message: String },

    #[error("Test document {path:?} is not valid JSON: {source}")]
    InvalidTestDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("Unknown test scope '{0}' (expected local, pass-only, fail-only, consumer-breaking or all)")]
    UnknownTestScope(String),

    #[error("Pass test {path:?} failed validation: {source}")]
    PassTestFailed {
        path: PathBuf,
        #[source]
        source: ValidationFailure,
    },

    #[error("Fail test {path:?} unexpectedly passed validation")]
    FailTestPassed { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Shared(Arc<SchemaError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    /// The error underneath any `Shared` and `TemplateExecution` wrappers.
    pub fn innermost(&self) -> &SchemaError {
        match self {
            SchemaError::Shared(inner) => inner.innermost(),
            SchemaError::TemplateExecution { source, .. } => source.innermost(),
            other => other,
        }
    }

    /// Whether this is an expected test outcome rather than a fault.
    pub fn is_test_outcome(&self) -> bool {
        matches!(
            self.innermost(),
            SchemaError::PassTestFailed { .. } | SchemaError::FailTestPassed { .. }
        )
    }
}

impl From<Arc<SchemaError>> for SchemaError {
    fn from(shared: Arc<SchemaError>) -> Self {
        Arc::try_unwrap(shared).unwrap_or_else(SchemaError::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_looks_through_wrappers() {
        let key = Key::from_trusted("acme_user_1_0_0");
        let err = SchemaError::Shared(Arc::new(SchemaError::TemplateExecution {
            key,
            source: Box::new(SchemaError::UnknownEnvironment("qa".to_string())),
        }));
        assert!(matches!(err.innermost(), SchemaError::UnknownEnvironment(_)));
    }

    #[test]
    fn test_unshared_arc_unwraps_to_original() {
        let err: SchemaError = Arc::new(SchemaError::Cancelled).into();
        assert!(matches!(err, SchemaError::Cancelled));

        let shared = Arc::new(SchemaError::Cancelled);
        let _other = shared.clone();
        let err: SchemaError = shared.into();
        assert!(matches!(err, SchemaError::Shared(_)));
    }
}
