//! Validator compilation
//!
//! The registry never interprets JSON Schema itself. Rendered documents are
//! registered with a [`SchemaCompiler`] under their canonical ID and compiled
//! into a [`Validator`]. [`JsonSchemaCompiler`] is the implementation backed by
//! the `jsonschema` crate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Validation errors reported for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub errors: Vec<String>,
}

impl ValidationFailure {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// A compiled schema
pub trait Validator: Send + Sync {
    fn validate(&self, document: &Value) -> std::result::Result<(), ValidationFailure>;
}

/// Registers rendered schema documents and compiles them into validators
pub trait SchemaCompiler: Send + Sync {
    /// Register `document` under `id`; registering the same ID twice is an error
    fn add_schema(&self, id: &str, document: &Value) -> Result<()>;

    /// Compile the document registered under `id`
    fn compile(&self, id: &str) -> Result<Arc<dyn Validator>>;

    /// Forget the document registered under `id`, if any
    fn remove_schema(&self, id: &str);

    /// Forget every registered document
    fn clear(&self);
}

/// [`SchemaCompiler`] backed by the `jsonschema` crate.
///
/// Every registered document is offered to later compilations, so a `$ref`
/// to the canonical ID of an already-registered schema resolves locally.
#[derive(Default)]
pub struct JsonSchemaCompiler {
    documents: RwLock<HashMap<String, Value>>,
}

impl JsonSchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaCompiler for JsonSchemaCompiler {
    fn add_schema(&self, id: &str, document: &Value) -> Result<()> {
        let mut documents = self.documents.write();
        if documents.contains_key(id) {
            return Err(SchemaError::AlreadyExists(format!(
                "compiler resource {id}"
            )));
        }
        documents.insert(id.to_string(), document.clone());
        Ok(())
    }

    fn compile(&self, id: &str) -> Result<Arc<dyn Validator>> {
        let documents = self.documents.read();
        let root = documents.get(id).ok_or_else(|| SchemaError::InvalidJsonSchema {
            id: id.to_string(),
            message: "no document registered under this ID".to_string(),
        })?;

        let mut options = JSONSchema::options();
        for (doc_id, doc) in documents.iter() {
            options.with_document(doc_id.clone(), doc.clone());
        }
        let compiled = options
            .compile(root)
            .map_err(|e| SchemaError::InvalidJsonSchema {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        Ok(Arc::new(CompiledSchema { compiled }))
    }

    fn remove_schema(&self, id: &str) {
        self.documents.write().remove(id);
    }

    fn clear(&self) {
        self.documents.write().clear();
    }
}

struct CompiledSchema {
    compiled: JSONSchema,
}

impl Validator for CompiledSchema {
    fn validate(&self, document: &Value) -> std::result::Result<(), ValidationFailure> {
        self.compiled.validate(document).map_err(|errors| {
            ValidationFailure::new(
                errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        let path = if path.is_empty() { "/".to_string() } else { path };
                        format!("{path}: {e}")
                    })
                    .collect(),
            )
        })
    }
}
