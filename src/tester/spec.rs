//! A single test case and its outcome

use std::fmt;
use std::sync::Arc;

use crate::compiler::Validator;
use crate::error::SchemaError;
use crate::schema::{Schema, TestDocType, TestInfo};
use crate::version::SemVer;

/// One test case: a test document checked against a validator.
///
/// `schema` is the schema the document belongs to. When `forward_version` is
/// set the document comes from a later version of the family than the
/// validator it is checked against.
#[derive(Debug, Clone)]
pub struct Spec {
    schema: Arc<Schema>,
    test: TestInfo,
    doc_type: TestDocType,
    forward_version: Option<SemVer>,
    err: Option<Arc<SchemaError>>,
}

impl Spec {
    pub fn new(schema: Arc<Schema>, test: TestInfo, doc_type: TestDocType) -> Self {
        Self {
            schema,
            test,
            doc_type,
            forward_version: None,
            err: None,
        }
    }

    pub fn with_forward_version(mut self, version: SemVer) -> Self {
        self.forward_version = Some(version);
        self
    }

    /// Check the document: pass documents must validate, fail documents must not
    pub fn run(&mut self, validator: &dyn Validator) {
        let outcome = validator.validate(&self.test.document);
        self.err = match (self.doc_type, outcome) {
            (TestDocType::Pass, Ok(())) | (TestDocType::Fail, Err(_)) => None,
            (TestDocType::Pass, Err(source)) => Some(Arc::new(SchemaError::PassTestFailed {
                path: self.test.path.clone(),
                source,
            })),
            (TestDocType::Fail, Ok(())) => Some(Arc::new(SchemaError::FailTestPassed {
                path: self.test.path.clone(),
            })),
        };
    }

    pub fn passed(&self) -> bool {
        self.err.is_none()
    }

    pub fn err(&self) -> Option<&SchemaError> {
        self.err.as_deref()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn test(&self) -> &TestInfo {
        &self.test
    }

    pub fn doc_type(&self) -> TestDocType {
        self.doc_type
    }

    pub fn forward_version(&self) -> Option<SemVer> {
        self.forward_version
    }

    /// Human-readable outcome
    pub fn result_label(&self) -> String {
        match (self.passed(), self.forward_version) {
            (true, None) => "passed".to_string(),
            (true, Some(v)) => format!("passed (compatible with version {v})"),
            (false, None) => "failed".to_string(),
            (false, Some(v)) => format!("failed: future version {v} introduced a breaking change!"),
        }
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.schema.key(),
            self.doc_type,
            self.test.path.display(),
            self.result_label()
        )?;
        if let Some(err) = &self.err {
            write!(f, " ({err})")?;
        }
        Ok(())
    }
}
