//! Accumulated results of a test run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::key::Key;

use super::spec::Spec;

/// Passed and failed specs of one test run, keyed by the schema whose
/// validator judged them. Safe to fill from many workers at once.
#[derive(Debug)]
pub struct TestReport {
    started_at: DateTime<Utc>,
    passed: Mutex<BTreeMap<Key, Vec<Spec>>>,
    failed: Mutex<BTreeMap<Key, Vec<Spec>>>,
}

impl Default for TestReport {
    fn default() -> Self {
        Self::new()
    }
}

impl TestReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            passed: Mutex::new(BTreeMap::new()),
            failed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn add_passed_test(&self, key: &Key, spec: Spec) {
        self.passed.lock().entry(key.clone()).or_default().push(spec);
    }

    pub fn add_failed_test(&self, key: &Key, spec: Spec) {
        self.failed.lock().entry(key.clone()).or_default().push(spec);
    }

    /// Record `spec` as passed or failed according to its outcome
    pub fn add(&self, key: &Key, spec: Spec) {
        if spec.passed() {
            self.add_passed_test(key, spec);
        } else {
            self.add_failed_test(key, spec);
        }
    }

    /// Snapshot of the passed specs
    pub fn passed(&self) -> BTreeMap<Key, Vec<Spec>> {
        self.passed.lock().clone()
    }

    /// Snapshot of the failed specs
    pub fn failed(&self) -> BTreeMap<Key, Vec<Spec>> {
        self.failed.lock().clone()
    }

    pub fn failed_for(&self, key: &Key) -> Vec<Spec> {
        self.failed.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn passed_for(&self, key: &Key) -> Vec<Spec> {
        self.passed.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn passed_count(&self) -> usize {
        self.passed.lock().values().map(Vec::len).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().values().map(Vec::len).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed.lock().values().any(|specs| !specs.is_empty())
    }

    pub fn summary(&self) -> String {
        let elapsed = Utc::now() - self.started_at;
        format!(
            "{} passed, {} failed in {}ms",
            self.passed_count(),
            self.failed_count(),
            elapsed.num_milliseconds()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ValidationFailure, Validator};
    use crate::config::RegistryConfig;
    use crate::registry::Registry;
    use crate::schema::{Schema, TestDocType, TestInfo};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct RejectAll;

    impl Validator for RejectAll {
        fn validate(&self, _: &Value) -> Result<(), ValidationFailure> {
            Err(ValidationFailure::new(vec!["/: rejected".to_string()]))
        }
    }

    #[test]
    fn test_concurrent_accumulation() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(Some(dir.path()), RegistryConfig::default()).unwrap();
        let key = Key::from_trusted("acme_user_1_0_0");
        let schema = Arc::new(Schema::new(&key, &registry).unwrap());
        let report = TestReport::new();

        std::thread::scope(|s| {
            for i in 0..8 {
                let (report, schema, key) = (&report, schema.clone(), &key);
                s.spawn(move || {
                    for j in 0..10 {
                        let doc_type = if (i + j) % 2 == 0 {
                            TestDocType::Pass
                        } else {
                            TestDocType::Fail
                        };
                        let mut spec = Spec::new(
                            schema.clone(),
                            TestInfo {
                                path: PathBuf::from(format!("{i}-{j}.json")),
                                document: json!({}),
                            },
                            doc_type,
                        );
                        spec.run(&RejectAll);
                        report.add(key, spec);
                    }
                });
            }
        });

        assert_eq!(report.passed_count(), 40);
        assert_eq!(report.failed_count(), 40);
        assert!(report.has_failures());
        assert_eq!(report.failed_for(&key).len(), 40);
        assert!(report.failed_for(&Key::from_trusted("acme_other_1_0_0")).is_empty());
        assert!(report.summary().starts_with("40 passed, 40 failed"));
    }

    #[test]
    fn test_empty_report() {
        let report = TestReport::default();
        assert!(!report.has_failures());
        assert!(report.passed().is_empty());
        assert!(report.started_at() <= Utc::now());
    }
}
