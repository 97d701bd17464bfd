//! Schema testing
//!
//! A [`Tester`] renders each schema under test once for its environment and
//! runs the applicable test documents against the resulting validator. Which
//! documents apply is chosen by the [`TestScope`]:
//!
//! - the schema's own `pass/` and `fail/` documents (`local`, `pass-only`,
//!   `fail-only`)
//! - `pass/` documents of later versions in the same major family, checked
//!   against this schema (`consumer-breaking`)
//!
//! After a schema's local documents all pass, its `pass/` documents are also
//! checked against every earlier version in the same major family, and the
//! results are recorded under the earlier version's key.
//!
//! Test failures land in the [`TestReport`]; only infrastructure errors are
//! returned as `Err`.

mod pool;
mod report;
mod spec;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{EnvironmentConfig, TestingConfig};
use crate::error::{Result, SchemaError};
use crate::key::Key;
use crate::registry::Registry;
use crate::schema::{Schema, TestDocType};
use crate::search::Searcher;

use pool::{run_pool, Halt};
pub use report::TestReport;
pub use spec::Spec;

/// Which test documents apply to a schema under test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestScope {
    /// The schema's own pass and fail documents
    #[default]
    Local,
    PassOnly,
    FailOnly,
    /// Pass documents of later versions in the same major family
    ConsumerBreaking,
    /// `Local` plus `ConsumerBreaking`
    All,
}

impl TestScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestScope::Local => "local",
            TestScope::PassOnly => "pass-only",
            TestScope::FailOnly => "fail-only",
            TestScope::ConsumerBreaking => "consumer-breaking",
            TestScope::All => "all",
        }
    }

    /// Whether the schema's own documents of `doc_type` are tested
    pub fn includes_local(&self, doc_type: TestDocType) -> bool {
        match self {
            TestScope::Local | TestScope::All => true,
            TestScope::PassOnly => doc_type == TestDocType::Pass,
            TestScope::FailOnly => doc_type == TestDocType::Fail,
            TestScope::ConsumerBreaking => false,
        }
    }

    pub fn includes_consumer_breaking(&self) -> bool {
        matches!(self, TestScope::ConsumerBreaking | TestScope::All)
    }

    /// Whether passing local tests are followed by the earlier-version check
    pub fn runs_compatibility_check(&self) -> bool {
        matches!(self, TestScope::Local | TestScope::All)
    }
}

impl fmt::Display for TestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestScope {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(TestScope::Local),
            "pass-only" => Ok(TestScope::PassOnly),
            "fail-only" => Ok(TestScope::FailOnly),
            "consumer-breaking" => Ok(TestScope::ConsumerBreaking),
            "all" => Ok(TestScope::All),
            _ => Err(SchemaError::UnknownTestScope(s.to_string())),
        }
    }
}

/// Knobs for one test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOptions {
    pub scope: TestScope,
    pub stop_on_first_error: bool,
    pub skip_compatibility_check: bool,
    /// Size of each worker pool, at least 1
    pub workers: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self::from(&TestingConfig::default())
    }
}

impl From<&TestingConfig> for TestOptions {
    fn from(config: &TestingConfig) -> Self {
        Self {
            scope: config.scope,
            stop_on_first_error: config.stop_on_first_error,
            skip_compatibility_check: config.skip_compatibility_check,
            workers: config.worker_count(),
        }
    }
}

/// Runs test documents against the schemas of one registry and environment
pub struct Tester<'r> {
    registry: &'r Registry,
    env: EnvironmentConfig,
    options: TestOptions,
}

impl<'r> Tester<'r> {
    pub fn new(registry: &'r Registry, env: EnvironmentConfig, options: TestOptions) -> Self {
        Self {
            registry,
            env,
            options: TestOptions {
                workers: options.workers.max(1),
                ..options
            },
        }
    }

    /// A tester for the named environment, with options from the registry's
    /// `[testing]` configuration
    pub fn from_config(registry: &'r Registry, env_name: &str) -> Result<Self> {
        let env = registry.environment(env_name)?;
        let options = TestOptions::from(&registry.config().testing);
        Ok(Self::new(registry, env, options))
    }

    pub fn options(&self) -> &TestOptions {
        &self.options
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    /// Workers for a pool over `items` known items; nested pools never
    /// start more threads than they have work for.
    fn pool_size(&self, items: usize) -> usize {
        self.options.workers.min(items).max(1)
    }

    /// Test one schema
    pub fn test_single_schema(&self, cancel: &CancellationToken, key: &Key) -> Result<TestReport> {
        let report = TestReport::new();
        let outcome = if cancel.is_cancelled() {
            Ok(())
        } else {
            self.test_schema(cancel, key, &report)
        };
        finish(cancel, report, outcome)
    }

    /// Test every schema `searcher` yields, on a bounded pool of workers
    pub fn test_found_schemas(&self, cancel: &CancellationToken, searcher: &dyn Searcher) -> Result<TestReport> {
        let report = TestReport::new();
        let outcome = run_pool(cancel, self.options.workers, searcher.search(), |scope, key: Key| {
            self.test_schema(scope, &key, &report)
        });
        finish(cancel, report, outcome)
    }

    fn test_schema(&self, cancel: &CancellationToken, key: &Key, report: &TestReport) -> std::result::Result<(), Halt> {
        let schema = self.registry.get_schema_by_key(key)?;
        let specs = self.collect_specs(&schema)?;
        let info = schema.render(self.registry, &self.env)?;
        debug!(%key, specs = specs.len(), scope = %self.options.scope, "testing schema");

        let mut local_passed = true;
        for mut spec in specs {
            if cancel.is_cancelled() {
                return Ok(());
            }
            spec.run(info.validator.as_ref());
            if spec.passed() {
                report.add_passed_test(key, spec);
                continue;
            }

            local_passed &= spec.forward_version().is_some();
            info!(%spec, "test failed");
            report.add_failed_test(key, spec);
            if self.options.stop_on_first_error {
                return Err(Halt::Stop);
            }
        }

        if local_passed && self.options.scope.runs_compatibility_check() && !self.options.skip_compatibility_check {
            self.test_schema_compatible_with_earlier_versions(cancel, &schema, report)?;
        }
        Ok(())
    }

    fn collect_specs(&self, schema: &Arc<Schema>) -> Result<Vec<Spec>> {
        let mut specs = Vec::new();
        for doc_type in [TestDocType::Pass, TestDocType::Fail] {
            if !self.options.scope.includes_local(doc_type) {
                continue;
            }
            for test in schema.test_documents(doc_type)?.iter() {
                specs.push(Spec::new(schema.clone(), test.clone(), doc_type));
            }
        }
        if self.options.scope.includes_consumer_breaking() {
            self.append_breaking_specs(schema, &mut specs)?;
        }
        Ok(specs)
    }

    /// Borrow the pass documents of every later version in `schema`'s major
    /// family; they run against `schema`'s own validator.
    fn append_breaking_specs(&self, schema: &Schema, specs: &mut Vec<Spec>) -> Result<()> {
        for future in self.registry.major_family_future_schemas(schema)? {
            for test in future.test_documents(TestDocType::Pass)?.iter() {
                specs.push(
                    Spec::new(future.clone(), test.clone(), TestDocType::Pass)
                        .with_forward_version(future.version()),
                );
            }
        }
        Ok(())
    }

    /// Check `target`'s pass documents against every earlier version of its
    /// major family, recording each result under the earlier version's key.
    fn test_schema_compatible_with_earlier_versions(
        &self,
        cancel: &CancellationToken,
        target: &Arc<Schema>,
        report: &TestReport,
    ) -> std::result::Result<(), Halt> {
        let pass_docs = target.test_documents(TestDocType::Pass)?;
        if pass_docs.is_empty() {
            return Ok(());
        }
        let earlier = self.registry.major_family_earlier_schemas(target)?;
        if earlier.is_empty() {
            return Ok(());
        }
        debug!(key = %target.key(), earlier = earlier.len(), "checking compatibility with earlier versions");

        let workers = self.pool_size(earlier.len());
        run_pool(cancel, workers, earlier.into_iter().map(Ok), |scope, earlier: Arc<Schema>| {
            let info = earlier.render(self.registry, &self.env)?;
            for test in pass_docs.iter() {
                if scope.is_cancelled() {
                    return Ok(());
                }
                let mut spec = Spec::new(target.clone(), test.clone(), TestDocType::Pass)
                    .with_forward_version(target.version());
                spec.run(info.validator.as_ref());
                if spec.passed() {
                    report.add_passed_test(earlier.key(), spec);
                    continue;
                }

                info!(earlier = %earlier.key(), %spec, "earlier version rejects document");
                report.add_failed_test(earlier.key(), spec);
                if self.options.stop_on_first_error {
                    return Err(Halt::Stop);
                }
            }
            Ok(())
        })
    }
}

/// Turn a run outcome into the caller's result. Cancellation by the caller
/// wins over everything; an early stop still returns the report.
fn finish(
    cancel: &CancellationToken,
    report: TestReport,
    outcome: std::result::Result<(), Halt>,
) -> Result<TestReport> {
    if cancel.is_cancelled() {
        return Err(SchemaError::Cancelled);
    }
    match outcome {
        Ok(()) | Err(Halt::Stop) => {
            info!(summary = %report.summary(), "test run finished");
            Ok(report)
        }
        Err(Halt::Failed(err)) => Err(err),
    }
}
