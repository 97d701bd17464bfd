//! End-to-end test runs over schema families

use std::fs;
use std::path::Path;

use json_schema_manager::{
    DirectorySearcher, EnvironmentConfig, Key, Registry, RegistryConfig, ReleaseType, Schema,
    SchemaError, SemVer, TestDocType, TestOptions, TestScope, Tester,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn env() -> EnvironmentConfig {
    EnvironmentConfig::new("dev", "https://pub.example", "https://priv.example", false)
}

fn options(scope: TestScope) -> TestOptions {
    TestOptions {
        scope,
        stop_on_first_error: false,
        skip_compatibility_check: false,
        workers: 4,
    }
}

/// A registry with no cached state, so every run sees the files on disk
fn fresh(root: &Path) -> Registry {
    Registry::new(Some(root), RegistryConfig::default()).unwrap()
}

fn write_source(schema: &Schema, body: &str) {
    fs::write(schema.path(), body).unwrap();
}

fn write_doc(schema: &Schema, doc_type: TestDocType, name: &str, body: &str) {
    fs::write(schema.home_dir().join(doc_type.dir_name()).join(name), body).unwrap();
}

fn key(s: &str) -> Key {
    Key::from_trusted(s)
}

#[test]
fn test_consumer_breaking_detection() {
    let dir = tempdir().unwrap();
    let registry = fresh(dir.path());
    let v100 = registry.create_schema("acme/user").unwrap();
    write_source(
        &v100,
        r#"{
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$id": "{{ ID }}",
            "type": "object",
            "properties": {"extra": {"type": "integer"}},
            "additionalProperties": false
        }"#,
    );
    let v110 = registry.create_schema_version(v100.key(), ReleaseType::Minor).unwrap();
    let v120 = registry.create_schema_version(v110.key(), ReleaseType::Minor).unwrap();
    write_doc(&v110, TestDocType::Pass, "empty.json", "{}");
    write_doc(&v120, TestDocType::Pass, "extra.json", r#"{"extra": 1}"#);

    let registry = fresh(dir.path());
    let tester = Tester::new(&registry, env(), options(TestScope::ConsumerBreaking));
    let report = tester
        .test_single_schema(&CancellationToken::new(), &key("acme_user_1_0_0"))
        .unwrap();
    assert!(!report.has_failures());
    let mut forwards: Vec<_> = report
        .passed_for(&key("acme_user_1_0_0"))
        .iter()
        .map(|s| s.forward_version().unwrap().to_string())
        .collect();
    forwards.sort();
    assert_eq!(forwards, vec!["1.1.0", "1.2.0"]);

    write_doc(&v110, TestDocType::Pass, "nickname.json", r#"{"nickname": "x"}"#);
    let registry = fresh(dir.path());
    let tester = Tester::new(&registry, env(), options(TestScope::ConsumerBreaking));
    let report = tester
        .test_single_schema(&CancellationToken::new(), &key("acme_user_1_0_0"))
        .unwrap();

    assert_eq!(report.failed_count(), 1);
    let failed = report.failed_for(&key("acme_user_1_0_0"));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].forward_version(), Some(SemVer::new(1, 1, 0).unwrap()));
    assert_eq!(
        failed[0].result_label(),
        "failed: future version 1.1.0 introduced a breaking change!"
    );
    assert_eq!(report.passed_count(), 2);
}

#[test]
fn test_provider_compatibility_check() {
    let dir = tempdir().unwrap();
    let registry = fresh(dir.path());
    let v100 = registry.create_schema("acme/user").unwrap();
    write_source(&v100, r#"{"$id": "{{ ID }}", "type": "object", "required": ["name"]}"#);
    let v101 = registry.create_schema_version(v100.key(), ReleaseType::Patch).unwrap();
    write_source(&v101, r#"{"$id": "{{ ID }}", "type": "object"}"#);
    write_doc(&v101, TestDocType::Pass, "empty.json", "{}");

    let registry = fresh(dir.path());
    let tester = Tester::new(&registry, env(), options(TestScope::Local));
    let report = tester
        .test_single_schema(&CancellationToken::new(), &key("acme_user_1_0_1"))
        .unwrap();

    assert_eq!(report.passed_for(&key("acme_user_1_0_1")).len(), 1);
    assert!(report.failed_for(&key("acme_user_1_0_1")).is_empty());
    let failed = report.failed_for(&key("acme_user_1_0_0"));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].forward_version(), Some(SemVer::new(1, 0, 1).unwrap()));
    assert!(matches!(failed[0].err(), Some(SchemaError::PassTestFailed { .. })));

    let skipping = Tester::new(
        &registry,
        env(),
        TestOptions {
            skip_compatibility_check: true,
            ..options(TestScope::Local)
        },
    );
    let report = skipping
        .test_single_schema(&CancellationToken::new(), &key("acme_user_1_0_1"))
        .unwrap();
    assert!(!report.has_failures());
}

#[test]
fn test_compatibility_check_needs_passing_local_tests() {
    let dir = tempdir().unwrap();
    let registry = fresh(dir.path());
    let v100 = registry.create_schema("acme/user").unwrap();
    write_source(&v100, r#"{"$id": "{{ ID }}", "type": "object", "required": ["name"]}"#);
    let v101 = registry.create_schema_version(v100.key(), ReleaseType::Patch).unwrap();
    write_source(&v101, r#"{"$id": "{{ ID }}", "type": "object"}"#);
    write_doc(&v101, TestDocType::Pass, "empty.json", "{}");
    write_doc(&v101, TestDocType::Fail, "also-empty.json", "{}");

    let registry = fresh(dir.path());
    let tester = Tester::new(&registry, env(), options(TestScope::Local));
    let report = tester
        .test_single_schema(&CancellationToken::new(), &key("acme_user_1_0_1"))
        .unwrap();

    assert_eq!(report.failed_for(&key("acme_user_1_0_1")).len(), 1);
    assert!(report.failed_for(&key("acme_user_1_0_0")).is_empty());
}

fn failing_registry(root: &Path, families: usize) {
    let registry = fresh(root);
    for i in 0..families {
        let schema = registry.create_schema(&format!("acme/family-{i}")).unwrap();
        write_source(&schema, r#"{"$id": "{{ ID }}", "type": "object", "required": ["name"]}"#);
        for n in 0..3 {
            write_doc(&schema, TestDocType::Pass, &format!("unnamed-{n}.json"), "{}");
        }
    }
}

#[test]
fn test_full_run_reports_every_failure() {
    let dir = tempdir().unwrap();
    failing_registry(dir.path(), 5);
    let registry = fresh(dir.path());

    let tester = Tester::new(&registry, env(), options(TestScope::Local));
    let report = tester
        .test_found_schemas(&CancellationToken::new(), &DirectorySearcher::new(&registry))
        .unwrap();
    assert_eq!(report.failed_count(), 15);
    assert_eq!(report.failed().len(), 5);
}

#[test]
fn test_stop_on_first_error_returns_partial_report() {
    let dir = tempdir().unwrap();
    failing_registry(dir.path(), 5);
    let registry = fresh(dir.path());

    let tester = Tester::new(
        &registry,
        env(),
        TestOptions {
            stop_on_first_error: true,
            workers: 1,
            ..options(TestScope::Local)
        },
    );
    let report = tester
        .test_found_schemas(&CancellationToken::new(), &DirectorySearcher::new(&registry))
        .unwrap();
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.passed_count(), 0);
}

#[test]
fn test_infrastructure_error_is_returned() {
    let dir = tempdir().unwrap();
    failing_registry(dir.path(), 2);
    let registry = fresh(dir.path());
    let broken = registry.get_schema_by_key(&key("acme_family-1_1_0_0")).unwrap();
    write_doc(&broken, TestDocType::Pass, "broken.json", "{");

    let registry = fresh(dir.path());
    let tester = Tester::new(&registry, env(), options(TestScope::Local));
    let err = tester
        .test_found_schemas(&CancellationToken::new(), &DirectorySearcher::new(&registry))
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidTestDocument { .. }));
}

#[test]
fn test_caller_cancellation_wins() {
    let dir = tempdir().unwrap();
    failing_registry(dir.path(), 3);
    let registry = fresh(dir.path());
    let tester = Tester::new(
        &registry,
        env(),
        TestOptions {
            stop_on_first_error: true,
            ..options(TestScope::All)
        },
    );

    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        tester.test_found_schemas(&token, &DirectorySearcher::new(&registry)),
        Err(SchemaError::Cancelled)
    ));
    assert!(matches!(
        tester.test_single_schema(&token, &key("acme_family-0_1_0_0")),
        Err(SchemaError::Cancelled)
    ));
}
