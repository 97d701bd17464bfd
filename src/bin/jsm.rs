//! JSON Schema Manager CLI
//!
//! Creates schemas and schema versions, renders them for an environment and
//! runs their test documents.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use json_schema_manager::{
    DirectorySearcher, Key, Registry, ReleaseType, TestOptions, TestReport, TestScope, Tester,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jsm")]
#[command(about = "Manage, render and test a versioned JSON Schema registry")]
struct Cli {
    /// Registry root (defaults to $JSM_REGISTRY_ROOT_DIR)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create version 1.0.0 of a new schema family
    New {
        /// Domain path and family name, e.g. acme/billing/invoice
        domain_and_family: String,
    },

    /// Create the next version of an existing schema
    Version {
        /// Path of the schema file to bump
        schema: PathBuf,
        /// major, minor or patch
        release: ReleaseType,
    },

    /// Render a schema for an environment and print it
    Render {
        /// Path of the schema file
        schema: PathBuf,
        #[arg(short, long, default_value = "dev")]
        env: String,
    },

    /// Run test documents
    Test {
        /// Schema files, test documents or directories (defaults to the whole registry)
        targets: Vec<PathBuf>,
        #[arg(short, long, default_value = "dev")]
        env: String,
        /// local, pass-only, fail-only, consumer-breaking or all
        #[arg(short, long)]
        scope: Option<TestScope>,
        /// Stop after the first failing test
        #[arg(long)]
        stop_on_first_error: bool,
        /// Do not check pass documents against earlier versions
        #[arg(long)]
        skip_compatibility_check: bool,
        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether every test passed
fn run(cli: Cli) -> anyhow::Result<bool> {
    let registry = Registry::open(cli.registry.as_deref()).context("failed to open registry")?;

    match cli.command {
        Commands::New { domain_and_family } => {
            let schema = registry.create_schema(&domain_and_family)?;
            println!("✅ Created {} at {}", schema.key(), schema.path().display());
            Ok(true)
        }

        Commands::Version { schema, release } => {
            let created = registry.create_new_schema_version(&schema, release)?;
            println!("✅ Created {} at {}", created.key(), created.path().display());
            Ok(true)
        }

        Commands::Render { schema, env } => {
            let env = registry.environment(&env)?;
            let key = registry.key_from_schema_path(&schema)?;
            let schema = registry.get_schema_by_key(&key)?;
            let info = schema.render(&registry, &env)?;
            println!("{}", info.rendered);
            Ok(true)
        }

        Commands::Test {
            targets,
            env,
            scope,
            stop_on_first_error,
            skip_compatibility_check,
            workers,
        } => {
            let env_config = registry.environment(&env)?;
            let mut options = TestOptions::from(&registry.config().testing);
            if let Some(scope) = scope {
                options.scope = scope;
            }
            options.stop_on_first_error |= stop_on_first_error;
            options.skip_compatibility_check |= skip_compatibility_check;
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let tester = Tester::new(&registry, env_config, options);

            println!("🔍 Testing in environment '{}' (scope {})", env, tester.options().scope);
            let cancel = CancellationToken::new();
            let reports = if targets.is_empty() {
                vec![tester.test_found_schemas(&cancel, &DirectorySearcher::new(&registry))?]
            } else {
                targets
                    .iter()
                    .map(|target| test_target(&registry, &tester, &cancel, target))
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let mut all_passed = true;
            for report in &reports {
                print_report(report);
                all_passed &= !report.has_failures();
            }
            Ok(all_passed)
        }
    }
}

fn test_target(
    registry: &Registry,
    tester: &Tester<'_>,
    cancel: &CancellationToken,
    target: &Path,
) -> anyhow::Result<TestReport> {
    if target.is_dir() {
        let searcher = DirectorySearcher::within(registry, target)?;
        return Ok(tester.test_found_schemas(cancel, &searcher)?);
    }
    if !target.is_file() {
        bail!("no such file or directory: {}", target.display());
    }

    let key: Key = match registry.key_from_schema_path(target) {
        Ok(key) => key,
        Err(_) => registry
            .schema_for_test_document(target)
            .with_context(|| format!("{} is neither a schema file nor a test document", target.display()))?
            .0
            .key()
            .clone(),
    };
    Ok(tester.test_single_schema(cancel, &key)?)
}

fn print_report(report: &TestReport) {
    for (key, specs) in report.failed() {
        println!("❌ {}", key);
        for spec in specs {
            println!("   └─ {}", spec);
        }
    }
    for (key, specs) in report.passed() {
        println!("✅ {} - {} passed", key, specs.len());
    }
    println!();
    println!("{}", report.summary());
}
