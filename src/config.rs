//! Configuration management for the Schema Registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (`jsm.toml` or `.jsm.toml` in the registry root)
//! - The XDG config directory
//! - Environment variables (JSM__*)
//!
//! ## Example config file (jsm.toml):
//! ```toml
//! [environments.prod]
//! public_url_root = "https://schemas.example.com/"
//! private_url_root = "https://schemas.internal.example.com/"
//! production = true
//!
//! [environments.dev]
//! public_url_root = "http://localhost:8080/public"
//! private_url_root = "http://localhost:8080/private"
//!
//! [testing]
//! scope = "all"
//! stop_on_first_error = false
//! skip_compatibility_check = false
//! workers = 8
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::tester::TestScope;

/// Environment variable consulted when no registry root is given explicitly
pub const ROOT_DIR_ENV: &str = "JSM_REGISTRY_ROOT_DIR";

/// Config file names looked up inside the registry root
pub const CONFIG_FILE_NAMES: [&str; 2] = ["jsm.toml", ".jsm.toml"];

/// Main configuration for the schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Rendering environments by name
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    /// Test run settings
    #[serde(default)]
    pub testing: TestingConfig,
}

/// URL roots for one rendering environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment name (filled in from the table key)
    #[serde(default, skip_serializing)]
    pub name: String,

    /// Base URL for schemas marked `x-public: true`
    pub public_url_root: String,

    /// Base URL for all other schemas
    pub private_url_root: String,

    /// Whether this is a production environment
    #[serde(default)]
    pub production: bool,
}

impl EnvironmentConfig {
    pub fn new(
        name: impl Into<String>,
        public_url_root: impl Into<String>,
        private_url_root: impl Into<String>,
        production: bool,
    ) -> Self {
        Self {
            name: name.into(),
            public_url_root: public_url_root.into(),
            private_url_root: private_url_root.into(),
            production,
        }
    }

    /// The URL root for the given visibility, ending in exactly one `/`
    pub fn base_url(&self, is_public: bool) -> String {
        let root = if is_public {
            &self.public_url_root
        } else {
            &self.private_url_root
        };
        format!("{}/", root.trim_end_matches('/'))
    }
}

/// Test run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingConfig {
    /// Which test documents apply to a schema under test
    #[serde(default)]
    pub scope: TestScope,

    /// Stop scheduling further tests after the first failing one
    #[serde(default)]
    pub stop_on_first_error: bool,

    /// Skip checking a schema's pass documents against earlier versions
    #[serde(default)]
    pub skip_compatibility_check: bool,

    /// Worker pool size (defaults to available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            scope: TestScope::default(),
            stop_on_first_error: false,
            skip_compatibility_check: false,
            workers: None,
        }
    }
}

impl TestingConfig {
    /// Resolved worker pool size, never zero
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
    }
}

impl RegistryConfig {
    /// Load configuration for the registry rooted at `root`
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(root, None)
    }

    /// Load configuration, additionally reading a specific file
    pub fn load_from(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::from(root.join(name)).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "jsm", "json-schema-manager") {
            let xdg_config = config_dir.config_dir().join("jsm.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("JSM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: RegistryConfig = builder.build()?.try_deserialize()?;
        for (name, env) in config.environments.iter_mut() {
            env.name = name.clone();
        }
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Add or replace an environment
    pub fn with_environment(mut self, env: EnvironmentConfig) -> Self {
        self.environments.insert(env.name.clone(), env);
        self
    }

    /// Resolve an environment by name
    pub fn environment(&self, name: &str) -> Result<EnvironmentConfig> {
        self.environments
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownEnvironment(name.to_string()))
    }
}

/// Resolve the registry root: the explicit path, else [`ROOT_DIR_ENV`].
///
/// The result is canonical and guaranteed to be a directory.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os(ROOT_DIR_ENV)
            .map(PathBuf::from)
            .ok_or_else(|| SchemaError::NotADirectory(PathBuf::new()))?,
    };
    match candidate.canonicalize() {
        Ok(root) if root.is_dir() => Ok(root),
        _ => Err(SchemaError::NotADirectory(candidate)),
    }
}
