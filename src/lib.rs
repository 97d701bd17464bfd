//! JSON Schema Manager
//!
//! A versioned registry of JSON Schemas. Each schema is a template rendered
//! per deployment environment, compiled into a validator and tested against
//! its own `pass/` and `fail/` documents and those of neighbouring versions in
//! the same major family.
//!
//! ## Features
//!
//! - **Immutable versions**: a new version is a copy of the previous one in
//!   its own directory; existing versions are never rewritten
//! - **Environment rendering**: `{{ ID }}` and `{{ JSM "<key>" }}` directives
//!   expand to environment- and visibility-specific canonical IDs
//! - **Deduplicated work**: a schema is loaded once per key and rendered once
//!   per key and environment, however many threads ask for it
//! - **Compatibility testing**: consumer-breaking detection and provider
//!   compatibility checks across a major family
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── jsm.toml
//! └── acme/
//!     └── user/                     family
//!         └── 1/                    major
//!             ├── 0/                minor
//!             │   └── 0/            patch
//!             │       ├── acme_user_1_0_0.schema.json
//!             │       ├── pass/*.json
//!             │       └── fail/*.json
//!             └── 1/
//!                 └── 0/
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod flight;
pub mod key;
pub mod registry;
pub mod renderer;
pub mod schema;
pub mod search;
pub mod template;
pub mod tester;
pub mod version;

pub use compiler::{JsonSchemaCompiler, SchemaCompiler, ValidationFailure, Validator};
pub use config::{EnvironmentConfig, RegistryConfig, TestingConfig};
pub use error::{Result, SchemaError};
pub use key::{Core, Key};
pub use registry::Registry;
pub use schema::{RenderInfo, Schema, TestDocType, TestInfo};
pub use search::{DirectorySearcher, Searcher};
pub use tester::{Spec, TestOptions, TestReport, TestScope, Tester};
pub use version::{ReleaseType, SemVer};
