//! Template execution for one schema in one environment

use std::sync::Arc;

use serde_json::Value;

use crate::config::EnvironmentConfig;
use crate::error::{Result, SchemaError};
use crate::key::{Core, KEY_SEPARATOR};
use crate::registry::Registry;
use crate::schema::Schema;
use crate::template::Directive;

/// Output of a successful render, before compilation
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub document: Value,
}

/// Renders a single `(schema, environment)` pair. Not reused across renders.
pub struct Renderer<'a> {
    registry: &'a Registry,
    schema: &'a Arc<Schema>,
    env: &'a EnvironmentConfig,
}

impl<'a> Renderer<'a> {
    pub fn new(registry: &'a Registry, schema: &'a Arc<Schema>, env: &'a EnvironmentConfig) -> Self {
        Self {
            registry,
            schema,
            env,
        }
    }

    /// Execute the template and parse the result as JSON.
    ///
    /// Every `JSM` dependency is loaded and rendered along the way, so a
    /// broken dependency fails this render.
    pub fn render(self) -> Result<Rendered> {
        let key = self.schema.key();
        let template = self.schema.template().clone();

        let text = template
            .execute(|directive| match directive {
                Directive::Id => Ok(self.schema.canonical_id(self.env)),
                Directive::Jsm(arg) => self.resolve_dependency(arg),
            })
            .map_err(|source| SchemaError::TemplateExecution {
                key: key.clone(),
                source: Box::new(source),
            })?;

        let document = serde_json::from_str(&text).map_err(|source| SchemaError::InvalidJson {
            key: key.clone(),
            source,
        })?;

        Ok(Rendered { text, document })
    }

    /// `JSM "<key>"`: the dependency's canonical ID, after rendering it
    fn resolve_dependency(&self, arg: &str) -> Result<String> {
        let core = Core::parse(arg, KEY_SEPARATOR).map_err(|source| SchemaError::InvalidDependencyKey {
            arg: arg.to_string(),
            source: Box::new(source),
        })?;
        let dep_key = core.key();

        let dependency = self
            .registry
            .get_schema_by_key(&dep_key)
            .map_err(|source| SchemaError::DependencyNotLoaded {
                key: dep_key.clone(),
                source: Box::new(source),
            })?;

        tracing::debug!(schema = %self.schema.key(), dependency = %dep_key, env = %self.env.name, "rendering dependency");
        dependency.render(self.registry, self.env)?;
        Ok(dependency.canonical_id(self.env))
    }
}
