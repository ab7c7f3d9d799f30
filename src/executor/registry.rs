use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{ConfigError, GauntletConfig, HttpMethod};
use crate::pipeline::MiddlewareClass;

use super::{Action, Pipeline};

/// Named middleware classes and per-handler actions that configuration
/// refers to
///
/// # Example
/// ```
/// use gauntlet::config::{GauntletConfig, HttpMethod};
/// use gauntlet::executor::{Registry, sync_action};
/// use gauntlet::pipeline::{Middleware, MiddlewareClass};
///
/// #[derive(Default)]
/// struct Session;
/// impl Middleware for Session {}
///
/// let config = GauntletConfig::from_json(
///     r#"{"handlers": {"Home": {"middleware": ["session"]}}}"#,
/// )
/// .unwrap();
///
/// let pipelines = Registry::new()
///     .with_middleware(MiddlewareClass::of::<Session>("session"))
///     .with_action("Home", HttpMethod::Get, sync_action(|_cx, _args| Ok(())))
///     .build(&config)
///     .unwrap();
///
/// assert_eq!(pipelines["Home"].middleware().names(), vec!["session"]);
/// ```
#[derive(Default)]
pub struct Registry {
    middleware: HashMap<String, MiddlewareClass>,
    actions: HashMap<String, BTreeMap<HttpMethod, Arc<dyn Action>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware class under its own name
    pub fn with_middleware(mut self, class: MiddlewareClass) -> Self {
        self.middleware.insert(class.name().to_string(), class);
        self
    }

    /// Register the action a handler runs for one method
    pub fn with_action(
        mut self,
        handler: impl Into<String>,
        method: HttpMethod,
        action: impl Action + 'static,
    ) -> Self {
        self.actions
            .entry(handler.into())
            .or_default()
            .insert(method, Arc::new(action));
        self
    }

    /// Build every handler declared in `config`
    pub fn build(
        &self,
        config: &GauntletConfig,
    ) -> Result<BTreeMap<String, Arc<Pipeline>>, ConfigError> {
        let mut built = BTreeMap::new();
        for name in config.handlers.keys() {
            self.resolve(config, name, &mut Vec::new(), &mut built)?;
        }

        tracing::debug!(count = built.len(), "pipelines built from configuration");
        Ok(built)
    }

    /// Build one handler and the ancestors it needs
    pub fn build_one(
        &self,
        config: &GauntletConfig,
        name: &str,
    ) -> Result<Arc<Pipeline>, ConfigError> {
        self.resolve(config, name, &mut Vec::new(), &mut BTreeMap::new())
    }

    fn resolve(
        &self,
        config: &GauntletConfig,
        name: &str,
        chain: &mut Vec<String>,
        built: &mut BTreeMap<String, Arc<Pipeline>>,
    ) -> Result<Arc<Pipeline>, ConfigError> {
        if let Some(pipeline) = built.get(name) {
            return Ok(Arc::clone(pipeline));
        }

        if let Some(start) = chain.iter().position(|seen| seen == name) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ConfigError::InheritanceCycle { chain: cycle });
        }

        let def = config.handler(name)?;
        chain.push(name.to_string());

        let mut parents = Vec::with_capacity(def.extends.len());
        for parent in &def.extends {
            if !config.handlers.contains_key(parent) {
                return Err(ConfigError::UnknownParent {
                    handler: name.to_string(),
                    parent: parent.clone(),
                });
            }
            parents.push(self.resolve(config, parent, chain, built)?);
        }

        chain.pop();

        let mut builder = Pipeline::derive(name, parents.iter().map(Arc::as_ref))
            .settings(config.settings.clone());

        for middleware in &def.middleware {
            let class = self
                .middleware
                .get(middleware)
                .ok_or_else(|| ConfigError::UnknownMiddleware {
                    handler: name.to_string(),
                    middleware: middleware.clone(),
                })?;
            builder = builder.middleware(class.clone());
        }

        if let Some(actions) = self.actions.get(name) {
            for (method, action) in actions {
                builder = builder.shared_action(*method, Arc::clone(action));
            }
        }

        let pipeline = builder.build();
        tracing::trace!(
            handler = name,
            middleware = ?pipeline.middleware().names(),
            "pipeline resolved"
        );

        built.insert(name.to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }
}
