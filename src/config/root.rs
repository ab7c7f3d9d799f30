use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::{ConfigError, HandlerDef, Settings};

/// Top-level configuration
///
/// Example:
/// ```json
/// {
///   "settings": { "xsrfCookies": true },
///   "handlers": {
///     "Base":  { "middleware": ["session"] },
///     "Admin": { "extends": ["Base"], "middleware": ["auth"] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GauntletConfig {
    /// Settings shared by every pipeline
    #[serde(default)]
    pub settings: Settings,

    /// Pipeline types by name
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerDef>,
}

impl GauntletConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GauntletConfig = serde_json::from_str(json)?;
        config.settings.validate()?;
        Ok(config)
    }

    pub fn handler(&self, name: &str) -> Result<&HandlerDef, ConfigError> {
        self.handlers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownHandler {
                name: name.to_string(),
            })
    }
}
