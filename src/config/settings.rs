use serde::{Deserialize, Serialize};
use validator::Validate;

use super::HttpMethod;
use crate::continuation::DEFAULT_CALLBACK_ARG_NAME;

/// What happens when an `after` or `after_finish` stage fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterErrorPolicy {
    /// Stop at the first failure and return it
    #[default]
    Abort,
    /// Log the failure, keep running the remaining stages and the response
    /// step, then return the first failure
    Continue,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Check the security token on non-safe methods
    #[serde(default)]
    pub xsrf_cookies: bool,

    /// Name the completion callback goes by in log output
    ///
    /// Only a diagnostics label: the callback itself is always passed as a
    /// separate argument, so this never changes which callable runs or what
    /// it receives.
    #[serde(default = "default_callback_arg_name")]
    #[validate(length(min = 1))]
    pub callback_arg_name: String,

    /// Failure handling for cleanup stages
    #[serde(default)]
    pub after_errors: AfterErrorPolicy,

    /// Methods any pipeline built from this configuration accepts
    #[serde(default = "default_supported_methods")]
    #[validate(length(min = 1))]
    pub supported_methods: Vec<HttpMethod>,
}

fn default_callback_arg_name() -> String {
    DEFAULT_CALLBACK_ARG_NAME.to_string()
}

fn default_supported_methods() -> Vec<HttpMethod> {
    HttpMethod::ALL.to_vec()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            xsrf_cookies: false,
            callback_arg_name: default_callback_arg_name(),
            after_errors: AfterErrorPolicy::default(),
            supported_methods: default_supported_methods(),
        }
    }
}
