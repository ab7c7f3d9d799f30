use thiserror::Error;

/// Errors found while loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("unknown handler '{name}'")]
    UnknownHandler { name: String },

    #[error("handler '{handler}' extends unknown handler '{parent}'")]
    UnknownParent { handler: String, parent: String },

    #[error("handler '{handler}' uses unregistered middleware '{middleware}'")]
    UnknownMiddleware { handler: String, middleware: String },

    #[error("inheritance cycle: {}", chain.join(" -> "))]
    InheritanceCycle { chain: Vec<String> },
}
