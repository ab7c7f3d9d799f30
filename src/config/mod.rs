/// Configuration types for gauntlet
///
/// This module contains types for parsing and representing
/// the JSON configuration format: settings plus named pipeline types.

mod error;
mod handler;
mod method;
mod root;
mod settings;

pub use error::ConfigError;
pub use handler::HandlerDef;
pub use method::{HttpMethod, UnknownMethod};
pub use root::GauntletConfig;
pub use settings::{AfterErrorPolicy, Settings};
