/// gauntlet - A middleware pipeline executor for request handlers
///
/// This library runs each request through validation, a prepare hook,
/// ordered `before` stages, the method's action, reversed `after` stages,
/// response finalization and `after_finish` stages. Every step may finish
/// on the spot or suspend; both are driven the same way.

pub mod config;
pub mod continuation;
pub mod executor;
pub mod pipeline;

// Re-export commonly used types
pub use config::{GauntletConfig, HttpMethod, Settings};
pub use continuation::{CallbackEngine, Flow};
pub use executor::{Dispatch, Pipeline, Registry};
pub use pipeline::{Arguments, DispatchError, Interrupt, Middleware, MiddlewareClass, StageResult};
