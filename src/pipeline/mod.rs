/// Pipeline building blocks
///
/// This module contains the types every stage and action works with:
/// decoded arguments, the interrupt signal and stage outcomes, the
/// middleware contract and the error taxonomy.

mod arguments;
mod error;
mod middleware;
mod outcome;

pub use arguments::{Arguments, RawArguments};
pub use error::{ClientError, DispatchError, StageError};
pub use middleware::{Middleware, MiddlewareClass, MiddlewareStack, StageKind};
pub use outcome::{Halt, Interrupt, Outcome, StageResult};
