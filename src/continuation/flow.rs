use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

use crate::pipeline::{Halt, Interrupt, StageError, StageResult};

/// What a stage, action or hook hands back when invoked
///
/// A callable either finishes before returning (`Ready`) or returns a
/// suspended computation that the continuation engine drives to the end.
/// Nothing else can come back, so the engine never has to guess.
pub enum Flow<'a> {
    /// The work is already over
    Ready(StageResult),
    /// The work continues in a future
    Suspended(BoxFuture<'a, StageResult>),
}

impl<'a> Flow<'a> {
    /// Nothing left to do
    pub fn done() -> Self {
        Flow::Ready(Ok(()))
    }

    /// Interrupt the request right away
    pub fn interrupt() -> Self {
        Flow::Ready(Err(Halt::Interrupted(Interrupt)))
    }

    /// Fail right away, before anything was suspended
    pub fn fail(error: impl Into<StageError>) -> Self {
        Flow::Ready(Err(Halt::Failed(error.into())))
    }

    /// Continue in a future
    ///
    /// # Example
    /// ```
    /// use gauntlet::continuation::Flow;
    ///
    /// let flow = Flow::suspend(async {
    ///     tokio::task::yield_now().await;
    ///     Ok(())
    /// });
    /// assert!(flow.is_suspended());
    /// ```
    pub fn suspend<F>(future: F) -> Self
    where
        F: Future<Output = StageResult> + Send + 'a,
    {
        Flow::Suspended(Box::pin(future))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Flow::Suspended(_))
    }
}

impl From<StageResult> for Flow<'_> {
    fn from(result: StageResult) -> Self {
        Flow::Ready(result)
    }
}

impl fmt::Debug for Flow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Flow::Suspended(_) => f.write_str("Suspended(<future>)"),
        }
    }
}
