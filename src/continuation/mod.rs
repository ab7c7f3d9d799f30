/// Continuation engine
///
/// Turns any callable, whether it finishes on the spot or suspends, into
/// "runs to completion, then calls back exactly once". The executor runs
/// every stage, action and hook through a [`CallbackEngine`].

mod flow;

pub use flow::Flow;

use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::pipeline::{Halt, Outcome, StageError, StageResult};

/// Label used for the completion callback when none is configured
pub const DEFAULT_CALLBACK_ARG_NAME: &str = "callback";

/// Completion callback handed to the engine
pub type OnComplete = Box<dyn FnOnce() + Send>;

/// Single-use completion signal for one engine invocation
struct CompletionToken<'e> {
    label: &'e str,
    callback: Option<OnComplete>,
}

impl<'e> CompletionToken<'e> {
    fn new(label: &'e str, callback: Option<OnComplete>) -> Self {
        Self { label, callback }
    }

    /// Consumes the token, so it can fire at most once
    fn fire(mut self) {
        if let Some(callback) = self.callback.take() {
            tracing::trace!(callback = self.label, "completion callback fired");
            callback();
        }
    }
}

/// Drives callables to completion and reports completion once
#[derive(Debug, Clone)]
pub struct CallbackEngine {
    callback_arg_name: Cow<'static, str>,
}

impl Default for CallbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackEngine {
    pub fn new() -> Self {
        Self {
            callback_arg_name: Cow::Borrowed(DEFAULT_CALLBACK_ARG_NAME),
        }
    }

    /// Use another label for the completion callback in diagnostics
    pub fn with_callback_name(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            callback_arg_name: name.into(),
        }
    }

    pub fn callback_arg_name(&self) -> &str {
        &self.callback_arg_name
    }

    /// Invoke `func` and drive whatever it returns to completion
    ///
    /// A ready failure is handed back as is. A panic inside a suspended step
    /// is caught and becomes [`StageError::Panicked`]; a panic while `func`
    /// itself runs is not caught. `on_complete` fires exactly once, after
    /// the work is over, whatever the outcome.
    pub async fn run<'a, F>(&self, func: F, on_complete: Option<OnComplete>) -> Outcome
    where
        F: FnOnce() -> Flow<'a>,
    {
        let token = CompletionToken::new(&self.callback_arg_name, on_complete);

        let result = match func() {
            Flow::Ready(result) => result,
            Flow::Suspended(suspension) => drive(suspension).await,
        };

        token.fire();
        result.into()
    }

    /// Bind a callable to this engine
    ///
    /// # Example
    /// ```
    /// use gauntlet::continuation::{CallbackEngine, Flow};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let greet = CallbackEngine::new().wrap(|name: &'static str| {
    ///     Flow::suspend(async move {
    ///         assert_eq!(name, "world");
    ///         Ok(())
    ///     })
    /// });
    ///
    /// assert!(greet.call("world", None).await.is_completed());
    /// # }
    /// ```
    pub fn wrap<F>(self, func: F) -> Adapted<F> {
        Adapted { engine: self, func }
    }

    /// Run a flow detached on the tokio runtime
    ///
    /// Only `on_complete` tells anyone the work is over; the handle can be
    /// dropped.
    pub fn spawn(
        &self,
        flow: Flow<'static>,
        on_complete: Option<OnComplete>,
    ) -> JoinHandle<Outcome> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(move || flow, on_complete).await })
    }
}

/// Await a suspension inside the panic boundary
async fn drive(suspension: BoxFuture<'_, StageResult>) -> StageResult {
    match AssertUnwindSafe(suspension).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let error = StageError::panicked(payload);
            tracing::error!(error = %error, "suspended step panicked");
            Err(Halt::Failed(error))
        }
    }
}

/// A callable bound to a [`CallbackEngine`]
#[derive(Debug, Clone)]
pub struct Adapted<F> {
    engine: CallbackEngine,
    func: F,
}

impl<F> Adapted<F> {
    pub async fn call<'a, A>(&self, args: A, on_complete: Option<OnComplete>) -> Outcome
    where
        F: Fn(A) -> Flow<'a>,
    {
        self.engine.run(|| (self.func)(args), on_complete).await
    }

    pub fn engine(&self) -> &CallbackEngine {
        &self.engine
    }
}

/// Await an operation that only reports completion through a callback
///
/// Errors when the callback was dropped without ever being called.
pub async fn task<S>(start: S) -> Result<(), oneshot::error::RecvError>
where
    S: FnOnce(OnComplete),
{
    let (tx, rx) = oneshot::channel();
    start(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.await
}
