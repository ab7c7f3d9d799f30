use std::fmt;

use crate::continuation::Flow;
use crate::pipeline::{Arguments, StageResult};

use super::Dispatch;

/// The primary action for one request method
///
/// Actions may finish on the spot or suspend. An action may call
/// [`Dispatch::execute`] again to run its own base behaviour; that
/// re-entrant call skips validation, `prepare` and the middleware.
///
/// Plain functions with the right signature are actions:
/// ```
/// use gauntlet::continuation::Flow;
/// use gauntlet::executor::{Dispatch, Pipeline};
/// use gauntlet::config::HttpMethod;
/// use gauntlet::pipeline::Arguments;
///
/// fn show<'a>(cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
///     if args.get(0).is_none() {
///         cx.redirect("/");
///     }
///     Flow::done()
/// }
///
/// let pipeline = Pipeline::builder("Page").action(HttpMethod::Get, show).build();
/// assert!(pipeline.action(HttpMethod::Get).is_some());
/// ```
pub trait Action: Send + Sync {
    fn call<'a>(&'a self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a>;
}

impl<F> Action for F
where
    F: for<'a> Fn(&'a mut Dispatch, &'a Arguments) -> Flow<'a> + Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
        self(cx, args)
    }
}

/// An action that always finishes before returning
pub struct SyncAction<F>(F);

/// Wrap a closure that never suspends
///
/// ```
/// use gauntlet::config::HttpMethod;
/// use gauntlet::executor::{Pipeline, sync_action};
///
/// let pipeline = Pipeline::builder("Ping")
///     .action(HttpMethod::Get, sync_action(|cx, _args| {
///         cx.finish();
///         Ok(())
///     }))
///     .build();
/// # let _ = pipeline;
/// ```
pub fn sync_action<F>(func: F) -> SyncAction<F>
where
    F: Fn(&mut Dispatch, &Arguments) -> StageResult + Send + Sync,
{
    SyncAction(func)
}

impl<F> Action for SyncAction<F>
where
    F: Fn(&mut Dispatch, &Arguments) -> StageResult + Send + Sync,
{
    fn call<'a>(&'a self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
        Flow::Ready((self.0)(cx, args))
    }
}

impl<F> fmt::Debug for SyncAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncAction(<function>)")
    }
}
