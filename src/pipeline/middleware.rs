use std::fmt;
use std::sync::Arc;

use crate::continuation::Flow;
use crate::executor::Dispatch;

use super::Arguments;

/// The three lifecycle stages a middleware takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Before,
    After,
    AfterFinish,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Before => "before",
            StageKind::After => "after",
            StageKind::AfterFinish => "after_finish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A middleware instance, created fresh for every dispatch
///
/// Each stage may finish on the spot or return a suspension; the executor
/// drives both the same way. Unimplemented stages do nothing.
///
/// Example:
/// ```
/// use gauntlet::continuation::Flow;
/// use gauntlet::executor::Dispatch;
/// use gauntlet::pipeline::{Arguments, Middleware};
///
/// struct RequireLogin;
///
/// impl Middleware for RequireLogin {
///     fn before<'a>(&'a mut self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
///         if args.has("user") {
///             Flow::done()
///         } else {
///             cx.redirect("/login");
///             Flow::interrupt()
///         }
///     }
/// }
/// ```
pub trait Middleware: Send {
    /// Runs after `prepare`, before the action
    ///
    /// Raising an [`Interrupt`](super::Interrupt) here skips the remaining
    /// `before` stages and the action.
    fn before<'a>(&'a mut self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
        let _ = (cx, args);
        Flow::done()
    }

    /// Runs after the action, before the response is finalized or redirected
    fn after<'a>(&'a mut self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
        let _ = (cx, args);
        Flow::done()
    }

    /// Runs once the response is out; bookkeeping only
    fn after_finish<'a>(&'a mut self, cx: &'a mut Dispatch, args: &'a Arguments) -> Flow<'a> {
        let _ = (cx, args);
        Flow::done()
    }
}

type Factory = dyn Fn(&Dispatch) -> Box<dyn Middleware> + Send + Sync;

/// A named recipe for building one middleware per dispatch
#[derive(Clone)]
pub struct MiddlewareClass {
    name: Arc<str>,
    factory: Arc<Factory>,
}

impl MiddlewareClass {
    /// Register a middleware built from the dispatch it will serve
    pub fn new<F, M>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn(&Dispatch) -> M + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(move |cx: &Dispatch| Box::new(factory(cx)) as Box<dyn Middleware>),
        }
    }

    /// Register a middleware that needs nothing from the request to be built
    pub fn of<M>(name: impl Into<Arc<str>>) -> Self
    where
        M: Middleware + Default + 'static,
    {
        Self::new(name, |_: &Dispatch| M::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(&self, cx: &Dispatch) -> Box<dyn Middleware> {
        (self.factory)(cx)
    }
}

impl fmt::Debug for MiddlewareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareClass")
            .field("name", &self.name)
            .field("factory", &"<function>")
            .finish()
    }
}

/// Ordered list of middleware classes for one pipeline type
///
/// Built by composition: ancestors' stacks first, in the order given, then
/// the type's own additions.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareStack {
    classes: Vec<MiddlewareClass>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the concatenation of the given ancestor stacks
    ///
    /// # Example
    /// ```
    /// use gauntlet::pipeline::{Middleware, MiddlewareClass, MiddlewareStack};
    ///
    /// #[derive(Default)]
    /// struct Noop;
    /// impl Middleware for Noop {}
    ///
    /// let base = MiddlewareStack::new().with(MiddlewareClass::of::<Noop>("session"));
    /// let admin = MiddlewareStack::inherit([&base]).with(MiddlewareClass::of::<Noop>("auth"));
    ///
    /// assert_eq!(admin.names(), vec!["session", "auth"]);
    /// ```
    pub fn inherit<'s>(ancestors: impl IntoIterator<Item = &'s MiddlewareStack>) -> Self {
        let mut stack = Self::new();
        for ancestor in ancestors {
            stack.extend_from(ancestor);
        }
        stack
    }

    /// Append one class
    pub fn with(mut self, class: MiddlewareClass) -> Self {
        self.push(class);
        self
    }

    pub fn push(&mut self, class: MiddlewareClass) {
        self.classes.push(class);
    }

    /// Append every class of another stack, keeping its order
    pub fn extend_from(&mut self, other: &MiddlewareStack) {
        self.classes.extend(other.classes.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &MiddlewareClass> {
        self.classes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.classes.iter().map(MiddlewareClass::name).collect()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
