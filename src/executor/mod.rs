/// Pipeline executor and dependencies
///
/// This module contains the execution engine that runs one request
/// through validation, `prepare`, the middleware stages and the action,
/// plus the collaborator trait it depends on.

mod action;
mod registry;
mod response;
pub mod traits;

pub use action::{Action, SyncAction, sync_action};
pub use registry::Registry;
pub use response::{AxumHandler, TokenCheck, respond};
pub use traits::{HandlerCollaborator, Redirect};

use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::{AfterErrorPolicy, HttpMethod, Settings};
use crate::continuation::{CallbackEngine, Flow};
use crate::pipeline::{
    Arguments, ClientError, DispatchError, Middleware, MiddlewareClass, MiddlewareStack, Outcome,
    RawArguments, StageKind,
};

/// A pipeline type: middleware stack, per-method actions and settings
///
/// Built once and shared by every dispatch of that type.
pub struct Pipeline {
    name: String,
    settings: Settings,
    middleware: MiddlewareStack,
    actions: BTreeMap<HttpMethod, Arc<dyn Action>>,
    engine: CallbackEngine,
}

impl Pipeline {
    /// Start a pipeline type with no ancestors
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        Self::derive(name, std::iter::empty())
    }

    /// Start a pipeline type from its ancestors
    ///
    /// Middleware is inherited in ancestor order. An action is inherited
    /// from the first ancestor that has one for that method. Settings come
    /// from the first ancestor.
    pub fn derive<'p>(
        name: impl Into<String>,
        ancestors: impl IntoIterator<Item = &'p Pipeline>,
    ) -> PipelineBuilder {
        let mut builder = PipelineBuilder {
            name: name.into(),
            settings: None,
            middleware: MiddlewareStack::new(),
            actions: BTreeMap::new(),
        };

        for ancestor in ancestors {
            builder.middleware.extend_from(&ancestor.middleware);
            for (method, action) in &ancestor.actions {
                builder.actions.entry(*method).or_insert_with(|| action.clone());
            }
            builder
                .settings
                .get_or_insert_with(|| ancestor.settings.clone());
        }

        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn middleware(&self) -> &MiddlewareStack {
        &self.middleware
    }

    pub fn action(&self, method: HttpMethod) -> Option<Arc<dyn Action>> {
        self.actions.get(&method).cloned()
    }

    /// Methods with a registered action
    pub fn methods(&self) -> impl Iterator<Item = HttpMethod> + '_ {
        self.actions.keys().copied()
    }

    pub fn engine(&self) -> &CallbackEngine {
        &self.engine
    }

    /// Bind a handler to this pipeline for one request
    pub fn dispatch(self: &Arc<Self>, handler: impl HandlerCollaborator + 'static) -> Dispatch {
        Dispatch::new(Arc::clone(self), handler)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("middleware", &self.middleware.names())
            .field("methods", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registers middleware and actions for a [`Pipeline`]
///
/// Registration is the only way in, so every action and stage ends up
/// driven by the continuation engine.
pub struct PipelineBuilder {
    name: String,
    settings: Option<Settings>,
    middleware: MiddlewareStack,
    actions: BTreeMap<HttpMethod, Arc<dyn Action>>,
}

impl PipelineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Append one of this type's own middleware
    pub fn middleware(mut self, class: MiddlewareClass) -> Self {
        self.middleware.push(class);
        self
    }

    /// Set the action for a method, replacing any inherited one
    pub fn action(mut self, method: HttpMethod, action: impl Action + 'static) -> Self {
        self.actions.insert(method, Arc::new(action));
        self
    }

    pub(crate) fn shared_action(mut self, method: HttpMethod, action: Arc<dyn Action>) -> Self {
        self.actions.insert(method, action);
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        let settings = self.settings.unwrap_or_default();
        let engine = CallbackEngine::with_callback_name(settings.callback_arg_name.clone());

        Arc::new(Pipeline {
            name: self.name,
            settings,
            middleware: self.middleware,
            actions: self.actions,
            engine,
        })
    }
}

/// Per-request record, mutated only by the executor
#[derive(Debug, Default)]
pub struct DispatchState {
    called_once: bool,
    cached_args: Option<Arc<Arguments>>,
    redirection: Option<Redirect>,
    entered: Vec<String>,
}

impl DispatchState {
    /// Whether a top-level cycle already started
    pub fn has_run(&self) -> bool {
        self.called_once
    }

    pub fn cached_arguments(&self) -> Option<&Arc<Arguments>> {
        self.cached_args.as_ref()
    }

    pub fn pending_redirect(&self) -> Option<&Redirect> {
        self.redirection.as_ref()
    }

    /// Names of the middleware entered so far, most recent first
    pub fn entered(&self) -> &[String] {
        &self.entered
    }
}

/// Stages that run over the entered middleware once the action is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    After,
    AfterFinish,
}

impl Cleanup {
    fn kind(self) -> StageKind {
        match self {
            Cleanup::After => StageKind::After,
            Cleanup::AfterFinish => StageKind::AfterFinish,
        }
    }
}

/// A middleware instance that took part in this dispatch
struct Entered {
    name: String,
    instance: Box<dyn Middleware>,
}

/// One request travelling through a [`Pipeline`]
pub struct Dispatch {
    pipeline: Arc<Pipeline>,
    handler: Box<dyn HandlerCollaborator>,
    state: DispatchState,
}

impl Dispatch {
    pub fn new(pipeline: Arc<Pipeline>, handler: impl HandlerCollaborator + 'static) -> Self {
        Self {
            pipeline,
            handler: Box::new(handler),
            state: DispatchState::default(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn handler(&self) -> &dyn HandlerCollaborator {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> &mut dyn HandlerCollaborator {
        self.handler.as_mut()
    }

    /// The collaborator as its concrete type
    pub fn handler_as<H: HandlerCollaborator + 'static>(&mut self) -> Option<&mut H> {
        self.handler.as_any_mut().downcast_mut()
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Decoded arguments, once the first cycle decoded them
    pub fn arguments(&self) -> Option<&Arc<Arguments>> {
        self.state.cached_args.as_ref()
    }

    /// Ask for a temporary redirect
    ///
    /// Applied only after every `after` stage ran.
    pub fn redirect(&mut self, target: impl Into<String>) {
        self.redirect_with(Redirect::new(target));
    }

    /// Ask for a redirect with explicit parameters; the last request wins
    pub fn redirect_with(&mut self, redirect: Redirect) {
        tracing::debug!(target_url = %redirect.target, "redirect deferred");
        self.state.redirection = Some(redirect);
    }

    /// Does nothing: the executor finalizes the response itself after the
    /// `after` stages. Use `after_finish` for work that must follow it.
    pub fn finish(&mut self) {
        tracing::trace!("finish() ignored, response is finalized by the pipeline");
    }

    pub fn is_finished(&self) -> bool {
        self.handler.is_finished()
    }

    /// Run the pipeline for this request
    ///
    /// The first call runs the full cycle. A call made while the cycle is
    /// running (from inside an action) only runs the action again, with the
    /// arguments decoded by the first call.
    pub fn execute(&mut self, raw: RawArguments) -> BoxFuture<'_, Result<(), DispatchError>> {
        let span = tracing::debug_span!(
            "dispatch",
            pipeline = %self.pipeline.name,
            method = %self.handler.method(),
            reentrant = self.state.called_once,
        );
        Box::pin(self.run_cycle(raw).instrument(span))
    }

    async fn run_cycle(&mut self, raw: RawArguments) -> Result<(), DispatchError> {
        let pipeline = Arc::clone(&self.pipeline);
        let engine = pipeline.engine();

        let run_middleware = !self.state.called_once;
        self.state.called_once = true;

        let method = if run_middleware {
            self.validate()?
        } else {
            self.request_method()?
        };

        let mut interrupted = false;
        if run_middleware {
            match engine.run(|| self.handler.prepare(), None).await {
                Outcome::Completed => {}
                Outcome::Interrupted => {
                    tracing::debug!("interrupted during prepare");
                    interrupted = true;
                }
                Outcome::Failed(source) => return Err(DispatchError::Prepare(source)),
            }
        }

        let args = self.decoded_arguments(&raw)?;

        // front = most recently entered
        let mut executed: VecDeque<Entered> = VecDeque::new();

        if run_middleware && !interrupted {
            for class in pipeline.middleware().iter() {
                let instance = class.instantiate(self);
                executed.push_front(Entered {
                    name: class.name().to_string(),
                    instance,
                });
                self.state.entered.insert(0, class.name().to_string());

                let Entered { name, instance } = &mut executed[0];
                tracing::debug!(middleware = %name, "before");

                match engine.run(|| instance.before(self, &args), None).await {
                    Outcome::Completed => {}
                    Outcome::Interrupted => {
                        tracing::debug!(middleware = %name, "interrupted during before");
                        interrupted = true;
                        break;
                    }
                    Outcome::Failed(source) => {
                        return Err(DispatchError::stage(StageKind::Before, name.clone(), source));
                    }
                }
            }
        }

        if !interrupted {
            let action = pipeline
                .action(method)
                .ok_or_else(|| ClientError::method_not_allowed(method.as_str()))?;

            tracing::debug!(%method, "action");
            match engine.run(|| action.call(self, &args), None).await {
                Outcome::Completed => {}
                Outcome::Interrupted => tracing::debug!(%method, "interrupted during action"),
                Outcome::Failed(source) => return Err(DispatchError::action(method, source)),
            }
        }

        if !run_middleware {
            return Ok(());
        }

        let mut first_error = None;

        self.run_cleanup(Cleanup::After, &mut executed, &args, &mut first_error)
            .await?;

        match self.state.redirection.take() {
            Some(redirect) => {
                tracing::debug!(
                    target_url = %redirect.target,
                    status = %redirect.status_code(),
                    "applying redirect"
                );
                self.handler.apply_redirect(&redirect);
            }
            None if self.handler.is_finished() => tracing::debug!("response already finalized"),
            None => self.handler.finalize_response(),
        }

        self.run_cleanup(Cleanup::AfterFinish, &mut executed, &args, &mut first_error)
            .await?;

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Runs `after` or `after_finish` over the entered middleware, most
    /// recent first
    async fn run_cleanup(
        &mut self,
        cleanup: Cleanup,
        executed: &mut VecDeque<Entered>,
        args: &Arguments,
        first_error: &mut Option<DispatchError>,
    ) -> Result<(), DispatchError> {
        let pipeline = Arc::clone(&self.pipeline);
        let policy = pipeline.settings().after_errors;
        let kind = cleanup.kind();

        for Entered { name, instance } in executed.iter_mut() {
            tracing::debug!(middleware = %name, stage = %kind, "cleanup");

            let outcome = pipeline
                .engine()
                .run(
                    || match cleanup {
                        Cleanup::After => instance.after(self, args),
                        Cleanup::AfterFinish => instance.after_finish(self, args),
                    },
                    None,
                )
                .await;

            match outcome {
                Outcome::Completed => {}
                Outcome::Interrupted => {
                    tracing::debug!(
                        middleware = %name,
                        stage = %kind,
                        "interrupt ignored in cleanup"
                    );
                }
                Outcome::Failed(source) => {
                    let error = DispatchError::stage(kind, name.clone(), source);
                    match policy {
                        AfterErrorPolicy::Abort => return Err(error),
                        AfterErrorPolicy::Continue => {
                            tracing::warn!(error = %error, "cleanup stage failed, continuing");
                            first_error.get_or_insert(error);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Method and security token checks for the first cycle
    fn validate(&self) -> Result<HttpMethod, ClientError> {
        let method = self.request_method()?;

        if !self.pipeline.settings.supported_methods.contains(&method)
            || !self.handler.supported_methods().contains(&method)
            || self.pipeline.action(method).is_none()
        {
            tracing::info!(%method, "method not allowed");
            return Err(ClientError::method_not_allowed(method.as_str()));
        }

        if self.pipeline.settings.xsrf_cookies && !method.is_safe() {
            self.handler.check_security_token().inspect_err(|error| {
                tracing::info!(%error, "security token rejected");
            })?;
        }

        Ok(method)
    }

    fn request_method(&self) -> Result<HttpMethod, ClientError> {
        let raw = self.handler.method();
        raw.parse()
            .map_err(|_| ClientError::method_not_allowed(raw))
    }

    /// Decodes on the first call, hands back the cached value afterwards
    fn decoded_arguments(&mut self, raw: &RawArguments) -> Result<Arc<Arguments>, ClientError> {
        if let Some(args) = &self.state.cached_args {
            return Ok(Arc::clone(args));
        }

        let mut args = Arguments::new();
        for value in &raw.positional {
            args = args.with_positional(self.handler.decode_argument(value, None)?);
        }
        for (name, value) in &raw.named {
            args = args.with_named(name.clone(), self.handler.decode_argument(value, Some(name))?);
        }

        let args = Arc::new(args);
        self.state.cached_args = Some(Arc::clone(&args));
        Ok(args)
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("pipeline", &self.pipeline.name)
            .field("method", &self.handler.method())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::traits::{Journal, MockHandler, PrepareBehavior};
    use crate::pipeline::{Interrupt, StageError};
    use axum::http::StatusCode;
    use serde_json::json;

    /// Middleware that journals every stage under its name
    struct Recorder {
        name: &'static str,
        journal: Journal,
        interrupt_before: bool,
        fail: Option<StageKind>,
    }

    impl Middleware for Recorder {
        fn before<'a>(&'a mut self, _cx: &'a mut Dispatch, _args: &'a Arguments) -> Flow<'a> {
            self.journal.record(format!("before:{}", self.name));
            if self.fail == Some(StageKind::Before) {
                return Flow::fail(StageError::custom("before failed"));
            }
            if self.interrupt_before {
                return Flow::interrupt();
            }
            Flow::done()
        }

        fn after<'a>(&'a mut self, _cx: &'a mut Dispatch, _args: &'a Arguments) -> Flow<'a> {
            let journal = self.journal.clone();
            let name = self.name;
            let fail = self.fail == Some(StageKind::After);
            Flow::suspend(async move {
                tokio::task::yield_now().await;
                journal.record(format!("after:{}", name));
                if fail {
                    return Err(StageError::custom("after failed").into());
                }
                Ok(())
            })
        }

        fn after_finish<'a>(&'a mut self, _cx: &'a mut Dispatch, _args: &'a Arguments) -> Flow<'a> {
            self.journal.record(format!("after_finish:{}", self.name));
            Flow::done()
        }
    }

    fn recorder(name: &'static str, journal: &Journal) -> MiddlewareClass {
        let journal = journal.clone();
        MiddlewareClass::new(name, move |_: &Dispatch| Recorder {
            name,
            journal: journal.clone(),
            interrupt_before: false,
            fail: None,
        })
    }

    fn configured(
        name: &'static str,
        journal: &Journal,
        interrupt_before: bool,
        fail: Option<StageKind>,
    ) -> MiddlewareClass {
        let journal = journal.clone();
        MiddlewareClass::new(name, move |_: &Dispatch| Recorder {
            name,
            journal: journal.clone(),
            interrupt_before,
            fail,
        })
    }

    fn journaling_action(journal: &Journal) -> impl Action + use<> {
        let journal = journal.clone();
        sync_action(move |_cx, _args| {
            journal.record("action");
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_full_cycle_order() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .middleware(recorder("b", &journal))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let mut dispatch = pipeline.dispatch(MockHandler::new("GET", journal.clone()));
        dispatch.execute(RawArguments::new()).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "prepare",
                "before:a",
                "before:b",
                "action",
                "after:b",
                "after:a",
                "finalize",
                "after_finish:b",
                "after_finish:a",
            ]
        );
        assert_eq!(dispatch.state().entered(), ["b", "a"]);
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected_before_prepare() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let handler = MockHandler::new("GET", journal.clone()).with_supported(&[HttpMethod::Post]);
        let err = pipeline.dispatch(handler).execute(RawArguments::new()).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_and_missing_action() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("BREW", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Client(ClientError::MethodNotAllowed { ref method }) if method == "BREW"
        ));

        let err = pipeline
            .dispatch(MockHandler::new("DELETE", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_security_token_only_checked_when_enabled_and_unsafe() {
        let journal = Journal::new();
        let settings = Settings {
            xsrf_cookies: true,
            ..Settings::default()
        };
        let pipeline = Pipeline::builder("Form")
            .settings(settings)
            .action(HttpMethod::Get, journaling_action(&journal))
            .action(HttpMethod::Post, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("POST", journal.clone()).with_invalid_token())
            .execute(RawArguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(journal.entries(), vec!["check_token"]);

        let journal = Journal::new();
        pipeline
            .dispatch(MockHandler::new("GET", journal.clone()).with_invalid_token())
            .execute(RawArguments::new())
            .await
            .unwrap();
        assert_eq!(journal.entries(), vec!["prepare", "finalize"]);
    }

    #[tokio::test]
    async fn test_token_not_checked_when_disabled() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Form")
            .action(HttpMethod::Post, journaling_action(&journal))
            .build();

        pipeline
            .dispatch(MockHandler::new("POST", journal.clone()).with_invalid_token())
            .execute(RawArguments::new())
            .await
            .unwrap();

        assert_eq!(journal.count("check_token"), 0);
        assert_eq!(journal.count("action"), 1);
    }

    #[tokio::test]
    async fn test_suspending_prepare_completes_before_middleware() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let handler =
            MockHandler::new("GET", journal.clone()).with_prepare(PrepareBehavior::Suspend);
        pipeline.dispatch(handler).execute(RawArguments::new()).await.unwrap();

        assert_eq!(journal.position("prepare:resumed"), Some(1));
        assert_eq!(journal.position("before:a"), Some(2));
    }

    #[tokio::test]
    async fn test_prepare_interrupt_skips_middleware_and_action() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let handler =
            MockHandler::new("GET", journal.clone()).with_prepare(PrepareBehavior::Interrupt);
        pipeline.dispatch(handler).execute(RawArguments::new()).await.unwrap();

        assert_eq!(journal.entries(), vec!["prepare", "finalize"]);
    }

    #[tokio::test]
    async fn test_prepare_failure() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let handler = MockHandler::new("GET", journal.clone()).with_prepare(PrepareBehavior::Fail);
        let err = pipeline.dispatch(handler).execute(RawArguments::new()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Prepare(_)));
        assert_eq!(err.to_string(), "prepare hook failed: prepare failed");
        assert_eq!(journal.entries(), vec!["prepare"]);
    }

    #[tokio::test]
    async fn test_already_finished_skips_finalize_but_runs_after_finish() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let handler =
            MockHandler::new("GET", journal.clone()).with_prepare(PrepareBehavior::Finish);
        pipeline.dispatch(handler).execute(RawArguments::new()).await.unwrap();

        assert_eq!(journal.count("finalize"), 1);
        assert_eq!(journal.position("finalize"), Some(1));
        assert_eq!(journal.count("after_finish:a"), 1);
    }

    #[tokio::test]
    async fn test_before_failure_stops_without_cleanup() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .middleware(configured("b", &journal, false, Some(StageKind::Before)))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "before stage of middleware 'b' failed: before failed");
        assert_eq!(journal.entries(), vec!["prepare", "before:a", "before:b"]);
    }

    #[tokio::test]
    async fn test_after_failure_aborts_by_default() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .middleware(configured("b", &journal, false, Some(StageKind::After)))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Stage { stage: StageKind::After, ref middleware, .. }
                if middleware == "b"
        ));
        assert_eq!(journal.count("after:a"), 0);
        assert_eq!(journal.count("finalize"), 0);
    }

    #[tokio::test]
    async fn test_after_failure_continue_policy() {
        let journal = Journal::new();
        let settings = Settings {
            after_errors: AfterErrorPolicy::Continue,
            ..Settings::default()
        };
        let pipeline = Pipeline::builder("Page")
            .settings(settings)
            .middleware(recorder("a", &journal))
            .middleware(configured("b", &journal, false, Some(StageKind::After)))
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Stage { stage: StageKind::After, .. }));
        assert_eq!(
            journal.entries()[4..],
            ["after:b", "after:a", "finalize", "after_finish:b", "after_finish:a"]
        );
    }

    #[test]
    fn test_cleanup_stages_never_map_to_before() {
        assert_eq!(Cleanup::After.kind(), StageKind::After);
        assert_eq!(Cleanup::AfterFinish.kind(), StageKind::AfterFinish);
    }

    #[tokio::test]
    async fn test_action_interrupt_still_cleans_up() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(
                HttpMethod::Get,
                sync_action(|_cx, _args| Err(Interrupt.into())),
            )
            .build();

        pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap();

        assert_eq!(
            journal.entries(),
            vec!["prepare", "before:a", "after:a", "finalize", "after_finish:a"]
        );
    }

    #[tokio::test]
    async fn test_action_failure() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .middleware(recorder("a", &journal))
            .action(
                HttpMethod::Get,
                sync_action(|_cx, _args| Err(StageError::custom("db down").into())),
            )
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "GET action failed: db down");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(journal.count("after:a"), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_is_bad_request() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .action(HttpMethod::Get, journaling_action(&journal))
            .build();

        let err = pipeline
            .dispatch(MockHandler::new("GET", journal.clone()))
            .execute(RawArguments::new().with_named("id", "!"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(journal.count("action"), 0);
    }

    #[tokio::test]
    async fn test_arguments_reach_every_stage() {
        let journal = Journal::new();
        let seen = Journal::new();
        let seen_by_action = seen.clone();

        let pipeline = Pipeline::builder("Post")
            .action(
                HttpMethod::Get,
                sync_action(move |_cx, args| {
                    let id = args.get(0).unwrap();
                    let slug = args.named("slug").unwrap();
                    seen_by_action.record(format!("{}/{}", id, slug));
                    Ok(())
                }),
            )
            .build();

        let mut dispatch = pipeline.dispatch(MockHandler::new("GET", journal.clone()));
        dispatch
            .execute(RawArguments::new().with_positional("7").with_named("slug", "intro"))
            .await
            .unwrap();

        assert_eq!(seen.entries(), vec!["7/\"intro\""]);
        assert_eq!(
            dispatch.arguments().map(|args| args.as_ref().clone()),
            Some(Arguments::new().with_positional(json!(7)).with_named("slug", json!("intro")))
        );
    }

    #[tokio::test]
    async fn test_redirect_is_deferred_and_last_one_wins() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder("Page")
            .action(
                HttpMethod::Get,
                sync_action(|cx, _args| {
                    cx.redirect("/first");
                    cx.redirect_with(Redirect::new("/second").permanent());
                    let pending = cx.state().pending_redirect().map(|r| r.target.as_str());
                    assert_eq!(pending, Some("/second"));
                    assert!(!cx.is_finished());
                    Ok(())
                }),
            )
            .build();

        let mut dispatch = pipeline.dispatch(MockHandler::new("GET", journal.clone()));
        dispatch.execute(RawArguments::new()).await.unwrap();

        assert_eq!(journal.entries(), vec!["prepare", "redirect:/second"]);
        assert!(dispatch.state().pending_redirect().is_none());
        assert!(dispatch.is_finished());
    }
}
