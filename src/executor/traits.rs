use axum::http::StatusCode;
use serde_json::Value;
use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::config::HttpMethod;
use crate::continuation::Flow;
use crate::pipeline::{ClientError, Interrupt, StageError};

/// A redirect recorded during a dispatch
///
/// Nothing is sent when application code asks for a redirect; the
/// executor applies it once every `after` stage has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Where to send the client
    pub target: String,
    /// Use a permanent status when no explicit status is given
    pub permanent: bool,
    /// Explicit status, overriding `permanent`
    pub status: Option<StatusCode>,
}

impl Redirect {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            permanent: false,
            status: None,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Explicit status, else 301 when permanent and 302 otherwise
    pub fn status_code(&self) -> StatusCode {
        match self.status {
            Some(status) => status,
            None if self.permanent => StatusCode::MOVED_PERMANENTLY,
            None => StatusCode::FOUND,
        }
    }
}

/// Trait for the request handler the executor runs on behalf of
///
/// This keeps the executor decoupled from any transport: the collaborator
/// owns request metadata, argument decoding and the response itself.
pub trait HandlerCollaborator: Send {
    /// Request method name as received, e.g. "GET"
    fn method(&self) -> &str;

    /// Methods this handler accepts at all
    fn supported_methods(&self) -> &[HttpMethod] {
        &HttpMethod::ALL
    }

    /// Whether the response was already finalized by another path
    fn is_finished(&self) -> bool;

    /// Decode one raw argument; `name` is `None` for positional ones
    fn decode_argument(&self, raw: &str, name: Option<&str>) -> Result<Value, ClientError> {
        let _ = name;
        Ok(Value::String(raw.to_string()))
    }

    /// Pre-processing hook, run once before any `before` stage
    fn prepare(&mut self) -> Flow<'_> {
        Flow::done()
    }

    /// Reject the request when its security token is missing or wrong
    fn check_security_token(&self) -> Result<(), ClientError>;

    /// Complete and flush the response
    fn finalize_response(&mut self);

    /// Send the client elsewhere
    fn apply_redirect(&mut self, redirect: &Redirect);

    /// Access to the concrete collaborator, see [`Dispatch::handler_as`]
    ///
    /// [`Dispatch::handler_as`]: super::Dispatch::handler_as
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// Mock implementations for testing

/// Shared, ordered record of everything that happened during a dispatch
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// How many times an entry was recorded
    pub fn count(&self, entry: &str) -> usize {
        self.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Index of the first occurrence of an entry
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.lock().iter().position(|e| e == entry)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What the mock prepare hook does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrepareBehavior {
    #[default]
    Complete,
    /// Suspend once, then complete
    Suspend,
    Interrupt,
    Fail,
    /// Finalize the response from inside prepare
    Finish,
}

/// Mock handler for testing
///
/// Records every collaborator call into a [`Journal`] so tests can check
/// ordering against middleware entries recorded in the same journal.
///
/// Decoding parses raw values as JSON and falls back to plain strings; a
/// raw value of `"!"` is rejected.
#[derive(Debug, Clone)]
pub struct MockHandler {
    pub method: String,
    pub supported: Vec<HttpMethod>,
    pub token_valid: bool,
    pub prepare: PrepareBehavior,
    pub finished: bool,
    pub redirects: Vec<Redirect>,
    journal: Journal,
}

impl MockHandler {
    pub fn new(method: &str, journal: Journal) -> Self {
        Self {
            method: method.to_string(),
            supported: HttpMethod::ALL.to_vec(),
            token_valid: true,
            prepare: PrepareBehavior::default(),
            finished: false,
            redirects: Vec::new(),
            journal,
        }
    }

    pub fn with_supported(mut self, methods: &[HttpMethod]) -> Self {
        self.supported = methods.to_vec();
        self
    }

    pub fn with_invalid_token(mut self) -> Self {
        self.token_valid = false;
        self
    }

    pub fn with_prepare(mut self, behavior: PrepareBehavior) -> Self {
        self.prepare = behavior;
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl HandlerCollaborator for MockHandler {
    fn method(&self) -> &str {
        &self.method
    }

    fn supported_methods(&self) -> &[HttpMethod] {
        &self.supported
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn decode_argument(&self, raw: &str, name: Option<&str>) -> Result<Value, ClientError> {
        self.journal.record(format!("decode:{}", raw));
        if raw == "!" {
            return Err(ClientError::bad_argument(name.unwrap_or("<positional>"), "rejected"));
        }
        Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
    }

    fn prepare(&mut self) -> Flow<'_> {
        self.journal.record("prepare");
        match self.prepare {
            PrepareBehavior::Complete => Flow::done(),
            PrepareBehavior::Suspend => {
                let journal = self.journal.clone();
                Flow::suspend(async move {
                    tokio::task::yield_now().await;
                    journal.record("prepare:resumed");
                    Ok(())
                })
            }
            PrepareBehavior::Interrupt => Flow::Ready(Err(Interrupt.into())),
            PrepareBehavior::Fail => Flow::fail(StageError::custom("prepare failed")),
            PrepareBehavior::Finish => {
                self.finished = true;
                self.journal.record("finalize");
                Flow::done()
            }
        }
    }

    fn check_security_token(&self) -> Result<(), ClientError> {
        self.journal.record("check_token");
        if self.token_valid {
            Ok(())
        } else {
            Err(ClientError::security_token("'_xsrf' argument missing"))
        }
    }

    fn finalize_response(&mut self) {
        self.journal.record("finalize");
        self.finished = true;
    }

    fn apply_redirect(&mut self, redirect: &Redirect) {
        self.journal.record(format!("redirect:{}", redirect.target));
        self.redirects.push(redirect.clone());
        self.finished = true;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redirect_status() {
        assert_eq!(Redirect::new("/a").status_code(), StatusCode::FOUND);
        assert_eq!(
            Redirect::new("/a").permanent().status_code(),
            StatusCode::MOVED_PERMANENTLY
        );
        assert_eq!(
            Redirect::new("/a")
                .permanent()
                .with_status(StatusCode::SEE_OTHER)
                .status_code(),
            StatusCode::SEE_OTHER
        );
    }

    #[test]
    fn test_journal_counts_and_positions() {
        let journal = Journal::new();
        journal.record("a");
        journal.record("b");
        journal.record("a");

        assert_eq!(journal.entries(), vec!["a", "b", "a"]);
        assert_eq!(journal.count("a"), 2);
        assert_eq!(journal.position("b"), Some(1));
        assert_eq!(journal.position("c"), None);
    }

    #[test]
    fn test_mock_decode() {
        let handler = MockHandler::new("GET", Journal::new());

        assert_eq!(handler.decode_argument("42", None), Ok(json!(42)));
        assert_eq!(handler.decode_argument("slug", Some("s")), Ok(json!("slug")));
        assert_eq!(
            handler.decode_argument("!", Some("id")),
            Err(ClientError::bad_argument("id", "rejected"))
        );
        assert_eq!(handler.journal().count("decode:42"), 1);
    }

    #[test]
    fn test_mock_redirect_marks_finished() {
        let mut handler = MockHandler::new("GET", Journal::new());
        assert!(!handler.is_finished());

        handler.apply_redirect(&Redirect::new("/login"));

        assert!(handler.is_finished());
        assert_eq!(handler.redirects, vec![Redirect::new("/login")]);
        assert_eq!(handler.journal().entries(), vec!["redirect:/login"]);
    }
}
