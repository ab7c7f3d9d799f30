use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::pipeline::{ClientError, DispatchError, RawArguments};

use super::{HandlerCollaborator, Pipeline, Redirect};

/// Security token check over the request headers, supplied by the transport
pub type TokenCheck = Arc<dyn Fn(&HeaderMap) -> Result<(), ClientError> + Send + Sync>;

/// Collaborator backed by axum http types
///
/// Status, headers and body are buffered until the pipeline finalizes the
/// response, which is then handed over on the channel created by
/// [`AxumHandler::channel`].
pub struct AxumHandler {
    method: Method,
    headers: HeaderMap,
    token_check: Option<TokenCheck>,
    status: StatusCode,
    response_headers: HeaderMap,
    body: Vec<u8>,
    sender: Option<oneshot::Sender<Response>>,
}

impl AxumHandler {
    /// Handler for one request plus the receiving end of its response
    pub fn channel(method: Method, headers: HeaderMap) -> (Self, oneshot::Receiver<Response>) {
        let (sender, receiver) = oneshot::channel();
        let handler = Self {
            method,
            headers,
            token_check: None,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            body: Vec::new(),
            sender: Some(sender),
        };
        (handler, receiver)
    }

    /// Install the security token check
    ///
    /// Without one, every request that needs a token is rejected.
    pub fn with_token_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&HeaderMap) -> Result<(), ClientError> + Send + Sync + 'static,
    {
        self.token_check = Some(Arc::new(check));
        self
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Append to the buffered body
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        self.body.extend_from_slice(chunk.as_ref());
    }

    /// Replace the body with JSON
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.body = serde_json::to_vec(value)?;
        self.response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(())
    }
}

impl fmt::Debug for AxumHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxumHandler")
            .field("method", &self.method)
            .field("status", &self.status)
            .field("token_check", &self.token_check.is_some())
            .field("finished", &self.sender.is_none())
            .finish()
    }
}

impl HandlerCollaborator for AxumHandler {
    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn is_finished(&self) -> bool {
        self.sender.is_none()
    }

    fn check_security_token(&self) -> Result<(), ClientError> {
        match &self.token_check {
            Some(check) => check(&self.headers),
            None => Err(ClientError::security_token("no token check configured")),
        }
    }

    fn finalize_response(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        let mut response = Response::new(Body::from(std::mem::take(&mut self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.response_headers);

        if sender.send(response).is_err() {
            tracing::debug!("response receiver dropped before finalize");
        }
    }

    fn apply_redirect(&mut self, redirect: &Redirect) {
        match HeaderValue::try_from(redirect.target.as_str()) {
            Ok(location) => {
                self.status = redirect.status_code();
                self.response_headers.insert(header::LOCATION, location);
            }
            Err(error) => {
                tracing::warn!(target_url = %redirect.target, %error, "invalid redirect target");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
        self.body.clear();
        self.finalize_response();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Run one request through `pipeline` and produce the response to send
///
/// Failures that end the dispatch before anything was sent become an
/// error response carrying the failure's status.
pub async fn respond(
    pipeline: &Arc<Pipeline>,
    handler: AxumHandler,
    mut receiver: oneshot::Receiver<Response>,
    raw: RawArguments,
) -> Response {
    let mut dispatch = pipeline.dispatch(handler);
    let result = dispatch.execute(raw).await;
    drop(dispatch);

    match result {
        Ok(()) => receiver
            .await
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(error) => {
            if let Ok(sent) = receiver.try_recv() {
                tracing::warn!(%error, "dispatch failed after the response was sent");
                return sent;
            }
            error_response(&error)
        }
    }
}

fn error_response(error: &DispatchError) -> Response {
    let status = error.status();
    match error.client_error() {
        Some(client) => (status, client.to_string()).into_response(),
        None => {
            tracing::error!(%error, "dispatch failed");
            (status, status.canonical_reason().unwrap_or_default().to_string()).into_response()
        }
    }
}
