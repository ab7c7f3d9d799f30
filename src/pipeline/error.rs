use axum::http::StatusCode;
use std::any::Any;
use thiserror::Error;

use crate::config::HttpMethod;

use super::middleware::StageKind;

/// Errors raised by a stage, an action or the prepare hook
#[derive(Debug, Error)]
pub enum StageError {
    /// Generic error for custom error messages
    #[error("{message}")]
    Custom { message: String },

    /// A suspended step panicked; the panic was caught at the adapter boundary
    #[error("suspended step panicked: {message}")]
    Panicked { message: String },

    /// A classified rejection that should reach the client as-is
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A nested dispatch failed (re-entrant calls)
    #[error(transparent)]
    Dispatch(Box<DispatchError>),

    /// Any other error coming out of stage code
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    /// Create a Custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error
    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(error))
    }

    /// Build a Panicked error from a caught panic payload
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    /// The client error carried by this error, if any
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            StageError::Client(client) => Some(client),
            StageError::Dispatch(dispatch) => dispatch.client_error(),
            _ => None,
        }
    }
}

impl From<DispatchError> for StageError {
    fn from(error: DispatchError) -> Self {
        StageError::Dispatch(Box::new(error))
    }
}

/// Rejections that are the client's fault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Request method unsupported, or no action registered for it
    #[error("method {method} not allowed")]
    MethodNotAllowed { method: String },

    /// The security token check failed
    #[error("security token rejected: {reason}")]
    SecurityToken { reason: String },

    /// A raw argument could not be decoded
    #[error("invalid argument '{name}': {message}")]
    BadArgument { name: String, message: String },

    /// Any other classified rejection raised by stage code
    #[error("request rejected with status {status}: {reason}")]
    Rejected { status: StatusCode, reason: String },
}

impl ClientError {
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
        }
    }

    pub fn security_token(reason: impl Into<String>) -> Self {
        Self::SecurityToken {
            reason: reason.into(),
        }
    }

    pub fn bad_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn rejected(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Status classification for the response
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ClientError::SecurityToken { .. } => StatusCode::FORBIDDEN,
            ClientError::BadArgument { .. } => StatusCode::BAD_REQUEST,
            ClientError::Rejected { status, .. } => *status,
        }
    }
}

/// Errors that end a dispatch abnormally
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Validation or decoding rejected the request
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The collaborator's prepare hook failed
    #[error("prepare hook failed: {0}")]
    Prepare(#[source] StageError),

    /// A middleware stage failed
    #[error("{stage} stage of middleware '{middleware}' failed: {source}")]
    Stage {
        stage: StageKind,
        middleware: String,
        source: StageError,
    },

    /// The action for the request method failed
    #[error("{method} action failed: {source}")]
    Action {
        method: HttpMethod,
        source: StageError,
    },
}

impl DispatchError {
    pub fn stage(stage: StageKind, middleware: impl Into<String>, source: StageError) -> Self {
        Self::Stage {
            stage,
            middleware: middleware.into(),
            source,
        }
    }

    pub fn action(method: HttpMethod, source: StageError) -> Self {
        Self::Action { method, source }
    }

    /// The client error behind this failure, looking through stage errors
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            DispatchError::Client(client) => Some(client),
            DispatchError::Prepare(source)
            | DispatchError::Stage { source, .. }
            | DispatchError::Action { source, .. } => source.client_error(),
        }
    }

    /// Status classification: client errors keep theirs, the rest are 500
    pub fn status(&self) -> StatusCode {
        self.client_error()
            .map(ClientError::status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
