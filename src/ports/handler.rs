use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

use crate::core::{context::RequestContext, response::Response, tree::TreeError};

/// Request as seen by handlers: head plus a fully buffered body.
pub type Request = http::Request<Bytes>;

/// `Ok(Some(_))` ends the chain with a response, `Ok(None)` passes the request
/// on to the next handler.
pub type HandlerResult = Result<Option<Response>, GatewayError>;

/// Non-standard status used when the client went away before a response was
/// produced.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RequestId,
    Gateway,
    Routing,
    Query,
    Pipeline,
    ErrorHandler,
    Write,
    Hook,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RequestId => "request_id",
            Stage::Gateway => "gateway",
            Stage::Routing => "routing",
            Stage::Query => "query",
            Stage::Pipeline => "pipeline",
            Stage::ErrorHandler => "error_handler",
            Stage::Write => "write",
            Stage::Hook => "hook",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while dispatching a single request.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("no route matches the request path")]
    NotFound,

    #[error("method not allowed, allowed: {allowed}")]
    MethodNotAllowed { allowed: String },

    #[error("bad query: {reason}")]
    BadQuery { reason: String },

    #[error("redirect to {location}")]
    Redirect { location: String, status: StatusCode },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("client disconnected")]
    Disconnected,

    #[error("handler chain finished without producing a response")]
    NoResponse,

    #[error("panic in {stage} stage: {message}")]
    Panic { stage: Stage, message: String },

    #[error("handler error: {0}")]
    Handler(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request id generation failed: {0}")]
    RequestId(String),

    #[error("routing error: {0}")]
    Routing(#[from] TreeError),

    #[error("failed to write response: {0}")]
    Write(String),
}

impl GatewayError {
    /// Status code a default error response carries for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::BadQuery { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Redirect { status, .. } => *status,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Disconnected => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            GatewayError::NoResponse
            | GatewayError::Panic { .. }
            | GatewayError::Handler(_)
            | GatewayError::Internal(_)
            | GatewayError::RequestId(_)
            | GatewayError::Routing(_)
            | GatewayError::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A step of a handler chain (gateway-level or per-endpoint pipeline).
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &RequestContext, req: &Request) -> HandlerResult;
}

/// Turns a recorded error into the response sent to the client.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle_error(
        &self,
        ctx: &RequestContext,
        req: &Request,
        error: &GatewayError,
    ) -> Response;
}
