//! Observers invoked once a response has been written.
//!
//! Hooks are best-effort: the dispatcher runs them through the panic guard
//! and their outcome never changes the response.
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::{
    core::context::RequestContext,
    ports::handler::{GatewayError, Request, Stage},
};

/// Receives every error recorded while handling a request.
#[async_trait]
pub trait ErrorHook: Send + Sync + 'static {
    async fn on_errors(&self, ctx: &RequestContext, req: &Request, errors: &[GatewayError]);
}

/// Called for every request after its response was serialized.
#[async_trait]
pub trait CompletionHook: Send + Sync + 'static {
    async fn on_complete(
        &self,
        ctx: &RequestContext,
        req: &Request,
        status: StatusCode,
        elapsed: Duration,
    );
}

/// Metrics reported by the dispatcher at fixed points of the request
/// lifecycle. All methods default to no-ops.
pub trait MetricsSink: Send + Sync + 'static {
    fn request_started(&self, _method: &Method) {}

    fn stage_completed(&self, _stage: Stage, _elapsed: Duration) {}

    fn request_completed(
        &self,
        _method: &Method,
        _route: Option<&str>,
        _status: StatusCode,
        _elapsed: Duration,
    ) {
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
