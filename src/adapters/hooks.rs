use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;

use crate::{
    core::context::RequestContext,
    ports::{
        handler::{GatewayError, Request},
        hooks::{CompletionHook, ErrorHook},
    },
};

/// Logs completed requests and their recorded errors through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

#[async_trait]
impl CompletionHook for TracingHooks {
    async fn on_complete(
        &self,
        ctx: &RequestContext,
        req: &Request,
        status: StatusCode,
        elapsed: Duration,
    ) {
        tracing::debug!(
            request_id = ctx.request_id(),
            route = ctx.route().unwrap_or("-"),
            service = ctx.service().unwrap_or("-"),
            "{} {} -> {} in {:?}",
            req.method(),
            req.uri().path(),
            status.as_u16(),
            elapsed
        );
    }
}

#[async_trait]
impl ErrorHook for TracingHooks {
    async fn on_errors(&self, ctx: &RequestContext, req: &Request, errors: &[GatewayError]) {
        for error in errors {
            let status = error.status_code();
            if status.is_server_error() {
                tracing::error!(
                    request_id = ctx.request_id(),
                    route = ctx.route().unwrap_or("-"),
                    "{} {} failed: {}",
                    req.method(),
                    req.uri().path(),
                    error
                );
            } else {
                tracing::warn!(
                    request_id = ctx.request_id(),
                    route = ctx.route().unwrap_or("-"),
                    "{} {}: {}",
                    req.method(),
                    req.uri().path(),
                    error
                );
            }
        }
    }
}
