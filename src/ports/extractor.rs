use async_trait::async_trait;

use crate::{
    core::context::RequestContext,
    ports::handler::{GatewayError, Request},
};

/// Pulls a string out of a request: request ids, bearer tokens, tenant keys.
#[async_trait]
pub trait StringExtractor: Send + Sync + 'static {
    async fn extract(&self, ctx: &RequestContext, req: &Request) -> Result<String, GatewayError>;
}

/// Decides whether a request may proceed.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, ctx: &RequestContext, req: &Request) -> Result<bool, GatewayError>;
}
