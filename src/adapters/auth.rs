//! Bearer-token authorization as a gateway-level handler.
use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use http::header::AUTHORIZATION;

use crate::{
    core::context::RequestContext,
    ports::{
        extractor::{Authorizer, StringExtractor},
        handler::{GatewayError, Handler, HandlerResult, Request},
    },
};

/// Token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerToken;

#[async_trait]
impl StringExtractor for BearerToken {
    async fn extract(&self, _ctx: &RequestContext, req: &Request) -> Result<String, GatewayError> {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .ok_or_else(|| GatewayError::Unauthorized("missing Authorization header".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| GatewayError::Unauthorized("malformed Authorization header".to_string()))?;

        match value.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
                Ok(token.trim().to_string())
            }
            _ => Err(GatewayError::Unauthorized(
                "expected a Bearer token".to_string(),
            )),
        }
    }
}

/// Accepts requests carrying one of a fixed set of tokens.
pub struct StaticTokenAuthorizer {
    tokens: HashSet<String>,
    extractor: Arc<dyn StringExtractor>,
}

impl StaticTokenAuthorizer {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.trim().is_empty()).collect(),
            extractor: Arc::new(BearerToken),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StringExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

#[async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn authorize(&self, ctx: &RequestContext, req: &Request) -> Result<bool, GatewayError> {
        let token = self.extractor.extract(ctx, req).await?;
        Ok(self.tokens.contains(&token))
    }
}

/// Runs an [`Authorizer`] before routing. Rejected requests end the gateway
/// chain with `403`, requests without credentials with `401`.
pub struct AuthorizationHandler {
    authorizer: Arc<dyn Authorizer>,
    public_paths: HashSet<String>,
}

impl AuthorizationHandler {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            authorizer,
            public_paths: HashSet::new(),
        }
    }

    /// Paths served without authorization (exact match).
    pub fn public_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.public_paths.extend(paths);
        self
    }
}

#[async_trait]
impl Handler for AuthorizationHandler {
    async fn handle(&self, ctx: &RequestContext, req: &Request) -> HandlerResult {
        if self.public_paths.contains(req.uri().path()) {
            return Ok(None);
        }

        if self.authorizer.authorize(ctx, req).await? {
            Ok(None)
        } else {
            tracing::debug!("Rejected credentials for {}", req.uri().path());
            Err(GatewayError::Forbidden("credentials not accepted".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn request(path: &str, authorization: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(path);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn handler() -> AuthorizationHandler {
        AuthorizationHandler::new(Arc::new(StaticTokenAuthorizer::new(vec![
            "s3cret".to_string(),
        ])))
        .public_paths(vec!["/health".to_string()])
    }

    #[tokio::test]
    async fn test_bearer_token_extraction() {
        let ctx = RequestContext::new("id", CancellationToken::new());
        let token = BearerToken
            .extract(&ctx, &request("/", Some("bearer  abc ")))
            .await
            .unwrap();
        assert_eq!(token, "abc");

        assert!(matches!(
            BearerToken.extract(&ctx, &request("/", Some("Basic abc"))).await,
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(matches!(
            BearerToken.extract(&ctx, &request("/", None)).await,
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_authorization_outcomes() {
        let ctx = RequestContext::new("id", CancellationToken::new());
        let handler = handler();

        assert!(matches!(
            handler.handle(&ctx, &request("/a", Some("Bearer s3cret"))).await,
            Ok(None)
        ));
        assert!(matches!(
            handler.handle(&ctx, &request("/a", Some("Bearer nope"))).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            handler.handle(&ctx, &request("/a", None)).await,
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(matches!(
            handler.handle(&ctx, &request("/health", None)).await,
            Ok(None)
        ));
    }
}
