//! Built-in fallback handlers and request-id generator.
use async_trait::async_trait;
use http::{
    HeaderValue,
    header::{ALLOW, LOCATION, WWW_AUTHENTICATE},
};
use uuid::Uuid;

use crate::{
    core::{context::RequestContext, response::Response},
    ports::{
        extractor::StringExtractor,
        handler::{ErrorHandler, GatewayError, Request},
    },
};

/// Maps an error to its default status. Client errors get a short plain-text
/// body, server errors an empty one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle_error(
        &self,
        _ctx: &RequestContext,
        _req: &Request,
        error: &GatewayError,
    ) -> Response {
        let status = error.status_code();
        let mut response = if status.is_client_error() {
            Response::text(status, error.to_string())
        } else {
            Response::new(status)
        };

        match error {
            GatewayError::Redirect { location, .. } => match HeaderValue::from_str(location) {
                Ok(value) => response = response.with_header(LOCATION, value),
                Err(e) => {
                    tracing::warn!("Dropping redirect to unrepresentable location {location:?}: {e}")
                }
            },
            GatewayError::MethodNotAllowed { allowed } => {
                if let Ok(value) = HeaderValue::from_str(allowed) {
                    response = response.with_header(ALLOW, value);
                }
            }
            GatewayError::Unauthorized(_) => {
                response = response.with_header(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }

        response.with_error(error.clone())
    }
}

/// Random UUID v4 request ids. Also the fallback when a configured
/// generator fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl UuidRequestId {
    pub fn generate() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl StringExtractor for UuidRequestId {
    async fn extract(&self, _ctx: &RequestContext, _req: &Request) -> Result<String, GatewayError> {
        Ok(Self::generate())
    }
}
