use async_trait::async_trait;
use http::HeaderName;

use crate::{
    core::{context::RequestContext, defaults::UuidRequestId},
    ports::{
        extractor::StringExtractor,
        handler::{GatewayError, Request},
    },
};

const MAX_REQUEST_ID_LEN: usize = 128;

/// Reuses a caller-supplied request id header, generating a UUID when it is
/// absent or not a short printable ASCII string.
#[derive(Debug, Clone)]
pub struct HeaderRequestId {
    header: HeaderName,
}

impl HeaderRequestId {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait]
impl StringExtractor for HeaderRequestId {
    async fn extract(&self, _ctx: &RequestContext, req: &Request) -> Result<String, GatewayError> {
        let supplied = req
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| {
                !v.is_empty()
                    && v.len() <= MAX_REQUEST_ID_LEN
                    && v.bytes().all(|b| b.is_ascii_graphic())
            });

        Ok(match supplied {
            Some(id) => id.to_string(),
            None => UuidRequestId::generate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn extract(value: Option<&str>) -> String {
        let mut builder = http::Request::builder().uri("/");
        if let Some(value) = value {
            builder = builder.header("x-request-id", value);
        }
        let req = builder.body(Bytes::new()).unwrap();
        let ctx = RequestContext::new("", CancellationToken::new());
        HeaderRequestId::new(HeaderName::from_static("x-request-id"))
            .extract(&ctx, &req)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_supplied_id_is_reused() {
        assert_eq!(extract(Some("abc-123")).await, "abc-123");
    }

    #[tokio::test]
    async fn test_unusable_ids_are_replaced() {
        for value in [None, Some(""), Some("has space"), Some(&"x".repeat(200)[..])] {
            let id = extract(value).await;
            assert!(uuid::Uuid::parse_str(&id).is_ok(), "{value:?} -> {id}");
        }
    }
}
