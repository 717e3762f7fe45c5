//! Response model produced by handlers and serialized by the dispatcher.
use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{CONTENT_TYPE, TRAILER},
};
use serde::Serialize;

use crate::ports::{
    handler::GatewayError,
    response_writer::{ResponseWriter, WriteError},
};

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub body: Bytes,
    /// Error this response was produced for, if any.
    pub error: Option<GatewayError>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    /// `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .with_body(body)
    }

    /// `application/json` response. Serialization failures yield a bare 500.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .with_body(body),
            Err(e) => Self::from_error(GatewayError::Internal(format!(
                "failed to serialize response body: {e}"
            ))),
        }
    }

    /// Empty-bodied response carrying `error` with its default status.
    pub fn from_error(error: GatewayError) -> Self {
        Self::new(error.status_code()).with_error(error)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_trailer(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.trailers.append(name, value);
        self
    }

    pub fn with_error(mut self, error: GatewayError) -> Self {
        self.error = Some(error);
        self
    }

    /// Value for the `Trailer` header announcing every trailer name.
    fn trailer_declaration(&self) -> Option<HeaderValue> {
        if self.trailers.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.trailers.keys().map(HeaderName::as_str).collect();
        HeaderValue::from_str(&names.join(", ")).ok()
    }

    /// Write status and headers, the body, then trailers. Trailer names are
    /// declared in a `Trailer` header before the body is sent.
    pub fn serialize(&self, writer: &mut dyn ResponseWriter) -> Result<(), WriteError> {
        match self.trailer_declaration() {
            Some(declared) => {
                let mut headers = self.headers.clone();
                headers.insert(TRAILER, declared);
                writer.write_head(self.status, &headers)?;
            }
            None => writer.write_head(self.status, &self.headers)?,
        }

        if !self.body.is_empty() {
            writer.write_body(self.body.clone())?;
        }

        if !self.trailers.is_empty() {
            writer.write_trailers(&self.trailers)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        head: HeaderMap,
    }

    impl ResponseWriter for Recorder {
        fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), WriteError> {
            self.events.push(format!("head {}", status.as_u16()));
            self.head = headers.clone();
            Ok(())
        }

        fn write_body(&mut self, chunk: Bytes) -> Result<(), WriteError> {
            self.events
                .push(format!("body {}", String::from_utf8_lossy(&chunk)));
            Ok(())
        }

        fn write_trailers(&mut self, trailers: &HeaderMap) -> Result<(), WriteError> {
            self.events.push(format!("trailers {}", trailers.len()));
            Ok(())
        }
    }

    #[test]
    fn test_trailers_are_declared_before_body() {
        let response = Response::text(StatusCode::OK, "hello")
            .with_trailer(
                HeaderName::from_static("x-checksum"),
                HeaderValue::from_static("abc"),
            )
            .with_trailer(
                HeaderName::from_static("x-elapsed"),
                HeaderValue::from_static("3ms"),
            );

        let mut recorder = Recorder::default();
        response.serialize(&mut recorder).unwrap();

        assert_eq!(
            recorder.events,
            vec!["head 200", "body hello", "trailers 2"]
        );
        let declared = recorder.head.get(TRAILER).unwrap().to_str().unwrap();
        assert!(declared.contains("x-checksum"));
        assert!(declared.contains("x-elapsed"));
        // The response itself is not modified.
        assert!(response.headers.get(TRAILER).is_none());
    }

    #[test]
    fn test_no_trailer_header_without_trailers() {
        let mut recorder = Recorder::default();
        Response::new(StatusCode::NO_CONTENT)
            .serialize(&mut recorder)
            .unwrap();

        assert_eq!(recorder.events, vec!["head 204"]);
        assert!(recorder.head.get(TRAILER).is_none());
    }

    #[test]
    fn test_from_error_uses_default_status() {
        let response = Response::from_error(GatewayError::NoResponse);
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body.is_empty());
        assert_eq!(response.error, Some(GatewayError::NoResponse));
    }
}
