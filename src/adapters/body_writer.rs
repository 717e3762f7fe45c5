//! [`ResponseWriter`] that buffers a serialized response and turns it into an
//! axum response, trailers included.
use std::convert::Infallible;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::StreamBody;
use hyper::body::Frame;

use crate::ports::response_writer::{ResponseWriter, WriteError};

#[derive(Debug, Default)]
pub struct BufferedResponseWriter {
    head: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
    trailers: Option<HeaderMap>,
}

impl BufferedResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|(status, _)| *status)
    }

    /// Build the response. Trailers, when present, follow the body as a
    /// trailers frame.
    pub fn into_response(self) -> Result<http::Response<Body>, WriteError> {
        let (status, headers) = self.head.ok_or(WriteError::HeadNotWritten)?;
        let body = self.body.freeze();

        let body = match self.trailers {
            Some(trailers) => {
                let mut frames: Vec<Result<Frame<Bytes>, Infallible>> = Vec::with_capacity(2);
                if !body.is_empty() {
                    frames.push(Ok(Frame::data(body)));
                }
                frames.push(Ok(Frame::trailers(trailers)));
                Body::new(StreamBody::new(futures_util::stream::iter(frames)))
            }
            None if body.is_empty() => Body::empty(),
            None => Body::from(body),
        };

        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl ResponseWriter for BufferedResponseWriter {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), WriteError> {
        if self.head.is_some() {
            return Err(WriteError::HeadAlreadyWritten);
        }
        self.head = Some((status, headers.clone()));
        Ok(())
    }

    fn write_body(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        if self.head.is_none() {
            return Err(WriteError::HeadNotWritten);
        }
        if self.trailers.is_some() {
            return Err(WriteError::TrailersAlreadyWritten);
        }
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    fn write_trailers(&mut self, trailers: &HeaderMap) -> Result<(), WriteError> {
        if self.head.is_none() {
            return Err(WriteError::HeadNotWritten);
        }
        if self.trailers.is_some() {
            return Err(WriteError::TrailersAlreadyWritten);
        }
        self.trailers = Some(trailers.clone());
        Ok(())
    }
}
