use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    #[error("response head was already written")]
    HeadAlreadyWritten,

    #[error("response head must be written before the body or trailers")]
    HeadNotWritten,

    #[error("trailers were already written")]
    TrailersAlreadyWritten,

    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for a serialized response: head first, then body chunks, then
/// trailers.
pub trait ResponseWriter: Send {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<(), WriteError>;

    fn write_body(&mut self, chunk: Bytes) -> Result<(), WriteError>;

    fn write_trailers(&mut self, trailers: &HeaderMap) -> Result<(), WriteError>;
}
