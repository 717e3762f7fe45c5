pub mod extractor;
pub mod handler;
pub mod hooks;
pub mod response_writer;

pub use extractor::{Authorizer, StringExtractor};
pub use handler::{ErrorHandler, GatewayError, Handler, HandlerResult, Request, Stage};
pub use hooks::{CompletionHook, ErrorHook, MetricsSink, NoopMetrics};
pub use response_writer::{ResponseWriter, WriteError};
