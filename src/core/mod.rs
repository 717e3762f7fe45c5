pub mod context;
pub mod defaults;
pub mod dispatcher;
pub mod endpoint;
pub mod params;
pub mod path;
pub mod pool;
pub mod query;
pub mod response;
pub mod safe;
pub mod tree;

pub use context::RequestContext;
pub use defaults::{DefaultErrorHandler, UuidRequestId};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use endpoint::{Endpoint, Method, Pipeline, Policy};
pub use params::{Param, Params};
pub use query::{QueryParamError, QueryParameter, QueryParams, QuerySchema, QueryVerdict};
pub use response::Response;
pub use tree::{Tree, TreeError};
