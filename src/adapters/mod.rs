pub mod auth;
pub mod body_writer;
pub mod hooks;
pub mod http_server;
pub mod middleware;
pub mod request_id;
pub mod routes;

/// Re-export commonly used types from adapters
pub use auth::{AuthorizationHandler, BearerToken, StaticTokenAuthorizer};
pub use body_writer::BufferedResponseWriter;
pub use hooks::TracingHooks;
pub use http_server::{GatewayServer, GatewayServerOptions, ServerCore};
pub use middleware::*;
pub use request_id::HeaderRequestId;
pub use routes::{EchoHandler, RespondHandler, build_dispatcher};
