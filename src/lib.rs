//! Portico - an HTTP gateway core.
//!
//! Portico maps inbound requests to registered endpoints through a
//! compressed radix tree and runs each request through a bounded, panic-safe
//! pipeline: request id, gateway-level handlers, routing, query validation,
//! the endpoint's handler chain under its time budget, response
//! serialization and completion/error hooks.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use http::StatusCode;
//! use portico::{
//!     adapters::{GatewayServer, GatewayServerOptions, ServerCore},
//!     core::{Dispatcher, Endpoint, Method, Pipeline, RequestContext, Response},
//!     ports::{Handler, HandlerResult, Request},
//!     utils::GracefulShutdown,
//! };
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn handle(&self, ctx: &RequestContext, _req: &Request) -> HandlerResult {
//!         let name = ctx.param("name").unwrap_or("world");
//!         Ok(Some(Response::text(StatusCode::OK, format!("hello, {name}"))))
//!     }
//! }
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut builder = Dispatcher::builder();
//! builder.add_route(
//!     "/hello/:name",
//!     Endpoint::new("greeter").with_pipeline(Method::Get, Pipeline::new().handler(Hello)),
//! )?;
//!
//! let shutdown = GracefulShutdown::new();
//! let core = ServerCore::bind("127.0.0.1:8080", shutdown).await?;
//! GatewayServer::new(Arc::new(builder.build()), GatewayServerOptions::default())
//!     .serve(core)
//!     .await
//! # }
//! ```
//!
//! # Architecture
//! Ports (traits in [`ports`]) separate the dispatch core in [`core`] from the
//! axum/hyper transport, config-driven handlers and telemetry in
//! [`adapters`] and [`metrics`].
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{GatewayServer, ServerCore, build_dispatcher},
    core::{Dispatcher, DispatcherBuilder, Endpoint, Method, Pipeline, Policy, Response},
    utils::GracefulShutdown,
};
