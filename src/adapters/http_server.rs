//! axum/hyper transport for the dispatcher.
//!
//! [`ServerCore`] owns the listener and the shutdown sequence;
//! [`GatewayServer`] builds the router that feeds every request into the
//! [`Dispatcher`] and runs it on a `ServerCore`.
use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{Request, State},
    middleware,
    response::{IntoResponse, Response},
};
use eyre::{Result, WrapErr};
use http::{StatusCode, header::CONTENT_LENGTH};
use http_body_util::LengthLimitError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    adapters::{
        body_writer::BufferedResponseWriter,
        middleware::{request_timing_middleware, security_headers_middleware},
    },
    core::dispatcher::Dispatcher,
    utils::graceful_shutdown::GracefulShutdown,
};

/// Listener plus shutdown handling shared by every server flavour.
pub struct ServerCore {
    listener: TcpListener,
    shutdown: GracefulShutdown,
}

impl ServerCore {
    pub async fn bind(listen_addr: &str, shutdown: GracefulShutdown) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .wrap_err_with(|| format!("Failed to bind to address {listen_addr}"))?;
        Ok(Self::from_listener(listener, shutdown))
    }

    pub fn from_listener(listener: TcpListener, shutdown: GracefulShutdown) -> Self {
        Self { listener, shutdown }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .wrap_err("Failed to get local addr")
    }

    /// Serve `app` until shutdown starts, then give in-flight requests the
    /// drain period to finish.
    pub async fn run(self, app: Router) -> Result<()> {
        let token = self.shutdown.token();
        let server = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .into_future();
        let mut server = std::pin::pin!(server);

        tokio::select! {
            result = &mut server => return result.wrap_err("Server error"),
            () = token.cancelled() => {}
        }

        tracing::info!("Draining in-flight requests...");
        match self.shutdown.drain(&mut server).await {
            Some(result) => {
                result.wrap_err("Server error during shutdown")?;
                tracing::info!("Graceful shutdown completed");
            }
            None => tracing::warn!("Abandoning requests still in flight"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GatewayServerOptions {
    pub max_body_bytes: usize,
    pub security_headers: bool,
}

impl Default for GatewayServerOptions {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024,
            security_headers: true,
        }
    }
}

struct GatewayState {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

/// HTTP front end of a [`Dispatcher`].
pub struct GatewayServer {
    dispatcher: Arc<Dispatcher>,
    options: GatewayServerOptions,
}

impl GatewayServer {
    pub fn new(dispatcher: Arc<Dispatcher>, options: GatewayServerOptions) -> Self {
        Self {
            dispatcher,
            options,
        }
    }

    /// Router sending every request to the dispatcher.
    pub fn router(&self) -> Router {
        let state = Arc::new(GatewayState {
            dispatcher: Arc::clone(&self.dispatcher),
            max_body_bytes: self.options.max_body_bytes,
        });

        let mut app = Router::new()
            .fallback(dispatch_request)
            .with_state(state)
            .layer(middleware::from_fn(request_timing_middleware));
        if self.options.security_headers {
            app = app.layer(middleware::from_fn(security_headers_middleware));
        }
        app.layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::new())
    }

    pub async fn serve(self, core: ServerCore) -> Result<()> {
        tracing::info!(
            "Portico gateway listening on {} with {} routes",
            core.local_addr()?,
            self.dispatcher.route_count()
        );
        core.run(self.router()).await
    }
}

async fn dispatch_request(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let declared_len = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.max_body_bytes) {
        return payload_too_large();
    }

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let inner = e.into_inner();
            if inner.is::<LengthLimitError>() {
                return payload_too_large();
            }
            tracing::debug!("Failed to read request body: {}", inner);
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    // Cancelled when hyper drops this future, i.e. the client went away. The
    // dispatch itself runs in its own task so it still reaches the hooks.
    let closed = CancellationToken::new();
    let _closed_guard = closed.clone().drop_guard();

    let dispatcher = Arc::clone(&state.dispatcher);
    let request = http::Request::from_parts(parts, bytes);
    let dispatch = tokio::spawn(async move {
        let mut writer = BufferedResponseWriter::new();
        dispatcher.dispatch(request, &mut writer, closed).await;
        writer
    });

    let writer = match dispatch.await {
        Ok(writer) => writer,
        Err(e) => {
            tracing::error!("Dispatch task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match writer.into_response() {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Dispatcher produced no response head: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn payload_too_large() -> Response {
    (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use axum::body::Body;
    use bytes::Bytes;
    use tokio::{io::AsyncWriteExt, net::TcpStream};
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::{
        core::{
            context::RequestContext,
            endpoint::{Endpoint, Method, Pipeline},
            response::Response as GatewayResponse,
        },
        ports::{
            handler::{Handler, HandlerResult, Request as GatewayRequest},
            hooks::CompletionHook,
        },
    };

    struct Upper;

    #[async_trait]
    impl Handler for Upper {
        async fn handle(&self, _ctx: &RequestContext, req: &GatewayRequest) -> HandlerResult {
            let body = String::from_utf8_lossy(req.body()).to_uppercase();
            Ok(Some(GatewayResponse::text(StatusCode::OK, body)))
        }
    }

    fn router(max_body_bytes: usize) -> Router {
        let mut builder = Dispatcher::builder();
        builder
            .add_route(
                "/upper",
                Endpoint::new("upper").with_pipeline(Method::Post, Pipeline::new().handler(Upper)),
            )
            .unwrap();
        GatewayServer::new(
            Arc::new(builder.build()),
            GatewayServerOptions {
                max_body_bytes,
                security_headers: true,
            },
        )
        .router()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_requests_reach_the_dispatcher() {
        let response = router(1024)
            .oneshot(
                http::Request::post("/upper")
                    .body(Body::from("shout"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(body_text(response).await, "SHOUT");
    }

    #[tokio::test]
    async fn test_dispatcher_errors_are_served() {
        let response = router(1024)
            .oneshot(http::Request::get("/upper").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow").unwrap(), "POST, OPTIONS");

        let response = router(1024)
            .oneshot(http::Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_rejected() {
        let response = router(4)
            .oneshot(
                http::Request::post("/upper")
                    .body(Body::from(Bytes::from_static(b"far too long")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    struct Wait;

    #[async_trait]
    impl Handler for Wait {
        async fn handle(&self, ctx: &RequestContext, _req: &GatewayRequest) -> HandlerResult {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(5)) => {
                    Ok(Some(GatewayResponse::text(StatusCode::OK, "done")))
                }
                () = ctx.cancelled() => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct StatusLog(Mutex<Vec<u16>>);

    #[async_trait]
    impl CompletionHook for StatusLog {
        async fn on_complete(
            &self,
            _ctx: &RequestContext,
            _req: &GatewayRequest,
            status: StatusCode,
            _elapsed: Duration,
        ) {
            self.0.lock().unwrap().push(status.as_u16());
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_still_completes_dispatch() {
        let statuses = Arc::new(StatusLog::default());
        let mut builder = Dispatcher::builder()
            .completion_hook(Arc::clone(&statuses) as Arc<dyn CompletionHook>);
        builder
            .add_route(
                "/wait",
                Endpoint::new("wait").with_pipeline(Method::Get, Pipeline::new().handler(Wait)),
            )
            .unwrap();
        let app = GatewayServer::new(Arc::new(builder.build()), GatewayServerOptions::default())
            .router();

        let core = ServerCore::bind("127.0.0.1:0", GracefulShutdown::new())
            .await
            .unwrap();
        let addr = core.local_addr().unwrap();
        tokio::spawn(core.run(app));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /wait HTTP/1.1\r\nhost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(stream);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while statuses.0.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*statuses.0.lock().unwrap(), vec![499]);
    }

    #[tokio::test]
    async fn test_server_core_stops_on_shutdown() {
        let shutdown = GracefulShutdown::with_timeout(Duration::from_secs(1));
        let core = ServerCore::bind("127.0.0.1:0", shutdown.clone()).await.unwrap();
        assert!(core.local_addr().unwrap().port() > 0);

        let server = tokio::spawn(core.run(router(1024)));
        shutdown.trigger_shutdown(crate::utils::graceful_shutdown::ShutdownReason::Requested);

        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
