//! Per-request dispatch state machine.
//!
//! Stages run strictly in order, each able to end the request early:
//!
//! 1. request id assignment
//! 2. gateway-level handlers, optionally under an overall timeout
//! 3. path resolution, with trailing-slash and fixed-path redirects
//! 4. method pipeline selection
//! 5. query validation
//! 6. the method pipeline under its time budget, raced against client
//!    disconnect
//! 7. response serialization, then the completion and error hooks
//!
//! Every user callback runs behind the panic guard in [`crate::core::safe`].
//! Chains that may be abandoned (timeouts, disconnects) run in spawned tasks
//! that are never joined; their context is cancelled instead.
use std::{sync::Arc, time::Duration};

use http::{HeaderValue, StatusCode, header::ALLOW};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, warn};

use crate::{
    core::{
        context::RequestContext,
        defaults::{DefaultErrorHandler, UuidRequestId},
        endpoint::{Endpoint, Method, Pipeline},
        params::Params,
        path::clean_path,
        pool::Pool,
        query::{self, QueryParams},
        response::Response,
        safe,
        tree::{Tree, TreeError},
    },
    ports::{
        extractor::StringExtractor,
        handler::{ErrorHandler, GatewayError, Handler, Request, Stage},
        hooks::{CompletionHook, ErrorHook, MetricsSink, NoopMetrics},
        response_writer::ResponseWriter,
    },
    tracing_setup::create_request_span,
};

const DEFAULT_POOL_SIZE: usize = 1024;

/// Result of running a handler chain.
enum ChainOutcome {
    Responded(Response),
    Failed(GatewayError),
    Exhausted,
    TimedOut(Duration),
    Disconnected,
}

/// Registration-phase builder. Routes can only be added here; [`build`]
/// freezes the tree.
///
/// [`build`]: DispatcherBuilder::build
pub struct DispatcherBuilder {
    tree: Tree<Endpoint>,
    gateway_handlers: Vec<Arc<dyn Handler>>,
    handlers_timeout: Option<Duration>,
    request_id: Option<Arc<dyn StringExtractor>>,
    not_found: Arc<dyn ErrorHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    redirect_fixed_path: bool,
    handle_options: bool,
    error_hook: Option<Arc<dyn ErrorHook>>,
    completion_hook: Option<Arc<dyn CompletionHook>>,
    metrics: Arc<dyn MetricsSink>,
    pool_size: usize,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            gateway_handlers: Vec::new(),
            handlers_timeout: None,
            request_id: None,
            not_found: Arc::new(DefaultErrorHandler),
            error_handler: Arc::new(DefaultErrorHandler),
            redirect_fixed_path: false,
            handle_options: true,
            error_hook: None,
            completion_hook: None,
            metrics: Arc::new(NoopMetrics),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Register `endpoint` under `path`. Conflicts are reported here, never
    /// while serving.
    pub fn add_route(&mut self, path: &str, mut endpoint: Endpoint) -> Result<(), TreeError> {
        endpoint.set_route(path);
        self.tree.add_route(path, endpoint)?;
        debug!("Registered route {}", path);
        Ok(())
    }

    pub fn gateway_handler(self, handler: impl Handler) -> Self {
        self.shared_gateway_handler(Arc::new(handler))
    }

    pub fn shared_gateway_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.gateway_handlers.push(handler);
        self
    }

    /// Bound on the whole gateway-level chain.
    pub fn handlers_timeout(mut self, timeout: Duration) -> Self {
        self.handlers_timeout = Some(timeout);
        self
    }

    pub fn request_id(mut self, extractor: Arc<dyn StringExtractor>) -> Self {
        self.request_id = Some(extractor);
        self
    }

    pub fn not_found(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.not_found = handler;
        self
    }

    /// Handler for failures outside any endpoint: gateway chain errors and
    /// routing errors.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Redirect to the cleaned, case-corrected path when nothing matches.
    pub fn redirect_fixed_path(mut self, enabled: bool) -> Self {
        self.redirect_fixed_path = enabled;
        self
    }

    /// Answer `OPTIONS` automatically on endpoints without an `OPTIONS`
    /// pipeline.
    pub fn handle_options(mut self, enabled: bool) -> Self {
        self.handle_options = enabled;
        self
    }

    pub fn error_hook(mut self, hook: Arc<dyn ErrorHook>) -> Self {
        self.error_hook = Some(hook);
        self
    }

    pub fn completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.completion_hook = Some(hook);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Maximum number of idle parameter buffers kept for reuse.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn build(self) -> Dispatcher {
        tracing::info!("Dispatcher ready with {} routes", self.tree.len());
        Dispatcher {
            tree: self.tree,
            gateway_handlers: self.gateway_handlers.into(),
            handlers_timeout: self.handlers_timeout,
            request_id: self.request_id,
            not_found: self.not_found,
            error_handler: self.error_handler,
            redirect_fixed_path: self.redirect_fixed_path,
            handle_options: self.handle_options,
            error_hook: self.error_hook,
            completion_hook: self.completion_hook,
            metrics: self.metrics,
            param_pool: Pool::new(self.pool_size),
            query_pool: Pool::new(self.pool_size),
        }
    }
}

/// Immutable request dispatcher. Share it behind an `Arc`.
pub struct Dispatcher {
    tree: Tree<Endpoint>,
    gateway_handlers: Arc<[Arc<dyn Handler>]>,
    handlers_timeout: Option<Duration>,
    request_id: Option<Arc<dyn StringExtractor>>,
    not_found: Arc<dyn ErrorHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    redirect_fixed_path: bool,
    handle_options: bool,
    error_hook: Option<Arc<dyn ErrorHook>>,
    completion_hook: Option<Arc<dyn CompletionHook>>,
    metrics: Arc<dyn MetricsSink>,
    param_pool: Pool<Params>,
    query_pool: Pool<QueryParams>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn route_count(&self) -> usize {
        self.tree.len()
    }

    /// Handle one request, writing the response to `writer`.
    ///
    /// `closed` is cancelled by the transport when the client goes away.
    /// Returns the status that was written.
    pub async fn dispatch(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
        closed: CancellationToken,
    ) -> StatusCode {
        let started = Instant::now();
        let method = request.method().clone();
        self.metrics.request_started(&method);

        let request = Arc::new(request);
        let mut errors = Vec::new();

        let mut ctx = RequestContext::new(String::new(), closed.child_token());
        let request_id = self.assign_request_id(&ctx, &request, &mut errors).await;
        ctx.set_request_id(request_id);
        let ctx = Arc::new(ctx);

        let span = create_request_span(method.as_str(), request.uri().path(), ctx.request_id());
        async move {
            let (response, final_ctx) = self
                .process(Arc::clone(&ctx), &request, &closed, &mut errors)
                .await;

            let write_started = Instant::now();
            let status = response.status;
            if let Err(e) = response.serialize(writer) {
                warn!("Failed to write response: {}", e);
                errors.push(GatewayError::Write(e.to_string()));
            }
            self.metrics
                .stage_completed(Stage::Write, write_started.elapsed());

            let elapsed = started.elapsed();
            let span = tracing::Span::current();
            span.record("http.status_code", status.as_u16());
            span.record("duration_ms", elapsed.as_millis() as u64);

            self.run_hooks(&final_ctx, &request, status, elapsed, &mut errors)
                .await;
            self.metrics
                .request_completed(&method, final_ctx.route(), status, elapsed);

            // Anything still running for this request is orphaned now.
            ctx.cancel();
            status
        }
        .instrument(span)
        .await
    }

    async fn assign_request_id(
        &self,
        ctx: &RequestContext,
        req: &Request,
        errors: &mut Vec<GatewayError>,
    ) -> String {
        let Some(extractor) = &self.request_id else {
            return UuidRequestId::generate();
        };

        let failure = match safe::invoke(Stage::RequestId, extractor.extract(ctx, req)).await {
            Ok(Ok(id)) if !id.is_empty() => return id,
            Ok(Ok(_)) => GatewayError::RequestId("generator returned an empty id".to_string()),
            Ok(Err(e)) => GatewayError::RequestId(e.to_string()),
            Err(panic) => panic,
        };
        warn!("Request id generation failed, using fallback: {}", failure);
        errors.push(failure);
        UuidRequestId::generate()
    }

    /// Stages 2 to 6. Returns the response and the context the request ended
    /// with.
    async fn process(
        &self,
        ctx: Arc<RequestContext>,
        req: &Arc<Request>,
        closed: &CancellationToken,
        errors: &mut Vec<GatewayError>,
    ) -> (Response, Arc<RequestContext>) {
        if let Some(response) = self.run_gateway(&ctx, req, errors).await {
            return (response, ctx);
        }

        let routing_started = Instant::now();
        let mut params = self.param_pool.acquire();
        let lookup = match self.tree.get_value_into(req.uri().path(), &mut params) {
            Ok(lookup) => lookup,
            Err(e) => {
                error!("Routing failed for {}: {}", req.uri().path(), e);
                let err = GatewayError::Routing(e);
                errors.push(err.clone());
                let response = self
                    .respond_error(&self.error_handler, &ctx, req, err, errors)
                    .await;
                return (response, ctx);
            }
        };

        let method = Method::from_http(req.method());

        let Some(endpoint) = lookup.value else {
            let response = if lookup.tsr {
                self.trailing_slash_redirect(&ctx, req, method, errors).await
            } else {
                self.fixed_path_redirect(&ctx, req, method, errors).await
            };
            self.metrics
                .stage_completed(Stage::Routing, routing_started.elapsed());
            return (response, ctx);
        };

        let pipeline = match method.and_then(|m| endpoint.pipeline(m)) {
            Some(pipeline) => Arc::clone(pipeline),
            None => {
                let response = self
                    .method_not_allowed(&ctx, req, endpoint, method, errors)
                    .await;
                self.metrics
                    .stage_completed(Stage::Routing, routing_started.elapsed());
                return (response, ctx);
            }
        };
        self.metrics
            .stage_completed(Stage::Routing, routing_started.elapsed());

        let query_started = Instant::now();
        let policy = pipeline.policy();
        let mut query = self.query_pool.acquire();
        query::parse_query_into(req.uri().query().unwrap_or_default(), &mut query);
        let verdict = query::validate(&mut query, pipeline.query_schemas());
        if let Some(fault) = verdict.fault {
            errors.push(fault);
        }
        let rejected = (verdict.malformed && !policy.allow_malformed_query)
            || (verdict.unknown && !policy.allow_unknown_query);
        let reason = rejected.then(|| query.describe_errors());

        if !policy.preserve_escaped_path_params {
            params.decode_values();
        }

        let endpoint_ctx = Arc::new(ctx.for_endpoint(
            endpoint.route(),
            endpoint.service_name(),
            params,
            query,
            policy.time_budget,
        ));
        self.metrics
            .stage_completed(Stage::Query, query_started.elapsed());

        if let Some(reason) = reason {
            debug!("Rejecting query for {}: {}", endpoint.route(), reason);
            let response = self
                .respond_error(
                    endpoint.bad_query_handler(),
                    &endpoint_ctx,
                    req,
                    GatewayError::BadQuery { reason },
                    errors,
                )
                .await;
            return (response, endpoint_ctx);
        }

        let pipeline_started = Instant::now();
        let outcome = self
            .run_pipeline(pipeline, Arc::clone(&endpoint_ctx), Arc::clone(req), closed)
            .await;
        self.metrics
            .stage_completed(Stage::Pipeline, pipeline_started.elapsed());

        let failure = match outcome {
            ChainOutcome::Responded(response) => return (response, endpoint_ctx),
            ChainOutcome::Disconnected => {
                debug!("Client disconnected before {} finished", endpoint.route());
                errors.push(GatewayError::Disconnected);
                return (
                    Response::from_error(GatewayError::Disconnected),
                    endpoint_ctx,
                );
            }
            ChainOutcome::Failed(e) => e,
            ChainOutcome::Exhausted => GatewayError::NoResponse,
            ChainOutcome::TimedOut(after) => {
                warn!("Pipeline for {} timed out after {:?}", endpoint.route(), after);
                GatewayError::Timeout {
                    stage: Stage::Pipeline,
                    after,
                }
            }
        };
        errors.push(failure.clone());
        let response = self
            .respond_error(
                endpoint.internal_error_handler(),
                &endpoint_ctx,
                req,
                failure,
                errors,
            )
            .await;
        (response, endpoint_ctx)
    }

    /// Stage 2. `None` lets the request continue to routing.
    async fn run_gateway(
        &self,
        ctx: &Arc<RequestContext>,
        req: &Arc<Request>,
        errors: &mut Vec<GatewayError>,
    ) -> Option<Response> {
        if self.gateway_handlers.is_empty() {
            return None;
        }

        let started = Instant::now();
        let outcome = match self.handlers_timeout {
            None => run_chain(&self.gateway_handlers, ctx, req, Stage::Gateway).await,
            Some(limit) => {
                let handlers = Arc::clone(&self.gateway_handlers);
                let task_ctx = Arc::clone(ctx);
                let task_req = Arc::clone(req);
                let task = tokio::spawn(async move {
                    run_chain(&handlers, &task_ctx, &task_req, Stage::Gateway).await
                });

                match tokio::time::timeout(limit, task).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_error)) => {
                        ChainOutcome::Failed(join_failure(Stage::Gateway, join_error))
                    }
                    Err(_) => {
                        ctx.cancel();
                        ChainOutcome::TimedOut(limit)
                    }
                }
            }
        };
        self.metrics
            .stage_completed(Stage::Gateway, started.elapsed());

        let failure = match outcome {
            ChainOutcome::Exhausted => return None,
            ChainOutcome::Responded(response) => return Some(response),
            ChainOutcome::Failed(e) => e,
            ChainOutcome::TimedOut(after) => {
                warn!("Gateway handlers timed out after {:?}", after);
                GatewayError::Timeout {
                    stage: Stage::Gateway,
                    after,
                }
            }
            ChainOutcome::Disconnected => GatewayError::Disconnected,
        };
        errors.push(failure.clone());
        Some(
            self.respond_error(&self.error_handler, ctx, req, failure, errors)
                .await,
        )
    }

    /// Stage 6: run the chain in its own task so the deadline and client
    /// disconnect can be observed without waiting for it.
    async fn run_pipeline(
        &self,
        pipeline: Arc<Pipeline>,
        ctx: Arc<RequestContext>,
        req: Arc<Request>,
        closed: &CancellationToken,
    ) -> ChainOutcome {
        let budget = pipeline.policy().time_budget;
        let deadline = ctx.deadline();

        let task_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move {
            run_chain(pipeline.handlers(), &task_ctx, &req, Stage::Pipeline).await
        });

        let expired = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        // A chain that gave up because the client left still counts as a
        // disconnect.
        tokio::select! {
            biased;
            () = closed.cancelled() => {
                ctx.cancel();
                ChainOutcome::Disconnected
            }
            joined = task => match joined {
                Ok(outcome) => outcome,
                Err(join_error) => ChainOutcome::Failed(join_failure(Stage::Pipeline, join_error)),
            },
            () = expired => {
                ctx.cancel();
                ChainOutcome::TimedOut(budget.unwrap_or_default())
            }
        }
    }

    async fn trailing_slash_redirect(
        &self,
        ctx: &Arc<RequestContext>,
        req: &Request,
        method: Option<Method>,
        errors: &mut Vec<GatewayError>,
    ) -> Response {
        let path = req.uri().path();
        let alternate = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
            _ => format!("{path}/"),
        };

        let mut scratch = self.param_pool.acquire();
        match self.tree.get_value_into(&alternate, &mut scratch) {
            Ok(lookup) => {
                if let Some(endpoint) = redirect_target(lookup.value, method) {
                    let redirect = GatewayError::Redirect {
                        location: with_query(&alternate, req.uri().query()),
                        status: redirect_status(method),
                    };
                    return self
                        .respond_error(endpoint.redirect_handler(), ctx, req, redirect, errors)
                        .await;
                }
            }
            Err(e) => {
                error!("Routing failed for {}: {}", alternate, e);
                errors.push(GatewayError::Routing(e));
            }
        }

        self.respond_error(&self.not_found, ctx, req, GatewayError::NotFound, errors)
            .await
    }

    async fn fixed_path_redirect(
        &self,
        ctx: &Arc<RequestContext>,
        req: &Request,
        method: Option<Method>,
        errors: &mut Vec<GatewayError>,
    ) -> Response {
        let path = req.uri().path();
        if self.redirect_fixed_path && method != Some(Method::Connect) && path != "/" {
            match self.tree.find_case_insensitive_path(&clean_path(path), true) {
                Ok(Some(fixed)) if fixed != path => {
                    let mut scratch = self.param_pool.acquire();
                    if let Ok(lookup) = self.tree.get_value_into(&fixed, &mut scratch) {
                        if let Some(endpoint) = redirect_target(lookup.value, method) {
                            let redirect = GatewayError::Redirect {
                                location: with_query(&fixed, req.uri().query()),
                                status: redirect_status(method),
                            };
                            return self
                                .respond_error(
                                    endpoint.redirect_handler(),
                                    ctx,
                                    req,
                                    redirect,
                                    errors,
                                )
                                .await;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Case-insensitive lookup failed for {}: {}", path, e);
                    errors.push(GatewayError::Routing(e));
                }
            }
        }

        self.respond_error(&self.not_found, ctx, req, GatewayError::NotFound, errors)
            .await
    }

    async fn method_not_allowed(
        &self,
        ctx: &Arc<RequestContext>,
        req: &Request,
        endpoint: &Endpoint,
        method: Option<Method>,
        errors: &mut Vec<GatewayError>,
    ) -> Response {
        let allowed = endpoint.allow_header(self.handle_options);
        let allow_value = HeaderValue::from_str(&allowed).ok();

        if method == Some(Method::Options) && self.handle_options {
            let mut response = Response::new(StatusCode::NO_CONTENT);
            if let Some(value) = allow_value {
                response.headers.insert(ALLOW, value);
            }
            return response;
        }

        let mut response = self
            .respond_error(
                endpoint.not_allowed_handler(),
                ctx,
                req,
                GatewayError::MethodNotAllowed { allowed },
                errors,
            )
            .await;
        if let Some(value) = allow_value {
            response.headers.entry(ALLOW).or_insert(value);
        }
        response
    }

    /// Produce the response for `error` with `handler`. A panicking handler
    /// yields a bare 500.
    async fn respond_error(
        &self,
        handler: &Arc<dyn ErrorHandler>,
        ctx: &RequestContext,
        req: &Request,
        error: GatewayError,
        errors: &mut Vec<GatewayError>,
    ) -> Response {
        match safe::invoke(Stage::ErrorHandler, handler.handle_error(ctx, req, &error)).await {
            Ok(response) => response,
            Err(panic) => {
                errors.push(panic.clone());
                Response::new(StatusCode::INTERNAL_SERVER_ERROR).with_error(panic)
            }
        }
    }

    async fn run_hooks(
        &self,
        ctx: &RequestContext,
        req: &Request,
        status: StatusCode,
        elapsed: Duration,
        errors: &mut Vec<GatewayError>,
    ) {
        let hooks_started = Instant::now();

        if let Some(hook) = &self.completion_hook {
            if let Err(panic) =
                safe::invoke(Stage::Hook, hook.on_complete(ctx, req, status, elapsed)).await
            {
                errors.push(panic);
            }
        }

        if !errors.is_empty() {
            if let Some(hook) = &self.error_hook {
                if let Err(panic) = safe::invoke(Stage::Hook, hook.on_errors(ctx, req, &errors[..])).await
                {
                    warn!("Error hook failed: {}", panic);
                }
            }
        }

        self.metrics
            .stage_completed(Stage::Hook, hooks_started.elapsed());
    }
}

/// Run `handlers` in order until one responds or fails.
async fn run_chain(
    handlers: &[Arc<dyn Handler>],
    ctx: &RequestContext,
    req: &Request,
    stage: Stage,
) -> ChainOutcome {
    for handler in handlers {
        match safe::invoke(stage, handler.handle(ctx, req)).await {
            Ok(Ok(Some(response))) => return ChainOutcome::Responded(response),
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => return ChainOutcome::Failed(e),
            Err(panic) => return ChainOutcome::Failed(panic),
        }
    }
    ChainOutcome::Exhausted
}

fn join_failure(stage: Stage, join_error: tokio::task::JoinError) -> GatewayError {
    match join_error.try_into_panic() {
        Ok(payload) => safe::panicked(stage, &*payload),
        Err(join_error) => GatewayError::Internal(format!("{stage} task failed: {join_error}")),
    }
}

/// `endpoint` when it serves `method` and accepts redirected requests.
fn redirect_target(endpoint: Option<&Endpoint>, method: Option<Method>) -> Option<&Endpoint> {
    endpoint.filter(|endpoint| {
        method
            .and_then(|m| endpoint.pipeline(m))
            .is_some_and(|p| p.policy().allow_trailing_slash_redirect)
    })
}

/// 301 keeps the method only for GET and HEAD; everything else gets 308.
fn redirect_status(method: Option<Method>) -> StatusCode {
    match method {
        Some(Method::Get | Method::Head) => StatusCode::MOVED_PERMANENTLY,
        _ => StatusCode::PERMANENT_REDIRECT,
    }
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_status() {
        assert_eq!(redirect_status(Some(Method::Get)), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(redirect_status(Some(Method::Head)), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(redirect_status(Some(Method::Post)), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(redirect_status(None), StatusCode::PERMANENT_REDIRECT);
    }

    #[test]
    fn test_with_query() {
        assert_eq!(with_query("/a/", Some("x=1")), "/a/?x=1");
        assert_eq!(with_query("/a/", Some("")), "/a/");
        assert_eq!(with_query("/a/", None), "/a/");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = Dispatcher::builder();
        builder.add_route("/users/:id", Endpoint::new("users")).unwrap();
        assert!(matches!(
            builder.add_route("/users/:id", Endpoint::new("users")),
            Err(TreeError::DuplicateRoute { .. })
        ));
        assert!(matches!(
            builder.add_route("/users/:name/posts", Endpoint::new("users")),
            Err(TreeError::ConflictingRoute { .. })
        ));
        assert_eq!(builder.build().route_count(), 1);
    }
}
