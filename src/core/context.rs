//! Request-scoped state handed to handlers.
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{
    params::Params,
    pool::Pooled,
    query::{QueryParameter, QueryParams},
};

static NO_PARAMS: Params = Params::new();
static NO_QUERY: QueryParams = QueryParams::new();

/// Per-request context.
///
/// Handlers that may run for long should watch [`RequestContext::cancelled`]:
/// the token fires when the time budget expires, when the client disconnects
/// and once the dispatcher is done with the request. Work that ignores it may
/// keep running after the response was sent.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    started: Instant,
    route: Option<String>,
    service: Option<String>,
    path_params: Option<Pooled<Params>>,
    query: Option<Pooled<QueryParams>>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            started: Instant::now(),
            route: None,
            service: None,
            path_params: None,
            query: None,
            deadline: None,
            cancel,
        }
    }

    /// Context for running an endpoint pipeline. Cancelling the parent also
    /// cancels the returned context.
    pub fn for_endpoint(
        &self,
        route: &str,
        service: &str,
        path_params: Pooled<Params>,
        query: Pooled<QueryParams>,
        time_budget: Option<Duration>,
    ) -> Self {
        Self {
            request_id: self.request_id.clone(),
            started: self.started,
            route: Some(route.to_string()),
            service: Some(service.to_string()),
            path_params: Some(path_params),
            query: Some(query),
            deadline: time_budget.map(|budget| Instant::now() + budget),
            cancel: self.cancel.child_token(),
        }
    }

    pub(crate) fn set_request_id(&mut self, request_id: String) {
        self.request_id = request_id;
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Registered pattern of the matched route.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn params(&self) -> &Params {
        self.path_params.as_deref().unwrap_or(&NO_PARAMS)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params().get(key)
    }

    pub fn query(&self) -> &QueryParams {
        self.query.as_deref().unwrap_or(&NO_QUERY)
    }

    pub fn query_param(&self, name: &str) -> Option<&QueryParameter> {
        self.query().get(name)
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without a budget.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is abandoned.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
