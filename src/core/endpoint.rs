//! Endpoints: per-method pipelines of a route plus their fallback handlers.
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use crate::{
    core::{defaults::DefaultErrorHandler, query::QuerySchema},
    ports::handler::{ErrorHandler, Handler},
};

/// HTTP methods an endpoint can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Put,
    Post,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Head,
        Method::Get,
        Method::Put,
        Method::Post,
        Method::Patch,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// `None` for extension methods.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        Some(match *method {
            http::Method::HEAD => Method::Head,
            http::Method::GET => Method::Get,
            http::Method::PUT => Method::Put,
            http::Method::POST => Method::Post,
            http::Method::PATCH => Method::Patch,
            http::Method::DELETE => Method::Delete,
            http::Method::CONNECT => Method::Connect,
            http::Method::OPTIONS => Method::Options,
            http::Method::TRACE => Method::Trace,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported HTTP method '{s}'"))
    }
}

/// Per-pipeline behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Run the pipeline even when query parameters failed to parse or
    /// validate.
    pub allow_malformed_query: bool,
    /// Run the pipeline even when parameters match no schema.
    pub allow_unknown_query: bool,
    /// Allow redirects from the trailing-slash variant of the path to this
    /// endpoint.
    pub allow_trailing_slash_redirect: bool,
    /// Hand path parameters to handlers without percent-decoding them.
    pub preserve_escaped_path_params: bool,
    /// Deadline for the whole handler chain.
    pub time_budget: Option<Duration>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_malformed_query: false,
            allow_unknown_query: false,
            allow_trailing_slash_redirect: true,
            preserve_escaped_path_params: false,
            time_budget: None,
        }
    }
}

/// Handler chain bound to one method of one endpoint.
#[derive(Clone, Default)]
pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
    policy: Policy,
    query_schemas: Vec<QuerySchema>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .field("policy", &self.policy)
            .field("query_schemas", &self.query_schemas)
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(self, handler: impl Handler) -> Self {
        self.shared_handler(Arc::new(handler))
    }

    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.policy.time_budget = Some(budget);
        self
    }

    pub fn query_schema(mut self, schema: QuerySchema) -> Self {
        self.query_schemas.push(schema);
        self
    }

    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn query_schemas(&self) -> &[QuerySchema] {
        &self.query_schemas
    }
}

/// A registered route: pipelines by method and the handlers used when the
/// request cannot reach one of them.
#[derive(Clone)]
pub struct Endpoint {
    route: String,
    service_name: String,
    pipelines: [Option<Arc<Pipeline>>; 9],
    bad_query: Arc<dyn ErrorHandler>,
    not_allowed: Arc<dyn ErrorHandler>,
    redirect: Arc<dyn ErrorHandler>,
    internal_error: Arc<dyn ErrorHandler>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("route", &self.route)
            .field("service_name", &self.service_name)
            .field("methods", &self.allowed_methods())
            .finish()
    }
}

impl Endpoint {
    pub fn new(service_name: impl Into<String>) -> Self {
        let fallback: Arc<dyn ErrorHandler> = Arc::new(DefaultErrorHandler);
        Self {
            route: String::new(),
            service_name: service_name.into(),
            pipelines: Default::default(),
            bad_query: Arc::clone(&fallback),
            not_allowed: Arc::clone(&fallback),
            redirect: Arc::clone(&fallback),
            internal_error: fallback,
        }
    }

    /// Serve `method` with `pipeline`, replacing any previous one.
    pub fn with_pipeline(mut self, method: Method, pipeline: Pipeline) -> Self {
        self.pipelines[method.index()] = Some(Arc::new(pipeline));
        self
    }

    pub fn on_bad_query(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.bad_query = handler;
        self
    }

    pub fn on_not_allowed(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.not_allowed = handler;
        self
    }

    pub fn on_redirect(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.redirect = handler;
        self
    }

    pub fn on_internal_error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.internal_error = handler;
        self
    }

    pub(crate) fn set_route(&mut self, route: &str) {
        self.route = route.to_string();
    }

    /// Pattern the endpoint was registered under.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn pipeline(&self, method: Method) -> Option<&Arc<Pipeline>> {
        self.pipelines[method.index()].as_ref()
    }

    pub fn allowed_methods(&self) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|m| self.pipelines[m.index()].is_some())
            .collect()
    }

    /// Value for an `Allow` header. `OPTIONS` is listed when `with_options`
    /// is set even if no pipeline serves it.
    pub fn allow_header(&self, with_options: bool) -> String {
        let mut methods = self.allowed_methods();
        if with_options && !methods.contains(&Method::Options) {
            methods.push(Method::Options);
        }
        methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn bad_query_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.bad_query
    }

    pub fn not_allowed_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.not_allowed
    }

    pub fn redirect_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.redirect
    }

    pub fn internal_error_handler(&self) -> &Arc<dyn ErrorHandler> {
        &self.internal_error
    }
}
