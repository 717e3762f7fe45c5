//! Builds a [`Dispatcher`] from the gateway configuration.
use std::{collections::BTreeMap, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use regex::Regex;
use serde::Serialize;

use crate::{
    adapters::{
        auth::{AuthorizationHandler, StaticTokenAuthorizer},
        hooks::TracingHooks,
        request_id::HeaderRequestId,
    },
    config::models::{GatewayConfig, PolicyConfig, QuerySchemaConfig, RouteAction, RouteConfig},
    core::{
        context::RequestContext,
        dispatcher::{Dispatcher, DispatcherBuilder},
        endpoint::{Endpoint, Method, Pipeline, Policy},
        query::QuerySchema,
        response::Response,
    },
    ports::{
        handler::{GatewayError, Handler, HandlerResult, Request},
        hooks::MetricsSink,
    },
};

/// Dispatcher for every route in `config`, reporting to `metrics`.
pub fn build_dispatcher(config: &GatewayConfig, metrics: Arc<dyn MetricsSink>) -> Result<Dispatcher> {
    let settings = &config.dispatcher;
    let hooks = Arc::new(TracingHooks);

    let mut builder = DispatcherBuilder::new()
        .redirect_fixed_path(settings.redirect_fixed_path)
        .handle_options(settings.handle_options)
        .pool_size(settings.pool_size)
        .metrics(metrics)
        .error_hook(hooks.clone())
        .completion_hook(hooks);

    if let Some(timeout) = &settings.handlers_timeout {
        builder = builder.handlers_timeout(parse_duration("dispatcher.handlers_timeout", timeout)?);
    }

    if let Some(header) = &settings.request_id_header {
        let header = HeaderName::from_str(header)
            .wrap_err_with(|| format!("Invalid request id header '{header}'"))?;
        builder = builder.request_id(Arc::new(HeaderRequestId::new(header)));
    }

    if let Some(auth) = &config.auth {
        let authorizer = StaticTokenAuthorizer::new(auth.tokens.iter().cloned());
        builder = builder.gateway_handler(
            AuthorizationHandler::new(Arc::new(authorizer))
                .public_paths(auth.public_paths.iter().cloned()),
        );
    }

    for route in &config.routes {
        let endpoint = build_endpoint(route)
            .wrap_err_with(|| format!("Invalid route '{}'", route.path))?;
        builder
            .add_route(&route.path, endpoint)
            .wrap_err_with(|| format!("Failed to register route '{}'", route.path))?;
        tracing::info!("Configured route: {} {:?} -> {}", route.path, route.methods, route.service_name());
    }

    Ok(builder.build())
}

fn build_endpoint(route: &RouteConfig) -> Result<Endpoint> {
    let handler = build_action(&route.action)?;
    let policy = build_policy(&route.policy)?;
    let schemas = route
        .query
        .iter()
        .map(build_query_schema)
        .collect::<Result<Vec<_>>>()?;

    let mut endpoint = Endpoint::new(route.service_name());
    for method in &route.methods {
        let method = Method::from_str(method).map_err(|e| eyre!(e))?;
        let pipeline = schemas.iter().cloned().fold(
            Pipeline::new()
                .shared_handler(Arc::clone(&handler))
                .with_policy(policy.clone()),
            Pipeline::query_schema,
        );
        endpoint = endpoint.with_pipeline(method, pipeline);
    }
    Ok(endpoint)
}

fn build_policy(config: &PolicyConfig) -> Result<Policy> {
    Ok(Policy {
        allow_malformed_query: config.allow_malformed_query,
        allow_unknown_query: config.allow_unknown_query,
        allow_trailing_slash_redirect: config.allow_trailing_slash_redirect,
        preserve_escaped_path_params: config.preserve_escaped_path_params,
        time_budget: config
            .time_budget
            .as_deref()
            .map(|budget| parse_duration("policy.time_budget", budget))
            .transpose()?,
    })
}

fn build_query_schema(config: &QuerySchemaConfig) -> Result<QuerySchema> {
    let mut schema = match (&config.name, &config.pattern) {
        (Some(name), None) => QuerySchema::named(name.clone()),
        (None, Some(pattern)) => QuerySchema::pattern(
            Regex::new(pattern).wrap_err_with(|| format!("Invalid query pattern '{pattern}'"))?,
        ),
        _ => return Err(eyre!("Query schema needs exactly one of 'name' and 'pattern'")),
    };

    if config.required {
        schema = schema.required();
    }
    if let Some(default) = &config.default {
        schema = schema.with_default(default.clone());
    }
    if let Some(max) = config.max_values {
        schema = schema.max_values(max);
    }

    let one_of = config.one_of.clone();
    let value_pattern = config
        .value_pattern
        .as_deref()
        .map(|p| Regex::new(&format!("^(?:{p})$")))
        .transpose()
        .wrap_err("Invalid query value_pattern")?;

    if !one_of.is_empty() || value_pattern.is_some() {
        schema = schema.validator(move |param| {
            for value in &param.values {
                if !one_of.is_empty() && !one_of.contains(value) {
                    return Err(format!("'{value}' is not one of {one_of:?}"));
                }
                if let Some(pattern) = &value_pattern {
                    if !pattern.is_match(value) {
                        return Err(format!("'{value}' does not match {}", pattern.as_str()));
                    }
                }
            }
            Ok(())
        });
    }

    Ok(schema)
}

fn build_action(action: &RouteAction) -> Result<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match action {
        RouteAction::Respond {
            status,
            body,
            headers,
            delay,
        } => {
            let status = StatusCode::from_u16(*status)
                .wrap_err_with(|| format!("Invalid status code {status}"))?;
            let mut header_map = HeaderMap::new();
            for (name, value) in headers {
                header_map.append(
                    HeaderName::from_str(name)
                        .wrap_err_with(|| format!("Invalid header name '{name}'"))?,
                    HeaderValue::from_str(value)
                        .wrap_err_with(|| format!("Invalid value for header '{name}'"))?,
                );
            }
            let delay = delay
                .as_deref()
                .map(|d| parse_duration("action.delay", d))
                .transpose()?;
            Arc::new(RespondHandler {
                status,
                headers: header_map,
                body: body.clone().unwrap_or_default(),
                delay,
            })
        }
        RouteAction::Echo => Arc::new(EchoHandler),
    };
    Ok(handler)
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).wrap_err_with(|| format!("Invalid duration '{value}' for {field}"))
}

/// Fixed response, optionally after a delay.
#[derive(Debug, Clone)]
pub struct RespondHandler {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Handler for RespondHandler {
    async fn handle(&self, ctx: &RequestContext, _req: &Request) -> HandlerResult {
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancelled() => {
                    return Err(GatewayError::Handler("request cancelled during delay".to_string()));
                }
            }
        }

        let mut response = Response::new(self.status).with_body(self.body.clone());
        response.headers = self.headers.clone();
        Ok(Some(response))
    }
}

#[derive(Debug, Serialize)]
struct EchoBody<'a> {
    request_id: &'a str,
    route: Option<&'a str>,
    service: Option<&'a str>,
    method: &'a str,
    path: &'a str,
    params: BTreeMap<&'a str, &'a str>,
    query: BTreeMap<&'a str, &'a [String]>,
    query_errors: BTreeMap<&'a str, String>,
}

/// Describes the matched route and its parameters as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, ctx: &RequestContext, req: &Request) -> HandlerResult {
        let body = EchoBody {
            request_id: ctx.request_id(),
            route: ctx.route(),
            service: ctx.service(),
            method: req.method().as_str(),
            path: req.uri().path(),
            params: ctx
                .params()
                .iter()
                .map(|p| (p.key.as_str(), p.value.as_str()))
                .collect(),
            query: ctx
                .query()
                .iter()
                .map(|q| (q.name.as_str(), q.values.as_slice()))
                .collect(),
            query_errors: ctx
                .query()
                .errors()
                .map(|(name, e)| (name, e.to_string()))
                .collect(),
        };
        Ok(Some(Response::json(StatusCode::OK, &body)))
    }
}
