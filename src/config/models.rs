//! Configuration data structures for Portico.
//!
//! These types map directly to YAML (also JSON / TOML / INI) configuration
//! files. Durations are humantime strings such as `"250ms"` or `"30s"` and are
//! parsed when the dispatcher is built; the validator reports malformed ones
//! up front.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

fn default_status() -> u16 {
    200
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Registered in order; the first of two conflicting routes wins.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server: ServerSettings::default(),
            dispatcher: DispatcherSettings::default(),
            auth: None,
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            routes: Vec::new(),
        }
    }
}

/// Transport-level settings of the HTTP server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    /// Largest request body buffered before dispatch.
    pub max_body_bytes: usize,
    /// Drain period for in-flight requests on shutdown.
    pub shutdown_timeout: String,
    /// Add `X-Content-Type-Options`, `X-Frame-Options` and `Referrer-Policy`.
    pub security_headers: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024,
            shutdown_timeout: "30s".to_string(),
            security_headers: true,
        }
    }
}

/// Gateway-wide dispatch settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Bound on the gateway-level handler chain.
    pub handlers_timeout: Option<String>,
    /// Redirect unmatched paths to their cleaned, case-corrected form.
    pub redirect_fixed_path: bool,
    /// Answer `OPTIONS` on endpoints that do not serve it.
    pub handle_options: bool,
    /// Idle parameter buffers kept per pool.
    pub pool_size: usize,
    /// Take the request id from this header when present.
    pub request_id_header: Option<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            handlers_timeout: None,
            redirect_fixed_path: false,
            handle_options: true,
            pool_size: 1024,
            request_id_header: Some("x-request-id".to_string()),
        }
    }
}

/// Static bearer-token authorization applied before routing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub tokens: Vec<String>,
    /// Paths served without a token (exact match).
    #[serde(default)]
    pub public_paths: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"portico=debug,tower_http=info"`.
    pub level: String,
    pub format: LogFormat,
    /// Include span context in JSON output.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_spans: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// OTLP/gRPC collector, e.g. `http://localhost:4317`. Without it
    /// instruments are recorded but not exported.
    pub otlp_endpoint: Option<String>,
    pub export_interval: String,
    pub service_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            export_interval: "60s".to_string(),
            service_name: "portico".to_string(),
        }
    }
}

/// One registered route.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    /// Route pattern with `:name` parameters and a trailing `*name` catch-all.
    pub path: String,
    /// Service label for logs and metrics; defaults to the path.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    pub action: RouteAction,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub query: Vec<QuerySchemaConfig>,
}

impl RouteConfig {
    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or(&self.path)
    }
}

/// What a route does once its pipeline runs.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Fixed response.
    Respond {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Wait this long before answering; gives up when the request is
        /// cancelled.
        #[serde(default)]
        delay: Option<String>,
    },
    /// JSON document describing the matched route, path parameters and
    /// query parameters.
    Echo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow_malformed_query: bool,
    pub allow_unknown_query: bool,
    #[serde(default = "default_true")]
    pub allow_trailing_slash_redirect: bool,
    pub preserve_escaped_path_params: bool,
    pub time_budget: Option<String>,
}

impl Default for PolicyConfig {
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

/// Declared query parameter. Exactly one of `name` and `pattern` is set.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct QuerySchemaConfig {
    pub name: Option<String>,
    /// Regex matched against parameter names.
    pub pattern: Option<String>,
    pub required: bool,
    pub default: Option<String>,
    pub max_values: Option<usize>,
    /// Every value must be one of these.
    pub one_of: Vec<String>,
    /// Every value must match this regex (anchored).
    pub value_pattern: Option<String>,
}
