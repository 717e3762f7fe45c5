use std::{net::SocketAddr, str::FromStr};

use http::{HeaderName, HeaderValue, StatusCode};
use regex::Regex;

use crate::{
    config::models::{GatewayConfig, PolicyConfig, QuerySchemaConfig, RouteAction, RouteConfig},
    core::{endpoint::Method, tree::Tree},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid duration '{value}' for {field}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator. Collects every problem instead of
/// stopping at the first.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let errors = Self::collect_errors(config);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(&errors),
            })
        }
    }

    /// Every problem found in `config`, in file order.
    pub fn collect_errors(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = parse_duration_field("server.shutdown_timeout", &config.server.shutdown_timeout)
        {
            errors.push(e);
        }
        if config.server.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "server.max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(timeout) = &config.dispatcher.handlers_timeout {
            if let Err(e) = parse_duration_field("dispatcher.handlers_timeout", timeout) {
                errors.push(e);
            }
        }
        if let Some(header) = &config.dispatcher.request_id_header {
            if HeaderName::from_str(header).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: "dispatcher.request_id_header".to_string(),
                    message: format!("'{header}' is not a valid header name"),
                });
            }
        }

        if let Some(auth) = &config.auth {
            if auth.tokens.iter().all(|t| t.trim().is_empty()) {
                errors.push(ValidationError::MissingField {
                    field: "auth.tokens".to_string(),
                });
            }
        }

        if config.metrics.enabled {
            if let Err(e) =
                parse_duration_field("metrics.export_interval", &config.metrics.export_interval)
            {
                errors.push(e);
            }
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        }

        for route in &config.routes {
            errors.extend(Self::validate_single_route(route));
        }

        errors.extend(Self::check_route_conflicts(&config.routes));
        errors
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single route configuration
    fn validate_single_route(route: &RouteConfig) -> Vec<ValidationError> {
        let path = &route.path;
        let mut errors = Vec::new();

        if route.methods.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("route '{path}' methods"),
            });
        }
        for method in &route.methods {
            if let Err(message) = Method::from_str(method) {
                errors.push(ValidationError::InvalidField {
                    field: format!("route '{path}' methods"),
                    message,
                });
            }
        }

        if let RouteAction::Respond {
            status,
            headers,
            delay,
            ..
        } = &route.action
        {
            if StatusCode::from_u16(*status).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("route '{path}' action.status"),
                    message: format!("{status} is not a valid HTTP status code"),
                });
            }
            for (name, value) in headers {
                if HeaderName::from_str(name).is_err() || HeaderValue::from_str(value).is_err() {
                    errors.push(ValidationError::InvalidField {
                        field: format!("route '{path}' action.headers"),
                        message: format!("Invalid header '{name}: {value}'"),
                    });
                }
            }
            if let Some(delay) = delay {
                if let Err(e) = parse_duration_field(&format!("route '{path}' action.delay"), delay)
                {
                    errors.push(e);
                }
            }
        }

        errors.extend(Self::validate_policy(path, &route.policy));
        for (i, schema) in route.query.iter().enumerate() {
            errors.extend(Self::validate_query_schema(path, i, schema));
        }

        errors
    }

    fn validate_policy(path: &str, policy: &PolicyConfig) -> Option<ValidationError> {
        let budget = policy.time_budget.as_ref()?;
        match parse_duration_field(&format!("route '{path}' policy.time_budget"), budget) {
            Ok(d) if d.is_zero() => Some(ValidationError::InvalidField {
                field: format!("route '{path}' policy.time_budget"),
                message: "Time budget must be greater than 0".to_string(),
            }),
            Ok(_) => None,
            Err(e) => Some(e),
        }
    }

    fn validate_query_schema(
        path: &str,
        index: usize,
        schema: &QuerySchemaConfig,
    ) -> Vec<ValidationError> {
        let field = format!("route '{path}' query[{index}]");
        let mut errors = Vec::new();

        match (&schema.name, &schema.pattern) {
            (Some(_), Some(_)) => errors.push(ValidationError::InvalidField {
                field: field.clone(),
                message: "Set either 'name' or 'pattern', not both".to_string(),
            }),
            (None, None) => errors.push(ValidationError::MissingField {
                field: format!("{field}.name"),
            }),
            (None, Some(pattern)) => {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{field}.pattern"),
                        message: format!("Invalid regex: {e}"),
                    });
                }
            }
            (Some(_), None) => {}
        }

        if let Some(pattern) = &schema.value_pattern {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.value_pattern"),
                    message: format!("Invalid regex: {e}"),
                });
            }
        }

        if schema.max_values == Some(0) {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.max_values"),
                message: "Must be greater than 0".to_string(),
            });
        }

        if schema.required && schema.default.is_some() {
            errors.push(ValidationError::InvalidField {
                field: field.clone(),
                message: "A required parameter cannot have a default".to_string(),
            });
        }

        errors
    }

    /// Register every route in a scratch tree; whatever the real registration
    /// would reject is reported here.
    fn check_route_conflicts(routes: &[RouteConfig]) -> Vec<ValidationError> {
        let mut tree = Tree::new();
        routes
            .iter()
            .filter_map(|route| {
                tree.add_route(&route.path, ()).err().map(|e| {
                    ValidationError::RouteConflict {
                        message: format!("Route '{}' conflicts with an earlier route: {e}", route.path),
                    }
                })
            })
            .collect()
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: &[ValidationError]) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

fn parse_duration_field(field: &str, value: &str) -> ValidationResult<std::time::Duration> {
    humantime::parse_duration(value).map_err(|e| ValidationError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            service: None,
            methods: vec!["GET".to_string()],
            action: RouteAction::Echo,
            policy: PolicyConfig::default(),
            query: Vec::new(),
        }
    }

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig {
            routes: vec![route("/users/:id"), route("/users/:id/posts"), route("/static/*file")],
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(GatewayConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_missing_routes() {
        let config = GatewayConfig::default();
        let errors = GatewayConfigValidator::collect_errors(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::MissingField { field }] if field == "routes"
        ));
    }

    #[test]
    fn validate_reports_route_conflicts_from_the_tree() {
        let mut config = minimal_valid_config();
        config.routes.push(route("/users/:name"));
        config.routes.push(route("/static/*other"));
        config.routes.push(route("no-slash"));

        let conflicts: Vec<_> = GatewayConfigValidator::collect_errors(&config)
            .into_iter()
            .filter(|e| matches!(e, ValidationError::RouteConflict { .. }))
            .collect();
        assert_eq!(conflicts.len(), 3);
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut config = minimal_valid_config();
        config.listen_addr = "localhost".to_string();
        config.dispatcher.handlers_timeout = Some("soon".to_string());
        config.routes[0].methods.push("FETCH".to_string());
        config.routes[0].policy.time_budget = Some("0s".to_string());
        config.routes[1].query.push(QuerySchemaConfig {
            pattern: Some("(".to_string()),
            ..QuerySchemaConfig::default()
        });
        config.routes[2].action = RouteAction::Respond {
            status: 1000,
            body: None,
            headers: Default::default(),
            delay: None,
        };

        let errors = GatewayConfigValidator::collect_errors(&config);
        assert_eq!(errors.len(), 6, "{errors:#?}");

        let message = GatewayConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("Found 6 validation errors"));
    }

    #[test]
    fn validate_rejects_ambiguous_query_schema() {
        let mut config = minimal_valid_config();
        config.routes[0].query.push(QuerySchemaConfig {
            name: Some("page".to_string()),
            pattern: Some("^p".to_string()),
            required: true,
            default: Some("1".to_string()),
            ..QuerySchemaConfig::default()
        });
        config.routes[0].query.push(QuerySchemaConfig::default());

        let errors = GatewayConfigValidator::collect_errors(&config);
        assert_eq!(errors.len(), 3, "{errors:#?}");
    }
}
