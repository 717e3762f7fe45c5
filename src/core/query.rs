//! Query string parsing and schema validation.
//!
//! Problems are annotated on the offending [`QueryParameter`] instead of
//! aborting, so permissive pipelines can still inspect every parameter.
use std::{fmt, slice, sync::Arc};

use regex::Regex;
use thiserror::Error;

use crate::{
    core::{pool::Recycle, safe},
    ports::handler::{GatewayError, Stage},
};

/// Problem attached to a single query parameter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryParamError {
    #[error("malformed: {0}")]
    Malformed(String),

    #[error("required parameter is missing")]
    Missing,

    #[error("expected at most {max} values, got {got}")]
    TooManyValues { max: usize, got: usize },

    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("validator panicked: {0}")]
    ValidatorPanicked(String),

    #[error("unknown parameter")]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: String,
    pub values: Vec<String>,
    pub error: Option<QueryParamError>,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
            error: None,
        }
    }

    /// First value, if any.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Parameters of one request in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<QueryParameter>);

impl QueryParams {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&QueryParameter> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> slice::Iter<'_, QueryParameter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, param: QueryParameter) {
        self.0.push(param);
    }

    /// Parameters carrying an error annotation.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &QueryParamError)> {
        self.0
            .iter()
            .filter_map(|p| p.error.as_ref().map(|e| (p.name.as_str(), e)))
    }

    /// One-line summary of every annotated problem.
    pub fn describe_errors(&self) -> String {
        self.errors()
            .map(|(name, e)| format!("{name}: {e}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn entry(&mut self, name: String) -> &mut QueryParameter {
        match self.0.iter().position(|p| p.name == name) {
            Some(pos) => &mut self.0[pos],
            None => {
                self.0.push(QueryParameter::new(name, Vec::new()));
                let last = self.0.len() - 1;
                &mut self.0[last]
            }
        }
    }
}

impl Recycle for QueryParams {
    fn recycle(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a QueryParams {
    type Item = &'a QueryParameter;
    type IntoIter = slice::Iter<'a, QueryParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse a raw query string (without the leading `?`).
pub fn parse_query(raw: &str) -> QueryParams {
    let mut params = QueryParams::new();
    parse_query_into(raw, &mut params);
    params
}

/// Parse `raw` into `out`, grouping repeated keys.
///
/// Decoding is strict: `+` means space, `%XX` must be a valid escape and the
/// result valid UTF-8. `;` is not accepted as a separator. A pair that fails
/// any of these keeps its raw text and is annotated
/// [`QueryParamError::Malformed`].
pub fn parse_query_into(raw: &str, out: &mut QueryParams) {
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));

        if pair.contains(';') {
            let name = unescape(raw_key).unwrap_or_else(|_| raw_key.to_string());
            let param = out.entry(name);
            param.values.push(raw_value.to_string());
            param.error = Some(QueryParamError::Malformed(
                "invalid semicolon separator in query".to_string(),
            ));
            continue;
        }

        let (name, key_error) = match unescape(raw_key) {
            Ok(name) => (name, None),
            Err(e) => (raw_key.to_string(), Some(e)),
        };
        let (value, value_error) = match unescape(raw_value) {
            Ok(value) => (value, None),
            Err(e) => (raw_value.to_string(), Some(e)),
        };

        let param = out.entry(name);
        param.values.push(value);
        if let Some(reason) = key_error.or(value_error) {
            param.error = Some(QueryParamError::Malformed(reason));
        }
    }
}

fn unescape(raw: &str) -> Result<String, String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                let end = (i + 3).min(bytes.len());
                return Err(format!(
                    "invalid URL escape {:?}",
                    String::from_utf8_lossy(&bytes[i..end])
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| format!("escape sequence in {raw:?} is not valid UTF-8"))
}

/// Selects which parameter a schema applies to.
#[derive(Debug, Clone)]
pub enum ParamMatcher {
    Name(String),
    Pattern(Regex),
}

impl ParamMatcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            ParamMatcher::Name(expected) => expected == name,
            ParamMatcher::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

impl fmt::Display for ParamMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamMatcher::Name(name) => f.write_str(name),
            ParamMatcher::Pattern(pattern) => write!(f, "/{}/", pattern.as_str()),
        }
    }
}

/// User-supplied check run on a matched parameter.
pub type QueryValidatorFn = Arc<dyn Fn(&QueryParameter) -> Result<(), String> + Send + Sync>;

/// Declaration of an accepted query parameter.
#[derive(Clone)]
pub struct QuerySchema {
    pub matcher: ParamMatcher,
    pub required: bool,
    pub default: Option<String>,
    pub max_values: Option<usize>,
    pub validator: Option<QueryValidatorFn>,
}

impl fmt::Debug for QuerySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySchema")
            .field("matcher", &self.matcher)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("max_values", &self.max_values)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl QuerySchema {
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_matcher(ParamMatcher::Name(name.into()))
    }

    pub fn pattern(pattern: Regex) -> Self {
        Self::with_matcher(ParamMatcher::Pattern(pattern))
    }

    fn with_matcher(matcher: ParamMatcher) -> Self {
        Self {
            matcher,
            required: false,
            default: None,
            max_values: None,
            validator: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn max_values(mut self, max: usize) -> Self {
        self.max_values = Some(max);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&QueryParameter) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Name for a synthesised parameter; patterns use their source text.
    fn synthetic_name(&self) -> String {
        match &self.matcher {
            ParamMatcher::Name(name) => name.clone(),
            ParamMatcher::Pattern(pattern) => pattern.as_str().to_string(),
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryVerdict {
    /// A parameter failed to parse or violated its schema.
    pub malformed: bool,
    /// A parameter matched no schema.
    pub unknown: bool,
    /// A validator panicked; the first such failure.
    pub fault: Option<GatewayError>,
}

/// Check `params` against `schemas`, annotating every problem in place.
///
/// Each schema claims the first not-yet-claimed parameter it matches.
/// Parameters that already carry a parse error are claimed but not validated.
/// Missing parameters get the schema default, or a
/// [`QueryParamError::Missing`] entry when required. Parameters no schema
/// claims are flagged [`QueryParamError::Unknown`].
pub fn validate(params: &mut QueryParams, schemas: &[QuerySchema]) -> QueryVerdict {
    let mut verdict = QueryVerdict::default();
    let mut claimed = vec![false; params.0.len()];
    let mut synthesised = Vec::new();

    for schema in schemas {
        let found = params
            .0
            .iter()
            .enumerate()
            .position(|(i, p)| !claimed[i] && schema.matcher.matches(&p.name));

        let Some(index) = found else {
            if let Some(default) = &schema.default {
                synthesised.push(QueryParameter::new(
                    schema.synthetic_name(),
                    vec![default.clone()],
                ));
            } else if schema.required {
                let mut missing = QueryParameter::new(schema.synthetic_name(), Vec::new());
                missing.error = Some(QueryParamError::Missing);
                synthesised.push(missing);
                verdict.malformed = true;
            }
            continue;
        };

        claimed[index] = true;
        let param = &mut params.0[index];

        if param.error.is_some() {
            verdict.malformed = true;
            continue;
        }

        if let Some(max) = schema.max_values {
            if param.values.len() > max {
                param.error = Some(QueryParamError::TooManyValues {
                    max,
                    got: param.values.len(),
                });
                verdict.malformed = true;
                continue;
            }
        }

        if let Some(validator) = &schema.validator {
            match safe::invoke_sync(Stage::Query, || validator(&*param)) {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    param.error = Some(QueryParamError::Invalid(reason));
                    verdict.malformed = true;
                }
                Err(fault) => {
                    let message = match &fault {
                        GatewayError::Panic { message, .. } => message.clone(),
                        other => other.to_string(),
                    };
                    param.error = Some(QueryParamError::ValidatorPanicked(message));
                    verdict.malformed = true;
                    verdict.fault.get_or_insert(fault);
                }
            }
        }
    }

    for (param, claimed) in params.0.iter_mut().zip(&claimed) {
        if *claimed {
            continue;
        }
        if param.error.is_some() {
            verdict.malformed = true;
        } else {
            param.error = Some(QueryParamError::Unknown);
            verdict.unknown = true;
        }
    }

    params.0.extend(synthesised);
    verdict
}
