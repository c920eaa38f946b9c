use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::dispatch::{Outcome, RequestContext};
use crate::error::{ApiError, ErrorKind};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("action version must be a positive integer, got {0}")]
    InvalidVersion(u32),
}

/// HTTP verbs the transport layer can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }

    pub(crate) fn method_filter(&self) -> axum::routing::MethodFilter {
        use axum::routing::MethodFilter;
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Patch => MethodFilter::PATCH,
            Verb::Delete => MethodFilter::DELETE,
        }
    }
}

/// Declared parameter types, checked against the JSON request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Email,
    Number,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Email => "email",
            ParamKind::Number => "number",
        }
    }
}

pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("custom", &self.validator.is_some())
            .finish()
    }
}

pub type Handler = Arc<dyn Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync>;

/// A single (verb, version) handler with its auth and parameter contract.
/// Immutable once the registry is turned into a router; description and
/// params are settable up to that point.
pub struct Action {
    pub(crate) verb: Verb,
    pub(crate) version: u32,
    pub(crate) auth: bool,
    pub(crate) description: Option<String>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) handler: Handler,
}

impl Action {
    pub fn auth(&mut self, flag: bool) -> &mut Self {
        self.auth = flag;
        self
    }

    pub fn describe(&mut self, text: impl Into<String>) -> &mut Self {
        self.description = Some(text.into());
        self
    }

    pub fn param(
        &mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
        required: bool,
    ) -> &mut Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required,
            validator: None,
        });
        self
    }

    pub fn param_with(
        &mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
        required: bool,
        validator: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required,
            validator: Some(Arc::new(validator)),
        });
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn requires_auth(&self) -> bool {
        self.auth
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("verb", &self.verb)
            .field("version", &self.version)
            .field("auth", &self.auth)
            .field("params", &self.params)
            .finish()
    }
}

/// A named resource path owning one action per (verb, version).
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) name: String,
    auth_default: bool,
    pub(crate) actions: BTreeMap<Verb, BTreeMap<u32, Action>>,
}

impl Endpoint {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), auth_default: false, actions: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Require authentication for actions registered from here on.
    pub fn auth(&mut self, flag: bool) -> &mut Self {
        self.auth_default = flag;
        self
    }

    pub fn has(&self, verb: Verb, version: u32) -> bool {
        self.actions.get(&verb).map(|v| v.contains_key(&version)).unwrap_or(false)
    }

    pub fn get(&mut self, handler: impl Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync + 'static) -> &mut Action {
        self.register(Verb::Get, 1, Arc::new(handler))
    }

    pub fn post(&mut self, handler: impl Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync + 'static) -> &mut Action {
        self.register(Verb::Post, 1, Arc::new(handler))
    }

    pub fn put(&mut self, handler: impl Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync + 'static) -> &mut Action {
        self.register(Verb::Put, 1, Arc::new(handler))
    }

    pub fn delete(&mut self, handler: impl Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync + 'static) -> &mut Action {
        self.register(Verb::Delete, 1, Arc::new(handler))
    }

    /// Register a handler for an explicit verb and version. Re-registering
    /// the same pair replaces the prior action.
    pub fn method(
        &mut self,
        verb: Verb,
        version: u32,
        handler: impl Fn(Arc<RequestContext>) -> Result<Outcome, anyhow::Error> + Send + Sync + 'static,
    ) -> Result<&mut Action, ConfigError> {
        if version == 0 {
            return Err(ConfigError::InvalidVersion(version));
        }
        Ok(self.register(verb, version, Arc::new(handler)))
    }

    /// Remove a registered action. Returns whether one existed.
    pub fn unset(&mut self, verb: Verb, version: u32) -> bool {
        self.actions.get_mut(&verb).map(|v| v.remove(&version).is_some()).unwrap_or(false)
    }

    fn register(&mut self, verb: Verb, version: u32, handler: Handler) -> &mut Action {
        let action = Action {
            verb,
            version,
            auth: self.auth_default,
            description: None,
            params: vec![],
            handler,
        };
        self.actions.entry(verb).or_default().insert(version, action);
        self.actions
            .get_mut(&verb)
            .and_then(|v| v.get_mut(&version))
            .expect("action just inserted")
    }
}

// WHATWG HTML5 email pattern, close enough to RFC 5322 for API input
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

/// Validate declared parameters against the request body: presence, then
/// the built-in type check, then any custom validator.
pub(crate) fn validate_params(params: &[ParamSpec], body: &Value) -> Result<(), ApiError> {
    for spec in params {
        let value = match body.get(&spec.name) {
            Some(v) if !v.is_null() => v,
            _ => {
                if spec.required {
                    return Err(ApiError::bad_argument(
                        format!("Missing parameter '{}'", spec.name),
                        ErrorKind::BadArgument.default_code(),
                    ));
                }
                continue;
            }
        };

        let type_ok = match spec.kind {
            ParamKind::String => value.is_string(),
            ParamKind::Email => value.as_str().map(|s| EMAIL_RE.is_match(s)).unwrap_or(false),
            ParamKind::Number => {
                value.is_number()
                    || value.as_str().map(|s| s.parse::<f64>().is_ok()).unwrap_or(false)
            }
        };
        if !type_ok {
            return Err(ApiError::bad_argument(
                format!("Bad value for parameter '{}'", spec.name),
                ErrorKind::BadArgument.default_code(),
            ));
        }

        if let Some(validator) = &spec.validator {
            if !validator(value) {
                return Err(ApiError::bad_argument(
                    format!("Bad value for parameter '{}'", spec.name),
                    ErrorKind::BadArgument.default_code(),
                ));
            }
        }
    }
    Ok(())
}
