use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request};
use axum::http::{header, Extensions, HeaderMap};
use axum::response::Response;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::auth::{AuthSession, ClientInfo};
use crate::config;
use crate::endpoint::{validate_params, Action};
use crate::error::{codes, ApiError, ErrorKind};
use crate::filter::FieldSpec;
use crate::registry::AppState;
use crate::response::{render_error, render_success, Format};

/// What a handler produced: an immediate value, a pending asynchronous
/// result, or nothing (it will finalize through the response slot, or the
/// watchdog will).
pub enum Outcome {
    Value(Value),
    Pending(BoxFuture<'static, Result<Value, anyhow::Error>>),
    Empty,
}

impl Outcome {
    pub fn value(value: Value) -> Self {
        Outcome::Value(value)
    }

    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
    {
        Outcome::Pending(Box::pin(fut))
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
            Outcome::Empty => f.write_str("Empty"),
        }
    }
}

/// Single-use completion slot for one request. The first finalization wins;
/// every later attempt (the watchdog included) is ignored, so the transport
/// stream is never written twice.
pub struct ResponseSlot {
    tx: Mutex<Option<oneshot::Sender<Result<Value, ApiError>>>>,
}

impl ResponseSlot {
    pub(crate) fn channel() -> (Arc<Self>, oneshot::Receiver<Result<Value, ApiError>>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { tx: Mutex::new(Some(tx)) }), rx)
    }

    /// Complete the request. Returns false when the request was already
    /// finalized and this attempt was dropped.
    pub fn finalize(&self, result: Result<Value, ApiError>) -> bool {
        let sender = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!("response already emitted, late finalization dropped");
                }
                true
            }
            None => {
                tracing::debug!("duplicate response finalization ignored");
                false
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl std::fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSlot").field("finalized", &self.is_finalized()).finish()
    }
}

/// Per-request state handed to handlers.
pub struct RequestContext {
    pub path_params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Value,
    pub ip: String,
    pub user_agent: String,
    pub host: String,
    pub format: Format,
    pub(crate) session: Option<AuthSession>,
    pub slot: Arc<ResponseSlot>,
}

impl RequestContext {
    /// The validated session, present when the action required auth.
    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn client_info(&self) -> ClientInfo<'_> {
        ClientInfo { ip: &self.ip, user_agent: &self.user_agent, host: &self.host }
    }

    /// Finalize the response out-of-band with a success value.
    pub fn respond(&self, value: Value) -> bool {
        self.slot.finalize(Ok(value))
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("path_params", &self.path_params)
            .field("ip", &self.ip)
            .field("host", &self.host)
            .field("format", &self.format)
            .field("authenticated", &self.session.is_some())
            .finish()
    }
}

/// Run one request through the pipeline: auth, parameter validation,
/// handler, then exactly one serialized response.
pub(crate) async fn dispatch_request(
    state: Arc<AppState>,
    action: Arc<Action>,
    mut path_params: HashMap<String, String>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let format = Format::from_path(parts.uri.path());

    // `/v1/actors/42.xml` captures the id as `42.xml`
    for value in path_params.values_mut() {
        let stripped = Format::strip_suffix(value);
        if stripped.len() != value.len() {
            *value = stripped.to_string();
        }
    }

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let authorization = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip = client_ip(&parts.headers, &parts.extensions);
    let query = parts.uri.query().map(decode_query).unwrap_or_default();

    let fields = match query.iter().find(|(k, _)| k == "fields") {
        Some((_, csv)) => match FieldSpec::parse(csv, None) {
            Ok(spec) => Some(spec),
            Err(err) => return render_error(&err, format),
        },
        None => None,
    };

    let max_body = config::config().dispatch.max_body_bytes;
    let body = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) if bytes.is_empty() => Value::Null,
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                let err = ApiError::bad_format("Invalid JSON body", ErrorKind::BadFormat.default_code())
                    .with_cause(e);
                return render_error(&err, format);
            }
        },
        Err(e) => {
            let err = ApiError::bad_format("Unreadable request body", ErrorKind::BadFormat.default_code())
                .with_cause(e);
            return render_error(&err, format);
        }
    };

    let (slot, rx) = ResponseSlot::channel();
    let mut ctx = RequestContext {
        path_params,
        query,
        body,
        ip,
        user_agent,
        host,
        format,
        session: None,
        slot: slot.clone(),
    };

    // auth strictly precedes parameter validation, which precedes the handler
    if action.auth {
        match state.auth.authenticate(authorization.as_deref(), &ctx.client_info()).await {
            Ok(session) => ctx.session = Some(session),
            Err(err) => return render_error(&err, format),
        }
    }

    if let Err(err) = validate_params(&action.params, &ctx.body) {
        return render_error(&err, format);
    }

    let ctx = Arc::new(ctx);
    let mut armed_watchdog = false;
    match (action.handler)(ctx.clone()) {
        Ok(Outcome::Value(value)) => {
            slot.finalize(Ok(value));
        }
        Ok(Outcome::Pending(fut)) => match fut.await {
            Ok(value) => {
                slot.finalize(Ok(value));
            }
            Err(err) => {
                slot.finalize(Err(coerce(err)));
            }
        },
        Ok(Outcome::Empty) => {
            armed_watchdog = true;
        }
        Err(err) => {
            slot.finalize(Err(coerce(err)));
        }
    }

    let result = if armed_watchdog {
        let window = Duration::from_millis(config::config().dispatch.response_timeout_ms);
        match tokio::time::timeout(window, rx).await {
            Ok(received) => received.unwrap_or(Ok(Value::Null)),
            Err(_) => {
                tracing::warn!(path = %parts.uri.path(), "response watchdog fired, emitting null response");
                Ok(Value::Null)
            }
        }
    } else {
        rx.await.unwrap_or(Ok(Value::Null))
    };

    match result {
        Ok(value) => render_success(&value, format, fields.as_ref()),
        Err(err) => render_error(&err, format),
    }
}

/// Typed errors propagate as raised; anything else is coerced to an
/// internal error and logged, never dropped.
fn coerce(err: anyhow::Error) -> ApiError {
    match err.downcast::<ApiError>() {
        Ok(api) => api,
        Err(other) => {
            tracing::warn!(error = %format!("{:#}", other), "handler failed with untyped error");
            ApiError::internal("Unexpected server error", codes::HANDLER_UNCAUGHT).with_cause(other)
        }
    }
}

fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real.is_empty() {
            return real.to_string();
        }
    }
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "0.0.0.0".to_string()
}

fn decode_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_accepts_only_the_first_finalization() {
        let (slot, mut rx) = ResponseSlot::channel();
        assert!(!slot.is_finalized());
        assert!(slot.finalize(Ok(json!(1))));
        assert!(slot.is_finalized());
        assert!(!slot.finalize(Ok(json!(2))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn query_decoding_preserves_repeats_and_escapes() {
        let pairs = decode_query("limit=5&%24age=gt%3A6&order=last_name%3Adesc");
        assert_eq!(pairs[0], ("limit".to_string(), "5".to_string()));
        assert_eq!(pairs[1], ("$age".to_string(), "gt:6".to_string()));
        assert_eq!(pairs[2], ("order".to_string(), "last_name:desc".to_string()));
    }

    #[test]
    fn client_ip_prefers_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, &Extensions::new()), "1.2.3.4");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "5.6.7.8".parse().unwrap());
        assert_eq!(client_ip(&headers, &Extensions::new()), "5.6.7.8");

        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), "0.0.0.0");
    }

    #[test]
    fn coerce_preserves_typed_errors_and_wraps_the_rest() {
        let typed: anyhow::Error = ApiError::not_found("missing").into();
        let coerced = coerce(typed);
        assert_eq!(coerced.code(), 1404);

        let untyped = anyhow::anyhow!("kaboom");
        let coerced = coerce(untyped);
        assert_eq!(coerced.code(), 4500);
        assert_eq!(coerced.status_code().as_u16(), 500);
        assert!(coerced.cause().is_some());
    }
}
