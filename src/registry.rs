use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::on;
use axum::Router;
use serde_json::{json, Map, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenManager;
use crate::dispatch::dispatch_request;
use crate::endpoint::Endpoint;
use crate::error::{codes, ApiError};

/// Shared collaborators the dispatcher needs per request.
pub struct AppState {
    pub auth: TokenManager,
}

impl AppState {
    pub fn new(auth: TokenManager) -> Self {
        Self { auth }
    }
}

/// The endpoint registry. Mutable while routes are being declared; turning
/// it into a router consumes it, which is the read-only phase transition --
/// nothing can be registered once the server is serving.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: BTreeMap<String, Endpoint>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent lookup-or-create by normalized resource path.
    pub fn endpoint(&mut self, name: &str) -> &mut Endpoint {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.endpoints
            .entry(name.to_string())
            .or_insert_with(|| Endpoint::new(name))
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.endpoints.contains_key(name)
    }

    /// Help metadata for every registered action.
    pub fn describe(&self) -> Value {
        let mut endpoints = Map::new();
        for (name, endpoint) in &self.endpoints {
            let mut actions = Map::new();
            for versions in endpoint.actions.values() {
                for (version, action) in versions {
                    let mut params = Map::new();
                    for p in &action.params {
                        params.insert(
                            p.name.clone(),
                            json!({
                                "type": p.kind.as_str(),
                                "description": p.description,
                                "required": p.required,
                            }),
                        );
                    }
                    actions.insert(
                        format!("{} /v{}/{}", action.verb().as_str(), version, name),
                        json!({
                            "description": action.description,
                            "protected": action.auth,
                            "params": params,
                        }),
                    );
                }
            }
            endpoints.insert(name.clone(), Value::Object(actions));
        }
        json!({ "endpoints": endpoints })
    }

    /// Bind every action to the transport. Each action gets its bare
    /// versioned path plus `.json`/`.xml` twins; the catch-all handlers are
    /// installed last so they act as fallbacks only.
    pub fn into_router(self, state: AppState) -> Router {
        let state = Arc::new(state);
        let mut router = Router::new();

        for (name, endpoint) in self.endpoints {
            for versions in endpoint.actions.into_values() {
                for (version, action) in versions {
                    let action = Arc::new(action);
                    let filter = action.verb().method_filter();
                    let path = format!("/v{}/{}", version, name);

                    let mut paths = vec![path.clone()];
                    // a `:param` tail already matches suffixed values; the
                    // dispatcher strips the discriminator from the capture
                    let static_tail = !name.rsplit('/').next().unwrap_or("").starts_with(':');
                    if static_tail {
                        paths.push(format!("{}.json", path));
                        paths.push(format!("{}.xml", path));
                    }

                    for p in paths {
                        let state = state.clone();
                        let action = action.clone();
                        let handler = move |Path(params): Path<HashMap<String, String>>,
                                            req: Request| {
                            let state = state.clone();
                            let action = action.clone();
                            async move { dispatch_request(state, action, params, req).await }
                        };
                        router = router.route(&p, on(filter, handler));
                    }
                }
            }
        }

        router = router.fallback(route_not_found);
        router
            .layer(CatchPanicLayer::custom(transport_failure))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}

async fn route_not_found() -> Response {
    ApiError::bad_format("No matching route", codes::ROUTE_NOT_FOUND).into_response()
}

fn transport_failure(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown failure");
    tracing::warn!(detail = detail, "request aborted by transport failure");
    ApiError::internal("Unexpected transport failure", codes::TRANSPORT_FAILURE).into_response()
}
