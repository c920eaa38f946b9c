#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use orest::auth::{MemorySessionStore, SessionStore, TokenManager};
use orest::{AppState, EntityFilter, ListFilter, MemoryModel, Outcome, ParamKind, Registry, Verb};

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemorySessionStore>,
    pub auth: TokenManager,
}

/// An in-process app over the `actor` sample model, covering the handler
/// shapes the dispatcher distinguishes: immediate values, pending results,
/// out-of-band finalization, typed and untyped failures.
pub fn build_app() -> TestApp {
    let store = Arc::new(MemorySessionStore::new());
    let auth = TokenManager::new(
        "integration-secret",
        store.clone() as Arc<dyn SessionStore>,
    );

    let actors = Arc::new(MemoryModel::with_rows(
        "actor",
        &["id", "first_name", "last_name", "last_update"],
        vec![
            json!({"id": "1", "first_name": "PENELOPE", "last_name": "GUINESS", "last_update": "2020-05-01T00:00:00Z"}),
            json!({"id": "2", "first_name": "NICK", "last_name": "WAHLBERG", "last_update": "2020-05-02T00:00:00Z"}),
            json!({"id": "3", "first_name": "ED", "last_name": "CHASE", "last_update": "2020-05-03T00:00:00Z"}),
            json!({"id": "4", "first_name": "JENNIFER", "last_name": "DAVIS", "last_update": "2020-05-04T00:00:00Z"}),
            json!({"id": "5", "first_name": "JOHNNY", "last_name": "LOLLOBRIGIDA", "last_update": "2020-05-05T00:00:00Z"}),
            json!({"id": "6", "first_name": "BETTE", "last_name": "NICHOLSON", "last_update": "2020-05-06T00:00:00Z"}),
        ],
    ));

    let mut registry = Registry::new();

    {
        let model = actors.clone();
        registry.endpoint("actors").get(move |ctx| {
            let model = model.clone();
            Ok(Outcome::pending(async move {
                let filter = ListFilter::compile(model.attributes(), &ctx.query)?;
                let set = filter.find(model.as_ref()).await?;
                Ok(json!(set.rows))
            }))
        });
    }

    {
        let model = actors.clone();
        registry.endpoint("actors/:id").get(move |ctx| {
            let model = model.clone();
            Ok(Outcome::pending(async move {
                let filter =
                    EntityFilter::compile(model.attributes(), ctx.param("id"), &ctx.query)?;
                filter.read(model.as_ref()).await.map_err(Into::into)
            }))
        });
    }

    registry
        .endpoint("echo")
        .post(|ctx| Ok(Outcome::Value(ctx.body.clone())))
        .describe("Echo the validated payload")
        .param("username", ParamKind::String, "login name", true)
        .param("email", ParamKind::Email, "contact address", false)
        .param("age", ParamKind::Number, "age in years", false);

    registry.endpoint("boom").get(|_| Err(anyhow::anyhow!("kaboom")));

    registry
        .endpoint("ping")
        .method(Verb::Get, 2, |_| Ok(Outcome::Value(json!("pong"))))
        .expect("valid version");

    registry
        .endpoint("teapot")
        .get(|_| Err(orest::ApiError::not_found("nothing here").into()));

    registry.endpoint("silent").get(|_| Ok(Outcome::Empty));

    // finalizes through the slot and then also returns a value
    registry.endpoint("eager").get(|ctx| {
        ctx.respond(json!({"first": true}));
        Ok(Outcome::Value(json!({"second": true})))
    });

    // finalizes from a spawned task after returning nothing
    registry.endpoint("deferred").get(|ctx| {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            ctx.respond(json!({"deferred": true}));
        });
        Ok(Outcome::Empty)
    });

    {
        let manager = auth.clone();
        registry
            .endpoint("auth")
            .post(move |ctx| {
                let manager = manager.clone();
                Ok(Outcome::pending(async move {
                    let mut claims = Map::new();
                    if let Some(user) = ctx.body.get("username") {
                        claims.insert("username".to_string(), user.clone());
                    }
                    let token = manager.issue(claims, &ctx.client_info()).await?;
                    Ok(json!({"token": token}))
                }))
            })
            .describe("Opens a session")
            .param("username", ParamKind::String, "The username to login", true);
    }

    registry.endpoint("me").auth(true).get(|ctx| {
        let session = ctx.session().expect("auth ran before the handler");
        Ok(Outcome::Value(json!({
            "id": session.id(),
            "claims": session.claims(),
            "checked": session.checked(),
        })))
    });

    registry.endpoint("logout").auth(true).post(|ctx| {
        let session = ctx.session().cloned();
        Ok(Outcome::pending(async move {
            if let Some(session) = session {
                session.destroy().await?;
            }
            Ok(json!({"ok": true}))
        }))
    });

    let router = registry.into_router(AppState::new(auth.clone()));
    TestApp { router, store, auth }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

pub fn get_with(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("request")
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn post_json_with(uri: &str, body: Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

/// Drive one request through the router, returning status, parsed JSON
/// body (null when not JSON) and the raw body text.
pub async fn call(router: &Router, req: Request<Body>) -> (StatusCode, Value, String) {
    let response = router.clone().oneshot(req).await.expect("infallible router");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8 body");
    let value = serde_json::from_str(&text).unwrap_or(Value::Null);
    (status, value, text)
}

pub fn error_code(body: &Value) -> i64 {
    body["error"]["code"].as_i64().unwrap_or(-1)
}
