pub mod projection;
pub mod xml;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::filter::FieldSpec;

pub use projection::project;

/// Wire format, chosen from a trailing `.json`/`.xml` path discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Json,
    Xml,
}

impl Format {
    pub fn from_suffix(ext: &str) -> Option<Format> {
        match ext {
            "json" => Some(Format::Json),
            "xml" => Some(Format::Xml),
            _ => None,
        }
    }

    /// Resolve the format from a request path, defaulting to JSON.
    pub fn from_path(path: &str) -> Format {
        match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => Format::from_suffix(ext).unwrap_or_default(),
            _ => Format::Json,
        }
    }

    /// Remove a recognized format suffix from a captured path parameter, so
    /// `GET /v1/actors/42.xml` yields the identifier `42`.
    pub fn strip_suffix(value: &str) -> &str {
        value
            .strip_suffix(".json")
            .or_else(|| value.strip_suffix(".xml"))
            .unwrap_or(value)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Xml => "application/xml",
        }
    }
}

/// Serialize a success value into the `{data}` envelope, applying field
/// projection first.
pub fn render_success(value: &Value, format: Format, fields: Option<&FieldSpec>) -> Response {
    let envelope = json!({ "data": project(value, fields) });
    respond(StatusCode::OK, format, &envelope)
}

/// Serialize a typed error into the `{error}` envelope with its HTTP status.
pub fn render_error(err: &ApiError, format: Format) -> Response {
    let envelope = json!({ "error": err.to_json() });
    respond(err.status_code(), format, &envelope)
}

fn respond(status: StatusCode, format: Format, envelope: &Value) -> Response {
    let body = match format {
        Format::Json => serde_json::to_string_pretty(envelope).unwrap_or_else(|e| {
            tracing::error!("response serialization failed: {}", e);
            "{}".to_string()
        }),
        Format::Xml => xml::render(envelope),
    };
    (status, [(header::CONTENT_TYPE, format.content_type())], body).into_response()
}
