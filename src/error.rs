// HTTP API error types
//
// Error codes are four digit numbers:
//
// - digit 1 => module (1 generic, 2 filtering, 4 dispatch, 7 auth/routing)
// - digit 2 => origin (4 from the client, 5 from the server)
// - digits 3-4 => entry within the module
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

/// Stable error codes referenced from more than one place.
pub mod codes {
    // dispatch
    pub const HANDLER_UNCAUGHT: u16 = 4500;

    // routing fallbacks
    pub const ROUTE_NOT_FOUND: u16 = 7420;
    pub const TRANSPORT_FAILURE: u16 = 7520;

    // auth
    pub const AUTH_MISSING_HEADER: u16 = 7410;
    pub const AUTH_BAD_SCHEME: u16 = 7411;
    pub const AUTH_INVALID_TOKEN: u16 = 7411;
    pub const AUTH_SESSION_REVOKED: u16 = 7412;
    pub const AUTH_IP_MISMATCH: u16 = 7413;
    pub const AUTH_AGENT_MISMATCH: u16 = 7414;
    pub const AUTH_SIGNING_FAILED: u16 = 7500;

    // filter compiler
    pub const LIMIT_NOT_NUMERIC: u16 = 2410;
    pub const LIMIT_OUT_OF_RANGE: u16 = 2411;
    pub const OFFSET_NOT_NUMERIC: u16 = 2420;
    pub const OFFSET_OUT_OF_RANGE: u16 = 2421;
    pub const MARKER_OFFSET_CONFLICT: u16 = 2422;
    pub const FIELDS_DUPLICATE: u16 = 2430;
    pub const FIELDS_UNKNOWN: u16 = 2431;
    pub const PREFILTER_DUPLICATE: u16 = 2440;
    pub const MARKER_ORDER_CONFLICT: u16 = 2450;
    pub const ORDER_UNKNOWN_FIELD: u16 = 2451;
    pub const ORDER_BAD_DIRECTION: u16 = 2452;
    pub const CRITERIA_UNKNOWN_FIELD: u16 = 2460;
    pub const CRITERIA_UNKNOWN_OPERATOR: u16 = 2461;
    pub const ENTITY_MISSING_ID: u16 = 2470;
    pub const ENTITY_LOOKUP_FAILED: u16 = 2570;
}

/// Failure category, mapped one-to-one onto an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadFormat,
    BadArgument,
    Conflicts,
    NotFound,
    Forbidden,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::BadFormat => StatusCode::BAD_REQUEST,
            ErrorKind::BadArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Conflicts => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Code used when the raising site does not pick a specific one.
    pub fn default_code(&self) -> u16 {
        match self {
            ErrorKind::BadFormat => 1401,
            ErrorKind::BadArgument => 1402,
            ErrorKind::Conflicts => 1403,
            ErrorKind::NotFound => 1404,
            ErrorKind::Unauthorized => 1405,
            ErrorKind::Forbidden => 1406,
            ErrorKind::Internal => 1501,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::BadFormat => "Bad field format",
            ErrorKind::BadArgument => "Bad/unexpected argument",
            ErrorKind::Conflicts => "Conflicting request options",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

/// A typed API failure: category, stable numeric code, client-safe message
/// and an optional wrapped cause that is logged but never serialized.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    code: u16,
    message: String,
    cause: Option<anyhow::Error>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, code: u16) -> Self {
        Self { kind, code, message: message.into(), cause: None }
    }

    pub fn of_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message(), kind.default_code())
    }

    pub fn bad_format(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::BadFormat, message, code)
    }

    pub fn bad_argument(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::BadArgument, message, code)
    }

    pub fn conflicts(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::Conflicts, message, code)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message, ErrorKind::NotFound.default_code())
    }

    pub fn forbidden(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::Forbidden, message, code)
    }

    pub fn unauthorized(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::Unauthorized, message, code)
    }

    pub fn internal(message: impl Into<String>, code: u16) -> Self {
        Self::new(ErrorKind::Internal, message, code)
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.http_status()
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Client-facing JSON body. The cause chain stays server-side.
    pub fn to_json(&self) -> Value {
        json!({
            "message": self.message,
            "code": self.code,
            "details": format!("{}{}", crate::config::config().api.support_url, self.code),
        })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP Error {} (#{}): {}", self.status_code().as_u16(), self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, "\nCaused by: {:#}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(json!({ "error": self.to_json() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(ErrorKind::BadFormat.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflicts.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn to_json_carries_code_and_support_link() {
        let err = ApiError::bad_format("Bad limit format, expecting a number", codes::LIMIT_NOT_NUMERIC);
        let body = err.to_json();
        assert_eq!(body["code"], 2410);
        assert_eq!(body["message"], "Bad limit format, expecting a number");
        assert!(body["details"].as_str().unwrap().ends_with("2410"));
    }

    #[test]
    fn default_codes_follow_module_numbering() {
        assert_eq!(ApiError::of_kind(ErrorKind::BadFormat).code(), 1401);
        assert_eq!(ApiError::of_kind(ErrorKind::NotFound).code(), 1404);
        assert_eq!(ApiError::of_kind(ErrorKind::Internal).code(), 1501);
    }
}
