pub mod store;

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config;
use crate::error::{codes, ApiError};

pub use store::{FailingSessionStore, MemorySessionStore, RedisSessionStore, SessionStore, StoreError};

const TOKEN_ID_LEN: usize = 12;
const TOKEN_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Signed token payload. `jti` keys the server-side session record; the
/// token itself never carries the session payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub exp: i64,
    pub jti: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Client context a token gets bound to at issue time.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo<'a> {
    pub ip: &'a str,
    pub user_agent: &'a str,
    pub host: &'a str,
}

/// A validated session: token claims merged with the stored record, plus a
/// revocation capability.
#[derive(Clone)]
pub struct AuthSession {
    jti: String,
    claims: Map<String, Value>,
    checked: bool,
    store: Arc<dyn SessionStore>,
    key: String,
}

impl AuthSession {
    pub fn id(&self) -> &str {
        &self.jti
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// False when the store could not be reached and the token was accepted
    /// on signature alone.
    pub fn checked(&self) -> bool {
        self.checked
    }

    /// Delete the backing session record. Idempotent; once the record is
    /// gone the token fails validation everywhere.
    pub async fn destroy(&self) -> Result<(), ApiError> {
        self.store.del(&self.key).await.map_err(|e| {
            ApiError::internal("Failed to destroy session", crate::error::ErrorKind::Internal.default_code())
                .with_cause(e)
        })
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("jti", &self.jti)
            .field("checked", &self.checked)
            .field("claims", &self.claims)
            .finish()
    }
}

/// Issues and validates bearer tokens.
///
/// Tokens are stateless HS256 JWTs, but validity additionally requires a
/// live session record in the external store. The double check is what
/// makes revocation possible: deleting the record invalidates the token
/// instantly without a separate blacklist.
#[derive(Clone)]
pub struct TokenManager {
    secret: String,
    ttl_secs: u64,
    key_prefix: String,
    store: Arc<dyn SessionStore>,
}

impl TokenManager {
    pub fn new(secret: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs: 3600,
            key_prefix: "session:".to_string(),
            store,
        }
    }

    pub fn from_config(store: Arc<dyn SessionStore>) -> Self {
        let cfg = config::config();
        Self {
            secret: cfg.security.jwt_secret.clone(),
            ttl_secs: cfg.security.token_ttl_secs,
            key_prefix: cfg.session.key_prefix.clone(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Sign a token carrying the given claims and record the session
    /// server-side. The store write is best-effort: a failure is logged
    /// but does not fail issuance.
    pub async fn issue(
        &self,
        claims: Map<String, Value>,
        client: &ClientInfo<'_>,
    ) -> Result<String, ApiError> {
        if self.secret.is_empty() {
            return Err(ApiError::internal("Token signing unavailable", codes::AUTH_SIGNING_FAILED));
        }

        let jti = generate_token_id();
        let payload = Claims {
            iss: client.host.to_string(),
            exp: Utc::now().timestamp() + self.ttl_secs as i64,
            jti: jti.clone(),
            data: claims.clone(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| {
            ApiError::internal("Token signing failed", codes::AUTH_SIGNING_FAILED).with_cause(e)
        })?;

        let record = json!({
            "ip": client.ip,
            "user_agent": client.user_agent,
            "claims": Value::Object(claims),
        });
        if let Err(e) = self
            .store
            .set(&self.session_key(&jti), record, self.ttl_secs)
            .await
        {
            tracing::warn!(jti = %jti, error = %e, "session record write failed");
        }

        Ok(token)
    }

    /// Validate a bearer token against both its signature and its live
    /// session record, returning the merged session.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        client: &ClientInfo<'_>,
    ) -> Result<AuthSession, ApiError> {
        let header = authorization.ok_or_else(|| {
            ApiError::forbidden("Missing authorization header", codes::AUTH_MISSING_HEADER)
        })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::bad_format("Authorization scheme must be Bearer", codes::AUTH_BAD_SCHEME)
        })?;
        if token.trim().is_empty() {
            return Err(ApiError::bad_format(
                "Authorization scheme must be Bearer",
                codes::AUTH_BAD_SCHEME,
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[client.host]);
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            ApiError::unauthorized("Invalid or expired token", codes::AUTH_INVALID_TOKEN).with_cause(e)
        })?;

        let jti = decoded.claims.jti;
        let mut claims = decoded.claims.data;
        let key = self.session_key(&jti);

        let record = match self.store.get(&key).await {
            Ok(record) => record,
            Err(e) => {
                // store outage: accept the token on signature alone rather
                // than locking every caller out
                tracing::warn!(jti = %jti, error = %e, "session store lookup failed, token accepted unchecked");
                return Ok(AuthSession {
                    jti,
                    claims,
                    checked: false,
                    store: self.store.clone(),
                    key,
                });
            }
        };

        let record = record.ok_or_else(|| {
            ApiError::unauthorized("Token has been revoked or has expired", codes::AUTH_SESSION_REVOKED)
        })?;

        if let Some(bound_ip) = record.get("ip").and_then(Value::as_str) {
            if !bound_ip.is_empty() && bound_ip != client.ip {
                return Err(ApiError::unauthorized(
                    "Token bound to a different client address",
                    codes::AUTH_IP_MISMATCH,
                ));
            }
        }
        if let Some(bound_agent) = record.get("user_agent").and_then(Value::as_str) {
            if !bound_agent.is_empty() && bound_agent != client.user_agent {
                return Err(ApiError::unauthorized(
                    "Token bound to a different user agent",
                    codes::AUTH_AGENT_MISMATCH,
                ));
            }
        }

        // stored claims win over token claims
        if let Some(Value::Object(stored)) = record.get("claims") {
            for (k, v) in stored {
                claims.insert(k.clone(), v.clone());
            }
        }

        Ok(AuthSession { jti, claims, checked: true, store: self.store.clone(), key })
    }

    fn session_key(&self, jti: &str) -> String {
        format!("{}{}", self.key_prefix, jti)
    }
}

/// Opaque token id: 12 characters from a fixed alphabet, drawn from the
/// OS secure random source.
fn generate_token_id() -> String {
    let mut rng = OsRng;
    (0..TOKEN_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_ID_ALPHABET.len());
            TOKEN_ID_ALPHABET[idx] as char
        })
        .collect()
}
