use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub security: SecurityConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HMAC secret used to sign session tokens. Empty means token issuance
    /// is refused until one is configured.
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long a handler that neither returned a value nor a pending result
    /// may leave the response unfinalized before a null response is emitted.
    pub response_timeout_ms: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL prepended to error codes in the `details` field.
    pub support_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("TOKEN_TTL_SECS") {
            self.security.token_ttl_secs = v.parse().unwrap_or(self.security.token_ttl_secs);
        }
        if let Ok(v) = env::var("RESPONSE_TIMEOUT_MS") {
            self.dispatch.response_timeout_ms = v.parse().unwrap_or(self.dispatch.response_timeout_ms);
        }
        if let Ok(v) = env::var("MAX_BODY_BYTES") {
            self.dispatch.max_body_bytes = v.parse().unwrap_or(self.dispatch.max_body_bytes);
        }
        if let Ok(v) = env::var("REDIS_URL") {
            self.session.redis_url = v;
        }
        if let Ok(v) = env::var("SESSION_KEY_PREFIX") {
            self.session.key_prefix = v;
        }
        if let Ok(v) = env::var("SUPPORT_URL") {
            self.api.support_url = v;
        }
        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            security: SecurityConfig {
                jwt_secret: "dev-secret-change-me".to_string(),
                token_ttl_secs: 3600,
            },
            dispatch: DispatchConfig {
                response_timeout_ms: 2000,
                max_body_bytes: 2 * 1024 * 1024, // 2MB
            },
            session: SessionConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                key_prefix: "session:".to_string(),
            },
            api: ApiConfig {
                support_url: "https://support.example.com/errors/".to_string(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            security: SecurityConfig {
                // must come from JWT_SECRET in production
                jwt_secret: String::new(),
                token_ttl_secs: 3600,
            },
            dispatch: DispatchConfig {
                response_timeout_ms: 2000,
                max_body_bytes: 1024 * 1024, // 1MB
            },
            session: SessionConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                key_prefix: "session:".to_string(),
            },
            api: ApiConfig {
                support_url: "https://support.example.com/errors/".to_string(),
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
