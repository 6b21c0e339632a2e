use std::str::FromStr;

use tracing::warn;

use crate::rate_limit::RateLimitConfig;

const DEFAULT_DATABASE_URL: &str = "postgres:///perch";
const DEFAULT_SECRET_KEY: &str = "insecure-development-secret-change-me";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub secret_key: String,
    pub bind_addr: String,
    pub enable_hsts: bool,
    pub secure_cookies: bool,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let secret_key = std::env::var("SECRET_KEY").unwrap_or_else(|_| {
            warn!("SECRET_KEY not set; sessions are signed with an insecure default");
            DEFAULT_SECRET_KEY.to_string()
        });
        Self {
            database_url,
            secret_key,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            enable_hsts: env_flag("ENABLE_HSTS"),
            secure_cookies: env_flag("SESSION_COOKIE_SECURE"),
            rate_limits: RateLimitConfig::from_env(),
        }
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}
