use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// Outbound queue depth per WebSocket session
    pub session_buffer: usize,
    pub cookie_secure: bool,
}

impl Config {
    /// Read `COURIER_*` variables, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = match var("COURIER_PORT") {
            Some(v) => v.parse().with_context(|| format!("invalid COURIER_PORT '{}'", v))?,
            None => 3000,
        };
        let token_ttl_hours: i64 = match var("COURIER_TOKEN_TTL_HOURS") {
            Some(v) => v
                .parse()
                .ok()
                .filter(|h: &i64| *h > 0)
                .with_context(|| format!("invalid COURIER_TOKEN_TTL_HOURS '{}'", v))?,
            None => 720, // 30 days
        };
        let session_buffer: usize = match var("COURIER_SESSION_BUFFER") {
            Some(v) => v
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .with_context(|| format!("invalid COURIER_SESSION_BUFFER '{}'", v))?,
            None => 256,
        };
        let cookie_secure = var("COURIER_COOKIE_SECURE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            host: var("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            jwt_secret,
            token_ttl_hours,
            session_buffer,
            cookie_secure,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = Config::from_lookup(lookup(&[("COURIER_JWT_SECRET", "s3cr3t-value")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("courier.db"));
        assert_eq!(config.token_ttl_hours, 720);
        assert_eq!(config.session_buffer, 256);
        assert!(!config.cookie_secure);
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("COURIER_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("COURIER_JWT_SECRET", "s3cr3t-value"),
            ("COURIER_HOST", "127.0.0.1"),
            ("COURIER_PORT", "8080"),
            ("COURIER_SESSION_BUFFER", "16"),
            ("COURIER_COOKIE_SECURE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.session_buffer, 16);
        assert!(config.cookie_secure);

        let bad = Config::from_lookup(lookup(&[("COURIER_JWT_SECRET", "x1"), ("COURIER_PORT", "http")]));
        assert!(bad.is_err());
        let zero = Config::from_lookup(lookup(&[("COURIER_JWT_SECRET", "x1"), ("COURIER_SESSION_BUFFER", "0")]));
        assert!(zero.is_err());
    }
}
