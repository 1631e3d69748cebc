// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! [`AppConfig`] loaded from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `CLERK_INSTANCE_ID` | Instance whose tokens are accepted | Required |
//! | `CLERK_API_URL` | Backend API base URL | `https://api.clerk.com` |
//! | `CLERK_SECRET_KEY` | Bearer secret for the backend API | Optional |
//! | `CLERK_JWKS_URL` | Session token JWKS endpoint | `{api}/v1/jwks` |
//! | `CLERK_MACHINE_JWKS_URL` | Machine token JWKS endpoint | `{api}/v1/jwks?kind=machine` |
//! | `CLERK_HANDSHAKE_JWKS_URL` | Handshake response JWKS endpoint | `CLERK_JWKS_URL` |
//! | `CLERK_FRONTEND_API` | Frontend API host for handshakes | Looked up via backend API |
//! | `CLERK_INSTANCE_DEVELOPMENT` | Static instance is a development instance | `false` |
//! | `CLERK_ISSUER` | Exact trusted issuer | Hosted issuer rule |
//! | `CLERK_AUDIENCE` | Required audience | Optional |
//! | `CLERK_HANDSHAKE_SECRET` | Secret signing handshake state | Required |
//! | `CLERK_ALLOWED_HOSTS` | Comma-separated hosts the service answers for | Any |
//! | `CLERK_CLOCK_SKEW_SECS` | Clock skew tolerance | `5` |
//! | `CLERK_KEY_MAX_AGE_SECS` | Key cache max age | `3600` |
//! | `CLERK_KEY_REFRESH_INTERVAL_SECS` | Minimum gap between unknown-key refreshes | `10` |
//! | `CLERK_RETRY_MAX_ATTEMPTS` | Upstream attempts per fetch | `5` |
//! | `CLERK_RETRY_BASE_DELAY_MS` | First retry backoff | `100` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::time::Duration;

use crate::clock::DEFAULT_CLOCK_SKEW;
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

/// Server bind address.
pub const HOST_ENV: &str = "HOST";

/// Server bind port.
pub const PORT_ENV: &str = "PORT";

/// Instance identifier. Also substituted for `{instance_id}` in URLs.
pub const INSTANCE_ID_ENV: &str = "CLERK_INSTANCE_ID";

/// Backend API base URL.
pub const API_URL_ENV: &str = "CLERK_API_URL";

/// Backend API secret key, sent as a bearer token on JWKS and instance
/// lookups.
pub const SECRET_KEY_ENV: &str = "CLERK_SECRET_KEY";

/// JWKS endpoint for session keys.
pub const JWKS_URL_ENV: &str = "CLERK_JWKS_URL";

/// JWKS endpoint for handshake response keys. Defaults to the session
/// endpoint, in which case session keys also verify handshake responses.
pub const HANDSHAKE_JWKS_URL_ENV: &str = "CLERK_HANDSHAKE_JWKS_URL";

/// JWKS endpoint for machine token keys.
pub const MACHINE_JWKS_URL_ENV: &str = "CLERK_MACHINE_JWKS_URL";

/// Frontend API host. When set, instance configuration is static and the
/// backend API is never asked for it.
pub const FRONTEND_API_ENV: &str = "CLERK_FRONTEND_API";

/// Marks the static instance as a development instance.
pub const INSTANCE_DEVELOPMENT_ENV: &str = "CLERK_INSTANCE_DEVELOPMENT";

/// Exact trusted issuer.
pub const ISSUER_ENV: &str = "CLERK_ISSUER";

/// Required audience.
pub const AUDIENCE_ENV: &str = "CLERK_AUDIENCE";

/// Secret for signing outbound handshake state.
pub const HANDSHAKE_SECRET_ENV: &str = "CLERK_HANDSHAKE_SECRET";

/// Hosts accepted in the `Host` header. Handshake return URLs are built from
/// it, so production deployments should set this.
pub const ALLOWED_HOSTS_ENV: &str = "CLERK_ALLOWED_HOSTS";

pub const CLOCK_SKEW_SECS_ENV: &str = "CLERK_CLOCK_SKEW_SECS";
pub const KEY_MAX_AGE_SECS_ENV: &str = "CLERK_KEY_MAX_AGE_SECS";
pub const KEY_REFRESH_INTERVAL_SECS_ENV: &str = "CLERK_KEY_REFRESH_INTERVAL_SECS";
pub const RETRY_MAX_ATTEMPTS_ENV: &str = "CLERK_RETRY_MAX_ATTEMPTS";
pub const RETRY_BASE_DELAY_MS_ENV: &str = "CLERK_RETRY_BASE_DELAY_MS";

/// Logging format, `json` or `pretty`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_API_URL: &str = "https://api.clerk.com";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Minimum handshake secret length in bytes.
const MIN_HANDSHAKE_SECRET_LEN: usize = 32;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be at least 32 bytes")]
    SecretTooShort(&'static str),
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Missing(_) => "config_missing",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::SecretTooShort(_) => "config_secret_too_short",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Application configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
    pub api_url: String,
    pub secret_key: Option<String>,
    pub jwks_url: String,
    pub machine_jwks_url: String,
    pub handshake_jwks_url: String,
    pub frontend_api: Option<String>,
    pub instance_development: bool,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub handshake_secret: String,
    /// Lowercased; empty accepts any host
    pub allowed_hosts: Vec<String>,
    pub clock_skew: Duration,
    pub key_max_age: Duration,
    pub key_refresh_interval: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let instance_id = get(INSTANCE_ID_ENV).ok_or(ConfigError::Missing(INSTANCE_ID_ENV))?;
        let handshake_secret =
            get(HANDSHAKE_SECRET_ENV).ok_or(ConfigError::Missing(HANDSHAKE_SECRET_ENV))?;
        if handshake_secret.len() < MIN_HANDSHAKE_SECRET_LEN {
            return Err(ConfigError::SecretTooShort(HANDSHAKE_SECRET_ENV));
        }

        let api_url = get(API_URL_ENV)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                })
            }
        };

        let jwks_url = get(JWKS_URL_ENV).unwrap_or_else(|| format!("{api_url}/v1/jwks"));
        let allowed_hosts = get(ALLOWED_HOSTS_ENV)
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(|host| host.trim().to_ascii_lowercase())
                    .filter(|host| !host.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&get, PORT_ENV, DEFAULT_PORT)?,
            handshake_jwks_url: get(HANDSHAKE_JWKS_URL_ENV).unwrap_or_else(|| jwks_url.clone()),
            jwks_url,
            machine_jwks_url: get(MACHINE_JWKS_URL_ENV)
                .unwrap_or_else(|| format!("{api_url}/v1/jwks?kind=machine")),
            secret_key: get(SECRET_KEY_ENV),
            frontend_api: get(FRONTEND_API_ENV),
            instance_development: parse_or(&get, INSTANCE_DEVELOPMENT_ENV, false)?,
            issuer: get(ISSUER_ENV),
            audience: get(AUDIENCE_ENV),
            clock_skew: Duration::from_secs(parse_or(
                &get,
                CLOCK_SKEW_SECS_ENV,
                DEFAULT_CLOCK_SKEW.as_secs(),
            )?),
            key_max_age: Duration::from_secs(parse_or(
                &get,
                KEY_MAX_AGE_SECS_ENV,
                crate::auth::jwks::DEFAULT_KEY_MAX_AGE.as_secs(),
            )?),
            key_refresh_interval: Duration::from_secs(parse_or(
                &get,
                KEY_REFRESH_INTERVAL_SECS_ENV,
                crate::auth::jwks::DEFAULT_MIN_REFRESH_INTERVAL.as_secs(),
            )?),
            retry_max_attempts: parse_or(&get, RETRY_MAX_ATTEMPTS_ENV, DEFAULT_MAX_ATTEMPTS)?,
            retry_base_delay: Duration::from_millis(parse_or(
                &get,
                RETRY_BASE_DELAY_MS_ENV,
                DEFAULT_BASE_DELAY.as_millis() as u64,
            )?),
            instance_id,
            api_url,
            handshake_secret,
            allowed_hosts,
            log_format,
        })
    }

    /// Backend API endpoint describing the instance.
    pub fn instance_url(&self) -> String {
        format!("{}/v1/instance", self.api_url)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("instance_id", &self.instance_id)
            .field("api_url", &self.api_url)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("jwks_url", &self.jwks_url)
            .field("machine_jwks_url", &self.machine_jwks_url)
            .field("handshake_jwks_url", &self.handshake_jwks_url)
            .field("frontend_api", &self.frontend_api)
            .field("instance_development", &self.instance_development)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("handshake_secret", &"<redacted>")
            .field("allowed_hosts", &self.allowed_hosts)
            .field("clock_skew", &self.clock_skew)
            .field("key_max_age", &self.key_max_age)
            .field("key_refresh_interval", &self.key_refresh_interval)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
        }),
    }
}
