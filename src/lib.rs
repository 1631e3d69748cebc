// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Auth Engine - Request Authentication & Handshake Service
//!
//! Authenticates incoming requests carrying session or machine tokens and
//! resynchronizes stale browser sessions through a redirect handshake.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Token classification, key resolution, verification, handshake
//! - `clock` - Time source and clock-skew policy
//! - `retry` - Bounded retry with exponential backoff

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{
    AuthEngine, HandshakeProtocol, HttpInstanceDirectory, HttpKeySource, InstanceConfig,
    InstanceDirectory, IssuerPolicy, JwtVerifier, KeyResolver, KeyResolverConfig, OriginCache,
    StaticInstanceDirectory,
};
use clock::{SkewPolicy, SystemClock};
use config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER};
use error::ServerError;
use retry::RetryPolicy;

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod state;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over [`DEFAULT_LOG_FILTER`].
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wire the engine from configuration.
///
/// `shutdown` cancels in-flight key fetches and instance lookups.
pub fn build_engine(
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<AuthEngine, ServerError> {
    let source = HttpKeySource::new(
        config.jwks_url.clone(),
        config.machine_jwks_url.clone(),
        config.handshake_jwks_url.clone(),
        config.secret_key.clone(),
    )?;

    let keys = KeyResolver::new(
        Arc::new(source),
        KeyResolverConfig {
            max_age: config.key_max_age,
            min_refresh_interval: config.key_refresh_interval,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay),
            clock: Arc::new(SystemClock),
            shutdown: shutdown.clone(),
        },
    );

    let issuer = match &config.issuer {
        Some(issuer) => {
            url::Url::parse(issuer).map_err(|_| ServerError::Issuer(issuer.clone()))?;
            IssuerPolicy::Exact(issuer.clone())
        }
        None => IssuerPolicy::HostedDefault,
    };
    let verifier = JwtVerifier::new(keys, config.instance_id.clone())
        .with_issuer(issuer)
        .with_audience(config.audience.clone());

    let instances: Arc<dyn InstanceDirectory> = match &config.frontend_api {
        Some(frontend_api) => Arc::new(StaticInstanceDirectory::new(InstanceConfig {
            instance_id: config.instance_id.clone(),
            frontend_api: frontend_api.clone(),
            development: config.instance_development,
        })),
        None => Arc::new(HttpInstanceDirectory::new(
            config.instance_url(),
            config.secret_key.clone(),
        )?),
    };

    let handshake = HandshakeProtocol::new(
        verifier.clone(),
        instances,
        Arc::new(OriginCache::new()),
        config.handshake_secret.as_bytes(),
    )
    .with_shutdown(shutdown);

    Ok(AuthEngine::new(verifier, handshake).with_skew(SkewPolicy::new(config.clock_skew)))
}
