// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Handshake: a redirect round trip through the instance's frontend API that
//! replaces stale session state with authoritative state.
//!
//! ## Flow
//!
//! ```text
//! request ── stale token ──▶ begin() ──▶ 307 to /v1/client/handshake
//!                                          ?redirect_url=<return_to>
//!                                          &__clerk_handshake_state=<state>
//!                                          &__clerk_handshake_nonce=<nonce>
//! return_to?__clerk_handshake=<response> ──▶ complete() ──▶ claims | signed out
//! ```
//!
//! The outbound state is an HS256 token signed with a process-local secret.
//! The response is a token signed by the instance with a key from the
//! handshake namespace; it echoes the state token and its nonce. A response
//! is only accepted on the URL its state was issued for.
//!
//! When the response carries a fresh session token, the resolution includes
//! a [`SessionSync`]: the cookies to write back and the clean URL to send
//! the client to, so the next request arrives with the new session.
//!
//! A request chain gets at most [`MAX_HANDSHAKE_ATTEMPTS`] handshakes. If the
//! completion itself would need another one, the chain is refused instead of
//! redirecting again.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::claims::{Claims, RawClaims};
use super::error::VerifyError;
use super::instance::{InstanceConfig, InstanceDirectory, InstanceError};
use super::jwks::KeyNamespace;
use super::origin::OriginCache;
use super::outcome::InvalidReason;
use super::token_kind::TokenKind;
use super::verifier::JwtVerifier;
use crate::clock::SkewPolicy;
use crate::retry::RetryPolicy;

/// Query parameter carrying the handshake response.
pub const HANDSHAKE_PARAM: &str = "__clerk_handshake";
/// Query parameter carrying the signed outbound state.
pub const HANDSHAKE_STATE_PARAM: &str = "__clerk_handshake_state";
/// Query parameter carrying the state nonce.
pub const HANDSHAKE_NONCE_PARAM: &str = "__clerk_handshake_nonce";
/// Query parameter with the URL to return to.
pub const REDIRECT_URL_PARAM: &str = "redirect_url";
/// Marks a redirect for a development instance.
pub const DEV_BROWSER_PARAM: &str = "__clerk_dev";

/// Handshakes allowed per request chain.
pub const MAX_HANDSHAKE_ATTEMPTS: u32 = 1;

/// How long an outbound state is accepted back.
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(300);

/// Why a handshake is being considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeTrigger {
    TokenExpired,
    KeyNotFound,
    /// `iat` is older than the client's last session change
    SessionTokenOutdated,
    /// The client says it has a session but sent no token
    SessionTokenMissing,
    /// Back from a development account portal without a token
    DevPortalReturn,
}

impl HandshakeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeTrigger::TokenExpired => "token_expired",
            HandshakeTrigger::KeyNotFound => "key_not_found",
            HandshakeTrigger::SessionTokenOutdated => "session_token_outdated",
            HandshakeTrigger::SessionTokenMissing => "session_token_missing",
            HandshakeTrigger::DevPortalReturn => "dev_portal_return",
        }
    }
}

/// Outbound state, carried signed through the redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeState {
    pub nonce: String,
    #[serde(rename = "iat")]
    pub requested_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    pub return_to: String,
    pub attempt: u32,
}

/// Payload of the handshake response token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub nonce: String,
    /// The outbound state token, echoed back
    pub state: String,
    /// Authoritative session claims when signed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<RawClaims>,
    /// Set when the authoritative state is signed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fresh session token for the `__session` cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub exp: i64,
}

/// Session state the client must store after a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSync {
    /// New `__session` cookie value
    pub session_token: String,
    /// New `__client_uat` cookie value
    pub client_uat: i64,
    /// The original URL without handshake parameters
    pub return_to: Url,
}

/// Where a handshake step left the request.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeResolution {
    /// Redirect the client.
    Required { redirect_target: Url },
    /// The response carried valid session claims.
    Resolved {
        claims: Claims,
        sync: Option<SessionSync>,
    },
    /// The response says there is no session.
    SignedOut,
    /// Refused.
    Rejected { reason: InvalidReason },
    /// The request cannot be redirected; the caller decides from the trigger.
    FailClosed { trigger: HandshakeTrigger },
}

/// Request details the handshake needs.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeContext<'a> {
    pub url: &'a Url,
    pub host: &'a str,
    pub now: i64,
    pub skew: SkewPolicy,
}

/// Handshake failure before a redirect could be built.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("instance configuration unavailable: {0}")]
    Instance(#[from] InstanceError),
    #[error("failed to sign handshake state: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("instance lookup cancelled")]
    Cancelled,
}

/// Handshake state machine for one instance.
#[derive(Clone)]
pub struct HandshakeProtocol {
    verifier: JwtVerifier,
    instances: Arc<dyn InstanceDirectory>,
    origins: Arc<OriginCache>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    lookup: RetryPolicy,
    shutdown: CancellationToken,
}

impl HandshakeProtocol {
    /// `secret` signs outbound state and never leaves the process.
    pub fn new(
        verifier: JwtVerifier,
        instances: Arc<dyn InstanceDirectory>,
        origins: Arc<OriginCache>,
        secret: &[u8],
    ) -> Self {
        Self {
            verifier,
            instances,
            origins,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl: DEFAULT_HANDSHAKE_TTL,
            // Instance configuration errors are not transient.
            lookup: RetryPolicy::no_retry(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn origins(&self) -> &OriginCache {
        &self.origins
    }

    /// Start a handshake for a request that has had `prior_attempts` already.
    pub async fn begin(
        &self,
        ctx: &HandshakeContext<'_>,
        trigger: HandshakeTrigger,
        prior_attempts: u32,
    ) -> HandshakeResolution {
        let attempt = prior_attempts.saturating_add(1);
        if attempt > MAX_HANDSHAKE_ATTEMPTS {
            warn!(
                attempt,
                trigger = trigger.as_str(),
                "Handshake loop detected, refusing to redirect again"
            );
            return HandshakeResolution::Rejected {
                reason: InvalidReason::HandshakeLoopDetected,
            };
        }

        if self.origins.is_dev_portal_origin(ctx.host) {
            debug!(
                host = ctx.host,
                trigger = trigger.as_str(),
                "Request is on a dev portal origin, not redirecting"
            );
            return HandshakeResolution::FailClosed { trigger };
        }

        match self.redirect_target(ctx, attempt).await {
            Ok(redirect_target) => {
                info!(
                    trigger = trigger.as_str(),
                    attempt,
                    "Starting handshake"
                );
                HandshakeResolution::Required { redirect_target }
            }
            Err(e) => {
                warn!(error = %e, trigger = trigger.as_str(), "Cannot start handshake");
                HandshakeResolution::Rejected {
                    reason: InvalidReason::HandshakeUnavailable,
                }
            }
        }
    }

    /// Consume a handshake response from the `__clerk_handshake` parameter.
    pub async fn complete(
        &self,
        response: &str,
        ctx: &HandshakeContext<'_>,
    ) -> HandshakeResolution {
        let rejected = |reason| HandshakeResolution::Rejected { reason };

        let response: HandshakeResponse = match self
            .verifier
            .verify_signed(response, KeyNamespace::Handshake)
            .await
        {
            Ok(response) => response,
            Err(VerifyError::UpstreamUnavailable(message)) => {
                warn!(error = %message, "Handshake keys unavailable");
                return rejected(InvalidReason::UpstreamUnavailable);
            }
            Err(e) => {
                debug!(error_code = e.error_code(), "Handshake response rejected");
                return rejected(InvalidReason::HandshakeInvalid);
            }
        };

        if ctx.skew.is_expired(response.exp, ctx.now) {
            debug!("Handshake response has expired");
            return rejected(InvalidReason::HandshakeInvalid);
        }

        let state = match self.decode_state(&response.state) {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "Handshake state rejected");
                return rejected(InvalidReason::HandshakeInvalid);
            }
        };
        if state.nonce != response.nonce {
            warn!("Handshake nonce mismatch");
            return rejected(InvalidReason::HandshakeInvalid);
        }
        if ctx.skew.is_expired(state.expires_at, ctx.now) {
            debug!(
                requested_at = state.requested_at,
                "Handshake state is older than its TTL"
            );
            return rejected(InvalidReason::HandshakeInvalid);
        }
        let current = return_to(ctx.url);
        if current.as_str() != state.return_to {
            warn!(
                issued_for = %state.return_to,
                used_on = %current,
                "Handshake response presented on another URL"
            );
            return rejected(InvalidReason::HandshakeInvalid);
        }

        if let Some(error) = response.error {
            info!(reason = %error, "Handshake resolved to signed out");
            return HandshakeResolution::SignedOut;
        }
        let Some(raw) = response.claims else {
            debug!("Handshake response has neither claims nor error");
            return rejected(InvalidReason::HandshakeInvalid);
        };

        match self
            .verifier
            .validate_claims(raw, TokenKind::SessionToken, ctx.now, ctx.skew)
        {
            Ok(claims) => {
                let sync = match response.session_token {
                    Some(token) => match self.session_sync(token, &claims, current, ctx).await {
                        Ok(sync) => Some(sync),
                        Err(reason) => return rejected(reason),
                    },
                    None => None,
                };
                info!(
                    session_id = ?claims.session_id,
                    sync = sync.is_some(),
                    "Handshake resolved session"
                );
                HandshakeResolution::Resolved { claims, sync }
            }
            Err(e) if e.is_recoverable_by_handshake() => {
                self.begin(ctx, HandshakeTrigger::TokenExpired, state.attempt)
                    .await
            }
            Err(e) => rejected(
                InvalidReason::from_verify_error(&e).unwrap_or(InvalidReason::HandshakeInvalid),
            ),
        }
    }

    /// Check the returned session token against the response claims.
    async fn session_sync(
        &self,
        token: String,
        claims: &Claims,
        return_to: Url,
        ctx: &HandshakeContext<'_>,
    ) -> Result<SessionSync, InvalidReason> {
        let verified = self
            .verifier
            .verify(&token, TokenKind::SessionToken, ctx.now, ctx.skew)
            .await
            .map_err(|e| match e {
                VerifyError::UpstreamUnavailable(_) => InvalidReason::UpstreamUnavailable,
                other => {
                    debug!(error_code = other.error_code(), "Handshake session token rejected");
                    InvalidReason::HandshakeInvalid
                }
            })?;

        if verified.session_id != claims.session_id || verified.subject != claims.subject {
            warn!("Handshake session token does not match its claims");
            return Err(InvalidReason::HandshakeInvalid);
        }

        Ok(SessionSync {
            client_uat: verified.issued_at.unwrap_or(ctx.now),
            session_token: token,
            return_to,
        })
    }

    async fn redirect_target(
        &self,
        ctx: &HandshakeContext<'_>,
        attempt: u32,
    ) -> Result<Url, HandshakeError> {
        let instance = self.instance().await?;
        let mut target = instance.handshake_endpoint()?;

        let return_to = return_to(ctx.url);
        let state = HandshakeState {
            nonce: Uuid::new_v4().simple().to_string(),
            requested_at: ctx.now,
            expires_at: ctx.now + self.ttl.as_secs() as i64,
            return_to: return_to.to_string(),
            attempt,
        };
        let token = encode(&Header::new(Algorithm::HS256), &state, &self.encoding_key)?;

        {
            let mut query = target.query_pairs_mut();
            query.append_pair(REDIRECT_URL_PARAM, return_to.as_str());
            query.append_pair(HANDSHAKE_STATE_PARAM, &token);
            query.append_pair(HANDSHAKE_NONCE_PARAM, &state.nonce);
            if instance.development {
                query.append_pair(DEV_BROWSER_PARAM, "1");
            }
        }

        Ok(target)
    }

    async fn instance(&self) -> Result<InstanceConfig, HandshakeError> {
        let instance_id = self.verifier.instance_id();
        self.lookup
            .run(&self.shutdown, |_| self.instances.lookup(instance_id))
            .await
            .map_err(|e| match e.last_error() {
                Some(error) => HandshakeError::Instance(error.clone()),
                None => HandshakeError::Cancelled,
            })
    }

    fn decode_state(&self, token: &str) -> Result<HandshakeState, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        decode::<HandshakeState>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}

/// The request URL without handshake parameters.
fn return_to(url: &Url) -> Url {
    let mut url = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != HANDSHAKE_PARAM && name != HANDSHAKE_STATE_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
}
