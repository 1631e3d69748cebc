// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request orchestration.
//!
//! [`AuthEngine::resolve`] turns what a request carries into an
//! [`AuthOutcome`]. It owns no state of its own beyond handles to the shared
//! caches, so one engine serves every request concurrently.

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use super::error::VerifyError;
use super::handshake::{HandshakeContext, HandshakeProtocol, HandshakeResolution, HandshakeTrigger};
use super::outcome::{AuthOutcome, InvalidReason, SignedOutReason};
use super::token_kind::TokenKind;
use super::verifier::JwtVerifier;
use crate::clock::SkewPolicy;

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `Authorization: Bearer`
    Header,
    /// `__session` cookie
    Cookie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

impl Credential {
    pub fn header(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source: CredentialSource::Header,
        }
    }

    pub fn cookie(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source: CredentialSource::Cookie,
        }
    }
}

/// Everything the engine looks at for one request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub credential: Option<Credential>,
    /// `Host` header
    pub host: String,
    /// Full request URL
    pub url: Url,
    /// Value of the `__clerk_handshake` query parameter
    pub handshake_param: Option<String>,
    /// Value of the `__client_uat` cookie
    pub client_uat: Option<i64>,
    /// `Referer` header
    pub referrer: Option<String>,
    pub now: DateTime<Utc>,
}

impl AuthRequest {
    /// A request for `url` with nothing attached.
    pub fn new(url: Url, now: DateTime<Utc>) -> Self {
        Self {
            credential: None,
            host: url.host_str().unwrap_or_default().to_string(),
            url,
            handshake_param: None,
            client_uat: None,
            referrer: None,
            now,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// `client_uat` of zero means signed out and is dropped.
    pub fn signed_in_at(&self) -> Option<i64> {
        self.client_uat.filter(|uat| *uat > 0)
    }
}

/// Request authentication engine.
#[derive(Clone)]
pub struct AuthEngine {
    verifier: JwtVerifier,
    handshake: HandshakeProtocol,
    skew: SkewPolicy,
}

impl AuthEngine {
    pub fn new(verifier: JwtVerifier, handshake: HandshakeProtocol) -> Self {
        Self {
            verifier,
            handshake,
            skew: SkewPolicy::default(),
        }
    }

    pub fn with_skew(mut self, skew: SkewPolicy) -> Self {
        self.skew = skew;
        self
    }

    pub fn verifier(&self) -> &JwtVerifier {
        &self.verifier
    }

    /// Authenticate one request.
    pub async fn resolve(&self, request: &AuthRequest) -> AuthOutcome {
        let outcome = self.evaluate(request).await;
        debug!(
            outcome = outcome.label(),
            host = %request.host,
            path = request.url.path(),
            "Request authenticated"
        );
        outcome
    }

    async fn evaluate(&self, request: &AuthRequest) -> AuthOutcome {
        let ctx = HandshakeContext {
            url: &request.url,
            host: &request.host,
            now: request.now.timestamp(),
            skew: self.skew,
        };

        if let Some(response) = &request.handshake_param {
            let resolution = self.handshake.complete(response, &ctx).await;
            return outcome_for(resolution);
        }

        let Some(credential) = &request.credential else {
            return match self.signal_without_token(request) {
                Some(trigger) => self.start_handshake(&ctx, trigger).await,
                None => AuthOutcome::signed_out(SignedOutReason::NoCredential),
            };
        };

        let kind = TokenKind::classify(&credential.token);
        if kind == TokenKind::Unknown {
            return AuthOutcome::invalid(InvalidReason::MalformedToken);
        }
        let handshake_eligible =
            kind == TokenKind::SessionToken && credential.source == CredentialSource::Cookie;

        match self
            .verifier
            .verify(&credential.token, kind, ctx.now, self.skew)
            .await
        {
            Ok(claims) => {
                let outdated = handshake_eligible
                    && request
                        .signed_in_at()
                        .is_some_and(|uat| claims.is_older_than(uat));
                if outdated {
                    return self
                        .start_handshake(&ctx, HandshakeTrigger::SessionTokenOutdated)
                        .await;
                }
                AuthOutcome::SignedIn {
                    claims,
                    kind,
                    sync: None,
                }
            }
            Err(e) if handshake_eligible && e.is_recoverable_by_handshake() => {
                let trigger = match e {
                    VerifyError::KeyNotFound => HandshakeTrigger::KeyNotFound,
                    _ => HandshakeTrigger::TokenExpired,
                };
                self.start_handshake(&ctx, trigger).await
            }
            Err(VerifyError::Expired) => AuthOutcome::signed_out(SignedOutReason::TokenExpired),
            Err(e) => AuthOutcome::invalid(
                InvalidReason::from_verify_error(&e).unwrap_or(InvalidReason::MalformedToken),
            ),
        }
    }

    /// Signals that a client without a token may still have a session.
    fn signal_without_token(&self, request: &AuthRequest) -> Option<HandshakeTrigger> {
        if request.signed_in_at().is_some() {
            return Some(HandshakeTrigger::SessionTokenMissing);
        }

        let from_dev_portal = request
            .referrer
            .as_deref()
            .and_then(|referrer| Url::parse(referrer).ok())
            .and_then(|referrer| referrer.host_str().map(str::to_string))
            .is_some_and(|host| self.handshake.origins().is_dev_portal_origin(&host));
        from_dev_portal.then_some(HandshakeTrigger::DevPortalReturn)
    }

    async fn start_handshake(
        &self,
        ctx: &HandshakeContext<'_>,
        trigger: HandshakeTrigger,
    ) -> AuthOutcome {
        outcome_for(self.handshake.begin(ctx, trigger, 0).await)
    }
}

fn outcome_for(resolution: HandshakeResolution) -> AuthOutcome {
    match resolution {
        HandshakeResolution::Required { redirect_target } => {
            AuthOutcome::HandshakeRequired { redirect_target }
        }
        HandshakeResolution::Resolved { claims, sync } => AuthOutcome::SignedIn {
            claims,
            kind: TokenKind::SessionToken,
            sync,
        },
        HandshakeResolution::SignedOut => {
            AuthOutcome::signed_out(SignedOutReason::HandshakeSignedOut)
        }
        HandshakeResolution::Rejected { reason } => AuthOutcome::invalid(reason),
        HandshakeResolution::FailClosed { trigger } => match trigger {
            HandshakeTrigger::KeyNotFound => AuthOutcome::invalid(InvalidReason::KeyNotFound),
            HandshakeTrigger::TokenExpired => {
                AuthOutcome::signed_out(SignedOutReason::TokenExpired)
            }
            HandshakeTrigger::SessionTokenOutdated => {
                AuthOutcome::signed_out(SignedOutReason::SessionTokenOutdated)
            }
            HandshakeTrigger::SessionTokenMissing => {
                AuthOutcome::signed_out(SignedOutReason::SessionTokenMissing)
            }
            HandshakeTrigger::DevPortalReturn => {
                AuthOutcome::signed_out(SignedOutReason::DevPortalReturn)
            }
        },
    }
}
