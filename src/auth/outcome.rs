// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Result of authenticating one request.

use axum::http::StatusCode;
use url::Url;

use super::claims::Claims;
use super::error::VerifyError;
use super::handshake::SessionSync;
use super::token_kind::TokenKind;

/// Outcome of [`AuthEngine::resolve`](super::engine::AuthEngine::resolve).
///
/// Callers map the variants to HTTP:
///
/// | Variant | Response |
/// |---------|----------|
/// | `SignedIn` | continue with the identity |
/// | `SignedIn` with `sync` | set the session cookies, 307 to `sync.return_to` |
/// | `SignedOut` | 401 |
/// | `HandshakeRequired` | 307 redirect |
/// | `Invalid` | `http_status` |
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    SignedIn {
        claims: Claims,
        kind: TokenKind,
        /// Present when a handshake just completed with a fresh session
        sync: Option<SessionSync>,
    },
    SignedOut { reason: SignedOutReason },
    HandshakeRequired { redirect_target: Url },
    Invalid { reason: InvalidReason, http_status: StatusCode },
}

impl AuthOutcome {
    pub fn signed_out(reason: SignedOutReason) -> Self {
        AuthOutcome::SignedOut { reason }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        AuthOutcome::Invalid {
            http_status: reason.status_code(),
            reason,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthOutcome::SignedIn { .. })
    }

    /// Claims of a signed-in outcome.
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            AuthOutcome::SignedIn { claims, .. } => Some(claims),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            AuthOutcome::SignedIn { .. } => "signed_in",
            AuthOutcome::SignedOut { .. } => "signed_out",
            AuthOutcome::HandshakeRequired { .. } => "handshake",
            AuthOutcome::Invalid { .. } => "invalid",
        }
    }
}

/// Why a request is unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedOutReason {
    /// No credential and nothing suggesting the client is signed in
    NoCredential,
    /// The token has expired and cannot be refreshed by a handshake
    TokenExpired,
    /// The token predates the client's last session change
    SessionTokenOutdated,
    /// The client claims a session but sent no token
    SessionTokenMissing,
    /// The client arrived from a development account portal without a token
    DevPortalReturn,
    /// The handshake completed and the authoritative state is signed out
    HandshakeSignedOut,
}

impl SignedOutReason {
    pub fn error_code(&self) -> &'static str {
        match self {
            SignedOutReason::NoCredential => "no_credential",
            SignedOutReason::TokenExpired => "token_expired",
            SignedOutReason::SessionTokenOutdated => "session_token_outdated",
            SignedOutReason::SessionTokenMissing => "session_token_missing",
            SignedOutReason::DevPortalReturn => "dev_portal_return",
            SignedOutReason::HandshakeSignedOut => "handshake_signed_out",
        }
    }
}

impl std::fmt::Display for SignedOutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignedOutReason::NoCredential => write!(f, "No credential was provided"),
            SignedOutReason::TokenExpired => write!(f, "Session token has expired"),
            SignedOutReason::SessionTokenOutdated => write!(f, "Session token is outdated"),
            SignedOutReason::SessionTokenMissing => write!(f, "Session token is missing"),
            SignedOutReason::DevPortalReturn => {
                write!(f, "Session must be synchronized from the account portal")
            }
            SignedOutReason::HandshakeSignedOut => write!(f, "Session has ended"),
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MalformedToken,
    SignatureInvalid,
    IssuerInvalid,
    AudienceInvalid,
    NotYetValid,
    KeyNotFound,
    /// Keys could not be fetched; a service-side failure
    UpstreamUnavailable,
    /// A handshake would have been started twice for one request chain
    HandshakeLoopDetected,
    /// Instance configuration for the redirect could not be loaded
    HandshakeUnavailable,
    /// The handshake response failed verification
    HandshakeInvalid,
}

impl InvalidReason {
    /// Reason for a verification failure that ends the request.
    ///
    /// Returns `None` for [`VerifyError::Expired`], which is never a refusal
    /// on its own: it leads to a handshake or a signed-out outcome.
    pub fn from_verify_error(error: &VerifyError) -> Option<Self> {
        Some(match error {
            VerifyError::MalformedToken => InvalidReason::MalformedToken,
            VerifyError::SignatureInvalid => InvalidReason::SignatureInvalid,
            VerifyError::NotYetValid => InvalidReason::NotYetValid,
            VerifyError::IssuerInvalid => InvalidReason::IssuerInvalid,
            VerifyError::AudienceInvalid => InvalidReason::AudienceInvalid,
            VerifyError::KeyNotFound => InvalidReason::KeyNotFound,
            VerifyError::UpstreamUnavailable(_) => InvalidReason::UpstreamUnavailable,
            VerifyError::Expired => return None,
        })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            InvalidReason::MalformedToken => "malformed_token",
            InvalidReason::SignatureInvalid => "signature_invalid",
            InvalidReason::IssuerInvalid => "issuer_invalid",
            InvalidReason::AudienceInvalid => "audience_invalid",
            InvalidReason::NotYetValid => "token_not_yet_valid",
            InvalidReason::KeyNotFound => "key_not_found",
            InvalidReason::UpstreamUnavailable => "upstream_unavailable",
            InvalidReason::HandshakeLoopDetected => "handshake_loop_detected",
            InvalidReason::HandshakeUnavailable => "handshake_unavailable",
            InvalidReason::HandshakeInvalid => "handshake_invalid",
        }
    }

    /// Service-side failures are 503; everything else is the caller's.
    pub fn status_code(&self) -> StatusCode {
        match self {
            InvalidReason::UpstreamUnavailable | InvalidReason::HandshakeUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::MalformedToken => write!(f, "Token is malformed"),
            InvalidReason::SignatureInvalid => write!(f, "Token signature is invalid"),
            InvalidReason::IssuerInvalid => write!(f, "Token issuer is invalid"),
            InvalidReason::AudienceInvalid => write!(f, "Token audience is invalid"),
            InvalidReason::NotYetValid => write!(f, "Token is not yet valid"),
            InvalidReason::KeyNotFound => write!(f, "No matching verification key"),
            InvalidReason::UpstreamUnavailable => {
                write!(f, "Authentication service is temporarily unavailable")
            }
            InvalidReason::HandshakeLoopDetected => {
                write!(f, "Session synchronization is looping")
            }
            InvalidReason::HandshakeUnavailable => {
                write!(f, "Session synchronization is temporarily unavailable")
            }
            InvalidReason::HandshakeInvalid => write!(f, "Session synchronization response is invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_picks_status_from_reason() {
        assert_eq!(
            AuthOutcome::invalid(InvalidReason::UpstreamUnavailable),
            AuthOutcome::Invalid {
                reason: InvalidReason::UpstreamUnavailable,
                http_status: StatusCode::SERVICE_UNAVAILABLE
            }
        );
        assert_eq!(
            InvalidReason::HandshakeUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(InvalidReason::SignatureInvalid.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            InvalidReason::HandshakeLoopDetected.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn verify_errors_map_to_reasons() {
        assert_eq!(
            InvalidReason::from_verify_error(&VerifyError::UpstreamUnavailable("down".into())),
            Some(InvalidReason::UpstreamUnavailable)
        );
        assert_eq!(
            InvalidReason::from_verify_error(&VerifyError::KeyNotFound),
            Some(InvalidReason::KeyNotFound)
        );
        assert_eq!(InvalidReason::from_verify_error(&VerifyError::Expired), None);
    }

    #[test]
    fn labels() {
        assert_eq!(AuthOutcome::signed_out(SignedOutReason::NoCredential).label(), "signed_out");
        assert!(!AuthOutcome::signed_out(SignedOutReason::NoCredential).is_signed_in());
        assert!(AuthOutcome::signed_out(SignedOutReason::NoCredential).claims().is_none());
    }
}
