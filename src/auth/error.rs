// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Three layers:
//!
//! - [`KeySourceError`]: a single upstream key fetch failed.
//! - [`KeyResolutionError`]: the key resolver gave up (retries exhausted or
//!   the key id is unknown).
//! - [`VerifyError`]: token verification failed.
//!
//! [`AuthRejection`] is what the HTTP layer sends back when a request is not
//! let through.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::outcome::{InvalidReason, SignedOutReason};
use crate::retry::Retryable;

/// Failure of one upstream key fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySourceError {
    /// Connection, timeout or TLS failure
    #[error("network error: {0}")]
    Network(String),
    /// Non-success HTTP status
    #[error("HTTP {0} from key endpoint")]
    Status(u16),
    /// Response body is not a usable key set
    #[error("invalid key set: {0}")]
    Decode(String),
}

impl Retryable for KeySourceError {
    fn is_retryable(&self) -> bool {
        match self {
            KeySourceError::Network(_) => true,
            KeySourceError::Status(status) => *status >= 500 || *status == 429,
            KeySourceError::Decode(_) => false,
        }
    }
}

/// Key resolution failure surfaced to the verifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyResolutionError {
    /// Upstream unreachable after the retry budget was spent
    #[error("key source unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },
    /// The fetched key set has no key with this id
    #[error("no key with id '{key_id}'")]
    KeyNotFound { key_id: String },
    /// Fetch abandoned because the resolver is shutting down
    #[error("key fetch cancelled")]
    Cancelled,
}

/// Token verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("token is not yet valid")]
    NotYetValid,
    #[error("token issuer is invalid")]
    IssuerInvalid,
    #[error("token audience is invalid")]
    AudienceInvalid,
    #[error("no verification key matches the token")]
    KeyNotFound,
    #[error("verification keys are unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl VerifyError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            VerifyError::MalformedToken => "malformed_token",
            VerifyError::SignatureInvalid => "signature_invalid",
            VerifyError::Expired => "token_expired",
            VerifyError::NotYetValid => "token_not_yet_valid",
            VerifyError::IssuerInvalid => "issuer_invalid",
            VerifyError::AudienceInvalid => "audience_invalid",
            VerifyError::KeyNotFound => "key_not_found",
            VerifyError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerifyError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Whether a handshake could plausibly fix this failure.
    ///
    /// Forged, foreign or broken tokens are untrusted, not stale.
    pub fn is_recoverable_by_handshake(&self) -> bool {
        matches!(self, VerifyError::Expired | VerifyError::KeyNotFound)
    }
}

impl From<KeyResolutionError> for VerifyError {
    fn from(err: KeyResolutionError) -> Self {
        match err {
            KeyResolutionError::KeyNotFound { .. } => VerifyError::KeyNotFound,
            other => VerifyError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// Request refused by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("{0}")]
    SignedOut(SignedOutReason),
    #[error("{reason}")]
    Invalid {
        reason: InvalidReason,
        status: StatusCode,
    },
    /// A handler asked for an identity the middleware never attached.
    #[error("Authentication required")]
    Unauthenticated,
}

impl AuthRejection {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthRejection::SignedOut(reason) => reason.error_code(),
            AuthRejection::Invalid { reason, .. } => reason.error_code(),
            AuthRejection::Unauthenticated => "unauthenticated",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthRejection::Invalid { status, .. } => *status,
            AuthRejection::SignedOut(_) | AuthRejection::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
        }
    }
}

/// JSON body of an auth rejection.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthErrorBody {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
