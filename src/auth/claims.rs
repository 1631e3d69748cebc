// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims.
//!
//! [`RawClaims`] mirrors the wire payload with every field optional so that a
//! missing claim becomes a `MalformedToken` during validation instead of an
//! opaque decode error. [`Claims`] is the validated form handed to callers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::token_kind::TokenKind;

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Token payload as found on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Session ID (session tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Active organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Impersonation actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<serde_json::Value>,
    /// Authorized party (origin that requested the token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
}

/// Verified token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    /// Token issuer (`iss`)
    pub issuer: String,
    /// User or machine ID (`sub`)
    pub subject: String,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
    /// Not-before (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<i64>,
    /// Issued-at (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    /// Audiences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,
    /// Session ID (always present for session tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub actor: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_party: Option<String>,
}

impl Claims {
    /// Whether the token was minted before the client's last session change.
    pub fn is_older_than(&self, unix_secs: i64) -> bool {
        self.issued_at.is_some_and(|iat| iat < unix_secs)
    }

    /// Whether this is an impersonated session.
    pub fn is_impersonated(&self) -> bool {
        self.actor.is_some()
    }
}

/// Identity attached to a request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedSession {
    pub kind: TokenKind,
    pub claims: Claims,
}

impl AuthenticatedSession {
    pub fn new(claims: Claims, kind: TokenKind) -> Self {
        Self { kind, claims }
    }

    /// User ID for sessions, machine ID for machine tokens.
    pub fn subject(&self) -> &str {
        &self.claims.subject
    }

    pub fn session_id(&self) -> Option<&str> {
        self.claims.session_id.as_deref()
    }

    pub fn is_machine(&self) -> bool {
        self.kind.is_machine()
    }
}
