// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token kind classification.
//!
//! Classification is a cheap prefix dispatch done before any cryptographic
//! work. It never looks at signatures or claims.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prefix for machine-to-machine tokens.
pub const M2M_PREFIX: &str = "m2m_";
/// Prefix for OAuth access tokens.
pub const OAUTH_PREFIX: &str = "oauth_";
/// Prefix for API key tokens.
pub const API_KEY_PREFIX: &str = "api_key_";

/// Kind of bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Interactive browser session token (a bare JWT)
    SessionToken,
    /// Machine-to-machine token (`m2m_`)
    MachineToM2M,
    /// OAuth access token (`oauth_`)
    OAuthToken,
    /// API key (`api_key_`)
    ApiKeyToken,
    /// Anything that is neither prefixed nor JWT-shaped
    Unknown,
}

/// Prefix table, checked in order.
const PREFIXES: [(&str, TokenKind); 3] = [
    (M2M_PREFIX, TokenKind::MachineToM2M),
    (OAUTH_PREFIX, TokenKind::OAuthToken),
    (API_KEY_PREFIX, TokenKind::ApiKeyToken),
];

impl TokenKind {
    /// Classify a raw credential.
    pub fn classify(credential: &str) -> TokenKind {
        for (prefix, kind) in PREFIXES {
            if credential.starts_with(prefix) {
                return kind;
            }
        }

        if looks_like_jwt(credential) {
            TokenKind::SessionToken
        } else {
            TokenKind::Unknown
        }
    }

    /// Whether this kind is a non-interactive credential.
    pub fn is_machine(&self) -> bool {
        matches!(
            self,
            TokenKind::MachineToM2M | TokenKind::OAuthToken | TokenKind::ApiKeyToken
        )
    }

    /// Literal prefix for machine kinds.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            TokenKind::MachineToM2M => Some(M2M_PREFIX),
            TokenKind::OAuthToken => Some(OAUTH_PREFIX),
            TokenKind::ApiKeyToken => Some(API_KEY_PREFIX),
            TokenKind::SessionToken | TokenKind::Unknown => None,
        }
    }

    /// Strip the kind's prefix, returning the JWT body.
    pub fn strip<'a>(&self, credential: &'a str) -> &'a str {
        match self.prefix() {
            Some(prefix) => credential.strip_prefix(prefix).unwrap_or(credential),
            None => credential,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::SessionToken => "session_token",
            TokenKind::MachineToM2M => "m2m_token",
            TokenKind::OAuthToken => "oauth_token",
            TokenKind::ApiKeyToken => "api_key",
            TokenKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three dot-separated base64url segments with non-empty header and payload.
/// The signature may be empty; verification rejects it later.
fn looks_like_jwt(credential: &str) -> bool {
    let mut segments = credential.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return false;
    };

    !header.is_empty()
        && !payload.is_empty()
        && [header, payload, signature]
            .iter()
            .all(|s| s.bytes().all(is_base64url))
}

fn is_base64url(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
