// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT verification.
//!
//! ## Order of checks
//!
//! 1. Structure: three segments, JSON header and payload. No I/O happens for
//!    a malformed token.
//! 2. `alg: none` or an empty signature is rejected as `SignatureInvalid`.
//! 3. Key lookup by `kid`. A cache miss refreshes the key set once, which
//!    picks up rotated keys.
//! 4. Signature.
//! 5. Claims: required fields, expiry, not-before (with skew), issuer,
//!    audience, then the session id for session tokens.
//!
//! Time checks use the caller's `now`; the system clock is never consulted.

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::claims::{Claims, RawClaims};
use super::error::VerifyError;
use super::jwks::{KeyNamespace, KeyResolver};
use super::token_kind::TokenKind;
use crate::clock::SkewPolicy;

/// Which issuers are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IssuerPolicy {
    /// Hosted instance issuers: `https://clerk.*` or `*.clerk.accounts*`.
    #[default]
    HostedDefault,
    /// Exactly this issuer.
    Exact(String),
}

impl IssuerPolicy {
    pub fn is_trusted(&self, issuer: &str) -> bool {
        match self {
            IssuerPolicy::HostedDefault => {
                issuer.starts_with("https://clerk.") || issuer.contains(".clerk.accounts")
            }
            IssuerPolicy::Exact(expected) => issuer == expected,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SegmentHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// A token split into its parts, not yet trusted.
struct ParsedToken {
    header: SegmentHeader,
    signed: bool,
}

/// Verifies session and machine tokens for one instance.
#[derive(Clone)]
pub struct JwtVerifier {
    keys: KeyResolver,
    instance_id: String,
    issuer: IssuerPolicy,
    audience: Option<String>,
}

impl JwtVerifier {
    pub fn new(keys: KeyResolver, instance_id: impl Into<String>) -> Self {
        Self {
            keys,
            instance_id: instance_id.into(),
            issuer: IssuerPolicy::default(),
            audience: None,
        }
    }

    pub fn with_issuer(mut self, issuer: IssuerPolicy) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn keys(&self) -> &KeyResolver {
        &self.keys
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Verify `credential` as a token of `kind`.
    pub async fn verify(
        &self,
        credential: &str,
        kind: TokenKind,
        now: i64,
        skew: SkewPolicy,
    ) -> Result<Claims, VerifyError> {
        let namespace = match kind {
            TokenKind::SessionToken => KeyNamespace::Session,
            TokenKind::MachineToM2M | TokenKind::OAuthToken | TokenKind::ApiKeyToken => {
                KeyNamespace::Machine
            }
            TokenKind::Unknown => return Err(VerifyError::MalformedToken),
        };

        let raw: RawClaims = self
            .verify_signed(kind.strip(credential), namespace)
            .await
            .inspect_err(|e| debug!(kind = %kind, error_code = e.error_code(), "Token rejected"))?;

        self.validate_claims(raw, kind, now, skew)
    }

    /// Check structure and signature of `token` against `namespace` keys and
    /// decode its payload. Claims are not validated.
    pub(crate) async fn verify_signed<T: DeserializeOwned>(
        &self,
        token: &str,
        namespace: KeyNamespace,
    ) -> Result<T, VerifyError> {
        let parsed = parse(token)?;

        if !parsed.signed || parsed.header.alg.eq_ignore_ascii_case("none") {
            return Err(VerifyError::SignatureInvalid);
        }

        let key_id = parsed
            .header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(VerifyError::MalformedToken)?;

        // A miss refreshes the key set, so `KeyNotFound` is already final.
        let key = self
            .keys
            .resolve(namespace, &self.instance_id, key_id, false)
            .await?;

        let mut validation = Validation::new(key.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let data = decode::<T>(token, &key.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => VerifyError::SignatureInvalid,
            _ => VerifyError::MalformedToken,
        })?;

        Ok(data.claims)
    }

    /// Apply the claim rules for `kind` to an already authenticated payload.
    pub fn validate_claims(
        &self,
        raw: RawClaims,
        kind: TokenKind,
        now: i64,
        skew: SkewPolicy,
    ) -> Result<Claims, VerifyError> {
        let subject = raw
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(VerifyError::MalformedToken)?;
        let expires_at = raw.exp.ok_or(VerifyError::MalformedToken)?;

        if skew.is_expired(expires_at, now) {
            return Err(VerifyError::Expired);
        }
        if let Some(nbf) = raw.nbf {
            if skew.is_not_yet_valid(nbf, now) {
                return Err(VerifyError::NotYetValid);
            }
        }

        let issuer = raw.iss.unwrap_or_default();
        if !self.issuer.is_trusted(&issuer) {
            return Err(VerifyError::IssuerInvalid);
        }

        let audience = raw.aud.map(|a| a.into_vec()).unwrap_or_default();
        if let Some(expected) = &self.audience {
            if !audience.iter().any(|aud| aud == expected) {
                return Err(VerifyError::AudienceInvalid);
            }
        }

        let session_id = if kind == TokenKind::SessionToken {
            Some(
                raw.sid
                    .filter(|s| !s.is_empty())
                    .ok_or(VerifyError::MalformedToken)?,
            )
        } else {
            None
        };

        Ok(Claims {
            issuer,
            subject,
            expires_at,
            not_before: raw.nbf,
            issued_at: raw.iat,
            audience,
            session_id,
            org_id: raw.org_id,
            actor: raw.act,
            authorized_party: raw.azp,
        })
    }
}

fn parse(token: &str) -> Result<ParsedToken, VerifyError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerifyError::MalformedToken);
    };

    let header: SegmentHeader = decode_segment(header)?;
    let _: serde_json::Map<String, serde_json::Value> = decode_segment(payload)?;

    Ok(ParsedToken {
        header,
        signed: !signature.is_empty(),
    })
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, VerifyError> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| VerifyError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| VerifyError::MalformedToken)
}
