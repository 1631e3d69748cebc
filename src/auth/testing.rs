// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for auth tests: an in-memory key source with a fetch
//! counter and helpers to mint HS256 tokens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::future::BoxFuture;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use super::claims::RawClaims;
use super::error::KeySourceError;
use super::jwks::{KeyNamespace, KeySource};

pub const INSTANCE_ID: &str = "ins_test";
pub const ISSUER: &str = "https://clerk.example.com";
pub const NOW: i64 = 1_700_000_000;

pub const SESSION_KID: &str = "ins_session_key";
pub const SESSION_SECRET: &[u8] = b"session-signing-secret";
pub const MACHINE_KID: &str = "ins_machine_key";
pub const MACHINE_SECRET: &[u8] = b"machine-signing-secret";
pub const HANDSHAKE_KID: &str = "ins_handshake_key";
pub const HANDSHAKE_SECRET: &[u8] = b"handshake-response-secret";

/// Symmetric JWK for tests.
pub fn oct_jwk(kid: &str, secret: &[u8]) -> Jwk {
    serde_json::from_value(serde_json::json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "k": URL_SAFE_NO_PAD.encode(secret),
    }))
    .unwrap()
}

/// Key source serving fixed sets per namespace and counting fetches.
pub struct CountingKeySource {
    state: Mutex<Result<Vec<Jwk>, KeySourceError>>,
    machine: Mutex<Option<Vec<Jwk>>>,
    fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl CountingKeySource {
    pub fn with_keys(keys: Vec<Jwk>) -> Self {
        Self {
            state: Mutex::new(Ok(keys)),
            machine: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            latency: None,
        }
    }

    pub fn failing(error: KeySourceError) -> Self {
        Self {
            state: Mutex::new(Err(error)),
            ..Self::with_keys(vec![])
        }
    }

    /// Session, machine and handshake keys, each in its own namespace.
    pub fn standard() -> Self {
        let source = Self::with_keys(vec![
            oct_jwk(SESSION_KID, SESSION_SECRET),
            oct_jwk(HANDSHAKE_KID, HANDSHAKE_SECRET),
        ]);
        *source.machine.lock().unwrap() = Some(vec![oct_jwk(MACHINE_KID, MACHINE_SECRET)]);
        source
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_keys(&self, keys: Vec<Jwk>) {
        *self.state.lock().unwrap() = Ok(keys);
    }

    pub fn fail_with(&self, error: KeySourceError) {
        *self.state.lock().unwrap() = Err(error);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl KeySource for CountingKeySource {
    fn fetch_key_set<'a>(
        &'a self,
        namespace: KeyNamespace,
        _instance_id: &'a str,
    ) -> BoxFuture<'a, Result<JwkSet, KeySourceError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let machine = self.machine.lock().unwrap().clone();
        let result = match (namespace, machine) {
            (KeyNamespace::Machine, Some(keys)) => Ok(keys),
            _ => self.state.lock().unwrap().clone(),
        };
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            result.map(|keys| JwkSet { keys })
        })
    }
}

/// Valid session claims relative to [`NOW`].
pub fn session_claims() -> RawClaims {
    RawClaims {
        iss: Some(ISSUER.to_string()),
        sub: Some("user_123".to_string()),
        exp: Some(NOW + 60),
        nbf: Some(NOW - 10),
        iat: Some(NOW - 10),
        sid: Some("sess_123".to_string()),
        ..Default::default()
    }
}

/// Valid machine claims relative to [`NOW`].
pub fn machine_claims() -> RawClaims {
    RawClaims {
        iss: Some(ISSUER.to_string()),
        sub: Some("mch_123".to_string()),
        exp: Some(NOW + 60),
        iat: Some(NOW - 10),
        ..Default::default()
    }
}

/// Sign `claims` with HS256 under `kid`.
pub fn sign<T: Serialize>(claims: &T, kid: &str, secret: &[u8]) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

pub fn session_token(claims: &RawClaims) -> String {
    sign(claims, SESSION_KID, SESSION_SECRET)
}

pub fn machine_token(prefix: &str, claims: &RawClaims) -> String {
    format!("{prefix}{}", sign(claims, MACHINE_KID, MACHINE_SECRET))
}

/// Assemble a token from raw JSON parts and a literal signature segment.
pub fn raw_token(header: &str, payload: &str, signature: &str) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.as_bytes()),
        URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        signature
    )
}
