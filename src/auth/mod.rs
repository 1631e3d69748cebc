// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Decides, per request, whether the caller is signed in, signed out, must be
//! sent through a handshake redirect, or is refused.
//!
//! ## Auth Flow
//!
//! 1. The adapter collects the credential (`Authorization: Bearer` or the
//!    `__session` cookie), `__client_uat`, `Host`, `Referer` and the
//!    `__clerk_handshake` query parameter into an [`AuthRequest`].
//! 2. [`AuthEngine::resolve`]:
//!    - classifies the credential by prefix ([`TokenKind`])
//!    - resolves the signing key by `kid` through the shared key cache
//!    - verifies signature, expiry, not-before, issuer, audience
//!    - on a stale cookie session, starts or completes a handshake
//! 3. The result is an [`AuthOutcome`] which the middleware maps to HTTP.
//!
//! ## Security
//!
//! - Unsigned tokens and `alg: none` are rejected before any key lookup
//! - Key fetches are coalesced per key and retried with bounded backoff
//! - Handshake state is signed and time-bounded; one handshake per chain
//! - Clock skew tolerance defaults to 5 seconds and applies to `nbf` only

pub mod claims;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod handshake;
pub mod instance;
pub mod jwks;
pub mod middleware;
pub mod origin;
pub mod outcome;
pub mod token_kind;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use claims::{AuthenticatedSession, Claims};
pub use engine::{AuthEngine, AuthRequest, Credential, CredentialSource};
pub use error::{AuthRejection, KeyResolutionError, KeySourceError, VerifyError};
pub use extractor::{Auth, SessionOnly};
pub use handshake::{HandshakeProtocol, HandshakeTrigger, SessionSync};
pub use instance::{HttpInstanceDirectory, InstanceConfig, InstanceDirectory, StaticInstanceDirectory};
pub use jwks::{HttpKeySource, KeyNamespace, KeyResolver, KeyResolverConfig, KeySource};
pub use origin::OriginCache;
pub use outcome::{AuthOutcome, InvalidReason, SignedOutReason};
pub use token_kind::TokenKind;
pub use verifier::{IssuerPolicy, JwtVerifier};
