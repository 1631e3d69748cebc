// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated sessions.
//!
//! Use the `Auth` extractor in handlers behind [`auth_middleware`]:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(session): Auth) -> impl IntoResponse {
//!     // session is AuthenticatedSession
//! }
//! ```
//!
//! [`auth_middleware`]: super::middleware::auth_middleware

use axum::{extract::FromRequestParts, http::request::Parts};

use super::claims::AuthenticatedSession;
use super::error::AuthRejection;

/// Extractor for the session attached by the middleware.
///
/// Rejects with `401` if the route is not behind the middleware.
pub struct Auth(pub AuthenticatedSession);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSession>()
            .cloned()
            .map(Auth)
            .ok_or(AuthRejection::Unauthenticated)
    }
}

/// Extractor that only accepts interactive sessions, not machine tokens.
pub struct SessionOnly(pub AuthenticatedSession);

impl<S: Send + Sync> FromRequestParts<S> for SessionOnly {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Auth(session) = Auth::from_request_parts(parts, state).await?;

        if session.is_machine() {
            return Err(AuthRejection::Unauthenticated);
        }

        Ok(SessionOnly(session))
    }
}
