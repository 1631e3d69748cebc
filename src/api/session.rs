// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;

use crate::auth::{Auth, AuthenticatedSession};

/// Get the current session.
///
/// Returns the verified identity of the caller. Browsers with a stale
/// session cookie are redirected through the handshake first.
#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Session",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Authenticated session", body = AuthenticatedSession),
        (status = 307, description = "Session must be resynchronized through the handshake"),
        (status = 401, description = "Not authenticated", body = crate::auth::error::AuthErrorBody),
        (status = 503, description = "Key service unavailable", body = crate::auth::error::AuthErrorBody)
    )
)]
pub async fn current_session(Auth(session): Auth) -> Json<AuthenticatedSession> {
    Json(session)
}
