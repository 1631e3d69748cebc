// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Collects what a request carries into an [`AuthRequest`], runs the engine
//! and either lets the request through with an [`AuthenticatedSession`] in
//! its extensions or answers it directly:
//!
//! | Outcome | Response |
//! |---------|----------|
//! | `SignedIn` | handler runs |
//! | `SignedIn` after a handshake | `307` to the clean URL with `Set-Cookie` |
//! | `HandshakeRequired` | `307 Temporary Redirect` |
//! | `SignedOut` | `401` JSON |
//! | `Invalid` | `401`/`503` JSON |
//!
//! Requests whose `Host` is not in [`AppState::allowed_hosts`] are refused
//! with `400`, since handshake return URLs are built from it.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));
//! ```

use axum::{
    extract::{Request, State},
    http::{
        header::{AsHeaderName, AUTHORIZATION, COOKIE, HOST, REFERER, SET_COOKIE},
        HeaderMap, HeaderName, StatusCode, Uri,
    },
    middleware::Next,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use tracing::warn;
use url::Url;

use super::claims::AuthenticatedSession;
use super::engine::{AuthRequest, Credential};
use super::error::AuthRejection;
use super::handshake::{SessionSync, HANDSHAKE_PARAM};
use super::outcome::AuthOutcome;
use crate::state::AppState;

/// Cookie holding the session token.
pub const SESSION_COOKIE: &str = "__session";

/// Cookie holding the client's last session change (Unix seconds).
pub const CLIENT_UAT_COOKIE: &str = "__client_uat";

/// Header set by TLS-terminating proxies.
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Authentication middleware function.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth_request) = auth_request_from(request.headers(), request.uri(), &state) else {
        warn!(uri = %request.uri(), "Cannot reconstruct request URL");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.engine.resolve(&auth_request).await {
        AuthOutcome::SignedIn {
            sync: Some(sync), ..
        } => (
            AppendHeaders(session_cookies(&sync)),
            Redirect::temporary(sync.return_to.as_str()),
        )
            .into_response(),
        AuthOutcome::SignedIn { claims, kind, .. } => {
            request
                .extensions_mut()
                .insert(AuthenticatedSession::new(claims, kind));
            next.run(request).await
        }
        AuthOutcome::HandshakeRequired { redirect_target } => {
            Redirect::temporary(redirect_target.as_str()).into_response()
        }
        AuthOutcome::SignedOut { reason } => AuthRejection::SignedOut(reason).into_response(),
        AuthOutcome::Invalid {
            reason,
            http_status,
        } => AuthRejection::Invalid {
            reason,
            status: http_status,
        }
        .into_response(),
    }
}

fn auth_request_from(
    headers: &HeaderMap,
    uri: &Uri,
    state: &AppState,
) -> Option<AuthRequest> {
    let host = header_str(headers, HOST)
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))?;
    if !state.is_allowed_host(&host) {
        warn!(host = %host, "Host is not allowed");
        return None;
    }
    let scheme = header_str(headers, FORWARDED_PROTO)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| uri.scheme_str())
        .filter(|scheme| matches!(*scheme, "http" | "https"))
        .unwrap_or("https");
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = Url::parse(&format!("{scheme}://{host}{path_and_query}")).ok()?;

    let handshake_param = url
        .query_pairs()
        .find(|(name, _)| name == HANDSHAKE_PARAM)
        .map(|(_, value)| value.into_owned());

    let bearer = header_str(headers, AUTHORIZATION)
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Credential::header);
    let credential = bearer.or_else(|| cookie(headers, SESSION_COOKIE).map(Credential::cookie));

    Some(AuthRequest {
        credential,
        host,
        url,
        handshake_param,
        client_uat: cookie(headers, CLIENT_UAT_COOKIE).and_then(|v| v.parse().ok()),
        referrer: header_str(headers, REFERER).map(str::to_string),
        now: state.clock.now(),
    })
}

/// `Set-Cookie` values storing a session handed back by a handshake.
fn session_cookies(sync: &SessionSync) -> [(HeaderName, String); 2] {
    let secure = if sync.return_to.scheme() == "https" {
        "; Secure"
    } else {
        ""
    };
    [
        (
            SET_COOKIE,
            format!(
                "{SESSION_COOKIE}={}; Path=/; SameSite=Lax{secure}",
                sync.session_token
            ),
        ),
        (
            SET_COOKIE,
            format!(
                "{CLIENT_UAT_COOKIE}={}; Path=/; SameSite=Lax{secure}",
                sync.client_uat
            ),
        ),
    ]
}

fn header_str(headers: &HeaderMap, name: impl AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header::LOCATION, Request},
        middleware::from_fn_with_state,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::auth::claims::RawClaims;
    use crate::auth::engine::tests::engine_with;
    use crate::auth::handshake::{HandshakeResponse, HANDSHAKE_NONCE_PARAM, HANDSHAKE_STATE_PARAM};
    use crate::auth::testing::*;
    use crate::clock::ManualClock;

    fn app() -> Router {
        app_with(&[])
    }

    fn app_with(allowed_hosts: &[&str]) -> Router {
        let state = AppState::new(engine_with(Arc::new(CountingKeySource::standard())))
            .with_clock(Arc::new(ManualClock::at(NOW)))
            .with_allowed_hosts(allowed_hosts.iter().map(|h| h.to_string()).collect());

        Router::new()
            .route(
                "/whoami",
                get(|Extension(session): Extension<AuthenticatedSession>| async move {
                    session.subject().to_string()
                }),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn get_request(headers: &[(&str, &str)]) -> Request<Body> {
        get_uri("/whoami", headers)
    }

    fn get_uri(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .header(HOST, "app.example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(response: &Response) -> Url {
        Url::parse(response.headers()[LOCATION].to_str().unwrap()).unwrap()
    }

    fn query(url: &Url, name: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn cookies_are_parsed_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, "theme=dark; __client_uat=0".parse().unwrap());
        headers.append(COOKIE, "__session=abc.def.ghi".parse().unwrap());

        assert_eq!(cookie(&headers, SESSION_COOKIE), Some("abc.def.ghi"));
        assert_eq!(cookie(&headers, CLIENT_UAT_COOKIE), Some("0"));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[tokio::test]
    async fn bearer_token_reaches_handler() {
        let token = session_token(&session_claims());
        let response = app()
            .oneshot(get_request(&[("authorization", &format!("Bearer {token}"))]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"user_123");
    }

    #[tokio::test]
    async fn session_cookie_reaches_handler() {
        let token = session_token(&session_claims());
        let response = app()
            .oneshot(get_request(&[("cookie", &format!("__session={token}"))]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn anonymous_request_is_401() {
        let response = app().oneshot(get_request(&[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error_code"], "no_credential");
    }

    #[tokio::test]
    async fn expired_cookie_redirects_to_handshake() {
        let token = session_token(&RawClaims {
            exp: Some(NOW - 1),
            ..session_claims()
        });
        let response = app()
            .oneshot(get_request(&[("cookie", &format!("__session={token}"))]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[LOCATION].to_str().unwrap();
        let location = Url::parse(location).unwrap();
        assert_eq!(location.host_str(), Some("clerk.example.com"));
        let return_to = location
            .query_pairs()
            .find(|(k, _)| k == "redirect_url")
            .map(|(_, v)| v.into_owned());
        assert_eq!(return_to.as_deref(), Some("https://app.example.com/whoami"));
    }

    #[tokio::test]
    async fn forged_token_is_rejected_with_code() {
        let token = sign(&session_claims(), SESSION_KID, b"forged");
        let response = app()
            .oneshot(get_request(&[("authorization", &format!("Bearer {token}"))]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error_code"], "signature_invalid");
    }

    #[tokio::test]
    async fn completed_handshake_stores_session_and_returns() {
        let app = app();
        let stale = session_token(&RawClaims {
            exp: Some(NOW - 1),
            ..session_claims()
        });
        let response = app
            .clone()
            .oneshot(get_request(&[("cookie", &format!("__session={stale}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let target = location(&response);

        let fresh = session_token(&session_claims());
        let handshake = sign(
            &HandshakeResponse {
                nonce: query(&target, HANDSHAKE_NONCE_PARAM),
                state: query(&target, HANDSHAKE_STATE_PARAM),
                claims: Some(session_claims()),
                error: None,
                session_token: Some(fresh.clone()),
                exp: NOW + 60,
            },
            HANDSHAKE_KID,
            HANDSHAKE_SECRET,
        );
        let response = app
            .clone()
            .oneshot(get_uri(
                &format!("/whoami?__clerk_handshake={handshake}"),
                &[("cookie", &format!("__session={stale}"))],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response).as_str(), "https://app.example.com/whoami");
        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            cookies,
            vec![
                format!("__session={fresh}; Path=/; SameSite=Lax; Secure"),
                format!("__client_uat={}; Path=/; SameSite=Lax; Secure", NOW - 10),
            ]
        );

        let cookie_header = cookies
            .iter()
            .filter_map(|cookie| cookie.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");
        let response = app
            .oneshot(get_request(&[("cookie", &cookie_header)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"user_123");
    }

    #[tokio::test]
    async fn unlisted_host_is_refused() {
        let token = session_token(&session_claims());
        let request = Request::builder()
            .uri("/whoami")
            .header(HOST, "evil.example.net")
            .header("cookie", format!("__session={token}"))
            .body(Body::empty())
            .unwrap();

        let response = app_with(&["app.example.com"]).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app_with(&["app.example.com"])
            .oneshot(get_request(&[("cookie", &format!("__session={token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_proto_is_limited_to_http_schemes() {
        let stale = session_token(&RawClaims {
            exp: Some(NOW - 1),
            ..session_claims()
        });
        let cookie = format!("__session={stale}");

        for (proto, expected) in [
            ("http", "http://app.example.com/whoami"),
            ("https, http", "https://app.example.com/whoami"),
            ("javascript", "https://app.example.com/whoami"),
        ] {
            let response = app()
                .oneshot(get_request(&[("cookie", &cookie), ("x-forwarded-proto", proto)]))
                .await
                .unwrap();
            assert_eq!(query(&location(&response), "redirect_url"), expected);
        }
    }
}
