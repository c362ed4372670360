use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use wfconfig_schema::SessionUser;

use super::{
    ApiError, AppState, OkResponse, auth_error, body_rejection, extract_request_id, finish,
    json_error, status_of,
};

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user: SessionUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SessionResponse {
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<SessionUser>,
}

pub(super) async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "http.login",
        request_id = %request_id,
        username = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let response = async {
        let Json(req) = match req {
            Ok(req) => req,
            Err(rejection) => return body_rejection(&rejection).into_response(),
        };
        let username = req.username.trim().to_string();
        tracing::Span::current().record("username", username.as_str());

        let limiter_key = format!("login:{}", username.to_lowercase());
        if !state
            .login_limiter
            .allow(&limiter_key, state.config.login_rate_limit_per_window)
        {
            crate::metrics::observe_login("rate_limited");
            let retry_after = state.login_limiter.retry_after(&limiter_key).as_secs().max(1);
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
            return (
                headers,
                json_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    "ERR_RATE_LIMITED",
                    "Too many login attempts",
                ),
            )
                .into_response();
        }

        let grant = match state.gate.login(&username, &req.password).await {
            Ok(Some(grant)) => grant,
            Ok(None) => {
                crate::metrics::observe_login("rejected");
                return json_error(
                    StatusCode::UNAUTHORIZED,
                    "ERR_AUTH_INVALID",
                    "Invalid credentials",
                )
                .into_response();
            }
            Err(err) => {
                crate::metrics::observe_login("error");
                return auth_error(&err).into_response();
            }
        };

        state.login_limiter.reset(&limiter_key);
        crate::metrics::observe_login("ok");
        tracing::info!(role = %grant.user.role, "operator signed in");

        let cookie = wfconfig_auth::session_cookie(
            &state.config.session_cookie_name,
            &grant.token,
            state.config.cookie_secure,
            state.config.session_max_age(),
        );
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.insert(header::SET_COOKIE, value);
            }
            Err(_) => {
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERR_INTERNAL",
                    "failed to issue session cookie",
                )
                .into_response();
            }
        }

        (headers, Json(LoginResponse { user: grant.user })).into_response()
    }
    .instrument(span.clone())
    .await;

    finish(&span, "/api/login", "POST", started, response.status());
    response
}

/// Best effort: the cookie is cleared even when revocation fails.
pub(super) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "http.logout",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let response = async {
        let token =
            wfconfig_auth::session_token_from_headers(&headers, &state.config.session_cookie_name);
        if let Some(token) = token
            && let Err(err) = state.gate.logout(&token).await
        {
            tracing::warn!(code = err.code, error = %err.message, "session revocation failed");
        }

        let mut resp_headers = HeaderMap::new();
        let cleared = wfconfig_auth::clear_session_cookie(
            &state.config.session_cookie_name,
            state.config.cookie_secure,
        );
        if let Ok(value) = HeaderValue::from_str(&cleared) {
            resp_headers.insert(header::SET_COOKIE, value);
        }
        (resp_headers, Json(OkResponse { ok: true })).into_response()
    }
    .instrument(span.clone())
    .await;

    finish(&span, "/api/logout", "POST", started, response.status());
    response
}

pub(super) async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "http.session",
        request_id = %request_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result = async {
        let token =
            wfconfig_auth::session_token_from_headers(&headers, &state.config.session_cookie_name);
        let user = state
            .gate
            .authenticate(token.as_deref())
            .await
            .map_err(|err| auth_error(&err))?;

        Ok::<_, ApiError>(Json(SessionResponse {
            logged_in: user.is_some(),
            user,
        }))
    }
    .instrument(span.clone())
    .await;

    finish(&span, "/api/session", "GET", started, status_of(&result));
    result
}
