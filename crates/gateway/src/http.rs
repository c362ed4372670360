use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use ulid::Ulid;
use wfconfig_auth::{AuthError, SessionGate};
use wfconfig_schema::{SessionUser, ValidationError};
use wfconfig_store::{ConfigStore, StoreError};

use crate::config::{GatewayConfig, StartupError};
use crate::rate_limit::RateLimiter;

mod auth;
mod configs;

const LOGIN_LIMITER_MAX_KEYS: usize = 16_384;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    store: ConfigStore,
    gate: SessionGate,
    login_limiter: RateLimiter,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Connects to Postgres, checks the configured table against the field
/// registry and builds the router.
pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let pool = wfconfig_store::connect_pool(&config.db_url, config.db_max_connections)
        .await
        .map_err(|err| StartupError {
            code: "ERR_DB_UNAVAILABLE",
            message: format!("failed to connect to postgres: {}", err),
        })?;

    if config.db_migrate {
        wfconfig_store::migrate(&pool)
            .await
            .map_err(|err| StartupError {
                code: "ERR_DB_MIGRATE",
                message: format!("failed to apply development schema: {}", err),
            })?;
        tracing::warn!("applied development schema and session procedure stand-ins");
    }

    let state = app_state(config, pool);
    state
        .store
        .validate_schema()
        .await
        .map_err(|err| StartupError {
            code: err.code(),
            message: err.to_string(),
        })?;
    tracing::info!(table = %state.store.table(), "config table matches field registry");

    Ok(build_router(state))
}

/// Builds the router over an existing pool without startup checks.
pub fn router_with_pool(config: GatewayConfig, pool: PgPool) -> Router {
    build_router(app_state(config, pool))
}

fn app_state(config: GatewayConfig, pool: PgPool) -> AppState {
    let store = ConfigStore::new(pool.clone(), &config.table, config.db_query_timeout());
    let gate = SessionGate::new(
        pool,
        config.security_schema.as_deref(),
        config.db_query_timeout(),
    );
    let login_limiter = RateLimiter::new(
        Duration::from_secs(config.login_rate_limit_window_secs.max(1)),
        LOGIN_LIMITER_MAX_KEYS,
    );

    AppState {
        config,
        store,
        gate,
        login_limiter,
    }
}

fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    let static_dir = state.config.static_dir.clone();

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/session", get(auth::session))
        .route("/api/configs", get(configs::list))
        .route("/api/configs/{id}", put(configs::update));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("postgres", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = require_session(&state, &headers).await
    {
        return err.into_response();
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Resolves the session cookie to a user, or fails with 401.
async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<SessionUser, ApiError> {
    let token = wfconfig_auth::session_token_from_headers(headers, &state.config.session_cookie_name);
    match state.gate.authenticate(token.as_deref()).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized()),
        Err(err) => Err(auth_error(&err)),
    }
}

fn unauthorized() -> ApiError {
    json_error(StatusCode::UNAUTHORIZED, "ERR_AUTH_REQUIRED", "Unauthorized")
}

/// Gate errors are outages. Rejected credentials and sessions are `Ok(None)`.
fn auth_error(err: &AuthError) -> ApiError {
    tracing::warn!(code = err.code, error = %err.message, "session gate unavailable");
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        err.code,
        "session service unavailable",
    )
}

fn validation_error(err: ValidationError) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: err.message,
            code: ValidationError::CODE.to_string(),
            field: Some(err.field),
        }),
    )
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Validation(err) => validation_error(err),
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, err.code(), "Config not found"),
        StoreError::Timeout => {
            tracing::warn!("storage operation timed out");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                err.code(),
                "storage timed out",
            )
        }
        StoreError::SchemaMismatch(_) | StoreError::Sqlx(_) => {
            tracing::error!(error = %err, "storage operation failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.code(),
                "storage error",
            )
        }
    }
}

fn body_rejection(rejection: &JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "ERR_PAYLOAD_TOO_LARGE",
            "request body too large",
        );
    }
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "invalid JSON body",
    )
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Records latency and outcome on the handler span and observes the request.
fn finish(
    span: &tracing::Span,
    route: &'static str,
    method: &'static str,
    started: Instant,
    status: StatusCode,
) {
    let elapsed = started.elapsed();
    span.record("latency_ms", elapsed.as_millis() as u64);
    span.record(
        "outcome",
        if status.is_success() { "ok" } else { status.as_str() },
    );
    crate::metrics::observe_http_request(route, method, status.as_u16(), elapsed);
}

fn status_of<T>(result: &Result<T, ApiError>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.into(),
            field: None,
        }),
    )
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "4f1c2a9e-8b1d-4c3e-9f0a-1b2c3d4e5f60";

    fn test_config(extra: &[(&str, &str)]) -> GatewayConfig {
        let mut kv = HashMap::from([(
            "WFCONFIG_DB_URL".to_string(),
            "postgres://wf:wf@127.0.0.1:1/wf".to_string(),
        )]);
        for (k, v) in extra {
            kv.insert(k.to_string(), v.to_string());
        }
        GatewayConfig::from_kv(&kv).unwrap()
    }

    fn unreachable_router(extra: &[(&str, &str)]) -> Router {
        let config = test_config(extra);
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy(&config.db_url)
            .unwrap();
        router_with_pool(config, pool)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, headers, body)
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_carries_security_headers() {
        let (status, headers, body) = send(
            unreachable_router(&[]),
            Request::get("/healthz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".to_string()));
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
    }

    #[tokio::test]
    async fn configs_without_session_are_unauthorized() {
        let (status, _, body) = send(
            unreachable_router(&[]),
            Request::get("/api/configs").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
        assert!(body.get("id").is_none());
    }

    #[tokio::test]
    async fn update_checks_session_before_id() {
        let (status, _, body) = send(
            unreachable_router(&[]),
            json_request("PUT", "/api/configs/not-a-number", "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "ERR_AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn session_reports_logged_out_without_valid_cookie() {
        let (status, _, body) = send(
            unreachable_router(&[]),
            Request::get("/api/session").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"loggedIn": false}));

        let (status, _, body) = send(
            unreachable_router(&[]),
            Request::get("/api/session")
                .header(header::COOKIE, "workflow_session=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loggedIn"], false);
    }

    #[tokio::test]
    async fn unreachable_session_store_is_service_unavailable() {
        let (status, _, body) = send(
            unreachable_router(&[]),
            Request::get("/api/configs")
                .header(header::COOKIE, format!("workflow_session={}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "ERR_AUTH_UNAVAILABLE");
    }

    #[tokio::test]
    async fn login_rejects_missing_password_and_malformed_body() {
        let (status, headers, body) = send(
            unreachable_router(&[]),
            json_request("POST", "/api/login", r#"{"username":"operator"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");
        assert!(headers.get(header::SET_COOKIE).is_none());

        let (status, _, body) = send(
            unreachable_router(&[]),
            json_request("POST", "/api/login", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ERR_INVALID_PARAMS");
    }

    #[tokio::test]
    async fn login_is_rate_limited_per_username() {
        let router = unreachable_router(&[("WFCONFIG_LOGIN_RATE_LIMIT_PER_WINDOW", "1")]);
        let attempt = || json_request("POST", "/api/login", r#"{"username":"operator","password":""}"#);

        let (status, _, _) = send(router.clone(), attempt()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, headers, body) = send(router.clone(), attempt()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "ERR_RATE_LIMITED");
        let retry_after = headers[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse::<u64>()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let big = format!(r#"{{"username":"{}","password":"x"}}"#, "a".repeat(256));
        let (status, _, body) = send(
            unreachable_router(&[("WFCONFIG_MAX_BODY_BYTES", "64")]),
            json_request("POST", "/api/login", &big),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "ERR_PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn logout_always_clears_cookie() {
        let (status, headers, body) = send(
            unreachable_router(&[]),
            Request::post("/api/logout")
                .header(header::COOKIE, "workflow_session=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"ok": true}));
        let cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("workflow_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn readyz_reports_postgres_down() {
        let (status, _, body) = send(
            unreachable_router(&[("WFCONFIG_DB_QUERY_TIMEOUT_MS", "300")]),
            Request::get("/readyz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["checks"]["postgres"], false);
    }

    #[tokio::test]
    async fn metrics_can_require_a_session() {
        let (status, _, _) = send(
            unreachable_router(&[("WFCONFIG_METRICS_REQUIRE_AUTH", "true")]),
            Request::get("/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, headers, _) = send(
            unreachable_router(&[]),
            Request::get("/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[test]
    fn request_id_is_sanitized_or_generated() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc-123 <script>"));
        assert_eq!(extract_request_id(&headers), "abc-123script");

        let generated = extract_request_id(&HeaderMap::new());
        assert!(generated.parse::<Ulid>().is_ok());
    }

    #[test]
    fn auth_errors_are_service_unavailable() {
        let (status, Json(body)) = auth_error(&AuthError {
            code: "ERR_AUTH_UNAVAILABLE",
            message: "session check timed out".to_string(),
        });
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "ERR_AUTH_UNAVAILABLE");
        assert_eq!(body.error, "session service unavailable");
    }

    #[test]
    fn store_errors_map_to_statuses() {
        assert_eq!(store_error(StoreError::NotFound(9)).0, StatusCode::NOT_FOUND);
        assert_eq!(store_error(StoreError::Timeout).0, StatusCode::SERVICE_UNAVAILABLE);
        let (status, Json(body)) = store_error(StoreError::Validation(ValidationError::missing("env")));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.field.as_deref(), Some("env"));
        assert_eq!(body.error, "Missing field: env");
    }
}
