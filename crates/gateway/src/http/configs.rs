use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;
use tracing::Instrument;
use wfconfig_schema::{ConfigRecord, Payload};

use super::{
    ApiError, AppState, OkResponse, body_rejection, extract_request_id, finish, json_error,
    require_session, status_of, store_error, validation_error,
};

pub(super) async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConfigRecord>>, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "configs.list",
        request_id = %request_id,
        username = tracing::field::Empty,
        records = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result = async {
        let user = require_session(&state, &headers).await?;
        tracing::Span::current().record("username", user.username.as_str());

        let records = state.store.list_records().await.map_err(store_error)?;
        tracing::Span::current().record("records", records.len() as u64);
        Ok::<_, ApiError>(Json(records))
    }
    .instrument(span.clone())
    .await;

    finish(&span, "/api/configs", "GET", started, status_of(&result));
    result
}

/// Replaces every editable column of one record. The session is checked
/// before the id or body are looked at.
pub(super) async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "configs.update",
        request_id = %request_id,
        username = tracing::field::Empty,
        record_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result = async {
        let user = require_session(&state, &headers).await?;
        tracing::Span::current().record("username", user.username.as_str());

        let id = parse_record_id(&raw_id)
            .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", "Invalid id"))?;
        tracing::Span::current().record("record_id", id);

        let Json(body) = body.map_err(|rejection| body_rejection(&rejection))?;
        let Value::Object(fields) = body else {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                "request body must be a JSON object",
            ));
        };

        let payload = Payload::from_json_object(&fields).map_err(|err| {
            crate::metrics::observe_config_save("invalid");
            validation_error(err)
        })?;

        match state.store.update_record(id, &payload).await {
            Ok(()) => {
                crate::metrics::observe_config_save("ok");
                tracing::info!(record_id = id, "config record saved");
                Ok::<_, ApiError>(Json(OkResponse { ok: true }))
            }
            Err(err) => {
                crate::metrics::observe_config_save(match &err {
                    wfconfig_store::StoreError::Validation(_) => "invalid",
                    wfconfig_store::StoreError::NotFound(_) => "not_found",
                    _ => "error",
                });
                Err(store_error(err))
            }
        }
    }
    .instrument(span.clone())
    .await;

    finish(&span, "/api/configs/{id}", "PUT", started, status_of(&result));
    result
}

/// Decimal record identifier, optional leading minus, nothing else.
fn parse_record_id(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_parsing_is_strict() {
        assert_eq!(parse_record_id("42"), Some(42));
        assert_eq!(parse_record_id("-1"), Some(-1));
        assert_eq!(parse_record_id("007"), Some(7));
        assert_eq!(parse_record_id(""), None);
        assert_eq!(parse_record_id("12abc"), None);
        assert_eq!(parse_record_id("+5"), None);
        assert_eq!(parse_record_id(" 5"), None);
        assert_eq!(parse_record_id("1.0"), None);
        assert_eq!(parse_record_id("99999999999999999999"), None);
    }
}
