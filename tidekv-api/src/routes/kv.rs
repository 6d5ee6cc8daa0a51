//! Key-Value REST Routes
//!
//! - `PUT /kv/{key}` appends a value record, `201` with the stored record
//! - `GET /kv/{key}` reads through the cache, `200` or `404`
//! - `DELETE /kv/{key}` appends a tombstone, `200`
//!
//! Keys may contain `/`; everything after `/kv/` is the key.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Body of `PUT /kv/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PutValueRequest {
    pub value: Option<String>,
}

/// Body of a successful `GET /kv/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
}

fn parse_put_body(body: &[u8]) -> ApiResult<String> {
    let request: PutValueRequest = serde_json::from_slice(body)?;
    request.value.ok_or_else(|| ApiError::missing_field("value"))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// PUT /kv/{key} - Write a value
pub async fn put_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let value = parse_put_body(&body)?;
    let record = state.writer.put(&key, &value).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /kv/{key} - Read the current value
pub async fn get_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<KeyValueResponse>> {
    let resolved = state.resolver.get(&key).await?;
    tracing::debug!(key = %key, source = ?resolved.source, found = resolved.found(), "Read resolved");

    match resolved.value {
        Some(value) => Ok(Json(KeyValueResponse { key, value })),
        None => Err(ApiError::key_not_found(&key)),
    }
}

/// DELETE /kv/{key} - Tombstone a key
pub async fn delete_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    state.writer.delete(&key).await?;
    Ok(StatusCode::OK)
}

/// Any method on `/kv/` with nothing after it.
async fn missing_key() -> ApiError {
    ApiError::missing_field("key")
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the key-value router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/kv/*key",
            put(put_value).get(get_value).delete(delete_value),
        )
        .route("/kv/", get(missing_key).put(missing_key).delete(missing_key))
        .route("/kv", get(missing_key).put(missing_key).delete(missing_key))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_put_body() -> ApiResult<()> {
        assert_eq!(parse_put_body(br#"{"value":"v"}"#)?, "v");
        assert_eq!(parse_put_body(br#"{"value":""}"#)?, "");
        Ok(())
    }

    #[test]
    fn test_parse_put_body_errors() {
        let missing = parse_put_body(b"{}").unwrap_err();
        assert_eq!(missing.code, ErrorCode::MissingField);

        let not_json = parse_put_body(b"value=v").unwrap_err();
        assert_eq!(not_json.code, ErrorCode::InvalidInput);

        let wrong_type = parse_put_body(br#"{"value":42}"#).unwrap_err();
        assert_eq!(wrong_type.code, ErrorCode::InvalidInput);
    }
}
