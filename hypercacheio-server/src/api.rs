//! Request dispatcher: translates the HTTP verbs on the small set of URL
//! shapes the API exposes into engine operations and replies with JSON.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use hypercacheio_common::{ErrorResponse, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

const TOKEN_HEADER: &str = "X-Hypercacheio-Token";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

/// Compares `X-Hypercacheio-Token` against the configured token; rejects
/// with 401 and the exact body the original system returned.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let supplied = req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if supplied != Some(state.token.as_str()) {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    next.run(req).await
}

fn full_key(state: &AppState, key: &str) -> String {
    format!("{}{}", state.key_prefix, key)
}

/// `ttl <= 0` or absent means "never expires" (`expiration = 0`); a
/// positive ttl becomes an absolute unix-second expiration.
fn expiration_from_ttl(state: &AppState, ttl: Option<i64>) -> u32 {
    match ttl {
        Some(ttl) if ttl > 0 => {
            let expires_at = state.clock.unix_now_secs().saturating_add(ttl as u64);
            expires_at.min(u32::MAX as u64) as u32
        }
        _ => 0,
    }
}

fn check_sizes(key: &str, value_len: usize) -> Option<Response> {
    if key.len() > MAX_KEY_SIZE {
        return Some(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Key exceeds maximum size of {MAX_KEY_SIZE} bytes"),
        ));
    }
    if value_len > MAX_VALUE_SIZE {
        return Some(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Value exceeds maximum size of {MAX_VALUE_SIZE} bytes"),
        ));
    }
    None
}

#[derive(Debug, Deserialize)]
pub struct ValueBody {
    value: serde_json::Value,
    #[serde(default)]
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LockAcquireBody {
    owner: serde_json::Value,
    #[serde(default)]
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LockReleaseBody {
    owner: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct DataResponse {
    data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct AddedResponse {
    added: bool,
}

#[derive(Debug, Serialize)]
struct AcquiredResponse {
    acquired: bool,
}

#[derive(Debug, Serialize)]
struct ReleasedResponse {
    released: bool,
}

#[derive(Debug, Serialize)]
struct PingResponse {
    hostname: String,
    peers: Vec<String>,
    items: usize,
}

/// `GET /cache/<key>` — decode failure on the stored bytes yields
/// `{data: null}`, not an error; it is only logged.
pub async fn handle_cache_get(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if let Some(resp) = check_sizes(&key, 0) {
        return resp;
    }
    let stored = state.engine.get(&full_key(&state, &key)).await;
    let data = match stored {
        None => None,
        Some(bytes) => match state.codec.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "value decode failed on GET; returning null");
                None
            }
        },
    };
    Json(DataResponse { data }).into_response()
}

/// `POST /cache/<key>` — an empty key is rejected with 400.
pub async fn handle_cache_post(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ValueBody>,
) -> Response {
    handle_cache_post_inner(state, key, body).await
}

/// `POST /cache/` — the empty-key case routed separately since axum's
/// path matcher does not deliver an empty `:key` segment.
pub async fn handle_cache_post_root(State(state): State<AppState>, Json(body): Json<ValueBody>) -> Response {
    handle_cache_post_inner(state, String::new(), body).await
}

async fn handle_cache_post_inner(state: AppState, key: String, body: ValueBody) -> Response {
    if key.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Key is required");
    }
    let encoded = match state.codec.encode(&body.value) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("value encode failed: {e}")),
    };
    if let Some(resp) = check_sizes(&key, encoded.len()) {
        return resp;
    }
    let expiration = expiration_from_ttl(&state, body.ttl);
    match state.engine.set(full_key(&state, &key), Bytes::from(encoded), expiration).await {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
    }
}

/// `DELETE /cache/<key>` — never empty at this route (see
/// [`handle_cache_delete_root`] for the flush case).
pub async fn handle_cache_delete(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    state.engine.delete(&full_key(&state, &key)).await;
    Json(SuccessResponse { success: true }).into_response()
}

/// `DELETE /cache/` — empty key means flush the entire store.
pub async fn handle_cache_delete_root(State(state): State<AppState>) -> Response {
    state.engine.flush().await;
    Json(SuccessResponse { success: true }).into_response()
}

/// `POST /add/<key>` — atomic add-if-absent.
pub async fn handle_add(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ValueBody>,
) -> Response {
    let encoded = match state.codec.encode(&body.value) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("value encode failed: {e}")),
    };
    if let Some(resp) = check_sizes(&key, encoded.len()) {
        return resp;
    }
    let expiration = expiration_from_ttl(&state, body.ttl);
    match state.engine.add(full_key(&state, &key), Bytes::from(encoded), expiration).await {
        Ok(added) => Json(AddedResponse { added }).into_response(),
        Err(e) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
    }
}

/// `POST /lock/<name>` — acquire the named lock for `owner`.
pub async fn handle_lock_acquire(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<LockAcquireBody>,
) -> Response {
    let owner = match state.codec.encode(&body.owner) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("value encode failed: {e}")),
    };
    let expiration = expiration_from_ttl(&state, body.ttl);
    match state.engine.lock_acquire(&full_key(&state, &name), Bytes::from(owner), expiration).await {
        Ok(acquired) => Json(AcquiredResponse { acquired }).into_response(),
        Err(e) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
    }
}

/// `DELETE /lock/<name>` — release iff `owner` currently holds it.
pub async fn handle_lock_release(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<LockReleaseBody>,
) -> Response {
    let owner = match state.codec.encode(&body.owner) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("value encode failed: {e}")),
    };
    let released = state.engine.lock_release(&full_key(&state, &name), &owner).await;
    Json(ReleasedResponse { released }).into_response()
}

/// `GET /ping` — diagnostic: hostname, current peer-address list, item count.
pub async fn handle_ping(State(state): State<AppState>) -> Response {
    let hostname = hostname::get().ok().and_then(|s| s.into_string().ok()).unwrap_or_else(|| "unknown".to_string());
    let peers = state.engine.peers().peer_addresses().await;
    let items = state.engine.item_count().await;
    Json(PingResponse { hostname, peers, items }).into_response()
}
