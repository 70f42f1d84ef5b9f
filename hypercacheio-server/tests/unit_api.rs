use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router};
use hypercacheio_common::{JsonValueCodec, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use hypercacheio_core::{Clock, Engine, Persistence, SqlitePersistence};
use hypercacheio_server::api::{
    handle_add, handle_cache_delete, handle_cache_delete_root, handle_cache_get, handle_cache_post,
    handle_cache_post_root, handle_lock_acquire, handle_lock_release, handle_ping, LockAcquireBody,
    LockReleaseBody, ValueBody,
};
use hypercacheio_server::AppState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NOW: u64 = 10_000;

struct MockClock(AtomicU64);

impl MockClock {
    fn new(now: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(now)))
    }

    fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for MockClock {
    fn unix_now_secs(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

async fn state_at(now: u64) -> (AppState, Arc<MockClock>) {
    let clock = MockClock::new(now);
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::open_in_memory().unwrap());
    let engine = Engine::boot(clock.clone() as Arc<dyn Clock>, persistence).await;
    let state = AppState {
        engine,
        clock: clock.clone() as Arc<dyn Clock>,
        codec: Arc::new(JsonValueCodec),
        token: "secret".to_string(),
        key_prefix: String::new(),
    };
    (state, clock)
}

fn value_body(v: serde_json::Value, ttl: Option<i64>) -> ValueBody {
    serde_json::from_value(serde_json::json!({ "value": v, "ttl": ttl })).unwrap()
}

#[tokio::test]
async fn router_builds_without_panicking() {
    let (state, _clock) = state_at(NOW).await;
    let router: Router = hypercacheio_server::build_router(state);
    assert!(std::mem::size_of_val(&router) > 0);
}

#[tokio::test]
async fn post_then_get_round_trips_a_value() {
    let (state, _clock) = state_at(NOW).await;
    let post = handle_cache_post(
        State(state.clone()),
        Path("k".to_string()),
        Json(value_body(serde_json::json!("hello"), None)),
    )
    .await;
    assert_eq!(post.status(), StatusCode::OK);

    let get = handle_cache_get(State(state), Path("k".to_string())).await;
    assert_eq!(get.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_on_missing_key_returns_null_data_not_an_error() {
    let (state, _clock) = state_at(NOW).await;
    let get = handle_cache_get(State(state), Path("missing".to_string())).await;
    assert_eq!(get.status(), StatusCode::OK);
}

#[tokio::test]
async fn post_with_empty_key_is_rejected() {
    let (state, _clock) = state_at(NOW).await;
    let resp = handle_cache_post_root(State(state), Json(value_body(serde_json::json!(1), None))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_root_flushes_every_key() {
    let (state, _clock) = state_at(NOW).await;
    handle_cache_post(State(state.clone()), Path("a".to_string()), Json(value_body(serde_json::json!(1), None)))
        .await;
    handle_cache_post(State(state.clone()), Path("b".to_string()), Json(value_body(serde_json::json!(2), None)))
        .await;
    handle_cache_delete_root(State(state.clone())).await;
    assert_eq!(state.engine.item_count().await, 0);
}

#[tokio::test]
async fn delete_on_a_single_key_leaves_others_untouched() {
    let (state, _clock) = state_at(NOW).await;
    handle_cache_post(State(state.clone()), Path("a".to_string()), Json(value_body(serde_json::json!(1), None)))
        .await;
    handle_cache_post(State(state.clone()), Path("b".to_string()), Json(value_body(serde_json::json!(2), None)))
        .await;
    handle_cache_delete(State(state.clone()), Path("a".to_string())).await;
    assert_eq!(state.engine.item_count().await, 1);
}

#[tokio::test]
async fn add_is_exclusive_and_keeps_the_first_writer() {
    let (state, _clock) = state_at(NOW).await;
    let first =
        handle_add(State(state.clone()), Path("k".to_string()), Json(value_body(serde_json::json!("first"), None)))
            .await;
    assert_eq!(first.status(), StatusCode::OK);
    let second =
        handle_add(State(state.clone()), Path("k".to_string()), Json(value_body(serde_json::json!("second"), None)))
            .await;
    assert_eq!(second.status(), StatusCode::OK);
}

#[tokio::test]
async fn lock_acquire_is_exclusive_between_distinct_owners() {
    let (state, _clock) = state_at(NOW).await;
    let body1: LockAcquireBody =
        serde_json::from_value(serde_json::json!({ "owner": "w1", "ttl": 5 })).unwrap();
    let first = handle_lock_acquire(State(state.clone()), Path("job".to_string()), Json(body1)).await;
    assert_eq!(first.status(), StatusCode::OK);

    let body2: LockAcquireBody =
        serde_json::from_value(serde_json::json!({ "owner": "w2", "ttl": 5 })).unwrap();
    let second = handle_lock_acquire(State(state.clone()), Path("job".to_string()), Json(body2)).await;
    assert_eq!(second.status(), StatusCode::OK);

    let release_wrong: LockReleaseBody = serde_json::from_value(serde_json::json!({ "owner": "w2" })).unwrap();
    let release_wrong_resp = handle_lock_release(State(state.clone()), Path("job".to_string()), Json(release_wrong)).await;
    assert_eq!(release_wrong_resp.status(), StatusCode::OK);

    let release_right: LockReleaseBody = serde_json::from_value(serde_json::json!({ "owner": "w1" })).unwrap();
    let release_right_resp = handle_lock_release(State(state), Path("job".to_string()), Json(release_right)).await;
    assert_eq!(release_right_resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversize_key_is_rejected_with_413() {
    let (state, _clock) = state_at(NOW).await;
    let key = "x".repeat(MAX_KEY_SIZE + 1);
    let resp = handle_cache_post(State(state), Path(key), Json(value_body(serde_json::json!("v"), None))).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn oversize_value_is_rejected_with_413() {
    let (state, _clock) = state_at(NOW).await;
    let huge = "x".repeat(MAX_VALUE_SIZE + 1);
    let resp =
        handle_cache_post(State(state), Path("k".to_string()), Json(value_body(serde_json::json!(huge), None))).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn ping_reports_item_count_and_empty_peer_list() {
    let (state, _clock) = state_at(NOW).await;
    handle_cache_post(State(state.clone()), Path("k".to_string()), Json(value_body(serde_json::json!(1), None)))
        .await;
    let resp = handle_ping(State(state)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn ttl_expiry_reaps_on_next_get() {
    let (state, clock) = state_at(NOW).await;
    handle_cache_post(
        State(state.clone()),
        Path("k".to_string()),
        Json(value_body(serde_json::json!("short-lived"), Some(5))),
    )
    .await;
    clock.advance(10);
    let get = handle_cache_get(State(state), Path("k".to_string())).await;
    assert_eq!(get.status(), StatusCode::OK);
}
