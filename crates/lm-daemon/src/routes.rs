//! Axum router and HTTP handlers for lm-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers, so tests can drive the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use lm_runtime::DeliveryError;
use tracing::{info, warn};

use crate::{
    api_types::{ErrorResponse, HealthResponse, LayerStatusResponse},
    state::{uptime_secs, AppState},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/layers/:layer/status", get(layer_status))
        .route("/v1/layers/:layer/snapshot", get(snapshot))
        .route("/v1/layers/:layer/collection", get(collection_stream))
        .route("/v1/layers/:layer/features", get(feature_stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            uptime_secs: uptime_secs(),
        }),
    )
}

fn unknown_layer(layer: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("unknown layer '{layer}'"),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/layers/{layer}/status
// ---------------------------------------------------------------------------

pub(crate) async fn layer_status(
    State(st): State<Arc<AppState>>,
    Path(layer): Path<String>,
) -> Response {
    if layer != st.pipeline.layer() {
        return unknown_layer(&layer);
    }
    let current = st.pipeline.current();
    Json(LayerStatusResponse {
        layer,
        config_hash: st.config_hash.clone(),
        round: current.round,
        features: current.features.len(),
        last_report: st.pipeline.last_report(),
        feature_subscribers: st.pipeline.feature_subscribers(),
        pacer_backlog: st.pipeline.pacer_backlog(),
        persistence: st.sink.as_ref().map(|s| s.counts()),
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/layers/{layer}/snapshot
// ---------------------------------------------------------------------------

pub(crate) async fn snapshot(
    State(st): State<Arc<AppState>>,
    Path(layer): Path<String>,
) -> Response {
    if layer != st.pipeline.layer() {
        return unknown_layer(&layer);
    }
    let current = st.pipeline.current();
    Json(current.features.clone()).into_response()
}

// ---------------------------------------------------------------------------
// SSE streams
// ---------------------------------------------------------------------------

fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    headers
}

/// Logs once when the owning SSE stream is dropped.
struct SubscriberGuard {
    layer: String,
    kind: &'static str,
}

impl SubscriberGuard {
    fn open(layer: &str, kind: &'static str) -> Self {
        info!(layer, kind, "subscriber opened");
        Self {
            layer: layer.to_string(),
            kind,
        }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        info!(layer = %self.layer, kind = self.kind, "subscriber closed");
    }
}

/// GET /v1/layers/{layer}/collection
///
/// Current collection first, then one `collection` event per round.
pub(crate) async fn collection_stream(
    State(st): State<Arc<AppState>>,
    Path(layer): Path<String>,
) -> Response {
    if layer != st.pipeline.layer() {
        return unknown_layer(&layer);
    }
    let guard = SubscriberGuard::open(&layer, "collection");
    let events = st.pipeline.subscribe_collection().filter_map(move |snap| {
        let _guard = &guard;
        let ev = serde_json::to_string(&snap.features).ok().map(|data| {
            Ok::<_, Infallible>(
                Event::default()
                    .event("collection")
                    .id(snap.round.to_string())
                    .data(data),
            )
        });
        async move { ev }
    });

    (sse_headers(), Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

/// GET /v1/layers/{layer}/features
///
/// One `feature` event per changed feature. A lagging client receives a final
/// `lagged` event and the stream closes.
pub(crate) async fn feature_stream(
    State(st): State<Arc<AppState>>,
    Path(layer): Path<String>,
) -> Response {
    if layer != st.pipeline.layer() {
        return unknown_layer(&layer);
    }
    let guard = SubscriberGuard::open(&layer, "features");
    let events = feature_events(st.pipeline.subscribe_features(), guard);

    (sse_headers(), Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn feature_events<S>(
    stream: S,
    guard: SubscriberGuard,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Result<lm_runtime::FeatureEvent, DeliveryError>>,
{
    stream.filter_map(move |item| {
        let ev = match item {
            Ok(fe) => serde_json::to_string(&*fe.feature).ok().map(|data| {
                Event::default()
                    .event("feature")
                    .id(fe.round.to_string())
                    .data(data)
            }),
            Err(e) => {
                warn!(
                    layer = %guard.layer,
                    kind = guard.kind,
                    error = %e,
                    "subscriber lagged; closing stream"
                );
                Some(Event::default().event("lagged").data(e.to_string()))
            }
        };
        async move { ev.map(Ok) }
    })
}
