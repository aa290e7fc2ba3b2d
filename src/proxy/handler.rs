//! Per-worker routes.
//!
//! # Routes
//! - `/proxy/stream`, `/proxy/stream/{*filename}`: stream `d` from the origin
//! - `/proxy/mpd/{manifest,playlist}.m3u8`, `/proxy/mpd/segment.mp4`: a
//!   DASH origin served as HLS (see `mpd.rs`)
//! - `/health`: liveness, with the id of the worker that answered

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Response};
use axum::routing::{any, get};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::error::ProxyError;
use crate::http::dispatcher::RequestContext;
use crate::pool::WorkerId;
use crate::proxy::mpd;
use crate::proxy::relay::Relay;
use crate::proxy::request::ProxyRequest;
use crate::proxy::upstream::{UpstreamClient, UpstreamSession};
use crate::resilience::ConnectRetry;
use crate::security::headers::sanitize_response_headers;

/// Handler state, one per worker.
#[derive(Clone)]
pub struct ProxyState {
    pub worker: WorkerId,
    pub client: UpstreamClient,
    pub retry: ConnectRetry,
    pub chunk_size: usize,
}

/// UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/proxy/stream", any(stream_handler))
        .route("/proxy/stream/{*filename}", any(stream_handler))
        .route(mpd::MANIFEST_PATH, get(mpd::manifest_handler))
        .route(mpd::PLAYLIST_PATH, get(mpd::playlist_handler))
        .route(mpd::SEGMENT_PATH, get(mpd::segment_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "worker": state.worker.to_string(),
    }))
}

/// Open the origin and relay its response.
async fn stream_handler(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
) -> Result<Response<Body>, ProxyError> {
    let mut proxied = ProxyRequest::from_request(request)?;
    tracing::debug!(
        connection_id = %ctx.connection,
        worker = %state.worker,
        client = %ctx.client.client,
        method = %proxied.method,
        origin = %proxied.origin,
        "Opening upstream"
    );

    let relay = Relay {
        chunk_size: state.chunk_size,
        cancel: ctx.cancel.child_token(),
        relayed: Arc::clone(&ctx.relayed),
    };
    if !proxied.replayable {
        let body = std::mem::replace(&mut proxied.body, Body::empty());
        proxied.body = relay.upstream(body);
    }

    let session = UpstreamSession::open(&state.client, proxied, &state.retry, relay.cancel.clone()).await?;
    let (mut parts, incoming) = session.response.into_parts();
    sanitize_response_headers(&mut parts.headers);

    let body = relay.downstream(incoming, &session.origin);
    Ok(Response::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::proxy::upstream::UpstreamConnector;
    use crate::security::{ClientSource, Resolution};
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(ProxyState {
            worker: WorkerId { slot: 2, generation: 5 },
            client: UpstreamConnector::new(&UpstreamConfig::default(), Duration::from_secs(1))
                .unwrap()
                .client(),
            retry: ConnectRetry::none(),
            chunk_size: 1024,
        })
    }

    fn context() -> RequestContext {
        let peer = "127.0.0.1:40000".parse().unwrap();
        RequestContext {
            connection: crate::net::ConnectionId::new(),
            worker: WorkerId { slot: 2, generation: 5 },
            client: Resolution {
                client: "127.0.0.1".parse().unwrap(),
                peer,
                scheme: None,
                source: ClientSource::Peer,
            },
            cancel: CancellationToken::new(),
            relayed: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn health_names_worker_and_sets_request_id() {
        let response = router()
            .oneshot(axum::http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&request_id).is_ok());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({"status": "healthy", "worker": "w2.5"}));
    }

    #[tokio::test]
    async fn missing_destination_is_bad_request() {
        let mut request = axum::http::Request::get("/proxy/stream/file.mp4")
            .header("x-request-id", "given-id")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(context());

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-request-id"], "given-id");
    }
}
