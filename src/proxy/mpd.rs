//! DASH origins served as HLS.
//!
//! # Routes
//! - `manifest.m3u8?d=<mpd>`: master playlist of the MPD at `d`
//! - `playlist.m3u8?d=<mpd>&profile_id=<id>`: media playlist of one profile
//! - `segment.mp4?init_url=..&segment_url=..&mime_type=..`: init section
//!   followed by the media segment, as one body
//!
//! `h_` parameters ride along on every generated link, so the origin sees
//! the same override headers for the MPD and for its segments.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use axum::Extension;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use url::Url;

use crate::dash::{self, Manifest, Profile, Segment, MPEGURL};
use crate::error::ProxyError;
use crate::http::dispatcher::RequestContext;
use crate::observability::metrics;
use crate::proxy::handler::ProxyState;
use crate::proxy::relay::{Relay, DOWNSTREAM};
use crate::proxy::request::{origin_headers, ProxyQuery, ProxyRequest, DESTINATION_PARAM};
use crate::proxy::upstream::UpstreamSession;

pub const MANIFEST_PATH: &str = "/proxy/mpd/manifest.m3u8";
pub const PLAYLIST_PATH: &str = "/proxy/mpd/playlist.m3u8";
pub const SEGMENT_PATH: &str = "/proxy/mpd/segment.mp4";

pub const PROFILE_PARAM: &str = "profile_id";
pub const INIT_PARAM: &str = "init_url";
pub const SEGMENT_PARAM: &str = "segment_url";
pub const MIME_PARAM: &str = "mime_type";

/// MPDs larger than this are refused rather than buffered.
const MAX_MANIFEST_BYTES: usize = 16 * 1024 * 1024;

pub async fn manifest_handler(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
) -> Result<Response<Body>, ProxyError> {
    let (parts, _) = request.into_parts();
    let query = ProxyQuery::parse(parts.uri.query());
    let links = Links::new(&parts.headers, &ctx, &query);

    let manifest = fetch_manifest(&state, &ctx, parts.headers, &query).await?;
    let body = dash::master_playlist(&manifest, |profile| links.playlist(profile));
    Ok(playlist_response(body, &ctx))
}

pub async fn playlist_handler(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
) -> Result<Response<Body>, ProxyError> {
    let (parts, _) = request.into_parts();
    let query = ProxyQuery::parse(parts.uri.query());
    let profile_id = query.require(PROFILE_PARAM)?.to_string();
    let links = Links::new(&parts.headers, &ctx, &query);

    let manifest = fetch_manifest(&state, &ctx, parts.headers, &query).await?;
    let profile = manifest
        .profile(&profile_id)
        .ok_or(ProxyError::ProfileNotFound(profile_id))?;
    let body = dash::media_playlist(&manifest, profile, |profile, segment| {
        links.segment(profile, segment)
    });
    Ok(playlist_response(body, &ctx))
}

/// Relay the init section, when there is one, then the segment.
pub async fn segment_handler(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
) -> Result<Response<Body>, ProxyError> {
    let (parts, _) = request.into_parts();
    let query = ProxyQuery::parse(parts.uri.query());
    let segment_url = query.require(SEGMENT_PARAM)?;
    let content_type = HeaderValue::from_str(query.get(MIME_PARAM).unwrap_or("video/mp4"))
        .map_err(|_| ProxyError::InvalidDestination("invalid `mime_type` parameter".to_string()))?;
    let headers = origin_headers(parts.headers, &query)?;

    let relay = Relay {
        chunk_size: state.chunk_size,
        cancel: ctx.cancel.child_token(),
        relayed: Arc::clone(&ctx.relayed),
    };
    let init = match query.get(INIT_PARAM) {
        Some(url) => Some(open_media(&state, url, headers.clone(), &relay).await?),
        None => None,
    };
    let segment = open_media(&state, segment_url, headers, &relay).await?;
    tracing::debug!(
        connection_id = %ctx.connection,
        worker = %state.worker,
        origin = %segment.origin,
        init = init.is_some(),
        "Relaying segment"
    );

    let length = match &init {
        Some(init) => content_length(init.response.headers())
            .zip(content_length(segment.response.headers()))
            .map(|(a, b)| a + b),
        None => content_length(segment.response.headers()),
    };
    let origin = segment.origin.clone();
    let segment_body = segment.response.into_body();
    let body = match init {
        Some(init) => relay.downstream(chain(init.response.into_body(), segment_body), &origin),
        None => relay.downstream(segment_body, &origin),
    };

    let mut response = Response::new(body);
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = length {
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn fetch_manifest(
    state: &ProxyState,
    ctx: &RequestContext,
    headers: HeaderMap,
    query: &ProxyQuery,
) -> Result<Manifest, ProxyError> {
    let mpd_url = query.require(DESTINATION_PARAM)?;
    let request = ProxyRequest::get(mpd_url, origin_headers(headers, query)?)?;
    let base = Url::parse(mpd_url).map_err(|e| ProxyError::InvalidDestination(e.to_string()))?;

    let session = UpstreamSession::open(&state.client, request, &state.retry, ctx.cancel.child_token()).await?;
    let origin = session.origin;
    let status = session.response.status();
    if !status.is_success() {
        return Err(ProxyError::UpstreamStatus {
            origin,
            status: status.as_u16(),
        });
    }

    let invalid = |reason: String| ProxyError::InvalidManifest {
        origin: origin.clone(),
        reason,
    };
    let bytes = Limited::new(session.response.into_body(), MAX_MANIFEST_BYTES)
        .collect()
        .await
        .map_err(|e| invalid(e.to_string()))?
        .to_bytes();
    let xml = std::str::from_utf8(&bytes).map_err(|e| invalid(e.to_string()))?;
    let manifest = dash::parse(xml, &base, chrono::Utc::now()).map_err(|e| invalid(e.to_string()))?;
    tracing::debug!(
        origin = %origin,
        live = manifest.is_live,
        profiles = manifest.profiles.len(),
        bytes = bytes.len(),
        "Parsed MPD"
    );
    Ok(manifest)
}

/// Open one media resource; anything but a 2xx is a gateway error.
async fn open_media(
    state: &ProxyState,
    url: &str,
    headers: HeaderMap,
    relay: &Relay,
) -> Result<UpstreamSession, ProxyError> {
    let request = ProxyRequest::get(url, headers)?;
    let session = UpstreamSession::open(&state.client, request, &state.retry, relay.cancel.clone()).await?;
    let status = session.response.status();
    if !status.is_success() {
        return Err(ProxyError::UpstreamStatus {
            origin: session.origin,
            status: status.as_u16(),
        });
    }
    Ok(session)
}

fn chain(
    first: Incoming,
    second: Incoming,
) -> impl hyper::body::Body<Data = Bytes, Error = hyper::Error> + Send + Unpin + 'static {
    let frames = first
        .into_data_stream()
        .chain(second.into_data_stream())
        .map_ok(Frame::data);
    StreamBody::new(frames)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn playlist_response(body: String, ctx: &RequestContext) -> Response<Body> {
    let len = body.len() as u64;
    ctx.relayed.fetch_add(len, Ordering::Relaxed);
    metrics::record_bytes(DOWNSTREAM, len);

    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(MPEGURL));
    response
}

/// Builds the proxy links written into playlists.
struct Links<'a> {
    /// `scheme://host` of the proxy as the client reached it, or empty for
    /// host-relative links.
    base: String,
    query: &'a ProxyQuery,
}

impl<'a> Links<'a> {
    fn new(headers: &HeaderMap, ctx: &RequestContext, query: &'a ProxyQuery) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .filter(|h| {
                !h.is_empty()
                    && h.chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']'))
            });
        let base = match host {
            Some(host) => format!("{}://{host}", ctx.client.scheme.unwrap_or("http")),
            None => String::new(),
        };
        Self { base, query }
    }

    fn playlist(&self, profile: &Profile) -> String {
        let query = self.query.with(&[], &[(PROFILE_PARAM, &profile.id)]);
        format!("{}{PLAYLIST_PATH}?{}", self.base, query.encode())
    }

    fn segment(&self, profile: &Profile, segment: &Segment) -> String {
        let mut set = vec![(SEGMENT_PARAM, segment.media.as_str()), (MIME_PARAM, profile.mime_type.as_str())];
        let mut drop = vec![DESTINATION_PARAM, PROFILE_PARAM];
        match &profile.init_url {
            Some(init) => set.insert(0, (INIT_PARAM, init.as_str())),
            None => drop.push(INIT_PARAM),
        }
        let query = self.query.with(&drop, &set);
        format!("{}{SEGMENT_PATH}?{}", self.base, query.encode())
    }
}
