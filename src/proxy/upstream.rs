//! Origin connections.
//!
//! # Responsibilities
//! - Build the HTTP/HTTPS connector shared by all worker clients
//! - Open an upstream session, retrying connect failures with backoff
//!
//! # Design Decisions
//! - Each worker gets its own `Client` (and idle pool) built from a clone of
//!   the connector; workers never share origin connections
//! - Pre-response failures map to `UpstreamConnect` (502); nothing after the
//!   response head is retried

use std::error::Error as StdError;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::proxy::request::ProxyRequest;
use crate::resilience::ConnectRetry;

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Connector template; `client()` builds a worker's private client from it.
#[derive(Clone)]
pub struct UpstreamConnector {
    connector: HttpsConnector<HttpConnector>,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
}

impl UpstreamConnector {
    pub fn new(config: &UpstreamConfig, connect_timeout: Duration) -> Result<Self, ProxyError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));
        http.set_nodelay(true);

        // Name the provider: the process default is ambiguous once more than
        // one rustls backend is linked.
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        Ok(Self {
            connector,
            pool_idle_timeout: Duration::from_secs(config.pool_idle_timeout_secs),
            pool_max_idle_per_host: config.pool_max_idle_per_host,
        })
    }

    pub fn client(&self) -> UpstreamClient {
        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build(self.connector.clone())
    }
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .finish()
    }
}

/// An origin response whose body is still to be relayed.
#[derive(Debug)]
pub struct UpstreamSession {
    pub origin: String,
    pub response: Response<Incoming>,
}

impl UpstreamSession {
    /// Send `request` and wait for the response head.
    pub async fn open(
        client: &UpstreamClient,
        request: ProxyRequest,
        retry: &ConnectRetry,
        cancel: CancellationToken,
    ) -> Result<Self, ProxyError> {
        let ProxyRequest {
            method,
            target,
            origin,
            headers,
            body,
            replayable,
        } = request;
        let mut body = Some(body);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_body = if replayable {
                Body::empty()
            } else {
                // Not replayable, so there is exactly one attempt.
                body.take().unwrap_or_else(Body::empty)
            };

            let mut req = Request::builder()
                .method(method.clone())
                .uri(target.clone())
                .body(attempt_body)
                .map_err(|e| ProxyError::InvalidDestination(e.to_string()))?;
            *req.headers_mut() = headers.clone();

            let result = tokio::select! {
                res = client.request(req) => res,
                _ = cancel.cancelled() => {
                    return Err(ProxyError::UpstreamConnect {
                        origin,
                        reason: "cancelled".to_string(),
                    });
                }
            };

            match result {
                Ok(response) => {
                    tracing::debug!(
                        origin = %origin,
                        status = %response.status(),
                        attempt,
                        "Upstream responded"
                    );
                    return Ok(Self { origin, response });
                }
                Err(e) => {
                    metrics::record_upstream_error("connect");
                    let reason = error_chain(&e);
                    if !retry.allows(attempt, e.is_connect(), replayable) {
                        return Err(ProxyError::UpstreamConnect { origin, reason });
                    }
                    let delay = retry.delay(attempt);
                    tracing::info!(origin = %origin, attempt, delay = ?delay, error = %reason, "Retrying upstream connect");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(ProxyError::UpstreamConnect { origin, reason });
                        }
                    }
                }
            }
        }
    }
}

/// Render an error with its sources, `outer: inner: root`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use tokio::net::TcpListener;

    fn request(origin: &str) -> ProxyRequest {
        ProxyRequest {
            method: Method::GET,
            target: format!("{origin}/media.ts").parse().unwrap(),
            origin: origin.to_string(),
            headers: HeaderMap::new(),
            body: Body::empty(),
            replayable: true,
        }
    }

    fn connector() -> UpstreamConnector {
        UpstreamConnector::new(&UpstreamConfig::default(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn connector_builds_without_a_process_default_provider() {
        let connector = UpstreamConnector::new(&UpstreamConfig::default(), Duration::from_secs(1)).unwrap();
        let _first = connector.client();
        let _second = connector.client();
    }

    #[tokio::test]
    async fn refused_connection_is_upstream_connect_after_retries() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);

        let retry = ConnectRetry {
            max_retries: 2,
            backoff: crate::resilience::Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
        };
        let err = UpstreamSession::open(&connector().client(), request(&origin), &retry, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProxyError::UpstreamConnect { origin: o, .. } => assert_eq!(o, origin),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_session_gives_up() {
        // Accepts but never answers.
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", silent.local_addr().unwrap());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            UpstreamSession::open(&connector().client(), request(&origin), &ConnectRetry::none(), cancel),
        )
        .await
        .expect("open ignored cancellation");
        assert!(matches!(result, Err(ProxyError::UpstreamConnect { .. })));
        drop(silent);
    }
}
