//! Per-worker request dispatcher.
//!
//! # Responsibilities
//! - Drive one HTTP/1.1 exchange per connection through the worker's router
//! - Resolve the client address and attach the request context
//! - Enforce the connection deadline and the worker's abort signal
//! - Emit one access event per terminal connection outcome
//!
//! # Design Decisions
//! - Keep-alive is off: one connection carries exactly one request, so a
//!   worker's request count is its connection count
//! - Timeout and abort drop the connection future, which drops the response
//!   body and with it the upstream session
//! - A deadline that fires before the response head is ready answers 504;
//!   one that fires mid-body can only cut the connection

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{Method, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::loader::ConfigError;
use crate::config::validation::ValidationError;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::net::{Connection, ConnectionId};
use crate::observability::logging::ACCESS_TARGET;
use crate::observability::metrics;
use crate::pool::{ConnectionHandler, HandlerFactory, WorkerId};
use crate::proxy::handler::{build_router, ProxyState};
use crate::proxy::upstream::UpstreamConnector;
use crate::resilience::ConnectRetry;
use crate::security::{Resolution, TrustedProxies};

/// Time allowed, past the deadline, to write the 504 raised by the deadline.
const TIMEOUT_RESPONSE_GRACE: Duration = Duration::from_secs(1);

/// Per-request context, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub connection: ConnectionId,
    pub worker: WorkerId,
    pub client: Resolution,
    /// Fires on timeout, drain abort, or when the connection ends.
    pub cancel: CancellationToken,
    /// Response bytes delivered to the client.
    pub relayed: Arc<AtomicU64>,
}

/// What the access log needs from the request once it has been answered.
#[derive(Debug)]
struct Exchange {
    method: Method,
    path: String,
    status: StatusCode,
    request_id: Option<String>,
    client: Resolution,
    /// The 504 produced because the deadline fired first.
    deadline_response: bool,
}

#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(hyper::Error),
    TimedOut,
    Aborted,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed(_) => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Aborted => "aborted",
        }
    }
}

/// Serves connections for one worker.
#[derive(Clone)]
pub struct Dispatcher {
    worker: WorkerId,
    router: Router,
    resolver: Arc<TrustedProxies>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(worker: WorkerId, router: Router, resolver: Arc<TrustedProxies>, request_timeout: Duration) -> Self {
        Self {
            worker,
            router,
            resolver,
            request_timeout,
        }
    }

    async fn serve(self, mut conn: Connection, cancel: CancellationToken) {
        let Self {
            worker,
            router,
            resolver,
            request_timeout,
        } = self;
        let connection = conn.id;
        let peer = conn.peer;
        let deadline = conn.deadline;
        let relayed = Arc::new(AtomicU64::new(0));
        let exchange: Arc<Mutex<Option<Exchange>>> = Arc::default();

        let service = {
            let exchange = Arc::clone(&exchange);
            let relayed = Arc::clone(&relayed);
            let cancel = cancel.clone();
            service_fn(move |mut req: Request<Incoming>| {
                let client = resolver.resolve(peer, req.headers());
                if client.is_forged() {
                    let err = ProxyError::ForgedForwardingHeader { peer: peer.ip() };
                    tracing::warn!(connection_id = %connection, worker = %worker, error = %err, "Ignoring forwarding header");
                }
                req.extensions_mut().insert(RequestContext {
                    connection,
                    worker,
                    client,
                    cancel: cancel.clone(),
                    relayed: Arc::clone(&relayed),
                });

                let method = req.method().clone();
                let path = req.uri().path().to_string();
                let router = router.clone();
                let exchange = Arc::clone(&exchange);
                async move {
                    let (response, deadline_response) =
                        match tokio::time::timeout_at(deadline, router.oneshot(req)).await {
                            Ok(response) => (response?, false),
                            Err(_) => (ProxyError::ClientTimeout(request_timeout).into_response(), true),
                        };
                    let request_id = response
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if let Ok(mut slot) = exchange.lock() {
                        *slot = Some(Exchange {
                            method,
                            path,
                            status: response.status(),
                            request_id,
                            client,
                            deadline_response,
                        });
                    }
                    Ok::<_, Infallible>(response)
                }
            })
        };

        let outcome = {
            let serving = http1::Builder::new()
                .keep_alive(false)
                .timer(TokioTimer::new())
                .serve_connection(TokioIo::new(&mut conn.stream), service);
            let mut serving = std::pin::pin!(serving);

            let mut outcome = tokio::select! {
                res = &mut serving => match res {
                    Ok(()) => Outcome::Completed,
                    Err(e) => Outcome::Failed(e),
                },
                _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Aborted,
            };
            if matches!(outcome, Outcome::TimedOut) && !response_started(&exchange) {
                tokio::select! {
                    _ = &mut serving => {}
                    _ = tokio::time::sleep(TIMEOUT_RESPONSE_GRACE) => {}
                    _ = cancel.cancelled() => outcome = Outcome::Aborted,
                }
            }
            outcome
        };
        // Whatever is still attached to this connection stops now.
        cancel.cancel();

        match &outcome {
            Outcome::Completed => {}
            Outcome::Failed(e) => {
                tracing::debug!(connection_id = %connection, worker = %worker, error = %e, "Connection ended with error");
            }
            Outcome::TimedOut => {
                let err = ProxyError::ClientTimeout(request_timeout);
                tracing::warn!(connection_id = %connection, worker = %worker, peer = %peer, error = %err, "Aborting connection");
            }
            Outcome::Aborted => {
                tracing::warn!(connection_id = %connection, worker = %worker, peer = %peer, "Connection aborted at drain deadline");
            }
        }

        metrics::record_connection(outcome.label(), conn.accepted_at);
        let exchange = exchange.lock().ok().and_then(|mut slot| slot.take());
        log_access(
            connection,
            worker,
            &conn,
            exchange.as_ref(),
            relayed.load(Ordering::Relaxed),
            &outcome,
        );
    }
}

/// Whether the router produced a response of its own before the deadline.
fn response_started(exchange: &Mutex<Option<Exchange>>) -> bool {
    exchange
        .lock()
        .map(|slot| slot.as_ref().is_some_and(|ex| !ex.deadline_response))
        .unwrap_or(true)
}

fn log_access(
    connection: ConnectionId,
    worker: WorkerId,
    conn: &Connection,
    exchange: Option<&Exchange>,
    bytes: u64,
    outcome: &Outcome,
) {
    let duration_ms = conn.accepted_at.elapsed().as_millis() as u64;
    match exchange {
        Some(ex) => tracing::info!(
            target: ACCESS_TARGET,
            connection_id = %connection,
            worker = %worker,
            peer = %conn.peer,
            client = %ex.client.client,
            scheme = ex.client.scheme.unwrap_or("http"),
            method = %ex.method,
            path = %ex.path,
            status = ex.status.as_u16(),
            request_id = ex.request_id.as_deref().unwrap_or("-"),
            bytes,
            duration_ms,
            outcome = outcome.label(),
            "{} \"{} {}\" {} {}",
            ex.client.client,
            ex.method,
            ex.path,
            ex.status.as_u16(),
            bytes
        ),
        None => tracing::info!(
            target: ACCESS_TARGET,
            connection_id = %connection,
            worker = %worker,
            peer = %conn.peer,
            bytes,
            duration_ms,
            outcome = outcome.label(),
            "{} \"-\" - {}",
            conn.peer.ip(),
            bytes
        ),
    }
}

impl ConnectionHandler for Dispatcher {
    fn handle(&self, conn: Connection, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(self.clone().serve(conn, cancel))
    }
}

/// Builds a dispatcher, with its own upstream client, for every new worker.
pub struct DispatcherFactory {
    connector: UpstreamConnector,
    resolver: Arc<TrustedProxies>,
    retry: ConnectRetry,
    chunk_size: usize,
    request_timeout: Duration,
}

impl DispatcherFactory {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let resolver = TrustedProxies::from_config(&config.forwarding).map_err(|message| {
            ProxyError::Config(ConfigError::Validation(vec![ValidationError {
                field: "forwarding",
                message,
            }]))
        })?;

        Ok(Self {
            connector: UpstreamConnector::new(
                &config.upstream,
                Duration::from_secs(config.timeouts.connect_secs),
            )?,
            resolver: Arc::new(resolver),
            retry: ConnectRetry::from_config(&config.upstream),
            chunk_size: config.upstream.chunk_size,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }
}

impl HandlerFactory for DispatcherFactory {
    fn build(&self, worker: WorkerId) -> Arc<dyn ConnectionHandler> {
        let router = build_router(ProxyState {
            worker,
            client: self.connector.client(),
            retry: self.retry,
            chunk_size: self.chunk_size,
        });
        Arc::new(Dispatcher::new(
            worker,
            router,
            Arc::clone(&self.resolver),
            self.request_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ClientSource;

    fn exchange(deadline_response: bool) -> Exchange {
        Exchange {
            method: Method::GET,
            path: "/proxy/stream".into(),
            status: if deadline_response {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::OK
            },
            request_id: None,
            client: Resolution {
                client: "127.0.0.1".parse().unwrap(),
                peer: "127.0.0.1:40000".parse().unwrap(),
                scheme: None,
                source: ClientSource::Peer,
            },
            deadline_response,
        }
    }

    #[test]
    fn factory_builds_from_default_config() {
        assert!(DispatcherFactory::from_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn only_router_responses_count_as_started() {
        assert!(!response_started(&Mutex::new(None)));
        assert!(!response_started(&Mutex::new(Some(exchange(true)))));
        assert!(response_started(&Mutex::new(Some(exchange(false)))));
    }
}
