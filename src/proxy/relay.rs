//! Bounded byte relay between client and origin.
//!
//! # Responsibilities
//! - Forward body frames without buffering the whole payload
//! - Cap every emitted chunk at the configured size
//! - Stop both directions when the session's cancellation token fires
//!
//! # Design Decisions
//! - A failure mid-stream is surfaced as a stream error, so the connection
//!   is aborted instead of ending as if the body were complete
//! - The downstream relay owns a drop guard on the session token: when the
//!   client side goes away, the upstream side is cancelled with it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use http_body_util::BodyExt;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ProxyError;
use crate::observability::metrics;

/// Origin → client.
pub const DOWNSTREAM: &str = "downstream";
/// Client → origin.
pub const UPSTREAM: &str = "upstream";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay cancelled")]
    Cancelled,
    #[error("{0}")]
    Stream(String),
}

/// Relay settings shared by both directions of one upstream session.
#[derive(Debug, Clone)]
pub struct Relay {
    pub chunk_size: usize,
    pub cancel: CancellationToken,
    /// Bytes delivered to the client.
    pub relayed: Arc<AtomicU64>,
}

impl Relay {
    /// Wrap the origin response body for the client.
    pub fn downstream<B>(&self, body: B, origin: &str) -> Body
    where
        B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: std::fmt::Display,
    {
        let state = RelayState {
            body,
            pending: Bytes::new(),
            chunk_size: self.chunk_size,
            cancel: self.cancel.clone(),
            direction: DOWNSTREAM,
            counter: Some(Arc::clone(&self.relayed)),
            origin: Some(origin.to_string()),
            _guard: Some(self.cancel.clone().drop_guard()),
            done: false,
        };
        Body::from_stream(relay_stream(state))
    }

    /// Wrap the client request body for the origin.
    pub fn upstream<B>(&self, body: B) -> Body
    where
        B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: std::fmt::Display,
    {
        let state = RelayState {
            body,
            pending: Bytes::new(),
            chunk_size: self.chunk_size,
            cancel: self.cancel.clone(),
            direction: UPSTREAM,
            counter: None,
            origin: None,
            _guard: None,
            done: false,
        };
        Body::from_stream(relay_stream(state))
    }
}

struct RelayState<B> {
    body: B,
    pending: Bytes,
    chunk_size: usize,
    cancel: CancellationToken,
    direction: &'static str,
    counter: Option<Arc<AtomicU64>>,
    /// Set on the origin side; used to report stream failures.
    origin: Option<String>,
    _guard: Option<DropGuard>,
    done: bool,
}

impl<B> RelayState<B> {
    fn emit(&mut self) -> Bytes {
        let len = self.pending.len().min(self.chunk_size);
        let chunk = self.pending.split_to(len);
        if let Some(counter) = &self.counter {
            counter.fetch_add(len as u64, Ordering::Relaxed);
        }
        metrics::record_bytes(self.direction, len as u64);
        chunk
    }

    fn fail(&mut self, err: RelayError) -> RelayError {
        self.done = true;
        if let (RelayError::Stream(reason), Some(origin)) = (&err, &self.origin) {
            let err = ProxyError::UpstreamStream {
                origin: origin.clone(),
                reason: reason.clone(),
            };
            tracing::warn!(error = %err, "Truncating response");
            metrics::record_upstream_error(err.kind());
        }
        // The other direction stops too.
        self.cancel.cancel();
        err
    }
}

fn relay_stream<B>(state: RelayState<B>) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::fmt::Display,
{
    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            if !st.pending.is_empty() {
                let chunk = st.emit();
                return Some((Ok(chunk), st));
            }

            let frame = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => {
                    let err = st.fail(RelayError::Cancelled);
                    return Some((Err(err), st));
                }
                frame = st.body.frame() => frame,
            };

            match frame {
                None => return None,
                Some(Ok(frame)) => {
                    // Trailers are not relayed.
                    if let Ok(data) = frame.into_data() {
                        st.pending = data;
                    }
                }
                Some(Err(e)) => {
                    let err = st.fail(RelayError::Stream(e.to_string()));
                    return Some((Err(err), st));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http_body_util::{Full, StreamBody};
    use hyper::body::Frame;
    use std::time::Duration;

    fn relay(chunk_size: usize) -> Relay {
        Relay {
            chunk_size,
            cancel: CancellationToken::new(),
            relayed: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn frames_are_split_to_chunk_size() {
        let relay = relay(4);
        let body = relay.downstream(Full::new(Bytes::from_static(b"0123456789")), "http://origin.test");

        let mut stream = body.into_data_stream();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        assert_eq!(chunks, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
        assert_eq!(relay.relayed.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn cancellation_stops_a_stalled_body() {
        let relay = relay(1024);
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, std::io::Error>>(1);
        let stalled = StreamBody::new(receiver_stream(rx));
        let mut stream = relay.downstream(stalled, "http://origin.test").into_data_stream();

        tx.send(Ok(Frame::data(Bytes::from_static(b"first")))).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");

        let cancel = relay.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("relay ignored cancellation");
        assert!(next.unwrap().is_err());
        assert!(stream.next().await.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn dropping_downstream_cancels_session() {
        let relay = relay(1024);
        let body = relay.downstream(Full::new(Bytes::from_static(b"abc")), "http://origin.test");
        assert!(!relay.cancel.is_cancelled());
        drop(body);
        assert!(relay.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn origin_error_ends_stream_with_error() {
        let relay = relay(1024);
        let frames = futures_util::stream::iter(vec![
            Ok(Frame::data(Bytes::from_static(b"part"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut stream = relay
            .downstream(StreamBody::new(frames), "http://origin.test")
            .into_data_stream();

        assert_eq!(stream.next().await.unwrap().unwrap(), "part");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert!(relay.cancel.is_cancelled());
        assert_eq!(relay.relayed.load(Ordering::Relaxed), 4);
    }

    fn receiver_stream<T: Send + 'static>(
        mut rx: tokio::sync::mpsc::Receiver<T>,
    ) -> impl Stream<Item = T> + Send + Unpin {
        Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}
