//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use stream_proxy::lifecycle::Shutdown;
use stream_proxy::pool::WorkerPool;
use stream_proxy::{Acceptor, HttpServer, ProxyConfig, ProxyError};

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub pool: Arc<WorkerPool>,
    pub handle: JoinHandle<Result<(), ProxyError>>,
}

impl TestProxy {
    /// URL that streams `origin_url` through the proxy.
    pub fn stream_url(&self, origin_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(origin_url.as_bytes()).collect();
        format!("http://{}/proxy/stream/media.ts?d={}", self.addr, encoded)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a proxy on 127.0.0.1 with two workers, after `configure` has adjusted the config.
pub async fn start_proxy(configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.workers.count = 2;
    config.upstream.retry_base_delay_ms = 10;
    config.upstream.retry_max_delay_ms = 20;
    configure(&mut config);

    let acceptor = Acceptor::bind(
        &config.listener,
        Duration::from_secs(config.timeouts.request_secs),
    )
    .await
    .unwrap();
    let addr = acceptor.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config).unwrap();
    let pool = server.pool();
    let handle = tokio::spawn(server.run(acceptor, shutdown.subscribe()));

    TestProxy {
        addr,
        shutdown,
        pool,
        handle,
    }
}

/// Client that opens a fresh connection per request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// A raw-TCP origin server with programmable behavior.
pub struct MockOrigin {
    pub addr: SocketAddr,
    /// Requests received.
    pub hits: Arc<AtomicUsize>,
    /// Raw request heads, in arrival order.
    pub heads: Arc<Mutex<Vec<String>>>,
}

impl MockOrigin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_head(&self) -> String {
        self.heads.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

/// Start an origin; `behavior` gets each socket after its request head was read.
pub async fn start_origin<F, Fut>(behavior: F) -> MockOrigin
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let heads = Arc::new(Mutex::new(Vec::new()));
    let behavior = Arc::new(behavior);

    {
        let hits = Arc::clone(&hits);
        let heads = Arc::clone(&heads);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let behavior = Arc::clone(&behavior);
                let hits = Arc::clone(&hits);
                let heads = Arc::clone(&heads);
                tokio::spawn(async move {
                    let head = read_head(&mut socket).await;
                    heads.lock().unwrap().push(head);
                    hits.fetch_add(1, Ordering::SeqCst);
                    behavior(socket).await;
                });
            }
        });
    }

    MockOrigin { addr, hits, heads }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") && buf.len() < 64 * 1024 {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&byte[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub async fn write_chunked_head(socket: &mut TcpStream, content_type: &str) {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
    );
    socket.write_all(head.as_bytes()).await.unwrap();
}

pub async fn write_chunk(socket: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    socket.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    socket.write_all(data).await?;
    socket.write_all(b"\r\n").await?;
    socket.flush().await
}

pub async fn finish_chunked(socket: &mut TcpStream) {
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

/// Close with RST instead of FIN.
#[allow(deprecated)]
pub fn reset(socket: TcpStream) {
    let _ = socket.set_linger(Some(Duration::ZERO));
    drop(socket);
}

/// Payload of the `i`-th test chunk.
pub fn numbered_chunk(i: usize) -> Vec<u8> {
    format!("chunk-{i:02}\n").into_bytes()
}
