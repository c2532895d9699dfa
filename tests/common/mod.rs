//! Shared utilities for integration tests: raw-TCP mock upstreams and a
//! gateway bound to ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use relay_gateway::config::GatewayConfig;
use relay_gateway::lifecycle::{launch, Running, Shutdown};
use relay_gateway::session::minimal;

/// Read one HTTP/1.1 request: head as text, body per Content-Length.
pub async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return (String::from_utf8_lossy(&buf).into_owned(), Vec::new()),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }
    (head, body)
}

async fn serve<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(handler(socket));
        }
    });
    addr
}

/// Upstream answering every request with a fixed status line and body.
/// HEAD requests get the same headers and no body.
pub async fn start_fixed_upstream(status: &'static str, body: &'static str) -> SocketAddr {
    serve(move |mut socket| async move {
        let (head, _) = read_request(&mut socket).await;
        let payload = if head.starts_with("HEAD ") { "" } else { body };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nX-Upstream: mock\r\nAccess-Control-Allow-Origin: https://upstream.example\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            payload
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// Upstream echoing the raw request (head and body) as its response body.
pub async fn start_echo_upstream() -> SocketAddr {
    serve(|mut socket| async move {
        let (head, body) = read_request(&mut socket).await;
        let mut echoed = head.into_bytes();
        echoed.extend_from_slice(&body);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            echoed.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.write_all(&echoed).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// Upstream sending a chunked body, pausing `gap` between chunks.
pub async fn start_chunked_upstream(chunks: &'static [&'static str], gap: Duration) -> SocketAddr {
    serve(move |mut socket| async move {
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
            if socket.write_all(frame.as_bytes()).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// Upstream that accepts and reads the request but never answers.
pub async fn start_silent_upstream() -> SocketAddr {
    serve(|mut socket| async move {
        read_request(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    })
    .await
}

/// Upstream that closes the connection right after reading the request.
pub async fn start_resetting_upstream() -> SocketAddr {
    serve(|mut socket| async move {
        read_request(&mut socket).await;
        drop(socket);
    })
    .await
}

/// An address with nothing listening on it.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config with both listeners on ephemeral loopback ports.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.proxy.bind_address = "127.0.0.1:0".to_string();
    config.sessions.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Start the gateway with the built-in session handler.
pub async fn start_gateway(config: GatewayConfig) -> (Running, Shutdown) {
    let shutdown = Shutdown::new();
    let factory = minimal::factory("test-gateway");
    let running = launch(config, factory, &shutdown).await.unwrap();
    (running, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
