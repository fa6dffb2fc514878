//! Test utilities for relay integration testing.
//!
//! Provides helpers for starting a relay on an ephemeral port and driving it
//! with real WebSocket clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use keyrelay::{ConnectionRegistry, RelayServer, RelayServerConfig};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that no frame is coming.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// Initialize test logging once per test binary.
pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("keyrelay=debug")
            .with_test_writer()
            .try_init();
    });
}

/// A relay running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a relay with default limits.
    pub async fn start() -> Self {
        Self::start_with_config(RelayServerConfig::default()).await
    }

    /// Start a relay with the given limits; `addr` is ignored.
    pub async fn start_with_config(config: RelayServerConfig) -> Self {
        init_test();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local addr");

        let server = RelayServer::new(config).expect("Invalid test config");
        let registry = Arc::clone(server.connection_registry());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.serve(listener, shutdown).await {
                eprintln!("Test relay failed: {e}");
            }
        });

        Self {
            addr,
            registry,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// The shared registry, for asserting on who is online.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connect a new, unregistered client.
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(&self.ws_url()).await
    }

    /// Connect a client and register it as `username`.
    pub async fn connect_as(&self, username: &str) -> TestClient {
        let mut client = self.connect().await;
        let reply = client.register(username).await;
        assert_eq!(
            reply,
            json!({"type": "registered", "username": username}),
            "registration of {username} failed"
        );
        client
    }

    /// Poll until `username` is (or is no longer) online.
    pub async fn wait_online(&self, username: &str, online: bool) {
        let registry = Arc::clone(&self.registry);
        let name = username.to_string();
        timeout(DEFAULT_TIMEOUT, async move {
            while registry.is_online(&name) != online {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{username} online state never became {online}"));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A WebSocket client speaking the relay's JSON envelopes.
pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (stream, _) = timeout(DEFAULT_TIMEOUT, connect_async(url))
            .await
            .expect("Timed out connecting")
            .expect("Failed to connect");
        Self { stream }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_binary(&mut self, data: &[u8]) {
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .expect("Failed to send binary frame");
    }

    /// Receive the next text frame as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(DEFAULT_TIMEOUT, self.stream.next())
                .await
                .expect("Timed out waiting for frame")
                .expect("Connection closed while waiting for frame")
                .expect("WebSocket error while waiting for frame");
            match message {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("Frame is not JSON");
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("Unexpected frame: {other:?}"),
            }
        }
    }

    /// Send `register` and return the reply.
    pub async fn register(&mut self, username: &str) -> Value {
        self.send_json(json!({"type": "register", "username": username}))
            .await;
        self.recv_json().await
    }

    /// Assert that no text frame arrives within the silence window.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            timeout(SILENCE_WINDOW, self.stream.next()).await
        {
            panic!("Expected silence, got {text}");
        }
    }

    /// Assert that the server closes the connection.
    pub async fn expect_closed(&mut self) {
        let closed = timeout(DEFAULT_TIMEOUT, async {
            loop {
                match self.stream.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "Server did not close the connection");
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
