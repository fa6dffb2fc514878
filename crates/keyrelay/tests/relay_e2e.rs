//! End-to-end relay scenarios over real WebSocket connections.

mod common;

use common::TestServer;
use keyrelay::RelayServerConfig;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_pubkey_exchange_and_message() {
    let server = TestServer::start().await;
    let mut alice = server.connect_as("alice").await;
    let mut bob = server.connect_as("bob").await;

    alice
        .send_json(json!({"type": "pubkey_request", "to": "bob"}))
        .await;
    assert_eq!(
        bob.recv_json().await,
        json!({"type": "pubkey_request", "to": "bob", "from": "alice"})
    );

    bob.send_json(json!({"type": "pubkey_response", "to": "alice", "pubkey": "<armored>"}))
        .await;
    assert_eq!(
        alice.recv_json().await,
        json!({"type": "pubkey_response", "to": "alice", "from": "bob", "pubkey": "<armored>"})
    );

    alice
        .send_json(json!({"type": "msg", "to": "bob", "pgp": "<ciphertext>"}))
        .await;
    let delivered = bob.recv_json().await;
    assert_eq!(delivered["type"], "msg");
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["pgp"], "<ciphertext>");

    alice.expect_silence().await;
}

#[tokio::test]
async fn test_spoofed_from_is_overwritten() {
    let server = TestServer::start().await;
    let mut alice = server.connect_as("alice").await;
    let mut bob = server.connect_as("bob").await;

    alice
        .send_json(json!({"type": "msg", "to": "bob", "from": "carol", "pgp": "x"}))
        .await;

    let delivered = bob.recv_json().await;
    assert_eq!(delivered["from"], "alice");
}

#[tokio::test]
async fn test_send_to_offline_user() {
    let server = TestServer::start().await;
    let mut alice = server.connect_as("alice").await;

    alice
        .send_json(json!({"type": "msg", "to": "nobody", "pgp": "x"}))
        .await;

    assert_eq!(
        alice.recv_json().await,
        json!({"type": "error", "message": "user not online"})
    );
    alice.expect_silence().await;
}

#[tokio::test]
async fn test_missing_recipient() {
    let server = TestServer::start().await;
    let mut alice = server.connect_as("alice").await;

    alice.send_json(json!({"type": "pubkey_request"})).await;

    assert_eq!(
        alice.recv_json().await,
        json!({"type": "error", "message": "missing 'to'"})
    );
}

#[tokio::test]
async fn test_invalid_json_keeps_connection_open() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw("this is not json").await;
    assert_eq!(
        client.recv_json().await,
        json!({"type": "error", "message": "invalid json"})
    );
    client.expect_silence().await;

    // Still unregistered, still usable.
    assert_eq!(
        client.register("alice").await,
        json!({"type": "registered", "username": "alice"})
    );
}

#[tokio::test]
async fn test_routing_before_registration() {
    let server = TestServer::start().await;
    let _bob = server.connect_as("bob").await;
    let mut client = server.connect().await;

    client
        .send_json(json!({"type": "msg", "to": "bob", "pgp": "x"}))
        .await;

    assert_eq!(
        client.recv_json().await,
        json!({"type": "error", "message": "not registered"})
    );
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let server = TestServer::start_with_config(RelayServerConfig {
        max_frame_bytes: 64,
        ..RelayServerConfig::default()
    })
    .await;
    let mut alice = server.connect_as("alice").await;
    let mut bob = server.connect_as("bob").await;

    let pgp = "x".repeat(200);
    alice
        .send_json(json!({"type": "msg", "to": "bob", "pgp": pgp}))
        .await;

    alice.expect_closed().await;
    server.wait_online("alice", false).await;
    bob.expect_silence().await;
    assert!(server.registry().is_online("bob"));
}

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let server = TestServer::start().await;
    let mut alice = server.connect_as("alice").await;
    let mut bob = server.connect_as("bob").await;

    alice.send_binary(&[0xde, 0xad, 0xbe, 0xef]).await;
    alice.expect_silence().await;
    bob.expect_silence().await;

    // The session is untouched and keeps routing.
    alice
        .send_json(json!({"type": "msg", "to": "bob", "pgp": "<ciphertext>"}))
        .await;
    let delivered = bob.recv_json().await;
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["pgp"], "<ciphertext>");
    assert!(server.registry().is_online("alice"));
}

#[tokio::test]
async fn test_health_probes_are_plain_ok() {
    let server = TestServer::start().await;

    for path in ["/", "/health"] {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{path}: {response}");
        assert!(response.ends_with("\r\n\r\nok"), "{path}: {response}");
    }
}
