// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Integration tests driving full sessions against a mock server.

use std::{
    future::Future,
    sync::{Arc, LazyLock},
    time::{Duration, Instant},
};

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    routing::get,
    Router,
};
use cryptology_client::{
    codec::{Packer, Unpacker},
    common::{consts::HEARTBEAT_MARKER, enums::ClientMessageType},
    crypto::{decrypt_and_verify, encrypt_and_sign},
    run_client, Cipher, ClientWriter, CryptologyClientConfig, CryptologyError, CryptologyResult,
    Keys, SessionHandle, SessionOptions,
};
use futures_util::future::BoxFuture;
use rsa::{RsaPrivateKey, RsaPublicKey};
use rstest::rstest;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::mpsc};

// RSA keygen is slow; one identity pair per side for the whole suite
static CLIENT_IDENTITY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap());
static SERVER_IDENTITY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap());

fn client_keys() -> Keys {
    Keys::new(RsaPublicKey::from(&*CLIENT_IDENTITY), Some(CLIENT_IDENTITY.clone()))
}

fn client_public_keys() -> Keys {
    Keys::new(RsaPublicKey::from(&*CLIENT_IDENTITY), None)
}

fn server_keys() -> Keys {
    Keys::new(RsaPublicKey::from(&*SERVER_IDENTITY), Some(SERVER_IDENTITY.clone()))
}

fn server_public_keys() -> Keys {
    Keys::new(RsaPublicKey::from(&*SERVER_IDENTITY), None)
}

fn test_config(url: &str) -> CryptologyClientConfig {
    CryptologyClientConfig::new("test-client", client_keys(), server_public_keys(), url).unwrap()
}

/// Serves one mock session handler on an ephemeral port, returning the URL.
async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: Fn(WebSocket) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let handler = handler.clone();
            async move { ws.on_upgrade(move |socket| handler(socket)) }
        }),
    );
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("ws://{addr}/ws")
}

/// Server side of an established session.
struct ServerPeer {
    socket: WebSocket,
    client_cipher: Cipher,
    server_cipher: Cipher,
    signed_frames: bool,
}

impl ServerPeer {
    /// Performs the server side of the handshake.
    ///
    /// `announce_version: false` replays a legacy server that omits the
    /// trailing version field and signs every frame.
    async fn accept(mut socket: WebSocket, last_seen_sequence: i64, announce_version: bool) -> Self {
        let hello = recv_binary(&mut socket).await;
        let plain = server_keys().decrypt(&hello).unwrap();
        let mut xdr = Unpacker::new(&plain);
        assert_eq!(xdr.unpack_bytes().unwrap(), b"test-client");
        let _last_seen_order = xdr.unpack_hyper().unwrap();
        let client_cipher = Cipher::new(xdr.unpack_bytes().unwrap()).unwrap();
        let client_version = xdr.unpack_u32().unwrap();

        let server_cipher = Cipher::random();
        let challenge = b"mock-server-challenge".to_vec();
        let mut reply = Packer::new();
        reply.pack_bytes(&challenge);
        reply.pack_hyper(last_seen_sequence);
        reply.pack_bytes(server_cipher.key());
        if announce_version {
            reply.pack_u32(client_version);
        }
        let blob = client_public_keys().encrypt(&reply.into_bytes()).unwrap();
        socket.send(Message::Binary(blob)).await.unwrap();

        let signature = recv_binary(&mut socket).await;
        client_public_keys().verify(&signature, &challenge).unwrap();

        Self {
            socket,
            client_cipher,
            server_cipher,
            signed_frames: !announce_version,
        }
    }

    /// Receives and decrypts one client frame.
    async fn recv_frame(&mut self) -> Vec<u8> {
        let blob = recv_binary(&mut self.socket).await;
        if self.signed_frames {
            decrypt_and_verify(&client_public_keys(), &self.client_cipher, &blob).unwrap()
        } else {
            self.client_cipher.decrypt(&blob).unwrap()
        }
    }

    /// Receives one client frame and returns its `(tag, id, payload)`.
    async fn recv_client_message(&mut self) -> (i32, i64, Value) {
        let plain = self.recv_frame().await;
        let mut xdr = Unpacker::new(&plain);
        let tag = xdr.unpack_enum().unwrap();
        let id = xdr.unpack_hyper().unwrap();
        let payload = serde_json::from_str(xdr.unpack_string().unwrap()).unwrap();
        (tag, id, payload)
    }

    async fn send_frame(&mut self, plaintext: &[u8]) {
        let blob = if self.signed_frames {
            encrypt_and_sign(&server_keys(), &self.server_cipher, plaintext).unwrap()
        } else {
            self.server_cipher.encrypt(plaintext)
        };
        self.socket.send(Message::Binary(blob)).await.unwrap();
    }

    async fn send_outbox(&mut self, outbox_id: i64, ts: f64, payload: &Value) {
        let mut xdr = Packer::new();
        xdr.pack_enum(1);
        xdr.pack_hyper(outbox_id);
        xdr.pack_f64(ts);
        xdr.pack_string(&payload.to_string());
        self.send_frame(&xdr.into_bytes()).await;
    }

    async fn send_rpc_response(&mut self, request_id: i64, payload: &Value) {
        let mut xdr = Packer::new();
        xdr.pack_enum(2);
        xdr.pack_hyper(request_id);
        xdr.pack_string(&payload.to_string());
        self.send_frame(&xdr.into_bytes()).await;
    }

    async fn send_error(&mut self, kind: i32, message: &str) {
        let mut xdr = Packer::new();
        xdr.pack_enum(3);
        xdr.pack_enum(kind);
        xdr.pack_string(message);
        self.send_frame(&xdr.into_bytes()).await;
    }

    async fn send_broadcast(&mut self, payload: &Value) {
        let mut xdr = Packer::new();
        xdr.pack_enum(4);
        xdr.pack_string(&payload.to_string());
        self.send_frame(&xdr.into_bytes()).await;
    }

    async fn send_throttle(&mut self, level: u32, sequence_id: i64, order_id: i64) {
        let mut xdr = Packer::new();
        xdr.pack_enum(5);
        xdr.pack_u32(level);
        xdr.pack_hyper(sequence_id);
        xdr.pack_hyper(order_id);
        self.send_frame(&xdr.into_bytes()).await;
    }

    async fn send_marker(&mut self) {
        self.socket
            .send(Message::Binary(HEARTBEAT_MARKER.to_vec()))
            .await
            .unwrap();
    }

    async fn close_with(mut self, code: u16) {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await
            .unwrap();
    }
}

async fn recv_binary(socket: &mut WebSocket) -> Vec<u8> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(data))) => return data,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("expected binary message, got {other:?}"),
        }
    }
}

fn idle_writer() -> ClientWriter {
    Box::new(|_handle, _sequence_id| {
        Box::pin(futures_util::future::pending::<CryptologyResult<()>>())
    })
}

fn boxed_writer<F, Fut>(f: F) -> ClientWriter
where
    F: FnOnce(SessionHandle, i64) -> Fut + Send + 'static,
    Fut: Future<Output = CryptologyResult<()>> + Send + 'static,
{
    Box::new(move |handle, sequence_id| Box::pin(f(handle, sequence_id)) as BoxFuture<'static, _>)
}

////////////////////////////////////////////////////////////////////////////////
// Handshake and sequencing
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_handshake_resumes_from_server_sequence() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let url = spawn_server(move |socket| {
        let tx = tx.clone();
        async move {
            let mut peer = ServerPeer::accept(socket, 41, true).await;
            tx.send(peer.recv_client_message().await).unwrap();
        }
    })
    .await;

    let writer = boxed_writer(|handle, sequence_id| async move {
        assert_eq!(sequence_id, 41);
        handle
            .send_message(sequence_id + 1, &json!({"@type": "Ping"}))
            .await
    });
    run_client(test_config(&url), SessionOptions::default(), writer)
        .await
        .unwrap();

    let (tag, sequence_id, payload) = rx.recv().await.unwrap();
    assert_eq!(tag, ClientMessageType::InboxMessage.as_i32());
    assert_eq!(sequence_id, 42);
    assert_eq!(payload, json!({"@type": "Ping"}));
}

#[rstest]
#[tokio::test]
async fn test_legacy_server_negotiates_signed_frames() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let url = spawn_server(move |socket| {
        let tx = tx.clone();
        async move {
            // No trailing version field: protocol generation 1
            let mut peer = ServerPeer::accept(socket, 0, false).await;
            tx.send(peer.recv_client_message().await).unwrap();
        }
    })
    .await;

    let writer = boxed_writer(|handle, sequence_id| async move {
        handle
            .send_message(sequence_id + 1, &json!({"@type": "Ping"}))
            .await
    });
    run_client(test_config(&url), SessionOptions::default(), writer)
        .await
        .unwrap();

    // recv_client_message verified the per-frame signature
    let (tag, sequence_id, _) = rx.recv().await.unwrap();
    assert_eq!(tag, ClientMessageType::InboxMessage.as_i32());
    assert_eq!(sequence_id, 1);
}

////////////////////////////////////////////////////////////////////////////////
// RPC
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_rpc_responses_correlate_out_of_order() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        let first = peer.recv_client_message().await;
        let second = peer.recv_client_message().await;
        // Answer in reverse arrival order
        for (_, request_id, _) in [second, first] {
            peer.send_rpc_response(request_id, &json!({"echo": request_id}))
                .await;
        }
        futures_util::future::pending::<()>().await;
    })
    .await;

    let writer = boxed_writer(|handle, _| async move {
        let payload_a = json!({"n": 1});
        let payload_b = json!({"n": 2});
        let (a, b) = tokio::join!(
            handle.send_request(1, &payload_a),
            handle.send_request(2, &payload_b),
        );
        assert_eq!(a.unwrap(), json!({"echo": 1}));
        assert_eq!(b.unwrap(), json!({"echo": 2}));
        Ok(())
    });
    run_client(test_config(&url), SessionOptions::default(), writer)
        .await
        .unwrap();
}

#[rstest]
#[tokio::test]
async fn test_rpc_waiter_fails_on_teardown() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        let _ = peer.recv_frame().await;
        peer.close_with(1000).await;
    })
    .await;

    // The waiter lives on its own task so it survives the session teardown
    let (tx, mut rx) = mpsc::unbounded_channel();
    let writer = boxed_writer(move |handle, _| async move {
        tokio::spawn(async move {
            tx.send(handle.send_request(1, &json!({})).await).unwrap();
        });
        futures_util::future::pending().await
    });
    let result = run_client(test_config(&url), SessionOptions::default(), writer).await;
    assert!(matches!(result, Err(CryptologyError::Disconnected)));

    // Never answered; teardown must fail the parked waiter
    let waiter = rx.recv().await.unwrap();
    assert!(matches!(waiter, Err(CryptologyError::Disconnected)));
}

////////////////////////////////////////////////////////////////////////////////
// Close-code mapping
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[case(4000, CryptologyError::ConcurrentConnection)]
#[case(4001, CryptologyError::InvalidSequence)]
#[case(4002, CryptologyError::DuplicateClientOrderId)]
#[case(4009, CryptologyError::RateLimit)]
#[case(1012, CryptologyError::ServerRestart)]
#[case(4999, CryptologyError::Disconnected)]
#[tokio::test]
async fn test_close_code_maps_to_fault(#[case] code: u16, #[case] expected: CryptologyError) {
    let url = spawn_server(move |socket| async move {
        let peer = ServerPeer::accept(socket, 0, true).await;
        peer.close_with(code).await;
    })
    .await;

    let result = run_client(test_config(&url), SessionOptions::default(), idle_writer()).await;
    let err = result.unwrap_err();
    assert_eq!(
        std::mem::discriminant(&err),
        std::mem::discriminant(&expected),
        "close code {code} mapped to {err}",
    );
}

////////////////////////////////////////////////////////////////////////////////
// Liveness
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_silent_server_raises_heartbeat_fault() {
    let url = spawn_server(|socket| async move {
        let _peer = ServerPeer::accept(socket, 0, true).await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let config = test_config(&url).with_heartbeat_interval(Some(Duration::from_millis(50)));
    let result = run_client(config, SessionOptions::default(), idle_writer()).await;
    assert!(matches!(
        result,
        Err(CryptologyError::HeartbeatError { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn test_heartbeat_markers_extend_liveness() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        // Well past the bare deadline, kept alive by markers only
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            peer.send_marker().await;
        }
        peer.close_with(1000).await;
    })
    .await;

    let start = Instant::now();
    let config = test_config(&url).with_heartbeat_interval(Some(Duration::from_millis(100)));
    let result = run_client(config, SessionOptions::default(), idle_writer()).await;
    assert!(matches!(result, Err(CryptologyError::Disconnected)));
    assert!(start.elapsed() >= Duration::from_millis(400));
}

////////////////////////////////////////////////////////////////////////////////
// Throttling
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_throttle_hint_delays_next_send_once() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_throttle(1, 1, 0).await;
        let _ = peer.recv_frame().await;
        let _ = peer.recv_frame().await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let writer = boxed_writer(|handle, _| async move {
        // Let the hint land first
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        handle.send_message(1, &json!({})).await?;
        assert!(start.elapsed() >= Duration::from_millis(500), "level 1 delay");

        let start = Instant::now();
        handle.send_message(2, &json!({})).await?;
        assert!(start.elapsed() < Duration::from_millis(250), "delay consumed");
        Ok(())
    });
    let config = test_config(&url).with_heartbeat_interval(None);
    run_client(config, SessionOptions::default(), writer)
        .await
        .unwrap();
}

#[rstest]
#[tokio::test]
async fn test_throttle_callback_suppresses_delay() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_throttle(4, 7, 0).await;
        let _ = peer.recv_frame().await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let (hint_tx, mut hint_rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        throttle_callback: Some(Arc::new(move |hint| {
            hint_tx.send((hint.level, hint.sequence_id)).unwrap();
            true
        })),
        ..Default::default()
    };
    let writer = boxed_writer(|handle, _| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = Instant::now();
        handle.send_message(1, &json!({})).await?;
        assert!(start.elapsed() < Duration::from_millis(250), "delay suppressed");
        Ok(())
    });
    let config = test_config(&url).with_heartbeat_interval(None);
    run_client(config, options, writer).await.unwrap();
    assert_eq!(hint_rx.recv().await.unwrap(), (4, 7));
}

////////////////////////////////////////////////////////////////////////////////
// Error frames
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[case(1, CryptologyError::InvalidSequence)]
#[case(2, CryptologyError::DuplicateClientOrderId)]
#[case(4, CryptologyError::TradesDisabled)]
#[tokio::test]
async fn test_error_frame_kind_maps_to_fault(
    #[case] kind: i32,
    #[case] expected: CryptologyError,
) {
    let url = spawn_server(move |socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_error(kind, "").await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let err = run_client(test_config(&url), SessionOptions::default(), idle_writer())
        .await
        .unwrap_err();
    assert_eq!(std::mem::discriminant(&err), std::mem::discriminant(&expected));
}

#[rstest]
#[tokio::test]
async fn test_general_error_frame_carries_message() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_error(0, "boom").await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let err = run_client(test_config(&url), SessionOptions::default(), idle_writer())
        .await
        .unwrap_err();
    match err {
        CryptologyError::ServerFault { message, .. } => assert_eq!(message, "boom"),
        other => panic!("unexpected fault: {other}"),
    }
}

#[rstest]
#[tokio::test]
async fn test_timeout_sentinel_maps_to_heartbeat_fault() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_error(0, "TimeoutError()").await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let result = run_client(test_config(&url), SessionOptions::default(), idle_writer()).await;
    assert!(matches!(
        result,
        Err(CryptologyError::HeartbeatError { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn test_unrecognized_tag_is_fatal() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        let mut xdr = Packer::new();
        xdr.pack_enum(99);
        peer.send_frame(&xdr.into_bytes()).await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let result = run_client(test_config(&url), SessionOptions::default(), idle_writer()).await;
    assert!(matches!(
        result,
        Err(CryptologyError::UnsupportedMessageType(99))
    ));
}

////////////////////////////////////////////////////////////////////////////////
// Broadcasts
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_broadcast_reaches_state_change_callback() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 0, true).await;
        peer.send_broadcast(&json!({
            "@type": "TradesSuspended",
            "trade_pairs": ["BTC_USD", "ETH_USD"],
        }))
        .await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        state_change_callback: Some(Arc::new(move |notice| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(notice).unwrap();
            })
        })),
        ..Default::default()
    };
    let writer = boxed_writer(|_, _| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    });
    run_client(test_config(&url), options, writer).await.unwrap();

    match rx.recv().await.unwrap() {
        cryptology_client::websocket::messages::BroadcastNotice::TradesSuspended {
            trade_pairs,
        } => assert_eq!(trade_pairs, vec!["BTC_USD", "ETH_USD"]),
        other => panic!("unexpected notice: {other:?}"),
    }
}

////////////////////////////////////////////////////////////////////////////////
// End to end
////////////////////////////////////////////////////////////////////////////////

#[rstest]
#[tokio::test]
async fn test_session_round_trip() {
    let url = spawn_server(|socket| async move {
        let mut peer = ServerPeer::accept(socket, 10, true).await;
        let (tag, sequence_id, payload) = peer.recv_client_message().await;
        assert_eq!(tag, ClientMessageType::InboxMessage.as_i32());
        assert_eq!(sequence_id, 11);
        assert_eq!(payload["@type"], "CreateAccount");
        peer.send_outbox(1, 1_700_000_000.25, &json!({"@type": "Ack", "order": sequence_id}))
            .await;
        futures_util::future::pending::<()>().await;
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        read_callback: Some(Arc::new(move |_handle, msg| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send((msg.outbox_id, msg.ts, msg.payload)).unwrap();
            })
        })),
        ..Default::default()
    };
    let writer = boxed_writer(|handle, sequence_id| async move {
        handle
            .send_message(sequence_id + 1, &json!({"@type": "CreateAccount"}))
            .await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    });
    run_client(test_config(&url), options, writer).await.unwrap();

    let (outbox_id, ts, payload) = rx.recv().await.unwrap();
    assert_eq!(outbox_id, 1);
    assert_eq!(ts.timestamp(), 1_700_000_000);
    assert_eq!(payload, json!({"@type": "Ack", "order": 11}));
}
