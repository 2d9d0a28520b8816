//! End-to-end tests of `WebSocketTransport` against a loopback server.

mod common;

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use common::wait_until;
use mojolink_lib::session::{AuthMethod, SessionError, TransportError};
use mojolink_lib::{SessionConfig, SessionManager};

/// What the server saw during the upgrade.
#[derive(Debug, Default)]
struct Handshake {
    authorization: Option<String>,
    query: Option<String>,
}

/// Accept one connection. With `expected_token` set, requests that do not
/// carry it (header or query) are answered with 401. Accepted connections
/// reply to every text frame with an `agent_final` ack, then push a preview.
async fn spawn_server(expected_token: Option<&'static str>) -> (SocketAddr, oneshot::Receiver<Handshake>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let handshake = Handshake {
                authorization: request
                    .headers()
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string),
                query: request.uri().query().map(str::to_string),
            };
            let authorised = match expected_token {
                None => true,
                Some(token) => {
                    handshake.authorization.as_deref() == Some(format!("Bearer {token}").as_str())
                        || handshake
                            .query
                            .as_deref()
                            .is_some_and(|query| query.contains(&format!("token={token}")))
                }
            };
            let _ = seen_tx.send(handshake);
            if authorised {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("unauthorized".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
        };

        let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
            return;
        };
        while let Some(Ok(frame)) = ws.next().await {
            if !frame.is_text() {
                continue;
            }
            let ack = r#"{"type":"agent_final","data":{"text":"ack"}}"#;
            let preview = r#"{"type":"update_file","data":{"url":"https://preview.test/x"}}"#;
            if ws.send(WsMessage::text(ack.to_string())).await.is_err()
                || ws.send(WsMessage::text(preview.to_string())).await.is_err()
            {
                break;
            }
        }
    });

    (addr, seen_rx)
}

#[tokio::test]
async fn test_bearer_token_on_upgrade_and_round_trip() {
    let (addr, seen) = spawn_server(Some("abc")).await;
    let mut manager = SessionManager::websocket();

    manager
        .init(SessionConfig::new(format!("ws://{addr}/agent"), "abc").with_auto_connect(true))
        .await
        .unwrap();
    assert!(manager.is_connected());

    let handshake = seen.await.unwrap();
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer abc"));
    assert_eq!(handshake.query, None);

    manager.send_user_text("hi").unwrap();
    wait_until(|| manager.messages().len() == 3).await;

    let kinds: Vec<String> = manager
        .messages()
        .iter()
        .map(|m| m.kind().to_string())
        .collect();
    assert_eq!(kinds, vec!["user", "agent_final", "update_file"]);
    assert_eq!(manager.preview_url().as_deref(), Some("https://preview.test/x"));

    manager.teardown();
}

#[tokio::test]
async fn test_query_param_auth() {
    let (addr, seen) = spawn_server(Some("abc")).await;
    let mut manager = SessionManager::websocket();

    manager
        .init(
            SessionConfig::new(format!("ws://{addr}/agent"), "abc")
                .with_auth(AuthMethod::QueryParam {
                    name: "token".to_string(),
                })
                .with_auto_connect(true),
        )
        .await
        .unwrap();

    let handshake = seen.await.unwrap();
    assert_eq!(handshake.authorization, None);
    assert_eq!(handshake.query.as_deref(), Some("token=abc"));
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let (addr, seen) = spawn_server(Some("abc")).await;
    let mut manager = SessionManager::websocket();

    let err = manager
        .init(SessionConfig::new(format!("ws://{addr}/agent"), "nope").with_auto_connect(true))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SessionError::Transport(TransportError::AuthRejected { status: 401 })
    );
    assert!(!manager.is_connected());
    assert_eq!(
        manager.error().as_deref(),
        Some("Authentication rejected by server (HTTP 401)")
    );
    assert_eq!(
        seen.await.unwrap().authorization.as_deref(),
        Some("Bearer nope")
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_fails() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let mut manager = SessionManager::websocket();

    let err = manager
        .init(SessionConfig::new(format!("ws://{addr}"), "abc").with_auto_connect(true))
        .await
        .unwrap_err();

    match err {
        SessionError::Transport(err) => assert!(err.is_retryable(), "{err}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(manager.error().is_some());
}
