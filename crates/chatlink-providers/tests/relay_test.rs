//! Relay provider tests against a local scripted HTTP endpoint.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use chatlink_core::config::{RelayAccount, RelayConfig};
use chatlink_core::{MediaItem, MessageSender, OutboundMessage};
use chatlink_providers::{RelayError, RelayProvider, RelayTiming};

const OK_BODY: &str = r#"{"sent":"true","message":"ok","id":981}"#;

/// Answers each request with the next scripted response, then with `OK_BODY`.
struct ScriptedRelay {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedRelay {
    async fn start(script: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Some((path, body)) = read_request(&mut stream).await else {
                    continue;
                };
                let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                recorded.lock().unwrap().push((path, json));

                let (status, body) = script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or((200, OK_BODY));
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { addr, requests }
    }

    fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    fn provider(&self) -> RelayProvider {
        let mut config = RelayConfig::default();
        config.base_url = format!("http://{}", self.addr);
        config.accounts.insert(
            "u1".to_string(),
            RelayAccount {
                instance_id: Some("instance42".to_string()),
                token: Some("secret".to_string()),
                token_env: None,
            },
        );
        RelayProvider::from_config(&config)
            .unwrap()
            .with_timing(RelayTiming {
                max_retries: 3,
                initial_retry_delay: Duration::from_millis(10),
                max_retry_delay: Duration::from_millis(20),
                media_pacing: Duration::from_millis(1),
                caption_pacing: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            })
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buf[end + 4..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }

        let path = head.lines().next()?.split_whitespace().nth(1)?.to_string();
        return Some((path, body));
    }
}

#[tokio::test]
async fn test_text_media_and_caption_are_separate_calls() {
    let relay = ScriptedRelay::start(Vec::new()).await;
    let message = OutboundMessage::new("+56911112222", "hello")
        .with_media(MediaItem::new("https://cdn.example/img1.jpg").with_caption("look"))
        .with_media(MediaItem::new(""));

    let receipt = relay.provider().send_message("u1", &message).await.unwrap();
    assert_eq!(receipt.message_id, "981");
    assert_eq!(receipt.media_sent, 1);

    let requests = relay.requests();
    let bodies: Vec<&str> = requests
        .iter()
        .map(|(_, json)| json["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["hello", "https://cdn.example/img1.jpg", "look"]);

    for (path, json) in &requests {
        assert_eq!(path, "/instance42/messages/chat");
        assert_eq!(json["token"], "secret");
        assert_eq!(json["to"], "56911112222");
    }
}

#[tokio::test]
async fn test_retries_after_server_error() {
    let relay = ScriptedRelay::start(vec![(500, r#"{"error":"busy"}"#)]).await;

    let receipt = relay
        .provider()
        .send_message("u1", &OutboundMessage::new("56911112222", "hello"))
        .await
        .unwrap();

    assert_eq!(receipt.message_id, "981");
    assert_eq!(relay.requests().len(), 2);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let relay = ScriptedRelay::start(vec![
        (503, "unavailable"),
        (503, "unavailable"),
        (503, "unavailable"),
    ])
    .await;

    let err = relay
        .provider()
        .send_message("u1", &OutboundMessage::new("56911112222", "hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Status { status: 503, .. }));
    assert_eq!(relay.requests().len(), 3);
}

#[tokio::test]
async fn test_reported_error_is_rejection() {
    let rejected = r#"{"error":"Wrong token. Please provide token"}"#;
    let relay = ScriptedRelay::start(vec![(200, rejected), (200, rejected), (200, rejected)]).await;

    let err = relay
        .provider()
        .send_message("u1", &OutboundMessage::new("56911112222", "hello"))
        .await
        .unwrap_err();

    match err {
        RelayError::Rejected(reason) => assert!(reason.contains("Wrong token")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_account_makes_no_request() {
    let relay = ScriptedRelay::start(Vec::new()).await;
    let sender: Arc<dyn MessageSender> = Arc::new(relay.provider());

    let err = sender
        .send("ghost", &OutboundMessage::new("56911112222", "hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, chatlink_core::Error::NotFound(_)));
    assert_eq!(sender.id(), "relay");
    assert!(relay.requests().is_empty());
}
