//! Integration tests for the HTTP transport against a local responder.
//!
//! Validates:
//! - A 2xx body carries the provider id into the receipt
//! - A 409 is a duplicate success
//! - A malformed 2xx body is still a success, without an id
//! - 429 and 5xx are retryable transport errors

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use outreach_queue::config::TransportConfig;
use outreach_queue::executor::http_transport::HttpTransport;
use outreach_queue::executor::Transport;
use outreach_queue::AppError;

/// Serve one canned response and return the endpoint URL.
async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut buf = [0_u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write");
        socket.shutdown().await.ok();
    });

    format!("http://{addr}/messages")
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    request.len() >= header_end + 4 + content_length
}

fn transport(endpoint: String) -> HttpTransport {
    HttpTransport::new(
        &TransportConfig {
            endpoint,
            timeout_seconds: 5,
        },
        "test-key".into(),
    )
    .expect("client")
}

#[tokio::test]
async fn accepted_send_returns_provider_id() {
    let endpoint = serve_once("200 OK", r#"{"message_id":"m-41"}"#).await;
    let receipt = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect("send");

    assert!(receipt.success);
    assert!(!receipt.duplicate);
    assert_eq!(receipt.external_message_id.as_deref(), Some("m-41"));
}

#[tokio::test]
async fn conflict_is_duplicate_success() {
    let endpoint = serve_once("409 Conflict", r#"{"id":"m-7"}"#).await;
    let receipt = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect("send");

    assert!(receipt.success);
    assert!(receipt.duplicate);
    assert_eq!(receipt.external_message_id.as_deref(), Some("m-7"));
}

#[tokio::test]
async fn malformed_accepted_body_is_success_without_id() {
    let endpoint = serve_once("200 OK", "not json").await;
    let receipt = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect("send");

    assert!(receipt.success);
    assert!(receipt.external_message_id.is_none());
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_retryable() {
    let endpoint = serve_once("429 Too Many Requests", "{}").await;
    let err = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect_err("rate limited");
    assert!(matches!(err, AppError::Transport(_)));
    assert!(err.is_retryable());

    let endpoint = serve_once("503 Service Unavailable", "{}").await;
    let err = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect_err("unavailable");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_error_is_unsuccessful_receipt() {
    let endpoint = serve_once("400 Bad Request", "bad recipient").await;
    let receipt = transport(endpoint)
        .send(1, Some(2), "hello")
        .await
        .expect("receipt");

    assert!(!receipt.success);
    assert!(receipt
        .error
        .as_deref()
        .is_some_and(|e| e.contains("bad recipient")));
}
