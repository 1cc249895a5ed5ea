//! Tests for the webhook transport against a local mock endpoint.

use std::time::Duration;

use mockito::Matcher;
use poolwatch::notifier::{AlertMessage, AlertTransport, TransportError, WebhookTransport};
use serde_json::json;

fn message() -> AlertMessage {
    AlertMessage {
        title: "Blue/Green Alert: pool failover".to_owned(),
        body: "Failover detected: blue \u{2192} green".to_owned(),
    }
}

fn transport(url: String) -> WebhookTransport {
    WebhookTransport::new(url, "Blue/Green Monitor", ":warning:", Duration::from_secs(5))
        .expect("client builds")
}

#[tokio::test]
async fn posts_json_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "username": "Blue/Green Monitor",
            "icon_emoji": ":warning:",
            "text": "*Blue/Green Alert: pool failover*\nFailover detected: blue \u{2192} green",
        })))
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let t = transport(format!("{}/hook", server.url()));
    t.deliver(&message()).await.expect("delivered");

    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(404)
        .with_body("no_service")
        .create_async()
        .await;

    let t = transport(format!("{}/hook", server.url()));
    let err = t.deliver(&message()).await.expect_err("404 is a failure");
    assert!(matches!(err, TransportError::Status { status: 404 }));

    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_endpoint_is_an_error() {
    // Grab a free port, then close it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let t = transport(format!("http://{addr}/hook"));
    let err = t.deliver(&message()).await.expect_err("connection fails");
    assert!(matches!(err, TransportError::Http(_)));
}
