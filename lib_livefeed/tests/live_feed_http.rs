//! End-to-end checks against a local axum server speaking SSE and JSON.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use lib_livefeed::configs::{LiveFeedConfig, RetryPolicy};
use lib_livefeed::feed::{
    ChannelHandler, ConnectionState, DataSnapshot, FeedUpdate, LiveFeedClient, SnapshotField,
    SnapshotSource,
};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    addr
}

async fn live_stream() -> impl IntoResponse {
    let events = vec![
        Ok::<_, Infallible>(Event::default().data("not json")),
        Ok(Event::default().data(r#"{"success":false,"data":{"draw":1}}"#)),
        Ok(Event::default().data(r#"{"success":true,"data":{"draw":2}}"#)),
    ];
    Sse::new(stream::iter(events).chain(stream::pending()))
}

async fn unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn snapshot() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "userData": { "balance": 40 } }))
}

/// One endpoint for both modes, like servers that negotiate on `Accept`.
async fn negotiated(headers: HeaderMap) -> Response {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    if wants_stream {
        StatusCode::BAD_GATEWAY.into_response()
    } else {
        Json(json!({ "success": true, "results": [3, 14, 15] })).into_response()
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 50,
        poll_interval_ms: 200,
    }
}

async fn next_snapshot(rx: &mut UnboundedReceiver<FeedUpdate>) -> (DataSnapshot, Vec<ConnectionState>) {
    let mut statuses = Vec::new();
    let wait = async {
        loop {
            match rx.recv().await {
                Some(FeedUpdate::Data(snapshot)) => return snapshot,
                Some(FeedUpdate::Status(state)) => statuses.push(state),
                None => panic!("feed closed before any data"),
            }
        }
    };
    let snapshot = tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("no snapshot within 10s");
    (snapshot, statuses)
}

/// Collects status changes up to and including `wanted`, ignoring data.
async fn statuses_until(
    rx: &mut UnboundedReceiver<FeedUpdate>,
    wanted: ConnectionState,
) -> Vec<ConnectionState> {
    let mut statuses = Vec::new();
    let wait = async {
        loop {
            match rx.recv().await {
                Some(FeedUpdate::Status(state)) => {
                    statuses.push(state);
                    if state == wanted {
                        return;
                    }
                }
                Some(FeedUpdate::Data(_)) => {}
                None => panic!("feed closed before reaching {wanted:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("never reached {wanted:?}"));
    statuses
}

async fn silent_stream() -> impl IntoResponse {
    Sse::new(stream::pending::<Result<Event, Infallible>>())
}

async fn late_stream() -> impl IntoResponse {
    let first = stream::once(async {
        tokio::time::sleep(Duration::from_millis(450)).await;
        Ok::<_, Infallible>(Event::default().data(r#"{"success":true,"data":{"draw":3}}"#))
    });
    Sse::new(first.chain(stream::pending()))
}

/// Accepts connections and never answers them.
async fn unresponsive() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

#[tokio::test]
async fn streams_well_formed_events() {
    let addr = serve(Router::new().route("/stream", get(live_stream))).await;
    let config = LiveFeedConfig::new(format!("http://{addr}/stream"));
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let (snapshot, statuses) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.source, SnapshotSource::Stream);
    assert_eq!(snapshot.field, SnapshotField::Data);
    assert_eq!(snapshot.data, json!({ "draw": 2 }));
    assert_eq!(statuses, vec![ConnectionState::Connecting, ConnectionState::Connected]);
    assert_eq!(client.status(), ConnectionState::Connected);
    assert_eq!(client.status().label(), "Live");

    client.disconnect();
}

#[tokio::test]
async fn falls_back_to_the_polling_endpoint() {
    let app = Router::new()
        .route("/stream", get(unavailable))
        .route("/snapshot", get(snapshot));
    let addr = serve(app).await;
    let config = LiveFeedConfig::new(format!("http://{addr}/stream"))
        .with_poll_url(format!("http://{addr}/snapshot"))
        .with_policy(fast_policy());
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let (snapshot, statuses) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.source, SnapshotSource::Poll);
    assert_eq!(snapshot.field, SnapshotField::UserData);
    assert_eq!(snapshot.data["balance"], 40);
    assert_eq!(statuses.last(), Some(&ConnectionState::Fallback));
    assert!(statuses.contains(&ConnectionState::Error));

    // polling keeps refreshing
    let (again, _) = next_snapshot(&mut rx).await;
    assert_eq!(again.source, SnapshotSource::Poll);
    assert_eq!(client.status().label(), "Backup Mode");
    assert_eq!(client.attempt_count(), 1);

    client.disconnect();
}

#[tokio::test]
async fn polls_the_stream_url_as_json_without_a_poll_url() {
    let addr = serve(Router::new().route("/feed", get(negotiated))).await;
    let config = LiveFeedConfig::new(format!("http://{addr}/feed")).with_policy(fast_policy());
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let (snapshot, _) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.source, SnapshotSource::Poll);
    assert_eq!(snapshot.field, SnapshotField::Results);
    assert_eq!(snapshot.data, json!([3, 14, 15]));
    assert_eq!(client.latest().map(|latest| latest.data), Some(snapshot.data));

    client.disconnect();
}

#[tokio::test]
async fn invalid_endpoint_is_rejected_at_connect() {
    let (handler, _rx) = ChannelHandler::new();
    let result = LiveFeedClient::connect(&LiveFeedConfig::new("not a url"), handler);
    assert!(result.is_err());
}

#[tokio::test]
async fn silent_stream_is_abandoned_after_two_idle_periods() {
    let app = Router::new()
        .route("/stream", get(silent_stream))
        .route("/snapshot", get(snapshot));
    let addr = serve(app).await;
    let config = LiveFeedConfig::new(format!("http://{addr}/stream"))
        .with_poll_url(format!("http://{addr}/snapshot"))
        .with_policy(fast_policy())
        .with_idle_timeout(Duration::from_millis(200));
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let statuses = statuses_until(&mut rx, ConnectionState::Fallback).await;
    // keep-alive noise first, then the dead stream counts as a failure
    assert_eq!(
        statuses[..4],
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Error,
        ]
    );
    assert_eq!(client.attempt_count(), 1);

    let (snapshot, _) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.source, SnapshotSource::Poll);

    client.disconnect();
}

#[tokio::test]
async fn stream_keeps_delivering_after_a_keep_alive_gap() {
    let addr = serve(Router::new().route("/stream", get(late_stream))).await;
    let config = LiveFeedConfig::new(format!("http://{addr}/stream"))
        .with_idle_timeout(Duration::from_millis(300));
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let (snapshot, statuses) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.source, SnapshotSource::Stream);
    assert_eq!(snapshot.data, json!({ "draw": 3 }));
    assert_eq!(
        statuses,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Connecting,
        ]
    );
    assert_eq!(client.status(), ConnectionState::Connected);
    assert_eq!(client.attempt_count(), 0);

    client.disconnect();
}

#[tokio::test]
async fn unanswered_request_is_a_connection_failure() {
    let hanging = unresponsive().await;
    let addr = serve(Router::new().route("/snapshot", get(snapshot))).await;
    let config = LiveFeedConfig::new(format!("http://{hanging}/stream"))
        .with_poll_url(format!("http://{addr}/snapshot"))
        .with_policy(fast_policy())
        .with_idle_timeout(Duration::from_millis(200));
    let (handler, mut rx) = ChannelHandler::new();
    let client = LiveFeedClient::connect(&config, handler).expect("connect");

    let statuses = statuses_until(&mut rx, ConnectionState::Fallback).await;
    assert_eq!(
        statuses,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Error,
            ConnectionState::Connecting,
            ConnectionState::Error,
            ConnectionState::Fallback,
        ]
    );
    assert_eq!(client.attempt_count(), 1);

    let (snapshot, _) = next_snapshot(&mut rx).await;
    assert_eq!(snapshot.field, SnapshotField::UserData);

    client.disconnect();
}
