//! End-to-end tests: HTTP ingest, WebSocket delivery, range queries and
//! health, against a daemon running on the in-memory backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use watchdata_core::config::WatchdataConfig;
use watchdata_core::types::LogRecord;
use watchdata_daemon::orchestrator::Orchestrator;
use watchdata_log_stream::MemoryStore;

struct TestDaemon {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
    http: reqwest::Client,
}

impl TestDaemon {
    async fn start(delivery_mode: &str) -> Self {
        let mut config = WatchdataConfig::default();
        config.storage.backend = "memory".to_owned();
        config.metrics.enabled = false;
        config.general.pid_file = String::new();
        config.stream.delivery_mode = delivery_mode.to_owned();
        config.stream.poll_interval_ms = 50;

        let mut orchestrator =
            Orchestrator::build_from_config(config, Arc::new(MemoryStore::new())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = orchestrator.shutdown_token();
        let trigger = shutdown.clone().cancelled_owned();

        let task = tokio::spawn(async move {
            orchestrator.run_with_listener(listener, trigger).await
        });

        let daemon = Self {
            addr,
            shutdown,
            task,
            http: reqwest::Client::new(),
        };
        daemon.wait_until(|h| h["status"]["status"] == "healthy").await;
        daemon
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn health(&self) -> serde_json::Value {
        self.http
            .get(self.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_until(&self, cond: impl Fn(&serde_json::Value) -> bool) {
        for _ in 0..100 {
            if let Ok(resp) = self.http.get(self.url("/health")).send().await {
                if let Ok(json) = resp.json::<serde_json::Value>().await {
                    if cond(&json) {
                        return;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon did not reach the expected health state");
    }

    async fn post_logs(&self, records: &[LogRecord]) -> reqwest::Response {
        self.http
            .post(self.url("/v1/logs"))
            .json(records)
            .send()
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("daemon should stop in time")
            .expect("daemon task should not panic");
        result.expect("daemon should stop cleanly");
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_record(ws: &mut WsStream) -> LogRecord {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("record should arrive in time")
            .expect("stream should stay open")
            .expect("frame should be valid");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame should be a log record");
        }
    }
}

fn records(bodies: &[&str]) -> Vec<LogRecord> {
    let base = Utc::now() - chrono::Duration::seconds(1);
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            LogRecord::new(base + chrono::Duration::milliseconds(i as i64), *body)
                .with_severity(9, "INFO")
                .with_attribute("seq", i as i64)
        })
        .collect()
}

#[tokio::test]
async fn ingested_records_reach_websocket_subscriber_in_order() {
    // Given: a running daemon and one connected subscriber
    let daemon = TestDaemon::start("immediate").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.addr))
        .await
        .unwrap();
    daemon.wait_until(|h| h["subscribers"] == 1).await;

    // When: a producer posts three records
    let resp = daemon.post_logs(&records(&["first", "second", "third"])).await;

    // Then: the batch is acknowledged and delivered in timestamp order
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    let receipt: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(receipt["accepted"], 3);

    let received = [
        next_record(&mut ws).await,
        next_record(&mut ws).await,
        next_record(&mut ws).await,
    ];
    let bodies: Vec<&str> = received.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, ["first", "second", "third"]);
    assert_eq!(received[1].severity_text, "INFO");
    assert_eq!(
        received[2].attribute("seq"),
        Some(&watchdata_core::types::AnyValue::Int(2))
    );

    ws.close(None).await.unwrap();
    daemon.wait_until(|h| h["subscribers"] == 0).await;
    daemon.stop().await;
}

#[tokio::test]
async fn poll_mode_delivers_to_subscriber() {
    let daemon = TestDaemon::start("poll").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.addr))
        .await
        .unwrap();
    daemon.wait_until(|h| h["subscribers"] == 1).await;

    let resp = daemon.post_logs(&records(&["polled"])).await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    assert_eq!(next_record(&mut ws).await.body, "polled");
    daemon.stop().await;
}

#[tokio::test]
async fn range_query_returns_most_recent_first() {
    let daemon = TestDaemon::start("immediate").await;
    daemon.post_logs(&records(&["a", "b", "c"])).await;

    // Default window: the last hour
    let recent: Vec<LogRecord> = daemon
        .http
        .get(daemon.url("/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let bodies: Vec<&str> = recent.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, ["c", "b", "a"]);

    // Explicit window that ends before any record
    let end = Utc::now() - chrono::Duration::hours(2);
    let start = end - chrono::Duration::hours(1);
    let empty: Vec<LogRecord> = daemon
        .http
        .get(daemon.url("/logs"))
        .query(&[
            ("start", start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("end", end.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(empty.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn malformed_ingest_body_is_rejected() {
    let daemon = TestDaemon::start("immediate").await;

    let resp = daemon
        .http
        .post(daemon.url("/v1/logs"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    // Nothing was stored
    let stored: Vec<LogRecord> = daemon
        .http
        .get(daemon.url("/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stored.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn health_reports_components() {
    let daemon = TestDaemon::start("immediate").await;

    let health = daemon.health().await;
    assert_eq!(health["status"]["status"], "healthy");
    assert_eq!(health["dropped_records"], 0);
    let names: Vec<&str> = health["modules"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(names, ["log-stream", "storage"]);

    daemon.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_websocket() {
    let daemon = TestDaemon::start("immediate").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", daemon.addr))
        .await
        .unwrap();
    daemon.wait_until(|h| h["subscribers"] == 1).await;

    daemon.stop().await;

    // The server sends a close frame (or the socket just ends)
    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("socket should close in time");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
