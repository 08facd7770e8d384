//! End-to-end tests driving the orchestrator with a real TCP worker
//! client and a real WebSocket subscriber client.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use pulseboard::config::Config;
use pulseboard::orchestrator::Orchestrator;
use pulseboard::supervisor::{WorkerSpec, WorkerState};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.ingest.port = 0;
    config.broadcast.port = 0;
    config.supervisor.grace_period_ms = 500;
    config.dashboard.open_on_start = false;
    config
}

async fn boot() -> Orchestrator {
    Orchestrator::start(&test_config()).await.unwrap()
}

async fn connect_subscriber(orchestrator: &Orchestrator) -> WsStream {
    let url = format!("ws://{}/ws", orchestrator.broadcast_addr());
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn connect_worker(orchestrator: &Orchestrator) -> TcpStream {
    TcpStream::connect(orchestrator.ingest_addr()).await.unwrap()
}

/// The upgrade handshake completes before the server-side session task
/// registers with the hub; wait until registration is visible.
async fn wait_for_subscribers(orchestrator: &Orchestrator, n: usize) {
    let deadline = Instant::now() + TIMEOUT;
    while orchestrator.subscriber_count().await < n {
        assert!(Instant::now() < deadline, "subscribers never registered");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn epoch_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

#[tokio::test]
async fn stamped_echo_reaches_subscriber() {
    let orchestrator = boot().await;
    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;

    let mut worker = connect_worker(&orchestrator).await;
    worker
        .write_all(b"{\"lang\":\"Go\",\"algo\":\"fibonacci\",\"duration\":0.0003}\n")
        .await
        .unwrap();

    let value = next_json(&mut ws).await;
    assert_eq!(value["lang"], "Go");
    assert_eq!(value["algo"], "fibonacci");
    assert_eq!(value["duration"], 0.0003);

    // Timestamp is the server's receipt time, and nothing else was
    // added or altered.
    let stamped = value["timestamp"].as_f64().unwrap();
    assert!((epoch_now() - stamped).abs() < 5.0);
    assert_eq!(value.as_object().unwrap().len(), 4);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn malformed_line_does_not_close_the_connection() {
    let orchestrator = boot().await;
    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;

    let mut worker = connect_worker(&orchestrator).await;
    worker.write_all(b"{\"lang\": \"Go\"\n").await.unwrap();
    worker
        .write_all(b"{\"lang\":\"Go\",\"algo\":\"array_sort\",\"duration\":0.5}\n")
        .await
        .unwrap();

    // Exactly one message arrives, for the valid line, on the same
    // worker connection.
    let value = next_json(&mut ws).await;
    assert_eq!(value["algo"], "array_sort");
    assert!(timeout(Duration::from_millis(300), ws.next()).await.is_err());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn fanout_survives_a_disconnecting_subscriber() {
    let orchestrator = boot().await;
    let mut first = connect_subscriber(&orchestrator).await;
    let mut gone = connect_subscriber(&orchestrator).await;
    let mut second = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 3).await;

    gone.close(None).await.unwrap();

    let mut worker = connect_worker(&orchestrator).await;
    worker
        .write_all(b"{\"lang\":\"Ruby\",\"algo\":\"prime_factors\",\"duration\":0.02}\n")
        .await
        .unwrap();

    for ws in [&mut first, &mut second] {
        let value = next_json(ws).await;
        assert_eq!(value["algo"], "prime_factors");
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn messages_keep_per_connection_order() {
    let orchestrator = boot().await;
    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;

    let mut worker = connect_worker(&orchestrator).await;
    let mut lines = Vec::new();
    for i in 0..20 {
        lines.extend_from_slice(
            format!("{{\"lang\":\"Java\",\"algo\":\"seq\",\"duration\":{}.0}}\n", i).as_bytes(),
        );
    }
    worker.write_all(&lines).await.unwrap();

    for i in 0..20 {
        let value = next_json(&mut ws).await;
        assert_eq!(value["duration"], i as f64);
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn no_history_for_late_joiners() {
    let orchestrator = boot().await;

    let mut worker = connect_worker(&orchestrator).await;
    worker
        .write_all(b"{\"lang\":\"Python\",\"algo\":\"game_of_life\",\"duration\":0.9}\n")
        .await
        .unwrap();
    // Let the message pass through the hub while nobody is subscribed.
    sleep(Duration::from_millis(200)).await;

    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;
    assert!(timeout(Duration::from_millis(300), ws.next()).await.is_err());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn launch_failure_is_broadcast_and_other_workers_proceed() {
    let orchestrator = boot().await;
    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;

    let specs = vec![
        WorkerSpec::new("Broken", vec!["/no/such/binary-pulseboard".to_string()]),
        WorkerSpec::new("Sleepy", vec!["sleep".to_string(), "60".to_string()]),
    ];
    let launched = orchestrator
        .supervisor()
        .launch_all(&specs, false)
        .await
        .unwrap();
    assert_eq!(launched, 1);

    let value = next_json(&mut ws).await;
    assert_eq!(value["type"], "status");
    assert_eq!(value["level"], "error");
    let message = value["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to launch Broken worker:"));

    let snapshot = orchestrator.supervisor().snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].label, "Sleepy");
    assert_eq!(snapshot[0].state, WorkerState::Running);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_terminates_workers_and_is_idempotent() {
    let mut config = test_config();
    config.workers.insert(
        "Polite".to_string(),
        vec!["sleep".to_string(), "60".to_string()],
    );
    config.workers.insert(
        "Stubborn".to_string(),
        vec![
            "sh".to_string(),
            "-c".to_string(),
            "trap '' TERM; while :; do sleep 0.2; done".to_string(),
        ],
    );
    let orchestrator = Orchestrator::start(&config).await.unwrap();
    // Let the stubborn shell install its trap.
    sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    orchestrator.shutdown().await;
    let elapsed = start.elapsed();

    // The TERM-ignoring worker rode out the grace period and was
    // force-killed; the polite one went down early. Both are exited.
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < TIMEOUT);
    for worker in orchestrator.supervisor().snapshot().await {
        assert_eq!(worker.state, WorkerState::Exited, "{} not exited", worker.label);
    }

    // Second shutdown: no error, no duplicate termination work.
    let start = Instant::now();
    orchestrator.shutdown().await;
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn subscriber_connection_closes_on_shutdown() {
    let orchestrator = boot().await;
    let mut ws = connect_subscriber(&orchestrator).await;
    wait_for_subscribers(&orchestrator, 1).await;

    orchestrator.shutdown().await;

    // The server ends the session; the client sees a close (or the
    // stream just ends).
    let outcome = timeout(TIMEOUT, async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "subscriber stream never closed");
}
