//! ---
//! wamp_section: "15-testing-qa-runbook"
//! wamp_subsection: "integration-tests"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "End-to-end session tests against a scripted WebSocket broker."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use r_wamp_common::AppConfig;
use r_wamp_metrics::{new_registry, SessionMetrics};
use r_wamp_session::{
    Event, SessionConfig, SessionHandle, SessionRuntime, SessionState, StaticTokenAuthenticator,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

/// Scripted broker: challenges every HELLO, welcomes the expected token,
/// confirms subscriptions and immediately publishes one event per subscription.
struct Broker {
    token: String,
    drop_first_connection: bool,
    connections: AtomicU64,
    frames: Mutex<Vec<Value>>,
}

impl Broker {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
            drop_first_connection: false,
            connections: AtomicU64::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }

    fn codes(&self) -> Vec<u64> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| frame[0].as_u64())
            .collect()
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(broker): State<Arc<Broker>>) -> Response {
    ws.protocols(["wamp.2.json"])
        .on_upgrade(move |socket| serve(socket, broker))
}

async fn serve(mut socket: WebSocket, broker: Arc<Broker>) {
    let index = broker.connections.fetch_add(1, Ordering::SeqCst);
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        broker.frames.lock().push(frame.clone());

        let mut replies = Vec::new();
        let mut hang_up = false;
        match frame[0].as_u64() {
            Some(1) => replies.push(json!([4, "jwt", {}])),
            Some(5) if frame[1] == broker.token => replies.push(json!([
                2,
                555 + index,
                { "roles": { "broker": { "features": { "publisher_exclusion": true } } } }
            ])),
            Some(5) => {
                replies.push(json!([3, {}, "wamp.error.not_authorized"]));
                hang_up = true;
            }
            Some(32) => {
                let request = frame[1].as_u64().unwrap_or_default();
                let subscription = 1000 + request;
                replies.push(json!([33, request, subscription]));
                replies.push(json!([
                    36,
                    subscription,
                    index + 1,
                    {},
                    [{ "v": index + 1 }],
                    { "topic": frame[3] }
                ]));
                hang_up = broker.drop_first_connection && index == 0;
            }
            Some(6) => {
                replies.push(json!([6, {}, "wamp.close.goodbye_and_out"]));
                hang_up = true;
            }
            _ => {}
        }

        for reply in replies {
            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
        if hang_up {
            return;
        }
    }
}

async fn spawn_broker(broker: Broker) -> Result<(Arc<Broker>, String)> {
    let broker = Arc::new(broker);
    let app = Router::new()
        .route("/ws", get(upgrade))
        .with_state(broker.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((broker, format!("ws://{address}/ws")))
}

async fn subscribe_channel(
    handle: &SessionHandle,
    topic: &str,
) -> Result<mpsc::UnboundedReceiver<Event>> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle
        .subscribe(topic, move |event: &Event| {
            let _ = tx.send(event.clone());
        })
        .await?;
    Ok(rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Result<Event> {
    timeout(WAIT, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("event channel closed"))
}

#[tokio::test]
async fn full_session_against_websocket_broker() -> Result<()> {
    let (broker, url) = spawn_broker(Broker::new("tok123")).await?;
    let handle = SessionRuntime::connect_websocket(
        url,
        SessionConfig::new("realmA"),
        Arc::new(StaticTokenAuthenticator::new("tok123")),
        None,
    )?;
    let mut events = subscribe_channel(&handle, "topic/x").await?;

    let session = timeout(WAIT, handle.wait_until_established()).await??;
    assert_eq!(session.get(), 555);

    let event = next_event(&mut events).await?;
    assert_eq!(event.subscription.get(), 1001);
    assert_eq!(event.args, vec![json!({ "v": 1 })]);
    assert_eq!(event.kwargs.get("topic"), Some(&json!("topic/x")));

    handle.disconnect().await?;
    let status = timeout(WAIT, handle.terminated()).await?;
    assert_eq!(status.state, SessionState::Closed);

    let frames = broker.frames.lock().clone();
    assert_eq!(frames[0][1], "realmA");
    assert_eq!(frames[0][2]["authmethods"], json!(["jwt"]));
    assert_eq!(frames[1], json!([5, "tok123", {}]));
    assert_eq!(frames[2], json!([32, 1, {}, "topic/x"]));
    assert_eq!(frames[3], json!([6, {}, "wamp.close.system_shutdown"]));
    assert_eq!(broker.connections.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() -> Result<()> {
    let mut script = Broker::new("tok123");
    script.drop_first_connection = true;
    let (broker, url) = spawn_broker(script).await?;

    let registry = new_registry();
    let metrics = SessionMetrics::new(registry.clone())?;
    let handle = SessionRuntime::connect_websocket(
        url,
        SessionConfig::new("realmA").with_resubscribe_on_reconnect(true),
        Arc::new(StaticTokenAuthenticator::new("tok123")),
        Some(metrics),
    )?;
    let mut events = subscribe_channel(&handle, "topic/x").await?;

    let first = next_event(&mut events).await?;
    assert_eq!(first.args, vec![json!({ "v": 1 })]);
    let second = next_event(&mut events).await?;
    assert_eq!(second.args, vec![json!({ "v": 2 })]);
    assert_eq!(second.subscription.get(), 1002);

    assert_eq!(broker.connections.load(Ordering::SeqCst), 2);
    assert_eq!(handle.status().session_id.map(|id| id.get()), Some(556));
    assert_eq!(handle.status().reconnect_attempts, 0);
    assert_eq!(broker.codes(), vec![1, 5, 32, 1, 5, 32]);

    let exported: Vec<String> = registry
        .gather()
        .iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    assert!(exported.contains(&"r_wamp_reconnect_attempts_total".to_owned()));

    handle.disconnect().await?;
    timeout(WAIT, handle.terminated()).await?;
    Ok(())
}

#[tokio::test]
async fn rejected_token_exhausts_retries() -> Result<()> {
    let (broker, url) = spawn_broker(Broker::new("expected")).await?;
    let handle = SessionRuntime::connect_websocket(
        url,
        SessionConfig::new("realmA").with_max_retries(1),
        Arc::new(StaticTokenAuthenticator::new("wrong")),
        None,
    )?;

    let status = timeout(WAIT, handle.terminated()).await?;
    assert!(status.terminated);
    assert_eq!(status.session_id, None);
    assert_eq!(broker.connections.load(Ordering::SeqCst), 2);
    assert!(handle.wait_until_established().await.is_err());
    Ok(())
}

#[tokio::test]
async fn unreachable_broker_terminates_without_retries() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    drop(listener);

    let handle = SessionRuntime::connect_websocket(
        format!("ws://{address}/ws"),
        SessionConfig::new("realmA").with_max_retries(0),
        Arc::new(StaticTokenAuthenticator::new("tok")),
        None,
    )?;
    let status = timeout(WAIT, handle.terminated()).await?;
    assert!(status.terminated);
    assert_eq!(status.state, SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn session_built_from_config_file() -> Result<()> {
    let (broker, url) = spawn_broker(Broker::new("from-config")).await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("r-wampctl.toml");
    std::fs::write(
        &path,
        format!(
            r#"
            topics = ["topic/config"]

            [session]
            url = "{url}"
            realm = "realmC"
            max_retries = 2
            challenge_timeout_ms = 2000

            [auth]
            token = "from-config"
            "#
        ),
    )?;
    let config: AppConfig = std::fs::read_to_string(&path)?.parse()?;
    assert_eq!(config.session.challenge_timeout, Some(Duration::from_secs(2)));

    let handle = SessionRuntime::connect_websocket(
        config.session.url.clone(),
        SessionConfig::from(&config.session),
        Arc::new(StaticTokenAuthenticator::new(config.auth.resolve_token()?)),
        None,
    )?;
    let mut events = subscribe_channel(&handle, &config.topics[0]).await?;
    let event = next_event(&mut events).await?;
    assert_eq!(event.kwargs.get("topic"), Some(&json!("topic/config")));
    assert_eq!(broker.frames.lock()[0][1], "realmC");

    handle.disconnect().await?;
    timeout(WAIT, handle.terminated()).await?;
    Ok(())
}
