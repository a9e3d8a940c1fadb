//! ---
//! wamp_section: "03-logging-metrics"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Metrics collection and export utilities."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address. Reflects the real port when bound to port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges describing one WAMP session client.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    registry: SharedRegistry,
    frames_sent: IntCounterVec,
    frames_received: IntCounterVec,
    frames_ignored: IntCounter,
    sessions_established: IntCounter,
    reconnect_attempts: IntCounter,
    retries_exhausted: IntCounter,
    active_subscriptions: IntGauge,
    session_state: IntGauge,
}

impl SessionMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames_sent = IntCounterVec::new(
            Opts::new("r_wamp_frames_sent_total", "WAMP frames written to the transport"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_sent.clone()))?;

        let frames_received = IntCounterVec::new(
            Opts::new(
                "r_wamp_frames_received_total",
                "WAMP frames decoded from the transport",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(frames_received.clone()))?;

        let frames_ignored = IntCounter::with_opts(Opts::new(
            "r_wamp_frames_ignored_total",
            "Inbound frames dropped as malformed, unknown or out of place",
        ))?;
        registry.register(Box::new(frames_ignored.clone()))?;

        let sessions_established = IntCounter::with_opts(Opts::new(
            "r_wamp_sessions_established_total",
            "WELCOME messages accepted",
        ))?;
        registry.register(Box::new(sessions_established.clone()))?;

        let reconnect_attempts = IntCounter::with_opts(Opts::new(
            "r_wamp_reconnect_attempts_total",
            "Reconnects triggered by unexpected transport closes",
        ))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;

        let retries_exhausted = IntCounter::with_opts(Opts::new(
            "r_wamp_retries_exhausted_total",
            "Times the reconnect budget ran out",
        ))?;
        registry.register(Box::new(retries_exhausted.clone()))?;

        let active_subscriptions = IntGauge::with_opts(Opts::new(
            "r_wamp_active_subscriptions",
            "Subscriptions confirmed by the broker",
        ))?;
        registry.register(Box::new(active_subscriptions.clone()))?;

        let session_state = IntGauge::with_opts(Opts::new(
            "r_wamp_session_state",
            "Session state: 0 closed, 1 connecting, 2 challenging, 3 established, 4 closing",
        ))?;
        registry.register(Box::new(session_state.clone()))?;

        Ok(Self {
            registry,
            frames_sent,
            frames_received,
            frames_ignored,
            sessions_established,
            reconnect_attempts,
            retries_exhausted,
            active_subscriptions,
            session_state,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_sent(&self, kind: &str) {
        self.frames_sent.with_label_values(&[kind]).inc();
    }

    pub fn inc_received(&self, kind: &str) {
        self.frames_received.with_label_values(&[kind]).inc();
    }

    pub fn inc_ignored(&self) {
        self.frames_ignored.inc();
    }

    pub fn inc_established(&self) {
        self.sessions_established.inc();
    }

    pub fn inc_reconnect(&self) {
        self.reconnect_attempts.inc();
    }

    pub fn inc_retries_exhausted(&self) {
        self.retries_exhausted.inc();
    }

    pub fn set_active_subscriptions(&self, count: usize) {
        self.active_subscriptions
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn set_state(&self, code: i64) {
        self.session_state.set(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn session_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = SessionMetrics::new(registry.clone()).unwrap();
        metrics.inc_sent("HELLO");
        metrics.inc_received("WELCOME");
        metrics.inc_established();
        metrics.set_state(3);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"r_wamp_frames_sent_total".to_string()));
        assert!(names.contains(&"r_wamp_session_state".to_string()));
        assert!(SessionMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn http_server_serves_registry() {
        let registry = new_registry();
        let metrics = SessionMetrics::new(registry.clone()).unwrap();
        metrics.inc_reconnect();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body
            .to_ascii_lowercase()
            .contains(&format!("content-type: {}", TEXT_FORMAT.to_ascii_lowercase())));
        assert!(body.contains("r_wamp_reconnect_attempts_total 1"));
        server.shutdown().await.unwrap();
    }
}
