//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Transport adapters carrying text frames for the session layer."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::{
    ConnectionId, Connector, Result, Transport, TransportError, TransportEvent,
    TransportEventKind,
};

#[derive(Debug)]
enum Outgoing {
    Frame(String),
    Close,
}

/// Connector opening WebSocket client connections.
///
/// Each transport runs in its own tokio task and reports through the event
/// channel supplied at construction.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl WebSocketConnector {
    /// Create a connector publishing transport events into `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { events }
    }
}

impl Connector for WebSocketConnector {
    fn open(&mut self, url: &str, protocols: &[&str]) -> Result<Box<dyn Transport>> {
        let request = build_request(url, protocols)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let id = ConnectionId::next();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        debug!(connection = %id, url, "opening websocket transport");
        runtime.spawn(run_connection(id, request, outgoing_rx, self.events.clone()));
        Ok(Box::new(WebSocketTransport {
            id,
            outgoing: outgoing_tx,
        }))
    }
}

/// Sending half of a WebSocket connection.
#[derive(Debug)]
pub struct WebSocketTransport {
    id: ConnectionId,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WebSocketTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, frame: String) -> Result<()> {
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

fn build_request(url: &str, protocols: &[&str]) -> Result<Request> {
    let invalid = |reason: String| TransportError::InvalidAddress {
        url: url.to_owned(),
        reason,
    };
    let mut request = url
        .into_client_request()
        .map_err(|err| invalid(err.to_string()))?;
    if !protocols.is_empty() {
        let value =
            HeaderValue::from_str(&protocols.join(", ")).map_err(|err| invalid(err.to_string()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    Ok(request)
}

async fn run_connection(
    id: ConnectionId,
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent::new(id, kind));
    };

    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(connection = %id, error = %err, "websocket connect failed");
            emit(TransportEventKind::Error(err.to_string()));
            emit(TransportEventKind::Close);
            return;
        }
    };
    emit(TransportEventKind::Open);

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Frame(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        emit(TransportEventKind::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    if let Err(err) = sink.close().await {
                        debug!(connection = %id, error = %err, "websocket close handshake failed");
                    }
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => emit(TransportEventKind::Message(text)),
                Some(Ok(Message::Binary(_))) => emit(TransportEventKind::Error(
                    "binary frames are not supported by the JSON serializer".into(),
                )),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    emit(TransportEventKind::Error(err.to_string()));
                    break;
                }
            },
        }
    }

    debug!(connection = %id, "websocket transport closed");
    emit(TransportEventKind::Close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn echo(mut socket: WebSocket) {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                AxumMessage::Text(text) => {
                    if socket.send(AxumMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                AxumMessage::Close(_) => break,
                _ => {}
            }
        }
    }

    async fn spawn_echo_server() -> String {
        let app = Router::new().route(
            "/ws",
            get(|ws: WebSocketUpgrade| async move {
                ws.protocols(["wamp.2.json"]).on_upgrade(echo)
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("ws://{address}/ws")
    }

    async fn next_event(
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> TransportEventKind {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event before timeout")
            .expect("event channel open")
            .kind
    }

    #[tokio::test]
    async fn websocket_transport_reports_lifecycle() {
        let url = spawn_echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WebSocketConnector::new(tx);
        let mut transport = connector.open(&url, &["wamp.2.json"]).unwrap();

        assert_eq!(next_event(&mut rx).await, TransportEventKind::Open);
        transport.send("[1,\"realm\",{}]".into()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            TransportEventKind::Message("[1,\"realm\",{}]".into())
        );

        transport.close();
        assert_eq!(next_event(&mut rx).await, TransportEventKind::Close);
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WebSocketConnector::new(tx);
        let _transport = connector
            .open(&format!("ws://{address}/ws"), &["wamp.2.json"])
            .unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            TransportEventKind::Error(_)
        ));
        assert_eq!(next_event(&mut rx).await, TransportEventKind::Close);
    }

    #[test]
    fn invalid_address_is_rejected_synchronously() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connector = WebSocketConnector::new(tx);
        assert!(matches!(
            connector.open("not a url", &[]),
            Err(TransportError::InvalidAddress { .. })
        ));
    }
}
