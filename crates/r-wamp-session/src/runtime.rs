//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Async driver for [`WampClient`].
//!
//! One task owns the client. User commands, transport events and
//! authentication results arrive on separate channels and are applied one at a
//! time from a single `select!` loop. The authenticator runs in its own task
//! so inbound frames keep flowing while a token is produced.
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use r_wamp_metrics::SessionMetrics;
use r_wamp_msg::{RequestId, SessionId};
use r_wamp_transport::{ConnectionId, TransportEvent, TransportEventKind, WebSocketConnector};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ChallengeRequest, MessageOutcome, WampClient};
use crate::registry::{Event, EventHandler};
use crate::session::{SessionConfig, SessionState};
use crate::{Result, SessionError};

/// Produces the token answering a broker CHALLENGE.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn respond(&self, challenge: &ChallengeRequest) -> anyhow::Result<String>;
}

/// Answers every challenge with the same token.
#[derive(Clone)]
pub struct StaticTokenAuthenticator {
    token: String,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn respond(&self, _challenge: &ChallengeRequest) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}

/// Snapshot published after every processed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub reconnect_attempts: u32,
    pub terminated: bool,
}

impl SessionStatus {
    fn of(client: &WampClient) -> Self {
        Self {
            state: client.state(),
            session_id: client.session_id(),
            reconnect_attempts: client.reconnect_attempts(),
            terminated: client.is_terminated(),
        }
    }
}

enum Command {
    Subscribe {
        topic: String,
        handler: EventHandler,
        reply: oneshot::Sender<Result<RequestId>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

struct AuthResult {
    connection: ConnectionId,
    token: anyhow::Result<String>,
}

/// Entry points spawning the session task.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Connect `client` and drive it from a new task.
    ///
    /// `events` must receive the events of the connector the client was
    /// built with. Must be called from within a tokio runtime.
    pub fn spawn(
        mut client: WampClient,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<SessionHandle> {
        client.connect()?;
        let challenge_timeout = client.config().challenge_timeout;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::of(&client));

        let driver = Driver {
            client,
            events,
            commands: command_rx,
            auth_tx,
            auth_rx,
            authenticator,
            challenge_timeout,
            status: status_tx,
            auth_task: None,
        };
        tokio::spawn(driver.run());
        Ok(SessionHandle {
            commands: command_tx,
            status: status_rx,
        })
    }

    /// Build a WebSocket client for `url` and spawn it.
    pub fn connect_websocket(
        url: impl Into<String>,
        config: SessionConfig,
        authenticator: Arc<dyn Authenticator>,
        metrics: Option<SessionMetrics>,
    ) -> Result<SessionHandle> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut client = WampClient::new(url, config, Box::new(WebSocketConnector::new(event_tx)));
        if let Some(metrics) = metrics {
            client = client.with_metrics(metrics);
        }
        Self::spawn(client, event_rx, authenticator)
    }
}

struct Driver {
    client: WampClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    auth_tx: mpsc::UnboundedSender<AuthResult>,
    auth_rx: mpsc::UnboundedReceiver<AuthResult>,
    authenticator: Arc<dyn Authenticator>,
    challenge_timeout: Option<Duration>,
    status: watch::Sender<SessionStatus>,
    auth_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self) {
        let mut commands_open = true;
        while !self.client.is_terminated() {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => {
                        warn!("transport event channel closed; stopping session runtime");
                        break;
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("all session handles dropped; disconnecting");
                        commands_open = false;
                        self.client.disconnect();
                    }
                },
                Some(result) = self.auth_rx.recv() => self.on_auth_result(result),
            }
            self.publish();
        }
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        self.publish();
        info!(state = %self.client.state(), "session runtime stopped");
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let connection = event.connection;
        match event.kind {
            TransportEventKind::Open => self.client.on_open(connection),
            TransportEventKind::Message(frame) => {
                if let MessageOutcome::Challenge(request) = self.client.on_message(connection, &frame)
                {
                    self.start_authentication(request);
                }
            }
            TransportEventKind::Error(error) => self.client.on_error(connection, &error),
            TransportEventKind::Close => self.client.on_close(connection),
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                topic,
                handler,
                reply,
            } => {
                let _ = reply.send(self.client.subscribe_boxed(topic, handler));
            }
            Command::Disconnect { reply } => {
                self.client.disconnect();
                let _ = reply.send(());
            }
        }
    }

    fn on_auth_result(&mut self, result: AuthResult) {
        match result.token {
            Ok(token) => {
                self.client.complete_challenge(result.connection, token);
            }
            Err(err) => self
                .client
                .abort_challenge(result.connection, &format!("{err:#}")),
        }
    }

    fn start_authentication(&mut self, request: ChallengeRequest) {
        if let Some(previous) = self.auth_task.take() {
            previous.abort();
        }
        let authenticator = self.authenticator.clone();
        let results = self.auth_tx.clone();
        let timeout = self.challenge_timeout;
        self.auth_task = Some(tokio::spawn(async move {
            let token = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, authenticator.respond(&request)).await {
                        Ok(token) => token,
                        Err(_) => Err(anyhow!("no challenge response within {:?}", limit)),
                    }
                }
                None => authenticator.respond(&request).await,
            };
            let _ = results.send(AuthResult {
                connection: request.connection,
                token,
            });
        }));
    }

    fn publish(&self) {
        let status = SessionStatus::of(&self.client);
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Subscribe to `topic`; resolves with the request id once the command was applied.
    pub async fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Result<RequestId>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.into(),
                handler: Box::new(handler),
                reply,
            })
            .map_err(|_| SessionError::RuntimeStopped)?;
        response.await.map_err(|_| SessionError::RuntimeStopped)?
    }

    /// Ask the session to leave; resolves once GOODBYE was sent and the close requested.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { reply })
            .map_err(|_| SessionError::RuntimeStopped)?;
        response.await.map_err(|_| SessionError::RuntimeStopped)
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Resolve with the session id of the next (or current) established session.
    pub async fn wait_until_established(&self) -> Result<SessionId> {
        let mut status = self.status.clone();
        let snapshot = *status
            .wait_for(|status| status.session_id.is_some() || status.terminated)
            .await
            .map_err(|_| SessionError::RuntimeStopped)?;
        snapshot.session_id.ok_or(SessionError::Terminated)
    }

    /// Resolve once the client stopped for good.
    pub async fn terminated(&self) -> SessionStatus {
        let mut status = self.status.clone();
        let result = status.wait_for(|status| status.terminated).await.map(|s| *s);
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => *status.borrow(),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
