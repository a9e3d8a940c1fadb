//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Synchronous session state machine.
//!
//! The client never blocks and never spawns. Whoever owns it feeds transport
//! notifications through [`WampClient::on_open`], [`WampClient::on_message`],
//! [`WampClient::on_error`] and [`WampClient::on_close`], each tagged with the
//! connection they came from. Notifications from any connection other than
//! the current one are dropped.
use r_wamp_logging::{
    log_session_event, wamp_debug, wamp_info, wamp_warn, LogContext, SessionEventOutcome,
};
use r_wamp_metrics::SessionMetrics;
use r_wamp_msg::{
    decode, encode, hello_details, log_frame, parse_roles, Details, FrameDirection,
    RequestId, RoleFeatures, SessionId, WampMessage, JSON_SUBPROTOCOL, MAX_ID,
};
use r_wamp_transport::{ConnectionId, Connector, Transport};

use crate::queue::{OutboundQueue, QueuedFrame};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::registry::{ConfirmOutcome, Event, EventHandler, SubscriptionRegistry};
use crate::session::{Session, SessionConfig, SessionState};
use crate::{Result, SessionError};

/// Reason sent in the GOODBYE of a local disconnect.
pub const CLOSE_SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
/// Reason sent when answering a broker-initiated GOODBYE.
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";

/// Callback fired once per established session.
pub type ConnectHandler = Box<dyn FnMut(SessionId) + Send>;

/// Authentication request surfaced to the owner of the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeRequest {
    pub connection: ConnectionId,
    pub auth_method: String,
    pub extra: Details,
}

/// What the client did with an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Handled,
    /// Malformed, unknown, stale or not valid in the current state.
    Ignored,
    /// The owner must produce a token and call [`WampClient::complete_challenge`].
    Challenge(ChallengeRequest),
}

pub struct WampClient {
    url: String,
    config: SessionConfig,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    session: Session,
    registry: SubscriptionRegistry,
    queue: OutboundQueue,
    reconnect: ReconnectPolicy,
    next_request: u64,
    pending_challenge: Option<ConnectionId>,
    on_connect: Option<ConnectHandler>,
    metrics: Option<SessionMetrics>,
    terminated: bool,
}

impl WampClient {
    pub fn new(url: impl Into<String>, config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        let reconnect = ReconnectPolicy::new(config.max_retries);
        Self {
            url: url.into(),
            config,
            connector,
            transport: None,
            session: Session::default(),
            registry: SubscriptionRegistry::new(),
            queue: OutboundQueue::new(),
            reconnect,
            next_request: 1,
            pending_challenge: None,
            on_connect: None,
            metrics: None,
            terminated: false,
        }
    }

    /// Report counters and the state gauge into `metrics`.
    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        metrics.set_state(self.session.state.code());
        self.metrics = Some(metrics);
        self
    }

    /// Register the callback fired when a session is established.
    pub fn on_connect<F>(&mut self, handler: F)
    where
        F: FnMut(SessionId) + Send + 'static,
    {
        self.on_connect = Some(Box::new(handler));
    }

    /// Open a transport towards the configured address.
    ///
    /// Fails when a transport is already active. A connector that refuses
    /// synchronously is retried under the reconnect policy; the error is
    /// returned only once the policy gives up.
    pub fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        self.terminated = false;
        self.session.closing_locally = false;
        self.reconnect = ReconnectPolicy::new(self.config.max_retries);
        self.open_transport()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.session_id
    }

    /// Broker role features announced in WELCOME.
    pub fn features(&self) -> &RoleFeatures {
        &self.session.features
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    /// True once the client stopped for good: after a local disconnect
    /// completed or the retry budget ran out.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.transport.as_ref().map(|transport| transport.id())
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Register interest in `topic`. The SUBSCRIBE frame goes out as soon as
    /// a session is established; confirmation arrives asynchronously.
    pub fn subscribe<F>(&mut self, topic: impl Into<String>, handler: F) -> Result<RequestId>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.subscribe_boxed(topic.into(), Box::new(handler))
    }

    pub(crate) fn subscribe_boxed(&mut self, topic: String, handler: EventHandler) -> Result<RequestId> {
        if self.session.closing_locally {
            return Err(SessionError::Disconnecting);
        }
        let request = self.allocate_request()?;
        self.enqueue_subscribe(request, topic, handler)?;
        self.flush();
        Ok(request)
    }

    /// Queue `message` (if any) behind everything already buffered, then drain
    /// the queue when a session is established. Order of calls is preserved.
    pub fn send(&mut self, message: Option<WampMessage>) -> Result<()> {
        if let Some(message) = message {
            let frame = encode(&message)?;
            log_frame(FrameDirection::Queued, &message);
            self.queue.push_back(QueuedFrame {
                frame,
                kind: message.kind(),
                request: None,
            });
        }
        self.flush();
        Ok(())
    }

    /// Leave the session and close the transport without reconnecting.
    pub fn disconnect(&mut self) {
        self.session.closing_locally = true;
        self.pending_challenge = None;
        self.registry.clear();
        self.update_subscription_gauge();

        if self.session.state == SessionState::Established {
            if let Err(err) = self.send(Some(WampMessage::goodbye(CLOSE_SYSTEM_SHUTDOWN))) {
                wamp_warn!(context = self.log_context(), "failed to send goodbye: {}", err);
            }
        }
        self.queue.clear();

        match self.transport.as_mut() {
            Some(transport) => {
                transport.close();
                self.set_state(SessionState::Closing);
                wamp_info!(context = self.log_context(), "closing session locally");
            }
            None => {
                self.set_state(SessionState::Closed);
                self.terminated = true;
            }
        }
    }

    /// The transport `connection` is open: send HELLO.
    pub fn on_open(&mut self, connection: ConnectionId) {
        if !self.is_current(connection) {
            return;
        }
        self.set_state(SessionState::Connecting);
        let hello = WampMessage::Hello {
            realm: self.config.realm.clone(),
            details: hello_details(&self.config.auth_methods),
        };
        self.send_direct(&hello);
    }

    /// Handle one inbound text frame from `connection`.
    pub fn on_message(&mut self, connection: ConnectionId, frame: &str) -> MessageOutcome {
        if !self.is_current(connection) {
            wamp_debug!("dropping frame from superseded connection {}", connection);
            return MessageOutcome::Ignored;
        }
        let message = match decode(frame) {
            Ok(message) => message,
            Err(err) => {
                wamp_debug!(context = self.log_context(), "ignoring undecodable frame: {}", err);
                self.count_ignored();
                return MessageOutcome::Ignored;
            }
        };
        log_frame(FrameDirection::Inbound, &message);
        if let Some(metrics) = &self.metrics {
            metrics.inc_received(message.name());
        }

        let outcome = match message {
            WampMessage::Welcome { session, details } => self.handle_welcome(session, &details),
            WampMessage::Challenge { auth_method, extra } => {
                self.handle_challenge(connection, auth_method, extra)
            }
            WampMessage::Subscribed {
                request,
                subscription,
            } => match self.registry.confirm(request, subscription) {
                ConfirmOutcome::Confirmed => {
                    self.update_subscription_gauge();
                    wamp_debug!(
                        context = self.log_context().with_request(request.get()),
                        "subscription {} confirmed",
                        subscription
                    );
                    MessageOutcome::Handled
                }
                ConfirmOutcome::UnknownRequest => {
                    wamp_warn!(
                        context = self.log_context().with_request(request.get()),
                        "confirmation for unknown request"
                    );
                    MessageOutcome::Ignored
                }
                ConfirmOutcome::AlreadyConfirmed => {
                    wamp_warn!(
                        context = self.log_context().with_request(request.get()),
                        "duplicate confirmation"
                    );
                    MessageOutcome::Ignored
                }
            },
            WampMessage::Event {
                subscription,
                publication,
                details,
                args,
                kwargs,
            } => {
                let event = Event {
                    subscription,
                    publication,
                    details,
                    args: args.unwrap_or_default(),
                    kwargs: kwargs.unwrap_or_default(),
                };
                if self.registry.dispatch(&event) == 0 {
                    wamp_debug!(
                        context = self.log_context(),
                        "event for unknown subscription {}",
                        subscription
                    );
                }
                MessageOutcome::Handled
            }
            WampMessage::Abort { reason, details } => {
                wamp_warn!(
                    context = self.log_context(),
                    "broker aborted session: {} {}",
                    reason,
                    serde_json::Value::Object(details)
                );
                MessageOutcome::Handled
            }
            WampMessage::Goodbye { reason, .. } => self.handle_goodbye(&reason),
            WampMessage::Unknown { code, .. } => {
                wamp_debug!(context = self.log_context(), "ignoring message type {}", code);
                MessageOutcome::Ignored
            }
            other => {
                wamp_debug!(
                    context = self.log_context(),
                    "ignoring client-only message {}",
                    other.name()
                );
                MessageOutcome::Ignored
            }
        };
        if outcome == MessageOutcome::Ignored {
            self.count_ignored();
        }
        outcome
    }

    /// Transport errors are informational; only a close changes state.
    pub fn on_error(&mut self, connection: ConnectionId, error: &str) {
        if self.is_current(connection) {
            wamp_warn!(context = self.log_context(), "transport error on {}: {}", connection, error);
        }
    }

    /// The transport `connection` is gone.
    pub fn on_close(&mut self, connection: ConnectionId) {
        if !self.is_current(connection) {
            return;
        }
        self.transport = None;
        self.pending_challenge = None;
        let was_established = self.session.is_established();
        self.session.reset();
        self.set_state(SessionState::Closed);

        if self.session.closing_locally {
            self.terminated = true;
            log_session_event(
                Some(&self.log_context()),
                "session.closed",
                "session closed after local disconnect",
                SessionEventOutcome::Success,
            );
            return;
        }

        wamp_warn!(
            context = self.log_context(),
            "transport closed unexpectedly (established: {})",
            was_established
        );
        self.retain_intent_after_close();
        self.retry_or_give_up();
    }

    /// Send the token produced for the challenge raised on `connection`.
    ///
    /// Returns false when the challenge is no longer outstanding, for example
    /// because the connection was replaced meanwhile.
    pub fn complete_challenge(&mut self, connection: ConnectionId, token: impl Into<String>) -> bool {
        if self.pending_challenge != Some(connection) || !self.is_current(connection) {
            wamp_debug!("discarding token for stale challenge on {}", connection);
            return false;
        }
        self.pending_challenge = None;
        self.send_direct(&WampMessage::authenticate(token))
    }

    /// Give up on the challenge raised on `connection` and close its transport.
    pub fn abort_challenge(&mut self, connection: ConnectionId, reason: &str) {
        if self.pending_challenge != Some(connection) || !self.is_current(connection) {
            return;
        }
        self.pending_challenge = None;
        wamp_warn!(context = self.log_context(), "challenge failed: {}", reason);
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }

    fn handle_welcome(&mut self, session: SessionId, details: &Details) -> MessageOutcome {
        if !matches!(
            self.session.state,
            SessionState::Connecting | SessionState::Challenging
        ) || self.session.is_established()
        {
            wamp_debug!(context = self.log_context(), "ignoring welcome for session {}", session);
            return MessageOutcome::Ignored;
        }
        self.session.session_id = Some(session);
        self.session.features = parse_roles(details);
        self.pending_challenge = None;
        self.reconnect.on_established();
        self.set_state(SessionState::Established);
        if let Some(metrics) = &self.metrics {
            metrics.inc_established();
        }
        log_session_event(
            Some(&self.log_context()),
            "session.established",
            "session established",
            SessionEventOutcome::Success,
        );

        self.flush();
        if let Some(handler) = self.on_connect.as_mut() {
            handler(session);
        }
        MessageOutcome::Handled
    }

    fn handle_challenge(
        &mut self,
        connection: ConnectionId,
        auth_method: String,
        extra: Details,
    ) -> MessageOutcome {
        if self.session.state != SessionState::Connecting || self.pending_challenge.is_some() {
            wamp_debug!(
                context = self.log_context(),
                "ignoring challenge in state {}",
                self.session.state
            );
            return MessageOutcome::Ignored;
        }
        self.pending_challenge = Some(connection);
        self.set_state(SessionState::Challenging);
        wamp_debug!(context = self.log_context(), "challenge received for {}", auth_method);
        MessageOutcome::Challenge(ChallengeRequest {
            connection,
            auth_method,
            extra,
        })
    }

    fn handle_goodbye(&mut self, reason: &str) -> MessageOutcome {
        if self.session.state == SessionState::Closing {
            // broker acknowledged our GOODBYE
            return MessageOutcome::Handled;
        }
        if !self.session.is_established() {
            return MessageOutcome::Ignored;
        }
        wamp_info!(context = self.log_context(), "broker closed session: {}", reason);
        self.send_direct(&WampMessage::goodbye(CLOSE_GOODBYE_AND_OUT));
        self.set_state(SessionState::Closing);
        MessageOutcome::Handled
    }

    /// Keep queued subscriptions; re-key already sent ones when resubscription is enabled.
    fn retain_intent_after_close(&mut self) {
        let dropped = self.registry.drain_sent();
        self.update_subscription_gauge();
        if !self.config.resubscribe_on_reconnect {
            if !dropped.is_empty() {
                wamp_info!(
                    context = self.log_context(),
                    "dropped {} subscriptions with the lost session",
                    dropped.len()
                );
            }
            return;
        }
        for (topic, handler) in dropped {
            let request = match self.allocate_request() {
                Ok(request) => request,
                Err(err) => {
                    wamp_warn!(context = self.log_context(), "cannot resubscribe to {}: {}", topic, err);
                    continue;
                }
            };
            if let Err(err) = self.enqueue_subscribe(request, topic, handler) {
                wamp_warn!(context = self.log_context(), "cannot resubscribe: {}", err);
            }
        }
    }

    fn retry_or_give_up(&mut self) {
        loop {
            match self.reconnect.on_unexpected_close() {
                ReconnectDecision::Retry { attempt } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_reconnect();
                    }
                    wamp_info!(
                        context = self.log_context().with_attempt(attempt),
                        "reconnecting to {}",
                        self.url
                    );
                    match self.open_once() {
                        Ok(()) => return,
                        Err(err) => {
                            wamp_warn!(
                                context = self.log_context().with_attempt(attempt),
                                "reconnect failed: {}",
                                err
                            );
                        }
                    }
                }
                ReconnectDecision::GiveUp => {
                    self.terminated = true;
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_retries_exhausted();
                    }
                    log_session_event(
                        Some(&self.log_context().with_attempt(self.reconnect.attempts())),
                        "session.retries_exhausted",
                        "giving up after exhausting reconnect attempts",
                        SessionEventOutcome::Fault,
                    );
                    return;
                }
            }
        }
    }

    fn open_transport(&mut self) -> Result<()> {
        match self.open_once() {
            Ok(()) => Ok(()),
            Err(err) => {
                wamp_warn!(context = self.log_context(), "failed to open transport: {}", err);
                self.retry_or_give_up();
                if self.transport.is_some() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn open_once(&mut self) -> Result<()> {
        let transport = self.connector.open(&self.url, &[JSON_SUBPROTOCOL])?;
        wamp_debug!(
            context = self.log_context(),
            "opened {} transport {}",
            transport.name(),
            transport.id()
        );
        self.transport = Some(transport);
        Ok(())
    }

    fn allocate_request(&mut self) -> Result<RequestId> {
        if self.next_request > MAX_ID {
            return Err(SessionError::RequestIdsExhausted);
        }
        let request = RequestId::new(self.next_request);
        self.next_request += 1;
        Ok(request)
    }

    fn enqueue_subscribe(&mut self, request: RequestId, topic: String, handler: EventHandler) -> Result<()> {
        let message = WampMessage::subscribe(request, topic.clone());
        let frame = encode(&message)?;
        log_frame(FrameDirection::Queued, &message);
        self.registry.insert(request, topic, handler);
        self.queue.push_back(QueuedFrame {
            frame,
            kind: message.kind(),
            request: Some(request),
        });
        Ok(())
    }

    /// Drain the queue FIFO, only while the session is established.
    fn flush(&mut self) {
        if self.session.state != SessionState::Established || !self.session.is_established() {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        while let Some(entry) = self.queue.pop_front() {
            match transport.send(entry.frame.clone()) {
                Ok(()) => {
                    if let Some(request) = entry.request {
                        self.registry.mark_requested(request);
                    }
                    if let (Some(metrics), Some(kind)) = (&self.metrics, entry.kind) {
                        metrics.inc_sent(kind.as_str());
                    }
                }
                Err(err) => {
                    wamp_warn!("flush interrupted: {}", err);
                    self.queue.push_front(entry);
                    break;
                }
            }
        }
    }

    /// Write a frame straight to the transport, bypassing the queue.
    fn send_direct(&mut self, message: &WampMessage) -> bool {
        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(err) => {
                wamp_warn!(context = self.log_context(), "failed to encode {}: {}", message.name(), err);
                return false;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(frame) {
            Ok(()) => {
                log_frame(FrameDirection::Outbound, message);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_sent(message.name());
                }
                true
            }
            Err(err) => {
                wamp_warn!("failed to send {}: {}", message.name(), err);
                false
            }
        }
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection_id() == Some(connection)
    }

    fn set_state(&mut self, state: SessionState) {
        self.session.state = state;
        if let Some(metrics) = &self.metrics {
            metrics.set_state(state.code());
        }
    }

    fn count_ignored(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_ignored();
        }
    }

    fn update_subscription_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_subscriptions(self.registry.active_count());
        }
    }

    fn log_context(&self) -> LogContext<'_> {
        let mut context = LogContext::new().with_realm(&self.config.realm);
        if let Some(session) = self.session.session_id {
            context = context.with_session(session.get());
        }
        context
    }
}
