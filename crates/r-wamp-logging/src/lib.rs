//! ---
//! wamp_section: "03-logging-metrics"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Structured logging adapters and session context."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Session-scoped structured logging on top of `tracing`.
//!
//! Subscriber setup lives with the application configuration; this crate only
//! shapes events.

use tracing::Level;

pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

/// Session context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Realm the session joins.
    pub realm: Option<&'a str>,
    /// Broker-assigned session identifier, once established.
    pub session: Option<u64>,
    /// Request identifier the event relates to.
    pub request: Option<u64>,
    /// Reconnect attempt number.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a realm.
    pub fn with_realm(mut self, realm: &'a str) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Attach a session identifier.
    pub fn with_session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach a request identifier.
    pub fn with_request(mut self, request: u64) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach a reconnect attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Outcome used when emitting session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed or was abandoned.
    Fault,
}

impl SessionEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEventOutcome::Success => "success",
            SessionEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a session lifecycle event: INFO on success, ERROR on fault.
pub fn log_session_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SessionEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event = %event,
                outcome = outcome.as_str(),
                realm = ctx.realm,
                session = ctx.session,
                request = ctx.request,
                attempt = ctx.attempt,
                message = %message
            )
        };
    }
    match outcome {
        SessionEventOutcome::Success => emit!(Level::INFO),
        SessionEventOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(out.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        out.text()
    }

    #[test]
    fn context_fields_are_attached_when_set() {
        let logs = capture(|| {
            let ctx = LogContext::new().with_realm("realmA").with_session(555);
            wamp_info!(context = ctx.clone(), "session established");
            wamp_warn!(context = ctx.with_request(3), "late confirmation {}", 7);
        });
        let lines: Vec<_> = logs.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("session established"));
        assert!(lines[0].contains("realm=\"realmA\"") || lines[0].contains("realm=realmA"));
        assert!(lines[0].contains("session=555"));
        assert!(!lines[0].contains("request="));
        assert!(lines[1].contains("WARN"));
        assert!(lines[1].contains("late confirmation 7"));
        assert!(lines[1].contains("request=3"));
    }

    #[test]
    fn plain_form_emits_message_only() {
        let logs = capture(|| wamp_debug!("dropping frame from {}", "conn-1"));
        assert!(logs.contains("DEBUG"));
        assert!(logs.contains("dropping frame from conn-1"));
        assert!(!logs.contains("realm="));
    }

    #[test]
    fn context_builders_attach_fields() {
        let ctx = LogContext::new()
            .with_realm("realmA")
            .with_session(1)
            .with_request(2)
            .with_attempt(3);
        assert_eq!(ctx.realm, Some("realmA"));
        assert_eq!(ctx.session, Some(1));
        assert_eq!(ctx.request, Some(2));
        assert_eq!(ctx.attempt, Some(3));
    }

    #[test]
    fn session_event_level_follows_outcome() {
        let logs = capture(|| {
            let ctx = LogContext::new().with_realm("realmA").with_attempt(2);
            log_session_event(
                Some(&ctx),
                "session.reconnect",
                "reconnecting",
                SessionEventOutcome::Success,
            );
            log_session_event(
                None,
                "session.retries_exhausted",
                "giving up",
                SessionEventOutcome::Fault,
            );
        });
        let lines: Vec<_> = logs.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO") && lines[0].contains("attempt=2"));
        assert!(lines[0].contains("outcome=\"success\"") || lines[0].contains("outcome=success"));
        assert!(lines[1].contains("ERROR") && lines[1].contains("session.retries_exhausted"));
    }
}
