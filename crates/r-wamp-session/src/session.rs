//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use r_wamp_common::SessionSettings;
use r_wamp_msg::{RoleFeatures, SessionId};

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No transport open, or the transport has not reported `Open` yet.
    #[default]
    Closed,
    /// Transport open, HELLO sent.
    Connecting,
    /// CHALLENGE received, waiting for the authenticator or the broker.
    Challenging,
    /// WELCOME accepted.
    Established,
    /// GOODBYE sent, waiting for the transport to close.
    Closing,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Connecting => "connecting",
            SessionState::Challenging => "challenging",
            SessionState::Established => "established",
            SessionState::Closing => "closing",
        }
    }

    /// Numeric value exported through the state gauge.
    pub const fn code(self) -> i64 {
        match self {
            SessionState::Closed => 0,
            SessionState::Connecting => 1,
            SessionState::Challenging => 2,
            SessionState::Established => 3,
            SessionState::Closing => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options controlling one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub realm: String,
    pub auth_methods: Vec<String>,
    pub max_retries: u32,
    pub challenge_timeout: Option<Duration>,
    pub resubscribe_on_reconnect: bool,
}

impl SessionConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 25;

    /// Defaults: `jwt` authentication, 25 retries, no challenge timeout, no resubscription.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            auth_methods: vec!["jwt".to_owned()],
            max_retries: Self::DEFAULT_MAX_RETRIES,
            challenge_timeout: None,
            resubscribe_on_reconnect: false,
        }
    }

    pub fn with_auth_methods(mut self, methods: Vec<String>) -> Self {
        self.auth_methods = methods;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = Some(timeout);
        self
    }

    pub fn with_resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            realm: settings.realm.clone(),
            auth_methods: settings.auth_methods.clone(),
            max_retries: settings.max_retries,
            challenge_timeout: settings.challenge_timeout,
            resubscribe_on_reconnect: settings.resubscribe_on_reconnect,
        }
    }
}

/// Per-connection session record. One per client; reset on every close.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) state: SessionState,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) features: RoleFeatures,
    pub(crate) closing_locally: bool,
}

impl Session {
    pub(crate) fn is_established(&self) -> bool {
        self.session_id.is_some()
    }

    /// Forget everything learned from the broker on the previous connection.
    pub(crate) fn reset(&mut self) {
        self.state = SessionState::Closed;
        self.session_id = None;
        self.features.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_settings_defaults() {
        let settings = SessionSettings::new("ws://broker/ws", "realmA");
        assert_eq!(SessionConfig::from(&settings), SessionConfig::new("realmA"));
    }

    #[test]
    fn reset_clears_broker_state_but_keeps_local_close_flag() {
        let mut session = Session {
            state: SessionState::Established,
            session_id: Some(SessionId::new(555)),
            closing_locally: true,
            ..Session::default()
        };
        session
            .features
            .insert("broker".into(), ["publisher_exclusion".to_string()].into());
        session.reset();
        assert_eq!(session.state, SessionState::Closed);
        assert!(!session.is_established());
        assert!(session.features.is_empty());
        assert!(session.closing_locally);
    }

    #[test]
    fn state_codes_are_distinct() {
        let codes: Vec<i64> = [
            SessionState::Closed,
            SessionState::Connecting,
            SessionState::Challenging,
            SessionState::Established,
            SessionState::Closing,
        ]
        .iter()
        .map(|state| state.code())
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
    }
}
