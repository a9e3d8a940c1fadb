//! ---
//! wamp_section: "01-core-functionality"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Shared configuration and tracing primitives."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_auth_methods() -> Vec<String> {
    vec!["jwt".to_owned()]
}

fn default_max_retries() -> u32 {
    25
}

fn default_token_env() -> String {
    "R_WAMP_TOKEN".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9899)
}

/// Primary configuration object for r-wamp processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub session: SessionSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_WAMP_CONFIG";

    /// Load configuration from disk, respecting the `R_WAMP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        let env_path = std::env::var(Self::ENV_CONFIG_PATH).ok();
        Self::resolve(env_path.as_deref(), candidates)
    }

    fn resolve<P: AsRef<Path>>(
        env_path: Option<&str>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        if let Some(env_path) = env_path {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if let Some(topic) = self.topics.iter().find(|topic| topic.trim().is_empty()) {
            return Err(anyhow!("topic uri {:?} must not be blank", topic));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// `[session]` table: where to connect and how the session behaves.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub url: String,
    pub realm: String,
    #[serde(default = "default_auth_methods")]
    pub auth_methods: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, rename = "challenge_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub challenge_timeout: Option<Duration>,
    #[serde(default)]
    pub resubscribe_on_reconnect: bool,
}

impl SessionSettings {
    /// Settings with defaults for everything but the address and realm.
    pub fn new(url: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            realm: realm.into(),
            auth_methods: default_auth_methods(),
            max_retries: default_max_retries(),
            challenge_timeout: None,
            resubscribe_on_reconnect: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("session url '{}' is not a valid url", self.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!(
                "session url '{}' must use the ws or wss scheme",
                self.url
            ));
        }
        if self.realm.trim().is_empty() {
            return Err(anyhow!("session realm must not be empty"));
        }
        if self.auth_methods.is_empty() {
            return Err(anyhow!("session must announce at least one auth method"));
        }
        if matches!(self.challenge_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(anyhow!("challenge_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// `[auth]` table: where the challenge response token comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_token_env(),
        }
    }
}

impl AuthConfig {
    /// The literal token when configured, otherwise the value of `token_env`.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        std::env::var(&self.token_env).with_context(|| {
            format!(
                "no auth token configured and environment variable {} is not set",
                self.token_env
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [session]
        url = "ws://127.0.0.1:8080/ws"
        realm = "realmA"
    "#;

    #[test]
    fn minimal_config_applies_defaults() {
        let config: AppConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.session.auth_methods, vec!["jwt".to_string()]);
        assert_eq!(config.session.max_retries, 25);
        assert_eq!(config.session.challenge_timeout, None);
        assert!(!config.session.resubscribe_on_reconnect);
        assert_eq!(config.auth.token_env, "R_WAMP_TOKEN");
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert!(!config.metrics.enabled);
        assert!(config.topics.is_empty());
    }

    #[test]
    fn full_config_round_trips_every_section() {
        let config: AppConfig = r#"
            topics = ["topic/x", "topic/y"]

            [session]
            url = "wss://broker.example/ws"
            realm = "realmA"
            auth_methods = ["jwt", "ticket"]
            max_retries = 3
            challenge_timeout_ms = 1500
            resubscribe_on_reconnect = true

            [auth]
            token = "tok123"

            [logging]
            directory = "/tmp/r-wamp"
            format = "pretty"
            file_prefix = "listener"

            [metrics]
            enabled = true
            listen = "127.0.0.1:9100"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.session.max_retries, 3);
        assert_eq!(
            config.session.challenge_timeout,
            Some(Duration::from_millis(1500))
        );
        assert!(config.session.resubscribe_on_reconnect);
        assert_eq!(config.auth.resolve_token().unwrap(), "tok123");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.metrics.listen.port(), 9100);
        assert_eq!(config.topics.len(), 2);
    }

    #[test]
    fn rejects_non_websocket_url() {
        let err = r#"
            [session]
            url = "http://broker.example/ws"
            realm = "realmA"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn rejects_blank_realm_and_topics() {
        assert!(r#"
            [session]
            url = "ws://broker/ws"
            realm = "  "
        "#
        .parse::<AppConfig>()
        .is_err());

        assert!(r#"
            topics = [""]
            [session]
            url = "ws://broker/ws"
            realm = "realmA"
        "#
        .parse::<AppConfig>()
        .is_err());
    }

    #[test]
    fn token_is_not_serialized() {
        let mut config: AppConfig = MINIMAL.parse().unwrap();
        config.auth.token = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("challenge_timeout_ms"));
    }

    #[test]
    fn token_falls_back_to_environment() {
        let auth = AuthConfig {
            token: None,
            token_env: "R_WAMP_CONFIG_TEST_TOKEN".into(),
        };
        assert!(auth.resolve_token().is_err());
        std::env::set_var("R_WAMP_CONFIG_TEST_TOKEN", "from-env");
        assert_eq!(auth.resolve_token().unwrap(), "from-env");
        std::env::remove_var("R_WAMP_CONFIG_TEST_TOKEN");
    }

    #[test]
    fn resolve_prefers_override_then_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.toml");
        let override_path = dir.path().join("override.toml");
        fs::File::create(&present)
            .unwrap()
            .write_all(MINIMAL.as_bytes())
            .unwrap();
        fs::write(&override_path, MINIMAL.replace("realmA", "realmB")).unwrap();

        let candidates = [dir.path().join("missing.toml"), present.clone()];
        let loaded = AppConfig::resolve(None, &candidates).unwrap();
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.session.realm, "realmA");

        let loaded =
            AppConfig::resolve(override_path.to_str(), &candidates).unwrap();
        assert_eq!(loaded.source, override_path);
        assert_eq!(loaded.config.session.realm, "realmB");

        let err = AppConfig::resolve(None, &[dir.path().join("missing.toml")]).unwrap_err();
        assert!(err.to_string().contains("no configuration files found"));
    }
}
