//! ---
//! wamp_section: "01-core-functionality"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Shared configuration and tracing primitives."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Shared primitives for the r-wamp workspace: configuration loading and
//! tracing initialisation consumed by the session runtime and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, AuthConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, SessionSettings,
};
pub use logging::{init_tracing, LogFormat};
