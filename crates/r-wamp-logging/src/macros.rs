//! ---
//! wamp_section: "03-logging-metrics"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Structured logging adapters and session context."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Level-specific logging macros.
//!
//! `context = ctx` attaches the realm, session, request and attempt fields
//! that are set on a [`LogContext`](crate::LogContext); unset fields are
//! left out of the record. Without a context only the message is emitted.

#[doc(hidden)]
#[macro_export]
macro_rules! __wamp_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx: &$crate::LogContext<'_> = &$ctx;
        $crate::__tracing::event!(
            $level,
            realm = ctx.realm,
            session = ctx.session,
            request = ctx.request,
            attempt = ctx.attempt,
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {
        $crate::__tracing::event!($level, message = %format_args!($($arg)+))
    };
}

/// Informational record, optionally enriched with session context.
#[macro_export]
macro_rules! wamp_info {
    ($($arg:tt)+) => {
        $crate::__wamp_event!($crate::__tracing::Level::INFO, $($arg)+)
    };
}

/// Debug record, optionally enriched with session context.
#[macro_export]
macro_rules! wamp_debug {
    ($($arg:tt)+) => {
        $crate::__wamp_event!($crate::__tracing::Level::DEBUG, $($arg)+)
    };
}

/// Warning record, optionally enriched with session context.
#[macro_export]
macro_rules! wamp_warn {
    ($($arg:tt)+) => {
        $crate::__wamp_event!($crate::__tracing::Level::WARN, $($arg)+)
    };
}
