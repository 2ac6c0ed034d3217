//! Logging to the terminal
//!
//! Chat traffic is logged with `log_event!`, internal bookkeeping with `log_internal!`.  Both go
//! through `tracing` under their own targets, so `RUST_LOG=mila::event=info` shows only the
//! conversation.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.  Honors `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[macro_export]
macro_rules! log_event {
    // Same arguments as `println!`
    ($($arg:tt)+) => {{
        ::tracing::info!(target: "mila::event", $($arg)+)
    }};
}

#[macro_export]
macro_rules! log_internal {
    // Same arguments as `println!`
    ($($arg:tt)+) => {{
        ::tracing::info!(target: "mila::internal", $($arg)+)
    }};
}
