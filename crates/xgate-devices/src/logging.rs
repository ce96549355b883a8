//! Logging setup for binaries embedding the gateway.

use crate::config::env_vars;

/// Install the global `tracing` subscriber.
///
/// Filtering comes from `RUST_LOG`, defaulting to `info` for the gateway
/// crates and `warn` for everything else. Setting
/// `XGATE_LOG_JSON=true` switches to JSON lines for container deployments.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging() {
    let json_logging = env_vars::get::<bool>(env_vars::LOG_JSON).unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("xgate_devices=info,xgate_entities=info")
            .add_directive(tracing::Level::WARN.into())
    });

    let result = if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
