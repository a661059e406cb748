use tracing_subscriber::EnvFilter;

use crate::error::GatewayError;

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` wins when it is set and valid; otherwise the configured
/// `level` (e.g. `"info"` or `"chat_gateway_lib=debug,info"`) is used.
pub fn init(level: &str) -> Result<(), GatewayError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| GatewayError::Logger(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| GatewayError::Logger(format!("failed to set subscriber: {e}")))
}
