//! Subscriber setup for applications embedding the driver.

use tracing_subscriber::EnvFilter;

use crate::error::{DriverError, Result};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` applies
/// (e.g. `"htsp_sync=info,htsp_sync_engine=debug"`).
pub fn init(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| DriverError::Logging(e.to_string()))
}
