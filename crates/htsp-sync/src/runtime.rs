//! Worker pool construction for the composition root.
//!
//! The engine never builds a runtime; it spawns onto the `Handle` it is
//! given. This module builds the one the application hands down.

use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};

use crate::error::{DriverError, Result};

/// Multi-thread runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Worker thread count; `None` uses one per core.
    pub worker_threads: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name_prefix: "htsp-sync".into(),
        }
    }
}

/// Build the multi-thread runtime described by `config`.
pub fn build_runtime(config: &WorkerPoolConfig) -> Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder
        .enable_all()
        .thread_name(config.thread_name_prefix.clone());

    if let Some(threads) = config.worker_threads {
        builder.worker_threads(threads.max(1));
    }

    builder.build().map_err(DriverError::Runtime)
}
