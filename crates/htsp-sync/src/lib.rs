//! # HTSP Sync
//!
//! Mirror a Tvheadend server's channel list and EPG into a local store over
//! HTSP.
//!
//! ## Overview
//!
//! A [`SyncDriver`] runs one sync session at a time:
//!
//! - **Handshake**: `hello`, then `enableAsyncMetadata` with a short EPG window
//! - **Accumulation**: `channelAdd` and `eventAdd` pushes are buffered in
//!   arrival order until `initialSyncCompleted`
//! - **Reconciliation**: channels are inserted, updated or deleted against
//!   the store, then programs are upserted
//!
//! Each session ends with a [`SyncOutcome`]: complete, cancelled or failed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use htsp_sync::store::SqliteStore;
//! use htsp_sync::{DriverConfig, SyncDriver, SyncOutcome};
//!
//! async fn example() -> htsp_sync::Result<()> {
//!     let store = Arc::new(SqliteStore::open("epg.db").unwrap());
//!     let config = DriverConfig::for_address("tvheadend.local:9982");
//!     let driver = SyncDriver::new(config, store, tokio::runtime::Handle::current());
//!
//!     match driver.start().await? {
//!         SyncOutcome::Complete(report) => {
//!             println!("{} channels inserted", report.reconcile.channels_inserted)
//!         }
//!         SyncOutcome::Cancelled => println!("cancelled"),
//!         SyncOutcome::Failed(cause) => eprintln!("sync failed: {}", cause),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `htsp_sync::core` - HTSMSG codec and domain model
//! - `htsp_sync::store` - Store traits, in-memory and SQLite stores
//! - `htsp_sync::engine` - Connection, dispatcher and sync session

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-export component crates
pub use htsp_sync_core as core;
pub use htsp_sync_engine as engine;
pub use htsp_sync_store as store;

pub use config::{DriverConfig, DEFAULT_PORT};
pub use driver::{sync_blocking, LoggingListener, SyncDriver, SyncOutcome, SyncState};
pub use error::{DriverError, Result};
pub use runtime::{build_runtime, WorkerPoolConfig};

pub use htsp_sync_engine::{SyncConfig, SyncError, SyncReport};
