//! # HTSP Sync Store
//!
//! Storage abstraction for synchronized channels and programs. Provides a
//! trait-based interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync engine writes through the [`ChannelStore`] and [`ProgramStore`]
//! traits and never sees a concrete backend. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use htsp_sync_core::{Channel, OriginalNetworkId};
//! use htsp_sync_store::{ChannelStore, SqliteStore};
//!
//! async fn example() -> htsp_sync_store::Result<()> {
//!     let store = SqliteStore::open("epg.db")?;
//!
//!     let row = store.insert_channel(&Channel::new(1001, 5, "BBC One")).await?;
//!     assert_eq!(store.lookup(OriginalNetworkId(1001)).await?, Some(row));
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Row identity**: channels get a locally assigned [`RowId`](htsp_sync_core::RowId);
//!   the upstream id is a unique column, not the key
//! - **Program key**: `(channel row, start time)`, so a re-sent event replaces in place
//! - **Cascade**: deleting a channel deletes its programs

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, StoreOp};
pub use sqlite::SqliteStore;
pub use traits::{ChannelStore, ProgramStore, Store, StoreExt, StoredChannel};
