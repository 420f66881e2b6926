//! # HTSP Sync Engine
//!
//! Connection, message dispatch and the EPG sync protocol for an HTSP
//! (Tvheadend) client.
//!
//! ## Overview
//!
//! A [`Connection`] owns one framed TCP socket and feeds every decoded
//! message to a [`Dispatcher`], which routes replies by correlation id and
//! pushes by [`MessageKind`](htsp_sync_core::MessageKind). A [`SyncSession`]
//! drives the handshake, accumulates the initial metadata dump and
//! reconciles it against a [`Store`](htsp_sync_store::Store).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::runtime::Handle;
//!
//! use htsp_sync_engine::{
//!     CancelToken, Connection, ConnectionConfig, Dispatcher, SyncConfig, SyncSession,
//! };
//! use htsp_sync_store::MemoryStore;
//!
//! async fn example() -> htsp_sync_engine::Result<()> {
//!     let handle = Handle::current();
//!     let dispatcher = Dispatcher::new(&handle);
//!     let connection = Connection::new(ConnectionConfig::default(), dispatcher, handle);
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let session = SyncSession::new(connection, store, SyncConfig::default(), CancelToken::new());
//!
//!     let report = session.run("tvheadend.local:9982").await?;
//!     println!("{} channels inserted", report.reconcile.channels_inserted);
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                                   Server
//!   |-------- hello ------------------------>|
//!   |<------- hello reply -------------------|
//!   |-------- enableAsyncMetadata ---------->|
//!   |<------- enableAsyncMetadata reply -----|
//!   |<------- channelAdd * ------------------|
//!   |<------- eventAdd * --------------------|
//!   |<------- initialSyncCompleted ----------|
//! ```

pub mod cancel;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod messages;
pub mod protocol;
pub mod reconcile;

pub use cancel::CancelToken;
pub use connection::{Connection, ConnectionConfig, ConnectionListener, ConnectionState};
pub use dispatcher::{Dispatcher, OnceHandler, TypeHandler};
pub use error::{ConnectionError, DispatchError, Result, SyncError};
pub use messages::{check_reply, EnableAsyncMetadata, HelloReply, HelloRequest, HTSP_VERSION};
pub use protocol::{SessionPhase, SyncConfig, SyncReport, SyncSession, DEFAULT_EPG_WINDOW_SECS};
pub use reconcile::{reconcile, ReconcileReport};
