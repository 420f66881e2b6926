//! Error types for the engine.

use std::io;

use thiserror::Error;

use htsp_sync_core::CodecError;

use crate::connection::ConnectionState;

/// Errors raised by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Inbound or outbound frame could not be coded. Fatal on the read path.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// `send` called while the connection is not CONNECTED.
    #[error("not connected (state {0})")]
    NotConnected(ConnectionState),

    /// Operation not permitted in the current state.
    #[error("invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The connection was closed while the operation was in flight.
    #[error("connection closed")]
    Closed,

    /// The peer closed the socket.
    #[error("connection reset by peer")]
    PeerClosed,
}

impl ConnectionError {
    /// A copy suitable for broadcasting to several observers.
    ///
    /// `io::Error` is not `Clone`; its kind and message are preserved.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Transport(e) => Self::Transport(io::Error::new(e.kind(), e.to_string())),
            Self::Decode(e) => Self::Decode(e.clone()),
            Self::NotConnected(s) => Self::NotConnected(*s),
            Self::InvalidState { operation, state } => Self::InvalidState {
                operation,
                state: *state,
            },
            Self::Closed => Self::Closed,
            Self::PeerClosed => Self::PeerClosed,
        }
    }
}

/// Errors raised by the [`Dispatcher`](crate::dispatcher::Dispatcher).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// A one-shot handler is already outstanding for this correlation id.
    #[error("handler already registered for seq {0}")]
    DuplicateCorrelation(u64),

    /// The dispatcher queue has shut down.
    #[error("dispatcher queue closed")]
    QueueClosed,
}

/// Errors that end a sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("store error: {0}")]
    Store(#[from] htsp_sync_store::StoreError),

    /// The server rejected a request.
    #[error("server rejected {method}: {message}")]
    Server { method: String, message: String },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
