//! A single framed TCP connection to an HTSP server.
//!
//! The connection owns three tasks on the injected runtime:
//!
//! - the **receive loop**, sole reader of the socket, which decodes frames
//!   and hands them to the [`Dispatcher`] in arrival order
//! - the **writer**, which drains a queue of pre-encoded frames so
//!   concurrent senders never interleave bytes
//! - the **notifier**, which delivers state transitions to listeners off
//!   the read path
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> CLOSED
//!                     |             |
//!                     +--> FAILED <-+--> CLOSED
//! ```
//!
//! There is no reconnect. A decode or socket error on the receive loop is
//! fatal to the connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use htsp_sync_core::{FieldCodec, HtsmsgCodec, Message};

use crate::dispatcher::Dispatcher;
use crate::error::ConnectionError;
use crate::frame::{write_frame, FrameReader, DEFAULT_MAX_MESSAGE_LEN};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether no further transition except to CLOSED is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Connection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest inbound frame body accepted.
    pub max_message_len: usize,
    /// Set `TCP_NODELAY` on the socket.
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            nodelay: true,
        }
    }
}

/// Observer of connection state transitions.
///
/// Called on the notifier task with `(new, previous)`.
pub trait ConnectionListener: Send + Sync + 'static {
    fn on_state_change(&self, new: ConnectionState, previous: ConnectionState);
}

impl<F> ConnectionListener for F
where
    F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
{
    fn on_state_change(&self, new: ConnectionState, previous: ConnectionState) {
        self(new, previous)
    }
}

type Listeners = Arc<Mutex<Vec<Arc<dyn ConnectionListener>>>>;

/// State shared with the connection's tasks.
struct Shared {
    state: watch::Sender<ConnectionState>,
    transitions: mpsc::UnboundedSender<(ConnectionState, ConnectionState)>,
    failure: Mutex<Option<ConnectionError>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Move to `to` if the current state satisfies `allowed`.
    ///
    /// Returns the previous state, or the current one if refused.
    fn transition(
        &self,
        allowed: impl Fn(ConnectionState) -> bool,
        to: ConnectionState,
    ) -> Result<ConnectionState, ConnectionState> {
        let mut outcome = Err(to);
        self.state.send_if_modified(|state| {
            if !allowed(*state) {
                outcome = Err(*state);
                return false;
            }
            let previous = std::mem::replace(state, to);
            // Queued under the watch lock so listeners see transitions in order.
            let _ = self.transitions.send((to, previous));
            outcome = Ok(previous);
            true
        });
        outcome
    }

    fn fail(&self, error: ConnectionError) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                *failure = Some(error.duplicate());
            }
        }

        let live = |s: ConnectionState| matches!(s, ConnectionState::Connecting | ConnectionState::Connected);
        if self.transition(live, ConnectionState::Failed).is_ok() {
            tracing::error!(%error, "connection failed");
            self.shutdown.send_replace(true);
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    codec: Arc<dyn FieldCodec>,
    dispatcher: Dispatcher,
    handle: Handle,
    shared: Arc<Shared>,
    listeners: Listeners,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
    next_seq: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

/// A connection to an HTSP server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a DISCONNECTED connection using the HTSMSG codec.
    pub fn new(config: ConnectionConfig, dispatcher: Dispatcher, handle: Handle) -> Self {
        Self::with_codec(config, Arc::new(HtsmsgCodec), dispatcher, handle)
    }

    /// Create a DISCONNECTED connection with a custom body codec.
    pub fn with_codec(
        config: ConnectionConfig,
        codec: Arc<dyn FieldCodec>,
        dispatcher: Dispatcher,
        handle: Handle,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let (transitions, transitions_rx) = mpsc::unbounded_channel();
        let listeners: Listeners = Arc::default();

        handle.spawn(notify_loop(transitions_rx, Arc::clone(&listeners)));

        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                dispatcher,
                handle,
                shared: Arc::new(Shared {
                    state,
                    transitions,
                    failure: Mutex::new(None),
                    shutdown,
                }),
                listeners,
                writer: Mutex::new(None),
                tasks: tokio::sync::Mutex::new(Vec::new()),
                closing: AtomicBool::new(false),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Connect to `addr` and start the receive loop and writer.
    pub async fn open<A: ToSocketAddrs>(&self, addr: A) -> Result<(), ConnectionError> {
        let mut tasks = self.inner.tasks.lock().await;
        let shared = &self.inner.shared;

        shared
            .transition(
                |s| s == ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .map_err(|state| ConnectionError::InvalidState {
                operation: "open",
                state,
            })?;

        let mut shutdown = shared.shutdown.subscribe();
        let connected = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => return Err(ConnectionError::Closed),
            connected = TcpStream::connect(addr) => connected,
        };

        let stream = match connected.and_then(|s| s.set_nodelay(self.inner.config.nodelay).map(|_| s)) {
            Ok(stream) => stream,
            Err(e) => {
                let error = ConnectionError::Transport(e);
                let reported = error.duplicate();
                shared.fail(error);
                return Err(reported);
            }
        };

        if let Ok(peer) = stream.peer_addr() {
            tracing::info!(%peer, "connected");
        }

        let (read_half, write_half) = stream.into_split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        *lock(&self.inner.writer) = Some(frames_tx);

        if let Err(state) = shared.transition(
            |s| s == ConnectionState::Connecting,
            ConnectionState::Connected,
        ) {
            lock(&self.inner.writer).take();
            return Err(ConnectionError::InvalidState {
                operation: "open",
                state,
            });
        }

        let reader = FrameReader::new(
            read_half,
            Arc::clone(&self.inner.codec),
            self.inner.config.max_message_len,
        );
        tasks.push(self.inner.handle.spawn(receive_loop(
            reader,
            self.inner.dispatcher.clone(),
            Arc::clone(shared),
        )));
        tasks.push(
            self.inner
                .handle
                .spawn(write_loop(write_half, frames_rx, Arc::clone(shared))),
        );

        Ok(())
    }

    /// Encode `message` on the calling task and queue it for the writer.
    pub fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected(state));
        }

        let frame = self.inner.codec.encode_frame(message.fields())?;
        tracing::trace!(%message, len = frame.len(), "queueing frame");

        match lock(&self.inner.writer).as_ref() {
            Some(writer) => writer.send(frame).map_err(|_| ConnectionError::Closed),
            None => Err(ConnectionError::NotConnected(state)),
        }
    }

    /// Stop the tasks, drop the socket and move to CLOSED.
    ///
    /// Runs once; later calls return immediately. Safe to call while
    /// `open` is in progress.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = &self.inner.shared;
        shared.shutdown.send_replace(true);

        let mut tasks = self.inner.tasks.lock().await;
        lock(&self.inner.writer).take();
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("connection task panicked");
                }
            }
        }

        if let Ok(previous) = shared.transition(|s| s != ConnectionState::Closed, ConnectionState::Closed) {
            tracing::debug!(%previous, "connection closed");
        }
    }

    /// Register a state listener.
    pub fn add_listener(&self, listener: impl ConnectionListener) {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// The error that moved the connection to FAILED, if any.
    pub fn failure(&self) -> Option<ConnectionError> {
        lock(&self.inner.shared.failure)
            .as_ref()
            .map(ConnectionError::duplicate)
    }

    /// Allocate the next request correlation id.
    pub fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn receive_loop(
    mut frames: FrameReader<OwnedReadHalf>,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
) {
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            next = frames.next() => next,
        };

        match next {
            Ok(Some(message)) => {
                tracing::trace!(%message, "received");
                if dispatcher.dispatch(message).is_err() {
                    shared.fail(ConnectionError::Closed);
                    break;
                }
            }
            Ok(None) => {
                shared.fail(ConnectionError::PeerClosed);
                break;
            }
            Err(e) => {
                shared.fail(e);
                break;
            }
        }
    }

    tracing::debug!("receive loop stopped");
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
) {
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = write_frame(&mut socket, &frame).await {
            shared.fail(e.into());
            break;
        }
    }

    let _ = socket.shutdown().await;
    tracing::debug!("writer stopped");
}

async fn notify_loop(
    mut transitions: mpsc::UnboundedReceiver<(ConnectionState, ConnectionState)>,
    listeners: Listeners,
) {
    while let Some((new, previous)) = transitions.recv().await {
        let snapshot: Vec<_> = lock(&listeners).clone();
        for listener in snapshot {
            listener.on_state_change(new, previous);
        }
    }
}
