//! Sync protocol state machine.
//!
//! One [`SyncSession`] drives one connection through the handshake, collects
//! the initial metadata dump and reconciles it against the store:
//!
//! ```text
//! INIT --hello--> HELLO_SENT --reply--> METADATA_ENABLING
//!      --enableAsyncMetadata reply--> STREAMING (channelAdd / eventAdd)
//!      --initialSyncCompleted--> RECONCILING --> DONE
//! ```
//!
//! Any phase may end in CANCELLED (cancel token) or FAILED (connection,
//! server or store error). Handshake and accumulation run on the dispatcher
//! queue; the caller's task only waits for a single completion signal and
//! then reconciles.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::net::ToSocketAddrs;
use tokio::sync::{oneshot, watch};

use htsp_sync_core::{Channel, ChannelList, Message, MessageKind, Program, ProgramList};
use htsp_sync_store::Store;

use crate::cancel::CancelToken;
use crate::connection::{Connection, ConnectionState};
use crate::error::{ConnectionError, DispatchError, Result, SyncError};
use crate::messages::{check_reply, EnableAsyncMetadata, HelloReply, HelloRequest};
use crate::reconcile::{reconcile, ReconcileReport};

/// Default EPG window requested from the server.
pub const DEFAULT_EPG_WINDOW_SECS: i64 = 60;

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sent as `clientname` in `hello`.
    pub client_name: String,
    /// Sent as `clientversion` in `hello`.
    pub client_version: String,
    pub username: Option<String>,
    /// `epgMaxTime` is set this many seconds past the current time.
    pub epg_window_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_name: "htsp-sync".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            username: None,
            epg_window_secs: DEFAULT_EPG_WINDOW_SECS,
        }
    }
}

/// Phase of a [`SyncSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Init,
    HelloSent,
    MetadataEnabling,
    Streaming,
    Reconciling,
    Done,
    Cancelled,
    Failed,
}

impl SessionPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::HelloSent => "HELLO_SENT",
            Self::MetadataEnabling => "METADATA_ENABLING",
            Self::Streaming => "STREAMING",
            Self::Reconciling => "RECONCILING",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Result of a completed sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Server identity from the `hello` reply.
    pub server: HelloReply,
    /// `channelAdd` pushes accumulated.
    pub channels_received: usize,
    /// `eventAdd` pushes accumulated.
    pub programs_received: usize,
    /// Pushes that could not be projected and were skipped.
    pub pushes_rejected: usize,
    /// Writes made against the store.
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Default)]
struct Buffers {
    channels: ChannelList,
    programs: ProgramList,
    rejected: usize,
}

enum Completion {
    Synced(Buffers),
    Failed(SyncError),
}

/// State shared between the session and its dispatcher handlers.
struct Core {
    connection: Connection,
    config: SyncConfig,
    phase: watch::Sender<SessionPhase>,
    buffers: Mutex<Buffers>,
    server: Mutex<HelloReply>,
    completion: Mutex<Option<oneshot::Sender<Completion>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Core {
    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(%previous, %phase, "session phase");
        }
    }

    /// Wake the waiting caller. Only the first completion is delivered.
    fn complete(&self, completion: Completion) {
        if let Some(tx) = lock(&self.completion).take() {
            let _ = tx.send(completion);
        }
    }

    fn fail(&self, error: SyncError) {
        tracing::warn!(%error, "sync session failed");
        self.complete(Completion::Failed(error));
    }

    /// Send `message` with a one-shot handler for the reply correlated by `seq`.
    fn request(self: &Arc<Self>, seq: u64, message: Message, on_reply: Handler) -> Result<()> {
        let dispatcher = self.connection.dispatcher();

        let core = Arc::downgrade(self);
        dispatcher.register_once(seq, move |reply| {
            if let Some(core) = core.upgrade() {
                on_reply(&core, reply);
            }
        })?;

        if let Err(e) = self.connection.send(&message) {
            dispatcher.cancel_once(seq);
            return Err(e.into());
        }
        Ok(())
    }

    fn send_hello(self: &Arc<Self>) -> Result<()> {
        let seq = self.connection.next_seq();
        let hello = HelloRequest {
            client_name: self.config.client_name.clone(),
            client_version: self.config.client_version.clone(),
            username: self.config.username.clone(),
        }
        .into_message(seq);

        self.set_phase(SessionPhase::HelloSent);
        self.request(seq, hello, Core::on_hello_reply)
    }

    fn on_hello_reply(self: &Arc<Self>, reply: Message) {
        if let Err(e) = check_reply(&MessageKind::Hello, &reply) {
            return self.fail(e);
        }

        let server = HelloReply::from_message(&reply);
        tracing::info!(
            server = server.server_name.as_deref().unwrap_or("unknown"),
            version = server.server_version.as_deref().unwrap_or("unknown"),
            htsp = ?server.htsp_version,
            "hello accepted"
        );
        *lock(&self.server) = server;

        if let Err(e) = self.enable_metadata() {
            self.fail(e);
        }
    }

    fn enable_metadata(self: &Arc<Self>) -> Result<()> {
        let seq = self.connection.next_seq();
        let request =
            EnableAsyncMetadata::window(unix_now(), self.config.epg_window_secs).into_message(seq);

        self.set_phase(SessionPhase::MetadataEnabling);
        self.request(seq, request, Core::on_metadata_reply)
    }

    fn on_metadata_reply(self: &Arc<Self>, reply: Message) {
        if let Err(e) = check_reply(&MessageKind::EnableAsyncMetadata, &reply) {
            return self.fail(e);
        }
        tracing::debug!("async metadata enabled");
        self.set_phase(SessionPhase::Streaming);
    }

    fn on_channel_add(self: &Arc<Self>, push: Message) {
        match Channel::from_message(&push) {
            Ok(channel) => {
                tracing::trace!(id = %channel.original_network_id, name = %channel.name, "channel");
                lock(&self.buffers).channels.push(channel);
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed channelAdd");
                lock(&self.buffers).rejected += 1;
            }
        }
    }

    fn on_event_add(self: &Arc<Self>, push: Message) {
        match Program::from_message(&push) {
            Ok(program) => lock(&self.buffers).programs.push(program),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed eventAdd");
                lock(&self.buffers).rejected += 1;
            }
        }
    }

    fn on_initial_sync_completed(self: &Arc<Self>, _push: Message) {
        let buffers = mem::take(&mut *lock(&self.buffers));
        tracing::info!(
            channels = buffers.channels.len(),
            programs = buffers.programs.len(),
            "initial sync completed"
        );
        self.complete(Completion::Synced(buffers));
    }
}

/// Message handler bound to the session core.
type Handler = fn(&Arc<Core>, Message);

/// Route a push kind to a handler holding only a weak reference to the core.
fn subscribe(core: &Arc<Core>, kind: MessageKind, handler: Handler) {
    let weak: Weak<Core> = Arc::downgrade(core);
    core.connection.dispatcher().register_type(kind, move |message| {
        if let Some(core) = weak.upgrade() {
            handler(&core, message);
        }
    });
}

const PUSH_KINDS: [MessageKind; 3] = [
    MessageKind::ChannelAdd,
    MessageKind::EventAdd,
    MessageKind::InitialSyncCompleted,
];

/// A single sync session over one connection.
pub struct SyncSession<S: Store + ?Sized> {
    connection: Connection,
    store: Arc<S>,
    config: SyncConfig,
    cancel: CancelToken,
    phase: watch::Sender<SessionPhase>,
}

impl<S: Store + ?Sized> SyncSession<S> {
    /// Create a session. `connection` must not have been opened yet.
    pub fn new(connection: Connection, store: Arc<S>, config: SyncConfig, cancel: CancelToken) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Init);
        Self {
            connection,
            store,
            config,
            cancel,
            phase,
        }
    }

    /// Observe phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run the session to its end against the server at `addr`.
    ///
    /// The connection is always closed before this returns.
    pub async fn run<A: ToSocketAddrs>(self, addr: A) -> Result<SyncReport> {
        let connection = self.connection.clone();
        let phase = self.phase.clone();

        let result = self.execute(addr).await;
        connection.close().await;

        let end = match &result {
            Ok(_) => SessionPhase::Done,
            Err(SyncError::Cancelled) => SessionPhase::Cancelled,
            Err(_) => SessionPhase::Failed,
        };
        phase.send_replace(end);
        tracing::info!(phase = %end, "sync session finished");

        result
    }

    async fn execute<A: ToSocketAddrs>(self, addr: A) -> Result<SyncReport> {
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            opened = self.connection.open(addr) => opened?,
        }

        let (tx, rx) = oneshot::channel();
        let core = Arc::new(Core {
            connection: self.connection.clone(),
            config: self.config.clone(),
            phase: self.phase.clone(),
            buffers: Mutex::new(Buffers::default()),
            server: Mutex::new(HelloReply::default()),
            completion: Mutex::new(Some(tx)),
        });

        subscribe(&core, MessageKind::ChannelAdd, Core::on_channel_add);
        subscribe(&core, MessageKind::EventAdd, Core::on_event_add);
        subscribe(&core, MessageKind::InitialSyncCompleted, Core::on_initial_sync_completed);

        let waited = self.await_dump(&core, rx).await;

        let dispatcher = self.connection.dispatcher();
        for kind in &PUSH_KINDS {
            dispatcher.unregister_type(kind);
        }
        let buffers = waited?;

        let mut report = SyncReport {
            server: lock(&core.server).clone(),
            channels_received: buffers.channels.len(),
            programs_received: buffers.programs.len(),
            pushes_rejected: buffers.rejected,
            reconcile: ReconcileReport::default(),
        };

        core.set_phase(SessionPhase::Reconciling);
        report.reconcile = reconcile(
            &*self.store,
            buffers.channels,
            &buffers.programs,
            &self.cancel,
        )
        .await?;

        Ok(report)
    }

    /// Send `hello` and wait for exactly one of: the initial dump completing,
    /// cancellation, or the connection going down.
    async fn await_dump(
        &self,
        core: &Arc<Core>,
        mut completion: oneshot::Receiver<Completion>,
    ) -> Result<Buffers> {
        core.send_hello()?;

        let lost = wait_until_down(self.connection.subscribe_state());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            done = &mut completion => return finish(done),
            _ = lost => (),
        };

        // Frames read before the socket went down are still queued on the
        // dispatcher and take precedence over the loss.
        self.connection.dispatcher().flush().await?;
        match completion.try_recv() {
            Ok(done) => finish(Ok(done)),
            Err(_) => Err(self
                .connection
                .failure()
                .unwrap_or(ConnectionError::Closed)
                .into()),
        }
    }
}

fn finish(done: std::result::Result<Completion, oneshot::error::RecvError>) -> Result<Buffers> {
    match done {
        Ok(Completion::Synced(buffers)) => Ok(buffers),
        Ok(Completion::Failed(e)) => Err(e),
        Err(_) => Err(DispatchError::QueueClosed.into()),
    }
}

async fn wait_until_down(mut state: watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| s.is_terminal()).await;
}
