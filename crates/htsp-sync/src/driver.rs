//! The sync driver: session control surface for callers.
//!
//! A [`SyncDriver`] runs at most one [`SyncSession`] at a time. Each call to
//! [`SyncDriver::start`] builds a fresh dispatcher and connection, runs the
//! session to its end and resolves to a [`SyncOutcome`].
//!
//! Cancellation is best-effort. Writes the reconciler already committed stay
//! in the store.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::watch;

use htsp_sync_engine::{
    CancelToken, Connection, ConnectionListener, ConnectionState, Dispatcher, SyncError,
    SyncReport, SyncSession,
};
use htsp_sync_store::Store;

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::runtime::build_runtime;

/// Driver-level state.
///
/// Sessions may only start from `Idle`. `Cancelled` and `Complete` are
/// published on the way back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Syncing,
    Cancelling,
    Cancelled,
    Complete,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "IDLE",
            SyncState::Syncing => "SYNCING",
            SyncState::Cancelling => "CANCELLING",
            SyncState::Cancelled => "CANCELLED",
            SyncState::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Completion notification for one session.
#[derive(Debug)]
pub enum SyncOutcome {
    Complete(SyncReport),
    Cancelled,
    /// The session failed; carries the triggering cause.
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, SyncOutcome::Complete(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Complete(report) => Some(report),
            _ => None,
        }
    }

    fn terminal_state(&self) -> Option<SyncState> {
        match self {
            SyncOutcome::Complete(_) => Some(SyncState::Complete),
            SyncOutcome::Cancelled => Some(SyncState::Cancelled),
            SyncOutcome::Failed(_) => None,
        }
    }
}

impl From<std::result::Result<SyncReport, SyncError>> for SyncOutcome {
    fn from(result: std::result::Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => SyncOutcome::Complete(report),
            Err(SyncError::Cancelled) => SyncOutcome::Cancelled,
            Err(e) => SyncOutcome::Failed(e),
        }
    }
}

/// Connection listener that logs every transition.
#[derive(Debug, Clone)]
pub struct LoggingListener {
    address: String,
}

impl LoggingListener {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl ConnectionListener for LoggingListener {
    fn on_state_change(&self, new: ConnectionState, previous: ConnectionState) {
        match new {
            ConnectionState::Failed => tracing::warn!(
                address = %self.address,
                from = %previous,
                "connection failed"
            ),
            _ => tracing::info!(
                address = %self.address,
                from = %previous,
                to = %new,
                "connection state changed"
            ),
        }
    }
}

/// Runs sync sessions against one server and one store.
pub struct SyncDriver<S: Store + ?Sized> {
    config: DriverConfig,
    store: Arc<S>,
    handle: Handle,
    state: watch::Sender<SyncState>,
    /// Token of the running session. Guards the IDLE to SYNCING transition.
    control: Mutex<Option<CancelToken>>,
}

impl<S: Store + ?Sized> SyncDriver<S> {
    pub fn new(config: DriverConfig, store: Arc<S>, handle: Handle) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            config,
            store,
            handle,
            state,
            control: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Observe state changes, including the transient terminal states.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run one session to its end.
    ///
    /// Fails with [`DriverError::Busy`] unless the driver is idle. Every
    /// other failure is reported through [`SyncOutcome::Failed`].
    pub async fn start(&self) -> Result<SyncOutcome> {
        let cancel = {
            let mut control = lock(&self.control);
            if self.state() != SyncState::Idle || control.is_some() {
                return Err(DriverError::Busy);
            }
            let token = CancelToken::new();
            *control = Some(token.clone());
            self.state.send_replace(SyncState::Syncing);
            token
        };
        let _guard = ResetOnDrop { driver: self };

        tracing::info!(address = %self.config.address, "starting sync");

        let dispatcher = Dispatcher::new(&self.handle);
        let connection = Connection::new(
            self.config.connection.clone(),
            dispatcher,
            self.handle.clone(),
        );
        connection.add_listener(LoggingListener::new(self.config.address.clone()));

        let session = SyncSession::new(
            connection,
            Arc::clone(&self.store),
            self.config.sync.clone(),
            cancel,
        );
        let outcome = SyncOutcome::from(session.run(self.config.address.as_str()).await);

        match &outcome {
            SyncOutcome::Complete(report) => tracing::info!(
                inserted = report.reconcile.channels_inserted,
                updated = report.reconcile.channels_updated,
                deleted = report.reconcile.channels_deleted,
                programs = report.reconcile.programs_written,
                "sync complete"
            ),
            SyncOutcome::Cancelled => tracing::info!("sync cancelled"),
            SyncOutcome::Failed(e) => tracing::warn!(error = %e, "sync failed"),
        }

        if let Some(terminal) = outcome.terminal_state() {
            self.state.send_replace(terminal);
        }
        Ok(outcome)
    }

    /// Request cancellation of the running session.
    ///
    /// Returns `false` if nothing was syncing.
    pub fn cancel(&self) -> bool {
        let control = lock(&self.control);
        match control.as_ref() {
            Some(token) if self.state() == SyncState::Syncing => {
                self.state.send_replace(SyncState::Cancelling);
                token.cancel();
                tracing::debug!("sync cancellation requested");
                true
            }
            _ => false,
        }
    }
}

impl<S: Store + ?Sized> fmt::Debug for SyncDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncDriver")
            .field("address", &self.config.address)
            .field("state", &self.state())
            .finish()
    }
}

/// Returns the driver to `Idle` when a session ends, including when the
/// `start` future is dropped.
struct ResetOnDrop<'a, S: Store + ?Sized> {
    driver: &'a SyncDriver<S>,
}

impl<S: Store + ?Sized> Drop for ResetOnDrop<'_, S> {
    fn drop(&mut self) {
        let mut control = lock(&self.driver.control);
        if let Some(token) = control.take() {
            token.cancel();
        }
        self.driver.state.send_replace(SyncState::Idle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build a runtime from `config.runtime` and run one session on it.
pub fn sync_blocking<S: Store + ?Sized>(config: DriverConfig, store: Arc<S>) -> Result<SyncOutcome> {
    let runtime = build_runtime(&config.runtime)?;
    let driver = SyncDriver::new(config, store, runtime.handle().clone());
    runtime.block_on(driver.start())
}
