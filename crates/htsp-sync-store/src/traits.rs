//! Store traits: the narrow interface the sync engine writes through.
//!
//! The engine needs exactly four channel operations plus an enumeration,
//! and one program upsert. Everything else about persistence is the
//! implementation's business.

use std::collections::HashMap;

use async_trait::async_trait;
use htsp_sync_core::{Channel, OriginalNetworkId, Program, RowId};

use crate::error::Result;

/// A channel as persisted, with its local row identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChannel {
    pub row: RowId,
    pub channel: Channel,
}

/// Channel persistence.
///
/// The store is assumed to be externally synchronized: during a
/// reconciliation pass the engine is the only writer.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Find the row holding the channel with this upstream id.
    async fn lookup(&self, id: OriginalNetworkId) -> Result<Option<RowId>>;

    /// Insert a new channel, returning its row identity.
    async fn insert_channel(&self, channel: &Channel) -> Result<RowId>;

    /// Overwrite the channel stored at `row`.
    ///
    /// Returns `NotFound` if the row does not exist.
    async fn update_channel(&self, row: RowId, channel: &Channel) -> Result<()>;

    /// Delete the channel stored at `row` along with its programs.
    ///
    /// Returns `NotFound` if the row does not exist.
    async fn delete_channel(&self, row: RowId) -> Result<()>;

    /// Enumerate every stored channel.
    async fn list_channels(&self) -> Result<Vec<StoredChannel>>;
}

/// Program persistence.
#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Insert or replace the program keyed by `(channel, program.start)`.
    async fn upsert_program(&self, channel: RowId, program: &Program) -> Result<()>;

    /// Programs stored for a channel, ordered by start time.
    async fn list_programs(&self, channel: RowId) -> Result<Vec<Program>>;
}

/// A backend providing both channel and program persistence.
pub trait Store: ChannelStore + ProgramStore {}

impl<S: ChannelStore + ProgramStore + ?Sized> Store for S {}

/// Extension trait for common store patterns.
pub trait StoreExt: ChannelStore {
    /// Map every stored channel's upstream id to its row.
    fn channel_map(
        &self,
    ) -> impl std::future::Future<Output = Result<HashMap<OriginalNetworkId, RowId>>> + Send;
}

impl<S: ChannelStore + ?Sized> StoreExt for S {
    async fn channel_map(&self) -> Result<HashMap<OriginalNetworkId, RowId>> {
        let stored = self.list_channels().await?;
        Ok(stored
            .into_iter()
            .map(|s| (s.channel.original_network_id, s.row))
            .collect())
    }
}
