//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory, and additionally records a journal of every
//! write so tests can assert exactly which operations a sync performed.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use htsp_sync_core::{Channel, OriginalNetworkId, Program, RowId};

use crate::error::{Result, StoreError};
use crate::traits::{ChannelStore, ProgramStore, StoredChannel};

/// A write performed against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    InsertChannel(RowId, OriginalNetworkId),
    UpdateChannel(RowId, OriginalNetworkId),
    DeleteChannel(RowId),
    UpsertProgram(RowId, i64),
}

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Last assigned row id.
    last_row: i64,

    /// Channels indexed by row.
    channels: BTreeMap<RowId, Channel>,

    /// Programs keyed by (channel row, start time).
    programs: BTreeMap<(RowId, i64), Program>,

    /// Every write, in order.
    journal: Vec<StoreOp>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Create a store pre-populated with channels, without journaling them.
    pub fn with_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut inner = MemoryStoreInner::default();
        for channel in channels {
            inner.last_row += 1;
            inner.channels.insert(RowId(inner.last_row), channel);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Snapshot of the write journal.
    pub fn journal(&self) -> Result<Vec<StoreOp>> {
        Ok(self.read()?.journal.clone())
    }

    /// Forget the journal, keeping the data.
    pub fn clear_journal(&self) -> Result<()> {
        self.write()?.journal.clear();
        Ok(())
    }

    /// Snapshot of the stored channel at `row`.
    pub fn channel(&self, row: RowId) -> Result<Option<Channel>> {
        Ok(self.read()?.channels.get(&row).cloned())
    }

    pub fn channel_count(&self) -> Result<usize> {
        Ok(self.read()?.channels.len())
    }

    pub fn program_count(&self) -> Result<usize> {
        Ok(self.read()?.programs.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn lookup(&self, id: OriginalNetworkId) -> Result<Option<RowId>> {
        let inner = self.read()?;
        Ok(inner
            .channels
            .iter()
            .find(|(_, c)| c.original_network_id == id)
            .map(|(row, _)| *row))
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<RowId> {
        let mut inner = self.write()?;

        if inner
            .channels
            .values()
            .any(|c| c.original_network_id == channel.original_network_id)
        {
            return Err(StoreError::InvalidData(format!(
                "channel {} already stored",
                channel.original_network_id
            )));
        }

        inner.last_row += 1;
        let row = RowId(inner.last_row);
        inner.channels.insert(row, channel.clone());
        inner
            .journal
            .push(StoreOp::InsertChannel(row, channel.original_network_id));

        Ok(row)
    }

    async fn update_channel(&self, row: RowId, channel: &Channel) -> Result<()> {
        let mut inner = self.write()?;

        match inner.channels.get_mut(&row) {
            Some(slot) => *slot = channel.clone(),
            None => return Err(StoreError::NotFound(row.to_string())),
        }
        inner
            .journal
            .push(StoreOp::UpdateChannel(row, channel.original_network_id));

        Ok(())
    }

    async fn delete_channel(&self, row: RowId) -> Result<()> {
        let mut inner = self.write()?;

        if inner.channels.remove(&row).is_none() {
            return Err(StoreError::NotFound(row.to_string()));
        }
        inner.programs.retain(|(r, _), _| *r != row);
        inner.journal.push(StoreOp::DeleteChannel(row));

        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<StoredChannel>> {
        let inner = self.read()?;
        Ok(inner
            .channels
            .iter()
            .map(|(row, channel)| StoredChannel {
                row: *row,
                channel: channel.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ProgramStore for MemoryStore {
    async fn upsert_program(&self, channel: RowId, program: &Program) -> Result<()> {
        let mut inner = self.write()?;

        if !inner.channels.contains_key(&channel) {
            return Err(StoreError::NotFound(channel.to_string()));
        }
        inner
            .programs
            .insert((channel, program.start), program.clone());
        inner
            .journal
            .push(StoreOp::UpsertProgram(channel, program.start));

        Ok(())
    }

    async fn list_programs(&self, channel: RowId) -> Result<Vec<Program>> {
        let inner = self.read()?;
        Ok(inner
            .programs
            .range((channel, i64::MIN)..=(channel, i64::MAX))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;

    fn program(channel: u32, start: i64, title: &str) -> Program {
        Program {
            event_id: start as u32,
            channel: OriginalNetworkId(channel),
            start,
            stop: start + 1800,
            title: title.into(),
            summary: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let channel = Channel::new(100, 1, "One");

        let row = store.insert_channel(&channel).await.unwrap();
        assert_eq!(store.lookup(OriginalNetworkId(100)).await.unwrap(), Some(row));
        assert_eq!(store.lookup(OriginalNetworkId(101)).await.unwrap(), None);

        let renamed = Channel::new(100, 1, "One HD");
        store.update_channel(row, &renamed).await.unwrap();
        assert_eq!(store.channel(row).unwrap(), Some(renamed));

        store.delete_channel(row).await.unwrap();
        assert_eq!(store.channel_count().unwrap(), 0);

        assert_eq!(
            store.journal().unwrap(),
            vec![
                StoreOp::InsertChannel(row, OriginalNetworkId(100)),
                StoreOp::UpdateChannel(row, OriginalNetworkId(100)),
                StoreOp::DeleteChannel(row),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_store_missing_rows() {
        let store = MemoryStore::new();
        let channel = Channel::new(1, 1, "x");

        assert!(matches!(
            store.update_channel(RowId(9), &channel).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_channel(RowId(9)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_program_upsert_replaces_by_start() {
        let store = MemoryStore::new();
        let row = store.insert_channel(&Channel::new(5, 5, "Five")).await.unwrap();

        store.upsert_program(row, &program(5, 1000, "a")).await.unwrap();
        store.upsert_program(row, &program(5, 1000, "b")).await.unwrap();
        store.upsert_program(row, &program(5, 500, "c")).await.unwrap();

        let titles: Vec<String> = store
            .list_programs(row)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_delete_cascades_programs() {
        let store = MemoryStore::new();
        let row = store.insert_channel(&Channel::new(5, 5, "Five")).await.unwrap();
        store.upsert_program(row, &program(5, 1000, "a")).await.unwrap();

        store.delete_channel(row).await.unwrap();
        assert_eq!(store.program_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_map() {
        let store = MemoryStore::with_channels([Channel::new(1, 1, "x"), Channel::new(2, 2, "y")]);
        let map = store.channel_map().await.unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map[&OriginalNetworkId(1)], RowId(1));
        assert_eq!(map[&OriginalNetworkId(2)], RowId(2));
        assert!(store.journal().unwrap().is_empty());
    }
}
