//! Reconciliation: apply one session's accumulated channels and programs
//! to the store as a full diff.
//!
//! Channels present both upstream and locally are updated in place, new
//! ones inserted and local ones missing upstream deleted. Programs are
//! upserted against the resolved channel row. Cancellation is checked
//! before every write; writes already made are kept.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use htsp_sync_core::{ChannelList, OriginalNetworkId, ProgramList, RowId};
use htsp_sync_store::{Store, StoreExt};

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};

/// Counts of the writes a reconciliation pass made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub channels_inserted: usize,
    pub channels_updated: usize,
    pub channels_deleted: usize,
    pub programs_written: usize,
    /// Programs whose channel the store does not know.
    pub programs_skipped: usize,
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reconcile `channels` and `programs` against `store`.
pub async fn reconcile<S>(
    store: &S,
    mut channels: ChannelList,
    programs: &ProgramList,
    cancel: &CancelToken,
) -> Result<ReconcileReport>
where
    S: Store + ?Sized,
{
    let mut report = ReconcileReport::default();

    channels.sort_by_number();
    let mut existing = store.channel_map().await?;
    let mut resolved: HashMap<OriginalNetworkId, RowId> = HashMap::with_capacity(channels.len());

    for channel in &channels {
        checkpoint(cancel)?;

        let id = channel.original_network_id;
        let row = match existing.remove(&id) {
            Some(row) => {
                store.update_channel(row, channel).await?;
                report.channels_updated += 1;
                row
            }
            // A repeated id upstream updates the row inserted for its first occurrence.
            None => match resolved.get(&id) {
                Some(&row) => {
                    store.update_channel(row, channel).await?;
                    report.channels_updated += 1;
                    row
                }
                None => {
                    let row = store.insert_channel(channel).await?;
                    report.channels_inserted += 1;
                    row
                }
            },
        };
        resolved.insert(id, row);
    }

    let mut stale: Vec<_> = existing.into_iter().collect();
    stale.sort_by_key(|(_, row)| *row);
    for (id, row) in stale {
        checkpoint(cancel)?;

        tracing::debug!(%id, %row, "deleting channel no longer upstream");
        store.delete_channel(row).await?;
        report.channels_deleted += 1;
    }

    for program in programs {
        checkpoint(cancel)?;

        let row = match resolved.get(&program.channel) {
            Some(&row) => Some(row),
            None => store.lookup(program.channel).await?,
        };

        match row {
            Some(row) => {
                store.upsert_program(row, program).await?;
                report.programs_written += 1;
            }
            None => {
                tracing::debug!(
                    channel = %program.channel,
                    event_id = program.event_id,
                    "skipping program for unknown channel"
                );
                report.programs_skipped += 1;
            }
        }
    }

    tracing::info!(
        inserted = report.channels_inserted,
        updated = report.channels_updated,
        deleted = report.channels_deleted,
        programs = report.programs_written,
        skipped = report.programs_skipped,
        "reconciliation complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use htsp_sync_core::{Channel, Program};
    use htsp_sync_store::{
        ChannelStore, MemoryStore, ProgramStore, Result as StoreResult, StoreOp, StoredChannel,
    };

    fn program(channel: u32, start: i64) -> Program {
        Program {
            event_id: start as u32,
            channel: OriginalNetworkId(channel),
            start,
            stop: start + 60,
            title: format!("show {}", start),
            summary: None,
            description: None,
        }
    }

    fn list(channels: &[Channel]) -> ChannelList {
        channels.iter().cloned().collect()
    }

    /// Wraps a store and requests cancellation once `limit` writes landed.
    struct CancelAfter {
        store: MemoryStore,
        cancel: CancelToken,
        limit: usize,
        writes: AtomicUsize,
    }

    impl CancelAfter {
        fn wrote(&self) {
            if self.writes.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.cancel.cancel();
            }
        }
    }

    #[async_trait]
    impl ChannelStore for CancelAfter {
        async fn lookup(&self, id: OriginalNetworkId) -> StoreResult<Option<RowId>> {
            self.store.lookup(id).await
        }

        async fn insert_channel(&self, channel: &Channel) -> StoreResult<RowId> {
            let row = self.store.insert_channel(channel).await?;
            self.wrote();
            Ok(row)
        }

        async fn update_channel(&self, row: RowId, channel: &Channel) -> StoreResult<()> {
            self.store.update_channel(row, channel).await?;
            self.wrote();
            Ok(())
        }

        async fn delete_channel(&self, row: RowId) -> StoreResult<()> {
            self.store.delete_channel(row).await?;
            self.wrote();
            Ok(())
        }

        async fn list_channels(&self) -> StoreResult<Vec<StoredChannel>> {
            self.store.list_channels().await
        }
    }

    #[async_trait]
    impl ProgramStore for CancelAfter {
        async fn upsert_program(&self, channel: RowId, program: &Program) -> StoreResult<()> {
            self.store.upsert_program(channel, program).await?;
            self.wrote();
            Ok(())
        }

        async fn list_programs(&self, channel: RowId) -> StoreResult<Vec<Program>> {
            self.store.list_programs(channel).await
        }
    }

    #[tokio::test]
    async fn test_diff_update_insert_delete() {
        let store = MemoryStore::with_channels([Channel::new(1, 1, "x"), Channel::new(2, 2, "y")]);
        let incoming = list(&[Channel::new(2, 2, "y2"), Channel::new(3, 3, "z")]);

        let report = reconcile(&store, incoming, &ProgramList::new(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.channels_updated, 1);
        assert_eq!(report.channels_inserted, 1);
        assert_eq!(report.channels_deleted, 1);
        assert_eq!(
            store.journal().unwrap(),
            vec![
                StoreOp::UpdateChannel(RowId(2), OriginalNetworkId(2)),
                StoreOp::InsertChannel(RowId(3), OriginalNetworkId(3)),
                StoreOp::DeleteChannel(RowId(1)),
            ]
        );
        assert_eq!(store.channel(RowId(2)).unwrap().unwrap().name, "y2");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = MemoryStore::new();
        let incoming = list(&[Channel::new(10, 1, "a"), Channel::new(11, 2, "b")]);
        let cancel = CancelToken::new();

        reconcile(&store, incoming.clone(), &ProgramList::new(), &cancel)
            .await
            .unwrap();
        store.clear_journal().unwrap();

        let report = reconcile(&store, incoming, &ProgramList::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(report.channels_inserted, 0);
        assert_eq!(report.channels_deleted, 0);
        assert!(store
            .journal()
            .unwrap()
            .iter()
            .all(|op| matches!(op, StoreOp::UpdateChannel(..))));
    }

    #[tokio::test]
    async fn test_channels_written_in_number_order() {
        let store = MemoryStore::new();
        let incoming = list(&[
            Channel::new(30, 30, "c"),
            Channel::new(10, 10, "a"),
            Channel::new(20, 20, "b"),
        ]);

        reconcile(&store, incoming, &ProgramList::new(), &CancelToken::new())
            .await
            .unwrap();

        let order: Vec<_> = store
            .journal()
            .unwrap()
            .into_iter()
            .map(|op| match op {
                StoreOp::InsertChannel(_, id) => id.get(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_programs_resolved_and_skipped() {
        let store = MemoryStore::new();
        let channels = list(&[Channel::new(1, 1, "one")]);
        let programs: ProgramList = vec![program(1, 100), program(99, 200), program(1, 300)]
            .into_iter()
            .collect();

        let report = reconcile(&store, channels, &programs, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.programs_written, 2);
        assert_eq!(report.programs_skipped, 1);
        assert_eq!(store.list_programs(RowId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_after_n_writes() {
        let cancel = CancelToken::new();
        let store = CancelAfter {
            store: MemoryStore::new(),
            cancel: cancel.clone(),
            limit: 2,
            writes: AtomicUsize::new(0),
        };
        let incoming = list(&[
            Channel::new(1, 1, "a"),
            Channel::new(2, 2, "b"),
            Channel::new(3, 3, "c"),
            Channel::new(4, 4, "d"),
        ]);

        let result = reconcile(&store, incoming, &ProgramList::new(), &cancel).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(store.store.journal().unwrap().len(), 2);
        assert_eq!(store.store.channel_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let store = MemoryStore::with_channels([Channel::new(1, 1, "x")]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = reconcile(&store, list(&[Channel::new(2, 2, "y")]), &ProgramList::new(), &cancel).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(store.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_upstream_id_updates_first_row() {
        let store = MemoryStore::new();
        let incoming = list(&[Channel::new(5, 1, "first"), Channel::new(5, 2, "second")]);

        let report = reconcile(&store, incoming, &ProgramList::new(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.channels_inserted, 1);
        assert_eq!(report.channels_updated, 1);
        assert_eq!(store.channel_count().unwrap(), 1);
        assert_eq!(store.channel(RowId(1)).unwrap().unwrap().name, "second");
    }
}
