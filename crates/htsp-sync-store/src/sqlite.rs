//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use htsp_sync_core::{Channel, ChannelNumber, OriginalNetworkId, Program, RowId};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_secs};
use crate::traits::{ChannelStore, ProgramStore, StoredChannel};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file, and any missing parent directories, then runs
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredChannel> {
    Ok(StoredChannel {
        row: RowId(row.get(0)?),
        channel: Channel {
            original_network_id: OriginalNetworkId(row.get(1)?),
            number: ChannelNumber::new(row.get(2)?, row.get(3)?),
            name: row.get(4)?,
            icon: row.get(5)?,
        },
    })
}

fn row_to_program(row: &rusqlite::Row<'_>) -> rusqlite::Result<Program> {
    Ok(Program {
        start: row.get(0)?,
        stop: row.get(1)?,
        event_id: row.get(2)?,
        channel: OriginalNetworkId(row.get(3)?),
        title: row.get(4)?,
        summary: row.get(5)?,
        description: row.get(6)?,
    })
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn lookup(&self, id: OriginalNetworkId) -> Result<Option<RowId>> {
        self.run(move |conn| {
            let row: Option<i64> = conn
                .query_row(
                    "SELECT row_id FROM channels WHERE original_network_id = ?1",
                    params![id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.map(RowId))
        })
        .await
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<RowId> {
        let channel = channel.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO channels (
                    original_network_id, number_major, number_minor,
                    display_name, icon, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    channel.original_network_id.get(),
                    channel.number.major,
                    channel.number.minor,
                    channel.name,
                    channel.icon,
                    now_secs(),
                ],
            )?;
            Ok(RowId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn update_channel(&self, row: RowId, channel: &Channel) -> Result<()> {
        let channel = channel.clone();

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE channels SET
                    original_network_id = ?2, number_major = ?3, number_minor = ?4,
                    display_name = ?5, icon = ?6, updated_at = ?7
                 WHERE row_id = ?1",
                params![
                    row.get(),
                    channel.original_network_id.get(),
                    channel.number.major,
                    channel.number.minor,
                    channel.name,
                    channel.icon,
                    now_secs(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(row.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn delete_channel(&self, row: RowId) -> Result<()> {
        self.run(move |conn| {
            let changed = conn.execute("DELETE FROM channels WHERE row_id = ?1", params![row.get()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(row.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn list_channels(&self) -> Result<Vec<StoredChannel>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT row_id, original_network_id, number_major, number_minor,
                        display_name, icon
                 FROM channels ORDER BY number_major, number_minor, row_id",
            )?;
            let channels = stmt
                .query_map([], row_to_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(channels)
        })
        .await
    }
}

#[async_trait]
impl ProgramStore for SqliteStore {
    async fn upsert_program(&self, channel: RowId, program: &Program) -> Result<()> {
        let program = program.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO programs (
                    channel_row, start_time, stop_time, event_id, channel_id,
                    title, summary, description
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (channel_row, start_time) DO UPDATE SET
                    stop_time = excluded.stop_time,
                    event_id = excluded.event_id,
                    channel_id = excluded.channel_id,
                    title = excluded.title,
                    summary = excluded.summary,
                    description = excluded.description",
                params![
                    channel.get(),
                    program.start,
                    program.stop,
                    program.event_id,
                    program.channel.get(),
                    program.title,
                    program.summary,
                    program.description,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::NotFound(channel.to_string())
                }
                other => StoreError::Database(other),
            })?;
            Ok(())
        })
        .await
    }

    async fn list_programs(&self, channel: RowId) -> Result<Vec<Program>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT start_time, stop_time, event_id, channel_id, title, summary, description
                 FROM programs WHERE channel_row = ?1 ORDER BY start_time",
            )?;
            let programs = stmt
                .query_map(params![channel.get()], row_to_program)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(programs)
        })
        .await
    }
}
