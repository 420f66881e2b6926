//! Database schema migrations for SQLite.
//!
//! Versioned: each migration transforms the schema from version N to N+1,
//! and the applied versions are recorded in `schema_migrations`.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: applies only the versions not yet recorded.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_secs()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: channels and their programs.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE channels (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_network_id INTEGER NOT NULL UNIQUE,  -- server channelId
            number_major INTEGER NOT NULL,
            number_minor INTEGER NOT NULL DEFAULT 0,
            display_name TEXT NOT NULL,
            icon TEXT,
            updated_at INTEGER NOT NULL                   -- unix seconds
        );

        CREATE TABLE programs (
            channel_row INTEGER NOT NULL REFERENCES channels(row_id) ON DELETE CASCADE,
            start_time INTEGER NOT NULL,
            stop_time INTEGER NOT NULL,
            event_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            description TEXT,
            PRIMARY KEY (channel_row, start_time)
        );

        CREATE INDEX idx_channels_number ON channels(number_major, number_minor);
        CREATE INDEX idx_programs_event ON programs(event_id);
        "#,
    )?;

    Ok(())
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
