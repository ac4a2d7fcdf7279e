//! Persisted sync cursor.
//!
//! Tracks the last remote log index this device has acknowledged, plus the
//! time of the last successful exchange. Survives restarts; the migration
//! seeds the single row.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

pub struct SyncCursor {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorState {
    pub cursor: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    cursor: i64,
    last_sync_at: Option<String>,
}

impl SyncCursor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<CursorState> {
        let row: CursorRow =
            sqlx::query_as("SELECT cursor, last_sync_at FROM sync_cursor WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        let last_sync_at = row
            .last_sync_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(CursorState {
            cursor: row.cursor,
            last_sync_at,
        })
    }

    pub async fn advance(&self, cursor: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sync_cursor SET cursor = ?, last_sync_at = ? WHERE id = 1")
            .bind(cursor)
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewind to zero so the next flush re-ingests the full remote log.
    /// Used after local-state corruption was detected on load.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("UPDATE sync_cursor SET cursor = 0 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
