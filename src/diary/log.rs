//! Persisted append-only mutation log.
//!
//! Rows are never rewritten except for the `sync_state` column. Each row
//! carries a checksum over its immutable fields so corruption is caught on
//! load instead of silently folding bad data into the diary.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DiaryMutation, SyncState};

pub struct MutationLog {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MutationRow {
    mutation_id: String,
    payload: String,
    client_timestamp: String,
    sync_state: String,
    checksum: String,
}

impl MutationLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, mutation: &DiaryMutation) -> Result<()> {
        let payload = serde_json::to_string(&mutation.kind)?;

        sqlx::query(
            r#"
            INSERT INTO diary_mutations
                (mutation_id, kind, payload, client_timestamp, sync_state, checksum)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mutation.mutation_id.to_string())
        .bind(mutation.kind.tag())
        .bind(&payload)
        .bind(mutation.client_timestamp.to_rfc3339())
        .bind(mutation.sync_state.to_string())
        .bind(mutation.checksum())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the full log in replay order.
    ///
    /// Rows that fail to parse or whose checksum no longer matches are
    /// skipped and counted; the caller decides how loudly to complain.
    pub async fn load_all(&self) -> Result<(Vec<DiaryMutation>, usize)> {
        let rows: Vec<MutationRow> = sqlx::query_as(
            "SELECT mutation_id, payload, client_timestamp, sync_state, checksum
             FROM diary_mutations ORDER BY client_timestamp, mutation_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut mutations = Vec::with_capacity(rows.len());
        let mut corrupt = 0;
        for row in rows {
            match hydrate_mutation(&row) {
                Some(mutation) if mutation.checksum() == row.checksum => mutations.push(mutation),
                _ => {
                    tracing::warn!(mutation_id = %row.mutation_id, "dropping corrupt log row");
                    corrupt += 1;
                }
            }
        }
        Ok((mutations, corrupt))
    }

    pub async fn set_sync_state(&self, id: Uuid, state: SyncState) -> Result<()> {
        sqlx::query("UPDATE diary_mutations SET sync_state = ? WHERE mutation_id = ?")
            .bind(state.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn hydrate_mutation(row: &MutationRow) -> Option<DiaryMutation> {
    let mutation_id = Uuid::parse_str(&row.mutation_id).ok()?;
    let kind = serde_json::from_str(&row.payload).ok()?;
    let client_timestamp = DateTime::parse_from_rfc3339(&row.client_timestamp)
        .ok()?
        .with_timezone(&Utc);
    let sync_state: SyncState = row.sync_state.parse().ok()?;

    Some(DiaryMutation {
        mutation_id,
        kind,
        client_timestamp,
        sync_state,
    })
}
