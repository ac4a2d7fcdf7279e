//! Sync engine: reconcile the local mutation log with a remote store.
//!
//! Per-mutation lifecycle: `pending -> inflight -> synced`, or
//! `pending -> inflight -> conflicted` when a remote mutation wins the
//! same logical entry. Flush is single-flight; a concurrent caller waits
//! for the in-progress flush and observes its outcome instead of
//! re-sending the batch.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::cursor::SyncCursor;
use super::protocol::{PushRequest, WireMutation};
use super::remote::RemoteStore;
use crate::diary::DiaryStore;
use crate::error::{Error, Result};
use crate::models::{DiaryMutation, SyncState};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// What one flush accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlushOutcome {
    /// Local mutations acknowledged by the remote.
    pub pushed: usize,
    /// Remote mutations appended locally.
    pub ingested: usize,
    /// Conflicts detected and resolved during ingestion.
    pub conflicts: usize,
    /// Cursor after the flush.
    pub cursor: i64,
}

/// Snapshot of sync health for status displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub conflicted_count: usize,
    pub last_sync_at: Option<chrono::DateTime<Utc>>,
}

pub struct SyncEngine<R: RemoteStore> {
    store: DiaryStore,
    remote: Arc<R>,
    cursor: SyncCursor,
    batch_size: usize,
    /// Held for the duration of a flush; stores the last outcome so a
    /// waiting caller can observe what the in-progress flush did.
    gate: Mutex<FlushOutcome>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: DiaryStore, remote: Arc<R>, pool: SqlitePool) -> Self {
        Self {
            store,
            remote,
            cursor: SyncCursor::new(pool),
            batch_size: DEFAULT_BATCH_SIZE,
            gate: Mutex::new(FlushOutcome::default()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Push pending mutations oldest-first and ingest remote ones.
    ///
    /// Mutations appended after this flush snapshots the pending set are
    /// picked up by the next flush, never blocked. On transient failure
    /// the unacknowledged tail stays `pending` in its original order.
    ///
    /// A call arriving while another flush is running does not re-send;
    /// it waits for that flush and returns its outcome.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let mut gate = match self.gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                let gate = self.gate.lock().await;
                return Ok(*gate);
            }
        };

        let pending = self.store.pending().await;
        let mut state = self.cursor.load().await?;
        let mut outcome = FlushOutcome {
            cursor: state.cursor,
            ..Default::default()
        };

        // Always run at least one exchange so remote mutations are pulled
        // even when there is nothing to push.
        let batches: Vec<&[DiaryMutation]> = if pending.is_empty() {
            vec![&[]]
        } else {
            pending.chunks(self.batch_size).collect()
        };

        for batch in batches {
            let request = PushRequest {
                since_cursor: state.cursor,
                mutations: batch.iter().map(WireMutation::from_local).collect(),
            };

            let response = self.remote.push(request).await.map_err(|e| {
                tracing::warn!(error = %e, "flush halted, will retry");
                Error::TransientSyncFailure(e.to_string())
            })?;

            // Acknowledge in send order; stop at the first gap so nothing
            // is reordered around a failed mutation.
            let accepted: HashSet<Uuid> = response.accepted_ids.iter().copied().collect();
            let mut synced_ids = Vec::new();
            let mut halted = false;
            for mutation in batch {
                if !accepted.contains(&mutation.mutation_id) {
                    halted = true;
                    break;
                }
                synced_ids.push(mutation.mutation_id);
            }

            // Ingest before acknowledging: the batch is still pending, so
            // a diverging remote mutation is checked against it. A local
            // that loses here must keep its conflicted state, not be
            // marked synced afterwards.
            let (ingested, conflicts, conflicted_locals) =
                self.ingest(response.remote_mutations_since).await?;
            outcome.ingested += ingested;
            outcome.conflicts += conflicts;

            synced_ids.retain(|id| !conflicted_locals.contains(id));
            self.store.mark_synced(&synced_ids).await?;
            outcome.pushed += synced_ids.len();

            state.cursor = response.new_cursor;
            self.cursor.advance(state.cursor, Utc::now()).await?;

            if halted {
                break;
            }
        }

        outcome.cursor = state.cursor;
        tracing::info!(
            pushed = outcome.pushed,
            ingested = outcome.ingested,
            conflicts = outcome.conflicts,
            cursor = outcome.cursor,
            "flush complete"
        );
        *gate = outcome;
        Ok(outcome)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let (pending_count, conflicted_count) = self.store.counts().await;
        let state = self.cursor.load().await?;
        Ok(SyncStatus {
            pending_count,
            conflicted_count,
            last_sync_at: state.last_sync_at,
        })
    }

    /// Rewind the cursor after local-state corruption so the next flush
    /// re-ingests the full remote log (idempotent on mutation id).
    pub async fn reset_cursor(&self) -> Result<()> {
        self.cursor.reset().await
    }

    /// Append remote mutations not present locally, resolving conflicts
    /// by last-writer-wins on client timestamp. The loser is retained
    /// with sync state `conflicted`, never deleted. Returns the ids of
    /// local mutations that lost, so the caller skips acknowledging them.
    async fn ingest(&self, remote: Vec<WireMutation>) -> Result<(usize, usize, HashSet<Uuid>)> {
        let mut ingested = 0;
        let mut conflicts = 0;
        let mut conflicted_locals = HashSet::new();

        for wire in remote {
            if self.store.contains(wire.mutation_id).await {
                continue;
            }

            let incoming = wire.into_local(SyncState::Synced);
            let mut remote_loses = false;
            let mut losing_local = None;

            if let Some(remote_key) = self.store.logical_key(&incoming).await {
                for local in self.store.pending().await {
                    let Some(local_key) = self.store.logical_key(&local).await else {
                        continue;
                    };
                    if local_key != remote_key || local.kind == incoming.kind {
                        continue;
                    }
                    // Same logical entry, diverging payloads.
                    conflicts += 1;
                    if local.order_key() > incoming.order_key() {
                        remote_loses = true;
                    } else {
                        losing_local = Some(local.mutation_id);
                    }
                    break;
                }
            }

            if remote_loses {
                let mut retained = incoming;
                retained.sync_state = SyncState::Conflicted;
                tracing::info!(
                    mutation_id = %retained.mutation_id,
                    "remote mutation lost conflict, retained for recovery"
                );
                self.store.append(retained).await?;
            } else {
                self.store.append(incoming).await?;
                if let Some(loser) = losing_local {
                    tracing::info!(
                        mutation_id = %loser,
                        "local mutation lost conflict, retained for recovery"
                    );
                    self.store.mark_conflicted(loser).await?;
                    conflicted_locals.insert(loser);
                }
            }
            ingested += 1;
        }

        Ok((ingested, conflicts, conflicted_locals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::index::FoodIndex;
    use crate::models::{Goal, MealSlot, NutritionRecord, ResolvedItem};
    use crate::sync::remote::MemoryRemote;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::TempDir;

    struct TestContext {
        engine: SyncEngine<MemoryRemote>,
        remote: Arc<MemoryRemote>,
        store: DiaryStore,
        index: FoodIndex,
        pool: sqlx::SqlitePool,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        let index = FoodIndex::open(pool.clone()).await.unwrap();
        let (store, _) = DiaryStore::open(pool.clone()).await.unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(store.clone(), remote.clone(), pool.clone());
        TestContext {
            engine,
            remote,
            store,
            index,
            pool,
            _temp_dir: temp_dir,
        }
    }

    fn add_at(hour: u32, servings: f64, record_id: Uuid) -> DiaryMutation {
        DiaryMutation::add(ResolvedItem::new(
            record_id,
            1,
            servings,
            MealSlot::Breakfast,
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        ))
    }

    fn jan1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_flush_pushes_pending_and_advances_cursor() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        ctx.store.append(add_at(8, 1.0, record_id)).await.unwrap();
        ctx.store.append(add_at(12, 2.0, record_id)).await.unwrap();

        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 2);
        assert_eq!(outcome.cursor, 2);
        assert_eq!(ctx.remote.log_len(), 2);

        let status = ctx.engine.status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(status.last_sync_at.is_some());

        // nothing left: the next flush is a no-op exchange
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 0);
        assert_eq!(ctx.remote.log_len(), 2);
    }

    #[tokio::test]
    async fn test_offline_flush_keeps_everything_pending() {
        let ctx = setup().await;
        ctx.store
            .append(add_at(8, 1.0, Uuid::new_v4()))
            .await
            .unwrap();
        ctx.remote.set_offline(true);

        let result = ctx.engine.flush().await;
        assert!(matches!(result, Err(Error::TransientSyncFailure(_))));

        let status = ctx.engine.status().await.unwrap();
        assert_eq!(status.pending_count, 1);

        // connectivity back: the retry drains the queue
        ctx.remote.set_offline(false);
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 1);
    }

    #[tokio::test]
    async fn test_mid_batch_failure_keeps_tail_pending_in_order() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        let first = ctx.store.append(add_at(8, 1.0, record_id)).await.unwrap();
        let second = ctx.store.append(add_at(9, 1.0, record_id)).await.unwrap();
        let third = ctx.store.append(add_at(10, 1.0, record_id)).await.unwrap();

        ctx.remote.set_accept_limit(Some(1));
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 1);

        let pending = ctx.store.pending().await;
        let pending_ids: Vec<Uuid> = pending.iter().map(|m| m.mutation_id).collect();
        assert_eq!(pending_ids, vec![second, third]);
        assert_eq!(
            ctx.store.get_mutation(first).await.unwrap().sync_state,
            SyncState::Synced
        );

        // retry sends the tail in the same relative order
        ctx.remote.set_accept_limit(None);
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 2);
        let ids: Vec<Uuid> = ctx.remote.mutations().iter().map(|m| m.mutation_id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_batching_respects_order() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        let mut expected = Vec::new();
        for hour in 6..12 {
            expected.push(ctx.store.append(add_at(hour, 1.0, record_id)).await.unwrap());
        }

        let engine = SyncEngine::new(ctx.store.clone(), ctx.remote.clone(), ctx.pool.clone())
            .with_batch_size(2);

        let outcome = engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 6);
        let ids: Vec<Uuid> = ctx.remote.mutations().iter().map(|m| m.mutation_id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_remote_ingestion_appends_locally() {
        let ctx = setup().await;
        let other_device = add_at(9, 3.0, Uuid::new_v4());
        ctx.remote.seed(WireMutation::from_local(&other_device));

        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.ingested, 1);
        assert_eq!(outcome.conflicts, 0);

        let entries = ctx.store.read(jan1(), jan1()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_id, other_device.mutation_id);
        assert_eq!(
            ctx.store
                .get_mutation(other_device.mutation_id)
                .await
                .unwrap()
                .sync_state,
            SyncState::Synced
        );

        // re-flushing does not duplicate it
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.ingested, 0);
        assert_eq!(ctx.store.read(jan1(), jan1()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_local_wins_by_later_timestamp() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();

        // local unsynced add at 08:00; remote add for the same logical
        // entry (same date, slot, record) at 07:59 with a different payload
        let local = add_at(8, 2.0, record_id);
        ctx.store.append(local.clone()).await.unwrap();
        let remote_older = DiaryMutation::add(ResolvedItem::new(
            record_id,
            1,
            1.0,
            MealSlot::Breakfast,
            Utc.with_ymd_and_hms(2024, 1, 1, 7, 59, 0).unwrap(),
        ));
        ctx.remote.seed(WireMutation::from_local(&remote_older));

        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.conflicts, 1);

        // the local 08:00 value is live; the 07:59 loser is retained
        let entries = ctx.store.read(jan1(), jan1()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item.servings, 2.0);

        let conflicted = ctx.store.conflicted().await;
        assert_eq!(conflicted.len(), 1);
        assert_eq!(conflicted[0].mutation_id, remote_older.mutation_id);
    }

    #[tokio::test]
    async fn test_conflict_remote_wins_by_later_timestamp() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();

        let local = add_at(8, 2.0, record_id);
        ctx.store.append(local.clone()).await.unwrap();
        let remote_newer = DiaryMutation::add(ResolvedItem::new(
            record_id,
            1,
            1.0,
            MealSlot::Breakfast,
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap(),
        ));
        ctx.remote.seed(WireMutation::from_local(&remote_newer));

        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.conflicts, 1);

        let entries = ctx.store.read(jan1(), jan1()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item.servings, 1.0);

        // loser preserved with the earlier timestamp, retrievable
        let conflicted = ctx.store.conflicted().await;
        assert_eq!(conflicted.len(), 1);
        assert_eq!(conflicted[0].mutation_id, local.mutation_id);
        assert!(conflicted[0].client_timestamp < remote_newer.client_timestamp);

        // the remote acknowledged the loser, but its conflicted state is
        // not overwritten back to synced
        assert_eq!(
            ctx.store
                .get_mutation(local.mutation_id)
                .await
                .unwrap()
                .sync_state,
            SyncState::Conflicted
        );
    }

    #[tokio::test]
    async fn test_different_slots_do_not_conflict() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        ctx.store.append(add_at(8, 2.0, record_id)).await.unwrap();

        let remote_lunch = DiaryMutation::add(ResolvedItem::new(
            record_id,
            1,
            1.0,
            MealSlot::Lunch,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        ctx.remote.seed(WireMutation::from_local(&remote_lunch));

        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.conflicts, 0);
        assert_eq!(ctx.store.read(jan1(), jan1()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_single_flight() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        for hour in 6..10 {
            ctx.store.append(add_at(hour, 1.0, record_id)).await.unwrap();
        }

        let engine = Arc::new(ctx.engine);
        let a = engine.clone();
        let b = engine.clone();
        let (first, second) = tokio::join!(a.flush(), b.flush());
        let first = first.unwrap();
        let second = second.unwrap();

        // every mutation hit the remote exactly once; the waiting caller
        // observed the working flush's outcome instead of re-sending
        assert_eq!(ctx.remote.log_len(), 4);
        assert_eq!(first, second);
        assert_eq!(first.pushed, 4);
        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test]
    async fn test_reset_cursor_reingests_dropped_mutations() {
        let ctx = setup().await;
        let record_id = Uuid::new_v4();
        let id = ctx.store.append(add_at(8, 2.0, record_id)).await.unwrap();
        ctx.engine.flush().await.unwrap();
        assert_eq!(ctx.remote.log_len(), 1);

        // lose the local copy, as a corrupt row skipped on load would be
        sqlx::query("DELETE FROM diary_mutations WHERE mutation_id = ?")
            .bind(id.to_string())
            .execute(&ctx.pool)
            .await
            .unwrap();
        let (store, _) = DiaryStore::open(ctx.pool.clone()).await.unwrap();
        let engine = SyncEngine::new(store.clone(), ctx.remote.clone(), ctx.pool.clone());
        assert!(store.read(jan1(), jan1()).await.is_empty());

        // the persisted cursor is past the dropped mutation, so a plain
        // flush cannot recover it
        let outcome = engine.flush().await.unwrap();
        assert_eq!(outcome.ingested, 0);

        engine.reset_cursor().await.unwrap();
        let outcome = engine.flush().await.unwrap();
        assert_eq!(outcome.ingested, 1);
        assert_eq!(store.read(jan1(), jan1()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_add_then_sync_end_to_end() {
        let ctx = setup().await;
        let mut index = ctx.index;

        let apple = index
            .upsert(
                NutritionRecord::new("Apple, raw", 100.0, "g")
                    .with_barcode("012345")
                    .with_nutrient("calories", 52.0),
            )
            .await
            .unwrap();

        // offline local add: 2 servings at 08:00
        ctx.remote.set_offline(true);
        let local = add_at(8, 2.0, apple.id);
        ctx.store.append(local.clone()).await.unwrap();
        assert!(ctx.engine.flush().await.is_err());

        let entries = ctx.store.read(jan1(), jan1()).await;
        assert_eq!(entries.len(), 1);
        let agg = ctx.store.aggregate(jan1(), &index, &Goal::default()).await;
        assert_eq!(agg.nutrients["calories"], 104.0);

        // remote edit of the same logical entry at 07:59 loses to 08:00
        let remote_edit = DiaryMutation::add(ResolvedItem::new(
            apple.id,
            1,
            1.0,
            MealSlot::Breakfast,
            Utc.with_ymd_and_hms(2024, 1, 1, 7, 59, 0).unwrap(),
        ));
        ctx.remote.seed(WireMutation::from_local(&remote_edit));

        // back online
        ctx.remote.set_offline(false);
        let outcome = ctx.engine.flush().await.unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.conflicts, 1);

        assert_eq!(
            ctx.store
                .get_mutation(local.mutation_id)
                .await
                .unwrap()
                .sync_state,
            SyncState::Synced
        );
        // the 08:00 value stands, the 07:59 version is retained conflicted
        let agg = ctx.store.aggregate(jan1(), &index, &Goal::default()).await;
        assert_eq!(agg.nutrients["calories"], 104.0);
        assert_eq!(ctx.store.conflicted().await.len(), 1);
    }
}
