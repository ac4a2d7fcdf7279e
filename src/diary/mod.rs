//! Local-first diary store.
//!
//! All writes go through the append-only mutation log; the materialized
//! view and daily aggregates are derived state. Appends are serialized
//! behind one mutex (single logical writer), never touch the network, and
//! update the view synchronously before returning.

mod log;
mod view;

pub use log::MutationLog;
pub use view::{Diary, DiaryEntry};

use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::index::FoodIndex;
use crate::models::{
    DailyAggregate, DiaryMutation, Goal, MealSlot, MutationKind, SyncState,
};

/// Identity of a logical diary entry, used for conflict detection.
///
/// Derived from the originating `add`: the lineage of an entry does not
/// change when later edits move its servings or meal slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalKey {
    pub date: NaiveDate,
    pub meal_slot: MealSlot,
    pub record_id: Uuid,
}

/// What `DiaryStore::open` found in the persisted log.
#[derive(Debug, Clone, Copy)]
pub struct LoadReport {
    pub loaded: usize,
    pub corrupt: usize,
}

impl LoadReport {
    /// A corrupt segment means local state fell back to the intact rows;
    /// the remote copy should be re-ingested to fill the gap.
    pub fn needs_resync(&self) -> bool {
        self.corrupt > 0
    }
}

#[derive(Clone)]
pub struct DiaryStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    log: MutationLog,
    /// Full log in replay order.
    mutations: Vec<DiaryMutation>,
    known: HashSet<Uuid>,
    view: Diary,
    /// Per-date aggregate cache, before the goal diff is applied.
    aggregates: HashMap<NaiveDate, DailyAggregate>,
}

impl DiaryStore {
    pub async fn open(pool: SqlitePool) -> Result<(Self, LoadReport)> {
        let log = MutationLog::new(pool);
        let (mut mutations, corrupt) = log.load_all().await?;
        mutations.sort_by_key(|m| m.order_key());

        let known = mutations.iter().map(|m| m.mutation_id).collect();
        let view = Diary::replay(&mutations);
        let report = LoadReport {
            loaded: mutations.len(),
            corrupt,
        };
        if report.needs_resync() {
            tracing::warn!(
                corrupt = corrupt,
                "mutation log had corrupt rows; kept last known good state"
            );
        }

        let store = Self {
            inner: Arc::new(Mutex::new(StoreInner {
                log,
                mutations,
                known,
                view,
                aggregates: HashMap::new(),
            })),
        };
        Ok((store, report))
    }

    /// Append a mutation. Local-only: succeeds without connectivity.
    ///
    /// Appending an already-known mutation id is a no-op that returns the
    /// same id, so sync retries stay idempotent.
    pub async fn append(&self, mutation: DiaryMutation) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        let id = mutation.mutation_id;
        if inner.known.contains(&id) {
            return Ok(id);
        }
        inner.log.insert(&mutation).await?;
        inner.insert_in_memory(mutation);
        Ok(id)
    }

    /// Read materialized entries in `[from, to]`. Never blocks on sync.
    pub async fn read(&self, from: NaiveDate, to: NaiveDate) -> Vec<DiaryEntry> {
        self.inner.lock().await.view.entries_between(from, to)
    }

    pub async fn entry(&self, entry_id: Uuid) -> Option<DiaryEntry> {
        self.inner.lock().await.view.entry(entry_id).cloned()
    }

    /// Daily totals, lazily computed and cached per date.
    pub async fn aggregate(
        &self,
        date: NaiveDate,
        index: &FoodIndex,
        goal: &Goal,
    ) -> DailyAggregate {
        let mut inner = self.inner.lock().await;
        let mut result = match inner.aggregates.get(&date) {
            Some(cached) => cached.clone(),
            None => {
                let computed = inner.compute_aggregate(date, index);
                inner.aggregates.insert(date, computed.clone());
                computed
            }
        };
        result.apply_goal(goal);
        result
    }

    pub async fn pending(&self) -> Vec<DiaryMutation> {
        self.filter_state(SyncState::Pending).await
    }

    pub async fn conflicted(&self) -> Vec<DiaryMutation> {
        self.filter_state(SyncState::Conflicted).await
    }

    pub async fn contains(&self, mutation_id: Uuid) -> bool {
        self.inner.lock().await.known.contains(&mutation_id)
    }

    pub async fn get_mutation(&self, mutation_id: Uuid) -> Option<DiaryMutation> {
        let inner = self.inner.lock().await;
        inner
            .mutations
            .iter()
            .find(|m| m.mutation_id == mutation_id)
            .cloned()
    }

    /// `(pending, conflicted)` counts for status displays.
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        let pending = inner
            .mutations
            .iter()
            .filter(|m| m.sync_state == SyncState::Pending)
            .count();
        let conflicted = inner
            .mutations
            .iter()
            .filter(|m| m.sync_state == SyncState::Conflicted)
            .count();
        (pending, conflicted)
    }

    /// Lineage key of the entry a mutation touches, if resolvable.
    pub async fn logical_key(&self, mutation: &DiaryMutation) -> Option<LogicalKey> {
        let inner = self.inner.lock().await;
        inner.logical_key(mutation)
    }

    pub async fn mark_synced(&self, ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.log.set_sync_state(*id, SyncState::Synced).await?;
            inner.set_state_in_memory(*id, SyncState::Synced);
        }
        Ok(())
    }

    /// Mark a mutation as the loser of a conflict. It stays in the log for
    /// manual recovery but drops out of the materialized fold.
    pub async fn mark_conflicted(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.log.set_sync_state(id, SyncState::Conflicted).await?;
        let affected = inner.affected_date_of(id);
        inner.set_state_in_memory(id, SyncState::Conflicted);
        if let Some(date) = affected {
            inner.rebuild_dates(BTreeSet::from([date]));
        }
        Ok(())
    }

    /// Recover a conflicted mutation by replaying its payload as a fresh
    /// pending mutation with a new id and the current timestamp.
    pub async fn reinstate(&self, id: Uuid) -> Result<Uuid> {
        let kind = {
            let inner = self.inner.lock().await;
            inner
                .mutations
                .iter()
                .find(|m| m.mutation_id == id && m.sync_state == SyncState::Conflicted)
                .map(|m| m.kind.clone())
        };
        let kind = kind.ok_or(crate::error::Error::NotFound)?;
        let replayed = DiaryMutation {
            mutation_id: Uuid::new_v4(),
            kind,
            client_timestamp: chrono::Utc::now(),
            sync_state: SyncState::Pending,
        };
        self.append(replayed).await
    }

    async fn filter_state(&self, state: SyncState) -> Vec<DiaryMutation> {
        let inner = self.inner.lock().await;
        inner
            .mutations
            .iter()
            .filter(|m| m.sync_state == state)
            .cloned()
            .collect()
    }
}

impl StoreInner {
    /// Insert in replay order and rebuild the affected date.
    fn insert_in_memory(&mut self, mutation: DiaryMutation) {
        self.known.insert(mutation.mutation_id);
        let position = self
            .mutations
            .partition_point(|m| m.order_key() <= mutation.order_key());
        self.mutations.insert(position, mutation.clone());

        if let Some(date) = self.logical_date(&mutation) {
            self.rebuild_dates(BTreeSet::from([date]));
        }
    }

    fn set_state_in_memory(&mut self, id: Uuid, state: SyncState) {
        if let Some(m) = self.mutations.iter_mut().find(|m| m.mutation_id == id) {
            m.sync_state = state;
        }
    }

    /// Re-fold only the mutations touching the given dates.
    fn rebuild_dates(&mut self, dates: BTreeSet<NaiveDate>) {
        self.view.remove_dates(&dates);
        let add_dates = self.add_dates();
        for i in 0..self.mutations.len() {
            let mutation = self.mutations[i].clone();
            if let Some(date) = affected_date(&add_dates, &mutation) {
                if dates.contains(&date) {
                    self.view.apply(&mutation);
                }
            }
        }
        for date in &dates {
            self.aggregates.remove(date);
        }
    }

    fn compute_aggregate(&self, date: NaiveDate, index: &FoodIndex) -> DailyAggregate {
        let mut aggregate = DailyAggregate::empty(date);
        for entry in self.view.entries_on(date) {
            // Pinned version first; fall back to the latest if the pinned
            // one has not been ingested locally yet.
            let record = index
                .version(entry.item.record_id, entry.item.record_version)
                .or_else(|| index.latest(entry.item.record_id));
            match record {
                Some(record) => {
                    aggregate.accumulate(&record.nutrients_per_serving, entry.item.servings)
                }
                None => aggregate.entry_count += 1,
            }
        }
        aggregate
    }

    fn add_dates(&self) -> HashMap<Uuid, NaiveDate> {
        self.mutations
            .iter()
            .filter_map(|m| match &m.kind {
                MutationKind::Add { item } => Some((m.mutation_id, item.date())),
                _ => None,
            })
            .collect()
    }

    fn logical_date(&self, mutation: &DiaryMutation) -> Option<NaiveDate> {
        affected_date(&self.add_dates(), mutation)
    }

    fn affected_date_of(&self, id: Uuid) -> Option<NaiveDate> {
        let mutation = self.mutations.iter().find(|m| m.mutation_id == id)?.clone();
        self.logical_date(&mutation)
    }

    fn logical_key(&self, mutation: &DiaryMutation) -> Option<LogicalKey> {
        let target = match &mutation.kind {
            MutationKind::Add { item } => {
                return Some(LogicalKey {
                    date: item.date(),
                    meal_slot: item.meal_slot,
                    record_id: item.record_id,
                })
            }
            MutationKind::Edit { target, .. } => *target,
            MutationKind::Remove { target } => *target,
        };
        self.mutations
            .iter()
            .find(|m| m.mutation_id == target)
            .and_then(|m| match &m.kind {
                MutationKind::Add { item } => Some(LogicalKey {
                    date: item.date(),
                    meal_slot: item.meal_slot,
                    record_id: item.record_id,
                }),
                _ => None,
            })
    }
}

/// Date a mutation affects: its own date for adds, the target add's date
/// for edits and removes.
fn affected_date(
    add_dates: &HashMap<Uuid, NaiveDate>,
    mutation: &DiaryMutation,
) -> Option<NaiveDate> {
    match &mutation.kind {
        MutationKind::Add { item } => Some(item.date()),
        MutationKind::Edit { target, .. } | MutationKind::Remove { target } => {
            add_dates.get(target).copied()
        }
    }
}
