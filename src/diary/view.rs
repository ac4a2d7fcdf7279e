//! Materialized diary view.
//!
//! Built by folding non-conflicted mutations in `(client_timestamp,
//! mutation_id)` order. The fold is deterministic: any permutation of the
//! log consistent with that order produces the same view.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{DiaryMutation, MutationKind, ResolvedItem, SyncState};

/// One current diary entry, keyed by the mutation id of the `add` that
/// created it. Edits fold into `item`; the key never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryEntry {
    pub entry_id: Uuid,
    pub item: ResolvedItem,
}

impl DiaryEntry {
    pub fn date(&self) -> NaiveDate {
        self.item.date()
    }
}

#[derive(Debug, Default)]
pub struct Diary {
    entries: HashMap<Uuid, DiaryEntry>,
}

impl Diary {
    /// Fold a log (already in replay order) into a view.
    pub fn replay<'a>(mutations: impl IntoIterator<Item = &'a DiaryMutation>) -> Self {
        let mut diary = Self::default();
        for mutation in mutations {
            diary.apply(mutation);
        }
        diary
    }

    /// Apply one mutation; returns the affected date, if any.
    ///
    /// Conflicted mutations are excluded from the fold. A remove (or edit)
    /// whose target does not exist is a no-op, which keeps replay
    /// idempotent when the same mutation arrives twice during sync retry.
    pub fn apply(&mut self, mutation: &DiaryMutation) -> Option<NaiveDate> {
        if mutation.sync_state == SyncState::Conflicted {
            return None;
        }

        match &mutation.kind {
            MutationKind::Add { item } => {
                if self.entries.contains_key(&mutation.mutation_id) {
                    // logical duplicate
                    return None;
                }
                let date = item.date();
                self.entries.insert(
                    mutation.mutation_id,
                    DiaryEntry {
                        entry_id: mutation.mutation_id,
                        item: item.clone(),
                    },
                );
                Some(date)
            }
            MutationKind::Edit {
                target,
                servings,
                meal_slot,
            } => {
                let entry = self.entries.get_mut(target)?;
                if let Some(servings) = servings {
                    entry.item.servings = *servings;
                }
                if let Some(meal_slot) = meal_slot {
                    entry.item.meal_slot = *meal_slot;
                }
                Some(entry.date())
            }
            MutationKind::Remove { target } => {
                self.entries.remove(target).map(|e| e.date())
            }
        }
    }

    pub fn entry(&self, id: Uuid) -> Option<&DiaryEntry> {
        self.entries.get(&id)
    }

    /// Entries in `[from, to]`, ordered by timestamp then entry id.
    pub fn entries_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<DiaryEntry> {
        let mut entries: Vec<DiaryEntry> = self
            .entries
            .values()
            .filter(|e| e.date() >= from && e.date() <= to)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.item.timestamp, e.entry_id));
        entries
    }

    pub fn entries_on(&self, date: NaiveDate) -> Vec<DiaryEntry> {
        self.entries_between(date, date)
    }

    /// Drop every entry on the given dates, ahead of a partial rebuild.
    pub fn remove_dates(&mut self, dates: &BTreeSet<NaiveDate>) {
        self.entries.retain(|_, e| !dates.contains(&e.date()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MealSlot;
    use chrono::{TimeZone, Utc};

    fn add_at(hour: u32, servings: f64) -> DiaryMutation {
        DiaryMutation::add(ResolvedItem::new(
            Uuid::new_v4(),
            1,
            servings,
            MealSlot::Breakfast,
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_add_then_edit_then_remove() {
        let add = add_at(8, 2.0);
        let edit = DiaryMutation::edit(
            add.mutation_id,
            Some(1.0),
            Some(MealSlot::Lunch),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        );
        let remove = DiaryMutation::remove(
            add.mutation_id,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        );

        let diary = Diary::replay([&add, &edit]);
        let entry = diary.entry(add.mutation_id).unwrap();
        assert_eq!(entry.item.servings, 1.0);
        assert_eq!(entry.item.meal_slot, MealSlot::Lunch);

        let diary = Diary::replay([&add, &edit, &remove]);
        assert!(diary.is_empty());
    }

    #[test]
    fn test_remove_of_missing_target_is_noop() {
        let add = add_at(8, 2.0);
        let stray = DiaryMutation::remove(
            Uuid::new_v4(),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        );

        let mut diary = Diary::replay([&add]);
        assert_eq!(diary.apply(&stray), None);
        assert_eq!(diary.len(), 1);

        // applying the same remove twice is also fine
        let remove = DiaryMutation::remove(add.mutation_id, stray.client_timestamp);
        diary.apply(&remove);
        assert_eq!(diary.apply(&remove), None);
        assert!(diary.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_logical_duplicate() {
        let add = add_at(8, 2.0);
        let diary = Diary::replay([&add, &add]);
        assert_eq!(diary.len(), 1);
    }

    #[test]
    fn test_conflicted_mutations_excluded() {
        let add = add_at(8, 2.0);
        let mut conflicted = add_at(9, 3.0);
        conflicted.sync_state = SyncState::Conflicted;

        let diary = Diary::replay([&add, &conflicted]);
        assert_eq!(diary.len(), 1);
        assert!(diary.entry(conflicted.mutation_id).is_none());
    }

    #[test]
    fn test_entries_between_filters_and_sorts() {
        let breakfast = add_at(8, 1.0);
        let lunch = add_at(12, 1.0);
        let other_day = DiaryMutation::add(ResolvedItem::new(
            Uuid::new_v4(),
            1,
            1.0,
            MealSlot::Dinner,
            Utc.with_ymd_and_hms(2024, 1, 5, 19, 0, 0).unwrap(),
        ));

        let diary = Diary::replay([&lunch, &breakfast, &other_day]);
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let entries = diary.entries_on(jan1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_id, breakfast.mutation_id);
        assert_eq!(entries[1].entry_id, lunch.mutation_id);

        let all = diary.entries_between(jan1, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_replay_order_invariance_under_tie_break() {
        // Two mutations share a timestamp; replay order is fixed by the
        // (timestamp, mutation_id) key, so sorting any permutation of the
        // log yields the same view.
        let a = add_at(8, 1.0);
        let b = add_at(8, 2.0);
        let edit = DiaryMutation::edit(
            a.mutation_id,
            Some(4.0),
            None,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        );

        let mut forward = vec![&a, &b, &edit];
        forward.sort_by_key(|m| m.order_key());
        let mut backward = vec![&edit, &b, &a];
        backward.sort_by_key(|m| m.order_key());

        let first = Diary::replay(forward);
        let second = Diary::replay(backward);
        assert_eq!(
            first.entry(a.mutation_id).unwrap().item.servings,
            second.entry(a.mutation_id).unwrap().item.servings
        );
        assert_eq!(first.len(), second.len());
    }
}
