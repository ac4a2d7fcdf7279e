//! Nutrition database index: exact barcode lookup and fuzzy text search.
//!
//! Records are loaded into memory on startup; all reads are synchronous.
//! `upsert` is the only mutator and persists through [`FoodRepository`]
//! before updating the in-memory structures.

mod store;

pub use store::{FoodRepository, SelectionStats};

use chrono::Utc;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{tokenize, NutritionRecord};

pub struct FoodIndex {
    repo: FoodRepository,
    /// All versions per record id, ascending by version.
    versions: HashMap<Uuid, Vec<NutritionRecord>>,
    /// Barcode -> record id. Exact match only.
    by_barcode: HashMap<String, Uuid>,
    /// Token -> ids of latest versions containing it.
    postings: HashMap<String, HashSet<Uuid>>,
    selections: HashMap<Uuid, SelectionStats>,
}

impl FoodIndex {
    /// Load the index from the database.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let repo = FoodRepository::new(pool);
        let mut index = Self {
            repo,
            versions: HashMap::new(),
            by_barcode: HashMap::new(),
            postings: HashMap::new(),
            selections: HashMap::new(),
        };

        for record in index.repo.load_all().await? {
            index.insert_in_memory(record);
        }
        for (id, stats) in index.repo.load_selections().await? {
            index.selections.insert(id, stats);
        }

        Ok(index)
    }

    /// Latest version of a record.
    pub fn latest(&self, id: Uuid) -> Option<&NutritionRecord> {
        self.versions.get(&id).and_then(|v| v.last())
    }

    /// A specific pinned version of a record.
    pub fn version(&self, id: Uuid, version: u32) -> Option<&NutritionRecord> {
        self.versions
            .get(&id)?
            .iter()
            .find(|r| r.version == version)
    }

    /// Exact-match barcode lookup. O(1) expected.
    pub fn lookup_by_barcode(&self, code: &str) -> Result<&NutritionRecord> {
        let id = self.by_barcode.get(code).ok_or(Error::NotFound)?;
        self.latest(*id).ok_or(Error::NotFound)
    }

    /// Token search scored by IDF-weighted overlap, capped at `limit`.
    ///
    /// Ties break by higher historical selection count, then name.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(&NutritionRecord, f64)> {
        let mut scored = self.score_query(query);
        self.rank(&mut scored);
        scored.truncate(limit);
        scored
            .into_iter()
            .filter_map(|(id, score)| self.latest(id).map(|r| (r, score)))
            .collect()
    }

    /// Merge classifier labels into one ranking: each label is run as a
    /// query, per-record scores are summed weighted by the label score.
    pub fn search_by_labels(
        &self,
        labels: &[(String, f64)],
        limit: usize,
    ) -> Vec<(&NutritionRecord, f64)> {
        let mut merged: HashMap<Uuid, f64> = HashMap::new();
        for (label, weight) in labels {
            for (id, score) in self.score_query(label) {
                *merged.entry(id).or_insert(0.0) += score * weight;
            }
        }

        let mut scored: Vec<(Uuid, f64)> = merged.into_iter().collect();
        self.rank(&mut scored);
        scored.truncate(limit);
        scored
            .into_iter()
            .filter_map(|(id, score)| self.latest(id).map(|r| (r, score)))
            .collect()
    }

    /// Publish a record. Existing ids get the next version; new ids start
    /// at version 1. Returns the stored record.
    pub async fn upsert(&mut self, mut record: NutritionRecord) -> Result<NutritionRecord> {
        record.version = match self.latest(record.id) {
            Some(latest) => latest.version + 1,
            None => 1,
        };
        self.repo.insert(&record).await?;
        self.insert_in_memory(record.clone());
        Ok(record)
    }

    /// Bump the historical selection count for a record the user picked.
    pub async fn record_selection(&mut self, id: Uuid) -> Result<()> {
        let at = Utc::now();
        self.repo.bump_selection(id, at).await?;
        let stats = self.selections.entry(id).or_default();
        stats.count += 1;
        stats.last_selected_at = Some(at);
        Ok(())
    }

    pub fn selection(&self, id: Uuid) -> SelectionStats {
        self.selections.get(&id).copied().unwrap_or_default()
    }

    /// Iterate over the latest version of every record.
    pub fn iter_latest(&self) -> impl Iterator<Item = &NutritionRecord> {
        self.versions.values().filter_map(|v| v.last())
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn insert_in_memory(&mut self, record: NutritionRecord) {
        // Drop the previous latest version from the postings before the
        // new version takes over as the searchable one.
        if let Some(prev) = self.versions.get(&record.id).and_then(|v| v.last()) {
            for token in prev.search_tokens.clone() {
                if let Some(ids) = self.postings.get_mut(&token) {
                    ids.remove(&record.id);
                }
            }
        }

        for token in &record.search_tokens {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(record.id);
        }
        for code in &record.barcodes {
            self.by_barcode.insert(code.clone(), record.id);
        }

        self.versions.entry(record.id).or_default().push(record);
    }

    /// Score the latest versions against a query. Unbounded, unsorted.
    fn score_query(&self, query: &str) -> Vec<(Uuid, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let query_weight: f64 = query_tokens.iter().map(|t| self.idf(t)).sum();

        let mut candidates: HashSet<Uuid> = HashSet::new();
        for token in &query_tokens {
            if let Some(ids) = self.postings.get(token) {
                candidates.extend(ids.iter().copied());
            }
        }

        candidates
            .into_iter()
            .filter_map(|id| {
                let record = self.latest(id)?;
                let matched: f64 = query_tokens
                    .iter()
                    .filter(|t| record.search_tokens.contains(*t))
                    .map(|t| self.idf(t))
                    .sum();
                Some((id, matched / query_weight))
            })
            .collect()
    }

    /// Inverse document frequency over latest versions.
    fn idf(&self, token: &str) -> f64 {
        let total = self.versions.len() as f64;
        let df = self.postings.get(token).map(|ids| ids.len()).unwrap_or(0) as f64;
        ((1.0 + total) / (1.0 + df)).ln() + 1.0
    }

    /// Sort by score descending; tie-break by selection count, then name.
    fn rank(&self, scored: &mut Vec<(Uuid, f64)>) {
        scored.sort_by(|(a_id, a_score), (b_id, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    self.selection(*b_id)
                        .count
                        .cmp(&self.selection(*a_id).count)
                })
                .then_with(|| {
                    let a_name = self.latest(*a_id).map(|r| r.name.as_str()).unwrap_or("");
                    let b_name = self.latest(*b_id).map(|r| r.name.as_str()).unwrap_or("");
                    a_name.cmp(b_name)
                })
        });
    }
}
