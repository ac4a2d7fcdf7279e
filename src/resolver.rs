//! Recognition resolution.
//!
//! Converts one adapter's raw output (barcode, classifier labels, or free
//! text) into a ranked candidate list, and commits the user's pick. Commit
//! is the single path by which any modality produces a diary write, so
//! downstream code never special-cases the input source.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::diary::DiaryStore;
use crate::error::{Error, Result};
use crate::index::FoodIndex;
use crate::models::{DiaryMutation, MealSlot, NutritionRecord, ResolvedItem};

/// Image recognition returns at most this many candidates.
const IMAGE_CANDIDATE_CAP: usize = 5;
/// Default cap for free-text search candidates.
const QUERY_CANDIDATE_CAP: usize = 10;

/// Which adapter produced the raw result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Barcode,
    Image,
    Query,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Barcode => write!(f, "barcode"),
            SourceType::Image => write!(f, "image"),
            SourceType::Query => write!(f, "query"),
        }
    }
}

/// Uniform raw-result contract for the three input adapters.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecognition {
    /// A scanned barcode string.
    Barcode(String),
    /// Ordered (label, score) guesses from the image classifier.
    Image(Vec<(String, f64)>),
    /// Free text typed by the user.
    Query(String),
}

impl RawRecognition {
    pub fn source_type(&self) -> SourceType {
        match self {
            RawRecognition::Barcode(_) => SourceType::Barcode,
            RawRecognition::Image(_) => SourceType::Image,
            RawRecognition::Query(_) => SourceType::Query,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    ExactBarcode,
    TokenMatch,
    LabelMatch,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::ExactBarcode => write!(f, "exact-barcode"),
            MatchReason::TokenMatch => write!(f, "token-match"),
            MatchReason::LabelMatch => write!(f, "label-match"),
        }
    }
}

/// Ephemeral ranked candidate; not persisted beyond the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCandidate {
    pub source: SourceType,
    pub record_id: Uuid,
    pub record_version: u32,
    pub name: String,
    pub confidence: f64,
    pub reason: MatchReason,
}

pub struct Resolver<'a> {
    index: &'a mut FoodIndex,
    diary: &'a DiaryStore,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a mut FoodIndex, diary: &'a DiaryStore) -> Self {
        Self { index, diary }
    }

    /// Rank candidates for one adapter's raw output.
    pub fn resolve(&self, raw: &RawRecognition) -> Result<Vec<RecognitionCandidate>> {
        match raw {
            RawRecognition::Barcode(code) => self.resolve_barcode(code),
            RawRecognition::Image(labels) => self.resolve_image(labels),
            RawRecognition::Query(text) => self.resolve_query(text),
        }
    }

    /// Exact barcode hit: a single candidate with confidence 1.0.
    /// An absent code surfaces `NotFound` instead of a fabricated guess.
    pub fn resolve_barcode(&self, code: &str) -> Result<Vec<RecognitionCandidate>> {
        let record = self.index.lookup_by_barcode(code)?;
        Ok(vec![candidate(
            record,
            SourceType::Barcode,
            1.0,
            MatchReason::ExactBarcode,
        )])
    }

    /// Classifier labels, merged and capped to the top five candidates.
    /// Confidence is the score normalized against the best match.
    pub fn resolve_image(&self, labels: &[(String, f64)]) -> Result<Vec<RecognitionCandidate>> {
        if labels.is_empty() {
            return Err(Error::InvalidInput("no labels in image result".into()));
        }
        let scored = self.index.search_by_labels(labels, IMAGE_CANDIDATE_CAP);
        let top = scored.first().map(|(_, s)| *s).unwrap_or(0.0);

        let mut candidates: Vec<RecognitionCandidate> = scored
            .into_iter()
            .map(|(record, score)| {
                let confidence = if top > 0.0 { score / top } else { 0.0 };
                candidate(
                    record,
                    SourceType::Image,
                    confidence.clamp(0.0, 1.0),
                    MatchReason::LabelMatch,
                )
            })
            .collect();
        self.rank(&mut candidates);
        Ok(candidates)
    }

    /// Free-text search; confidence comes straight from the match score.
    pub fn resolve_query(&self, text: &str) -> Result<Vec<RecognitionCandidate>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("empty query".into()));
        }
        let mut candidates: Vec<RecognitionCandidate> = self
            .index
            .search(text, QUERY_CANDIDATE_CAP)
            .into_iter()
            .map(|(record, score)| {
                candidate(
                    record,
                    SourceType::Query,
                    score.clamp(0.0, 1.0),
                    MatchReason::TokenMatch,
                )
            })
            .collect();
        self.rank(&mut candidates);
        Ok(candidates)
    }

    /// Commit the user's pick as a diary write at the current time.
    pub async fn commit(
        &mut self,
        candidate: &RecognitionCandidate,
        servings: f64,
        meal_slot: MealSlot,
    ) -> Result<Uuid> {
        self.commit_at(candidate, servings, meal_slot, Utc::now())
            .await
    }

    /// Commit with an explicit client timestamp.
    pub async fn commit_at(
        &mut self,
        candidate: &RecognitionCandidate,
        servings: f64,
        meal_slot: MealSlot,
        timestamp: DateTime<Utc>,
    ) -> Result<Uuid> {
        if !servings.is_finite() || servings <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "servings must be positive, got {}",
                servings
            )));
        }
        // The resolved item must reference a record that exists right now,
        // pinned to the exact version it was ranked against.
        if self
            .index
            .version(candidate.record_id, candidate.record_version)
            .is_none()
        {
            return Err(Error::NotFound);
        }

        let item = ResolvedItem::new(
            candidate.record_id,
            candidate.record_version,
            servings,
            meal_slot,
            timestamp,
        );
        let mutation_id = self.diary.append(DiaryMutation::add(item)).await?;
        self.index.record_selection(candidate.record_id).await?;
        Ok(mutation_id)
    }

    /// Deterministic ordering: confidence descending; equal confidence
    /// prefers a barcode match, then the record most recently selected by
    /// this user, then lexical name order. Duplicate record ids collapse
    /// into their best-ranked candidate.
    fn rank(&self, candidates: &mut Vec<RecognitionCandidate>) {
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    let a_barcode = a.reason == MatchReason::ExactBarcode;
                    let b_barcode = b.reason == MatchReason::ExactBarcode;
                    b_barcode.cmp(&a_barcode)
                })
                .then_with(|| {
                    let a_last = self.index.selection(a.record_id).last_selected_at;
                    let b_last = self.index.selection(b.record_id).last_selected_at;
                    b_last.cmp(&a_last)
                })
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.record_id));
    }
}

fn candidate(
    record: &NutritionRecord,
    source: SourceType,
    confidence: f64,
    reason: MatchReason,
) -> RecognitionCandidate {
    RecognitionCandidate {
        source,
        record_id: record.id,
        record_version: record.version,
        name: record.name.clone(),
        confidence,
        reason,
    }
}
