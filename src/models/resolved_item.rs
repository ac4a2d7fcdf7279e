use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::meal_slot::MealSlot;

/// The user-confirmed outcome of a resolution session.
///
/// Pinned to the exact record version it was resolved against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedItem {
    pub record_id: Uuid,
    pub record_version: u32,
    pub servings: f64,
    pub meal_slot: MealSlot,
    pub timestamp: DateTime<Utc>,
}

impl ResolvedItem {
    pub fn new(
        record_id: Uuid,
        record_version: u32,
        servings: f64,
        meal_slot: MealSlot,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id,
            record_version,
            servings,
            meal_slot,
            timestamp,
        }
    }

    /// The diary date this item belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

impl fmt::Display for ResolvedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x record {} (v{}) at {}",
            self.servings, self.record_id, self.record_version, self.meal_slot
        )
    }
}
