use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// A canonical food entity in the nutrition database.
///
/// Records are immutable once published: corrections create a new version
/// with the same `id` and a higher `version`. Diary entries pin the version
/// they were resolved against, so a later correction never silently changes
/// historical totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NutritionRecord {
    pub id: Uuid,
    pub version: u32,
    pub name: String,
    pub brand: Option<String>,
    pub serving_unit: String,
    pub serving_size: f64,
    /// Nutrient name -> amount per serving. Units are fixed per nutrient.
    pub nutrients_per_serving: BTreeMap<String, f64>,
    pub barcodes: BTreeSet<String>,
    /// Normalized tokens derived from name and brand.
    pub search_tokens: Vec<String>,
}

impl NutritionRecord {
    pub fn new(name: impl Into<String>, serving_size: f64, serving_unit: impl Into<String>) -> Self {
        let name = name.into();
        let search_tokens = tokenize(&name);
        Self {
            id: Uuid::new_v4(),
            version: 1,
            name,
            brand: None,
            serving_unit: serving_unit.into(),
            serving_size,
            nutrients_per_serving: BTreeMap::new(),
            barcodes: BTreeSet::new(),
            search_tokens,
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self.rebuild_tokens();
        self
    }

    pub fn with_barcode(mut self, code: impl Into<String>) -> Self {
        self.barcodes.insert(code.into());
        self
    }

    pub fn with_nutrient(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.nutrients_per_serving.insert(name.into(), amount);
        self
    }

    /// Derive the next version of this record with corrected fields.
    ///
    /// Keeps the id, bumps the version. Callers pass the corrected record
    /// through the index's `upsert`, which enforces the version ordering.
    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    fn rebuild_tokens(&mut self) {
        let mut tokens = tokenize(&self.name);
        if let Some(brand) = &self.brand {
            for t in tokenize(brand) {
                if !tokens.contains(&t) {
                    tokens.push(t);
                }
            }
        }
        self.search_tokens = tokens;
    }
}

impl fmt::Display for NutritionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.brand {
            Some(brand) => write!(f, "{} ({})", self.name, brand)?,
            None => write!(f, "{}", self.name)?,
        }
        write!(f, " - {} {} per serving", self.serving_size, self.serving_unit)
    }
}

/// Normalize text into lowercase alphanumeric search tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let token = raw.to_lowercase();
        if token.is_empty() {
            continue;
        }
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}
