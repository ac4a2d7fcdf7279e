use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Daily nutrient targets, configured by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    #[serde(default)]
    pub daily_targets: BTreeMap<String, f64>,
}

impl Goal {
    pub fn with_target(mut self, nutrient: impl Into<String>, amount: f64) -> Self {
        self.daily_targets.insert(nutrient.into(), amount);
        self
    }
}

/// Nutrient totals for one day, diffed against the active goal.
///
/// Derived state: recomputed on demand from the materialized diary, never
/// stored as a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub entry_count: usize,
    /// Total nutrients consumed, nutrient name -> amount.
    pub nutrients: BTreeMap<String, f64>,
    /// Remaining amount per goal nutrient (target - consumed).
    pub remaining: BTreeMap<String, f64>,
}

impl DailyAggregate {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            entry_count: 0,
            nutrients: BTreeMap::new(),
            remaining: BTreeMap::new(),
        }
    }

    /// Add one consumed portion: per-serving nutrients scaled by servings.
    pub fn accumulate(&mut self, per_serving: &BTreeMap<String, f64>, servings: f64) {
        for (name, amount) in per_serving {
            *self.nutrients.entry(name.clone()).or_insert(0.0) += amount * servings;
        }
        self.entry_count += 1;
    }

    /// Fill in the goal diff once totals are complete.
    pub fn apply_goal(&mut self, goal: &Goal) {
        self.remaining = goal
            .daily_targets
            .iter()
            .map(|(name, target)| {
                let consumed = self.nutrients.get(name).copied().unwrap_or(0.0);
                (name.clone(), target - consumed)
            })
            .collect();
    }
}

impl fmt::Display for DailyAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} entries", self.date, self.entry_count)?;
        for (name, amount) in &self.nutrients {
            match self.remaining.get(name) {
                Some(left) => writeln!(f, "  {}: {:.1} ({:.1} remaining)", name, amount, left)?,
                None => writeln!(f, "  {}: {:.1}", name, amount)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_accumulate_scales_by_servings() {
        let mut agg = DailyAggregate::empty(date());
        let per_serving = BTreeMap::from([("calories".to_string(), 95.0)]);

        agg.accumulate(&per_serving, 2.0);
        assert_eq!(agg.nutrients["calories"], 190.0);
        assert_eq!(agg.entry_count, 1);

        agg.accumulate(&per_serving, 1.0);
        assert_eq!(agg.nutrients["calories"], 285.0);
        assert_eq!(agg.entry_count, 2);
    }

    #[test]
    fn test_apply_goal_reports_remaining() {
        let mut agg = DailyAggregate::empty(date());
        let per_serving = BTreeMap::from([
            ("calories".to_string(), 500.0),
            ("protein".to_string(), 20.0),
        ]);
        agg.accumulate(&per_serving, 1.0);

        let goal = Goal::default()
            .with_target("calories", 2000.0)
            .with_target("fiber", 30.0);
        agg.apply_goal(&goal);

        assert_eq!(agg.remaining["calories"], 1500.0);
        // goal nutrient never consumed: full target remains
        assert_eq!(agg.remaining["fiber"], 30.0);
        // consumed nutrient without a target has no remaining entry
        assert!(!agg.remaining.contains_key("protein"));
    }
}
