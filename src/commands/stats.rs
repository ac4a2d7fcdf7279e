use chrono::{Local, NaiveDate};
use clap::Args;

use crate::config::Config;
use crate::diary::DiaryStore;
use crate::index::FoodIndex;

#[derive(Args)]
pub struct StatsCommand {
    /// Date to summarize (YYYY-MM-DD, default: today)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

impl StatsCommand {
    pub async fn run(
        &self,
        store: &DiaryStore,
        index: &FoodIndex,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        let aggregate = store.aggregate(date, index, &config.goal).await;

        println!(
            "{}: {} {}",
            date,
            aggregate.entry_count,
            if aggregate.entry_count == 1 {
                "entry"
            } else {
                "entries"
            }
        );
        for (nutrient, total) in &aggregate.nutrients {
            match aggregate.remaining.get(nutrient) {
                Some(remaining) => {
                    let target = config.goal.daily_targets.get(nutrient).copied().unwrap_or(0.0);
                    println!(
                        "  {:<12} {:>8.1} / {:.0}  ({:.1} remaining)",
                        nutrient, total, target, remaining
                    );
                }
                None => println!("  {:<12} {:>8.1}", nutrient, total),
            }
        }
        // Targets with no intake yet still show as fully remaining
        for (nutrient, target) in &config.goal.daily_targets {
            if !aggregate.nutrients.contains_key(nutrient) {
                println!(
                    "  {:<12} {:>8.1} / {:.0}  ({:.1} remaining)",
                    nutrient, 0.0, target, target
                );
            }
        }
        Ok(())
    }
}
