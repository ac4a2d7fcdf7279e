use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::diary::{DiaryEntry, DiaryStore};
use crate::index::FoodIndex;
use crate::models::{DiaryMutation, MealSlot};

#[derive(Args)]
pub struct DiaryCommand {
    #[command(subcommand)]
    pub command: DiarySubcommand,
}

#[derive(Subcommand)]
pub enum DiarySubcommand {
    /// Show diary entries for a date or range
    Show {
        /// Date to show (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Range start (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Range end (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// Edit an entry's servings or meal slot
    Edit {
        /// Entry id (shown by `diary show`)
        id: Uuid,

        /// New serving count
        #[arg(long)]
        servings: Option<f64>,

        /// New meal slot
        #[arg(long)]
        meal: Option<MealSlot>,
    },

    /// Remove an entry
    Remove {
        /// Entry id (shown by `diary show`)
        id: Uuid,
    },
}

impl DiaryCommand {
    pub async fn run(
        &self,
        store: &DiaryStore,
        index: &FoodIndex,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            DiarySubcommand::Show { date, from, to } => {
                let (from, to) = match (date, from, to) {
                    (_, Some(from), Some(to)) => (*from, *to),
                    (Some(date), _, _) => (*date, *date),
                    _ => {
                        let today = Local::now().date_naive();
                        (today, today)
                    }
                };
                if from > to {
                    return Err(format!("--from {} is after --to {}", from, to).into());
                }

                let entries = store.read(from, to).await;
                if entries.is_empty() {
                    println!("No diary entries between {} and {}.", from, to);
                    return Ok(());
                }
                let mut current_date = None;
                for entry in &entries {
                    let date = entry.item.date();
                    if current_date != Some(date) {
                        println!("{}", date);
                        current_date = Some(date);
                    }
                    print_entry(entry, index);
                }
                Ok(())
            }
            DiarySubcommand::Edit { id, servings, meal } => {
                if servings.is_none() && meal.is_none() {
                    return Err("Nothing to change; pass --servings and/or --meal".into());
                }
                if let Some(servings) = servings {
                    if !servings.is_finite() || *servings <= 0.0 {
                        return Err(format!("Servings must be positive, got {}", servings).into());
                    }
                }
                if store.entry(*id).await.is_none() {
                    return Err(format!("No diary entry with id {}", id).into());
                }

                store
                    .append(DiaryMutation::edit(*id, *servings, *meal, Utc::now()))
                    .await?;
                println!("Updated entry {}", id);
                Ok(())
            }
            DiarySubcommand::Remove { id } => {
                if store.entry(*id).await.is_none() {
                    return Err(format!("No diary entry with id {}", id).into());
                }
                store.append(DiaryMutation::remove(*id, Utc::now())).await?;
                println!("Removed entry {}", id);
                Ok(())
            }
        }
    }
}

fn print_entry(entry: &DiaryEntry, index: &FoodIndex) {
    let name = index
        .version(entry.item.record_id, entry.item.record_version)
        .or_else(|| index.latest(entry.item.record_id))
        .map(|r| r.name.clone())
        .unwrap_or_else(|| format!("<unknown food {}>", entry.item.record_id));
    println!(
        "  {:<9} {} x{}  [{}]",
        format!("{}:", entry.item.meal_slot),
        name,
        entry.item.servings,
        entry.entry_id
    );
}
