use clap::{Args, Subcommand};

use crate::diary::DiaryStore;
use crate::index::FoodIndex;
use crate::models::MealSlot;
use crate::resolver::{RawRecognition, RecognitionCandidate, Resolver};

#[derive(Args)]
pub struct LogCommand {
    #[command(subcommand)]
    pub command: LogSubcommand,
}

#[derive(Subcommand)]
pub enum LogSubcommand {
    /// Log a food by scanned barcode
    Barcode {
        /// The barcode string
        code: String,

        #[command(flatten)]
        entry: EntryArgs,
    },

    /// Log a food from image classifier labels
    Photo {
        /// Classifier guess as name=score (can be repeated, best first)
        #[arg(long = "label", value_name = "NAME=SCORE", required = true)]
        labels: Vec<String>,

        #[command(flatten)]
        entry: EntryArgs,

        /// Candidate to commit (1-based rank; omit to list candidates only)
        #[arg(long)]
        pick: Option<usize>,
    },

    /// Log a food by free-text search
    Search {
        /// Search text
        query: String,

        #[command(flatten)]
        entry: EntryArgs,

        /// Candidate to commit (1-based rank; omit to list candidates only)
        #[arg(long)]
        pick: Option<usize>,
    },
}

#[derive(Args)]
pub struct EntryArgs {
    /// Number of servings
    #[arg(long, short, default_value_t = 1.0)]
    pub servings: f64,

    /// Meal slot: breakfast, lunch, dinner, or snack
    #[arg(long, short, default_value = "snack")]
    pub meal: MealSlot,
}

impl LogCommand {
    pub async fn run(
        &self,
        index: &mut FoodIndex,
        store: &DiaryStore,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            LogSubcommand::Barcode { code, entry } => {
                let raw = RawRecognition::Barcode(code.clone());
                // A barcode hit is unambiguous, commit it directly.
                commit_pick(index, store, &raw, Some(1), entry).await
            }
            LogSubcommand::Photo {
                labels,
                entry,
                pick,
            } => {
                let labels = labels
                    .iter()
                    .map(|pair| parse_label(pair))
                    .collect::<Result<Vec<_>, _>>()?;
                let raw = RawRecognition::Image(labels);
                commit_pick(index, store, &raw, *pick, entry).await
            }
            LogSubcommand::Search { query, entry, pick } => {
                let raw = RawRecognition::Query(query.clone());
                commit_pick(index, store, &raw, *pick, entry).await
            }
        }
    }
}

async fn commit_pick(
    index: &mut FoodIndex,
    store: &DiaryStore,
    raw: &RawRecognition,
    pick: Option<usize>,
    entry: &EntryArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut resolver = Resolver::new(index, store);
    let candidates = resolver.resolve(raw)?;
    if candidates.is_empty() {
        println!("No matches found.");
        return Ok(());
    }

    print_candidates(&candidates);

    let Some(pick) = pick else {
        println!("\nRe-run with --pick N to log one of these.");
        return Ok(());
    };
    let candidate = candidates
        .get(pick.saturating_sub(1))
        .ok_or_else(|| format!("--pick {} is out of range (1..={})", pick, candidates.len()))?;

    let mutation_id = resolver
        .commit(candidate, entry.servings, entry.meal)
        .await?;
    println!(
        "\nLogged {} x{} for {} ({})",
        candidate.name, entry.servings, entry.meal, mutation_id
    );
    Ok(())
}

fn print_candidates(candidates: &[RecognitionCandidate]) {
    for (i, candidate) in candidates.iter().enumerate() {
        println!(
            "{:>2}. {}  ({:.0}%, {})",
            i + 1,
            candidate.name,
            candidate.confidence * 100.0,
            candidate.reason
        );
    }
}

fn parse_label(pair: &str) -> Result<(String, f64), Box<dyn std::error::Error>> {
    let (name, score) = pair
        .split_once('=')
        .ok_or_else(|| format!("Expected NAME=SCORE, got '{}'", pair))?;
    let score: f64 = score
        .parse()
        .map_err(|_| format!("Invalid label score '{}'", score))?;
    if !(0.0..=1.0).contains(&score) {
        return Err(format!("Label score must be in 0..=1, got {}", score).into());
    }
    Ok((name.to_string(), score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("salad=0.9").unwrap(),
            ("salad".to_string(), 0.9)
        );
        assert!(parse_label("salad").is_err());
        assert!(parse_label("salad=1.5").is_err());
    }
}
