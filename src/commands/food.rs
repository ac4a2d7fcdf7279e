use clap::{Args, Subcommand};

use crate::index::FoodIndex;
use crate::models::NutritionRecord;

#[derive(Args)]
pub struct FoodCommand {
    #[command(subcommand)]
    pub command: FoodSubcommand,
}

#[derive(Subcommand)]
pub enum FoodSubcommand {
    /// Add a food record to the nutrition database
    Add {
        /// Food name
        name: String,

        /// Serving size (numeric, in the serving unit)
        #[arg(long, default_value_t = 100.0)]
        serving_size: f64,

        /// Serving unit (g, ml, piece, ...)
        #[arg(long, default_value = "g")]
        serving_unit: String,

        /// Brand name
        #[arg(long)]
        brand: Option<String>,

        /// Barcode (can be repeated)
        #[arg(long = "barcode", value_name = "CODE")]
        barcodes: Vec<String>,

        /// Nutrient per serving as name=amount (can be repeated)
        #[arg(long = "nutrient", value_name = "NAME=AMOUNT")]
        nutrients: Vec<String>,
    },

    /// List all foods in the database
    List,

    /// Search foods by text
    Search {
        query: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

impl FoodCommand {
    pub async fn run(&self, index: &mut FoodIndex) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            FoodSubcommand::Add {
                name,
                serving_size,
                serving_unit,
                brand,
                barcodes,
                nutrients,
            } => {
                let mut record = NutritionRecord::new(name, *serving_size, serving_unit);
                if let Some(brand) = brand {
                    record = record.with_brand(brand);
                }
                for code in barcodes {
                    record = record.with_barcode(code);
                }
                for pair in nutrients {
                    let (nutrient, amount) = parse_nutrient(pair)?;
                    record = record.with_nutrient(nutrient, amount);
                }

                let stored = index.upsert(record).await?;
                println!("Added '{}' (id {}, v{})", stored.name, stored.id, stored.version);
                Ok(())
            }
            FoodSubcommand::List => {
                if index.is_empty() {
                    println!("No foods in the database yet.");
                    return Ok(());
                }
                let mut records: Vec<_> = index.iter_latest().collect();
                records.sort_by(|a, b| a.name.cmp(&b.name));
                for record in records {
                    println!("{}  [{}]", record, record.id);
                }
                Ok(())
            }
            FoodSubcommand::Search { query, limit } => {
                let results = index.search(query, *limit);
                if results.is_empty() {
                    println!("No foods match '{}'.", query);
                    return Ok(());
                }
                for (record, score) in results {
                    println!("{:.2}  {}  [{}]", score, record, record.id);
                }
                Ok(())
            }
        }
    }
}

fn parse_nutrient(pair: &str) -> Result<(String, f64), Box<dyn std::error::Error>> {
    let (name, amount) = pair
        .split_once('=')
        .ok_or_else(|| format!("Expected NAME=AMOUNT, got '{}'", pair))?;
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("Invalid nutrient amount '{}'", amount))?;
    Ok((name.to_string(), amount))
}
