use clap::{Args, Subcommand, ValueEnum};

use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective configuration
    Show {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(config)?);
                    Ok(())
                }
                OutputFormat::Text => {
                    println!("Config file:   {}", Config::default_config_path().display());
                    println!("Database:      {}", config.database_path.display());
                    match &config.sync.server_url {
                        Some(url) => {
                            println!("Sync server:   {}", url);
                            println!(
                                "Sync API key:  {}",
                                if config.sync.api_key.is_some() {
                                    "(set)"
                                } else {
                                    "(not set)"
                                }
                            );
                            println!("Sync interval: {} minute(s)", config.sync.interval_minutes());
                            println!("Batch size:    {}", config.sync.batch_size());
                        }
                        None => println!("Sync:          not configured"),
                    }
                    if config.goal.daily_targets.is_empty() {
                        println!("Goal:          no daily targets");
                    } else {
                        println!("Goal:");
                        for (nutrient, target) in &config.goal.daily_targets {
                            println!("  {:<12} {:.0}", nutrient, target);
                        }
                    }
                    Ok(())
                }
            },
        }
    }
}
