use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::SyncAgent;
use crate::config::Config;
use crate::diary::{DiaryStore, LoadReport};
use crate::models::DiaryMutation;
use crate::sync::{HttpRemote, SyncEngine};

#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub command: SyncSubcommand,
}

#[derive(Subcommand)]
pub enum SyncSubcommand {
    /// Flush pending mutations and ingest remote ones
    Now,

    /// Show pending/conflicted counts and the last sync time
    Status,

    /// List mutations that lost a conflict
    Conflicts,

    /// Replay a conflicted mutation as a fresh pending one
    Restore {
        /// Mutation id (shown by `sync conflicts`)
        id: Uuid,
    },

    /// Run the background agent until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &DiaryStore,
        pool: &SqlitePool,
        config: &Config,
        report: &LoadReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SyncSubcommand::Now => {
                let engine = self.engine(store, pool, config)?;
                if report.needs_resync() {
                    println!(
                        "Local log had {} corrupt row(s); re-ingesting the full remote log.",
                        report.corrupt
                    );
                    engine.reset_cursor().await?;
                }
                let outcome = engine.flush().await?;
                println!(
                    "Pushed {} mutation(s), ingested {} remote, {} new conflict(s).",
                    outcome.pushed, outcome.ingested, outcome.conflicts
                );
                Ok(())
            }
            SyncSubcommand::Status => {
                let engine = self.engine(store, pool, config)?;
                let status = engine.status().await?;
                println!("Pending:    {}", status.pending_count);
                println!("Conflicted: {}", status.conflicted_count);
                match status.last_sync_at {
                    Some(at) => println!("Last sync:  {}", at.to_rfc3339()),
                    None => println!("Last sync:  never"),
                }
                Ok(())
            }
            SyncSubcommand::Conflicts => {
                let conflicted = store.conflicted().await;
                if conflicted.is_empty() {
                    println!("No conflicts.");
                    return Ok(());
                }
                for mutation in &conflicted {
                    print_conflict(mutation);
                }
                println!("\nRe-apply one with `sync restore <id>`.");
                Ok(())
            }
            SyncSubcommand::Restore { id } => {
                let new_id = store.reinstate(*id).await?;
                println!("Replayed {} as pending mutation {}", id, new_id);
                Ok(())
            }
            SyncSubcommand::Watch => {
                let engine = self.engine(store, pool, config)?;
                if report.needs_resync() {
                    engine.reset_cursor().await?;
                }
                let interval = Duration::from_secs(config.sync.interval_minutes() * 60);
                let agent = SyncAgent::spawn(engine, interval);
                println!(
                    "Syncing every {} minute(s). Press Ctrl-C to stop.",
                    config.sync.interval_minutes()
                );

                tokio::signal::ctrl_c().await?;
                agent.shutdown().await;
                Ok(())
            }
        }
    }

    fn engine(
        &self,
        store: &DiaryStore,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<SyncEngine<HttpRemote>, Box<dyn std::error::Error>> {
        let Some(server_url) = &config.sync.server_url else {
            return Err(
                "Sync is not configured; set sync.server_url in the config file \
                 or NUTRILOG_SERVER_URL"
                    .into(),
            );
        };
        let remote = HttpRemote::new(server_url.clone(), config.sync.api_key.clone());
        Ok(SyncEngine::new(store.clone(), remote.into(), pool.clone())
            .with_batch_size(config.sync.batch_size()))
    }
}

fn print_conflict(mutation: &DiaryMutation) {
    println!(
        "{}  {}  at {}",
        mutation.mutation_id,
        mutation.kind.tag(),
        mutation.client_timestamp.to_rfc3339()
    );
}
