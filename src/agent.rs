//! Background sync agent.
//!
//! A long-lived task decoupled from any single CLI invocation or UI
//! session. It flushes on connectivity-regained events and on a bounded
//! periodic timer while online, and publishes sync status counts for
//! observers. It holds no diary logic of its own.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::sync::{RemoteStore, SyncEngine, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

enum Command {
    Connectivity(ConnectivityEvent),
    Shutdown,
}

pub struct SyncAgent {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    handle: JoinHandle<()>,
}

impl SyncAgent {
    /// Start the agent. It assumes connectivity until told otherwise and
    /// flushes every `interval` while online.
    pub fn spawn<R: RemoteStore + 'static>(engine: SyncEngine<R>, interval: Duration) -> Self {
        let (commands, rx) = mpsc::channel(16);
        let (status_tx, status) = watch::channel(SyncStatus {
            pending_count: 0,
            conflicted_count: 0,
            last_sync_at: None,
        });

        let handle = tokio::spawn(run(engine, interval, rx, status_tx));
        Self {
            commands,
            status,
            handle,
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Watch channel for observers that want pushed updates.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub async fn notify(&self, event: ConnectivityEvent) {
        let _ = self.commands.send(Command::Connectivity(event)).await;
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.handle.await;
    }
}

async fn run<R: RemoteStore>(
    engine: SyncEngine<R>,
    interval: Duration,
    mut commands: mpsc::Receiver<Command>,
    status: watch::Sender<SyncStatus>,
) {
    let mut online = true;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // consume the immediate first tick; the startup flush happens below
    ticker.tick().await;

    flush_and_publish(&engine, &status).await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connectivity(ConnectivityEvent::Online)) => {
                    tracing::info!("connectivity regained, flushing");
                    online = true;
                    flush_and_publish(&engine, &status).await;
                }
                Some(Command::Connectivity(ConnectivityEvent::Offline)) => {
                    tracing::info!("connectivity lost, pausing sync");
                    online = false;
                    publish(&engine, &status).await;
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = ticker.tick() => {
                if online {
                    flush_and_publish(&engine, &status).await;
                }
            }
        }
    }
}

async fn flush_and_publish<R: RemoteStore>(engine: &SyncEngine<R>, status: &watch::Sender<SyncStatus>) {
    match engine.flush().await {
        Ok(outcome) => {
            tracing::debug!(pushed = outcome.pushed, ingested = outcome.ingested, "agent flush");
        }
        Err(Error::TransientSyncFailure(reason)) => {
            tracing::warn!(%reason, "agent flush failed, will retry");
        }
        Err(e) => {
            tracing::error!(error = %e, "agent flush error");
        }
    }
    publish(engine, status).await;
}

async fn publish<R: RemoteStore>(engine: &SyncEngine<R>, status: &watch::Sender<SyncStatus>) {
    if let Ok(snapshot) = engine.status().await {
        let _ = status.send(snapshot);
    }
}
