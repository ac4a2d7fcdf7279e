//! Error taxonomy shared across the crate.
//!
//! Local diary writes never fail for connectivity reasons; only validation
//! and storage errors can reject an append. Sync failures are transient and
//! retried, never surfaced as data loss.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the nutrilog core.
#[derive(Error, Debug)]
pub enum Error {
    /// A barcode or record id did not match anything in the index.
    #[error("not found")]
    NotFound,

    /// Input rejected before any write happened.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The remote store was unreachable or timed out; retried on next flush.
    #[error("transient sync failure: {0}")]
    TransientSyncFailure(String),

    /// Two mutations diverged on the same logical entry. The loser is kept
    /// with sync state `conflicted` so it can be recovered manually.
    #[error("conflict on entry: winner {winner}, loser {loser} retained")]
    Conflict { winner: Uuid, loser: Uuid },

    /// The local mutation log failed its integrity check on load.
    #[error("corrupt local state: {0}")]
    CorruptLocalState(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
