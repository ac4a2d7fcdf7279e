use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::meal_slot::MealSlot;
use super::resolved_item::ResolvedItem;

/// Sync lifecycle of a mutation.
///
/// `pending -> synced`, or `pending -> conflicted` when the mutation lost a
/// conflict. Conflicted mutations stay in the log for manual recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
    Conflicted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Pending => write!(f, "pending"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Conflicted => write!(f, "conflicted"),
        }
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncState::Pending),
            "synced" => Ok(SyncState::Synced),
            "conflicted" => Ok(SyncState::Conflicted),
            _ => Err(format!("Invalid sync state '{}'", s)),
        }
    }
}

/// What a mutation does to the diary.
///
/// Edits and removals reference a prior mutation id instead of rewriting
/// anything in place, which keeps the log replayable and sync-safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MutationKind {
    Add {
        item: ResolvedItem,
    },
    Edit {
        target: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        servings: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        meal_slot: Option<MealSlot>,
    },
    Remove {
        target: Uuid,
    },
}

impl MutationKind {
    /// Short tag used in the persisted `kind` column.
    pub fn tag(&self) -> &'static str {
        match self {
            MutationKind::Add { .. } => "add",
            MutationKind::Edit { .. } => "edit",
            MutationKind::Remove { .. } => "remove",
        }
    }
}

/// An immutable, append-only diary event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiaryMutation {
    pub mutation_id: Uuid,
    pub kind: MutationKind,
    pub client_timestamp: DateTime<Utc>,
    pub sync_state: SyncState,
}

impl DiaryMutation {
    pub fn add(item: ResolvedItem) -> Self {
        let client_timestamp = item.timestamp;
        Self {
            mutation_id: Uuid::new_v4(),
            kind: MutationKind::Add { item },
            client_timestamp,
            sync_state: SyncState::Pending,
        }
    }

    pub fn edit(
        target: Uuid,
        servings: Option<f64>,
        meal_slot: Option<MealSlot>,
        client_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            kind: MutationKind::Edit {
                target,
                servings,
                meal_slot,
            },
            client_timestamp,
            sync_state: SyncState::Pending,
        }
    }

    pub fn remove(target: Uuid, client_timestamp: DateTime<Utc>) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            kind: MutationKind::Remove { target },
            client_timestamp,
            sync_state: SyncState::Pending,
        }
    }

    /// Integrity checksum over the immutable parts of the mutation.
    ///
    /// Excludes `sync_state`, which is the one field allowed to change
    /// after the row is written.
    pub fn checksum(&self) -> String {
        use sha2::{Digest, Sha256};

        let payload = serde_json::to_string(&self.kind).expect("mutation kind serializes");
        let mut hasher = Sha256::new();
        hasher.update(self.mutation_id.as_bytes());
        hasher.update(b":");
        hasher.update(payload.as_bytes());
        hasher.update(b":");
        hasher.update(self.client_timestamp.to_rfc3339().as_bytes());
        let hash = hasher.finalize();
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Replay ordering key: timestamp first, mutation id breaks ties.
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.client_timestamp, self.mutation_id)
    }
}
