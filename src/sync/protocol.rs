//! Batch protocol types for diary synchronization.
//!
//! One exchange: the client pushes its pending mutations with the cursor
//! it last saw, the remote answers with the ids it accepted, the remote
//! mutations the client has not seen, and the new cursor. Field names use
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DiaryMutation, MutationKind, SyncState};

/// A mutation as it travels over the wire. Sync state is a local concern
/// and never leaves the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireMutation {
    pub mutation_id: Uuid,
    #[serde(flatten)]
    pub kind: MutationKind,
    pub client_timestamp: DateTime<Utc>,
}

impl WireMutation {
    pub fn from_local(mutation: &DiaryMutation) -> Self {
        Self {
            mutation_id: mutation.mutation_id,
            kind: mutation.kind.clone(),
            client_timestamp: mutation.client_timestamp,
        }
    }

    pub fn into_local(self, sync_state: SyncState) -> DiaryMutation {
        DiaryMutation {
            mutation_id: self.mutation_id,
            kind: self.kind,
            client_timestamp: self.client_timestamp,
            sync_state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub since_cursor: i64,
    pub mutations: Vec<WireMutation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub accepted_ids: Vec<Uuid>,
    pub remote_mutations_since: Vec<WireMutation>,
    pub new_cursor: i64,
}
