//! Remote store transport.
//!
//! The sync engine only sees the [`RemoteStore`] trait. `HttpRemote` talks
//! to a real server over JSON; `MemoryRemote` is an in-process remote used
//! in tests and as a loopback target, with failure injection for exercising
//! the flush retry paths.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use super::protocol::{PushRequest, PushResponse, WireMutation};

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Could not reach the remote at all. Retried on the next flush.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The remote took too long. Retried on the next flush.
    #[error("remote request timed out")]
    Timeout,

    /// The remote answered but refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, RemoteError>;
}

/// HTTP transport for the batch protocol.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn sync_url(&self) -> String {
        format!("{}/v1/sync", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, RemoteError> {
        let mut builder = self.client.post(self.sync_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Unreachable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(RemoteError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RemoteError::Rejected(format!("bad response body: {}", e)))
    }
}

/// In-process remote holding an append-only mutation log.
///
/// Accepts are idempotent on mutation id: re-pushing a known mutation is
/// acknowledged without appending a second copy.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    log: Vec<WireMutation>,
    known: HashSet<Uuid>,
    offline: bool,
    accept_limit: Option<usize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate connectivity loss: pushes fail with `Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Accept at most `limit` mutations per push, leaving the rest
    /// unacknowledged. `None` restores normal behavior.
    pub fn set_accept_limit(&self, limit: Option<usize>) {
        self.state.lock().unwrap().accept_limit = limit;
    }

    /// Write a mutation into the remote log directly, as another device
    /// would have.
    pub fn seed(&self, mutation: WireMutation) {
        let mut state = self.state.lock().unwrap();
        if state.known.insert(mutation.mutation_id) {
            state.log.push(mutation);
        }
    }

    pub fn log_len(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    pub fn mutations(&self) -> Vec<WireMutation> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(RemoteError::Unreachable("offline".into()));
        }

        // Snapshot what the client is missing before appending its own
        // mutations, so it never gets its push echoed back.
        let start = (request.since_cursor.max(0) as usize).min(state.log.len());
        let remote_mutations_since: Vec<WireMutation> = state.log[start..].to_vec();

        let limit = state.accept_limit.unwrap_or(usize::MAX);
        let mut accepted_ids = Vec::new();
        for mutation in request.mutations.into_iter().take(limit) {
            accepted_ids.push(mutation.mutation_id);
            if state.known.insert(mutation.mutation_id) {
                state.log.push(mutation);
            }
        }

        Ok(PushResponse {
            accepted_ids,
            remote_mutations_since,
            new_cursor: state.log.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiaryMutation, MealSlot, ResolvedItem};
    use chrono::{TimeZone, Utc};

    fn wire_at(hour: u32) -> WireMutation {
        WireMutation::from_local(&DiaryMutation::add(ResolvedItem::new(
            Uuid::new_v4(),
            1,
            1.0,
            MealSlot::Lunch,
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
        )))
    }

    #[tokio::test]
    async fn test_push_accepts_and_returns_cursor() {
        let remote = MemoryRemote::new();
        let a = wire_at(8);
        let b = wire_at(9);

        let response = remote
            .push(PushRequest {
                since_cursor: 0,
                mutations: vec![a.clone(), b.clone()],
            })
            .await
            .unwrap();

        assert_eq!(response.accepted_ids, vec![a.mutation_id, b.mutation_id]);
        assert_eq!(response.new_cursor, 2);
        assert!(response.remote_mutations_since.is_empty());
    }

    #[tokio::test]
    async fn test_repush_is_idempotent() {
        let remote = MemoryRemote::new();
        let a = wire_at(8);

        for _ in 0..2 {
            let response = remote
                .push(PushRequest {
                    since_cursor: 0,
                    mutations: vec![a.clone()],
                })
                .await
                .unwrap();
            assert_eq!(response.accepted_ids, vec![a.mutation_id]);
        }
        assert_eq!(remote.log_len(), 1);
    }

    #[tokio::test]
    async fn test_seeded_mutations_returned_after_cursor() {
        let remote = MemoryRemote::new();
        let seeded = wire_at(7);
        remote.seed(seeded.clone());

        let response = remote
            .push(PushRequest {
                since_cursor: 0,
                mutations: vec![],
            })
            .await
            .unwrap();
        assert_eq!(response.remote_mutations_since, vec![seeded]);
        assert_eq!(response.new_cursor, 1);

        // already acknowledged: nothing new past the cursor
        let response = remote
            .push(PushRequest {
                since_cursor: response.new_cursor,
                mutations: vec![],
            })
            .await
            .unwrap();
        assert!(response.remote_mutations_since.is_empty());
    }

    #[tokio::test]
    async fn test_offline_fails_unreachable() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let result = remote
            .push(PushRequest {
                since_cursor: 0,
                mutations: vec![],
            })
            .await;
        assert!(matches!(result, Err(RemoteError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_accept_limit_acknowledges_prefix_only() {
        let remote = MemoryRemote::new();
        remote.set_accept_limit(Some(1));
        let a = wire_at(8);
        let b = wire_at(9);

        let response = remote
            .push(PushRequest {
                since_cursor: 0,
                mutations: vec![a.clone(), b],
            })
            .await
            .unwrap();
        assert_eq!(response.accepted_ids, vec![a.mutation_id]);
        assert_eq!(remote.log_len(), 1);
    }
}
