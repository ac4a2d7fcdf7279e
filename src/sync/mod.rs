//! Synchronization of the local mutation log with a remote store.

mod cursor;
mod engine;
mod protocol;
mod remote;

pub use cursor::{CursorState, SyncCursor};
pub use engine::{FlushOutcome, SyncEngine, SyncStatus, DEFAULT_BATCH_SIZE};
pub use protocol::{PushRequest, PushResponse, WireMutation};
pub use remote::{HttpRemote, MemoryRemote, RemoteError, RemoteStore};
