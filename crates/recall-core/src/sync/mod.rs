//! Multi-device synchronization
//!
//! The engine pulls the full local snapshot, downloads the remote payload,
//! resolves conflicts record by record (last-write-wins with deletion
//! tombstones), applies the merged result locally, and re-uploads when the
//! remote is stale. See [`engine::SyncEngine`] for the orchestration entry
//! points and [`merge::resolve_conflicts`] for the algorithm.

mod config;
mod engine;
mod merge;
mod provider;
mod sanitize;

pub use config::{load_or_create_device_id, SyncConfig, DEFAULT_SYNC_INTERVAL_MS};
pub use engine::{
    build_local_snapshot, ListenerId, RefreshHook, SyncDirection, SyncEngine, SyncEvent,
    SyncOutcome, DEFAULT_DEBOUNCE_MS,
};
pub use merge::{merge_tombstones, resolve_conflicts};
pub use provider::{FileProvider, HttpProvider, MemoryProvider, RemoteProvider};
pub use sanitize::{sanitize_for_upload, MAX_HISTORY_ENTRIES, MAX_STRING_FIELD_LEN};
