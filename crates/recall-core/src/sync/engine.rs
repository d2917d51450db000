//! Sync orchestration
//!
//! One engine instance owns the sync lifecycle: the in-flight guard, the
//! recurring auto-sync timer, the debounce timer mutation call-sites use,
//! the event channel, and the apply/upload halves of a cycle. The engine is
//! a cheap clonable handle; timers hold clones of it.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::models::{Collection, RecordId, SnapshotData, SyncSnapshot};
use crate::store::LocalStore;
use crate::util::now_ms;

use super::config::{load_or_create_device_id, SyncConfig};
use super::merge::resolve_conflicts;
use super::provider::RemoteProvider;
use super::sanitize::sanitize_for_upload;

/// Default debounce delay for [`SyncEngine::schedule_sync`], in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Which way data moved during a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
    Bidirectional,
    None,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Bidirectional => "bidirectional",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Structured result of one sync cycle. `sync()` never returns an error;
/// failures are reported here and on the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub direction: SyncDirection,
    pub has_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    fn completed(direction: SyncDirection, has_changes: bool) -> Self {
        Self {
            success: true,
            direction,
            has_changes,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            direction: SyncDirection::None,
            has_changes: false,
            error: Some(error.into()),
        }
    }
}

/// Events emitted on the engine's notification channel.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A new remote provider was attached
    ProviderChanged { provider: String },
    /// Auto-sync was enabled
    AutoSyncStarted,
    /// Auto-sync was stopped
    AutoSyncStopped,
    /// Sync was disabled entirely
    SyncDisabled,
    /// A sync cycle began
    SyncStarted,
    /// A sync cycle finished
    SyncCompleted {
        direction: SyncDirection,
        has_changes: bool,
    },
    /// A sync cycle failed
    SyncError { error: String },
}

impl SyncEvent {
    /// Stable wire name of the event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProviderChanged { .. } => "provider-changed",
            Self::AutoSyncStarted => "sync-started",
            Self::AutoSyncStopped => "sync-stopped",
            Self::SyncDisabled => "sync-disabled",
            Self::SyncStarted => "sync-start",
            Self::SyncCompleted { .. } => "sync-complete",
            Self::SyncError { .. } => "sync-error",
        }
    }
}

/// Handle returned by [`SyncEngine::add_listener`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Best-effort UI refresh callback invoked after merged data is applied
/// locally. Failures are logged and swallowed; they never fail a cycle.
pub type RefreshHook = Box<dyn Fn(&SnapshotData) -> Result<()> + Send + Sync>;

type Listener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

struct EngineInner {
    store: Arc<dyn LocalStore>,
    provider: RwLock<Option<Arc<dyn RemoteProvider>>>,
    is_syncing: AtomicBool,
    enabled: AtomicBool,
    auto_sync: AtomicBool,
    interval_ms: AtomicU64,
    debounce_ms: AtomicU64,
    auto_task: Mutex<Option<JoinHandle<()>>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    hooks: Mutex<Vec<RefreshHook>>,
}

/// Resets the in-flight flag even when a cycle unwinds.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The multi-device sync orchestrator.
///
/// Constructed with the local store capability; a remote provider is
/// attached separately so the app can swap backends. Clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over the given local store, with no provider yet.
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                provider: RwLock::new(None),
                is_syncing: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                auto_sync: AtomicBool::new(false),
                interval_ms: AtomicU64::new(super::config::DEFAULT_SYNC_INTERVAL_MS),
                debounce_ms: AtomicU64::new(DEFAULT_DEBOUNCE_MS),
                auto_task: Mutex::new(None),
                debounce_task: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an engine with a provider already attached.
    #[must_use]
    pub fn with_provider(store: Arc<dyn LocalStore>, provider: Arc<dyn RemoteProvider>) -> Self {
        let engine = Self::new(store);
        engine.set_provider(provider);
        engine
    }

    /// Attach (or replace) the remote provider.
    pub fn set_provider(&self, provider: Arc<dyn RemoteProvider>) {
        let name = provider.name().to_string();
        if let Ok(mut slot) = self.inner.provider.write() {
            *slot = Some(provider);
        }
        self.emit(&SyncEvent::ProviderChanged { provider: name });
    }

    /// The currently attached provider, if any.
    #[must_use]
    pub fn provider(&self) -> Option<Arc<dyn RemoteProvider>> {
        self.inner
            .provider
            .read()
            .ok()
            .and_then(|slot| slot.clone())
    }

    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider().is_some()
    }

    /// Whether a cycle is currently running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.is_syncing.load(Ordering::SeqCst)
    }

    /// Subscribe to engine events. Listener panics are caught and logged.
    pub fn add_listener(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, Box::new(listener)));
        }
        id
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    /// Register a UI refresh hook run after each local apply.
    pub fn register_refresh_hook(&self, hook: RefreshHook) {
        if let Ok(mut hooks) = self.inner.hooks.lock() {
            hooks.push(hook);
        }
    }

    /// Override the debounce delay used by [`Self::schedule_sync`].
    pub fn set_debounce_ms(&self, debounce_ms: u64) {
        self.inner.debounce_ms.store(debounce_ms, Ordering::SeqCst);
    }

    /// Load the persisted configuration and adopt its flags.
    pub async fn load_config(&self) -> Result<SyncConfig> {
        let config = SyncConfig::load(&*self.inner.store).await?;
        self.adopt_flags(&config);
        Ok(config)
    }

    /// Enable sync and auto-sync, run one cycle immediately, then arm the
    /// recurring timer. Fails fast when no provider is attached.
    pub async fn start_auto_sync(&self) -> Result<SyncOutcome> {
        if !self.has_provider() {
            return Err(Error::ProviderNotConfigured);
        }

        let mut config = self.load_config().await?;
        config.enabled = true;
        config.auto_sync = true;
        self.store_config(&config).await?;
        self.emit(&SyncEvent::AutoSyncStarted);

        let outcome = self.sync().await;

        let engine = self.clone();
        let interval = Duration::from_millis(self.inner.interval_ms.load(Ordering::SeqCst).max(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick; the sync above already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !engine.inner.auto_sync.load(Ordering::SeqCst) {
                    break;
                }
                if engine.inner.is_syncing.load(Ordering::SeqCst) {
                    continue;
                }
                engine.sync().await;
            }
        });
        self.replace_auto_task(Some(task));

        Ok(outcome)
    }

    /// Disarm the auto-sync timer and persist `autoSync = false`. Does not
    /// run a final sync.
    pub async fn stop_auto_sync(&self) -> Result<()> {
        self.replace_auto_task(None);
        let mut config = self.load_config().await?;
        config.auto_sync = false;
        self.store_config(&config).await?;
        self.emit(&SyncEvent::AutoSyncStopped);
        Ok(())
    }

    /// Stop auto-sync and clear the master enabled flag.
    pub async fn disable_sync(&self) -> Result<()> {
        self.replace_auto_task(None);
        let mut config = self.load_config().await?;
        config.auto_sync = false;
        config.enabled = false;
        self.store_config(&config).await?;
        self.emit(&SyncEvent::SyncDisabled);
        Ok(())
    }

    /// Debounced sync trigger for mutation call-sites: (re)arms a one-shot
    /// timer; bursts of edits collapse into a single cycle. The sync fires
    /// only if the engine is enabled, has a provider, and is idle.
    pub fn schedule_sync(&self) {
        let engine = self.clone();
        let delay = Duration::from_millis(self.inner.debounce_ms.load(Ordering::SeqCst));
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !engine.inner.enabled.load(Ordering::SeqCst)
                || !engine.has_provider()
                || engine.inner.is_syncing.load(Ordering::SeqCst)
            {
                return;
            }
            engine.sync().await;
        });

        if let Ok(mut slot) = self.inner.debounce_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    /// Run one full sync cycle. Concurrent calls are rejected, not queued.
    pub async fn sync(&self) -> SyncOutcome {
        if self
            .inner
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SyncOutcome::failed("Sync in progress");
        }
        let _in_flight = InFlight(&self.inner.is_syncing);

        self.emit(&SyncEvent::SyncStarted);
        match self.run_cycle().await {
            Ok((direction, has_changes)) => {
                if let Err(error) = self.touch_last_sync().await {
                    tracing::warn!("Failed to persist last sync time: {error}");
                }
                tracing::debug!(%direction, has_changes, "sync cycle complete");
                self.emit(&SyncEvent::SyncCompleted {
                    direction,
                    has_changes,
                });
                SyncOutcome::completed(direction, has_changes)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!("Sync cycle failed: {message}");
                self.emit(&SyncEvent::SyncError {
                    error: message.clone(),
                });
                SyncOutcome::failed(message)
            }
        }
    }

    /// User-triggered "sync now"; identical to [`Self::sync`].
    pub async fn manual_sync(&self) -> SyncOutcome {
        self.sync().await
    }

    async fn run_cycle(&self) -> Result<(SyncDirection, bool)> {
        let provider = self.provider().ok_or(Error::ProviderNotConfigured)?;
        let store = &*self.inner.store;

        // A coherent "before" view of local state is read in full ahead of
        // the download; the two are deliberately not parallelized.
        let local = build_local_snapshot(store).await?;
        let remote = provider.download().await?;
        let device_id = load_or_create_device_id(store).await?;

        let Some(remote) = remote else {
            // First sync against an empty remote: push everything up.
            let payload = SyncSnapshot::new(device_id, now_ms(), local);
            provider.upload(&sanitize_for_upload(&payload)).await?;
            return Ok((SyncDirection::Upload, false));
        };

        let merged = resolve_conflicts(&local, &remote.data);
        let has_local_changes = !merged.equivalent(&local);
        let has_cloud_changes = !merged.equivalent(&remote.data);

        if has_local_changes {
            self.apply_local_changes(&merged).await?;
        }
        if has_cloud_changes {
            let payload = SyncSnapshot::new(device_id, now_ms(), merged);
            provider.upload(&sanitize_for_upload(&payload)).await?;
        }

        let direction = match (has_local_changes, has_cloud_changes) {
            (true, true) => SyncDirection::Bidirectional,
            (true, false) => SyncDirection::Download,
            (false, true) => SyncDirection::Upload,
            (false, false) => SyncDirection::None,
        };
        Ok((direction, has_local_changes || has_cloud_changes))
    }

    /// Make the local store match the merged snapshot, collection by
    /// collection, then persist tombstones and notify refresh hooks.
    pub async fn apply_local_changes(&self, merged: &SnapshotData) -> Result<()> {
        let store = &*self.inner.store;

        for collection in Collection::ALL {
            let current = store.get_all(collection).await?;
            let current_ids: HashSet<&RecordId> = current.iter().map(|record| &record.id).collect();
            let merged_ids: HashSet<&RecordId> = merged
                .records(collection)
                .iter()
                .map(|record| &record.id)
                .collect();

            for record in &current {
                if !merged_ids.contains(&record.id) {
                    store.delete(collection, &record.id).await?;
                }
            }
            for record in merged.records(collection) {
                if current_ids.contains(&record.id) {
                    store.update(collection, record.clone()).await?;
                } else {
                    store.add(collection, record.clone()).await?;
                }
            }
        }

        for collection in Collection::DELETABLE {
            store
                .set_tombstones(collection, merged.tombstones(collection).to_vec())
                .await?;
        }

        self.run_refresh_hooks(merged);
        Ok(())
    }

    fn run_refresh_hooks(&self, merged: &SnapshotData) {
        let Ok(hooks) = self.inner.hooks.lock() else {
            return;
        };
        for hook in hooks.iter() {
            if let Err(error) = hook(merged) {
                tracing::warn!("Refresh hook failed: {error}");
            }
        }
    }

    async fn touch_last_sync(&self) -> Result<()> {
        let mut config = SyncConfig::load(&*self.inner.store).await?;
        config.last_sync = Some(chrono::Utc::now().to_rfc3339());
        config.save(&*self.inner.store).await
    }

    async fn store_config(&self, config: &SyncConfig) -> Result<()> {
        config.save(&*self.inner.store).await?;
        self.adopt_flags(config);
        Ok(())
    }

    fn adopt_flags(&self, config: &SyncConfig) {
        self.inner.enabled.store(config.enabled, Ordering::SeqCst);
        self.inner
            .auto_sync
            .store(config.auto_sync, Ordering::SeqCst);
        self.inner
            .interval_ms
            .store(config.interval.max(1), Ordering::SeqCst);
    }

    fn replace_auto_task(&self, task: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.inner.auto_task.lock() {
            let previous = match task {
                Some(task) => slot.replace(task),
                None => slot.take(),
            };
            if let Some(previous) = previous {
                previous.abort();
            }
        }
    }

    fn emit(&self, event: &SyncEvent) {
        tracing::debug!(event = event.kind(), "sync event");
        let Ok(listeners) = self.inner.listeners.lock() else {
            return;
        };
        for (_, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(event = event.kind(), "sync event listener panicked");
            }
        }
    }
}

/// Read all eight collections plus the three tombstone arrays into one
/// self-consistent snapshot. Reads run concurrently; any failure fails the
/// whole snapshot (no partial result).
pub async fn build_local_snapshot<S: LocalStore + ?Sized>(store: &S) -> Result<SnapshotData> {
    let (tasks, notes, lists, conversations, settings, activities, daily_stats, activity_goals) = tokio::join!(
        store.get_all(Collection::Tasks),
        store.get_all(Collection::Notes),
        store.get_all(Collection::Lists),
        store.get_all(Collection::Conversations),
        store.get_all(Collection::Settings),
        store.get_all(Collection::Activities),
        store.get_all(Collection::DailyStats),
        store.get_all(Collection::ActivityGoals),
    );
    let (deleted_tasks, deleted_notes, deleted_lists) = tokio::join!(
        store.get_tombstones(Collection::Tasks),
        store.get_tombstones(Collection::Notes),
        store.get_tombstones(Collection::Lists),
    );

    Ok(SnapshotData {
        tasks: tasks?,
        notes: notes?,
        lists: lists?,
        conversations: conversations?,
        settings: settings?,
        activities: activities?,
        daily_stats: daily_stats?,
        activity_goals: activity_goals?,
        deleted_tasks: deleted_tasks?,
        deleted_notes: deleted_notes?,
        deleted_lists: deleted_lists?,
    })
}
