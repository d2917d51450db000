//! Remote blob providers
//!
//! A provider holds one opaque versioned payload. Upload replaces it,
//! download returns it (or `None` before the first upload). No
//! optimistic-concurrency token is assumed; concurrent uploads from two
//! devices are last-write-wins and re-resolved on the next cycle.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::models::SyncSnapshot;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote blob storage capability shared by all backend implementations.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Provider name used for diagnostics and events.
    fn name(&self) -> &str;

    /// Establish a session with the backend.
    async fn authenticate(&self) -> Result<bool>;

    /// Whether a session is currently established.
    fn is_authenticated(&self) -> bool;

    /// Upload the payload, replacing whatever the remote holds.
    async fn upload(&self, payload: &SyncSnapshot) -> Result<()>;

    /// Download the current remote payload. `None` means no remote data
    /// exists yet, which is not an error.
    async fn download(&self) -> Result<Option<SyncSnapshot>>;

    /// End the session.
    async fn logout(&self) -> Result<()>;
}

/// In-memory provider for tests and single-process setups.
///
/// Counts uploads/downloads so tests can assert on traffic.
pub struct MemoryProvider {
    payload: Mutex<Option<SyncSnapshot>>,
    authenticated: AtomicBool,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            payload: Mutex::new(None),
            authenticated: AtomicBool::new(true),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    /// Start with an existing remote payload.
    #[must_use]
    pub fn with_payload(payload: SyncSnapshot) -> Self {
        let provider = Self::new();
        if let Ok(mut slot) = provider.payload.lock() {
            *slot = Some(payload);
        }
        provider
    }

    /// The payload the provider currently holds.
    #[must_use]
    pub fn payload(&self) -> Option<SyncSnapshot> {
        self.payload.lock().ok().and_then(|slot| slot.clone())
    }

    /// Number of uploads performed.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of downloads performed.
    #[must_use]
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn provider_poisoned() -> Error {
    Error::Provider("memory provider lock poisoned".to_string())
}

#[async_trait]
impl RemoteProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn authenticate(&self) -> Result<bool> {
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn upload(&self, payload: &SyncSnapshot) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.payload.lock().map_err(|_| provider_poisoned())?;
        *slot = Some(payload.clone());
        Ok(())
    }

    async fn download(&self) -> Result<Option<SyncSnapshot>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let slot = self.payload.lock().map_err(|_| provider_poisoned())?;
        Ok(slot.clone())
    }

    async fn logout(&self) -> Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider backed by a JSON file, e.g. inside a folder already mirrored
/// between devices by the platform.
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RemoteProvider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn authenticate(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn upload(&self, payload: &SyncSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string(payload)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }

    async fn download(&self) -> Result<Option<SyncSnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider backed by a single HTTP endpoint: GET to download, PUT to
/// upload, optional bearer token.
pub struct HttpProvider {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
    authenticated: AtomicBool,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint.into())?,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().build()?,
            authenticated: AtomicBool::new(false),
        })
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpProvider")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn authenticate(&self) -> Result<bool> {
        let response = self
            .with_auth(self.client.get(&self.endpoint))
            .send()
            .await?;
        let ok = response.status().is_success() || response.status() == StatusCode::NOT_FOUND;
        self.authenticated.store(ok, Ordering::SeqCst);
        Ok(ok)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn upload(&self, payload: &SyncSnapshot) -> Result<()> {
        let response = self
            .with_auth(self.client.put(&self.endpoint))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "upload failed: HTTP {} {}",
                status.as_u16(),
                compact_text(&body)
            )));
        }
        Ok(())
    }

    async fn download(&self) -> Result<Option<SyncSnapshot>> {
        let response = self
            .with_auth(self.client.get(&self.endpoint))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Provider(format!(
                    "download failed: HTTP {} {}",
                    status.as_u16(),
                    compact_text(&body)
                )))
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{Record, SnapshotData};

    fn sample_snapshot() -> SyncSnapshot {
        let data = SnapshotData {
            tasks: vec![Record::new("t1").with("description", "Buy milk")],
            ..SnapshotData::default()
        };
        SyncSnapshot::new("device_test", 42, data)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_provider_round_trip() {
        let provider = MemoryProvider::new();
        assert_eq!(provider.download().await.unwrap(), None);

        provider.upload(&sample_snapshot()).await.unwrap();
        assert_eq!(provider.download().await.unwrap(), Some(sample_snapshot()));
        assert_eq!(provider.upload_count(), 1);
        assert_eq!(provider.download_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_provider_logout_clears_session() {
        let provider = MemoryProvider::new();
        assert!(provider.is_authenticated());
        provider.logout().await.unwrap();
        assert!(!provider.is_authenticated());
        assert!(provider.authenticate().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_provider_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().join("nested").join("sync.json"));

        assert_eq!(provider.download().await.unwrap(), None);

        provider.upload(&sample_snapshot()).await.unwrap();
        let downloaded = provider.download().await.unwrap().unwrap();
        assert_eq!(downloaded, sample_snapshot());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_provider_rejects_corrupt_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "not json").unwrap();

        let provider = FileProvider::new(path);
        assert!(provider.download().await.is_err());
    }

    #[test]
    fn http_provider_rejects_invalid_endpoints() {
        assert!(HttpProvider::new("   ", None).is_err());
        assert!(HttpProvider::new("api.example.com", None).is_err());
        assert!(HttpProvider::new("https://api.example.com/sync/", None).is_ok());
    }

    #[test]
    fn http_provider_debug_redacts_token() {
        let provider =
            HttpProvider::new("https://api.example.com/sync", Some("secret".to_string())).unwrap();
        let debug = format!("{provider:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }
}
