//! Document fetching
//!
//! The tree only depends on the [`DocumentFetcher`] contract: given an absolute location, return
//! the parsed JSON document or a [`FetchFailure`]. Every call may fail and callers never assume
//! success. Relative references are resolved with [`resolve_reference`] against the location of
//! the document that contains them, never against the root.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use url::Url;

/// A document could not be resolved, retrieved or parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to load {location}: {cause}")]
pub struct FetchFailure {
    /// Location (or unresolvable reference) that failed
    pub location: String,
    /// Human readable transport, status or parse error
    pub cause: String,
}

impl FetchFailure {
    pub fn new(location: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            location: location.into(),
            cause: cause.to_string(),
        }
    }
}

/// Retrieves JSON documents by absolute location
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch and parse the document at `location`
    async fn fetch(&self, location: &Url) -> Result<Value, FetchFailure>;
}

/// Resolve `href` against the location of the document that references it
pub fn resolve_reference(base: &Url, href: &str) -> Result<Url, FetchFailure> {
    base.join(href).map_err(|e| {
        FetchFailure::new(href, format!("invalid reference relative to {base}: {e}"))
    })
}

/// Turn a root reference into an absolute location
///
/// Absolute URLs are used unchanged. Anything else is treated as a filesystem path relative to
/// the current working directory (e.g. the default `../stac/catalog.json`).
pub fn root_location(reference: &str) -> Result<Url, FetchFailure> {
    // Single-letter schemes are Windows drive letters, not URLs
    if let Ok(url) = Url::parse(reference)
        && url.scheme().len() > 1
    {
        return Ok(url);
    }

    let cwd = std::env::current_dir().map_err(|e| FetchFailure::new(reference, e))?;
    let base = Url::from_directory_path(&cwd).map_err(|_| {
        FetchFailure::new(reference, format!("{} is not an absolute path", cwd.display()))
    })?;
    resolve_reference(&base, reference)
}

/// Fetcher for `http`, `https` and `file` locations
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose HTTP requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stac-tree/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_http(&self, location: &Url) -> Result<Value, FetchFailure> {
        let response = self
            .http
            .get(location.as_str())
            .send()
            .await
            .map_err(|e| FetchFailure::new(location.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::new(location.as_str(), status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchFailure::new(location.as_str(), format!("malformed JSON: {e}")))
    }

    async fn fetch_file(&self, location: &Url) -> Result<Value, FetchFailure> {
        let path = location
            .to_file_path()
            .map_err(|_| FetchFailure::new(location.as_str(), "not a local file path"))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchFailure::new(location.as_str(), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FetchFailure::new(location.as_str(), format!("malformed JSON: {e}")))
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, location: &Url) -> Result<Value, FetchFailure> {
        tracing::debug!(%location, "Fetching document");
        match location.scheme() {
            "http" | "https" => self.fetch_http(location).await,
            "file" => self.fetch_file(location).await,
            scheme => Err(FetchFailure::new(
                location.as_str(),
                format!("unsupported scheme '{scheme}'"),
            )),
        }
    }
}

/// In-memory fetcher serving fixed documents
///
/// Unknown locations fail with `404 Not Found`. Fetches are counted per location, and every
/// fetch yields to the scheduler once before answering so concurrent callers interleave.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, Value>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`MemoryFetcher::insert`]
    pub fn with_document(self, location: &str, document: Value) -> Self {
        self.insert(location, document);
        self
    }

    /// Serve `document` at `location` (replacing any previous document)
    pub fn insert(&self, location: &str, document: Value) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(location), document);
    }

    /// Stop serving `location`
    pub fn remove(&self, location: &str) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize(location));
    }

    /// Number of fetches issued for `location`
    pub fn fetch_count(&self, location: &str) -> usize {
        self.counters().get(&normalize(location)).copied().unwrap_or(0)
    }

    /// Number of fetches issued for all locations
    pub fn total_fetches(&self) -> usize {
        self.counters().values().sum()
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentFetcher for MemoryFetcher {
    async fn fetch(&self, location: &Url) -> Result<Value, FetchFailure> {
        *self.counters().entry(location.to_string()).or_insert(0) += 1;

        tokio::task::yield_now().await;

        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| FetchFailure::new(location.as_str(), "404 Not Found"))
    }
}

fn normalize(location: &str) -> String {
    Url::parse(location)
        .map(String::from)
        .unwrap_or_else(|_| location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_asset_relative_to_item() {
        let item = Url::parse("https://host/cat/items/x.json").unwrap();
        let resolved = resolve_reference(&item, "data/img.tif").unwrap();
        assert_eq!(resolved.as_str(), "https://host/cat/items/data/img.tif");
    }

    #[test]
    fn test_resolve_parent_and_absolute_references() {
        let base = Url::parse("https://host/cat/sub/catalog.json").unwrap();
        assert_eq!(
            resolve_reference(&base, "../other/collection.json")
                .unwrap()
                .as_str(),
            "https://host/cat/other/collection.json"
        );
        assert_eq!(
            resolve_reference(&base, "https://elsewhere/x.json")
                .unwrap()
                .as_str(),
            "https://elsewhere/x.json"
        );
    }

    #[test]
    fn test_resolve_invalid_reference_is_failure() {
        let base = Url::parse("https://host/catalog.json").unwrap();
        let failure = resolve_reference(&base, "https://[::1").unwrap_err();
        assert_eq!(failure.location, "https://[::1");
    }

    #[test]
    fn test_root_location_absolute_url() {
        let url = root_location("https://host/stac/catalog.json").unwrap();
        assert_eq!(url.as_str(), "https://host/stac/catalog.json");
    }

    #[test]
    fn test_root_location_relative_path() {
        let url = root_location("../stac/catalog.json").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/stac/catalog.json"));
        assert!(!url.path().contains(".."));
    }

    #[tokio::test]
    async fn test_memory_fetcher_serves_and_counts() {
        let fetcher = MemoryFetcher::new().with_document("https://host/a.json", json!({"id": "a"}));
        let location = Url::parse("https://host/a.json").unwrap();

        let document = fetcher.fetch(&location).await.unwrap();
        assert_eq!(document["id"], "a");
        fetcher.fetch(&location).await.unwrap();

        assert_eq!(fetcher.fetch_count("https://host/a.json"), 2);
        assert_eq!(fetcher.total_fetches(), 2);
    }

    #[tokio::test]
    async fn test_memory_fetcher_missing_is_404() {
        let fetcher = MemoryFetcher::new();
        let location = Url::parse("https://host/missing.json").unwrap();

        let failure = fetcher.fetch(&location).await.unwrap_err();
        assert_eq!(failure.location, "https://host/missing.json");
        assert_eq!(failure.cause, "404 Not Found");
        assert_eq!(fetcher.fetch_count("https://host/missing.json"), 1);
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_local_file() {
        let dir = std::env::temp_dir().join(format!("stac-tree-fetch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.json");
        std::fs::write(&path, r#"{"id": "local"}"#).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let location = Url::from_file_path(&path).unwrap();
        let document = fetcher.fetch(&location).await.unwrap();
        assert_eq!(document["id"], "local");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_unknown_scheme() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let location = Url::parse("ftp://host/catalog.json").unwrap();
        let failure = fetcher.fetch(&location).await.unwrap_err();
        assert!(failure.cause.contains("unsupported scheme"));
    }
}
