//! Generic fetch-or-cache routine shared by every remote provider
//!
//! Map data, elevation and imagery providers differ only in their
//! [`ProviderProfile`]; [`RemoteDataProvider::get`] resolves a tile through
//! the memory cache, then the disk cache, then the network.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::config::ConfigSource;
use crate::core::quadkey::QuadKey;
use crate::data::parser::DataFormat;
use crate::providers::cache::{DiskCache, MemoryCache};
use crate::providers::http::HttpClient;
use crate::runtime::execute_blocking;
use crate::{MapError, Result};

/// Describes one remote source: where tiles come from and how they are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub name: String,
    /// URL with `{quadkey} {x} {y} {z} {s} {west} {south} {east} {north}
    /// {bbox} {api_key}` placeholders.
    pub url_template: String,
    /// Cache file extension, without the dot.
    pub extension: String,
    pub api_key: Option<String>,
    /// Format of the payload, `None` for opaque data such as imagery.
    pub format: Option<DataFormat>,
    pub subdomains: Vec<String>,
}

impl ProviderProfile {
    pub fn map_data(url_template: impl Into<String>, format: DataFormat) -> Self {
        Self {
            name: "map_data".to_string(),
            url_template: url_template.into(),
            extension: format.extension().to_string(),
            api_key: None,
            format: Some(format),
            subdomains: Vec::new(),
        }
    }

    pub fn elevation(url_template: impl Into<String>) -> Self {
        Self {
            name: "elevation".to_string(),
            url_template: url_template.into(),
            extension: DataFormat::Elevation.extension().to_string(),
            api_key: None,
            format: Some(DataFormat::Elevation),
            subdomains: Vec::new(),
        }
    }

    pub fn imagery(url_template: impl Into<String>) -> Self {
        Self {
            name: "imagery".to_string(),
            url_template: url_template.into(),
            extension: "jpg".to_string(),
            api_key: None,
            format: None,
            subdomains: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
    }

    /// Reads a provider section (`url`, `format`, `extension`, `api_key`,
    /// `subdomains` as a comma separated list). `default_format` applies
    /// when the section names no format.
    pub fn from_config(
        name: &str,
        section: &dyn ConfigSource,
        default_format: Option<DataFormat>,
    ) -> Result<Self> {
        let url_template = section.require_string("url")?;
        let format = if section.contains("format") {
            let raw = section.get_string("format", "");
            Some(DataFormat::from_name(&raw).ok_or_else(|| {
                MapError::ConfigurationError(format!("unknown {} format '{}'", name, raw))
            })?)
        } else {
            default_format
        };
        let extension = match format {
            Some(format) => section.get_string("extension", format.extension()),
            None => section.require_string("extension")?,
        };
        let api_key = section
            .contains("api_key")
            .then(|| section.get_string("api_key", ""));
        let subdomains = section
            .get_string("subdomains", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            name: name.to_string(),
            url_template,
            extension,
            api_key,
            format,
            subdomains,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    /// Expands the URL template for `quad_key`.
    pub fn url_for(&self, quad_key: &QuadKey) -> String {
        let bbox = quad_key.to_bounding_box();
        let (west, south, east, north) = (bbox.min.lng, bbox.min.lat, bbox.max.lng, bbox.max.lat);
        let subdomain = if self.subdomains.is_empty() {
            ""
        } else {
            let index = (quad_key.tile_x() as usize + quad_key.tile_y() as usize)
                % self.subdomains.len();
            self.subdomains[index].as_str()
        };

        self.url_template
            .replace("{quadkey}", &quad_key.to_quadkey_string())
            .replace("{x}", &quad_key.tile_x().to_string())
            .replace("{y}", &quad_key.tile_y().to_string())
            .replace("{z}", &quad_key.level_of_detail().to_string())
            .replace("{s}", subdomain)
            .replace("{bbox}", &format!("{},{},{},{}", west, south, east, north))
            .replace("{west}", &west.to_string())
            .replace("{south}", &south.to_string())
            .replace("{east}", &east.to_string())
            .replace("{north}", &north.to_string())
            .replace("{api_key}", self.api_key.as_deref().unwrap_or(""))
    }
}

/// Bytes of one tile plus where they live on disk.
#[derive(Debug, Clone)]
pub struct FetchedData {
    /// Complete cache file holding `bytes`; `None` when persisting failed.
    pub path: Option<PathBuf>,
    pub bytes: Arc<Vec<u8>>,
    /// `true` when no network request was made.
    pub from_cache: bool,
}

pub struct RemoteDataProvider {
    profile: ProviderProfile,
    disk: DiskCache,
    memory: MemoryCache,
    client: Arc<dyn HttpClient>,
}

impl RemoteDataProvider {
    pub fn new(
        profile: ProviderProfile,
        disk: DiskCache,
        client: Arc<dyn HttpClient>,
        memory_cache_size: usize,
    ) -> Self {
        Self {
            profile,
            disk,
            memory: MemoryCache::new(memory_cache_size),
            client,
        }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn disk_cache(&self) -> &DiskCache {
        &self.disk
    }

    /// Cached bytes for `quad_key`, fetching and persisting them first when
    /// the tile is not on disk yet.
    pub async fn get(&self, quad_key: &QuadKey) -> Result<FetchedData> {
        let path = self.disk.path_for(quad_key, &self.profile.extension);

        // Only bytes already on disk enter the memory cache.
        if let Some(bytes) = self.memory.get(&path) {
            return Ok(FetchedData {
                path: Some(path),
                bytes,
                from_cache: true,
            });
        }

        let disk = self.disk.clone();
        let read_path = path.clone();
        let cached = execute_blocking(move || disk.read(&read_path))
            .await
            .map_err(|e| match e {
                MapError::Cancelled => e,
                other => MapError::FetchFailure(format!(
                    "reading cache {}: {}",
                    path.display(),
                    other
                )),
            })?;
        if let Some(bytes) = cached {
            log::debug!("{} cache hit for {}", self.profile.name, quad_key);
            let bytes = Arc::new(bytes);
            self.memory.put(path.clone(), Arc::clone(&bytes));
            return Ok(FetchedData {
                path: Some(path),
                bytes,
                from_cache: true,
            });
        }

        let url = self.profile.url_for(quad_key);
        let bytes = self.client.get(&url).await.map_err(|e| match e {
            MapError::FetchFailure(_) | MapError::Cancelled => e,
            other => MapError::FetchFailure(format!("{}: {}", url, other)),
        })?;
        let bytes = Arc::new(bytes);

        // The write runs on the blocking pool, so once started it finishes
        // even if this future is dropped.
        let disk = self.disk.clone();
        let write_path = path.clone();
        let payload = Arc::clone(&bytes);
        let path = match execute_blocking(move || disk.write_atomic(&write_path, &payload)).await {
            Ok(()) => {
                self.memory.put(path.clone(), Arc::clone(&bytes));
                Some(path)
            }
            Err(e) => {
                log::warn!("failed to cache {} at {}: {}", url, path.display(), e);
                None
            }
        };
        Ok(FetchedData {
            path,
            bytes,
            from_cache: false,
        })
    }
}

impl std::fmt::Debug for RemoteDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDataProvider")
            .field("profile", &self.profile)
            .field("cache_root", &self.disk.root())
            .field("memory_entries", &self.memory.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::JsonConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingClient {
        requests: AtomicUsize,
        body: Option<Vec<u8>>,
    }

    #[async_trait]
    impl HttpClient for CountingClient {
        async fn get(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.body
                .clone()
                .ok_or_else(|| MapError::FetchFailure(format!("HTTP 503 for {}", url)))
        }
    }

    fn provider(body: Option<&[u8]>) -> (RemoteDataProvider, Arc<CountingClient>, TempDir) {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(CountingClient {
            requests: AtomicUsize::new(0),
            body: body.map(|b| b.to_vec()),
        });
        let profile = ProviderProfile::map_data("http://test/{quadkey}", DataFormat::GeoJson);
        let provider = RemoteDataProvider::new(
            profile,
            DiskCache::new(dir.path()),
            Arc::clone(&client) as Arc<dyn HttpClient>,
            4,
        );
        (provider, client, dir)
    }

    #[test]
    fn test_url_template() {
        let key = QuadKey::new(3, 5, 3).unwrap();
        let profile = ProviderProfile::elevation(
            "https://{s}.example.com/{z}/{x}/{y}/{quadkey}.ele?k={api_key}&b={bbox}",
        )
        .with_api_key("secret")
        .with_subdomains(vec!["a".into(), "b".into(), "c".into()]);

        let url = profile.url_for(&key);
        let quadkey = key.to_quadkey_string();
        assert!(url.starts_with(&format!("https://c.example.com/3/3/5/{}.ele?k=secret&b=", quadkey)));
        assert!(url.ends_with(&format!("{},{}", key.to_bounding_box().max.lng, key.to_bounding_box().max.lat)));
    }

    #[test]
    fn test_profile_from_config() {
        let config = JsonConfig::from_json(
            r#"{"providers":{"map_data":{"url":"http://osm/{bbox}","format":"osm","api_key":"k"}}}"#,
        )
        .unwrap();
        let section = config.section("providers/map_data").unwrap();
        let profile = ProviderProfile::from_config("map_data", &section, None).unwrap();
        assert_eq!(profile.format, Some(DataFormat::OsmXml));
        assert_eq!(profile.extension, "osm");
        assert_eq!(profile.api_key.as_deref(), Some("k"));

        let bad = JsonConfig::from_json(r#"{"url":"x","format":"shapefile"}"#).unwrap();
        assert!(matches!(
            ProviderProfile::from_config("map_data", &bad, None),
            Err(MapError::ConfigurationError(_))
        ));
        let missing = JsonConfig::from_json(r#"{"format":"json"}"#).unwrap();
        assert!(ProviderProfile::from_config("map_data", &missing, None).is_err());

        let dem = JsonConfig::from_json(r#"{"url":"http://dem/{z}/{x}/{y}"}"#).unwrap();
        let profile = ProviderProfile::from_config("elevation", &dem, Some(DataFormat::Elevation)).unwrap();
        assert_eq!(profile.extension, "ele");
        let untyped = ProviderProfile::from_config("imagery", &dem, None);
        assert!(matches!(untyped, Err(MapError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_fetch_once_then_cache() {
        let body = br#"{"type":"FeatureCollection","features":[]}"#;
        let (provider, client, _dir) = provider(Some(body));
        let key = QuadKey::new(10, 20, 6).unwrap();

        let first = provider.get(&key).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.bytes.as_slice(), body);
        let path = first.path.clone().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert_eq!(client.requests.load(Ordering::SeqCst), 1);

        let second = provider.get(&key).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.path, Some(path));
        assert_eq!(client.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_hit_survives_new_provider() {
        let (provider, client, dir) = provider(Some(b"cached"));
        let key = QuadKey::new(1, 2, 4).unwrap();
        provider.get(&key).await.unwrap();

        let fresh = RemoteDataProvider::new(
            provider.profile().clone(),
            DiskCache::new(dir.path()),
            Arc::clone(&client) as Arc<dyn HttpClient>,
            4,
        );
        let fetched = fresh.get(&key).await.unwrap();
        assert!(fetched.from_cache);
        assert_eq!(fetched.bytes.as_slice(), b"cached");
        assert_eq!(client.requests.load(Ordering::SeqCst), 1);
    }

    /// Serves `body` after turning the level directory into a plain file, so
    /// the cache write that follows cannot create it.
    struct BlockingDirClient {
        level_dir: PathBuf,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for BlockingDirClient {
        async fn get(&self, _url: &str) -> Result<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            std::fs::write(&self.level_dir, b"not a directory")?;
            Ok(b"payload".to_vec())
        }
    }

    #[tokio::test]
    async fn test_failed_cache_write_returns_bytes_without_path() {
        let dir = TempDir::new().unwrap();
        let key = QuadKey::new(5, 9, 6).unwrap();
        let client = Arc::new(BlockingDirClient {
            level_dir: dir.path().join("6"),
            requests: AtomicUsize::new(0),
        });
        let provider = RemoteDataProvider::new(
            ProviderProfile::map_data("http://test/{quadkey}", DataFormat::GeoJson),
            DiskCache::new(dir.path()),
            Arc::clone(&client) as Arc<dyn HttpClient>,
            4,
        );

        let fetched = provider.get(&key).await.unwrap();
        assert_eq!(fetched.bytes.as_slice(), b"payload");
        assert!(!fetched.from_cache);
        assert_eq!(fetched.path, None);

        // Nothing was cached, and the broken cache directory now makes the
        // disk lookup itself fail.
        let again = provider.get(&key).await;
        assert!(matches!(again, Err(MapError::FetchFailure(_))));
        assert_eq!(client.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_file() {
        let (provider, client, _dir) = provider(None);
        let key = QuadKey::new(7, 7, 5).unwrap();

        let result = provider.get(&key).await;
        assert!(matches!(result, Err(MapError::FetchFailure(_))));
        assert_eq!(client.requests.load(Ordering::SeqCst), 1);
        assert!(!provider.disk_cache().path_for(&key, "json").exists());
    }
}
