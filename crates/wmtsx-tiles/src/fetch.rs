//! Tile transport.
//!
//! The assembler only needs a [`TileSource`]: something that returns the
//! encoded bytes of one tile. [`HttpTileSource`] is the network
//! implementation. It fills a URL template with the tile address and the
//! feature identity, authenticates with basic auth and retries failed requests.
//!
//! Template placeholders: `{z}`, `{x}`, `{y}`, `{feature_id}`, and the
//! acquisition time as `{date}` (`YYYY-MM-DD`) or `{datetime}`
//! (`YYYY-MM-DDTHH:MM:SS`) for endpoints that address imagery by time.
//!
//! ## Thread Safety
//!
//! `HttpTileSource` is shared by every mosaic of a run. The blocking
//! `reqwest` client is safe to use from many worker threads, and the
//! download counters are atomics.

use crate::matrix::TileCoord;
use crate::{Result, TileError};
use chrono::NaiveDateTime;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Request timeout for a single tile.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of attempts per tile.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default upper bound of the random pause between attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Returns the encoded image bytes of one tile.
pub trait TileSource: Send + Sync {
    /// Fetch `tile`. Failures are reported as [`TileError::TileFetch`].
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>>;
}

impl<F> TileSource for F
where
    F: Fn(TileCoord) -> Result<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>> {
        self(tile)
    }
}

/// The acquisition whose tiles are requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFeature {
    pub id: String,
    pub acquired: Option<NaiveDateTime>,
}

impl TileFeature {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            acquired: None,
        }
    }

    pub fn with_acquired(mut self, acquired: Option<NaiveDateTime>) -> Self {
        self.acquired = acquired;
        self
    }
}

/// Returns tiles for any feature of an endpoint.
pub trait TileProvider: Send + Sync {
    /// Fetch `tile` of the acquisition `feature`.
    fn fetch_tile(&self, feature: &TileFeature, tile: TileCoord) -> Result<Vec<u8>>;
}

impl<F> TileProvider for F
where
    F: Fn(&TileFeature, TileCoord) -> Result<Vec<u8>> + Send + Sync,
{
    fn fetch_tile(&self, feature: &TileFeature, tile: TileCoord) -> Result<Vec<u8>> {
        self(feature, tile)
    }
}

/// The tiles of one feature, as a [`TileSource`].
pub struct FeatureTiles<'a, P: ?Sized> {
    provider: &'a P,
    feature: TileFeature,
}

impl<'a, P: TileProvider + ?Sized> FeatureTiles<'a, P> {
    pub fn new(provider: &'a P, feature_id: &str) -> Self {
        Self {
            provider,
            feature: TileFeature::new(feature_id),
        }
    }

    /// Acquisition time, for templates that address imagery by date.
    pub fn with_acquired(mut self, acquired: Option<NaiveDateTime>) -> Self {
        self.feature.acquired = acquired;
        self
    }

    pub fn feature(&self) -> &TileFeature {
        &self.feature
    }
}

impl<P: TileProvider + ?Sized> TileSource for FeatureTiles<'_, P> {
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>> {
        self.provider.fetch_tile(&self.feature, tile)
    }
}

/// Statistics about tile downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of tiles downloaded.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded.
    pub bytes_downloaded: u64,
    /// Number of tiles that failed after every attempt.
    pub tiles_failed: usize,
}

/// HTTP tile transport over a URL template.
///
/// Recognised placeholders: `{z}`, `{x}`, `{y}` and `{feature_id}`.
pub struct HttpTileSource {
    template: String,
    client: reqwest::blocking::Client,
    credentials: Option<(String, String)>,
    attempts: u32,
    max_backoff: Duration,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    tiles_failed: AtomicUsize,
}

impl std::fmt::Debug for HttpTileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTileSource")
            .field("template", &self.template)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl HttpTileSource {
    /// Create a source for `template`.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !(template.contains("{z}") && template.contains("{x}") && template.contains("{y}")) {
            return Err(TileError::InvalidOption(format!(
                "tile URL template '{}' needs {{z}}, {{x}} and {{y}}",
                template
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            template,
            client,
            credentials: None,
            attempts: DEFAULT_ATTEMPTS,
            max_backoff: DEFAULT_MAX_BACKOFF,
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            tiles_failed: AtomicUsize::new(0),
        })
    }

    /// Authenticate every request with basic auth.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Change the retry policy. At least one attempt is always made.
    pub fn with_retry(mut self, attempts: u32, max_backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.max_backoff = max_backoff;
        self
    }

    /// URL of `tile` for `feature`.
    ///
    /// Date placeholders are left as written when the acquisition time is unknown.
    pub fn url(&self, feature: &TileFeature, tile: TileCoord) -> String {
        let mut url = self.template.replace("{feature_id}", &feature.id);
        if let Some(acquired) = feature.acquired {
            url = url
                .replace("{date}", &acquired.format("%Y-%m-%d").to_string())
                .replace("{datetime}", &acquired.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
        url.replace("{z}", &tile.z.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }

    /// Download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            tiles_failed: self.tiles_failed.load(Ordering::Relaxed),
        }
    }

    fn request(&self, url: &str, tile: TileCoord) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send()?;

        if !response.status().is_success() {
            return Err(TileError::TileFetch {
                z: tile.z,
                x: tile.x,
                y: tile.y,
                reason: format!("HTTP {}", response.status()),
            });
        }

        Ok(response.bytes()?.to_vec())
    }

    fn backoff(&self) -> Duration {
        let max_ms = self.max_backoff.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl TileProvider for HttpTileSource {
    fn fetch_tile(&self, feature: &TileFeature, tile: TileCoord) -> Result<Vec<u8>> {
        let url = self.url(feature, tile);
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.request(&url, tile) {
                Ok(bytes) => {
                    self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
                    self.bytes_downloaded
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    debug!(tile = %tile, bytes = bytes.len(), "Downloaded tile");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(tile = %tile, attempt, error = %e, "Tile request failed");
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        std::thread::sleep(self.backoff());
                    }
                }
            }
        }

        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
        Err(TileError::TileFetch {
            z: tile.z,
            x: tile.x,
            y: tile.y,
            reason: last_error,
        })
    }
}
