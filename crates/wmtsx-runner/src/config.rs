//! YAML run configuration.
//!
//! ```yaml
//! aoi:
//!   pathname: sites.geojson
//!   field: name
//!   distance: 500
//! endpoint:
//!   name: securewatch
//!   catalogue:
//!     kind: wfs
//!     uri: https://example.com/wfs?service=WFS&request=GetFeature&BBOX={bbox}&maxFeatures={max_features}
//!   tiles: https://example.com/wmts/{feature_id}/{z}/{x}/{y}.png
//!   tile_matrix: GoogleMapsCompatible
//!   credentials: { username: user, password: secret }
//! filter:
//!   max_cloud: 0.2
//!   max_downloads: 5
//! output:
//!   format: GTiff
//!   options: TILED=YES COMPRESS=LZW
//! workers: { aois: 2, features: 2, tiles: 8 }
//! ```
//!
//! Relative paths are resolved against the directory of the configuration file.

use crate::error::ExtractError;
use crate::pipeline::ExtractSettings;
use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use wmtsx_catalog::{
    load_aois, AoiOptions, AreaOfInterest, BasemapCatalogue, Catalogue, Credentials, FileCatalogue,
    FilterCriteria, PeriodResolutionTable, Selector, WfsCatalogue, DEFAULT_MAX_FEATURES,
};
use wmtsx_tiles::{CreationOptions, HttpTileSource, OutputFormat, TileMatrix};

/// Default output format.
pub const DEFAULT_FORMAT: &str = "GTiff";

/// Default creation options.
pub const DEFAULT_OPTIONS: &str = "TILED=YES COMPRESS=LZW";

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub aoi: AoiConfig,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub filter: FilterCriteria,
    /// Period-resolution decision table file.
    #[serde(default)]
    pub period_resolution: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Where the AOIs come from and how they are named and buffered.
#[derive(Debug, Clone, Deserialize)]
pub struct AoiConfig {
    /// GeoJSON feature collection.
    pub pathname: PathBuf,
    /// Attribute holding the AOI name.
    #[serde(default)]
    pub field: Option<String>,
    /// Buffer distance in metres.
    #[serde(default)]
    pub distance: Option<f64>,
    /// Square box around the centroid instead of a buffered envelope.
    #[serde(default)]
    pub bbox: bool,
}

impl AoiConfig {
    pub fn options(&self) -> AoiOptions {
        AoiOptions {
            field: self.field.clone(),
            distance: self.distance,
            bbox: self.bbox,
        }
    }
}

/// The imagery service.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Service name; also the top-level output directory.
    pub name: String,
    pub catalogue: CatalogueConfig,
    /// Tile URL template with `{z}`, `{x}`, `{y}` and optionally `{feature_id}`,
    /// `{date}` or `{datetime}` (the acquisition time).
    pub tiles: String,
    #[serde(default = "default_tile_matrix")]
    pub tile_matrix: String,
    /// Highest zoom served by the endpoint.
    #[serde(default)]
    pub max_zoom: Option<u8>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_tile_matrix() -> String {
    "GoogleMapsCompatible".to_string()
}

/// Which catalogue collaborator lists the acquisitions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogueConfig {
    /// HTTP feature query.
    Wfs {
        uri: String,
        #[serde(default = "default_max_features")]
        max_features: u32,
    },
    /// A stored catalogue response.
    File { path: PathBuf },
    /// No acquisition metadata: one basemap feature per AOI.
    Basemap,
}

fn default_max_features() -> u32 {
    DEFAULT_MAX_FEATURES
}

/// Directory layout below the output root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DirLayout {
    /// `<aoi>/<datetime>/<file>`
    #[default]
    Aoi,
    /// `<aoi>/<platform>/<datetime>/<file>`
    Platform,
    /// `<platform>/<aoi>/<datetime>/<file>`
    PlatformFirst,
}

/// Raster output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: String,
    pub options: String,
    pub overwrite: bool,
    pub dirs: DirLayout,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            options: DEFAULT_OPTIONS.to_string(),
            overwrite: false,
            dirs: DirLayout::Aoi,
        }
    }
}

/// Worker pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// AOIs processed at once.
    pub aois: usize,
    /// Mosaics assembled at once across all AOIs.
    pub features: usize,
    /// Tile fetches in flight across all mosaics.
    pub tiles: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            aois: 1,
            features: 2,
            tiles: 8,
        }
    }
}

impl Config {
    /// Parse a configuration document. Relative paths are left untouched.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a configuration file and resolve its relative paths.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ExtractError::config(path.display(), e))?;
        let mut config = Self::from_yaml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.aoi.pathname);
        if let Some(p) = self.period_resolution.as_mut() {
            resolve(p);
        }
        if let CatalogueConfig::File { path } = &mut self.endpoint.catalogue {
            resolve(path);
        }
    }

    /// Load the AOIs, keeping only `names` when non-empty.
    pub fn load_aois(&self, names: &[String]) -> Result<Vec<AreaOfInterest>> {
        let aois = load_aois(&self.aoi.pathname, &self.aoi.options())
            .map_err(|e| ExtractError::config(self.aoi.pathname.display(), e))?;
        Ok(restrict_aois(aois, names))
    }

    /// Load the decision table, if configured.
    pub fn decision_table(&self) -> Result<Option<Arc<PeriodResolutionTable>>> {
        match &self.period_resolution {
            Some(path) => {
                let table = PeriodResolutionTable::load(path)
                    .map_err(|e| ExtractError::config(path.display(), e))?;
                Ok(Some(Arc::new(table)))
            }
            None => Ok(None),
        }
    }

    /// Validate the filter criteria and build the selector.
    pub fn selector(&self) -> Result<Selector> {
        let table = self.decision_table()?;
        Ok(Selector::new(self.filter.clone(), table)?)
    }

    /// Tile matrix of the endpoint.
    pub fn tile_matrix(&self) -> Result<TileMatrix> {
        let matrix = TileMatrix::by_name(&self.endpoint.tile_matrix)?;
        Ok(match self.endpoint.max_zoom {
            Some(max_zoom) => matrix.with_max_zoom(max_zoom),
            None => matrix,
        })
    }

    /// Build the catalogue collaborator.
    pub fn catalogue(&self) -> Result<Arc<dyn Catalogue>> {
        Ok(match &self.endpoint.catalogue {
            CatalogueConfig::Wfs { uri, max_features } => Arc::new(WfsCatalogue::new(
                uri.clone(),
                self.endpoint.credentials.clone(),
                *max_features,
            )?),
            CatalogueConfig::File { path } => Arc::new(FileCatalogue::new(path)),
            CatalogueConfig::Basemap => Arc::new(BasemapCatalogue),
        })
    }

    /// Build the tile transport.
    pub fn tile_source(&self) -> Result<HttpTileSource> {
        let source = HttpTileSource::new(self.endpoint.tiles.clone())?;
        Ok(match &self.endpoint.credentials {
            Some(c) => source.with_basic_auth(c.username.clone(), c.password.clone()),
            None => source,
        })
    }

    /// Pipeline settings for a run at `zoom` below `out_path`.
    pub fn settings(&self, zoom: u8, out_path: &Path) -> Result<ExtractSettings> {
        let matrix = self.tile_matrix()?;
        matrix.validate_zoom(zoom)?;
        Ok(ExtractSettings {
            zoom,
            matrix,
            root: out_path.join(&self.endpoint.name),
            format: self.output.format.parse::<OutputFormat>()?,
            options: CreationOptions::parse(&self.output.options)?,
            overwrite: self.output.overwrite,
            layout: self.output.dirs,
            workers: self.workers,
        })
    }
}

/// Keep the AOIs whose id is in `names`; all of them when `names` is empty.
pub fn restrict_aois(aois: Vec<AreaOfInterest>, names: &[String]) -> Vec<AreaOfInterest> {
    if names.is_empty() {
        return aois;
    }
    for name in names {
        if !aois.iter().any(|a| &a.id == name) {
            warn!(aoi = %name, "Requested AOI not found");
        }
    }
    let kept: Vec<AreaOfInterest> = aois.into_iter().filter(|a| names.contains(&a.id)).collect();
    info!(count = kept.len(), "Restricted AOIs");
    kept
}
