//! Catalogue collaborators.
//!
//! The core only consumes [`CatalogueFeature`] records; a [`Catalogue`] turns an
//! AOI into those records. Three implementations are provided:
//! - [`WfsCatalogue`]: HTTP feature query returning GeoJSON
//! - [`FileCatalogue`]: the same GeoJSON document read from disk
//! - [`BasemapCatalogue`]: endpoints without acquisition metadata (one feature per AOI)

use crate::aoi::AreaOfInterest;
use crate::datetime::deserialize_opt_datetime;
use crate::feature::{platform_name, CatalogueFeature};
use crate::geojson::FeatureCollection;
use crate::{CatalogError, Result};
use chrono::NaiveDateTime;
use geo::{Area, BooleanOps, Geometry, MultiPolygon};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default cap on the number of records a feature query may return.
pub const DEFAULT_MAX_FEATURES: u32 = 500;

/// Source units that are not optical imagery.
const EXCLUDED_SOURCE_UNITS: &[&str] = &["DEM"];

/// Sources that are not optical imagery.
const EXCLUDED_SOURCES: &[&str] = &["RS2"];

/// Something that can list the acquisitions covering an AOI.
pub trait Catalogue: Send + Sync {
    /// Return the raw feature records for `aoi`.
    ///
    /// Failures are reported as [`CatalogError::MetadataQuery`].
    fn query(&self, aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>>;
}

impl<F> Catalogue for F
where
    F: Fn(&AreaOfInterest) -> Result<Vec<CatalogueFeature>> + Send + Sync,
{
    fn query(&self, aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>> {
        self(aoi)
    }
}

/// Basic-auth credentials, treated as opaque.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Feature query over HTTP returning a GeoJSON feature collection.
///
/// The URL template may contain `{bbox}` (`min_lon,min_lat,max_lon,max_lat`),
/// `{bbox_latlon}` (`min_lat,min_lon,max_lat,max_lon`) and `{max_features}`.
pub struct WfsCatalogue {
    uri_template: String,
    credentials: Option<Credentials>,
    max_features: u32,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for WfsCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WfsCatalogue")
            .field("uri_template", &self.uri_template)
            .field("max_features", &self.max_features)
            .finish()
    }
}

impl WfsCatalogue {
    /// Create a catalogue client for a URL template.
    pub fn new(
        uri_template: impl Into<String>,
        credentials: Option<Credentials>,
        max_features: u32,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CatalogError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            uri_template: uri_template.into(),
            credentials,
            max_features,
            client,
        })
    }

    /// Expand the URL template for an AOI.
    pub fn url_for(&self, aoi: &AreaOfInterest) -> String {
        let (min_lon, min_lat, max_lon, max_lat) = aoi.bbox();
        self.uri_template
            .replace("{bbox}", &format!("{},{},{},{}", min_lon, min_lat, max_lon, max_lat))
            .replace("{bbox_latlon}", &format!("{},{},{},{}", min_lat, min_lon, max_lat, max_lon))
            .replace("{max_features}", &self.max_features.to_string())
    }

    fn fetch(&self, url: &str) -> std::result::Result<String, String> {
        let mut request = self.client.get(url);
        if let Some(c) = &self.credentials {
            request = request.basic_auth(&c.username, Some(&c.password));
        }
        let response = request.send().map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.text().map_err(|e| e.to_string())
    }
}

impl Catalogue for WfsCatalogue {
    fn query(&self, aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>> {
        let url = self.url_for(aoi);
        debug!(aoi = %aoi.id, %url, "querying catalogue");

        let body = self.fetch(&url).map_err(|reason| CatalogError::MetadataQuery {
            aoi: aoi.id.clone(),
            reason,
        })?;
        features_from_geojson(&body, aoi).map_err(|e| CatalogError::MetadataQuery {
            aoi: aoi.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// A catalogue response stored on disk.
#[derive(Debug, Clone)]
pub struct FileCatalogue {
    path: PathBuf,
}

impl FileCatalogue {
    /// Create a catalogue backed by a GeoJSON file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Catalogue for FileCatalogue {
    fn query(&self, aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>> {
        let to_query_error = |e: CatalogError| CatalogError::MetadataQuery {
            aoi: aoi.id.clone(),
            reason: format!("{}: {}", self.path.display(), e),
        };
        let text = std::fs::read_to_string(&self.path).map_err(|e| to_query_error(e.into()))?;
        features_from_geojson(&text, aoi).map_err(to_query_error)
    }
}

/// Catalogue for endpoints that serve a single undated basemap.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasemapCatalogue;

impl Catalogue for BasemapCatalogue {
    fn query(&self, _aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>> {
        Ok(vec![CatalogueFeature::new("basemap")
            .with_platform("misc")
            .with_product("default")
            .with_cloud_cover(0.0)
            .with_overlap(100.0)])
    }
}

/// Properties of a catalogue record.
#[derive(Debug, Deserialize)]
struct RecordProperties {
    #[serde(rename = "featureId", alias = "DigitalGlobe:featureId")]
    feature_id: String,
    #[serde(default, alias = "DigitalGlobe:source")]
    source: Option<String>,
    #[serde(default, rename = "sourceUnit", alias = "DigitalGlobe:sourceUnit")]
    source_unit: Option<String>,
    #[serde(default, rename = "productType", alias = "DigitalGlobe:productType")]
    product_type: Option<String>,
    #[serde(
        default,
        rename = "acquisitionDate",
        alias = "DigitalGlobe:acquisitionDate",
        deserialize_with = "deserialize_opt_datetime"
    )]
    acquisition_date: Option<NaiveDateTime>,
    #[serde(
        default,
        rename = "cloudCover",
        alias = "DigitalGlobe:cloudCover",
        deserialize_with = "deserialize_opt_number"
    )]
    cloud_cover: Option<f64>,
    #[serde(
        default,
        rename = "groundSampleDistance",
        alias = "DigitalGlobe:groundSampleDistance",
        deserialize_with = "deserialize_opt_number"
    )]
    ground_sample_distance: Option<f64>,
}

/// Numbers may arrive as JSON numbers or as numeric strings.
fn deserialize_opt_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!("expected a number, got {}", other))),
    }
}

/// Convert a GeoJSON catalogue response into feature records for `aoi`.
///
/// Non-optical records are dropped; records whose properties cannot be read
/// are skipped with a warning. Overlap is computed from the record footprint.
pub fn features_from_geojson(text: &str, aoi: &AreaOfInterest) -> Result<Vec<CatalogueFeature>> {
    let collection: FeatureCollection = serde_json::from_str(text)?;
    let aoi_area = MultiPolygon::new(vec![aoi.polygon()]);

    let mut features = Vec::with_capacity(collection.features.len());
    for (index, record) in collection.features.into_iter().enumerate() {
        let properties = match record.properties {
            Some(p) => p,
            None => {
                warn!(aoi = %aoi.id, index, "catalogue record without properties");
                continue;
            }
        };
        let props: RecordProperties = match serde_json::from_value(Value::Object(properties)) {
            Ok(p) => p,
            Err(e) => {
                warn!(aoi = %aoi.id, index, error = %e, "unreadable catalogue record");
                continue;
            }
        };

        let excluded = props
            .source_unit
            .as_deref()
            .is_some_and(|u| EXCLUDED_SOURCE_UNITS.contains(&u))
            || props
                .source
                .as_deref()
                .is_some_and(|s| EXCLUDED_SOURCES.contains(&s));
        if excluded {
            debug!(aoi = %aoi.id, feature = %props.feature_id, "skipping non-optical record");
            continue;
        }

        let overlap = match record.geometry.as_ref().map(|g| g.to_geo()) {
            Some(Ok(geometry)) => overlap_percent(&aoi_area, geometry),
            Some(Err(e)) => {
                warn!(aoi = %aoi.id, feature = %props.feature_id, error = %e, "invalid footprint");
                None
            }
            None => None,
        };

        features.push(CatalogueFeature {
            id: props.feature_id,
            platform: props.source.as_deref().map(|s| platform_name(s).to_string()),
            product: props.product_type,
            acquired: props.acquisition_date,
            cloud_cover: props.cloud_cover,
            resolution: props.ground_sample_distance,
            overlap,
        });
    }

    Ok(features)
}

/// Percentage of `aoi` covered by a polygonal footprint.
fn overlap_percent(aoi: &MultiPolygon<f64>, footprint: Geometry<f64>) -> Option<f64> {
    let footprint = match footprint {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        _ => return None,
    };
    let aoi_area = aoi.unsigned_area();
    if aoi_area <= 0.0 {
        return None;
    }
    let shared = aoi.intersection(&footprint).unsigned_area();
    Some((shared / aoi_area * 100.0).clamp(0.0, 100.0))
}
