//! Catalogue feature records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One acquisition returned by the imagery catalogue.
///
/// Optional attributes are `None` when the catalogue does not report them;
/// the filter chain lets such values pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueFeature {
    /// Unique feature identifier.
    pub id: String,
    /// Platform (sensor) name, e.g. `WorldView-03`.
    pub platform: Option<String>,
    /// Product type.
    pub product: Option<String>,
    /// Acquisition timestamp.
    pub acquired: Option<NaiveDateTime>,
    /// Cloud cover fraction in `[0, 1]`.
    pub cloud_cover: Option<f64>,
    /// Nominal ground resolution in metres.
    pub resolution: Option<f64>,
    /// Percentage of the AOI covered by the acquisition footprint, in `[0, 100]`.
    pub overlap: Option<f64>,
}

impl CatalogueFeature {
    /// Create a feature with only an identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform: None,
            product: None,
            acquired: None,
            cloud_cover: None,
            resolution: None,
            overlap: None,
        }
    }

    /// Set the platform.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Set the product type.
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Set the acquisition timestamp.
    pub fn with_acquired(mut self, acquired: NaiveDateTime) -> Self {
        self.acquired = Some(acquired);
        self
    }

    /// Set the cloud cover fraction.
    pub fn with_cloud_cover(mut self, cloud_cover: f64) -> Self {
        self.cloud_cover = Some(cloud_cover);
        self
    }

    /// Set the ground resolution.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Set the AOI overlap percentage.
    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = Some(overlap);
        self
    }
}

/// Map a catalogue source code to its platform name.
///
/// Unknown codes are returned unchanged.
pub fn platform_name(source: &str) -> &str {
    match source {
        "WV01" => "WorldView-01",
        "WV02" => "WorldView-02",
        "WV03_VNIR" | "WV03_SWIR" => "WorldView-03",
        "WV04" => "WorldView-04",
        "GE01" => "GeoEye-01",
        "QB02" => "Quickbird",
        other => other,
    }
}
