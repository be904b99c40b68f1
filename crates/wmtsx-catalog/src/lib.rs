//! # wmtsx-catalog
//!
//! Areas of interest, imagery catalogue records and feature selection.
//!
//! ## Overview
//!
//! - [`load_aois`] reads a GeoJSON feature collection and normalises each
//!   geometry into a buffered lon/lat bounding box ([`AreaOfInterest`]).
//! - A [`Catalogue`] lists the acquisitions covering an AOI
//!   ([`WfsCatalogue`], [`FileCatalogue`], [`BasemapCatalogue`]).
//! - The [`FilterChain`] applies the [`FilterCriteria`] predicates.
//! - An optional [`PeriodResolutionTable`] weights features by acquisition
//!   period and resolution bucket.
//! - The [`Selector`] combines both, ranks the survivors and caps the result
//!   at the per-AOI download limit.
//!
//! ## Example
//!
//! ```no_run
//! use wmtsx_catalog::{load_aois, AoiOptions, FileCatalogue, FilterCriteria, Selector};
//!
//! let aois = load_aois("sites.geojson", &AoiOptions::default())?;
//! let catalogue = FileCatalogue::new("inventory.geojson");
//! let criteria = FilterCriteria {
//!     max_cloud: Some(0.1),
//!     max_downloads: Some(3),
//!     ..Default::default()
//! };
//! let selector = Selector::new(criteria, None)?;
//! for aoi in &aois {
//!     for ranked in selector.query(&catalogue, aoi)? {
//!         println!("{} {}", aoi.id, ranked.feature.id);
//!     }
//! }
//! # Ok::<(), wmtsx_catalog::CatalogError>(())
//! ```

mod aoi;
mod datetime;
mod decision;
mod error;
mod feature;
mod filter;
mod geojson;
mod selector;
mod source;

pub use aoi::{
    load_aois, parse_aois, sanitize_name, utm_zone, AoiOptions, AreaOfInterest, GeometryNormalizer,
    DEFAULT_ENVELOPE_DISTANCE_M, DEFAULT_POINT_DISTANCE_M,
};
pub use datetime::{
    deserialize_opt_datetime, deserialize_opt_end_datetime, parse_datetime, parse_end_datetime,
};
pub use decision::{Classification, PeriodResolutionTable, PeriodRow};
pub use error::CatalogError;
pub use feature::{platform_name, CatalogueFeature};
pub use filter::{apply, FilterChain, FilterCriteria, Predicate};
pub use geojson::{Feature, FeatureCollection, GeoJsonGeometry};
pub use selector::{RankedFeature, Selector};
pub use source::{
    features_from_geojson, BasemapCatalogue, Catalogue, Credentials, FileCatalogue, WfsCatalogue,
    DEFAULT_MAX_FEATURES,
};

/// Result type for catalogue operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
