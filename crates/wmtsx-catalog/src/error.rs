//! Error types for the catalogue crate.

use thiserror::Error;

/// Errors that can occur while loading AOIs, querying a catalogue or selecting features.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error (AOI files and catalogue responses).
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error (decision table files).
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Contradictory or missing selection criteria. Fatal for the whole run.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The catalogue collaborator failed. Fatal for the AOI being queried only.
    #[error("Catalogue query failed for AOI '{aoi}': {reason}")]
    MetadataQuery {
        /// Identity of the AOI whose query failed.
        aoi: String,
        /// Reason for failure.
        reason: String,
    },

    /// An AOI geometry could not be read or normalised.
    #[error("Invalid AOI geometry at index {index}: {reason}")]
    InvalidGeometry {
        /// Position of the feature in the AOI source.
        index: usize,
        /// Reason for failure.
        reason: String,
    },

    /// Coordinate projection failed.
    #[error("Projection error: {0}")]
    Projection(String),

    /// A datetime string matched none of the accepted formats.
    #[error("Invalid datetime '{0}' (expected DD/MM/YYYY HH:MM:SS, YYYY-MM-DD[THH:MM:SS])")]
    InvalidDatetime(String),
}
