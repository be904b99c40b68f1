//! Error types for the extraction runner.

use thiserror::Error;
use wmtsx_catalog::CatalogError;
use wmtsx_tiles::TileError;

/// Errors that can occur while configuring or running an extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Catalogue, AOI or selection error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Tile planning, transport or encoding error.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Missing or contradictory configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A mosaic could not be encoded or written. Fatal for that feature only.
    #[error("Failed to write {path}: {reason}")]
    EncodeWrite {
        /// Destination path.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

impl ExtractError {
    /// Whether the error aborts the whole run with a non-zero exit code.
    ///
    /// Configuration and zoom errors are fatal; everything else is scoped to
    /// one AOI or one feature and only appears in the summary.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExtractError::Configuration(_) | ExtractError::Yaml(_) => true,
            ExtractError::Catalog(e) => matches!(
                e,
                CatalogError::Configuration(_) | CatalogError::InvalidDatetime(_) | CatalogError::Yaml(_)
            ),
            ExtractError::Tile(e) => matches!(
                e,
                TileError::InvalidZoom { .. } | TileError::InvalidOption(_) | TileError::UnknownMatrix(_)
            ),
            ExtractError::Io(_) | ExtractError::EncodeWrite { .. } => false,
        }
    }

    /// Wrap any setup failure as a configuration error with context.
    pub(crate) fn config(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        ExtractError::Configuration(format!("{}: {}", context, err))
    }
}
