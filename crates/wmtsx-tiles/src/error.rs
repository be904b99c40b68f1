//! Error types for the tiles crate.

use thiserror::Error;

/// Errors that can occur while planning, fetching, assembling or encoding tiles.
#[derive(Debug, Error)]
pub enum TileError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encoding or decoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// PNG/JPEG codec error.
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP client error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Zoom level outside the tile matrix's supported range.
    #[error("Invalid zoom level {zoom} (must be 1-{max_zoom})")]
    InvalidZoom {
        /// Requested zoom level.
        zoom: u8,
        /// Highest zoom the matrix supports.
        max_zoom: u8,
    },

    /// Bounds that are empty, non-finite or outside the tile matrix.
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    /// A single tile could not be fetched or decoded. Never fatal for a mosaic.
    #[error("Failed to fetch tile z={z} x={x} y={y}: {reason}")]
    TileFetch {
        /// Zoom level.
        z: u8,
        /// Tile column.
        x: u32,
        /// Tile row.
        y: u32,
        /// Reason for failure.
        reason: String,
    },

    /// The mosaic could not be encoded or written.
    #[error("Failed to encode or write raster: {0}")]
    EncodeWrite(String),

    /// Unknown output format or malformed creation option.
    #[error("Invalid output option: {0}")]
    InvalidOption(String),

    /// Unknown tile matrix identifier.
    #[error("Unknown tile matrix '{0}'")]
    UnknownMatrix(String),

    /// The tile worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
