//! # wmtsx-tiles
//!
//! Tile grid planning, tile transport and georeferenced mosaic assembly for
//! WMTS imagery pyramids.
//!
//! ## Overview
//!
//! - [`TileMatrix`] describes a tiling scheme (Web Mercator or CRS84 quad).
//! - [`plan`] computes the block of tiles covering a bounding box at a zoom.
//! - A [`TileSource`] returns the bytes of one tile; [`HttpTileSource`]
//!   fetches them from a URL template.
//! - [`MosaicAssembler`] fetches the plan in parallel and stitches the tiles
//!   into a [`Mosaic`] with a north-up [`GeoTransform`].
//! - [`encode`] writes the mosaic as GeoTIFF, PNG or JPEG.
//!
//! ## Example
//!
//! ```no_run
//! use wmtsx_tiles::{encode, plan_lonlat, CreationOptions, FeatureTiles, HttpTileSource,
//!                   MosaicAssembler, OutputFormat, TileMatrix};
//!
//! let matrix = TileMatrix::web_mercator();
//! let plan = plan_lonlat((9.99, 44.99, 10.01, 45.01), 16, &matrix)?;
//!
//! let http = HttpTileSource::new("https://tiles.example.com/{feature_id}/{z}/{x}/{y}.png")?;
//! let assembled = MosaicAssembler::new(8)?.assemble(&plan, &FeatureTiles::new(&http, "abc123"));
//! for failure in &assembled.failed {
//!     println!("missing tile {}", failure.coord);
//! }
//!
//! let raster = encode(&assembled.mosaic, OutputFormat::GTiff, &CreationOptions::default())?;
//! std::fs::write("mosaic.tif", &raster.data)?;
//! # Ok::<(), wmtsx_tiles::TileError>(())
//! ```

mod encode;
mod error;
mod fetch;
mod matrix;
mod mosaic;
mod plan;

pub use encode::{encode, world_file, Compression, CreationOptions, EncodedRaster, OutputFormat};
pub use error::TileError;
pub use fetch::{
    DownloadStats, FeatureTiles, HttpTileSource, TileFeature, TileProvider, TileSource, DEFAULT_ATTEMPTS,
    DEFAULT_MAX_BACKOFF,
};
pub use matrix::{MapBounds, MatrixCrs, TileCoord, TileMatrix, DEFAULT_MAX_ZOOM, MIN_ZOOM};
pub use mosaic::{decode_tile, AssembledMosaic, GeoTransform, Mosaic, MosaicAssembler, TileFailure, BANDS};
pub use plan::{plan, plan_lonlat, PlannedTile, TilePlan};

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TileError>;
