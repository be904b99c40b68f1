//! Tile grid planner.
//!
//! Turns a bounding box and zoom level into the smallest contiguous block of
//! tiles whose footprints cover the box. Tiles are listed row-major from the
//! top-left, each with its pixel offset into the mosaic.

use crate::matrix::{clamp_index, MapBounds, TileCoord, TileMatrix};
use crate::Result;

/// One tile of a plan and where it lands in the mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTile {
    pub coord: TileCoord,
    /// Pixel column of the tile's left edge in the mosaic.
    pub offset_x: u32,
    /// Pixel row of the tile's top edge in the mosaic.
    pub offset_y: u32,
}

/// A rectangular block of tiles covering an AOI at one zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    matrix: TileMatrix,
    zoom: u8,
    min_col: u32,
    max_col: u32,
    min_row: u32,
    max_row: u32,
    tiles: Vec<PlannedTile>,
}

impl TilePlan {
    pub fn matrix(&self) -> &TileMatrix {
        &self.matrix
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn tiles(&self) -> &[PlannedTile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of tile columns and rows.
    pub fn grid_size(&self) -> (u32, u32) {
        (self.max_col - self.min_col + 1, self.max_row - self.min_row + 1)
    }

    /// Mosaic size in pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        let (cols, rows) = self.grid_size();
        let size = self.matrix.tile_size();
        (cols * size, rows * size)
    }

    /// Top-left tile of the block.
    pub fn top_left(&self) -> TileCoord {
        TileCoord::new(self.zoom, self.min_col, self.min_row)
    }

    /// Union of the planned tile footprints.
    pub fn bounds(&self) -> MapBounds {
        let top_left = self.matrix.tile_bounds(self.top_left());
        let bottom_right = self
            .matrix
            .tile_bounds(TileCoord::new(self.zoom, self.max_col, self.max_row));
        MapBounds::new(
            top_left.min_x,
            bottom_right.min_y,
            bottom_right.max_x,
            top_left.max_y,
        )
    }
}

/// Plan the tiles covering `bounds` (in the matrix CRS) at `zoom`.
///
/// The lower edges use `floor`; the upper edges exclude a tile that only
/// touches the box along its boundary. Indices are clamped to the matrix.
pub fn plan(bounds: &MapBounds, zoom: u8, matrix: &TileMatrix) -> Result<TilePlan> {
    matrix.validate_zoom(zoom)?;
    matrix.check_bounds(bounds)?;

    let span = matrix.tile_span(zoom);
    let (origin_x, origin_y) = matrix.origin();
    let (cols, rows) = matrix.matrix_size(zoom);

    let min_col = clamp_index((bounds.min_x - origin_x) / span, cols);
    let min_row = clamp_index((origin_y - bounds.max_y) / span, rows);
    let max_col = clamp_index(upper_index((bounds.max_x - origin_x) / span), cols).max(min_col);
    let max_row = clamp_index(upper_index((origin_y - bounds.min_y) / span), rows).max(min_row);

    let size = matrix.tile_size();
    let tiles = (min_row..=max_row)
        .flat_map(|row| {
            (min_col..=max_col).map(move |col| PlannedTile {
                coord: TileCoord::new(zoom, col, row),
                offset_x: (col - min_col) * size,
                offset_y: (row - min_row) * size,
            })
        })
        .collect();

    Ok(TilePlan {
        matrix: matrix.clone(),
        zoom,
        min_col,
        max_col,
        min_row,
        max_row,
        tiles,
    })
}

/// Plan the tiles covering a lon/lat box `(min_lon, min_lat, max_lon, max_lat)`.
pub fn plan_lonlat(bbox: (f64, f64, f64, f64), zoom: u8, matrix: &TileMatrix) -> Result<TilePlan> {
    matrix.validate_zoom(zoom)?;
    let bounds = matrix.project_bounds(bbox)?;
    plan(&bounds, zoom, matrix)
}

/// Index of the last tile reached by a fractional upper edge.
fn upper_index(fraction: f64) -> f64 {
    fraction.ceil() - 1.0
}
