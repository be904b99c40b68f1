//! Tile matrix definitions and tile addressing.
//!
//! A [`TileMatrix`] fixes the origin (top-left corner), tile pixel size and
//! per-zoom resolution of a WMTS tiling scheme. Tiles are addressed with
//! quad-tree coordinates:
//! - `z` is the zoom level (1 to the matrix's `max_zoom`)
//! - `x` is the column, 0 at the western edge, increasing eastward
//! - `y` is the row, 0 at the northern edge, increasing southward
//!
//! Two schemes are built in: `GoogleMapsCompatible` (Web Mercator,
//! EPSG:3857) and `WorldCRS84Quad` (geographic, EPSG:4326).

use crate::{Result, TileError};
use std::f64::consts::PI;
use std::fmt;

/// Lowest zoom level accepted by the planner.
pub const MIN_ZOOM: u8 = 1;

/// Highest zoom level of the built-in matrices.
pub const DEFAULT_MAX_ZOOM: u8 = 20;

/// WGS84 semi-major axis used by Web Mercator.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator world.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Quad-tree tile coordinates (z, x, y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level.
    pub z: u8,
    /// Column, increasing eastward.
    pub x: u32,
    /// Row, increasing southward.
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Coordinate reference system of a tile matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixCrs {
    /// Spherical Web Mercator, metres.
    WebMercator,
    /// WGS84 longitude/latitude, degrees.
    Geographic,
}

impl MatrixCrs {
    /// EPSG code of the CRS.
    pub fn epsg(&self) -> u16 {
        match self {
            MatrixCrs::WebMercator => 3857,
            MatrixCrs::Geographic => 4326,
        }
    }

    /// Whether coordinates are angular (degrees).
    pub fn is_geographic(&self) -> bool {
        matches!(self, MatrixCrs::Geographic)
    }
}

/// An axis-aligned rectangle in a matrix CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MapBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether `other` lies entirely within these bounds.
    pub fn contains(&self, other: &MapBounds) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Whether the bounds share any area or edge with `other`.
    pub fn intersects(&self, other: &MapBounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(TileError::InvalidBounds(format!("{:?}", self)));
        }
        Ok(())
    }
}

/// A fixed tiling scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrix {
    name: String,
    crs: MatrixCrs,
    origin_x: f64,
    origin_y: f64,
    tile_size: u32,
    base_resolution: f64,
    width0: u32,
    height0: u32,
    max_zoom: u8,
}

impl TileMatrix {
    /// `GoogleMapsCompatible`: Web Mercator, one 256 px tile at zoom 0.
    pub fn web_mercator() -> Self {
        let half_world = PI * EARTH_RADIUS_M;
        Self {
            name: "GoogleMapsCompatible".to_string(),
            crs: MatrixCrs::WebMercator,
            origin_x: -half_world,
            origin_y: half_world,
            tile_size: 256,
            base_resolution: 2.0 * half_world / 256.0,
            width0: 1,
            height0: 1,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }

    /// `WorldCRS84Quad`: geographic, two 256 px tiles at zoom 0.
    pub fn world_crs84_quad() -> Self {
        Self {
            name: "WorldCRS84Quad".to_string(),
            crs: MatrixCrs::Geographic,
            origin_x: -180.0,
            origin_y: 90.0,
            tile_size: 256,
            base_resolution: 180.0 / 256.0,
            width0: 2,
            height0: 1,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }

    /// Look up a built-in matrix by identifier or EPSG code.
    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "googlemapscompatible" | "webmercator" | "web_mercator" | "epsg:3857" | "3857" => {
                Ok(Self::web_mercator())
            }
            "worldcrs84quad" | "crs84" | "epsg:4326" | "4326" => Ok(Self::world_crs84_quad()),
            _ => Err(TileError::UnknownMatrix(name.to_string())),
        }
    }

    /// Cap the supported zoom range.
    pub fn with_max_zoom(mut self, max_zoom: u8) -> Self {
        self.max_zoom = max_zoom.clamp(MIN_ZOOM, DEFAULT_MAX_ZOOM);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crs(&self) -> MatrixCrs {
        self.crs
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Top-left corner of the matrix.
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_x, self.origin_y)
    }

    /// Reject zoom levels outside `[1, max_zoom]`.
    pub fn validate_zoom(&self, zoom: u8) -> Result<()> {
        if zoom < MIN_ZOOM || zoom > self.max_zoom {
            return Err(TileError::InvalidZoom {
                zoom,
                max_zoom: self.max_zoom,
            });
        }
        Ok(())
    }

    /// Ground size of one pixel at `zoom`, in CRS units.
    pub fn resolution(&self, zoom: u8) -> f64 {
        self.base_resolution / f64::from(1u32 << zoom)
    }

    /// Ground size of one tile at `zoom`, in CRS units.
    pub fn tile_span(&self, zoom: u8) -> f64 {
        self.resolution(zoom) * f64::from(self.tile_size)
    }

    /// Number of tile columns and rows at `zoom`.
    pub fn matrix_size(&self, zoom: u8) -> (u32, u32) {
        (self.width0 << zoom, self.height0 << zoom)
    }

    /// Full extent of the matrix.
    pub fn extent(&self) -> MapBounds {
        let (cols, rows) = self.matrix_size(0);
        let span = self.tile_span(0);
        MapBounds::new(
            self.origin_x,
            self.origin_y - span * f64::from(rows),
            self.origin_x + span * f64::from(cols),
            self.origin_y,
        )
    }

    /// Top-left corner of `tile`.
    pub fn tile_origin(&self, tile: TileCoord) -> (f64, f64) {
        let span = self.tile_span(tile.z);
        (
            self.origin_x + f64::from(tile.x) * span,
            self.origin_y - f64::from(tile.y) * span,
        )
    }

    /// Footprint of `tile`.
    pub fn tile_bounds(&self, tile: TileCoord) -> MapBounds {
        let span = self.tile_span(tile.z);
        let (left, top) = self.tile_origin(tile);
        MapBounds::new(left, top - span, left + span, top)
    }

    /// Tile containing the point `(x, y)`, clamped to the matrix.
    pub fn tile_for(&self, x: f64, y: f64, zoom: u8) -> Result<TileCoord> {
        self.validate_zoom(zoom)?;
        let span = self.tile_span(zoom);
        let (cols, rows) = self.matrix_size(zoom);
        let col = clamp_index((x - self.origin_x) / span, cols);
        let row = clamp_index((self.origin_y - y) / span, rows);
        Ok(TileCoord::new(zoom, col, row))
    }

    /// Project a lon/lat position into the matrix CRS.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self.crs {
            MatrixCrs::Geographic => (lon, lat),
            MatrixCrs::WebMercator => {
                let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
                let x = lon.to_radians() * EARTH_RADIUS_M;
                let y = (PI / 4.0 + lat / 2.0).tan().ln() * EARTH_RADIUS_M;
                (x, y)
            }
        }
    }

    /// Inverse of [`TileMatrix::project`].
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        match self.crs {
            MatrixCrs::Geographic => (x, y),
            MatrixCrs::WebMercator => {
                let lon = (x / EARTH_RADIUS_M).to_degrees();
                let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
                (lon, lat)
            }
        }
    }

    /// Project a lon/lat box `(min_lon, min_lat, max_lon, max_lat)` into the matrix CRS.
    pub fn project_bounds(&self, bbox: (f64, f64, f64, f64)) -> Result<MapBounds> {
        let (min_lon, min_lat, max_lon, max_lat) = bbox;
        let (min_x, min_y) = self.project(min_lon, min_lat);
        let (max_x, max_y) = self.project(max_lon, max_lat);
        let bounds = MapBounds::new(min_x, min_y, max_x, max_y);
        bounds.validate()?;
        Ok(bounds)
    }

    pub(crate) fn check_bounds(&self, bounds: &MapBounds) -> Result<()> {
        bounds.validate()?;
        if !self.extent().intersects(bounds) {
            return Err(TileError::InvalidBounds(format!(
                "{:?} lies outside the {} extent",
                bounds, self.name
            )));
        }
        Ok(())
    }
}

/// Floor of a fractional tile index, clamped to `[0, count)`.
pub(crate) fn clamp_index(fraction: f64, count: u32) -> u32 {
    let max = f64::from(count.saturating_sub(1));
    fraction.floor().clamp(0.0, max) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_web_mercator_constants() {
        let m = TileMatrix::web_mercator();
        assert_relative_eq!(m.origin().0, -20037508.342789244, epsilon = 1e-6);
        assert_relative_eq!(m.origin().1, 20037508.342789244, epsilon = 1e-6);
        assert_relative_eq!(m.resolution(0), 156543.03392804062, epsilon = 1e-6);
        assert_relative_eq!(m.resolution(1), 78271.51696402031, epsilon = 1e-6);
        assert_eq!(m.matrix_size(3), (8, 8));
        assert_eq!(m.crs().epsg(), 3857);
    }

    #[test]
    fn test_crs84_quad_layout() {
        let m = TileMatrix::world_crs84_quad();
        assert_eq!(m.matrix_size(0), (2, 1));
        assert_eq!(m.matrix_size(2), (8, 4));
        assert_relative_eq!(m.tile_span(0), 180.0);
        let extent = m.extent();
        assert_relative_eq!(extent.min_x, -180.0);
        assert_relative_eq!(extent.max_x, 180.0);
        assert_relative_eq!(extent.min_y, -90.0);
        assert_relative_eq!(extent.max_y, 90.0);
    }

    #[test]
    fn test_projection_roundtrip() {
        let m = TileMatrix::web_mercator();
        let (x, y) = m.project(0.0, 0.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);

        let (x, _) = m.project(180.0, 0.0);
        assert_relative_eq!(x, 20037508.342789244, epsilon = 1e-6);

        for (lon, lat) in [(-122.3321, 47.6062), (10.0, 45.0), (151.2, -33.9)] {
            let (x, y) = m.project(lon, lat);
            let (lon2, lat2) = m.unproject(x, y);
            assert_relative_eq!(lon, lon2, epsilon = 1e-9);
            assert_relative_eq!(lat, lat2, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_tile_for_matches_slippy_formula() {
        // Seattle at zoom 12 is tile 656/1430 in the OSM scheme
        let m = TileMatrix::web_mercator();
        let (x, y) = m.project(-122.3321, 47.6062);
        let tile = m.tile_for(x, y, 12).unwrap();
        assert_eq!(tile, TileCoord::new(12, 656, 1430));

        let bounds = m.tile_bounds(tile);
        assert!(bounds.min_x <= x && x <= bounds.max_x);
        assert!(bounds.min_y <= y && y <= bounds.max_y);
    }

    #[test]
    fn test_tile_for_clamps_to_matrix() {
        let m = TileMatrix::world_crs84_quad();
        assert_eq!(m.tile_for(180.0, -90.0, 1).unwrap(), TileCoord::new(1, 3, 1));
        assert_eq!(m.tile_for(-200.0, 95.0, 1).unwrap(), TileCoord::new(1, 0, 0));
    }

    #[test]
    fn test_invalid_zoom() {
        let m = TileMatrix::web_mercator();
        assert!(matches!(m.validate_zoom(0), Err(TileError::InvalidZoom { zoom: 0, .. })));
        assert!(m.validate_zoom(21).is_err());
        assert!(m.validate_zoom(20).is_ok());
        let capped = m.with_max_zoom(18);
        assert!(matches!(
            capped.validate_zoom(19),
            Err(TileError::InvalidZoom { zoom: 19, max_zoom: 18 })
        ));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(TileMatrix::by_name("EPSG:3857").unwrap(), TileMatrix::web_mercator());
        assert_eq!(
            TileMatrix::by_name("WorldCRS84Quad").unwrap(),
            TileMatrix::world_crs84_quad()
        );
        assert!(matches!(TileMatrix::by_name("mars"), Err(TileError::UnknownMatrix(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(TileCoord::new(5, 17, 11).to_string(), "5/17/11");
    }
}
