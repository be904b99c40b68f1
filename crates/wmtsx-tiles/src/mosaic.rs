//! Mosaic assembler.
//!
//! Fetches every tile of a [`TilePlan`] through a [`TileSource`], decodes it
//! and copies it into an RGBA buffer at the tile's pixel offset. A tile that
//! cannot be fetched or decoded leaves its footprint as no-data (alpha 0)
//! and is listed in [`AssembledMosaic::failed`]; it never aborts the mosaic.
//!
//! Fetches run on a bounded rayon pool and hand decoded tiles to the calling
//! thread over a bounded channel. The caller places each tile as it arrives,
//! so at most a few decoded tiles per worker are held at once. Placement
//! depends only on tile coordinates, so the output does not depend on
//! completion order.

use crate::fetch::TileSource;
use crate::matrix::TileCoord;
use crate::plan::{PlannedTile, TilePlan};
use crate::{Result, TileError};
use image::RgbaImage;
use tracing::{debug, warn};

/// Bytes per mosaic pixel (RGBA).
pub const BANDS: usize = 4;

/// North-up affine transform from pixel to map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Map x of the top-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// Map y of the top-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Pixel width in map units.
    pub pixel_width: f64,
    /// Pixel height in map units (positive; rows run southward).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Derive the transform of a plan from its top-left tile and zoom.
    pub fn for_plan(plan: &TilePlan) -> Self {
        let (origin_x, origin_y) = plan.matrix().tile_origin(plan.top_left());
        let resolution = plan.matrix().resolution(plan.zoom());
        Self {
            origin_x,
            origin_y,
            pixel_width: resolution,
            pixel_height: resolution,
        }
    }

    /// Map coordinates of a (fractional) pixel position.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    /// Map coordinates of the centre of pixel `(col, row)`.
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        self.apply(f64::from(col) + 0.5, f64::from(row) + 0.5)
    }

    /// Pixel position of a map coordinate.
    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// The six GDAL geotransform coefficients.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_height,
        ]
    }
}

/// An RGBA raster with georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct Mosaic {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    transform: GeoTransform,
    epsg: u16,
}

impl Mosaic {
    /// A fully no-data mosaic.
    pub fn new(width: u32, height: u32, transform: GeoTransform, epsg: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * BANDS],
            transform,
            epsg,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// EPSG code of the mosaic CRS.
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// Interleaved RGBA bytes, row-major from the top-left.
    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * BANDS;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Whether pixel `(x, y)` holds no data.
    pub fn is_no_data(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y).map_or(true, |p| p[3] == 0)
    }

    /// Copy `tile` into the buffer with its top-left at `(offset_x, offset_y)`.
    ///
    /// Parts falling outside the buffer are clipped.
    pub fn place(&mut self, offset_x: u32, offset_y: u32, tile: &RgbaImage) {
        if offset_x >= self.width || offset_y >= self.height {
            return;
        }
        let copy_w = tile.width().min(self.width - offset_x) as usize;
        let copy_h = tile.height().min(self.height - offset_y);
        let src = tile.as_raw();
        let src_stride = tile.width() as usize * BANDS;
        let dst_stride = self.width as usize * BANDS;

        for row in 0..copy_h {
            let s = row as usize * src_stride;
            let d = (offset_y + row) as usize * dst_stride + offset_x as usize * BANDS;
            self.pixels[d..d + copy_w * BANDS].copy_from_slice(&src[s..s + copy_w * BANDS]);
        }
    }

    /// Convert into an `image` buffer.
    pub fn to_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| TileError::EncodeWrite("mosaic buffer size mismatch".to_string()))
    }
}

/// A tile that could not be placed.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFailure {
    pub coord: TileCoord,
    pub reason: String,
}

/// The result of assembling one plan.
#[derive(Debug, Clone)]
pub struct AssembledMosaic {
    pub mosaic: Mosaic,
    /// Tiles left as no-data, in plan order.
    pub failed: Vec<TileFailure>,
}

impl AssembledMosaic {
    /// Whether every planned tile was placed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_coords(&self) -> Vec<TileCoord> {
        self.failed.iter().map(|f| f.coord).collect()
    }
}

/// Assembles mosaics on a bounded pool of fetch workers.
pub struct MosaicAssembler {
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for MosaicAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicAssembler")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl MosaicAssembler {
    /// Create an assembler fetching up to `workers` tiles at once.
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("tile-fetch-{}", i))
            .build()?;
        Ok(Self { pool })
    }

    /// Decoded tiles allowed to wait for placement.
    fn in_flight(&self) -> usize {
        self.pool.current_num_threads() * 2
    }

    /// Fetch and decode every tile of `plan`, handing each to `visit` on the
    /// calling thread as soon as it is ready. Arrival order is unspecified.
    pub fn for_each_tile<S, F>(&self, plan: &TilePlan, source: &S, mut visit: F)
    where
        S: TileSource + ?Sized,
        F: FnMut(PlannedTile, Result<RgbaImage>),
    {
        let tile_size = plan.matrix().tile_size();
        let (tile_tx, tile_rx) =
            crossbeam_channel::bounded::<(PlannedTile, Result<RgbaImage>)>(self.in_flight());

        self.pool.in_place_scope(|scope| {
            for planned in plan.tiles() {
                let tile_tx = tile_tx.clone();
                scope.spawn(move |_| {
                    let decoded = source
                        .fetch(planned.coord)
                        .and_then(|bytes| decode_tile(&bytes, planned.coord, tile_size));
                    // The receiver is drained until every sender is gone
                    let _ = tile_tx.send((*planned, decoded));
                });
            }
            drop(tile_tx);

            for (planned, decoded) in tile_rx.iter() {
                visit(planned, decoded);
            }
        });
    }

    /// Fetch, decode and place every tile of `plan`.
    pub fn assemble<S: TileSource + ?Sized>(&self, plan: &TilePlan, source: &S) -> AssembledMosaic {
        let (width, height) = plan.pixel_size();
        let transform = GeoTransform::for_plan(plan);
        let mut mosaic = Mosaic::new(width, height, transform, plan.matrix().crs().epsg());
        let mut failed = Vec::new();

        self.for_each_tile(plan, source, |planned, decoded| match decoded {
            Ok(tile) => mosaic.place(planned.offset_x, planned.offset_y, &tile),
            Err(e) => {
                warn!(tile = %planned.coord, error = %e, "Tile left as no-data");
                failed.push(TileFailure {
                    coord: planned.coord,
                    reason: e.to_string(),
                });
            }
        });
        failed.sort_by_key(|f| (f.coord.y, f.coord.x));

        debug!(
            tiles = plan.len(),
            failed = failed.len(),
            width,
            height,
            "Assembled mosaic"
        );
        AssembledMosaic { mosaic, failed }
    }
}

/// Decode a tile image and check its size against the matrix tile size.
pub fn decode_tile(bytes: &[u8], coord: TileCoord, tile_size: u32) -> Result<RgbaImage> {
    let fetch_error = |reason: String| TileError::TileFetch {
        z: coord.z,
        x: coord.x,
        y: coord.y,
        reason,
    };
    let image = image::load_from_memory(bytes)
        .map_err(|e| fetch_error(format!("undecodable tile: {}", e)))?
        .to_rgba8();
    if image.width() != tile_size || image.height() != tile_size {
        return Err(fetch_error(format!(
            "tile is {}x{}, expected {}x{}",
            image.width(),
            image.height(),
            tile_size,
            tile_size
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{MapBounds, TileMatrix};
    use crate::plan::plan;
    use approx::assert_relative_eq;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_tile(color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(256, 256, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_place_clips() {
        let transform = GeoTransform {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        };
        let mut mosaic = Mosaic::new(4, 4, transform, 4326);
        let tile = RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 255]));
        mosaic.place(2, 2, &tile);
        assert_eq!(mosaic.pixel(3, 3), Some([9, 9, 9, 255]));
        assert!(mosaic.is_no_data(1, 1));
        assert!(mosaic.is_no_data(4, 4));
    }

    #[test]
    fn test_transform_roundtrip() {
        let t = GeoTransform {
            origin_x: 100.0,
            origin_y: 50.0,
            pixel_width: 0.5,
            pixel_height: 0.25,
        };
        let (x, y) = t.pixel_center(3, 7);
        assert_relative_eq!(x, 101.75);
        assert_relative_eq!(y, 48.125);
        let (c, r) = t.invert(x, y);
        assert_relative_eq!(c, 3.5);
        assert_relative_eq!(r, 7.5);
        assert_eq!(t.to_gdal(), [100.0, 0.5, 0.0, 50.0, 0.0, -0.25]);
    }

    #[test]
    fn test_assemble_places_by_coordinate() {
        let m = TileMatrix::world_crs84_quad();
        let p = plan(&MapBounds::new(-100.0, -10.0, 10.0, 10.0), 1, &m).unwrap();
        let source = |tile: TileCoord| -> Result<Vec<u8>> {
            Ok(png_tile([tile.x as u8 * 50, tile.y as u8 * 100, 0, 255]))
        };
        let assembled = MosaicAssembler::new(4).unwrap().assemble(&p, &source);
        assert!(assembled.is_complete());
        let mosaic = &assembled.mosaic;
        assert_eq!((mosaic.width(), mosaic.height()), (768, 512));
        assert_eq!(mosaic.pixel(10, 10), Some([0, 0, 0, 255]));
        assert_eq!(mosaic.pixel(600, 10), Some([100, 0, 0, 255]));
        assert_eq!(mosaic.pixel(300, 400), Some([50, 100, 0, 255]));
    }

    #[test]
    fn test_tiles_are_placed_while_others_are_fetched() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let m = TileMatrix::world_crs84_quad();
        let p = plan(&MapBounds::new(-180.0, -90.0, 180.0, 90.0), 2, &m).unwrap();
        assert_eq!(p.len(), 32);

        let fetched = AtomicUsize::new(0);
        let source = |_: TileCoord| -> Result<Vec<u8>> {
            fetched.fetch_add(1, Ordering::SeqCst);
            Ok(png_tile([1, 2, 3, 255]))
        };
        let assembler = MosaicAssembler::new(1).unwrap();
        let mut visited = 0;
        let mut most_outstanding = 0;
        assembler.for_each_tile(&p, &source, |_, decoded| {
            assert!(decoded.is_ok());
            visited += 1;
            most_outstanding = most_outstanding.max(fetched.load(Ordering::SeqCst) - visited + 1);
        });
        assert_eq!(visited, 32);
        // Queued tiles, the one being visited and the one the worker holds
        assert!(
            most_outstanding <= assembler.in_flight() + 2,
            "{} tiles held before placement",
            most_outstanding
        );
    }

    #[test]
    fn test_failures_are_listed_in_plan_order() {
        let m = TileMatrix::world_crs84_quad();
        let p = plan(&MapBounds::new(-180.0, -90.0, 180.0, 90.0), 1, &m).unwrap();
        let source = |tile: TileCoord| -> Result<Vec<u8>> {
            if tile.x % 2 == 0 {
                Err(TileError::TileFetch {
                    z: tile.z,
                    x: tile.x,
                    y: tile.y,
                    reason: "HTTP 404".to_string(),
                })
            } else {
                Ok(png_tile([5, 5, 5, 255]))
            }
        };
        let assembled = MosaicAssembler::new(4).unwrap().assemble(&p, &source);
        let expected: Vec<TileCoord> = p
            .tiles()
            .iter()
            .map(|t| t.coord)
            .filter(|c| c.x % 2 == 0)
            .collect();
        assert_eq!(assembled.failed_coords(), expected);
        assert!(assembled.mosaic.is_no_data(10, 10));
    }

    #[test]
    fn test_undecodable_and_wrong_size_tiles_fail() {
        let coord = TileCoord::new(1, 0, 0);
        assert!(matches!(
            decode_tile(b"not an image", coord, 256),
            Err(TileError::TileFetch { .. })
        ));

        let small = RgbaImage::from_pixel(64, 64, Rgba([1, 2, 3, 255]));
        let mut out = Cursor::new(Vec::new());
        small.write_to(&mut out, ImageFormat::Png).unwrap();
        assert!(decode_tile(out.get_ref(), coord, 256).is_err());
        assert!(decode_tile(out.get_ref(), coord, 64).is_ok());
    }
}
