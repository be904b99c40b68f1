//! Raster encoders.
//!
//! GeoTIFF output carries its georeferencing in the GeoTIFF tags; PNG and
//! JPEG output is paired with a world file. Creation options use the
//! `KEY=VALUE` form of GDAL drivers, e.g. `TILED=YES COMPRESS=LZW`.

use crate::mosaic::Mosaic;
use crate::{Result, TileError};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use std::fmt;
use std::io::{Cursor, Seek, Write};
use std::str::FromStr;
use tiff::encoder::compression::{
    Compression as TiffCompression, Deflate, Lzw, Uncompressed,
};
use tiff::encoder::{colortype, DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::warn;

// GeoTIFF tag IDs
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// GDAL's default JPEG quality.
const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Edge of the internal blocks of a tiled GeoTIFF.
pub const GEOTIFF_BLOCK_SIZE: u32 = 256;

const RGBA_SAMPLES: usize = 4;

/// Output raster format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    GTiff,
    Png,
    Jpeg,
}

impl OutputFormat {
    /// File extension of the raster.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GTiff => "tif",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    /// Extension of the world file sidecar, if the format needs one.
    pub fn world_file_extension(&self) -> Option<&'static str> {
        match self {
            OutputFormat::GTiff => None,
            OutputFormat::Png => Some("pgw"),
            OutputFormat::Jpeg => Some("jgw"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GTIFF" | "TIFF" | "TIF" => Ok(OutputFormat::GTiff),
            "PNG" => Ok(OutputFormat::Png),
            "JPEG" | "JPG" => Ok(OutputFormat::Jpeg),
            _ => Err(TileError::InvalidOption(format!("unsupported output format '{}'", s))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::GTiff => "GTiff",
            OutputFormat::Png => "PNG",
            OutputFormat::Jpeg => "JPEG",
        };
        f.write_str(name)
    }
}

/// GeoTIFF compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
}

/// Parsed creation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationOptions {
    pub compression: Compression,
    /// Internal 256x256 tiling of GeoTIFF output. Strips otherwise.
    pub tiled: bool,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for CreationOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lzw,
            tiled: true,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl CreationOptions {
    /// Parse a `KEY=VALUE` list separated by whitespace or commas.
    ///
    /// GDAL-style `-co` prefixes are accepted. Unknown keys are ignored with
    /// a warning; bad values of known keys are errors.
    pub fn parse(text: &str) -> Result<Self> {
        let mut options = Self::default();
        let tokens = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("-co"));

        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                TileError::InvalidOption(format!("expected KEY=VALUE, got '{}'", token))
            })?;
            let value = value.to_ascii_uppercase();
            match key.to_ascii_uppercase().as_str() {
                "COMPRESS" => {
                    options.compression = match value.as_str() {
                        "NONE" => Compression::None,
                        "LZW" => Compression::Lzw,
                        "DEFLATE" => Compression::Deflate,
                        _ => {
                            return Err(TileError::InvalidOption(format!(
                                "unsupported compression '{}'",
                                value
                            )))
                        }
                    }
                }
                "TILED" => options.tiled = parse_flag(&value)?,
                "QUALITY" => {
                    options.quality = value
                        .parse::<u8>()
                        .ok()
                        .filter(|q| (1..=100).contains(q))
                        .ok_or_else(|| {
                            TileError::InvalidOption(format!("QUALITY must be 1-100, got '{}'", value))
                        })?
                }
                other => warn!(option = other, "Ignoring unknown creation option"),
            }
        }
        Ok(options)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "YES" | "TRUE" | "ON" | "1" => Ok(true),
        "NO" | "FALSE" | "OFF" | "0" => Ok(false),
        _ => Err(TileError::InvalidOption(format!("expected YES or NO, got '{}'", value))),
    }
}

/// An encoded raster and its optional world file.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRaster {
    pub data: Vec<u8>,
    /// Contents of the world file sidecar, for formats without embedded georeferencing.
    pub world_file: Option<String>,
}

/// Encode `mosaic` in `format`.
pub fn encode(mosaic: &Mosaic, format: OutputFormat, options: &CreationOptions) -> Result<EncodedRaster> {
    if mosaic.width() == 0 || mosaic.height() == 0 {
        return Err(TileError::EncodeWrite("mosaic has zero dimensions".to_string()));
    }

    let data = match format {
        OutputFormat::GTiff => match (options.compression, options.tiled) {
            (Compression::None, false) => write_geotiff(mosaic, Uncompressed::default())?,
            (Compression::Lzw, false) => write_geotiff(mosaic, Lzw::default())?,
            (Compression::Deflate, false) => write_geotiff(mosaic, Deflate::default())?,
            (Compression::None, true) => write_tiled_geotiff(mosaic, Uncompressed::default())?,
            (Compression::Lzw, true) => write_tiled_geotiff(mosaic, Lzw::default())?,
            (Compression::Deflate, true) => write_tiled_geotiff(mosaic, Deflate::default())?,
        },
        OutputFormat::Png => {
            let mut data = Vec::new();
            mosaic.to_image()?.write_with_encoder(PngEncoder::new(&mut data))?;
            data
        }
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(mosaic.to_image()?).to_rgb8();
            let mut data = Vec::new();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut data, options.quality))?;
            data
        }
    };

    let world_file = format.world_file_extension().map(|_| world_file(mosaic));
    Ok(EncodedRaster { data, world_file })
}

/// World file for `mosaic`: pixel sizes, rotations and the centre of the top-left pixel.
pub fn world_file(mosaic: &Mosaic) -> String {
    let t = mosaic.transform();
    let (x, y) = t.pixel_center(0, 0);
    format!(
        "{:.10}\n0.0000000000\n0.0000000000\n{:.10}\n{:.10}\n{:.10}\n",
        t.pixel_width, -t.pixel_height, x, y
    )
}

fn write_geotiff<D: TiffCompression>(mosaic: &Mosaic, compression: D) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        let mut image = encoder.new_image_with_compression::<colortype::RGBA8, D>(
            mosaic.width(),
            mosaic.height(),
            compression,
        )?;
        write_geotiff_tags(image.encoder(), mosaic)?;
        image.write_data(mosaic.data())?;
    }
    Ok(cursor.into_inner())
}

/// Write `mosaic` as 256x256 blocks. Edge blocks are padded with transparent pixels.
fn write_tiled_geotiff<D: TiffCompression>(mosaic: &Mosaic, mut compression: D) -> Result<Vec<u8>> {
    let (width, height) = (mosaic.width(), mosaic.height());
    let block = GEOTIFF_BLOCK_SIZE;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        let mut dir = encoder.new_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;
        dir.write_tag(Tag::BitsPerSample, &[8u16; RGBA_SAMPLES][..])?;
        dir.write_tag(Tag::SamplesPerPixel, RGBA_SAMPLES as u16)?;
        dir.write_tag(Tag::Compression, D::COMPRESSION_METHOD.to_u16())?;
        // RGB with unassociated alpha
        dir.write_tag(Tag::PhotometricInterpretation, 2u16)?;
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::ExtraSamples, 2u16)?;
        dir.write_tag(Tag::SampleFormat, &[1u16; RGBA_SAMPLES][..])?;
        dir.write_tag(Tag::TileWidth, block)?;
        dir.write_tag(Tag::TileLength, block)?;
        write_geotiff_tags(&mut dir, mosaic)?;

        let row_bytes = width as usize * RGBA_SAMPLES;
        let block_row_bytes = block as usize * RGBA_SAMPLES;
        let mut raw = vec![0u8; block_row_bytes * block as usize];
        let mut packed = Vec::new();
        let mut offsets = Vec::new();
        let mut byte_counts = Vec::new();

        // Blocks are stored row-major, left to right then top to bottom.
        for block_y in (0..height).step_by(block as usize) {
            for block_x in (0..width).step_by(block as usize) {
                raw.fill(0);
                let cols = (width - block_x).min(block) as usize * RGBA_SAMPLES;
                let rows = (height - block_y).min(block) as usize;
                for r in 0..rows {
                    let src = (block_y as usize + r) * row_bytes + block_x as usize * RGBA_SAMPLES;
                    let dst = r * block_row_bytes;
                    raw[dst..dst + cols].copy_from_slice(&mosaic.data()[src..src + cols]);
                }

                packed.clear();
                compression.write_to(&mut packed, &raw)?;
                let offset = dir.write_data(packed.as_slice())?;
                offsets.push(u32::try_from(offset).map_err(|_| {
                    TileError::EncodeWrite("GeoTIFF exceeds 4 GiB; use fewer tiles".to_string())
                })?);
                byte_counts.push(packed.len() as u32);
            }
        }

        dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
        dir.write_tag(Tag::TileByteCounts, byte_counts.as_slice())?;
        dir.finish()?;
    }
    Ok(cursor.into_inner())
}

fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    mosaic: &Mosaic,
) -> Result<()> {
    let t = mosaic.transform();

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [t.pixel_width, t.pixel_height, 0.0];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), &pixel_scale[..])?;

    // ModelTiepoint: pixel (0, 0) -> top-left corner
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), &tiepoint[..])?;

    let citation = format!("{}|", crs_citation(mosaic.epsg()));
    let geokeys = geokey_directory(mosaic.epsg(), citation.len() as u16);
    dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), &geokeys[..])?;
    dir.write_tag(Tag::Unknown(GEOTIFF_GEOASCIIPARAMS), citation.as_str())?;
    Ok(())
}

fn crs_citation(epsg: u16) -> String {
    match epsg {
        3857 => "WGS 84 / Pseudo-Mercator".to_string(),
        4326 => "WGS 84".to_string(),
        other => format!("EPSG:{}", other),
    }
}

/// Header `[version, revision, minor, count]` followed by
/// `[key, location, count, value]` entries sorted by key.
fn geokey_directory(epsg: u16, citation_len: u16) -> Vec<u16> {
    let geographic = epsg == 4326;
    let mut keys = vec![1, 1, 0, 4];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    keys.extend_from_slice(&[GT_CITATION_GEO_KEY, GEOTIFF_GEOASCIIPARAMS, citation_len, 0]);
    if geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, epsg]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, epsg]);
    }
    keys
}
