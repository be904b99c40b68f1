//! Minimal GeoJSON document model shared by AOI files and catalogue responses.

use crate::{CatalogError, Result};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A GeoJSON position (`[x, y]` or `[x, y, z]`).
pub type Position = Vec<f64>;

/// A GeoJSON `FeatureCollection`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    /// Member features.
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// A GeoJSON `Feature`.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    /// Feature properties.
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    /// Feature geometry.
    #[serde(default)]
    pub geometry: Option<GeoJsonGeometry>,
}

/// GeoJSON geometry objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum GeoJsonGeometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl GeoJsonGeometry {
    /// GeoJSON type name of this geometry.
    pub fn type_name(&self) -> &'static str {
        match self {
            GeoJsonGeometry::Point(_) => "Point",
            GeoJsonGeometry::MultiPoint(_) => "MultiPoint",
            GeoJsonGeometry::LineString(_) => "LineString",
            GeoJsonGeometry::MultiLineString(_) => "MultiLineString",
            GeoJsonGeometry::Polygon(_) => "Polygon",
            GeoJsonGeometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Convert into a `geo` geometry.
    pub fn to_geo(&self) -> Result<Geometry<f64>> {
        Ok(match self {
            GeoJsonGeometry::Point(p) => Geometry::Point(Point::from(coord(p)?)),
            GeoJsonGeometry::MultiPoint(ps) => Geometry::MultiPoint(MultiPoint::new(
                ps.iter()
                    .map(|p| coord(p).map(Point::from))
                    .collect::<Result<Vec<_>>>()?,
            )),
            GeoJsonGeometry::LineString(ls) => Geometry::LineString(line_string(ls)?),
            GeoJsonGeometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
                mls.iter().map(|ls| line_string(ls)).collect::<Result<Vec<_>>>()?,
            )),
            GeoJsonGeometry::Polygon(rings) => Geometry::Polygon(polygon(rings)?),
            GeoJsonGeometry::MultiPolygon(polys) => Geometry::MultiPolygon(MultiPolygon::new(
                polys.iter().map(|rings| polygon(rings)).collect::<Result<Vec<_>>>()?,
            )),
        })
    }
}

fn coord(position: &Position) -> Result<Coord<f64>> {
    match position.as_slice() {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(CatalogError::Configuration(format!(
            "GeoJSON position needs at least two values, got {}",
            position.len()
        ))),
    }
}

fn line_string(positions: &[Position]) -> Result<LineString<f64>> {
    Ok(LineString::new(
        positions.iter().map(coord).collect::<Result<Vec<_>>>()?,
    ))
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter();
    let exterior = match rings.next() {
        Some(ring) => line_string(ring)?,
        None => LineString::new(Vec::new()),
    };
    let interiors = rings.map(|r| line_string(r)).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}
