//! Areas of interest and the geometry normaliser.
//!
//! Every input geometry is reduced to a lon/lat bounding rectangle that is used
//! both for the catalogue query and for tile coverage:
//! - Points become a square box of half-side `distance` metres (default 1000 m).
//! - Other geometries become their envelope expanded by `distance` metres
//!   (default 10 m), or, in bbox mode, a square box around their centroid.
//!
//! Buffering happens in the UTM zone of the geometry so that distances are metric.

use crate::geojson::FeatureCollection;
use crate::{CatalogError, Result};
use geo::{BoundingRect, Centroid, Coord, CoordsIter, Geometry, Polygon, Rect};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Default half-side of the box built around point geometries, in metres.
pub const DEFAULT_POINT_DISTANCE_M: f64 = 1000.0;

/// Default buffer applied to line and polygon envelopes, in metres.
pub const DEFAULT_ENVELOPE_DISTANCE_M: f64 = 10.0;

/// An area of interest: one per input geometry feature, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    /// Identity used for output directories and reports.
    pub id: String,
    /// GeoJSON type of the source geometry.
    pub geometry_type: String,
    /// Bounding rectangle in lon/lat (EPSG:4326).
    pub bounds: Rect<f64>,
    /// Buffer distance applied during normalisation, in metres.
    pub distance: f64,
}

impl AreaOfInterest {
    /// Bounding rectangle as a polygon, for overlap computations.
    pub fn polygon(&self) -> Polygon<f64> {
        self.bounds.to_polygon()
    }

    /// Bounds as `(min_lon, min_lat, max_lon, max_lat)`.
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        let min = self.bounds.min();
        let max = self.bounds.max();
        (min.x, min.y, max.x, max.y)
    }
}

/// Options controlling AOI identity and buffering.
#[derive(Debug, Clone, Default)]
pub struct AoiOptions {
    /// Feature attribute holding the AOI name.
    pub field: Option<String>,
    /// Buffer distance in metres; the per-geometry default applies when unset.
    pub distance: Option<f64>,
    /// Build a box around the centroid for non-point geometries.
    pub bbox: bool,
}

/// Converts input geometries into canonical bounding shapes.
#[derive(Debug, Clone, Default)]
pub struct GeometryNormalizer {
    options: AoiOptions,
}

impl GeometryNormalizer {
    /// Create a normaliser with the given options.
    pub fn new(options: AoiOptions) -> Self {
        Self { options }
    }

    /// Normalise one input feature into an [`AreaOfInterest`].
    ///
    /// `index` is the position of the feature in its source and is used for
    /// the fallback identity `{GeometryType}_{Index}`.
    pub fn normalize(
        &self,
        index: usize,
        geometry_type: &str,
        geometry: &Geometry<f64>,
        properties: Option<&Map<String, Value>>,
    ) -> Result<AreaOfInterest> {
        let invalid = |reason: String| CatalogError::InvalidGeometry { index, reason };

        let (bounds, distance) = match geometry {
            Geometry::Point(p) => {
                let distance = self.options.distance.unwrap_or(DEFAULT_POINT_DISTANCE_M);
                (square_box(p.0, distance)?, distance)
            }
            other if self.options.bbox => {
                let distance = self.options.distance.unwrap_or(DEFAULT_POINT_DISTANCE_M);
                let centroid = other
                    .centroid()
                    .ok_or_else(|| invalid("geometry has no centroid".to_string()))?;
                (square_box(centroid.0, distance)?, distance)
            }
            other => {
                let distance = self.options.distance.unwrap_or(DEFAULT_ENVELOPE_DISTANCE_M);
                (buffered_envelope(other, distance).map_err(|e| invalid(e.to_string()))?, distance)
            }
        };

        let id = self
            .options
            .field
            .as_deref()
            .and_then(|field| properties.and_then(|p| p.get(field)))
            .and_then(property_text)
            .and_then(|raw| sanitize_name(&raw))
            .unwrap_or_else(|| format!("{}_{}", geometry_type, index));

        debug!(aoi = %id, geometry_type, distance, "normalised AOI");

        Ok(AreaOfInterest {
            id,
            geometry_type: geometry_type.to_string(),
            bounds,
            distance,
        })
    }
}

/// Load AOIs from a GeoJSON feature collection on disk.
pub fn load_aois<P: AsRef<Path>>(path: P, options: &AoiOptions) -> Result<Vec<AreaOfInterest>> {
    let text = std::fs::read_to_string(path)?;
    parse_aois(&text, options)
}

/// Parse AOIs from GeoJSON text.
pub fn parse_aois(text: &str, options: &AoiOptions) -> Result<Vec<AreaOfInterest>> {
    let collection: FeatureCollection = serde_json::from_str(text)?;
    let normalizer = GeometryNormalizer::new(options.clone());

    collection
        .features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let geometry = feature.geometry.as_ref().ok_or(CatalogError::InvalidGeometry {
                index,
                reason: "feature has no geometry".to_string(),
            })?;
            normalizer.normalize(
                index,
                geometry.type_name(),
                &geometry.to_geo()?,
                feature.properties.as_ref(),
            )
        })
        .collect()
}

fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turn a free-text attribute into a path-safe name.
///
/// Non-ASCII characters are dropped, anything outside `[A-Za-z0-9_.- ]`
/// becomes a space, and whitespace runs collapse into a single hyphen.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let name = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    (!name.is_empty()).then_some(name)
}

/// UTM zone number for a lon/lat location, including the Norway and Svalbard exceptions.
pub fn utm_zone(lon: f64, lat: f64) -> u8 {
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..84.0).contains(&lat) && (0.0..42.0).contains(&lon) {
        return if lon < 9.0 {
            31
        } else if lon < 21.0 {
            33
        } else if lon < 33.0 {
            35
        } else {
            37
        };
    }
    (((lon + 180.0) / 6.0) as i32 + 1).clamp(1, 60) as u8
}

/// Forward/inverse projection pair between WGS84 lon/lat and a UTM zone.
struct UtmProjection {
    geographic: Proj,
    utm: Proj,
}

impl UtmProjection {
    fn for_location(lon: f64, lat: f64) -> Result<Self> {
        let zone = utm_zone(lon, lat);
        let south = if lat < 0.0 { " +south" } else { "" };
        let utm_def = format!("+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs", zone, south);

        let geographic = Proj::from_proj_string("+proj=longlat +datum=WGS84 +no_defs")
            .map_err(|e| CatalogError::Projection(format!("{:?}", e)))?;
        let utm = Proj::from_proj_string(&utm_def)
            .map_err(|e| CatalogError::Projection(format!("{}: {:?}", utm_def, e)))?;

        Ok(Self { geographic, utm })
    }

    fn to_utm(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = (c.x.to_radians(), c.y.to_radians(), 0.0);
        transform(&self.geographic, &self.utm, &mut point)
            .map_err(|e| CatalogError::Projection(format!("{:?}", e)))?;
        Ok(Coord { x: point.0, y: point.1 })
    }

    fn to_geographic(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = (c.x, c.y, 0.0);
        transform(&self.utm, &self.geographic, &mut point)
            .map_err(|e| CatalogError::Projection(format!("{:?}", e)))?;
        Ok(Coord { x: point.0.to_degrees(), y: point.1.to_degrees() })
    }
}

/// Square lon/lat box of half-side `distance` metres around `center`.
fn square_box(center: Coord<f64>, distance: f64) -> Result<Rect<f64>> {
    let proj = UtmProjection::for_location(center.x, center.y)?;
    let c = proj.to_utm(center)?;
    let lower = proj.to_geographic(Coord { x: c.x - distance, y: c.y - distance })?;
    let upper = proj.to_geographic(Coord { x: c.x + distance, y: c.y + distance })?;
    Ok(Rect::new(lower, upper))
}

/// Envelope of `geometry` expanded by `distance` metres.
fn buffered_envelope(geometry: &Geometry<f64>, distance: f64) -> Result<Rect<f64>> {
    let envelope = geometry
        .bounding_rect()
        .ok_or_else(|| CatalogError::Projection("geometry is empty".to_string()))?;
    let proj = UtmProjection::for_location(envelope.min().x, envelope.min().y)?;

    let mut min = Coord { x: f64::INFINITY, y: f64::INFINITY };
    let mut max = Coord { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
    for c in geometry.coords_iter() {
        let u = proj.to_utm(c)?;
        min.x = min.x.min(u.x);
        min.y = min.y.min(u.y);
        max.x = max.x.max(u.x);
        max.y = max.y.max(u.y);
    }

    let corners = [
        Coord { x: min.x - distance, y: min.y - distance },
        Coord { x: max.x + distance, y: min.y - distance },
        Coord { x: max.x + distance, y: max.y + distance },
        Coord { x: min.x - distance, y: max.y + distance },
    ];
    let mut lower = Coord { x: f64::INFINITY, y: f64::INFINITY };
    let mut upper = Coord { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
    for corner in corners {
        let g = proj.to_geographic(corner)?;
        lower.x = lower.x.min(g.x);
        lower.y = lower.y.min(g.y);
        upper.x = upper.x.max(g.x);
        upper.y = upper.y.max(g.y);
    }
    Ok(Rect::new(lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{line_string, point};

    #[test]
    fn test_utm_zone() {
        assert_eq!(utm_zone(-122.33, 47.61), 10);
        assert_eq!(utm_zone(0.5, 51.5), 31);
        assert_eq!(utm_zone(44.89, 12.75), 38);
        // Southwest Norway belongs to zone 32
        assert_eq!(utm_zone(5.3, 60.4), 32);
        // Svalbard
        assert_eq!(utm_zone(15.6, 78.2), 33);
        assert_eq!(utm_zone(180.0, 0.0), 60);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Port  of Aden "), Some("Port-of-Aden".to_string()));
        assert_eq!(sanitize_name("site#12/b"), Some("site-12-b".to_string()));
        assert_eq!(sanitize_name("Zürich"), Some("Zrich".to_string()));
        assert_eq!(sanitize_name("***"), None);
    }

    #[test]
    fn test_point_becomes_box() {
        let normalizer = GeometryNormalizer::default();
        let aoi = normalizer
            .normalize(3, "Point", &Geometry::Point(point!(x: 44.89, y: 12.75)), None)
            .unwrap();

        assert_eq!(aoi.id, "Point_3");
        assert_eq!(aoi.distance, DEFAULT_POINT_DISTANCE_M);

        let (min_lon, min_lat, max_lon, max_lat) = aoi.bbox();
        assert!(min_lon < 44.89 && 44.89 < max_lon);
        assert!(min_lat < 12.75 && 12.75 < max_lat);
        // 2 km is roughly 0.018 degrees of latitude
        assert_relative_eq!(max_lat - min_lat, 0.018, epsilon = 0.002);
    }

    #[test]
    fn test_line_becomes_buffered_envelope() {
        let normalizer = GeometryNormalizer::new(AoiOptions {
            distance: Some(100.0),
            ..Default::default()
        });
        let line = line_string![(x: 10.0, y: 45.0), (x: 10.01, y: 45.01)];
        let aoi = normalizer
            .normalize(0, "LineString", &Geometry::LineString(line), None)
            .unwrap();

        let (min_lon, min_lat, max_lon, max_lat) = aoi.bbox();
        assert!(min_lon < 10.0 && max_lon > 10.01);
        assert!(min_lat < 45.0 && max_lat > 45.01);
        // The buffer is small compared with the envelope
        assert!(max_lat - min_lat < 0.01 + 0.004);
    }

    #[test]
    fn test_name_from_field() {
        let normalizer = GeometryNormalizer::new(AoiOptions {
            field: Some("site".to_string()),
            ..Default::default()
        });
        let mut props = Map::new();
        props.insert("site".to_string(), Value::String("Harbour North".to_string()));
        let aoi = normalizer
            .normalize(0, "Point", &Geometry::Point(point!(x: 1.0, y: 1.0)), Some(&props))
            .unwrap();
        assert_eq!(aoi.id, "Harbour-North");

        // Missing attribute falls back to the type/index identity
        let aoi = normalizer
            .normalize(7, "Point", &Geometry::Point(point!(x: 1.0, y: 1.0)), None)
            .unwrap();
        assert_eq!(aoi.id, "Point_7");
    }

    #[test]
    fn test_parse_aois() {
        let doc = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"name": "alpha"},
             "geometry": {"type": "Point", "coordinates": [44.89, 12.75]}},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[10,45],[10.1,45],[10.1,45.1],[10,45.1],[10,45]]]}}
        ]}"#;
        let options = AoiOptions {
            field: Some("name".to_string()),
            ..Default::default()
        };
        let aois = parse_aois(doc, &options).unwrap();
        assert_eq!(aois.len(), 2);
        assert_eq!(aois[0].id, "alpha");
        assert_eq!(aois[1].id, "Polygon_1");
        assert_eq!(aois[1].distance, DEFAULT_ENVELOPE_DISTANCE_M);
    }

    #[test]
    fn test_missing_geometry_is_error() {
        let doc = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": null}
        ]}"#;
        assert!(matches!(
            parse_aois(doc, &AoiOptions::default()),
            Err(CatalogError::InvalidGeometry { index: 0, .. })
        ));
    }
}
