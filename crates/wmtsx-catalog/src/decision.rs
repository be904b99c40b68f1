//! Period-resolution decision table.
//!
//! The table is a dense weight matrix keyed by a time-period row and a
//! resolution bucket column. Each configured period contributes one or more
//! rows, each row carrying its own boundary date. A feature falls into the
//! first row whose boundary is on or after its acquisition date and into the
//! smallest resolution bucket that is not finer than its resolution.
//!
//! Loaded once per run and treated as immutable; both lookups are binary
//! searches over the sorted rows and buckets.

use crate::datetime::deserialize_datetimes;
use crate::feature::CatalogueFeature;
use crate::{CatalogError, Result};
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Tolerance used when comparing a feature resolution against bucket values.
const RESOLUTION_EPSILON: f64 = 1e-9;

/// One row of the weight matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRow {
    /// Upper boundary of the row's time bucket.
    pub boundary: NaiveDateTime,
    /// Label of the period the row belongs to.
    pub label: String,
    /// Weight per resolution bucket.
    pub weights: Vec<u32>,
}

/// Result of classifying a single feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub period: String,
    pub resolution: f64,
    pub weight: u32,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    resolutions: Vec<f64>,
    #[serde(default)]
    number_images: Option<usize>,
    periods: Vec<PeriodFile>,
}

#[derive(Debug, Deserialize)]
struct PeriodFile {
    name: String,
    #[serde(default, deserialize_with = "deserialize_datetimes")]
    date_range: Vec<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_datetimes")]
    boundaries: Vec<NaiveDateTime>,
    weights: Vec<Vec<u32>>,
}

impl PeriodFile {
    fn into_rows(self) -> Result<Vec<PeriodRow>> {
        let count = self.weights.len();
        if count == 0 {
            return Err(CatalogError::Configuration(format!(
                "period '{}' has no weight rows",
                self.name
            )));
        }

        let boundaries = match (self.date_range.is_empty(), self.boundaries.is_empty()) {
            (false, true) => spread_range(&self.name, &self.date_range, count)?,
            (true, false) => {
                if self.boundaries.len() != count {
                    return Err(CatalogError::Configuration(format!(
                        "period '{}' has {} boundaries but {} weight rows",
                        self.name,
                        self.boundaries.len(),
                        count
                    )));
                }
                self.boundaries
            }
            _ => {
                return Err(CatalogError::Configuration(format!(
                    "period '{}' needs exactly one of date_range or boundaries",
                    self.name
                )))
            }
        };

        let label = self.name;
        Ok(boundaries
            .into_iter()
            .zip(self.weights)
            .map(|(boundary, weights)| PeriodRow {
                boundary,
                label: label.clone(),
                weights,
            })
            .collect())
    }
}

/// Evenly spaced boundaries over `[start, end]`, one per weight row.
fn spread_range(name: &str, range: &[NaiveDateTime], count: usize) -> Result<Vec<NaiveDateTime>> {
    let (start, end) = match range {
        [start, end] => (*start, *end),
        [single] => (*single, *single),
        _ => {
            return Err(CatalogError::Configuration(format!(
                "period '{}' date_range must have one or two dates",
                name
            )))
        }
    };
    if count == 1 {
        return Ok(vec![start]);
    }
    let span = (end - start).num_seconds();
    let steps = (count - 1) as i64;
    Ok((0..count as i64)
        .map(|i| start + Duration::seconds(span * i / steps))
        .collect())
}

/// Weighted lookup table over acquisition period and resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodResolutionTable {
    rows: Vec<PeriodRow>,
    resolutions: Vec<f64>,
    number_images: Option<usize>,
}

impl PeriodResolutionTable {
    /// Build a table from already flattened rows.
    ///
    /// Boundaries must be strictly increasing, resolution buckets strictly
    /// increasing and positive, and every row as wide as the bucket list.
    pub fn new(rows: Vec<PeriodRow>, resolutions: Vec<f64>, number_images: Option<usize>) -> Result<Self> {
        if resolutions.is_empty() {
            return Err(CatalogError::Configuration(
                "decision table has no resolution buckets".to_string(),
            ));
        }
        if resolutions.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(CatalogError::Configuration(
                "resolution buckets must be positive".to_string(),
            ));
        }
        if resolutions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CatalogError::Configuration(
                "resolution buckets must be strictly increasing".to_string(),
            ));
        }
        if rows.is_empty() {
            return Err(CatalogError::Configuration(
                "decision table has no periods".to_string(),
            ));
        }
        if let Some(w) = rows.windows(2).find(|w| w[0].boundary >= w[1].boundary) {
            return Err(CatalogError::Configuration(format!(
                "period boundaries must be strictly increasing ({} then {})",
                w[0].boundary, w[1].boundary
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.weights.len() != resolutions.len()) {
            return Err(CatalogError::Configuration(format!(
                "row at {} of '{}' has {} weights for {} resolution buckets",
                row.boundary,
                row.label,
                row.weights.len(),
                resolutions.len()
            )));
        }
        if number_images == Some(0) {
            return Err(CatalogError::Configuration(
                "number_images must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            rows,
            resolutions,
            number_images,
        })
    }

    /// Parse a table from its YAML form.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: TableFile = serde_yaml::from_str(text)?;
        let mut rows = Vec::new();
        for period in file.periods {
            rows.extend(period.into_rows()?);
        }
        Self::new(rows, file.resolutions, file.number_images)
    }

    /// Load a table from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_yaml_str(&text)?;
        debug!(
            path = %path.display(),
            rows = table.rows.len(),
            buckets = table.resolutions.len(),
            "Loaded period-resolution table"
        );
        Ok(table)
    }

    pub fn rows(&self) -> &[PeriodRow] {
        &self.rows
    }

    pub fn resolutions(&self) -> &[f64] {
        &self.resolutions
    }

    /// Optional cap on the number of selected images.
    pub fn number_images(&self) -> Option<usize> {
        self.number_images
    }

    /// Index of the smallest bucket not finer than `resolution`.
    pub fn resolution_index(&self, resolution: f64) -> Option<usize> {
        let idx = self
            .resolutions
            .partition_point(|bucket| *bucket < resolution - RESOLUTION_EPSILON);
        (idx < self.resolutions.len()).then_some(idx)
    }

    /// Index of the first row whose boundary is on or after `acquired`.
    ///
    /// Dates before the first boundary or after the last one fall outside
    /// the table.
    pub fn period_index(&self, acquired: NaiveDateTime) -> Option<usize> {
        let first = self.rows.first()?;
        if acquired < first.boundary {
            return None;
        }
        let idx = self.rows.partition_point(|row| row.boundary < acquired);
        (idx < self.rows.len()).then_some(idx)
    }

    /// Direct weight read.
    pub fn weight(&self, period_index: usize, resolution_index: usize) -> Option<u32> {
        self.rows
            .get(period_index)
            .and_then(|row| row.weights.get(resolution_index))
            .copied()
    }

    /// Classify `feature`, or `None` if it falls outside the table.
    ///
    /// Features without an acquisition date or resolution are never
    /// classified.
    pub fn classify(&self, feature: &CatalogueFeature) -> Option<Classification> {
        let period_index = self.period_index(feature.acquired?)?;
        let resolution_index = self.resolution_index(feature.resolution?)?;
        Some(Classification {
            period: self.rows[period_index].label.clone(),
            resolution: self.resolutions[resolution_index],
            weight: self.weight(period_index, resolution_index)?,
        })
    }

    /// Classify and order `features` by weight, then recency, then id.
    ///
    /// Unclassifiable features are dropped. The result is truncated to the
    /// smaller of `max_count` and the table's own `number_images`.
    pub fn select(
        &self,
        features: &[CatalogueFeature],
        max_count: Option<usize>,
    ) -> Vec<(CatalogueFeature, Classification)> {
        let mut ranked: Vec<(CatalogueFeature, Classification)> = features
            .iter()
            .filter_map(|feature| match self.classify(feature) {
                Some(class) => Some((feature.clone(), class)),
                None => {
                    debug!(feature = %feature.id, "Outside period-resolution table");
                    None
                }
            })
            .collect();

        ranked.sort_by(|(fa, ca), (fb, cb)| {
            cb.weight
                .cmp(&ca.weight)
                .then_with(|| fb.acquired.cmp(&fa.acquired))
                .then_with(|| fa.id.cmp(&fb.id))
        });

        let cap = match (max_count, self.number_images) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(cap) = cap {
            ranked.truncate(cap);
        }
        ranked
    }
}
