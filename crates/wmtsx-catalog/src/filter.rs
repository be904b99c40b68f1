//! Feature filter chain.
//!
//! Each [`Predicate`] is evaluated independently and the chain keeps a feature
//! only when every active predicate accepts it. A feature attribute that the
//! catalogue did not report (`None`) never causes a rejection.
//!
//! A non-empty feature-id allow-list replaces every other predicate: explicit
//! identification takes precedence over the datetime, cloud, resolution,
//! overlap and platform bounds.

use crate::datetime::{deserialize_opt_datetime, deserialize_opt_end_datetime};
use crate::feature::CatalogueFeature;
use crate::{CatalogError, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;

/// Selection criteria for one run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    /// Earliest acquisition (inclusive).
    #[serde(deserialize_with = "deserialize_opt_datetime")]
    pub start_datetime: Option<NaiveDateTime>,
    /// Latest acquisition (inclusive). A bare date includes that whole day.
    #[serde(deserialize_with = "deserialize_opt_end_datetime")]
    pub end_datetime: Option<NaiveDateTime>,
    /// Maximum cloud cover fraction.
    pub max_cloud: Option<f64>,
    /// Maximum ground resolution in metres.
    pub max_resolution: Option<f64>,
    /// Minimum AOI overlap percentage.
    pub min_overlap: Option<f64>,
    /// Allowed platforms; empty allows all.
    pub platforms: Vec<String>,
    /// Explicit feature-id allow-list; empty leaves selection unconstrained.
    pub features: Vec<String>,
    /// Maximum number of downloads per AOI.
    pub max_downloads: Option<usize>,
}

impl FilterCriteria {
    /// Check the criteria for contradictory or out-of-range bounds.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_datetime, self.end_datetime) {
            if start > end {
                return Err(CatalogError::Configuration(format!(
                    "start datetime {} is after end datetime {}",
                    start, end
                )));
            }
        }
        if let Some(cloud) = self.max_cloud {
            if !(0.0..=1.0).contains(&cloud) {
                return Err(CatalogError::Configuration(format!(
                    "max cloud cover {} is outside [0, 1]",
                    cloud
                )));
            }
        }
        if let Some(resolution) = self.max_resolution {
            if resolution <= 0.0 {
                return Err(CatalogError::Configuration(format!(
                    "max resolution {} must be positive",
                    resolution
                )));
            }
        }
        if let Some(overlap) = self.min_overlap {
            if !(0.0..=100.0).contains(&overlap) {
                return Err(CatalogError::Configuration(format!(
                    "min overlap {} is outside [0, 100]",
                    overlap
                )));
            }
        }
        Ok(())
    }

    /// Whether an explicit allow-list is in force.
    pub fn has_allow_list(&self) -> bool {
        !self.features.is_empty()
    }
}

/// A single filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Acquisition within `[start, end]`; either bound may be open.
    AcquiredBetween {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
    /// Cloud cover at most the given fraction.
    MaxCloudCover(f64),
    /// Resolution at most the given metres.
    MaxResolution(f64),
    /// Overlap at least the given percentage.
    MinOverlap(f64),
    /// Platform is one of the listed names (case-insensitive).
    Platforms(Vec<String>),
    /// Feature id is one of the listed ids.
    FeatureIds(Vec<String>),
}

impl Predicate {
    /// Whether this predicate accepts `feature`.
    pub fn accepts(&self, feature: &CatalogueFeature) -> bool {
        match self {
            Predicate::AcquiredBetween { start, end } => match feature.acquired {
                Some(acquired) => {
                    start.map_or(true, |s| acquired >= s) && end.map_or(true, |e| acquired <= e)
                }
                None => true,
            },
            Predicate::MaxCloudCover(max) => feature.cloud_cover.map_or(true, |c| c <= *max),
            Predicate::MaxResolution(max) => feature.resolution.map_or(true, |r| r <= *max),
            Predicate::MinOverlap(min) => feature.overlap.map_or(true, |o| o >= *min),
            Predicate::Platforms(allowed) => match &feature.platform {
                Some(platform) => allowed.iter().any(|a| a.eq_ignore_ascii_case(platform)),
                None => true,
            },
            Predicate::FeatureIds(ids) => ids.iter().any(|id| *id == feature.id),
        }
    }
}

/// The set of predicates active for one AOI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    predicates: Vec<Predicate>,
}

impl FilterChain {
    /// Build the chain for `criteria`.
    ///
    /// With `table_active`, the datetime and resolution legs are left out
    /// because the period-resolution table takes over those constraints.
    pub fn from_criteria(criteria: &FilterCriteria, table_active: bool) -> Result<Self> {
        criteria.validate()?;

        if criteria.has_allow_list() {
            return Ok(Self {
                predicates: vec![Predicate::FeatureIds(criteria.features.clone())],
            });
        }

        let mut predicates = Vec::new();
        if !table_active && (criteria.start_datetime.is_some() || criteria.end_datetime.is_some()) {
            predicates.push(Predicate::AcquiredBetween {
                start: criteria.start_datetime,
                end: criteria.end_datetime,
            });
        }
        if let Some(max) = criteria.max_cloud {
            predicates.push(Predicate::MaxCloudCover(max));
        }
        if !table_active {
            if let Some(max) = criteria.max_resolution {
                predicates.push(Predicate::MaxResolution(max));
            }
        }
        if let Some(min) = criteria.min_overlap {
            predicates.push(Predicate::MinOverlap(min));
        }
        if !criteria.platforms.is_empty() {
            predicates.push(Predicate::Platforms(criteria.platforms.clone()));
        }

        Ok(Self { predicates })
    }

    /// Active predicates, in evaluation order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Whether every predicate accepts `feature`.
    pub fn accepts(&self, feature: &CatalogueFeature) -> bool {
        self.predicates.iter().all(|p| p.accepts(feature))
    }

    /// Keep the features every predicate accepts, preserving input order.
    pub fn apply(&self, features: &[CatalogueFeature]) -> Vec<CatalogueFeature> {
        features.iter().filter(|f| self.accepts(f)).cloned().collect()
    }
}

/// Apply every predicate of `criteria` to `features`.
pub fn apply(features: &[CatalogueFeature], criteria: &FilterCriteria) -> Result<Vec<CatalogueFeature>> {
    Ok(FilterChain::from_criteria(criteria, false)?.apply(features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::{parse_datetime, parse_end_datetime};

    fn dt(s: &str) -> NaiveDateTime {
        parse_datetime(s).unwrap()
    }

    fn sample() -> Vec<CatalogueFeature> {
        vec![
            CatalogueFeature::new("a")
                .with_platform("WorldView-02")
                .with_acquired(dt("2015-03-01"))
                .with_cloud_cover(0.05)
                .with_resolution(0.46)
                .with_overlap(100.0),
            CatalogueFeature::new("b")
                .with_platform("GeoEye-01")
                .with_acquired(dt("2018-06-15"))
                .with_cloud_cover(0.40)
                .with_resolution(0.41)
                .with_overlap(60.0),
            CatalogueFeature::new("c")
                .with_platform("WorldView-03")
                .with_acquired(dt("2020-01-10"))
                .with_cloud_cover(0.0)
                .with_resolution(0.31)
                .with_overlap(20.0),
            // Nothing reported: passes every value predicate
            CatalogueFeature::new("d"),
        ]
    }

    fn ids(features: &[CatalogueFeature]) -> Vec<&str> {
        features.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn test_empty_criteria_keeps_everything() {
        let out = apply(&sample(), &FilterCriteria::default()).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_datetime_bounds_are_inclusive() {
        let criteria = FilterCriteria {
            start_datetime: Some(dt("2015-03-01")),
            end_datetime: Some(dt("2018-06-15")),
            ..Default::default()
        };
        let out = apply(&sample(), &criteria).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_predicates_combine_with_and() {
        let criteria = FilterCriteria {
            max_cloud: Some(0.1),
            min_overlap: Some(50.0),
            ..Default::default()
        };
        let out = apply(&sample(), &criteria).unwrap();
        assert_eq!(ids(&out), vec!["a", "d"]);

        let criteria = FilterCriteria {
            max_resolution: Some(0.45),
            platforms: vec!["geoeye-01".to_string(), "WorldView-03".to_string()],
            ..Default::default()
        };
        let out = apply(&sample(), &criteria).unwrap();
        assert_eq!(ids(&out), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_allow_list_bypasses_other_predicates() {
        let criteria = FilterCriteria {
            start_datetime: Some(dt("2030-01-01")),
            max_cloud: Some(0.0),
            max_resolution: Some(0.1),
            min_overlap: Some(99.0),
            features: vec!["b".to_string(), "c".to_string()],
            ..Default::default()
        };
        let out = apply(&sample(), &criteria).unwrap();
        assert_eq!(ids(&out), vec!["b", "c"]);

        let chain = FilterChain::from_criteria(&criteria, false).unwrap();
        assert_eq!(chain.predicates().len(), 1);
    }

    #[test]
    fn test_table_disables_datetime_and_resolution_legs() {
        let criteria = FilterCriteria {
            start_datetime: Some(dt("2019-01-01")),
            max_resolution: Some(0.35),
            max_cloud: Some(0.5),
            ..Default::default()
        };
        let chain = FilterChain::from_criteria(&criteria, true).unwrap();
        assert_eq!(chain.predicates(), &[Predicate::MaxCloudCover(0.5)]);
    }

    #[test]
    fn test_contradictory_bounds() {
        let criteria = FilterCriteria {
            start_datetime: Some(dt("2020-01-01")),
            end_datetime: Some(dt("2019-01-01")),
            ..Default::default()
        };
        assert!(matches!(
            apply(&sample(), &criteria),
            Err(CatalogError::Configuration(_))
        ));

        let criteria = FilterCriteria {
            min_overlap: Some(150.0),
            ..Default::default()
        };
        assert!(criteria.validate().is_err());
    }

    #[test]
    fn test_criteria_from_yaml() {
        let yaml = r#"
start_datetime: 01/01/2015 00:00:00
end_datetime: 2019-12-31
max_cloud: 0.2
platforms: [WorldView-02]
max_downloads: 5
"#;
        let criteria: FilterCriteria = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(criteria.start_datetime, Some(dt("2015-01-01")));
        assert_eq!(criteria.end_datetime, Some(parse_end_datetime("2019-12-31").unwrap()));
        assert_eq!(criteria.max_cloud, Some(0.2));
        assert_eq!(criteria.platforms, vec!["WorldView-02"]);
        assert_eq!(criteria.max_downloads, Some(5));
        assert!(criteria.features.is_empty());
    }

    #[test]
    fn test_bare_end_date_keeps_same_day_acquisitions() {
        let criteria: FilterCriteria = serde_yaml::from_str("end_datetime: 2020-01-10").unwrap();
        let late_same_day = CatalogueFeature::new("e").with_acquired(dt("2020-01-10 18:45:00"));
        let next_day = CatalogueFeature::new("f").with_acquired(dt("2020-01-11 00:00:00"));

        let out = apply(&[late_same_day, next_day], &criteria).unwrap();
        assert_eq!(ids(&out), vec!["e"]);
    }
}
