//! Selector: filter, rank and cap the catalogue response for one AOI.

use crate::aoi::AreaOfInterest;
use crate::decision::{Classification, PeriodResolutionTable};
use crate::feature::CatalogueFeature;
use crate::filter::{FilterChain, FilterCriteria};
use crate::source::Catalogue;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// A selected feature with its decision-table classification, when a table applies.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFeature {
    pub feature: CatalogueFeature,
    pub classification: Option<Classification>,
}

/// Reduces raw catalogue features to an ordered selection of at most
/// `max_downloads` entries.
///
/// The selector is configuration: build it once per run and share it
/// between AOI workers.
#[derive(Debug, Clone)]
pub struct Selector {
    criteria: FilterCriteria,
    table: Option<Arc<PeriodResolutionTable>>,
    chain: FilterChain,
}

impl Selector {
    /// Validate `criteria` and build the selector.
    pub fn new(criteria: FilterCriteria, table: Option<Arc<PeriodResolutionTable>>) -> Result<Self> {
        let chain = FilterChain::from_criteria(&criteria, table.is_some())?;
        Ok(Self {
            criteria,
            table,
            chain,
        })
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn table(&self) -> Option<&PeriodResolutionTable> {
        self.table.as_deref()
    }

    /// Query `catalogue` for `aoi` and select from the response.
    pub fn query(&self, catalogue: &dyn Catalogue, aoi: &AreaOfInterest) -> Result<Vec<RankedFeature>> {
        let features = catalogue.query(aoi)?;
        Ok(self.select_ranked(aoi, &features))
    }

    /// Select from `features`, keeping classifications.
    pub fn select_ranked(&self, aoi: &AreaOfInterest, features: &[CatalogueFeature]) -> Vec<RankedFeature> {
        let survivors = self.chain.apply(features);
        let max = self.criteria.max_downloads;

        let mut ranked = if self.criteria.has_allow_list() {
            self.order_by_allow_list(survivors)
        } else if let Some(table) = &self.table {
            table
                .select(&survivors, max)
                .into_iter()
                .map(|(feature, classification)| RankedFeature {
                    feature,
                    classification: Some(classification),
                })
                .collect()
        } else {
            let mut survivors = survivors;
            survivors.sort_by(default_order);
            survivors
                .into_iter()
                .map(|feature| RankedFeature {
                    feature,
                    classification: None,
                })
                .collect()
        };

        if let Some(max) = max {
            ranked.truncate(max);
        }

        debug!(
            aoi = %aoi.id,
            candidates = features.len(),
            selected = ranked.len(),
            "Selected features"
        );
        ranked
    }

    /// Select from `features`, dropping classifications.
    pub fn select(&self, aoi: &AreaOfInterest, features: &[CatalogueFeature]) -> Vec<CatalogueFeature> {
        self.select_ranked(aoi, features)
            .into_iter()
            .map(|r| r.feature)
            .collect()
    }

    /// Order by position in the allow-list; the first record per id wins.
    fn order_by_allow_list(&self, survivors: Vec<CatalogueFeature>) -> Vec<RankedFeature> {
        let ids = &self.criteria.features;
        let mut keyed: Vec<(usize, CatalogueFeature)> = survivors
            .into_iter()
            .filter_map(|f| ids.iter().position(|id| *id == f.id).map(|pos| (pos, f)))
            .collect();
        keyed.sort_by_key(|(pos, _)| *pos);
        keyed.dedup_by_key(|(pos, _)| *pos);

        keyed
            .into_iter()
            .map(|(_, feature)| {
                let classification = self.table.as_ref().and_then(|t| t.classify(&feature));
                RankedFeature {
                    feature,
                    classification,
                }
            })
            .collect()
    }
}

/// Overlap descending, then acquisition descending, then id. Missing values sort last.
fn default_order(a: &CatalogueFeature, b: &CatalogueFeature) -> Ordering {
    cmp_desc_none_last(a.overlap, b.overlap)
        .then_with(|| b.acquired.cmp(&a.acquired))
        .then_with(|| a.id.cmp(&b.id))
}

fn cmp_desc_none_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
