//! End-of-run summary and the info-only feature table.

use crate::pipeline::{AoiReport, FeatureOutcome};
use std::fmt;
use wmtsx_catalog::RankedFeature;

/// Per-AOI outcomes of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub aois: Vec<AoiReport>,
}

impl RunSummary {
    pub fn new(aois: Vec<AoiReport>) -> Self {
        Self { aois }
    }

    pub fn selected(&self) -> usize {
        self.aois.iter().map(|a| a.selected.len()).sum()
    }

    pub fn downloaded(&self) -> usize {
        self.aois.iter().map(AoiReport::downloaded).sum()
    }

    pub fn skipped(&self) -> usize {
        self.aois.iter().map(AoiReport::skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.aois.iter().map(AoiReport::failed_count).sum()
    }

    /// AOIs that stopped before any feature was processed.
    pub fn aoi_errors(&self) -> usize {
        self.aois.iter().filter(|a| a.error.is_some()).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Extraction Summary ===")?;
        for aoi in &self.aois {
            writeln!(
                f,
                "{}: selected {}, downloaded {}, skipped {}, failed {}",
                aoi.aoi,
                aoi.selected.len(),
                aoi.downloaded(),
                aoi.skipped(),
                aoi.failed_count()
            )?;
            if let Some(error) = &aoi.error {
                writeln!(f, "  error: {}", error)?;
            }
            for feature in &aoi.features {
                if let FeatureOutcome::Failed { reason, .. } = &feature.outcome {
                    writeln!(f, "  {} failed: {}", feature.feature_id, reason)?;
                }
                let missing = feature.outcome.missing();
                if !missing.is_empty() {
                    let tiles: Vec<String> = missing.iter().map(|t| t.to_string()).collect();
                    writeln!(
                        f,
                        "  {} missing {} tiles: {}",
                        feature.feature_id,
                        missing.len(),
                        tiles.join(" ")
                    )?;
                }
            }
        }
        write!(
            f,
            "Total: {} AOIs, selected {}, downloaded {}, skipped {}, failed {}, AOI errors {}",
            self.aois.len(),
            self.selected(),
            self.downloaded(),
            self.skipped(),
            self.failed(),
            self.aoi_errors()
        )
    }
}

const INVENTORY_HEADER: [&str; 10] = [
    "AOI", "Feature", "Platform", "Product", "Acquired", "Cloud", "Res", "Overlap", "Period", "Weight",
];

/// Render the selection of every AOI as a fixed-width table.
pub fn inventory_table(reports: &[AoiReport]) -> String {
    let mut rows: Vec<[String; 10]> = vec![INVENTORY_HEADER.map(str::to_string)];
    for report in reports {
        for ranked in &report.selected {
            rows.push(inventory_row(&report.aoi, ranked));
        }
    }

    let mut widths = [0usize; 10];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    for report in reports {
        if let Some(error) = &report.error {
            out.push_str(&format!("{}: {}\n", report.aoi, error));
        } else if report.selected.is_empty() {
            out.push_str(&format!("{}: no features selected\n", report.aoi));
        }
    }
    out
}

fn inventory_row(aoi: &str, ranked: &RankedFeature) -> [String; 10] {
    let f = &ranked.feature;
    let opt = |v: Option<f64>, precision: usize| {
        v.map(|v| format!("{:.*}", precision, v)).unwrap_or_else(|| "-".to_string())
    };
    let (period, weight) = match &ranked.classification {
        Some(c) => (c.period.clone(), c.weight.to_string()),
        None => ("-".to_string(), "-".to_string()),
    };
    [
        aoi.to_string(),
        f.id.clone(),
        f.platform.clone().unwrap_or_else(|| "-".to_string()),
        f.product.clone().unwrap_or_else(|| "-".to_string()),
        f.acquired
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
        opt(f.cloud_cover, 2),
        opt(f.resolution, 2),
        opt(f.overlap, 1),
        period,
        weight,
    ]
}
