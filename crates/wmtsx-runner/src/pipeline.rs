//! Per-AOI and per-feature extraction.
//!
//! AOIs run on a bounded rayon pool. Each AOI hands its features to a few
//! scoped workers, and every worker takes one of the run-wide feature slots
//! before assembling, so at most `workers.features` mosaics are held in
//! memory however many AOIs are active. Every mosaic is owned by the worker
//! that assembles it. Errors are caught at the AOI and feature boundaries and
//! end up in the [`RunSummary`].

use crate::config::{DirLayout, WorkerConfig};
use crate::error::ExtractError;
use crate::output::{ClaimRegistry, OutputResolver, OutputStore};
use crate::report::RunSummary;
use crate::Result;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wmtsx_catalog::{AreaOfInterest, Catalogue, CatalogueFeature, RankedFeature, Selector};
use wmtsx_tiles::{
    encode, plan_lonlat, CreationOptions, FeatureTiles, Mosaic, MosaicAssembler, OutputFormat,
    TileCoord, TileMatrix, TilePlan, TileProvider,
};

/// Resolved run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSettings {
    pub zoom: u8,
    pub matrix: TileMatrix,
    /// Output root, already including the endpoint name.
    pub root: PathBuf,
    pub format: OutputFormat,
    pub options: CreationOptions,
    pub overwrite: bool,
    pub layout: DirLayout,
    pub workers: WorkerConfig,
}

impl ExtractSettings {
    /// Settings with default format, options, layout and workers.
    pub fn new(zoom: u8, matrix: TileMatrix, root: impl Into<PathBuf>) -> Self {
        Self {
            zoom,
            matrix,
            root: root.into(),
            format: OutputFormat::default(),
            options: CreationOptions::default(),
            overwrite: false,
            layout: DirLayout::default(),
            workers: WorkerConfig::default(),
        }
    }

    pub fn resolver(&self) -> OutputResolver {
        OutputResolver::new(self.root.clone(), self.layout, self.format, self.zoom)
    }
}

/// What happened to one selected feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutcome {
    /// Mosaic written. `missing` lists the tiles left as no-data.
    Downloaded { path: PathBuf, missing: Vec<TileCoord> },
    /// Output already present and overwrite is off. No tiles were fetched.
    Skipped { path: PathBuf },
    /// Nothing was written.
    Failed { reason: String, missing: Vec<TileCoord> },
}

impl FeatureOutcome {
    /// Tiles missing from this feature's mosaic.
    pub fn missing(&self) -> &[TileCoord] {
        match self {
            FeatureOutcome::Downloaded { missing, .. } | FeatureOutcome::Failed { missing, .. } => {
                missing.as_slice()
            }
            FeatureOutcome::Skipped { .. } => &[],
        }
    }
}

/// Outcome of one feature, tagged with its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureReport {
    pub feature_id: String,
    pub outcome: FeatureOutcome,
}

/// Everything that happened to one AOI.
#[derive(Debug, Clone, PartialEq)]
pub struct AoiReport {
    pub aoi: String,
    /// Ranked selection, in processing order.
    pub selected: Vec<RankedFeature>,
    pub features: Vec<FeatureReport>,
    /// AOI-level failure (catalogue query or planning).
    pub error: Option<String>,
}

impl AoiReport {
    fn new(aoi: &AreaOfInterest, selected: Vec<RankedFeature>) -> Self {
        Self {
            aoi: aoi.id.clone(),
            selected,
            features: Vec::new(),
            error: None,
        }
    }

    fn failed(aoi: &AreaOfInterest, selected: Vec<RankedFeature>, error: &ExtractError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(aoi, selected)
        }
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, FeatureOutcome::Downloaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FeatureOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, FeatureOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FeatureOutcome) -> bool) -> usize {
        self.features.iter().filter(|f| pred(&f.outcome)).count()
    }
}

/// Runs the selection and the mosaic assembly.
pub struct Extractor {
    settings: ExtractSettings,
    resolver: OutputResolver,
    selector: Selector,
    catalogue: Arc<dyn Catalogue>,
    tiles: Arc<dyn TileProvider>,
    store: Arc<dyn OutputStore>,
    claims: ClaimRegistry,
    assembler: MosaicAssembler,
    aoi_pool: rayon::ThreadPool,
    feature_slots: FeatureSlots,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("settings", &self.settings)
            .field("selector", &self.selector)
            .field("assembler", &self.assembler)
            .finish()
    }
}

impl Extractor {
    /// Create an extractor. Fails before any network activity if the zoom is
    /// outside the matrix range or a worker pool cannot be built.
    pub fn new(
        settings: ExtractSettings,
        selector: Selector,
        catalogue: Arc<dyn Catalogue>,
        tiles: Arc<dyn TileProvider>,
        store: Arc<dyn OutputStore>,
    ) -> Result<Self> {
        settings.matrix.validate_zoom(settings.zoom)?;

        let assembler = MosaicAssembler::new(settings.workers.tiles)?;
        let aoi_pool = build_pool(settings.workers.aois, "aoi")?;
        let feature_slots = FeatureSlots::new(settings.workers.features);

        Ok(Self {
            resolver: settings.resolver(),
            settings,
            selector,
            catalogue,
            tiles,
            store,
            claims: ClaimRegistry::new(),
            assembler,
            aoi_pool,
            feature_slots,
        })
    }

    pub fn settings(&self) -> &ExtractSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &OutputResolver {
        &self.resolver
    }

    /// Query and select every AOI without fetching tiles or writing files.
    pub fn inventory(&self, aois: &[AreaOfInterest]) -> Vec<AoiReport> {
        self.aoi_pool.install(|| {
            aois.par_iter()
                .map(|aoi| match self.select(aoi) {
                    Ok(selected) => AoiReport::new(aoi, selected),
                    Err(e) => AoiReport::failed(aoi, Vec::new(), &e),
                })
                .collect()
        })
    }

    /// Process every AOI. Per-AOI and per-feature failures are reported, not returned.
    pub fn run(&self, aois: &[AreaOfInterest]) -> RunSummary {
        info!(
            aois = aois.len(),
            zoom = self.settings.zoom,
            root = %self.settings.root.display(),
            "Starting extraction"
        );
        let reports = self
            .aoi_pool
            .install(|| aois.par_iter().map(|aoi| self.process_aoi(aoi)).collect());
        RunSummary::new(reports)
    }

    fn select(&self, aoi: &AreaOfInterest) -> Result<Vec<RankedFeature>> {
        let selected = self.selector.query(self.catalogue.as_ref(), aoi)?;
        info!(aoi = %aoi.id, selected = selected.len(), "Selected features");
        Ok(selected)
    }

    /// Select, plan and assemble every feature of one AOI.
    pub fn process_aoi(&self, aoi: &AreaOfInterest) -> AoiReport {
        let selected = match self.select(aoi) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(aoi = %aoi.id, error = %e, "Catalogue query failed");
                return AoiReport::failed(aoi, Vec::new(), &e);
            }
        };
        if selected.is_empty() {
            return AoiReport::new(aoi, selected);
        }

        let plan = match plan_lonlat(aoi.bbox(), self.settings.zoom, &self.settings.matrix) {
            Ok(plan) => plan,
            Err(e) => {
                let e = ExtractError::from(e);
                warn!(aoi = %aoi.id, error = %e, "Tile planning failed");
                return AoiReport::failed(aoi, selected, &e);
            }
        };
        debug!(
            aoi = %aoi.id,
            tiles = plan.len(),
            top_left = %plan.top_left(),
            "Planned tiles"
        );

        let features = self.process_features(aoi, &plan, &selected);

        AoiReport {
            features,
            ..AoiReport::new(aoi, selected)
        }
    }

    /// Run `selected` on scoped workers, each holding a feature slot while it
    /// assembles. Reports come back in selection order.
    fn process_features(
        &self,
        aoi: &AreaOfInterest,
        plan: &TilePlan,
        selected: &[RankedFeature],
    ) -> Vec<FeatureReport> {
        let workers = self.feature_slots.capacity().min(selected.len());
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &RankedFeature)>();
        for job in selected.iter().enumerate() {
            // The receiver is alive until the scope below ends
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut reports: Vec<(usize, FeatureReport)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let job_rx = job_rx.clone();
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        for (index, ranked) in job_rx.iter() {
                            let _slot = self.feature_slots.acquire();
                            let outcome = self.process_feature(aoi, plan, &ranked.feature);
                            done.push((
                                index,
                                FeatureReport {
                                    feature_id: ranked.feature.id.clone(),
                                    outcome,
                                },
                            ));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Assemble and write the mosaic of one feature, unless its output exists.
    pub fn process_feature(
        &self,
        aoi: &AreaOfInterest,
        plan: &TilePlan,
        feature: &CatalogueFeature,
    ) -> FeatureOutcome {
        let path = self.resolver.resolve(aoi, feature);

        // Another worker is producing the same file.
        let Some(_claim) = self.claims.claim(&path) else {
            debug!(feature = %feature.id, path = %path.display(), "Output claimed by another worker");
            return FeatureOutcome::Skipped { path };
        };

        if !self.settings.overwrite && self.store.exists(&path) {
            info!(aoi = %aoi.id, feature = %feature.id, path = %path.display(), "Output exists, skipping");
            return FeatureOutcome::Skipped { path };
        }

        let source = FeatureTiles::new(self.tiles.as_ref(), &feature.id).with_acquired(feature.acquired);
        let assembled = self.assembler.assemble(plan, &source);
        let missing = assembled.failed_coords();

        if missing.len() == plan.len() {
            warn!(aoi = %aoi.id, feature = %feature.id, "Every tile failed, nothing written");
            return FeatureOutcome::Failed {
                reason: format!("all {} tiles failed", plan.len()),
                missing,
            };
        }

        match self.write(&path, &assembled.mosaic) {
            Ok(()) => {
                info!(
                    aoi = %aoi.id,
                    feature = %feature.id,
                    path = %path.display(),
                    missing = missing.len(),
                    "Wrote mosaic"
                );
                FeatureOutcome::Downloaded { path, missing }
            }
            Err(e) => {
                warn!(aoi = %aoi.id, feature = %feature.id, error = %e, "Write failed");
                FeatureOutcome::Failed {
                    reason: e.to_string(),
                    missing,
                }
            }
        }
    }

    fn write(&self, path: &Path, mosaic: &Mosaic) -> Result<()> {
        let write_error = |path: &Path, reason: String| ExtractError::EncodeWrite {
            path: path.display().to_string(),
            reason,
        };

        let raster = encode(mosaic, self.settings.format, &self.settings.options)
            .map_err(|e| write_error(path, e.to_string()))?;
        self.store
            .write(path, &raster.data)
            .map_err(|e| write_error(path, e.to_string()))?;

        if let (Some(ext), Some(world)) = (self.settings.format.world_file_extension(), raster.world_file) {
            let sidecar = path.with_extension(ext);
            self.store
                .write(&sidecar, world.as_bytes())
                .map_err(|e| write_error(&sidecar, e.to_string()))?;
        }
        Ok(())
    }
}

/// Run-wide counting semaphore over mosaic assembly.
struct FeatureSlots {
    capacity: usize,
    free: Mutex<usize>,
    released: Condvar,
}

/// A held feature slot, returned on drop.
struct FeatureSlot<'a> {
    slots: &'a FeatureSlots,
}

impl FeatureSlots {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            free: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a slot is free.
    fn acquire(&self) -> FeatureSlot<'_> {
        let mut free = self.free.lock();
        while *free == 0 {
            self.released.wait(&mut free);
        }
        *free -= 1;
        FeatureSlot { slots: self }
    }
}

impl Drop for FeatureSlot<'_> {
    fn drop(&mut self) {
        *self.slots.free.lock() += 1;
        self.slots.released.notify_one();
    }
}

fn build_pool(workers: usize, name: &'static str) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(move |i| format!("{}-worker-{}", name, i))
        .build()
        .map_err(|e| ExtractError::config(format!("{} worker pool", name), e))
}
