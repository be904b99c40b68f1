//! End-to-end extraction tests against an in-memory catalogue, tile provider and store.

use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, NaiveDateTime};
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wmtsx_catalog::{
    parse_aois, AoiOptions, AreaOfInterest, CatalogError, Catalogue, CatalogueFeature, FilterCriteria,
    Selector,
};
use wmtsx_runner::{
    inventory_table, DirLayout, ExtractSettings, Extractor, FeatureOutcome, FsStore, MemoryStore,
    OutputStore,
};
use wmtsx_tiles::{plan_lonlat, OutputFormat, TileCoord, TileError, TileFeature, TileMatrix, TileProvider};

// ============================================================================
// Fixtures
// ============================================================================

const ZOOM: u8 = 14;

fn aois() -> Vec<AreaOfInterest> {
    let geojson = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"name": "North Field"}, "geometry": {"type": "Point", "coordinates": [10.0, 45.0]}},
        {"type": "Feature", "properties": {"name": "South Field"}, "geometry": {"type": "Point", "coordinates": [10.2, 44.8]}}
    ]}"#;
    let options = AoiOptions {
        field: Some("name".to_string()),
        ..AoiOptions::default()
    };
    parse_aois(geojson, &options).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(10, 30, 0))
        .unwrap()
}

fn features() -> Vec<CatalogueFeature> {
    vec![
        CatalogueFeature::new("f-old")
            .with_platform("WorldView-02")
            .with_acquired(date(2016, 5, 1))
            .with_cloud_cover(0.0)
            .with_resolution(0.5)
            .with_overlap(100.0),
        CatalogueFeature::new("f-new")
            .with_platform("WorldView-03")
            .with_acquired(date(2019, 7, 12))
            .with_cloud_cover(0.05)
            .with_resolution(0.3)
            .with_overlap(100.0),
        CatalogueFeature::new("f-cloudy")
            .with_platform("GeoEye-01")
            .with_acquired(date(2018, 2, 3))
            .with_cloud_cover(0.9)
            .with_resolution(0.4)
            .with_overlap(80.0),
    ]
}

fn catalogue() -> Arc<dyn Catalogue> {
    Arc::new(|_: &AreaOfInterest| -> wmtsx_catalog::Result<Vec<CatalogueFeature>> { Ok(features()) })
}

fn png_tile(color: [u8; 4]) -> Vec<u8> {
    let tile = RgbaImage::from_pixel(256, 256, Rgba(color));
    let mut bytes = Cursor::new(Vec::new());
    tile.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Tile provider counting its calls; fails for the tiles in `broken`.
struct CountingTiles {
    payload: Vec<u8>,
    broken: Vec<TileCoord>,
    calls: AtomicUsize,
}

impl CountingTiles {
    fn new(broken: Vec<TileCoord>) -> Arc<Self> {
        Arc::new(Self {
            payload: png_tile([40, 120, 200, 255]),
            broken,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileProvider for CountingTiles {
    fn fetch_tile(&self, _feature: &TileFeature, tile: TileCoord) -> wmtsx_tiles::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&tile) {
            return Err(TileError::TileFetch {
                z: tile.z,
                x: tile.x,
                y: tile.y,
                reason: "HTTP 500".to_string(),
            });
        }
        Ok(self.payload.clone())
    }
}

/// Tile provider recording how many distinct features are fetching at once.
#[derive(Default)]
struct OverlapTiles {
    active: Mutex<HashMap<String, usize>>,
    most_features: AtomicUsize,
}

impl OverlapTiles {
    fn most_features(&self) -> usize {
        self.most_features.load(Ordering::SeqCst)
    }
}

impl TileProvider for OverlapTiles {
    fn fetch_tile(&self, feature: &TileFeature, _tile: TileCoord) -> wmtsx_tiles::Result<Vec<u8>> {
        {
            let mut active = self.active.lock();
            *active.entry(feature.id.clone()).or_default() += 1;
            self.most_features.fetch_max(active.len(), Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(2));
        {
            let mut active = self.active.lock();
            if let Some(count) = active.get_mut(&feature.id) {
                *count -= 1;
                if *count == 0 {
                    active.remove(&feature.id);
                }
            }
        }
        Ok(png_tile([1, 2, 3, 255]))
    }
}

/// Catalogue whose feature ids are unique per AOI.
fn per_aoi_catalogue() -> Arc<dyn Catalogue> {
    Arc::new(|aoi: &AreaOfInterest| -> wmtsx_catalog::Result<Vec<CatalogueFeature>> {
        Ok(features()
            .into_iter()
            .map(|mut f| {
                f.id = format!("{}-{}", aoi.id, f.id);
                f
            })
            .collect())
    })
}

/// Memory store refusing writes to paths that contain `refused`.
struct RefusingStore {
    inner: MemoryStore,
    refused: String,
}

impl OutputStore for RefusingStore {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if path.to_string_lossy().contains(&self.refused) {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        self.inner.write(path, data)
    }
}

fn settings() -> ExtractSettings {
    let mut settings = ExtractSettings::new(ZOOM, TileMatrix::web_mercator(), "/out/securewatch");
    settings.workers.aois = 2;
    settings
}

fn selector(criteria: FilterCriteria) -> Selector {
    Selector::new(criteria, None).unwrap()
}

fn clear_sky() -> FilterCriteria {
    FilterCriteria {
        max_cloud: Some(0.2),
        ..FilterCriteria::default()
    }
}

// ============================================================================
// Selection and output layout
// ============================================================================

#[test]
fn test_run_writes_one_mosaic_per_selected_feature() {
    let tiles = CountingTiles::new(Vec::new());
    let store = Arc::new(MemoryStore::new());
    let extractor = Extractor::new(settings(), selector(clear_sky()), catalogue(), tiles.clone(), store.clone()).unwrap();

    let summary = extractor.run(&aois());

    assert_eq!(summary.aois.len(), 2);
    assert_eq!(summary.selected(), 4);
    assert_eq!(summary.downloaded(), 4);
    assert_eq!(summary.failed(), 0);
    assert_eq!(store.len(), 4);

    let expected = PathBuf::from(
        "/out/securewatch/North-Field/20190712_103000/North-Field_20190712103000_14_1000_f-new.tif",
    );
    assert!(store.exists(&expected), "missing {}", expected.display());

    // Overlap ties, so the newest acquisition comes first.
    let north = &summary.aois[0];
    assert_eq!(north.aoi, "North-Field");
    assert_eq!(north.selected[0].feature.id, "f-new");
    assert_eq!(north.selected[1].feature.id, "f-old");
}

#[test]
fn test_max_downloads_caps_fetches() {
    let tiles = CountingTiles::new(Vec::new());
    let store = Arc::new(MemoryStore::new());
    let criteria = FilterCriteria {
        max_downloads: Some(1),
        ..clear_sky()
    };
    let extractor = Extractor::new(settings(), selector(criteria), catalogue(), tiles.clone(), store.clone()).unwrap();

    let aois = aois();
    let summary = extractor.run(&aois[..1]);
    let plan = plan_lonlat(aois[0].bbox(), ZOOM, &TileMatrix::web_mercator()).unwrap();

    assert_eq!(summary.downloaded(), 1);
    assert_eq!(tiles.calls(), plan.len());
}

// ============================================================================
// Skip unless overwrite
// ============================================================================

#[test]
fn test_rerun_without_overwrite_fetches_nothing() {
    let store = Arc::new(MemoryStore::new());
    let first = CountingTiles::new(Vec::new());
    Extractor::new(settings(), selector(clear_sky()), catalogue(), first.clone(), store.clone())
        .unwrap()
        .run(&aois());
    assert!(first.calls() > 0);

    let second = CountingTiles::new(Vec::new());
    let summary = Extractor::new(settings(), selector(clear_sky()), catalogue(), second.clone(), store.clone())
        .unwrap()
        .run(&aois());

    assert_eq!(second.calls(), 0);
    assert_eq!(summary.skipped(), 4);
    assert_eq!(summary.downloaded(), 0);
}

#[test]
fn test_rerun_with_overwrite_fetches_again() {
    let store = Arc::new(MemoryStore::new());
    let aois = aois();
    Extractor::new(settings(), selector(clear_sky()), catalogue(), CountingTiles::new(Vec::new()), store.clone())
        .unwrap()
        .run(&aois);

    let mut settings = settings();
    settings.overwrite = true;
    let tiles = CountingTiles::new(Vec::new());
    let summary = Extractor::new(settings, selector(clear_sky()), catalogue(), tiles.clone(), store.clone())
        .unwrap()
        .run(&aois);

    assert!(tiles.calls() > 0);
    assert_eq!(summary.downloaded(), 4);
    assert_eq!(summary.skipped(), 0);
}

// ============================================================================
// Failure scoping
// ============================================================================

#[test]
fn test_partial_tile_failure_is_reported_and_written() {
    let aois = aois();
    let plan = plan_lonlat(aois[0].bbox(), ZOOM, &TileMatrix::web_mercator()).unwrap();
    assert!(plan.len() > 1);
    let broken = plan.tiles()[0];

    let tiles = CountingTiles::new(vec![broken.coord]);
    let store = Arc::new(MemoryStore::new());
    let mut settings = settings();
    settings.format = OutputFormat::Png;
    let criteria = FilterCriteria {
        features: vec!["f-new".to_string()],
        ..FilterCriteria::default()
    };
    let extractor = Extractor::new(settings, selector(criteria), catalogue(), tiles, store.clone()).unwrap();

    let report = extractor.process_aoi(&aois[0]);
    assert_eq!(report.features.len(), 1);
    let FeatureOutcome::Downloaded { path, missing } = &report.features[0].outcome else {
        panic!("expected a written mosaic, got {:?}", report.features[0].outcome);
    };
    assert_eq!(missing, &vec![broken.coord]);

    let png = store.get(path).unwrap();
    let mosaic = image::load_from_memory(&png).unwrap().to_rgba8();
    let (width, height) = plan.pixel_size();
    assert_eq!(mosaic.dimensions(), (width, height));
    assert_eq!(mosaic.get_pixel(broken.offset_x + 10, broken.offset_y + 10)[3], 0);
    assert_eq!(mosaic.get_pixel(width - 1, height - 1)[3], 255);

    // PNG output carries a world file whose origin is the centre of the top-left pixel.
    let world = String::from_utf8(store.get(&path.with_extension("pgw")).unwrap()).unwrap();
    let values: Vec<f64> = world.lines().map(|l| l.parse().unwrap()).collect();
    let resolution = TileMatrix::web_mercator().resolution(ZOOM);
    assert_abs_diff_eq!(values[0], resolution, epsilon = 1e-6);
    assert_abs_diff_eq!(values[3], -resolution, epsilon = 1e-6);
    let (origin_x, _) = TileMatrix::web_mercator().tile_origin(plan.top_left());
    assert_abs_diff_eq!(values[4], origin_x + resolution / 2.0, epsilon = 1e-3);
}

#[test]
fn test_store_failure_is_scoped_to_feature() {
    let store = Arc::new(RefusingStore {
        inner: MemoryStore::new(),
        refused: "f-old".to_string(),
    });
    let extractor =
        Extractor::new(settings(), selector(clear_sky()), catalogue(), CountingTiles::new(Vec::new()), store.clone())
            .unwrap();

    let summary = extractor.run(&aois());

    assert_eq!(summary.aoi_errors(), 0);
    assert_eq!(summary.selected(), 4);
    assert_eq!(summary.downloaded(), 2);
    assert_eq!(summary.failed(), 2);
    for aoi in &summary.aois {
        for report in &aoi.features {
            match (&report.feature_id[..], &report.outcome) {
                ("f-old", FeatureOutcome::Failed { reason, missing }) => {
                    assert!(reason.contains("read-only volume"), "{}", reason);
                    assert!(missing.is_empty());
                }
                ("f-new", FeatureOutcome::Downloaded { path, .. }) => assert!(store.exists(path)),
                (id, outcome) => panic!("unexpected outcome for {}: {:?}", id, outcome),
            }
        }
    }
    assert_eq!(store.inner.len(), 2);
    assert!(store.inner.paths().iter().all(|p| !p.to_string_lossy().contains("f-old")));
}

#[test]
fn test_query_failure_does_not_abort_sibling_aois() {
    let catalogue: Arc<dyn Catalogue> = Arc::new(
        |aoi: &AreaOfInterest| -> wmtsx_catalog::Result<Vec<CatalogueFeature>> {
            if aoi.id == "North-Field" {
                Err(CatalogError::MetadataQuery {
                    aoi: aoi.id.clone(),
                    reason: "HTTP 502".to_string(),
                })
            } else {
                Ok(features())
            }
        },
    );
    let store = Arc::new(MemoryStore::new());
    let extractor =
        Extractor::new(settings(), selector(clear_sky()), catalogue, CountingTiles::new(Vec::new()), store.clone())
            .unwrap();

    let summary = extractor.run(&aois());

    assert_eq!(summary.aoi_errors(), 1);
    assert!(summary.aois[0].error.as_deref().unwrap().contains("HTTP 502"));
    assert_eq!(summary.aois[1].downloaded(), 2);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_empty_selection_is_not_an_error() {
    let criteria = FilterCriteria {
        platforms: vec!["Pleiades".to_string()],
        ..FilterCriteria::default()
    };
    let tiles = CountingTiles::new(Vec::new());
    let extractor = Extractor::new(
        settings(),
        selector(criteria),
        catalogue(),
        tiles.clone(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = extractor.run(&aois());
    assert_eq!(summary.selected(), 0);
    assert_eq!(summary.aoi_errors(), 0);
    assert_eq!(tiles.calls(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_feature_limit_spans_all_aois() {
    let tiles = Arc::new(OverlapTiles::default());
    let mut settings = settings();
    settings.workers.aois = 2;
    settings.workers.features = 1;
    settings.workers.tiles = 4;
    let extractor = Extractor::new(
        settings,
        selector(clear_sky()),
        per_aoi_catalogue(),
        tiles.clone(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = extractor.run(&aois());
    assert_eq!(summary.downloaded(), 4);
    assert_eq!(tiles.most_features(), 1);
}

#[test]
fn test_feature_limit_allows_configured_parallelism() {
    let tiles = Arc::new(OverlapTiles::default());
    let mut settings = settings();
    settings.workers.aois = 2;
    settings.workers.features = 2;
    let extractor = Extractor::new(
        settings,
        selector(clear_sky()),
        per_aoi_catalogue(),
        tiles.clone(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = extractor.run(&aois());
    assert_eq!(summary.downloaded(), 4);
    assert!((1..=2).contains(&tiles.most_features()));

    // Reports keep selection order whichever worker finished first.
    for aoi in &summary.aois {
        let ids: Vec<&str> = aoi.features.iter().map(|f| f.feature_id.as_str()).collect();
        let selected: Vec<&str> = aoi.selected.iter().map(|r| r.feature.id.as_str()).collect();
        assert_eq!(ids, selected);
    }
}

#[test]
fn test_tile_requests_carry_acquisition_time() {
    let seen: Arc<Mutex<Vec<(String, Option<NaiveDateTime>)>>> = Arc::default();
    let recorder = seen.clone();
    let tiles: Arc<dyn TileProvider> =
        Arc::new(move |feature: &TileFeature, _tile: TileCoord| -> wmtsx_tiles::Result<Vec<u8>> {
            recorder.lock().push((feature.id.clone(), feature.acquired));
            Ok(png_tile([9, 9, 9, 255]))
        });
    let criteria = FilterCriteria {
        features: vec!["f-new".to_string()],
        ..FilterCriteria::default()
    };
    let extractor = Extractor::new(settings(), selector(criteria), catalogue(), tiles, Arc::new(MemoryStore::new())).unwrap();

    let aois = aois();
    assert_eq!(extractor.run(&aois[..1]).downloaded(), 1);
    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen
        .iter()
        .all(|(id, acquired)| id == "f-new" && *acquired == Some(date(2019, 7, 12))));
}

// ============================================================================
// Info only
// ============================================================================

#[test]
fn test_inventory_fetches_and_writes_nothing() {
    let tiles = CountingTiles::new(Vec::new());
    let store = Arc::new(MemoryStore::new());
    let extractor = Extractor::new(settings(), selector(clear_sky()), catalogue(), tiles.clone(), store.clone()).unwrap();

    let reports = extractor.inventory(&aois());
    let table = inventory_table(&reports);

    assert_eq!(tiles.calls(), 0);
    assert!(store.is_empty());
    assert!(table.contains("f-new"));
    assert!(table.contains("WorldView-03"));
    assert!(!table.contains("f-cloudy"));
}

// ============================================================================
// Filesystem store
// ============================================================================

#[test]
fn test_fs_store_layout() {
    let root = std::env::temp_dir().join(format!("wmtsx-runner-test-{}", std::process::id()));
    let mut settings = ExtractSettings::new(ZOOM, TileMatrix::web_mercator(), root.clone());
    settings.layout = DirLayout::PlatformFirst;
    let criteria = FilterCriteria {
        features: vec!["f-old".to_string()],
        ..FilterCriteria::default()
    };
    let extractor = Extractor::new(
        settings,
        selector(criteria),
        catalogue(),
        CountingTiles::new(Vec::new()),
        Arc::new(FsStore),
    )
    .unwrap();

    let aois = aois();
    let summary = extractor.run(&aois[..1]);
    assert_eq!(summary.downloaded(), 1);

    let expected: &Path = &root
        .join("WorldView-02")
        .join("North-Field")
        .join("20160501_103000")
        .join("North-Field_20160501103000_14_1000_f-old.tif");
    assert!(FsStore.exists(expected));
    assert!(!expected.with_extension("partial").exists());

    let bytes = std::fs::read(expected).unwrap();
    assert!(&bytes[..2] == b"II" || &bytes[..2] == b"MM");

    std::fs::remove_dir_all(&root).unwrap();
}
