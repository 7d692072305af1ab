use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, TimeZone, Utc};
use ndarray::{array, Array2};
use std::sync::atomic::{AtomicUsize, Ordering};
use urbanheat::config::{LANDSAT_C2_L2, LANDSAT_SR};
use urbanheat::core::collection::CollectionQuery;
use urbanheat::core::metadata::{ExclusionReason, ProcessingWarning};
use urbanheat::core::reducer::ReducerParams;
use urbanheat::core::thermal::lst_celsius;
use urbanheat::{
    Aoi, BandName, CompositeStage, CoordinateSystem, DateRange, GeoTransform, HeatError, HeatResult,
    IndexPipeline, PipelineConfig, RasterGrid, Scene, SceneSource, SensorTable,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid(n: usize) -> RasterGrid {
    RasterGrid::new(
        n,
        n,
        GeoTransform::north_up(500_000.0, 4_000_000.0, 30.0),
        CoordinateSystem::Projected { epsg: 32643 },
    )
}

fn aoi(n: usize) -> Aoi {
    Aoi::from_bbox(&grid(n).bounds()).unwrap()
}

fn spring() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
    )
    .unwrap()
}

fn filled(n: usize, f: impl Fn(usize, usize) -> f64) -> Array2<Option<f64>> {
    Array2::from_shape_fn((n, n), |(r, c)| Some(f(r, c)))
}

/// L2 scene with every band; `qa` is applied to every pixel
fn l2_scene(id: &str, day: u32, red: Array2<Option<f64>>, nir: Array2<Option<f64>>, qa: u16) -> Scene {
    let n = red.nrows();
    Scene::new(id, LANDSAT_C2_L2, Utc.with_ymd_and_hms(2025, 4, day, 5, 30, 0).unwrap(), 8.0, grid(n))
        .with_band(BandName::Red, red)
        .unwrap()
        .with_band(BandName::Nir, nir)
        .unwrap()
        .with_band(BandName::Swir1, filled(n, |_, _| 0.2))
        .unwrap()
        .with_band(BandName::Thermal, filled(n, |_, _| 44_000.0))
        .unwrap()
        .with_qa(Array2::from_elem((n, n), qa))
        .unwrap()
}

fn nd(a: f64, b: f64) -> f64 {
    (a - b) / (a + b)
}

#[test]
fn test_ndvi_composite_skips_fully_masked_scene() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    let a = l2_scene("A", 2, filled(2, |_, _| 0.1), filled(2, |r, c| 0.2 + 0.1 * (r * 2 + c) as f64), 0);
    let b = l2_scene("B", 18, filled(2, |_, _| 0.2), filled(2, |r, _| 0.3 + 0.2 * r as f64), 0);
    // cloud bit set everywhere
    let cloudy = l2_scene("C", 10, filled(2, |_, _| 0.1), filled(2, |_, _| 0.5), 1 << 3);

    let out = pipeline.run(vec![b, cloudy, a]).unwrap();

    assert_eq!(out.metadata.scenes_used, vec!["A", "B"]);
    assert_eq!(out.metadata.excluded.len(), 1);
    assert_eq!(out.metadata.excluded[0].scene_id, "C");
    assert_eq!(out.metadata.excluded[0].reason, ExclusionReason::NoValidPixels);
    assert_eq!(out.composite.band.name, "Mean_NDVI");
    assert_eq!(out.composite.layers, 2);

    for r in 0..2 {
        for c in 0..2 {
            let ndvi_a = nd(0.2 + 0.1 * (r * 2 + c) as f64, 0.1);
            let ndvi_b = nd(0.3 + 0.2 * r as f64, 0.2);
            assert_abs_diff_eq!(out.composite.band.data[[r, c]].unwrap(), (ndvi_a + ndvi_b) / 2.0, epsilon = 1e-12);
            assert_eq!(out.composite.contributors[[r, c]], 2);
        }
    }
    assert_eq!(out.metadata.valid_pixels, 4);
    assert!(out.metadata.aoi_mean.is_some());
}

#[test]
fn test_lst_single_scene() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::lst(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    let nir = array![[Some(0.1), Some(0.2)], [Some(0.3), Some(0.9)]];
    let scene = l2_scene("LC08_146040_20250405", 5, filled(2, |_, _| 0.1), nir, 0);
    let out = pipeline.run(vec![scene]).unwrap();

    let bt = 44_000.0 * 0.00341802 + 149.0;
    // NDVI spans [0, 0.8]; the extremes get PV 0 and 1
    let expected_bare = bt / (1.0 + (0.00115 * bt / 1.4388) * 0.986f64.ln()) - 273.15;
    let expected_green = bt / (1.0 + (0.00115 * bt / 1.4388) * 0.990f64.ln()) - 273.15;

    let lst = &out.composite.band.data;
    assert_abs_diff_eq!(lst[[0, 0]].unwrap(), expected_bare, epsilon = 1e-6);
    assert_abs_diff_eq!(lst[[1, 1]].unwrap(), expected_green, epsilon = 1e-6);

    let ndvi_mid = nd(0.3, 0.1);
    let pv = (ndvi_mid / 0.8).powi(2);
    let expected_mid = lst_celsius(bt, 0.004 * pv + 0.986, 11.5).unwrap();
    assert_abs_diff_eq!(lst[[1, 0]].unwrap(), expected_mid, epsilon = 1e-9);

    assert_eq!(out.composite.band.name, "Mean_LST");
    assert_eq!(out.metadata.product, "LST");
    assert!(!out.metadata.approximate);
}

#[test]
fn test_degenerate_ndvi_range_recorded_or_raised() {
    init_logging();
    let good = || l2_scene("good", 3, filled(2, |_, _| 0.1), filled(2, |r, c| 0.2 + 0.1 * (r + c) as f64), 0);
    let flat = || l2_scene("flat", 4, filled(2, |_, _| 0.1), filled(2, |_, _| 0.4), 0);

    let lenient = IndexPipeline::new(PipelineConfig::lst(spring()), &SensorTable::builtin(), aoi(2)).unwrap();
    let out = lenient.run(vec![good(), flat()]).unwrap();
    assert_eq!(out.metadata.scenes_used, vec!["good"]);
    assert!(matches!(
        out.metadata.excluded[0].reason,
        ExclusionReason::DegenerateNdviRange { .. }
    ));

    let mut config = PipelineConfig::lst(spring());
    config.strict = true;
    let strict = IndexPipeline::new(config, &SensorTable::builtin(), aoi(2)).unwrap();
    let result = strict.run(vec![good(), flat()]);
    assert!(matches!(result, Err(HeatError::DegenerateScene { ref scene_id, .. }) if scene_id == "flat"));
}

#[test]
fn test_missing_thermal_band_excludes_scene() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::lst(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    let complete = l2_scene("complete", 3, filled(2, |_, _| 0.1), filled(2, |r, _| 0.2 + 0.3 * r as f64), 0);
    let no_thermal = Scene::new("no_thermal", LANDSAT_C2_L2, Utc.with_ymd_and_hms(2025, 4, 9, 5, 30, 0).unwrap(), 3.0, grid(2))
        .with_band(BandName::Red, filled(2, |_, _| 0.1))
        .unwrap()
        .with_band(BandName::Nir, filled(2, |_, _| 0.3))
        .unwrap()
        .with_qa(Array2::zeros((2, 2)))
        .unwrap();

    let out = pipeline.run(vec![complete, no_thermal]).unwrap();
    assert_eq!(out.metadata.scenes_used, vec!["complete"]);
    assert_eq!(
        out.metadata.excluded[0].reason,
        ExclusionReason::MissingBand { band: "Thermal".to_string() }
    );
}

#[test]
fn test_empty_collection_is_no_scenes() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    // acquired in July, outside the window
    let late = Scene::new("late", LANDSAT_C2_L2, Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(), 1.0, grid(2));
    assert!(matches!(pipeline.run(vec![late]), Err(HeatError::NoScenes { .. })));
    assert!(matches!(pipeline.run(Vec::new()), Err(HeatError::NoScenes { .. })));
}

#[test]
fn test_all_scenes_excluded_is_no_scenes() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();
    let cloudy = l2_scene("cloudy", 10, filled(2, |_, _| 0.1), filled(2, |_, _| 0.5), 1 << 2);
    assert!(matches!(pipeline.run(vec![cloudy]), Err(HeatError::NoScenes { .. })));
}

#[test]
fn test_approximate_ndvi_range_is_flagged() {
    init_logging();
    let mut config = PipelineConfig::lst(spring());
    config.reduction = ReducerParams { scale: 30.0, max_pixels: 4, best_effort: true };
    let pipeline = IndexPipeline::new(config, &SensorTable::builtin(), aoi(4)).unwrap();

    let scene = l2_scene("big", 6, filled(4, |_, _| 0.1), filled(4, |r, c| 0.2 + 0.05 * (r + c) as f64), 0);
    let out = pipeline.run(vec![scene]).unwrap();

    assert!(out.metadata.approximate);
    assert_eq!(out.metadata.warnings.len(), 2);
    assert!(out.metadata.warnings.iter().any(|w| statistic(w) == "NDVI min/max"));
    assert!(out.metadata.warnings.iter().any(|w| statistic(w) == "AOI mean"));
}

fn statistic(warning: &ProcessingWarning) -> &str {
    match warning {
        ProcessingWarning::ApproximateStatistics { statistic, .. } => statistic,
    }
}

#[test]
fn test_approximate_aoi_mean_is_flagged() {
    init_logging();
    let mut config = PipelineConfig::ndvi(spring());
    config.reduction = ReducerParams { scale: 30.0, max_pixels: 4, best_effort: true };
    let pipeline = IndexPipeline::new(config, &SensorTable::builtin(), aoi(8)).unwrap();

    let scene = l2_scene("wide", 6, filled(8, |_, _| 0.1), filled(8, |r, c| 0.2 + 0.05 * (r + c) as f64), 0);
    let out = pipeline.run(vec![scene]).unwrap();

    assert!(out.metadata.approximate);
    assert_eq!(out.metadata.warnings.len(), 1);
    match &out.metadata.warnings[0] {
        ProcessingWarning::ApproximateStatistics { scene_id, statistic, stride, sampled_pixels } => {
            assert_eq!(scene_id, "Mean_NDVI");
            assert_eq!(statistic, "AOI mean");
            assert!(*stride > 1);
            assert!(*sampled_pixels <= 4);
        }
    }
    assert!(out.metadata.aoi_mean.is_some());
}

#[test]
fn test_ndvi_preset_differences_raw_digital_numbers() {
    init_logging();
    let scene = || l2_scene("DN", 7, filled(2, |_, _| 10_000.0), filled(2, |_, _| 20_000.0), 0);

    let preset = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();
    let out = preset.run(vec![scene()]).unwrap();
    assert_abs_diff_eq!(out.composite.band.data[[0, 0]].unwrap(), 1.0 / 3.0, epsilon = 1e-12);

    // reflectance scaling stays available as an opt-in
    let mut config = PipelineConfig::ndvi(spring());
    config.scale_reflectance = true;
    let scaled = IndexPipeline::new(config, &SensorTable::builtin(), aoi(2)).unwrap();
    let out = scaled.run(vec![scene()]).unwrap();
    let red = 10_000.0 * 0.0000275 - 0.2;
    let nir = 20_000.0 * 0.0000275 - 0.2;
    assert_abs_diff_eq!(out.composite.band.data[[0, 0]].unwrap(), nd(nir, red), epsilon = 1e-9);
}

#[test]
fn test_scene_on_end_date_is_left_out() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    let inside = l2_scene("INSIDE", 20, filled(2, |_, _| 0.1), filled(2, |_, _| 0.3), 0);
    let mut end = l2_scene("END", 20, filled(2, |_, _| 0.1), filled(2, |_, _| 0.5), 0);
    end.acquired = Utc.with_ymd_and_hms(2025, 5, 31, 5, 30, 0).unwrap();

    let out = pipeline.run(vec![inside, end.clone()]).unwrap();
    assert_eq!(out.metadata.scenes_used, vec!["INSIDE"]);
    assert!(matches!(pipeline.run(vec![end]), Err(HeatError::NoScenes { .. })));
}

#[test]
fn test_ndbi_reflectance_median_composite() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndbi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();

    let sr_scene = |id: &str, day: u32, swir: f64, nir: f64, qa: Array2<u16>| {
        Scene::new(id, LANDSAT_SR, Utc.with_ymd_and_hms(2025, 4, day, 5, 30, 0).unwrap(), 5.0, grid(2))
            .with_band(BandName::Swir1, filled(2, |_, _| swir))
            .unwrap()
            .with_band(BandName::Nir, filled(2, |_, _| nir))
            .unwrap()
            .with_qa(qa)
            .unwrap()
    };
    // pixel (0, 0) of the third scene is cloudy (bit 5 in the SR layout)
    let mut cloudy_corner = Array2::zeros((2, 2));
    cloudy_corner[[0, 0]] = 1 << 5;

    let scenes = vec![
        sr_scene("s1", 2, 2000.0, 1000.0, Array2::zeros((2, 2))),
        sr_scene("s2", 12, 2500.0, 1500.0, Array2::zeros((2, 2))),
        sr_scene("s3", 22, 3000.0, 1200.0, cloudy_corner),
    ];
    let out = pipeline.run(scenes).unwrap();

    assert_eq!(out.composite.band.name, "NDBI");
    assert_eq!(out.metadata.stage, CompositeStage::Reflectance);
    assert_eq!(out.metadata.scenes_used.len(), 3);

    let ndbi = &out.composite.band.data;
    assert_abs_diff_eq!(ndbi[[1, 1]].unwrap(), nd(0.25, 0.12), epsilon = 1e-9);
    assert_abs_diff_eq!(ndbi[[0, 0]].unwrap(), nd(0.225, 0.125), epsilon = 1e-9);
    assert_eq!(out.composite.contributors, array![[2, 3], [3, 3]]);
}

struct CountingSource {
    scenes: Vec<Scene>,
    calls: AtomicUsize,
}

impl SceneSource for CountingSource {
    fn fetch(&self, query: &CollectionQuery) -> HeatResult<Vec<Scene>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query.sensor_id, LANDSAT_C2_L2);
        Ok(self.scenes.clone())
    }
}

#[test]
fn test_run_from_scene_source() {
    init_logging();
    let pipeline = IndexPipeline::new(PipelineConfig::ndvi(spring()), &SensorTable::builtin(), aoi(2)).unwrap();
    let source = CountingSource {
        scenes: vec![l2_scene("A", 2, filled(2, |_, _| 0.1), filled(2, |_, _| 0.3), 0)],
        calls: AtomicUsize::new(0),
    };

    let out = pipeline.run_source(&source).unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_abs_diff_eq!(out.composite.band.data[[0, 0]].unwrap(), 0.5, epsilon = 1e-12);
}

#[test]
fn test_pipeline_config_json() {
    let config = PipelineConfig::lst(spring());
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), config);

    let mut bad = config.clone();
    bad.max_cloud_cover = 0.0;
    assert!(bad.validate().is_err());

    let mut reflectance_lst = config;
    reflectance_lst.stage = CompositeStage::Reflectance;
    assert!(matches!(reflectance_lst.validate(), Err(HeatError::InvalidParameter(_))));
}

#[test]
fn test_unknown_sensor_rejected() {
    let mut config = PipelineConfig::ndvi(spring());
    config.sensor_id = "SENTINEL/S2".to_string();
    let result = IndexPipeline::new(config, &SensorTable::builtin(), aoi(2));
    assert!(matches!(result, Err(HeatError::UnknownSensor(_))));
}
