//! End-to-end index compositing
//!
//! Filter → cloud mask and clip → index (with per-scene NDVI range for LST)
//! → temporal composite → metadata. All settings arrive through
//! [`PipelineConfig`] and the [`Aoi`]; nothing is read from global state.

use crate::config::{SensorProduct, SensorTable, VisParams, LANDSAT_C2_L2, LANDSAT_SR};
use crate::core::aoi::Aoi;
use crate::core::cloud_mask::CloudMaskFilter;
use crate::core::collection::{CollectionQuery, SceneCollection, DEFAULT_MAX_CLOUD_COVER};
use crate::core::composite::{Composite, CompositeReducer, CompositeStage, TemporalCompositor};
use crate::core::indices::{scale_reflectance, SpectralIndex};
use crate::core::metadata::{CompositeMetadata, ExcludedScene, ExclusionReason, ProcessingWarning};
use crate::core::reducer::{ReducerParams, RegionalReducer};
use crate::core::thermal::{EmissivityModel, ThermalCalculator};
use crate::io::SceneSource;
use crate::types::{BandName, DateRange, HeatError, HeatResult, Mask, RasterBand, Scene};
use chrono::Utc;
use ndarray::{Array2, Zip};
use crate::maybe_rayon::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Final product of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexProduct {
    Ndvi,
    Ndbi,
    /// Land surface temperature in Celsius
    Lst,
}

impl IndexProduct {
    pub fn name(&self) -> &'static str {
        match self {
            IndexProduct::Ndvi => "NDVI",
            IndexProduct::Ndbi => "NDBI",
            IndexProduct::Lst => "LST",
        }
    }

    pub fn required_bands(&self) -> &'static [BandName] {
        match self {
            IndexProduct::Ndvi => &[BandName::Red, BandName::Nir],
            IndexProduct::Ndbi => &[BandName::Swir1, BandName::Nir],
            IndexProduct::Lst => &[BandName::Red, BandName::Nir, BandName::Thermal],
        }
    }
}

/// Explicit configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub product: IndexProduct,
    pub sensor_id: String,
    pub dates: DateRange,
    /// Scenes at or above this cloud cover percentage are skipped
    pub max_cloud_cover: f32,
    pub reducer: CompositeReducer,
    pub stage: CompositeStage,
    pub reduction: ReducerParams,
    pub emissivity: EmissivityModel,
    /// Convert optical DNs to reflectance with the sensor scale/offset.
    /// The NDVI and LST presets leave this off and difference the raw DNs.
    pub scale_reflectance: bool,
    /// Fail the run on a degenerate scene instead of recording it
    pub strict: bool,
    pub visualization: VisParams,
}

impl PipelineConfig {
    /// Seasonal mean NDVI from Landsat 8/9 Collection 2 Level-2
    pub fn ndvi(dates: DateRange) -> Self {
        Self {
            product: IndexProduct::Ndvi,
            sensor_id: LANDSAT_C2_L2.to_string(),
            dates,
            max_cloud_cover: DEFAULT_MAX_CLOUD_COVER,
            reducer: CompositeReducer::Mean,
            stage: CompositeStage::PerScene,
            reduction: ReducerParams::default(),
            emissivity: EmissivityModel::default(),
            scale_reflectance: false,
            strict: false,
            visualization: VisParams::ndvi(),
        }
    }

    /// NDBI over a median reflectance composite
    pub fn ndbi(dates: DateRange) -> Self {
        Self {
            product: IndexProduct::Ndbi,
            sensor_id: LANDSAT_SR.to_string(),
            reducer: CompositeReducer::Median,
            stage: CompositeStage::Reflectance,
            scale_reflectance: true,
            visualization: VisParams::ndbi(),
            ..Self::ndvi(dates)
        }
    }

    /// Seasonal mean land surface temperature in Celsius
    pub fn lst(dates: DateRange) -> Self {
        Self {
            product: IndexProduct::Lst,
            visualization: VisParams::lst_celsius(),
            ..Self::ndvi(dates)
        }
    }

    pub fn from_json_str(json: &str) -> HeatResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HeatResult<Self> {
        log::info!("Reading pipeline configuration from: {}", path.as_ref().display());
        Self::from_json_str(&std::fs::read_to_string(path.as_ref())?)
    }

    pub fn validate(&self) -> HeatResult<()> {
        if !(self.max_cloud_cover > 0.0 && self.max_cloud_cover <= 100.0) {
            return Err(HeatError::InvalidParameter(format!(
                "cloud cover threshold must be in (0, 100], got {}",
                self.max_cloud_cover
            )));
        }
        if self.product == IndexProduct::Lst && self.stage == CompositeStage::Reflectance {
            return Err(HeatError::InvalidParameter(
                "LST needs a per-scene NDVI range and cannot composite reflectance first".to_string(),
            ));
        }
        self.emissivity.validate()
    }

    /// Name of the composite band, e.g. `Mean_LST`
    pub fn band_name(&self) -> String {
        match self.stage {
            CompositeStage::PerScene => format!("{}_{}", self.reducer.name(), self.product.name()),
            CompositeStage::Reflectance => self.product.name().to_string(),
        }
    }
}

/// Composite and its provenance
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub composite: Composite,
    pub metadata: CompositeMetadata,
}

/// Composite plus the bookkeeping gathered while building it
struct StageOutput {
    composite: Composite,
    scenes_used: Vec<String>,
    excluded: Vec<ExcludedScene>,
    warnings: Vec<ProcessingWarning>,
}

/// Cloud-masked, composited index pipeline
pub struct IndexPipeline {
    config: PipelineConfig,
    sensor: SensorProduct,
    aoi: Aoi,
    mask: CloudMaskFilter,
    reducer: RegionalReducer,
    compositor: TemporalCompositor,
}

impl IndexPipeline {
    /// Resolve the sensor product once and build the stage processors
    pub fn new(config: PipelineConfig, sensors: &SensorTable, aoi: Aoi) -> HeatResult<Self> {
        config.validate()?;
        let sensor = sensors.resolve(&config.sensor_id)?.clone();
        log::info!(
            "Pipeline {} for {} ({}) over {}",
            config.band_name(),
            sensor.id,
            sensor.version,
            config.dates
        );
        log::debug!("Pipeline configuration: {:?}", config);

        Ok(Self {
            mask: CloudMaskFilter::new(sensor.qa_flags),
            reducer: RegionalReducer::new(config.reduction.clone()),
            compositor: TemporalCompositor::new(config.reducer),
            config,
            sensor,
            aoi,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sensor(&self) -> &SensorProduct {
        &self.sensor
    }

    pub fn aoi(&self) -> &Aoi {
        &self.aoi
    }

    pub fn query(&self) -> CollectionQuery {
        CollectionQuery {
            sensor_id: self.sensor.id.clone(),
            dates: self.config.dates,
            aoi: self.aoi.clone(),
            max_cloud_cover: self.config.max_cloud_cover,
        }
    }

    /// Fetch the collection from a loader and run
    pub fn run_source(&self, source: &dyn SceneSource) -> HeatResult<PipelineOutput> {
        let query = self.query();
        let scenes = source.fetch(&query)?;
        log::info!("Loader returned {} scene(s) for {}", scenes.len(), query.describe());
        self.run(scenes)
    }

    /// Run over an in-memory set of scenes
    pub fn run(&self, scenes: Vec<Scene>) -> HeatResult<PipelineOutput> {
        let query = self.query();
        let collection = SceneCollection::new(scenes).filter(&query);
        if collection.is_empty() {
            return Err(HeatError::NoScenes { query: query.describe() });
        }

        let stage = match self.config.stage {
            CompositeStage::PerScene => self.composite_per_scene(collection.scenes())?,
            CompositeStage::Reflectance => self.composite_reflectance(collection.scenes())?,
        };
        let StageOutput {
            composite,
            scenes_used,
            excluded,
            mut warnings,
        } = match stage {
            Some(output) => output,
            None => {
                return Err(HeatError::NoScenes {
                    query: format!("{} (all {} scene(s) excluded)", query.describe(), collection.len()),
                })
            }
        };

        let aoi_stats = self.reducer.reduce_region(&composite.band, &self.aoi)?;
        if aoi_stats.approximate {
            log::warn!(
                "AOI mean of {} sampled every {} pixel(s)",
                composite.band.name,
                aoi_stats.stride
            );
            warnings.push(ProcessingWarning::ApproximateStatistics {
                scene_id: composite.band.name.clone(),
                statistic: "AOI mean".to_string(),
                stride: aoi_stats.stride,
                sampled_pixels: aoi_stats.count,
            });
        }

        let mut metadata = CompositeMetadata {
            product: self.config.product.name().to_string(),
            band_name: composite.band.name.clone(),
            sensor_id: self.sensor.id.clone(),
            sensor_version: self.sensor.version.clone(),
            dates: self.config.dates,
            aoi_bounds: self.aoi.bounds(),
            max_cloud_cover: self.config.max_cloud_cover,
            reducer: self.config.reducer,
            stage: self.config.stage,
            scenes_used,
            excluded,
            warnings: Vec::new(),
            approximate: false,
            valid_pixels: composite.band.valid_count(),
            aoi_mean: aoi_stats.mean,
            processed_at: Utc::now(),
            processor_version: env!("CARGO_PKG_VERSION").to_string(),
            visualization: self.config.visualization.clone(),
        };
        for warning in warnings {
            metadata.push_warning(warning);
        }

        log::info!(
            "{} composite from {} scene(s), {} excluded, {} valid pixels",
            metadata.band_name,
            metadata.scenes_used.len(),
            metadata.excluded.len(),
            metadata.valid_pixels
        );
        Ok(PipelineOutput { composite, metadata })
    }

    /// Check bands, cloud mask, clip to the AOI and scale reflectance
    pub fn prepare_scene(&self, scene: &Scene) -> HeatResult<Scene> {
        for &band in self.config.product.required_bands() {
            scene.band(band)?;
        }
        let masked = self.mask.apply_and_clip(scene, &self.aoi)?;
        if self.config.scale_reflectance {
            Ok(scale_reflectance(&masked, &self.sensor.reflectance))
        } else {
            Ok(masked)
        }
    }

    /// Per-pixel flag: every band the product needs holds a value
    fn usable_mask(&self, scene: &Scene) -> HeatResult<Mask> {
        let bands = self
            .config
            .product
            .required_bands()
            .iter()
            .map(|&b| scene.band(b))
            .collect::<HeatResult<Vec<_>>>()?;
        Ok(Array2::from_shape_fn(scene.grid.dim(), |(r, c)| {
            bands.iter().all(|b| b[[r, c]].is_some())
        }))
    }

    /// Record a per-scene failure as an exclusion, or hand it back when fatal
    fn exclude(&self, scene: &Scene, err: HeatError) -> HeatResult<ExcludedScene> {
        if self.config.strict && matches!(err, HeatError::DegenerateScene { .. }) {
            return Err(err);
        }
        match ExclusionReason::from_error(&err) {
            Some(reason) => {
                log::warn!("Excluding scene {}: {}", scene.id, err);
                Ok(ExcludedScene {
                    scene_id: scene.id.clone(),
                    reason,
                })
            }
            None => Err(err),
        }
    }

    /// Masked scene, or why it cannot contribute
    fn usable_scene(&self, scene: &Scene) -> HeatResult<Result<Scene, ExcludedScene>> {
        let prepared = match self.prepare_scene(scene) {
            Ok(p) => p,
            Err(err) => return self.exclude(scene, err).map(Err),
        };
        if !self.usable_mask(&prepared)?.iter().any(|&v| v) {
            log::warn!("Excluding scene {}: no valid pixels after masking", scene.id);
            return Ok(Err(ExcludedScene {
                scene_id: scene.id.clone(),
                reason: ExclusionReason::NoValidPixels,
            }));
        }
        Ok(Ok(prepared))
    }

    fn composite_per_scene(&self, scenes: &[Scene]) -> HeatResult<Option<StageOutput>> {
        let outcomes = scenes
            .par_iter()
            .map(|scene| match self.usable_scene(scene)? {
                Ok(prepared) => match self.scene_layer(&prepared) {
                    Ok((band, warning)) => Ok(Ok((band, warning))),
                    Err(err) => self.exclude(scene, err).map(Err),
                },
                Err(excluded) => Ok(Err(excluded)),
            })
            .collect::<HeatResult<Vec<_>>>()?;

        let mut layers = Vec::new();
        let mut scenes_used = Vec::new();
        let mut excluded = Vec::new();
        let mut warnings = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok((band, warning)) => {
                    scenes_used.push(band.name.clone());
                    layers.push(band);
                    warnings.extend(warning);
                }
                Err(ex) => excluded.push(ex),
            }
        }
        if layers.is_empty() {
            return Ok(None);
        }

        let composite = self.compositor.composite(&layers, &self.config.band_name())?;
        Ok(Some(StageOutput {
            composite,
            scenes_used,
            excluded,
            warnings,
        }))
    }

    /// Index layer of one prepared scene, named after the scene
    fn scene_layer(&self, scene: &Scene) -> HeatResult<(RasterBand, Option<ProcessingWarning>)> {
        let (band, warning) = match self.config.product {
            IndexProduct::Ndvi => (SpectralIndex::Ndvi.compute(scene)?, None),
            IndexProduct::Ndbi => (SpectralIndex::Ndbi.compute(scene)?, None),
            IndexProduct::Lst => self.scene_lst(scene)?,
        };
        Ok((band.rename(scene.id.clone()), warning))
    }

    fn scene_lst(&self, scene: &Scene) -> HeatResult<(RasterBand, Option<ProcessingWarning>)> {
        let ndvi = SpectralIndex::Ndvi.compute(scene)?;
        let calculator = ThermalCalculator::new(&self.sensor, self.config.emissivity);

        let mut warning = None;
        let range = if calculator.model().needs_ndvi_range() {
            // Bounds come from this scene only, never from the collection
            let (range, stats) = self.reducer.min_max(&ndvi, &self.aoi)?;
            let range = match range {
                Some(r) if r.max > r.min => r,
                Some(r) => {
                    return Err(HeatError::DegenerateScene {
                        scene_id: scene.id.clone(),
                        reason: format!("NDVI min equals max ({}) over the AOI", r.min),
                    })
                }
                None => {
                    return Err(HeatError::DegenerateScene {
                        scene_id: scene.id.clone(),
                        reason: "no valid NDVI pixels inside the AOI".to_string(),
                    })
                }
            };
            if stats.approximate {
                warning = Some(ProcessingWarning::ApproximateStatistics {
                    scene_id: scene.id.clone(),
                    statistic: "NDVI min/max".to_string(),
                    stride: stats.stride,
                    sampled_pixels: stats.count,
                });
            }
            Some(range)
        } else {
            None
        };

        let layers = calculator.compute(scene, &ndvi, range)?;
        Ok((layers.lst, warning))
    }

    /// Composite the masked reflectance bands, then compute the index once
    fn composite_reflectance(&self, scenes: &[Scene]) -> HeatResult<Option<StageOutput>> {
        let index = match self.config.product {
            IndexProduct::Ndvi => SpectralIndex::Ndvi,
            IndexProduct::Ndbi => SpectralIndex::Ndbi,
            IndexProduct::Lst => {
                return Err(HeatError::InvalidParameter(
                    "LST cannot be computed from a reflectance composite".to_string(),
                ))
            }
        };

        let outcomes = scenes
            .par_iter()
            .map(|scene| self.usable_scene(scene))
            .collect::<HeatResult<Vec<_>>>()?;

        let mut usable = Vec::new();
        let mut excluded = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(scene) => usable.push(scene),
                Err(ex) => excluded.push(ex),
            }
        }
        if usable.is_empty() {
            return Ok(None);
        }

        let band_name = self.config.band_name();
        let merged = self
            .compositor
            .composite_scenes(&usable, self.config.product.required_bands(), &band_name)?;
        log::info!(
            "{} reflectance composite built from {} scene(s)",
            self.config.reducer.name(),
            usable.len()
        );

        let mut contributors = Array2::<u32>::zeros(merged.grid.dim());
        for scene in &usable {
            let mask = self.usable_mask(scene)?;
            Zip::from(&mut contributors).and(&mask).for_each(|n, &valid| {
                if valid {
                    *n += 1;
                }
            });
        }

        Ok(Some(StageOutput {
            composite: Composite {
                band: index.compute(&merged)?.rename(band_name),
                contributors,
                layers: usable.len(),
            },
            scenes_used: usable.iter().map(|s| s.id.clone()).collect(),
            excluded,
            warnings: Vec::new(),
        }))
    }
}
