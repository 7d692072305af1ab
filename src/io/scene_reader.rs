use crate::core::collection::CollectionQuery;
use crate::io::SceneSource;
use crate::types::{
    BandData, BandName, CoordinateSystem, GeoTransform, HeatError, HeatResult, QaBand, RasterGrid, Scene,
};
use chrono::{DateTime, Utc};
use gdal::Dataset;
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Per-band GeoTIFF files making up one scene
#[derive(Debug, Clone)]
pub struct SceneFiles {
    pub id: String,
    pub sensor_id: String,
    pub acquired: DateTime<Utc>,
    pub cloud_cover: f32,
    pub bands: Vec<(BandName, PathBuf)>,
    pub qa: Option<PathBuf>,
}

/// GDAL reader for single-band GeoTIFFs
pub struct SceneReader;

impl SceneReader {
    /// Read band 1 as samples; GDAL nodata and non-finite values become `None`
    pub fn read_band<P: AsRef<Path>>(path: P) -> HeatResult<(BandData, RasterGrid)> {
        log::debug!("Reading band from: {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let grid = Self::grid(&dataset)?;

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value();
        let buffer = rasterband.read_as::<f64>((0, 0), (grid.cols, grid.rows), (grid.cols, grid.rows), None)?;

        let samples = buffer
            .data
            .into_iter()
            .map(|v| match nodata {
                _ if !v.is_finite() => None,
                Some(nd) if v == nd => None,
                _ => Some(v),
            })
            .collect();
        let data = Array2::from_shape_vec(grid.dim(), samples)
            .map_err(|e| HeatError::GridMismatch(format!("Failed to reshape band data: {}", e)))?;
        Ok((data, grid))
    }

    /// Read band 1 as a raw QA bitmask
    pub fn read_qa<P: AsRef<Path>>(path: P) -> HeatResult<(QaBand, RasterGrid)> {
        log::debug!("Reading QA band from: {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let grid = Self::grid(&dataset)?;

        let rasterband = dataset.rasterband(1)?;
        let buffer = rasterband.read_as::<u16>((0, 0), (grid.cols, grid.rows), (grid.cols, grid.rows), None)?;
        let qa = Array2::from_shape_vec(grid.dim(), buffer.data)
            .map_err(|e| HeatError::GridMismatch(format!("Failed to reshape QA data: {}", e)))?;
        Ok((qa, grid))
    }

    /// Assemble a scene; every file must share the grid of the first band
    pub fn read_scene(files: &SceneFiles) -> HeatResult<Scene> {
        log::info!("Reading scene {} ({} band files)", files.id, files.bands.len());
        let mut scene: Option<Scene> = None;

        for (name, path) in &files.bands {
            let (data, grid) = Self::read_band(path)?;
            let s = scene.get_or_insert_with(|| {
                Scene::new(files.id.clone(), files.sensor_id.clone(), files.acquired, files.cloud_cover, grid)
            });
            s.grid
                .ensure_same(&grid, format_args!("{} of scene {}", path.display(), files.id))?;
            s.set_band(*name, data)?;
        }

        let scene = scene.ok_or_else(|| HeatError::Config(format!("scene {} lists no band files", files.id)))?;
        match &files.qa {
            Some(path) => {
                let (qa, grid) = Self::read_qa(path)?;
                scene
                    .grid
                    .ensure_same(&grid, format_args!("QA band {} of scene {}", path.display(), files.id))?;
                scene.with_qa(qa)
            }
            None => Ok(scene),
        }
    }

    fn grid(dataset: &Dataset) -> HeatResult<RasterGrid> {
        let (width, height) = dataset.raster_size();
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let crs = match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
            Ok(4326) => CoordinateSystem::Geographic,
            Ok(code) => CoordinateSystem::Projected { epsg: code as u32 },
            Err(e) => {
                log::warn!("No EPSG code on dataset, assuming geographic: {}", e);
                CoordinateSystem::Geographic
            }
        };
        Ok(RasterGrid::new(height, width, transform, crs))
    }
}

/// File-backed scene loader
#[derive(Debug, Clone, Default)]
pub struct GeoTiffCatalog {
    scenes: Vec<SceneFiles>,
}

impl GeoTiffCatalog {
    pub fn new(scenes: Vec<SceneFiles>) -> Self {
        Self { scenes }
    }

    pub fn push(&mut self, files: SceneFiles) {
        self.scenes.push(files);
    }
}

impl SceneSource for GeoTiffCatalog {
    /// Only files whose catalogue entry passes the sensor, date and cloud
    /// filters are opened; AOI overlap is checked by the collection.
    fn fetch(&self, query: &CollectionQuery) -> HeatResult<Vec<Scene>> {
        self.scenes
            .iter()
            .filter(|f| {
                f.sensor_id == query.sensor_id
                    && query.dates.contains(&f.acquired)
                    && f.cloud_cover < query.max_cloud_cover
            })
            .map(SceneReader::read_scene)
            .collect()
    }
}
