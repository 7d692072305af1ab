use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single pixel value; `None` marks nodata
pub type Sample = Option<f64>;

/// 2D grid of samples (rows x cols)
pub type BandData = Array2<Sample>;

/// Per-pixel keep-mask, `true` = retained
pub type Mask = Array2<bool>;

/// Raw QA bitmask band
pub type QaBand = Array2<u16>;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    /// EPSG code of the system (4326 for geographic)
    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Projected { epsg } => *epsg,
        }
    }
}

/// Spectral bands consumed by the index calculators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandName {
    Red,
    Nir,
    Swir1,
    Thermal,
}

impl std::fmt::Display for BandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandName::Red => write!(f, "Red"),
            BandName::Nir => write!(f, "NIR"),
            BandName::Swir1 => write!(f, "SWIR1"),
            BandName::Thermal => write!(f, "Thermal"),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Spatial grid shared by every band of a scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
}

impl RasterGrid {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: CoordinateSystem) -> Self {
        Self { rows, cols, transform, crs }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Nominal ground size of one pixel (absolute pixel width)
    pub fn pixel_size(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            t.top_left_x + c * t.pixel_width + r * t.rotation_x,
            t.top_left_y + c * t.rotation_y + r * t.pixel_height,
        )
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let corners = [
            (t.top_left_x, t.top_left_y),
            (
                t.top_left_x + self.cols as f64 * t.pixel_width,
                t.top_left_y + self.cols as f64 * t.rotation_y,
            ),
            (
                t.top_left_x + self.rows as f64 * t.rotation_x,
                t.top_left_y + self.rows as f64 * t.pixel_height,
            ),
            (
                t.top_left_x + self.cols as f64 * t.pixel_width + self.rows as f64 * t.rotation_x,
                t.top_left_y + self.cols as f64 * t.rotation_y + self.rows as f64 * t.pixel_height,
            ),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.max_x = bbox.max_x.max(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    /// `GridMismatch` naming `what` unless `other` is this grid
    pub fn ensure_same(&self, other: &RasterGrid, what: impl std::fmt::Display) -> HeatResult<()> {
        if self == other {
            return Ok(());
        }
        Err(HeatError::GridMismatch(format!(
            "{} is on a {}x{} grid at ({}, {}), expected {}x{} at ({}, {})",
            what,
            other.rows,
            other.cols,
            other.transform.top_left_x,
            other.transform.top_left_y,
            self.rows,
            self.cols,
            self.transform.top_left_x,
            self.transform.top_left_y
        )))
    }
}

/// A single named raster on a grid
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBand {
    pub name: String,
    pub grid: RasterGrid,
    pub data: BandData,
}

impl RasterBand {
    pub fn new(name: impl Into<String>, grid: RasterGrid, data: BandData) -> HeatResult<Self> {
        let name = name.into();
        if data.dim() != grid.dim() {
            return Err(HeatError::GridMismatch(format!(
                "band '{}' is {:?} but grid is {:?}",
                name,
                data.dim(),
                grid.dim()
            )));
        }
        Ok(Self { name, grid, data })
    }

    /// Band filled with nodata
    pub fn empty(name: impl Into<String>, grid: RasterGrid) -> Self {
        Self {
            name: name.into(),
            data: Array2::from_elem(grid.dim(), None),
            grid,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_some()).count()
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// One acquisition: co-registered bands plus QA bits
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub sensor_id: String,
    pub acquired: DateTime<Utc>,
    /// Scene-level cloud cover percentage reported by the provider
    pub cloud_cover: f32,
    pub grid: RasterGrid,
    bands: HashMap<BandName, BandData>,
    qa: Option<QaBand>,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        sensor_id: impl Into<String>,
        acquired: DateTime<Utc>,
        cloud_cover: f32,
        grid: RasterGrid,
    ) -> Self {
        Self {
            id: id.into(),
            sensor_id: sensor_id.into(),
            acquired,
            cloud_cover,
            grid,
            bands: HashMap::new(),
            qa: None,
        }
    }

    /// Add or replace a sample band, enforcing the shared grid
    pub fn with_band(mut self, name: BandName, data: BandData) -> HeatResult<Self> {
        self.set_band(name, data)?;
        Ok(self)
    }

    pub fn with_qa(mut self, qa: QaBand) -> HeatResult<Self> {
        if qa.dim() != self.grid.dim() {
            return Err(HeatError::GridMismatch(format!(
                "QA band of scene {} is {:?} but grid is {:?}",
                self.id,
                qa.dim(),
                self.grid.dim()
            )));
        }
        self.qa = Some(qa);
        Ok(self)
    }

    pub fn set_band(&mut self, name: BandName, data: BandData) -> HeatResult<()> {
        if data.dim() != self.grid.dim() {
            return Err(HeatError::GridMismatch(format!(
                "band {} of scene {} is {:?} but grid is {:?}",
                name,
                self.id,
                data.dim(),
                self.grid.dim()
            )));
        }
        self.bands.insert(name, data);
        Ok(())
    }

    pub fn band(&self, name: BandName) -> HeatResult<&BandData> {
        self.bands.get(&name).ok_or_else(|| HeatError::MissingBand {
            scene_id: self.id.clone(),
            band: name.to_string(),
        })
    }

    pub fn has_band(&self, name: BandName) -> bool {
        self.bands.contains_key(&name)
    }

    pub fn band_names(&self) -> impl Iterator<Item = BandName> + '_ {
        self.bands.keys().copied()
    }

    pub fn qa(&self) -> HeatResult<&QaBand> {
        self.qa.as_ref().ok_or_else(|| HeatError::MissingBand {
            scene_id: self.id.clone(),
            band: "QA".to_string(),
        })
    }

    /// Take a band out of the scene as a standalone raster
    pub fn raster(&self, name: BandName) -> HeatResult<RasterBand> {
        Ok(RasterBand {
            name: name.to_string(),
            grid: self.grid,
            data: self.band(name)?.clone(),
        })
    }

    /// Apply a function to every sample band, keeping QA untouched
    pub fn map_bands<F>(&self, f: F) -> Self
    where
        F: Fn(BandName, &BandData) -> BandData,
    {
        let bands = self
            .bands
            .iter()
            .map(|(name, data)| (*name, f(*name, data)))
            .collect();
        Self {
            id: self.id.clone(),
            sensor_id: self.sensor_id.clone(),
            acquired: self.acquired,
            cloud_cover: self.cloud_cover,
            grid: self.grid,
            bands,
            qa: self.qa.clone(),
        }
    }

    /// Count of pixels valid in every sample band
    pub fn valid_pixel_count(&self) -> usize {
        let (rows, cols) = self.grid.dim();
        let mut count = 0;
        for r in 0..rows {
            for c in 0..cols {
                if !self.bands.is_empty() && self.bands.values().all(|b| b[[r, c]].is_some()) {
                    count += 1;
                }
            }
        }
        count
    }
}

/// Calendar date range, start day included and end day excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> HeatResult<Self> {
        if end <= start {
            return Err(HeatError::InvalidParameter(format!(
                "date range must end ({}) after it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, when: &DateTime<Utc>) -> bool {
        let day = when.date_naive();
        day >= self.start && day < self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Error types for index processing
#[derive(Debug, thiserror::Error)]
pub enum HeatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown sensor product: {0}")]
    UnknownSensor(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Scene {scene_id} is missing band {band}")]
    MissingBand { scene_id: String, band: String },

    #[error("No scenes available for {query}")]
    NoScenes { query: String },

    #[error("Degenerate scene {scene_id}: {reason}")]
    DegenerateScene { scene_id: String, reason: String },

    #[error("Region holds {pixels} pixels, over the budget of {max_pixels}")]
    PixelBudgetExceeded { pixels: u64, max_pixels: u64 },

    #[error("Export error: {0}")]
    Export(String),

    #[cfg(feature = "geotiff")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for index processing
pub type HeatResult<T> = Result<T, HeatError>;
