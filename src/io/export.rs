//! Export of composite rasters
//!
//! A composite is validated against the export request, cropped to the export
//! region, optionally block averaged to a coarser scale, encoded to the output
//! pixel type and handed to a [`RasterSink`].

use crate::core::metadata::CompositeMetadata;
use crate::types::{BandData, BoundingBox, HeatError, HeatResult, RasterBand, RasterGrid};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Output pixel type
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum PixelEncoding {
    /// 32-bit float, NaN as nodata
    #[default]
    Float32,
    /// Multiply by `factor`, truncate toward zero and saturate to i16
    ScaledInt16 { factor: f64 },
}

impl PixelEncoding {
    pub const INT16_NODATA: i16 = i16::MIN;

    pub fn encode(&self, data: &BandData) -> EncodedRaster {
        match *self {
            PixelEncoding::Float32 => EncodedRaster::Float32(data.mapv(|v| match v {
                Some(x) => x as f32,
                None => f32::NAN,
            })),
            PixelEncoding::ScaledInt16 { factor } => {
                EncodedRaster::Int16(data.mapv(|v| match v {
                    Some(x) => scale_to_i16(x, factor),
                    None => Self::INT16_NODATA,
                }))
            }
        }
    }
}

/// Scaled, truncated and saturated. The lowest value stays reserved for nodata.
fn scale_to_i16(value: f64, factor: f64) -> i16 {
    let scaled = (value * factor).trunc();
    if scaled.is_nan() {
        return PixelEncoding::INT16_NODATA;
    }
    scaled.clamp((i16::MIN + 1) as f64, i16::MAX as f64) as i16
}

/// Encoded pixel buffer ready for a sink
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedRaster {
    Float32(Array2<f32>),
    Int16(Array2<i16>),
}

impl EncodedRaster {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            EncodedRaster::Float32(a) => a.dim(),
            EncodedRaster::Int16(a) => a.dim(),
        }
    }

    /// Value written for nodata pixels
    pub fn nodata(&self) -> f64 {
        match self {
            EncodedRaster::Float32(_) => f64::NAN,
            EncodedRaster::Int16(_) => PixelEncoding::INT16_NODATA as f64,
        }
    }
}

/// Export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportParams {
    /// Output name, also used as the file stem
    pub description: String,
    pub folder: Option<String>,
    /// Output pixel size in map units
    pub scale: f64,
    pub region: BoundingBox,
    pub max_pixels: u64,
    pub encoding: PixelEncoding,
}

impl ExportParams {
    pub fn new(description: impl Into<String>, region: BoundingBox) -> Self {
        Self {
            description: description.into(),
            folder: None,
            scale: 30.0,
            region,
            max_pixels: 1_000_000_000,
            encoding: PixelEncoding::Float32,
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_encoding(mut self, encoding: PixelEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Destination for encoded rasters
pub trait RasterSink {
    fn write(
        &self,
        raster: &EncodedRaster,
        grid: &RasterGrid,
        params: &ExportParams,
        metadata: &CompositeMetadata,
    ) -> HeatResult<()>;
}

/// Pixel index range `[first, last)` along one axis whose cells overlap `lo..hi`
fn axis_window(origin: f64, step: f64, n: usize, lo: f64, hi: f64) -> Option<(usize, usize)> {
    let mut window: Option<(usize, usize)> = None;
    for i in 0..n {
        let a = origin + i as f64 * step;
        let b = a + step;
        if a.max(b) > lo && a.min(b) < hi {
            window = Some((window.map_or(i, |(first, _)| first), i + 1));
        }
    }
    window
}

/// Cut `band` down to the whole pixels overlapping `region`.
///
/// Only north-up grids can be cropped. The returned grid keeps the pixel size
/// and moves the origin to the first kept pixel.
pub fn crop_to_region(band: &RasterBand, region: &BoundingBox) -> HeatResult<RasterBand> {
    let t = band.grid.transform;
    if t.rotation_x != 0.0 || t.rotation_y != 0.0 {
        return Err(HeatError::Export(format!("cannot crop rotated grid of '{}'", band.name)));
    }
    let (rows, cols) = band.grid.dim();
    let row_window = axis_window(t.top_left_y, t.pixel_height, rows, region.min_y, region.max_y);
    let col_window = axis_window(t.top_left_x, t.pixel_width, cols, region.min_x, region.max_x);
    let ((r0, r1), (c0, c1)) = match (row_window, col_window) {
        (Some(r), Some(c)) => (r, c),
        _ => {
            return Err(HeatError::Export(format!(
                "export region {:?} covers no pixel of '{}'",
                region, band.name
            )))
        }
    };
    if (r0, r1, c0, c1) == (0, rows, 0, cols) {
        return Ok(band.clone());
    }
    log::debug!("Cropping {} to rows {}..{} cols {}..{}", band.name, r0, r1, c0, c1);

    let mut transform = t;
    transform.top_left_x += c0 as f64 * t.pixel_width;
    transform.top_left_y += r0 as f64 * t.pixel_height;
    let grid = RasterGrid::new(r1 - r0, c1 - c0, transform, band.grid.crs);
    RasterBand::new(band.name.clone(), grid, band.data.slice(s![r0..r1, c0..c1]).to_owned())
}

/// Nodata-aware block average to an integer multiple of the native pixel size
pub fn aggregate_to_scale(band: &RasterBand, scale: f64) -> HeatResult<RasterBand> {
    let pixel_size = band.grid.pixel_size();
    let ratio = scale / pixel_size;
    let factor = ratio.round();
    if factor < 1.0 || (ratio - factor).abs() > 1e-6 {
        return Err(HeatError::Export(format!(
            "scale {} is not an integer multiple of the {} pixel size",
            scale, pixel_size
        )));
    }
    let factor = factor as usize;
    if factor == 1 {
        return Ok(band.clone());
    }

    let (rows, cols) = band.grid.dim();
    let out_rows = rows / factor;
    let out_cols = cols / factor;
    if out_rows == 0 || out_cols == 0 {
        return Err(HeatError::Export(format!(
            "scale {} leaves no output pixels for a {}x{} raster",
            scale, rows, cols
        )));
    }
    log::info!(
        "Aggregating {} by {}x{}: {}x{} -> {}x{}",
        band.name,
        factor,
        factor,
        rows,
        cols,
        out_rows,
        out_cols
    );

    let data = Array2::from_shape_fn((out_rows, out_cols), |(out_row, out_col)| {
        let mut sum = 0.0;
        let mut count = 0usize;
        for in_row in out_row * factor..(out_row + 1) * factor {
            for in_col in out_col * factor..(out_col + 1) * factor {
                if let Some(v) = band.data[[in_row, in_col]] {
                    sum += v;
                    count += 1;
                }
            }
        }
        (count > 0).then(|| sum / count as f64)
    });

    let mut transform = band.grid.transform;
    transform.pixel_width *= factor as f64;
    transform.pixel_height *= factor as f64;
    transform.rotation_x *= factor as f64;
    transform.rotation_y *= factor as f64;
    let grid = RasterGrid::new(out_rows, out_cols, transform, band.grid.crs);
    RasterBand::new(band.name.clone(), grid, data)
}

/// Validates, aggregates and encodes composites for a sink
pub struct Exporter {
    params: ExportParams,
}

impl Exporter {
    pub fn new(params: ExportParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExportParams {
        &self.params
    }

    /// Reject rasters the request cannot serve
    pub fn validate(&self, band: &RasterBand) -> HeatResult<()> {
        self.window(band).map(|_| ())
    }

    /// Checks the request and crops `band` to the export region
    fn window(&self, band: &RasterBand) -> HeatResult<RasterBand> {
        let p = &self.params;
        if !(p.scale.is_finite() && p.scale > 0.0) {
            return Err(HeatError::Export(format!("scale must be positive, got {}", p.scale)));
        }
        if let PixelEncoding::ScaledInt16 { factor } = p.encoding {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(HeatError::Export(format!("Int16 factor must be positive, got {}", factor)));
            }
        }
        if band.grid.pixel_count() == 0 || band.valid_count() == 0 {
            return Err(HeatError::Export(format!("composite '{}' holds no valid pixels", band.name)));
        }
        if !band.grid.bounds().intersects(&p.region) {
            return Err(HeatError::Export(format!(
                "export region {:?} does not intersect composite '{}'",
                p.region, band.name
            )));
        }

        let cropped = crop_to_region(band, &p.region)?;
        if cropped.grid.pixel_count() as u64 > p.max_pixels {
            return Err(HeatError::Export(format!(
                "composite '{}' has {} pixels in the export region, over the limit of {}",
                band.name,
                cropped.grid.pixel_count(),
                p.max_pixels
            )));
        }
        if cropped.valid_count() == 0 {
            return Err(HeatError::Export(format!(
                "composite '{}' holds no valid pixels inside the export region",
                band.name
            )));
        }
        Ok(cropped)
    }

    /// Crop, aggregate and encode; returns the buffer and its grid
    pub fn prepare(&self, band: &RasterBand) -> HeatResult<(EncodedRaster, RasterGrid)> {
        let band = self.window(band)?;
        let band = aggregate_to_scale(&band, self.params.scale)?;
        log::debug!("Encoding {} as {:?}", band.name, self.params.encoding);
        Ok((self.params.encoding.encode(&band.data), band.grid))
    }

    pub fn export(&self, band: &RasterBand, metadata: &CompositeMetadata, sink: &dyn RasterSink) -> HeatResult<()> {
        log::info!("Exporting {} as '{}'", band.name, self.params.description);
        let (raster, grid) = self.prepare(band)?;
        sink.write(&raster, &grid, &self.params, metadata)
    }
}

#[cfg(feature = "geotiff")]
fn encoded_valid(raster: &EncodedRaster) -> usize {
    match raster {
        EncodedRaster::Float32(a) => a.iter().filter(|v| !v.is_nan()).count(),
        EncodedRaster::Int16(a) => a.iter().filter(|&&v| v != PixelEncoding::INT16_NODATA).count(),
    }
}

/// GeoTIFF sink writing `<folder>/<description>.tif` plus a JSON sidecar
#[cfg(feature = "geotiff")]
pub struct GeoTiffSink {
    pub compression: Option<String>,
}

#[cfg(feature = "geotiff")]
impl Default for GeoTiffSink {
    fn default() -> Self {
        Self {
            compression: Some("LZW".to_string()),
        }
    }
}

#[cfg(feature = "geotiff")]
impl GeoTiffSink {
    pub fn output_path(params: &ExportParams) -> std::path::PathBuf {
        let dir = params.folder.as_deref().unwrap_or(".");
        std::path::Path::new(dir).join(format!("{}.tif", params.description))
    }

    fn write_band<T: gdal::raster::GdalType + Copy>(
        &self,
        data: &Array2<T>,
        nodata: f64,
        grid: &RasterGrid,
        path: &std::path::Path,
    ) -> HeatResult<()> {
        use gdal::raster::{Buffer, RasterCreationOption};
        use gdal::spatial_ref::SpatialRef;
        use gdal::DriverManager;

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = data.dim();
        let mut options = Vec::new();
        if let Some(compression) = &self.compression {
            options.push(RasterCreationOption { key: "COMPRESS", value: compression.as_str() });
        }
        let mut dataset =
            driver.create_with_band_type_with_options::<T, _>(path, width as isize, height as isize, 1, &options)?;

        dataset.set_geo_transform(&grid.transform.to_gdal())?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(grid.crs.epsg())?)?;

        let mut rasterband = dataset.rasterband(1)?;
        let flat: Vec<T> = data.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(nodata))?;
        Ok(())
    }
}

#[cfg(feature = "geotiff")]
impl RasterSink for GeoTiffSink {
    fn write(
        &self,
        raster: &EncodedRaster,
        grid: &RasterGrid,
        params: &ExportParams,
        metadata: &CompositeMetadata,
    ) -> HeatResult<()> {
        let path = Self::output_path(params);
        if let Some(folder) = &params.folder {
            std::fs::create_dir_all(folder)?;
        }
        log::info!("Saving {} as GeoTIFF: {}", metadata.band_name, path.display());

        match raster {
            EncodedRaster::Float32(data) => self.write_band(data, raster.nodata(), grid, &path)?,
            EncodedRaster::Int16(data) => self.write_band(data, raster.nodata(), grid, &path)?,
        }
        metadata.write_sidecar(path.with_extension("json"))?;

        log::info!("GeoTIFF saved with {} valid pixels", encoded_valid(raster));
        Ok(())
    }
}
