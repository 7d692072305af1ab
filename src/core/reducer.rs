use crate::core::aoi::Aoi;
use crate::types::{HeatError, HeatResult, Mask, RasterBand, RasterGrid};
use crate::maybe_rayon::*;
use serde::{Deserialize, Serialize};

/// Value range of a band inside the area of interest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

/// Regional reduction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerParams {
    /// Sampling scale in map units; the native pixel size reads every pixel
    pub scale: f64,
    /// Upper bound on the number of pixels read
    pub max_pixels: u64,
    /// Widen the sampling stride instead of failing when over budget
    pub best_effort: bool,
}

impl Default for ReducerParams {
    fn default() -> Self {
        Self {
            scale: 30.0,
            max_pixels: 1_000_000_000,
            best_effort: true,
        }
    }
}

/// Statistics over the valid pixels of a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Set when the stride was widened to fit the pixel budget
    pub approximate: bool,
    /// Pixel step used in both directions
    pub stride: usize,
}

impl RegionalStats {
    pub fn min_max(&self) -> Option<MinMax> {
        Some(MinMax {
            min: self.min?,
            max: self.max?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Running sum / min / max; merging is commutative and associative
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    fn merge(mut self, other: Accumulator) -> Self {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self
    }

    fn finish(self, approximate: bool, stride: usize) -> RegionalStats {
        let valid = self.count > 0;
        RegionalStats {
            count: self.count,
            min: valid.then_some(self.min),
            max: valid.then_some(self.max),
            mean: valid.then(|| self.sum / self.count as f64),
            approximate,
            stride,
        }
    }
}

/// Min / max / mean over the AOI, skipping nodata
pub struct RegionalReducer {
    params: ReducerParams,
}

impl RegionalReducer {
    pub fn new(params: ReducerParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ReducerParams::default())
    }

    pub fn params(&self) -> &ReducerParams {
        &self.params
    }

    /// Reduce one band over the AOI
    pub fn reduce_region(&self, band: &RasterBand, aoi: &Aoi) -> HeatResult<RegionalStats> {
        self.reduce_stack(std::slice::from_ref(band), aoi)
    }

    /// `{min, max}` of one band over the AOI, `None` when no pixel is valid
    pub fn min_max(&self, band: &RasterBand, aoi: &Aoi) -> HeatResult<(Option<MinMax>, RegionalStats)> {
        let stats = self.reduce_region(band, aoi)?;
        Ok((stats.min_max(), stats))
    }

    /// Reduce a temporal stack of co-registered bands as one population
    pub fn reduce_stack(&self, bands: &[RasterBand], aoi: &Aoi) -> HeatResult<RegionalStats> {
        let first = bands.first().ok_or_else(|| {
            HeatError::InvalidParameter("cannot reduce an empty stack".to_string())
        })?;
        let grid = first.grid;
        if let Some(other) = bands.iter().find(|b| b.grid != grid) {
            return Err(HeatError::GridMismatch(format!(
                "band '{}' does not share the grid of '{}'",
                other.name, first.name
            )));
        }

        let inside = aoi.pixel_mask(&grid);
        let (stride, approximate) = self.choose_stride(&grid, &inside, bands.len())?;

        let rows: Vec<usize> = (0..grid.rows).step_by(stride).collect();
        let cols = grid.cols;

        let per_band: Vec<Accumulator> = bands
            .iter()
            .map(|band| {
                let row_accs: Vec<Accumulator> = rows
                    .par_iter()
                    .map(|&r| {
                        let mut acc = Accumulator::new();
                        for c in (0..cols).step_by(stride) {
                            if !inside[[r, c]] {
                                continue;
                            }
                            if let Some(v) = band.data[[r, c]] {
                                acc.push(v);
                            }
                        }
                        acc
                    })
                    .collect();
                // Sequential merge keeps the floating-point sum order fixed
                row_accs.into_iter().fold(Accumulator::new(), Accumulator::merge)
            })
            .collect();

        let stats = per_band
            .into_iter()
            .fold(Accumulator::new(), Accumulator::merge)
            .finish(approximate, stride);

        log::debug!(
            "Regional reduction over {} band(s): {} valid pixels, stride {}, approximate={}",
            bands.len(),
            stats.count,
            stats.stride,
            stats.approximate
        );
        Ok(stats)
    }

    /// Native stride from the scale, widened while the sample is over budget
    fn choose_stride(&self, grid: &RasterGrid, inside: &Mask, layers: usize) -> HeatResult<(usize, bool)> {
        if !(self.params.scale.is_finite() && self.params.scale > 0.0) {
            return Err(HeatError::InvalidParameter(format!(
                "reduction scale must be positive, got {}",
                self.params.scale
            )));
        }
        let pixel_size = grid.pixel_size();
        let mut stride = if pixel_size > 0.0 {
            (self.params.scale / pixel_size).round().max(1.0) as usize
        } else {
            1
        };

        let sampled = |stride: usize| -> u64 {
            let per_layer = (0..grid.rows)
                .step_by(stride)
                .map(|r| (0..grid.cols).step_by(stride).filter(|&c| inside[[r, c]]).count() as u64)
                .sum::<u64>();
            per_layer * layers as u64
        };

        let mut pixels = sampled(stride);
        if pixels <= self.params.max_pixels {
            return Ok((stride, false));
        }
        if !self.params.best_effort {
            return Err(HeatError::PixelBudgetExceeded {
                pixels,
                max_pixels: self.params.max_pixels,
            });
        }

        let largest = grid.rows.max(grid.cols).max(1);
        while pixels > self.params.max_pixels && stride < largest {
            stride = (stride * 2).min(largest);
            pixels = sampled(stride);
        }
        log::warn!(
            "Regional reduction exceeds {} pixels; sampling every {} pixel(s) ({} samples)",
            self.params.max_pixels,
            stride,
            pixels
        );
        Ok((stride, true))
    }
}
