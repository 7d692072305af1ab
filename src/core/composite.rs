use crate::types::{BandData, BandName, HeatError, HeatResult, RasterBand, RasterGrid, Scene};
use ndarray::Array2;
use crate::maybe_rayon::*;
use serde::{Deserialize, Serialize};

/// Pixel-wise statistic applied across a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeReducer {
    Mean,
    Median,
}

impl CompositeReducer {
    pub fn name(&self) -> &'static str {
        match self {
            CompositeReducer::Mean => "Mean",
            CompositeReducer::Median => "Median",
        }
    }

    /// Reduce sorted values; `None` for an empty slice
    fn reduce_sorted(&self, sorted: &[f64]) -> Option<f64> {
        let n = sorted.len();
        if n == 0 {
            return None;
        }
        match self {
            CompositeReducer::Mean => Some(sorted.iter().sum::<f64>() / n as f64),
            CompositeReducer::Median => Some(if n % 2 == 0 {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            } else {
                sorted[n / 2]
            }),
        }
    }
}

/// Whether to composite index layers or reflectance bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeStage {
    /// Compute the index per scene, then composite the index layers
    PerScene,
    /// Composite the masked reflectance bands, then compute the index once
    Reflectance,
}

/// Composite raster plus how many layers fed each pixel
#[derive(Debug, Clone)]
pub struct Composite {
    pub band: RasterBand,
    pub contributors: Array2<u32>,
    pub layers: usize,
}

/// Collapses a stack of co-registered layers into one raster
#[derive(Debug, Clone, Copy)]
pub struct TemporalCompositor {
    reducer: CompositeReducer,
}

impl TemporalCompositor {
    pub fn new(reducer: CompositeReducer) -> Self {
        Self { reducer }
    }

    pub fn reducer(&self) -> CompositeReducer {
        self.reducer
    }

    /// Composite a stack of bands. Values at each pixel are sorted before
    /// reduction, so the result does not depend on the order of `layers`.
    pub fn composite(&self, layers: &[RasterBand], name: &str) -> HeatResult<Composite> {
        let first = layers.first().ok_or_else(|| HeatError::NoScenes {
            query: format!("{} composite '{}'", self.reducer.name(), name),
        })?;
        let grid = first.grid;
        if let Some(other) = layers.iter().find(|l| l.grid != grid) {
            return Err(HeatError::GridMismatch(format!(
                "layer '{}' does not share the grid of '{}'",
                other.name, first.name
            )));
        }

        log::info!(
            "Compositing {} layer(s) of {}x{} with {} reducer",
            layers.len(),
            grid.rows,
            grid.cols,
            self.reducer.name()
        );

        let stack: Vec<&BandData> = layers.iter().map(|l| &l.data).collect();
        let (data, contributors) = self.reduce_stack(&stack, &grid)?;

        let empty = contributors.iter().filter(|&&n| n == 0).count();
        if empty > 0 {
            log::debug!("{} pixel(s) have no contributing layer", empty);
        }

        Ok(Composite {
            band: RasterBand::new(name, grid, data)?,
            contributors,
            layers: layers.len(),
        })
    }

    fn reduce_stack(&self, stack: &[&BandData], grid: &RasterGrid) -> HeatResult<(BandData, Array2<u32>)> {
        let cols = grid.cols;
        let reducer = self.reducer;

        let pixels: Vec<(Option<f64>, u32)> = (0..grid.pixel_count())
            .into_par_iter()
            .map_init(
                || Vec::with_capacity(stack.len()),
                |values: &mut Vec<f64>, idx| {
                    let (r, c) = (idx / cols, idx % cols);
                    values.clear();
                    values.extend(stack.iter().filter_map(|layer| layer[[r, c]]));
                    values.sort_by(|a, b| a.total_cmp(b));
                    (reducer.reduce_sorted(values), values.len() as u32)
                },
            )
            .collect();

        let (values, counts): (Vec<Option<f64>>, Vec<u32>) = pixels.into_iter().unzip();
        let data = Array2::from_shape_vec(grid.dim(), values)
            .map_err(|e| HeatError::GridMismatch(format!("Failed to reshape composite: {}", e)))?;
        let counts = Array2::from_shape_vec(grid.dim(), counts)
            .map_err(|e| HeatError::GridMismatch(format!("Failed to reshape contributor counts: {}", e)))?;
        Ok((data, counts))
    }

    /// Composite each listed band of a scene stack into one synthetic scene.
    /// The result carries no QA band; it is already masked.
    pub fn composite_scenes(&self, scenes: &[Scene], bands: &[BandName], id: &str) -> HeatResult<Scene> {
        let first = scenes.first().ok_or_else(|| HeatError::NoScenes {
            query: format!("scene composite '{}'", id),
        })?;

        let mut out = Scene::new(id, first.sensor_id.clone(), first.acquired, 0.0, first.grid);
        for &name in bands {
            let layers = scenes
                .iter()
                .map(|s| s.raster(name))
                .collect::<HeatResult<Vec<_>>>()?;
            let composite = self.composite(&layers, &name.to_string())?;
            out.set_band(name, composite.band.data)?;
        }
        out.cloud_cover = scenes.iter().map(|s| s.cloud_cover).sum::<f32>() / scenes.len() as f32;
        Ok(out)
    }
}
