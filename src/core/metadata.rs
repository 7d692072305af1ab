//! Provenance for composite products
//!
//! Records which scenes went into a composite, which were left out and why,
//! and any statistic that was only approximated. Serialized as a JSON sidecar
//! next to the exported raster.

use crate::config::VisParams;
use crate::core::composite::{CompositeReducer, CompositeStage};
use crate::types::{BoundingBox, DateRange, HeatError, HeatResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Non-fatal conditions attached to an output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingWarning {
    /// A regional statistic was computed on a sampled lattice
    ApproximateStatistics {
        scene_id: String,
        statistic: String,
        stride: usize,
        sampled_pixels: u64,
    },
}

/// Why a scene did not contribute to a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    MissingBand { band: String },
    /// NDVI range was flat or empty; the scene's layer is entirely nodata
    DegenerateNdviRange { detail: String },
    NoValidPixels,
}

impl ExclusionReason {
    /// Map a per-scene error to a recorded exclusion, when it is one
    pub fn from_error(err: &HeatError) -> Option<Self> {
        match err {
            HeatError::MissingBand { band, .. } => Some(ExclusionReason::MissingBand { band: band.clone() }),
            HeatError::DegenerateScene { reason, .. } => Some(ExclusionReason::DegenerateNdviRange {
                detail: reason.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedScene {
    pub scene_id: String,
    pub reason: ExclusionReason,
}

/// Metadata carried alongside a composite raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMetadata {
    pub product: String,
    pub band_name: String,
    pub sensor_id: String,
    pub sensor_version: String,
    pub dates: DateRange,
    pub aoi_bounds: BoundingBox,
    pub max_cloud_cover: f32,
    pub reducer: CompositeReducer,
    pub stage: CompositeStage,
    pub scenes_used: Vec<String>,
    pub excluded: Vec<ExcludedScene>,
    pub warnings: Vec<ProcessingWarning>,
    /// True if any statistic feeding the composite was approximated
    pub approximate: bool,
    pub valid_pixels: usize,
    /// Mean of the composite over the AOI
    pub aoi_mean: Option<f64>,
    pub processed_at: DateTime<Utc>,
    pub processor_version: String,
    pub visualization: VisParams,
}

impl CompositeMetadata {
    pub fn push_warning(&mut self, warning: ProcessingWarning) {
        if matches!(warning, ProcessingWarning::ApproximateStatistics { .. }) {
            self.approximate = true;
        }
        self.warnings.push(warning);
    }

    pub fn to_json(&self) -> HeatResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> HeatResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the metadata as a JSON sidecar file
    pub fn write_sidecar<P: AsRef<Path>>(&self, path: P) -> HeatResult<()> {
        log::info!("Writing metadata sidecar: {}", path.as_ref().display());
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}
