//! urbanheat: cloud-masked spectral and thermal index composites
//!
//! Computes NDVI, NDBI and land surface temperature from Landsat-style
//! multi-band scenes, masks clouds from QA bits, reduces statistics over an
//! area of interest and composites the results over a time window.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

mod maybe_rayon;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{QaFlags, SensorProduct, SensorTable, VisParams};
pub use types::{
    BandData, BandName, BoundingBox, CoordinateSystem, DateRange, GeoTransform, HeatError, HeatResult,
    RasterBand, RasterGrid, Sample, Scene,
};

pub use crate::core::{
    Aoi, CloudMaskFilter, CompositeMetadata, CompositeReducer, CompositeStage, IndexPipeline, IndexProduct,
    PipelineConfig, PipelineOutput, RegionalReducer, TemporalCompositor, ThermalCalculator,
};
pub use io::{Exporter, ExportParams, PixelEncoding, RasterSink, SceneSource};
