//! Core index processing modules

pub mod aoi;
pub mod cloud_mask;
pub mod collection;
pub mod composite;
pub mod indices;
pub mod metadata;
pub mod pipeline;
pub mod reducer;
pub mod thermal;

// Re-export main types
pub use aoi::Aoi;
pub use cloud_mask::CloudMaskFilter;
pub use collection::{CollectionQuery, SceneCollection, DEFAULT_MAX_CLOUD_COVER};
pub use composite::{Composite, CompositeReducer, CompositeStage, TemporalCompositor};
pub use indices::{ndbi, ndvi, normalized_difference, scale_reflectance, SpectralIndex};
pub use metadata::{CompositeMetadata, ExcludedScene, ExclusionReason, ProcessingWarning};
pub use pipeline::{IndexPipeline, IndexProduct, PipelineConfig, PipelineOutput};
pub use reducer::{MinMax, ReducerParams, RegionalReducer, RegionalStats};
pub use thermal::{EmissivityModel, ThermalCalculator, ThermalLayers};
