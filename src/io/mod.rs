//! I/O collaborators: scene loaders and raster sinks

pub mod export;
#[cfg(feature = "geotiff")]
pub mod scene_reader;

pub use export::{
    aggregate_to_scale, crop_to_region, EncodedRaster, ExportParams, Exporter, PixelEncoding, RasterSink,
};
#[cfg(feature = "geotiff")]
pub use export::GeoTiffSink;
#[cfg(feature = "geotiff")]
pub use scene_reader::{GeoTiffCatalog, SceneFiles, SceneReader};

use crate::core::collection::CollectionQuery;
use crate::types::{HeatResult, Scene};

/// Resolves a collection query to multi-band scenes with QA bitmasks
pub trait SceneSource: Sync {
    /// Scenes for the query. Sources may return extra scenes; the pipeline
    /// filters again before use.
    fn fetch(&self, query: &CollectionQuery) -> HeatResult<Vec<Scene>>;
}

/// In-memory scenes served as-is
impl SceneSource for Vec<Scene> {
    fn fetch(&self, query: &CollectionQuery) -> HeatResult<Vec<Scene>> {
        Ok(self.iter().filter(|s| query.accepts(s)).cloned().collect())
    }
}
