use crate::config::QaFlags;
use crate::core::aoi::Aoi;
use crate::types::{HeatResult, Mask, QaBand, Scene};
use ndarray::Zip;

/// Cloud and shadow masking driven by QA bits
#[derive(Debug, Clone, Copy)]
pub struct CloudMaskFilter {
    flags: QaFlags,
}

impl CloudMaskFilter {
    pub fn new(flags: QaFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &QaFlags {
        &self.flags
    }

    /// Keep-mask: `true` where every configured flag is clear
    pub fn build_mask(&self, qa: &QaBand) -> Mask {
        let reject = self.flags.reject_bits();
        qa.mapv(|bits| bits & reject == 0)
    }

    /// Overwrite every sample band with nodata where the QA mask rejects the pixel
    pub fn apply(&self, scene: &Scene) -> HeatResult<Scene> {
        let mask = self.build_mask(scene.qa()?);
        let kept = mask.iter().filter(|&&keep| keep).count();

        log::debug!(
            "Cloud mask for scene {}: kept {}/{} pixels ({:.1}%)",
            scene.id,
            kept,
            mask.len(),
            if mask.is_empty() { 0.0 } else { 100.0 * kept as f64 / mask.len() as f64 }
        );
        if kept == 0 {
            log::warn!("Scene {} is fully masked by QA flags", scene.id);
        }

        Ok(scene.map_bands(|_, data| {
            Zip::from(data)
                .and(&mask)
                .map_collect(|&v, &keep| if keep { v } else { None })
        }))
    }

    /// Mask by QA and clip to the area of interest in one step
    pub fn apply_and_clip(&self, scene: &Scene, aoi: &Aoi) -> HeatResult<Scene> {
        let masked = self.apply(scene)?;
        let inside = aoi.pixel_mask(&masked.grid);
        Ok(masked.map_bands(|_, data| {
            Zip::from(data)
                .and(&inside)
                .map_collect(|&v, &keep| if keep { v } else { None })
        }))
    }
}
