//! Normalized-difference spectral indices
//!
//! Every calculator is a pure pixel map: a nodata input gives a nodata output,
//! and a zero denominator gives nodata rather than NaN or infinity.

use crate::config::LinearScale;
use crate::types::{BandData, BandName, HeatError, HeatResult, RasterBand, Sample, Scene};
use ndarray::Zip;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Normalized-difference indices supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Normalized Difference Built-up Index
    Ndbi,
}

impl SpectralIndex {
    /// (positive, negative) bands of the ratio
    pub fn bands(&self) -> (BandName, BandName) {
        match self {
            SpectralIndex::Ndvi => (BandName::Nir, BandName::Red),
            SpectralIndex::Ndbi => (BandName::Swir1, BandName::Nir),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndbi => "NDBI",
        }
    }

    /// Compute the index over a (masked, scaled) scene
    pub fn compute(&self, scene: &Scene) -> HeatResult<RasterBand> {
        let (a, b) = self.bands();
        let data = normalized_difference(scene.band(a)?, scene.band(b)?)?;
        RasterBand::new(self.name(), scene.grid, data)
    }
}

/// `(a - b) / (a + b)` for one pixel, clamped to [-1, 1]
#[inline]
pub fn normalized_difference_pixel<T: Float>(a: Option<T>, b: Option<T>) -> Option<T> {
    let (a, b) = (a?, b?);
    let sum = a + b;
    if sum.is_zero() {
        return None;
    }
    let nd = (a - b) / sum;
    if !nd.is_finite() {
        return None;
    }
    Some(nd.max(-T::one()).min(T::one()))
}

/// Combine two co-registered bands pixel by pixel
pub(crate) fn zip_pixels<F>(a: &BandData, b: &BandData, f: F) -> HeatResult<BandData>
where
    F: Fn(Sample, Sample) -> Sample + Send + Sync,
{
    if a.dim() != b.dim() {
        return Err(HeatError::GridMismatch(format!(
            "cannot combine {:?} and {:?} bands",
            a.dim(),
            b.dim()
        )));
    }

    #[cfg(feature = "parallel")]
    let out = Zip::from(a).and(b).par_map_collect(|&x, &y| f(x, y));
    #[cfg(not(feature = "parallel"))]
    let out = Zip::from(a).and(b).map_collect(|&x, &y| f(x, y));

    Ok(out)
}

/// Map one band pixel by pixel
pub(crate) fn map_pixels<F>(a: &BandData, f: F) -> BandData
where
    F: Fn(Sample) -> Sample + Send + Sync,
{
    #[cfg(feature = "parallel")]
    let out = Zip::from(a).par_map_collect(|&x| f(x));
    #[cfg(not(feature = "parallel"))]
    let out = Zip::from(a).map_collect(|&x| f(x));

    out
}

/// Normalized difference between two bands
pub fn normalized_difference(a: &BandData, b: &BandData) -> HeatResult<BandData> {
    zip_pixels(a, b, normalized_difference_pixel::<f64>)
}

/// `NDVI = (NIR - Red) / (NIR + Red)`
pub fn ndvi(nir: &BandData, red: &BandData) -> HeatResult<BandData> {
    normalized_difference(nir, red)
}

/// `NDBI = (SWIR1 - NIR) / (SWIR1 + NIR)`
pub fn ndbi(swir1: &BandData, nir: &BandData) -> HeatResult<BandData> {
    normalized_difference(swir1, nir)
}

/// Convert surface reflectance DNs to reflectance on the optical bands.
/// The thermal band is left untouched.
pub fn scale_reflectance(scene: &Scene, scaling: &LinearScale) -> Scene {
    if *scaling == LinearScale::IDENTITY {
        return scene.clone();
    }
    scene.map_bands(|name, data| match name {
        BandName::Thermal => data.clone(),
        _ => map_pixels(data, |v| v.map(|dn| scaling.apply(dn))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_ndvi_reference_scene() {
        let red = array![[Some(0.1), Some(0.2)], [Some(0.3), Some(0.4)]];
        let nir = array![[Some(0.3), Some(0.2)], [Some(0.5), Some(0.1)]];
        let out = ndvi(&nir, &red).unwrap();

        let expected = [[0.5, 0.0], [0.25, -0.6]];
        for r in 0..2 {
            for c in 0..2 {
                assert_relative_eq!(out[[r, c]].unwrap(), expected[r][c], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_denominator_is_nodata() {
        assert_eq!(normalized_difference_pixel(Some(0.0), Some(0.0)), None);
        assert_eq!(normalized_difference_pixel(Some(0.25f32), Some(-0.25)), None);
    }

    #[test]
    fn test_nodata_propagates() {
        assert_eq!(normalized_difference_pixel(None, Some(0.2)), None);
        assert_eq!(normalized_difference_pixel(Some(0.2), None), None);

        let nir = array![[None, Some(0.4)]];
        let red = array![[Some(0.1), None]];
        let out = ndvi(&nir, &red).unwrap();
        assert!(out.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_output_is_clamped() {
        // Negative reflectance after offset scaling can push the raw ratio past 1
        let v = normalized_difference_pixel(Some(-0.1), Some(0.05)).unwrap();
        assert_eq!(v, 1.0);
        let v = normalized_difference_pixel(Some(0.05), Some(-0.1)).unwrap();
        assert_eq!(v, -1.0);
    }

    #[test]
    fn test_ndbi_band_order() {
        let swir1 = array![[Some(0.3)]];
        let nir = array![[Some(0.1)]];
        assert_relative_eq!(ndbi(&swir1, &nir).unwrap()[[0, 0]].unwrap(), 0.5);
        assert_eq!(SpectralIndex::Ndbi.bands(), (BandName::Swir1, BandName::Nir));
    }

    #[test]
    fn test_mismatched_bands_rejected() {
        let a = array![[Some(0.1), Some(0.2)]];
        let b = array![[Some(0.1)], [Some(0.2)]];
        assert!(matches!(normalized_difference(&a, &b), Err(HeatError::GridMismatch(_))));
    }
}
