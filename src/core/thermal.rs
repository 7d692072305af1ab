//! Brightness temperature, emissivity and land surface temperature
//!
//! The chain is BT (from the thermal DN), PV (from NDVI and its AOI-wide
//! range), EM (from PV) and finally the single-channel LST correction
//!
//! `LST = BT / (1 + (λ·BT / c2)·ln(EM)) − 273.15`

use crate::config::{LinearScale, SensorProduct};
use crate::core::indices::{map_pixels, zip_pixels};
use crate::core::reducer::MinMax;
use crate::types::{BandData, BandName, HeatError, HeatResult, RasterBand, Scene};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Second radiation constant c2 = h·c / k, in µm·K
pub const SECOND_RADIATION_CONSTANT_UM_K: f64 = 14388.0;

/// Kelvin to Celsius offset
pub const KELVIN_OFFSET: f64 = 273.15;

/// Surface emissivity model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EmissivityModel {
    /// `EM = slope·PV + intercept`
    Linear { slope: f64, intercept: f64 },
    /// NDVI threshold method: bare soil below `ndvi_soil`, full vegetation
    /// above `ndvi_vegetation`, a PV-weighted mixture in between
    NdviThreshold {
        ndvi_soil: f64,
        ndvi_vegetation: f64,
        soil_emissivity: f64,
        vegetation_emissivity: f64,
    },
}

impl Default for EmissivityModel {
    fn default() -> Self {
        EmissivityModel::Linear {
            slope: 0.004,
            intercept: 0.986,
        }
    }
}

impl EmissivityModel {
    pub fn ndvi_threshold() -> Self {
        EmissivityModel::NdviThreshold {
            ndvi_soil: 0.2,
            ndvi_vegetation: 0.5,
            soil_emissivity: 0.973,
            vegetation_emissivity: 0.99,
        }
    }

    /// Whether the model needs the AOI-wide NDVI range
    pub fn needs_ndvi_range(&self) -> bool {
        matches!(self, EmissivityModel::Linear { .. })
    }

    /// Emissivity of one pixel from its NDVI and PV
    pub fn pixel(&self, ndvi: Option<f64>, pv: Option<f64>) -> Option<f64> {
        match *self {
            EmissivityModel::Linear { slope, intercept } => {
                ndvi?;
                pv.map(|pv| slope * pv + intercept)
            }
            EmissivityModel::NdviThreshold {
                ndvi_soil,
                ndvi_vegetation,
                soil_emissivity,
                vegetation_emissivity,
            } => {
                let ndvi = ndvi?;
                if ndvi < ndvi_soil {
                    Some(soil_emissivity)
                } else if ndvi > ndvi_vegetation {
                    Some(vegetation_emissivity)
                } else {
                    let pv = ((ndvi - ndvi_soil) / (ndvi_vegetation - ndvi_soil)).powi(2);
                    Some(vegetation_emissivity * pv + soil_emissivity * (1.0 - pv))
                }
            }
        }
    }

    pub fn validate(&self) -> HeatResult<()> {
        if let EmissivityModel::NdviThreshold { ndvi_soil, ndvi_vegetation, .. } = self {
            if ndvi_vegetation <= ndvi_soil {
                return Err(HeatError::InvalidParameter(format!(
                    "vegetation NDVI threshold {} must exceed soil threshold {}",
                    ndvi_vegetation, ndvi_soil
                )));
            }
        }
        Ok(())
    }
}

/// Thermal DN to brightness temperature (Kelvin)
pub fn brightness_temperature(thermal: &BandData, scaling: &LinearScale) -> BandData {
    let scaling = *scaling;
    map_pixels(thermal, move |v| v.map(|dn| scaling.apply(dn)))
}

/// `PV = ((NDVI − min) / (max − min))²`
///
/// With no range, or a flat one, every pixel is nodata.
pub fn proportion_of_vegetation(ndvi: &BandData, range: Option<MinMax>) -> BandData {
    let range = match range {
        Some(r) if r.max > r.min => r,
        _ => return Array2::from_elem(ndvi.dim(), None),
    };
    let span = range.max - range.min;
    map_pixels(ndvi, move |v| {
        let pv = ((v? - range.min) / span).powi(2);
        pv.is_finite().then_some(pv)
    })
}

/// Surface emissivity from NDVI and PV
pub fn emissivity(ndvi: &BandData, pv: &BandData, model: &EmissivityModel) -> HeatResult<BandData> {
    let model = *model;
    zip_pixels(ndvi, pv, move |n, p| model.pixel(n, p))
}

/// Land surface temperature in Celsius for one pixel
#[inline]
pub fn lst_celsius(bt_kelvin: f64, emissivity: f64, wavelength_um: f64) -> Option<f64> {
    if emissivity <= 0.0 {
        return None;
    }
    let denom = 1.0 + (wavelength_um * bt_kelvin / SECOND_RADIATION_CONSTANT_UM_K) * emissivity.ln();
    if denom == 0.0 {
        return None;
    }
    let lst = bt_kelvin / denom - KELVIN_OFFSET;
    lst.is_finite().then_some(lst)
}

/// Land surface temperature band in Celsius
pub fn land_surface_temperature(bt: &BandData, em: &BandData, wavelength_um: f64) -> HeatResult<BandData> {
    zip_pixels(bt, em, move |t, e| lst_celsius(t?, e?, wavelength_um))
}

/// Intermediate and final rasters of the thermal chain
#[derive(Debug, Clone)]
pub struct ThermalLayers {
    pub brightness_temperature: RasterBand,
    pub proportion_of_vegetation: RasterBand,
    pub emissivity: RasterBand,
    pub lst: RasterBand,
}

/// Runs the thermal chain for one scene with product constants
#[derive(Debug, Clone)]
pub struct ThermalCalculator {
    thermal_scaling: LinearScale,
    wavelength_um: f64,
    model: EmissivityModel,
}

impl ThermalCalculator {
    pub fn new(product: &SensorProduct, model: EmissivityModel) -> Self {
        Self {
            thermal_scaling: product.thermal,
            wavelength_um: product.thermal_wavelength_um,
            model,
        }
    }

    pub fn model(&self) -> &EmissivityModel {
        &self.model
    }

    /// `ndvi_range` must come from the same scene as `ndvi`
    pub fn compute(
        &self,
        scene: &Scene,
        ndvi: &RasterBand,
        ndvi_range: Option<MinMax>,
    ) -> HeatResult<ThermalLayers> {
        if ndvi.grid != scene.grid {
            return Err(HeatError::GridMismatch(format!(
                "NDVI band does not match grid of scene {}",
                scene.id
            )));
        }
        log::debug!(
            "Thermal chain for scene {}: λ={} µm, NDVI range {:?}, model {:?}",
            scene.id,
            self.wavelength_um,
            ndvi_range,
            self.model
        );

        let bt = brightness_temperature(scene.band(BandName::Thermal)?, &self.thermal_scaling);
        let pv = proportion_of_vegetation(&ndvi.data, ndvi_range);
        let em = emissivity(&ndvi.data, &pv, &self.model)?;
        let lst = land_surface_temperature(&bt, &em, self.wavelength_um)?;

        Ok(ThermalLayers {
            brightness_temperature: RasterBand::new("BT", scene.grid, bt)?,
            proportion_of_vegetation: RasterBand::new("PV", scene.grid, pv)?,
            emissivity: RasterBand::new("EM", scene.grid, em)?,
            lst: RasterBand::new("LST_C", scene.grid, lst)?,
        })
    }
}
