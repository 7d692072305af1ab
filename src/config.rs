//! Sensor product constants and display settings
//!
//! Every number that depends on the sensor product (QA bit positions, scale and
//! offset pairs, thermal wavelength) lives in one [`SensorTable`], keyed by the
//! product identifier and resolved once per pipeline run.

use crate::types::{BandName, HeatError, HeatResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Landsat 8/9 Collection 2 Level-2 surface reflectance and temperature
pub const LANDSAT_C2_L2: &str = "LANDSAT/LC08/C02/T1_L2";
/// Landsat 9 Collection 2 Level-2, same band layout as Landsat 8
pub const LANDSAT9_C2_L2: &str = "LANDSAT/LC09/C02/T1_L2";
/// Landsat 8 surface reflectance product with the older QA bit layout
pub const LANDSAT_SR: &str = "LANDSAT/LC08/C02/T1_SR";

/// QA bit positions tested by the cloud mask. `None` disables a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaFlags {
    pub cloud_shadow: Option<u8>,
    pub cloud: Option<u8>,
    pub high_confidence_cloud: Option<u8>,
}

impl QaFlags {
    /// Bits that must all be clear for a pixel to be kept
    pub fn reject_bits(&self) -> u16 {
        [self.cloud_shadow, self.cloud, self.high_confidence_cloud]
            .iter()
            .flatten()
            .fold(0u16, |acc, &bit| acc | (1u16 << bit))
    }

    pub fn validate(&self) -> HeatResult<()> {
        for (name, bit) in [
            ("cloud_shadow", self.cloud_shadow),
            ("cloud", self.cloud),
            ("high_confidence_cloud", self.high_confidence_cloud),
        ] {
            if let Some(bit) = bit {
                if bit > 15 {
                    return Err(HeatError::Config(format!(
                        "QA flag {} uses bit {} outside a 16-bit QA band",
                        name, bit
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    pub scale: f64,
    pub offset: f64,
}

impl LinearScale {
    pub const IDENTITY: LinearScale = LinearScale { scale: 1.0, offset: 0.0 };

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Product-specific band names, used by loaders and in metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandAliases {
    pub red: String,
    pub nir: String,
    pub swir1: String,
    pub thermal: String,
    pub qa: String,
}

impl BandAliases {
    pub fn get(&self, band: BandName) -> &str {
        match band {
            BandName::Red => &self.red,
            BandName::Nir => &self.nir,
            BandName::Swir1 => &self.swir1,
            BandName::Thermal => &self.thermal,
        }
    }
}

/// Constants for one sensor product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProduct {
    pub id: String,
    /// Product version the constants were published for
    pub version: String,
    pub qa_flags: QaFlags,
    /// Surface reflectance DN to reflectance
    pub reflectance: LinearScale,
    /// Thermal DN to brightness temperature in Kelvin
    pub thermal: LinearScale,
    /// Effective thermal band wavelength in micrometres
    pub thermal_wavelength_um: f64,
    /// Native pixel size in map units
    pub native_resolution: f64,
    pub bands: BandAliases,
}

impl SensorProduct {
    pub fn landsat_c2_l2(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: "C2-L2".to_string(),
            qa_flags: QaFlags {
                cloud_shadow: Some(2),
                cloud: Some(3),
                high_confidence_cloud: Some(4),
            },
            reflectance: LinearScale { scale: 0.0000275, offset: -0.2 },
            thermal: LinearScale { scale: 0.00341802, offset: 149.0 },
            thermal_wavelength_um: 11.5,
            native_resolution: 30.0,
            bands: BandAliases {
                red: "SR_B4".to_string(),
                nir: "SR_B5".to_string(),
                swir1: "SR_B6".to_string(),
                thermal: "ST_B10".to_string(),
                qa: "QA_PIXEL".to_string(),
            },
        }
    }

    pub fn landsat_sr() -> Self {
        Self {
            id: LANDSAT_SR.to_string(),
            version: "SR-pixel_qa".to_string(),
            qa_flags: QaFlags {
                cloud_shadow: Some(3),
                cloud: Some(5),
                high_confidence_cloud: None,
            },
            reflectance: LinearScale { scale: 0.0001, offset: 0.0 },
            thermal: LinearScale { scale: 0.1, offset: 0.0 },
            thermal_wavelength_um: 10.9,
            native_resolution: 30.0,
            bands: BandAliases {
                red: "B4".to_string(),
                nir: "B5".to_string(),
                swir1: "B6".to_string(),
                thermal: "B10".to_string(),
                qa: "pixel_qa".to_string(),
            },
        }
    }

    pub fn validate(&self) -> HeatResult<()> {
        self.qa_flags.validate()?;
        if !(self.thermal_wavelength_um.is_finite() && self.thermal_wavelength_um > 0.0) {
            return Err(HeatError::Config(format!(
                "{}: thermal wavelength must be positive, got {}",
                self.id, self.thermal_wavelength_um
            )));
        }
        if !(self.native_resolution.is_finite() && self.native_resolution > 0.0) {
            return Err(HeatError::Config(format!(
                "{}: native resolution must be positive, got {}",
                self.id, self.native_resolution
            )));
        }
        if self.reflectance.scale == 0.0 || self.thermal.scale == 0.0 {
            return Err(HeatError::Config(format!("{}: zero scale factor", self.id)));
        }
        Ok(())
    }
}

/// Versioned table of sensor products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTable {
    pub version: u32,
    pub products: BTreeMap<String, SensorProduct>,
}

impl Default for SensorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SensorTable {
    /// Products used by the bundled pipelines
    pub fn builtin() -> Self {
        let products = [
            SensorProduct::landsat_c2_l2(LANDSAT_C2_L2),
            SensorProduct::landsat_c2_l2(LANDSAT9_C2_L2),
            SensorProduct::landsat_sr(),
        ]
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

        Self { version: 1, products }
    }

    pub fn from_json_str(json: &str) -> HeatResult<Self> {
        let table: SensorTable = serde_json::from_str(json)?;
        table.validate()?;
        log::debug!(
            "Loaded sensor table v{} with {} products",
            table.version,
            table.products.len()
        );
        Ok(table)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HeatResult<Self> {
        log::info!("Reading sensor table from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> HeatResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> HeatResult<()> {
        for (key, product) in &self.products {
            if key != &product.id {
                return Err(HeatError::Config(format!(
                    "table key '{}' does not match product id '{}'",
                    key, product.id
                )));
            }
            product.validate()?;
        }
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> HeatResult<&SensorProduct> {
        self.products
            .get(id)
            .ok_or_else(|| HeatError::UnknownSensor(id.to_string()))
    }

    pub fn insert(&mut self, product: SensorProduct) -> HeatResult<()> {
        product.validate()?;
        self.products.insert(product.id.clone(), product);
        Ok(())
    }
}

/// Display stretch for map viewers; never feeds into computed values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<String>,
}

impl VisParams {
    pub fn ndvi() -> Self {
        Self {
            min: 0.0,
            max: 0.8,
            palette: ["FFFFFF", "CE7E45", "DF923D", "F1B555", "99B718", "74A901", "056201", "004C00"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn ndbi() -> Self {
        Self {
            min: -0.5,
            max: 0.5,
            palette: vec!["0000FF".to_string(), "FFFFFF".to_string(), "FF0000".to_string()],
        }
    }

    pub fn lst_celsius() -> Self {
        Self {
            min: 20.0,
            max: 40.0,
            palette: vec!["blue".to_string(), "yellow".to_string(), "red".to_string()],
        }
    }
}
