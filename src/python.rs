//! Python bindings for the per-pixel calculators. NaN marks nodata on the
//! numpy side.

use crate::core::indices;
use crate::core::reducer::MinMax;
use crate::core::thermal::{self, EmissivityModel};
use crate::types::BandData;
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

fn numpy_to_band(arr: PyReadonlyArray2<f64>) -> BandData {
    arr.as_array().mapv(|v| v.is_finite().then_some(v))
}

fn band_to_numpy(py: Python, band: &BandData) -> PyObject {
    band.mapv(|v| v.unwrap_or(f64::NAN)).to_pyarray(py).into()
}

/// NDVI = (NIR - Red) / (NIR + Red)
#[pyfunction]
fn ndvi(py: Python, nir: PyReadonlyArray2<f64>, red: PyReadonlyArray2<f64>) -> PyResult<PyObject> {
    let (nir, red) = (numpy_to_band(nir), numpy_to_band(red));
    let out = py
        .allow_threads(|| indices::ndvi(&nir, &red))
        .map_err(|e| PyValueError::new_err(format!("NDVI failed: {}", e)))?;
    Ok(band_to_numpy(py, &out))
}

/// NDBI = (SWIR1 - NIR) / (SWIR1 + NIR)
#[pyfunction]
fn ndbi(py: Python, swir1: PyReadonlyArray2<f64>, nir: PyReadonlyArray2<f64>) -> PyResult<PyObject> {
    let (swir1, nir) = (numpy_to_band(swir1), numpy_to_band(nir));
    let out = py
        .allow_threads(|| indices::ndbi(&swir1, &nir))
        .map_err(|e| PyValueError::new_err(format!("NDBI failed: {}", e)))?;
    Ok(band_to_numpy(py, &out))
}

/// LST in Celsius from brightness temperature (Kelvin) and NDVI, with the
/// NDVI range of the same scene
#[pyfunction]
#[pyo3(signature = (bt, ndvi, ndvi_min, ndvi_max, wavelength_um = 11.5))]
fn lst(
    py: Python,
    bt: PyReadonlyArray2<f64>,
    ndvi: PyReadonlyArray2<f64>,
    ndvi_min: f64,
    ndvi_max: f64,
    wavelength_um: f64,
) -> PyResult<PyObject> {
    let (bt, ndvi) = (numpy_to_band(bt), numpy_to_band(ndvi));
    let range = Some(MinMax { min: ndvi_min, max: ndvi_max });
    let out = py
        .allow_threads(|| {
            let pv = thermal::proportion_of_vegetation(&ndvi, range);
            let em = thermal::emissivity(&ndvi, &pv, &EmissivityModel::default())?;
            thermal::land_surface_temperature(&bt, &em, wavelength_um)
        })
        .map_err(|e| PyValueError::new_err(format!("LST failed: {}", e)))?;
    Ok(band_to_numpy(py, &out))
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(ndvi, m)?)?;
    m.add_function(wrap_pyfunction!(ndbi, m)?)?;
    m.add_function(wrap_pyfunction!(lst, m)?)?;
    Ok(())
}
