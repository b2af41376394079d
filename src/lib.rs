//! EMF to PNG Converter
//!
//! Decodes Windows Enhanced Metafiles and rasterizes them into PNG images at
//! any output resolution, without a GDI device context.
//!
//! ```no_run
//! use emf_png_converter::{convert, ConvertOptions};
//!
//! let data = std::fs::read("chart.emf")?;
//! let result = convert(&data, &ConvertOptions::with_dpi(150))?;
//! std::fs::write("chart.png", &result.png)?;
//! # Ok::<(), emf_png_converter::ConvertError>(())
//! ```

use serde::Serialize;
use std::fs;
use std::path::Path;

pub mod bitmap;
pub mod canvas;
pub mod clip;
pub mod converter;
pub mod emf_records;
pub mod encoder;
pub mod error;
pub mod font_utils;
pub mod geometry;
pub mod mapper;
pub mod objects;
pub mod reader;
pub mod record;
pub mod state;
pub mod text;
pub mod types;

pub use bitmap::{BitmapDecoder, BitmapError, DibDecoder};
pub use canvas::{PixelBuffer, Rasterizer};
pub use converter::{
    convert, CancellationToken, Conversion, ConvertOptions, Converter, Rendering, ResampleFilter,
    UnsupportedRecordPolicy, DEFAULT_DPI,
};
pub use encoder::{
    emf_base64_to_emf_uri, emf_uri_to_emf_base64, encode, png_base64_to_png_uri, png_uri_to_png_base64, to_base64,
    to_data_uri,
};
pub use error::{ConvertError, ConvertResult, MapperError, RecordError, Warning, WarningKind};
pub use font_utils::{FontDescriptor, FontMetrics, GlyphOutline, GlyphOutlineProvider, TtfGlyphProvider};
pub use mapper::CoordinateMapper;
pub use reader::{is_emf_format, parse_header, EmfDocument, RecordReader};
pub use record::{EmfHeader, Record};

/// Picture size information read from the EMF header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmfDimensions {
    /// rclBounds size in reference device pixels. rclBounds is inclusive on
    /// both edges, so a picture covering pixels 0..=99 reports 100 rather
    /// than `right - left`.
    pub bounds_width_px: i64,
    pub bounds_height_px: i64,
    /// rclFrame size in 0.01 mm
    pub frame_width_hmm: i64,
    pub frame_height_hmm: i64,
    pub frame_width_mm: f64,
    pub frame_height_mm: f64,
    pub frame_width_in: f64,
    pub frame_height_in: f64,
    /// Output image size at `dpi`
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
    /// Reference device size in pixels and millimeters
    pub device_width_px: i32,
    pub device_height_px: i32,
    pub device_width_mm: i32,
    pub device_height_mm: i32,
}

/// Read the picture bounds and frame of an EMF buffer
pub fn read_emf_bbox(data: &[u8], dpi: u32) -> ConvertResult<EmfDimensions> {
    let header = parse_header(data)?;
    let mapper = CoordinateMapper::new(&header, dpi)?;
    let (width_px, height_px) = mapper.canvas_size();
    let bounds = header.bounds.normalized();
    let frame = header.frame.normalized();
    Ok(EmfDimensions {
        bounds_width_px: bounds.width() + 1,
        bounds_height_px: bounds.height() + 1,
        frame_width_hmm: frame.width(),
        frame_height_hmm: frame.height(),
        frame_width_mm: frame.width() as f64 / 100.0,
        frame_height_mm: frame.height() as f64 / 100.0,
        frame_width_in: frame.width() as f64 / 2540.0,
        frame_height_in: frame.height() as f64 / 2540.0,
        width_px,
        height_px,
        dpi,
        device_width_px: header.device.cx,
        device_height_px: header.device.cy,
        device_width_mm: header.millimeters.cx,
        device_height_mm: header.millimeters.cy,
    })
}

/// Output size in pixels at `dpi`
pub fn get_dimensions(data: &[u8], dpi: u32) -> ConvertResult<(u32, u32)> {
    let dims = read_emf_bbox(data, dpi)?;
    Ok((dims.width_px, dims.height_px))
}

pub fn emf_bytes_to_png_bytes(data: &[u8], dpi: u32) -> ConvertResult<Vec<u8>> {
    Ok(convert(data, &ConvertOptions::with_dpi(dpi))?.png)
}

/// Convert an EMF file and write the PNG to `output`
pub fn emf_file_to_png_file(input: impl AsRef<Path>, output: impl AsRef<Path>, dpi: u32) -> ConvertResult<Conversion> {
    let data = fs::read(input.as_ref())?;
    let result = convert(&data, &ConvertOptions::with_dpi(dpi))?;
    fs::write(output.as_ref(), &result.png)?;
    log::info!(
        "Wrote {}x{} PNG to {}",
        result.width,
        result.height,
        output.as_ref().display()
    );
    Ok(result)
}

pub fn emf_file_to_emf_base64(path: impl AsRef<Path>) -> ConvertResult<String> {
    Ok(to_base64(&fs::read(path)?))
}

pub fn emf_file_to_emf_uri(path: impl AsRef<Path>) -> ConvertResult<String> {
    Ok(emf_base64_to_emf_uri(&emf_file_to_emf_base64(path)?))
}

pub fn emf_base64_to_png_base64(emf_base64: &str, dpi: u32) -> ConvertResult<String> {
    let data = encoder::decode_base64(emf_base64)?;
    Ok(to_base64(&emf_bytes_to_png_bytes(&data, dpi)?))
}

pub fn emf_uri_to_png_uri(emf_uri: &str, dpi: u32) -> ConvertResult<String> {
    let png_base64 = emf_base64_to_png_base64(&emf_uri_to_emf_base64(emf_uri)?, dpi)?;
    Ok(png_base64_to_png_uri(&png_base64))
}

#[cfg(feature = "python")]
mod python {
    use super::*;
    use pyo3::prelude::*;
    use pyo3::types::{PyBytes, PyDict};

    /// Convert EMF file to PNG file
    ///
    /// Returns:
    ///     (width, height) of the written image
    #[pyfunction]
    #[pyo3(signature = (input_path, output_path, dpi = DEFAULT_DPI))]
    fn convert_emf_to_png(input_path: &str, output_path: &str, dpi: u32) -> PyResult<(u32, u32)> {
        if !Path::new(input_path).exists() {
            return Err(PyErr::new::<pyo3::exceptions::PyFileNotFoundError, _>(format!(
                "Input file not found: {}",
                input_path
            )));
        }
        let result = emf_file_to_png_file(input_path, output_path, dpi)?;
        Ok((result.width, result.height))
    }

    /// Convert EMF bytes to PNG bytes
    #[pyfunction]
    #[pyo3(signature = (emf_data, dpi = DEFAULT_DPI))]
    fn convert_emf_bytes_to_png(py: Python<'_>, emf_data: &[u8], dpi: u32) -> PyResult<Py<PyBytes>> {
        if !is_emf_format(emf_data) {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>("Input must be EMF data"));
        }
        let png = py.allow_threads(|| emf_bytes_to_png_bytes(emf_data, dpi))?;
        Ok(PyBytes::new(py, &png).into())
    }

    #[pyfunction]
    #[pyo3(signature = (emf_uri, dpi = DEFAULT_DPI))]
    fn emf_uri_to_png_data_uri(emf_uri: &str, dpi: u32) -> PyResult<String> {
        Ok(emf_uri_to_png_uri(emf_uri, dpi)?)
    }

    #[pyfunction]
    #[pyo3(signature = (emf_base64, dpi = DEFAULT_DPI))]
    fn emf_base64_to_png_data(emf_base64: &str, dpi: u32) -> PyResult<String> {
        Ok(emf_base64_to_png_base64(emf_base64, dpi)?)
    }

    /// Header dimensions as a dict
    #[pyfunction]
    #[pyo3(signature = (emf_data, dpi = DEFAULT_DPI))]
    fn emf_dimensions(py: Python<'_>, emf_data: &[u8], dpi: u32) -> PyResult<PyObject> {
        let dims = read_emf_bbox(emf_data, dpi)?;
        let dict = PyDict::new(py);
        dict.set_item("width_px", dims.width_px)?;
        dict.set_item("height_px", dims.height_px)?;
        dict.set_item("bounds_width_px", dims.bounds_width_px)?;
        dict.set_item("bounds_height_px", dims.bounds_height_px)?;
        dict.set_item("frame_width_mm", dims.frame_width_mm)?;
        dict.set_item("frame_height_mm", dims.frame_height_mm)?;
        dict.set_item("frame_width_in", dims.frame_width_in)?;
        dict.set_item("frame_height_in", dims.frame_height_in)?;
        dict.set_item("dpi", dims.dpi)?;
        Ok(dict.into())
    }

    /// Python module definition
    #[pymodule]
    fn emf_png_converter(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(convert_emf_to_png, m)?)?;
        m.add_function(wrap_pyfunction!(convert_emf_bytes_to_png, m)?)?;
        m.add_function(wrap_pyfunction!(emf_uri_to_png_data_uri, m)?)?;
        m.add_function(wrap_pyfunction!(emf_base64_to_png_data, m)?)?;
        m.add_function(wrap_pyfunction!(emf_dimensions, m)?)?;
        Ok(())
    }
}
