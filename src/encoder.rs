//! PNG encoding and the base64 / data URI helpers

use crate::canvas::PixelBuffer;
use crate::error::{ConvertError, ConvertResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};

pub const PNG_URI_PREFIX: &str = "data:image/png;base64,";
pub const EMF_URI_PREFIX: &str = "data:image/x-emf;base64,";

/// Encode the buffer as an RGBA8 PNG.
///
/// Compression level and filter are fixed, so equal buffers always give
/// equal bytes.
pub fn encode(buffer: &PixelBuffer) -> ConvertResult<Vec<u8>> {
    let rgba = buffer.to_rgba();
    let mut png = Vec::new();
    PngEncoder::new_with_quality(&mut png, CompressionType::Default, FilterType::Adaptive)
        .write_image(&rgba, buffer.width(), buffer.height(), ColorType::Rgba8)
        .map_err(|e| ConvertError::Encode(e.to_string()))?;
    log::debug!("Encoded {}x{} PNG, {} bytes", buffer.width(), buffer.height(), png.len());
    Ok(png)
}

pub fn to_base64(png: &[u8]) -> String {
    STANDARD.encode(png)
}

pub fn to_data_uri(png: &[u8]) -> String {
    format!("{}{}", PNG_URI_PREFIX, to_base64(png))
}

pub fn png_base64_to_png_uri(png_base64: &str) -> String {
    format!("{}{}", PNG_URI_PREFIX, png_base64)
}

pub fn png_uri_to_png_base64(png_uri: &str) -> ConvertResult<String> {
    strip_prefix(png_uri, PNG_URI_PREFIX)
}

pub fn emf_base64_to_emf_uri(emf_base64: &str) -> String {
    format!("{}{}", EMF_URI_PREFIX, emf_base64)
}

pub fn emf_uri_to_emf_base64(emf_uri: &str) -> ConvertResult<String> {
    strip_prefix(emf_uri, EMF_URI_PREFIX)
}

pub(crate) fn decode_base64(data: &str) -> ConvertResult<Vec<u8>> {
    Ok(STANDARD.decode(data.trim())?)
}

fn strip_prefix(uri: &str, prefix: &'static str) -> ConvertResult<String> {
    uri.trim()
        .strip_prefix(prefix)
        .map(str::to_string)
        .ok_or(ConvertError::InvalidUri(prefix))
}
