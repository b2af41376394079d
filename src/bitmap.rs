//! Device independent bitmaps embedded in blit and brush records

use crate::emf_records::DIB_PAL_COLORS;
use crate::types::ColorRef;
use byteorder::{LittleEndian, ReadBytesExt};
use image::{Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

const BI_RGB: u32 = 0;
const BI_RLE8: u32 = 1;
const BI_RLE4: u32 = 2;
const BI_BITFIELDS: u32 = 3;
const BI_JPEG: u32 = 4;
const BI_PNG: u32 = 5;
const BI_ALPHABITFIELDS: u32 = 6;

/// Largest bitmap decoded, in pixels
const MAX_PIXELS: u64 = 1 << 28;

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("bitmap header: {0}")]
    Header(String),

    #[error("unsupported bitmap: {0}")]
    Unsupported(String),

    #[error("bitmap of {width}x{height} pixels is too large")]
    TooLarge { width: i64, height: i64 },

    #[error("bitmap needs {needed} bytes of pixel data but has {available}")]
    Truncated { needed: u64, available: usize },

    #[error("embedded image: {0}")]
    Image(#[from] image::ImageError),
}

/// Turns BITMAPINFO plus pixel bits into top-down RGBA
pub trait BitmapDecoder: Send + Sync {
    /// `palette` resolves DIB_PAL_COLORS color tables
    fn decode(&self, bmi: &[u8], bits: &[u8], usage: u32, palette: &[ColorRef]) -> Result<RgbaImage, BitmapError>;
}

/// Parsed BITMAPINFOHEADER (or BITMAPCOREHEADER)
#[derive(Debug, Clone, PartialEq)]
pub struct DibHeader {
    pub header_size: u32,
    pub width: i32,
    /// Positive for bottom-up bitmaps
    pub height: i32,
    pub bit_count: u16,
    pub compression: u32,
    pub colors_used: u32,
    pub masks: Option<[u32; 4]>,
}

impl DibHeader {
    pub fn parse(bmi: &[u8]) -> Result<Self, BitmapError> {
        let mut c = Cursor::new(bmi);
        let short = |_| BitmapError::Header("BITMAPINFO is truncated".to_string());
        let header_size = c.read_u32::<LittleEndian>().map_err(short)?;
        if header_size == 12 {
            let width = c.read_u16::<LittleEndian>().map_err(short)? as i32;
            let height = c.read_u16::<LittleEndian>().map_err(short)? as i32;
            let _planes = c.read_u16::<LittleEndian>().map_err(short)?;
            let bit_count = c.read_u16::<LittleEndian>().map_err(short)?;
            return Ok(Self {
                header_size,
                width,
                height,
                bit_count,
                compression: BI_RGB,
                colors_used: 0,
                masks: None,
            });
        }
        if header_size < 40 || header_size as usize > bmi.len() {
            return Err(BitmapError::Header(format!("header size {} is invalid", header_size)));
        }
        let width = c.read_i32::<LittleEndian>().map_err(short)?;
        let height = c.read_i32::<LittleEndian>().map_err(short)?;
        let _planes = c.read_u16::<LittleEndian>().map_err(short)?;
        let bit_count = c.read_u16::<LittleEndian>().map_err(short)?;
        let compression = c.read_u32::<LittleEndian>().map_err(short)?;
        let _size_image = c.read_u32::<LittleEndian>().map_err(short)?;
        let _x_ppm = c.read_i32::<LittleEndian>().map_err(short)?;
        let _y_ppm = c.read_i32::<LittleEndian>().map_err(short)?;
        let colors_used = c.read_u32::<LittleEndian>().map_err(short)?;
        let _colors_important = c.read_u32::<LittleEndian>().map_err(short)?;

        let masks = if matches!(compression, BI_BITFIELDS | BI_ALPHABITFIELDS) {
            // V4/V5 headers carry the masks; plain info headers are followed by them
            let count = if compression == BI_ALPHABITFIELDS || header_size >= 56 { 4 } else { 3 };
            let mut m = [0u32; 4];
            for slot in m.iter_mut().take(count) {
                *slot = c.read_u32::<LittleEndian>().map_err(short)?;
            }
            Some(m)
        } else {
            None
        };

        Ok(Self {
            header_size,
            width,
            height,
            bit_count,
            compression,
            colors_used,
            masks,
        })
    }

    pub fn is_bottom_up(&self) -> bool {
        self.height > 0
    }

    fn color_table_offset(&self) -> usize {
        match (self.masks, self.header_size) {
            (Some(_), 40) if self.compression == BI_ALPHABITFIELDS => 56,
            (Some(_), 40) => 52,
            _ => self.header_size as usize,
        }
    }

    fn color_count(&self) -> usize {
        if self.colors_used > 0 {
            (self.colors_used as usize).min(256)
        } else if self.bit_count <= 8 {
            1 << self.bit_count
        } else {
            0
        }
    }

    fn stride(&self) -> usize {
        (self.width.unsigned_abs() as usize * self.bit_count as usize).div_ceil(32) * 4
    }
}

/// Default decoder: uncompressed, bitfield, RLE and embedded JPEG/PNG bitmaps
#[derive(Debug, Default, Clone, Copy)]
pub struct DibDecoder;

impl BitmapDecoder for DibDecoder {
    fn decode(&self, bmi: &[u8], bits: &[u8], usage: u32, palette: &[ColorRef]) -> Result<RgbaImage, BitmapError> {
        let header = DibHeader::parse(bmi)?;

        if matches!(header.compression, BI_JPEG | BI_PNG) {
            return Ok(image::load_from_memory(bits)?.to_rgba8());
        }

        let width = header.width.unsigned_abs();
        let height = header.height.unsigned_abs();
        if width == 0 || height == 0 {
            return Err(BitmapError::Header("bitmap has no pixels".to_string()));
        }
        if width as u64 * height as u64 > MAX_PIXELS {
            return Err(BitmapError::TooLarge {
                width: width as i64,
                height: height as i64,
            });
        }

        if matches!(header.compression, BI_RGB | BI_BITFIELDS | BI_ALPHABITFIELDS) {
            // The last scanline may omit its padding
            let last_row = (width as u64 * header.bit_count as u64).div_ceil(8);
            let needed = header.stride() as u64 * (height as u64 - 1) + last_row;
            if (bits.len() as u64) < needed {
                return Err(BitmapError::Truncated {
                    needed,
                    available: bits.len(),
                });
            }
        }

        let colors = color_table(&header, bmi, usage, palette);
        let mut out = RgbaImage::new(width, height);
        match (header.compression, header.bit_count) {
            (BI_RGB, 1 | 4 | 8) => decode_indexed(&header, bits, &colors, &mut out),
            (BI_RGB, 16) => decode_masked(&header, bits, [0x7C00, 0x03E0, 0x001F, 0], &mut out),
            (BI_RGB, 24) => decode_bgr(&header, bits, &mut out),
            (BI_RGB, 32) => decode_bgra(&header, bits, &mut out),
            (BI_BITFIELDS | BI_ALPHABITFIELDS, 16 | 32) => {
                let masks = header.masks.unwrap_or([0x7C00, 0x03E0, 0x001F, 0]);
                decode_masked(&header, bits, masks, &mut out)
            }
            (BI_RLE8, 8) => decode_rle(&header, bits, &colors, false, &mut out),
            (BI_RLE4, 4) => decode_rle(&header, bits, &colors, true, &mut out),
            (compression, bit_count) => {
                return Err(BitmapError::Unsupported(format!(
                    "compression {} with {} bits per pixel",
                    compression, bit_count
                )))
            }
        }
        Ok(out)
    }
}

fn color_table(header: &DibHeader, bmi: &[u8], usage: u32, palette: &[ColorRef]) -> Vec<Rgba<u8>> {
    let offset = header.color_table_offset();
    let count = header.color_count();
    let mut colors = Vec::with_capacity(count);
    for i in 0..count {
        let color = if header.header_size == 12 {
            bmi.get(offset + i * 3..offset + i * 3 + 3)
                .map(|e| Rgba([e[2], e[1], e[0], 255]))
        } else if usage == DIB_PAL_COLORS {
            bmi.get(offset + i * 2..offset + i * 2 + 2).map(|e| {
                let index = u16::from_le_bytes([e[0], e[1]]) as usize;
                let c = palette.get(index).copied().unwrap_or(ColorRef::BLACK);
                Rgba([c.red(), c.green(), c.blue(), 255])
            })
        } else {
            bmi.get(offset + i * 4..offset + i * 4 + 4)
                .map(|e| Rgba([e[2], e[1], e[0], 255]))
        };
        colors.push(color.unwrap_or(Rgba([0, 0, 0, 255])));
    }
    if colors.is_empty() && header.bit_count == 1 {
        colors = vec![Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255])];
    }
    colors
}

/// Output row for stored row `row`
fn target_row(header: &DibHeader, row: u32) -> u32 {
    if header.is_bottom_up() {
        header.height.unsigned_abs() - 1 - row
    } else {
        row
    }
}

/// Stored scanlines; missing bytes read as zero
fn scanline<'a>(bits: &'a [u8], header: &DibHeader, row: u32) -> impl Fn(usize) -> u8 + 'a {
    let start = row as usize * header.stride();
    move |i| bits.get(start + i).copied().unwrap_or(0)
}

fn decode_indexed(header: &DibHeader, bits: &[u8], colors: &[Rgba<u8>], out: &mut RgbaImage) {
    let bpp = header.bit_count as usize;
    let per_byte = 8 / bpp;
    let mask = ((1u16 << bpp) - 1) as u8;
    for row in 0..out.height() {
        let line = scanline(bits, header, row);
        let y = target_row(header, row);
        for x in 0..out.width() {
            let byte = line(x as usize / per_byte);
            let shift = 8 - bpp * (x as usize % per_byte + 1);
            let index = ((byte >> shift) & mask) as usize;
            let color = colors.get(index).copied().unwrap_or(Rgba([0, 0, 0, 255]));
            out.put_pixel(x, y, color);
        }
    }
}

fn decode_bgr(header: &DibHeader, bits: &[u8], out: &mut RgbaImage) {
    for row in 0..out.height() {
        let line = scanline(bits, header, row);
        let y = target_row(header, row);
        for x in 0..out.width() {
            let i = x as usize * 3;
            out.put_pixel(x, y, Rgba([line(i + 2), line(i + 1), line(i), 255]));
        }
    }
}

/// 32 bpp BI_RGB keeps the stored alpha byte; callers decide whether it is meaningful
fn decode_bgra(header: &DibHeader, bits: &[u8], out: &mut RgbaImage) {
    for row in 0..out.height() {
        let line = scanline(bits, header, row);
        let y = target_row(header, row);
        for x in 0..out.width() {
            let i = x as usize * 4;
            out.put_pixel(x, y, Rgba([line(i + 2), line(i + 1), line(i), line(i + 3)]));
        }
    }
}

fn decode_masked(header: &DibHeader, bits: &[u8], masks: [u32; 4], out: &mut RgbaImage) {
    let bytes = header.bit_count as usize / 8;
    for row in 0..out.height() {
        let line = scanline(bits, header, row);
        let y = target_row(header, row);
        for x in 0..out.width() {
            let mut value = 0u32;
            for b in 0..bytes {
                value |= (line(x as usize * bytes + b) as u32) << (8 * b);
            }
            let alpha = if masks[3] == 0 { 255 } else { channel(value, masks[3]) };
            out.put_pixel(
                x,
                y,
                Rgba([channel(value, masks[0]), channel(value, masks[1]), channel(value, masks[2]), alpha]),
            );
        }
    }
}

/// Extract a masked channel scaled to 8 bits
fn channel(value: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let max = mask >> shift;
    let v = (value & mask) >> shift;
    ((v as u64 * 255 + max as u64 / 2) / max as u64) as u8
}

/// RLE8/RLE4 decoding. Pixels the stream skips stay transparent.
fn decode_rle(header: &DibHeader, bits: &[u8], colors: &[Rgba<u8>], nibbles: bool, out: &mut RgbaImage) {
    let (width, height) = (out.width(), out.height());
    let color = |index: u8| colors.get(index as usize).copied().unwrap_or(Rgba([0, 0, 0, 255]));
    let mut put = |x: u32, row: u32, index: u8| {
        if x < width && row < height {
            let y = target_row(header, row);
            out.put_pixel(x, y, color(index));
        }
    };

    let (mut x, mut row) = (0u32, 0u32);
    let mut i = 0usize;
    while i + 1 < bits.len() {
        let (count, value) = (bits[i], bits[i + 1]);
        i += 2;
        if count > 0 {
            for k in 0..count as u32 {
                let index = if nibbles {
                    if k % 2 == 0 {
                        value >> 4
                    } else {
                        value & 0x0F
                    }
                } else {
                    value
                };
                put(x + k, row, index);
            }
            x += count as u32;
            continue;
        }
        match value {
            0 => {
                x = 0;
                row += 1;
            }
            1 => break,
            2 => {
                if i + 1 >= bits.len() {
                    break;
                }
                x += bits[i] as u32;
                row += bits[i + 1] as u32;
                i += 2;
            }
            n => {
                let n = n as usize;
                let len = if nibbles { n.div_ceil(2) } else { n };
                for k in 0..n {
                    let index = if nibbles {
                        let byte = bits.get(i + k / 2).copied().unwrap_or(0);
                        if k % 2 == 0 {
                            byte >> 4
                        } else {
                            byte & 0x0F
                        }
                    } else {
                        bits.get(i + k).copied().unwrap_or(0)
                    };
                    put(x + k as u32, row, index);
                }
                x += n as u32;
                // Absolute runs are padded to a word boundary
                i += len + (len % 2);
            }
        }
        if row >= height {
            break;
        }
    }
}
