//! Synthesizes EMF byte streams for integration tests.
//!
//! The reference device is 1920x1920 pixels on 508x508 mm, i.e. 96 dpi, so at
//! 96 dpi output one logical unit in MM_TEXT is exactly one pixel.

#![allow(dead_code)]

use emf_png_converter::emf_records::*;
use emf_png_converter::font_utils::{FontDescriptor, FontMetrics, GlyphOutline, GlyphOutlineProvider};
use emf_png_converter::geometry::PathOp;
use emf_png_converter::types::PointF;
use emf_png_converter::{ConvertOptions, UnsupportedRecordPolicy};
use std::sync::Arc;

pub const BLACK: [u8; 4] = [0, 0, 0, 255];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

/// COLORREF for an RGB triple
pub fn rgb(r: u8, g: u8, b: u8) -> i32 {
    r as i32 | (g as i32) << 8 | (b as i32) << 16
}

pub struct EmfBuilder {
    frame: [i32; 4],
    records: Vec<Vec<u8>>,
}

impl EmfBuilder {
    /// Picture that renders to `width` x `height` pixels at 96 dpi
    pub fn new(width: u32, height: u32) -> Self {
        let hmm = |px: u32| (px as f64 * 2540.0 / 96.0).round() as i32;
        Self {
            frame: [0, 0, hmm(width), hmm(height)],
            records: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame: [i32; 4]) -> Self {
        self.frame = frame;
        self
    }

    pub fn raw(mut self, record_type: u32, payload: Vec<u8>) -> Self {
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&record_type.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32 + 8).to_le_bytes());
        out.extend_from_slice(&payload);
        self.records.push(out);
        self
    }

    pub fn record(self, record_type: u32, payload: &[i32]) -> Self {
        self.raw(record_type, ints(payload))
    }

    pub fn rectangle(self, l: i32, t: i32, r: i32, b: i32) -> Self {
        self.record(EMR_RECTANGLE, &[l, t, r, b])
    }

    pub fn ellipse(self, l: i32, t: i32, r: i32, b: i32) -> Self {
        self.record(EMR_ELLIPSE, &[l, t, r, b])
    }

    pub fn move_to(self, x: i32, y: i32) -> Self {
        self.record(EMR_MOVETOEX, &[x, y])
    }

    pub fn line_to(self, x: i32, y: i32) -> Self {
        self.record(EMR_LINETO, &[x, y])
    }

    pub fn polygon16(self, points: &[(i16, i16)]) -> Self {
        let mut payload = ints(&[0, 0, 0, 0, points.len() as i32]);
        for (x, y) in points {
            payload.extend_from_slice(&x.to_le_bytes());
            payload.extend_from_slice(&y.to_le_bytes());
        }
        self.raw(EMR_POLYGON16, payload)
    }

    pub fn create_pen(self, handle: i32, style: i32, width: i32, color: i32) -> Self {
        self.record(EMR_CREATEPEN, &[handle, style, width, 0, color])
    }

    pub fn create_brush(self, handle: i32, style: i32, color: i32, hatch: i32) -> Self {
        self.record(EMR_CREATEBRUSHINDIRECT, &[handle, style, color, hatch])
    }

    pub fn select(self, handle: u32) -> Self {
        self.record(EMR_SELECTOBJECT, &[handle as i32])
    }

    pub fn delete(self, handle: u32) -> Self {
        self.record(EMR_DELETEOBJECT, &[handle as i32])
    }

    pub fn save_dc(self) -> Self {
        self.record(EMR_SAVEDC, &[])
    }

    pub fn restore_dc(self, n: i32) -> Self {
        self.record(EMR_RESTOREDC, &[n])
    }

    pub fn intersect_clip(self, l: i32, t: i32, r: i32, b: i32) -> Self {
        self.record(EMR_INTERSECTCLIPRECT, &[l, t, r, b])
    }

    pub fn map_mode(self, mode: u32) -> Self {
        self.record(EMR_SETMAPMODE, &[mode as i32])
    }

    pub fn window_ext(self, cx: i32, cy: i32) -> Self {
        self.record(EMR_SETWINDOWEXTEX, &[cx, cy])
    }

    pub fn viewport_ext(self, cx: i32, cy: i32) -> Self {
        self.record(EMR_SETVIEWPORTEXTEX, &[cx, cy])
    }

    pub fn bk_mode(self, mode: u32) -> Self {
        self.record(EMR_SETBKMODE, &[mode as i32])
    }

    pub fn text_color(self, color: i32) -> Self {
        self.record(EMR_SETTEXTCOLOR, &[color])
    }

    /// ExtCreateFontIndirectW with a LOGFONTW body
    pub fn create_font(self, handle: i32, height: i32, face: &str) -> Self {
        let mut payload = ints(&[handle, height, 0, 0, 0, 400]);
        payload.extend_from_slice(&[0u8; 8]);
        let mut name: Vec<u16> = face.encode_utf16().take(31).collect();
        name.resize(32, 0);
        for unit in name {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
        self.raw(EMR_EXTCREATEFONTINDIRECTW, payload)
    }

    /// ExtTextOutW without a clipping rectangle or Dx array
    pub fn text_out(self, x: i32, y: i32, text: &str) -> Self {
        let units: Vec<u16> = text.encode_utf16().collect();
        // prefix + bounds + mode + scales + EMRTEXT (with rectangle)
        let off_string = 8 + 16 + 12 + 40;
        let mut payload = ints(&[0, 0, -1, -1, 1]);
        payload.extend_from_slice(&1.0f32.to_le_bytes());
        payload.extend_from_slice(&1.0f32.to_le_bytes());
        payload.extend_from_slice(&ints(&[x, y, units.len() as i32, off_string, 0, 0, 0, 0, 0, 0]));
        for unit in &units {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
        while payload.len() % 4 != 0 {
            payload.push(0);
        }
        self.raw(EMR_EXTTEXTOUTW, payload)
    }

    /// StretchDIBits with SRCCOPY of a whole bottom-up 24 bpp bitmap.
    /// `rows` are listed top to bottom.
    pub fn stretch_dib(self, x: i32, y: i32, cx: i32, cy: i32, rows: &[Vec<[u8; 3]>]) -> Self {
        let height = rows.len() as i32;
        let width = rows.first().map_or(0, |r| r.len()) as i32;
        let bmi = ints(&[40, width, height, 1 | (24 << 16), 0, 0, 0, 0, 0, 0]);
        let stride = ((width * 3 + 3) / 4 * 4) as usize;
        let mut bits = Vec::new();
        for row in rows.iter().rev() {
            let start = bits.len();
            for [r, g, b] in row {
                bits.extend_from_slice(&[*b, *g, *r]);
            }
            bits.resize(start + stride, 0);
        }
        let off_bmi = 80;
        let off_bits = off_bmi + bmi.len() as i32;
        let mut payload = ints(&[
            0,
            0,
            -1,
            -1,
            x,
            y,
            0,
            0,
            width,
            height,
            off_bmi,
            bmi.len() as i32,
            off_bits,
            bits.len() as i32,
            DIB_RGB_COLORS as i32,
            SRCCOPY as i32,
            cx,
            cy,
        ]);
        payload.extend_from_slice(&bmi);
        payload.extend_from_slice(&bits);
        self.raw(EMR_STRETCHDIBITS, payload)
    }

    fn assemble(&self, with_eof: bool) -> Vec<u8> {
        let mut body: Vec<u8> = self.records.concat();
        let mut count = self.records.len() as u32 + 1;
        if with_eof {
            body.extend_from_slice(&EMR_EOF.to_le_bytes());
            body.extend_from_slice(&20u32.to_le_bytes());
            body.extend_from_slice(&ints(&[0, 16, 20]));
            count += 1;
        }
        let total = 88 + body.len() as u32;

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&EMR_HEADER.to_le_bytes());
        out.extend_from_slice(&88u32.to_le_bytes());
        let px = |hmm: i32| (hmm as f64 * 96.0 / 2540.0).round() as i32;
        let [l, t, r, b] = self.frame;
        out.extend_from_slice(&ints(&[px(l), px(t), px(r) - 1, px(b) - 1]));
        out.extend_from_slice(&ints(&self.frame));
        for v in [ENHMETA_SIGNATURE, 0x10000, total, count] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&ints(&[0, 0, 0, 1920, 1920, 508, 508]));
        out.extend_from_slice(&body);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        self.assemble(true)
    }

    /// Stream whose last record is not EOF
    pub fn build_without_eof(&self) -> Vec<u8> {
        self.assemble(false)
    }
}

pub fn ints(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Every glyph is a one-em-wide box from the baseline up to half an em;
/// '?' has no outline
pub struct BoxGlyphs;

impl GlyphOutlineProvider for BoxGlyphs {
    fn outline(&self, _font: &FontDescriptor, ch: char) -> Option<GlyphOutline> {
        if ch == '?' {
            return None;
        }
        Some(GlyphOutline {
            ops: vec![
                PathOp::MoveTo(PointF::new(0.0, 0.0)),
                PathOp::LineTo(PointF::new(1.0, 0.0)),
                PathOp::LineTo(PointF::new(1.0, 0.5)),
                PathOp::LineTo(PointF::new(0.0, 0.5)),
                PathOp::Close,
            ],
            advance: 1.0,
        })
    }

    fn metrics(&self, _font: &FontDescriptor) -> FontMetrics {
        FontMetrics {
            ascent: 0.75,
            descent: 0.25,
            ..FontMetrics::default()
        }
    }
}

/// 96 dpi, warnings collected, box glyphs
pub fn options() -> ConvertOptions {
    ConvertOptions {
        dpi: 96,
        on_unsupported_record: UnsupportedRecordPolicy::CollectWarnings,
        glyphs: Some(Arc::new(BoxGlyphs)),
        ..ConvertOptions::default()
    }
}

pub fn decode_png(png: &[u8]) -> image::RgbaImage {
    image::load_from_memory(png).expect("valid PNG").to_rgba8()
}

/// Channel-wise comparison with room for anti-aliasing rounding
pub fn assert_pixel(image: &image::RgbaImage, x: u32, y: u32, expected: [u8; 4]) {
    let actual = image.get_pixel(x, y).0;
    let close = actual
        .iter()
        .zip(expected)
        .all(|(a, e)| (*a as i32 - e as i32).abs() <= 8);
    assert!(close, "pixel ({}, {}) is {:?}, expected {:?}", x, y, actual, expected);
}
