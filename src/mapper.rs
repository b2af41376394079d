//! Logical coordinates to output pixels
//!
//! The pipeline is world transform, then page space to device units (map
//! mode, window and viewport), then reference device units to pixels of the
//! output image at the requested DPI. The output origin sits on the top-left
//! corner of the picture frame.

use crate::emf_records::*;
use crate::error::{ConvertError, ConvertResult, DegenerateAxis, MapperError};
use crate::record::EmfHeader;
use crate::state::GraphicsState;
use crate::types::{PointF, PointL, RectL, SizeL, XForm};

const MM_PER_INCH: f64 = 25.4;
const DEFAULT_DEVICE_DPI: f64 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Text,
    LoMetric,
    HiMetric,
    LoEnglish,
    HiEnglish,
    Twips,
    Isotropic,
    Anisotropic,
}

impl MapMode {
    pub fn from_u32(mode: u32) -> Option<Self> {
        match mode {
            MM_TEXT => Some(MapMode::Text),
            MM_LOMETRIC => Some(MapMode::LoMetric),
            MM_HIMETRIC => Some(MapMode::HiMetric),
            MM_LOENGLISH => Some(MapMode::LoEnglish),
            MM_HIENGLISH => Some(MapMode::HiEnglish),
            MM_TWIPS => Some(MapMode::Twips),
            MM_ISOTROPIC => Some(MapMode::Isotropic),
            MM_ANISOTROPIC => Some(MapMode::Anisotropic),
            _ => None,
        }
    }

    /// Logical units per inch for the fixed physical modes
    pub fn units_per_inch(self) -> Option<f64> {
        match self {
            MapMode::LoMetric => Some(254.0),
            MapMode::HiMetric => Some(2540.0),
            MapMode::LoEnglish => Some(100.0),
            MapMode::HiEnglish => Some(1000.0),
            MapMode::Twips => Some(1440.0),
            _ => None,
        }
    }

    /// Window and viewport extents only matter in the two scalable modes
    pub fn uses_extents(self) -> bool {
        matches!(self, MapMode::Isotropic | MapMode::Anisotropic)
    }
}

/// Page space part of the graphics state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpace {
    pub map_mode: MapMode,
    pub window_org: PointL,
    pub window_ext: SizeL,
    pub viewport_org: PointL,
    pub viewport_ext: SizeL,
    pub world: XForm,
}

impl Default for PageSpace {
    fn default() -> Self {
        Self {
            map_mode: MapMode::Text,
            window_org: PointL::default(),
            window_ext: SizeL::new(1, 1),
            viewport_org: PointL::default(),
            viewport_ext: SizeL::new(1, 1),
            world: XForm::identity(),
        }
    }
}

/// Maps logical coordinates of one metafile to pixels of one output image
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    dpi: f64,
    /// Reference device resolution in pixels per inch, per axis
    device_dpi: (f64, f64),
    /// Top-left corner of the picture in reference device units
    origin: PointF,
    width: u32,
    height: u32,
    device_to_pixel: XForm,
}

impl CoordinateMapper {
    pub fn new(header: &EmfHeader, dpi: u32) -> ConvertResult<Self> {
        if dpi == 0 {
            return Err(ConvertError::Config("dpi must be positive".to_string()));
        }
        let dpi = dpi as f64;
        let device_dpi = reference_dpi(header);
        let px_per_mm = (device_dpi.0 / MM_PER_INCH, device_dpi.1 / MM_PER_INCH);

        let frame = header.frame.normalized();
        let bounds = header.bounds;
        let (origin, width, height) = if !frame.is_empty() {
            let origin = PointF::new(
                frame.left as f64 / 100.0 * px_per_mm.0,
                frame.top as f64 / 100.0 * px_per_mm.1,
            );
            let width = (frame.width() as f64 / 2540.0 * dpi).round();
            let height = (frame.height() as f64 / 2540.0 * dpi).round();
            (origin, width, height)
        } else if bounds.width() >= 0 && bounds.height() >= 0 && bounds != RectL::default() {
            // rclBounds is inclusive
            let origin = PointF::new(bounds.left as f64, bounds.top as f64);
            let width = ((bounds.width() + 1) as f64 * dpi / device_dpi.0).round();
            let height = ((bounds.height() + 1) as f64 * dpi / device_dpi.1).round();
            (origin, width, height)
        } else {
            return Err(ConvertError::format(8, "picture frame and bounds are both empty"));
        };

        if width < 1.0 || height < 1.0 || width > u32::MAX as f64 || height > u32::MAX as f64 {
            return Err(ConvertError::format(
                24,
                format!("picture size {}x{} pixels at {} dpi is unusable", width, height, dpi),
            ));
        }

        let device_to_pixel = XForm::translate(-origin.x, -origin.y)
            .then(&XForm::scale(dpi / device_dpi.0, dpi / device_dpi.1));

        Ok(Self {
            dpi,
            device_dpi,
            origin,
            width: width as u32,
            height: height as u32,
            device_to_pixel,
        })
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    pub fn device_dpi(&self) -> (f64, f64) {
        self.device_dpi
    }

    /// Output image size in pixels
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Output pixels per reference device pixel
    pub fn pixel_scale(&self) -> f64 {
        let sx = self.dpi / self.device_dpi.0;
        let sy = self.dpi / self.device_dpi.1;
        (sx * sy).sqrt()
    }

    pub fn device_origin(&self) -> PointF {
        self.origin
    }

    /// Reference device units to output pixels
    pub fn device_to_pixel(&self) -> XForm {
        self.device_to_pixel
    }

    /// Page space (after the world transform) to reference device units
    pub fn page_to_device(&self, page: &PageSpace) -> Result<XForm, MapperError> {
        let (sx, sy) = match page.map_mode {
            MapMode::Text => (1.0, 1.0),
            MapMode::Isotropic | MapMode::Anisotropic => {
                if page.window_ext.cx == 0 || page.window_ext.cy == 0 {
                    return Err(MapperError::DegenerateTransform(DegenerateAxis::WindowExtent));
                }
                if page.viewport_ext.cx == 0 || page.viewport_ext.cy == 0 {
                    return Err(MapperError::DegenerateTransform(DegenerateAxis::ViewportExtent));
                }
                let sx = page.viewport_ext.cx as f64 / page.window_ext.cx as f64;
                let sy = page.viewport_ext.cy as f64 / page.window_ext.cy as f64;
                if page.map_mode == MapMode::Isotropic {
                    let m = sx.abs().min(sy.abs());
                    (m.copysign(sx), m.copysign(sy))
                } else {
                    (sx, sy)
                }
            }
            fixed => {
                let upi = fixed.units_per_inch().unwrap_or(DEFAULT_DEVICE_DPI);
                (self.device_dpi.0 / upi, -self.device_dpi.1 / upi)
            }
        };

        Ok(XForm::translate(-page.window_org.x as f64, -page.window_org.y as f64)
            .then(&XForm::scale(sx, sy))
            .then(&XForm::translate(page.viewport_org.x as f64, page.viewport_org.y as f64)))
    }

    /// Logical units to reference device units
    pub fn logical_to_device(&self, state: &GraphicsState) -> Result<XForm, MapperError> {
        let world = state.page.world;
        if world.invert().is_none() {
            return Err(MapperError::DegenerateTransform(DegenerateAxis::WorldTransform));
        }
        Ok(world.then(&self.page_to_device(&state.page)?))
    }

    /// Full logical to output pixel matrix
    pub fn logical_to_pixel(&self, state: &GraphicsState) -> Result<XForm, MapperError> {
        Ok(self.logical_to_device(state)?.then(&self.device_to_pixel))
    }

    pub fn to_device_pixels(&self, point: PointF, state: &GraphicsState) -> Result<PointF, MapperError> {
        Ok(self.logical_to_pixel(state)?.apply(point))
    }

    /// Inverse of [`to_device_pixels`](Self::to_device_pixels)
    pub fn from_device_pixels(&self, pixel: PointF, state: &GraphicsState) -> Result<PointF, MapperError> {
        let inverse = self
            .logical_to_pixel(state)?
            .invert()
            .ok_or(MapperError::DegenerateTransform(DegenerateAxis::WorldTransform))?;
        Ok(inverse.apply(pixel))
    }

    /// Device-unit rectangle (clip regions) in output pixels
    pub fn device_rect_to_pixels(&self, rect: &RectL) -> Option<tiny_skia::Rect> {
        let a = self.device_to_pixel.apply(PointL::new(rect.left, rect.top).to_f64());
        let b = self.device_to_pixel.apply(PointL::new(rect.right, rect.bottom).to_f64());
        rect_from_points(a, b)
    }
}

/// Axis aligned rectangle spanning two corners
pub fn rect_from_points(a: PointF, b: PointF) -> Option<tiny_skia::Rect> {
    tiny_skia::Rect::from_ltrb(
        a.x.min(b.x) as f32,
        a.y.min(b.y) as f32,
        a.x.max(b.x) as f32,
        a.y.max(b.y) as f32,
    )
}

/// Resolution of the recording device, in pixels per inch
pub fn reference_dpi(header: &EmfHeader) -> (f64, f64) {
    let per_axis = |pixels: i32, size_mm: Option<f64>| match size_mm {
        Some(mm) if pixels > 0 && mm > 0.0 => pixels as f64 / mm * MM_PER_INCH,
        _ => DEFAULT_DEVICE_DPI,
    };
    let mm = match header.micrometers {
        Some(um) if um.cx > 0 && um.cy > 0 => (um.cx as f64 / 1000.0, um.cy as f64 / 1000.0),
        _ => (header.millimeters.cx as f64, header.millimeters.cy as f64),
    };
    (
        per_axis(header.device.cx, Some(mm.0)),
        per_axis(header.device.cy, Some(mm.1)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(frame: RectL, bounds: RectL) -> EmfHeader {
        EmfHeader {
            size: 88,
            bounds,
            frame,
            signature: ENHMETA_SIGNATURE,
            version: 0x10000,
            bytes: 108,
            records: 2,
            handles: 1,
            description: None,
            pal_entries: 0,
            device: SizeL::new(1920, 1920),
            millimeters: SizeL::new(508, 508),
            opengl: false,
            micrometers: None,
        }
    }

    fn approx(a: PointF, b: PointF) -> bool {
        (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6
    }

    #[test]
    fn test_canvas_size_from_frame() {
        let h = header(RectL::new(0, 0, 2646, 2646), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        assert_eq!(m.canvas_size(), (100, 100));
        let m = CoordinateMapper::new(&h, 300).unwrap();
        assert_eq!(m.canvas_size(), (313, 313));
    }

    #[test]
    fn test_canvas_size_from_bounds() {
        let h = header(RectL::default(), RectL::new(0, 0, 199, 99));
        let m = CoordinateMapper::new(&h, 96).unwrap();
        assert_eq!(m.canvas_size(), (200, 100));
    }

    #[test]
    fn test_empty_picture_is_format_error() {
        let h = header(RectL::default(), RectL::default());
        assert!(matches!(CoordinateMapper::new(&h, 96), Err(ConvertError::Format { .. })));
    }

    #[test]
    fn test_text_mode_is_identity_at_reference_dpi() {
        let h = header(RectL::new(0, 0, 2646, 2646), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        let state = GraphicsState::default();
        let p = m.to_device_pixels(PointF::new(10.0, 20.0), &state).unwrap();
        assert!(approx(p, PointF::new(10.0, 20.0)));
    }

    #[test]
    fn test_himetric_flips_y() {
        let h = header(RectL::new(0, 0, 2646, 2646), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        let mut state = GraphicsState::default();
        state.page.map_mode = MapMode::HiMetric;
        let p = m.to_device_pixels(PointF::new(2540.0, -2540.0), &state).unwrap();
        assert!(approx(p, PointF::new(96.0, 96.0)));
    }

    #[test]
    fn test_anisotropic_extents() {
        let h = header(RectL::new(0, 0, 2646, 2646), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        let mut state = GraphicsState::default();
        state.page.map_mode = MapMode::Anisotropic;
        state.page.window_ext = SizeL::new(1000, 1000);
        state.page.viewport_ext = SizeL::new(100, 50);
        state.page.window_org = PointL::new(500, 0);
        let p = m.to_device_pixels(PointF::new(1500.0, 1000.0), &state).unwrap();
        assert!(approx(p, PointF::new(100.0, 50.0)));

        state.page.map_mode = MapMode::Isotropic;
        let p = m.to_device_pixels(PointF::new(1500.0, 1000.0), &state).unwrap();
        assert!(approx(p, PointF::new(50.0, 50.0)));
    }

    #[test]
    fn test_zero_extent_is_degenerate() {
        let h = header(RectL::new(0, 0, 2646, 2646), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        let mut state = GraphicsState::default();
        state.page.map_mode = MapMode::Anisotropic;
        state.page.window_ext = SizeL::new(0, 10);
        assert_eq!(
            m.to_device_pixels(PointF::new(1.0, 1.0), &state),
            Err(MapperError::DegenerateTransform(DegenerateAxis::WindowExtent))
        );
        // Extents are ignored outside the scalable modes
        state.page.map_mode = MapMode::Text;
        assert!(m.to_device_pixels(PointF::new(1.0, 1.0), &state).is_ok());
    }

    #[test]
    fn test_round_trip_through_inverse() {
        let h = header(RectL::new(-500, 300, 8000, 6000), RectL::default());
        let m = CoordinateMapper::new(&h, 300).unwrap();
        let mut state = GraphicsState::default();
        state.page.map_mode = MapMode::Anisotropic;
        state.page.window_ext = SizeL::new(2000, -1500);
        state.page.viewport_ext = SizeL::new(640, 480);
        state.page.viewport_org = PointL::new(12, -7);
        state.page.world = XForm::new(0.8, 0.6, -0.6, 0.8, 30.0, -4.0);
        for p in [PointF::new(0.0, 0.0), PointF::new(123.5, -77.25), PointF::new(-4000.0, 9000.0)] {
            let pixel = m.to_device_pixels(p, &state).unwrap();
            let back = m.from_device_pixels(pixel, &state).unwrap();
            assert!((back.x - p.x).abs() < 1e-6 && (back.y - p.y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_frame_origin_offsets_output() {
        let h = header(RectL::new(2646, 2646, 5292, 5292), RectL::default());
        let m = CoordinateMapper::new(&h, 96).unwrap();
        let state = GraphicsState::default();
        let p = m.to_device_pixels(PointF::new(100.0, 100.0), &state).unwrap();
        assert!((p.x).abs() < 0.01 && (p.y).abs() < 0.01);
    }
}
