//! Type definitions shared by the decoder, the state machine and the rasterizer

/// COLORREF value as stored in EMF records (0x00BBGGRR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorRef(pub u32);

impl ColorRef {
    pub const BLACK: ColorRef = ColorRef(0x0000_0000);
    pub const WHITE: ColorRef = ColorRef(0x00FF_FFFF);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        ColorRef(r as u32 | (g as u32) << 8 | (b as u32) << 16)
    }

    pub fn red(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn green(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub fn blue(self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    /// The high byte selects palette-relative colors; the low 24 bits are
    /// used as RGB either way since no palette mapping is performed.
    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.red(), self.green(), self.blue(), 255)
    }
}

/// POINTL: 32-bit logical point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointL {
    pub x: i32,
    pub y: i32,
}

impl PointL {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn to_f64(self) -> PointF {
        PointF::new(self.x as f64, self.y as f64)
    }
}

/// Floating point coordinate used once values leave the record layer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// SIZEL: 32-bit extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeL {
    pub cx: i32,
    pub cy: i32,
}

impl SizeL {
    pub fn new(cx: i32, cy: i32) -> Self {
        Self { cx, cy }
    }
}

/// RECTL: inclusive-exclusive rectangle in logical or device units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RectL {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl RectL {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i64 {
        self.right as i64 - self.left as i64
    }

    pub fn height(&self) -> i64 {
        self.bottom as i64 - self.top as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Same rectangle with left <= right and top <= bottom
    pub fn normalized(&self) -> RectL {
        RectL {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }
}

/// XFORM: affine transform, `x' = x*m11 + y*m21 + dx`, `y' = x*m12 + y*m22 + dy`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XForm {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Default for XForm {
    fn default() -> Self {
        Self::identity()
    }
}

impl XForm {
    pub fn identity() -> Self {
        Self {
            m11: 1.0,
            m12: 0.0,
            m21: 0.0,
            m22: 1.0,
            dx: 0.0,
            dy: 0.0,
        }
    }

    pub fn new(m11: f64, m12: f64, m21: f64, m22: f64, dx: f64, dy: f64) -> Self {
        Self {
            m11,
            m12,
            m21,
            m22,
            dx,
            dy,
        }
    }

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, dx, dy)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Transform that applies `self` first and `next` second
    pub fn then(&self, next: &XForm) -> XForm {
        XForm {
            m11: self.m11 * next.m11 + self.m12 * next.m21,
            m12: self.m11 * next.m12 + self.m12 * next.m22,
            m21: self.m21 * next.m11 + self.m22 * next.m21,
            m22: self.m21 * next.m12 + self.m22 * next.m22,
            dx: self.dx * next.m11 + self.dy * next.m21 + next.dx,
            dy: self.dx * next.m12 + self.dy * next.m22 + next.dy,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    pub fn apply(&self, p: PointF) -> PointF {
        PointF {
            x: p.x * self.m11 + p.y * self.m21 + self.dx,
            y: p.x * self.m12 + p.y * self.m22 + self.dy,
        }
    }

    /// Apply only the linear part (no translation)
    pub fn apply_vector(&self, p: PointF) -> PointF {
        PointF {
            x: p.x * self.m11 + p.y * self.m21,
            y: p.x * self.m12 + p.y * self.m22,
        }
    }

    pub fn invert(&self) -> Option<XForm> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }
        let m11 = self.m22 / det;
        let m12 = -self.m12 / det;
        let m21 = -self.m21 / det;
        let m22 = self.m11 / det;
        Some(XForm {
            m11,
            m12,
            m21,
            m22,
            dx: -(self.dx * m11 + self.dy * m21),
            dy: -(self.dx * m12 + self.dy * m22),
        })
    }

    /// Average length scale of the linear part
    pub fn mean_scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn to_skia(&self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(
            self.m11 as f32,
            self.m12 as f32,
            self.m21 as f32,
            self.m22 as f32,
            self.dx as f32,
            self.dy as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorref_channels() {
        let c = ColorRef(0x0033_2211);
        assert_eq!((c.red(), c.green(), c.blue()), (0x11, 0x22, 0x33));
        assert_eq!(ColorRef::rgb(0x11, 0x22, 0x33), c);
    }

    #[test]
    fn test_xform_then_order() {
        let scale = XForm::scale(2.0, 3.0);
        let shift = XForm::translate(10.0, 20.0);
        let p = scale.then(&shift).apply(PointF::new(1.0, 1.0));
        assert_eq!(p, PointF::new(12.0, 23.0));
        let q = shift.then(&scale).apply(PointF::new(1.0, 1.0));
        assert_eq!(q, PointF::new(22.0, 63.0));
    }

    #[test]
    fn test_xform_invert() {
        let m = XForm::new(0.5, 0.25, -1.5, 2.0, 7.0, -3.0);
        let inv = m.invert().unwrap();
        let p = PointF::new(13.0, -4.5);
        let back = inv.apply(m.apply(p));
        assert!((back.x - p.x).abs() < 1e-9 && (back.y - p.y).abs() < 1e-9);
        assert!(XForm::scale(0.0, 1.0).invert().is_none());
    }
}
