//! Outlines of the drawing records in output pixel space

use crate::emf_records::{AD_CLOCKWISE, PT_BEZIERTO, PT_CLOSEFIGURE, PT_LINETO, PT_MOVETO};
use crate::error::MapperError;
use crate::mapper::CoordinateMapper;
use crate::record::{PolyKind, Record, RegionData};
use crate::state::GraphicsState;
use crate::types::{PointF, PointL, RectL, XForm};
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use tiny_skia::{Path, PathBuilder, PathSegment};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathOp {
    MoveTo(PointF),
    LineTo(PointF),
    CubicTo(PointF, PointF, PointF),
    Close,
}

/// Geometry of one primitive
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub ops: Vec<PathOp>,
    /// Closed primitives are filled with the brush as well as stroked
    pub closed: bool,
}

impl Outline {
    pub fn to_path(&self) -> Option<Path> {
        to_path(&self.ops)
    }
}

/// Pixel adjustments applied when an outline is going to be stroked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeAdjust {
    /// Box shapes shrink by this many pixels so the pen stays inside the box
    pub inset: f64,
    /// Open and polygonal outlines move by this many pixels to hit pixel centers
    pub shift: f64,
}

impl StrokeAdjust {
    pub const NONE: StrokeAdjust = StrokeAdjust { inset: 0.0, shift: 0.0 };

    pub fn for_pen_width(width: f64) -> Self {
        Self {
            inset: width / 2.0,
            shift: 0.5,
        }
    }
}

pub fn to_path(ops: &[PathOp]) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for op in ops {
        match *op {
            PathOp::MoveTo(p) => pb.move_to(p.x as f32, p.y as f32),
            PathOp::LineTo(p) => pb.line_to(p.x as f32, p.y as f32),
            PathOp::CubicTo(a, b, c) => pb.cubic_to(a.x as f32, a.y as f32, b.x as f32, b.y as f32, c.x as f32, c.y as f32),
            PathOp::Close => pb.close(),
        }
    }
    pb.finish()
}

/// Inverse of [`to_path`]; quadratic segments are raised to cubics
pub fn from_path(path: &Path) -> Vec<PathOp> {
    let mut ops = Vec::new();
    let mut last = PointF::default();
    for segment in path.segments() {
        match segment {
            PathSegment::MoveTo(p) => {
                last = PointF::new(p.x as f64, p.y as f64);
                ops.push(PathOp::MoveTo(last));
            }
            PathSegment::LineTo(p) => {
                last = PointF::new(p.x as f64, p.y as f64);
                ops.push(PathOp::LineTo(last));
            }
            PathSegment::QuadTo(q, p) => {
                let q = PointF::new(q.x as f64, q.y as f64);
                let p = PointF::new(p.x as f64, p.y as f64);
                let c1 = PointF::new(last.x + 2.0 / 3.0 * (q.x - last.x), last.y + 2.0 / 3.0 * (q.y - last.y));
                let c2 = PointF::new(p.x + 2.0 / 3.0 * (q.x - p.x), p.y + 2.0 / 3.0 * (q.y - p.y));
                ops.push(PathOp::CubicTo(c1, c2, p));
                last = p;
            }
            PathSegment::CubicTo(a, b, p) => {
                last = PointF::new(p.x as f64, p.y as f64);
                ops.push(PathOp::CubicTo(
                    PointF::new(a.x as f64, a.y as f64),
                    PointF::new(b.x as f64, b.y as f64),
                    last,
                ));
            }
            PathSegment::Close => ops.push(PathOp::Close),
        }
    }
    ops
}

/// Replace curves by line segments
pub fn flatten(ops: &[PathOp]) -> Vec<PathOp> {
    const STEPS: usize = 16;
    let mut out = Vec::with_capacity(ops.len());
    let mut last = PointF::default();
    for op in ops {
        match *op {
            PathOp::CubicTo(a, b, c) => {
                for i in 1..=STEPS {
                    let t = i as f64 / STEPS as f64;
                    let u = 1.0 - t;
                    let w = [u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t];
                    out.push(PathOp::LineTo(PointF::new(
                        w[0] * last.x + w[1] * a.x + w[2] * b.x + w[3] * c.x,
                        w[0] * last.y + w[1] * a.y + w[2] * b.y + w[3] * c.y,
                    )));
                }
                last = c;
            }
            PathOp::MoveTo(p) | PathOp::LineTo(p) => {
                last = p;
                out.push(*op);
            }
            PathOp::Close => out.push(*op),
        }
    }
    out
}

/// Builds pixel-space path operations from logical coordinates
struct Tracer {
    m: XForm,
    shift: f64,
    ops: Vec<PathOp>,
}

impl Tracer {
    fn new(m: XForm, shift: f64) -> Self {
        Self {
            m,
            shift,
            ops: Vec::new(),
        }
    }

    fn map(&self, p: PointF) -> PointF {
        let q = self.m.apply(p);
        PointF::new(q.x + self.shift, q.y + self.shift)
    }

    fn move_to(&mut self, p: PointF) {
        let p = self.map(p);
        self.ops.push(PathOp::MoveTo(p));
    }

    fn line_to(&mut self, p: PointF) {
        let p = self.map(p);
        self.ops.push(PathOp::LineTo(p));
    }

    fn cubic_to(&mut self, a: PointF, b: PointF, c: PointF) {
        let (a, b, c) = (self.map(a), self.map(b), self.map(c));
        self.ops.push(PathOp::CubicTo(a, b, c));
    }

    fn close(&mut self) {
        self.ops.push(PathOp::Close);
    }

    /// Elliptical arc in parametric angles; `connect` draws a line to the
    /// start point instead of starting a new figure
    fn arc(&mut self, center: PointF, rx: f64, ry: f64, start: f64, sweep: f64, connect: bool) {
        let at = |t: f64| PointF::new(center.x + rx * t.cos(), center.y + ry * t.sin());
        if connect {
            self.line_to(at(start));
        } else {
            self.move_to(at(start));
        }
        // Turns past the first retrace the same outline
        let sweep = if sweep.abs() > TAU {
            sweep.signum() * (TAU + sweep.abs().rem_euclid(TAU))
        } else {
            sweep
        };
        let segments = (sweep.abs() / FRAC_PI_2 - 1e-9).ceil().max(1.0) as usize;
        let step = sweep / segments as f64;
        let k = 4.0 / 3.0 * (step / 4.0).tan();
        let mut t = start;
        for _ in 0..segments {
            let t2 = t + step;
            let (s1, c1) = t.sin_cos();
            let (s2, c2) = t2.sin_cos();
            let p1 = PointF::new(center.x + rx * (c1 - k * s1), center.y + ry * (s1 + k * c1));
            let p2 = PointF::new(center.x + rx * (c2 + k * s2), center.y + ry * (s2 - k * c2));
            self.cubic_to(p1, p2, at(t2));
            t = t2;
        }
    }

    fn polyline(&mut self, points: &[PointL]) {
        for (i, p) in points.iter().enumerate() {
            if i == 0 {
                self.move_to(p.to_f64());
            } else {
                self.line_to(p.to_f64());
            }
        }
    }

    fn beziers(&mut self, points: &[PointL]) {
        for c in points.chunks_exact(3) {
            self.cubic_to(c[0].to_f64(), c[1].to_f64(), c[2].to_f64());
        }
    }
}

/// Box in logical units, shrunk by `inset` pixels on every side
struct LogicalBox {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl LogicalBox {
    fn new(rect: &RectL, m: &XForm, inset: f64) -> Self {
        let r = rect.normalized();
        let (mut left, mut top, mut right, mut bottom) = (r.left as f64, r.top as f64, r.right as f64, r.bottom as f64);
        if inset > 0.0 {
            let sx = m.m11.hypot(m.m12);
            let sy = m.m21.hypot(m.m22);
            let ix = if sx > 0.0 { (inset / sx).min((right - left) / 2.0) } else { 0.0 };
            let iy = if sy > 0.0 { (inset / sy).min((bottom - top) / 2.0) } else { 0.0 };
            left += ix;
            right -= ix;
            top += iy;
            bottom -= iy;
        }
        Self { left, top, right, bottom }
    }

    fn center(&self) -> PointF {
        PointF::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    fn radii(&self) -> (f64, f64) {
        ((self.right - self.left) / 2.0, (self.bottom - self.top) / 2.0)
    }

    /// Parametric angle where the ray from the center through `p` meets the ellipse
    fn angle_of(&self, p: PointL) -> f64 {
        let c = self.center();
        let (rx, ry) = self.radii();
        let dx = if rx > 0.0 { (p.x as f64 - c.x) / rx } else { 0.0 };
        let dy = if ry > 0.0 { (p.y as f64 - c.y) / ry } else { 0.0 };
        dy.atan2(dx)
    }

    fn point_at(&self, t: f64) -> PointF {
        let c = self.center();
        let (rx, ry) = self.radii();
        PointF::new(c.x + rx * t.cos(), c.y + ry * t.sin())
    }
}

/// Sweep from `start` to `end` honoring the arc direction as seen on the output
fn arc_sweep(start: f64, end: f64, state: &GraphicsState, m: &XForm) -> f64 {
    let counterclockwise = state.arc_direction != AD_CLOCKWISE;
    let flipped = m.determinant() < 0.0;
    let negative = counterclockwise != flipped;
    let mut sweep = if negative { start - end } else { end - start };
    sweep = sweep.rem_euclid(TAU);
    if sweep < 1e-9 {
        sweep = TAU;
    }
    if negative {
        -sweep
    } else {
        sweep
    }
}

/// Outline of a drawing record, or `None` for records without geometry
pub fn outline(
    record: &Record,
    state: &GraphicsState,
    mapper: &CoordinateMapper,
    adjust: StrokeAdjust,
) -> Result<Option<Outline>, MapperError> {
    let m = mapper.logical_to_pixel(state)?;
    let current = state.current_position.to_f64();

    let (ops, closed) = match record {
        Record::Rectangle(rect) => {
            let b = LogicalBox::new(rect, &m, adjust.inset);
            let mut t = Tracer::new(m, 0.0);
            t.move_to(PointF::new(b.left, b.top));
            t.line_to(PointF::new(b.right, b.top));
            t.line_to(PointF::new(b.right, b.bottom));
            t.line_to(PointF::new(b.left, b.bottom));
            t.close();
            (t.ops, true)
        }
        Record::RoundRect { rect, corner } => {
            let b = LogicalBox::new(rect, &m, adjust.inset);
            let (hw, hh) = b.radii();
            let rx = (corner.cx.unsigned_abs() as f64 / 2.0).min(hw).max(0.0);
            let ry = (corner.cy.unsigned_abs() as f64 / 2.0).min(hh).max(0.0);
            let mut t = Tracer::new(m, 0.0);
            t.move_to(PointF::new(b.left + rx, b.top));
            t.line_to(PointF::new(b.right - rx, b.top));
            t.arc(PointF::new(b.right - rx, b.top + ry), rx, ry, -FRAC_PI_2, FRAC_PI_2, true);
            t.line_to(PointF::new(b.right, b.bottom - ry));
            t.arc(PointF::new(b.right - rx, b.bottom - ry), rx, ry, 0.0, FRAC_PI_2, true);
            t.line_to(PointF::new(b.left + rx, b.bottom));
            t.arc(PointF::new(b.left + rx, b.bottom - ry), rx, ry, FRAC_PI_2, FRAC_PI_2, true);
            t.line_to(PointF::new(b.left, b.top + ry));
            t.arc(PointF::new(b.left + rx, b.top + ry), rx, ry, PI, FRAC_PI_2, true);
            t.close();
            (t.ops, true)
        }
        Record::Ellipse(rect) => {
            let b = LogicalBox::new(rect, &m, adjust.inset);
            let (rx, ry) = b.radii();
            let mut t = Tracer::new(m, 0.0);
            t.arc(b.center(), rx, ry, 0.0, TAU, false);
            t.close();
            (t.ops, true)
        }
        Record::Chord { rect, start, end } | Record::Pie { rect, start, end } => {
            let b = LogicalBox::new(rect, &m, adjust.inset);
            let (rx, ry) = b.radii();
            let t0 = b.angle_of(*start);
            let sweep = arc_sweep(t0, b.angle_of(*end), state, &m);
            let mut t = Tracer::new(m, 0.0);
            if matches!(record, Record::Pie { .. }) {
                t.move_to(b.center());
                t.arc(b.center(), rx, ry, t0, sweep, true);
            } else {
                t.arc(b.center(), rx, ry, t0, sweep, false);
            }
            t.close();
            (t.ops, true)
        }
        Record::Arc { rect, start, end } | Record::ArcTo { rect, start, end } => {
            let b = LogicalBox::new(rect, &m, 0.0);
            let (rx, ry) = b.radii();
            let t0 = b.angle_of(*start);
            let sweep = arc_sweep(t0, b.angle_of(*end), state, &m);
            let mut t = Tracer::new(m, adjust.shift);
            let connect = matches!(record, Record::ArcTo { .. });
            if connect {
                t.move_to(current);
            }
            t.arc(b.center(), rx, ry, t0, sweep, connect);
            (t.ops, false)
        }
        Record::AngleArc {
            center,
            radius,
            start_angle,
            sweep_angle,
        } => {
            let r = *radius as f64;
            // Angles count counterclockwise with y pointing down the page
            let t0 = -(*start_angle as f64).to_radians();
            let sweep = -(*sweep_angle as f64).to_radians();
            let mut t = Tracer::new(m, adjust.shift);
            t.move_to(current);
            t.arc(center.to_f64(), r, r, t0, sweep, true);
            (t.ops, false)
        }
        Record::LineTo(p) => {
            let mut t = Tracer::new(m, adjust.shift);
            t.move_to(current);
            t.line_to(p.to_f64());
            (t.ops, false)
        }
        Record::Poly { kind, points, .. } => {
            if points.is_empty() {
                return Ok(None);
            }
            let mut t = Tracer::new(m, adjust.shift);
            match kind {
                PolyKind::Polyline => t.polyline(points),
                PolyKind::Polygon => {
                    t.polyline(points);
                    t.close();
                }
                PolyKind::PolyBezier => {
                    t.move_to(points[0].to_f64());
                    t.beziers(&points[1..]);
                }
                PolyKind::PolylineTo => {
                    t.move_to(current);
                    for p in points {
                        t.line_to(p.to_f64());
                    }
                }
                PolyKind::PolyBezierTo => {
                    t.move_to(current);
                    t.beziers(points);
                }
            }
            (t.ops, *kind == PolyKind::Polygon)
        }
        Record::PolyPoly { closed, polys, .. } => {
            let mut t = Tracer::new(m, adjust.shift);
            for poly in polys.iter().filter(|p| !p.is_empty()) {
                t.polyline(poly);
                if *closed {
                    t.close();
                }
            }
            (t.ops, *closed)
        }
        Record::PolyDraw { points, types, .. } => {
            let mut t = Tracer::new(m, adjust.shift);
            t.move_to(current);
            let mut i = 0;
            while i < points.len() && i < types.len() {
                let kind = types[i] & !PT_CLOSEFIGURE;
                let mut close = types[i] & PT_CLOSEFIGURE != 0;
                if kind == PT_MOVETO {
                    t.move_to(points[i].to_f64());
                    i += 1;
                } else if kind == PT_LINETO {
                    t.line_to(points[i].to_f64());
                    i += 1;
                } else if kind == PT_BEZIERTO && i + 2 < points.len() && i + 2 < types.len() {
                    t.cubic_to(points[i].to_f64(), points[i + 1].to_f64(), points[i + 2].to_f64());
                    close = types[i + 2] & PT_CLOSEFIGURE != 0;
                    i += 3;
                } else {
                    break;
                }
                if close {
                    t.close();
                }
            }
            (t.ops, false)
        }
        _ => return Ok(None),
    };

    Ok(Some(Outline { ops, closed }))
}

/// Current position after a record, in logical units
pub fn end_position(record: &Record, state: &GraphicsState) -> Option<PointL> {
    let round = |p: PointF| PointL::new(p.x.round() as i32, p.y.round() as i32);
    match record {
        Record::MoveToEx(p) | Record::LineTo(p) => Some(*p),
        Record::Poly {
            kind: PolyKind::PolylineTo | PolyKind::PolyBezierTo,
            points,
            ..
        } => points.last().copied(),
        Record::PolyDraw { points, .. } => points.last().copied(),
        Record::ArcTo { rect, end, .. } => {
            let b = LogicalBox::new(rect, &XForm::identity(), 0.0);
            Some(round(b.point_at(b.angle_of(*end))))
        }
        Record::AngleArc {
            center,
            radius,
            start_angle,
            sweep_angle,
        } => {
            let a = ((*start_angle + *sweep_angle) as f64).to_radians();
            let r = *radius as f64;
            Some(round(PointF::new(center.x as f64 + r * a.cos(), center.y as f64 - r * a.sin())))
        }
        _ => None,
    }
}

/// Region rectangles in logical units as one pixel-space path
pub fn region_path(region: &RegionData, m: &XForm) -> Option<Path> {
    let mut t = Tracer::new(*m, 0.0);
    for r in &region.rects {
        let r = r.normalized();
        t.move_to(PointF::new(r.left as f64, r.top as f64));
        t.line_to(PointF::new(r.right as f64, r.top as f64));
        t.line_to(PointF::new(r.right as f64, r.bottom as f64));
        t.line_to(PointF::new(r.left as f64, r.bottom as f64));
        t.close();
    }
    to_path(&t.ops)
}

/// Logical rectangle as a closed pixel-space path
pub fn rect_path(rect: &RectL, m: &XForm) -> Option<Path> {
    region_path(
        &RegionData {
            bounds: *rect,
            rects: vec![*rect],
        },
        m,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EmfHeader;
    use crate::types::SizeL;

    fn mapper() -> CoordinateMapper {
        let header = EmfHeader {
            size: 88,
            bounds: RectL::new(0, 0, 99, 99),
            frame: RectL::new(0, 0, 2646, 2646),
            signature: crate::emf_records::ENHMETA_SIGNATURE,
            version: 0x10000,
            bytes: 100,
            records: 2,
            handles: 1,
            description: None,
            pal_entries: 0,
            device: SizeL::new(1920, 1920),
            millimeters: SizeL::new(508, 508),
            opengl: false,
            micrometers: None,
        };
        CoordinateMapper::new(&header, 96).unwrap()
    }

    fn last_point(ops: &[PathOp]) -> PointF {
        ops.iter()
            .rev()
            .find_map(|op| match op {
                PathOp::MoveTo(p) | PathOp::LineTo(p) | PathOp::CubicTo(_, _, p) => Some(*p),
                PathOp::Close => None,
            })
            .unwrap()
    }

    #[test]
    fn test_rectangle_inset() {
        let state = GraphicsState::default();
        let rec = Record::Rectangle(RectL::new(0, 0, 100, 100));
        let fill = outline(&rec, &state, &mapper(), StrokeAdjust::NONE).unwrap().unwrap();
        assert!(fill.closed);
        assert_eq!(fill.ops[0], PathOp::MoveTo(PointF::new(0.0, 0.0)));
        let stroke = outline(&rec, &state, &mapper(), StrokeAdjust::for_pen_width(1.0))
            .unwrap()
            .unwrap();
        assert_eq!(stroke.ops[0], PathOp::MoveTo(PointF::new(0.5, 0.5)));
        assert_eq!(stroke.ops[2], PathOp::LineTo(PointF::new(99.5, 99.5)));
    }

    #[test]
    fn test_line_to_starts_at_current_position() {
        let mut state = GraphicsState::default();
        state.current_position = PointL::new(10, 10);
        let o = outline(&Record::LineTo(PointL::new(20, 10)), &state, &mapper(), StrokeAdjust::NONE)
            .unwrap()
            .unwrap();
        assert_eq!(
            o.ops,
            vec![PathOp::MoveTo(PointF::new(10.0, 10.0)), PathOp::LineTo(PointF::new(20.0, 10.0))]
        );
        assert!(!o.closed);
    }

    #[test]
    fn test_arc_direction() {
        let mut state = GraphicsState::default();
        // Quarter arc from the right-hand point to the top point
        let rec = Record::Arc {
            rect: RectL::new(0, 0, 100, 100),
            start: PointL::new(100, 50),
            end: PointL::new(50, 0),
        };
        let ccw = outline(&rec, &state, &mapper(), StrokeAdjust::NONE).unwrap().unwrap();
        assert_eq!(ccw.ops.len(), 2);
        let end = last_point(&ccw.ops);
        assert!((end.x - 50.0).abs() < 1e-6 && end.y.abs() < 1e-6);

        state.arc_direction = AD_CLOCKWISE;
        let cw = outline(&rec, &state, &mapper(), StrokeAdjust::NONE).unwrap().unwrap();
        // Three quarters of the ellipse the other way round
        assert_eq!(cw.ops.len(), 4);
    }

    #[test]
    fn test_end_positions() {
        let state = GraphicsState::default();
        let rec = Record::Poly {
            kind: PolyKind::PolylineTo,
            bounds: RectL::default(),
            points: vec![PointL::new(1, 2), PointL::new(3, 4)],
        };
        assert_eq!(end_position(&rec, &state), Some(PointL::new(3, 4)));
        let arc = Record::AngleArc {
            center: PointL::new(0, 0),
            radius: 10,
            start_angle: 0.0,
            sweep_angle: 90.0,
        };
        assert_eq!(end_position(&arc, &state), Some(PointL::new(0, -10)));
        assert_eq!(end_position(&Record::Rectangle(RectL::default()), &state), None);
    }

    #[test]
    fn test_angle_arc_huge_sweep() {
        let state = GraphicsState::default();
        for sweep_angle in [f32::MAX, 1e9, -1e9] {
            let rec = Record::AngleArc {
                center: PointL::new(50, 50),
                radius: 20,
                start_angle: 0.0,
                sweep_angle,
            };
            let o = outline(&rec, &state, &mapper(), StrokeAdjust::NONE).unwrap().unwrap();
            // Move, line to the start, at most eight quarter segments
            assert!(o.ops.len() <= 10, "{} ops for sweep {}", o.ops.len(), sweep_angle);
        }
    }

    #[test]
    fn test_flatten_removes_curves() {
        let ops = vec![
            PathOp::MoveTo(PointF::new(0.0, 0.0)),
            PathOp::CubicTo(PointF::new(0.0, 10.0), PointF::new(10.0, 10.0), PointF::new(10.0, 0.0)),
        ];
        let flat = flatten(&ops);
        assert!(flat.iter().all(|op| !matches!(op, PathOp::CubicTo(..))));
        assert_eq!(last_point(&flat), PointF::new(10.0, 0.0));
    }
}
