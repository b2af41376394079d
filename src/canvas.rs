//! Pixel buffer and the painting of drawing records

use crate::bitmap::{BitmapDecoder, DibHeader};
use crate::converter::ResampleFilter;
use crate::emf_records::*;
use crate::error::{ConvertError, ConvertResult, WarningKind};
use crate::font_utils::GlyphOutlineProvider;
use crate::geometry::{self, StrokeAdjust};
use crate::mapper::CoordinateMapper;
use crate::objects::{Brush, LineCap, LineJoin, ObjectKind, Pen, PenStyle};
use crate::record::{Blit, EmrText, Record, RegionData};
use crate::state::{mapper_warning, GraphicsState, StateMachine};
use crate::text;
use crate::types::{ColorRef, PointL, RectL, XForm};
use image::RgbaImage;
use std::borrow::Cow;
use std::sync::Arc;
use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, IntSize, Mask, Paint, Path, Pattern, Pixmap, SpreadMode, Stroke,
    StrokeDash, Transform,
};

/// RGBA canvas every conversion paints into, opaque white when created
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pixmap: Pixmap,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> ConvertResult<Self> {
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| ConvertError::Encode(format!("cannot allocate a {}x{} pixel buffer", width, height)))?;
        pixmap.fill(Color::WHITE);
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Straight (non-premultiplied) RGBA of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let c = self.pixmap.pixel(x, y)?.demultiply();
        Some([c.red(), c.green(), c.blue(), c.alpha()])
    }

    /// Straight RGBA rows, top to bottom
    pub fn to_rgba(&self) -> Vec<u8> {
        self.pixmap
            .pixels()
            .iter()
            .flat_map(|p| {
                let c = p.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect()
    }

    fn fill(&mut self, path: &Path, paint: &Paint<'_>, rule: FillRule, clip: Option<&Mask>) {
        self.pixmap.fill_path(path, paint, rule, Transform::identity(), clip);
    }

    fn stroke(&mut self, path: &Path, paint: &Paint<'_>, stroke: &Stroke, transform: Transform, clip: Option<&Mask>) {
        self.pixmap.stroke_path(path, paint, stroke, transform, clip);
    }
}

/// Pen width in output pixels
pub fn pen_width(pen: &Pen, m: &XForm, mapper: &CoordinateMapper) -> f64 {
    if pen.cosmetic || pen.width == 0 {
        mapper.pixel_scale().max(1.0)
    } else {
        (pen.width as f64 * m.mean_scale()).max(1.0)
    }
}

/// tiny-skia stroke settings for `pen` under the logical to pixel matrix `m`
pub fn pen_stroke(pen: &Pen, m: &XForm, mapper: &CoordinateMapper, miter_limit: f64) -> Stroke {
    let width = pen_width(pen, m, mapper);
    let mut stroke = Stroke {
        width: width as f32,
        miter_limit: miter_limit.max(1.0) as f32,
        ..Stroke::default()
    };
    if pen.cosmetic {
        stroke.line_cap = tiny_skia::LineCap::Butt;
        stroke.line_join = tiny_skia::LineJoin::Miter;
    } else {
        stroke.line_cap = match pen.cap {
            LineCap::Round => tiny_skia::LineCap::Round,
            LineCap::Square => tiny_skia::LineCap::Square,
            LineCap::Flat => tiny_skia::LineCap::Butt,
        };
        stroke.line_join = match pen.join {
            LineJoin::Round => tiny_skia::LineJoin::Round,
            LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
            LineJoin::Miter => tiny_skia::LineJoin::Miter,
        };
    }
    stroke.dash = dash_pattern(pen, width, m, mapper).and_then(|d| StrokeDash::new(d, 0.0));
    stroke
}

fn dash_pattern(pen: &Pen, width: f64, m: &XForm, mapper: &CoordinateMapper) -> Option<Vec<f32>> {
    let cosmetic = mapper.pixel_scale();
    let (unit, lengths): (f64, Vec<f64>) = match (pen.style, pen.cosmetic) {
        (PenStyle::Dash, true) => (cosmetic, vec![18.0, 6.0]),
        (PenStyle::Dot, true) => (cosmetic, vec![3.0, 3.0]),
        (PenStyle::DashDot, true) => (cosmetic, vec![9.0, 6.0, 3.0, 6.0]),
        (PenStyle::DashDotDot, true) => (cosmetic, vec![9.0, 3.0, 3.0, 3.0, 3.0, 3.0]),
        (PenStyle::Dash, false) => (width, vec![3.0, 1.0]),
        (PenStyle::Dot, false) => (width, vec![1.0, 1.0]),
        (PenStyle::DashDot, false) => (width, vec![3.0, 1.0, 1.0, 1.0]),
        (PenStyle::DashDotDot, false) => (width, vec![3.0, 1.0, 1.0, 1.0, 1.0, 1.0]),
        (PenStyle::Alternate, _) => (cosmetic, vec![1.0, 1.0]),
        (PenStyle::UserStyle, cosmetic_pen) if !pen.style_entries.is_empty() => {
            let unit = if cosmetic_pen { cosmetic } else { m.mean_scale() };
            let mut lengths: Vec<f64> = pen.style_entries.iter().map(|&e| e as f64).collect();
            if lengths.len() % 2 == 1 {
                lengths.extend_from_within(..);
            }
            (unit, lengths)
        }
        _ => return None,
    };
    Some(lengths.iter().map(|l| (l * unit).max(0.5) as f32).collect())
}

/// Resolved brush ready to build a paint from
enum Fill {
    Solid(Color),
    Pattern { pixmap: Pixmap, transform: Transform },
}

impl Fill {
    fn paint(&self, blend: BlendMode, anti_alias: bool) -> Paint<'_> {
        let mut paint = Paint {
            anti_alias,
            blend_mode: blend,
            ..Paint::default()
        };
        match self {
            Fill::Solid(color) => paint.set_color(*color),
            Fill::Pattern { pixmap, transform } => {
                paint.shader = Pattern::new(
                    pixmap.as_ref(),
                    SpreadMode::Repeat,
                    FilterQuality::Nearest,
                    1.0,
                    *transform,
                );
            }
        }
        paint
    }
}

/// Blend mode and color override of a SetROP2 mode; `None` paints nothing
fn rop2_mode(rop2: u32) -> Option<(BlendMode, Option<Color>)> {
    match rop2 {
        R2_NOP => None,
        R2_BLACK => Some((BlendMode::SourceOver, Some(Color::BLACK))),
        R2_WHITE => Some((BlendMode::SourceOver, Some(Color::WHITE))),
        R2_NOT => Some((BlendMode::Difference, Some(Color::WHITE))),
        R2_XORPEN => Some((BlendMode::Difference, None)),
        R2_MASKPEN => Some((BlendMode::Multiply, None)),
        R2_MERGEPEN => Some((BlendMode::Lighten, None)),
        _ => Some((BlendMode::SourceOver, None)),
    }
}

/// Source-combining raster operations approximated by blend modes
fn rop3_blend(rop: u32) -> BlendMode {
    match rop {
        SRCAND => BlendMode::Multiply,
        SRCPAINT => BlendMode::Lighten,
        SRCINVERT => BlendMode::Difference,
        _ => BlendMode::SourceOver,
    }
}

/// Decoded RGBA image to a premultiplied pixmap
fn image_to_pixmap(image: RgbaImage, alpha: AlphaHandling) -> Option<Pixmap> {
    let size = IntSize::from_wh(image.width(), image.height())?;
    let mut data = image.into_raw();
    for px in data.chunks_exact_mut(4) {
        match alpha {
            AlphaHandling::Opaque => px[3] = 255,
            AlphaHandling::Premultiplied => {
                let a = px[3];
                for c in &mut px[..3] {
                    *c = (*c).min(a);
                }
            }
        }
    }
    Pixmap::from_vec(data, size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlphaHandling {
    Opaque,
    Premultiplied,
}

/// Executes drawing records against a [`PixelBuffer`]
pub struct Rasterizer {
    buffer: PixelBuffer,
    glyphs: Arc<dyn GlyphOutlineProvider>,
    bitmaps: Arc<dyn BitmapDecoder>,
    filter: ResampleFilter,
}

impl Rasterizer {
    pub fn new(
        buffer: PixelBuffer,
        glyphs: Arc<dyn GlyphOutlineProvider>,
        bitmaps: Arc<dyn BitmapDecoder>,
        filter: ResampleFilter,
    ) -> Self {
        Self {
            buffer,
            glyphs,
            bitmaps,
            filter,
        }
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }

    /// Paint `record` with the state in effect before it. Returns the new
    /// current position when text output moved it.
    pub fn paint(
        &mut self,
        record: &Record,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) -> Option<PointL> {
        // Geometry inside a path bracket only feeds the path
        if sm.path().is_open() || !record.is_drawing() {
            return None;
        }

        match record {
            Record::SetPixelV { point, color } => self.set_pixel(*point, *color, sm, mapper, sink),
            Record::FillPath(_) => self.paint_bracket(sm, mapper, sink, true, false),
            Record::StrokePath(_) => self.paint_bracket(sm, mapper, sink, false, true),
            Record::StrokeAndFillPath(_) => self.paint_bracket(sm, mapper, sink, true, true),
            Record::FillRgn { brush, region, .. } => match sm.objects().reference(*brush) {
                Ok((reference, ObjectKind::Brush)) => {
                    let brush = sm.objects().brush(&reference);
                    self.fill_region(region, &brush, sm, mapper, sink);
                }
                Ok(_) => sink.push(WarningKind::InvalidHandle(*brush)),
                Err(_) => sink.push(WarningKind::UnknownHandle(*brush)),
            },
            Record::PaintRgn { region, .. } => {
                let brush = sm.brush();
                self.fill_region(region, &brush, sm, mapper, sink);
            }
            Record::FrameRgn {
                brush, width, region, ..
            } => match sm.objects().reference(*brush) {
                Ok((reference, ObjectKind::Brush)) => {
                    let brush = sm.objects().brush(&reference);
                    let frames = frame_rects(region, width.cx, width.cy);
                    self.fill_region(&frames, &brush, sm, mapper, sink);
                }
                Ok(_) => sink.push(WarningKind::InvalidHandle(*brush)),
                Err(_) => sink.push(WarningKind::UnknownHandle(*brush)),
            },
            Record::InvertRgn { region, .. } => self.invert_region(region, sm, mapper, sink),
            Record::BitBlt(blit) | Record::StretchBlt(blit) => self.blit(blit, BlitSource::Dc, sm, mapper, sink),
            Record::StretchDibits(blit) | Record::SetDibitsToDevice(blit) => {
                self.blit(blit, BlitSource::Dib, sm, mapper, sink)
            }
            Record::AlphaBlend(blit) => self.blit(blit, BlitSource::Alpha, sm, mapper, sink),
            Record::ExtTextOut { text, .. } => return self.draw_text(text, sm, mapper, sink),
            Record::PolyTextOut { texts, .. } => {
                let mut moved = None;
                for text in texts {
                    moved = self.draw_text(text, sm, mapper, sink).or(moved);
                }
                return moved;
            }
            _ => self.draw_shape(record, sm, mapper, sink),
        }
        None
    }

    /// Brush as a paint source; `None` for hollow brushes and undecodable patterns
    fn brush_fill(
        &self,
        brush: &Brush,
        state: &GraphicsState,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) -> Option<Fill> {
        let scale = mapper.pixel_scale() as f32;
        let origin = mapper.device_to_pixel().apply(state.brush_org.to_f64());
        let transform = Transform::from_row(scale, 0.0, 0.0, scale, origin.x as f32, origin.y as f32);
        match brush {
            Brush::Null => None,
            Brush::Solid(color) => Some(Fill::Solid(color.to_skia())),
            Brush::Hatched { color, hatch } => {
                let mut pixmap = Pixmap::new(8, 8)?;
                let fg = [color.red(), color.green(), color.blue(), 255];
                let bk = state.bk_color;
                let bg = if state.bk_mode == OPAQUE {
                    [bk.red(), bk.green(), bk.blue(), 255]
                } else {
                    [0, 0, 0, 0]
                };
                for (i, px) in pixmap.data_mut().chunks_exact_mut(4).enumerate() {
                    let (x, y) = (i as u32 % 8, i as u32 / 8);
                    px.copy_from_slice(if hatch.is_set(x, y) { &fg } else { &bg });
                }
                Some(Fill::Pattern { pixmap, transform })
            }
            Brush::Pattern { dib, monochrome } => {
                let image = match self.bitmaps.decode(&dib.bmi, &dib.bits, dib.usage, &sm.palette()) {
                    Ok(image) => image,
                    Err(e) => {
                        sink.push(WarningKind::UnsupportedBitmap(e.to_string()));
                        return None;
                    }
                };
                let image = if *monochrome {
                    let (fg, bg) = (state.text_color, state.bk_color);
                    let mut image = image;
                    for px in image.pixels_mut() {
                        let luma = (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000;
                        let c = if luma < 128 { fg } else { bg };
                        *px = image::Rgba([c.red(), c.green(), c.blue(), 255]);
                    }
                    image
                } else {
                    image
                };
                let pixmap = image_to_pixmap(image, AlphaHandling::Opaque)?;
                Some(Fill::Pattern { pixmap, transform })
            }
        }
    }

    fn fill_with_brush(
        &mut self,
        path: &Path,
        brush: &Brush,
        rule: FillRule,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) {
        let state = sm.state();
        let Some((blend, color)) = rop2_mode(state.rop2) else {
            return;
        };
        let fill = match color {
            Some(color) if !brush.is_null() => Some(Fill::Solid(color)),
            _ => self.brush_fill(brush, state, sm, mapper, sink),
        };
        if let Some(fill) = fill {
            self.buffer
                .fill(path, &fill.paint(blend, true), rule, state.clip.mask());
        }
    }

    fn stroke_with_pen(
        &mut self,
        path: &Path,
        pen: &Pen,
        m: &XForm,
        transform: Transform,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
    ) {
        let state = sm.state();
        let Some((blend, color)) = rop2_mode(state.rop2) else {
            return;
        };
        let fill = Fill::Solid(color.unwrap_or_else(|| pen.color.to_skia()));
        let stroke = pen_stroke(pen, m, mapper, state.miter_limit);
        self.buffer
            .stroke(path, &fill.paint(blend, true), &stroke, transform, state.clip.mask());
    }

    /// Lines, curves and closed shapes
    fn draw_shape(&mut self, record: &Record, sm: &StateMachine, mapper: &CoordinateMapper, sink: &mut Vec<WarningKind>) {
        let state = sm.state();
        let m = match mapper.logical_to_pixel(state) {
            Ok(m) => m,
            Err(e) => {
                sink.push(mapper_warning(e));
                return;
            }
        };

        let fill_outline = match geometry::outline(record, state, mapper, StrokeAdjust::NONE) {
            Ok(Some(outline)) => outline,
            Ok(None) => return,
            Err(e) => {
                sink.push(mapper_warning(e));
                return;
            }
        };
        if fill_outline.closed {
            let brush = sm.brush();
            if let Some(path) = fill_outline.to_path() {
                self.fill_with_brush(&path, &brush, state.fill_rule(), sm, mapper, sink);
            }
        }

        let pen = sm.pen();
        if pen.is_null() {
            return;
        }
        let adjust = StrokeAdjust::for_pen_width(pen_width(&pen, &m, mapper));
        if let Ok(Some(outline)) = geometry::outline(record, state, mapper, adjust) {
            if let Some(path) = outline.to_path() {
                self.stroke_with_pen(&path, &pen, &m, Transform::identity(), sm, mapper);
            }
        }
    }

    fn paint_bracket(
        &mut self,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
        fill: bool,
        stroke: bool,
    ) {
        let Some(path) = sm.path().to_path() else {
            return;
        };
        let state = sm.state();
        if fill {
            let brush = sm.brush();
            self.fill_with_brush(&path, &brush, state.fill_rule(), sm, mapper, sink);
        }
        if stroke {
            let pen = sm.pen();
            if pen.is_null() {
                return;
            }
            match mapper.logical_to_pixel(state) {
                Ok(m) => {
                    // Bracket geometry sits on pixel corners; strokes go through pixel centers
                    let shift = Transform::from_translate(0.5, 0.5);
                    self.stroke_with_pen(&path, &pen, &m, shift, sm, mapper);
                }
                Err(e) => sink.push(mapper_warning(e)),
            }
        }
    }

    fn set_pixel(
        &mut self,
        point: PointL,
        color: ColorRef,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) {
        let state = sm.state();
        let p = match mapper.to_device_pixels(point.to_f64(), state) {
            Ok(p) => p,
            Err(e) => {
                sink.push(mapper_warning(e));
                return;
            }
        };
        let size = mapper.pixel_scale().round().max(1.0) as f32;
        let Some(rect) = tiny_skia::Rect::from_xywh(p.x.round() as f32, p.y.round() as f32, size, size) else {
            return;
        };
        let path = tiny_skia::PathBuilder::from_rect(rect);
        let fill = Fill::Solid(color.to_skia());
        self.buffer
            .fill(&path, &fill.paint(BlendMode::SourceOver, false), FillRule::Winding, state.clip.mask());
    }

    fn fill_region(
        &mut self,
        region: &RegionData,
        brush: &Brush,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) {
        let state = sm.state();
        match mapper.logical_to_pixel(state) {
            Ok(m) => {
                if let Some(path) = geometry::region_path(region, &m) {
                    self.fill_with_brush(&path, brush, FillRule::EvenOdd, sm, mapper, sink);
                }
            }
            Err(e) => sink.push(mapper_warning(e)),
        }
    }

    fn invert_region(&mut self, region: &RegionData, sm: &StateMachine, mapper: &CoordinateMapper, sink: &mut Vec<WarningKind>) {
        let state = sm.state();
        match mapper.logical_to_pixel(state) {
            Ok(m) => {
                if let Some(path) = geometry::region_path(region, &m) {
                    let fill = Fill::Solid(Color::WHITE);
                    self.buffer.fill(
                        &path,
                        &fill.paint(BlendMode::Difference, false),
                        FillRule::EvenOdd,
                        state.clip.mask(),
                    );
                }
            }
            Err(e) => sink.push(mapper_warning(e)),
        }
    }

    fn blit(
        &mut self,
        blit: &Blit,
        source_kind: BlitSource,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) {
        let state = sm.state();
        let m = match mapper.logical_to_pixel(state) {
            Ok(m) => m,
            Err(e) => {
                sink.push(mapper_warning(e));
                return;
            }
        };
        let dest = RectL::new(
            blit.dest.x,
            blit.dest.y,
            blit.dest.x.saturating_add(blit.dest_size.cx),
            blit.dest.y.saturating_add(blit.dest_size.cy),
        );
        let Some(dest_path) = geometry::rect_path(&dest, &m) else {
            return;
        };
        let clip = state.clip.mask();

        let Some(dib) = &blit.source else {
            // Pattern and constant raster operations
            match blit.rop {
                NOP_ROP => {}
                BLACKNESS | WHITENESS => {
                    let color = if blit.rop == BLACKNESS { Color::BLACK } else { Color::WHITE };
                    let fill = Fill::Solid(color);
                    self.buffer
                        .fill(&dest_path, &fill.paint(BlendMode::SourceOver, false), FillRule::Winding, clip);
                }
                DSTINVERT => {
                    let fill = Fill::Solid(Color::WHITE);
                    self.buffer
                        .fill(&dest_path, &fill.paint(BlendMode::Difference, false), FillRule::Winding, clip);
                }
                PATCOPY | PATINVERT => {
                    let blend = if blit.rop == PATINVERT {
                        BlendMode::Difference
                    } else {
                        BlendMode::SourceOver
                    };
                    let brush = sm.brush();
                    if let Some(fill) = self.brush_fill(&brush, state, sm, mapper, sink) {
                        self.buffer.fill(&dest_path, &fill.paint(blend, false), FillRule::Winding, clip);
                    }
                }
                other => log::debug!("Blit without a source bitmap, rop {:#010x}", other),
            }
            return;
        };

        let image = match self.bitmaps.decode(&dib.bmi, &dib.bits, dib.usage, &sm.palette()) {
            Ok(image) => image,
            Err(e) => {
                sink.push(WarningKind::UnsupportedBitmap(e.to_string()));
                return;
            }
        };

        // Source rectangle in top-down image pixels
        let (mut sx, mut sy) = (blit.src.x as f64, blit.src.y as f64);
        let (mut sw, mut sh) = (blit.src_size.cx as f64, blit.src_size.cy as f64);
        match source_kind {
            BlitSource::Dib => {
                let bottom_up = DibHeader::parse(&dib.bmi).map(|h| h.is_bottom_up()).unwrap_or(false);
                if bottom_up {
                    sy = image.height() as f64 - sy - sh;
                }
            }
            BlitSource::Dc | BlitSource::Alpha => {
                let src = blit.xform_src.apply(blit.src.to_f64());
                sx = src.x;
                sy = src.y;
                sw *= blit.xform_src.m11;
                sh *= blit.xform_src.m22;
            }
        }
        if sw == 0.0 || sh == 0.0 {
            return;
        }

        let alpha = match source_kind {
            BlitSource::Alpha if (blit.rop >> 24) & AC_SRC_ALPHA != 0 => AlphaHandling::Premultiplied,
            _ => AlphaHandling::Opaque,
        };
        let Some(pixmap) = image_to_pixmap(image, alpha) else {
            return;
        };
        let (opacity, blend) = match source_kind {
            BlitSource::Alpha => (blit.constant_alpha() as f32 / 255.0, BlendMode::SourceOver),
            _ => (1.0, rop3_blend(blit.rop)),
        };

        let image_to_pixel = XForm::translate(-sx, -sy)
            .then(&XForm::scale(blit.dest_size.cx as f64 / sw, blit.dest_size.cy as f64 / sh))
            .then(&XForm::translate(blit.dest.x as f64, blit.dest.y as f64))
            .then(&m);
        let quality = match self.filter {
            ResampleFilter::Nearest => FilterQuality::Nearest,
            ResampleFilter::Bilinear => FilterQuality::Bilinear,
        };
        let paint = Paint {
            shader: Pattern::new(pixmap.as_ref(), SpreadMode::Pad, quality, opacity, image_to_pixel.to_skia()),
            blend_mode: blend,
            anti_alias: false,
            ..Paint::default()
        };
        self.buffer.fill(&dest_path, &paint, FillRule::Winding, clip);
    }

    fn draw_text(
        &mut self,
        text: &EmrText,
        sm: &StateMachine,
        mapper: &CoordinateMapper,
        sink: &mut Vec<WarningKind>,
    ) -> Option<PointL> {
        let state = sm.state();
        let font = sm.font();
        let layout = match text::layout(text, &font, state, mapper, self.glyphs.as_ref()) {
            Ok(layout) => layout,
            Err(e) => {
                sink.push(mapper_warning(e));
                return None;
            }
        };
        if layout.missing_glyphs {
            sink.push(WarningKind::MissingGlyphs);
        }

        let bk = Fill::Solid(state.bk_color.to_skia());
        if let Some(rect) = &layout.opaque_rect {
            self.buffer
                .fill(rect, &bk.paint(BlendMode::SourceOver, false), FillRule::Winding, state.clip.mask());
        }

        let clip = match &layout.clip_rect {
            Some(rect) => {
                let mut clip = state.clip.clone();
                clip.combine_path(rect, FillRule::Winding, RGN_AND);
                Cow::Owned(clip)
            }
            None => Cow::Borrowed(&state.clip),
        };
        if let Some(cells) = &layout.background {
            self.buffer
                .fill(cells, &bk.paint(BlendMode::SourceOver, true), FillRule::Winding, clip.mask());
        }
        if let Some(glyphs) = &layout.glyphs {
            let fg = Fill::Solid(state.text_color.to_skia());
            self.buffer
                .fill(glyphs, &fg.paint(BlendMode::SourceOver, true), FillRule::Winding, clip.mask());
        }
        layout.next_position
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlitSource {
    /// BitBlt/StretchBlt: source rectangle in source device units
    Dc,
    /// StretchDIBits/SetDIBitsToDevice: source rectangle in DIB scanlines
    Dib,
    Alpha,
}

/// FrameRgn borders as rectangles
fn frame_rects(region: &RegionData, cx: i32, cy: i32) -> RegionData {
    let (cx, cy) = (cx.max(1), cy.max(1));
    let mut rects = Vec::new();
    for r in &region.rects {
        let r = r.normalized();
        if r.width() <= 2 * cx as i64 || r.height() <= 2 * cy as i64 {
            rects.push(r);
            continue;
        }
        rects.push(RectL::new(r.left, r.top, r.right, r.top + cy));
        rects.push(RectL::new(r.left, r.bottom - cy, r.right, r.bottom));
        rects.push(RectL::new(r.left, r.top + cy, r.left + cx, r.bottom - cy));
        rects.push(RectL::new(r.right - cx, r.top + cy, r.right, r.bottom - cy));
    }
    RegionData {
        bounds: region.bounds,
        rects,
    }
}
