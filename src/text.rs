//! Layout of ExtTextOut runs into pixel-space glyph paths

use crate::emf_records::*;
use crate::error::MapperError;
use crate::font_utils::{FontDescriptor, FontMetrics, GlyphOutline, GlyphOutlineProvider};
use crate::geometry::{self, PathOp};
use crate::mapper::CoordinateMapper;
use crate::record::{EmrText, LogFont};
use crate::state::GraphicsState;
use crate::types::{PointF, PointL, XForm};
use tiny_skia::Path;

/// 12 pt at the reference resolution, used when a font asks for height 0
const DEFAULT_EM_PIXELS: f64 = 16.0;

/// Everything the rasterizer needs to paint one text run
#[derive(Debug, Default)]
pub struct TextLayout {
    /// Glyph outlines plus underline and strikeout bars
    pub glyphs: Option<Path>,
    /// Character cells, painted with the background color in OPAQUE mode
    pub background: Option<Path>,
    /// ETO_OPAQUE rectangle
    pub opaque_rect: Option<Path>,
    /// ETO_CLIPPED rectangle
    pub clip_rect: Option<Path>,
    pub missing_glyphs: bool,
    /// New current position for TA_UPDATECP
    pub next_position: Option<PointL>,
}

/// Baseline direction and ascender direction of a run, in logical units
struct Frame {
    origin: PointF,
    dir: PointF,
    up: PointF,
}

impl Frame {
    fn at(&self, along: f64, rise: f64) -> PointF {
        PointF::new(
            self.origin.x + self.dir.x * along + self.up.x * rise,
            self.origin.y + self.dir.y * along + self.up.y * rise,
        )
    }
}

/// Em size of `font` in logical units
fn em_size(font: &LogFont, metrics: &FontMetrics, m: &XForm, mapper: &CoordinateMapper) -> f64 {
    match font.height {
        h if h < 0 => -(h as f64),
        h if h > 0 => {
            let cell = metrics.ascent + metrics.descent;
            if cell > 0.0 {
                h as f64 / cell
            } else {
                h as f64
            }
        }
        _ => {
            let scale = m.mean_scale();
            if scale > 0.0 {
                DEFAULT_EM_PIXELS * mapper.pixel_scale() / scale
            } else {
                DEFAULT_EM_PIXELS
            }
        }
    }
}

pub fn layout(
    text: &EmrText,
    font: &LogFont,
    state: &GraphicsState,
    mapper: &CoordinateMapper,
    provider: &dyn GlyphOutlineProvider,
) -> Result<TextLayout, MapperError> {
    let m = mapper.logical_to_pixel(state)?;
    let mut out = TextLayout::default();

    if text.options & ETO_OPAQUE != 0 {
        out.opaque_rect = text.rect.as_ref().and_then(|r| geometry::rect_path(r, &m));
    }
    if text.options & ETO_CLIPPED != 0 {
        out.clip_rect = text.rect.as_ref().and_then(|r| geometry::rect_path(r, &m));
    }
    if text.text.is_empty() {
        return Ok(out);
    }

    let descriptor = FontDescriptor::from_log_font(font);
    let metrics = provider.metrics(&descriptor);
    let em = em_size(font, &metrics, &m, mapper);
    let stretch = if font.width != 0 && metrics.avg_char_width > 0.0 {
        font.width.unsigned_abs() as f64 / (em * metrics.avg_char_width)
    } else {
        1.0
    };

    // y grows downwards on the output unless the mapping flips it
    let flipped = m.determinant() < 0.0;
    let angle = (font.escapement as f64 / 10.0).to_radians();
    let dir = PointF::new(angle.cos(), if flipped { angle.sin() } else { -angle.sin() });
    let up = if flipped {
        PointF::new(-dir.y, dir.x)
    } else {
        PointF::new(dir.y, -dir.x)
    };

    let glyph_index = text.options & ETO_GLYPH_INDEX != 0;
    let mut glyphs: Vec<(Option<GlyphOutline>, f64)> = Vec::new();
    // Dx holds one advance per UTF-16 code unit
    let mut unit = 0;
    for ch in text.text.chars() {
        let outline = if glyph_index {
            provider.outline_by_index(&descriptor, ch as u32 as u16)
        } else {
            provider.outline(&descriptor, ch)
        };
        if outline.is_none() && !ch.is_whitespace() && !ch.is_control() {
            out.missing_glyphs = true;
        }
        let units = ch.len_utf16();
        let advance = match text.dx.get(unit..unit + units) {
            Some(dx) => dx.iter().map(|d| *d as f64).sum(),
            None => {
                outline.as_ref().map_or(metrics.avg_char_width, |g| g.advance) * em * stretch
            }
        };
        unit += units;
        glyphs.push((outline, advance));
    }
    let width: f64 = glyphs.iter().map(|(_, a)| a).sum();

    let updates_cp = state.text_align & TA_UPDATECP != 0;
    let reference = if updates_cp {
        state.current_position
    } else {
        text.reference
    }
    .to_f64();

    let along = match state.text_align & TA_CENTER {
        TA_CENTER => -width / 2.0,
        TA_RIGHT => -width,
        _ => 0.0,
    };
    let rise = match state.text_align & TA_BASELINE {
        TA_BASELINE => 0.0,
        TA_BOTTOM => metrics.descent * em,
        _ => -metrics.ascent * em,
    };
    let frame = Frame {
        origin: PointF::new(
            reference.x + dir.x * along + up.x * rise,
            reference.y + dir.y * along + up.y * rise,
        ),
        dir,
        up,
    };

    let mut ops = Vec::new();
    let mut pen = 0.0;
    for (outline, advance) in &glyphs {
        if let Some(outline) = outline {
            let o = frame.at(pen, 0.0);
            let g = XForm::new(
                dir.x * em * stretch,
                dir.y * em * stretch,
                up.x * em,
                up.y * em,
                o.x,
                o.y,
            )
            .then(&m);
            ops.extend(outline.ops.iter().map(|op| map_op(op, &g)));
        }
        pen += advance;
    }

    let mut bar = |position: f64, thickness: f64| {
        let (lo, hi) = ((position - thickness / 2.0) * em, (position + thickness / 2.0) * em);
        quad(&mut ops, &frame, &m, width, lo, hi);
    };
    if font.underline {
        bar(metrics.underline_position, metrics.underline_thickness);
    }
    if font.strike_out {
        bar(metrics.strikeout_position, metrics.strikeout_thickness);
    }
    out.glyphs = geometry::to_path(&ops);

    if state.bk_mode == OPAQUE {
        let mut cell = Vec::new();
        quad(&mut cell, &frame, &m, width, -metrics.descent * em, metrics.ascent * em);
        out.background = geometry::to_path(&cell);
    }

    if updates_cp {
        let advance = match state.text_align & TA_CENTER {
            TA_CENTER => 0.0,
            TA_RIGHT => -width,
            _ => width,
        };
        out.next_position = Some(PointL::new(
            (reference.x + dir.x * advance).round() as i32,
            (reference.y + dir.y * advance).round() as i32,
        ));
    }

    Ok(out)
}

fn map_op(op: &PathOp, m: &XForm) -> PathOp {
    match *op {
        PathOp::MoveTo(p) => PathOp::MoveTo(m.apply(p)),
        PathOp::LineTo(p) => PathOp::LineTo(m.apply(p)),
        PathOp::CubicTo(a, b, c) => PathOp::CubicTo(m.apply(a), m.apply(b), m.apply(c)),
        PathOp::Close => PathOp::Close,
    }
}

/// Band along the baseline between two rises, as a closed figure
fn quad(ops: &mut Vec<PathOp>, frame: &Frame, m: &XForm, width: f64, lo: f64, hi: f64) {
    ops.push(PathOp::MoveTo(m.apply(frame.at(0.0, lo))));
    ops.push(PathOp::LineTo(m.apply(frame.at(width, lo))));
    ops.push(PathOp::LineTo(m.apply(frame.at(width, hi))));
    ops.push(PathOp::LineTo(m.apply(frame.at(0.0, hi))));
    ops.push(PathOp::Close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EmfHeader;
    use crate::types::{RectL, SizeL};

    /// Every glyph is a unit-advance box from the baseline to 0.5 em
    struct BoxGlyphs;

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

    fn mapper() -> CoordinateMapper {
        let header = EmfHeader {
            size: 88,
            bounds: RectL::new(0, 0, 199, 199),
            frame: RectL::new(0, 0, 5292, 5292),
            signature: ENHMETA_SIGNATURE,
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

    fn font(height: i32) -> LogFont {
        LogFont {
            height,
            width: 0,
            escapement: 0,
            orientation: 0,
            weight: 400,
            italic: false,
            underline: false,
            strike_out: false,
            charset: 0,
            face_name: "Arial".to_string(),
        }
    }

    fn run(text: &str, dx: Vec<i32>) -> EmrText {
        EmrText {
            reference: PointL::new(10, 50),
            options: 0,
            rect: None,
            text: text.to_string(),
            dx,
        }
    }

    fn bounds(path: &Path) -> (f32, f32, f32, f32) {
        let b = path.bounds();
        (b.left(), b.top(), b.right(), b.bottom())
    }

    fn close(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> bool {
        (a.0 - b.0).abs() < 0.01 && (a.1 - b.1).abs() < 0.01 && (a.2 - b.2).abs() < 0.01 && (a.3 - b.3).abs() < 0.01
    }

    #[test]
    fn test_top_aligned_run() {
        let mut state = GraphicsState::default();
        state.bk_mode = TRANSPARENT;
        let out = layout(&run("ab", vec![]), &font(-20), &state, &mapper(), &BoxGlyphs).unwrap();
        // Top alignment puts the baseline 15 units (ascent) below the reference
        let glyphs = out.glyphs.unwrap();
        assert!(close(bounds(&glyphs), (10.0, 55.0, 50.0, 65.0)));
        assert!(out.background.is_none());
        assert!(!out.missing_glyphs);
        assert!(out.next_position.is_none());
    }

    #[test]
    fn test_baseline_right_alignment_with_dx() {
        let mut state = GraphicsState::default();
        state.text_align = TA_BASELINE | TA_RIGHT;
        let out = layout(&run("ab", vec![30, 30]), &font(-20), &state, &mapper(), &BoxGlyphs).unwrap();
        // The run is 60 units wide and ends at x = 10; the second glyph starts 30 units in
        assert!(close(bounds(&out.glyphs.unwrap()), (-50.0, 40.0, 0.0, 50.0)));
        assert!(close(bounds(&out.background.unwrap()), (-50.0, 35.0, 10.0, 55.0)));
    }

    #[test]
    fn test_update_cp_and_missing_glyph() {
        let mut state = GraphicsState::default();
        state.text_align = TA_UPDATECP | TA_BASELINE;
        state.current_position = PointL::new(5, 5);
        let out = layout(&run("a?", vec![]), &font(-10), &state, &mapper(), &BoxGlyphs).unwrap();
        assert!(out.missing_glyphs);
        // 10 for the box glyph plus the average width fallback of 5
        assert_eq!(out.next_position, Some(PointL::new(20, 5)));
    }

    #[test]
    fn test_dx_follows_utf16_units() {
        let mut state = GraphicsState::default();
        state.text_align = TA_UPDATECP | TA_BASELINE;
        state.current_position = PointL::new(5, 5);
        // The astral character takes two code units and two Dx entries
        let out = layout(&run("a\u{1F600}b", vec![30, 25, 15, 30]), &font(-20), &state, &mapper(), &BoxGlyphs).unwrap();
        assert_eq!(out.next_position, Some(PointL::new(105, 5)));
    }

    #[test]
    fn test_escapement_rotates_run() {
        let mut state = GraphicsState::default();
        state.text_align = TA_BASELINE;
        state.bk_mode = TRANSPARENT;
        let mut f = font(-20);
        f.escapement = 900;
        let out = layout(&run("a", vec![]), &f, &state, &mapper(), &BoxGlyphs).unwrap();
        // The baseline runs up the page, glyph tops point left
        assert!(close(bounds(&out.glyphs.unwrap()), (0.0, 30.0, 10.0, 50.0)));
    }

    #[test]
    fn test_opaque_rect_without_text() {
        let mut state = GraphicsState::default();
        state.bk_mode = TRANSPARENT;
        let mut t = run("", vec![]);
        t.options = ETO_OPAQUE;
        t.rect = Some(RectL::new(0, 0, 20, 10));
        let out = layout(&t, &font(-20), &state, &mapper(), &BoxGlyphs).unwrap();
        assert!(out.glyphs.is_none());
        assert!(close(bounds(&out.opaque_rect.unwrap()), (0.0, 0.0, 20.0, 10.0)));
    }
}
