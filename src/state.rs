//! GDI graphics state and the records that change it

use crate::canvas::pen_stroke;
use crate::clip::ClipRegion;
use crate::emf_records::*;
use crate::error::{MapperError, WarningKind};
use crate::geometry::{self, PathOp, StrokeAdjust};
use crate::mapper::{CoordinateMapper, MapMode, PageSpace};
use crate::objects::{
    Brush, Font, GraphicsObject, ObjectError, ObjectKind, ObjectRef, ObjectTable, Pen, StockObject,
};
use crate::record::{PolyKind, Record};
use crate::types::{ColorRef, PointF, PointL, SizeL, XForm};
use tiny_skia::{FillRule, Path};

/// Largest logical palette GDI accepts
const MAX_PALETTE_ENTRIES: usize = 1024;

/// Everything SaveDC preserves
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub page: PageSpace,
    pub pen: ObjectRef,
    pub brush: ObjectRef,
    pub font: ObjectRef,
    pub palette: ObjectRef,
    pub clip: ClipRegion,
    pub text_color: ColorRef,
    pub bk_color: ColorRef,
    pub bk_mode: u32,
    pub poly_fill_mode: u32,
    pub text_align: u32,
    pub arc_direction: u32,
    pub miter_limit: f64,
    pub stretch_mode: u32,
    pub rop2: u32,
    pub brush_org: PointL,
    pub current_position: PointL,
}

impl GraphicsState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            page: PageSpace::default(),
            pen: ObjectRef::Stock(StockObject::BlackPen),
            brush: ObjectRef::Stock(StockObject::WhiteBrush),
            font: ObjectRef::Stock(StockObject::SystemFont),
            palette: ObjectRef::Stock(StockObject::DefaultPalette),
            clip: ClipRegion::new(width, height),
            text_color: ColorRef::BLACK,
            bk_color: ColorRef::WHITE,
            bk_mode: OPAQUE,
            poly_fill_mode: ALTERNATE,
            text_align: 0,
            arc_direction: AD_COUNTERCLOCKWISE,
            miter_limit: 10.0,
            stretch_mode: 1,
            rop2: R2_COPYPEN,
            brush_org: PointL::default(),
            current_position: PointL::default(),
        }
    }

    pub fn fill_rule(&self) -> FillRule {
        if self.poly_fill_mode == WINDING {
            FillRule::Winding
        } else {
            FillRule::EvenOdd
        }
    }

    fn selects(&self, handle: u32) -> bool {
        [self.pen, self.brush, self.font, self.palette]
            .iter()
            .any(|r| matches!(r, ObjectRef::Table { handle: h, .. } if *h == handle))
    }
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Geometry collected between BeginPath and EndPath, in output pixels
#[derive(Debug, Clone, Default)]
pub struct PathBracket {
    ops: Vec<PathOp>,
    open: bool,
}

impl PathBracket {
    /// True between BeginPath and EndPath
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn ops(&self) -> &[PathOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn to_path(&self) -> Option<Path> {
        geometry::to_path(&self.ops)
    }

    fn begin(&mut self) {
        self.ops.clear();
        self.open = true;
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.open = false;
    }

    fn last_open_point(&self) -> Option<PointF> {
        match self.ops.last()? {
            PathOp::MoveTo(p) | PathOp::LineTo(p) | PathOp::CubicTo(_, _, p) => Some(*p),
            PathOp::Close => None,
        }
    }

    /// Append one primitive; `continues` joins it to the open figure when it
    /// starts where that figure ends
    fn append(&mut self, ops: &[PathOp], continues: bool) {
        let mut iter = ops.iter();
        if continues {
            if let (Some(PathOp::MoveTo(start)), Some(last)) = (ops.first(), self.last_open_point()) {
                if (start.x - last.x).abs() < 1e-6 && (start.y - last.y).abs() < 1e-6 {
                    iter.next();
                }
            }
        }
        self.ops.extend(iter.copied());
    }
}

/// Graphics state, object table, save stack and path bracket of one playback
#[derive(Debug)]
pub struct StateMachine {
    state: GraphicsState,
    objects: ObjectTable,
    saved: Vec<GraphicsState>,
    path: PathBracket,
}

impl StateMachine {
    /// State machine for a canvas of `width` x `height` pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: GraphicsState::new(width, height),
            objects: ObjectTable::new(),
            saved: Vec::new(),
            path: PathBracket::default(),
        }
    }

    pub fn state(&self) -> &GraphicsState {
        &self.state
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn path(&self) -> &PathBracket {
        &self.path
    }

    pub fn save_depth(&self) -> usize {
        self.saved.len()
    }

    pub fn pen(&self) -> Pen {
        self.objects.pen(&self.state.pen)
    }

    pub fn brush(&self) -> Brush {
        self.objects.brush(&self.state.brush)
    }

    pub fn font(&self) -> Font {
        self.objects.font(&self.state.font)
    }

    pub fn palette(&self) -> Vec<ColorRef> {
        self.objects.palette(&self.state.palette)
    }

    /// Text output with TA_UPDATECP moves the pen position
    pub fn set_current_position(&mut self, position: PointL) {
        self.state.current_position = position;
    }

    /// Apply the state changes of `record`. Problems are pushed to `sink`;
    /// the record is otherwise ignored.
    pub fn apply(&mut self, record: &Record, mapper: &CoordinateMapper, sink: &mut Vec<WarningKind>) {
        if self.path.is_open() {
            self.record_into_path(record, mapper, sink);
        }

        match record {
            Record::SetWindowExtEx(ext) => {
                if self.state.page.map_mode.uses_extents() {
                    self.state.page.window_ext = *ext;
                }
            }
            Record::SetViewportExtEx(ext) => {
                if self.state.page.map_mode.uses_extents() {
                    self.state.page.viewport_ext = *ext;
                }
            }
            Record::SetWindowOrgEx(org) => self.state.page.window_org = *org,
            Record::SetViewportOrgEx(org) => self.state.page.viewport_org = *org,
            Record::ScaleViewportExtEx {
                x_num,
                x_denom,
                y_num,
                y_denom,
            } => {
                if self.state.page.map_mode.uses_extents() {
                    match scale_extent(self.state.page.viewport_ext, *x_num, *x_denom, *y_num, *y_denom) {
                        Some(ext) => self.state.page.viewport_ext = ext,
                        None => sink.push(WarningKind::Malformed("zero scale denominator".to_string())),
                    }
                }
            }
            Record::ScaleWindowExtEx {
                x_num,
                x_denom,
                y_num,
                y_denom,
            } => {
                if self.state.page.map_mode.uses_extents() {
                    match scale_extent(self.state.page.window_ext, *x_num, *x_denom, *y_num, *y_denom) {
                        Some(ext) => self.state.page.window_ext = ext,
                        None => sink.push(WarningKind::Malformed("zero scale denominator".to_string())),
                    }
                }
            }
            Record::SetMapMode(mode) => match MapMode::from_u32(*mode) {
                Some(mode) => self.state.page.map_mode = mode,
                None => sink.push(WarningKind::Malformed(format!("unknown map mode {}", mode))),
            },
            Record::SetWorldTransform(xform) => self.state.page.world = *xform,
            Record::ModifyWorldTransform { xform, mode } => {
                let world = self.state.page.world;
                self.state.page.world = match *mode {
                    MWT_IDENTITY => XForm::identity(),
                    MWT_LEFTMULTIPLY => xform.then(&world),
                    MWT_RIGHTMULTIPLY => world.then(xform),
                    MWT_SET => *xform,
                    other => {
                        sink.push(WarningKind::Malformed(format!("unknown transform mode {}", other)));
                        world
                    }
                };
            }

            Record::SetBkMode(mode) => self.state.bk_mode = *mode,
            Record::SetPolyFillMode(mode) => self.state.poly_fill_mode = *mode,
            Record::SetRop2(rop) => self.state.rop2 = *rop,
            Record::SetStretchBltMode(mode) => self.state.stretch_mode = *mode,
            Record::SetTextAlign(align) => self.state.text_align = *align,
            Record::SetTextColor(color) => self.state.text_color = *color,
            Record::SetBkColor(color) => self.state.bk_color = *color,
            Record::SetBrushOrgEx(org) => self.state.brush_org = *org,
            Record::SetArcDirection(dir) => self.state.arc_direction = *dir,
            Record::SetMiterLimit(limit) => self.state.miter_limit = *limit,

            Record::SaveDc => self.saved.push(self.state.clone()),
            Record::RestoreDc(n) => self.restore(*n, sink),

            Record::SelectObject(handle) => match self.objects.reference(*handle) {
                Ok((reference, kind)) => match kind {
                    ObjectKind::Pen => self.state.pen = reference,
                    ObjectKind::Brush => self.state.brush = reference,
                    ObjectKind::Font => self.state.font = reference,
                    ObjectKind::Palette => self.state.palette = reference,
                },
                Err(err) => sink.push(object_warning(err)),
            },
            Record::SelectPalette(handle) => match self.objects.reference(*handle) {
                Ok((reference, ObjectKind::Palette)) => self.state.palette = reference,
                Ok(_) => sink.push(WarningKind::InvalidHandle(*handle)),
                Err(err) => sink.push(object_warning(err)),
            },
            Record::DeleteObject(handle) => {
                if self.state.selects(*handle) {
                    sink.push(WarningKind::HandleInUse(*handle));
                } else if let Err(err) = self.objects.delete(*handle) {
                    sink.push(object_warning(err));
                }
            }
            Record::CreatePen { handle, pen } => {
                self.create(*handle, GraphicsObject::Pen(Pen::from_log_pen(pen)), sink)
            }
            Record::ExtCreatePen { handle, pen } => {
                self.create(*handle, GraphicsObject::Pen(Pen::from_ext_pen(pen)), sink)
            }
            Record::CreateBrushIndirect { handle, brush } => {
                self.create(*handle, GraphicsObject::Brush(Brush::from_log_brush(brush)), sink)
            }
            Record::CreateMonoBrush { handle, pattern } => self.create(
                *handle,
                GraphicsObject::Brush(Brush::Pattern {
                    dib: pattern.clone(),
                    monochrome: true,
                }),
                sink,
            ),
            Record::CreateDibPatternBrushPt { handle, pattern } => self.create(
                *handle,
                GraphicsObject::Brush(Brush::Pattern {
                    dib: pattern.clone(),
                    monochrome: false,
                }),
                sink,
            ),
            Record::ExtCreateFontIndirectW { handle, font } => {
                self.create(*handle, GraphicsObject::Font(font.clone()), sink)
            }
            Record::CreatePalette { handle, entries } => {
                self.create(*handle, GraphicsObject::Palette(entries.clone()), sink)
            }
            Record::SetPaletteEntries { handle, start, entries } => match self.objects.palette_mut(*handle) {
                Some(palette) => {
                    let start = *start as usize;
                    let end = start.saturating_add(entries.len()).min(MAX_PALETTE_ENTRIES);
                    if end < start.saturating_add(entries.len()) {
                        sink.push(WarningKind::Malformed(format!(
                            "palette entries {}..{} exceed {} entries",
                            start,
                            start.saturating_add(entries.len()),
                            MAX_PALETTE_ENTRIES
                        )));
                    }
                    if start < end {
                        if palette.len() < end {
                            palette.resize(end, ColorRef::BLACK);
                        }
                        palette[start..end].copy_from_slice(&entries[..end - start]);
                    }
                }
                None => sink.push(WarningKind::UnknownHandle(*handle)),
            },
            Record::ResizePalette { handle, entries } => match self.objects.palette_mut(*handle) {
                Some(palette) => palette.resize((*entries as usize).min(MAX_PALETTE_ENTRIES), ColorRef::BLACK),
                None => sink.push(WarningKind::UnknownHandle(*handle)),
            },

            Record::OffsetClipRgn(offset) => match mapper.logical_to_pixel(&self.state) {
                Ok(m) => {
                    let v = m.apply_vector(offset.to_f64());
                    self.state.clip.offset(v.x.round() as i32, v.y.round() as i32);
                }
                Err(err) => sink.push(mapper_warning(err)),
            },
            Record::IntersectClipRect(rect) | Record::ExcludeClipRect(rect) => {
                let mode = if matches!(record, Record::IntersectClipRect(_)) {
                    RGN_AND
                } else {
                    RGN_DIFF
                };
                match mapper.logical_to_pixel(&self.state) {
                    Ok(m) => {
                        if let Some(path) = geometry::rect_path(rect, &m) {
                            self.state.clip.combine_path(&path, FillRule::Winding, mode);
                        } else if mode == RGN_AND {
                            self.state.clip.combine_rects(&[], RGN_AND);
                        }
                    }
                    Err(err) => sink.push(mapper_warning(err)),
                }
            }
            Record::ExtSelectClipRgn { mode, region } => match region {
                None if *mode == RGN_COPY => self.state.clip.reset(),
                None => sink.push(WarningKind::Malformed(format!(
                    "clip mode {} needs region data",
                    mode
                ))),
                Some(region) => {
                    let rects: Vec<_> = region
                        .rects
                        .iter()
                        .filter_map(|r| mapper.device_rect_to_pixels(r))
                        .collect();
                    self.state.clip.combine_rects(&rects, *mode);
                }
            },
            Record::SelectClipPath(mode) => {
                if let Some(path) = self.path.to_path() {
                    let rule = self.state.fill_rule();
                    self.state.clip.combine_path(&path, rule, *mode);
                } else if matches!(*mode, RGN_AND | RGN_COPY) {
                    self.state.clip.combine_rects(&[], *mode);
                }
                self.path.clear();
            }
            Record::SetMetaRgn => self.state.clip.set_meta(),

            Record::BeginPath => self.path.begin(),
            Record::EndPath => self.path.open = false,
            Record::AbortPath => self.path.clear(),
            Record::CloseFigure => {
                if self.path.is_open() && self.path.last_open_point().is_some() {
                    self.path.ops.push(PathOp::Close);
                }
            }
            Record::FlattenPath => self.path.ops = geometry::flatten(&self.path.ops),
            Record::WidenPath => self.widen_path(mapper, sink),
            Record::FillPath(_) | Record::StrokePath(_) | Record::StrokeAndFillPath(_) => self.path.clear(),

            _ => {}
        }

        if let Some(position) = geometry::end_position(record, &self.state) {
            self.state.current_position = position;
        }
    }

    fn create(&mut self, handle: u32, object: GraphicsObject, sink: &mut Vec<WarningKind>) {
        if let Err(err) = self.objects.create(handle, object) {
            sink.push(object_warning(err));
        }
    }

    fn restore(&mut self, n: i32, sink: &mut Vec<WarningKind>) {
        let depth = self.saved.len() as i64;
        let index = if n < 0 { depth + n as i64 } else { n as i64 - 1 };
        if n == 0 || index < 0 || index >= depth {
            sink.push(WarningKind::InvalidRestore(n));
            return;
        }
        let index = index as usize;
        self.state = self.saved[index].clone();
        self.saved.truncate(index);
    }

    fn record_into_path(&mut self, record: &Record, mapper: &CoordinateMapper, sink: &mut Vec<WarningKind>) {
        let continues = matches!(
            record,
            Record::LineTo(_)
                | Record::ArcTo { .. }
                | Record::AngleArc { .. }
                | Record::PolyDraw { .. }
                | Record::Poly {
                    kind: PolyKind::PolylineTo | PolyKind::PolyBezierTo,
                    ..
                }
        );
        match geometry::outline(record, &self.state, mapper, StrokeAdjust::NONE) {
            Ok(Some(outline)) => self.path.append(&outline.ops, continues),
            Ok(None) => {}
            Err(err) => sink.push(mapper_warning(err)),
        }
    }

    fn widen_path(&mut self, mapper: &CoordinateMapper, sink: &mut Vec<WarningKind>) {
        let Some(path) = self.path.to_path() else {
            return;
        };
        let m = match mapper.logical_to_pixel(&self.state) {
            Ok(m) => m,
            Err(err) => {
                sink.push(mapper_warning(err));
                return;
            }
        };
        let pen = self.pen();
        if pen.is_null() {
            return;
        }
        let stroke = pen_stroke(&pen, &m, mapper, self.state.miter_limit);
        if let Some(widened) = path.stroke(&stroke, 1.0) {
            self.path.ops = geometry::from_path(&widened);
        }
    }
}

fn scale_extent(ext: SizeL, x_num: i32, x_denom: i32, y_num: i32, y_denom: i32) -> Option<SizeL> {
    if x_denom == 0 || y_denom == 0 {
        return None;
    }
    let cx = ext.cx as i64 * x_num as i64 / x_denom as i64;
    let cy = ext.cy as i64 * y_num as i64 / y_denom as i64;
    Some(SizeL::new(
        cx.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        cy.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
    ))
}

fn object_warning(err: ObjectError) -> WarningKind {
    match err {
        ObjectError::InvalidHandle(h) => WarningKind::InvalidHandle(h),
        ObjectError::UnknownHandle(h) => WarningKind::UnknownHandle(h),
    }
}

pub(crate) fn mapper_warning(err: MapperError) -> WarningKind {
    match err {
        MapperError::DegenerateTransform(axis) => WarningKind::DegenerateTransform(axis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Brush;
    use crate::record::{EmfHeader, LogBrush, LogPen};
    use crate::types::RectL;

    fn mapper() -> CoordinateMapper {
        let header = EmfHeader {
            size: 88,
            bounds: RectL::new(0, 0, 99, 99),
            frame: RectL::new(0, 0, 2646, 2646),
            signature: ENHMETA_SIGNATURE,
            version: 0x10000,
            bytes: 100,
            records: 2,
            handles: 4,
            description: None,
            pal_entries: 0,
            device: SizeL::new(1920, 1920),
            millimeters: SizeL::new(508, 508),
            opengl: false,
            micrometers: None,
        };
        CoordinateMapper::new(&header, 96).unwrap()
    }

    fn run(sm: &mut StateMachine, records: &[Record]) -> Vec<WarningKind> {
        let m = mapper();
        let mut sink = Vec::new();
        for r in records {
            sm.apply(r, &m, &mut sink);
        }
        sink
    }

    fn red_brush(handle: u32) -> Record {
        Record::CreateBrushIndirect {
            handle,
            brush: LogBrush {
                style: 0,
                color: ColorRef(0xFF),
                hatch: 0,
            },
        }
    }

    #[test]
    fn test_defaults() {
        let sm = StateMachine::new(100, 100);
        assert_eq!(sm.pen().color, ColorRef::BLACK);
        assert_eq!(sm.brush(), Brush::Solid(ColorRef::WHITE));
        assert_eq!(sm.state().bk_mode, OPAQUE);
        assert_eq!(sm.state().page.map_mode, MapMode::Text);
    }

    #[test]
    fn test_palette_entries_are_capped() {
        let mut sm = StateMachine::new(100, 100);
        let warnings = run(
            &mut sm,
            &[
                Record::CreatePalette {
                    handle: 1,
                    entries: vec![ColorRef::WHITE; 2],
                },
                Record::SetPaletteEntries {
                    handle: 1,
                    start: 1,
                    entries: vec![ColorRef(0xFF)],
                },
                Record::SelectPalette(1),
            ],
        );
        assert!(warnings.is_empty());
        assert_eq!(sm.palette(), vec![ColorRef::WHITE, ColorRef(0xFF)]);

        let warnings = run(
            &mut sm,
            &[
                Record::SetPaletteEntries {
                    handle: 1,
                    start: 0x7FFF_FFFF,
                    entries: vec![ColorRef::BLACK],
                },
                Record::SetPaletteEntries {
                    handle: 1,
                    start: 1022,
                    entries: vec![ColorRef(0xFF00); 4],
                },
            ],
        );
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| matches!(w, WarningKind::Malformed(_))));
        let palette = sm.palette();
        assert_eq!(palette.len(), MAX_PALETTE_ENTRIES);
        assert_eq!(palette[1023], ColorRef(0xFF00));
    }

    #[test]
    fn test_select_and_delete() {
        let mut sm = StateMachine::new(100, 100);
        let warnings = run(&mut sm, &[red_brush(1), Record::SelectObject(1)]);
        assert!(warnings.is_empty());
        assert_eq!(sm.brush(), Brush::Solid(ColorRef(0xFF)));

        let warnings = run(&mut sm, &[Record::DeleteObject(1)]);
        assert_eq!(warnings, vec![WarningKind::HandleInUse(1)]);
        assert_eq!(sm.brush(), Brush::Solid(ColorRef(0xFF)));

        let warnings = run(&mut sm, &[Record::SelectObject(0x8000_0004), Record::DeleteObject(1)]);
        assert!(warnings.is_empty());
        assert_eq!(sm.brush(), Brush::Solid(ColorRef::BLACK));
    }

    #[test]
    fn test_unknown_handle_keeps_selection() {
        let mut sm = StateMachine::new(100, 100);
        let warnings = run(&mut sm, &[red_brush(1), Record::SelectObject(1), Record::SelectObject(9)]);
        assert_eq!(warnings, vec![WarningKind::UnknownHandle(9)]);
        assert_eq!(sm.brush(), Brush::Solid(ColorRef(0xFF)));
    }

    #[test]
    fn test_save_restore() {
        let mut sm = StateMachine::new(100, 100);
        run(
            &mut sm,
            &[
                Record::SetTextColor(ColorRef(1)),
                Record::SaveDc,
                Record::SetTextColor(ColorRef(2)),
                Record::SaveDc,
                Record::SetTextColor(ColorRef(3)),
            ],
        );
        assert_eq!(sm.save_depth(), 2);
        run(&mut sm, &[Record::RestoreDc(-1)]);
        assert_eq!(sm.state().text_color, ColorRef(2));
        assert_eq!(sm.save_depth(), 1);
        run(&mut sm, &[Record::SaveDc, Record::SetTextColor(ColorRef(4)), Record::RestoreDc(1)]);
        assert_eq!(sm.state().text_color, ColorRef(1));
        assert_eq!(sm.save_depth(), 0);
        let warnings = run(&mut sm, &[Record::RestoreDc(-1)]);
        assert_eq!(warnings, vec![WarningKind::InvalidRestore(-1)]);
    }

    #[test]
    fn test_restored_state_drops_deleted_objects() {
        let mut sm = StateMachine::new(100, 100);
        run(
            &mut sm,
            &[
                Record::CreatePen {
                    handle: 2,
                    pen: LogPen {
                        style: 0,
                        width: 3,
                        color: ColorRef(0xFF00),
                    },
                },
                Record::SelectObject(2),
                Record::SaveDc,
                Record::SelectObject(0x8000_0007),
                Record::DeleteObject(2),
                Record::RestoreDc(-1),
            ],
        );
        // The saved state still names handle 2, which no longer exists
        assert_eq!(sm.pen().color, ColorRef::BLACK);
    }

    #[test]
    fn test_world_transform_modes() {
        let mut sm = StateMachine::new(100, 100);
        let scale = XForm::scale(2.0, 2.0);
        let shift = XForm::translate(10.0, 0.0);
        run(
            &mut sm,
            &[
                Record::SetWorldTransform(scale),
                Record::ModifyWorldTransform {
                    xform: shift,
                    mode: MWT_LEFTMULTIPLY,
                },
            ],
        );
        assert_eq!(sm.state().page.world, shift.then(&scale));
        run(&mut sm, &[Record::ModifyWorldTransform { xform: shift, mode: MWT_IDENTITY }]);
        assert_eq!(sm.state().page.world, XForm::identity());
        run(
            &mut sm,
            &[
                Record::SetWorldTransform(scale),
                Record::ModifyWorldTransform {
                    xform: shift,
                    mode: MWT_RIGHTMULTIPLY,
                },
            ],
        );
        assert_eq!(sm.state().page.world, scale.then(&shift));
    }

    #[test]
    fn test_extents_ignored_in_fixed_modes() {
        let mut sm = StateMachine::new(100, 100);
        run(&mut sm, &[Record::SetWindowExtEx(SizeL::new(50, 50))]);
        assert_eq!(sm.state().page.window_ext, SizeL::new(1, 1));
        run(
            &mut sm,
            &[
                Record::SetMapMode(MM_ANISOTROPIC),
                Record::SetWindowExtEx(SizeL::new(50, 50)),
                Record::ScaleWindowExtEx {
                    x_num: 2,
                    x_denom: 1,
                    y_num: 1,
                    y_denom: 5,
                },
            ],
        );
        assert_eq!(sm.state().page.window_ext, SizeL::new(100, 10));
    }

    #[test]
    fn test_intersect_clip_rect() {
        let mut sm = StateMachine::new(100, 100);
        run(&mut sm, &[Record::IntersectClipRect(RectL::new(10, 10, 20, 20))]);
        assert_eq!(sm.state().clip.coverage(15, 15), 255);
        assert_eq!(sm.state().clip.coverage(5, 5), 0);
        run(&mut sm, &[Record::ExtSelectClipRgn { mode: RGN_COPY, region: None }]);
        assert!(sm.state().clip.is_unclipped());
    }

    #[test]
    fn test_path_bracket_joins_line_segments() {
        let mut sm = StateMachine::new(100, 100);
        run(
            &mut sm,
            &[
                Record::BeginPath,
                Record::MoveToEx(PointL::new(0, 0)),
                Record::LineTo(PointL::new(10, 0)),
                Record::LineTo(PointL::new(10, 10)),
                Record::CloseFigure,
                Record::EndPath,
            ],
        );
        assert!(!sm.path().is_open());
        let ops = sm.path().ops();
        assert_eq!(ops.len(), 4);
        let near = |op: &PathOp, x: f64, y: f64| match op {
            PathOp::MoveTo(p) | PathOp::LineTo(p) => (p.x - x).abs() < 1e-6 && (p.y - y).abs() < 1e-6,
            _ => false,
        };
        assert!(matches!(ops[0], PathOp::MoveTo(_)) && near(&ops[0], 0.0, 0.0));
        assert!(matches!(ops[1], PathOp::LineTo(_)) && near(&ops[1], 10.0, 0.0));
        assert!(matches!(ops[2], PathOp::LineTo(_)) && near(&ops[2], 10.0, 10.0));
        assert_eq!(ops[3], PathOp::Close);
        assert_eq!(sm.state().current_position, PointL::new(10, 10));
        run(&mut sm, &[Record::FillPath(RectL::default())]);
        assert!(sm.path().is_empty());
    }

    #[test]
    fn test_select_clip_path() {
        let mut sm = StateMachine::new(100, 100);
        run(
            &mut sm,
            &[
                Record::BeginPath,
                Record::Rectangle(RectL::new(0, 0, 50, 50)),
                Record::EndPath,
                Record::SelectClipPath(RGN_COPY),
            ],
        );
        assert_eq!(sm.state().clip.coverage(25, 25), 255);
        assert_eq!(sm.state().clip.coverage(75, 75), 0);
        assert!(sm.path().is_empty());
    }
}
