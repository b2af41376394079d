//! Decoded EMF records
//!
//! One [`Record`] variant per operation kind the converter understands. Records
//! keep the values exactly as stored in the metafile (logical units, COLORREFs,
//! raw DIB bytes); interpretation happens in the state machine and rasterizer.

use crate::emf_records;
use crate::types::{ColorRef, PointL, RectL, SizeL, XForm};

/// ENHMETAHEADER
#[derive(Debug, Clone, PartialEq)]
pub struct EmfHeader {
    /// Header record size in bytes
    pub size: u32,
    /// Inclusive bounds of the drawing in device units
    pub bounds: RectL,
    /// Picture frame in 0.01 mm units
    pub frame: RectL,
    pub signature: u32,
    pub version: u32,
    /// Declared size of the whole metafile in bytes
    pub bytes: u32,
    /// Declared number of records, header and EOF included
    pub records: u32,
    pub handles: u16,
    pub description: Option<String>,
    pub pal_entries: u32,
    /// Reference device size in pixels
    pub device: SizeL,
    /// Reference device size in millimetres
    pub millimeters: SizeL,
    pub opengl: bool,
    /// Reference device size in micrometres, when the extended header is present
    pub micrometers: Option<SizeL>,
}

/// Multi-point primitives sharing the POLY* record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyKind {
    Polyline,
    Polygon,
    PolyBezier,
    PolylineTo,
    PolyBezierTo,
}

/// LOGPEN from EMR_CREATEPEN
#[derive(Debug, Clone, PartialEq)]
pub struct LogPen {
    pub style: u32,
    pub width: i32,
    pub color: ColorRef,
}

/// LOGPENEX from EMR_EXTCREATEPEN
#[derive(Debug, Clone, PartialEq)]
pub struct ExtLogPen {
    pub style: u32,
    pub width: u32,
    pub brush_style: u32,
    pub color: ColorRef,
    pub hatch: u32,
    pub style_entries: Vec<u32>,
    pub pattern: Option<DibData>,
}

/// LOGBRUSH from EMR_CREATEBRUSHINDIRECT
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogBrush {
    pub style: u32,
    pub color: ColorRef,
    pub hatch: u32,
}

/// LOGFONTW from EMR_EXTCREATEFONTINDIRECTW
#[derive(Debug, Clone, PartialEq)]
pub struct LogFont {
    pub height: i32,
    pub width: i32,
    /// Tenths of a degree, counterclockwise from the x axis
    pub escapement: i32,
    pub orientation: i32,
    pub weight: i32,
    pub italic: bool,
    pub underline: bool,
    pub strike_out: bool,
    pub charset: u8,
    pub face_name: String,
}

/// Device independent bitmap carried inside a record
#[derive(Debug, Clone, PartialEq)]
pub struct DibData {
    /// DIB_RGB_COLORS or DIB_PAL_COLORS
    pub usage: u32,
    /// BITMAPINFO: header plus color table
    pub bmi: Vec<u8>,
    pub bits: Vec<u8>,
}

/// RegionData: list of rectangles
#[derive(Debug, Clone, PartialEq)]
pub struct RegionData {
    pub bounds: RectL,
    pub rects: Vec<RectL>,
}

/// Shared payload of BitBlt, StretchBlt, StretchDIBits, SetDIBitsToDevice and AlphaBlend
#[derive(Debug, Clone, PartialEq)]
pub struct Blit {
    pub bounds: RectL,
    pub dest: PointL,
    pub dest_size: SizeL,
    pub src: PointL,
    pub src_size: SizeL,
    /// Ternary raster operation; AlphaBlend stores its BLENDFUNCTION here
    pub rop: u32,
    pub xform_src: XForm,
    pub bk_color_src: ColorRef,
    pub source: Option<DibData>,
}

impl Blit {
    /// SourceConstantAlpha of an AlphaBlend BLENDFUNCTION
    pub fn constant_alpha(&self) -> u8 {
        ((self.rop >> 16) & 0xFF) as u8
    }
}

/// EmrText: one text run
#[derive(Debug, Clone, PartialEq)]
pub struct EmrText {
    pub reference: PointL,
    pub options: u32,
    pub rect: Option<RectL>,
    pub text: String,
    /// Per character advance in logical units
    pub dx: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Eof,

    // Coordinate space
    SetWindowExtEx(SizeL),
    SetWindowOrgEx(PointL),
    SetViewportExtEx(SizeL),
    SetViewportOrgEx(PointL),
    ScaleViewportExtEx { x_num: i32, x_denom: i32, y_num: i32, y_denom: i32 },
    ScaleWindowExtEx { x_num: i32, x_denom: i32, y_num: i32, y_denom: i32 },
    SetMapMode(u32),
    SetWorldTransform(XForm),
    ModifyWorldTransform { xform: XForm, mode: u32 },

    // Plain state
    SetBkMode(u32),
    SetPolyFillMode(u32),
    SetRop2(u32),
    SetStretchBltMode(u32),
    SetTextAlign(u32),
    SetTextColor(ColorRef),
    SetBkColor(ColorRef),
    SetBrushOrgEx(PointL),
    SetArcDirection(u32),
    SetMiterLimit(f64),
    MoveToEx(PointL),
    SaveDc,
    RestoreDc(i32),

    // Objects
    SelectObject(u32),
    DeleteObject(u32),
    CreatePen { handle: u32, pen: LogPen },
    ExtCreatePen { handle: u32, pen: ExtLogPen },
    CreateBrushIndirect { handle: u32, brush: LogBrush },
    CreateMonoBrush { handle: u32, pattern: DibData },
    CreateDibPatternBrushPt { handle: u32, pattern: DibData },
    ExtCreateFontIndirectW { handle: u32, font: LogFont },
    CreatePalette { handle: u32, entries: Vec<ColorRef> },
    SelectPalette(u32),
    SetPaletteEntries { handle: u32, start: u32, entries: Vec<ColorRef> },
    ResizePalette { handle: u32, entries: u32 },
    RealizePalette,

    // Clipping
    OffsetClipRgn(PointL),
    ExcludeClipRect(RectL),
    IntersectClipRect(RectL),
    ExtSelectClipRgn { mode: u32, region: Option<RegionData> },
    SelectClipPath(u32),
    SetMetaRgn,

    // Shapes
    Rectangle(RectL),
    RoundRect { rect: RectL, corner: SizeL },
    Ellipse(RectL),
    Arc { rect: RectL, start: PointL, end: PointL },
    ArcTo { rect: RectL, start: PointL, end: PointL },
    Chord { rect: RectL, start: PointL, end: PointL },
    Pie { rect: RectL, start: PointL, end: PointL },
    AngleArc { center: PointL, radius: u32, start_angle: f32, sweep_angle: f32 },
    LineTo(PointL),
    SetPixelV { point: PointL, color: ColorRef },
    Poly { kind: PolyKind, bounds: RectL, points: Vec<PointL> },
    PolyPoly { closed: bool, bounds: RectL, polys: Vec<Vec<PointL>> },
    PolyDraw { bounds: RectL, points: Vec<PointL>, types: Vec<u8> },

    // Path bracket
    BeginPath,
    EndPath,
    CloseFigure,
    FillPath(RectL),
    StrokePath(RectL),
    StrokeAndFillPath(RectL),
    FlattenPath,
    WidenPath,
    AbortPath,

    // Regions
    FillRgn { bounds: RectL, brush: u32, region: RegionData },
    FrameRgn { bounds: RectL, brush: u32, width: SizeL, region: RegionData },
    PaintRgn { bounds: RectL, region: RegionData },
    InvertRgn { bounds: RectL, region: RegionData },

    // Bitmaps
    BitBlt(Blit),
    StretchBlt(Blit),
    StretchDibits(Blit),
    SetDibitsToDevice(Blit),
    AlphaBlend(Blit),

    // Text
    ExtTextOut { bounds: RectL, graphics_mode: u32, text: EmrText },
    PolyTextOut { bounds: RectL, graphics_mode: u32, texts: Vec<EmrText> },

    Comment(Vec<u8>),
    /// Known record without visible effect on a raster output
    NoOp(u32),
    Unsupported { record_type: u32, raw: Vec<u8> },
}

impl Record {
    /// EMR_* code this record was decoded from
    pub fn record_type(&self) -> u32 {
        use emf_records::*;
        match self {
            Record::Eof => EMR_EOF,
            Record::SetWindowExtEx(_) => EMR_SETWINDOWEXTEX,
            Record::SetWindowOrgEx(_) => EMR_SETWINDOWORGEX,
            Record::SetViewportExtEx(_) => EMR_SETVIEWPORTEXTEX,
            Record::SetViewportOrgEx(_) => EMR_SETVIEWPORTORGEX,
            Record::ScaleViewportExtEx { .. } => EMR_SCALEVIEWPORTEXTEX,
            Record::ScaleWindowExtEx { .. } => EMR_SCALEWINDOWEXTEX,
            Record::SetMapMode(_) => EMR_SETMAPMODE,
            Record::SetWorldTransform(_) => EMR_SETWORLDTRANSFORM,
            Record::ModifyWorldTransform { .. } => EMR_MODIFYWORLDTRANSFORM,
            Record::SetBkMode(_) => EMR_SETBKMODE,
            Record::SetPolyFillMode(_) => EMR_SETPOLYFILLMODE,
            Record::SetRop2(_) => EMR_SETROP2,
            Record::SetStretchBltMode(_) => EMR_SETSTRETCHBLTMODE,
            Record::SetTextAlign(_) => EMR_SETTEXTALIGN,
            Record::SetTextColor(_) => EMR_SETTEXTCOLOR,
            Record::SetBkColor(_) => EMR_SETBKCOLOR,
            Record::SetBrushOrgEx(_) => EMR_SETBRUSHORGEX,
            Record::SetArcDirection(_) => EMR_SETARCDIRECTION,
            Record::SetMiterLimit(_) => EMR_SETMITERLIMIT,
            Record::MoveToEx(_) => EMR_MOVETOEX,
            Record::SaveDc => EMR_SAVEDC,
            Record::RestoreDc(_) => EMR_RESTOREDC,
            Record::SelectObject(_) => EMR_SELECTOBJECT,
            Record::DeleteObject(_) => EMR_DELETEOBJECT,
            Record::CreatePen { .. } => EMR_CREATEPEN,
            Record::ExtCreatePen { .. } => EMR_EXTCREATEPEN,
            Record::CreateBrushIndirect { .. } => EMR_CREATEBRUSHINDIRECT,
            Record::CreateMonoBrush { .. } => EMR_CREATEMONOBRUSH,
            Record::CreateDibPatternBrushPt { .. } => EMR_CREATEDIBPATTERNBRUSHPT,
            Record::ExtCreateFontIndirectW { .. } => EMR_EXTCREATEFONTINDIRECTW,
            Record::CreatePalette { .. } => EMR_CREATEPALETTE,
            Record::SelectPalette(_) => EMR_SELECTPALETTE,
            Record::SetPaletteEntries { .. } => EMR_SETPALETTEENTRIES,
            Record::ResizePalette { .. } => EMR_RESIZEPALETTE,
            Record::RealizePalette => EMR_REALIZEPALETTE,
            Record::OffsetClipRgn(_) => EMR_OFFSETCLIPRGN,
            Record::ExcludeClipRect(_) => EMR_EXCLUDECLIPRECT,
            Record::IntersectClipRect(_) => EMR_INTERSECTCLIPRECT,
            Record::ExtSelectClipRgn { .. } => EMR_EXTSELECTCLIPRGN,
            Record::SelectClipPath(_) => EMR_SELECTCLIPPATH,
            Record::SetMetaRgn => EMR_SETMETARGN,
            Record::Rectangle(_) => EMR_RECTANGLE,
            Record::RoundRect { .. } => EMR_ROUNDRECT,
            Record::Ellipse(_) => EMR_ELLIPSE,
            Record::Arc { .. } => EMR_ARC,
            Record::ArcTo { .. } => EMR_ARCTO,
            Record::Chord { .. } => EMR_CHORD,
            Record::Pie { .. } => EMR_PIE,
            Record::AngleArc { .. } => EMR_ANGLEARC,
            Record::LineTo(_) => EMR_LINETO,
            Record::SetPixelV { .. } => EMR_SETPIXELV,
            Record::Poly { kind, .. } => match kind {
                PolyKind::Polyline => EMR_POLYLINE,
                PolyKind::Polygon => EMR_POLYGON,
                PolyKind::PolyBezier => EMR_POLYBEZIER,
                PolyKind::PolylineTo => EMR_POLYLINETO,
                PolyKind::PolyBezierTo => EMR_POLYBEZIERTO,
            },
            Record::PolyPoly { closed, .. } => {
                if *closed {
                    EMR_POLYPOLYGON
                } else {
                    EMR_POLYPOLYLINE
                }
            }
            Record::PolyDraw { .. } => EMR_POLYDRAW,
            Record::BeginPath => EMR_BEGINPATH,
            Record::EndPath => EMR_ENDPATH,
            Record::CloseFigure => EMR_CLOSEFIGURE,
            Record::FillPath(_) => EMR_FILLPATH,
            Record::StrokePath(_) => EMR_STROKEPATH,
            Record::StrokeAndFillPath(_) => EMR_STROKEANDFILLPATH,
            Record::FlattenPath => EMR_FLATTENPATH,
            Record::WidenPath => EMR_WIDENPATH,
            Record::AbortPath => EMR_ABORTPATH,
            Record::FillRgn { .. } => EMR_FILLRGN,
            Record::FrameRgn { .. } => EMR_FRAMERGN,
            Record::PaintRgn { .. } => EMR_PAINTRGN,
            Record::InvertRgn { .. } => EMR_INVERTRGN,
            Record::BitBlt(_) => EMR_BITBLT,
            Record::StretchBlt(_) => EMR_STRETCHBLT,
            Record::StretchDibits(_) => EMR_STRETCHDIBITS,
            Record::SetDibitsToDevice(_) => EMR_SETDIBITSTODEVICE,
            Record::AlphaBlend(_) => EMR_ALPHABLEND,
            Record::ExtTextOut { .. } => EMR_EXTTEXTOUTW,
            Record::PolyTextOut { .. } => EMR_POLYTEXTOUTW,
            Record::Comment(_) => EMR_GDICOMMENT,
            Record::NoOp(record_type) => *record_type,
            Record::Unsupported { record_type, .. } => *record_type,
        }
    }

    /// Records that put pixels on the canvas (or into an open path bracket)
    pub fn is_drawing(&self) -> bool {
        matches!(
            self,
            Record::Rectangle(_)
                | Record::RoundRect { .. }
                | Record::Ellipse(_)
                | Record::Arc { .. }
                | Record::ArcTo { .. }
                | Record::Chord { .. }
                | Record::Pie { .. }
                | Record::AngleArc { .. }
                | Record::LineTo(_)
                | Record::SetPixelV { .. }
                | Record::Poly { .. }
                | Record::PolyPoly { .. }
                | Record::PolyDraw { .. }
                | Record::FillPath(_)
                | Record::StrokePath(_)
                | Record::StrokeAndFillPath(_)
                | Record::FillRgn { .. }
                | Record::FrameRgn { .. }
                | Record::PaintRgn { .. }
                | Record::InvertRgn { .. }
                | Record::BitBlt(_)
                | Record::StretchBlt(_)
                | Record::StretchDibits(_)
                | Record::SetDibitsToDevice(_)
                | Record::AlphaBlend(_)
                | Record::ExtTextOut { .. }
                | Record::PolyTextOut { .. }
        )
    }
}
